//! In-process store for local development and tests.
//!
//! A unit of work holds the store-wide lock and edits a staged copy of the
//! state; commit swaps the copy in, drop throws it away.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    add_money, BalanceCheckpoint, BankAccount, CheckpointBalances, CheckpointFilter, DailyMovement,
    ImportBatch, ImportBatchStatus, LedgerTransaction, NewBankAccount, NewCheckpoint,
    NewImportBatch, NewTransaction, SortOrder, TransactionChanges, TransactionFilter,
    TransferConflict,
};
use crate::services::store::{LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, BankAccount>,
    checkpoints: HashMap<Uuid, BalanceCheckpoint>,
    transactions: HashMap<Uuid, LedgerTransaction>,
    batches: HashMap<Uuid, ImportBatch>,
}

impl MemoryState {
    fn checkpoints_of(&self, tenant_id: Uuid, account_id: Uuid) -> Vec<BalanceCheckpoint> {
        let mut checkpoints: Vec<BalanceCheckpoint> = self
            .checkpoints
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.account_id == account_id)
            .cloned()
            .collect();
        checkpoints.sort_by_key(|c| c.checkpoint_date);
        checkpoints
    }

    fn transaction(&self, tenant_id: Uuid, transaction_id: Uuid) -> Option<LedgerTransaction> {
        self.transactions
            .get(&transaction_id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
    }
}

/// Ledger store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(what: &str, id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", what, id))
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_account(&self, account: &NewBankAccount) -> Result<BankAccount, AppError> {
        let now = Utc::now();
        let created = BankAccount {
            account_id: Uuid::new_v4(),
            tenant_id: account.tenant_id,
            name: account.name.clone(),
            currency: account.currency.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.state
            .lock()
            .await
            .accounts
            .insert(created.account_id, created.clone());
        Ok(created)
    }

    async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_accounts(&self, tenant_id: Uuid) -> Result<Vec<BankAccount>, AppError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<BankAccount> = state
            .accounts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.account_id.cmp(&b.account_id)));
        Ok(accounts)
    }

    async fn get_checkpoint(
        &self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Option<BalanceCheckpoint>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .checkpoints
            .get(&checkpoint_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_checkpoints(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: &CheckpointFilter,
    ) -> Result<Vec<BalanceCheckpoint>, AppError> {
        let state = self.state.lock().await;
        let mut checkpoints: Vec<BalanceCheckpoint> = state
            .checkpoints_of(tenant_id, account_id)
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        if filter.order == SortOrder::Desc {
            checkpoints.reverse();
        }
        checkpoints.truncate(filter.limit.max(0) as usize);
        Ok(checkpoints)
    }

    async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        Ok(self.state.lock().await.transaction(tenant_id, transaction_id))
    }

    async fn list_transactions(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let state = self.state.lock().await;
        let mut transactions: Vec<LedgerTransaction> = state
            .transactions
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.account_id == account_id)
            .filter(|t| filter.include_adjustments || !t.is_balance_adjustment)
            .filter(|t| filter.from.map_or(true, |from| t.transaction_date >= from))
            .filter(|t| filter.to.map_or(true, |to| t.transaction_date <= to))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then(a.is_balance_adjustment.cmp(&b.is_balance_adjustment))
                .then(a.created_utc.cmp(&b.created_utc))
                .then(a.transaction_id.cmp(&b.transaction_id))
        });
        transactions.truncate(filter.limit.max(0) as usize);
        Ok(transactions)
    }

    async fn get_import_batch(
        &self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Option<ImportBatch>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .batches
            .get(&batch_id)
            .filter(|b| b.tenant_id == tenant_id)
            .cloned())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_account(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError> {
        Ok(self
            .staged
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn account_checkpoints(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<BalanceCheckpoint>, AppError> {
        Ok(self.staged.checkpoints_of(tenant_id, account_id))
    }

    async fn find_checkpoint(
        &mut self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Option<BalanceCheckpoint>, AppError> {
        Ok(self
            .staged
            .checkpoints
            .get(&checkpoint_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_checkpoint_by_date(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
        checkpoint_date: NaiveDate,
    ) -> Result<Option<BalanceCheckpoint>, AppError> {
        Ok(self
            .staged
            .checkpoints
            .values()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.account_id == account_id
                    && c.checkpoint_date == checkpoint_date
            })
            .cloned())
    }

    async fn insert_checkpoint(
        &mut self,
        checkpoint: &NewCheckpoint,
    ) -> Result<BalanceCheckpoint, AppError> {
        let taken = self.staged.checkpoints.values().any(|c| {
            c.account_id == checkpoint.account_id && c.checkpoint_date == checkpoint.checkpoint_date
        });
        if taken {
            return Err(AppError::ConcurrentWrite(anyhow::anyhow!(
                "A checkpoint for {} was written concurrently",
                checkpoint.checkpoint_date
            )));
        }

        let now = Utc::now();
        let created = BalanceCheckpoint {
            checkpoint_id: Uuid::new_v4(),
            tenant_id: checkpoint.tenant_id,
            account_id: checkpoint.account_id,
            checkpoint_date: checkpoint.checkpoint_date,
            declared_balance: checkpoint.declared_balance,
            calculated_balance: Decimal::ZERO,
            adjustment_amount: Decimal::ZERO,
            is_reconciled: false,
            import_batch_id: checkpoint.import_batch_id,
            notes: checkpoint.notes.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.staged
            .checkpoints
            .insert(created.checkpoint_id, created.clone());
        Ok(created)
    }

    async fn update_checkpoint_declaration(
        &mut self,
        checkpoint_id: Uuid,
        declared_balance: Decimal,
        notes: Option<&str>,
    ) -> Result<(), AppError> {
        let checkpoint = self
            .staged
            .checkpoints
            .get_mut(&checkpoint_id)
            .ok_or_else(|| missing("Checkpoint", checkpoint_id))?;
        checkpoint.declared_balance = declared_balance;
        checkpoint.notes = notes.map(str::to_string);
        checkpoint.updated_utc = Utc::now();
        Ok(())
    }

    async fn store_checkpoint_balances(
        &mut self,
        checkpoint_id: Uuid,
        balances: &CheckpointBalances,
    ) -> Result<(), AppError> {
        let checkpoint = self
            .staged
            .checkpoints
            .get_mut(&checkpoint_id)
            .ok_or_else(|| missing("Checkpoint", checkpoint_id))?;
        checkpoint.calculated_balance = balances.calculated_balance;
        checkpoint.adjustment_amount = balances.adjustment_amount;
        checkpoint.is_reconciled = balances.is_reconciled;
        checkpoint.updated_utc = Utc::now();
        Ok(())
    }

    async fn delete_checkpoint(&mut self, checkpoint_id: Uuid) -> Result<(), AppError> {
        let owns_adjustment = self
            .staged
            .transactions
            .values()
            .any(|t| t.checkpoint_id == Some(checkpoint_id));
        if owns_adjustment {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Checkpoint {} still owns an adjustment transaction",
                checkpoint_id
            )));
        }
        self.staged
            .checkpoints
            .remove(&checkpoint_id)
            .map(|_| ())
            .ok_or_else(|| missing("Checkpoint", checkpoint_id))
    }

    async fn batch_checkpoints(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<BalanceCheckpoint>, AppError> {
        let mut checkpoints: Vec<BalanceCheckpoint> = self
            .staged
            .checkpoints
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.import_batch_id == Some(batch_id))
            .cloned()
            .collect();
        checkpoints.sort_by_key(|c| c.checkpoint_date);
        Ok(checkpoints)
    }

    async fn daily_movements(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<DailyMovement>, AppError> {
        let mut by_day: HashMap<NaiveDate, Decimal> = HashMap::new();
        for txn in self.staged.transactions.values().filter(|t| {
            t.tenant_id == tenant_id
                && t.account_id == account_id
                && !t.is_balance_adjustment
                && t.transaction_date < end_exclusive
        }) {
            let day = by_day.entry(txn.transaction_date).or_default();
            *day = add_money(*day, txn.net_effect())?;
        }

        let mut movements: Vec<DailyMovement> = by_day
            .into_iter()
            .map(|(day, net)| DailyMovement { day, net })
            .collect();
        movements.sort_by_key(|m| m.day);
        Ok(movements)
    }

    async fn adjustment_transactions(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        Ok(self
            .staged
            .transactions
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id && t.account_id == account_id && t.is_balance_adjustment
            })
            .cloned()
            .collect())
    }

    async fn insert_transactions(
        &mut self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(transactions.len());
        for txn in transactions {
            if let Some(checkpoint_id) = txn.checkpoint_id {
                let duplicate = self
                    .staged
                    .transactions
                    .values()
                    .any(|t| t.checkpoint_id == Some(checkpoint_id));
                if duplicate {
                    return Err(AppError::ConcurrentWrite(anyhow::anyhow!(
                        "Checkpoint {} already has an adjustment transaction",
                        checkpoint_id
                    )));
                }
            }

            let row = LedgerTransaction {
                transaction_id: Uuid::new_v4(),
                tenant_id: txn.tenant_id,
                account_id: txn.account_id,
                import_batch_id: txn.import_batch_id,
                transaction_date: txn.transaction_date,
                description: txn.description.clone(),
                amount: txn.amount,
                direction: txn.direction.as_str().to_string(),
                is_balance_adjustment: txn.is_balance_adjustment(),
                checkpoint_id: txn.checkpoint_id,
                transfer_match_id: None,
                created_utc: now,
                updated_utc: now,
            };
            self.staged
                .transactions
                .insert(row.transaction_id, row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn find_transaction(
        &mut self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        Ok(self.staged.transaction(tenant_id, transaction_id))
    }

    async fn update_transaction(
        &mut self,
        transaction_id: Uuid,
        changes: &TransactionChanges,
    ) -> Result<LedgerTransaction, AppError> {
        let txn = self
            .staged
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| missing("Transaction", transaction_id))?;
        changes.apply_to(txn);
        txn.updated_utc = Utc::now();
        Ok(txn.clone())
    }

    async fn delete_transaction(&mut self, transaction_id: Uuid) -> Result<(), AppError> {
        self.staged
            .transactions
            .remove(&transaction_id)
            .map(|_| ())
            .ok_or_else(|| missing("Transaction", transaction_id))
    }

    async fn set_transfer_match(
        &mut self,
        transaction_ids: &[Uuid],
        transfer_match_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        for id in transaction_ids {
            let txn = self
                .staged
                .transactions
                .get_mut(id)
                .ok_or_else(|| missing("Transaction", *id))?;
            txn.transfer_match_id = transfer_match_id;
            txn.updated_utc = now;
        }
        Ok(())
    }

    async fn transfer_pair(
        &mut self,
        tenant_id: Uuid,
        transfer_match_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        Ok(self
            .staged
            .transactions
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.transfer_match_id == Some(transfer_match_id))
            .cloned()
            .collect())
    }

    async fn insert_import_batch(
        &mut self,
        batch: &NewImportBatch,
    ) -> Result<ImportBatch, AppError> {
        let created = ImportBatch {
            batch_id: Uuid::new_v4(),
            tenant_id: batch.tenant_id,
            account_id: batch.account_id,
            source_name: batch.source_name.clone(),
            status: ImportBatchStatus::Committed.as_str().to_string(),
            transaction_count: batch.transaction_count,
            deleted_count: 0,
            created_utc: Utc::now(),
            rolled_back_utc: None,
        };
        self.staged.batches.insert(created.batch_id, created.clone());
        Ok(created)
    }

    async fn find_import_batch(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Option<ImportBatch>, AppError> {
        Ok(self
            .staged
            .batches
            .get(&batch_id)
            .filter(|b| b.tenant_id == tenant_id)
            .cloned())
    }

    async fn cross_batch_transfer_matches(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<TransferConflict>, AppError> {
        let transactions = &self.staged.transactions;
        let mut conflicts = Vec::new();
        for txn in transactions
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.import_batch_id == Some(batch_id))
        {
            let Some(match_id) = txn.transfer_match_id else {
                continue;
            };
            for partner in transactions.values().filter(|p| {
                p.transfer_match_id == Some(match_id)
                    && p.transaction_id != txn.transaction_id
                    && p.import_batch_id != Some(batch_id)
            }) {
                conflicts.push(TransferConflict {
                    transaction_id: txn.transaction_id,
                    partner_transaction_id: partner.transaction_id,
                    partner_batch_id: partner.import_batch_id,
                });
            }
        }
        conflicts.sort_by_key(|c| c.transaction_id);
        Ok(conflicts)
    }

    async fn delete_batch_transactions(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
        limit: i64,
    ) -> Result<u64, AppError> {
        let doomed: Vec<Uuid> = self
            .staged
            .transactions
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.import_batch_id == Some(batch_id)
                    && !t.is_balance_adjustment
            })
            .map(|t| t.transaction_id)
            .take(limit.max(0) as usize)
            .collect();
        for id in &doomed {
            self.staged.transactions.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn mark_batch_rolled_back(
        &mut self,
        batch_id: Uuid,
        deleted_count: i32,
    ) -> Result<ImportBatch, AppError> {
        let batch = self
            .staged
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| missing("Import batch", batch_id))?;
        batch.status = ImportBatchStatus::RolledBack.as_str().to_string();
        batch.deleted_count = deleted_count;
        batch.rolled_back_utc = Some(Utc::now());
        Ok(batch.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
