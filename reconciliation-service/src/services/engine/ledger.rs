//! Accounts, manual transactions and transfer matching.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{account_not_found, cascade_account, lock_account, ReconciliationEngine};
use crate::models::{
    BankAccount, Direction, LedgerTransaction, NewBankAccount, NewTransaction,
    TransactionChanges, TransactionFilter,
};
use crate::services::cascade::CheckpointRecalculation;
use crate::services::store::LedgerTx;

pub const MAX_TRANSACTION_PAGE: i64 = 1_000;

/// A validated ordinary transaction, before it belongs to any account.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub direction: Direction,
}

impl TransactionDraft {
    pub(super) fn into_new(
        self,
        tenant_id: Uuid,
        account_id: Uuid,
        import_batch_id: Option<Uuid>,
    ) -> NewTransaction {
        NewTransaction {
            tenant_id,
            account_id,
            import_batch_id,
            transaction_date: self.transaction_date,
            description: self.description,
            amount: self.amount,
            direction: self.direction,
            checkpoint_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionWrite {
    pub transaction: LedgerTransaction,
    pub cascade: Vec<CheckpointRecalculation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferMatch {
    pub transfer_match_id: Option<Uuid>,
    pub transactions: Vec<LedgerTransaction>,
}

fn transaction_not_found(transaction_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Transaction {} not found", transaction_id))
}

fn reject_adjustment(txn: &LedgerTransaction) -> Result<(), AppError> {
    if txn.is_balance_adjustment {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Transaction {} is a balance adjustment owned by its checkpoint; change the checkpoint instead",
            txn.transaction_id
        )));
    }
    Ok(())
}

fn matched_transfer(txn: &LedgerTransaction) -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "Transaction {} is matched as a transfer; unmatch it first",
        txn.transaction_id
    ))
}

/// Matched legs must keep opposite directions and equal amounts.
fn reject_transfer_leg_change(
    txn: &LedgerTransaction,
    changes: &TransactionChanges,
) -> Result<(), AppError> {
    if txn.transfer_match_id.is_none() {
        return Ok(());
    }
    let amount_changes = changes.amount.is_some_and(|amount| amount != txn.amount);
    let direction_changes = changes
        .direction
        .is_some_and(|direction| Some(direction) != txn.parsed_direction());
    if amount_changes || direction_changes {
        return Err(matched_transfer(txn));
    }
    Ok(())
}

/// Find a transaction and lock its account, re-reading the row under the lock.
async fn locked_transaction(
    tx: &mut dyn LedgerTx,
    tenant_id: Uuid,
    transaction_id: Uuid,
) -> Result<(BankAccount, LedgerTransaction), AppError> {
    let account_id = tx
        .find_transaction(tenant_id, transaction_id)
        .await?
        .ok_or_else(|| transaction_not_found(transaction_id))?
        .account_id;
    let account = lock_account(tx, tenant_id, account_id).await?;
    let txn = tx
        .find_transaction(tenant_id, transaction_id)
        .await?
        .ok_or_else(|| transaction_not_found(transaction_id))?;
    Ok((account, txn))
}

impl ReconciliationEngine {
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn create_account(
        &self,
        tenant_id: Uuid,
        name: &str,
        currency: &str,
    ) -> Result<BankAccount, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Account name is required"
            )));
        }

        self.store
            .create_account(&NewBankAccount {
                tenant_id,
                name: name.to_string(),
                currency: currency.trim().to_ascii_uppercase(),
            })
            .await
    }

    pub async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<BankAccount, AppError> {
        self.store
            .get_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| account_not_found(account_id))
    }

    pub async fn list_accounts(&self, tenant_id: Uuid) -> Result<Vec<BankAccount>, AppError> {
        self.store.list_accounts(tenant_id).await
    }

    #[instrument(skip(self, draft), fields(tenant_id = %tenant_id, account_id = %account_id))]
    pub async fn create_transaction(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        draft: TransactionDraft,
    ) -> Result<TransactionWrite, AppError> {
        let mut tx = self.store.begin().await?;
        let account = lock_account(tx.as_mut(), tenant_id, account_id).await?;

        let transaction = tx
            .insert_transactions(&[draft.into_new(tenant_id, account_id, None)])
            .await?
            .pop()
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Insert returned no row")))?;
        let cascade = cascade_account(tx.as_mut(), &account).await?;
        tx.commit().await?;

        info!(transaction_id = %transaction.transaction_id, "Transaction created");

        Ok(TransactionWrite {
            transaction,
            cascade,
        })
    }

    pub async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<LedgerTransaction, AppError> {
        self.store
            .get_transaction(tenant_id, transaction_id)
            .await?
            .ok_or_else(|| transaction_not_found(transaction_id))
    }

    pub async fn list_transactions(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        self.get_account(tenant_id, account_id).await?;

        let filter = TransactionFilter {
            limit: filter.limit.clamp(1, MAX_TRANSACTION_PAGE),
            ..filter
        };
        self.store
            .list_transactions(tenant_id, account_id, &filter)
            .await
    }

    #[instrument(skip(self, changes), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn update_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        changes: TransactionChanges,
    ) -> Result<TransactionWrite, AppError> {
        if changes.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("No changes supplied")));
        }

        let mut tx = self.store.begin().await?;
        let (account, existing) = locked_transaction(tx.as_mut(), tenant_id, transaction_id).await?;
        reject_adjustment(&existing)?;
        reject_transfer_leg_change(&existing, &changes)?;

        let transaction = tx.update_transaction(transaction_id, &changes).await?;
        let cascade = cascade_account(tx.as_mut(), &account).await?;
        tx.commit().await?;

        info!("Transaction updated");

        Ok(TransactionWrite {
            transaction,
            cascade,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn delete_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<TransactionWrite, AppError> {
        let mut tx = self.store.begin().await?;
        let (account, existing) = locked_transaction(tx.as_mut(), tenant_id, transaction_id).await?;
        reject_adjustment(&existing)?;
        if existing.transfer_match_id.is_some() {
            return Err(matched_transfer(&existing));
        }

        tx.delete_transaction(transaction_id).await?;
        let cascade = cascade_account(tx.as_mut(), &account).await?;
        tx.commit().await?;

        info!("Transaction deleted");

        Ok(TransactionWrite {
            transaction: existing,
            cascade,
        })
    }

    /// Pair two opposite movements on different accounts as one transfer.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn match_transfer(
        &self,
        tenant_id: Uuid,
        first_id: Uuid,
        second_id: Uuid,
    ) -> Result<TransferMatch, AppError> {
        if first_id == second_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A transaction cannot be matched with itself"
            )));
        }

        let mut tx = self.store.begin().await?;

        let mut account_ids = Vec::with_capacity(2);
        for id in [first_id, second_id] {
            let txn = tx
                .find_transaction(tenant_id, id)
                .await?
                .ok_or_else(|| transaction_not_found(id))?;
            account_ids.push(txn.account_id);
        }
        // Fixed lock order keeps two concurrent matches from deadlocking.
        account_ids.sort();
        account_ids.dedup();
        for account_id in &account_ids {
            lock_account(tx.as_mut(), tenant_id, *account_id).await?;
        }

        let mut pair = Vec::with_capacity(2);
        for id in [first_id, second_id] {
            let txn = tx
                .find_transaction(tenant_id, id)
                .await?
                .ok_or_else(|| transaction_not_found(id))?;
            reject_adjustment(&txn)?;
            if txn.transfer_match_id.is_some() {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Transaction {} is already matched as a transfer",
                    id
                )));
            }
            pair.push(txn);
        }

        let (first, second) = (&pair[0], &pair[1]);
        if first.account_id == second.account_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transfer legs must be on different accounts"
            )));
        }
        if first.amount != second.amount {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transfer legs must have equal amounts ({} vs {})",
                first.amount,
                second.amount
            )));
        }
        match (first.parsed_direction(), second.parsed_direction()) {
            (Some(a), Some(b)) if a == b.opposite() => {}
            _ => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Transfer legs must move money in opposite directions"
                )))
            }
        }

        let transfer_match_id = Uuid::new_v4();
        tx.set_transfer_match(&[first_id, second_id], Some(transfer_match_id))
            .await?;
        let transactions = tx.transfer_pair(tenant_id, transfer_match_id).await?;
        tx.commit().await?;

        info!(transfer_match_id = %transfer_match_id, "Transfer matched");

        Ok(TransferMatch {
            transfer_match_id: Some(transfer_match_id),
            transactions,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn unmatch_transfer(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<TransferMatch, AppError> {
        let mut tx = self.store.begin().await?;
        let (_, txn) = locked_transaction(tx.as_mut(), tenant_id, transaction_id).await?;

        let Some(transfer_match_id) = txn.transfer_match_id else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Transaction {} is not matched as a transfer",
                transaction_id
            )));
        };

        let pair = tx.transfer_pair(tenant_id, transfer_match_id).await?;
        let ids: Vec<Uuid> = pair.iter().map(|t| t.transaction_id).collect();
        tx.set_transfer_match(&ids, None).await?;

        let mut transactions = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(row) = tx.find_transaction(tenant_id, *id).await? {
                transactions.push(row);
            }
        }
        tx.commit().await?;

        info!(transfer_match_id = %transfer_match_id, "Transfer unmatched");

        Ok(TransferMatch {
            transfer_match_id: None,
            transactions,
        })
    }
}
