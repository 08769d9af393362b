//! Statement import and import rollback.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::checkpoints::{remove_checkpoint, upsert_checkpoint, CheckpointRequest};
use super::ledger::TransactionDraft;
use super::{cascade_account, lock_account, track_import, ReconciliationEngine};
use crate::models::{BalanceCheckpoint, ImportBatch, NewImportBatch, NewTransaction};
use crate::services::cascade::CheckpointRecalculation;

/// Parsed statement rows plus the optional closing balance.
#[derive(Debug, Clone)]
pub struct StatementImport {
    pub source_name: String,
    pub transactions: Vec<TransactionDraft>,
    pub ending_balance: Option<(NaiveDate, Decimal)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub batch: ImportBatch,
    pub transactions_inserted: usize,
    pub checkpoint: Option<BalanceCheckpoint>,
    pub cascade: Vec<CheckpointRecalculation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub batch: ImportBatch,
    pub deleted_transactions: u64,
    pub deleted_checkpoints: Vec<Uuid>,
    pub deleted_adjustment_transactions: usize,
    pub cascade: Vec<CheckpointRecalculation>,
}

fn batch_not_found(batch_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Import batch {} not found", batch_id))
}

impl ReconciliationEngine {
    #[instrument(skip(self, import), fields(tenant_id = %tenant_id, account_id = %account_id, rows = import.transactions.len()))]
    pub async fn import_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        import: StatementImport,
    ) -> Result<ImportOutcome, AppError> {
        let result = async {
            if import.transactions.is_empty() && import.ending_balance.is_none() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Import contains no transactions and no ending balance"
                )));
            }
            let transaction_count = i32::try_from(import.transactions.len()).map_err(|_| {
                AppError::BadRequest(anyhow::anyhow!("Too many transactions in one import"))
            })?;

            let mut tx = self.store.begin().await?;
            let account = lock_account(tx.as_mut(), tenant_id, account_id).await?;

            let batch = tx
                .insert_import_batch(&NewImportBatch {
                    tenant_id,
                    account_id,
                    source_name: import.source_name.clone(),
                    transaction_count,
                })
                .await?;

            let rows: Vec<NewTransaction> = import
                .transactions
                .into_iter()
                .map(|draft| draft.into_new(tenant_id, account_id, Some(batch.batch_id)))
                .collect();
            let inserted = tx.insert_transactions(&rows).await?;

            let checkpoint_id = match import.ending_balance {
                Some((checkpoint_date, declared_balance)) => {
                    let request = CheckpointRequest {
                        account_id,
                        checkpoint_date,
                        declared_balance,
                        notes: Some(format!("Statement import: {}", import.source_name)),
                        import_batch_id: Some(batch.batch_id),
                    };
                    let (id, _) = upsert_checkpoint(tx.as_mut(), tenant_id, &request).await?;
                    Some(id)
                }
                None => None,
            };

            let cascade = cascade_account(tx.as_mut(), &account).await?;
            let checkpoint = match checkpoint_id {
                Some(id) => tx.find_checkpoint(tenant_id, id).await?,
                None => None,
            };
            tx.commit().await?;

            info!(
                batch_id = %batch.batch_id,
                transactions = inserted.len(),
                checkpoint = checkpoint.is_some(),
                "Statement imported"
            );

            Ok::<_, AppError>(ImportOutcome {
                batch,
                transactions_inserted: inserted.len(),
                checkpoint,
                cascade,
            })
        }
        .await;

        track_import("import", result)
    }

    pub async fn get_import_batch(
        &self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<ImportBatch, AppError> {
        self.store
            .get_import_batch(tenant_id, batch_id)
            .await?
            .ok_or_else(|| batch_not_found(batch_id))
    }

    /// Undo an import: its rows, its checkpoints and their adjustments.
    ///
    /// Refused outright when a batch row is matched as a transfer with a row
    /// from outside the batch; nothing is deleted in that case.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, batch_id = %batch_id))]
    pub async fn rollback_import_batch(
        &self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<RollbackOutcome, AppError> {
        let result = async {
            // Account first, then batch: the order checkpoint saves lock in.
            let account_id = self.get_import_batch(tenant_id, batch_id).await?.account_id;

            let mut tx = self.store.begin().await?;
            let account = lock_account(tx.as_mut(), tenant_id, account_id).await?;
            let batch = tx
                .find_import_batch(tenant_id, batch_id)
                .await?
                .ok_or_else(|| batch_not_found(batch_id))?;

            if batch.is_rolled_back() {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Import batch {} is already rolled back",
                    batch_id
                )));
            }

            let conflicts = tx.cross_batch_transfer_matches(tenant_id, batch_id).await?;
            if let Some(first) = conflicts.first() {
                warn!(conflicts = conflicts.len(), "Rollback blocked by transfer matches");
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "{} transaction(s) in batch {} are matched as transfers with transactions outside it \
                     (e.g. {} with {}); unmatch them before rolling back",
                    conflicts.len(),
                    batch_id,
                    first.transaction_id,
                    first.partner_transaction_id
                )));
            }

            let chunk_size = self.config.rollback_chunk_size.max(1);
            let mut deleted_transactions = 0u64;
            loop {
                let deleted = tx
                    .delete_batch_transactions(tenant_id, batch_id, chunk_size)
                    .await?;
                deleted_transactions += deleted;
                if deleted < chunk_size as u64 {
                    break;
                }
            }

            let mut deleted_checkpoints = Vec::new();
            let mut deleted_adjustment_transactions = 0;
            for checkpoint in tx.batch_checkpoints(tenant_id, batch_id).await? {
                if remove_checkpoint(tx.as_mut(), &checkpoint).await?.is_some() {
                    deleted_adjustment_transactions += 1;
                }
                deleted_checkpoints.push(checkpoint.checkpoint_id);
            }

            let deleted_count = i32::try_from(deleted_transactions).unwrap_or(i32::MAX);
            let batch = tx.mark_batch_rolled_back(batch_id, deleted_count).await?;
            let cascade = cascade_account(tx.as_mut(), &account).await?;
            tx.commit().await?;

            info!(
                deleted_transactions = deleted_transactions,
                deleted_checkpoints = deleted_checkpoints.len(),
                "Import batch rolled back"
            );

            Ok::<_, AppError>(RollbackOutcome {
                batch,
                deleted_transactions,
                deleted_checkpoints,
                deleted_adjustment_transactions,
                cascade,
            })
        }
        .await;

        track_import("rollback", result)
    }
}
