//! Checkpoint lifecycle: upsert, cascade, delete, reads.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    account_not_found, adjustments_by_checkpoint, cascade_account, lock_account,
    track_checkpoint, ReconciliationEngine,
};
use crate::models::{
    BalanceCheckpoint, CheckpointFilter, CheckpointSummary, LedgerTransaction, NewCheckpoint,
    SortOrder,
};
use crate::services::cascade::CheckpointRecalculation;
use crate::services::store::LedgerTx;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// A declared balance, already validated.
#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub account_id: Uuid,
    pub checkpoint_date: NaiveDate,
    pub declared_balance: Decimal,
    pub notes: Option<String>,
    pub import_batch_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointOutcome {
    pub checkpoint: BalanceCheckpoint,
    /// False when an existing checkpoint on the same date was updated.
    pub created: bool,
    pub adjustment_transaction: Option<LedgerTransaction>,
    pub cascade: Vec<CheckpointRecalculation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalculationReport {
    pub account_id: Uuid,
    pub updated_count: usize,
    pub checkpoints: Vec<CheckpointRecalculation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedCheckpoint {
    pub checkpoint_id: Uuid,
    pub account_id: Uuid,
    pub checkpoint_date: NaiveDate,
    pub removed_adjustment: Decimal,
    pub adjustment_transaction_deleted: bool,
    pub cascade: Vec<CheckpointRecalculation>,
}

#[derive(Debug, Clone)]
pub struct ListCheckpoints {
    pub include_reconciled: bool,
    pub order: SortOrder,
    pub page_size: i64,
    pub page_token: Option<NaiveDate>,
}

impl Default for ListCheckpoints {
    fn default() -> Self {
        Self {
            include_reconciled: true,
            order: SortOrder::Desc,
            page_size: DEFAULT_PAGE_SIZE,
            page_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointPage {
    pub checkpoints: Vec<BalanceCheckpoint>,
    pub next_page_token: Option<String>,
}

/// Insert the checkpoint or overwrite the declared half of the one already on
/// that date. Derived fields are left for the cascade. An existing checkpoint
/// keeps the batch it was created by, so rolling back a later import that
/// landed on its date leaves it in place.
pub(super) async fn upsert_checkpoint(
    tx: &mut dyn LedgerTx,
    tenant_id: Uuid,
    request: &CheckpointRequest,
) -> Result<(Uuid, bool), AppError> {
    let existing = tx
        .find_checkpoint_by_date(tenant_id, request.account_id, request.checkpoint_date)
        .await?;

    match existing {
        Some(checkpoint) => {
            let notes = request.notes.as_deref().or(checkpoint.notes.as_deref());
            tx.update_checkpoint_declaration(
                checkpoint.checkpoint_id,
                request.declared_balance,
                notes,
            )
            .await?;
            Ok((checkpoint.checkpoint_id, false))
        }
        None => {
            let created = tx
                .insert_checkpoint(&NewCheckpoint {
                    tenant_id,
                    account_id: request.account_id,
                    checkpoint_date: request.checkpoint_date,
                    declared_balance: request.declared_balance,
                    notes: request.notes.clone(),
                    import_batch_id: request.import_batch_id,
                })
                .await?;
            Ok((created.checkpoint_id, true))
        }
    }
}

/// Remove a checkpoint together with its adjustment row. Returns the removed
/// adjustment row, if there was one.
pub(super) async fn remove_checkpoint(
    tx: &mut dyn LedgerTx,
    checkpoint: &BalanceCheckpoint,
) -> Result<Option<LedgerTransaction>, AppError> {
    let mut adjustments =
        adjustments_by_checkpoint(tx, checkpoint.tenant_id, checkpoint.account_id).await?;
    let adjustment = adjustments.remove(&checkpoint.checkpoint_id);
    if let Some(row) = &adjustment {
        tx.delete_transaction(row.transaction_id).await?;
    }
    tx.delete_checkpoint(checkpoint.checkpoint_id).await?;
    Ok(adjustment)
}

impl ReconciliationEngine {
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, account_id = %request.account_id, checkpoint_date = %request.checkpoint_date))]
    pub async fn create_or_update_checkpoint(
        &self,
        tenant_id: Uuid,
        request: CheckpointRequest,
    ) -> Result<CheckpointOutcome, AppError> {
        let result = async {
            let mut tx = self.store.begin().await?;
            let account = lock_account(tx.as_mut(), tenant_id, request.account_id).await?;

            if let Some(batch_id) = request.import_batch_id {
                let batch = tx
                    .find_import_batch(tenant_id, batch_id)
                    .await?
                    .filter(|b| b.account_id == request.account_id)
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!(
                            "Import batch {} not found for this account",
                            batch_id
                        ))
                    })?;
                if batch.is_rolled_back() {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Import batch {} is rolled back",
                        batch_id
                    )));
                }
            }

            let (checkpoint_id, created) =
                upsert_checkpoint(tx.as_mut(), tenant_id, &request).await?;
            let cascade = cascade_account(tx.as_mut(), &account).await?;

            let checkpoint = tx
                .find_checkpoint(tenant_id, checkpoint_id)
                .await?
                .ok_or_else(|| {
                    AppError::InternalError(anyhow::anyhow!(
                        "Checkpoint {} vanished during upsert",
                        checkpoint_id
                    ))
                })?;
            let adjustment_transaction =
                adjustments_by_checkpoint(tx.as_mut(), tenant_id, account.account_id)
                    .await?
                    .remove(&checkpoint_id);

            tx.commit().await?;

            info!(
                checkpoint_id = %checkpoint.checkpoint_id,
                created = created,
                adjustment_amount = %checkpoint.adjustment_amount,
                is_reconciled = checkpoint.is_reconciled,
                "Checkpoint saved"
            );

            Ok::<_, AppError>(CheckpointOutcome {
                checkpoint,
                created,
                adjustment_transaction,
                cascade,
            })
        }
        .await;

        track_checkpoint("upsert", result)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    pub async fn recalculate_all_checkpoints(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<RecalculationReport, AppError> {
        let result = async {
            let mut tx = self.store.begin().await?;
            let account = lock_account(tx.as_mut(), tenant_id, account_id).await?;
            let checkpoints = cascade_account(tx.as_mut(), &account).await?;
            tx.commit().await?;

            let updated_count = checkpoints
                .iter()
                .filter(|c| c.balances_changed() || c.adjustment_transaction_updated)
                .count();

            info!(
                checkpoints = checkpoints.len(),
                updated = updated_count,
                "Checkpoints recalculated"
            );

            Ok::<_, AppError>(RecalculationReport {
                account_id,
                updated_count,
                checkpoints,
            })
        }
        .await;

        track_checkpoint("recalculate", result)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, checkpoint_id = %checkpoint_id))]
    pub async fn delete_checkpoint(
        &self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<DeletedCheckpoint, AppError> {
        let result = async {
            let not_found =
                || AppError::NotFound(anyhow::anyhow!("Checkpoint {} not found", checkpoint_id));

            let mut tx = self.store.begin().await?;
            let account_id = tx
                .find_checkpoint(tenant_id, checkpoint_id)
                .await?
                .ok_or_else(not_found)?
                .account_id;
            let account = lock_account(tx.as_mut(), tenant_id, account_id).await?;

            // Re-read under the lock.
            let checkpoint = tx
                .find_checkpoint(tenant_id, checkpoint_id)
                .await?
                .ok_or_else(not_found)?;

            let removed = remove_checkpoint(tx.as_mut(), &checkpoint).await?;
            let cascade = cascade_account(tx.as_mut(), &account).await?;
            tx.commit().await?;

            info!(
                checkpoint_date = %checkpoint.checkpoint_date,
                removed_adjustment = %checkpoint.adjustment_amount,
                "Checkpoint deleted"
            );

            Ok::<_, AppError>(DeletedCheckpoint {
                checkpoint_id,
                account_id,
                checkpoint_date: checkpoint.checkpoint_date,
                removed_adjustment: checkpoint.adjustment_amount,
                adjustment_transaction_deleted: removed.is_some(),
                cascade,
            })
        }
        .await;

        track_checkpoint("delete", result)
    }

    pub async fn get_checkpoint(
        &self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<BalanceCheckpoint, AppError> {
        self.store
            .get_checkpoint(tenant_id, checkpoint_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Checkpoint {} not found", checkpoint_id)))
    }

    #[instrument(skip(self, query), fields(tenant_id = %tenant_id, account_id = %account_id))]
    pub async fn list_checkpoints(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        query: ListCheckpoints,
    ) -> Result<CheckpointPage, AppError> {
        self.get_account(tenant_id, account_id).await?;

        let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
        let filter = CheckpointFilter {
            include_reconciled: query.include_reconciled,
            order: query.order,
            limit: page_size + 1,
            after_date: query.page_token,
        };

        let mut checkpoints = self
            .store
            .list_checkpoints(tenant_id, account_id, &filter)
            .await?;

        let next_page_token = if checkpoints.len() as i64 > page_size {
            checkpoints.truncate(page_size as usize);
            checkpoints.last().map(|c| c.checkpoint_date.to_string())
        } else {
            None
        };

        Ok(CheckpointPage {
            checkpoints,
            next_page_token,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    pub async fn checkpoint_summary(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<CheckpointSummary, AppError> {
        self.store
            .get_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| account_not_found(account_id))?;

        let filter = CheckpointFilter {
            include_reconciled: true,
            order: SortOrder::Asc,
            limit: i64::MAX,
            after_date: None,
        };
        let checkpoints = self
            .store
            .list_checkpoints(tenant_id, account_id, &filter)
            .await?;

        CheckpointSummary::from_checkpoints(account_id, &checkpoints)
    }
}
