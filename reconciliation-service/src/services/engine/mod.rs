//! Reconciliation engine.
//!
//! Every mutating operation runs in one [`LedgerTx`]: lock the account, make
//! the change, re-run the checkpoint fold for the whole account, persist what
//! the fold changed, commit. A failure anywhere drops the unit of work and
//! leaves the account exactly as it was.

mod checkpoints;
mod imports;
mod ledger;

pub use checkpoints::{
    CheckpointOutcome, CheckpointPage, CheckpointRequest, DeletedCheckpoint, ListCheckpoints,
    RecalculationReport,
};
pub use imports::{ImportOutcome, RollbackOutcome, StatementImport};
pub use ledger::{TransactionDraft, TransactionWrite, TransferMatch};

use chrono::NaiveDate;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{BankAccount, LedgerTransaction, NewTransaction, TransactionChanges};
use crate::services::cascade::{self, AdjustmentAction, CheckpointRecalculation};
use crate::services::metrics::{
    record_checkpoint_operation, record_error, record_import_operation, record_recalculated,
};
use crate::services::store::{LedgerStore, LedgerTx};

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }
}

fn account_not_found(account_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id))
}

async fn lock_account(
    tx: &mut dyn LedgerTx,
    tenant_id: Uuid,
    account_id: Uuid,
) -> Result<BankAccount, AppError> {
    tx.lock_account(tenant_id, account_id)
        .await?
        .ok_or_else(|| account_not_found(account_id))
}

fn adjustment_description(checkpoint_date: NaiveDate) -> String {
    format!("Balance adjustment for checkpoint {}", checkpoint_date)
}

/// Adjustment rows of an account keyed by owning checkpoint.
async fn adjustments_by_checkpoint(
    tx: &mut dyn LedgerTx,
    tenant_id: Uuid,
    account_id: Uuid,
) -> Result<HashMap<Uuid, LedgerTransaction>, AppError> {
    Ok(tx
        .adjustment_transactions(tenant_id, account_id)
        .await?
        .into_iter()
        .filter_map(|txn| txn.checkpoint_id.map(|id| (id, txn)))
        .collect())
}

/// Re-run the fold over every checkpoint of the account and write back
/// whatever changed. Must run after the account is locked.
#[instrument(skip(tx, account), fields(account_id = %account.account_id))]
async fn cascade_account(
    tx: &mut dyn LedgerTx,
    account: &BankAccount,
) -> Result<Vec<CheckpointRecalculation>, AppError> {
    let tenant_id = account.tenant_id;
    let account_id = account.account_id;

    let checkpoints = tx.account_checkpoints(tenant_id, account_id).await?;
    let Some(last) = checkpoints.last() else {
        return Ok(Vec::new());
    };
    let end_exclusive = last
        .window()
        .map(|w| w.end_exclusive())
        .unwrap_or(NaiveDate::MAX);

    let movements = tx
        .daily_movements(tenant_id, account_id, end_exclusive)
        .await?;
    let adjustments = adjustments_by_checkpoint(tx, tenant_id, account_id).await?;

    let results = cascade::recalculate(&checkpoints, &adjustments, &movements)?;

    let mut changed = 0;
    for result in &results {
        if result.balances_changed() {
            tx.store_checkpoint_balances(result.checkpoint_id, &result.after)
                .await?;
        }
        apply_adjustment(tx, account, result).await?;
        if result.balances_changed() || result.adjustment_transaction_updated {
            changed += 1;
        }
    }

    record_recalculated(changed, results.len() - changed);
    debug!(
        checkpoints = results.len(),
        changed = changed,
        "Checkpoint cascade applied"
    );

    Ok(results)
}

async fn apply_adjustment(
    tx: &mut dyn LedgerTx,
    account: &BankAccount,
    result: &CheckpointRecalculation,
) -> Result<(), AppError> {
    match result.action {
        AdjustmentAction::Keep => {}
        AdjustmentAction::Insert(entry) => {
            tx.insert_transactions(&[NewTransaction {
                tenant_id: account.tenant_id,
                account_id: account.account_id,
                import_batch_id: None,
                transaction_date: result.checkpoint_date,
                description: adjustment_description(result.checkpoint_date),
                amount: entry.amount,
                direction: entry.direction,
                checkpoint_id: Some(result.checkpoint_id),
            }])
            .await?;
        }
        AdjustmentAction::Update {
            transaction_id,
            entry,
        } => {
            let changes = TransactionChanges {
                transaction_date: Some(result.checkpoint_date),
                description: None,
                amount: Some(entry.amount),
                direction: Some(entry.direction),
            };
            tx.update_transaction(transaction_id, &changes).await?;
        }
        AdjustmentAction::Delete { transaction_id } => {
            tx.delete_transaction(transaction_id).await?;
        }
    }
    Ok(())
}

fn track_checkpoint<T>(operation: &str, result: Result<T, AppError>) -> Result<T, AppError> {
    match &result {
        Ok(_) => record_checkpoint_operation(operation, "success"),
        Err(e) => {
            record_checkpoint_operation(operation, "error");
            record_error(e.kind());
        }
    }
    result
}

fn track_import<T>(operation: &str, result: Result<T, AppError>) -> Result<T, AppError> {
    match &result {
        Ok(_) => record_import_operation(operation, "success"),
        Err(e) => {
            record_import_operation(operation, "error");
            record_error(e.kind());
        }
    }
    result
}
