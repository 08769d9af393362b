//! Storage abstraction for ledger rows, checkpoints and import batches.
//!
//! Reads that need no consistency with a following write go through
//! [`LedgerStore`]. Every mutation goes through a [`LedgerTx`] obtained from
//! [`LedgerStore::begin`]; nothing it does is visible to other callers until
//! [`LedgerTx::commit`], and dropping it uncommitted discards all of it.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BalanceCheckpoint, BankAccount, CheckpointBalances, CheckpointFilter, DailyMovement,
    ImportBatch, LedgerTransaction, NewBankAccount, NewCheckpoint, NewImportBatch,
    NewTransaction, TransactionChanges, TransactionFilter, TransferConflict,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a unit of work.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;

    async fn create_account(&self, account: &NewBankAccount) -> Result<BankAccount, AppError>;

    async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError>;

    async fn list_accounts(&self, tenant_id: Uuid) -> Result<Vec<BankAccount>, AppError>;

    async fn get_checkpoint(
        &self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Option<BalanceCheckpoint>, AppError>;

    /// Checkpoints ordered by `filter.order`, at most `filter.limit` rows.
    async fn list_checkpoints(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: &CheckpointFilter,
    ) -> Result<Vec<BalanceCheckpoint>, AppError>;

    async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<LedgerTransaction>, AppError>;

    /// Transactions ordered by date, adjustments last within a day.
    async fn list_transactions(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>, AppError>;

    async fn get_import_batch(
        &self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Option<ImportBatch>, AppError>;
}

/// One unit of work. Writers to the same account are serialised by
/// [`LedgerTx::lock_account`].
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock the account row for the rest of the unit of work.
    async fn lock_account(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<BankAccount>, AppError>;

    // Checkpoints

    /// All checkpoints of an account, ascending by date.
    async fn account_checkpoints(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<BalanceCheckpoint>, AppError>;

    async fn find_checkpoint(
        &mut self,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Option<BalanceCheckpoint>, AppError>;

    async fn find_checkpoint_by_date(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
        checkpoint_date: NaiveDate,
    ) -> Result<Option<BalanceCheckpoint>, AppError>;

    /// Insert with zeroed derived fields. A duplicate (account, date) fails
    /// with [`AppError::ConcurrentWrite`].
    async fn insert_checkpoint(
        &mut self,
        checkpoint: &NewCheckpoint,
    ) -> Result<BalanceCheckpoint, AppError>;

    /// Replace the user-declared half of a checkpoint.
    async fn update_checkpoint_declaration(
        &mut self,
        checkpoint_id: Uuid,
        declared_balance: Decimal,
        notes: Option<&str>,
    ) -> Result<(), AppError>;

    /// Persist the derived half of a checkpoint.
    async fn store_checkpoint_balances(
        &mut self,
        checkpoint_id: Uuid,
        balances: &CheckpointBalances,
    ) -> Result<(), AppError>;

    async fn delete_checkpoint(&mut self, checkpoint_id: Uuid) -> Result<(), AppError>;

    async fn batch_checkpoints(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<BalanceCheckpoint>, AppError>;

    // Ledger rows

    /// Per-day net (credits − debits) of non-adjustment transactions dated
    /// before `end_exclusive`, ascending by day.
    async fn daily_movements(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
        end_exclusive: NaiveDate,
    ) -> Result<Vec<DailyMovement>, AppError>;

    /// Adjustment rows of an account's checkpoints.
    async fn adjustment_transactions(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, AppError>;

    async fn insert_transactions(
        &mut self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<LedgerTransaction>, AppError>;

    async fn find_transaction(
        &mut self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<LedgerTransaction>, AppError>;

    async fn update_transaction(
        &mut self,
        transaction_id: Uuid,
        changes: &TransactionChanges,
    ) -> Result<LedgerTransaction, AppError>;

    async fn delete_transaction(&mut self, transaction_id: Uuid) -> Result<(), AppError>;

    /// Set (or clear, with `None`) the transfer match id on the given rows.
    async fn set_transfer_match(
        &mut self,
        transaction_ids: &[Uuid],
        transfer_match_id: Option<Uuid>,
    ) -> Result<(), AppError>;

    async fn transfer_pair(
        &mut self,
        tenant_id: Uuid,
        transfer_match_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>, AppError>;

    // Import batches

    async fn insert_import_batch(&mut self, batch: &NewImportBatch)
        -> Result<ImportBatch, AppError>;

    async fn find_import_batch(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Option<ImportBatch>, AppError>;

    /// Batch rows matched to a transaction that is not in the same batch.
    async fn cross_batch_transfer_matches(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<TransferConflict>, AppError>;

    /// Delete up to `limit` non-adjustment rows of the batch; returns the
    /// number deleted.
    async fn delete_batch_transactions(
        &mut self,
        tenant_id: Uuid,
        batch_id: Uuid,
        limit: i64,
    ) -> Result<u64, AppError>;

    async fn mark_batch_rolled_back(
        &mut self,
        batch_id: Uuid,
        deleted_count: i32,
    ) -> Result<ImportBatch, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
