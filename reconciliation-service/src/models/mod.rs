//! Domain models for reconciliation-service.

mod account;
mod checkpoint;
mod import_batch;
mod input;
mod transaction;

use rust_decimal::Decimal;
use service_core::error::AppError;

/// Amounts carry at most this many fractional digits.
pub(crate) const MONEY_SCALE: u32 = 2;

/// Exclusive upper bound on the magnitude of one amount or declared balance (10^18).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_808_348_672, 232_830_643, 0, false, 0);

/// Running totals that leave the representable range reject the write.
pub(crate) fn balance_out_of_range() -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "Running balance exceeds the supported range"
    ))
}

pub(crate) fn add_money(a: Decimal, b: Decimal) -> Result<Decimal, AppError> {
    a.checked_add(b).ok_or_else(balance_out_of_range)
}

pub use account::{BankAccount, NewBankAccount};
pub use checkpoint::{
    is_within_threshold, BalanceCheckpoint, CheckpointBalances, CheckpointFilter,
    CheckpointSummary, CheckpointWindow, NewCheckpoint, SortOrder, RECONCILIATION_THRESHOLD,
};
pub use import_batch::{ImportBatch, ImportBatchStatus, NewImportBatch};
pub use input::{parse_amount, parse_balance, parse_business_date, AmountInput, InputError};
pub use transaction::{
    DailyMovement, Direction, LedgerTransaction, NewTransaction, TransactionChanges,
    TransactionFilter, TransferConflict,
};
