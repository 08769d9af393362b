//! Checkpoint recalculation as a single left-to-right fold.
//!
//! A checkpoint's calculated balance is every ordinary transaction up to and
//! including its day, plus the adjustments of all earlier checkpoints. Each
//! step therefore depends on the adjustment produced by the previous one, so
//! checkpoints are always visited in ascending date order and never
//! revisited.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{
    add_money, is_within_threshold, BalanceCheckpoint, CheckpointBalances, DailyMovement, Direction,
    LedgerTransaction,
};

/// The single debit or credit row that books a checkpoint's adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjustmentEntry {
    pub amount: Decimal,
    pub direction: Direction,
}

impl AdjustmentEntry {
    /// `None` when the checkpoint is reconciled and needs no row.
    pub fn for_adjustment(adjustment_amount: Decimal) -> Option<Self> {
        if is_within_threshold(adjustment_amount) {
            return None;
        }
        Some(Self {
            amount: adjustment_amount.abs(),
            direction: Direction::for_delta(adjustment_amount),
        })
    }

    pub fn of(txn: &LedgerTransaction) -> Option<Self> {
        txn.parsed_direction().map(|direction| Self {
            amount: txn.amount,
            direction,
        })
    }
}

/// What must happen to a checkpoint's adjustment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentAction {
    Keep,
    Insert(AdjustmentEntry),
    Update {
        transaction_id: Uuid,
        entry: AdjustmentEntry,
    },
    Delete {
        transaction_id: Uuid,
    },
}

impl AdjustmentAction {
    pub fn plan(existing: Option<&LedgerTransaction>, adjustment_amount: Decimal) -> Self {
        let desired = AdjustmentEntry::for_adjustment(adjustment_amount);
        match (existing, desired) {
            (None, None) => Self::Keep,
            (None, Some(entry)) => Self::Insert(entry),
            (Some(txn), None) => Self::Delete {
                transaction_id: txn.transaction_id,
            },
            (Some(txn), Some(entry)) if AdjustmentEntry::of(txn) == Some(entry) => Self::Keep,
            (Some(txn), Some(entry)) => Self::Update {
                transaction_id: txn.transaction_id,
                entry,
            },
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Keep)
    }
}

/// Before/after view of one checkpoint in a cascade.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRecalculation {
    pub checkpoint_id: Uuid,
    pub checkpoint_date: NaiveDate,
    pub declared_balance: Decimal,
    pub before: CheckpointBalances,
    pub after: CheckpointBalances,
    pub adjustment_transaction_updated: bool,
    #[serde(skip)]
    pub action: AdjustmentAction,
}

impl CheckpointRecalculation {
    pub fn balances_changed(&self) -> bool {
        self.before != self.after
    }
}

/// Recompute every checkpoint of one account.
///
/// `adjustments` maps checkpoint id to its current adjustment row.
/// `movements` holds per-day net totals of non-adjustment transactions; days
/// after the last checkpoint are ignored. Input order does not matter.
/// Fails without partial output if a running total overflows.
pub fn recalculate(
    checkpoints: &[BalanceCheckpoint],
    adjustments: &HashMap<Uuid, LedgerTransaction>,
    movements: &[DailyMovement],
) -> Result<Vec<CheckpointRecalculation>, AppError> {
    let mut ordered: Vec<&BalanceCheckpoint> = checkpoints.iter().collect();
    ordered.sort_by_key(|c| c.checkpoint_date);

    let mut days: Vec<&DailyMovement> = movements.iter().collect();
    days.sort_by_key(|m| m.day);
    let mut days = days.into_iter().peekable();

    let mut transactions_total = Decimal::ZERO;
    let mut earlier_adjustments = Decimal::ZERO;
    let mut results = Vec::with_capacity(ordered.len());

    for checkpoint in ordered {
        while let Some(movement) = days.next_if(|m| m.day <= checkpoint.checkpoint_date) {
            transactions_total = add_money(transactions_total, movement.net)?;
        }

        let after = CheckpointBalances::derive(
            checkpoint.declared_balance,
            add_money(transactions_total, earlier_adjustments)?,
        )?;
        earlier_adjustments = add_money(earlier_adjustments, after.adjustment_amount)?;

        let action = AdjustmentAction::plan(
            adjustments.get(&checkpoint.checkpoint_id),
            after.adjustment_amount,
        );

        results.push(CheckpointRecalculation {
            checkpoint_id: checkpoint.checkpoint_id,
            checkpoint_date: checkpoint.checkpoint_date,
            declared_balance: checkpoint.declared_balance,
            before: checkpoint.balances(),
            after,
            adjustment_transaction_updated: action.is_change(),
            action,
        });
    }

    Ok(results)
}
