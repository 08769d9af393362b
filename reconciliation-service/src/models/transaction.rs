//! Ledger transaction rows as seen by the reconciliation engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Direction of money movement from the bank account's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Money leaving the account.
    Debit,
    /// Money arriving in the account.
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }

    /// Direction of a row that moves the balance by `delta`.
    pub fn for_delta(delta: Decimal) -> Self {
        if delta.is_sign_negative() {
            Self::Debit
        } else {
            Self::Credit
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }

    /// Balance effect of `amount` moving in this direction.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Self::Debit => -amount,
            Self::Credit => amount,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerTransaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub import_batch_id: Option<Uuid>,
    pub transaction_date: NaiveDate,
    pub description: String,
    /// Always positive; `direction` carries the sign.
    pub amount: Decimal,
    pub direction: String,
    pub is_balance_adjustment: bool,
    pub checkpoint_id: Option<Uuid>,
    pub transfer_match_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LedgerTransaction {
    pub fn parsed_direction(&self) -> Option<Direction> {
        Direction::parse(&self.direction)
    }

    /// Credits minus debits contributed by this row.
    pub fn net_effect(&self) -> Decimal {
        match self.parsed_direction() {
            Some(direction) => direction.signed(self.amount),
            None => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub import_batch_id: Option<Uuid>,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub direction: Direction,
    /// Set only for the synthetic row owned by a checkpoint.
    pub checkpoint_id: Option<Uuid>,
}

impl NewTransaction {
    pub fn is_balance_adjustment(&self) -> bool {
        self.checkpoint_id.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionChanges {
    pub transaction_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub direction: Option<Direction>,
}

impl TransactionChanges {
    pub fn is_empty(&self) -> bool {
        self.transaction_date.is_none()
            && self.description.is_none()
            && self.amount.is_none()
            && self.direction.is_none()
    }

    pub fn apply_to(&self, txn: &mut LedgerTransaction) {
        if let Some(date) = self.transaction_date {
            txn.transaction_date = date;
        }
        if let Some(description) = &self.description {
            txn.description = description.clone();
        }
        if let Some(amount) = self.amount {
            txn.amount = amount;
        }
        if let Some(direction) = self.direction {
            txn.direction = direction.as_str().to_string();
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub include_adjustments: bool,
    pub limit: i64,
}

/// Net movement (credits − debits) of ordinary transactions on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct DailyMovement {
    pub day: NaiveDate,
    pub net: Decimal,
}

/// A batch transaction whose transfer partner lives outside the batch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransferConflict {
    pub transaction_id: Uuid,
    pub partner_transaction_id: Uuid,
    pub partner_batch_id: Option<Uuid>,
}
