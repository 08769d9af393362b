//! Balance checkpoint model.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use service_core::error::AppError;

use super::{add_money, balance_out_of_range, MAX_AMOUNT, MONEY_SCALE};

/// Differences smaller than one cent count as reconciled.
pub const RECONCILIATION_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub fn is_within_threshold(adjustment: Decimal) -> bool {
    adjustment.abs() < RECONCILIATION_THRESHOLD
}

/// A user- or import-declared bank balance at the end of a calendar day.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BalanceCheckpoint {
    pub checkpoint_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub checkpoint_date: NaiveDate,
    pub declared_balance: Decimal,
    pub calculated_balance: Decimal,
    pub adjustment_amount: Decimal,
    pub is_reconciled: bool,
    pub import_batch_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BalanceCheckpoint {
    pub fn balances(&self) -> CheckpointBalances {
        CheckpointBalances {
            calculated_balance: self.calculated_balance,
            adjustment_amount: self.adjustment_amount,
            is_reconciled: self.is_reconciled,
        }
    }

    pub fn window(&self) -> Option<CheckpointWindow> {
        CheckpointWindow::ending_on(self.checkpoint_date)
    }
}

/// The derived half of a checkpoint, rewritten on every recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointBalances {
    pub calculated_balance: Decimal,
    pub adjustment_amount: Decimal,
    pub is_reconciled: bool,
}

impl CheckpointBalances {
    pub fn derive(
        declared_balance: Decimal,
        calculated_balance: Decimal,
    ) -> Result<Self, AppError> {
        let mut calculated_balance = calculated_balance;
        calculated_balance.rescale(MONEY_SCALE);
        let mut adjustment_amount = declared_balance
            .checked_sub(calculated_balance)
            .ok_or_else(balance_out_of_range)?;
        adjustment_amount.rescale(MONEY_SCALE);
        if calculated_balance.abs() >= MAX_AMOUNT || adjustment_amount.abs() >= MAX_AMOUNT {
            return Err(balance_out_of_range());
        }
        Ok(Self {
            calculated_balance,
            adjustment_amount,
            is_reconciled: is_within_threshold(adjustment_amount),
        })
    }
}

/// Transactions a checkpoint covers: every day from account inception up to
/// and including the checkpoint date, i.e. `[inception, end_exclusive)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointWindow {
    end_exclusive: NaiveDate,
}

impl CheckpointWindow {
    /// `None` only for the last representable date.
    pub fn ending_on(checkpoint_date: NaiveDate) -> Option<Self> {
        checkpoint_date
            .checked_add_days(Days::new(1))
            .map(|end_exclusive| Self { end_exclusive })
    }

    pub fn end_exclusive(&self) -> NaiveDate {
        self.end_exclusive
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day < self.end_exclusive
    }
}

#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub checkpoint_date: NaiveDate,
    pub declared_balance: Decimal,
    pub notes: Option<String>,
    pub import_batch_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone)]
pub struct CheckpointFilter {
    pub include_reconciled: bool,
    pub order: SortOrder,
    /// Rows to fetch; callers ask for one extra to detect another page.
    pub limit: i64,
    /// Continue after this checkpoint date in `order` direction.
    pub after_date: Option<NaiveDate>,
}

impl CheckpointFilter {
    pub fn matches(&self, checkpoint: &BalanceCheckpoint) -> bool {
        if !self.include_reconciled && checkpoint.is_reconciled {
            return false;
        }
        match (self.after_date, self.order) {
            (Some(after), SortOrder::Asc) => checkpoint.checkpoint_date > after,
            (Some(after), SortOrder::Desc) => checkpoint.checkpoint_date < after,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointSummary {
    pub account_id: Uuid,
    pub total_checkpoints: usize,
    pub reconciled_count: usize,
    pub unreconciled_count: usize,
    /// Signed sum of adjustments on unreconciled checkpoints.
    pub outstanding_adjustment_total: Decimal,
    pub outstanding_adjustment_absolute: Decimal,
    pub earliest_checkpoint_date: Option<NaiveDate>,
    pub latest_checkpoint_date: Option<NaiveDate>,
    pub latest_declared_balance: Option<Decimal>,
}

impl CheckpointSummary {
    pub fn from_checkpoints(
        account_id: Uuid,
        checkpoints: &[BalanceCheckpoint],
    ) -> Result<Self, AppError> {
        let reconciled_count = checkpoints.iter().filter(|c| c.is_reconciled).count();
        let mut outstanding = checkpoints.iter().filter(|c| !c.is_reconciled);

        let (total, absolute) = outstanding.try_fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(total, absolute), c| {
                Ok::<_, AppError>((
                    add_money(total, c.adjustment_amount)?,
                    add_money(absolute, c.adjustment_amount.abs())?,
                ))
            },
        )?;

        let earliest = checkpoints.iter().min_by_key(|c| c.checkpoint_date);
        let latest = checkpoints.iter().max_by_key(|c| c.checkpoint_date);

        Ok(Self {
            account_id,
            total_checkpoints: checkpoints.len(),
            reconciled_count,
            unreconciled_count: checkpoints.len() - reconciled_count,
            outstanding_adjustment_total: total,
            outstanding_adjustment_absolute: absolute,
            earliest_checkpoint_date: earliest.map(|c| c.checkpoint_date),
            latest_checkpoint_date: latest.map(|c| c.checkpoint_date),
            latest_declared_balance: latest.map(|c| c.declared_balance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn checkpoint(day: NaiveDate, declared: Decimal, calculated: Decimal) -> BalanceCheckpoint {
        let balances = CheckpointBalances::derive(declared, calculated).unwrap();
        let now = Utc::now();
        BalanceCheckpoint {
            checkpoint_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            account_id: Uuid::nil(),
            checkpoint_date: day,
            declared_balance: declared,
            calculated_balance: balances.calculated_balance,
            adjustment_amount: balances.adjustment_amount,
            is_reconciled: balances.is_reconciled,
            import_batch_id: None,
            notes: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn derive_fails_instead_of_overflowing() {
        assert!(CheckpointBalances::derive(Decimal::MAX, Decimal::MIN).is_err());
        // Both sides fit, but the difference does not fit the stored column.
        assert!(CheckpointBalances::derive(dec!(600000000000000000), dec!(-600000000000000000)).is_err());
        let ok = CheckpointBalances::derive(dec!(10), dec!(-5)).unwrap();
        assert_eq!(ok.adjustment_amount, dec!(15));
    }

    #[test]
    fn threshold_is_one_cent() {
        assert!(is_within_threshold(dec!(0.009)));
        assert!(is_within_threshold(dec!(-0.009)));
        assert!(!is_within_threshold(dec!(0.01)));
        assert!(!is_within_threshold(dec!(-0.01)));
    }

    #[test]
    fn window_includes_whole_checkpoint_day() {
        let window = CheckpointWindow::ending_on(date(2025, 1, 31)).unwrap();
        assert_eq!(window.end_exclusive(), date(2025, 2, 1));
        assert!(window.contains(date(2025, 1, 31)));
        assert!(window.contains(date(1999, 12, 31)));
        assert!(!window.contains(date(2025, 2, 1)));
        assert!(CheckpointWindow::ending_on(NaiveDate::MAX).is_none());
    }

    #[test]
    fn summary_aggregates_outstanding_adjustments() {
        let checkpoints = vec![
            checkpoint(date(2025, 2, 28), dec!(1500000), dec!(1000000)),
            checkpoint(date(2025, 1, 31), dec!(1000000), dec!(1000000)),
            checkpoint(date(2025, 3, 31), dec!(1400000), dec!(1500000)),
        ];

        let summary = CheckpointSummary::from_checkpoints(Uuid::nil(), &checkpoints).unwrap();

        assert_eq!(summary.total_checkpoints, 3);
        assert_eq!(summary.reconciled_count, 1);
        assert_eq!(summary.unreconciled_count, 2);
        assert_eq!(summary.outstanding_adjustment_total, dec!(400000));
        assert_eq!(summary.outstanding_adjustment_absolute, dec!(600000));
        assert_eq!(summary.earliest_checkpoint_date, Some(date(2025, 1, 31)));
        assert_eq!(summary.latest_checkpoint_date, Some(date(2025, 3, 31)));
        assert_eq!(summary.latest_declared_balance, Some(dec!(1400000)));
    }

    #[test]
    fn empty_summary() {
        let summary = CheckpointSummary::from_checkpoints(Uuid::nil(), &[]).unwrap();
        assert_eq!(summary.total_checkpoints, 0);
        assert_eq!(summary.outstanding_adjustment_total, Decimal::ZERO);
        assert!(summary.latest_checkpoint_date.is_none());
    }

    #[test]
    fn filter_pages_in_both_directions() {
        let cp = checkpoint(date(2025, 2, 28), dec!(10), dec!(10));
        let mut filter = CheckpointFilter {
            include_reconciled: true,
            order: SortOrder::Asc,
            limit: 10,
            after_date: Some(date(2025, 1, 31)),
        };
        assert!(filter.matches(&cp));

        filter.order = SortOrder::Desc;
        assert!(!filter.matches(&cp));

        filter.after_date = None;
        filter.include_reconciled = false;
        assert!(!filter.matches(&cp));
    }
}
