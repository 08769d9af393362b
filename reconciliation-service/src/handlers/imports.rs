//! Statement import and rollback handlers.
//!
//! File parsing happens upstream; rows arrive here already extracted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use service_core::error::AppError;
use service_core::middleware::TenantContext;
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    parse_amount, parse_balance, parse_business_date, AmountInput, Direction, ImportBatch,
    InputError,
};
use crate::services::engine::{ImportOutcome, RollbackOutcome, StatementImport, TransactionDraft};
use crate::startup::AppState;

/// Rows accepted in one import request.
pub const MAX_IMPORT_ROWS: usize = 10_000;

#[derive(Debug, Deserialize, Validate)]
pub struct ImportStatementRequest {
    #[validate(length(min = 1, max = 255, message = "source_name must be 1-255 characters"))]
    pub source_name: String,
    #[serde(default)]
    pub transactions: Vec<StatementRow>,
    pub statement_end_date: Option<String>,
    pub ending_balance: Option<AmountInput>,
}

/// One statement line. Without `direction` the amount is signed: negative
/// means money left the account.
#[derive(Debug, Deserialize)]
pub struct StatementRow {
    pub transaction_date: String,
    #[serde(default)]
    pub description: String,
    pub amount: AmountInput,
    pub direction: Option<Direction>,
}

impl StatementRow {
    fn into_draft(self) -> Result<TransactionDraft, InputError> {
        let transaction_date = parse_business_date("transaction_date", &self.transaction_date)?;
        let (amount, direction) = match self.direction {
            Some(direction) => (parse_amount("amount", &self.amount)?, direction),
            None => {
                let signed = parse_balance("amount", &self.amount)?;
                if signed.is_zero() {
                    return Err(InputError::NotPositive { field: "amount" });
                }
                (signed.abs(), Direction::for_delta(signed))
            }
        };
        Ok(TransactionDraft {
            transaction_date,
            description: self.description,
            amount,
            direction,
        })
    }
}

impl ImportStatementRequest {
    fn into_import(self) -> Result<StatementImport, AppError> {
        if self.transactions.len() > MAX_IMPORT_ROWS {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Import has {} rows; at most {} are accepted per request",
                self.transactions.len(),
                MAX_IMPORT_ROWS
            )));
        }

        let ending_balance = match (&self.statement_end_date, &self.ending_balance) {
            (Some(date), Some(balance)) => Some((
                parse_business_date("statement_end_date", date)?,
                parse_balance("ending_balance", balance)?,
            )),
            (None, None) => None,
            _ => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "statement_end_date and ending_balance must be supplied together"
                )))
            }
        };

        let transactions = self
            .transactions
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                row.into_draft().map_err(|e| {
                    AppError::BadRequest(anyhow::anyhow!("transactions[{}]: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StatementImport {
            source_name: self.source_name.trim().to_string(),
            transactions,
            ending_balance,
        })
    }
}

/// POST /accounts/:account_id/imports
pub async fn import_statement(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<ImportStatementRequest>, AppError>,
) -> Result<(StatusCode, Json<ImportOutcome>), AppError> {
    req.validate()?;
    let import = req.into_import()?;

    let outcome = state
        .engine
        .import_statement(tenant.tenant_id, account_id, import)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /imports/:batch_id
pub async fn get_import_batch(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(batch_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<ImportBatch>, AppError> {
    Ok(Json(
        state
            .engine
            .get_import_batch(tenant.tenant_id, batch_id)
            .await?,
    ))
}

/// POST /imports/:batch_id/rollback
pub async fn rollback_import(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(batch_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<RollbackOutcome>, AppError> {
    Ok(Json(
        state
            .engine
            .rollback_import_batch(tenant.tenant_id, batch_id)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(amount: &str, direction: Option<Direction>) -> StatementRow {
        StatementRow {
            transaction_date: "2025-01-15".to_string(),
            description: "Card payment".to_string(),
            amount: AmountInput::from(amount),
            direction,
        }
    }

    #[test]
    fn signed_amount_picks_direction() {
        let draft = row("-42.50", None).into_draft().unwrap();
        assert_eq!(draft.amount, dec!(42.50));
        assert_eq!(draft.direction, Direction::Debit);

        let draft = row("42.50", None).into_draft().unwrap();
        assert_eq!(draft.direction, Direction::Credit);
    }

    #[test]
    fn explicit_direction_requires_positive_amount() {
        let draft = row("10", Some(Direction::Debit)).into_draft().unwrap();
        assert_eq!(draft.direction, Direction::Debit);

        assert_eq!(
            row("-10", Some(Direction::Debit)).into_draft().unwrap_err(),
            InputError::NotPositive { field: "amount" }
        );
        assert!(row("0", None).into_draft().is_err());
    }

    #[test]
    fn ending_date_and_balance_travel_together() {
        let req = ImportStatementRequest {
            source_name: "jan.csv".to_string(),
            transactions: vec![],
            statement_end_date: Some("2025-01-31".to_string()),
            ending_balance: None,
        };
        assert!(matches!(req.into_import(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn row_count_is_capped() {
        let rows = |n: usize| (0..n).map(|_| row("1", None)).collect::<Vec<_>>();
        let req = |transactions| ImportStatementRequest {
            source_name: "big.csv".to_string(),
            transactions,
            statement_end_date: None,
            ending_balance: None,
        };

        let import = req(rows(MAX_IMPORT_ROWS)).into_import().unwrap();
        assert_eq!(import.transactions.len(), MAX_IMPORT_ROWS);

        assert!(matches!(
            req(rows(MAX_IMPORT_ROWS + 1)).into_import(),
            Err(AppError::BadRequest(_))
        ));
    }
}
