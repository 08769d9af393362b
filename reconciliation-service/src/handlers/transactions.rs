//! Manual ledger transactions and transfer matching.

use axum::{
    extract::{Path, Query, State},
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
    parse_amount, parse_business_date, AmountInput, Direction, LedgerTransaction,
    TransactionChanges, TransactionFilter,
};
use crate::services::engine::{TransactionDraft, TransactionWrite, TransferMatch};
use crate::startup::AppState;

const DEFAULT_LIST_LIMIT: i64 = 500;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransactionRequest {
    pub transaction_date: String,
    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: Option<String>,
    pub amount: AmountInput,
    pub direction: Direction,
}

impl CreateTransactionRequest {
    fn into_draft(self) -> Result<TransactionDraft, AppError> {
        Ok(TransactionDraft {
            transaction_date: parse_business_date("transaction_date", &self.transaction_date)?,
            description: self.description.unwrap_or_default(),
            amount: parse_amount("amount", &self.amount)?,
            direction: self.direction,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTransactionRequest {
    pub transaction_date: Option<String>,
    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: Option<String>,
    pub amount: Option<AmountInput>,
    pub direction: Option<Direction>,
}

impl UpdateTransactionRequest {
    fn into_changes(self) -> Result<TransactionChanges, AppError> {
        Ok(TransactionChanges {
            transaction_date: self
                .transaction_date
                .as_deref()
                .map(|d| parse_business_date("transaction_date", d))
                .transpose()?,
            description: self.description,
            amount: self
                .amount
                .as_ref()
                .map(|a| parse_amount("amount", a))
                .transpose()?,
            direction: self.direction,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub include_adjustments: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MatchTransferRequest {
    pub transaction_id: Uuid,
    pub counterpart_transaction_id: Uuid,
}

/// POST /accounts/:account_id/transactions
pub async fn create_transaction(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<CreateTransactionRequest>, AppError>,
) -> Result<(StatusCode, Json<TransactionWrite>), AppError> {
    req.validate()?;
    let draft = req.into_draft()?;

    let written = state
        .engine
        .create_transaction(tenant.tenant_id, account_id, draft)
        .await?;
    Ok((StatusCode::CREATED, Json(written)))
}

/// GET /accounts/:account_id/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Query(query), _): WithRejection<Query<ListTransactionsQuery>, AppError>,
) -> Result<Json<Vec<LedgerTransaction>>, AppError> {
    let parse = |field, raw: Option<&str>| raw.map(|d| parse_business_date(field, d)).transpose();
    let filter = TransactionFilter {
        from: parse("from", query.from.as_deref())?,
        to: parse("to", query.to.as_deref())?,
        include_adjustments: query.include_adjustments.unwrap_or(true),
        limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    };

    Ok(Json(
        state
            .engine
            .list_transactions(tenant.tenant_id, account_id, filter)
            .await?,
    ))
}

/// GET /transactions/:transaction_id
pub async fn get_transaction(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(transaction_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<LedgerTransaction>, AppError> {
    Ok(Json(
        state
            .engine
            .get_transaction(tenant.tenant_id, transaction_id)
            .await?,
    ))
}

/// PATCH /transactions/:transaction_id
pub async fn update_transaction(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(transaction_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateTransactionRequest>, AppError>,
) -> Result<Json<TransactionWrite>, AppError> {
    req.validate()?;
    let changes = req.into_changes()?;

    Ok(Json(
        state
            .engine
            .update_transaction(tenant.tenant_id, transaction_id, changes)
            .await?,
    ))
}

/// DELETE /transactions/:transaction_id
pub async fn delete_transaction(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(transaction_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<TransactionWrite>, AppError> {
    Ok(Json(
        state
            .engine
            .delete_transaction(tenant.tenant_id, transaction_id)
            .await?,
    ))
}

/// POST /transfers
pub async fn match_transfer(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Json(req), _): WithRejection<Json<MatchTransferRequest>, AppError>,
) -> Result<(StatusCode, Json<TransferMatch>), AppError> {
    let matched = state
        .engine
        .match_transfer(
            tenant.tenant_id,
            req.transaction_id,
            req.counterpart_transaction_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(matched)))
}

/// DELETE /transfers/:transaction_id
pub async fn unmatch_transfer(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(transaction_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<TransferMatch>, AppError> {
    Ok(Json(
        state
            .engine
            .unmatch_transfer(tenant.tenant_id, transaction_id)
            .await?,
    ))
}
