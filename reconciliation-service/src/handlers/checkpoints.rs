//! Balance checkpoint handlers.

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
    parse_balance, parse_business_date, AmountInput, BalanceCheckpoint, CheckpointSummary,
    SortOrder,
};
use crate::services::engine::{
    CheckpointOutcome, CheckpointPage, CheckpointRequest, DeletedCheckpoint, ListCheckpoints,
    RecalculationReport,
};
use crate::startup::AppState;

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SaveCheckpointRequest {
    /// `YYYY-MM-DD` or an RFC 3339 timestamp.
    pub checkpoint_date: String,
    pub declared_balance: AmountInput,
    #[validate(length(max = 2000, message = "notes must be at most 2000 characters"))]
    pub notes: Option<String>,
    pub import_batch_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCheckpointsQuery {
    pub include_reconciled: Option<bool>,
    pub order: Option<SortOrder>,
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
}

impl ListCheckpointsQuery {
    fn into_list(self) -> Result<ListCheckpoints, AppError> {
        let defaults = ListCheckpoints::default();
        let page_token = self
            .page_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| parse_business_date("page_token", t))
            .transpose()?;

        Ok(ListCheckpoints {
            include_reconciled: self.include_reconciled.unwrap_or(defaults.include_reconciled),
            order: self.order.unwrap_or(defaults.order),
            page_size: self.page_size.unwrap_or(defaults.page_size),
            page_token,
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create the checkpoint for a date, or update the one already there.
///
/// POST /accounts/:account_id/checkpoints
pub async fn save_checkpoint(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<SaveCheckpointRequest>, AppError>,
) -> Result<(StatusCode, Json<CheckpointOutcome>), AppError> {
    req.validate()?;
    let request = CheckpointRequest {
        account_id,
        checkpoint_date: parse_business_date("checkpoint_date", &req.checkpoint_date)?,
        declared_balance: parse_balance("declared_balance", &req.declared_balance)?,
        notes: req.notes.filter(|n| !n.trim().is_empty()),
        import_batch_id: req.import_batch_id,
    };

    let outcome = state
        .engine
        .create_or_update_checkpoint(tenant.tenant_id, request)
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// GET /accounts/:account_id/checkpoints
pub async fn list_checkpoints(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Query(query), _): WithRejection<Query<ListCheckpointsQuery>, AppError>,
) -> Result<Json<CheckpointPage>, AppError> {
    let page = state
        .engine
        .list_checkpoints(tenant.tenant_id, account_id, query.into_list()?)
        .await?;
    Ok(Json(page))
}

/// GET /accounts/:account_id/checkpoints/summary
pub async fn checkpoint_summary(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<CheckpointSummary>, AppError> {
    Ok(Json(
        state
            .engine
            .checkpoint_summary(tenant.tenant_id, account_id)
            .await?,
    ))
}

/// POST /accounts/:account_id/checkpoints/recalculate
pub async fn recalculate_checkpoints(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<RecalculationReport>, AppError> {
    Ok(Json(
        state
            .engine
            .recalculate_all_checkpoints(tenant.tenant_id, account_id)
            .await?,
    ))
}

/// GET /checkpoints/:checkpoint_id
pub async fn get_checkpoint(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(checkpoint_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<BalanceCheckpoint>, AppError> {
    Ok(Json(
        state
            .engine
            .get_checkpoint(tenant.tenant_id, checkpoint_id)
            .await?,
    ))
}

/// DELETE /checkpoints/:checkpoint_id
pub async fn delete_checkpoint(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(checkpoint_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<DeletedCheckpoint>, AppError> {
    Ok(Json(
        state
            .engine
            .delete_checkpoint(tenant.tenant_id, checkpoint_id)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn list_query_defaults_to_newest_first() {
        let list = ListCheckpointsQuery::default().into_list().unwrap();
        assert!(list.include_reconciled);
        assert_eq!(list.order, SortOrder::Desc);
        assert_eq!(list.page_size, 50);
        assert_eq!(list.page_token, None);
    }

    #[test]
    fn page_token_is_a_checkpoint_date() {
        let query = ListCheckpointsQuery {
            page_token: Some("2025-02-28".to_string()),
            ..Default::default()
        };
        assert_eq!(
            query.into_list().unwrap().page_token,
            NaiveDate::from_ymd_opt(2025, 2, 28)
        );

        let bad = ListCheckpointsQuery {
            page_token: Some("next".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.into_list(), Err(AppError::BadRequest(_))));
    }
}
