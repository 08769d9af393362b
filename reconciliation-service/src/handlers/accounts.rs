//! Bank account handlers.

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

use crate::models::BankAccount;
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 255, message = "name must be 1-255 characters"))]
    pub name: String,
    #[validate(length(equal = 3, message = "currency must be an ISO 4217 code"))]
    pub currency: String,
}

/// POST /accounts
pub async fn create_account(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Json(req), _): WithRejection<Json<CreateAccountRequest>, AppError>,
) -> Result<(StatusCode, Json<BankAccount>), AppError> {
    req.validate()?;

    let account = state
        .engine
        .create_account(tenant.tenant_id, &req.name, &req.currency)
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<Vec<BankAccount>>, AppError> {
    Ok(Json(state.engine.list_accounts(tenant.tenant_id).await?))
}

/// GET /accounts/:account_id
pub async fn get_account(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Path(account_id), _): WithRejection<Path<Uuid>, AppError>,
) -> Result<Json<BankAccount>, AppError> {
    Ok(Json(
        state.engine.get_account(tenant.tenant_id, account_id).await?,
    ))
}
