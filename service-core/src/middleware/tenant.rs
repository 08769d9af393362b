//! Tenant context for multi-tenant request handling.
//!
//! Authentication happens upstream; by the time a request reaches a service
//! the gateway has resolved the caller's tenant and forwards it in
//! `x-tenant-id` (and the acting user in `x-user-id`).

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Tenant context extracted from request headers.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing tenant context")))?
            .to_str()
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid x-tenant-id header")))?;

        let tenant_id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid x-tenant-id header")))?;

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(Self { tenant_id, user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<TenantContext, AppError> {
        let (mut parts, _) = req.into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let err = extract(Request::builder().body(()).unwrap()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn malformed_header_is_bad_request() {
        let req = Request::builder()
            .header(TENANT_ID_HEADER, "tenant-one")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await.unwrap_err(), AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn reads_tenant_and_user() {
        let tenant_id = Uuid::new_v4();
        let req = Request::builder()
            .header(TENANT_ID_HEADER, tenant_id.to_string())
            .header(USER_ID_HEADER, "bookkeeper@acme")
            .body(())
            .unwrap();

        let ctx = extract(req).await.unwrap();
        assert_eq!(ctx.tenant_id, tenant_id);
        assert_eq!(ctx.user_id.as_deref(), Some("bookkeeper@acme"));
    }
}
