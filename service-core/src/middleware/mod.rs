pub mod tenant;
pub mod tracing;

pub use self::tenant::{TENANT_ID_HEADER, TenantContext, USER_ID_HEADER};
pub use self::tracing::{REQUEST_ID_HEADER, request_id_middleware};
