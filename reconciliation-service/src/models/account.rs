use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A bank or cash account whose balance is tracked through checkpoints.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BankAccount {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBankAccount {
    pub tenant_id: Uuid,
    pub name: String,
    pub currency: String,
}
