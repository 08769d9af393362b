use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportBatchStatus {
    Committed,
    RolledBack,
}

impl ImportBatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "rolled_back" => Self::RolledBack,
            _ => Self::Committed,
        }
    }
}

/// One run of the statement import pipeline.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub source_name: String,
    pub status: String,
    pub transaction_count: i32,
    pub deleted_count: i32,
    pub created_utc: DateTime<Utc>,
    pub rolled_back_utc: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn parsed_status(&self) -> ImportBatchStatus {
        ImportBatchStatus::parse(&self.status)
    }

    pub fn is_rolled_back(&self) -> bool {
        self.parsed_status() == ImportBatchStatus::RolledBack
    }
}

#[derive(Debug, Clone)]
pub struct NewImportBatch {
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub source_name: String,
    pub transaction_count: i32,
}
