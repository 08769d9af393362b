//! Services module for reconciliation-service.

pub mod cascade;
pub mod database;
pub mod engine;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::PgStore;
pub use engine::ReconciliationEngine;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{LedgerStore, LedgerTx};
