//! Reconciliation Service - balance checkpoints, adjustment transactions and
//! statement import rollback for bookkeeping ledgers.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
