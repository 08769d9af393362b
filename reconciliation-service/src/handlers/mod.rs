//! REST handlers. Every business route is scoped to the caller's tenant.

pub mod accounts;
pub mod checkpoints;
pub mod imports;
pub mod transactions;
