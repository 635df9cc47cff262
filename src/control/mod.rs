//! Setpoint admission and the idempotency ledger it relies on.

pub mod admission;
pub mod ledger;

pub use admission::{AdmissionResult, admit};
pub use ledger::IdempotencyLedger;
