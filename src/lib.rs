//! Distributed energy resource (DER) device agent and fleet simulator.

pub mod cli;
pub mod config;
/// Setpoint admission and idempotency tracking.
pub mod control;
pub mod devices;
pub mod environment;
pub mod error;
/// Wire envelopes and topic naming.
pub mod protocol;
pub mod runtime;
/// Device agents, fleet ownership, and the simulated clock.
pub mod sim;
pub mod telemetry;
pub mod transport;
