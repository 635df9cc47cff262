//! Control loop owners: one device, a fleet of devices, and the simulated clock.

pub mod agent;
pub mod clock;
pub mod fleet;

pub use agent::DeviceAgent;
pub use clock::{SimClock, Tick};
pub use fleet::{Dispatch, Fleet, FleetSummary};
