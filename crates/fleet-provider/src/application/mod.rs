//! Application layer for fleet-provider.
//!
//! - [`provisioning`] – which binaries go where, per device ABI and SDK.
//! - [`device_session`] – the per-device provisioning state machine.
//! - [`fleet_controller`] – presence events in, sessions and reports out.
//!
//! The layer talks to the outside world only through traits
//! ([`device_session::DeviceBridge`], [`fleet_controller::DeviceReporter`],
//! and the infrastructure seams), so every flow here runs in tests against
//! recording fakes.

pub mod device_session;
pub mod fleet_controller;
pub mod provisioning;

pub use device_session::{DeviceSession, DeviceSessionFactory, SessionDeps, SessionError, SessionState};
pub use fleet_controller::{ColdOutcome, DeviceReporter, FleetCommand, FleetController};
