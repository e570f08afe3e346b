//! Infrastructure layer for fleet-provider.
//!
//! Everything that touches a socket, a subprocess, or a file lives here:
//!
//! - [`adb`] – host-protocol client and the device-presence tracker.
//! - [`heartbeat`] – the WebSocket link to the control plane.
//! - [`process`] – relay and bridge helper processes.
//! - [`ports`] – host port allocation.
//! - [`artifacts`] – provisioning bundles.
//! - [`manifest`] – APK manifest reading via `aapt`.
//! - [`net`] – local address discovery.

pub mod adb;
pub mod artifacts;
pub mod heartbeat;
pub mod manifest;
pub mod net;
pub mod ports;
pub mod process;
