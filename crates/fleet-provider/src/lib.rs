//! fleet-provider library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does fleet-provider do?
//!
//! The provider runs next to a pool of Android devices attached to one host.
//! It:
//!
//! 1. Watches the adb server's device table over the host protocol and turns
//!    every change into presence events.
//! 2. Provisions each newly attached device: pushes helper binaries,
//!    installs helper applications, restarts the on-device agent, and exposes
//!    the agent's ports on externally routable host ports.
//! 3. Reports every device's addresses and properties to the control plane
//!    over a self-healing WebSocket heartbeat link, replaying its full view
//!    after every reconnect.
//!
//! # Layers
//!
//! ```text
//! domain/          ProviderConfig
//! application/     DeviceSession (provisioning state machine),
//!                  FleetController (presence events → sessions → reports)
//! infrastructure/  adb host-protocol client and tracker, heartbeat link,
//!                  subprocesses, port allocation, bundles, aapt, local IP
//! ```

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: device sessions and the fleet controller.
pub mod application;

/// Infrastructure layer: sockets, subprocesses, and files.
pub mod infrastructure;
