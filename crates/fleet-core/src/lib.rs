//! # fleet-core
//!
//! Shared library for the Android fleet provider containing the device-bridge
//! host-protocol codec, the device-table diffing used by presence tracking,
//! and the heartbeat cache that lets the control plane be resynchronised
//! after a reconnect.
//!
//! This crate has no sockets, no subprocesses, and no async runtime.  Every
//! function here operates on byte slices, strings, or in-memory values, so
//! it can be tested exhaustively without a device or a control plane.
//!
//! # Modules
//!
//! - **`protocol`** – How bytes travel to the device bridge.  Requests are
//!   prefixed with a 4-hex-digit length; responses start with an `OKAY` or
//!   `FAIL` status token.  The `sync:` sub-protocol used for file transfer
//!   uses little-endian binary frames instead.
//!
//! - **`domain`** – Device records and events, the snapshot differ behind the
//!   presence stream, and the recursive-merge cache behind the heartbeat link.

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceEvent, DeviceRecord, DeviceStatus, ForwardRule};
pub use domain::heartbeat::{merge_recursive, HeartbeatCache};
pub use domain::tracking::DeviceTable;
pub use protocol::codec::{encode_request, ProtocolError, Status};
