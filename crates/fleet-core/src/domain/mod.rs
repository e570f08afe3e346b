//! Domain layer: pure value types and algorithms with no I/O.
//!
//! - **`device`** – device records, presence events, forward rules.
//! - **`tracking`** – snapshot-to-event diffing for the presence stream.
//! - **`heartbeat`** – control-plane command objects and the resend cache.
//! - **`package`** – application version metadata used by provisioning.

pub mod device;
pub mod heartbeat;
pub mod package;
pub mod tracking;
