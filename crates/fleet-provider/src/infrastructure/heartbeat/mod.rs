//! Control-plane heartbeat link.
//!
//! - [`backoff`] – linear reconnect delay with a ceiling.
//! - [`link`] – [`HeartbeatLink`], the self-healing WebSocket connection.

pub mod backoff;
pub mod link;

pub use backoff::Backoff;
pub use link::{HeartbeatError, HeartbeatLink, HeartbeatSettings, LinkStatus};
