//! Client for the adb server's host protocol.
//!
//! Every request opens a fresh TCP connection to the server (default
//! `127.0.0.1:5037`), writes one length-prefixed command, and reads a status
//! token.  Commands addressed to a device first switch the connection to that
//! device with `host:transport:<serial>`.
//!
//! - [`connection`] – one framed connection: send, check status, read.
//! - [`client`] – [`AdbHostClient`], the request/response operations.
//! - [`sync`] – file stat and push over the `sync:` service.
//! - [`tracker`] – the self-healing `host:track-devices` presence stream.

pub mod client;
pub mod connection;
pub mod sync;
pub mod tracker;

use fleet_core::ProtocolError;
use thiserror::Error;

pub use client::{AdbAddress, AdbHostClient};
pub use connection::AdbConnection;
pub use tracker::{AdbServerLauncher, DeviceTracker, ServerLauncher};

/// Errors returned by host-protocol operations.
#[derive(Debug, Error)]
pub enum AdbError {
    /// The server (or the device, for sync requests) answered `FAIL`; the
    /// payload is the server's message verbatim.
    #[error("{0}")]
    Protocol(String),

    /// The server answered with a status token other than `OKAY`/`FAIL`.
    #[error("unexpected status from adb server: {0:?}")]
    UnexpectedStatus(String),

    /// The TCP connection could not be opened or broke mid-exchange.
    #[error("adb connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("adb frame error: {0}")]
    Decode(ProtocolError),
}

impl From<ProtocolError> for AdbError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UnknownStatus(token) => AdbError::UnexpectedStatus(token),
            other => AdbError::Decode(other),
        }
    }
}

impl AdbError {
    /// Returns `true` when the server itself is unreachable, i.e. restarting
    /// it may help.  Protocol-level refusals come from a live server.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, AdbError::Connection(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_displays_server_message_verbatim() {
        let err = AdbError::Protocol("device not found".to_string());
        assert_eq!(err.to_string(), "device not found");
    }

    #[test]
    fn test_unknown_status_maps_to_unexpected_status() {
        let err: AdbError = ProtocolError::UnknownStatus("WHAT".to_string()).into();
        assert!(matches!(err, AdbError::UnexpectedStatus(ref t) if t == "WHAT"));
    }

    #[test]
    fn test_only_io_errors_count_as_connection_lost() {
        let io = AdbError::Connection(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(io.is_connection_lost());
        assert!(!AdbError::Protocol("closed".into()).is_connection_lost());
        assert!(!AdbError::Decode(ProtocolError::InvalidUtf8).is_connection_lost());
    }
}
