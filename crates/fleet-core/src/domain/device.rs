//! Device records, presence events, and forward rules.
//!
//! These are the plain value types exchanged between the host-protocol
//! client, the fleet controller, and the tests.  None of them own any I/O.

use std::fmt;

/// Connection state of a device as reported by the bridge.
///
/// The bridge knows more states than these (`recovery`, `sideload`,
/// `no permissions`, ...); everything the provider does not act on collapses
/// into [`DeviceStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceStatus {
    /// Online and authorized; the only state the provider provisions.
    Device,
    /// Attached but not responding.
    Offline,
    /// Attached but the RSA key prompt has not been accepted.
    Unauthorized,
    /// Any other state string.
    Unknown,
}

impl DeviceStatus {
    /// Maps the bridge's status string to a [`DeviceStatus`].
    pub fn from_wire(text: &str) -> Self {
        match text.trim() {
            "device" => DeviceStatus::Device,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            _ => DeviceStatus::Unknown,
        }
    }

    /// Returns the bridge's spelling of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Device => "device",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unauthorized => "unauthorized",
            DeviceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the bridge's device table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceRecord {
    /// Stable bridge-reported identifier.
    pub serial: String,
    pub status: DeviceStatus,
}

impl DeviceRecord {
    pub fn new(serial: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            serial: serial.into(),
            status,
        }
    }
}

/// A presence transition produced by the tracking stream.
///
/// Events are only emitted when a device enters or leaves the filtered
/// device table, never for steady state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceEvent {
    /// `true` when the device appeared, `false` when it went away.
    pub present: bool,
    pub serial: String,
    pub status: DeviceStatus,
}

impl DeviceEvent {
    /// Builds an addition event for `record`.
    pub fn present(record: &DeviceRecord) -> Self {
        Self {
            present: true,
            serial: record.serial.clone(),
            status: record.status,
        }
    }

    /// Builds a removal event for `record`.
    pub fn absent(record: &DeviceRecord) -> Self {
        Self {
            present: false,
            serial: record.serial.clone(),
            status: record.status,
        }
    }
}

/// A host-protocol forward: `local` on the host tunnels to `remote` on the
/// device identified by `serial`.
///
/// Endpoints are transport-qualified strings such as `tcp:7912` or
/// `localabstract:minicap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardRule {
    pub serial: String,
    pub local: String,
    pub remote: String,
}

impl ForwardRule {
    /// Returns the host port when the local endpoint is `tcp:<port>`.
    pub fn local_tcp_port(&self) -> Option<u16> {
        self.local.strip_prefix("tcp:")?.parse().ok()
    }
}

/// Builds the transport-qualified spec for a TCP port, e.g. `tcp:7912`.
pub fn tcp_spec(port: u16) -> String {
    format!("tcp:{port}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
