//! Request/response operations of the host protocol.

use fleet_core::domain::device::ForwardRule;
use fleet_core::protocol::{decode_hex_len, parse_device_table, parse_forward_list};
use fleet_core::DeviceRecord;
use tracing::debug;

use super::connection::AdbConnection;
use super::AdbError;

/// Where the adb server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbAddress {
    pub host: String,
    pub port: u16,
}

impl Default for AdbAddress {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5037,
        }
    }
}

impl std::fmt::Display for AdbAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Stateless client for the adb server.
///
/// Cloning is cheap; every operation opens its own connection, so clones
/// can be used concurrently from different tasks.
#[derive(Debug, Clone, Default)]
pub struct AdbHostClient {
    addr: AdbAddress,
}

impl AdbHostClient {
    pub fn new(addr: AdbAddress) -> Self {
        Self { addr }
    }

    pub fn address(&self) -> &AdbAddress {
        &self.addr
    }

    pub(crate) async fn connect(&self) -> Result<AdbConnection, AdbError> {
        AdbConnection::open(&self.addr.host, self.addr.port).await
    }

    /// Opens a connection already switched to the device `serial`.
    pub(crate) async fn connect_device(&self, serial: &str) -> Result<AdbConnection, AdbError> {
        let mut conn = self.connect().await?;
        conn.request(&format!("host:transport:{serial}")).await?;
        Ok(conn)
    }

    /// `host:version` – the server's internal protocol version.
    pub async fn server_version(&self) -> Result<u32, AdbError> {
        let mut conn = self.connect().await?;
        conn.request("host:version").await?;
        let reply = conn.read_string().await?;
        let version = decode_hex_len(reply.as_bytes())?;
        Ok(version as u32)
    }

    /// `host:devices` – one snapshot of the device table.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, AdbError> {
        let mut conn = self.connect().await?;
        conn.request("host:devices").await?;
        let payload = conn.read_string().await?;
        Ok(parse_device_table(&payload))
    }

    /// Opens `host:track-devices`; the caller reads one snapshot per
    /// `read_string` until the connection drops.
    pub(crate) async fn open_tracking(&self) -> Result<AdbConnection, AdbError> {
        let mut conn = self.connect().await?;
        conn.request("host:track-devices").await?;
        Ok(conn)
    }

    /// Runs `command` in a device shell and returns its output.
    ///
    /// Output is collected until the device closes the stream; bytes that
    /// are not valid UTF-8 are replaced.
    pub async fn shell(&self, serial: &str, command: &str) -> Result<String, AdbError> {
        let mut conn = self.connect_device(serial).await?;
        conn.request(&format!("shell:{command}")).await?;
        let output = conn.read_to_end().await?;
        debug!("shell {serial}: {command} ({} bytes)", output.len());
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// `host:list-forward` – every forward rule the server holds.
    pub async fn forward_list(&self) -> Result<Vec<ForwardRule>, AdbError> {
        let mut conn = self.connect().await?;
        conn.request("host:list-forward").await?;
        let payload = conn.read_string().await?;
        Ok(parse_forward_list(&payload))
    }

    /// Forwards host endpoint `local` to device endpoint `remote`.
    ///
    /// With `no_rebind` the server refuses to replace an existing rule for
    /// `local`.
    pub async fn forward(
        &self,
        serial: &str,
        local: &str,
        remote: &str,
        no_rebind: bool,
    ) -> Result<(), AdbError> {
        let mode = if no_rebind { "forward:norebind" } else { "forward" };
        let mut conn = self.connect().await?;
        conn.request(&format!("host-serial:{serial}:{mode}:{local};{remote}"))
            .await
    }

    /// Removes the forward rule for `local`, or every rule when `None`.
    pub async fn forward_remove(&self, local: Option<&str>) -> Result<(), AdbError> {
        let command = match local {
            Some(local) => format!("host:killforward:{local}"),
            None => "host:killforward-all".to_string(),
        };
        let mut conn = self.connect().await?;
        conn.request(&command).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
