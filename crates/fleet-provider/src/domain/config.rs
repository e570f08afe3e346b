//! Provider configuration.
//!
//! [`ProviderConfig`] is the single source of truth for all runtime settings.
//! It is read once at startup from an optional TOML file, then overridden by
//! command-line flags in `main.rs`, and finally handed to the components that
//! need it.  Nothing below `main` reads environment variables or globals.
//!
//! # Example file
//!
//! ```toml
//! [provider]
//! name = "lab-rack-3"
//! listen_port = 3500
//! allow_remote = false
//!
//! [adb]
//! host = "127.0.0.1"
//! port = 5037
//!
//! [heartbeat]
//! server = "atxserver2.lan:4000"
//!
//! [provisioning]
//! stf_bundle = "vendor/stf-binaries-master.zip"
//! agent_bundle = "vendor/atx-agent-latest.zip"
//! ```
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration for a single host with devices on USB.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A server address could not be turned into a heartbeat URL.
    #[error("invalid server address: {0:?}")]
    InvalidAddress(String),

    /// The server address asks for TLS, which the heartbeat link does not
    /// speak.
    #[error("unsupported scheme in server address {0:?}: use ws:// or http://")]
    UnsupportedScheme(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub adb: AdbSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    #[serde(default)]
    pub processes: ProcessSection,
}

/// Identity of this provider as advertised to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSection {
    /// Display name sent in the handshake.
    #[serde(default = "default_name")]
    pub name: String,
    /// Port of the provider's HTTP callback surface; part of the advertised URL.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Owner e-mail sent in the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Accept devices whose serial is an `ip:port` network address.
    #[serde(default)]
    pub allow_remote: bool,
    /// Platform tag stamped on every update.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Scheduling priority advertised to the control plane; larger wins.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Marketing names keyed by `ro.product.model`.  Unlisted models are
    /// reported under their model string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub device_names: BTreeMap<String, String>,
}

/// Where the adb server listens and how to restart it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdbSection {
    #[serde(default = "default_adb_host")]
    pub host: String,
    #[serde(default = "default_adb_port")]
    pub port: u16,
    /// Executable used for `adb start-server` when the tracking link drops.
    #[serde(default = "default_adb_program")]
    pub program: PathBuf,
    /// Fixed delay before each tracking reconnect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// Control-plane link settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    /// `host:port`, `http://host:port/`, or a `ws://` URL.
    #[serde(default = "default_server")]
    pub server: String,
    /// Increment of the linear reconnect backoff.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Upper bound of the reconnect backoff.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Bundles and packages pushed to every device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningSection {
    /// Zip holding the minicap/minitouch prebuilt tree.
    #[serde(default = "default_stf_bundle")]
    pub stf_bundle: PathBuf,
    /// Path prefix of the `node_modules` directory inside `stf_bundle`.
    #[serde(default = "default_stf_prefix")]
    pub stf_prefix: String,
    /// Zip holding one atx-agent binary per architecture.
    #[serde(default = "default_agent_bundle")]
    pub agent_bundle: PathBuf,
    /// APKs installed (or upgraded) on every device, in order.
    #[serde(default = "default_apks")]
    pub apks: Vec<PathBuf>,
    /// `aapt` executable used to read APK manifests.
    #[serde(default = "default_aapt")]
    pub aapt: PathBuf,
    /// On-device path of the agent binary.
    #[serde(default = "default_agent_path")]
    pub agent_path: String,
    /// Device port of the on-device agent.
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    /// Device port of the input-method service.
    #[serde(default = "default_input_port")]
    pub input_port: u16,
}

/// Background helper processes spawned per device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSection {
    /// Relay command; `<listen> localhost <target>` is appended.
    #[serde(default = "default_relay_command")]
    pub relay_command: Vec<String>,
    /// Bridge command; `<port> <serial>` is appended.
    #[serde(default = "default_bridge_command")]
    pub bridge_command: Vec<String>,
    /// First port handed out by the allocator.
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    /// Last port handed out before wrapping around.
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "pyclient".to_string()
}
fn default_listen_port() -> u16 {
    3500
}
fn default_platform() -> String {
    "android".to_string()
}
fn default_priority() -> u32 {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_adb_host() -> String {
    "127.0.0.1".to_string()
}
fn default_adb_port() -> u16 {
    5037
}
fn default_adb_program() -> PathBuf {
    PathBuf::from("adb")
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_server() -> String {
    "localhost:4000".to_string()
}
fn default_backoff_step_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_stf_bundle() -> PathBuf {
    PathBuf::from("vendor/stf-binaries-master.zip")
}
fn default_stf_prefix() -> String {
    "stf-binaries-master/node_modules/".to_string()
}
fn default_agent_bundle() -> PathBuf {
    PathBuf::from("vendor/atx-agent-latest.zip")
}
fn default_apks() -> Vec<PathBuf> {
    [
        "vendor/WhatsInput_v1.0_apkpure.com.apk",
        "vendor/app-uiautomator.apk",
        "vendor/app-uiautomator-test.apk",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}
fn default_aapt() -> PathBuf {
    PathBuf::from("aapt")
}
fn default_agent_path() -> String {
    "/data/local/tmp/atx-agent".to_string()
}
fn default_agent_port() -> u16 {
    7912
}
fn default_input_port() -> u16 {
    6677
}
fn default_relay_command() -> Vec<String> {
    vec!["node".to_string(), "tcpproxy.js".to_string()]
}
fn default_bridge_command() -> Vec<String> {
    ["node", "node_modules/adbkit/bin/adbkit", "usb-device-to-tcp", "-p"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_port_range_start() -> u16 {
    20000
}
fn default_port_range_end() -> u16 {
    40000
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_port: default_listen_port(),
            owner: None,
            allow_remote: false,
            platform: default_platform(),
            priority: default_priority(),
            log_level: default_log_level(),
            device_names: BTreeMap::new(),
        }
    }
}

impl Default for AdbSection {
    fn default() -> Self {
        Self {
            host: default_adb_host(),
            port: default_adb_port(),
            program: default_adb_program(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            server: default_server(),
            backoff_step_ms: default_backoff_step_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            stf_bundle: default_stf_bundle(),
            stf_prefix: default_stf_prefix(),
            agent_bundle: default_agent_bundle(),
            apks: default_apks(),
            aapt: default_aapt(),
            agent_path: default_agent_path(),
            agent_port: default_agent_port(),
            input_port: default_input_port(),
        }
    }
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            relay_command: default_relay_command(),
            bridge_command: default_bridge_command(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
        }
    }
}

impl AdbSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl HeartbeatSection {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// The WebSocket URL of the control plane's heartbeat endpoint.
    ///
    /// # Errors
    ///
    /// See [`heartbeat_url`].
    pub fn url(&self) -> Result<String, ConfigError> {
        heartbeat_url(&self.server)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `ProviderConfig` from `path`, returning the defaults when no path is
/// given or the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ProviderConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(ProviderConfig::default());
    };

    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProviderConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Renders `config` as TOML for `--print-config`.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails.
pub fn render_config(config: &ProviderConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Normalises a control-plane address into its heartbeat WebSocket URL.
///
/// `host:port`, `http://host:port/`, and `ws://host:port` all become
/// `ws://host:port/websocket/heartbeat`.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedScheme`] for `https://` and `wss://`
/// addresses, and [`ConfigError::InvalidAddress`] for any other scheme or if
/// no host remains after stripping the scheme and path.
pub fn heartbeat_url(server: &str) -> Result<String, ConfigError> {
    let trimmed = server.trim();
    let rest = match trimmed.split_once("://") {
        Some(("http" | "ws", rest)) => rest,
        Some(("https" | "wss", _)) => {
            return Err(ConfigError::UnsupportedScheme(server.to_string()))
        }
        Some(_) => return Err(ConfigError::InvalidAddress(server.to_string())),
        None => trimmed,
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ConfigError::InvalidAddress(server.to_string()));
    }
    Ok(format!("ws://{authority}/websocket/heartbeat"))
}

/// Returns `true` for serials of network-attached devices (`ip:port`).
pub fn is_network_serial(serial: &str) -> bool {
    serial.parse::<std::net::SocketAddrV4>().is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
