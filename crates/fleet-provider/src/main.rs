//! Android fleet provider: entry point.
//!
//! Watches the devices attached to the local adb server, provisions each one
//! as it appears, and keeps the control plane informed over the heartbeat
//! link until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! fleet-provider [OPTIONS]
//!
//! Options:
//!   --config <FILE>       TOML configuration file
//!   -s, --server <ADDR>   Control-plane address [default: localhost:4000]
//!   -p, --port <PORT>     Advertised callback port [default: 3500]
//!   --allow-remote        Also provision `ip:port` network devices
//!   --owner <EMAIL>       Provider owner
//!   --owner-file <FILE>   Read the owner from a file
//!   --adb-host <HOST>     adb server host [env: ANDROID_ADB_SERVER_HOST]
//!   --adb-port <PORT>     adb server port [env: ANDROID_ADB_SERVER_PORT]
//!   --print-config        Print the effective configuration and exit
//! ```
//!
//! Command-line flags override the configuration file; unset flags leave the
//! file's (or the built-in default) value in place.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_core::domain::heartbeat::Handshake;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_provider::application::provisioning::ProvisioningPlan;
use fleet_provider::application::{
    DeviceReporter, DeviceSessionFactory, FleetController, SessionDeps,
};
use fleet_provider::domain::{load_config, render_config, ProviderConfig};
use fleet_provider::infrastructure::adb::{AdbAddress, AdbHostClient, AdbServerLauncher};
use fleet_provider::infrastructure::artifacts::ZipBundles;
use fleet_provider::infrastructure::heartbeat::{Backoff, HeartbeatLink, HeartbeatSettings};
use fleet_provider::infrastructure::manifest::AaptManifestReader;
use fleet_provider::infrastructure::net::{local_ip, local_network, provider_url};
use fleet_provider::infrastructure::ports::RangePortAllocator;
use fleet_provider::infrastructure::process::CommandSpawner;

/// Length of the shared secret sent in the handshake.
const SECRET_LEN: usize = 10;
const SECRET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Android fleet provider.
#[derive(Debug, Parser)]
#[command(
    name = "fleet-provider",
    about = "Provisions attached Android devices and reports them to a control plane",
    version
)]
struct Cli {
    /// TOML configuration file.  Missing file means built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control-plane address: `host:port`, `http://host:port/`, or a
    /// `ws://` URL.
    #[arg(short, long)]
    server: Option<String>,

    /// Callback port advertised in the handshake.
    #[arg(short, long)]
    port: Option<u16>,

    /// Provision devices whose serial is an `ip:port` network address.
    #[arg(long)]
    allow_remote: bool,

    /// Provider owner e-mail.
    #[arg(long)]
    owner: Option<String>,

    /// File whose trimmed content is the owner e-mail.  Wins over `--owner`.
    #[arg(long)]
    owner_file: Option<PathBuf>,

    /// adb server host.
    #[arg(long, env = "ANDROID_ADB_SERVER_HOST")]
    adb_host: Option<String>,

    /// adb server port.
    #[arg(long, env = "ANDROID_ADB_SERVER_PORT")]
    adb_port: Option<u16>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Overlays the flags that were given onto `config`.
    fn apply_to(&self, config: &mut ProviderConfig) -> anyhow::Result<()> {
        if let Some(server) = &self.server {
            config.heartbeat.server = server.clone();
        }
        if let Some(port) = self.port {
            config.provider.listen_port = port;
        }
        if self.allow_remote {
            config.provider.allow_remote = true;
        }
        if let Some(owner) = &self.owner {
            config.provider.owner = Some(owner.clone());
        }
        if let Some(path) = &self.owner_file {
            let owner = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read owner file {}", path.display()))?;
            config.provider.owner = Some(owner.trim().to_string());
        }
        if let Some(host) = &self.adb_host {
            config.adb.host = host.clone();
        }
        if let Some(port) = self.adb_port {
            config.adb.port = port;
        }
        Ok(())
    }
}

/// Random uppercase alphanumeric secret.
fn generate_secret() -> String {
    let uuid = uuid::Uuid::new_v4();
    // Bytes 6 and 8 carry the UUID version and variant bits.
    uuid.as_bytes()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 6 && *i != 8)
        .take(SECRET_LEN)
        .map(|(_, b)| SECRET_ALPHABET[usize::from(*b) % SECRET_ALPHABET.len()] as char)
        .collect()
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config =
        load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_to(&mut config)?;

    if cli.print_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.provider.log_level)),
        )
        .init();

    let secret = generate_secret();
    let host_ip = local_ip();
    let heartbeat_url = config.heartbeat.url()?;
    info!(
        "fleet-provider starting: adb={}:{}, control plane={}, owner={:?}",
        config.adb.host, config.adb.port, heartbeat_url, config.provider.owner
    );

    // ── Heartbeat link ────────────────────────────────────────────────────────
    let settings = HeartbeatSettings {
        url: heartbeat_url,
        handshake: Handshake {
            name: config.provider.name.clone(),
            owner: config.provider.owner.clone(),
            secret: secret.clone(),
            url: provider_url(host_ip, config.provider.listen_port),
            priority: config.provider.priority,
        },
        platform: config.provider.platform.clone(),
        backoff: Backoff::new(config.heartbeat.backoff_step(), config.heartbeat.backoff_max()),
    };
    let link = tokio::select! {
        link = HeartbeatLink::connect(settings) => Arc::new(link),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received before the control plane accepted");
            return Ok(());
        }
    };

    // ── Device tracking and sessions ──────────────────────────────────────────
    let adb = AdbHostClient::new(AdbAddress {
        host: config.adb.host.clone(),
        port: config.adb.port,
    });
    let launcher = Arc::new(AdbServerLauncher::new(config.adb.program.clone()));
    let events = adb.track_devices(launcher, config.adb.reconnect_delay());

    let deps = SessionDeps {
        bridge: Arc::new(adb),
        artifacts: Arc::new(ZipBundles::new(
            &config.provisioning.stf_bundle,
            &config.provisioning.agent_bundle,
        )),
        manifests: Arc::new(AaptManifestReader::new(&config.provisioning.aapt)),
        spawner: Arc::new(CommandSpawner::new(
            config.processes.relay_command.clone(),
            config.processes.bridge_command.clone(),
        )),
        ports: Arc::new(RangePortAllocator::new(
            config.processes.port_range_start,
            config.processes.port_range_end,
        )),
        plan: Arc::new(ProvisioningPlan::from_config(&config.provisioning)),
        host_ip,
        host_network: local_network(host_ip),
        device_names: Arc::new(config.provider.device_names.clone()),
    };
    let reporter: Arc<dyn DeviceReporter> = link;
    let mut controller = FleetController::new(
        DeviceSessionFactory::new(deps),
        reporter,
        secret,
        config.provider.allow_remote,
    );

    // The HTTP surface that accepts cold requests is not part of this binary.
    // The sender stays alive with no producer, so `run` never sees a cold
    // command until that surface is wired to it.
    let (_cold_requests, commands) = mpsc::channel(16);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => {
                error!("failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    info!("fleet-provider ready.  Press Ctrl-C to exit.");
    controller.run(events, commands, shutdown).await;

    info!("fleet-provider stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_leave_config_untouched() {
        // Arrange
        let cli = Cli::parse_from(["fleet-provider"]);
        let mut config = ProviderConfig::default();

        // Act
        cli.apply_to(&mut config).unwrap();

        // Assert: only environment-backed adb flags may differ
        assert_eq!(config.heartbeat, ProviderConfig::default().heartbeat);
        assert_eq!(config.provider, ProviderConfig::default().provider);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["fleet-provider", "-s", "10.0.0.1:4000", "-p", "3600"]);
        assert_eq!(cli.server.as_deref(), Some("10.0.0.1:4000"));
        assert_eq!(cli.port, Some(3600));
    }

    #[test]
    fn test_cli_overrides_config() {
        // Arrange
        let cli = Cli::parse_from([
            "fleet-provider",
            "--server",
            "http://cp.example:4000/",
            "--port",
            "3600",
            "--allow-remote",
            "--owner",
            "ops@example.com",
            "--adb-host",
            "10.0.0.2",
            "--adb-port",
            "5038",
        ]);
        let mut config = ProviderConfig::default();

        // Act
        cli.apply_to(&mut config).unwrap();

        // Assert
        assert_eq!(config.heartbeat.server, "http://cp.example:4000/");
        assert_eq!(config.provider.listen_port, 3600);
        assert!(config.provider.allow_remote);
        assert_eq!(config.provider.owner.as_deref(), Some("ops@example.com"));
        assert_eq!(config.adb.host, "10.0.0.2");
        assert_eq!(config.adb.port, 5038);
    }

    #[test]
    fn test_owner_file_is_trimmed_and_wins() {
        // Arrange
        let path = std::env::temp_dir().join(format!("owner-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "  lead@example.com\n").unwrap();
        let cli = Cli::parse_from([
            "fleet-provider".to_string(),
            "--owner".to_string(),
            "other@example.com".to_string(),
            "--owner-file".to_string(),
            path.display().to_string(),
        ]);
        let mut config = ProviderConfig::default();

        // Act
        let result = cli.apply_to(&mut config);
        let _ = std::fs::remove_file(&path);

        // Assert
        result.unwrap();
        assert_eq!(config.provider.owner.as_deref(), Some("lead@example.com"));
    }

    #[test]
    fn test_print_config_flag() {
        assert!(Cli::parse_from(["fleet-provider", "--print-config"]).print_config);
        assert!(!Cli::parse_from(["fleet-provider"]).print_config);
    }

    #[test]
    fn test_printed_config_reflects_overrides() {
        // Arrange
        let cli = Cli::parse_from(["fleet-provider", "-s", "cp.lan:4100", "--print-config"]);
        let mut config = ProviderConfig::default();
        cli.apply_to(&mut config).unwrap();

        // Act
        let text = render_config(&config).unwrap();

        // Assert
        assert!(text.contains("server = \"cp.lan:4100\""));
    }

    #[test]
    fn test_missing_owner_file_is_error() {
        let cli = Cli::parse_from(["fleet-provider", "--owner-file", "/nonexistent/owner.txt"]);
        assert!(cli.apply_to(&mut ProviderConfig::default()).is_err());
    }

    #[test]
    fn test_secret_is_ten_uppercase_alphanumerics() {
        let secret = generate_secret();
        assert_eq!(secret.len(), SECRET_LEN);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_secrets_differ() {
        assert_ne!(generate_secret(), generate_secret());
    }
}
