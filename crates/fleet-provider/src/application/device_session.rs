//! DeviceSession: provisioning and port exposure for one device.
//!
//! # Lifecycle
//!
//! ```text
//!   new ──▶ Initializing ──ok──▶ Ready ──reset──▶ Resetting ──▶ Initializing
//!                │                 │
//!                └──err──▶ Failed  └──close──▶ Closed
//! ```
//!
//! Initialization runs these steps in order and stops at the first failure:
//!
//! 1. Read the device's ABI, ABI list, and SDK level and pick the binaries
//!    to push.  No agent build for any ABI is a provisioning error.
//! 2. Push each binary unless the remote file already has the same size and
//!    at least the required permission bits.  Contents are not compared.
//! 3. Install each helper APK unless the installed version code and name
//!    both match.
//! 4. Restart the on-device agent.
//! 5. Expose the agent port and the input-method port through a forward plus
//!    a relay each, and start the network bridge on a fresh port.
//!
//! Helper processes started along the way belong to the session's
//! [`ProcessArena`]; they are terminated on failure, reset, close, and drop.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fleet_core::domain::device::{tcp_spec, ForwardRule};
use fleet_core::protocol::parse::{parse_abi_list, parse_dumpsys_package};
use fleet_core::protocol::sync::RemoteStat;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::fleet_controller::{ManagedSession, SessionFactory};
use crate::application::provisioning::{BinarySpec, DeviceAbi, ProvisioningPlan};
use crate::infrastructure::adb::{AdbError, AdbHostClient};
use crate::infrastructure::artifacts::{ArtifactError, ArtifactSource};
use crate::infrastructure::manifest::ManifestReader;
use crate::infrastructure::ports::PortAllocator;
use crate::infrastructure::process::{BackgroundSpawner, ProcessArena};

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("adb: {0}")]
    Adb(#[from] AdbError),

    /// No agent build supports any of the device's ABIs.
    #[error("no provisioning artifact for ABIs {abis:?}")]
    Provision { abis: Vec<String> },

    /// An APK could not be installed; `stage` is `parse`, `read`, `push`, or
    /// `install`.
    #[error("install failed at {stage}: {reason}")]
    Install { stage: &'static str, reason: String },

    #[error("artifact: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("failed to start helper process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    fn install(stage: &'static str, reason: impl std::fmt::Display) -> Self {
        SessionError::Install {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// The device operations a session needs.
///
/// Implemented by [`AdbHostClient`]; tests substitute a recording fake.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    async fn shell(&self, serial: &str, command: &str) -> Result<String, AdbError>;
    async fn forward_list(&self) -> Result<Vec<ForwardRule>, AdbError>;
    async fn forward(&self, serial: &str, local: &str, remote: &str) -> Result<(), AdbError>;
    async fn stat(&self, serial: &str, path: &str) -> Result<RemoteStat, AdbError>;
    async fn push(&self, serial: &str, data: &[u8], path: &str, mode: u32)
        -> Result<(), AdbError>;
}

#[async_trait]
impl DeviceBridge for AdbHostClient {
    async fn shell(&self, serial: &str, command: &str) -> Result<String, AdbError> {
        AdbHostClient::shell(self, serial, command).await
    }

    async fn forward_list(&self) -> Result<Vec<ForwardRule>, AdbError> {
        AdbHostClient::forward_list(self).await
    }

    async fn forward(&self, serial: &str, local: &str, remote: &str) -> Result<(), AdbError> {
        AdbHostClient::forward(self, serial, local, remote, false).await
    }

    async fn stat(&self, serial: &str, path: &str) -> Result<RemoteStat, AdbError> {
        AdbHostClient::stat(self, serial, path).await
    }

    async fn push(
        &self,
        serial: &str,
        data: &[u8],
        path: &str,
        mode: u32,
    ) -> Result<(), AdbError> {
        AdbHostClient::push(self, serial, data, path, mode).await
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub bridge: Arc<dyn DeviceBridge>,
    pub artifacts: Arc<dyn ArtifactSource>,
    pub manifests: Arc<dyn ManifestReader>,
    pub spawner: Arc<dyn BackgroundSpawner>,
    pub ports: Arc<dyn PortAllocator>,
    pub plan: Arc<ProvisioningPlan>,
    /// Address advertised in the provider addresses.
    pub host_ip: IpAddr,
    /// `<ip>/<prefix length>` of the advertised interface.
    pub host_network: String,
    /// Marketing names keyed by model.
    pub device_names: Arc<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Ready,
    Resetting,
    Failed,
    Closed,
}

/// Host ports through which a ready device is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposedPorts {
    /// Relay to the on-device agent.
    pub agent: u16,
    /// Relay to the input-method service.
    pub input: u16,
    /// Network adb bridge.
    pub bridge: u16,
}

/// Provisioning state machine for one device.
pub struct DeviceSession {
    serial: String,
    deps: SessionDeps,
    state: SessionState,
    processes: ProcessArena,
    ports: Option<ExposedPorts>,
}

impl DeviceSession {
    pub fn new(serial: impl Into<String>, deps: SessionDeps) -> Self {
        Self {
            serial: serial.into(),
            deps,
            state: SessionState::Initializing,
            processes: ProcessArena::new(),
            ports: None,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ports(&self) -> Option<ExposedPorts> {
        self.ports
    }

    /// Number of helper processes currently running.
    pub fn running_helpers(&self) -> usize {
        self.processes.running()
    }

    /// Runs the full initialization sequence.
    ///
    /// On failure every helper started so far is terminated and the session
    /// is left in [`SessionState::Failed`].
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        self.state = SessionState::Initializing;
        info!("initializing device {}", self.serial);

        match self.provision().await {
            Ok(ports) => {
                self.ports = Some(ports);
                self.state = SessionState::Ready;
                info!(
                    "device {} ready: agent :{}, input :{}, bridge :{}",
                    self.serial, ports.agent, ports.input, ports.bridge
                );
                Ok(())
            }
            Err(e) => {
                self.processes.terminate_all();
                self.ports = None;
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Stops the helpers, sends the device home, and initializes again.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        self.state = SessionState::Resetting;
        self.processes.terminate_all();
        self.processes.wait_all().await;
        self.ports = None;

        if let Err(e) = self.shell("input keyevent HOME").await {
            self.state = SessionState::Failed;
            return Err(e);
        }
        self.initialize().await
    }

    /// Terminates the helpers without touching the device.  Idempotent.
    pub fn close(&mut self) {
        self.processes.terminate_all();
        self.ports = None;
        if self.state != SessionState::Closed {
            debug!("closed session for {}", self.serial);
            self.state = SessionState::Closed;
        }
    }

    /// Waits for every helper to exit.
    pub async fn wait(&mut self) {
        self.processes.wait_all().await;
    }

    /// Provider addresses (`<ip>:<port>`) of a ready device, else `null`.
    pub fn addresses(&self) -> Value {
        let Some(ports) = self.ports else {
            return Value::Null;
        };
        let ip = self.deps.host_ip;
        json!({
            "atxAgentAddress": format!("{ip}:{}", ports.agent),
            "whatsInputAddress": format!("{ip}:{}", ports.input),
            "remoteConnectAddress": format!("{ip}:{}", ports.bridge),
            "remoteConnectAddressNetwork": self.deps.host_network,
        })
    }

    /// Identity properties reported to the control plane.
    pub async fn properties(&self) -> Result<Value, SessionError> {
        let brand = self.getprop("ro.product.brand").await?;
        let model = self.getprop("ro.product.model").await?;
        let version = self.getprop("ro.build.version.release").await?;
        let name = self
            .deps
            .device_names
            .get(&model)
            .cloned()
            .unwrap_or_else(|| model.clone());
        Ok(json!({
            "serial": self.serial,
            "brand": brand,
            "version": version,
            "model": model,
            "name": name,
        }))
    }

    /// Shows the identification screen on the device.
    pub async fn open_identify(&self) -> Result<(), SessionError> {
        self.shell("am start -n com.github.uiautomator/.IdentifyActivity -e theme black")
            .await?;
        Ok(())
    }

    /// Makes `device_port` reachable on a host port from other machines.
    ///
    /// Reuses an existing `tcp:` forward of this device to the port, or
    /// forwards a fresh loopback port, then starts a relay from a second
    /// fresh port (listening on every interface) to the loopback port.
    /// Returns the relay's port.
    pub async fn proxy_device_port(&mut self, device_port: u16) -> Result<u16, SessionError> {
        let remote = tcp_spec(device_port);
        let existing = self
            .deps
            .bridge
            .forward_list()
            .await?
            .into_iter()
            .filter(|rule| rule.serial == self.serial && rule.remote == remote)
            .find_map(|rule| rule.local_tcp_port());

        let local_port = match existing {
            Some(port) => {
                debug!("{}: reusing forward tcp:{port} -> {remote}", self.serial);
                port
            }
            None => {
                let port = self.deps.ports.allocate();
                self.deps
                    .bridge
                    .forward(&self.serial, &tcp_spec(port), &remote)
                    .await?;
                port
            }
        };

        let listen_port = self.deps.ports.allocate();
        let relay = self
            .deps
            .spawner
            .spawn_relay(listen_port, local_port)
            .map_err(SessionError::Spawn)?;
        self.processes.push(relay);
        Ok(listen_port)
    }

    // ── Initialization steps ──────────────────────────────────────────────────

    async fn provision(&mut self) -> Result<ExposedPorts, SessionError> {
        let plan = Arc::clone(&self.deps.plan);

        let abi = self.query_abi().await?;
        debug!("{}: sdk {}, abi {}, abis {:?}", self.serial, abi.sdk, abi.abi, abi.abis);
        let binaries = plan
            .binaries(&abi)
            .ok_or_else(|| SessionError::Provision {
                abis: abi.abis.clone(),
            })?;
        for spec in &binaries {
            self.push_binary(spec).await?;
        }

        for apk in &plan.apks {
            self.install_apk(apk).await?;
        }

        self.shell(&plan.agent_stop_command()).await?;
        self.shell(&plan.agent_start_command()).await?;

        let agent = self.proxy_device_port(plan.agent_port).await?;
        let input = self.proxy_device_port(plan.input_port).await?;

        let bridge = self.deps.ports.allocate();
        let process = self
            .deps
            .spawner
            .spawn_bridge(&self.serial, bridge)
            .map_err(SessionError::Spawn)?;
        self.processes.push(process);

        Ok(ExposedPorts {
            agent,
            input,
            bridge,
        })
    }

    async fn query_abi(&self) -> Result<DeviceAbi, SessionError> {
        let sdk = self.getprop("ro.build.version.sdk").await?;
        let abi = self.getprop("ro.product.cpu.abi").await?;
        let abilist = self.getprop("ro.product.cpu.abilist").await?;
        Ok(DeviceAbi {
            abis: parse_abi_list(&abilist, &abi),
            abi,
            sdk,
        })
    }

    async fn push_binary(&self, spec: &BinarySpec) -> Result<(), SessionError> {
        let Some(data) = self.deps.artifacts.load(spec.bundle, &spec.entry)? else {
            warn!("{}: {} not in bundle, skipped", self.serial, spec.entry);
            return Ok(());
        };

        let remote = self.deps.bridge.stat(&self.serial, &spec.dest).await?;
        if remote.satisfies(data.len() as u64, spec.mode) {
            debug!("{}: {} already in place", self.serial, spec.dest);
            return Ok(());
        }

        self.deps
            .bridge
            .push(&self.serial, &data, &spec.dest, spec.mode)
            .await?;
        info!("{}: pushed {} ({} bytes)", self.serial, spec.dest, data.len());
        Ok(())
    }

    async fn install_apk(&self, apk: &Path) -> Result<(), SessionError> {
        let manifest = self
            .deps
            .manifests
            .read_manifest(apk)
            .await
            .map_err(|e| SessionError::install("parse", e))?;
        let package = &manifest.package_name;

        let dumpsys = self.shell(&format!("dumpsys package {package}")).await?;
        let installed = parse_dumpsys_package(&dumpsys);
        if installed.as_ref().is_some_and(|i| manifest.matches(i)) {
            debug!("{}: {package} {} already installed", self.serial, manifest.version_name);
            return Ok(());
        }

        if installed.is_some() {
            match self.shell(&format!("pm uninstall {package}")).await {
                Ok(out) if out.contains("Success") => debug!("{}: uninstalled {package}", self.serial),
                Ok(out) => warn!("{}: uninstall {package}: {}", self.serial, out.trim()),
                Err(e) => warn!("{}: uninstall {package}: {e}", self.serial),
            }
        }

        let data = tokio::fs::read(apk)
            .await
            .map_err(|e| SessionError::install("read", e))?;
        let dest = format!("/data/local/tmp/tmp-{}.apk", unix_millis());
        self.deps
            .bridge
            .push(&self.serial, &data, &dest, 0o644)
            .await
            .map_err(|e| SessionError::install("push", e))?;

        let result = self.shell(&format!("pm install -r -t {dest}")).await;
        if let Err(e) = self.shell(&format!("rm {dest}")).await {
            debug!("{}: could not remove {dest}: {e}", self.serial);
        }
        let output = result.map_err(|e| SessionError::install("install", e))?;
        if !output.contains("Success") {
            return Err(SessionError::install("install", output.trim()));
        }
        info!(
            "{}: installed {package} {} ({})",
            self.serial, manifest.version_name, manifest.version_code
        );
        Ok(())
    }

    async fn shell(&self, command: &str) -> Result<String, SessionError> {
        Ok(self.deps.bridge.shell(&self.serial, command).await?)
    }

    async fn getprop(&self, name: &str) -> Result<String, SessionError> {
        Ok(self.shell(&format!("getprop {name}")).await?.trim().to_string())
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[async_trait]
impl ManagedSession for DeviceSession {
    async fn initialize(&mut self) -> Result<(), SessionError> {
        DeviceSession::initialize(self).await
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        DeviceSession::reset(self).await
    }

    async fn properties(&self) -> Result<Value, SessionError> {
        DeviceSession::properties(self).await
    }

    async fn open_identify(&self) -> Result<(), SessionError> {
        DeviceSession::open_identify(self).await
    }

    fn addresses(&self) -> Value {
        DeviceSession::addresses(self)
    }

    fn close(&mut self) {
        DeviceSession::close(self)
    }

    async fn wait(&mut self) {
        DeviceSession::wait(self).await
    }
}

/// Builds [`DeviceSession`]s sharing one set of collaborators.
#[derive(Clone)]
pub struct DeviceSessionFactory {
    deps: SessionDeps,
}

impl DeviceSessionFactory {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps }
    }
}

impl SessionFactory for DeviceSessionFactory {
    type Session = DeviceSession;

    fn create(&self, serial: &str) -> DeviceSession {
        DeviceSession::new(serial, self.deps.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
