//! Background helper processes owned by device sessions.
//!
//! Each ready device keeps a few long-running helpers alive on the host: one
//! TCP relay per exposed device port, and one bridge that makes the device
//! reachable as a network adb target.  [`ProcessArena`] owns a session's
//! helpers and guarantees that every one of them is terminated when the
//! session closes, resets, fails, or is dropped.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A running helper that can be terminated and reaped.
#[async_trait]
pub trait BackgroundProcess: Send + Sync {
    /// Short description used in logs.
    fn label(&self) -> &str;

    /// Asks the process to stop; does not wait.
    fn terminate(&mut self);

    /// Waits until the process has exited.
    async fn wait(&mut self);
}

/// Starts the helpers a device session needs.
pub trait BackgroundSpawner: Send + Sync {
    /// Relay listening on `listen_port` on every interface and forwarding to
    /// `localhost:target_port`.
    fn spawn_relay(
        &self,
        listen_port: u16,
        target_port: u16,
    ) -> std::io::Result<Box<dyn BackgroundProcess>>;

    /// Bridge exposing the device `serial` as a network adb target on `port`.
    fn spawn_bridge(&self, serial: &str, port: u16) -> std::io::Result<Box<dyn BackgroundProcess>>;
}

// ── OS processes ──────────────────────────────────────────────────────────────

/// A child process started by [`CommandSpawner`].
pub struct ChildProcess {
    label: String,
    child: Child,
}

#[async_trait]
impl BackgroundProcess for ChildProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("{} already gone: {e}", self.label);
        }
    }

    async fn wait(&mut self) {
        match self.child.wait().await {
            Ok(status) => debug!("{} exited with {status}", self.label),
            Err(e) => warn!("waiting for {} failed: {e}", self.label),
        }
    }
}

/// Spawns helpers from configured command prefixes.
///
/// The relay receives `<listen_port> localhost <target_port>` and the bridge
/// receives `<port> <serial>` after their configured arguments.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    relay_command: Vec<String>,
    bridge_command: Vec<String>,
}

impl CommandSpawner {
    pub fn new(relay_command: Vec<String>, bridge_command: Vec<String>) -> Self {
        Self {
            relay_command,
            bridge_command,
        }
    }

    fn spawn(
        &self,
        prefix: &[String],
        args: Vec<String>,
        label: String,
    ) -> std::io::Result<Box<dyn BackgroundProcess>> {
        let (program, fixed) = prefix.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty helper command")
        })?;
        let child = Command::new(program)
            .args(fixed)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!("started {label} (pid {:?})", child.id());
        Ok(Box::new(ChildProcess { label, child }))
    }
}

impl BackgroundSpawner for CommandSpawner {
    fn spawn_relay(
        &self,
        listen_port: u16,
        target_port: u16,
    ) -> std::io::Result<Box<dyn BackgroundProcess>> {
        self.spawn(
            &self.relay_command,
            vec![
                listen_port.to_string(),
                "localhost".to_string(),
                target_port.to_string(),
            ],
            format!("relay :{listen_port} -> localhost:{target_port}"),
        )
    }

    fn spawn_bridge(&self, serial: &str, port: u16) -> std::io::Result<Box<dyn BackgroundProcess>> {
        self.spawn(
            &self.bridge_command,
            vec![port.to_string(), serial.to_string()],
            format!("bridge {serial} on :{port}"),
        )
    }
}

// ── Arena ─────────────────────────────────────────────────────────────────────

/// The helpers owned by one device session.
///
/// `terminate_all` signals every running helper and moves it to a reaping
/// list; `wait_all` reaps everything.  Dropping the arena terminates whatever
/// is still running.
#[derive(Default)]
pub struct ProcessArena {
    running: Vec<Box<dyn BackgroundProcess>>,
    stopping: Vec<Box<dyn BackgroundProcess>>,
}

impl ProcessArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, process: Box<dyn BackgroundProcess>) {
        self.running.push(process);
    }

    /// Number of helpers not yet terminated.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn terminate_all(&mut self) {
        for mut process in self.running.drain(..) {
            debug!("terminating {}", process.label());
            process.terminate();
            self.stopping.push(process);
        }
    }

    /// Waits for every helper, running or terminated, to exit.
    pub async fn wait_all(&mut self) {
        for mut process in self.stopping.drain(..).chain(self.running.drain(..)) {
            process.wait().await;
        }
    }
}

impl Drop for ProcessArena {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
