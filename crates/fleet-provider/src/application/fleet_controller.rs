//! FleetController: turns device presence events into sessions and reports.
//!
//! The controller owns the `serial → session` map.  It consumes the tracking
//! stream and a command channel on one task and fully handles each item
//! before pulling the next, so provisioning of two devices never overlaps.
//!
//! # Reports
//!
//! ```text
//!   present, initialized  → { udid, colding: false, provider: {..}, properties: {..} }
//!   absent                → { udid, provider: null }
//!   cold reset succeeded  → { udid, colding: false, provider: {..} }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::DeviceEvent;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::application::device_session::SessionError;
use crate::domain::config::is_network_serial;

/// Receives device updates destined for the control plane.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceReporter: Send + Sync {
    async fn device_update(&self, data: Value);
}

/// What the controller needs from a device session.
#[async_trait]
pub trait ManagedSession: Send + Sync {
    async fn initialize(&mut self) -> Result<(), SessionError>;
    async fn reset(&mut self) -> Result<(), SessionError>;
    async fn properties(&self) -> Result<Value, SessionError>;
    async fn open_identify(&self) -> Result<(), SessionError>;
    fn addresses(&self) -> Value;
    fn close(&mut self);
    async fn wait(&mut self);
}

/// Creates a fresh session for a newly present device.
pub trait SessionFactory: Send + Sync {
    type Session: ManagedSession;

    fn create(&self, serial: &str) -> Self::Session;
}

/// Requests delivered to the controller from outside the tracking stream.
#[derive(Debug)]
pub enum FleetCommand {
    /// Reset ("cold") a device between users.
    Cold {
        udid: String,
        secret: String,
        reply: Option<oneshot::Sender<ColdOutcome>>,
    },
}

/// Result of a [`FleetCommand::Cold`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColdOutcome {
    Colded,
    SecretMismatch,
    UnknownDevice,
    /// The reset failed; the session was closed and the device reported
    /// absent.
    Failed(String),
}

pub struct FleetController<F: SessionFactory> {
    factory: F,
    reporter: Arc<dyn DeviceReporter>,
    secret: String,
    allow_remote: bool,
    sessions: HashMap<String, F::Session>,
}

impl<F: SessionFactory> FleetController<F> {
    /// `allow_remote` keeps `ip:port` serials instead of skipping them.
    pub fn new(
        factory: F,
        reporter: Arc<dyn DeviceReporter>,
        secret: impl Into<String>,
        allow_remote: bool,
    ) -> Self {
        Self {
            factory,
            reporter,
            secret: secret.into(),
            allow_remote,
            sessions: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, udid: &str) -> bool {
        self.sessions.contains_key(udid)
    }

    /// Handles one presence change.
    pub async fn handle_event(&mut self, event: DeviceEvent) {
        if !self.allow_remote && is_network_serial(&event.serial) {
            debug!("skipping remote device {}", event.serial);
            return;
        }
        if event.present {
            self.attach(event.serial).await;
        } else {
            self.detach(&event.serial).await;
        }
    }

    pub async fn handle_command(&mut self, command: FleetCommand) {
        match command {
            FleetCommand::Cold {
                udid,
                secret,
                reply,
            } => {
                let outcome = self.cold(&udid, &secret).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
        }
    }

    /// Processes events and commands until `shutdown` resolves or the event
    /// stream ends, then closes every session and waits for its helpers.
    pub async fn run<S, Q>(
        &mut self,
        events: S,
        mut commands: mpsc::Receiver<FleetCommand>,
        shutdown: Q,
    ) where
        S: Stream<Item = DeviceEvent>,
        Q: Future<Output = ()>,
    {
        tokio::pin!(events);
        tokio::pin!(shutdown);
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("device tracking stream ended");
                        break;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => commands_open = false,
                },
            }
        }

        self.shutdown().await;
    }

    /// Closes every session and waits for all helpers to exit.
    pub async fn shutdown(&mut self) {
        for session in self.sessions.values_mut() {
            session.close();
        }
        for (serial, mut session) in self.sessions.drain() {
            session.wait().await;
            debug!("helpers of {serial} exited");
        }
    }

    // ── Event handling ────────────────────────────────────────────────────────

    async fn attach(&mut self, serial: String) {
        if let Some(mut stale) = self.sessions.remove(&serial) {
            debug!("replacing stale session for {serial}");
            stale.close();
        }

        let mut session = self.factory.create(&serial);
        if let Err(e) = session.initialize().await {
            warn!("device {serial} initialize failed: {e}");
            session.close();
            return;
        }
        if let Err(e) = session.open_identify().await {
            warn!("device {serial}: identify screen not shown: {e}");
        }
        let properties = match session.properties().await {
            Ok(properties) => properties,
            Err(e) => {
                warn!("device {serial}: reading properties failed: {e}");
                session.close();
                return;
            }
        };

        let update = json!({
            "udid": serial,
            "colding": false,
            "provider": session.addresses(),
            "properties": properties,
        });
        self.sessions.insert(serial.clone(), session);
        self.reporter.device_update(update).await;
        info!("device {serial} is ready");
    }

    async fn detach(&mut self, serial: &str) {
        if let Some(mut session) = self.sessions.remove(serial) {
            session.close();
            info!("device {serial} removed");
        }
        self.reporter
            .device_update(json!({ "udid": serial, "provider": null }))
            .await;
    }

    async fn cold(&mut self, udid: &str, secret: &str) -> ColdOutcome {
        info!("cold request for {udid}");
        if secret != self.secret {
            warn!("cold request for {udid} rejected: secret mismatch");
            return ColdOutcome::SecretMismatch;
        }
        let Some(session) = self.sessions.get_mut(udid) else {
            warn!("cold request for unknown device {udid}");
            return ColdOutcome::UnknownDevice;
        };

        match session.reset().await {
            Ok(()) => {
                let update = json!({
                    "udid": udid,
                    "colding": false,
                    "provider": session.addresses(),
                });
                self.reporter.device_update(update).await;
                info!("device {udid} colded");
                ColdOutcome::Colded
            }
            Err(e) => {
                warn!("cold reset of {udid} failed: {e}");
                if let Some(mut session) = self.sessions.remove(udid) {
                    session.close();
                }
                self.reporter
                    .device_update(json!({ "udid": udid, "provider": null }))
                    .await;
                ColdOutcome::Failed(e.to_string())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
