//! The device-presence stream built on `host:track-devices`.
//!
//! # How tracking works (for beginners)
//!
//! `host:track-devices` keeps its connection open and sends the complete
//! device table every time any device changes state.  [`DeviceTracker`]
//! keeps the last table it saw and turns each new snapshot into the list of
//! devices that appeared or disappeared.
//!
//! When the connection drops (the adb server was killed, crashed, or was
//! restarted by another tool), every device we were tracking is reported
//! absent, because we can no longer vouch for any of them.  The tracker then
//! waits a fixed delay, asks the launcher to start the server again, checks
//! that it answers `host:version`, and reopens tracking.  The first snapshot
//! of the new connection re-announces every device that is still there.
//!
//! ```text
//!            open ok                    snapshot
//!   ┌──────────────────────▶ Connected ◀────────┐
//!   │                            │ ─────────────┘
//!   │                   read/EOF │ error: emit removals
//!   │                            ▼
//!   └─── version ok ──── Reconnecting ◀── version failed
//!                        (delay, restart)
//! ```
//!
//! The stream never ends.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{DeviceEvent, DeviceTable};
use futures_util::Stream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::client::AdbHostClient;
use super::connection::AdbConnection;
use super::AdbError;

/// Starts the adb server out-of-band.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn start_server(&self) -> std::io::Result<()>;
}

/// Runs `<program> start-server`.
#[derive(Debug, Clone)]
pub struct AdbServerLauncher {
    program: PathBuf,
}

impl AdbServerLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ServerLauncher for AdbServerLauncher {
    async fn start_server(&self) -> std::io::Result<()> {
        let status = Command::new(&self.program)
            .arg("start-server")
            .kill_on_drop(true)
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "{} start-server exited with {status}",
                self.program.display()
            )))
        }
    }
}

enum TrackerState {
    /// No tracking connection yet (startup, or the server answered again).
    Idle,
    Connected(AdbConnection),
    /// The last connection failed with this error.
    Reconnecting(AdbError),
}

/// Turns `host:track-devices` snapshots into presence events, healing the
/// connection whenever it drops.
pub struct DeviceTracker {
    client: AdbHostClient,
    launcher: Arc<dyn ServerLauncher>,
    retry_delay: Duration,
    table: DeviceTable,
    pending: VecDeque<DeviceEvent>,
    state: TrackerState,
}

impl DeviceTracker {
    pub fn new(
        client: AdbHostClient,
        launcher: Arc<dyn ServerLauncher>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            launcher,
            retry_delay,
            table: DeviceTable::new(),
            pending: VecDeque::new(),
            state: TrackerState::Idle,
        }
    }

    /// Waits for the next presence change.
    pub async fn next_event(&mut self) -> DeviceEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            self.step().await;
        }
    }

    /// Consumes the tracker into an endless stream of events.
    pub fn into_stream(self) -> impl Stream<Item = DeviceEvent> + Send {
        futures_util::stream::unfold(self, |mut tracker| async move {
            let event = tracker.next_event().await;
            Some((event, tracker))
        })
    }

    async fn step(&mut self) {
        self.state = match std::mem::replace(&mut self.state, TrackerState::Idle) {
            TrackerState::Idle => match self.client.open_tracking().await {
                Ok(conn) => {
                    info!("tracking devices on {}", self.client.address());
                    TrackerState::Connected(conn)
                }
                Err(e) => self.lose_connection(e),
            },
            TrackerState::Connected(mut conn) => match conn.read_string().await {
                Ok(payload) => {
                    let events = self.table.advance(DeviceTable::from_snapshot(&payload));
                    self.pending.extend(events);
                    TrackerState::Connected(conn)
                }
                Err(e) => self.lose_connection(e),
            },
            TrackerState::Reconnecting(cause) => self.recover(cause).await,
        };
    }

    fn lose_connection(&mut self, cause: AdbError) -> TrackerState {
        let removed = self.table.clear();
        warn!(
            "device tracking interrupted ({cause}); dropping {} device(s)",
            removed.len()
        );
        self.pending.extend(removed);
        TrackerState::Reconnecting(cause)
    }

    async fn recover(&mut self, cause: AdbError) -> TrackerState {
        tokio::time::sleep(self.retry_delay).await;

        if cause.is_connection_lost() {
            debug!("starting adb server");
            if let Err(e) = self.launcher.start_server().await {
                warn!("could not start adb server: {e}");
            }
        }

        match self.client.server_version().await {
            Ok(version) => {
                info!("adb server is back (version {version})");
                TrackerState::Idle
            }
            Err(e) => {
                debug!("adb server still unavailable: {e}");
                TrackerState::Reconnecting(e)
            }
        }
    }
}

impl AdbHostClient {
    /// The presence stream: one event per device that became ready or
    /// stopped being ready.  Never ends.
    pub fn track_devices(
        &self,
        launcher: Arc<dyn ServerLauncher>,
        retry_delay: Duration,
    ) -> impl Stream<Item = DeviceEvent> + Send {
        DeviceTracker::new(self.clone(), launcher, retry_delay).into_stream()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use fleet_core::DeviceStatus;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::infrastructure::adb::client::tests::{okay_string, FakeAdbServer};
    use crate::infrastructure::adb::AdbAddress;

    fn framed(payload: &str) -> Vec<u8> {
        format!("{:04x}{payload}", payload.len()).into_bytes()
    }

    #[tokio::test]
    async fn test_snapshots_become_presence_events() {
        // Arrange: one tracking connection sending two snapshots then idling
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut reply = b"OKAY".to_vec();
            reply.extend(framed("a\tdevice\nz\toffline\n"));
            reply.extend(framed("b\tdevice\n"));
            stream.write_all(&reply).await.unwrap();
            std::future::pending::<()>().await;
        });
        let client = AdbHostClient::new(AdbAddress {
            host: "127.0.0.1".to_string(),
            port,
        });
        let launcher = MockServerLauncher::new();
        let mut tracker = DeviceTracker::new(client, Arc::new(launcher), Duration::from_millis(5));

        // Act
        let first = tracker.next_event().await;
        let second = tracker.next_event().await;
        let third = tracker.next_event().await;

        // Assert: offline rows never appear, removals precede additions
        assert_eq!((first.present, first.serial.as_str()), (true, "a"));
        assert_eq!((second.present, second.serial.as_str()), (false, "a"));
        assert_eq!((third.present, third.serial.as_str()), (true, "b"));
        assert_eq!(third.status, DeviceStatus::Device);
    }

    #[tokio::test]
    async fn test_refused_connection_restarts_server_before_retrying() {
        // Arrange: nothing listens until the launcher "starts" the server
        let server = FakeAdbServer::start(HashMap::from([(
            "host:version".to_string(),
            okay_string("0029"),
        )]))
        .await;
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let mut launcher = MockServerLauncher::new();
        launcher.expect_start_server().times(1).returning(|| Ok(()));
        let mut tracker = DeviceTracker::new(
            AdbHostClient::new(AdbAddress {
                host: "127.0.0.1".to_string(),
                port: dead_port,
            }),
            Arc::new(launcher),
            Duration::from_millis(5),
        );

        // Act: first step fails to open, second step restarts and checks
        tracker.step().await;
        assert!(matches!(tracker.state, TrackerState::Reconnecting(_)));
        tracker.client = server.client();
        tracker.step().await;

        // Assert
        assert!(matches!(tracker.state, TrackerState::Idle));
        assert_eq!(server.commands(), vec!["host:version"]);
    }

    #[tokio::test]
    async fn test_protocol_refusal_does_not_restart_server() {
        // Arrange: the server is alive but refuses track-devices
        let server = FakeAdbServer::start(HashMap::new()).await;
        let mut launcher = MockServerLauncher::new();
        launcher.expect_start_server().times(0);
        let mut tracker =
            DeviceTracker::new(server.client(), Arc::new(launcher), Duration::from_millis(5));

        // Act
        tracker.step().await;
        tracker.step().await;

        // Assert: still reconnecting because host:version is refused too
        assert!(matches!(tracker.state, TrackerState::Reconnecting(AdbError::Protocol(_))));
        assert!(tracker.pending.is_empty());
    }
}
