//! [`TeachSession`] – UDP session with the teaching-mode endpoint.
//!
//! The session owns the socket and one [`TeachCommandBuilder`]. The builder
//! is shared with the keep-alive task so every frame on the wire, keep-alives
//! included, carries the next sequence number.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use strider_kernel::OperatorConfirmation;
use strider_types::StriderError;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::action_list::{self, ActionListEntry, RecordLayout};
use crate::builder::{TeachCommandBuilder, command};
use crate::frame::{FramingError, decode};

/// Port the teaching endpoint listens on by default.
pub const DEFAULT_TEACH_PORT: u16 = 49504;
/// Port used by some firmware builds.
pub const ALTERNATE_TEACH_PORT: u16 = 43893;
/// Address of the robot on its own wired network.
pub const DEFAULT_ROBOT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 123, 161);

/// Keep-alive periods must stay below this; the peer drops idle sessions
/// after about five seconds.
pub const MAX_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

const RECV_BUFFER_LEN: usize = 65_536;

#[derive(Error, Debug)]
pub enum TeachError {
    #[error("teach socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("teach framing error: {0}")]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Rejected(#[from] StriderError),

    #[error("no stored action named '{0}'")]
    UnknownAction(String),

    #[error("invalid teach session config: {0}")]
    InvalidConfig(String),
}

/// Settings for one teaching-mode session.
#[derive(Debug, Clone)]
pub struct TeachSessionConfig {
    pub robot_addr: SocketAddr,
    /// Pause between consecutive handshake frames.
    pub handshake_delay: Duration,
    /// Keep-alive period. The peer drops sessions idle for longer than ~5 s.
    pub keep_alive_interval: Duration,
    /// A query response is complete once no datagram arrived for this long.
    pub reply_idle_timeout: Duration,
    pub record_layout: RecordLayout,
}

impl TeachSessionConfig {
    pub fn for_robot(ip: IpAddr, port: u16) -> Self {
        Self {
            robot_addr: SocketAddr::new(ip, port),
            ..Self::default()
        }
    }

    /// Check the timing fields. The keep-alive period must lie in (0, 5 s).
    pub fn validate(&self) -> Result<(), TeachError> {
        if self.keep_alive_interval.is_zero() || self.keep_alive_interval >= MAX_KEEP_ALIVE_INTERVAL {
            return Err(TeachError::InvalidConfig(format!(
                "keep-alive interval {:?} outside (0, {:?})",
                self.keep_alive_interval, MAX_KEEP_ALIVE_INTERVAL
            )));
        }
        if self.reply_idle_timeout.is_zero() {
            return Err(TeachError::InvalidConfig("reply idle timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for TeachSessionConfig {
    fn default() -> Self {
        Self {
            robot_addr: SocketAddr::new(IpAddr::V4(DEFAULT_ROBOT_IP), DEFAULT_TEACH_PORT),
            handshake_delay: Duration::from_millis(100),
            keep_alive_interval: Duration::from_millis(4500),
            reply_idle_timeout: Duration::from_secs(2),
            record_layout: RecordLayout::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Keep-alive
// ────────────────────────────────────────────────────────────────────────────

/// Handle to the background keep-alive task. Dropping it stops the task.
#[derive(Debug)]
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TeachSession
// ────────────────────────────────────────────────────────────────────────────

pub struct TeachSession {
    socket: Arc<UdpSocket>,
    builder: Arc<Mutex<TeachCommandBuilder>>,
    config: TeachSessionConfig,
}

impl TeachSession {
    /// Bind an ephemeral local port and connect it to the robot.
    ///
    /// The config is validated first; see [`TeachSessionConfig::validate`].
    pub async fn connect(config: TeachSessionConfig) -> Result<Self, TeachError> {
        config.validate()?;
        let local: SocketAddr = match config.robot_addr.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(config.robot_addr).await?;
        info!(robot = %config.robot_addr, local = ?socket.local_addr().ok(), "teach session socket ready");
        Ok(Self {
            socket: Arc::new(socket),
            builder: Arc::new(Mutex::new(TeachCommandBuilder::new())),
            config,
        })
    }

    pub fn config(&self) -> &TeachSessionConfig {
        &self.config
    }

    /// Sequence number of the next frame.
    pub fn sequence(&self) -> u16 {
        self.builder.lock().sequence()
    }

    async fn send(&self, frame: Bytes, what: &'static str) -> Result<(), TeachError> {
        self.socket.send(&frame).await?;
        debug!(what, len = frame.len(), "teach frame sent");
        Ok(())
    }

    /// Send the four handshake frames with the configured delay between them.
    pub async fn handshake(&self) -> Result<(), TeachError> {
        let frames = self.builder.lock().handshake();
        for (i, frame) in frames.into_iter().enumerate() {
            if i > 0 {
                sleep(self.config.handshake_delay).await;
            }
            self.send(frame, "handshake").await?;
        }
        info!(robot = %self.config.robot_addr, "teach handshake sent");
        Ok(())
    }

    /// Spawn the keep-alive task. Must be called from within a Tokio runtime.
    pub fn start_keep_alive(&self) -> KeepAlive {
        let socket = self.socket.clone();
        let builder = self.builder.clone();
        let period = self.config.keep_alive_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the handshake just
            // refreshed the session.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let frame = builder.lock().keep_alive();
                if let Err(e) = socket.send(&frame).await {
                    warn!(error = %e, "keep-alive send failed");
                }
            }
        });
        debug!(?period, "keep-alive task started");
        KeepAlive { handle }
    }

    /// Request the stored action list and collect the response.
    ///
    /// Undecodable datagrams are skipped. Frames with a bad checksum are
    /// logged and still used.
    pub async fn query_actions(&self) -> Result<Vec<ActionListEntry>, TeachError> {
        let frame = self.builder.lock().query_action_list();
        self.send(frame, "query_actions").await?;

        let layout = self.config.record_layout;
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let mut entries = Vec::new();
        let mut next_index: u16 = 0;

        loop {
            let n = match timeout(self.config.reply_idle_timeout, self.socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };
            let frame = match decode(&buf[..n]) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, len = n, "discarding undecodable teach datagram");
                    continue;
                }
            };
            if frame.command_id != command::QUERY_ACTIONS {
                debug!(command_id = frame.command_id, "ignoring non-query frame during listing");
                continue;
            }
            if let Some(warning) = frame.integrity_warning() {
                warn!(%warning, "using action list frame despite checksum mismatch");
            }
            entries.extend(action_list::parse_records(&frame.payload, layout, next_index));
            next_index = next_index.wrapping_add(action_list::record_count(&frame.payload, layout) as u16);
        }

        info!(count = entries.len(), ?layout, "action list received");
        Ok(entries)
    }

    pub async fn play(&self, index: u16) -> Result<(), TeachError> {
        let frame = self.builder.lock().play(index);
        self.send(frame, "play").await?;
        info!(index, "teach action play requested");
        Ok(())
    }

    /// Play the action called `name` in `listing`, returning its index.
    pub async fn play_by_name(&self, name: &str, listing: &[ActionListEntry]) -> Result<u16, TeachError> {
        let entry = action_list::find_by_name(listing, name)
            .ok_or_else(|| TeachError::UnknownAction(name.to_string()))?;
        self.play(entry.index).await?;
        Ok(entry.index)
    }

    pub async fn stop(&self) -> Result<(), TeachError> {
        let frame = self.builder.lock().stop();
        self.send(frame, "stop").await
    }

    /// Release arm torque for hand guiding.
    pub async fn enter_compliance(&self, confirmation: OperatorConfirmation) -> Result<(), TeachError> {
        let frame = self.builder.lock().enter_compliance(confirmation)?;
        self.send(frame, "enter_compliance").await?;
        warn!("arm torque released for teaching");
        Ok(())
    }

    pub async fn exit_compliance(&self) -> Result<(), TeachError> {
        let frame = self.builder.lock().exit_compliance();
        self.send(frame, "exit_compliance").await
    }

    pub async fn start_recording(&self) -> Result<(), TeachError> {
        let frame = self.builder.lock().start_recording();
        self.send(frame, "start_recording").await
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), TeachError> {
        let frame = self.builder.lock().rename(old_name, new_name);
        self.send(frame, "rename").await?;
        info!(old_name, new_name, "teach action rename requested");
        Ok(())
    }
}
