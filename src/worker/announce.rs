//! Worker side of the control channel.
//!
//! Two tasks share one [`Link`]:
//! - the reconnect task dials the master and redials whenever it is woken,
//! - the announce task periodically sends the worker's record and reads
//!   the master's reply.
//!
//! Any failure on the connection drops it, flips the state to
//! `Disconnected` and wakes the reconnect task through a single-slot
//! channel, so a burst of failures still yields exactly one redial.

use futures_util::future::select_all;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, info};

use super::reload::ReloadSource;
use crate::codec::{FrameCodec, DEFAULT_MAX_BODY_SIZE};
use crate::error::{ProxyError, Result};
use crate::protocol::{Announcement, Reply};

/// Floor for both loop periods; a zero period would spin or panic.
const MIN_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct AnnounceConfig {
    pub master_addr: String,
    pub host: String,
    /// Base URL advertised to the master, e.g. `http://0.0.0.0:9641/`.
    pub http_address: String,
    /// Statically configured, already expanded paths.
    pub file_paths: Vec<String>,
    pub announce_interval: Duration,
    pub reconnect_interval: Duration,
    pub reload: Option<ReloadSource>,
    pub max_frame_bytes: usize,
}

impl AnnounceConfig {
    pub fn new(master_addr: impl Into<String>, host: impl Into<String>, http_address: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            host: host.into(),
            http_address: http_address.into(),
            file_paths: Vec::new(),
            announce_interval: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(10),
            reload: None,
            max_frame_bytes: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

type ControlConn = Framed<TcpStream, FrameCodec>;

struct Link {
    config: AnnounceConfig,
    conn: Mutex<Option<ControlConn>>,
    state: watch::Sender<LinkState>,
    wake: mpsc::Sender<()>,
}

impl Link {
    fn new(config: AnnounceConfig) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (wake, wake_rx) = mpsc::channel(1);
        let link = Arc::new(Self {
            config,
            conn: Mutex::new(None),
            state,
            wake,
        });
        (link, wake_rx)
    }

    fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    async fn dial(&self) -> Result<ControlConn> {
        let stream = TcpStream::connect(&self.config.master_addr)
            .await
            .map_err(|e| ProxyError::transport(self.config.master_addr.as_str(), e))?;
        stream.set_nodelay(true)?;
        Ok(Framed::new(
            stream,
            FrameCodec::with_max_body(self.config.max_frame_bytes),
        ))
    }

    async fn dial_until_connected(&self) {
        self.state.send_replace(LinkState::Connecting);
        loop {
            match self.dial().await {
                Ok(conn) => {
                    *self.conn.lock().await = Some(conn);
                    self.state.send_replace(LinkState::Connected);
                    info!("Connected to master at {}", self.config.master_addr);
                    return;
                }
                Err(e) => {
                    error!(
                        "Master connection failed, retrying in {:?}: {}",
                        self.config.reconnect_interval, e
                    );
                    sleep(self.config.reconnect_interval.max(MIN_PERIOD)).await;
                }
            }
        }
    }

    /// Send one announcement and wait for its reply.
    async fn announce(&self, file_paths: &[String]) -> Result<Reply> {
        let frame = Announcement {
            host: self.config.host.clone(),
            http_address: self.config.http_address.clone(),
            file_paths: file_paths.to_vec(),
        }
        .to_frame()?;

        let endpoint = self.config.master_addr.as_str();
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| ProxyError::transport(endpoint, "not connected"))?;

        conn.send(frame)
            .await
            .map_err(|e| ProxyError::transport(endpoint, e))?;

        let reply = match conn.next().await {
            Some(Ok(frame)) => Reply::from_frame(&frame)?,
            Some(Err(e)) => return Err(ProxyError::transport(endpoint, e)),
            None => return Err(ProxyError::transport(endpoint, "connection closed by master")),
        };
        if !reply.is_success() {
            return Err(ProxyError::protocol(format!(
                "master replied {}: {}",
                reply.code, reply.msg
            )));
        }
        Ok(reply)
    }

    async fn mark_disconnected(&self) {
        self.conn.lock().await.take();
        self.state.send_replace(LinkState::Disconnected);
        if self.wake.try_send(()).is_err() {
            debug!("Reconnect already pending");
        }
    }
}

async fn reconnect_task(link: Arc<Link>, mut wake_rx: mpsc::Receiver<()>) {
    loop {
        if link.state() != LinkState::Connected {
            link.dial_until_connected().await;
        }
        if wake_rx.recv().await.is_none() {
            return;
        }
    }
}

async fn announce_task(link: Arc<Link>) {
    let mut ticker = interval(link.config.announce_interval.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut file_paths = link.config.file_paths.clone();

    loop {
        ticker.tick().await;

        if let Some(reload) = &link.config.reload {
            match reload.resolve(&link.config.file_paths).await {
                Ok(paths) => file_paths = paths,
                Err(e) => error!(
                    "Reload from {} failed, keeping {} previous paths: {}",
                    reload.path().display(),
                    file_paths.len(),
                    e
                ),
            }
        }

        if link.state() != LinkState::Connected {
            debug!("Not connected to master, skipping announcement");
            continue;
        }

        match link.announce(&file_paths).await {
            Ok(reply) => debug!("Master acknowledged {} files: {}", file_paths.len(), reply.msg),
            Err(e) => {
                error!("Announcement to master failed: {}", e);
                link.mark_disconnected().await;
            }
        }
    }
}

/// Running announce/reconnect loop. Dropping it stops both tasks.
pub struct Announcer {
    link: Arc<Link>,
    tasks: Vec<JoinHandle<()>>,
}

impl Announcer {
    pub fn spawn(config: AnnounceConfig) -> Self {
        info!(
            "Starting announcer for {} towards {}",
            config.host, config.master_addr
        );
        let (link, wake_rx) = Link::new(config);
        let tasks = vec![
            tokio::spawn(reconnect_task(Arc::clone(&link), wake_rx)),
            tokio::spawn(announce_task(Arc::clone(&link))),
        ];
        Self { link, tasks }
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.link.state.subscribe()
    }

    /// Resolves if either background task exits.
    pub async fn stopped(&mut self) {
        if !self.tasks.is_empty() {
            let _ = select_all(self.tasks.iter_mut()).await;
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[tokio::test]
    async fn failure_burst_collapses_into_one_wake() {
        let (link, mut wake_rx) = Link::new(AnnounceConfig::new("127.0.0.1:1", "w", "http://127.0.0.1:2/"));
        link.state.send_replace(LinkState::Connected);

        for _ in 0..5 {
            link.mark_disconnected().await;
        }

        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(wake_rx.try_recv().is_ok());
        assert!(matches!(wake_rx.try_recv(), Err(TryRecvError::Empty)));

        // Once consumed, the next failure wakes again.
        link.mark_disconnected().await;
        assert!(wake_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn announce_without_connection_is_transport_error() {
        let (link, _wake_rx) = Link::new(AnnounceConfig::new("127.0.0.1:1", "w", "http://127.0.0.1:2/"));
        let err = link.announce(&[]).await.unwrap_err();
        assert!(matches!(err, ProxyError::Transport { .. }));
    }

    #[tokio::test]
    async fn zero_periods_keep_tasks_running() {
        let mut config = AnnounceConfig::new("127.0.0.1:1", "w", "http://127.0.0.1:2/");
        config.announce_interval = Duration::ZERO;
        config.reconnect_interval = Duration::ZERO;
        let mut announcer = Announcer::spawn(config);

        let stopped = tokio::time::timeout(Duration::from_millis(200), announcer.stopped()).await;
        assert!(stopped.is_err(), "announcer tasks exited");
    }
}
