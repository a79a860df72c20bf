use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::codec::{Frame, FrameCodec, DEFAULT_MAX_BODY_SIZE};
use crate::directory::{Directory, WorkerRecord};
use crate::error::{ProxyError, Result};
use crate::protocol::{Announcement, Reply};

#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Replies that cannot be written within this window are dropped.
    pub reply_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(1),
            max_frame_bytes: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Accepts worker control connections and keeps the [`Directory`] in step
/// with them.
pub struct ControlServer {
    directory: Directory,
    options: ControlOptions,
}

impl ControlServer {
    pub fn new(directory: Directory, options: ControlOptions) -> Self {
        Self { directory, options }
    }

    pub async fn serve(self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("Control server listening on {}", addr),
            Err(e) => warn!("Control server listening on unknown address: {}", e),
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let directory = self.directory.clone();
                    let options = self.options.clone();

                    tokio::spawn(async move {
                        handle_worker_connection(stream, peer, directory, options).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept control connection: {}", e);
                }
            }
        }
    }
}

async fn handle_worker_connection(
    stream: TcpStream,
    peer: SocketAddr,
    directory: Directory,
    options: ControlOptions,
) {
    debug!("Worker connected from {}", peer);
    let mut framed = Framed::new(stream, FrameCodec::with_max_body(options.max_frame_bytes));

    // Frames from one connection are handled strictly one after another.
    loop {
        match framed.next().await {
            Some(Ok(frame)) => {
                let reply = apply_announcement(&directory, &frame, peer).await;
                send_reply(&mut framed, reply, options.reply_timeout, peer).await;
            }
            Some(Err(e)) => {
                warn!("Closing control connection {}: {}", peer, e);
                break;
            }
            None => break,
        }
    }

    let removed = directory.remove_by_control_address(peer).await;
    if removed.is_empty() {
        debug!("Connection {} closed without a live record", peer);
    }
    for record in removed {
        info!("Worker {} disconnected ({})", record.host, peer);
    }
}

async fn send_reply(
    framed: &mut Framed<TcpStream, FrameCodec>,
    reply: Reply,
    reply_timeout: Duration,
    peer: SocketAddr,
) {
    let frame = match reply.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to encode reply for {}: {}", peer, e);
            return;
        }
    };
    match timeout(reply_timeout, framed.send(frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to reply to {}: {}", peer, e),
        Err(_) => warn!("Reply to {} dropped after {:?}", peer, reply_timeout),
    }
}

/// Validate one announcement frame from `peer` and register it.
///
/// Never fails: a bad frame turns into a `400` reply and leaves the
/// directory untouched.
pub async fn apply_announcement(directory: &Directory, frame: &Frame, peer: SocketAddr) -> Reply {
    let record = match build_record(frame, peer) {
        Ok(record) => record,
        Err(e) => {
            error!("Rejected announcement from {}: {}", peer, e);
            return Reply::bad_request(e.to_string());
        }
    };

    debug!(
        "Registered worker {} at {} with {} files",
        record.host,
        record.http_base_address,
        record.file_paths.len()
    );
    directory.upsert(record).await;
    Reply::ok()
}

fn build_record(frame: &Frame, peer: SocketAddr) -> Result<WorkerRecord> {
    let announcement = Announcement::from_frame(frame)?;
    if announcement.host.trim().is_empty() {
        return Err(ProxyError::protocol("empty host"));
    }
    let http_base_address = rewrite_http_address(&announcement.http_address, peer.ip())?;

    Ok(WorkerRecord {
        control_address: peer,
        host: announcement.host,
        http_base_address,
        file_paths: announcement.file_paths,
    })
}

/// Replace the host of a self-reported base URL with the IP the master
/// actually sees, keeping scheme, port and path.
pub fn rewrite_http_address(reported: &str, observed: IpAddr) -> Result<String> {
    let mut url = Url::parse(reported)
        .map_err(|e| ProxyError::protocol(format!("invalid httpAddress {:?}: {}", reported, e)))?;
    url.set_ip_host(observed.to_canonical())
        .map_err(|_| ProxyError::protocol(format!("httpAddress {:?} has no host", reported)))?;
    Ok(url.to_string())
}
