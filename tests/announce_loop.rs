//! Worker announce/reconnect loop against real and scripted masters.

use file_proxy::protocol::{Announcement, Reply};
use file_proxy::worker::ReloadSource;
use file_proxy::{
    AnnounceConfig, Announcer, ControlOptions, ControlServer, Directory, FrameCodec, LinkState,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(master: SocketAddr, host: &str) -> AnnounceConfig {
    let mut config = AnnounceConfig::new(master.to_string(), host, "http://10.9.9.9:9641/");
    config.file_paths = vec!["/srv/static.bin".to_string()];
    config.announce_interval = Duration::from_millis(50);
    config.reconnect_interval = Duration::from_millis(50);
    config
}

async fn start_master(listener: TcpListener) -> Directory {
    let directory = Directory::new();
    let server = ControlServer::new(directory.clone(), ControlOptions::default());
    tokio::spawn(server.serve(listener));
    directory
}

async fn wait_for_paths(directory: &Directory, host: &str, expected: &[String]) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Some(record) = directory.get(host).await {
            if record.file_paths == expected {
                return;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "{} never announced {:?}", host, expected);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_announcement(conn: &mut Framed<TcpStream, FrameCodec>) -> Announcement {
    let frame = timeout(WAIT, conn.next())
        .await
        .expect("announcement in time")
        .expect("connection open")
        .expect("valid frame");
    Announcement::from_frame(&frame).unwrap()
}

#[tokio::test]
async fn worker_registers_and_leaves_with_its_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let directory = start_master(listener).await;

    let announcer = Announcer::spawn(fast_config(addr, "worker-a"));
    wait_for_paths(&directory, "worker-a", &["/srv/static.bin".to_string()]).await;

    let record = directory.get("worker-a").await.unwrap();
    assert_eq!(record.http_base_address, "http://127.0.0.1:9641/");
    assert_eq!(announcer.state(), LinkState::Connected);

    drop(announcer);
    let deadline = tokio::time::Instant::now() + WAIT;
    while directory.get("worker-a").await.is_some() {
        assert!(tokio::time::Instant::now() < deadline, "record outlived connection");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn worker_keeps_dialing_until_master_appears() {
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

    let announcer = Announcer::spawn(fast_config(addr, "worker-b"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_ne!(announcer.state(), LinkState::Connected);

    let directory = start_master(TcpListener::bind(addr).await.unwrap()).await;
    let mut state = announcer.subscribe();
    timeout(WAIT, state.wait_for(|s| *s == LinkState::Connected))
        .await
        .expect("connected in time")
        .unwrap();
    wait_for_paths(&directory, "worker-b", &["/srv/static.bin".to_string()]).await;
}

#[tokio::test]
async fn dropped_connection_triggers_redial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _announcer = Announcer::spawn(fast_config(addr, "worker-c"));

    // First connection: take one announcement, then hang up without replying.
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut first = Framed::new(stream, FrameCodec::new());
    assert_eq!(next_announcement(&mut first).await.host, "worker-c");
    drop(first);

    // The worker must come back on a fresh connection and keep announcing.
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut second = Framed::new(stream, FrameCodec::new());
    for _ in 0..2 {
        let announcement = next_announcement(&mut second).await;
        assert_eq!(announcement.host, "worker-c");
        second.send(Reply::ok().to_frame().unwrap()).await.unwrap();
    }
}

#[tokio::test]
async fn rejected_announcement_triggers_redial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let announcer = Announcer::spawn(fast_config(addr, "worker-d"));

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut first = Framed::new(stream, FrameCodec::new());
    next_announcement(&mut first).await;
    first
        .send(Reply::bad_request("try again").to_frame().unwrap())
        .await
        .unwrap();

    // The worker drops the rejected connection and dials again.
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut second = Framed::new(stream, FrameCodec::new());
    next_announcement(&mut second).await;
    second.send(Reply::ok().to_frame().unwrap()).await.unwrap();

    let mut state = announcer.subscribe();
    timeout(WAIT, state.wait_for(|s| *s == LinkState::Connected))
        .await
        .expect("connected in time")
        .unwrap();

    // The rejected connection was closed by the worker.
    let closed = timeout(WAIT, first.next()).await.expect("first connection closed");
    assert!(closed.is_none() || closed.unwrap().is_err());
}

#[tokio::test]
async fn reload_source_feeds_announcements() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, "a").unwrap();
    std::fs::write(&b, "b").unwrap();
    let reload_path = dir.path().join("reload.yml");
    std::fs::write(
        &reload_path,
        format!("file_paths:\n  - {}/*.txt\n", dir.path().display()),
    )
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let directory = start_master(listener).await;

    let mut config = fast_config(addr, "worker-e");
    config.file_paths = vec![a.display().to_string()];
    config.reload = Some(ReloadSource::new(&reload_path));
    let _announcer = Announcer::spawn(config);

    let expected = vec![a.display().to_string(), b.display().to_string()];
    wait_for_paths(&directory, "worker-e", &expected).await;

    // Breaking the reload file keeps the last good list.
    std::fs::write(&reload_path, "file_paths: {not: a list}\n").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(directory.get("worker-e").await.unwrap().file_paths, expected);

    // A new matching file shows up on the next cycle.
    let c = dir.path().join("c.txt");
    std::fs::write(&c, "c").unwrap();
    std::fs::write(
        &reload_path,
        format!("file_paths:\n  - {}/*.txt\n", dir.path().display()),
    )
    .unwrap();
    let mut expected = expected;
    expected.push(c.display().to_string());
    wait_for_paths(&directory, "worker-e", &expected).await;
}
