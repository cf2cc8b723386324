//! Inbound channel: wire-level MLLP receive, persist and ACK.

use std::sync::Arc;
use std::time::Duration;

use bridge_service::{InboundChannel, StatsStore};
use channel_config::InboundConfig;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SB: u8 = 0x0B;
const EB: u8 = 0x1C;
const CR: u8 = 0x0D;

const ADT: &str = "MSH|^~\\&|S|F|D|F|20250101010101||ADT^A01|MSG001|P|2.5\rPID|1||123^^^H~456^^^H||DOE^JOHN\r";

fn config(tmp: &TempDir) -> InboundConfig {
    InboundConfig {
        name: "RX1".to_string(),
        enabled: true,
        // Port 0 asks the OS for an ephemeral port; the bound address
        // is read back from the channel.
        port: 0,
        save_dir: tmp.path().join("rx"),
        file_prefix: "ADT_".to_string(),
        file_suffix: ".hl7".to_string(),
        auto_ack: true,
        description: String::new(),
    }
}

async fn exchange(addr: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut sock = TcpStream::connect(addr).await.unwrap();
    sock.write_all(&[SB]).await.unwrap();
    sock.write_all(payload).await.unwrap();
    sock.write_all(&[EB, CR]).await.unwrap();

    let mut reply = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), sock.read(&mut buf))
            .await
            .expect("reply before deadline")
            .unwrap();
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&buf[..n]);
        if reply.ends_with(&[EB, CR]) {
            break;
        }
    }
    reply
}

fn unframe(reply: &[u8]) -> String {
    assert_eq!(reply.first(), Some(&SB), "reply not MLLP framed");
    assert_eq!(&reply[reply.len() - 2..], &[EB, CR]);
    String::from_utf8(reply[1..reply.len() - 2].to_vec()).unwrap()
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

#[tokio::test]
async fn receives_persists_and_acks() {
    let tmp = TempDir::new().unwrap();
    let stats = Arc::new(StatsStore::open(tmp.path().join("stats.json")));
    let channel = InboundChannel::start(config(&tmp), Arc::clone(&stats))
        .await
        .unwrap();

    let reply = exchange(channel.local_addr(), ADT.as_bytes()).await;
    let ack = unframe(&reply);
    assert!(ack.starts_with("MSH|"));
    assert!(ack.contains("\rMSA|AA|MSG001|"), "unexpected ACK: {ack:?}");

    assert!(
        wait_until(Duration::from_secs(5), || {
            stats.get("RX1").processed == 1
        })
        .await
    );

    // Exactly one saved file, named with prefix and suffix, raw payload.
    let entries: Vec<_> = std::fs::read_dir(tmp.path().join("rx"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(entries.len(), 1);
    let name = entries[0].file_name().into_string().unwrap();
    assert!(name.starts_with("ADT_"), "bad file name: {name}");
    assert!(name.ends_with(".hl7"), "bad file name: {name}");
    assert_eq!(std::fs::read(entries[0].path()).unwrap(), ADT.as_bytes());

    assert_eq!(channel.counters().errors(), 0);
    channel.stop().await;
}

#[tokio::test]
async fn empty_frame_gets_fallback_ack_without_counting() {
    let tmp = TempDir::new().unwrap();
    let stats = Arc::new(StatsStore::open(tmp.path().join("stats.json")));
    let channel = InboundChannel::start(config(&tmp), Arc::clone(&stats))
        .await
        .unwrap();

    let reply = exchange(channel.local_addr(), b"").await;
    let ack = unframe(&reply);
    assert!(ack.contains("|LOCALBRIDGE|ENGINE|"));
    assert!(ack.contains("\rMSA|AA||EMPTY\r"), "unexpected ACK: {ack:?}");

    // A client protocol quirk moves no counters and saves nothing.
    assert_eq!(channel.counters().processed(), 0);
    assert_eq!(channel.counters().errors(), 0);
    assert_eq!(std::fs::read_dir(tmp.path().join("rx")).unwrap().count(), 0);
    channel.stop().await;
}

#[tokio::test]
async fn unparseable_payload_still_gets_acked_and_saved() {
    let tmp = TempDir::new().unwrap();
    let stats = Arc::new(StatsStore::open(tmp.path().join("stats.json")));
    let channel = InboundChannel::start(config(&tmp), Arc::clone(&stats))
        .await
        .unwrap();

    let garbage = "MSH|^~\\&|S|F|D|F|20250101||ADT^A01|CTRL7|P|2.5\rnot an hl7 segment";
    let reply = exchange(channel.local_addr(), garbage.as_bytes()).await;
    let ack = unframe(&reply);
    assert!(
        ack.contains("\rMSA|AA|CTRL7|PARSEFAIL\r"),
        "unexpected ACK: {ack:?}"
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            channel.counters().processed() == 1
        })
        .await
    );
    // The raw payload was persisted even though it did not parse.
    assert_eq!(std::fs::read_dir(tmp.path().join("rx")).unwrap().count(), 1);
    channel.stop().await;
}

#[tokio::test]
async fn two_messages_never_collide_on_file_names() {
    let tmp = TempDir::new().unwrap();
    let stats = Arc::new(StatsStore::open(tmp.path().join("stats.json")));
    let channel = InboundChannel::start(config(&tmp), Arc::clone(&stats))
        .await
        .unwrap();

    for _ in 0..2 {
        let reply = exchange(channel.local_addr(), ADT.as_bytes()).await;
        unframe(&reply);
    }
    assert!(
        wait_until(Duration::from_secs(5), || {
            stats.get("RX1").processed == 2
        })
        .await
    );
    assert_eq!(std::fs::read_dir(tmp.path().join("rx")).unwrap().count(), 2);
    channel.stop().await;
}

#[tokio::test]
async fn stop_closes_the_listener() {
    let tmp = TempDir::new().unwrap();
    let stats = Arc::new(StatsStore::open(tmp.path().join("stats.json")));
    let channel = InboundChannel::start(config(&tmp), stats).await.unwrap();
    let addr = channel.local_addr();

    channel.stop().await;
    // Stopping again is a no-op.
    channel.stop().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}
