//! Runtime manager lifecycle: load, start, stop, introspect.

use std::path::Path;
use std::sync::Arc;

use bridge_service::{
    ChannelState, InboundRuntime, RuntimeDeps, StatsStore, TransformerRegistry, TranslateRuntime,
};
use tempfile::TempDir;

fn deps(tmp: &TempDir) -> RuntimeDeps {
    RuntimeDeps {
        stats: Arc::new(StatsStore::open(tmp.path().join("conf/channel-stats.json"))),
        registry: Arc::new(TransformerRegistry::with_builtins()),
    }
}

fn write_translate_conf(channels: &Path, tmp: &TempDir) {
    std::fs::create_dir_all(channels).unwrap();
    std::fs::write(
        channels.join("alpha.yaml"),
        format!(
            "name: Alpha\ninputDir: {0}/in-a\noutputDir: {0}/out-a\ntransformer: {{ type: wrapi, script: clean.wrapi }}\npollIntervalMs: 200\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    std::fs::write(
        channels.join("beta.yaml"),
        format!(
            "name: Beta\nenabled: false\ninputDir: {0}/in-b\noutputDir: {0}/out-b\ntransformer: {{ type: wrapi, script: clean.wrapi }}\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    // Script referenced by both channels, resolved next to the YAML.
    std::fs::write(channels.join("clean.wrapi"), "DELSEG IN1\nSAVE\n").unwrap();
}

#[tokio::test]
async fn load_and_start_runs_enabled_channels_only() {
    let tmp = TempDir::new().unwrap();
    let channels = tmp.path().join("conf/channels");
    write_translate_conf(&channels, &tmp);

    let runtime = TranslateRuntime::new(deps(&tmp));
    runtime.load_and_start(&channels).await;

    let mut all = runtime.all_names().await;
    all.sort();
    assert_eq!(all, ["Alpha", "Beta"]);
    assert_eq!(runtime.running_names().await, ["Alpha"]);
    assert!(runtime.is_running("Alpha").await);
    assert!(!runtime.is_running("Beta").await);

    let status = runtime.status().await;
    let alpha = status.iter().find(|s| s.name == "Alpha").unwrap();
    let beta = status.iter().find(|s| s.name == "Beta").unwrap();
    assert_eq!(alpha.state, ChannelState::Running);
    assert_eq!(beta.state, ChannelState::Disabled);
    assert!(alpha.dir.ends_with("in-a"));

    runtime.stop_all().await;
    assert!(runtime.running_names().await.is_empty());
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let channels = tmp.path().join("conf/channels");
    write_translate_conf(&channels, &tmp);

    let runtime = TranslateRuntime::new(deps(&tmp));
    runtime.load_and_start(&channels).await;

    // Starting a running channel is a no-op.
    runtime.start_channel("Alpha").await.unwrap();
    assert_eq!(runtime.running_names().await.len(), 1);

    // Stopping twice, and stopping the unknown, are no-ops.
    runtime.stop_channel("Alpha").await;
    runtime.stop_channel("Alpha").await;
    runtime.stop_channel("NoSuch").await;
    assert!(!runtime.is_running("Alpha").await);

    // A stopped channel can be started again from its kept config.
    runtime.start_channel("Alpha").await.unwrap();
    assert!(runtime.is_running("Alpha").await);

    // Unknown names surface an error.
    assert!(runtime.start_channel("NoSuch").await.is_err());
    runtime.stop_all().await;
}

#[tokio::test]
async fn counters_read_from_store_when_stopped() {
    let tmp = TempDir::new().unwrap();
    let channels = tmp.path().join("conf/channels");
    write_translate_conf(&channels, &tmp);

    let d = deps(&tmp);
    d.stats.put_and_flush("Alpha", 7, 0);

    let runtime = TranslateRuntime::new(d);
    runtime.load_and_start(&channels).await;
    // Restored into the live counters at start.
    assert_eq!(runtime.processed("Alpha").await, 7);
    assert_eq!(runtime.errors("Alpha").await, 0);

    runtime.stop_all().await;
    // Still visible once stopped, straight from the store.
    assert_eq!(runtime.processed("Alpha").await, 7);
}

#[tokio::test]
async fn bind_conflict_isolates_the_failing_channel() {
    let tmp = TempDir::new().unwrap();
    let channels = tmp.path().join("conf/channels");
    let inbound_dir = channels.join("Inbound");
    std::fs::create_dir_all(&inbound_dir).unwrap();

    // Occupy a port so the second listener cannot bind it, and grab a
    // second, released port for the healthy channel.
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let taken = blocker.local_addr().unwrap().port();
    let free = {
        let probe = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    std::fs::write(
        inbound_dir.join("rx.yaml"),
        format!(
            "- name: Good\n  port: {free}\n  saveDir: {0}/rx-good\n- name: Clash\n  port: {taken}\n  saveDir: {0}/rx-clash\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let runtime = InboundRuntime::new(deps(&tmp));
    runtime.load_and_start(&channels).await;

    // The conflicting channel failed to start; the other one runs.
    assert!(runtime.is_running("Good").await);
    assert!(!runtime.is_running("Clash").await);
    let status = runtime.status().await;
    let clash = status.iter().find(|s| s.name == "Clash").unwrap();
    assert_eq!(clash.state, ChannelState::Stopped);

    runtime.stop_all().await;
}
