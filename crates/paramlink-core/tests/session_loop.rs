//! End-to-end tests for the per-connection loop, driven through an in-memory
//! channel on tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use paramlink_core::config::{ParameterDef, default_parameters};
use paramlink_core::emitter::MemoryEmitter;
use paramlink_core::registry::ParameterRegistry;
use paramlink_core::server::{AppState, ControlChannel, Inbound, run_connection};
use paramlink_core::session::SessionSettings;
use paramlink_core::{Error, Result};

const ZOOM: &str = "/usercamera/Zoom";

struct TestChannel {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ControlChannel for TestChannel {
    async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| Error::Runtime("peer dropped".to_string()))
    }
}

struct Peer {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<()>,
}

impl Peer {
    fn delta(&self, address: &str, delta: f64) {
        let frame = format!(r#"{{"address":"{address}","delta":{delta}}}"#);
        self.tx.send(Inbound::Text(frame)).unwrap();
    }

    fn raw(&self, frame: Inbound) {
        self.tx.send(frame).unwrap();
    }

    async fn disconnect(self) {
        drop(self.tx);
        self.task.await.unwrap();
    }
}

struct Harness {
    state: Arc<AppState>,
    registry: Arc<ParameterRegistry>,
    emitter: Arc<MemoryEmitter>,
}

impl Harness {
    fn new() -> Self {
        Self::with_parameters(&default_parameters())
    }

    fn with_parameters(defs: &[ParameterDef]) -> Self {
        let registry = Arc::new(ParameterRegistry::from_definitions(defs).unwrap());
        let emitter = Arc::new(MemoryEmitter::new());
        let state = Arc::new(AppState::new(
            registry.clone(),
            emitter.clone(),
            SessionSettings::default(),
        ));
        Self {
            state,
            registry,
            emitter,
        }
    }

    fn connect(&self) -> Peer {
        let (tx, inbound) = mpsc::unbounded_channel();
        let (outbound, rx) = mpsc::unbounded_channel();
        let session = self.state.open_session();
        let task = tokio::spawn(run_connection(TestChannel { inbound, outbound }, session));
        Peer { tx, rx, task }
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// -- Emission ---------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_delta_emits_after_one_window() {
    let h = Harness::new();
    let peer = h.connect();

    peer.delta(ZOOM, 10.0);
    sleep(Duration::from_millis(5)).await;
    assert!(h.emitter.is_empty());

    sleep(Duration::from_millis(20)).await;
    let sent = h.emitter.sent_to(ZOOM);
    assert_eq!(sent.len(), 1);
    assert_close(sent[0], 42.4);
    assert_close(h.registry.value(ZOOM).unwrap(), 42.4);

    peer.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_into_latest_value() {
    let h = Harness::new();
    let peer = h.connect();

    peer.delta(ZOOM, 10.0);
    peer.delta(ZOOM, 500.0);
    sleep(Duration::from_millis(40)).await;

    // 42.4 - 500 * 0.26 clamps to the minimum.
    assert_eq!(h.emitter.sent_to(ZOOM), vec![20.0]);
    peer.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn separate_windows_emit_separately() {
    let h = Harness::new();
    let peer = h.connect();

    peer.delta(ZOOM, 10.0);
    sleep(Duration::from_millis(30)).await;
    peer.delta(ZOOM, 10.0);
    sleep(Duration::from_millis(30)).await;

    let sent = h.emitter.sent_to(ZOOM);
    assert_eq!(sent.len(), 2);
    assert_close(sent[0], 42.4);
    assert_close(sent[1], 39.8);
    peer.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn opposite_deltas_in_one_window_emit_nothing() {
    // Span 500 over divisor 500: one parameter unit per delta unit.
    let h = Harness::with_parameters(&[ParameterDef::new("/rig/Pan", 250.0, 0.0, 500.0)]);
    let peer = h.connect();

    peer.delta("/rig/Pan", 10.0);
    peer.delta("/rig/Pan", -10.0);
    sleep(Duration::from_millis(40)).await;

    assert!(h.emitter.is_empty());
    assert_eq!(h.registry.value("/rig/Pan").unwrap(), 250.0);

    peer.delta("/rig/Pan", 10.0);
    sleep(Duration::from_millis(40)).await;
    assert_eq!(h.emitter.sent_to("/rig/Pan"), vec![240.0]);
    peer.disconnect().await;
}

// -- Limits -----------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn pinned_parameter_replies_with_limit() {
    let h = Harness::new();
    let mut peer = h.connect();

    peer.delta(ZOOM, 1000.0);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.registry.value(ZOOM).unwrap(), 20.0);

    peer.delta(ZOOM, 1.0);
    let reply = peer.rx.recv().await.unwrap();
    assert_eq!(reply, r#"{"address":"/usercamera/Zoom","limit":"min"}"#);

    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.emitter.len(), 1);
    peer.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn limit_goes_only_to_originating_connection() {
    let h = Harness::new();
    let mut a = h.connect();
    let mut b = h.connect();

    a.delta(ZOOM, -1000.0);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.registry.value(ZOOM).unwrap(), 150.0);

    a.delta(ZOOM, -1.0);
    let reply = a.rx.recv().await.unwrap();
    assert!(reply.contains(r#""limit":"max""#));

    sleep(Duration::from_millis(30)).await;
    assert!(b.rx.try_recv().is_err());

    a.disconnect().await;
    b.disconnect().await;
}

// -- Robustness -------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn bad_frames_do_not_close_connection() {
    let h = Harness::new();
    let peer = h.connect();

    peer.raw(Inbound::Text("not json".to_string()));
    peer.raw(Inbound::Text(r#"{"address":"/nope","delta":1}"#.to_string()));
    peer.raw(Inbound::Binary(vec![0xff, 0xfe]));
    peer.raw(Inbound::Control);
    peer.raw(Inbound::Binary(
        br#"{"address":"/usercamera/Exposure","delta":-50}"#.to_vec(),
    ));
    sleep(Duration::from_millis(30)).await;

    assert!(!peer.task.is_finished());
    let sent = h.emitter.sent_to("/usercamera/Exposure");
    assert_eq!(sent.len(), 1);
    assert_close(sent[0], 1.4);
    peer.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn emitter_failure_keeps_connection_open() {
    let h = Harness::new();
    let peer = h.connect();

    h.emitter.set_failing(true);
    peer.delta(ZOOM, 10.0);
    sleep(Duration::from_millis(30)).await;
    assert!(h.emitter.is_empty());
    // Registry keeps the fired value even though delivery failed.
    assert_close(h.registry.value(ZOOM).unwrap(), 42.4);

    h.emitter.set_failing(false);
    peer.delta(ZOOM, 10.0);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.emitter.len(), 1);
    peer.disconnect().await;
}

// -- Lifecycle --------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_emission() {
    let h = Harness::new();
    let peer = h.connect();

    peer.delta(ZOOM, 10.0);
    peer.disconnect().await;
    sleep(Duration::from_millis(100)).await;

    assert!(h.emitter.is_empty());
    assert_eq!(h.registry.value(ZOOM).unwrap(), 45.0);
}

#[tokio::test(start_paused = true)]
async fn dropped_reply_receiver_ends_loop() {
    let h = Harness::new();
    let peer = h.connect();
    let Peer { tx, rx, task } = peer;
    drop(rx);

    tx.send(Inbound::Text(format!(r#"{{"address":"{ZOOM}","delta":1000}}"#)))
        .unwrap();
    sleep(Duration::from_millis(30)).await;
    tx.send(Inbound::Text(format!(r#"{{"address":"{ZOOM}","delta":1}}"#)))
        .unwrap();

    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn two_connections_last_fired_wins() {
    let h = Harness::new();
    let a = h.connect();
    let b = h.connect();

    a.delta(ZOOM, 10.0);
    sleep(Duration::from_millis(5)).await;
    b.delta(ZOOM, -10.0);
    sleep(Duration::from_millis(40)).await;

    let sent = h.emitter.sent_to(ZOOM);
    assert_eq!(sent.len(), 2);
    assert_close(sent[0], 42.4);
    assert_close(sent[1], 47.6);
    assert_close(h.registry.value(ZOOM).unwrap(), 47.6);

    a.disconnect().await;
    b.disconnect().await;
}
