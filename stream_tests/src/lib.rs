// Test-only viewer for end-to-end stream tests.
//
// Wraps a real `ClientSession` (TCP transport, in-memory `RecordingScene`)
// and adds blocking helpers that tick the session until some condition on its
// scene holds. Everything between the feed's socket and the scene runs the
// production code paths; the only test-specific code is the polling loops.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use geo_stream_client::scene::SceneObject;
use geo_stream_client::session::{Step, TickReport};
use geo_stream_client::{
    ClientSession, EvictionPolicy, PoolSizes, RecordingScene, TcpTransport, ViewerConfig,
};
use geo_stream_protocol::{GeometryKind, SlotIndex};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between ticks while polling.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub type Session = ClientSession<TcpTransport, RecordingScene>;

pub struct TestViewer {
    session: Session,
}

impl TestViewer {
    /// Connect to a feed and send `name` as the greeting.
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        Self::connect_with(addr, name, EvictionPolicy::Front)
    }

    pub fn connect_with(addr: SocketAddr, name: &str, eviction: EvictionPolicy) -> Self {
        let config = ViewerConfig {
            server_addr: addr.to_string(),
            client_name: name.into(),
            greeting: name.into(),
            eviction,
            ..ViewerConfig::default()
        };
        let mut session = ClientSession::tcp(config, RecordingScene::new());
        session.connect().expect("TestViewer::connect failed");
        Self { session }
    }

    /// Tick until `done` holds, panicking after the poll timeout.
    pub fn tick_until(&mut self, what: &str, mut done: impl FnMut(&Session) -> bool) {
        let start = Instant::now();
        loop {
            self.session.tick();
            if done(&self.session) {
                return;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {what}"
            );
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn wait_for_sizes(&mut self, curves: usize, meshes: usize, texts: usize) {
        let want = PoolSizes {
            meshes,
            curves,
            texts,
        };
        self.tick_until(&format!("pools {want}"), |s| s.engine().pool().sizes() == want);
    }

    pub fn wait_for_index(&mut self, index: i32) {
        self.tick_until(&format!("streaming index {index}"), |s| {
            s.streaming_index() == index
        });
    }

    /// Tick until the session notices the connection is gone.
    pub fn wait_for_disconnect(&mut self) {
        self.tick_until("disconnect", |s| !s.is_connected());
    }

    /// Current state of the object in `slot`.
    pub fn object(&self, kind: GeometryKind, slot: u32) -> Option<&SceneObject> {
        let engine = self.session.engine();
        let id = engine.pool().get(kind, SlotIndex(slot))?;
        engine.backend().object(*id)
    }

    pub fn tick(&mut self) -> TickReport {
        self.session.tick()
    }

    pub fn step(&mut self, step: Step) -> i32 {
        self.session.step(step).expect("step failed")
    }

    pub fn scene(&self) -> &RecordingScene {
        self.session.engine().backend()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }
}
