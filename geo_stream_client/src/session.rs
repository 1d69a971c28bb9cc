// Viewer session: connection lifecycle plus the per-frame apply step.
//
// `ClientSession` ties the pieces together. It owns the transport, the
// consumer half of the bridge, and the sync engine. There is no global
// instance; the render loop constructs one and calls `tick()` every frame.
//
// Packet flow:
// - `connect()` builds a fresh bridge and gives the transport a callback that
//   owns the producer half. On the transport's reader thread, the callback
//   routes each `ServerMessage` by variant: geometry deltas to the geometry
//   lane, count summaries to the summary lane (clearing stale geometry),
//   index updates to the index lane, and notices straight to the log.
// - `tick()` runs on the render loop. It drains at most one item per lane and
//   applies them in order: index, summary, geometry.
//
// Failures never escape `tick()`. A malformed packet is logged and skipped;
// a dead connection makes `tick()` a no-op until `connect()` succeeds again.
// Reconnecting is the caller's decision.
//
// Navigation: the viewer tracks the server's streaming index. `step()` moves
// it forward or back and sends the new value as an `IndexUpdate` on the
// default gate; an `IndexUpdate` from the server overwrites the local value.

use geo_stream_protocol::message::{
    ClientMessage, DEFAULT_GATE, GeometryDelta, IndexUpdate, ServerMessage,
};
use geo_stream_protocol::{GeometryKind, SlotIndex};
use thiserror::Error;

use crate::bridge::{BridgeReceiver, BridgeSender, LaneDepths, bridge};
use crate::config::ViewerConfig;
use crate::engine::SyncEngine;
use crate::scene::SceneBackend;
use crate::transport::{PacketCallback, TcpTransport, Transport, TransportError};

/// Geometry backlog at which the session starts warning that the render loop
/// is falling behind.
const BACKLOG_WARN: usize = 4096;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("streaming index {index} has no {step:?} step")]
    IndexOverflow { index: i32, step: Step },
}

/// Direction of a streaming-index step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Next,
    Previous,
}

/// What one `tick()` did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// The connection is down; nothing was drained.
    pub offline: bool,
    /// New streaming index taken from the server.
    pub index: Option<i32>,
    /// Objects destroyed by a count summary.
    pub destroyed: usize,
    /// Geometry delta applied this tick.
    pub applied: Option<(GeometryKind, SlotIndex)>,
    /// Geometry delta rejected this tick.
    pub rejected: Option<(GeometryKind, SlotIndex)>,
}

/// Running totals since the session was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub applied: u64,
    pub rejected: u64,
    pub summaries: u64,
    pub destroyed: u64,
}

/// One viewer's connection and scene state.
pub struct ClientSession<T: Transport, B: SceneBackend> {
    config: ViewerConfig,
    transport: T,
    inbox: BridgeReceiver,
    engine: SyncEngine<B>,
    streaming_index: i32,
    stats: SessionStats,
    backlog_warned: bool,
}

impl<B: SceneBackend> ClientSession<TcpTransport, B> {
    /// Session over TCP to `config.server_addr`.
    pub fn tcp(config: ViewerConfig, backend: B) -> Self {
        let transport = TcpTransport::new(config.server_addr.clone(), config.connect_timeout());
        Self::new(config, transport, backend)
    }
}

impl<T: Transport, B: SceneBackend> ClientSession<T, B> {
    pub fn new(config: ViewerConfig, transport: T, backend: B) -> Self {
        let engine = SyncEngine::new(backend, config.eviction, config.destroy_stagger_secs)
            .with_max_slot_gap(config.max_slot_gap);
        // Placeholder inbox until the first connect; its producer is gone,
        // so it always drains empty.
        let (_, inbox) = bridge();
        Self {
            config,
            transport,
            inbox,
            engine,
            streaming_index: 0,
            stats: SessionStats::default(),
            backlog_warned: false,
        }
    }

    /// Connect if the config asks for it. Errors are logged, not returned,
    /// so the render loop can start offline.
    pub fn start(&mut self) {
        if !self.config.connect_on_start {
            log::info!("{}: starting offline", self.config.client_name);
            return;
        }
        if let Err(e) = self.connect() {
            log::error!("{}: {e}", self.config.client_name);
        }
    }

    /// Open the connection and send the greeting.
    ///
    /// Anything buffered from a previous connection is discarded.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let (outbox, inbox) = bridge();
        let on_packet: PacketCallback = Box::new(move |msg| route(&outbox, msg));
        self.transport.connect(on_packet)?;
        self.inbox = inbox;

        let greeting = ClientMessage::Greeting {
            text: self.config.greeting.clone(),
        };
        if let Err(e) = self.transport.send(&greeting) {
            log::warn!("{}: greeting not sent: {e}", self.config.client_name);
        }
        Ok(())
    }

    /// Say goodbye and close the connection.
    pub fn disconnect(&mut self) {
        if self.transport.is_connected() {
            if let Err(e) = self.transport.send(&ClientMessage::Goodbye) {
                log::debug!("{}: goodbye not sent: {e}", self.config.client_name);
            }
        }
        self.transport.disconnect();
    }

    /// Apply at most one index update, one summary and one geometry delta.
    pub fn tick(&mut self) -> TickReport {
        if !self.transport.is_connected() {
            return TickReport {
                offline: true,
                ..TickReport::default()
            };
        }
        self.stats.ticks += 1;
        self.watch_backlog();

        let drained = self.inbox.drain();
        let mut report = TickReport::default();

        if let Some(update) = drained.index {
            log::debug!("streaming index {} -> {}", self.streaming_index, update.index);
            self.streaming_index = update.index;
            report.index = Some(update.index);
        }

        if let Some(summary) = drained.summary {
            report.destroyed = self.engine.apply_summary(&summary);
            self.stats.summaries += 1;
            self.stats.destroyed += report.destroyed as u64;
        }

        if let Some(delta) = drained.geometry {
            let key = (delta.kind(), delta.slot());
            match self.engine.apply(&delta) {
                Ok(()) => {
                    report.applied = Some(key);
                    self.stats.applied += 1;
                }
                Err(e) => {
                    log::warn!("skipping packet: {e}");
                    report.rejected = Some(key);
                    self.stats.rejected += 1;
                }
            }
        }
        report
    }

    /// Move the streaming index one step and tell the server. A step past
    /// either end of the `i32` range leaves the index alone and sends nothing.
    pub fn step(&mut self, step: Step) -> Result<i32, SessionError> {
        let current = self.streaming_index;
        let index = match step {
            Step::Next => current.checked_add(1),
            Step::Previous => current.checked_sub(1),
        }
        .ok_or_else(|| {
            log::warn!("streaming index {current} cannot step {step:?}");
            SessionError::IndexOverflow {
                index: current,
                step,
            }
        })?;
        self.streaming_index = index;
        let request = ClientMessage::Index(IndexUpdate {
            gate_id: DEFAULT_GATE,
            index,
        });
        self.transport.send(&request).map_err(|e| {
            log::warn!("index request {index} not sent: {e}");
            SessionError::from(e)
        })?;
        Ok(index)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn streaming_index(&self) -> i32 {
        self.streaming_index
    }

    pub fn engine(&self) -> &SyncEngine<B> {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn pending(&self) -> LaneDepths {
        self.inbox.pending()
    }

    /// Deltas dropped by clear-on-summary on the current connection.
    pub fn superseded(&self) -> u64 {
        self.inbox.purged_total()
    }

    /// Tick until every lane is empty or `max_ticks` is reached. Returns the
    /// number of ticks run.
    pub fn settle(&mut self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && self.pending() != LaneDepths::default() {
            if self.tick().offline {
                break;
            }
            ticks += 1;
        }
        ticks
    }

    fn watch_backlog(&mut self) {
        let depth = self.inbox.pending().geometry;
        if depth >= BACKLOG_WARN && !self.backlog_warned {
            log::warn!("{depth} geometry deltas waiting; render loop is falling behind");
            self.backlog_warned = true;
        } else if depth < BACKLOG_WARN / 2 {
            self.backlog_warned = false;
        }
    }
}

/// Route one inbound packet to its lane. Runs on the transport's reader thread.
fn route(outbox: &BridgeSender, msg: ServerMessage) {
    let delivered = match msg {
        ServerMessage::Mesh(d) => outbox.enqueue_geometry(GeometryDelta::Mesh(d)),
        ServerMessage::Curve(d) => outbox.enqueue_geometry(GeometryDelta::Curve(d)),
        ServerMessage::Text(d) => outbox.enqueue_geometry(GeometryDelta::Text(d)),
        ServerMessage::GeometryInfo(summary) => outbox.enqueue_summary(summary),
        ServerMessage::Index(update) => outbox.enqueue_index(update),
        ServerMessage::Notice { text } => {
            log::info!("server: {text}");
            true
        }
    };
    if !delivered {
        log::debug!("session gone; dropping packet");
    }
}
