// Viewer roster for the feed server.
//
// `Roster` is the state that `server.rs` drives: connected viewers, their
// write halves, and the current streaming index per gate. All mutation
// happens on the server's single event-loop thread, so there is no locking.
//
// Writing to viewers: each entry holds a cloned `TcpStream` wrapped in a
// `BufWriter`. `broadcast` frames a `ServerMessage` once per viewer. A write
// failure drops that viewer from the roster immediately; its reader thread
// will notice the dead socket on its own and report a disconnect, which is
// then a no-op.
//
// Index requests: a viewer stepping forward or back sends an `IndexUpdate`.
// The roster records it as the gate's current index and echoes it to every
// viewer, the sender included, so all viewers converge on the same position.

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};

use geo_stream_protocol::framing;
use geo_stream_protocol::message::{DEFAULT_GATE, IndexUpdate, ServerMessage};

/// Identity the feed assigns to a connected viewer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u32);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer {}", self.0)
    }
}

struct Viewer {
    greeting: String,
    writer: BufWriter<TcpStream>,
}

#[derive(Default)]
pub struct Roster {
    viewers: BTreeMap<ViewerId, Viewer>,
    next_id: u32,
    max_viewers: Option<usize>,
    /// Current streaming index per gate.
    gates: BTreeMap<i32, i32>,
}

impl Roster {
    pub fn new(max_viewers: Option<usize>) -> Self {
        Self {
            max_viewers,
            ..Self::default()
        }
    }

    /// Admit a viewer that sent `greeting`. The new viewer is told the
    /// default gate's current index so it starts in step with the others.
    pub fn add_viewer(&mut self, greeting: String, stream: TcpStream) -> Result<ViewerId, String> {
        if self.max_viewers.is_some_and(|max| self.viewers.len() >= max) {
            return Err("feed is full".into());
        }
        let id = ViewerId(self.next_id);
        self.next_id += 1;
        log::info!("{id} joined: {greeting}");
        self.viewers.insert(
            id,
            Viewer {
                greeting,
                writer: BufWriter::new(stream),
            },
        );

        let current = ServerMessage::Index(IndexUpdate {
            gate_id: DEFAULT_GATE,
            index: self.streaming_index(DEFAULT_GATE),
        });
        self.send_to(id, &current);
        Ok(id)
    }

    /// Returns false if the viewer was already gone.
    pub fn remove_viewer(&mut self, id: ViewerId) -> bool {
        match self.viewers.remove(&id) {
            Some(_) => {
                log::info!("{id} left");
                true
            }
            None => false,
        }
    }

    /// Record an index request and echo it to every viewer.
    pub fn request_index(&mut self, from: ViewerId, update: IndexUpdate) {
        log::debug!(
            "{from} moved gate {} to index {}",
            update.gate_id,
            update.index
        );
        self.gates.insert(update.gate_id, update.index);
        self.broadcast(&ServerMessage::Index(update));
    }

    pub fn streaming_index(&self, gate_id: i32) -> i32 {
        self.gates.get(&gate_id).copied().unwrap_or(0)
    }

    /// Send `msg` to every viewer. Returns how many received it.
    pub fn broadcast(&mut self, msg: &ServerMessage) -> usize {
        let ids: Vec<ViewerId> = self.viewers.keys().copied().collect();
        ids.into_iter().filter(|&id| self.send_to(id, msg)).count()
    }

    /// Send `msg` to one viewer, dropping the viewer if the write fails.
    pub fn send_to(&mut self, id: ViewerId, msg: &ServerMessage) -> bool {
        let Some(viewer) = self.viewers.get_mut(&id) else {
            return false;
        };
        match framing::send(&mut viewer.writer, msg) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("dropping {id}: write failed: {e}");
                self.viewers.remove(&id);
                false
            }
        }
    }

    /// Shut down every viewer socket and empty the roster. Reader threads see
    /// EOF and exit.
    pub fn close_all(&mut self) {
        for (id, viewer) in std::mem::take(&mut self.viewers) {
            let _ = viewer.writer.get_ref().shutdown(Shutdown::Both);
            log::debug!("closed {id}");
        }
    }

    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// `(id, greeting)` for every connected viewer, in join order.
    pub fn viewers(&self) -> Vec<(ViewerId, String)> {
        self.viewers
            .iter()
            .map(|(id, v)| (*id, v.greeting.clone()))
            .collect()
    }
}
