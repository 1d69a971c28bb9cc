// TCP server and main event loop for the feed.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (non-blocking `accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per viewer): loop on `framing::recv` for
//   `ClientMessage`s and forward them as `InternalEvent::MessageFrom`. On
//   `Goodbye`, EOF or a read error they send `InternalEvent::Disconnected`.
// - **Main thread**: owns the `Roster` and dispatches events. Packets the
//   embedding code wants streamed arrive on the same channel as
//   `InternalEvent::Broadcast`, so a broadcast is ordered after every join
//   that happened before it.
//
// The main thread is the only writer to viewer streams. Reader threads only
// read.
//
// Handshake: the first frame from a new connection must be a `Greeting`,
// read with `handshake_timeout_ms` as the socket timeout. Anything else, or
// nothing, drops the connection. A full feed answers with a `Notice` and
// closes.
//
// Shutdown: `FeedHandle::stop` clears `keep_running`; the main loop notices
// within one poll interval, shuts down every viewer socket and exits.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use geo_stream_protocol::framing;
use geo_stream_protocol::message::{ClientMessage, IndexUpdate, ServerMessage};

use crate::roster::{Roster, ViewerId};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events sent from listener/reader threads and the handle to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    MessageFrom {
        viewer: ViewerId,
        message: ClientMessage,
    },
    Disconnected {
        viewer: ViewerId,
    },
    Broadcast(ServerMessage),
}

/// What happened on the feed, reported to whoever holds the `FeedHandle`.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Joined { viewer: ViewerId, greeting: String },
    IndexRequested { viewer: ViewerId, update: IndexUpdate },
    Left { viewer: ViewerId },
}

/// Configuration for starting a feed server.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub port: u16,
    pub handshake_timeout_ms: u64,
    /// Reject viewers beyond this many. `None` admits everyone.
    pub max_viewers: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            port: 12345,
            handshake_timeout_ms: 5000,
            max_viewers: None,
        }
    }
}

/// Handle returned by `start_feed` to drive and stop the running server.
pub struct FeedHandle {
    keep_running: Arc<AtomicBool>,
    control: Sender<InternalEvent>,
    events: Receiver<FeedEvent>,
    viewer_count: Arc<AtomicUsize>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FeedHandle {
    /// Queue `msg` for every connected viewer. Returns false once the feed
    /// has stopped.
    pub fn broadcast(&self, msg: ServerMessage) -> bool {
        self.control.send(InternalEvent::Broadcast(msg)).is_ok()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewer_count.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` viewers are connected.
    pub fn wait_for_viewers(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.viewer_count() < n {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Next feed event, waiting up to `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Option<FeedEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Signal the feed to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start the feed server on a background thread. Returns a handle and the
/// bound address (port 0 lets the OS pick a free port).
pub fn start_feed(config: FeedConfig) -> std::io::Result<(FeedHandle, SocketAddr)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let viewer_count = Arc::new(AtomicUsize::new(0));
    let (control, rx) = mpsc::channel();
    let (events_tx, events) = mpsc::channel();

    let listener_running = keep_running.clone();
    let listener_tx = control.clone();
    thread::Builder::new()
        .name("geo-feed-accept".into())
        .spawn(move || accept_loop(listener, listener_tx, listener_running))?;

    let feed = Feed {
        roster: Roster::new(config.max_viewers),
        handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
        tx: control.clone(),
        events: events_tx,
        viewer_count: viewer_count.clone(),
        keep_running: keep_running.clone(),
    };
    let thread = thread::Builder::new()
        .name("geo-feed".into())
        .spawn(move || feed.run(rx))?;

    log::info!("feed listening on {addr}");
    Ok((
        FeedHandle {
            keep_running,
            control,
            events,
            viewer_count,
            thread: Some(thread),
        },
        addr,
    ))
}

fn accept_loop(listener: TcpListener, tx: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("connection from {peer}");
                stream.set_nonblocking(false).ok();
                if tx.send(InternalEvent::NewConnection { stream }).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                log::error!("accept failed: {e}");
                break;
            }
        }
    }
}

/// State owned by the main thread.
struct Feed {
    roster: Roster,
    handshake_timeout: Duration,
    tx: Sender<InternalEvent>,
    events: Sender<FeedEvent>,
    viewer_count: Arc<AtomicUsize>,
    keep_running: Arc<AtomicBool>,
}

impl Feed {
    fn run(mut self, rx: Receiver<InternalEvent>) {
        while self.keep_running.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    self.handle_event(event);
                    while let Ok(event) = rx.try_recv() {
                        self.handle_event(event);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.roster.close_all();
        log::info!("feed stopped");
    }

    fn handle_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::NewConnection { stream } => self.handle_new_connection(stream),
            InternalEvent::MessageFrom { viewer, message } => self.handle_message(viewer, message),
            InternalEvent::Disconnected { viewer } => {
                if self.roster.remove_viewer(viewer) {
                    self.report(FeedEvent::Left { viewer });
                }
            }
            InternalEvent::Broadcast(msg) => {
                self.roster.broadcast(&msg);
            }
        }
        self.viewer_count.store(self.roster.len(), Ordering::SeqCst);
    }

    /// Read the greeting, admit the viewer, and spawn its reader thread.
    fn handle_new_connection(&mut self, stream: TcpStream) {
        stream.set_read_timeout(Some(self.handshake_timeout)).ok();
        let (reader_stream, write_stream) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(r), Ok(w)) => (r, w),
            _ => return,
        };
        let mut reader = BufReader::new(reader_stream);

        let greeting = match framing::recv::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Greeting { text }) => text,
            Ok(other) => {
                log::warn!("expected a greeting, got {other:?}; dropping connection");
                return;
            }
            Err(e) => {
                log::warn!("handshake failed: {e}");
                return;
            }
        };

        match self.roster.add_viewer(greeting.clone(), write_stream) {
            Ok(viewer) => {
                stream.set_read_timeout(None).ok();
                let tx = self.tx.clone();
                let keep_running = self.keep_running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("geo-feed-{}", viewer.0))
                    .spawn(move || reader_loop(reader, viewer, tx, keep_running));
                if let Err(e) = spawned {
                    log::error!("cannot spawn reader for {viewer}: {e}");
                    self.roster.remove_viewer(viewer);
                    return;
                }
                self.report(FeedEvent::Joined { viewer, greeting });
            }
            Err(reason) => {
                log::info!("rejecting viewer: {reason}");
                let mut writer = std::io::BufWriter::new(stream);
                let _ = framing::send(&mut writer, &ServerMessage::Notice { text: reason });
            }
        }
    }

    fn handle_message(&mut self, viewer: ViewerId, message: ClientMessage) {
        match message {
            ClientMessage::Index(update) => {
                self.roster.request_index(viewer, update);
                self.report(FeedEvent::IndexRequested { viewer, update });
            }
            ClientMessage::Greeting { text } => {
                log::debug!("{viewer} greeted again: {text}");
            }
            ClientMessage::Goodbye => {
                // Handled in the reader loop.
            }
        }
    }

    /// Publish an event. The viewer count is refreshed first so a handle
    /// that sees the event also sees the roster change behind it.
    fn report(&self, event: FeedEvent) {
        self.viewer_count.store(self.roster.len(), Ordering::SeqCst);
        let _ = self.events.send(event);
    }
}

/// Reader loop for a single viewer. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    viewer: ViewerId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match framing::recv::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => break,
            Ok(message) => {
                if tx.send(InternalEvent::MessageFrom { viewer, message }).is_err() {
                    return;
                }
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("{viewer}: skipping malformed message: {e}");
            }
            Err(_) => break,
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { viewer });
}
