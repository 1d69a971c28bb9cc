// Socket layer between the viewer and the authoring server.
//
// `Transport` is the seam the session talks to: connect with a packet
// callback, send, disconnect, and report whether the link is still up.
//
// `TcpTransport` is the production implementation:
// - `connect()` opens the TCP stream on the calling thread, then spawns a
//   reader thread that loops on `framing::recv::<ServerMessage>` and hands
//   each packet to the callback, one at a time, in arrival order.
// - The calling thread keeps a `BufWriter<TcpStream>` for outbound messages;
//   writes are small and flushed synchronously.
// - A frame whose JSON does not parse is logged and skipped (the length
//   prefix keeps the stream aligned). Any read error or EOF ends the reader
//   and flips the shared `connected` flag, which the session polls.
//
// The callback runs on the reader thread. It must be cheap and must not
// touch render state; the session's callback only pushes into the bridge.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use geo_stream_protocol::framing::{self, FrameError};
use geo_stream_protocol::message::{ClientMessage, ServerMessage};
use thiserror::Error;

/// Receives every inbound packet, on the transport's reader thread.
pub type PacketCallback = Box<dyn FnMut(ServerMessage) + Send + 'static>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(#[from] FrameError),
    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Connection to an authoring server.
pub trait Transport {
    /// Open the connection and start delivering packets to `on_packet`.
    fn connect(&mut self, on_packet: PacketCallback) -> Result<(), TransportError>;
    fn send(&mut self, msg: &ClientMessage) -> Result<(), TransportError>;
    /// Close the connection. Safe to call when already closed.
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
}

struct Link {
    writer: BufWriter<TcpStream>,
    reader_thread: Option<JoinHandle<()>>,
}

/// Length-prefixed JSON over TCP.
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
    connected: Arc<AtomicBool>,
    link: Option<Link>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            connected: Arc::new(AtomicBool::new(false)),
            link: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let resolve_err = |source| TransportError::Resolve {
            addr: self.addr.clone(),
            source,
        };
        self.addr
            .to_socket_addrs()
            .map_err(resolve_err)?
            .next()
            .ok_or_else(|| {
                resolve_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no addresses",
                ))
            })
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, on_packet: PacketCallback) -> Result<(), TransportError> {
        if self.link.is_some() && self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }
        // Reap a previous link whose reader already ended.
        self.disconnect();

        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|source| {
            TransportError::Connect {
                addr: self.addr.clone(),
                source,
            }
        })?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        let reader_thread = start_reader(&self.connected, move |connected| {
            thread::Builder::new()
                .name("geo-stream-reader".into())
                .spawn(move || reader_loop(reader, on_packet, connected))
        })?;

        log::info!("connected to {addr}");
        self.link = Some(Link {
            writer,
            reader_thread: Some(reader_thread),
        });
        Ok(())
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        framing::send(&mut link.writer, msg)?;
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        self.connected.store(false, Ordering::SeqCst);
        // Unblocks the reader thread's pending read.
        let _ = link.writer.get_ref().shutdown(Shutdown::Both);
        if let Some(handle) = link.reader_thread.take() {
            let _ = handle.join();
        }
        log::info!("disconnected from {}", self.addr);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Raise `connected` and spawn the reader. The flag goes up first so a reader
/// that sees EOF immediately can still lower it; a failed spawn lowers it
/// again.
fn start_reader<F>(connected: &Arc<AtomicBool>, spawn: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(Arc<AtomicBool>) -> io::Result<JoinHandle<()>>,
{
    connected.store(true, Ordering::SeqCst);
    spawn(Arc::clone(connected)).inspect_err(|_| connected.store(false, Ordering::SeqCst))
}

/// Reader thread: receive frames until the stream ends.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    mut on_packet: PacketCallback,
    connected: Arc<AtomicBool>,
) {
    loop {
        match framing::recv::<_, ServerMessage>(&mut reader) {
            Ok(msg) => on_packet(msg),
            Err(e) if e.is_recoverable() => {
                log::warn!("skipping malformed packet: {e}");
            }
            Err(FrameError::Closed) => {
                if connected.load(Ordering::SeqCst) {
                    log::info!("server closed the stream");
                }
                break;
            }
            Err(e) => {
                if connected.load(Ordering::SeqCst) {
                    log::warn!("stream read failed: {e}");
                }
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::mpsc;

    use geo_stream_protocol::{CountSummary, IndexUpdate};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    fn forwarding_callback() -> (PacketCallback, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel();
        let callback: PacketCallback = Box::new(move |msg| {
            let _ = tx.send(msg);
        });
        (callback, rx)
    }

    #[test]
    fn delivers_packets_and_skips_malformed_frames() {
        let (listener, addr) = listener();
        let mut transport = TcpTransport::new(addr, TIMEOUT);
        let (callback, inbox) = forwarding_callback();
        transport.connect(callback).unwrap();

        let (mut server, _) = listener.accept().unwrap();
        let summary = ServerMessage::GeometryInfo(CountSummary::default());
        framing::write_frame(&mut server, b"{\"Bogus\":1}").unwrap();
        framing::send(&mut server, &summary).unwrap();

        assert_eq!(inbox.recv_timeout(TIMEOUT).unwrap(), summary);
        assert!(transport.is_connected());
    }

    #[test]
    fn send_reaches_the_server() {
        let (listener, addr) = listener();
        let mut transport = TcpTransport::new(addr, TIMEOUT);
        let (callback, _inbox) = forwarding_callback();
        transport.connect(callback).unwrap();
        let (server, _) = listener.accept().unwrap();

        let msg = ClientMessage::Index(IndexUpdate {
            gate_id: 0,
            index: 3,
        });
        transport.send(&msg).unwrap();

        let mut reader = BufReader::new(server);
        let received: ClientMessage = framing::recv(&mut reader).unwrap();
        assert_eq!(received, msg);
    }

    #[test]
    fn server_close_marks_disconnected() {
        let (listener, addr) = listener();
        let mut transport = TcpTransport::new(addr, TIMEOUT);
        let (callback, inbox) = forwarding_callback();
        transport.connect(callback).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(server);

        // The callback's sender is dropped when the reader thread exits.
        assert!(inbox.recv_timeout(TIMEOUT).is_err());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(&ClientMessage::Goodbye),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn connect_failure_is_an_error() {
        let (listener, addr) = listener();
        drop(listener);
        let mut transport = TcpTransport::new(addr, Duration::from_millis(500));
        let (callback, _inbox) = forwarding_callback();
        let err = transport.connect(callback).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!transport.is_connected());
    }

    #[test]
    fn failed_reader_spawn_leaves_transport_disconnected() {
        let connected = Arc::new(AtomicBool::new(false));
        let result = start_reader(&connected, |flag| {
            assert!(flag.load(Ordering::SeqCst));
            Err(io::Error::other("thread limit reached"))
        });
        assert!(result.is_err());
        assert!(!connected.load(Ordering::SeqCst));

        let handle = start_reader(&connected, |_| thread::Builder::new().spawn(|| ())).unwrap();
        handle.join().unwrap();
        assert!(connected.load(Ordering::SeqCst));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (listener, addr) = listener();
        let mut transport = TcpTransport::new(addr, TIMEOUT);
        let (callback, _inbox) = forwarding_callback();
        transport.connect(callback).unwrap();
        let _server = listener.accept().unwrap();

        transport.disconnect();
        assert!(!transport.is_connected());
        transport.disconnect();
    }
}
