// Integration smoke test for the feed server.
//
// Starts a feed on localhost and talks to it with plain TCP sockets using the
// protocol crate's framing and message types, no viewer code involved. Covers
// the greeting handshake, broadcasting, index echo between viewers, rejection
// paths, and disconnect reporting.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use geo_stream_feed::{FeedConfig, FeedEvent, FeedHandle, ViewerId, start_feed};
use geo_stream_protocol::framing::{self, FrameError};
use geo_stream_protocol::{ClientMessage, CountSummary, CurveDelta, IndexUpdate, ServerMessage, SlotIndex};

const TIMEOUT: Duration = Duration::from_secs(5);

fn feed() -> (FeedHandle, SocketAddr) {
    start_feed(FeedConfig {
        port: 0,
        handshake_timeout_ms: 2000,
        max_viewers: None,
    })
    .unwrap()
}

/// Connect without greeting.
fn open(addr: SocketAddr) -> (BufReader<TcpStream>, BufWriter<TcpStream>) {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (reader, BufWriter::new(stream))
}

/// Connect, greet, and consume the index the feed sends on join.
fn join(addr: SocketAddr, greeting: &str) -> (BufReader<TcpStream>, BufWriter<TcpStream>) {
    let (mut reader, mut writer) = open(addr);
    framing::send(
        &mut writer,
        &ClientMessage::Greeting {
            text: greeting.into(),
        },
    )
    .unwrap();
    match recv(&mut reader) {
        ServerMessage::Index(_) => {}
        other => panic!("expected the current index, got {other:?}"),
    }
    (reader, writer)
}

fn recv(reader: &mut BufReader<TcpStream>) -> ServerMessage {
    framing::recv(reader).unwrap()
}

fn index(index: i32) -> IndexUpdate {
    IndexUpdate { gate_id: 0, index }
}

#[test]
fn greeted_viewer_receives_broadcasts() {
    let (handle, addr) = feed();
    let (mut reader, _writer) = join(addr, "headset one");
    assert!(handle.wait_for_viewers(1, TIMEOUT));
    assert_eq!(
        handle.next_event(TIMEOUT),
        Some(FeedEvent::Joined {
            viewer: ViewerId(0),
            greeting: "headset one".into()
        })
    );

    let summary = ServerMessage::GeometryInfo(CountSummary {
        curve_count: 1,
        mesh_count: 0,
        text_count: 0,
    });
    let curve = ServerMessage::Curve(CurveDelta {
        slot: SlotIndex(0),
        positions: vec![0, 0, 0, 1000, 0, 0],
        color: [255, 0, 0, 255],
        width: 2.0,
    });
    assert!(handle.broadcast(summary.clone()));
    assert!(handle.broadcast(curve.clone()));

    assert_eq!(recv(&mut reader), summary);
    assert_eq!(recv(&mut reader), curve);
    handle.stop();
}

#[test]
fn index_request_reaches_every_viewer() {
    let (handle, addr) = feed();
    let (mut reader_a, mut writer_a) = join(addr, "a");
    let (mut reader_b, _writer_b) = join(addr, "b");
    assert!(handle.wait_for_viewers(2, TIMEOUT));

    framing::send(&mut writer_a, &ClientMessage::Index(index(3))).unwrap();

    assert_eq!(recv(&mut reader_a), ServerMessage::Index(index(3)));
    assert_eq!(recv(&mut reader_b), ServerMessage::Index(index(3)));

    let requested = std::iter::from_fn(|| handle.next_event(TIMEOUT))
        .find(|e| matches!(e, FeedEvent::IndexRequested { .. }));
    assert_eq!(
        requested,
        Some(FeedEvent::IndexRequested {
            viewer: ViewerId(0),
            update: index(3)
        })
    );

    // A viewer joining now starts at the new index.
    let (mut reader_c, mut writer_c) = open(addr);
    framing::send(&mut writer_c, &ClientMessage::Greeting { text: "c".into() }).unwrap();
    assert_eq!(recv(&mut reader_c), ServerMessage::Index(index(3)));
    handle.stop();
}

#[test]
fn connection_without_greeting_is_dropped() {
    let (handle, addr) = feed();
    let (mut reader, mut writer) = open(addr);
    framing::send(&mut writer, &ClientMessage::Index(index(1))).unwrap();

    assert!(matches!(
        framing::recv::<_, ServerMessage>(&mut reader),
        Err(FrameError::Closed)
    ));
    assert_eq!(handle.viewer_count(), 0);
    handle.stop();
}

#[test]
fn full_feed_sends_notice() {
    let (handle, addr) = start_feed(FeedConfig {
        port: 0,
        handshake_timeout_ms: 2000,
        max_viewers: Some(1),
    })
    .unwrap();
    let (_reader_a, _writer_a) = join(addr, "a");
    assert!(handle.wait_for_viewers(1, TIMEOUT));

    let (mut reader_b, mut writer_b) = open(addr);
    framing::send(&mut writer_b, &ClientMessage::Greeting { text: "b".into() }).unwrap();
    assert_eq!(
        recv(&mut reader_b),
        ServerMessage::Notice {
            text: "feed is full".into()
        }
    );
    assert_eq!(handle.viewer_count(), 1);
    handle.stop();
}

#[test]
fn goodbye_is_reported_as_left() {
    let (handle, addr) = feed();
    let (_reader, mut writer) = join(addr, "short visit");
    assert!(handle.wait_for_viewers(1, TIMEOUT));

    framing::send(&mut writer, &ClientMessage::Goodbye).unwrap();

    let left = std::iter::from_fn(|| handle.next_event(TIMEOUT))
        .find(|e| matches!(e, FeedEvent::Left { .. }));
    assert_eq!(
        left,
        Some(FeedEvent::Left {
            viewer: ViewerId(0)
        })
    );
    assert_eq!(handle.viewer_count(), 0);
    handle.stop();
}

#[test]
fn stop_closes_viewer_streams() {
    let (handle, addr) = feed();
    let (mut reader, _writer) = join(addr, "x");
    assert!(handle.wait_for_viewers(1, TIMEOUT));

    handle.stop();
    assert!(matches!(
        framing::recv::<_, ServerMessage>(&mut reader),
        Err(FrameError::Closed)
    ));
}
