// geo_stream_protocol: wire protocol between the authoring server and viewers.
//
// Shared by the viewer client (`geo_stream_client`) and the stand-in authoring
// server (`geo_stream_feed`). Has no dependency on either side.
//
// Module overview:
// - `types.rs`:    `GeometryKind` and `SlotIndex`, the addressing scheme for
//                  streamed objects.
// - `message.rs`:  `ServerMessage` / `ClientMessage` and the packet structs
//                  (`MeshDelta`, `CurveDelta`, `TextDelta`, `CountSummary`,
//                  `IndexUpdate`), plus the `GeometryDelta` lane payload.
// - `framing.rs`:  4-byte big-endian length prefix + JSON payload over any
//                  `Read`/`Write` stream, with typed `send`/`recv` helpers.
//
// Payloads keep the server's numeric encoding (scaled integers, byte colors).
// Decoding into floats happens in the client.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{FrameError, MAX_FRAME_LEN, read_frame, recv, send, write_frame};
pub use message::{
    ClientMessage, CountSummary, CurveDelta, DEFAULT_GATE, GeometryDelta, IndexUpdate, MeshDelta,
    ServerMessage, TextDelta,
};
pub use types::{GeometryKind, SlotIndex};
