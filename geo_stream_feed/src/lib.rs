// geo_stream_feed: stand-in authoring server for the geometry stream.
//
// Accepts viewer connections, broadcasts geometry packets to all of them,
// and keeps viewers' streaming indices in step by echoing every index request
// back to the whole roster. It holds no scene of its own; whatever embeds it
// (the `geo-feed` binary, or a test) decides what to send.
//
// Module overview:
// - `roster.rs`:  connected viewers, their write halves, and the current
//                 streaming index per gate. Driven by `server.rs`.
// - `server.rs`:  TCP listener, one reader thread per viewer, and the main
//                 event loop funnelling everything through an `mpsc` channel
//                 into the single-threaded `Roster`.
// - `script.rs`:  JSON scene scripts and the built-in demo scene.
//
// Dependencies: `geo_stream_protocol` only. No dependency on the client.

pub mod roster;
pub mod script;
pub mod server;

pub use roster::ViewerId;
pub use server::{FeedConfig, FeedEvent, FeedHandle, start_feed};
