// geo_stream_client: viewer side of the geometry stream.
//
// Receives mesh, curve and text deltas from an authoring server over TCP and
// mirrors them into a local scene. Network I/O runs on a dedicated reader
// thread; all scene mutation happens on the caller's render loop via
// `ClientSession::tick()`.
//
// Module overview:
// - `codec.rs`:     scaled-integer coordinates and byte colors to `glam::Vec3`
//                   and `Color`.
// - `bridge.rs`:    three crossbeam lanes (geometry, summary, index) between
//                   the reader thread and the render loop, with
//                   clear-on-summary.
// - `pool.rs`:      `GeometryPool`, per-kind slot lists of scene handles with
//                   lazy creation and front/back eviction.
// - `scene.rs`:     `SceneBackend` trait (the renderer boundary) and the
//                   in-memory `RecordingScene`.
// - `engine.rs`:    `SyncEngine`, validation and application of deltas and
//                   count summaries.
// - `transport.rs`: `Transport` trait and the framed-JSON `TcpTransport`.
// - `session.rs`:   `ClientSession`, connection lifecycle, per-tick apply,
//                   and streaming-index navigation.
// - `config.rs`:    `ViewerConfig`, loaded from JSON.
//
// Data flows one way: transport → bridge → engine → scene. The only outbound
// traffic is the greeting, index-step requests, and the goodbye.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod pool;
pub mod scene;
pub mod session;
pub mod transport;

pub use config::{ConfigError, ViewerConfig};
pub use engine::{SyncEngine, SyncError};
pub use pool::{EvictionPolicy, GeometryPool, PoolSizes};
pub use scene::{RecordingScene, SceneBackend};
pub use session::{ClientSession, SessionError, SessionStats, Step, TickReport};
pub use transport::{TcpTransport, Transport, TransportError};
