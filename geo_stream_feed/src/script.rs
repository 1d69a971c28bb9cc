// Scene scripts replayed by the `geo-feed` binary.
//
// A script is a JSON array of `ServerMessage`s in the protocol's own
// serialization, broadcast in order. When no script is given the feed plays
// `demo_scene()`: one curve, one triangle and one label, preceded by the
// count summary that announces them.

use std::path::Path;

use geo_stream_protocol::{
    CountSummary, CurveDelta, MeshDelta, ServerMessage, SlotIndex, TextDelta,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot read scene {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scene: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn parse_scene(json: &str) -> Result<Vec<ServerMessage>, ScriptError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_scene(path: &Path) -> Result<Vec<ServerMessage>, ScriptError> {
    let json = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_scene(&json)
}

pub fn demo_scene() -> Vec<ServerMessage> {
    vec![
        ServerMessage::GeometryInfo(CountSummary {
            curve_count: 1,
            mesh_count: 1,
            text_count: 1,
        }),
        ServerMessage::Curve(CurveDelta {
            slot: SlotIndex(0),
            positions: vec![0, 0, 0, 1000, 0, 0, 1000, 1000, 0],
            color: [255, 0, 0, 255],
            width: 0.002,
        }),
        ServerMessage::Mesh(MeshDelta {
            slot: SlotIndex(0),
            vertices: vec![0, 0, 500, 1000, 0, 500, 0, 1000, 500],
            triangles: vec![0, 1, 2],
            normals: vec![0, 0, 1000, 0, 0, 1000, 0, 0, 1000],
            color: [40, 160, 255, 200],
        }),
        ServerMessage::Text(TextDelta {
            slot: SlotIndex(0),
            text: "origin".into(),
            position: [0, 0, 0],
            rotation: [0.0, 0.0, 0.0],
            text_size: 0.1,
            color: [255, 255, 255, 255],
        }),
    ]
}
