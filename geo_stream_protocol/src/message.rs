// Protocol messages exchanged between the authoring server and viewers.
//
// Two enums define the full vocabulary:
// - `ServerMessage`: geometry deltas, count summaries, index updates, and
//   free-text notices pushed by the server.
// - `ClientMessage`: the greeting, index navigation requests, and goodbye
//   sent by a viewer.
//
// Numeric payloads stay in the server's encoding on the wire: positions are
// integers in thousandths of a model unit, colors are one byte per channel.
// Decoding into floats is the client's job (`geo_stream_client::codec`).
//
// A delta packet always carries the complete state of one object. Applying
// it replaces whatever the object held before; there is no incremental patch.

use serde::{Deserialize, Serialize};

use crate::types::{GeometryKind, SlotIndex};

/// Messages sent by the authoring server to a viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Mesh(MeshDelta),
    Curve(CurveDelta),
    Text(TextDelta),
    /// Authoritative object count per kind.
    GeometryInfo(CountSummary),
    /// The server's streaming gate moved.
    Index(IndexUpdate),
    /// Free-text status line from the server, shown in the viewer's log.
    Notice { text: String },
}

/// Messages sent by a viewer to the authoring server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Sent once, right after connecting.
    Greeting { text: String },
    /// Ask the server to move a streaming gate.
    Index(IndexUpdate),
    /// Viewer is leaving gracefully.
    Goodbye,
}

/// Full state of one triangle mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshDelta {
    pub slot: SlotIndex,
    /// Flat `x, y, z` triples in thousandths.
    pub vertices: Vec<i32>,
    /// Vertex indices, three per triangle. Not scaled.
    pub triangles: Vec<u32>,
    /// Flat `x, y, z` triples in thousandths; empty or one per vertex.
    pub normals: Vec<i32>,
    pub color: [u8; 4],
}

/// Full state of one polyline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveDelta {
    pub slot: SlotIndex,
    /// Flat `x, y, z` triples in thousandths.
    pub positions: Vec<i32>,
    pub color: [u8; 4],
    /// Stroke width in server units (half of the rendered width).
    pub width: f32,
}

/// Full state of one text label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextDelta {
    pub slot: SlotIndex,
    pub text: String,
    /// Anchor position in thousandths.
    pub position: [i32; 3],
    /// Euler angles in degrees, passed through unscaled.
    pub rotation: [f32; 3],
    /// Server text size (twice the rendered font size).
    pub text_size: f32,
    pub color: [u8; 4],
}

/// Authoritative number of live objects per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSummary {
    pub curve_count: u32,
    pub mesh_count: u32,
    pub text_count: u32,
}

impl CountSummary {
    pub fn count_for(&self, kind: GeometryKind) -> u32 {
        match kind {
            GeometryKind::Mesh => self.mesh_count,
            GeometryKind::Curve => self.curve_count,
            GeometryKind::Text => self.text_count,
        }
    }
}

/// Position of a streaming gate on the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUpdate {
    pub gate_id: i32,
    pub index: i32,
}

/// The gate every viewer navigates.
pub const DEFAULT_GATE: i32 = 0;

/// One geometry packet, the payload of the client's geometry lane.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryDelta {
    Mesh(MeshDelta),
    Curve(CurveDelta),
    Text(TextDelta),
}

impl GeometryDelta {
    pub fn kind(&self) -> GeometryKind {
        match self {
            GeometryDelta::Mesh(_) => GeometryKind::Mesh,
            GeometryDelta::Curve(_) => GeometryKind::Curve,
            GeometryDelta::Text(_) => GeometryKind::Text,
        }
    }

    pub fn slot(&self) -> SlotIndex {
        match self {
            GeometryDelta::Mesh(d) => d.slot,
            GeometryDelta::Curve(d) => d.slot,
            GeometryDelta::Text(d) => d.slot,
        }
    }
}

impl From<GeometryDelta> for ServerMessage {
    fn from(delta: GeometryDelta) -> Self {
        match delta {
            GeometryDelta::Mesh(d) => ServerMessage::Mesh(d),
            GeometryDelta::Curve(d) => ServerMessage::Curve(d),
            GeometryDelta::Text(d) => ServerMessage::Text(d),
        }
    }
}
