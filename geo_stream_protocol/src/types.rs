// Core addressing types for the geometry stream.
//
// The authoring server identifies every streamed object by a kind (mesh,
// curve, or text) plus a slot index that is dense from zero within that kind.
// The client never invents slot numbers; it only mirrors what the server
// assigns. These newtypes are shared by `message.rs` and the client's pool.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which family of render object a packet addresses. Each kind has its own
/// slot namespace and its own pool on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryKind {
    Mesh,
    Curve,
    Text,
}

impl GeometryKind {
    /// All kinds, in the order count summaries are applied.
    pub const SHRINK_ORDER: [GeometryKind; 3] =
        [GeometryKind::Curve, GeometryKind::Mesh, GeometryKind::Text];
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryKind::Mesh => "mesh",
            GeometryKind::Curve => "curve",
            GeometryKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Server-assigned position of one persistent object within a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
