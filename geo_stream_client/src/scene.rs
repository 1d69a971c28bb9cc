// Boundary to the rendering engine.
//
// `SceneBackend` is everything the sync engine needs from a renderer:
// factories for empty mesh / curve / text objects parented under one
// synchronization root, mutators for their geometry and material state, and
// delayed destruction. Handles are opaque to the engine; the pool owns them.
//
// `RecordingScene` is a complete in-memory backend. The headless viewer uses
// it as its scene, and tests inspect it to see exactly what the engine did:
// every object's current state, how many stroke-width writes happened, and
// the order and delay of destroy calls.

use std::collections::BTreeMap;

use geo_stream_protocol::GeometryKind;
use glam::Vec3;
use thiserror::Error;

use crate::codec::Color;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("could not create {kind} object: {reason}")]
    Create { kind: GeometryKind, reason: String },
}

/// Renderer operations used by the sync engine.
///
/// Mutators take the handle by reference; only `destroy` consumes it.
pub trait SceneBackend {
    type Handle;

    fn create_mesh(&mut self) -> Result<Self::Handle, SceneError>;
    fn create_curve(&mut self) -> Result<Self::Handle, SceneError>;
    fn create_text(&mut self) -> Result<Self::Handle, SceneError>;

    /// Drop all vertex, index and normal data of a mesh.
    fn clear_mesh(&mut self, handle: &Self::Handle);
    fn set_vertices(&mut self, handle: &Self::Handle, vertices: &[Vec3]);
    fn set_triangles(&mut self, handle: &Self::Handle, triangles: &[u32]);
    fn set_normals(&mut self, handle: &Self::Handle, normals: &[Vec3]);
    fn set_color(&mut self, handle: &Self::Handle, color: Color);

    fn set_polyline(&mut self, handle: &Self::Handle, points: &[Vec3]);
    fn stroke_width(&self, handle: &Self::Handle) -> f32;
    fn set_stroke_width(&mut self, handle: &Self::Handle, width: f32);

    fn set_text(&mut self, handle: &Self::Handle, text: &str);
    fn set_local_position(&mut self, handle: &Self::Handle, position: Vec3);
    fn set_local_rotation(&mut self, handle: &Self::Handle, euler_degrees: Vec3);
    fn set_font_size(&mut self, handle: &Self::Handle, size: f32);

    /// Remove the object after `delay_secs`.
    fn destroy(&mut self, handle: Self::Handle, delay_secs: f32);
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Stroke width given to a freshly created curve.
pub const DEFAULT_STROKE_WIDTH: f32 = 0.004;

/// Identity of an object in a `RecordingScene`, assigned in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Mesh {
        vertices: Vec<Vec3>,
        triangles: Vec<u32>,
        normals: Vec<Vec3>,
    },
    Curve {
        points: Vec<Vec3>,
        width: f32,
    },
    Text {
        text: String,
        position: Vec3,
        rotation: Vec3,
        font_size: f32,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneObject {
    pub shape: Shape,
    pub color: Color,
}

/// One recorded `destroy` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Destroyed {
    pub id: ObjectId,
    pub kind: GeometryKind,
    pub delay_secs: f32,
}

/// Scene backend that keeps every object in memory.
#[derive(Debug, Default)]
pub struct RecordingScene {
    objects: BTreeMap<ObjectId, SceneObject>,
    next_id: u64,
    /// Kinds whose factory should fail, for exercising error paths.
    failing: Vec<GeometryKind>,
    pub width_writes: usize,
    pub destroyed: Vec<Destroyed>,
}

impl RecordingScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn live_count(&self) -> usize {
        self.objects.len()
    }

    /// Make every later `create_*` call for `kind` fail.
    pub fn fail_creation(&mut self, kind: GeometryKind) {
        self.failing.push(kind);
    }

    fn create(&mut self, kind: GeometryKind, shape: Shape) -> Result<ObjectId, SceneError> {
        if self.failing.contains(&kind) {
            return Err(SceneError::Create {
                kind,
                reason: "factory disabled".into(),
            });
        }
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            SceneObject {
                shape,
                color: Color::WHITE,
            },
        );
        Ok(id)
    }

    fn shape_mut(&mut self, id: ObjectId) -> Option<&mut Shape> {
        let shape = self.objects.get_mut(&id).map(|o| &mut o.shape);
        if shape.is_none() {
            log::warn!("scene object {id:?} is gone");
        }
        shape
    }
}

impl SceneBackend for RecordingScene {
    type Handle = ObjectId;

    fn create_mesh(&mut self) -> Result<ObjectId, SceneError> {
        self.create(
            GeometryKind::Mesh,
            Shape::Mesh {
                vertices: Vec::new(),
                triangles: Vec::new(),
                normals: Vec::new(),
            },
        )
    }

    fn create_curve(&mut self) -> Result<ObjectId, SceneError> {
        self.create(
            GeometryKind::Curve,
            Shape::Curve {
                points: Vec::new(),
                width: DEFAULT_STROKE_WIDTH,
            },
        )
    }

    fn create_text(&mut self) -> Result<ObjectId, SceneError> {
        self.create(
            GeometryKind::Text,
            Shape::Text {
                text: String::new(),
                position: Vec3::ZERO,
                rotation: Vec3::ZERO,
                font_size: 0.0,
            },
        )
    }

    fn clear_mesh(&mut self, handle: &ObjectId) {
        if let Some(Shape::Mesh {
            vertices,
            triangles,
            normals,
        }) = self.shape_mut(*handle)
        {
            vertices.clear();
            triangles.clear();
            normals.clear();
        }
    }

    fn set_vertices(&mut self, handle: &ObjectId, new: &[Vec3]) {
        if let Some(Shape::Mesh { vertices, .. }) = self.shape_mut(*handle) {
            *vertices = new.to_vec();
        }
    }

    fn set_triangles(&mut self, handle: &ObjectId, new: &[u32]) {
        if let Some(Shape::Mesh { triangles, .. }) = self.shape_mut(*handle) {
            *triangles = new.to_vec();
        }
    }

    fn set_normals(&mut self, handle: &ObjectId, new: &[Vec3]) {
        if let Some(Shape::Mesh { normals, .. }) = self.shape_mut(*handle) {
            *normals = new.to_vec();
        }
    }

    fn set_color(&mut self, handle: &ObjectId, color: Color) {
        if let Some(object) = self.objects.get_mut(handle) {
            object.color = color;
        }
    }

    fn set_polyline(&mut self, handle: &ObjectId, new: &[Vec3]) {
        if let Some(Shape::Curve { points, .. }) = self.shape_mut(*handle) {
            *points = new.to_vec();
        }
    }

    fn stroke_width(&self, handle: &ObjectId) -> f32 {
        match self.objects.get(handle).map(|o| &o.shape) {
            Some(Shape::Curve { width, .. }) => *width,
            _ => 0.0,
        }
    }

    fn set_stroke_width(&mut self, handle: &ObjectId, new: f32) {
        if let Some(Shape::Curve { width, .. }) = self.shape_mut(*handle) {
            *width = new;
            self.width_writes += 1;
        }
    }

    fn set_text(&mut self, handle: &ObjectId, new: &str) {
        if let Some(Shape::Text { text, .. }) = self.shape_mut(*handle) {
            *text = new.to_owned();
        }
    }

    fn set_local_position(&mut self, handle: &ObjectId, new: Vec3) {
        if let Some(Shape::Text { position, .. }) = self.shape_mut(*handle) {
            *position = new;
        }
    }

    fn set_local_rotation(&mut self, handle: &ObjectId, euler_degrees: Vec3) {
        if let Some(Shape::Text { rotation, .. }) = self.shape_mut(*handle) {
            *rotation = euler_degrees;
        }
    }

    fn set_font_size(&mut self, handle: &ObjectId, size: f32) {
        if let Some(Shape::Text { font_size, .. }) = self.shape_mut(*handle) {
            *font_size = size;
        }
    }

    fn destroy(&mut self, handle: ObjectId, delay_secs: f32) {
        let Some(object) = self.objects.remove(&handle) else {
            log::warn!("destroy of unknown scene object {handle:?}");
            return;
        };
        let kind = match object.shape {
            Shape::Mesh { .. } => GeometryKind::Mesh,
            Shape::Curve { .. } => GeometryKind::Curve,
            Shape::Text { .. } => GeometryKind::Text,
        };
        self.destroyed.push(Destroyed {
            id: handle,
            kind,
            delay_secs,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_creation_order() {
        let mut scene = RecordingScene::new();
        assert_eq!(scene.create_mesh().unwrap(), ObjectId(0));
        assert_eq!(scene.create_text().unwrap(), ObjectId(1));
        assert_eq!(scene.live_count(), 2);
    }

    #[test]
    fn new_curve_has_default_width() {
        let mut scene = RecordingScene::new();
        let id = scene.create_curve().unwrap();
        assert_eq!(scene.stroke_width(&id), DEFAULT_STROKE_WIDTH);
        assert_eq!(scene.width_writes, 0);
    }

    #[test]
    fn mutators_ignore_mismatched_shapes() {
        let mut scene = RecordingScene::new();
        let text = scene.create_text().unwrap();
        scene.set_polyline(&text, &[Vec3::ONE]);
        scene.set_stroke_width(&text, 3.0);
        assert_eq!(scene.width_writes, 0);
        assert!(matches!(
            scene.object(text).unwrap().shape,
            Shape::Text { .. }
        ));
    }

    #[test]
    fn destroy_records_kind_and_delay() {
        let mut scene = RecordingScene::new();
        let id = scene.create_curve().unwrap();
        scene.destroy(id, 0.5);
        assert_eq!(scene.live_count(), 0);
        assert_eq!(
            scene.destroyed,
            vec![Destroyed {
                id,
                kind: GeometryKind::Curve,
                delay_secs: 0.5
            }]
        );
    }

    #[test]
    fn failing_factory_reports_kind() {
        let mut scene = RecordingScene::new();
        scene.fail_creation(GeometryKind::Mesh);
        let err = scene.create_mesh().unwrap_err();
        assert!(matches!(err, SceneError::Create { kind: GeometryKind::Mesh, .. }));
        assert!(scene.create_curve().is_ok());
    }
}
