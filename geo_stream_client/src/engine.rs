// Applies decoded packets to the scene.
//
// `SyncEngine` owns the scene backend and the slot pool. Each `apply_*`
// method resolves (or creates) the handle for the packet's slot, decodes the
// payload through `codec`, and overwrites the object's state through the
// backend. Deltas carry complete object state, so applying the same packet
// twice leaves the scene exactly as applying it once.
//
// Packets are validated before a handle is touched. A malformed packet is
// rejected with a `SyncError` naming the slot, the kind and the current pool
// sizes, and nothing is created for it. That includes a slot so far past the
// end of its pool that reaching it would pad more than `max_slot_gap`
// handles. The caller (the session) logs the
// error and moves on; one bad packet must not end a long-lived stream.
//
// The engine runs only on the render loop. It keeps a decode scratch buffer
// that is reused across packets to avoid reallocating vertex arrays every
// frame.

use geo_stream_protocol::{
    CountSummary, CurveDelta, GeometryDelta, GeometryKind, MeshDelta, SlotIndex, TextDelta,
};
use glam::Vec3;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::pool::{EvictionPolicy, GeometryPool, PoolError, PoolSizes};
use crate::scene::SceneBackend;

/// Rendered curve width is twice the server width.
pub const CURVE_WIDTH_FACTOR: f32 = 2.0;

/// Rendered font size is half the server text size.
pub const FONT_SIZE_FACTOR: f32 = 0.5;

/// Most padding handles one packet may create to reach its slot.
pub const DEFAULT_MAX_SLOT_GAP: usize = 1024;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Create(#[from] PoolError),
    #[error("malformed {kind} packet for slot {slot} (pools: {sizes}): {reason}")]
    Malformed {
        kind: GeometryKind,
        slot: SlotIndex,
        sizes: PoolSizes,
        reason: Malformed,
    },
}

/// What was wrong with a rejected packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformed {
    #[error("vertices: {0}")]
    Vertices(CodecError),
    #[error("normals: {0}")]
    Normals(CodecError),
    #[error("curve positions: {0}")]
    Positions(CodecError),
    #[error("triangle list of length {0} is not a multiple of 3")]
    TriangleCount(usize),
    #[error("triangle index {index} out of range for {vertex_count} vertices")]
    TriangleIndex { index: u32, vertex_count: usize },
    #[error("{normals} normals for {vertices} vertices")]
    NormalCount { normals: usize, vertices: usize },
    #[error("slot is {gap} past the end of the pool (limit {max_gap})")]
    SlotGap { gap: usize, max_gap: usize },
}

/// Applies geometry packets to a scene through a slot pool.
pub struct SyncEngine<B: SceneBackend> {
    backend: B,
    pool: GeometryPool<B::Handle>,
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    max_slot_gap: usize,
}

impl<B: SceneBackend> SyncEngine<B> {
    pub fn new(backend: B, eviction: EvictionPolicy, destroy_stagger_secs: f32) -> Self {
        Self {
            backend,
            pool: GeometryPool::new(eviction, destroy_stagger_secs),
            vertices: Vec::new(),
            normals: Vec::new(),
            max_slot_gap: DEFAULT_MAX_SLOT_GAP,
        }
    }

    pub fn with_max_slot_gap(mut self, max_slot_gap: usize) -> Self {
        self.max_slot_gap = max_slot_gap;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pool(&self) -> &GeometryPool<B::Handle> {
        &self.pool
    }

    /// Apply any geometry delta.
    pub fn apply(&mut self, delta: &GeometryDelta) -> Result<(), SyncError> {
        match delta {
            GeometryDelta::Mesh(d) => self.apply_mesh(d),
            GeometryDelta::Curve(d) => self.apply_curve(d),
            GeometryDelta::Text(d) => self.apply_text(d),
        }
    }

    /// Replace a mesh's vertices, triangles, normals and color.
    pub fn apply_mesh(&mut self, delta: &MeshDelta) -> Result<(), SyncError> {
        let kind = GeometryKind::Mesh;
        self.check_slot(kind, delta.slot)?;
        codec::decode_vec3_list_into(&delta.vertices, &mut self.vertices)
            .map_err(|e| self.malformed(kind, delta.slot, Malformed::Vertices(e)))?;
        codec::decode_vec3_list_into(&delta.normals, &mut self.normals)
            .map_err(|e| self.malformed(kind, delta.slot, Malformed::Normals(e)))?;
        if let Some(reason) = check_mesh(&delta.triangles, self.vertices.len(), self.normals.len()) {
            return Err(self.malformed(kind, delta.slot, reason));
        }

        let backend = &mut self.backend;
        let handle = self
            .pool
            .get_or_create(kind, delta.slot, || backend.create_mesh())?;

        self.backend.clear_mesh(handle);
        self.backend.set_vertices(handle, &self.vertices);
        self.backend.set_triangles(handle, &delta.triangles);
        self.backend.set_normals(handle, &self.normals);
        self.backend.set_color(handle, codec::decode_color(delta.color));
        Ok(())
    }

    /// Replace a curve's polyline and color; touch its width only when the
    /// width actually changed.
    pub fn apply_curve(&mut self, delta: &CurveDelta) -> Result<(), SyncError> {
        let kind = GeometryKind::Curve;
        self.check_slot(kind, delta.slot)?;
        codec::decode_vec3_list_into(&delta.positions, &mut self.vertices)
            .map_err(|e| self.malformed(kind, delta.slot, Malformed::Positions(e)))?;

        let backend = &mut self.backend;
        let handle = self
            .pool
            .get_or_create(kind, delta.slot, || backend.create_curve())?;

        self.backend.set_polyline(handle, &self.vertices);
        self.backend.set_color(handle, codec::decode_color(delta.color));

        let width = delta.width * CURVE_WIDTH_FACTOR;
        if self.backend.stroke_width(handle) != width {
            self.backend.set_stroke_width(handle, width);
        }
        Ok(())
    }

    /// Replace a label's color, placement, text and size.
    pub fn apply_text(&mut self, delta: &TextDelta) -> Result<(), SyncError> {
        self.check_slot(GeometryKind::Text, delta.slot)?;
        let backend = &mut self.backend;
        let handle = self
            .pool
            .get_or_create(GeometryKind::Text, delta.slot, || backend.create_text())?;

        self.backend.set_color(handle, codec::decode_color(delta.color));
        self.backend
            .set_local_position(handle, codec::decode_vec3(delta.position));
        self.backend
            .set_local_rotation(handle, Vec3::from_array(delta.rotation));
        self.backend.set_text(handle, &delta.text);
        self.backend
            .set_font_size(handle, delta.text_size * FONT_SIZE_FACTOR);
        Ok(())
    }

    /// Destroy surplus objects of every kind whose count dropped. Returns the
    /// number of objects destroyed.
    pub fn apply_summary(&mut self, summary: &CountSummary) -> usize {
        let backend = &mut self.backend;
        GeometryKind::SHRINK_ORDER
            .iter()
            .map(|&kind| {
                let count = summary.count_for(kind) as usize;
                self.pool
                    .shrink(kind, count, |handle, delay| backend.destroy(handle, delay))
            })
            .sum()
    }

    fn check_slot(&self, kind: GeometryKind, slot: SlotIndex) -> Result<(), SyncError> {
        let gap = slot.as_usize().saturating_sub(self.pool.len(kind));
        if gap > self.max_slot_gap {
            let max_gap = self.max_slot_gap;
            return Err(self.malformed(kind, slot, Malformed::SlotGap { gap, max_gap }));
        }
        Ok(())
    }

    fn malformed(&self, kind: GeometryKind, slot: SlotIndex, reason: Malformed) -> SyncError {
        SyncError::Malformed {
            kind,
            slot,
            sizes: self.pool.sizes(),
            reason,
        }
    }
}

/// Structural checks on a decoded mesh. Returns the first problem found.
fn check_mesh(triangles: &[u32], vertex_count: usize, normal_count: usize) -> Option<Malformed> {
    if triangles.len() % 3 != 0 {
        return Some(Malformed::TriangleCount(triangles.len()));
    }
    if let Some(&index) = triangles.iter().find(|&&i| i as usize >= vertex_count) {
        return Some(Malformed::TriangleIndex {
            index,
            vertex_count,
        });
    }
    if normal_count != 0 && normal_count != vertex_count {
        return Some(Malformed::NormalCount {
            normals: normal_count,
            vertices: vertex_count,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Color;
    use crate::scene::{ObjectId, RecordingScene, Shape};

    fn engine() -> SyncEngine<RecordingScene> {
        SyncEngine::new(RecordingScene::new(), EvictionPolicy::Front, 0.01)
    }

    fn triangle_mesh(slot: u32) -> MeshDelta {
        MeshDelta {
            slot: SlotIndex(slot),
            vertices: vec![0, 0, 0, 1000, 0, 0, 0, 1000, 0],
            triangles: vec![0, 1, 2],
            normals: vec![0, 0, 1000, 0, 0, 1000, 0, 0, 1000],
            color: [0, 255, 0, 255],
        }
    }

    fn segment(slot: u32, width: f32) -> CurveDelta {
        CurveDelta {
            slot: SlotIndex(slot),
            positions: vec![0, 0, 0, 1000, 0, 0],
            color: [255, 0, 0, 255],
            width,
        }
    }

    fn handle(engine: &SyncEngine<RecordingScene>, kind: GeometryKind, slot: u32) -> ObjectId {
        *engine.pool().get(kind, SlotIndex(slot)).unwrap()
    }

    #[test]
    fn mesh_is_created_and_filled() {
        let mut engine = engine();
        engine.apply_mesh(&triangle_mesh(0)).unwrap();

        let id = handle(&engine, GeometryKind::Mesh, 0);
        let object = engine.backend().object(id).unwrap();
        assert_eq!(object.color, Color::new(0.0, 1.0, 0.0, 1.0));
        match &object.shape {
            Shape::Mesh {
                vertices,
                triangles,
                normals,
            } => {
                assert_eq!(vertices[1], Vec3::new(1.0, 0.0, 0.0));
                assert_eq!(triangles, &vec![0, 1, 2]);
                assert_eq!(normals, &vec![Vec3::Z; 3]);
            }
            other => panic!("expected mesh, got {other:?}"),
        }
    }

    #[test]
    fn mesh_update_replaces_previous_geometry() {
        let mut engine = engine();
        engine.apply_mesh(&triangle_mesh(0)).unwrap();

        let quad = MeshDelta {
            slot: SlotIndex(0),
            vertices: vec![0, 0, 0, 1000, 0, 0, 1000, 1000, 0, 0, 1000, 0],
            triangles: vec![0, 1, 2, 0, 2, 3],
            normals: vec![],
            color: [0, 0, 255, 255],
        };
        engine.apply_mesh(&quad).unwrap();

        assert_eq!(engine.pool().len(GeometryKind::Mesh), 1);
        let object = engine
            .backend()
            .object(handle(&engine, GeometryKind::Mesh, 0))
            .unwrap();
        let Shape::Mesh {
            vertices,
            triangles,
            normals,
        } = &object.shape
        else {
            panic!("expected mesh");
        };
        assert_eq!(vertices.len(), 4);
        assert_eq!(triangles.len(), 6);
        assert!(normals.is_empty());
    }

    #[test]
    fn malformed_mesh_creates_nothing() {
        let mut engine = engine();
        let mut bad = triangle_mesh(0);
        bad.triangles = vec![0, 1, 5];

        let err = engine.apply_mesh(&bad).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Malformed {
                reason: Malformed::TriangleIndex { index: 5, vertex_count: 3 },
                ..
            }
        ));
        assert_eq!(engine.pool().len(GeometryKind::Mesh), 0);
        assert_eq!(engine.backend().live_count(), 0);
    }

    #[test]
    fn malformed_errors_name_slot_kind_and_sizes() {
        let mut engine = engine();
        engine.apply_curve(&segment(0, 1.0)).unwrap();

        let mut bad = triangle_mesh(4);
        bad.vertices.push(7);
        let message = engine.apply_mesh(&bad).unwrap_err().to_string();
        assert!(message.contains("mesh packet for slot #4"), "{message}");
        assert!(message.contains("curves 1, meshes 0, texts 0"), "{message}");
        assert!(message.contains("length 10"), "{message}");
    }

    #[test]
    fn mesh_checks_triangle_and_normal_counts() {
        assert_eq!(check_mesh(&[0, 1], 3, 3), Some(Malformed::TriangleCount(2)));
        assert_eq!(
            check_mesh(&[0, 1, 2], 3, 2),
            Some(Malformed::NormalCount {
                normals: 2,
                vertices: 3
            })
        );
        assert_eq!(check_mesh(&[0, 1, 2], 3, 0), None);
        assert_eq!(check_mesh(&[], 0, 0), None);
    }

    #[test]
    fn curve_doubles_width_and_sets_points() {
        let mut engine = engine();
        engine.apply_curve(&segment(0, 2.0)).unwrap();

        let object = engine
            .backend()
            .object(handle(&engine, GeometryKind::Curve, 0))
            .unwrap();
        assert_eq!(object.color, Color::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(
            object.shape,
            Shape::Curve {
                points: vec![Vec3::ZERO, Vec3::X],
                width: 4.0
            }
        );
    }

    #[test]
    fn repeated_curve_is_idempotent_without_width_churn() {
        let mut engine = engine();
        engine.apply_curve(&segment(0, 2.0)).unwrap();
        let once = engine.backend().object(ObjectId(0)).cloned();
        assert_eq!(engine.backend().width_writes, 1);

        engine.apply_curve(&segment(0, 2.0)).unwrap();
        assert_eq!(engine.backend().object(ObjectId(0)).cloned(), once);
        assert_eq!(engine.backend().width_writes, 1);

        engine.apply_curve(&segment(0, 3.0)).unwrap();
        assert_eq!(engine.backend().width_writes, 2);
    }

    #[test]
    fn curve_with_partial_triple_is_rejected() {
        let mut engine = engine();
        let mut bad = segment(0, 1.0);
        bad.positions.pop();
        let err = engine.apply_curve(&bad).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Malformed {
                kind: GeometryKind::Curve,
                reason: Malformed::Positions(_),
                ..
            }
        ));
    }

    #[test]
    fn text_halves_size_and_passes_rotation_through() {
        let mut engine = engine();
        engine
            .apply_text(&TextDelta {
                slot: SlotIndex(0),
                text: "Layer 3".into(),
                position: [500, 1000, -250],
                rotation: [0.0, 90.0, 45.0],
                text_size: 12.0,
                color: [0, 0, 0, 255],
            })
            .unwrap();

        let object = engine
            .backend()
            .object(handle(&engine, GeometryKind::Text, 0))
            .unwrap();
        assert_eq!(
            object.shape,
            Shape::Text {
                text: "Layer 3".into(),
                position: Vec3::new(0.5, 1.0, -0.25),
                rotation: Vec3::new(0.0, 90.0, 45.0),
                font_size: 6.0,
            }
        );
        assert_eq!(object.color, Color::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn repeated_mesh_is_idempotent() {
        let mut engine = engine();
        engine.apply_mesh(&triangle_mesh(0)).unwrap();
        let once = engine.backend().object(ObjectId(0)).cloned();

        engine.apply_mesh(&triangle_mesh(0)).unwrap();
        assert_eq!(engine.backend().object(ObjectId(0)).cloned(), once);
        assert_eq!(engine.pool().len(GeometryKind::Mesh), 1);
        assert_eq!(engine.backend().live_count(), 1);
    }

    #[test]
    fn repeated_text_is_idempotent() {
        let mut engine = engine();
        let label = TextDelta {
            slot: SlotIndex(0),
            text: "Gate A".into(),
            position: [1000, 0, 0],
            rotation: [0.0, 45.0, 0.0],
            text_size: 4.0,
            color: [255, 255, 255, 255],
        };
        engine.apply_text(&label).unwrap();
        let once = engine.backend().object(ObjectId(0)).cloned();

        engine.apply_text(&label).unwrap();
        assert_eq!(engine.backend().object(ObjectId(0)).cloned(), once);
        assert_eq!(engine.pool().len(GeometryKind::Text), 1);
        assert_eq!(engine.backend().live_count(), 1);
    }

    #[test]
    fn far_slot_is_rejected_without_padding() {
        let mut engine = engine();
        engine.apply_curve(&segment(0, 1.0)).unwrap();

        let err = engine.apply_curve(&segment(2_000_000, 1.0)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Malformed {
                kind: GeometryKind::Curve,
                reason: Malformed::SlotGap {
                    gap: 1_999_999,
                    max_gap: DEFAULT_MAX_SLOT_GAP
                },
                ..
            }
        ));
        assert_eq!(engine.pool().len(GeometryKind::Curve), 1);
        assert_eq!(engine.backend().live_count(), 1);

        let err = engine.apply_mesh(&triangle_mesh(u32::MAX)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Malformed {
                reason: Malformed::SlotGap { .. },
                ..
            }
        ));
        assert_eq!(engine.pool().len(GeometryKind::Mesh), 0);
    }

    #[test]
    fn slot_gap_limit_is_inclusive() {
        let mut engine = engine().with_max_slot_gap(4);
        let mut label = TextDelta {
            slot: SlotIndex(4),
            text: "far".into(),
            position: [0, 0, 0],
            rotation: [0.0; 3],
            text_size: 1.0,
            color: [0, 0, 0, 255],
        };
        engine.apply_text(&label).unwrap();
        assert_eq!(engine.pool().len(GeometryKind::Text), 5);

        label.slot = SlotIndex(10);
        assert!(engine.apply_text(&label).is_err());
        assert_eq!(engine.pool().len(GeometryKind::Text), 5);
        assert_eq!(engine.backend().live_count(), 5);
    }

    #[test]
    fn summary_shrinks_meshes_from_the_front() {
        let mut engine = engine();
        for slot in 0..3 {
            engine.apply_mesh(&triangle_mesh(slot)).unwrap();
        }
        let survivor = handle(&engine, GeometryKind::Mesh, 2);

        let destroyed = engine.apply_summary(&CountSummary {
            curve_count: 0,
            mesh_count: 1,
            text_count: 0,
        });

        assert_eq!(destroyed, 2);
        let ids: Vec<ObjectId> = engine.backend().destroyed.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![ObjectId(0), ObjectId(1)]);
        assert_eq!(engine.pool().handles(GeometryKind::Mesh), &[survivor]);
    }

    #[test]
    fn summary_applies_curves_then_meshes_then_texts() {
        let mut engine = engine();
        engine.apply_mesh(&triangle_mesh(0)).unwrap();
        engine.apply_curve(&segment(0, 1.0)).unwrap();

        engine.apply_summary(&CountSummary::default());
        let kinds: Vec<GeometryKind> = engine.backend().destroyed.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![GeometryKind::Curve, GeometryKind::Mesh]);
    }

    #[test]
    fn creation_failure_is_reported() {
        let mut engine = engine();
        engine.backend_mut().fail_creation(GeometryKind::Curve);
        let err = engine.apply(&GeometryDelta::Curve(segment(0, 1.0))).unwrap_err();
        assert!(matches!(err, SyncError::Create(_)));
        assert!(err.to_string().contains("curve slot #0"));
    }
}
