// Slot-addressed storage of render object handles, one list per kind.
//
// The server names objects by `(kind, slot)`. The pool mirrors that naming
// with one `Vec` per kind whose position is the slot index. Handles are
// created the first time a slot is requested and reused for every later
// delta on that slot. Nothing here talks to the renderer directly: creation
// and destruction are callbacks supplied by the engine.
//
// Shrinking follows the count summaries. When the server reports fewer
// objects of a kind than the pool holds, the surplus handles are removed and
// handed to the destroy callback with a staggered delay, so a large shrink
// does not tear down hundreds of objects in one frame. Which end of the list
// is removed is an `EvictionPolicy`; the default evicts the oldest slots.
//
// The pool is owned by the render loop and is never shared across threads.

use std::fmt;

use geo_stream_protocol::{GeometryKind, SlotIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::SceneError;

/// Which handles a shrinking count summary removes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Remove the lowest slots. The remaining handles shift down, so the
    /// server must shrink a kind by dropping its earliest objects.
    #[default]
    Front,
    /// Remove the highest slots. Surviving handles keep their slot numbers.
    Back,
}

/// Number of live handles per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSizes {
    pub meshes: usize,
    pub curves: usize,
    pub texts: usize,
}

impl fmt::Display for PoolSizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "curves {}, meshes {}, texts {}",
            self.curves, self.meshes, self.texts
        )
    }
}

#[derive(Debug, Error)]
#[error("cannot create {kind} slot {slot} (pools: {sizes}): {source}")]
pub struct PoolError {
    pub kind: GeometryKind,
    pub slot: SlotIndex,
    pub sizes: PoolSizes,
    #[source]
    pub source: SceneError,
}

/// Per-kind slot → handle store.
pub struct GeometryPool<H> {
    meshes: Vec<H>,
    curves: Vec<H>,
    texts: Vec<H>,
    eviction: EvictionPolicy,
    destroy_stagger_secs: f32,
}

impl<H> GeometryPool<H> {
    pub fn new(eviction: EvictionPolicy, destroy_stagger_secs: f32) -> Self {
        Self {
            meshes: Vec::new(),
            curves: Vec::new(),
            texts: Vec::new(),
            eviction,
            destroy_stagger_secs,
        }
    }

    /// Return the handle at `slot`, creating handles until it exists.
    ///
    /// Slots normally arrive dense and in order, so at most one handle is
    /// created. A request past the end pads the gap with fresh handles so that
    /// `slot` keeps its server-assigned position.
    pub fn get_or_create<F>(
        &mut self,
        kind: GeometryKind,
        slot: SlotIndex,
        mut create: F,
    ) -> Result<&H, PoolError>
    where
        F: FnMut() -> Result<H, SceneError>,
    {
        let wanted = slot.as_usize() + 1;
        let missing = wanted.saturating_sub(self.len(kind));
        if missing > 1 {
            log::warn!(
                "{kind} slot {slot} requested with only {} allocated; padding {} slots",
                self.len(kind),
                missing - 1
            );
        }
        for _ in 0..missing {
            match create() {
                Ok(handle) => self.list_mut(kind).push(handle),
                Err(source) => {
                    return Err(PoolError {
                        kind,
                        slot,
                        sizes: self.sizes(),
                        source,
                    });
                }
            }
        }
        Ok(&self.list(kind)[slot.as_usize()])
    }

    /// Trim `kind` down to `new_count` handles. Each removed handle is passed
    /// to `destroy` with its staggered delay in seconds. Returns how many
    /// handles were removed.
    pub fn shrink<F>(&mut self, kind: GeometryKind, new_count: usize, mut destroy: F) -> usize
    where
        F: FnMut(H, f32),
    {
        let len = self.len(kind);
        if new_count >= len {
            return 0;
        }
        let surplus = len - new_count;
        let stagger = self.destroy_stagger_secs;
        let removed: Vec<H> = match self.eviction {
            EvictionPolicy::Front => self.list_mut(kind).drain(..surplus).collect(),
            EvictionPolicy::Back => self.list_mut(kind).drain(new_count..).collect(),
        };
        for (i, handle) in removed.into_iter().enumerate() {
            destroy(handle, i as f32 * stagger);
        }
        log::debug!("{kind} pool shrank from {len} to {new_count}");
        surplus
    }

    pub fn get(&self, kind: GeometryKind, slot: SlotIndex) -> Option<&H> {
        self.list(kind).get(slot.as_usize())
    }

    pub fn handles(&self, kind: GeometryKind) -> &[H] {
        self.list(kind)
    }

    pub fn len(&self, kind: GeometryKind) -> usize {
        self.list(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.curves.is_empty() && self.texts.is_empty()
    }

    pub fn sizes(&self) -> PoolSizes {
        PoolSizes {
            meshes: self.meshes.len(),
            curves: self.curves.len(),
            texts: self.texts.len(),
        }
    }

    fn list(&self, kind: GeometryKind) -> &Vec<H> {
        match kind {
            GeometryKind::Mesh => &self.meshes,
            GeometryKind::Curve => &self.curves,
            GeometryKind::Text => &self.texts,
        }
    }

    fn list_mut(&mut self, kind: GeometryKind) -> &mut Vec<H> {
        match kind {
            GeometryKind::Mesh => &mut self.meshes,
            GeometryKind::Curve => &mut self.curves,
            GeometryKind::Text => &mut self.texts,
        }
    }
}
