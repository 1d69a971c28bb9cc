// Decoding of the server's numeric encoding into engine-native values.
//
// The authoring server sends coordinates as integers in thousandths of a
// model unit and colors as one byte per channel. Everything here is a pure
// function: no state, no rounding beyond `f32` division, no gamma handling.
//
// Flat coordinate buffers must hold whole `x, y, z` triples. A buffer with a
// trailing partial triple is rejected rather than silently truncated, so a
// corrupted packet surfaces as an error instead of a slightly wrong mesh.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server coordinates are integers scaled by this factor.
pub const SCALE: f32 = 1000.0;

/// Linear RGBA color, each channel in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("coordinate buffer of length {len} is not a whole number of xyz triples")]
    NotTriples { len: usize },
}

/// Decode one scaled integer vector.
pub fn decode_vec3(raw: [i32; 3]) -> Vec3 {
    Vec3::new(
        raw[0] as f32 / SCALE,
        raw[1] as f32 / SCALE,
        raw[2] as f32 / SCALE,
    )
}

/// Decode a flat buffer of triples into a fresh vector.
pub fn decode_vec3_array(raw: &[i32]) -> Result<Vec<Vec3>, CodecError> {
    let mut out = Vec::with_capacity(raw.len() / 3);
    decode_vec3_list_into(raw, &mut out)?;
    Ok(out)
}

/// Decode a flat buffer of triples into `out`, replacing its contents.
///
/// Reuses `out`'s allocation, which matters for meshes that are re-sent every
/// frame. On error `out` is left empty.
pub fn decode_vec3_list_into(raw: &[i32], out: &mut Vec<Vec3>) -> Result<(), CodecError> {
    out.clear();
    if raw.len() % 3 != 0 {
        return Err(CodecError::NotTriples { len: raw.len() });
    }
    out.extend(
        raw.chunks_exact(3)
            .map(|t| decode_vec3([t[0], t[1], t[2]])),
    );
    Ok(())
}

/// Decode one byte-per-channel color.
pub fn decode_color(raw: [u8; 4]) -> Color {
    Color::new(
        channel(raw[0]),
        channel(raw[1]),
        channel(raw[2]),
        channel(raw[3]),
    )
}

fn channel(v: u8) -> f32 {
    f32::from(v) / 255.0
}
