// Length-delimited framing for the geometry stream.
//
// Every frame is a 4-byte big-endian payload length followed by a JSON
// document. `write_frame`/`read_frame` move raw bytes only; the typed helpers
// `send`/`recv` add serde_json on top so both ends of the socket agree on
// one encoding.
//
// Mesh frames are the largest traffic on the wire. `MAX_FRAME_LEN` (64 MB)
// bounds allocation for a corrupted or hostile length prefix while leaving
// room for dense meshes.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Errors produced while framing or parsing a message.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge { len: usize },
    #[error("stream closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// True for errors after which the stream position is still on a frame
    /// boundary, so the reader may continue with the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Json(_))
    }
}

/// Write one frame: length prefix, then payload, then flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = payload.len();
    let prefix = match u32::try_from(len) {
        Ok(n) if n <= MAX_FRAME_LEN => n.to_be_bytes(),
        _ => return Err(FrameError::TooLarge { len }),
    };
    writer.write_all(&prefix)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. A clean EOF before the length prefix maps to
/// `FrameError::Closed`; EOF inside a frame stays an I/O error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: len as usize });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Serialize `msg` to JSON and write it as one frame.
pub fn send<W: Write, M: Serialize>(writer: &mut W, msg: &M) -> Result<(), FrameError> {
    let json = serde_json::to_vec(msg)?;
    write_frame(writer, &json)
}

/// Read one frame and parse it as `M`.
pub fn recv<R: Read, M: DeserializeOwned>(reader: &mut R) -> Result<M, FrameError> {
    let payload = read_frame(reader)?;
    Ok(serde_json::from_slice(&payload)?)
}
