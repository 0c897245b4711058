//! Length-prefixed JSON framing for the TCP channels.
//!
//! ```text
//! ┌──────────────────┬─────────────────────┐
//! │ Length (4 bytes) │ JSON payload        │
//! │ Big-endian u32   │ (variable size)     │
//! └──────────────────┴─────────────────────┘
//! ```
//!
//! JSON keeps the wire debuggable with nothing more than `nc`; the
//! daemon serves a single LAN client, so compactness is not a concern.
//! Oversized frames close the connection.

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// Upper bound on a single frame
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Serialize `msg` and write it as one frame
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let payload = serde_json::to_vec(msg).map_err(|e| Error::Serialization(e.to_string()))?;
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len)?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame and deserialize it.
///
/// Returns `Ok(None)` when the read timed out before a length prefix
/// arrived, so callers can poll their shutdown flag.
pub fn read_frame<R: Read, T: DeserializeOwned>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Ok(None);
        }
        Err(e) => return Err(Error::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Serialization(format!("frame too large: {len} bytes")));
    }

    buffer.clear();
    buffer.resize(len, 0);
    reader.read_exact(buffer)?;

    serde_json::from_slice(buffer)
        .map(Some)
        .map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::messages::{CommandReply, RigCommand};

    #[test]
    fn frame_round_trip() {
        let mut wire = Vec::new();
        write_frame(
            &mut wire,
            &RigCommand::StartMotor {
                motor: 1,
                direction: "front".to_string(),
            },
        )
        .unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut buffer = Vec::new();
        let decoded: RigCommand = read_frame(&mut cursor, &mut buffer).unwrap().unwrap();
        assert!(matches!(
            decoded,
            RigCommand::StartMotor { motor: 1, ref direction } if direction == "front"
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(u32::MAX).to_be_bytes());
        wire.extend_from_slice(b"junk");
        let mut cursor = std::io::Cursor::new(wire);
        let mut buffer = Vec::new();
        let result: Result<Option<CommandReply>> = read_frame(&mut cursor, &mut buffer);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
