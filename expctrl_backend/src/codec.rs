//! Length-prefixed framing for the instrument TCP link.
//!
//! Frame format: `[length (4 bytes, big-endian u32)] [payload (length bytes)]`.
//!
//! Payloads are JSON-encoded [`crate::protocol`] messages. A declared length above
//! [`MAX_FRAME_LEN`] is rejected before anything is allocated, so a corrupt header cannot make the
//! reader reserve gigabytes. Zero-length frames are valid.
//!
//! ```
//! use expctrl_backend::codec::*;
//!
//! let mut wire = Vec::new();
//! write_frame(&mut wire, b"hello").unwrap();
//! assert_eq!(wire, [0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
//!
//! let mut reader = wire.as_slice();
//! assert_eq!(read_frame(&mut reader).unwrap(), Some(b"hello".to_vec()));
//! // Clean end of stream
//! assert_eq!(read_frame(&mut reader).unwrap(), None);
//! ```

use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CtrlError, CtrlResult};

/// Largest accepted payload (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Header size in bytes.
pub const HEADER_LEN: usize = 4;

/// Writes one frame and flushes the writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> CtrlResult<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(CtrlError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` if the stream ends cleanly before a header, and an `UnexpectedEof` I/O error
/// if it ends inside a header or payload.
pub fn read_frame<R: Read>(reader: &mut R) -> CtrlResult<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(CtrlError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CtrlError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Serializes `msg` to JSON and sends it as one frame.
pub fn send_msg<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> CtrlResult<()> {
    let payload = serde_json::to_vec(msg)?;
    write_frame(writer, &payload)
}

/// Receives one frame and decodes it from JSON. `Ok(None)` on clean end of stream.
pub fn recv_msg<R: Read, T: DeserializeOwned>(reader: &mut R) -> CtrlResult<Option<T>> {
    match read_frame(reader)? {
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use crate::codec::*;
    use crate::protocol::*;

    #[test]
    fn consecutive_frames() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"").unwrap();
        write_frame(&mut wire, &[1, 2, 3]).unwrap();
        assert_eq!(wire.len(), 2 * HEADER_LEN + 3);

        let mut reader = wire.as_slice();
        assert_eq!(read_frame(&mut reader).unwrap(), Some(vec![]));
        assert_eq!(read_frame(&mut reader).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_frame(&mut reader).unwrap(), None);
    }

    #[test]
    fn truncated_frames() {
        // Header cut short
        let mut reader: &[u8] = &[0, 0];
        match read_frame(&mut reader) {
            Err(CtrlError::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
        // Payload cut short
        let mut reader: &[u8] = &[0, 0, 0, 4, 1, 2];
        match read_frame(&mut reader) {
            Err(CtrlError::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
    }

    #[test]
    fn oversized_header_is_rejected() {
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut reader: &[u8] = &len;
        assert!(matches!(
            read_frame(&mut reader),
            Err(CtrlError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn json_messages() {
        let mut wire = Vec::new();
        send_msg(&mut wire, &Request::WaitUntilDone { timeout_s: 1.5 }).unwrap();
        send_msg(&mut wire, &Request::Ping).unwrap();

        let mut reader = wire.as_slice();
        let first: Option<Request> = recv_msg(&mut reader).unwrap();
        assert_eq!(first, Some(Request::WaitUntilDone { timeout_s: 1.5 }));
        let second: Option<Request> = recv_msg(&mut reader).unwrap();
        assert_eq!(second, Some(Request::Ping));
        let end: Option<Request> = recv_msg(&mut reader).unwrap();
        assert_eq!(end, None);

        // Valid frame, invalid JSON
        let mut wire = Vec::new();
        write_frame(&mut wire, b"{not json").unwrap();
        let res: CtrlResult<Option<Request>> = recv_msg(&mut wire.as_slice());
        assert!(matches!(res, Err(CtrlError::Json(_))));
    }
}
