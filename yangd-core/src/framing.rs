// Copyright 2024 yangd contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Length-prefixed framing for [`yangd_protocol::Message`]. A frame is a
//! 4 byte big endian length prefix followed by a msgpack-encoded message.
//! The reactor deals in raw bytes; this module is the only place that
//! understands the wire shape.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use yangd_protocol::Message;

pub const LEN_PREFIX_BYTES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame length {0} exceeds max message size {1}")]
    TooLarge(u32, u32),
    #[error("frame length is zero")]
    ZeroLength,
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),
    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Encode `msg` as a length-prefixed frame and write it to `w`.
pub fn encode_to<W: Write>(w: &mut W, msg: &Message, max_msg_size: u32) -> Result<(), FramingError> {
    let payload = rmp_serde::to_vec(msg)?;
    let len: u32 =
        payload.len().try_into().map_err(|_| FramingError::TooLarge(u32::MAX, max_msg_size))?;
    if len == 0 {
        return Err(FramingError::ZeroLength);
    }
    if len > max_msg_size {
        return Err(FramingError::TooLarge(len, max_msg_size));
    }
    w.write_u32::<BigEndian>(len)?;
    w.write_all(&payload)?;
    Ok(())
}

/// Block on `r` until a full frame is available and decode it.
pub fn decode_from<R: Read>(r: &mut R, max_msg_size: u32) -> Result<Message, FramingError> {
    let len = r.read_u32::<BigEndian>()?;
    if len == 0 {
        return Err(FramingError::ZeroLength);
    }
    if len > max_msg_size {
        return Err(FramingError::TooLarge(len, max_msg_size));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(rmp_serde::from_slice(&buf)?)
}

/// Try to split one complete frame off the front of `buf`, returning the
/// decoded message and the number of bytes that made it up. Used by the
/// reactor, which accumulates bytes from a non-blocking socket and can't
/// assume a full frame is available yet.
///
/// `Ok(None)` means "keep reading", distinct from a decode error.
pub fn try_extract_frame(
    buf: &[u8],
    max_msg_size: u32,
) -> Result<Option<(Message, usize)>, FramingError> {
    if buf.len() < LEN_PREFIX_BYTES {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len == 0 {
        return Err(FramingError::ZeroLength);
    }
    if len > max_msg_size {
        return Err(FramingError::TooLarge(len, max_msg_size));
    }
    let total = LEN_PREFIX_BYTES + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let msg = rmp_serde::from_slice(&buf[LEN_PREFIX_BYTES..total])?;
    Ok(Some((msg, total)))
}

/// Encode `msg` into a freshly-allocated length-prefixed buffer, for
/// handing off to the reactor's per-connection output queue.
pub fn encode(msg: &Message, max_msg_size: u32) -> Result<Vec<u8>, FramingError> {
    let mut buf = Vec::new();
    encode_to(&mut buf, msg, max_msg_size)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yangd_protocol::{Operation, Request};

    fn sample_message() -> Message {
        Message::Request(Request {
            session_id: 7,
            operation: Operation::GetItem { xpath: "/m:a/b".into() },
        })
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let msg = sample_message();
        let mut buf = Vec::new();
        encode_to(&mut buf, &msg, yangd_protocol::MAX_MSG_SIZE).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let decoded = decode_from(&mut cursor, yangd_protocol::MAX_MSG_SIZE).unwrap();
        match decoded {
            Message::Request(r) => assert_eq!(r.session_id, 7),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn zero_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(0).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let err = decode_from::<io::Cursor<Vec<u8>>>(&mut cursor, yangd_protocol::MAX_MSG_SIZE)
            .unwrap_err();
        assert!(matches!(err, FramingError::ZeroLength));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(yangd_protocol::MAX_MSG_SIZE + 1).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let err = decode_from::<io::Cursor<Vec<u8>>>(&mut cursor, yangd_protocol::MAX_MSG_SIZE)
            .unwrap_err();
        assert!(matches!(err, FramingError::TooLarge(_, _)));
    }

    #[test]
    fn try_extract_frame_waits_for_full_buffer() {
        let msg = sample_message();
        let buf = encode(&msg, yangd_protocol::MAX_MSG_SIZE).unwrap();

        assert!(try_extract_frame(&buf[..2], yangd_protocol::MAX_MSG_SIZE).unwrap().is_none());

        let (decoded, consumed) =
            try_extract_frame(&buf, yangd_protocol::MAX_MSG_SIZE).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        match decoded {
            Message::Request(r) => assert_eq!(r.session_id, 7),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn try_extract_frame_rejects_zero_length() {
        let buf = [0u8, 0, 0, 0];
        let err = try_extract_frame(&buf, yangd_protocol::MAX_MSG_SIZE).unwrap_err();
        assert!(matches!(err, FramingError::ZeroLength));
    }
}
