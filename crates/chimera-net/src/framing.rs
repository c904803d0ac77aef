//! Wire frames for the message router
//!
//! Layout, little-endian:
//! ```text
//! u8  forward_flag
//! i32 forward_rank     (meaningful only when forward_flag is set)
//! i32 message_type
//! u64 body_length
//! [body_length bytes]
//! ```

use crate::error::{NetError, Result};
use std::io::{Read, Write};

/// Upper bound on a single frame body; a header claiming more than this is
/// corrupt, not large.
pub const MAX_FRAME_BYTES: u64 = 1 << 30;

const HEADER_BYTES: usize = 1 + 4 + 4 + 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub forward: bool,
    pub forward_rank: i32,
    pub message_type: i32,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(message_type: i32, body: Vec<u8>) -> Self {
        Self {
            forward: false,
            forward_rank: 0,
            message_type,
            body,
        }
    }

    pub fn forwarded(final_target: i32, message_type: i32, body: Vec<u8>) -> Self {
        Self {
            forward: true,
            forward_rank: final_target,
            message_type,
            body,
        }
    }

    pub fn write_to(&self, sink: &mut impl Write) -> Result<()> {
        if self.body.len() as u64 > MAX_FRAME_BYTES {
            return Err(NetError::FrameTooLarge(self.body.len() as u64));
        }
        let mut header = [0u8; HEADER_BYTES];
        header[0] = self.forward as u8;
        header[1..5].copy_from_slice(&self.forward_rank.to_le_bytes());
        header[5..9].copy_from_slice(&self.message_type.to_le_bytes());
        header[9..17].copy_from_slice(&(self.body.len() as u64).to_le_bytes());
        sink.write_all(&header)?;
        sink.write_all(&self.body)?;
        Ok(())
    }

    pub fn read_from(source: &mut impl Read) -> Result<Frame> {
        let mut header = [0u8; HEADER_BYTES];
        source.read_exact(&mut header)?;
        let forward = header[0] != 0;
        let forward_rank = i32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let message_type = i32::from_le_bytes([header[5], header[6], header[7], header[8]]);
        let body_length = u64::from_le_bytes([
            header[9], header[10], header[11], header[12], header[13], header[14], header[15],
            header[16],
        ]);
        if body_length > MAX_FRAME_BYTES {
            return Err(NetError::FrameTooLarge(body_length));
        }
        let mut body = vec![0u8; body_length as usize];
        source.read_exact(&mut body)?;
        Ok(Frame {
            forward,
            forward_rank,
            message_type,
            body,
        })
    }
}
