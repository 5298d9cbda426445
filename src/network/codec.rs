//! Wire Codec
//!
//! Length-prefixed framing of [`Message`] values over a byte stream. Each
//! frame is a [`FrameHeader`] (body length + CRC32) followed by the
//! bincode body, so file payloads of any content are never split.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{FrameHeader, Message};
use crate::error::{Error, Result};

/// Default maximum frame body size (256 MiB)
pub const DEFAULT_MAX_FRAME: usize = 256 * 1024 * 1024;

/// Largest body length a [`FrameHeader`] can describe
pub const MAX_FRAME_LIMIT: usize = u32::MAX as usize;

/// Frame space reserved for the non-payload fields of a `FileData` reply
pub const FILE_DATA_OVERHEAD: usize = 1024;

/// Largest file that fits in one `FileData` frame of `max_frame` bytes
pub fn max_file_size(max_frame: usize) -> usize {
    max_frame.min(MAX_FRAME_LIMIT).saturating_sub(FILE_DATA_OVERHEAD)
}

/// Frame codec for peer connections
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    max_frame: usize,
}

impl WireCodec {
    /// Create a codec rejecting frames whose body exceeds `max_frame` bytes.
    /// Limits above [`MAX_FRAME_LIMIT`] are clamped to it.
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame: max_frame.min(MAX_FRAME_LIMIT),
        }
    }

    /// Maximum accepted frame body size
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for WireCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        let mut header_bytes = [0u8; FrameHeader::SIZE];
        header_bytes.copy_from_slice(&src[..FrameHeader::SIZE]);
        let header = FrameHeader::from_bytes(&header_bytes);
        let length = header.length as usize;

        if length > self.max_frame {
            return Err(Error::MalformedFrame(format!(
                "declared length {} exceeds maximum {}",
                length, self.max_frame
            )));
        }

        let frame_len = FrameHeader::SIZE + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(FrameHeader::SIZE);
        let body = src.split_to(length);

        if !header.verify(&body) {
            return Err(Error::MalformedFrame("checksum mismatch".into()));
        }

        Message::deserialize(&body)
            .map(Some)
            .map_err(|e| Error::MalformedFrame(format!("undecodable body: {}", e)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(Error::MalformedFrame(format!(
                "stream closed inside a frame ({} bytes buffered)",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Message> for WireCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let body = message.serialize()?;
        if body.len() > self.max_frame {
            return Err(Error::MalformedFrame(format!(
                "outgoing {} of {} bytes exceeds maximum {}",
                message.type_name(),
                body.len(),
                self.max_frame
            )));
        }

        let header = FrameHeader::new(&body);
        dst.reserve(FrameHeader::SIZE + body.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
