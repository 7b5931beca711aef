//! Incremental frame reassembly.
//!
//! Bytes arrive in arbitrary pieces. The demuxer keeps a single watermark:
//! the number of buffered bytes needed before another frame can possibly be
//! complete. Until the buffer reaches it, incoming bytes are only appended.

use bytes::{Bytes, BytesMut};

use crate::error::SpdyError;
use crate::spdy_codec::{FrameHeader, MAX_FRAME_LENGTH};

/// One complete frame: parsed header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

#[derive(Debug)]
pub struct FrameDemuxer {
    buffer: BytesMut,
    threshold: usize,
    max_frame_length: u32,
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

impl FrameDemuxer {
    pub fn new(max_frame_length: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            threshold: FrameHeader::SIZE,
            max_frame_length,
        }
    }

    /// Append transport bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes that must be buffered before `next_frame` can make progress.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete frame, or `None` if more bytes are needed.
    ///
    /// A frame declaring more than the maximum length is an error and nothing
    /// is consumed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, SpdyError> {
        if self.buffer.len() < self.threshold {
            return Ok(None);
        }

        let header = FrameHeader::parse(&self.buffer)?;
        if header.datalen > self.max_frame_length {
            return Err(SpdyError::FrameTooLarge {
                length: header.datalen,
                max: self.max_frame_length,
            });
        }

        let total = header.total_size();
        if self.buffer.len() < total {
            // Suspend until the whole payload is here.
            self.threshold = total;
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total);
        let payload = frame.split_off(FrameHeader::SIZE).freeze();
        self.threshold = FrameHeader::SIZE;
        Ok(Some(Frame { header, payload }))
    }

    /// Feed raw bytes and return every frame they complete.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<Frame>, SpdyError> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.threshold = FrameHeader::SIZE;
    }
}
