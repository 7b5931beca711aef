//! Outbound side of a session: client-bound frames and host commands.
//!
//! Streams write through [`Outbound`] instead of holding a reference to their
//! session, so the session can lend it out while it also borrows the stream.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::SpdyError;
use crate::gateway::{Command, SessionId, StreamKey};
use crate::header_block::{HeaderCompressor, KeyValueBlock};
use crate::http1::error_block;
use crate::spdy_codec::{
    control_type, create_data_frame, create_goaway, create_rst_stream, flags, status_code_name,
    FrameHeader, SynReply,
};

#[derive(Debug)]
pub(crate) struct Outbound {
    session: SessionId,
    output: BytesMut,
    compressor: HeaderCompressor,
    commands: VecDeque<Command>,
    max_frame_length: u32,
}

impl Outbound {
    pub(crate) fn new(session: SessionId, max_frame_length: u32) -> Self {
        Self {
            session,
            output: BytesMut::new(),
            compressor: HeaderCompressor::new(),
            commands: VecDeque::new(),
            max_frame_length: max_frame_length.max(1),
        }
    }

    pub(crate) fn key(&self, stream_id: u32) -> StreamKey {
        StreamKey::new(self.session, stream_id)
    }

    pub(crate) fn command(&mut self, command: Command) {
        trace!(session = %self.session, ?command, "queue command");
        self.commands.push_back(command);
    }

    pub(crate) fn send_rst_stream(&mut self, version: u16, stream_id: u32, status: u32) -> Result<(), SpdyError> {
        debug!(
            session = %self.session,
            stream_id,
            status = status_code_name(status),
            "send RST_STREAM"
        );
        self.output
            .extend_from_slice(&create_rst_stream(version, stream_id, status)?);
        Ok(())
    }

    pub(crate) fn send_goaway(&mut self, version: u16, last_stream_id: u32, status: u32) -> Result<(), SpdyError> {
        debug!(session = %self.session, last_stream_id, status, "send GOAWAY");
        self.output
            .extend_from_slice(&create_goaway(version, last_stream_id, status)?);
        Ok(())
    }

    /// Compress `block` and write a SYN_REPLY carrying it.
    ///
    /// The block is compressed before anything is written, since the frame
    /// header has to declare the compressed length.
    pub(crate) fn send_syn_reply(
        &mut self,
        version: u16,
        stream_id: u32,
        block: &KeyValueBlock,
    ) -> Result<(), SpdyError> {
        let compressed = self.compressor.encode(version, block)?;
        let prefix = SynReply::size(version);
        let datalen = u32::try_from(prefix + compressed.len()).unwrap_or(u32::MAX);

        let mut frame = vec![0u8; FrameHeader::SIZE + prefix];
        FrameHeader::control(version, control_type::SYN_REPLY, 0, datalen).marshall(&mut frame)?;
        SynReply { stream_id }.marshall(version, &mut frame[FrameHeader::SIZE..])?;

        debug!(
            session = %self.session,
            stream_id,
            headers = block.headers.len(),
            datalen,
            "send SYN_REPLY"
        );
        self.output.extend_from_slice(&frame);
        self.output.extend_from_slice(&compressed);
        Ok(())
    }

    /// Write `data` as one or more data frames no longer than the maximum
    /// frame length. With `fin`, the last frame carries FIN; an empty `data`
    /// then yields a single empty FIN frame.
    pub(crate) fn send_data(&mut self, stream_id: u32, data: &[u8], fin: bool) -> Result<(), SpdyError> {
        if data.is_empty() {
            if fin {
                self.output
                    .extend_from_slice(&create_data_frame(stream_id, flags::FIN, &[])?);
            }
            return Ok(());
        }

        let mut chunks = data.chunks(self.max_frame_length as usize).peekable();
        while let Some(chunk) = chunks.next() {
            let frame_flags = if fin && chunks.peek().is_none() {
                flags::FIN
            } else {
                0
            };
            trace!(session = %self.session, stream_id, len = chunk.len(), "send DATA");
            self.output
                .extend_from_slice(&create_data_frame(stream_id, frame_flags, chunk)?);
        }
        Ok(())
    }

    /// A synthesized response: SYN_REPLY with only a status, then an empty
    /// FIN frame.
    pub(crate) fn send_status(
        &mut self,
        version: u16,
        stream_id: u32,
        status: http::StatusCode,
    ) -> Result<(), SpdyError> {
        debug!(session = %self.session, stream_id, %status, "synthesized response");
        self.send_syn_reply(version, stream_id, &error_block(version, status))?;
        self.send_data(stream_id, &[], true)
    }

    pub(crate) fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub(crate) fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    pub(crate) fn take_commands(&mut self) -> Vec<Command> {
        self.commands.drain(..).collect()
    }
}
