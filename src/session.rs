//! One client connection.
//!
//! A session reassembles frames from the client byte stream, dispatches them
//! in arrival order, and owns every stream opened on the connection along
//! with the connection's two zlib contexts. Errors that leave the framing or
//! the shared decompression state untrustworthy close the whole session;
//! everything else is answered on the stream it concerns.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::GatewayConfig;
use crate::demux::{Frame, FrameDemuxer};
use crate::error::SpdyError;
use crate::gateway::{Command, SessionId, StreamEvent};
use crate::header_block::HeaderDecompressor;
use crate::protocol::Outbound;
use crate::spdy_codec::{
    control_type, control_type_name, status_code, status_code_name, FrameKind, GoAway, RstStream,
    SynReply, SynStream,
};
use crate::stream::{Phase, Stream, StreamState};

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: GatewayConfig,
    demux: FrameDemuxer,
    decompressor: HeaderDecompressor,
    out: Outbound,
    streams: HashMap<u32, Stream>,
    last_stream_id: u32,
    closed: bool,
}

impl Session {
    pub fn new(id: SessionId, config: GatewayConfig) -> Self {
        Self {
            id,
            demux: FrameDemuxer::new(config.max_frame_length),
            decompressor: HeaderDecompressor::new(config.inflate_chunk_size, config.max_header_block_size),
            out: Outbound::new(id, config.max_frame_length),
            config,
            streams: HashMap::new(),
            last_stream_id: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Highest stream id accepted from the client.
    pub fn last_stream_id(&self) -> u32 {
        self.last_stream_id
    }

    /// Buffered bytes needed before the next frame can be dispatched.
    pub fn threshold(&self) -> usize {
        self.demux.threshold()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_phase(&self, stream_id: u32) -> Option<Phase> {
        self.streams.get(&stream_id).map(Stream::phase)
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(Stream::state)
    }

    pub fn has_output(&self) -> bool {
        self.out.has_output()
    }

    /// Client-bound bytes written since the last call.
    pub fn take_output(&mut self) -> Bytes {
        self.out.take_output()
    }

    /// Host operations requested since the last call, in order.
    pub fn take_commands(&mut self) -> Vec<Command> {
        self.out.take_commands()
    }

    /// Feed client bytes and dispatch every frame they complete.
    ///
    /// On a fatal error the session is closed and the error returned; frames
    /// dispatched before it stay dispatched.
    pub fn receive(&mut self, data: &[u8]) -> Result<(), SpdyError> {
        if self.closed {
            return Err(SpdyError::SessionClosed);
        }

        self.demux.extend(data);
        loop {
            let result = match self.demux.next_frame() {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => return Ok(()),
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                if err.is_fatal() {
                    self.fail(&err);
                    return Err(err);
                }
                debug!(session = %self.id, %err, "frame rejected");
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Result<(), SpdyError> {
        let header = frame.header;
        match header.kind {
            FrameKind::Control { version, frame_type } => {
                debug!(
                    session = %self.id,
                    version,
                    frame = control_type_name(frame_type),
                    flags = header.flags,
                    len = header.datalen,
                    "control frame"
                );
                match frame_type {
                    control_type::SYN_STREAM => self.on_syn_stream(version, header.is_fin(), &frame.payload),
                    control_type::RST_STREAM => self.on_rst_stream(&frame.payload),
                    control_type::SYN_REPLY | control_type::HEADERS => {
                        self.skip_header_block(version, frame_type, &frame.payload)
                    }
                    control_type::GOAWAY => {
                        let goaway = GoAway::parse(&frame.payload)?;
                        debug!(
                            session = %self.id,
                            last_stream_id = goaway.last_stream_id,
                            status = goaway.status_code,
                            "peer going away"
                        );
                        Ok(())
                    }
                    control_type::SETTINGS
                    | control_type::NOOP
                    | control_type::PING
                    | control_type::WINDOW_UPDATE => Ok(()),
                    other => {
                        debug!(session = %self.id, frame_type = other, "ignoring unknown control frame");
                        Ok(())
                    }
                }
            }
            FrameKind::Data { stream_id } => {
                let Some(stream) = self.streams.get_mut(&stream_id).filter(|s| s.is_open()) else {
                    debug!(session = %self.id, stream_id, "DATA for unknown stream ignored");
                    return Ok(());
                };
                trace!(session = %self.id, stream_id, len = frame.payload.len(), "client DATA");
                let result = stream.on_client_data(&mut self.out, &frame.payload, header.is_fin());
                if stream.is_closed() {
                    self.streams.remove(&stream_id);
                }
                result
            }
        }
    }

    fn valid_client_stream_id(&self, stream_id: u32) -> bool {
        stream_id != 0 && stream_id % 2 == 1 && stream_id > self.last_stream_id
    }

    fn on_syn_stream(&mut self, version: u16, fin: bool, payload: &[u8]) -> Result<(), SpdyError> {
        let syn = SynStream::parse(payload)?;

        if !self.config.supports_version(version) {
            // The header block layout is unknown, so it cannot be inflated.
            warn!(session = %self.id, version, stream_id = syn.stream_id, "unsupported SPDY version");
            self.out
                .send_rst_stream(self.config.default_version, syn.stream_id, status_code::PROTOCOL_ERROR)?;
            return Err(SpdyError::UnsupportedVersion(version));
        }

        // Inflate before anything else so the shared context stays in step.
        let block = self.decompressor.decode(version, &payload[SynStream::SIZE..])?;
        trace!(
            session = %self.id,
            stream_id = syn.stream_id,
            pairs = block.headers.len(),
            url = ?block.url,
            "SYN_STREAM headers"
        );

        if !self.valid_client_stream_id(syn.stream_id) {
            self.out
                .send_rst_stream(version, syn.stream_id, status_code::PROTOCOL_ERROR)?;
            return Err(SpdyError::Protocol(format!(
                "invalid stream id {} after {}",
                syn.stream_id, self.last_stream_id
            )));
        }
        self.last_stream_id = syn.stream_id;

        debug!(
            session = %self.id,
            stream_id = syn.stream_id,
            priority = syn.priority,
            method = %block.url.method,
            host = %block.url.hostport,
            path = %block.url.path,
            "new stream"
        );
        let mut stream = Stream::new(syn.stream_id, version, block, &self.config);
        stream.start(&mut self.out, &self.config, fin)?;
        if !stream.is_closed() {
            self.streams.insert(syn.stream_id, stream);
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, payload: &[u8]) -> Result<(), SpdyError> {
        let rst = RstStream::parse(payload)?;
        debug!(
            session = %self.id,
            stream_id = rst.stream_id,
            status = status_code_name(rst.status_code),
            "RST_STREAM"
        );
        if let Some(mut stream) = self.streams.remove(&rst.stream_id) {
            stream.cancel(&mut self.out);
        }
        Ok(())
    }

    /// Inflate and discard a header block we do not act on.
    fn skip_header_block(&mut self, version: u16, frame_type: u16, payload: &[u8]) -> Result<(), SpdyError> {
        if !self.config.supports_version(version) {
            return Ok(());
        }
        let reply = SynReply::parse(version, payload)?;
        let raw = self
            .decompressor
            .inflate(&payload[SynReply::size(version)..])?;
        debug!(
            session = %self.id,
            stream_id = reply.stream_id,
            frame = control_type_name(frame_type),
            len = raw.len(),
            "header block ignored"
        );
        Ok(())
    }

    /// Route a host completion to its stream, if the stream is still alive.
    pub fn handle_event(&mut self, event: StreamEvent) -> Result<(), SpdyError> {
        let key = event.key();
        if self.closed || key.session != self.id {
            warn!(session = %self.id, stream_id = key.stream_id, event = event.name(), "dropping event for dead session");
            return Ok(());
        }
        let Some(stream) = self.streams.get_mut(&key.stream_id) else {
            warn!(session = %self.id, stream_id = key.stream_id, event = event.name(), "dropping event for dead stream");
            return Ok(());
        };
        if !stream.is_open() {
            warn!(session = %self.id, stream_id = key.stream_id, event = event.name(), "dropping event for closed stream");
            return Ok(());
        }

        let out = &mut self.out;
        let result = match event {
            StreamEvent::Resolved { result, .. } => stream.on_resolved(out, &self.config, result),
            StreamEvent::OriginWritable { .. } => stream.on_origin_writable(out),
            StreamEvent::OriginData { data, .. } => stream.on_origin_data(out, &data),
            StreamEvent::OriginEof { .. } => stream.on_origin_eof(out),
            StreamEvent::OriginFailed { error, .. } => stream.on_origin_failed(out, error),
        };
        if stream.is_closed() {
            self.streams.remove(&key.stream_id);
        }

        if let Err(err) = result {
            if err.is_fatal() {
                self.fail(&err);
            }
            return Err(err);
        }
        Ok(())
    }

    fn fail(&mut self, err: &SpdyError) {
        warn!(session = %self.id, %err, "closing session");
        let goaway = self
            .out
            .send_goaway(self.config.default_version, self.last_stream_id, status_code::PROTOCOL_ERROR);
        if let Err(goaway_err) = goaway {
            warn!(session = %self.id, err = %goaway_err, "GOAWAY not sent");
        }
        self.close();
    }

    /// Close every stream, queueing cancellation for anything pending.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut ids: Vec<u32> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.cancel(&mut self.out);
            }
        }
        self.demux.reset();
        debug!(session = %self.id, "session closed");
    }
}
