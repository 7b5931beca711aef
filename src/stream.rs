//! Per-stream gateway state machine.
//!
//! Each accepted SYN_STREAM becomes a [`Stream`] that walks through the HTTP
//! leg one phase at a time:
//!
//! ```text
//! ResolvingHost -> SendingHeaders -> ReceivingHeaders -> ReceivingContent -> Closed
//! ```
//!
//! Any phase can jump straight to `Closed` on a reset or failure. Handlers
//! check the current phase before acting, and an event that does not belong
//! to the phase is dropped.

use std::net::IpAddr;

use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, trace, warn};

use crate::config::GatewayConfig;
use crate::error::{SpdyError, UpstreamError};
use crate::gateway::Command;
use crate::header_block::KeyValueBlock;
use crate::http1::{
    build_request, check_request, origin_address, response_block, split_host_port, BodyDecoder, RequestBody,
    ResponseParser,
};
use crate::protocol::Outbound;
use crate::spdy_codec::status_code;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Inactive,
    Open,
    Closed,
}

/// Which step of the HTTP leg is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolvingHost,
    SendingHeaders,
    ReceivingHeaders,
    ReceivingContent,
    Closed,
}

#[derive(Debug)]
pub(crate) struct Stream {
    stream_id: u32,
    version: u16,
    state: StreamState,
    phase: Phase,
    block: KeyValueBlock,
    request_body: RequestBody,
    /// Framed client DATA held until the request head goes out
    pending_body: Vec<u8>,
    max_pending_body: usize,
    client_fin: bool,
    origin_open: bool,
    parser: ResponseParser,
    body: Option<BodyDecoder>,
}

impl Stream {
    pub(crate) fn new(stream_id: u32, version: u16, block: KeyValueBlock, config: &GatewayConfig) -> Self {
        Self {
            stream_id,
            version,
            state: StreamState::Inactive,
            phase: Phase::ResolvingHost,
            block,
            request_body: RequestBody::Empty,
            pending_body: Vec::new(),
            max_pending_body: config.max_pending_body,
            client_fin: false,
            origin_open: false,
            parser: ResponseParser::new(config.max_response_headers, config.max_response_head_size),
            body: None,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == StreamState::Open
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    fn enter(&mut self, phase: Phase) {
        debug!(stream_id = self.stream_id, from = ?self.phase, to = ?phase, "stream phase");
        self.phase = phase;
    }

    fn close(&mut self) {
        self.enter(Phase::Closed);
        self.state = StreamState::Closed;
    }

    /// Answer with a synthesized status and close.
    fn fail_with(&mut self, out: &mut Outbound, status: StatusCode) -> Result<(), SpdyError> {
        self.release_origin(out);
        self.close();
        out.send_status(self.version, self.stream_id, status)
    }

    fn release_origin(&mut self, out: &mut Outbound) {
        if self.origin_open {
            self.origin_open = false;
            out.command(Command::CloseOrigin {
                stream: out.key(self.stream_id),
            });
        }
    }

    /// Begin processing a freshly accepted stream.
    pub(crate) fn start(&mut self, out: &mut Outbound, config: &GatewayConfig, fin: bool) -> Result<(), SpdyError> {
        self.client_fin = fin;

        if !self.block.is_complete() {
            warn!(stream_id = self.stream_id, url = ?self.block.url, "incomplete URL in SYN_STREAM");
            return self.fail_with(out, StatusCode::BAD_REQUEST);
        }
        if let Err(err) = check_request(&self.block) {
            warn!(stream_id = self.stream_id, %err, "unusable request in SYN_STREAM");
            return self.fail_with(out, StatusCode::BAD_REQUEST);
        }
        if !config.supports_method(&self.block.url.method) {
            debug!(stream_id = self.stream_id, method = %self.block.url.method, "unsupported method");
            return self.fail_with(out, StatusCode::METHOD_NOT_ALLOWED);
        }

        self.request_body = RequestBody::for_request(&self.block, fin);
        self.state = StreamState::Open;
        self.enter(Phase::ResolvingHost);
        let (host, _) = split_host_port(&self.block.url.hostport);
        out.command(Command::Resolve {
            stream: out.key(self.stream_id),
            host: host.to_string(),
        });
        Ok(())
    }

    pub(crate) fn on_resolved(
        &mut self,
        out: &mut Outbound,
        config: &GatewayConfig,
        result: Result<IpAddr, UpstreamError>,
    ) -> Result<(), SpdyError> {
        if !self.in_phase(Phase::ResolvingHost, "resolved") {
            return Ok(());
        }
        match result {
            Ok(ip) => {
                let addr = origin_address(&self.block.url, ip, config.default_origin_port);
                debug!(stream_id = self.stream_id, %addr, "host resolved");
                self.enter(Phase::SendingHeaders);
                self.origin_open = true;
                out.command(Command::Connect {
                    stream: out.key(self.stream_id),
                    addr,
                });
                Ok(())
            }
            Err(err) => {
                debug!(stream_id = self.stream_id, host = %self.block.url.hostport, %err, "resolution failed");
                self.fail_with(out, err.http_status())
            }
        }
    }

    pub(crate) fn on_origin_writable(&mut self, out: &mut Outbound) -> Result<(), SpdyError> {
        if self.phase != Phase::SendingHeaders {
            // Writability is level-triggered on some hosts; later reports mean nothing.
            trace!(stream_id = self.stream_id, phase = ?self.phase, "origin writable");
            return Ok(());
        }

        let request = build_request(&self.block, self.request_body);
        trace!(
            stream_id = self.stream_id,
            "origin request:\n{}",
            String::from_utf8_lossy(&request)
        );
        out.command(Command::SendOrigin {
            stream: out.key(self.stream_id),
            data: Bytes::from(request),
        });
        if !self.pending_body.is_empty() {
            out.command(Command::SendOrigin {
                stream: out.key(self.stream_id),
                data: Bytes::from(std::mem::take(&mut self.pending_body)),
            });
        }
        self.enter(Phase::ReceivingHeaders);
        Ok(())
    }

    pub(crate) fn on_origin_data(&mut self, out: &mut Outbound, data: &[u8]) -> Result<(), SpdyError> {
        match self.phase {
            Phase::ReceivingHeaders => self.receive_headers(out, data),
            Phase::ReceivingContent => self.relay_body(out, data),
            _ => {
                self.in_phase(Phase::ReceivingHeaders, "origin-data");
                Ok(())
            }
        }
    }

    fn receive_headers(&mut self, out: &mut Outbound, data: &[u8]) -> Result<(), SpdyError> {
        let mut input = data.to_vec();
        loop {
            let (head, excess) = match self.parser.parse(&input) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(()),
                Err(err) => {
                    warn!(stream_id = self.stream_id, %err, "bad origin response");
                    return self.fail_with(out, StatusCode::BAD_GATEWAY);
                }
            };

            if (100..200).contains(&head.status) {
                debug!(stream_id = self.stream_id, status = head.status, "skipping interim response");
                input = excess;
                continue;
            }

            debug!(stream_id = self.stream_id, status = head.status, headers = head.headers.len(), "origin response");
            let reply = response_block(self.version, &head);
            out.send_syn_reply(self.version, self.stream_id, &reply)?;
            self.body = Some(BodyDecoder::for_response(&self.block.url.method, &head));
            self.enter(Phase::ReceivingContent);
            return self.relay_body(out, &excess);
        }
    }

    fn relay_body(&mut self, out: &mut Outbound, data: &[u8]) -> Result<(), SpdyError> {
        let Some(decoder) = self.body.as_mut() else {
            return Ok(());
        };

        let mut chunk = Vec::with_capacity(data.len());
        match decoder.decode(data, &mut chunk) {
            Ok(finished) => {
                out.send_data(self.stream_id, &chunk, false)?;
                if finished {
                    debug!(stream_id = self.stream_id, "response complete");
                    out.send_data(self.stream_id, &[], true)?;
                    self.release_origin(out);
                    self.close();
                }
                Ok(())
            }
            Err(err) => {
                warn!(stream_id = self.stream_id, %err, "bad origin body");
                self.reset_client(out)
            }
        }
    }

    pub(crate) fn on_origin_eof(&mut self, out: &mut Outbound) -> Result<(), SpdyError> {
        self.origin_open = false;
        match self.phase {
            Phase::ReceivingContent => {
                let complete = self
                    .body
                    .as_ref()
                    .map_or(true, |b| matches!(b, BodyDecoder::UntilEof) || b.is_finished());
                if complete {
                    self.close();
                    out.send_data(self.stream_id, &[], true)
                } else {
                    warn!(stream_id = self.stream_id, "origin closed mid-body");
                    self.reset_client(out)
                }
            }
            Phase::SendingHeaders | Phase::ReceivingHeaders => {
                debug!(stream_id = self.stream_id, "origin closed before response");
                self.fail_with(out, StatusCode::BAD_GATEWAY)
            }
            _ => {
                self.in_phase(Phase::ReceivingContent, "origin-eof");
                Ok(())
            }
        }
    }

    pub(crate) fn on_origin_failed(&mut self, out: &mut Outbound, error: UpstreamError) -> Result<(), SpdyError> {
        match self.phase {
            Phase::SendingHeaders | Phase::ReceivingHeaders => {
                self.origin_open = false;
                debug!(stream_id = self.stream_id, %error, "origin failed");
                self.fail_with(out, error.http_status())
            }
            Phase::ReceivingContent => {
                self.origin_open = false;
                warn!(stream_id = self.stream_id, %error, "origin failed mid-body");
                self.reset_client(out)
            }
            _ => {
                self.in_phase(Phase::SendingHeaders, "origin-failed");
                Ok(())
            }
        }
    }

    /// Request body bytes from the client.
    pub(crate) fn on_client_data(&mut self, out: &mut Outbound, data: &[u8], fin: bool) -> Result<(), SpdyError> {
        if self.client_fin {
            debug!(stream_id = self.stream_id, "DATA after FIN ignored");
            return Ok(());
        }
        self.client_fin = fin;

        let mut framed = Vec::with_capacity(data.len() + 16);
        self.request_body.encode(data, fin, &mut framed);
        if framed.is_empty() {
            return Ok(());
        }
        match self.phase {
            Phase::ResolvingHost | Phase::SendingHeaders => {
                if self.pending_body.len() + framed.len() > self.max_pending_body {
                    warn!(
                        stream_id = self.stream_id,
                        buffered = self.pending_body.len(),
                        limit = self.max_pending_body,
                        "request body over buffer limit"
                    );
                    if self.phase == Phase::ResolvingHost {
                        out.command(Command::CancelResolve {
                            stream: out.key(self.stream_id),
                        });
                    }
                    return self.fail_with(out, StatusCode::PAYLOAD_TOO_LARGE);
                }
                self.pending_body.extend_from_slice(&framed);
            }
            Phase::ReceivingHeaders | Phase::ReceivingContent if self.origin_open => {
                out.command(Command::SendOrigin {
                    stream: out.key(self.stream_id),
                    data: Bytes::from(framed),
                });
            }
            _ => trace!(stream_id = self.stream_id, len = data.len(), "DATA dropped"),
        }
        Ok(())
    }

    /// The client reset the stream, or its session is going away: cancel
    /// whatever is outstanding and close without writing anything.
    pub(crate) fn cancel(&mut self, out: &mut Outbound) {
        if self.phase == Phase::ResolvingHost && self.is_open() {
            out.command(Command::CancelResolve {
                stream: out.key(self.stream_id),
            });
        }
        self.release_origin(out);
        self.close();
    }

    /// Abort a stream whose reply already started.
    fn reset_client(&mut self, out: &mut Outbound) -> Result<(), SpdyError> {
        self.release_origin(out);
        self.close();
        out.send_rst_stream(self.version, self.stream_id, status_code::CANCEL)
    }

    fn in_phase(&self, expected: Phase, event: &'static str) -> bool {
        if self.phase == expected {
            return true;
        }
        warn!(
            stream_id = self.stream_id,
            event,
            phase = ?self.phase,
            "dropping event not valid in current phase"
        );
        false
    }
}
