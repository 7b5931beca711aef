//! The HTTP/1.1 side of the gateway.
//!
//! Builds the origin request from a decoded SPDY header block, parses the
//! origin's response head incrementally, decodes the response body framing,
//! and turns response heads (real or synthesized) back into SPDY blocks.

use std::net::{IpAddr, SocketAddr};

use http::StatusCode;

use crate::header_block::{is_url_header, status_header, KeyValueBlock, Url};

/// Headers that are connection-specific in HTTP/1.1 and MUST NOT be sent on
/// a SPDY stream.
const HOP_BY_HOP: [&str; 4] = ["connection", "keep-alive", "proxy-connection", "transfer-encoding"];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub fn split_host_port(hostport: &str) -> (&str, Option<u16>) {
    if let Some(rest) = hostport.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (hostport, None);
    }
    match hostport.rsplit_once(':') {
        // A second colon means an unbracketed IPv6 literal with no port.
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (hostport, None),
        },
        _ => (hostport, None),
    }
}

/// Where to connect for `url` once its host resolved to `ip`.
pub fn origin_address(url: &Url, ip: IpAddr, default_port: u16) -> SocketAddr {
    let (_, port) = split_host_port(&url.hostport);
    let port = port.unwrap_or(if url.scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        default_port
    });
    SocketAddr::new(ip, port)
}

/// A request field that cannot be written into an HTTP/1.1 head.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("invalid {0} in request")]
    InvalidField(&'static str),
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

fn is_target(s: &str) -> bool {
    s.bytes().all(|b| !b.is_ascii_control() && b != b' ')
}

fn is_field_value(s: &str) -> bool {
    !s.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0'))
}

/// Reject anything that could break out of its place in the request head.
pub fn check_request(block: &KeyValueBlock) -> Result<(), RequestError> {
    let url = &block.url;
    if !is_token(&url.method) {
        return Err(RequestError::InvalidField("method"));
    }
    if !is_target(&url.path) {
        return Err(RequestError::InvalidField("path"));
    }
    if !is_target(&url.hostport) {
        return Err(RequestError::InvalidField("host"));
    }
    for (name, value) in &block.headers {
        if name.starts_with(':') {
            continue;
        }
        if !is_token(name) || !is_field_value(value) {
            return Err(RequestError::InvalidHeader(name.clone()));
        }
    }
    Ok(())
}

fn content_length(block: &KeyValueBlock) -> Option<u64> {
    block
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// How the client's DATA frames are framed toward the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBody {
    /// The SYN_STREAM carried FIN
    Empty,
    /// The client declared a length; bytes past it are dropped
    Length { remaining: u64 },
    /// One chunk per DATA frame, terminated on the client's FIN
    Chunked,
}

impl RequestBody {
    pub fn for_request(block: &KeyValueBlock, fin: bool) -> Self {
        if fin {
            return Self::Empty;
        }
        match content_length(block) {
            Some(len) => Self::Length { remaining: len },
            None => Self::Chunked,
        }
    }

    /// Frame one DATA payload, appending the wire bytes to `out`.
    pub fn encode(&mut self, data: &[u8], fin: bool, out: &mut Vec<u8>) {
        match self {
            Self::Empty => {
                if !data.is_empty() {
                    tracing::debug!(len = data.len(), "request body after FIN dropped");
                }
            }
            Self::Length { remaining } => {
                let take = data.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                if take < data.len() {
                    tracing::debug!(excess = data.len() - take, "request body past content-length dropped");
                }
                out.extend_from_slice(&data[..take]);
                *remaining -= take as u64;
            }
            Self::Chunked => {
                if !data.is_empty() {
                    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
                    out.extend_from_slice(data);
                    out.extend_from_slice(b"\r\n");
                }
                if fin {
                    out.extend_from_slice(b"0\r\n\r\n");
                }
            }
        }
    }
}

/// Serialize the request line and header section for the origin.
///
/// `block` must have passed [`check_request`].
pub fn build_request(block: &KeyValueBlock, body: RequestBody) -> Vec<u8> {
    let url = &block.url;
    let mut out = String::with_capacity(128);

    out.push_str(&url.method);
    out.push(' ');
    out.push_str(&url.path);
    out.push_str(" HTTP/1.1\r\nHost: ");
    out.push_str(&url.hostport);
    out.push_str("\r\n");

    let keep_length = matches!(body, RequestBody::Length { .. });
    for (name, value) in &block.headers {
        if name.starts_with(':') || is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
            continue;
        }
        if !keep_length && name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if body == RequestBody::Chunked {
        out.push_str("Transfer-Encoding: chunked\r\n");
    }

    // The body is relayed until the origin closes, so ask it to.
    out.push_str("Connection: close\r\n\r\n");
    out.into_bytes()
}

/// A parsed origin response status line and header section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    /// Minor HTTP version (0 or 1)
    pub minor_version: u8,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Errors reading an origin response head.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("malformed response head: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("response head exceeds {0} bytes")]
    TooLarge(usize),
}

/// Incremental response head parser.
///
/// Bytes accumulate until a blank line ends the head, up to `max_head_size`;
/// whatever follows the head is handed back as the start of the body.
#[derive(Debug)]
pub struct ResponseParser {
    buffer: Vec<u8>,
    /// Bytes already searched for the end of the head
    scanned: usize,
    max_headers: usize,
    max_head_size: usize,
}

impl ResponseParser {
    pub fn new(max_headers: usize, max_head_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_headers,
            max_head_size,
        }
    }

    fn head_ended(&self) -> bool {
        let tail = &self.buffer[self.scanned.saturating_sub(2)..];
        tail.windows(2).any(|w| w == b"\n\n") || tail.windows(3).any(|w| w == b"\n\r\n")
    }

    /// Feed bytes. Returns the head and any excess body bytes once the head
    /// is complete.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<(ResponseHead, Vec<u8>)>, ResponseError> {
        self.buffer.extend_from_slice(data);
        if !self.head_ended() {
            self.scanned = self.buffer.len();
            if self.buffer.len() > self.max_head_size {
                return Err(ResponseError::TooLarge(self.max_head_size));
            }
            return Ok(None);
        }

        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut res = httparse::Response::new(&mut headers);
        let head_len = match res.parse(&self.buffer)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_head_size {
                    return Err(ResponseError::TooLarge(self.max_head_size));
                }
                return Ok(None);
            }
        };
        if head_len > self.max_head_size {
            return Err(ResponseError::TooLarge(self.max_head_size));
        }

        let head = ResponseHead {
            status: res.code.unwrap_or(0),
            reason: res.reason.unwrap_or("").to_string(),
            minor_version: res.version.unwrap_or(1),
            headers: res
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
        };
        let excess = self.buffer.split_off(head_len);
        self.buffer.clear();
        self.scanned = 0;
        Ok(Some((head, excess)))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Errors decoding a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("malformed chunked encoding")]
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size { size: u64, digits: usize, ext: bool },
    SizeLf { size: u64 },
    Data { remaining: u64 },
    DataCr,
    DataLf,
    Trailer { empty: bool },
    TrailerLf { empty: bool },
    Done,
}

/// Response body framing, decided from the response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyDecoder {
    /// No body at all (HEAD, 1xx, 204, 304, Content-Length: 0)
    Empty,
    Length { remaining: u64 },
    Chunked(ChunkStateMachine),
    /// Everything until the origin closes
    UntilEof,
}

/// Opaque chunked-decoding state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStateMachine {
    state: ChunkState,
}

impl BodyDecoder {
    pub fn for_response(request_method: &str, head: &ResponseHead) -> Self {
        let status = head.status;
        if request_method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&status)
            || status == 204
            || status == 304
        {
            return Self::Empty;
        }

        let chunked = head
            .header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Self::Chunked(ChunkStateMachine {
                state: ChunkState::Size {
                    size: 0,
                    digits: 0,
                    ext: false,
                },
            });
        }

        match head.header("content-length").and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(0) => Self::Empty,
            Some(len) => Self::Length { remaining: len },
            None => Self::UntilEof,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Length { remaining } => *remaining == 0,
            Self::Chunked(machine) => machine.state == ChunkState::Done,
            Self::UntilEof => false,
        }
    }

    /// Decode `input`, appending body bytes to `out`. Returns true once the
    /// body is complete; bytes after the end are discarded.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<bool, BodyError> {
        match self {
            Self::Empty => {}
            Self::UntilEof => out.extend_from_slice(input),
            Self::Length { remaining } => {
                let take = input.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                out.extend_from_slice(&input[..take]);
                *remaining -= take as u64;
            }
            Self::Chunked(machine) => machine.decode(input, out)?,
        }
        Ok(self.is_finished())
    }
}

impl ChunkStateMachine {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), BodyError> {
        let mut pos = 0;
        while pos < input.len() {
            let byte = input[pos];
            self.state = match self.state {
                ChunkState::Done => return Ok(()),
                ChunkState::Data { remaining } => {
                    let take = (input.len() - pos).min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        ChunkState::DataCr
                    } else {
                        ChunkState::Data { remaining }
                    };
                    continue;
                }
                ChunkState::Size { size, digits, ext } => match byte {
                    b'\r' if digits > 0 => ChunkState::SizeLf { size },
                    b';' | b' ' | b'\t' if digits > 0 => ChunkState::Size {
                        size,
                        digits,
                        ext: true,
                    },
                    _ if ext => ChunkState::Size { size, digits, ext },
                    _ => {
                        let digit = (byte as char).to_digit(16).ok_or(BodyError::Chunked)?;
                        let size = size
                            .checked_mul(16)
                            .and_then(|s| s.checked_add(u64::from(digit)))
                            .ok_or(BodyError::Chunked)?;
                        ChunkState::Size {
                            size,
                            digits: digits + 1,
                            ext,
                        }
                    }
                },
                ChunkState::SizeLf { size } => match byte {
                    b'\n' if size == 0 => ChunkState::Trailer { empty: true },
                    b'\n' => ChunkState::Data { remaining: size },
                    _ => return Err(BodyError::Chunked),
                },
                ChunkState::DataCr => match byte {
                    b'\r' => ChunkState::DataLf,
                    _ => return Err(BodyError::Chunked),
                },
                ChunkState::DataLf => match byte {
                    b'\n' => ChunkState::Size {
                        size: 0,
                        digits: 0,
                        ext: false,
                    },
                    _ => return Err(BodyError::Chunked),
                },
                ChunkState::Trailer { empty } => match byte {
                    b'\r' => ChunkState::TrailerLf { empty },
                    _ => ChunkState::Trailer { empty: false },
                },
                ChunkState::TrailerLf { empty } => match byte {
                    b'\n' if empty => ChunkState::Done,
                    b'\n' => ChunkState::Trailer { empty: true },
                    _ => return Err(BodyError::Chunked),
                },
            };
            pos += 1;
        }
        Ok(())
    }
}

/// `"<code> <reason>"` as carried in the SPDY status header.
pub fn status_line(status: u16, fallback_reason: &str) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or(fallback_reason);
    if reason.is_empty() {
        status.to_string()
    } else {
        format!("{status} {reason}")
    }
}

/// Translate an origin response head into a SYN_REPLY header block.
pub fn response_block(version: u16, head: &ResponseHead) -> KeyValueBlock {
    let mut block = KeyValueBlock::new();
    for (name, value) in &head.headers {
        let name = name.to_ascii_lowercase();
        if is_hop_by_hop(&name) || is_url_header(version, &name) {
            tracing::debug!("skipping {} header", name);
            continue;
        }
        block.insert(name, value.clone());
    }
    block.insert(status_header(version), status_line(head.status, &head.reason));
    block.url.version = format!("HTTP/1.{}", head.minor_version);
    block
}

/// A synthesized response carrying only a status.
pub fn error_block(version: u16, status: StatusCode) -> KeyValueBlock {
    let head = ResponseHead {
        status: status.as_u16(),
        reason: String::new(),
        minor_version: 1,
        headers: Vec::new(),
    };
    response_block(version, &head)
}
