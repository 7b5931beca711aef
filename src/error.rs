//! Error types shared by the codec, the session and the stream gateway.

/// Broad classes of failure, used to decide whether an error ends the
/// connection or only the stream it occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Truncated or oversized frames. Fatal to the connection.
    Framing,
    /// Bad stream ids, unsupported versions, incomplete URLs. Answered per stream.
    Protocol,
    /// Header-block decompression or layout failures. Fatal to the connection
    /// because the shared zlib context can no longer be trusted.
    Codec,
    /// DNS or origin failures, turned into synthesized HTTP responses.
    Upstream,
}

/// Errors produced while decoding, encoding or dispatching SPDY frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpdyError {
    /// Not enough bytes for a fixed-size structure.
    #[error("short {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// A frame declared a payload longer than the configured maximum.
    #[error("frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: u32, max: u32 },

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A SYN_STREAM carried a version we do not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// The decompressed name/value block was malformed.
    #[error("header block error: {0}")]
    HeaderBlock(String),

    /// zlib reported a failure.
    #[error("compression error: {0}")]
    Compression(String),

    /// The session was already torn down.
    #[error("session closed")]
    SessionClosed,

    /// An upstream operation failed.
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

impl SpdyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Truncated { .. } | Self::FrameTooLarge { .. } | Self::SessionClosed => {
                ErrorKind::Framing
            }
            Self::Protocol(_) | Self::UnsupportedVersion(_) => ErrorKind::Protocol,
            Self::HeaderBlock(_) | Self::Compression(_) => ErrorKind::Codec,
            Self::Upstream(_) => ErrorKind::Upstream,
        }
    }

    /// True if the error must close the whole connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Framing | ErrorKind::Codec)
    }

    pub(crate) fn truncated(what: &'static str, needed: usize, available: usize) -> Self {
        Self::Truncated {
            what,
            needed,
            available,
        }
    }
}

/// Failure reported by the host for a resolution or origin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("host name resolution failed")]
    ResolveFailed,
    #[error("origin connection failed")]
    ConnectFailed,
    #[error("origin timed out")]
    Timeout,
    #[error("origin connection reset")]
    Reset,
}

impl UpstreamError {
    /// The HTTP status a proxy answers with for this failure.
    pub fn http_status(self) -> http::StatusCode {
        match self {
            Self::Timeout => http::StatusCode::GATEWAY_TIMEOUT,
            _ => http::StatusCode::BAD_GATEWAY,
        }
    }
}
