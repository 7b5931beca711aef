//! spdy-gateway: a sans-I/O SPDY to HTTP/1.1 gateway
//!
//! This crate terminates SPDY client connections and turns every SPDY stream
//! into a plain HTTP/1.1 exchange with an origin server, translating the
//! response back into SPDY frames. It never touches a socket: the host feeds
//! it client bytes and the results of the operations it asked for, and drains
//! client-bound bytes and new operation requests.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No runtime, no sockets, no threads
//! - **SPDY/2 and SPDY/3**: Frame codec, both header-block layouts
//! - **Header Compression**: Per-connection zlib contexts with the SPDY
//!   dictionary, tolerant of peers that drop its trailing NUL
//! - **Watermark Reassembly**: Frames are cut from arbitrary byte chunks
//! - **Stream State Machine**: Resolve, connect, request, relay, one explicit
//!   phase at a time
//! - **Liveness Checked Events**: Late completions for reset streams or
//!   closed sessions are dropped, never applied
//!
//! # Quick Start
//!
//! ```rust
//! use spdy_gateway::spdy_codec::{control_type, flags, FrameHeader, SynStream};
//! use spdy_gateway::{Command, Gateway, GatewayConfig, HeaderCompressor, KeyValueBlock};
//!
//! // A client opens stream 1 with GET http://example.com/
//! let mut block = KeyValueBlock::new();
//! block.url.method = "GET".into();
//! block.url.scheme = "http".into();
//! block.url.hostport = "example.com".into();
//! block.url.path = "/".into();
//! block.url.version = "HTTP/1.1".into();
//! let headers = HeaderCompressor::new().encode(3, &block).unwrap();
//!
//! let datalen = (SynStream::SIZE + headers.len()) as u32;
//! let mut frame = vec![0u8; FrameHeader::SIZE + SynStream::SIZE];
//! FrameHeader::control(3, control_type::SYN_STREAM, flags::FIN, datalen)
//!     .marshall(&mut frame)
//!     .unwrap();
//! SynStream { stream_id: 1, ..Default::default() }
//!     .marshall(&mut frame[FrameHeader::SIZE..])
//!     .unwrap();
//! frame.extend_from_slice(&headers);
//!
//! let mut gateway = Gateway::new(GatewayConfig::default());
//! let session = gateway.accept();
//! gateway.receive(session, &frame).unwrap();
//!
//! // The gateway asks the host to resolve the origin.
//! match gateway.take_commands(session).as_slice() {
//!     [Command::Resolve { host, .. }] => assert_eq!(host, "example.com"),
//!     other => panic!("unexpected commands: {other:?}"),
//! }
//! ```
//!
//! # Architecture
//!
//! - [`spdy_codec`]: frame header and fixed control-message layouts
//! - [`header_block`]: name/value blocks and the zlib contexts
//! - [`demux`]: frame reassembly
//! - [`session`]: per-connection dispatch and stream table
//! - [`stream`]: the per-stream HTTP leg
//! - [`http1`]: HTTP/1.1 request building, response parsing, body decoding
//! - [`gateway`]: session arena and the host message types
//!
//! It does NOT provide:
//! - Transport or TLS (you provide the bytes)
//! - DNS (answer [`Command::Resolve`] with [`StreamEvent::Resolved`])
//! - Flow control or SETTINGS handling

pub mod config;
pub mod demux;
pub mod dictionary;
pub mod error;
pub mod gateway;
pub mod header_block;
pub mod http1;
mod protocol;
pub mod session;
pub mod spdy_codec;
pub mod stream;

pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use demux::{Frame, FrameDemuxer};
pub use error::{ErrorKind, SpdyError, UpstreamError};
pub use gateway::{Command, Gateway, SessionId, StreamEvent, StreamKey};
pub use header_block::{HeaderCompressor, HeaderDecompressor, KeyValueBlock, Url};
pub use session::Session;
pub use spdy_codec::{
    control_type, flags, status_code, FrameHeader, FrameKind, GoAway, RstStream, SynReply,
    SynStream, MAX_FRAME_LENGTH, PROTOCOL_VERSION_2, PROTOCOL_VERSION_3,
};
pub use stream::{Phase, StreamState};
