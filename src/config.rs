//! Gateway configuration.

use crate::header_block::{DEFAULT_CHUNK_SIZE, MAX_HEADER_BLOCK_SIZE};
use crate::spdy_codec::{MAX_FRAME_LENGTH, PROTOCOL_VERSION_2, PROTOCOL_VERSION_3};

/// Settings shared by every session a [`Gateway`](crate::Gateway) accepts.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Frames declaring a longer payload close the connection. Outgoing data
    /// is split into frames no longer than this.
    pub max_frame_length: u32,

    /// SYN_STREAM versions we accept
    pub supported_versions: Vec<u16>,

    /// Version used for connection-level resets when the peer's is unusable
    pub default_version: u16,

    /// Request methods forwarded to the origin; others get a 405
    pub supported_methods: Vec<String>,

    /// Origin port when the host carries none (https uses 443)
    pub default_origin_port: u16,

    /// Growth step for decompressed header blocks
    pub inflate_chunk_size: usize,

    /// Ceiling on a decompressed header block
    pub max_header_block_size: usize,

    /// Header slots available when parsing an origin response
    pub max_response_headers: usize,

    /// Ceiling on an origin response head; larger heads get a 502
    pub max_response_head_size: usize,

    /// Request body held while the origin is not yet connected; more gets a 413
    pub max_pending_body: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_frame_length: MAX_FRAME_LENGTH,
            supported_versions: vec![PROTOCOL_VERSION_2, PROTOCOL_VERSION_3],
            default_version: PROTOCOL_VERSION_3,
            supported_methods: vec!["GET".to_string()],
            default_origin_port: 80,
            inflate_chunk_size: DEFAULT_CHUNK_SIZE,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
            max_response_headers: 64,
            max_response_head_size: 64 * 1024,
            max_pending_body: 64 * 1024,
        }
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    pub fn supports_version(&self, version: u16) -> bool {
        self.supported_versions.contains(&version)
    }

    pub fn supports_method(&self, method: &str) -> bool {
        self.supported_methods.iter().any(|m| m == method)
    }
}

/// Builder for [`GatewayConfig`]
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn max_frame_length(mut self, length: u32) -> Self {
        self.config.max_frame_length = length.min(MAX_FRAME_LENGTH);
        self
    }

    pub fn supported_versions(mut self, versions: Vec<u16>) -> Self {
        self.config.supported_versions = versions;
        self
    }

    pub fn default_version(mut self, version: u16) -> Self {
        self.config.default_version = version;
        self
    }

    pub fn supported_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_origin_port(mut self, port: u16) -> Self {
        self.config.default_origin_port = port;
        self
    }

    pub fn inflate_chunk_size(mut self, size: usize) -> Self {
        self.config.inflate_chunk_size = size;
        self
    }

    pub fn max_header_block_size(mut self, size: usize) -> Self {
        self.config.max_header_block_size = size;
        self
    }

    pub fn max_response_headers(mut self, count: usize) -> Self {
        self.config.max_response_headers = count;
        self
    }

    pub fn max_response_head_size(mut self, size: usize) -> Self {
        self.config.max_response_head_size = size;
        self
    }

    pub fn max_pending_body(mut self, size: usize) -> Self {
        self.config.max_pending_body = size;
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}
