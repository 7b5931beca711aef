//! Name/value header blocks.
//!
//! A block is a pair count followed by (name-length, name, value-length,
//! value) tuples, compressed with zlib. The zlib contexts live as long as the
//! connection, so every block must go through them in wire order.
//! Version 2 uses 16-bit counts and lengths, version 3 uses 32-bit ones.

use std::collections::BTreeMap;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::trace;

use crate::dictionary::{DICTIONARY, DICTIONARY_UNTERMINATED};
use crate::error::SpdyError;
use crate::spdy_codec::{PROTOCOL_VERSION_2, PROTOCOL_VERSION_3};

/// Default growth step for decompressed output.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Maximum decompressed header block size (256 KB).
/// Prevents unbounded memory growth from a hostile compressed stream.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlField {
    Method,
    Scheme,
    HostPort,
    Path,
    Version,
}

const URL_FIELDS: [UrlField; 5] = [
    UrlField::Method,
    UrlField::Scheme,
    UrlField::HostPort,
    UrlField::Path,
    UrlField::Version,
];

fn url_field_name(version: u16, field: UrlField) -> &'static str {
    match (version < PROTOCOL_VERSION_3, field) {
        (true, UrlField::Method) => "method",
        (true, UrlField::Scheme) => "scheme",
        (true, UrlField::HostPort) => "host",
        (true, UrlField::Path) => "url",
        (true, UrlField::Version) => "version",
        (false, UrlField::Method) => ":method",
        (false, UrlField::Scheme) => ":scheme",
        (false, UrlField::HostPort) => ":host",
        (false, UrlField::Path) => ":path",
        (false, UrlField::Version) => ":version",
    }
}

fn url_field_for(version: u16, name: &str) -> Option<UrlField> {
    URL_FIELDS
        .iter()
        .copied()
        .find(|field| url_field_name(version, *field) == name)
}

/// Whether `name` carries a URL field in `version`'s layout.
pub fn is_url_header(version: u16, name: &str) -> bool {
    url_field_for(version, name).is_some()
}

/// Name of the response status header for `version`.
pub fn status_header(version: u16) -> &'static str {
    if version < PROTOCOL_VERSION_3 {
        "status"
    } else {
        ":status"
    }
}

fn check_version(version: u16) -> Result<(), SpdyError> {
    match version {
        PROTOCOL_VERSION_2 | PROTOCOL_VERSION_3 => Ok(()),
        other => Err(SpdyError::UnsupportedVersion(other)),
    }
}

/// Width of the count and length fields for `version`.
fn length_width(version: u16) -> usize {
    if version < PROTOCOL_VERSION_3 {
        2
    } else {
        4
    }
}

/// The request line components carried as pseudo-headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Url {
    pub method: String,
    pub scheme: String,
    pub hostport: String,
    pub path: String,
    pub version: String,
}

impl Url {
    /// A URL is usable once method, scheme, host and path are all present.
    pub fn is_complete(&self) -> bool {
        !self.method.is_empty()
            && !self.scheme.is_empty()
            && !self.hostport.is_empty()
            && !self.path.is_empty()
    }

    fn field(&self, field: UrlField) -> &str {
        match field {
            UrlField::Method => &self.method,
            UrlField::Scheme => &self.scheme,
            UrlField::HostPort => &self.hostport,
            UrlField::Path => &self.path,
            UrlField::Version => &self.version,
        }
    }

    fn field_mut(&mut self, field: UrlField) -> &mut String {
        match field {
            UrlField::Method => &mut self.method,
            UrlField::Scheme => &mut self.scheme,
            UrlField::HostPort => &mut self.hostport,
            UrlField::Path => &mut self.path,
            UrlField::Version => &mut self.version,
        }
    }
}

/// Decoded header block: URL pseudo-headers plus every other header.
///
/// Header names keep the case they were sent with; a repeated name replaces
/// the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueBlock {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
}

impl KeyValueBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.url.is_complete()
    }

    fn pairs(&self, version: u16) -> impl Iterator<Item = (&str, &str)> {
        URL_FIELDS
            .iter()
            .map(move |field| (url_field_name(version, *field), self.url.field(*field)))
            .filter(|(_, value)| !value.is_empty())
            .chain(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Serialized (uncompressed) size for `version`.
    pub fn nbytes(&self, version: u16) -> usize {
        let width = length_width(version);
        self.pairs(version)
            .fold(width, |acc, (name, value)| acc + 2 * width + name.len() + value.len())
    }

    /// Serialize into the uncompressed tuple format.
    pub fn serialize(&self, version: u16) -> Result<Vec<u8>, SpdyError> {
        check_version(version)?;
        let width = length_width(version);
        let mut out = Vec::with_capacity(self.nbytes(version));

        let count = self.pairs(version).count();
        write_length(&mut out, width, count)?;
        for (name, value) in self.pairs(version) {
            write_length(&mut out, width, name.len())?;
            out.extend_from_slice(name.as_bytes());
            write_length(&mut out, width, value.len())?;
            out.extend_from_slice(value.as_bytes());
        }
        Ok(out)
    }

    /// Parse an uncompressed block. Every byte must be accounted for.
    pub fn deserialize(version: u16, data: &[u8]) -> Result<Self, SpdyError> {
        check_version(version)?;
        let mut reader = BlockReader {
            data,
            pos: 0,
            width: length_width(version),
        };
        let mut block = Self::new();

        let count = reader.length("pair count")?;
        for _ in 0..count {
            let name = reader.string("name")?;
            if name.is_empty() {
                return Err(SpdyError::HeaderBlock("zero-length header name".to_string()));
            }
            let value = reader.string("value")?;
            trace!("{} => {}", name, value);

            match url_field_for(version, &name) {
                Some(field) => *block.url.field_mut(field) = value,
                None => {
                    block.headers.insert(name, value);
                }
            }
        }

        if reader.pos != data.len() {
            return Err(SpdyError::HeaderBlock(format!(
                "{} trailing bytes after {} pairs",
                data.len() - reader.pos,
                count
            )));
        }
        Ok(block)
    }
}

fn write_length(out: &mut Vec<u8>, width: usize, len: usize) -> Result<(), SpdyError> {
    if width == 2 {
        let len = u16::try_from(len)
            .map_err(|_| SpdyError::HeaderBlock(format!("length {len} does not fit 16 bits")))?;
        out.extend_from_slice(&len.to_be_bytes());
    } else {
        let len = u32::try_from(len)
            .map_err(|_| SpdyError::HeaderBlock(format!("length {len} does not fit 32 bits")))?;
        out.extend_from_slice(&len.to_be_bytes());
    }
    Ok(())
}

struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
    width: usize,
}

impl BlockReader<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn length(&mut self, what: &str) -> Result<usize, SpdyError> {
        if self.remaining() < self.width {
            return Err(SpdyError::HeaderBlock(format!("truncated {what} length")));
        }
        let bytes = &self.data[self.pos..self.pos + self.width];
        self.pos += self.width;
        let len = if self.width == 2 {
            u16::from_be_bytes([bytes[0], bytes[1]]) as usize
        } else {
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        };
        Ok(len)
    }

    fn string(&mut self, what: &str) -> Result<String, SpdyError> {
        let len = self.length(what)?;
        if self.remaining() < len {
            return Err(SpdyError::HeaderBlock(format!(
                "{what} of {len} bytes overruns block ({} left)",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Connection-scoped zlib inflate context for incoming header blocks.
pub struct HeaderDecompressor {
    inner: Decompress,
    chunk_size: usize,
    max_block_size: usize,
}

impl std::fmt::Debug for HeaderDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecompressor")
            .field("total_in", &self.inner.total_in())
            .field("total_out", &self.inner.total_out())
            .finish()
    }
}

impl Default for HeaderDecompressor {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, MAX_HEADER_BLOCK_SIZE)
    }
}

impl HeaderDecompressor {
    pub fn new(chunk_size: usize, max_block_size: usize) -> Self {
        Self {
            inner: Decompress::new(true),
            chunk_size: chunk_size.max(1),
            max_block_size,
        }
    }

    /// Decompress and parse one header block.
    pub fn decode(&mut self, version: u16, payload: &[u8]) -> Result<KeyValueBlock, SpdyError> {
        check_version(version)?;
        let raw = self.inflate(payload)?;
        KeyValueBlock::deserialize(version, &raw)
    }

    /// Run `payload` through the inflate context, growing the output a chunk
    /// at a time until the input is used up.
    pub fn inflate(&mut self, payload: &[u8]) -> Result<Vec<u8>, SpdyError> {
        let mut out = Vec::new();
        let mut input = payload;

        loop {
            if out.len() > self.max_block_size {
                return Err(SpdyError::HeaderBlock(format!(
                    "decompressed block exceeds {} bytes",
                    self.max_block_size
                )));
            }
            out.reserve(self.chunk_size);

            let before_in = self.inner.total_in();
            let before_out = out.len();
            let result = self.inner.decompress_vec(input, &mut out, FlushDecompress::Sync);
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = out.len() - before_out;
            input = &input[consumed..];

            match result {
                Ok(Status::StreamEnd) => break,
                Ok(_) => {}
                Err(err) if err.needs_dictionary().is_some() => {
                    self.set_dictionary()?;
                    continue;
                }
                Err(err) => return Err(SpdyError::Compression(err.to_string())),
            }

            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
            if consumed == 0 && produced == 0 {
                if input.is_empty() {
                    break;
                }
                return Err(SpdyError::Compression("inflate made no progress".to_string()));
            }
        }

        Ok(out)
    }

    fn set_dictionary(&mut self) -> Result<(), SpdyError> {
        if self.inner.set_dictionary(DICTIONARY).is_ok() {
            return Ok(());
        }
        self.inner
            .set_dictionary(DICTIONARY_UNTERMINATED)
            .map(|_| ())
            .map_err(|err| SpdyError::Compression(format!("dictionary rejected: {err}")))
    }
}

/// Connection-scoped zlib deflate context for outgoing header blocks.
pub struct HeaderCompressor {
    inner: Compress,
    dictionary: &'static [u8],
    primed: bool,
}

impl std::fmt::Debug for HeaderCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCompressor")
            .field("total_in", &self.inner.total_in())
            .field("total_out", &self.inner.total_out())
            .finish()
    }
}

impl Default for HeaderCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderCompressor {
    pub fn new() -> Self {
        Self::with_dictionary(DICTIONARY)
    }

    pub(crate) fn with_dictionary(dictionary: &'static [u8]) -> Self {
        Self {
            inner: Compress::new(Compression::default(), true),
            dictionary,
            primed: false,
        }
    }

    /// Serialize and compress a header block. The result is complete, so the
    /// caller knows the frame length before writing the frame header.
    pub fn encode(&mut self, version: u16, block: &KeyValueBlock) -> Result<Vec<u8>, SpdyError> {
        let raw = block.serialize(version)?;
        self.deflate(&raw)
    }

    /// Push `raw` through the deflate context and sync-flush it.
    pub fn deflate(&mut self, raw: &[u8]) -> Result<Vec<u8>, SpdyError> {
        if !self.primed {
            self.inner
                .set_dictionary(self.dictionary)
                .map_err(|err| SpdyError::Compression(err.to_string()))?;
            self.primed = true;
        }

        let mut out = Vec::with_capacity(raw.len() + 64);
        let mut input = raw;
        loop {
            let before_in = self.inner.total_in();
            self.inner
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|err| SpdyError::Compression(err.to_string()))?;
            let consumed = (self.inner.total_in() - before_in) as usize;
            input = &input[consumed..];

            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
            out.reserve(DEFAULT_CHUNK_SIZE);
        }
        Ok(out)
    }
}
