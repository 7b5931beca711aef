//! Session ownership and host-facing message types.
//!
//! The gateway owns every [`Session`] in an arena keyed by [`SessionId`].
//! Asynchronous work the crate needs (name resolution, origin connections)
//! leaves as [`Command`]s; results come back as [`StreamEvent`]s. Both carry
//! a [`StreamKey`], and an event is only acted on if the session and stream
//! it names are still alive, so a late completion can never touch a stream
//! that has already been torn down.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{SpdyError, UpstreamError};
use crate::session::Session;

/// Opaque handle for one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names one stream on one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub session: SessionId,
    pub stream_id: u32,
}

impl StreamKey {
    pub fn new(session: SessionId, stream_id: u32) -> Self {
        Self { session, stream_id }
    }
}

/// Work the host performs on the crate's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Resolve `host`; answer with [`StreamEvent::Resolved`].
    Resolve { stream: StreamKey, host: String },
    /// Drop a pending resolution. No event is expected.
    CancelResolve { stream: StreamKey },
    /// Open a connection to the origin; answer with
    /// [`StreamEvent::OriginWritable`] or [`StreamEvent::OriginFailed`].
    Connect { stream: StreamKey, addr: SocketAddr },
    /// Write bytes to the origin connection.
    SendOrigin { stream: StreamKey, data: Bytes },
    /// Close the origin connection.
    CloseOrigin { stream: StreamKey },
}

impl Command {
    pub fn key(&self) -> StreamKey {
        match self {
            Self::Resolve { stream, .. }
            | Self::CancelResolve { stream }
            | Self::Connect { stream, .. }
            | Self::SendOrigin { stream, .. }
            | Self::CloseOrigin { stream } => *stream,
        }
    }
}

/// Completion of a [`Command`], fed back by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Resolved {
        stream: StreamKey,
        result: Result<IpAddr, UpstreamError>,
    },
    OriginWritable { stream: StreamKey },
    OriginData { stream: StreamKey, data: Bytes },
    OriginEof { stream: StreamKey },
    OriginFailed { stream: StreamKey, error: UpstreamError },
}

impl StreamEvent {
    pub fn key(&self) -> StreamKey {
        match self {
            Self::Resolved { stream, .. }
            | Self::OriginWritable { stream }
            | Self::OriginData { stream, .. }
            | Self::OriginEof { stream }
            | Self::OriginFailed { stream, .. } => *stream,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Resolved { .. } => "resolved",
            Self::OriginWritable { .. } => "origin-writable",
            Self::OriginData { .. } => "origin-data",
            Self::OriginEof { .. } => "origin-eof",
            Self::OriginFailed { .. } => "origin-failed",
        }
    }
}

/// Arena of live sessions.
#[derive(Debug, Default)]
pub struct Gateway {
    config: GatewayConfig,
    sessions: HashMap<SessionId, Session>,
    next_id: u64,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Start a session for a newly accepted connection.
    pub fn accept(&mut self) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(id, Session::new(id, self.config.clone()));
        debug!(session = %id, "session accepted");
        id
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Feed client bytes to a session.
    ///
    /// A fatal error leaves the session closed; the host should flush its
    /// output and commands and then call [`Gateway::close`].
    pub fn receive(&mut self, id: SessionId, data: &[u8]) -> Result<(), SpdyError> {
        let session = self.sessions.get_mut(&id).ok_or(SpdyError::SessionClosed)?;
        session.receive(data)
    }

    /// Route a completion to its stream. Events for sessions that are gone
    /// are dropped.
    pub fn handle_event(&mut self, event: StreamEvent) -> Result<(), SpdyError> {
        let key = event.key();
        match self.sessions.get_mut(&key.session) {
            Some(session) => session.handle_event(event),
            None => {
                warn!(
                    session = %key.session,
                    stream_id = key.stream_id,
                    event = event.name(),
                    "dropping event for closed session"
                );
                Ok(())
            }
        }
    }

    /// Client-bound bytes produced by a session so far.
    pub fn take_output(&mut self, id: SessionId) -> Bytes {
        self.sessions
            .get_mut(&id)
            .map(Session::take_output)
            .unwrap_or_default()
    }

    pub fn take_commands(&mut self, id: SessionId) -> Vec<Command> {
        self.sessions
            .get_mut(&id)
            .map(Session::take_commands)
            .unwrap_or_default()
    }

    /// Tear a session down. Returns whatever commands it still had queued,
    /// including cancellations for its pending operations.
    pub fn close(&mut self, id: SessionId) -> Vec<Command> {
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.close();
                debug!(session = %id, "session removed");
                session.take_commands()
            }
            None => Vec::new(),
        }
    }
}
