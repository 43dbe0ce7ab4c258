//! Data-plane frames and the writer seam
//!
//! Wire encoding lives outside this crate; frames here are already decoded.

use crate::auth::AuthorizationToken;
use std::fmt;

pub type StreamId = u64;
pub type CorrelationId = u64;

/// A single stream-opening header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Begin-of-stream metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Begin {
    pub stream_id: StreamId,
    /// Name of the peer that opened the stream
    pub source: String,
    /// Route reference; `0` marks a reply stream
    pub source_ref: u64,
    pub correlation_id: CorrelationId,
    pub authorization: AuthorizationToken,
    pub headers: Vec<Header>,
}

impl Begin {
    pub fn is_reply(&self) -> bool {
        self.source_ref == 0
    }

    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|h| (h.name.as_str(), h.value.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Begin(Begin),
    Data { payload: Vec<u8>, extension: Vec<u8> },
    End { extension: Vec<u8> },
    Abort,
    Window { credit_bytes: u32, credit_frames: u32 },
    Reset,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Begin(_) => "begin",
            Frame::Data { .. } => "data",
            Frame::End { .. } => "end",
            Frame::Abort => "abort",
            Frame::Window { .. } => "window",
            Frame::Reset => "reset",
        }
    }
}

/// Addresses one leg: the peer by name and the stream within it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub name: String,
    pub stream_id: StreamId,
}

impl StreamHandle {
    pub fn new(name: impl Into<String>, stream_id: StreamId) -> Self {
        Self {
            name: name.into(),
            stream_id,
        }
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.stream_id)
    }
}

/// Emits frames on a stream. Implementations hold no conversation state.
pub trait Writer: Send + Sync {
    fn write(&self, stream: &StreamHandle, frame: Frame);

    fn begin(&self, stream: &StreamHandle, begin: Begin) {
        self.write(stream, Frame::Begin(begin));
    }

    fn data(&self, stream: &StreamHandle, payload: Vec<u8>, extension: Vec<u8>) {
        self.write(stream, Frame::Data { payload, extension });
    }

    fn end(&self, stream: &StreamHandle, extension: Vec<u8>) {
        self.write(stream, Frame::End { extension });
    }

    fn abort(&self, stream: &StreamHandle) {
        self.write(stream, Frame::Abort);
    }

    fn window(&self, stream: &StreamHandle, credit_bytes: u32, credit_frames: u32) {
        self.write(stream, Frame::Window { credit_bytes, credit_frames });
    }

    fn reset(&self, stream: &StreamHandle) {
        self.write(stream, Frame::Reset);
    }
}
