//! Error types for the GBXRemote client

use crate::transport::TransportState;
use shared::CursorError;
use std::fmt;
use thiserror::Error;

/// Low-level failures on the connection. Every one of these leaves the
/// transport closed; the caller has to reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport timed out during {operation}")]
    Timeout { operation: &'static str },

    #[error("wrong low-level protocol header length {0}")]
    HandshakeTooLong(u32),

    #[error("wrong low-level protocol header {received:?}")]
    BadHandshake { received: String },

    #[error("request too large: {size} bytes (max {max})")]
    RequestTooLarge { size: usize, max: usize },

    #[error("response too large: {size} bytes (max {max})")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("malformed frame header: size {size}, handle 0x{handle:08X}")]
    MalformedFrame { size: u32, handle: u32 },

    #[error("connection interrupted after {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    #[error("transport not ready (state {0:?})")]
    NotReady(TransportState),

    #[error("transport is closed")]
    Closed,

    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// XML-RPC encoding and decoding failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("XML error at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("unexpected element <{found}>, expected {expected}")]
    UnexpectedElement { expected: &'static str, found: String },

    #[error("unknown value type <{0}>")]
    UnknownType(String),

    #[error("invalid {kind} value {text:?}")]
    InvalidScalar { kind: &'static str, text: String },

    #[error("double {0} cannot be represented in XML-RPC")]
    NonFiniteDouble(f64),

    #[error("missing <{0}> element")]
    MissingElement(&'static str),

    #[error("unexpected end of document")]
    UnexpectedEof,
}

/// Application-level error reported by the server inside a well-formed response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct RpcFault {
    pub code: i32,
    pub message: String,
    pub method: Option<String>,
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)?;
        if let Some(method) = &self.method {
            write!(f, " (in {})", method)?;
        }
        Ok(())
    }
}

impl RpcFault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            method: None,
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }
}

/// Result of a client call: the connection broke, the XML was bad, or the
/// server said no.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Fault(#[from] RpcFault),
}

impl RpcError {
    /// Returns the server fault, if this is one
    pub fn fault(&self) -> Option<&RpcFault> {
        match self {
            RpcError::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    /// True when the connection can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}
