//! Typed error kinds shared by the core modules.
//!
//! Device glue returns `anyhow::Result`; `NodeError` implements
//! `std::error::Error` so `?` converts it there.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// Malformed input: bad frame length, out-of-range value, empty name.
    InvalidArg,
    /// Operation not allowed in the current state (e.g. LED write with no active plugin).
    InvalidState,
    /// Unknown plugin, preset or command.
    NotFound,
    /// Allocation or capacity exhausted.
    NoMem,
    /// Payload does not fit the fixed-size buffer it is encoded into.
    BufferTooSmall,
    /// Mesh or peripheral driver failure, carries the driver's error code.
    TransportFailure(i32),
    /// Unrecoverable condition; the node restarts.
    Fatal,
}

pub type Result<T> = core::result::Result<T, NodeError>;

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::InvalidArg => write!(f, "invalid argument"),
            NodeError::InvalidState => write!(f, "invalid state"),
            NodeError::NotFound => write!(f, "not found"),
            NodeError::NoMem => write!(f, "out of memory"),
            NodeError::BufferTooSmall => write!(f, "buffer too small"),
            NodeError::TransportFailure(code) => write!(f, "transport failure (code {})", code),
            NodeError::Fatal => write!(f, "fatal error"),
        }
    }
}

impl std::error::Error for NodeError {}
