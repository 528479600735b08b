//! # Error Definitions
//!
//! Failures a session can surface. None of them are recoverable: a session
//! that has produced one is considered corrupt.

use crate::command::CommandId;
use crate::transport;
use crate::value::Fault;

#[derive(Debug, Clone)]
pub enum Error {
    /// A property access or invocation failed on the real object graph.
    Fault(Fault),
    /// A command referenced an id with no value in context (never issued, or disposed).
    UnknownTarget(CommandId),
    /// An event arrived for a callback id this graph never minted.
    UnknownCallback(CommandId),
    /// A command or reference path did not have the expected shape.
    Malformed(String),
    /// The stub belongs to a graph epoch that has been disposed.
    Disposed,
    /// The continuation for a fetch was dropped before a load arrived.
    ChannelClosed,
    /// The underlying transport failed.
    Transport(transport::Error),
    /// An operation needed a tokio runtime and none was running.
    NoRuntime,
    /// A single-reader port was registered twice.
    AlreadySubscribed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fault(fault) => write!(f, "Fault: {}", fault),
            Self::UnknownTarget(id) => write!(f, "No value for command {}", id),
            Self::UnknownCallback(id) => write!(f, "No local callback for command {}", id),
            Self::Malformed(msg) => write!(f, "Malformed command: {}", msg),
            Self::Disposed => write!(f, "Session was disposed"),
            Self::ChannelClosed => write!(f, "Response channel closed"),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::NoRuntime => write!(f, "No tokio runtime available"),
            Self::AlreadySubscribed => write!(f, "Port already has a reader"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fault(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Fault> for Error {
    fn from(e: Fault) -> Self {
        Self::Fault(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
