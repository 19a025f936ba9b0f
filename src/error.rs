//! Crate-wide error type.
//!
//! Mirrors the teacher's `XdccError`: a plain enum with a manual `Display`
//! impl rather than a derive-macro error crate, since no failure here needs
//! more than a message and a tag.

use std::fmt;

#[derive(Debug, Clone)]
pub enum SessionError {
    InvalidUrl(String),
    ConnectionFailed(String),
    ChannelJoinFailed(String),
    TransferFailed(String),
    Timeout(String),
    ProtocolParse(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
            SessionError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            SessionError::ChannelJoinFailed(msg) => write!(f, "channel join failed: {}", msg),
            SessionError::TransferFailed(msg) => write!(f, "transfer failed: {}", msg),
            SessionError::Timeout(msg) => write!(f, "timeout: {}", msg),
            SessionError::ProtocolParse(msg) => write!(f, "protocol parse error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

pub type Result<T> = std::result::Result<T, SessionError>;
