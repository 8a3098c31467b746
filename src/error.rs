use std::io;

use thiserror::Error;

use crate::protocol::PeerId;

#[derive(Error, Debug)]
pub enum Error {
    /// A line that is not a valid envelope. Never fatal to a session.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("send failed")]
    SendFailed(#[source] io::Error),
    #[error("receive failed")]
    ReceiveFailed(#[source] io::Error),
    #[error("registration failed: {0}")]
    RegistrationFailed(String),
    #[error("target peer not found: {0}")]
    TargetNotFound(PeerId),
    #[error(transparent)]
    Core(#[from] holepunch_core::error::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the session that produced this error can keep reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::MalformedEnvelope(_) | Error::TargetNotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
