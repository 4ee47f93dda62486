use std::io;

use thiserror::Error;

use crate::protocol::options::Fault;

/// Errors surfaced by the protocol engine.
///
/// Recoverable protocol outcomes ([Error::Nack], [Error::Timeout]) are
/// distinct variants so callers can match on them; contract violations
/// (bad waveform characters, id/value count mismatch) come back as
/// [Error::Validation].
#[derive(Debug, Error)]
pub enum Error {
    /// A frame failed its CRC check or arrived without a terminator.
    #[error("bad frame: {0}")]
    Frame(&'static str),
    /// The device replied with something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The device explicitly refused a request.
    #[error("device sent nack")]
    Nack,
    /// No (valid) response arrived within the poll budget.
    #[error("timed out waiting for response")]
    Timeout,
    /// The caller handed the engine arguments it cannot encode.
    #[error("validation error: {0}")]
    Validation(String),
    /// A fault bit was set while arming. Faults are surfaced, never
    /// auto-cleared.
    #[error("hardware fault during arm: {0:?}")]
    HardwareFault(Vec<Fault>),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
