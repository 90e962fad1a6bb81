use crate::protocol::ProtocolError;
use thiserror::Error;

/// Transport-level failures of the command bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("command bus closed")]
    Closed,

    #[error("failed to encode command: {0}")]
    Encode(#[from] ProtocolError),
}

/// Errors surfaced by harness infrastructure and test procedures.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Publishing was refused because the abort latch is set.
    #[error("safety abort in progress, command refused")]
    Aborted,

    #[error("no chassis feedback: {0}")]
    NoFeedback(String),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    /// Infrastructure faults end the whole run; everything else is scoped to one test.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, HarnessError::Bus(_))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
