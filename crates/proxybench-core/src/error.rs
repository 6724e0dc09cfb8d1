use std::time::Duration;

use serde::Serialize;

use crate::http::timing::PhaseTimings;

#[derive(Debug, thiserror::Error)]
pub enum ProxyBenchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("TLS setup error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Proxy not found: {0}")]
    ProxyNotFound(String),
}

impl Serialize for ProxyBenchError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Why a single trial did not produce a successful response.
///
/// Trial errors never unwind the executor; they are folded into the trial's
/// [`PhaseTimings`] and counted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrialError {
    /// Proxy or target unreachable, or the connection dropped mid-exchange.
    #[error("connection error: {0}")]
    Connection(String),

    /// SOCKS5 negotiation or authentication rejected.
    #[error("SOCKS5 handshake error: {0}")]
    Handshake(String),

    #[error("TLS error: {0}")]
    Tls(String),

    /// The response arrived but its status is outside 200..400.
    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The target URL cannot be requested at all.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl Serialize for TrialError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A failed trial: the error plus whatever timing was captured before it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct TrialFailure {
    pub timings: PhaseTimings,
    pub error: TrialError,
}
