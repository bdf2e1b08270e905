//! Error taxonomy at component seams.
//!
//! Only [`ConfigInvalid`] is fatal. Gateway and decision errors are contained
//! within the cycle that produced them.

use std::time::Duration;

use thiserror::Error;

use crate::core::decision::MalformedReply;

/// Failure talking to the content platform or the oracle.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return GatewayError::Timeout;
        }
        if err.is_decode() {
            return GatewayError::Decode(err.to_string());
        }
        GatewayError::Transport(err.to_string())
    }
}

/// Why the decision phase produced no decision.
#[derive(Debug, Error)]
pub enum DecideError {
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(#[from] GatewayError),
    #[error("oracle reply malformed: {0}")]
    OracleMalformed(#[from] MalformedReply),
    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

impl DecideError {
    pub fn label(&self) -> &'static str {
        match self {
            DecideError::OracleUnavailable(_) => "oracle_unavailable",
            DecideError::OracleMalformed(_) => "oracle_malformed",
            DecideError::Prompt(_) => "prompt",
        }
    }
}

/// Malformed persona, quota, or endpoint configuration.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid configuration:\n- {}", .problems.join("\n- "))]
pub struct ConfigInvalid {
    pub problems: Vec<String>,
}
