//! Error taxonomy for the collection path.
//!
//! Startup failures (invalid configuration, unreachable store) are reported
//! through `config::ConfigError` and `anyhow` in the binary and are fatal.
//! Read-path errors live next to the HTTP layer in [`crate::api`].

use thiserror::Error;

/// Why a delegation listing could not be retrieved or understood.
///
/// The collector treats every variant the same way (the validator is skipped
/// for this cycle); the variants exist so the logs say what went wrong.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed delegations payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("non-numeric amount {amount:?} for delegator {delegator}")]
    Amount { delegator: String, amount: String },

    #[error("unexpected denom {found:?} for delegator {delegator} (expected {expected:?})")]
    Denom {
        delegator: String,
        expected: String,
        found: String,
    },

    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("pagination returned already visited key {0:?}")]
    RepeatedPageKey(String),
}

impl FetchError {
    /// Transient failures worth another attempt within the same fetch.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Failure while collecting one validator during a poll cycle.
///
/// Each variant aborts the remaining work for that validator only; snapshots
/// already written in the cycle stay in place.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("fetch failed for validator {validator}: {cause}")]
    FetchFailed {
        validator: String,
        #[source]
        cause: FetchError,
    },

    #[error("lookup of latest snapshot failed for {validator}/{delegator}: {cause:#}")]
    LookupFailed {
        validator: String,
        delegator: String,
        cause: anyhow::Error,
    },

    #[error(
        "persist failed for {validator}/{delegator} after {written} snapshots: {cause:#}"
    )]
    PersistFailed {
        validator: String,
        delegator: String,
        written: usize,
        cause: anyhow::Error,
    },
}

impl CollectError {
    pub fn validator(&self) -> &str {
        match self {
            CollectError::FetchFailed { validator, .. }
            | CollectError::LookupFailed { validator, .. }
            | CollectError::PersistFailed { validator, .. } => validator,
        }
    }
}
