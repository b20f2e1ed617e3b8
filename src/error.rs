//! Error taxonomy for status checks and storage writes.
//!
//! A [`ProviderError`] is transient from the platform's point of view: it
//! says the check failed, not that the build failed. A [`StorageError`]
//! during run creation is fatal; anywhere else it is reported against the
//! single platform whose write failed.

use crate::model::BuildStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure talking to the platform API.
    #[error("request to {platform} API failed: {source}")]
    Transport {
        platform: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The platform answered with a non-success HTTP status.
    #[error("{platform} API returned HTTP {status}: {body}")]
    Api {
        platform: &'static str,
        status: u16,
        body: String,
    },

    /// Credentials were rejected (HTTP 401/403).
    #[error("{platform} API rejected credentials (HTTP {status})")]
    Auth { platform: &'static str, status: u16 },

    /// The response body did not match the expected shape.
    #[error("could not decode {platform} API response: {detail}")]
    Decode {
        platform: &'static str,
        detail: String,
    },

    #[error("no credentials configured for {0}")]
    MissingCredentials(&'static str),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not connect to database: {0}")]
    Connect(String),

    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("no platform build record with id {0}")]
    NotFound(i64),

    /// A completion write carried `in_progress`.
    #[error("build record {id} cannot be completed with non-terminal status {status}")]
    NonTerminalCompletion { id: i64, status: BuildStatus },

    /// A terminal record was asked to move to a different terminal status.
    #[error("build record {id} is already {existing}, refusing to rewrite as {attempted}")]
    TerminalConflict {
        id: i64,
        existing: BuildStatus,
        attempted: BuildStatus,
    },
}
