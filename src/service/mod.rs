//! Remote log-stream service abstraction
//!
//! The shipper talks to the append-only log service through
//! [`LogStreamService`]. Two implementations ship with the crate:
//! [`InMemoryLogService`] (in-process, enforces write tokens, supports fault
//! injection) and [`HttpLogService`] (JSON over HTTP).

pub mod http;
pub mod memory;

pub use http::HttpLogService;
pub use memory::{InMemoryLogService, Operation, ServiceCall};

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{LogRecord, WriteToken};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("sequence token rejected (expected {})", display_token(.expected))]
    SequenceConflict { expected: Option<WriteToken> },

    #[error("batch already accepted (next token {})", display_token(.expected))]
    AlreadyAccepted { expected: Option<WriteToken> },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

fn display_token(token: &Option<WriteToken>) -> &str {
    token.as_ref().map(WriteToken::as_str).unwrap_or("none")
}

impl ServiceError {
    /// Throttling, 5xx and network faults; everything else is final
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_) | ServiceError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// One entry of a describe-streams listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub name: String,
    /// Absent for a stream that has never been written to
    pub upload_token: Option<WriteToken>,
}

/// Outcome of an accepted put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// `None` when the service no longer hands out sequence tokens
    pub next_token: Option<WriteToken>,
}

/// Operations the shipper needs from the remote log service
#[async_trait]
pub trait LogStreamService: Send + Sync {
    /// Create a log group; `AlreadyExists` when it is already there
    async fn create_group(&self, group: &str) -> Result<()>;

    /// Set the group's retention in days
    async fn put_retention_policy(&self, group: &str, days: u32) -> Result<()>;

    /// Create a stream in a group; `AlreadyExists` when it is already there
    async fn create_stream(&self, group: &str, stream: &str) -> Result<()>;

    /// List streams of a group whose names start with `prefix`
    async fn describe_streams(&self, group: &str, prefix: &str) -> Result<Vec<StreamDescription>>;

    /// Append records; `token` must be the stream's current token, or
    /// `None` for a stream that has never been written to
    async fn put_records(
        &self,
        group: &str,
        stream: &str,
        records: &[LogRecord],
        token: Option<&WriteToken>,
    ) -> Result<PutOutcome>;
}
