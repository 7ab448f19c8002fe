use std::fmt;
use thiserror::Error;

use crate::config::ValidationError;
use crate::service::ServiceError;
use crate::shipper::partition::RecordTooLarge;

/// Stream setup step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    CreateGroup,
    PutRetentionPolicy,
    CreateStream,
    DescribeStream,
    StartMarker,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStep::CreateGroup => "create log group",
            SetupStep::PutRetentionPolicy => "put retention policy",
            SetupStep::CreateStream => "create log stream",
            SetupStep::DescribeStream => "describe log stream",
            SetupStep::StartMarker => "write start marker",
        })
    }
}

#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("record of {size} bytes exceeds the {limit} byte batch limit")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("shipper has not been started")]
    NotStarted,

    #[error("start may only be called once")]
    AlreadyStarted,

    #[error("shipper is stopped")]
    Stopped,

    #[error("stream setup failed at {step}: {source}")]
    Setup {
        step: SetupStep,
        #[source]
        source: ServiceError,
    },

    #[error("write rejected: {0}")]
    WriteRejected(ServiceError),

    #[error("write failed: {0}")]
    Transport(ServiceError),

    #[error("failed to encode log entry: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ShipperError {
    /// Programmer errors: calls made in the wrong lifecycle state
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ShipperError::NotStarted | ShipperError::AlreadyStarted | ShipperError::Stopped
        )
    }

    /// Errors that no amount of waiting or retrying will fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShipperError::Config(_) | ShipperError::RecordTooLarge { .. } | ShipperError::Setup { .. }
        )
    }

    pub(crate) fn setup(step: SetupStep) -> impl FnOnce(ServiceError) -> Self {
        move |source| ShipperError::Setup { step, source }
    }
}

impl From<RecordTooLarge> for ShipperError {
    fn from(err: RecordTooLarge) -> Self {
        ShipperError::RecordTooLarge {
            size: err.size,
            limit: err.limit,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShipperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ShipperError::AlreadyStarted.is_usage_error());
        assert!(ShipperError::NotStarted.is_usage_error());
        assert!(!ShipperError::AlreadyStarted.is_fatal());

        let setup = ShipperError::setup(SetupStep::CreateStream)(ServiceError::Transport(
            "reset".into(),
        ));
        assert!(setup.is_fatal());
        assert_eq!(
            setup.to_string(),
            "stream setup failed at create log stream: transport error: reset"
        );

        let oversized: ShipperError = RecordTooLarge { size: 10, limit: 5 }.into();
        assert!(oversized.is_fatal());
        assert!(!ShipperError::Transport(ServiceError::Unavailable("x".into())).is_fatal());
    }
}
