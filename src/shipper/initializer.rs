//! Stream setup
//!
//! Brings the destination group and stream into existence and discovers the
//! token for the first write. Every step tolerates a previous run having
//! done it already; anything else aborts startup.

use tracing::{debug, info};

use crate::config::StreamIdentity;
use crate::error::{Result, SetupStep, ShipperError};
use crate::record::{LogRecord, WriteToken};
use crate::service::{LogStreamService, ServiceError};

/// Message of the record written to a brand-new stream to obtain its first token
pub const STREAM_STARTED_MARKER: &str = "start stream";

/// Current upload token of the stream, `None` if it has never been written to.
///
/// Matches the stream name exactly; describe filters by prefix only.
pub(crate) async fn lookup_token(
    service: &dyn LogStreamService,
    identity: &StreamIdentity,
) -> std::result::Result<Option<WriteToken>, ServiceError> {
    let streams = service
        .describe_streams(&identity.group_name, &identity.stream_name)
        .await?;

    streams
        .into_iter()
        .find(|s| s.name == identity.stream_name)
        .map(|s| s.upload_token)
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "log stream {}/{}",
                identity.group_name, identity.stream_name
            ))
        })
}

/// Ensure group and stream exist, apply retention, and return the write token.
///
/// `None` only when the service accepted the start marker without issuing a
/// token, i.e. it does not sequence writes.
pub async fn initialize(
    service: &dyn LogStreamService,
    identity: &StreamIdentity,
) -> Result<Option<WriteToken>> {
    let group = identity.group_name.as_str();
    let stream = identity.stream_name.as_str();

    match service.create_group(group).await {
        Ok(()) => info!(group, "Created log group"),
        Err(ServiceError::AlreadyExists(_)) => debug!(group, "Log group already exists"),
        Err(e) => return Err(ShipperError::setup(SetupStep::CreateGroup)(e)),
    }

    service
        .put_retention_policy(group, identity.retention_days)
        .await
        .map_err(ShipperError::setup(SetupStep::PutRetentionPolicy))?;

    match service.create_stream(group, stream).await {
        Ok(()) => info!(group, stream, "Created log stream"),
        Err(ServiceError::AlreadyExists(_)) => debug!(group, stream, "Log stream already exists"),
        Err(e) => return Err(ShipperError::setup(SetupStep::CreateStream)(e)),
    }

    let existing = lookup_token(service, identity)
        .await
        .map_err(ShipperError::setup(SetupStep::DescribeStream))?;

    let token = match existing {
        Some(token) => Some(token),
        None => {
            let marker = [LogRecord::now(STREAM_STARTED_MARKER)];
            service
                .put_records(group, stream, &marker, None)
                .await
                .map_err(ShipperError::setup(SetupStep::StartMarker))?
                .next_token
        }
    };

    info!(group, stream, token = ?token, "Log stream ready");
    Ok(token)
}
