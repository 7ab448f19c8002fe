//! HTTP client for a CloudWatch-Logs-compatible endpoint
//!
//! Speaks the JSON 1.1 flavour of the API: every operation is a POST to the
//! endpoint root with an `X-Amz-Target` header naming the operation, and
//! failures carry an error code in the `__type` field of the body. Requests
//! are not signed; point this at an endpoint that accepts unsigned requests
//! (a local emulator or a signing proxy) and use `transport.headers` for any
//! credentials the endpoint expects.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{LogStreamService, PutOutcome, Result, ServiceError, StreamDescription};
use crate::config::TransportConfig;
use crate::record::{LogRecord, WriteToken};

const TARGET_HEADER: &str = "x-amz-target";
const TARGET_PREFIX: &str = "Logs_20140328";
const AMZ_JSON: &str = "application/x-amz-json-1.1";
const USER_AGENT: &str = concat!("logship/", env!("CARGO_PKG_VERSION"));

/// Log service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpLogService {
    client: Client,
    endpoint: String,
}

impl HttpLogService {
    /// Build a client from the transport section of the configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| ServiceError::Transport("no endpoint configured".to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ServiceError::Transport(format!("invalid header name {name}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ServiceError::Transport(format!("invalid value for {name}: {e}")))?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<B, R>(&self, operation: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ServiceError::Transport(format!("failed to encode {operation}: {e}")))?;

        debug!(operation, size = payload.len(), endpoint = %self.endpoint, "Calling log service");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, AMZ_JSON)
            .header(TARGET_HEADER, format!("{TARGET_PREFIX}.{operation}"))
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Transport(format!("{operation} timed out"))
                } else {
                    ServiceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Transport(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(classify(status, &bytes));
        }

        let body: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        serde_json::from_slice(body).map_err(|e| {
            ServiceError::Transport(format!("malformed {operation} response: {e}"))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
    #[serde(rename = "expectedSequenceToken")]
    expected_sequence_token: Option<WriteToken>,
}

/// Map an unsuccessful response onto the service error taxonomy
fn classify(status: StatusCode, body: &[u8]) -> ServiceError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    // Codes may arrive namespaced, e.g. "com.amazonaws.logs#ThrottlingException"
    let code = parsed.kind.rsplit('#').next().unwrap_or_default();
    let message = parsed.message;

    match code {
        "ResourceAlreadyExistsException" => ServiceError::AlreadyExists(message),
        "ResourceNotFoundException" => ServiceError::NotFound(message),
        "InvalidSequenceTokenException" => ServiceError::SequenceConflict {
            expected: parsed.expected_sequence_token,
        },
        "DataAlreadyAcceptedException" => ServiceError::AlreadyAccepted {
            expected: parsed.expected_sequence_token,
        },
        "ThrottlingException" | "ServiceUnavailableException" => {
            ServiceError::Unavailable(format!("{code}: {message}"))
        }
        _ if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            ServiceError::Unavailable(format!("HTTP {}: {message}", status.as_u16()))
        }
        "" => ServiceError::Rejected {
            code: format!("HTTP {}", status.as_u16()),
            message,
        },
        _ => ServiceError::Rejected {
            code: code.to_string(),
            message,
        },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetentionRequest<'a> {
    log_group_name: &'a str,
    retention_in_days: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeResponse {
    #[serde(default)]
    log_streams: Vec<StreamEntry>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry {
    log_stream_name: String,
    upload_sequence_token: Option<WriteToken>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [LogRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a WriteToken>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutResponse {
    next_sequence_token: Option<WriteToken>,
    rejected_log_events_info: Option<RejectedEvents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectedEvents {
    too_new_log_event_start_index: Option<usize>,
    too_old_log_event_end_index: Option<usize>,
    expired_log_event_end_index: Option<usize>,
}

#[async_trait]
impl LogStreamService for HttpLogService {
    async fn create_group(&self, group: &str) -> Result<()> {
        let _: IgnoredAny = self
            .call("CreateLogGroup", &GroupRequest { log_group_name: group })
            .await?;
        Ok(())
    }

    async fn put_retention_policy(&self, group: &str, days: u32) -> Result<()> {
        let request = RetentionRequest {
            log_group_name: group,
            retention_in_days: days,
        };
        let _: IgnoredAny = self.call("PutRetentionPolicy", &request).await?;
        Ok(())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<()> {
        let request = StreamRequest {
            log_group_name: group,
            log_stream_name: stream,
        };
        let _: IgnoredAny = self.call("CreateLogStream", &request).await?;
        Ok(())
    }

    async fn describe_streams(&self, group: &str, prefix: &str) -> Result<Vec<StreamDescription>> {
        let mut streams = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let request = DescribeRequest {
                log_group_name: group,
                log_stream_name_prefix: prefix,
                next_token: page_token.as_deref(),
            };
            let page: DescribeResponse = self.call("DescribeLogStreams", &request).await?;

            streams.extend(page.log_streams.into_iter().map(|entry| StreamDescription {
                name: entry.log_stream_name,
                upload_token: entry.upload_sequence_token,
            }));

            match page.next_token {
                Some(next) if page_token.as_deref() != Some(next.as_str()) => {
                    page_token = Some(next)
                }
                _ => break,
            }
        }

        Ok(streams)
    }

    async fn put_records(
        &self,
        group: &str,
        stream: &str,
        records: &[LogRecord],
        token: Option<&WriteToken>,
    ) -> Result<PutOutcome> {
        let request = PutRequest {
            log_group_name: group,
            log_stream_name: stream,
            log_events: records,
            sequence_token: token,
        };
        let response: PutResponse = self.call("PutLogEvents", &request).await?;

        if let Some(rejected) = response.rejected_log_events_info {
            warn!(
                group,
                stream,
                too_new_from = ?rejected.too_new_log_event_start_index,
                too_old_until = ?rejected.too_old_log_event_end_index,
                expired_until = ?rejected.expired_log_event_end_index,
                "Service dropped part of a batch"
            );
        }

        if response.next_sequence_token.is_none() {
            debug!(group, stream, "Put response carried no sequence token");
        }

        Ok(PutOutcome {
            next_token: response.next_sequence_token,
        })
    }
}
