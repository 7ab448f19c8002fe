//! In-process log service
//!
//! Behaves like the remote service for everything the shipper relies on:
//! idempotency conflicts on create, strict token checking on put, minting a
//! first token on the first write to a new stream, and recognizing a resent
//! batch. Every call is recorded and faults can be queued per operation,
//! which makes it the backbone of the crate's tests and a drop-in for local
//! development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{LogStreamService, PutOutcome, Result, ServiceError, StreamDescription};
use crate::record::{LogRecord, WriteToken};

/// Operation selector for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateGroup,
    PutRetentionPolicy,
    CreateStream,
    DescribeStreams,
    PutRecords,
}

/// A recorded call against the service, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    CreateGroup {
        group: String,
    },
    PutRetentionPolicy {
        group: String,
        days: u32,
    },
    CreateStream {
        group: String,
        stream: String,
    },
    DescribeStreams {
        group: String,
        prefix: String,
    },
    PutRecords {
        group: String,
        stream: String,
        records: Vec<LogRecord>,
        token: Option<WriteToken>,
    },
}

#[derive(Debug, Default)]
struct StreamState {
    token: Option<WriteToken>,
    records: Vec<LogRecord>,
    /// Token the last accepted batch was written with, and the batch itself
    last_batch: Option<(Option<WriteToken>, Vec<LogRecord>)>,
}

#[derive(Debug, Default)]
struct GroupState {
    retention_days: Option<u32>,
    streams: BTreeMap<String, StreamState>,
}

#[derive(Debug, Default)]
struct State {
    groups: HashMap<String, GroupState>,
    minted: u64,
    calls: Vec<ServiceCall>,
    faults: HashMap<Operation, VecDeque<ServiceError>>,
}

impl State {
    fn mint(&mut self) -> WriteToken {
        self.minted += 1;
        WriteToken::new(format!("{:056}", self.minted))
    }

    fn take_fault(&mut self, op: Operation) -> Option<ServiceError> {
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn stream_mut(&mut self, group: &str, stream: &str) -> Result<&mut StreamState> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| ServiceError::NotFound(format!("log group {group}")))?
            .streams
            .get_mut(stream)
            .ok_or_else(|| ServiceError::NotFound(format!("log stream {group}/{stream}")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLogService {
    state: Mutex<State>,
}

impl InMemoryLogService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call to `op` fail with `error`. Faults queue up in order.
    pub fn inject_fault(&self, op: Operation, error: ServiceError) {
        self.lock().faults.entry(op).or_default().push_back(error);
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    /// Records stored in a stream, in acceptance order
    pub fn records(&self, group: &str, stream: &str) -> Vec<LogRecord> {
        self.lock()
            .groups
            .get(group)
            .and_then(|g| g.streams.get(stream))
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    pub fn retention_days(&self, group: &str) -> Option<u32> {
        self.lock().groups.get(group).and_then(|g| g.retention_days)
    }

    pub fn current_token(&self, group: &str, stream: &str) -> Option<WriteToken> {
        self.lock()
            .groups
            .get(group)
            .and_then(|g| g.streams.get(stream))
            .and_then(|s| s.token.clone())
    }

    /// Advance a stream's token as if another writer had appended to it
    pub fn advance_token(&self, group: &str, stream: &str) -> Option<WriteToken> {
        let mut state = self.lock();
        let token = state.mint();
        let target = state.stream_mut(group, stream).ok()?;
        target.token = Some(token.clone());
        target.last_batch = None;
        Some(token)
    }
}

#[async_trait]
impl LogStreamService for InMemoryLogService {
    async fn create_group(&self, group: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::CreateGroup {
            group: group.to_string(),
        });
        if let Some(err) = state.take_fault(Operation::CreateGroup) {
            return Err(err);
        }
        if state.groups.contains_key(group) {
            return Err(ServiceError::AlreadyExists(format!("log group {group}")));
        }
        state.groups.insert(group.to_string(), GroupState::default());
        Ok(())
    }

    async fn put_retention_policy(&self, group: &str, days: u32) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::PutRetentionPolicy {
            group: group.to_string(),
            days,
        });
        if let Some(err) = state.take_fault(Operation::PutRetentionPolicy) {
            return Err(err);
        }
        let target = state
            .groups
            .get_mut(group)
            .ok_or_else(|| ServiceError::NotFound(format!("log group {group}")))?;
        target.retention_days = Some(days);
        Ok(())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::CreateStream {
            group: group.to_string(),
            stream: stream.to_string(),
        });
        if let Some(err) = state.take_fault(Operation::CreateStream) {
            return Err(err);
        }
        let target = state
            .groups
            .get_mut(group)
            .ok_or_else(|| ServiceError::NotFound(format!("log group {group}")))?;
        if target.streams.contains_key(stream) {
            return Err(ServiceError::AlreadyExists(format!(
                "log stream {group}/{stream}"
            )));
        }
        target.streams.insert(stream.to_string(), StreamState::default());
        Ok(())
    }

    async fn describe_streams(&self, group: &str, prefix: &str) -> Result<Vec<StreamDescription>> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::DescribeStreams {
            group: group.to_string(),
            prefix: prefix.to_string(),
        });
        if let Some(err) = state.take_fault(Operation::DescribeStreams) {
            return Err(err);
        }
        let target = state
            .groups
            .get(group)
            .ok_or_else(|| ServiceError::NotFound(format!("log group {group}")))?;
        Ok(target
            .streams
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, stream)| StreamDescription {
                name: name.clone(),
                upload_token: stream.token.clone(),
            })
            .collect())
    }

    async fn put_records(
        &self,
        group: &str,
        stream: &str,
        records: &[LogRecord],
        token: Option<&WriteToken>,
    ) -> Result<PutOutcome> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::PutRecords {
            group: group.to_string(),
            stream: stream.to_string(),
            records: records.to_vec(),
            token: token.cloned(),
        });
        if let Some(err) = state.take_fault(Operation::PutRecords) {
            return Err(err);
        }
        let next = state.mint();
        let target = state.stream_mut(group, stream)?;

        if target.token.as_ref() != token {
            let resent = target
                .last_batch
                .as_ref()
                .is_some_and(|(sent_with, batch)| sent_with.as_ref() == token && batch == records);
            let expected = target.token.clone();
            return Err(if resent {
                ServiceError::AlreadyAccepted { expected }
            } else {
                ServiceError::SequenceConflict { expected }
            });
        }

        target.records.extend_from_slice(records);
        target.last_batch = Some((token.cloned(), records.to_vec()));
        target.token = Some(next.clone());
        Ok(PutOutcome {
            next_token: Some(next),
        })
    }
}
