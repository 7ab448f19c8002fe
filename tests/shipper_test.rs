//! Lifecycle and batching tests against the in-process log service

use logship::config::{MAX_REQUEST_BYTES, ShipperConfig, StreamIdentity};
use logship::humanize::ByteSize;
use logship::service::{InMemoryLogService, LogStreamService, Operation, ServiceCall, ServiceError};
use logship::shipper::initializer::STREAM_STARTED_MARKER;
use logship::shipper::partition::{BatchLimits, partition};
use logship::{LifecycleState, LogRecord, LogShipper, ShipperError, WriteToken};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{Duration, sleep, timeout};

const GROUP: &str = "orders";
const STREAM: &str = "api-7";

/// Config whose flush interval is long enough that tests drive drains by hand
fn manual_config() -> ShipperConfig {
    let mut config = ShipperConfig::builder()
        .stream(
            StreamIdentity::builder()
                .group_name(GROUP)
                .stream_name(STREAM)
                .build(),
        )
        .build();
    config.flush.interval_ms = 3_600_000;
    config.transport.retry_backoff_ms = 1;
    config
}

fn setup(config: &ShipperConfig) -> (LogShipper, Arc<InMemoryLogService>) {
    let service = Arc::new(InMemoryLogService::new());
    let shipper = LogShipper::new(config, service.clone()).expect("valid config");
    (shipper, service)
}

fn puts(service: &InMemoryLogService) -> Vec<(Option<WriteToken>, Vec<LogRecord>)> {
    service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ServiceCall::PutRecords { token, records, .. } => Some((token, records)),
            _ => None,
        })
        .collect()
}

fn count(service: &InMemoryLogService, pred: impl Fn(&ServiceCall) -> bool) -> usize {
    service.calls().iter().filter(|c| pred(c)).count()
}

#[tokio::test]
async fn test_small_batch_is_sent_with_initial_token() {
    let (shipper, service) = setup(&manual_config());
    shipper.start().await.unwrap();
    assert_eq!(shipper.state(), LifecycleState::Started);
    let initial = service.current_token(GROUP, STREAM).unwrap();

    for i in 0..3 {
        shipper.submit(LogRecord::new(format!("line {i}"), 1_000 + i)).unwrap();
    }
    assert_eq!(shipper.flush().await.unwrap(), 3);

    let sent = puts(&service);
    assert_eq!(sent.len(), 2); // marker, then the batch
    assert_eq!(sent[0].1[0].message, STREAM_STARTED_MARKER);
    assert_eq!(sent[1].0.as_ref(), Some(&initial));
    assert_eq!(sent[1].1.len(), 3);
    assert_ne!(service.current_token(GROUP, STREAM).unwrap(), initial);
    assert_eq!(shipper.pending(), 0);
}

#[tokio::test]
async fn test_oversized_record_is_rejected() {
    let (shipper, service) = setup(&manual_config());
    shipper.start().await.unwrap();

    let huge = LogRecord::new("x".repeat(2_000_000), 1);
    let err = shipper.submit(huge.clone()).unwrap_err();
    assert!(matches!(
        err,
        ShipperError::RecordTooLarge { limit, .. } if limit == MAX_REQUEST_BYTES as usize
    ));

    let too_large = partition([&huge], &BatchLimits::default()).unwrap_err();
    assert!(too_large.size > too_large.limit);

    assert_eq!(shipper.flush().await.unwrap(), 0);
    assert_eq!(puts(&service).len(), 1);
}

#[tokio::test]
async fn test_existing_stream_is_reused() {
    let (shipper, service) = setup(&manual_config());
    service.create_group(GROUP).await.unwrap();
    service.create_stream(GROUP, STREAM).await.unwrap();
    let first = service
        .put_records(GROUP, STREAM, &[LogRecord::new("earlier run", 1)], None)
        .await
        .unwrap()
        .next_token
        .unwrap();

    shipper.start().await.unwrap();
    shipper.submit(LogRecord::new("this run", 2)).unwrap();
    shipper.flush().await.unwrap();

    let sent = puts(&service);
    // No marker: the stream already had a token.
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].0.as_ref(), Some(&first));
    assert_eq!(count(&service, |c| matches!(c, ServiceCall::DescribeStreams { .. })), 1);
}

#[tokio::test]
async fn test_second_start_is_refused() {
    let (shipper, service) = setup(&manual_config());
    shipper.start().await.unwrap();

    let err = shipper.start().await.unwrap_err();
    assert!(matches!(err, ShipperError::AlreadyStarted));
    assert!(err.is_usage_error());
    assert_eq!(count(&service, |c| matches!(c, ServiceCall::CreateGroup { .. })), 1);
    assert_eq!(shipper.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_large_backlog_drains_in_token_chained_batches() {
    let record = |i: usize| LogRecord::new(format!("event-{i:04}"), 1_700_000_000_000);
    let mut config = manual_config();
    config.flush.max_batch_bytes = ByteSize((record(0).encoded_size() * 100) as u64);
    let (shipper, service) = setup(&config);
    shipper.start().await.unwrap();

    for i in 0..250 {
        shipper.submit(record(i)).unwrap();
    }

    assert_eq!(shipper.flush().await.unwrap(), 100);
    assert_eq!(shipper.pending(), 150);
    assert_eq!(shipper.flush().await.unwrap(), 100);
    assert_eq!(shipper.flush().await.unwrap(), 50);
    assert_eq!(shipper.flush().await.unwrap(), 0);

    let sent = puts(&service);
    assert_eq!(sent.len(), 4);
    let tokens: Vec<_> = sent[1..].iter().map(|(t, _)| t.clone().unwrap()).collect();
    assert_ne!(tokens[0], tokens[1]);
    assert_ne!(tokens[1], tokens[2]);

    let stored: Vec<String> = service
        .records(GROUP, STREAM)
        .into_iter()
        .skip(1)
        .map(|r| r.message)
        .collect();
    let expected: Vec<String> = (0..250).map(|i| record(i).message).collect();
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn test_flush_and_stop_delivers_everything_in_order() {
    let (shipper, service) = setup(&manual_config());
    shipper.start().await.unwrap();
    for i in 0..20 {
        shipper.submit(LogRecord::new(format!("m{i}"), i)).unwrap();
    }

    shipper.flush_and_stop().await.unwrap();

    assert_eq!(shipper.state(), LifecycleState::Stopped);
    assert_eq!(shipper.pending(), 0);
    let stored = service.records(GROUP, STREAM);
    assert_eq!(stored.len(), 21);
    assert!(stored[1..].iter().enumerate().all(|(i, r)| r.message == format!("m{i}")));
    assert!(matches!(
        shipper.submit(LogRecord::now("late")),
        Err(ShipperError::Stopped)
    ));
}

#[tokio::test]
async fn test_submit_before_start() {
    let (shipper, service) = setup(&manual_config());
    assert!(matches!(
        shipper.submit(LogRecord::now("early")),
        Err(ShipperError::NotStarted)
    ));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn test_background_loop_flushes() {
    let mut config = manual_config();
    config.flush.interval_ms = 20;
    let (shipper, service) = setup(&config);
    shipper.start().await.unwrap();
    shipper.submit(LogRecord::now("ticked")).unwrap();

    timeout(Duration::from_secs(5), async {
        while service.records(GROUP, STREAM).len() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("flush loop should deliver the record");

    shipper.flush_and_stop().await.unwrap();
    assert_eq!(shipper.metrics().records_written, 1);
}

#[tokio::test]
async fn test_loop_survives_failed_tick() {
    let mut config = manual_config();
    config.flush.interval_ms = 20;
    config.transport.max_retries = 1;
    let (shipper, service) = setup(&config);
    shipper.start().await.unwrap();
    service.inject_fault(Operation::PutRecords, ServiceError::Unavailable("throttled".into()));
    shipper.submit(LogRecord::now("retried")).unwrap();

    timeout(Duration::from_secs(5), async {
        while shipper.pending() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("record should be delivered on a later tick");

    assert_eq!(shipper.metrics().flush_failures, 1);
    assert!(shipper.last_error().is_some());
    shipper.flush_and_stop().await.unwrap();
}

#[tokio::test]
async fn test_records_submitted_during_start_are_kept() {
    let (shipper, service) = setup(&manual_config());
    let shipper = Arc::new(shipper);

    let starter = {
        let shipper = shipper.clone();
        tokio::spawn(async move { shipper.start().await })
    };
    // Either still starting or already started; both accept records.
    while shipper.state() == LifecycleState::NotStarted {
        tokio::task::yield_now().await;
    }
    shipper.submit(LogRecord::now("during start")).unwrap();
    starter.await.unwrap().unwrap();

    shipper.flush_and_stop().await.unwrap();
    let stored = service.records(GROUP, STREAM);
    assert_eq!(stored.last().unwrap().message, "during start");
}

#[tokio::test]
async fn test_final_flush_failure_is_reported() {
    let mut config = manual_config();
    config.transport.max_retries = 1;
    let (shipper, service) = setup(&config);
    shipper.start().await.unwrap();
    shipper.submit(LogRecord::now("lost")).unwrap();
    service.inject_fault(
        Operation::PutRecords,
        ServiceError::Rejected {
            code: "InvalidParameterException".into(),
            message: "bad".into(),
        },
    );

    let err = shipper.flush_and_stop().await.unwrap_err();
    assert!(matches!(err, ShipperError::WriteRejected(_)));
    assert_eq!(shipper.state(), LifecycleState::Stopped);
    assert_eq!(shipper.pending(), 1);
}

#[tokio::test]
async fn test_flush_and_stop_drains_backlog_in_several_cycles() {
    let record = |i: usize| LogRecord::new(format!("event-{i:04}"), 1_700_000_000_000);
    let mut config = manual_config();
    config.flush.max_batch_bytes = ByteSize((record(0).encoded_size() * 100) as u64);
    let (shipper, service) = setup(&config);
    shipper.start().await.unwrap();
    let marker_token = service.current_token(GROUP, STREAM);

    for i in 0..250 {
        shipper.submit(record(i)).unwrap();
    }
    shipper.flush_and_stop().await.unwrap();

    let sent = puts(&service);
    let sizes: Vec<usize> = sent.iter().map(|(_, records)| records.len()).collect();
    assert_eq!(sizes, [1, 100, 100, 50]);

    // The service refuses stale tokens, so four puts and no resends means
    // every batch carried the token its predecessor returned.
    let tokens: Vec<Option<WriteToken>> = sent[1..].iter().map(|(t, _)| t.clone()).collect();
    assert_eq!(tokens[0], marker_token);
    assert!(tokens.iter().all(Option::is_some));
    assert_ne!(tokens[0], tokens[1]);
    assert_ne!(tokens[1], tokens[2]);
    assert_ne!(service.current_token(GROUP, STREAM), tokens[2]);

    assert_eq!(shipper.pending(), 0);
    assert_eq!(shipper.state(), LifecycleState::Stopped);
    assert_eq!(shipper.metrics().batches_written, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drains_deliver_each_record_once() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 500;

    let mut config = manual_config();
    config.flush.interval_ms = 1;
    config.flush.max_batch_records = 37;
    let (shipper, service) = setup(&config);
    let shipper = Arc::new(shipper);
    shipper.start().await.unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let shipper = shipper.clone();
            tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    match shipper.submit(LogRecord::new(format!("{p}:{i}"), i as i64)) {
                        Ok(()) => {}
                        Err(ShipperError::Stopped) => break,
                        Err(e) => panic!("unexpected submit error: {e}"),
                    }
                    if i % 25 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    let flushers: Vec<_> = (0..50)
        .map(|_| {
            let shipper = shipper.clone();
            tokio::spawn(async move { shipper.flush().await })
        })
        .collect();

    let stopper = {
        let shipper = shipper.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(5)).await;
            shipper.flush_and_stop().await
        })
    };

    for producer in producers {
        producer.await.unwrap();
    }
    for flusher in flushers {
        flusher.await.unwrap().unwrap();
    }
    stopper.await.unwrap().unwrap();

    let stored: Vec<String> = service
        .records(GROUP, STREAM)
        .into_iter()
        .skip(1)
        .map(|r| r.message)
        .collect();
    assert_eq!(stored.len() as u64, shipper.metrics().records_submitted);
    assert_eq!(shipper.pending(), 0);

    let unique: HashSet<&String> = stored.iter().collect();
    assert_eq!(unique.len(), stored.len());

    for p in 0..PRODUCERS {
        let prefix = format!("{p}:");
        let sequence: Vec<usize> = stored
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect();
        let expected: Vec<usize> = (0..sequence.len()).collect();
        assert_eq!(sequence, expected, "producer {p} out of order");
    }
}
