//! End-to-end tests of batch ingestion against the in-memory server.

use std::time::Duration;

use akidb_client::transport::mock::{MockFailure, MockTransport};
use akidb_client::{ChannelHealth, Client, ConnectionManager};
use akidb_client_core::{
    ClientConfig, ClientError, FailureReason, ObjectWriteRequest, OutcomeStatus, OutcomeSummary,
    SchemaVersion, TransportErrorKind,
};
use serde_json::json;

fn config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.batch.default_collection = Some("Articles".to_string());
    config.batch.max_wait_ms = 0;
    config.retry.base_backoff_ms = 50;
    config.retry.max_backoff_ms = 1_000;
    config.retry.jitter_ratio = 0.0;
    config
}

async fn client(mock: &MockTransport, config: &ClientConfig) -> Client {
    let connection = ConnectionManager::new(config)
        .open_with_transport(
            mock.clone().into_transport(),
            &config.connection.preferred_schema_versions,
        )
        .await
        .unwrap();
    Client::with_connection(connection, config)
}

fn objects(count: usize) -> Vec<ObjectWriteRequest> {
    (0..count)
        .map(|i| {
            ObjectWriteRequest::new(format!("doc-{i}"), &json!({"title": format!("doc {i}")}))
                .unwrap()
                .with_vector(vec![0.25_f32; 4])
        })
        .collect()
}

fn statuses(outcomes: &[akidb_client_core::ObjectOutcome]) -> Vec<OutcomeStatus> {
    outcomes.iter().map(|outcome| outcome.status).collect()
}

#[tokio::test]
async fn test_thousand_objects_in_ten_batches() {
    let mock = MockTransport::new();
    let mut config = config();
    config.batch.max_batch_count = 100;
    let client = client(&mock, &config).await;

    let input = objects(1000);
    let tokens: Vec<String> = input.iter().map(|o| o.token.to_string()).collect();
    let handle = client.submit(input).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert_eq!(mock.batch_sizes(), vec![100; 10]);
    assert_eq!(outcomes.len(), 1000);
    assert!(outcomes.iter().all(|o| o.is_success() && o.attempts == 1));
    let returned: Vec<String> = outcomes.iter().map(|o| o.token.to_string()).collect();
    assert_eq!(returned, tokens);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_permanent_rejection_is_isolated() {
    let mock = MockTransport::new();
    let client = client(&mock, &config()).await;
    let input = objects(5);
    mock.reject_object(input[2].id, "property `title` has the wrong type");

    let handle = client.submit(input).await.unwrap();
    let outcomes = handle.wait().await.unwrap();

    assert_eq!(mock.batch_calls().len(), 1);
    let summary = OutcomeSummary::from_outcomes(&outcomes);
    assert_eq!((summary.succeeded, summary.failed), (4, 1));
    assert!(matches!(
        &outcomes[2].error,
        Some(FailureReason::Rejected { kind: TransportErrorKind::InvalidArgument, message })
            if message.contains("wrong type")
    ));
    assert_eq!(outcomes[2].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_is_respected() {
    let mock = MockTransport::new().with_schema_versions(&["v6"]);
    let mut config = config();
    config.retry.max_retries = 3;
    let client = client(&mock, &config).await;
    let input = objects(4);
    let flaky = input[1].id;
    mock.reject_object_with(flaky, TransportErrorKind::Unavailable, "shard busy", None);

    let handle = client.submit(input).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert_eq!(mock.attempts_for(flaky), 3);
    assert!(matches!(
        &outcomes[1].error,
        Some(FailureReason::RetriesExhausted { attempts: 3, last_error })
            if last_error.kind == TransportErrorKind::Unavailable
    ));
    assert_eq!(
        statuses(&outcomes),
        vec![
            OutcomeStatus::Succeeded,
            OutcomeStatus::Failed,
            OutcomeStatus::Succeeded,
            OutcomeStatus::Succeeded
        ]
    );
    // Siblings were not resent with the flaky object.
    assert_eq!(mock.batch_sizes(), vec![4, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_object_error_recovers() {
    let mock = MockTransport::new().with_schema_versions(&["v6"]);
    let client = client(&mock, &config()).await;
    let input = objects(3);
    mock.reject_object_transiently(input[0].id, 2);

    let handle = client.submit(input).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(outcomes[0].attempts, 3);
    assert_eq!(outcomes[1].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_whole_call_failures_are_retried_then_exhausted() {
    let mock = MockTransport::new();
    mock.push_batch_results([
        MockFailure::Transient("overloaded"),
        MockFailure::Transient("overloaded"),
        MockFailure::Transient("overloaded"),
    ]);
    let client = client(&mock, &config()).await;

    let handle = client.submit(objects(2)).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert_eq!(mock.batch_calls().len(), 3);
    assert!(outcomes.iter().all(|o| matches!(
        o.error,
        Some(FailureReason::RetriesExhausted { attempts: 3, .. })
    )));
    // A retry streak halves the budget down to its floor.
    assert_eq!(client.connection().budget().max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_marks_channel_unreachable() {
    let mock = MockTransport::new();
    let client = client(&mock, &config()).await;
    mock.set_unreachable(true);

    let handle = client.submit(objects(1)).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
    assert_eq!(client.connection().state().health(), ChannelHealth::Unreachable);

    mock.set_unreachable(false);
    assert_eq!(client.connection().health_check().await, ChannelHealth::Reachable);
}

#[tokio::test]
async fn test_permanent_call_failure_is_not_retried() {
    let mock = MockTransport::new();
    mock.push_batch_results([MockFailure::Error(akidb_client_core::TransportError::new(
        TransportErrorKind::PermissionDenied,
        "collection is read-only",
    ))]);
    let client = client(&mock, &config()).await;

    let handle = client.submit(objects(3)).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert_eq!(mock.batch_calls().len(), 1);
    assert!(outcomes.iter().all(|o| matches!(
        &o.error,
        Some(FailureReason::Transport { error }) if error.kind == TransportErrorKind::PermissionDenied
    )));
}

#[tokio::test(start_paused = true)]
async fn test_back_pressure_bounds_in_flight_batches() {
    let mock = MockTransport::new().with_latency(Duration::from_millis(50));
    let mut config = config();
    config.batch.max_batch_count = 10;
    config.concurrency.initial_max_in_flight = 2;
    config.concurrency.max_in_flight_cap = 2;
    config.batch.queue_capacity = 2;
    let client = client(&mock, &config).await;

    let handle = client.submit(objects(200)).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(mock.batch_calls().len(), 20);
    assert!(mock.peak_in_flight() <= 2);
    assert!(mock.peak_in_flight() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_in_flight_results() {
    let mock = MockTransport::new().with_latency(Duration::from_secs(1));
    let mut config = config();
    config.batch.max_batch_count = 10;
    config.concurrency.initial_max_in_flight = 1;
    config.concurrency.max_in_flight_cap = 1;
    let client = client(&mock, &config).await;

    let handle = client.submit(objects(30)).await.unwrap();
    while mock.peak_in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(!handle.is_finished());
    client.cancel(&handle);
    let outcomes = client.wait(&handle).await.unwrap();

    assert_eq!(mock.batch_calls().len(), 1);
    let summary = OutcomeSummary::from_outcomes(&outcomes);
    assert_eq!(summary.succeeded, 10);
    assert_eq!(summary.not_attempted, 20);
    assert!(outcomes[..10].iter().all(|o| o.is_success()));
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let mock = MockTransport::new();
    let client = client(&mock, &config()).await;

    let handle = client.submit(objects(3)).await.unwrap();
    handle.cancel();
    assert!(matches!(handle.wait().await, Err(ClientError::Cancelled)));
    assert!(mock.batch_calls().is_empty());
}

#[tokio::test]
async fn test_submit_time_failures_do_not_block_siblings() {
    let mock = MockTransport::new().with_schema_versions(&["v4"]);
    let mut config = config();
    config.batch.default_collection = None;
    let client = client(&mock, &config).await;

    let input = vec![
        ObjectWriteRequest::new("no-collection", &json!({})).unwrap(),
        ObjectWriteRequest::new("named", &json!({}))
            .unwrap()
            .with_collection("Articles")
            .with_named_vector("title", vec![0.5_f32; 3]),
        ObjectWriteRequest::new("plain", &json!({}))
            .unwrap()
            .with_collection("Articles"),
    ];
    let handle = client.submit(input).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert!(matches!(outcomes[0].error, Some(FailureReason::Validation { .. })));
    assert!(matches!(
        outcomes[1].error,
        Some(FailureReason::SchemaIncompatible { .. })
    ));
    assert_eq!(outcomes[0].attempts, 0);
    assert!(outcomes[2].is_success());
    assert_eq!(mock.batch_sizes(), vec![1]);
    assert_eq!(mock.batch_calls()[0].collections, vec!["Articles".to_string()]);
}

#[tokio::test]
async fn test_oversized_object_fails_before_the_wire() {
    let mock = MockTransport::new().with_max_message_size(1024);
    let client = client(&mock, &config()).await;

    let big = ObjectWriteRequest::new("big", &json!({"body": "x".repeat(4096)})).unwrap();
    let small = ObjectWriteRequest::new("small", &json!({"body": "x"})).unwrap();
    let handle = client.submit(vec![big, small]).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert!(matches!(outcomes[0].error, Some(FailureReason::Validation { .. })));
    assert!(outcomes[1].is_success());
    assert_eq!(mock.batch_sizes(), vec![1]);
}

#[tokio::test]
async fn test_default_collection_counts_toward_the_size_limit() {
    let mock = MockTransport::new().with_max_message_size(1024);
    let mut config = config();
    config.batch.default_collection = Some("C".repeat(600));
    let client = client(&mock, &config).await;

    let body = json!({"body": "x".repeat(500)});
    let defaulted = ObjectWriteRequest::new("defaulted", &body).unwrap();
    assert!(defaulted.estimated_size() < 1024);
    let named = ObjectWriteRequest::new("named", &body).unwrap().with_collection("Short");
    let handle = client.submit(vec![defaulted, named]).await.unwrap();
    let outcomes = client.wait(&handle).await.unwrap();

    assert!(matches!(outcomes[0].error, Some(FailureReason::Validation { .. })));
    assert_eq!(outcomes[0].attempts, 0);
    assert!(outcomes[1].is_success());
    assert_eq!(mock.batch_sizes(), vec![1]);
}

#[tokio::test]
async fn test_duplicate_tokens_reject_the_submission() {
    let mock = MockTransport::new();
    let client = client(&mock, &config()).await;
    let mut input = objects(2);
    input.push(input[0].clone());

    let err = client.submit(input).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(mock.batch_calls().is_empty());
}

#[tokio::test]
async fn test_close_flushes_and_rejects_new_work() {
    let mock = MockTransport::new();
    let client = client(&mock, &config()).await;

    let handle = client.submit(objects(7)).await.unwrap();
    client.close().await.unwrap();
    assert!(handle.is_finished());
    assert_eq!(mock.batch_sizes(), vec![7]);
    assert_eq!(handle.wait().await.unwrap().len(), 7);

    assert!(matches!(client.submit(objects(1)).await, Err(ClientError::Closed)));
    assert!(matches!(client.flush().await, Err(ClientError::Closed)));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_dropping_the_client_abandons_the_open_batch() {
    let mock = MockTransport::new();
    let client = client(&mock, &config()).await;

    let handle = client.submit(objects(4)).await.unwrap();
    drop(client);
    let outcomes = handle.wait().await.unwrap();

    assert_eq!(statuses(&outcomes), vec![OutcomeStatus::NotAttempted; 4]);
    assert!(mock.batch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_open_batch_is_sealed_after_max_wait() {
    let mock = MockTransport::new();
    let mut config = config();
    config.batch.max_wait_ms = 100;
    let client = client(&mock, &config).await;

    let handle = client.submit(objects(3)).await.unwrap();
    assert!(mock.batch_calls().is_empty());
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(mock.batch_sizes(), vec![3]);
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_negotiation_follows_the_server() {
    let mock = MockTransport::new().with_schema_versions(&["v4", "v51", "v52"]);
    let config = config();
    let manager = ConnectionManager::new(&config);

    let connection = manager
        .open_with_transport(mock.clone().into_transport(), &SchemaVersion::ALL)
        .await
        .unwrap();
    assert_eq!(connection.schema_version(), SchemaVersion::V52);

    mock.set_schema_versions(&["v4"]);
    let downgraded = manager
        .open_with_transport(mock.clone().into_transport(), &SchemaVersion::ALL)
        .await
        .unwrap();
    assert_eq!(downgraded.schema_version(), SchemaVersion::V4);
    assert_eq!(downgraded.codec().version(), SchemaVersion::V4);
    assert_eq!(connection.codec().version(), SchemaVersion::V52);

    let client = Client::with_connection(downgraded, &config);
    let handle = client.submit(objects(2)).await.unwrap();
    client.wait(&handle).await.unwrap();
    assert!(mock
        .batch_calls()
        .iter()
        .all(|call| call.version == SchemaVersion::V4));
}

#[tokio::test]
async fn test_no_common_version_is_connection_unavailable() {
    let mock = MockTransport::new().with_schema_versions(&["v4"]);
    let err = ConnectionManager::new(&config())
        .open_with_transport(mock.into_transport(), &[SchemaVersion::V6])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ConnectionUnavailable { .. }));
}
