//! Rationale Core Integration Tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use rationale_core::{
    Error, Result,
    connectors::{ConnectorRegistry, JsonlConnector, PlatformConnector},
    domain::events::{EventType, NormalizedEvent, RawEvent},
    domain::ingestion::{
        DataSource, HealthState, Integration, IntegrationStatus, ProcessedEventId,
        SyncCheckpoint, SyncOutcome, TaskStatus,
    },
    orchestration::{IngestionOrchestrator, OrchestratorConfig},
    processing::{ContextProcessor, ProcessorConfig},
    storage::{IngestionStore, MemoryKnowledgeSink, MemoryStore},
};

/// Connector whose behaviour each test scripts
struct ScriptedConnector {
    platform: String,
    events: Mutex<Vec<RawEvent>>,
    fail_fetch: AtomicBool,
    block_fetch: AtomicBool,
    fetch_started: Notify,
    fetches: AtomicUsize,
    normalized: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    fn new(platform: &str) -> Arc<Self> {
        Arc::new(Self {
            platform: platform.to_string(),
            events: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            block_fetch: AtomicBool::new(false),
            fetch_started: Notify::new(),
            fetches: AtomicUsize::new(0),
            normalized: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, id: &str, content: &str, files: &[&str]) {
        let event = RawEvent::new(id, self.platform.clone(), Utc::now()).with_payload(
            serde_json::json!({ "content": content, "files": files }),
        );
        self.events.lock().unwrap().push(event);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn normalized(&self) -> Vec<String> {
        self.normalized.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformConnector for ScriptedConnector {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_events(
        &self,
        _sources: &[DataSource],
        _since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawEvent>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_started.notify_one();

        if self.block_fetch.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::ConnectorError("connection reset by peer".to_string()));
        }

        let mut events = self.events.lock().unwrap().clone();
        events.truncate(limit);
        Ok(events)
    }

    async fn normalize(&self, raw: &[RawEvent]) -> Result<Vec<NormalizedEvent>> {
        self.normalized
            .lock()
            .unwrap()
            .extend(raw.iter().map(|e| e.id.clone()));

        Ok(raw
            .iter()
            .map(|e| {
                let content = e.payload["content"].as_str().unwrap_or_default();
                let files = e.payload["files"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                NormalizedEvent::new(
                    &e.id,
                    &e.platform,
                    EventType::Message,
                    "alice",
                    content,
                    e.timestamp,
                )
                .with_files(files)
            })
            .collect())
    }
}

struct Harness {
    orchestrator: IngestionOrchestrator,
    store: Arc<MemoryStore>,
    sink: Arc<MemoryKnowledgeSink>,
    connector: Arc<ScriptedConnector>,
}

async fn harness(config: OrchestratorConfig, integrations: Vec<Integration>) -> Harness {
    let connector = ScriptedConnector::new("github");
    let mut connectors = ConnectorRegistry::new();
    connectors.register(connector.clone());

    let store = Arc::new(MemoryStore::new());
    for integration in integrations {
        store
            .insert_data_source(DataSource::new(
                format!("ds-{}", integration.id),
                &integration.id,
                "repository",
                "acme/api",
            ))
            .await;
        store.insert_integration(integration).await;
    }

    let sink = Arc::new(MemoryKnowledgeSink::new());
    let orchestrator = IngestionOrchestrator::new(
        config,
        ContextProcessor::new(ProcessorConfig::default()),
        store.clone(),
        Arc::new(connectors),
        sink.clone(),
    );

    Harness {
        orchestrator,
        store,
        sink,
        connector,
    }
}

async fn default_harness() -> Harness {
    harness(
        OrchestratorConfig::default(),
        vec![Integration::new("int-1", "p1", "github")],
    )
    .await
}

async fn integration(store: &MemoryStore, id: &str) -> Integration {
    store.get_integration(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_run_advances_checkpoint_and_stores_knowledge() {
    let h = default_harness().await;
    h.connector.push("e1", "We decided to split main.go into packages", &["main.go"]);
    h.connector.push("e2", "Looks good to me", &[]);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.orchestrator.wait_for_idle("int-1").await;

    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.status, IntegrationStatus::Active);
    assert_eq!(integration.last_sync_status, Some(SyncOutcome::Success));
    assert_eq!(integration.error_count, 0);

    let checkpoint = integration.sync_checkpoint;
    assert_eq!(checkpoint.total_events_processed, 2);
    assert_eq!(checkpoint.last_batch_size, 2);
    assert_eq!(checkpoint.unextracted_events, 0);
    assert!(checkpoint.has_processed("e1"));
    assert!(checkpoint.last_sync_time.is_some());

    let stored = h.sink.results().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, "int-1");
    assert_eq!(stored[0].1.processed_events, 2);
    assert_eq!(stored[0].1.decisions.len(), 1);
    assert!(h.orchestrator.active_tasks().is_empty());
}

#[tokio::test]
async fn test_dedup_never_renormalizes_known_ids() {
    let checkpoint = SyncCheckpoint {
        processed_event_ids: vec![ProcessedEventId {
            id: "known".to_string(),
            seen_at: Utc::now(),
        }],
        ..Default::default()
    };
    let h = harness(
        OrchestratorConfig::default(),
        vec![Integration::new("int-1", "p1", "github").with_checkpoint(checkpoint)],
    )
    .await;
    h.connector.push("known", "already seen", &[]);
    h.connector.push("fresh", "brand new", &[]);
    h.connector.push("fresh", "brand new again", &[]);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.orchestrator.wait_for_idle("int-1").await;

    assert_eq!(h.connector.normalized(), vec!["fresh"]);
    let checkpoint = h.orchestrator.get_sync_checkpoint("int-1").await.unwrap();
    assert_eq!(checkpoint.total_events_processed, 1);
    assert!(checkpoint.has_processed("known"));
    assert!(checkpoint.has_processed("fresh"));

    // Nothing fresh on the next run
    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.orchestrator.wait_for_idle("int-1").await;
    assert_eq!(h.connector.normalized(), vec!["fresh"]);
    assert_eq!(h.connector.fetches(), 2);
    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.last_sync_status, Some(SyncOutcome::Success));
    assert_eq!(integration.sync_checkpoint.total_events_processed, 1);
}

#[tokio::test]
async fn test_concurrent_double_start_yields_one_success() {
    let h = default_harness().await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    let (a, b) = tokio::join!(
        h.orchestrator.start_integration_ingestion("int-1"),
        h.orchestrator.start_integration_ingestion("int-1"),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(Error::IngestionAlreadyRunning(id)) if id == "int-1"))
    );
    assert_eq!(h.orchestrator.active_tasks().len(), 1);

    h.orchestrator.stop_project_ingestion("p1");
    h.orchestrator.wait_for_idle("int-1").await;
}

#[tokio::test]
async fn test_stop_mid_fetch_leaves_checkpoint_untouched() {
    let h = default_harness().await;
    h.connector.push("e1", "hello", &[]);
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.connector.fetch_started.notified().await;

    let snapshot = h.orchestrator.active_tasks().pop().unwrap();
    assert_eq!(snapshot.status, TaskStatus::Running);

    let stopped = h.orchestrator.stop_project_ingestion("p1");
    assert_eq!(stopped, vec!["int-1"]);
    h.orchestrator.wait_for_idle("int-1").await;

    assert!(h.orchestrator.active_tasks().is_empty());
    assert!(!h.orchestrator.has_pending_retry("int-1"));
    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.sync_checkpoint, SyncCheckpoint::default());
    assert_eq!(integration.last_sync_status, None);
    assert!(h.connector.normalized().is_empty());
    assert!(h.sink.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_status_after_max_retries() {
    let h = default_harness().await;
    h.connector.fail_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();

    let wait = async {
        loop {
            h.orchestrator.wait_for_idle("int-1").await;
            if integration(&h.store, "int-1").await.status == IntegrationStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("integration should reach error status");
    h.orchestrator.wait_for_idle("int-1").await;

    let failed = integration(&h.store, "int-1").await;
    assert_eq!(failed.error_count, 3);
    assert_eq!(failed.last_sync_status, Some(SyncOutcome::Failed));
    assert!(failed.error_message.unwrap().contains("connection reset"));
    assert_eq!(h.connector.fetches(), 3);
    assert!(!h.orchestrator.has_pending_retry("int-1"));

    // No further attempts
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert_eq!(h.connector.fetches(), 3);

    let health = h.orchestrator.get_integration_health("int-1").await.unwrap();
    assert_eq!(health.state, HealthState::Failed);

    // An explicit retry clears the error state
    h.connector.fail_fetch.store(false, Ordering::SeqCst);
    h.orchestrator.retry_failed_ingestion("int-1").await.unwrap();
    h.orchestrator.wait_for_idle("int-1").await;

    let recovered = integration(&h.store, "int-1").await;
    assert_eq!(recovered.status, IntegrationStatus::Active);
    assert_eq!(recovered.error_count, 0);
    assert_eq!(recovered.error_message, None);
    assert_eq!(recovered.last_sync_status, Some(SyncOutcome::Success));
    assert_eq!(h.connector.fetches(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_schedules_retry_and_stop_cancels_it() {
    let h = default_harness().await;
    h.connector.fail_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.orchestrator.wait_for_idle("int-1").await;

    assert!(h.orchestrator.has_pending_retry("int-1"));
    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.status, IntegrationStatus::Active);
    assert_eq!(integration.error_count, 1);
    let health = h.orchestrator.get_integration_health("int-1").await.unwrap();
    assert_eq!(health.state, HealthState::Degraded);

    h.orchestrator.stop_project_ingestion("p1");
    assert!(!h.orchestrator.has_pending_retry("int-1"));

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.connector.fetches(), 1);
}

#[tokio::test]
async fn test_sink_failure_still_advances_checkpoint() {
    let h = default_harness().await;
    h.connector.push("e1", "first", &[]);
    h.connector.push("e2", "second", &[]);
    h.sink.set_failure(Some("disk full".to_string())).await;

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.orchestrator.wait_for_idle("int-1").await;

    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.last_sync_status, Some(SyncOutcome::Success));
    assert_eq!(integration.sync_checkpoint.total_events_processed, 2);
    assert_eq!(integration.sync_checkpoint.unextracted_events, 2);
}

#[tokio::test]
async fn test_start_project_reports_each_integration() {
    let h = harness(
        OrchestratorConfig::default(),
        vec![
            Integration::new("int-1", "p1", "github"),
            Integration::new("int-2", "p1", "github").with_status(IntegrationStatus::Inactive),
        ],
    )
    .await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    let report = h.orchestrator.start_project_ingestion("p1").await.unwrap();
    assert_eq!(report.started, vec!["int-1"]);
    assert_eq!(report.skipped, vec!["int-2"]);
    assert!(report.is_success());

    // int-1 is still running
    let report = h.orchestrator.start_project_ingestion("p1").await.unwrap();
    assert!(report.started.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        report.into_result(),
        Err(Error::ProjectStartFailed(failed)) if failed[0].0 == "int-1"
    ));

    let err = h
        .orchestrator
        .start_integration_ingestion("int-2")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IntegrationNotActive { .. }));

    let err = h.orchestrator.start_project_ingestion("nope").await.unwrap_err();
    assert!(matches!(err, Error::ProjectNotFound(_)));

    h.orchestrator.stop_project_ingestion("p1");
    h.orchestrator.wait_for_idle("int-1").await;
}

#[tokio::test]
async fn test_data_source_start_resolves_parent() {
    let h = default_harness().await;
    h.store
        .insert_data_source(DataSource::new("ds-off", "int-1", "repository", "acme/web").inactive())
        .await;

    let err = h
        .orchestrator
        .start_data_source_ingestion("ds-missing")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DataSourceNotFound(_)));

    let err = h
        .orchestrator
        .start_data_source_ingestion("ds-off")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DataSourceInactive(_)));

    h.orchestrator
        .start_data_source_ingestion("ds-int-1")
        .await
        .unwrap();
    h.orchestrator.wait_for_idle("int-1").await;
    assert_eq!(h.connector.fetches(), 1);
}

#[tokio::test]
async fn test_checkpoint_update_rejected_while_running() {
    let h = default_harness().await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);
    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();

    let replacement = SyncCheckpoint {
        total_events_processed: 42,
        ..Default::default()
    };
    let err = h
        .orchestrator
        .update_sync_checkpoint("int-1", &replacement)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IngestionAlreadyRunning(_)));

    h.orchestrator.stop_project_ingestion("p1");
    h.orchestrator.wait_for_idle("int-1").await;

    h.orchestrator
        .update_sync_checkpoint("int-1", &replacement)
        .await
        .unwrap();
    let checkpoint = h.orchestrator.get_sync_checkpoint("int-1").await.unwrap();
    assert_eq!(checkpoint.total_events_processed, 42);
}

#[tokio::test]
async fn test_health_check_terminates_tasks_over_budget() {
    let mut flaky = Integration::new("int-1", "p1", "github");
    flaky.error_count = 3;
    let h = harness(OrchestratorConfig::default(), vec![flaky]).await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.connector.fetch_started.notified().await;

    let sweep = h.orchestrator.run_health_check().await;
    assert_eq!(sweep.checked, 1);
    assert_eq!(sweep.terminated, 1);

    h.orchestrator.wait_for_idle("int-1").await;
    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.status, IntegrationStatus::Error);
    assert!(!h.orchestrator.has_pending_retry("int-1"));
}

#[tokio::test]
async fn test_health_check_flags_stale_tasks() {
    let config = OrchestratorConfig {
        stale_sync_threshold: Duration::ZERO,
        ..Default::default()
    };
    let h = harness(config, vec![Integration::new("int-1", "p1", "github")]).await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.connector.fetch_started.notified().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let sweep = h.orchestrator.run_health_check().await;
    assert_eq!(sweep.stale, 1);
    assert_eq!(sweep.terminated, 0);
    assert_eq!(h.orchestrator.run_health_check().await.stale, 0);

    let health = h.orchestrator.get_ingestion_health("p1").await.unwrap();
    assert_eq!(health.integrations[0].state, HealthState::Degraded);
    assert_eq!(health.overall, HealthState::Partial);
    assert_eq!(health.active_tasks, 1);

    h.orchestrator.stop_project_ingestion("p1");
    h.orchestrator.wait_for_idle("int-1").await;
}

#[tokio::test]
async fn test_stop_orchestrator_cancels_everything() {
    let config = OrchestratorConfig {
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let h = harness(config, vec![Integration::new("int-1", "p1", "github")]).await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_orchestrator().unwrap();
    h.orchestrator.start_orchestrator().unwrap();
    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.connector.fetch_started.notified().await;

    h.orchestrator.stop_orchestrator().await.unwrap();
    assert!(h.orchestrator.active_tasks().is_empty());
    assert_eq!(
        integration(&h.store, "int-1").await.sync_checkpoint,
        SyncCheckpoint::default()
    );

    let err = h
        .orchestrator
        .start_integration_ingestion("int-1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(h.orchestrator.start_orchestrator().is_err());
}

#[tokio::test]
async fn test_retry_refused_while_run_is_live() {
    let mut flaky = Integration::new("int-1", "p1", "github");
    flaky.error_count = 2;
    flaky.error_message = Some("connection reset by peer".to_string());
    let h = harness(OrchestratorConfig::default(), vec![flaky]).await;
    h.connector.block_fetch.store(true, Ordering::SeqCst);

    h.orchestrator.start_integration_ingestion("int-1").await.unwrap();
    h.connector.fetch_started.notified().await;

    let err = h
        .orchestrator
        .retry_failed_ingestion("int-1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IngestionAlreadyRunning(_)));

    let integration = integration(&h.store, "int-1").await;
    assert_eq!(integration.error_count, 2);
    assert!(integration.error_message.is_some());
    assert_eq!(h.orchestrator.active_tasks()[0].error_count, 2);

    h.orchestrator.stop_project_ingestion("p1");
    h.orchestrator.wait_for_idle("int-1").await;
}

#[tokio::test]
async fn test_full_fetch_resumes_after_last_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let lines: Vec<String> = (1..=3)
        .map(|i| {
            serde_json::json!({
                "id": format!("e{i}"),
                "platform": "github",
                "timestamp": format!("2024-03-01T0{i}:00:00Z"),
                "payload": {"event_type": "commit", "author": "alice", "content": "Fix typo"},
            })
            .to_string()
        })
        .collect();
    std::fs::write(&path, lines.join("\n")).unwrap();

    let mut connectors = ConnectorRegistry::new();
    connectors.register(Arc::new(JsonlConnector::new("github", path)));

    let store = Arc::new(MemoryStore::new());
    let from_start = SyncCheckpoint {
        last_sync_time: Some(DateTime::<Utc>::UNIX_EPOCH),
        ..Default::default()
    };
    store
        .insert_integration(Integration::new("int-1", "p1", "github").with_checkpoint(from_start))
        .await;
    store
        .insert_data_source(DataSource::new("ds-1", "int-1", "repository", "acme/api"))
        .await;

    let config = OrchestratorConfig {
        fetch_limit: 2,
        ..Default::default()
    };
    let orchestrator = IngestionOrchestrator::new(
        config,
        ContextProcessor::new(ProcessorConfig::default()),
        store.clone(),
        Arc::new(connectors),
        Arc::new(MemoryKnowledgeSink::new()),
    );

    // First page fills the limit, so the cursor stops at its last event
    orchestrator.start_integration_ingestion("int-1").await.unwrap();
    orchestrator.wait_for_idle("int-1").await;
    let checkpoint = orchestrator.get_sync_checkpoint("int-1").await.unwrap();
    assert_eq!(checkpoint.total_events_processed, 2);
    assert_eq!(
        checkpoint.last_sync_time.unwrap().to_rfc3339(),
        "2024-03-01T02:00:00+00:00"
    );

    for _ in 0..2 {
        orchestrator.start_integration_ingestion("int-1").await.unwrap();
        orchestrator.wait_for_idle("int-1").await;
    }

    let integration = integration(&store, "int-1").await;
    let checkpoint = &integration.sync_checkpoint;
    assert_eq!(checkpoint.total_events_processed, 3);
    assert!(checkpoint.has_processed("e2"));
    assert!(checkpoint.has_processed("e3"));
    assert_eq!(integration.error_count, 0);
    assert_eq!(integration.last_sync_status, Some(SyncOutcome::Success));
}
