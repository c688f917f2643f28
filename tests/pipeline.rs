use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use monitord_relay::relay_modules::dedup::Deduplicator;
use monitord_relay::relay_modules::dispatcher::{AlertSender, DispatchOutcome, HttpAlertDispatcher};
use monitord_relay::relay_modules::pipeline::{AlertPipeline, PipelineOutcome, ReceivedChunk};
use monitord_relay::relay_modules::reporting::MetricsReporter;
use monitord_relay::relay_modules::side_effects::{LocalActions, SideEffectError};
use monitord_relay::relay_modules::trigger::{SuppressionSchedule, Trigger, TriggerTable};
use monitord_relay::relay_modules::workers::WorkerPool;

#[derive(Default)]
struct RecordingSender {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl AlertSender for RecordingSender {
    async fn dispatch(&self, _trigger: &Trigger, key: &str) -> DispatchOutcome {
        self.keys.lock().unwrap().push(key.to_string());
        DispatchOutcome::Delivered {
            attempts: 1,
            status: StatusCode::OK,
        }
    }
}

impl RecordingSender {
    fn calls(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

#[derive(Default)]
struct RecordingLocalActions {
    environment: AtomicUsize,
    display: AtomicUsize,
}

#[async_trait]
impl LocalActions for RecordingLocalActions {
    async fn control_environment(&self) -> Result<(), SideEffectError> {
        self.environment.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn control_display(&self) -> Result<(), SideEffectError> {
        self.display.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RecordingLocalActions {
    fn calls(&self) -> (usize, usize) {
        (
            self.environment.load(Ordering::SeqCst),
            self.display.load(Ordering::SeqCst),
        )
    }
}

#[derive(Default)]
struct RecordingMetrics {
    keys: Mutex<Vec<String>>,
}

impl MetricsReporter for RecordingMetrics {
    fn report_alert(&self, key: &str) {
        self.keys.lock().unwrap().push(key.to_string());
    }
}

fn chunk(data: &'static [u8]) -> ReceivedChunk {
    ReceivedChunk::now(Bytes::from_static(data))
}

fn trigger(key: &str, local: bool) -> Trigger {
    Trigger {
        key: key.to_string(),
        name: format!("Trigger {key}"),
        schedule: SuppressionSchedule {
            weekday: Weekday::Sat,
            start: NaiveTime::from_hms_opt(12, 10, 0).unwrap(),
            end: NaiveTime::from_hms_opt(12, 25, 0).unwrap(),
        },
        request: vec![("type".to_string(), "Einsatz".to_string())],
        local,
    }
}

/// A trigger whose suppression window is a single instant, so wall-clock
/// driven tests never hit it.
fn never_suppressed_trigger(key: &str, local: bool) -> Trigger {
    Trigger {
        schedule: SuppressionSchedule {
            weekday: Weekday::Mon,
            start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        },
        ..trigger(key, local)
    }
}

// 2024-06-03 is a Monday, 2024-06-01 a Saturday.
fn monday_noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(12, 15, 0)
        .unwrap()
}

fn saturday_test_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(12, 15, 0)
        .unwrap()
}

struct Harness {
    pipeline: Arc<AlertPipeline>,
    sender: Arc<RecordingSender>,
    local_actions: Arc<RecordingLocalActions>,
    metrics: Arc<RecordingMetrics>,
}

fn harness(triggers: Vec<Trigger>) -> Harness {
    let sender = Arc::new(RecordingSender::default());
    let local_actions = Arc::new(RecordingLocalActions::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let pipeline = Arc::new(AlertPipeline::new(
        Arc::new(TriggerTable::new(triggers)),
        Arc::new(Deduplicator::new()),
        sender.clone(),
        local_actions.clone(),
        metrics.clone(),
    ));
    Harness {
        pipeline,
        sender,
        local_actions,
        metrics,
    }
}

#[tokio::test]
async fn welcome_is_logged_only() {
    let h = harness(vec![never_suppressed_trigger("27835", true)]);

    let outcomes = h.pipeline.handle_chunk(&chunk(b"100:v2.3")).await;

    assert!(outcomes.is_empty());
    assert_eq!(h.sender.calls(), 0);
    assert_eq!(h.local_actions.calls(), (0, 0));
    assert!(h.metrics.keys.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_command_is_dropped() {
    let h = harness(vec![never_suppressed_trigger("27835", true)]);

    let outcomes = h.pipeline.handle_chunk(&chunk(b"999:27835")).await;

    assert!(outcomes.is_empty());
    assert_eq!(h.sender.calls(), 0);
}

#[tokio::test]
async fn repeated_alert_within_window_dispatches_once() {
    let h = harness(vec![never_suppressed_trigger("27835", true)]);

    let first = h.pipeline.handle_chunk(&chunk(b"300:a:b:27835")).await;
    let second = h.pipeline.handle_chunk(&chunk(b"300:a:b:27835")).await;

    assert!(matches!(first.as_slice(), [PipelineOutcome::Dispatched { .. }]));
    assert_eq!(second, vec![PipelineOutcome::Duplicate]);
    assert_eq!(h.sender.calls(), 1);
    assert_eq!(h.local_actions.calls(), (1, 1));
    // Metrics see both alerts, duplicate included.
    assert_eq!(*h.metrics.keys.lock().unwrap(), vec!["27835", "27835"]);
}

#[tokio::test]
async fn duplicate_detection_uses_three_second_gap() {
    let h = harness(vec![trigger("27835", false)]);
    let t0 = Instant::now();

    let first = h.pipeline.process_alert("27835", t0, monday_noon()).await;
    let second = h
        .pipeline
        .process_alert("27835", t0 + Duration::from_secs(3), monday_noon())
        .await;

    assert!(matches!(first, PipelineOutcome::Dispatched { .. }));
    assert_eq!(second, PipelineOutcome::Duplicate);
    assert_eq!(h.sender.calls(), 1);
}

#[tokio::test]
async fn alert_after_window_is_processed_again() {
    let h = harness(vec![trigger("27835", false)]);
    let t0 = Instant::now();

    h.pipeline.process_alert("27835", t0, monday_noon()).await;
    let again = h
        .pipeline
        .process_alert("27835", t0 + Duration::from_secs(10), monday_noon())
        .await;

    assert!(matches!(again, PipelineOutcome::Dispatched { .. }));
    assert_eq!(h.sender.calls(), 2);
}

#[tokio::test]
async fn unmatched_key_never_dispatches() {
    let h = harness(vec![trigger("27835", true)]);

    let outcome = h
        .pipeline
        .process_alert("99999", Instant::now(), monday_noon())
        .await;

    assert_eq!(outcome, PipelineOutcome::NotInFilter);
    assert_eq!(h.sender.calls(), 0);
    assert_eq!(h.local_actions.calls(), (0, 0));
    assert_eq!(*h.metrics.keys.lock().unwrap(), vec!["99999"]);
}

#[tokio::test]
async fn unmatched_alert_still_advances_debounce_clock() {
    let h = harness(vec![trigger("27835", false)]);
    let t0 = Instant::now();

    h.pipeline.process_alert("99999", t0, monday_noon()).await;
    let repeat = h
        .pipeline
        .process_alert("99999", t0 + Duration::from_secs(1), monday_noon())
        .await;

    assert_eq!(repeat, PipelineOutcome::Duplicate);
}

#[tokio::test]
async fn suppression_window_absorbs_test_alert() {
    let h = harness(vec![trigger("27835", true)]);

    let outcome = h
        .pipeline
        .process_alert("27835", Instant::now(), saturday_test_time())
        .await;

    assert_eq!(
        outcome,
        PipelineOutcome::Suppressed {
            trigger: "Trigger 27835".to_string()
        }
    );
    assert_eq!(h.sender.calls(), 0);
    assert_eq!(h.local_actions.calls(), (0, 0));
}

#[tokio::test]
async fn non_local_trigger_skips_local_actions() {
    let h = harness(vec![trigger("27835", false)]);

    let outcome = h
        .pipeline
        .process_alert("27835", Instant::now(), monday_noon())
        .await;

    assert!(matches!(
        outcome,
        PipelineOutcome::Dispatched {
            local_actions: false,
            ..
        }
    ));
    assert_eq!(h.sender.calls(), 1);
    assert_eq!(h.local_actions.calls(), (0, 0));
}

#[tokio::test]
async fn failed_dispatch_still_runs_local_actions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dispatcher = Arc::new(
        HttpAlertDispatcher::new(
            format!("{}/api/alarm", server.uri()),
            3,
            Duration::from_millis(10),
        )
        .unwrap(),
    );
    let local_actions = Arc::new(RecordingLocalActions::default());
    let pipeline = AlertPipeline::new(
        Arc::new(TriggerTable::new(vec![trigger("27835", true)])),
        Arc::new(Deduplicator::new()),
        dispatcher,
        local_actions.clone(),
        Arc::new(RecordingMetrics::default()),
    );

    let outcome = pipeline
        .process_alert("27835", Instant::now(), monday_noon())
        .await;

    match outcome {
        PipelineOutcome::Dispatched { outcome, .. } => {
            assert!(!outcome.is_delivered());
            assert_eq!(outcome.attempts(), 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(local_actions.calls(), (1, 1));
}

#[tokio::test]
async fn worker_pool_drains_queue_on_shutdown() {
    let h = harness(vec![
        never_suppressed_trigger("1", false),
        never_suppressed_trigger("2", false),
        never_suppressed_trigger("3", false),
    ]);
    let pool = WorkerPool::spawn(h.pipeline.clone(), 2, 4);
    let tx = pool.sender();

    for chunk in ["300:a:b:1", "300:a:b:2", "300:a:b:3"] {
        tx.send(ReceivedChunk::now(Bytes::from_static(chunk.as_bytes())))
            .await
            .unwrap();
    }
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .unwrap();

    let mut keys = h.sender.keys.lock().unwrap().clone();
    keys.sort();
    assert_eq!(keys, vec!["1", "2", "3"]);
}

/// Sender that holds its worker for a while, like an API that only answers
/// after a long retry cycle.
#[derive(Default)]
struct SlowSender {
    inner: RecordingSender,
    delay: Duration,
}

#[async_trait]
impl AlertSender for SlowSender {
    async fn dispatch(&self, trigger: &Trigger, key: &str) -> DispatchOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner.dispatch(trigger, key).await
    }
}

#[tokio::test]
async fn repeat_queued_behind_busy_worker_is_still_a_duplicate() {
    let sender = Arc::new(SlowSender {
        inner: RecordingSender::default(),
        delay: Duration::from_millis(1500),
    });
    let pipeline = Arc::new(AlertPipeline::new(
        Arc::new(TriggerTable::new(vec![never_suppressed_trigger("27835", false)])),
        Arc::new(Deduplicator::with_window(Duration::from_millis(1000))),
        sender.clone(),
        Arc::new(RecordingLocalActions::default()),
        Arc::new(RecordingMetrics::default()),
    ));
    let pool = WorkerPool::spawn(pipeline, 1, 8);
    let tx = pool.sender();

    // The second copy arrives 100ms after the first but is only picked up
    // once the single worker has spent 1.5s dispatching the first one.
    tx.send(chunk(b"300:a:b:27835")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(chunk(b"300:a:b:27835")).await.unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(10), pool.shutdown())
        .await
        .unwrap();

    assert_eq!(sender.inner.calls(), 1);
}
