//! Integration tests for [`RequestCoordinator`]: cache use, in-flight
//! deduplication, failure delivery and cancellation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use formulaspark::{
    CacheConfig, ColumnContext, ColumnKind, CoordinatorConfig, FingerprintCache, FormulaError,
    FormulaModel, GenerationResult, ModelParameters, PresentationSink, Request,
    RequestCoordinator, Result, ResultSource,
};

// ============================================================================
// Mock model
// ============================================================================

/// Scripted model that counts calls and tracks peak concurrency.
struct ScriptedModel {
    reply: String,
    delay: Duration,
    ping_delay: Duration,
    fail_first: AtomicU32,
    panic_first: AtomicU32,
    online: AtomicBool,
    calls: AtomicU32,
    pings: AtomicU32,
    active: AtomicU32,
    peak: AtomicU32,
    pings_active: AtomicU32,
    pings_peak: AtomicU32,
}

impl ScriptedModel {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            ping_delay: Duration::ZERO,
            fail_first: AtomicU32::new(0),
            panic_first: AtomicU32::new(0),
            online: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            pings: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            pings_active: AtomicU32::new(0),
            pings_peak: AtomicU32::new(0),
        }
    }

    fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(self, times: u32) -> Self {
        self.fail_first.store(times, Ordering::SeqCst);
        self
    }

    fn slow_ping(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    fn panicking(self, times: u32) -> Self {
        self.panic_first.store(times, Ordering::SeqCst);
        self
    }

    fn offline(self) -> Self {
        self.online.store(false, Ordering::SeqCst);
        self
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormulaModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str, _parameters: &ModelParameters) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .panic_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("model backend crashed");
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Err(FormulaError::ClientRequest {
                status: 400,
                message: "bad prompt".into(),
            });
        }
        Ok(self.reply.clone())
    }

    async fn ping(&self) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let now = self.pings_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.pings_peak.fetch_max(now, Ordering::SeqCst);
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        self.pings_active.fetch_sub(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn coordinator(model: Arc<ScriptedModel>) -> (RequestCoordinator, Arc<FingerprintCache>) {
    coordinator_with(model, CoordinatorConfig::new())
}

fn coordinator_with(
    model: Arc<ScriptedModel>,
    config: CoordinatorConfig,
) -> (RequestCoordinator, Arc<FingerprintCache>) {
    let cache = Arc::new(FingerprintCache::new(CacheConfig::new()));
    let coordinator = RequestCoordinator::with_config(Arc::clone(&cache), model, config);
    (coordinator, cache)
}

fn sales_request() -> Request {
    Request::new("Sum @Sales where @Region equals North")
        .column(ColumnContext::new("Sales", "B", ColumnKind::Numeric))
        .column(ColumnContext::new("Region", "C", ColumnKind::Text))
}

#[derive(Default)]
struct RecordingSink {
    progress: Mutex<Vec<String>>,
    results: Mutex<Vec<GenerationResult>>,
    errors: Mutex<Vec<String>>,
}

impl PresentationSink for RecordingSink {
    fn on_progress(&self, message: &str) {
        self.progress.lock().unwrap().push(message.to_string());
    }

    fn on_result(&self, result: &GenerationResult) {
        self.results.lock().unwrap().push(result.clone());
    }

    fn on_error(&self, error: &FormulaError) {
        self.errors.lock().unwrap().push(error.category().to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn miss_then_hit() {
    let model = Arc::new(ScriptedModel::new("=SUMIFS(B:B,C:C,\"North\")"));
    let (coordinator, cache) = coordinator(Arc::clone(&model));

    let first = coordinator.generate(&sales_request()).await.unwrap();
    assert_eq!(first.formula, "=SUMIFS(B:B,C:C,\"North\")");
    assert_eq!(first.source, ResultSource::Model);
    assert!(first.validation.is_none());

    let second = coordinator.generate(&sales_request()).await.unwrap();
    assert_eq!(second.formula, first.formula);
    assert_eq!(second.source, ResultSource::Cache);
    assert_eq!(model.call_count(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn normalized_duplicates_share_a_cache_slot() {
    let model = Arc::new(ScriptedModel::new("=SUM(B:B)"));
    let (coordinator, _) = coordinator(Arc::clone(&model));

    coordinator.generate(&Request::new("Total of  column B")).await.unwrap();
    let again = coordinator
        .generate(&Request::new("  total OF column b "))
        .await
        .unwrap();
    assert_eq!(again.source, ResultSource::Cache);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_make_one_model_call() {
    let model = Arc::new(ScriptedModel::new("=SUMIFS(B:B,C:C,\"North\")").delay(Duration::from_millis(200)));
    let (coordinator, _) = coordinator(Arc::clone(&model));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.generate(&sales_request()).await
        }));
    }

    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.formula, "=SUMIFS(B:B,C:C,\"North\")");
    }
    assert_eq!(model.call_count(), 1);
    assert_eq!(model.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_observe_the_same_error_and_failures_are_not_cached() {
    let model = Arc::new(
        ScriptedModel::new("=A1")
            .delay(Duration::from_millis(100))
            .failing(1),
    );
    let (coordinator, cache) = coordinator(Arc::clone(&model));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.generate(&Request::new("double A1")).await
        }));
    }
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(
            matches!(err, FormulaError::ClientRequest { status: 400, .. }),
            "got {err:?}"
        );
    }
    assert_eq!(model.call_count(), 1);
    assert!(cache.is_empty());

    // The next identical request goes back to the model.
    let result = coordinator.generate(&Request::new("double A1")).await.unwrap();
    assert_eq!(result.source, ResultSource::Model);
    assert_eq!(model.call_count(), 2);
}

#[tokio::test]
async fn panicking_call_releases_its_slot() {
    let model = Arc::new(ScriptedModel::new("=SUM(B:B)").panicking(1));
    let (coordinator, cache) = coordinator(Arc::clone(&model));

    let err = coordinator.generate(&Request::new("total of B")).await.unwrap_err();
    assert!(matches!(err, FormulaError::TaskFailed(_)), "got {err:?}");
    assert_eq!(coordinator.in_flight(), 0);
    assert!(cache.is_empty());

    // The fingerprint is not stuck on the dead call.
    let result = coordinator.generate(&Request::new("total of B")).await.unwrap();
    assert_eq!(result.formula, "=SUM(B:B)");
    assert_eq!(result.source, ResultSource::Model);
    assert_eq!(model.call_count(), 2);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn health_checks_do_not_take_a_worker() {
    let model = Arc::new(ScriptedModel::new("=A1").slow_ping(Duration::from_millis(100)));
    let (coordinator, _) =
        coordinator_with(Arc::clone(&model), CoordinatorConfig::new().workers(1));

    let first = Request::new("first");
    let second = Request::new("second");
    let (a, b) = tokio::join!(
        coordinator.generate(&first),
        coordinator.generate(&second),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(model.pings_peak.load(Ordering::SeqCst), 2);
    assert_eq!(model.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_wait_still_fills_the_cache() {
    let model = Arc::new(ScriptedModel::new("=MAX(A:A)").delay(Duration::from_millis(150)));
    let (coordinator, cache) = coordinator(Arc::clone(&model));

    let handle = coordinator.submit(Request::new("largest value in A"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();
    let err = handle.await.unwrap_err();
    assert!(matches!(err, FormulaError::Cancelled));

    // The model call itself keeps going.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.len(), 1);

    let result = coordinator.generate(&Request::new("largest value in A")).await.unwrap();
    assert_eq!(result.source, ResultSource::Cache);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn offline_endpoint_fails_fast() {
    let model = Arc::new(ScriptedModel::new("=A1").offline());
    let (coordinator, _) = coordinator(Arc::clone(&model));

    let err = coordinator.generate(&Request::new("anything")).await.unwrap_err();
    assert!(matches!(err, FormulaError::EndpointUnreachable(_)));
    assert_eq!(err.category(), "offline");
    assert_eq!(model.call_count(), 0);

    // The probe result is memoized between requests.
    let _ = coordinator.generate(&Request::new("something else")).await;
    assert_eq!(model.pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_check_can_be_disabled() {
    let model = Arc::new(ScriptedModel::new("=A1").offline());
    let (coordinator, _) =
        coordinator_with(Arc::clone(&model), CoordinatorConfig::new().health_check(false));

    let result = coordinator.generate(&Request::new("anything")).await.unwrap();
    assert_eq!(result.formula, "=A1");
    assert_eq!(model.pings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_output_is_cleaned() {
    let model = Arc::new(ScriptedModel::new("```excel\nAVERAGE(D2:D20)\n```"));
    let (coordinator, _) = coordinator(model);

    let result = coordinator.generate(&Request::new("average of D")).await.unwrap();
    assert_eq!(result.formula, "=AVERAGE(D2:D20)");
}

#[tokio::test]
async fn unusable_output_is_an_empty_response() {
    let model = Arc::new(ScriptedModel::new("``` ```"));
    let (coordinator, cache) = coordinator(model);

    let err = coordinator.generate(&Request::new("anything")).await.unwrap_err();
    assert!(matches!(err, FormulaError::EmptyResponse));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn invalid_request_is_rejected_before_the_model() {
    let model = Arc::new(ScriptedModel::new("=A1"));
    let (coordinator, _) = coordinator(Arc::clone(&model));

    let err = coordinator.generate(&Request::new("   ")).await.unwrap_err();
    assert!(matches!(err, FormulaError::InvalidInput(_)));
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn disabled_cache_calls_the_model_every_time() {
    let model = Arc::new(ScriptedModel::new("=A1"));
    let (coordinator, cache) =
        coordinator_with(Arc::clone(&model), CoordinatorConfig::new().cache_enabled(false));

    coordinator.generate(&Request::new("A1")).await.unwrap();
    let second = coordinator.generate(&Request::new("A1")).await.unwrap();
    assert_eq!(second.source, ResultSource::Model);
    assert_eq!(model.call_count(), 2);
    assert!(cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_model_concurrency() {
    let model = Arc::new(ScriptedModel::new("=A1").delay(Duration::from_millis(50)));
    let (coordinator, _) =
        coordinator_with(Arc::clone(&model), CoordinatorConfig::new().workers(1));

    let handles: Vec<_> = (0..4)
        .map(|i| coordinator.submit(Request::new(format!("request number {i}"))))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(model.call_count(), 4);
    assert_eq!(model.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sink_receives_progress_then_result() {
    let model = Arc::new(ScriptedModel::new("=SUM(B:B)"));
    let (coordinator, _) = coordinator(model);
    let sink = Arc::new(RecordingSink::default());

    let result = coordinator
        .submit_to(Request::new("sum B"), sink.clone())
        .await
        .unwrap();

    assert_eq!(result.formula, "=SUM(B:B)");
    assert_eq!(*sink.progress.lock().unwrap(), vec!["generating formula"]);
    assert_eq!(sink.results.lock().unwrap().len(), 1);
    assert!(sink.errors.lock().unwrap().is_empty());

    let cached = Arc::new(RecordingSink::default());
    coordinator
        .submit_to(Request::new("sum B"), cached.clone())
        .await
        .unwrap();
    assert_eq!(*cached.progress.lock().unwrap(), vec!["found formula in cache"]);
    assert_eq!(cached.results.lock().unwrap()[0].source, ResultSource::Cache);
}

#[tokio::test]
async fn sink_receives_errors() {
    let model = Arc::new(ScriptedModel::new("=A1").offline());
    let (coordinator, _) = coordinator(model);
    let sink = Arc::new(RecordingSink::default());

    let outcome = coordinator.submit_to(Request::new("A1"), sink.clone()).await;
    assert!(outcome.is_err());
    assert_eq!(*sink.errors.lock().unwrap(), vec!["offline"]);
    assert!(sink.results.lock().unwrap().is_empty());
}

#[tokio::test]
async fn close_flushes_the_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let cache = Arc::new(FingerprintCache::open(CacheConfig::new().path(&path)));
    let model = Arc::new(ScriptedModel::new("=A1+B1"));
    let coordinator = RequestCoordinator::new(Arc::clone(&cache), model);

    coordinator.generate(&Request::new("add A1 and B1")).await.unwrap();
    coordinator.close().unwrap();

    let reopened = FingerprintCache::open(CacheConfig::new().path(&path));
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.entries()[0].formula, "=A1+B1");
}
