//! Request orchestration.
//!
//! [`RequestCoordinator`] is the single entry point from a request to a
//! formula: cache lookup, deduplication of identical in-flight requests,
//! the model call on a miss, and cache population on success.
//!
//! Every model call runs on its own task. Callers wait on a `watch` channel
//! that carries the final outcome, so any number of waiters observe the same
//! success or the same error, and a waiter giving up never stops the call.

mod handle;

pub use handle::{GenerationHandle, PresentationSink};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use crate::cache::{Fingerprint, FingerprintCache};
use crate::prompt::{build_prompt, clean_formula};
use crate::providers::{FormulaModel, HealthProbe};
use crate::providers::health::DEFAULT_HEALTH_TTL;
use crate::telemetry;
use crate::types::{GenerationResult, Request};
use crate::{FormulaError, Result};

/// Largest background worker pool the coordinator will run.
pub const MAX_WORKERS: usize = 4;

/// Configuration for the request coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Model calls allowed at once, across all fingerprints. Clamped to
    /// `1..=4`. Default: 2.
    pub workers: usize,
    /// Probe the endpoint before a model call and fail fast when it is down.
    /// Default: true.
    pub health_check: bool,
    /// How long a probe result is trusted. Default: 5s.
    pub health_ttl: Duration,
    /// Read from and write to the fingerprint cache. Default: true.
    pub cache_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            health_check: true,
            health_ttl: DEFAULT_HEALTH_TTL,
            cache_enabled: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.clamp(1, MAX_WORKERS);
        self
    }

    pub fn health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    pub fn health_ttl(mut self, ttl: Duration) -> Self {
        self.health_ttl = ttl;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }
}

/// `None` until the in-flight call finishes.
type Outcome = Option<Result<String>>;

struct Inner {
    cache: Arc<FingerprintCache>,
    model: Arc<dyn FormulaModel>,
    health: HealthProbe,
    workers: Arc<Semaphore>,
    in_flight: DashMap<Fingerprint, watch::Receiver<Outcome>>,
    config: CoordinatorConfig,
}

/// How a cache miss is served.
enum Pending {
    /// Filled by a call that finished between the lookup and the claim.
    Cached(String),
    Waiting(watch::Receiver<Outcome>),
}

/// Turns requests into formulas, calling the model at most once per
/// fingerprint at any moment.
///
/// Cheap to clone; clones share the cache, the in-flight table and the
/// worker pool. The owner tears it down with [`close()`](Self::close).
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use formulaspark::{CacheConfig, FingerprintCache, ModelClient, Request, RequestCoordinator};
/// # async fn example() -> formulaspark::Result<()> {
/// let cache = Arc::new(FingerprintCache::open(CacheConfig::new()));
/// let model = Arc::new(ModelClient::new("llama3")?);
/// let coordinator = RequestCoordinator::new(cache, model);
///
/// let result = coordinator.generate(&Request::new("sum of column B")).await?;
/// println!("{}", result.formula);
/// coordinator.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    pub fn new(cache: Arc<FingerprintCache>, model: Arc<dyn FormulaModel>) -> Self {
        Self::with_config(cache, model, CoordinatorConfig::default())
    }

    pub fn with_config(
        cache: Arc<FingerprintCache>,
        model: Arc<dyn FormulaModel>,
        config: CoordinatorConfig,
    ) -> Self {
        let workers = config.workers.clamp(1, MAX_WORKERS);
        Self {
            inner: Arc::new(Inner {
                cache,
                model,
                health: HealthProbe::new(config.health_ttl),
                workers: Arc::new(Semaphore::new(workers)),
                in_flight: DashMap::new(),
                config,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.inner.cache
    }

    pub fn model_name(&self) -> &str {
        self.inner.model.name()
    }

    /// Number of distinct fingerprints with a model call in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Produce a formula for `request`.
    ///
    /// Returns a cached formula when there is one, joins an identical
    /// in-flight call when there is one, and otherwise calls the model.
    /// Formulas are never validated here.
    pub async fn generate(&self, request: &Request) -> Result<GenerationResult> {
        self.generate_inner(request, None).await
    }

    /// Run [`generate()`](Self::generate) in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: Request) -> GenerationHandle {
        let coordinator = self.clone();
        GenerationHandle::new(tokio::spawn(async move {
            coordinator.generate_inner(&request, None).await
        }))
    }

    /// Run a request in the background and report to `sink`.
    ///
    /// The sink receives progress messages and then exactly one of
    /// `on_result` / `on_error`, unless the handle is cancelled first.
    pub fn submit_to(&self, request: Request, sink: Arc<dyn PresentationSink>) -> GenerationHandle {
        let coordinator = self.clone();
        GenerationHandle::new(tokio::spawn(async move {
            let outcome = coordinator.generate_inner(&request, Some(sink.as_ref())).await;
            match &outcome {
                Ok(result) => sink.on_result(result),
                Err(e) => sink.on_error(e),
            }
            outcome
        }))
    }

    /// Flush the cache and stop its autosave task.
    pub fn close(&self) -> Result<()> {
        info!(model = self.model_name(), "closing request coordinator");
        self.inner.cache.close()
    }

    async fn generate_inner(
        &self,
        request: &Request,
        sink: Option<&dyn PresentationSink>,
    ) -> Result<GenerationResult> {
        request.validate()?;
        let fingerprint = Fingerprint::of(request, self.inner.model.name());

        if self.inner.config.cache_enabled {
            if let Some(entry) = self.inner.cache.lookup(&fingerprint) {
                progress(sink, "found formula in cache");
                return Ok(GenerationResult::from_cache(entry.formula));
            }
        }

        let mut rx = match self.claim(&fingerprint, request) {
            Pending::Cached(formula) => {
                progress(sink, "found formula in cache");
                return Ok(GenerationResult::from_cache(formula));
            }
            Pending::Waiting(rx) => rx,
        };
        progress(sink, "generating formula");

        let outcome: Outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FormulaError::TaskFailed("generation ended without an outcome".into()))?
            .clone();
        match outcome {
            Some(Ok(formula)) => Ok(GenerationResult::from_model(formula)),
            Some(Err(e)) => Err(e),
            None => Err(FormulaError::TaskFailed(
                "generation ended without an outcome".into(),
            )),
        }
    }

    /// Join the in-flight call for `fingerprint`, or start one.
    fn claim(&self, fingerprint: &Fingerprint, request: &Request) -> Pending {
        match self.inner.in_flight.entry(fingerprint.clone()) {
            Entry::Occupied(slot) => {
                metrics::counter!(telemetry::DEDUP_JOINS_TOTAL).increment(1);
                debug!(fingerprint = fingerprint.short(), "joining in-flight generation");
                Pending::Waiting(slot.get().clone())
            }
            Entry::Vacant(slot) => {
                // A call may have finished since the lookup; it fills the
                // cache before leaving the table.
                if self.inner.config.cache_enabled {
                    if let Some(entry) = self.inner.cache.peek(fingerprint) {
                        return Pending::Cached(entry.formula);
                    }
                }
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                debug!(fingerprint = fingerprint.short(), "starting generation");
                tokio::spawn(run_generation(
                    Arc::clone(&self.inner),
                    fingerprint.clone(),
                    request.clone(),
                    tx,
                ));
                Pending::Waiting(rx)
            }
        }
    }
}

impl fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("model", &self.inner.model.name())
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

fn progress(sink: Option<&dyn PresentationSink>, message: &str) {
    if let Some(sink) = sink {
        sink.on_progress(message);
    }
}

/// Owns one in-flight model call from start to the last waiter.
async fn run_generation(
    inner: Arc<Inner>,
    fingerprint: Fingerprint,
    request: Request,
    tx: watch::Sender<Outcome>,
) {
    let slot = InFlightSlot {
        inner: Arc::clone(&inner),
        fingerprint: fingerprint.clone(),
        tx: Some(tx),
    };
    let outcome = inner.produce(&request).await;

    match &outcome {
        Ok(formula) => {
            if inner.config.cache_enabled {
                if let Err(e) = inner.cache.put(fingerprint.clone(), formula.as_str()) {
                    warn!(fingerprint = fingerprint.short(), error = %e, "failed to cache formula");
                }
            }
            info!(fingerprint = fingerprint.short(), formula = %formula, "formula generated");
        }
        Err(e) => {
            warn!(
                fingerprint = fingerprint.short(),
                category = e.category(),
                error = %e,
                "formula generation failed"
            );
        }
    }

    slot.complete(outcome);
}

/// Releases the in-flight table entry exactly once.
///
/// Dropped without [`complete()`](Self::complete) when the call unwinds, in
/// which case waiters receive [`FormulaError::TaskFailed`] and the next
/// identical request starts a fresh call.
struct InFlightSlot {
    inner: Arc<Inner>,
    fingerprint: Fingerprint,
    tx: Option<watch::Sender<Outcome>>,
}

impl InFlightSlot {
    /// The cache is filled before this runs, so a request arriving after
    /// the entry leaves the table finds the formula there.
    fn complete(mut self, outcome: Result<String>) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: Result<String>) {
        if let Some(tx) = self.tx.take() {
            self.inner.in_flight.remove(&self.fingerprint);
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(fingerprint = self.fingerprint.short(), "generation task ended abnormally");
            self.release(Err(FormulaError::TaskFailed("generation task panicked".into())));
        }
    }
}

impl Inner {
    async fn produce(&self, request: &Request) -> Result<String> {
        let name = self.model.name().to_string();

        if self.config.health_check {
            let model = Arc::clone(&self.model);
            let online = self
                .health
                .check(&name, || async move { model.ping().await })
                .await;
            if !online {
                metrics::counter!(telemetry::OFFLINE_REJECTIONS_TOTAL).increment(1);
                return Err(FormulaError::EndpointUnreachable(format!(
                    "model endpoint for '{name}' did not answer the health check"
                )));
            }
        }

        // Health checks never hold a worker permit.
        let _permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| FormulaError::TaskFailed("worker pool closed".into()))?;

        let prompt = build_prompt(request);
        let raw = match self.model.generate(&prompt, &request.model_parameters()).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.root_cause().is_transient() {
                    self.health.invalidate(&name);
                }
                return Err(e);
            }
        };

        let formula = clean_formula(&raw);
        if formula.is_empty() {
            return Err(FormulaError::EmptyResponse);
        }
        Ok(formula)
    }
}
