//! Telemetry metric name constants.
//!
//! Centralised metric names for formulaspark operations. Hosts install their
//! own `metrics` recorder; without one, all metric calls are no-ops.
//!
//! All metrics are prefixed with `formulaspark_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status`: "ok" or "error"
//! - `reason`: eviction reason, "capacity" or "expired"
//! - `outcome`: validation verdict, "valid", "invalid" or "error"

/// Requests sent to the model endpoint (one per logical generation).
///
/// Labels: `status` ("ok" | "error").
pub const MODEL_REQUESTS_TOTAL: &str = "formulaspark_model_requests_total";

/// Model request duration in seconds, retries included.
pub const MODEL_REQUEST_DURATION_SECONDS: &str = "formulaspark_model_request_duration_seconds";

/// Retry attempts (not counting the initial request).
///
/// Labels: `operation` (e.g. "generate").
pub const RETRIES_TOTAL: &str = "formulaspark_retries_total";

/// Fingerprint cache hits.
pub const CACHE_HITS_TOTAL: &str = "formulaspark_cache_hits_total";

/// Fingerprint cache misses.
pub const CACHE_MISSES_TOTAL: &str = "formulaspark_cache_misses_total";

/// Entries removed by eviction.
///
/// Labels: `reason` ("capacity" | "expired").
pub const CACHE_EVICTIONS_TOTAL: &str = "formulaspark_cache_evictions_total";

/// Requests that joined an identical in-flight generation.
pub const DEDUP_JOINS_TOTAL: &str = "formulaspark_dedup_joins_total";

/// Requests rejected because the endpoint health check failed.
pub const OFFLINE_REJECTIONS_TOTAL: &str = "formulaspark_offline_rejections_total";

/// Validation calls.
///
/// Labels: `outcome` ("valid" | "invalid" | "error").
pub const VALIDATIONS_TOTAL: &str = "formulaspark_validations_total";
