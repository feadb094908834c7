//! FormulaSpark - natural-language to spreadsheet formula pipeline
//!
//! This crate turns a description plus spreadsheet context into a formula,
//! using a locally hosted language model. The pipeline:
//!
//! - [`FingerprintCache`] maps a digest of the normalized request to a
//!   previously generated formula, with LRU/TTL eviction and a persisted file.
//! - [`ModelClient`] talks to an Ollama-compatible endpoint with bounded
//!   retries, exponential backoff and per-attempt timeouts.
//! - [`RequestCoordinator`] checks the cache, deduplicates identical in-flight
//!   requests and calls the model on a miss.
//! - [`FormulaValidator`] proves a formula parses and evaluates in a scratch
//!   cell of a live [`SpreadsheetSession`] before it is shown as ready.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use formulaspark::{
//!     ColumnContext, ColumnKind, FingerprintCache, Request, RequestCoordinator, Settings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> formulaspark::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let cache = Arc::new(FingerprintCache::open(settings.cache_config()));
//!     cache.start_autosave();
//!     let coordinator = RequestCoordinator::with_config(
//!         cache,
//!         Arc::new(settings.model_client()?),
//!         settings.coordinator_config(),
//!     );
//!
//!     let request = Request::new("Sum @Sales where @Region equals North")
//!         .column(ColumnContext::new("Sales", "B", ColumnKind::Numeric))
//!         .column(ColumnContext::new("Region", "C", ColumnKind::Text))
//!         .parameters(settings.model_parameters());
//!
//!     let result = coordinator.generate(&request).await?;
//!     println!("{} ({:?})", result.formula, result.source);
//!
//!     coordinator.close()
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod prompt;
pub mod providers;
pub mod telemetry;
pub mod types;
pub mod validator;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheEntry, CacheStats, Fingerprint, FingerprintCache};
pub use config::{ConfigStore, Settings};
pub use coordinator::{CoordinatorConfig, GenerationHandle, PresentationSink, RequestCoordinator};
pub use error::{FormulaError, Result};
pub use providers::{FormulaModel, HealthProbe, ModelClient, RetryConfig, RetryState};
pub use validator::{CellValue, FormulaValidator, HeaderInfo, SpreadsheetSession, ValidationPhase};

// Re-export all types
pub use types::{
    ColumnContext, ColumnKind, GenerationResult, ModelParameters, Request, ResultSource,
    ValidationFailure, ValidationOutcome,
};
