//! Model providers.
//!
//! - [`traits::FormulaModel`]: the seam the coordinator calls through.
//! - [`ollama::ModelClient`]: HTTP client for the local model endpoint.
//! - [`retry`]: backoff policy shared by every outbound call.
//! - [`health::HealthProbe`]: memoized liveness checks.

pub mod health;
pub mod ollama;
pub mod retry;
pub mod traits;

pub use health::HealthProbe;
pub use ollama::ModelClient;
pub use retry::{RetryConfig, RetryState};
pub use traits::FormulaModel;
