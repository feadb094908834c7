//! The model seam.
//!
//! The coordinator talks to the model only through [`FormulaModel`], so the
//! HTTP client can be swapped for a scripted model in tests or for another
//! backend in a host application.

use async_trait::async_trait;

use crate::Result;
use crate::types::ModelParameters;

/// A text-generation backend that turns prompts into formula text.
///
/// Implementations own their retry policy: one call to
/// [`generate()`](Self::generate) is one logical request, however many
/// physical attempts it takes.
#[async_trait]
pub trait FormulaModel: Send + Sync {
    /// Model name. Part of every request fingerprint, so a cache shared
    /// across models never mixes their answers.
    fn name(&self) -> &str;

    /// Generate raw completion text for a prompt.
    async fn generate(&self, prompt: &str, parameters: &ModelParameters) -> Result<String>;

    /// Lightweight liveness check that does not consume a generation slot.
    ///
    /// Default: always online.
    async fn ping(&self) -> bool {
        true
    }
}
