//! Asynchronous delivery of generation outcomes.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::types::GenerationResult;
use crate::{FormulaError, Result};

/// Receives progress and the final outcome of a submitted request.
///
/// Callbacks run on a runtime worker, never on the caller's thread; a UI
/// host forwards them to its own event loop.
pub trait PresentationSink: Send + Sync {
    /// Intermediate status, e.g. "generating formula".
    fn on_progress(&self, _message: &str) {}

    fn on_result(&self, result: &GenerationResult);

    fn on_error(&self, error: &FormulaError);
}

/// A request running in the background.
///
/// Awaiting the handle yields the outcome. [`cancel()`](Self::cancel) abandons
/// this caller's wait only: a model call already in flight still completes
/// and fills the cache.
#[must_use = "the outcome is only observable by awaiting the handle"]
#[derive(Debug)]
pub struct GenerationHandle {
    task: JoinHandle<Result<GenerationResult>>,
}

impl GenerationHandle {
    pub(crate) fn new(task: JoinHandle<Result<GenerationResult>>) -> Self {
        Self { task }
    }

    /// Stop waiting. The handle then resolves to [`FormulaError::Cancelled`].
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for GenerationHandle {
    type Output = Result<GenerationResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(FormulaError::Cancelled),
            Err(e) => Err(FormulaError::TaskFailed(e.to_string())),
        })
    }
}
