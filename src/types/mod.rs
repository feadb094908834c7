//! Public types for the FormulaSpark API.

mod request;
mod result;

pub use request::{ColumnContext, ColumnKind, ModelParameters, Request};
pub use result::{GenerationResult, ResultSource, ValidationFailure, ValidationOutcome};
