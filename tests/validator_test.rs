//! Integration tests for [`FormulaValidator`] against an in-memory session.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use formulaspark::validator::ValidationPhase;
use formulaspark::{
    CellValue, ColumnKind, FormulaError, FormulaValidator, GenerationResult, HeaderInfo, Result,
    SpreadsheetSession, ValidationFailure,
};

/// What the fake engine does with a scratch formula.
#[derive(Clone)]
enum Engine {
    Evaluates(&'static str),
    Flags(&'static str),
    Breaks,
    Panics,
}

struct FakeSheet {
    engine: Engine,
    connected: AtomicBool,
    scratch: Mutex<Option<String>>,
    writes: AtomicU32,
    clears: AtomicU32,
    active: AtomicU32,
    peak: AtomicU32,
}

impl FakeSheet {
    fn new(engine: Engine) -> Arc<Self> {
        Arc::new(Self {
            engine,
            connected: AtomicBool::new(true),
            scratch: Mutex::new(None),
            writes: AtomicU32::new(0),
            clears: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        })
    }

    fn scratch_is_empty(&self) -> bool {
        self.scratch.lock().unwrap().is_none()
    }
}

#[async_trait]
impl SpreadsheetSession for FakeSheet {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_headers(&self, sheet: &str) -> Result<Vec<HeaderInfo>> {
        if sheet != "Sales" {
            return Err(FormulaError::Session(format!("no sheet named '{sheet}'")));
        }
        Ok(vec![
            HeaderInfo {
                name: "Region".into(),
                column: "A".into(),
                kind: ColumnKind::Text,
            },
            HeaderInfo {
                name: "Total Sales ($)".into(),
                column: "B".into(),
                kind: ColumnKind::Numeric,
            },
        ])
    }

    async fn write_scratch(&self, formula: &str) -> Result<CellValue> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        *self.scratch.lock().unwrap() = Some(formula.to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &self.engine {
            Engine::Evaluates(value) => Ok(CellValue::Value((*value).to_string())),
            Engine::Flags(error) => Ok(CellValue::Error((*error).to_string())),
            Engine::Breaks => Err(FormulaError::Session("recalculation failed".into())),
            Engine::Panics => panic!("add-in crashed mid-recalculation"),
        }
    }

    async fn clear_scratch(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.scratch.lock().unwrap() = None;
        Ok(())
    }
}

#[tokio::test]
async fn valid_formula_reports_value_and_cleans_up() {
    let sheet = FakeSheet::new(Engine::Evaluates("1250"));
    let validator = FormulaValidator::new(sheet.clone());

    let outcome = validator.validate("=SUMIFS(B:B,C:C,\"North\")").await.unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.evaluated_value.as_deref(), Some("1250"));
    assert!(outcome.error_message.is_none());
    assert!(!outcome.suggestions.is_empty(), "whole-column hint expected");
    assert!(sheet.scratch_is_empty());
    assert_eq!(sheet.clears.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn engine_error_is_invalid_verbatim_and_cleans_up() {
    let sheet = FakeSheet::new(Engine::Flags("#DIV/0!"));
    let validator = FormulaValidator::new(sheet.clone());

    let outcome = validator.validate("=A1/0").await.unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.failure, Some(ValidationFailure::Evaluation));
    assert_eq!(outcome.error_message.as_deref(), Some("#DIV/0!"));
    assert!(sheet.scratch_is_empty());

    let err = outcome.into_result().unwrap_err();
    assert!(err.is_formula_defect());
}

#[tokio::test]
async fn session_failure_is_an_error_and_cleans_up() {
    let sheet = FakeSheet::new(Engine::Breaks);
    let validator = FormulaValidator::new(sheet.clone());

    let err = validator.validate("=A1+1").await.unwrap_err();
    assert!(matches!(err, FormulaError::Session(_)));
    assert!(!err.is_formula_defect());
    assert!(sheet.scratch_is_empty());
    assert_eq!(sheet.clears.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_session_still_clears_the_scratch_cell() {
    let sheet = FakeSheet::new(Engine::Panics);
    let validator = FormulaValidator::new(sheet.clone());

    let err = validator.validate("=SUM(A1:A3)").await.unwrap_err();
    assert!(matches!(err, FormulaError::Session(_)), "got {err:?}");
    assert!(!err.is_formula_defect());
    assert_eq!(sheet.writes.load(Ordering::SeqCst), 1);
    assert_eq!(sheet.clears.load(Ordering::SeqCst), 1);
    assert!(sheet.scratch_is_empty());

    // The scratch lock is released for the next validation.
    let err = validator.validate("=A1+1").await.unwrap_err();
    assert!(matches!(err, FormulaError::Session(_)));
}

#[tokio::test]
async fn syntax_errors_never_touch_the_sheet() {
    let sheet = FakeSheet::new(Engine::Evaluates("0"));
    let validator = FormulaValidator::new(sheet.clone());

    for formula in ["=SUM(A1:A3", "=FOO(A1)", "SUM(A1)", "=A1==B1"] {
        let outcome = validator.validate(formula).await.unwrap();
        assert!(!outcome.ok, "{formula} should be rejected");
        assert_eq!(outcome.failure, Some(ValidationFailure::Syntax));
    }
    assert_eq!(sheet.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnected_session_is_not_a_formula_defect() {
    let sheet = FakeSheet::new(Engine::Evaluates("1"));
    sheet.connected.store(false, Ordering::SeqCst);
    let validator = FormulaValidator::new(sheet.clone());

    let err = validator.validate("=A1").await.unwrap_err();
    assert!(matches!(err, FormulaError::SessionDisconnected));
    assert!(!err.is_formula_defect());
    assert_eq!(sheet.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scratch_writes_are_serialized() {
    let sheet = FakeSheet::new(Engine::Evaluates("3"));
    let validator = FormulaValidator::new(sheet.clone());

    let tasks: Vec<_> = (1..=8)
        .map(|i| {
            let validator = validator.clone();
            tokio::spawn(async move { validator.validate(&format!("=A{i}+1")).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap().ok);
    }

    assert_eq!(sheet.writes.load(Ordering::SeqCst), 8);
    assert_eq!(sheet.peak.load(Ordering::SeqCst), 1);
    assert!(sheet.scratch_is_empty());
}

#[tokio::test]
async fn abandoned_validation_still_cleans_up() {
    let sheet = FakeSheet::new(Engine::Evaluates("7"));
    let validator = FormulaValidator::new(sheet.clone());

    let pending = validator.validate("=A1+B1");
    // Give up almost immediately, mid-evaluation.
    let _ = tokio::time::timeout(Duration::from_millis(1), pending).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(sheet.scratch_is_empty());
}

#[tokio::test]
async fn validate_result_attaches_outcome() {
    let sheet = FakeSheet::new(Engine::Evaluates("42"));
    let validator = FormulaValidator::new(sheet);

    let result = validator
        .validate_result(GenerationResult::from_model("=SUM(A1:A3)"))
        .await
        .unwrap();
    assert!(result.is_ready());
    assert_eq!(
        result.validation.unwrap().evaluated_value.as_deref(),
        Some("42")
    );
}

#[tokio::test]
async fn sheet_context_tags_headers() {
    let sheet = FakeSheet::new(Engine::Evaluates("0"));
    let validator = FormulaValidator::new(sheet.clone());

    let context = validator.sheet_context("Sales").await.unwrap();
    assert_eq!(context.len(), 2);
    assert_eq!(context[1].tag, "TotalSales");
    assert_eq!(context[1].column, "B");
    assert_eq!(context[1].header.as_deref(), Some("Total Sales ($)"));

    assert!(validator.sheet_context("Missing").await.is_err());

    sheet.connected.store(false, Ordering::SeqCst);
    assert!(matches!(
        validator.sheet_context("Sales").await,
        Err(FormulaError::SessionDisconnected)
    ));
}

#[test]
fn phases_display_lowercase() {
    assert_eq!(ValidationPhase::Evaluating.to_string(), "evaluating");
    assert_eq!(ValidationPhase::Invalid.to_string(), "invalid");
}
