//! Spreadsheet session interface and header helpers.
//!
//! The host application owns the spreadsheet connection; this crate only
//! consumes it through [`SpreadsheetSession`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::{ColumnContext, ColumnKind};

/// One header cell from a sheet's first row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub name: String,
    /// Column letter(s), e.g. `"C"`.
    pub column: String,
    pub kind: ColumnKind,
}

/// What a scratch cell holds after recalculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellValue {
    /// The formula evaluated; the displayed value.
    Value(String),
    /// The engine flagged an error, e.g. `#NAME?` or `#DIV/0!`.
    Error(String),
}

/// A live connection to a spreadsheet.
///
/// Implementations return [`FormulaError::SessionDisconnected`](crate::FormulaError::SessionDisconnected)
/// when the spreadsheet is gone, and [`FormulaError::Session`](crate::FormulaError::Session)
/// for any other failure of the connection itself. A formula that evaluates
/// to an error is not a session failure: it is `Ok(CellValue::Error(..))`.
#[async_trait]
pub trait SpreadsheetSession: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Headers of `sheet`, left to right.
    async fn get_headers(&self, sheet: &str) -> Result<Vec<HeaderInfo>>;

    /// Write `formula` into the scratch cell, recalculate, and read it back.
    ///
    /// The scratch cell lies outside every user-visible range.
    async fn write_scratch(&self, formula: &str) -> Result<CellValue>;

    /// Empty the scratch cell.
    async fn clear_scratch(&self) -> Result<()>;
}

/// Column letters for a 0-based index: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Derive a `@Tag`-style tag (without the `@`) from a header.
///
/// Punctuation is dropped and words are joined in CamelCase, with common
/// prefixes shortened: "Beginning Balance" → `BeginBalance`,
/// "Total Sales ($)" → `TotalSales`.
pub fn smart_tag(header: &str) -> String {
    let cleaned: String = header
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() || c == '_' { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|w| !w.is_empty())
        .collect();

    let Some((first, rest)) = words.split_first() else {
        return String::new();
    };
    let head = match first.to_lowercase().as_str() {
        "beginning" | "start" if !rest.is_empty() => "Begin".to_string(),
        "ending" | "end" if !rest.is_empty() => "End".to_string(),
        "total" | "sum" if !rest.is_empty() => "Total".to_string(),
        _ => capitalize(first),
    };
    std::iter::once(head)
        .chain(rest.iter().map(|w| capitalize(w)))
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Build request context from discovered headers, tagging each one.
pub fn context_from_headers(headers: &[HeaderInfo]) -> Vec<ColumnContext> {
    headers
        .iter()
        .filter(|h| !h.name.trim().is_empty())
        .map(|h| {
            let tag = smart_tag(&h.name);
            let tag = if tag.is_empty() { h.column.clone() } else { tag };
            ColumnContext::new(tag, h.column.clone(), h.kind).header(h.name.trim())
        })
        .collect()
}
