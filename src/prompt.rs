//! Prompt construction and cleanup of model output.
//!
//! Three templates, picked by how much sheet context the request carries:
//! no columns, untagged header names, or tagged headers with column ranges.

use std::fmt::Write as _;

use crate::types::{ColumnContext, ColumnKind, Request};

const DEFAULT_SHEET: &str = "Sheet1";

const PREAMBLE: &str = "You are an expert in Microsoft Excel formulas. \
Your only job is to write a single, valid Excel formula for the user's request.";

const CONSTRAINTS: &str = "\
- Respond with ONLY the formula, starting with '='.
- Do not include explanations, notes or code fences.

The final, complete Excel formula is:
";

/// Build the prompt for a request.
pub fn build_prompt(request: &Request) -> String {
    let sheet = request
        .sheet_name()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SHEET);
    let description = request.description().trim();
    let columns = request.columns();

    let mut prompt = String::with_capacity(1024);
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n");
    let _ = writeln!(prompt, "- Sheet: '{sheet}'.");

    if columns.is_empty() {
        let _ = writeln!(prompt, "- Request: \"{description}\".");
        prompt.push_str("- Example: for \"sum A1 and B1\" answer exactly =SUM(A1,B1).\n");
    } else if columns.iter().all(|c| c.tag == c.header_text()) && !mentions_tags(description) {
        let headers = columns
            .iter()
            .map(|c| format!("'{}' (column {})", c.header_text(), c.column))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(prompt, "- Headers in the first row: {headers}.");
        let _ = writeln!(prompt, "- Request: \"{description}\".");
        prompt.push_str("- Use the headers to infer the correct ranges and criteria.\n");
    } else {
        prompt.push_str("- Tagged headers:\n");
        for column in columns {
            let _ = writeln!(prompt, "  {}", tag_line(column));
        }
        let dates: Vec<&str> = columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Date)
            .map(|c| c.column.as_str())
            .collect();
        if !dates.is_empty() {
            let _ = writeln!(prompt, "- Date columns: {}.", dates.join(", "));
            prompt.push_str("- Compare dates with DATE(year, month, day), never text dates.\n");
        }
        let _ = writeln!(prompt, "- Request: \"{description}\".");
        prompt.push_str(
            "- The request refers to columns by tag (e.g. @Sales). Use the matching column range.\n",
        );
    }

    prompt.push_str(CONSTRAINTS);
    prompt
}

fn mentions_tags(description: &str) -> bool {
    description
        .split_whitespace()
        .any(|w| w.starts_with('@') && w.len() > 1)
}

/// `@Sales (Sales) = Column B (B:B), numeric, e.g. 120, 75`
fn tag_line(column: &ColumnContext) -> String {
    let mut line = format!(
        "@{} ({}) = Column {} ({}), {}",
        column.tag,
        column.header_text(),
        column.column,
        column.range(),
        column.kind
    );
    if !column.samples.is_empty() {
        let samples = column
            .samples
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(line, ", e.g. {samples}");
    }
    line
}

/// Turn raw model output into a formula string.
///
/// Strips code fences and backticks, drops a leading `excel` label, keeps the
/// first non-empty line and ensures a leading `=`. Returns an empty string
/// when nothing usable remains.
pub fn clean_formula(raw: &str) -> String {
    let without_fences = raw.replace("```excel", "").replace("```", "").replace('`', "");
    let mut text = without_fences.trim();

    if text.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("excel")) {
        text = text[5..].trim_start_matches(':').trim();
    }

    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.is_empty() {
        return String::new();
    }
    if line.starts_with('=') {
        return line.to_string();
    }
    // `Formula: =SUM(B:B)` keeps only the formula.
    if let Some(at) = line.find('=') {
        if is_label(&line[..at]) && !line[at + 1..].trim().is_empty() {
            return line[at..].trim().to_string();
        }
    }
    format!("={line}")
}

/// Prose ahead of a formula: words and spaces, ending in a colon or a space.
fn is_label(prefix: &str) -> bool {
    let words = prefix.trim_end();
    !words.is_empty()
        && (words.ends_with(':') || prefix.ends_with(' '))
        && words
            .trim_end_matches(':')
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_prompt_without_context() {
        let prompt = build_prompt(&Request::new("sum A1 and B1").sheet("Budget"));
        assert!(prompt.contains("'Budget'"));
        assert!(prompt.contains("\"sum A1 and B1\""));
        assert!(!prompt.contains("Tagged headers"));
    }

    #[test]
    fn tagged_prompt_lists_columns() {
        let request = Request::new("Sum @Sales where @Region equals North")
            .column(ColumnContext::new("Sales", "B", ColumnKind::Numeric).samples(["120", "75"]))
            .column(ColumnContext::new("Region", "C", ColumnKind::Text));
        let prompt = build_prompt(&request);
        assert!(prompt.contains("@Sales (Sales) = Column B (B:B), numeric, e.g. 120, 75"));
        assert!(prompt.contains("@Region (Region) = Column C (C:C), text"));
        assert!(prompt.contains("Sheet: 'Sheet1'"));
    }

    #[test]
    fn header_prompt_without_tags() {
        let request = Request::new("total of sales")
            .column(ColumnContext::new("Sales", "D", ColumnKind::Numeric));
        let prompt = build_prompt(&request);
        assert!(prompt.contains("'Sales' (column D)"));
    }

    #[test]
    fn date_columns_are_called_out() {
        let request = Request::new("count @Paid in 2024")
            .column(ColumnContext::new("Paid", "K", ColumnKind::Date).header("Payment Date"));
        let prompt = build_prompt(&request);
        assert!(prompt.contains("Date columns: K"));
        assert!(prompt.contains("@Paid (Payment Date)"));
    }

    #[test]
    fn clean_strips_fences_and_label() {
        assert_eq!(
            clean_formula("```excel\n=SUMIFS(B:B,C:C,\"North\")\n```"),
            "=SUMIFS(B:B,C:C,\"North\")"
        );
        assert_eq!(clean_formula("excel =MAX(A:A)"), "=MAX(A:A)");
        assert_eq!(clean_formula("`=A1+B1`"), "=A1+B1");
    }

    #[test]
    fn clean_adds_equals_sign() {
        assert_eq!(clean_formula("SUM(A1:A10)"), "=SUM(A1:A10)");
    }

    #[test]
    fn clean_drops_a_prose_label() {
        assert_eq!(clean_formula("Excel formula: =SUM(B:B)"), "=SUM(B:B)");
        assert_eq!(clean_formula("Formula: =AVERAGE(C2:C9)"), "=AVERAGE(C2:C9)");
        assert_eq!(clean_formula("The answer is =MAX(A:A)"), "=MAX(A:A)");
    }

    #[test]
    fn clean_keeps_comparisons_without_a_label() {
        assert_eq!(clean_formula("IF(A1=1,\"yes\",\"no\")"), "=IF(A1=1,\"yes\",\"no\")");
        assert_eq!(clean_formula("A1 = B1"), "=A1 = B1");
    }

    #[test]
    fn clean_keeps_first_line() {
        assert_eq!(clean_formula("=A1\nThis adds A1."), "=A1");
    }

    #[test]
    fn clean_empty_output() {
        assert_eq!(clean_formula("  ``` ```  "), "");
    }
}
