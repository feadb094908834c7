//! Static analysis of formulas: function usage, complexity and hints.

use std::collections::BTreeMap;

/// Functions that make a formula harder to read and maintain.
const HEAVY_FUNCTIONS: &[&str] = &["VLOOKUP", "HLOOKUP", "INDEX", "MATCH", "IF", "SUMIFS", "COUNTIFS"];

/// Uppercased names of every function call, in order of appearance.
///
/// String literals are skipped, so `"SUM("` inside quotes is not a call.
pub fn function_calls(formula: &str) -> Vec<String> {
    let mut calls = Vec::new();
    let mut ident = String::new();
    let mut in_string = false;

    for c in formula.chars() {
        if in_string {
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                ident.clear();
            }
            '(' => {
                if !ident.is_empty() && !ident.starts_with(|c: char| c.is_ascii_digit()) {
                    let name = ident.to_ascii_uppercase();
                    let name = name
                        .strip_prefix("_XLFN.")
                        .or_else(|| name.strip_prefix("_XLWS."))
                        .unwrap_or(&name)
                        .to_string();
                    calls.push(name);
                }
                ident.clear();
            }
            c if c.is_ascii_alphanumeric() || c == '.' || c == '_' => ident.push(c),
            _ => ident.clear(),
        }
    }
    calls
}

/// Count of each function called in `formula`.
pub fn function_usage(formula: &str) -> BTreeMap<String, usize> {
    let mut usage = BTreeMap::new();
    for name in function_calls(formula) {
        *usage.entry(name).or_insert(0) += 1;
    }
    usage
}

/// Rough complexity score; higher means harder to follow.
///
/// One point per ten characters, two per call, three more per call to a
/// lookup or conditional function, ten for an array constant wrapper.
pub fn complexity_score(formula: &str) -> u32 {
    let calls = function_calls(formula);
    let length = formula.chars().count() as u32 / 10;
    let nesting = calls.len() as u32 * 2;
    let heavy = calls
        .iter()
        .filter(|c| HEAVY_FUNCTIONS.contains(&c.as_str()))
        .count() as u32
        * 3;
    let body = formula.trim().trim_start_matches('=');
    let array = if body.starts_with('{') && body.ends_with('}') { 10 } else { 0 };
    length + nesting + heavy + array
}

/// Non-blocking improvement hints for a formula that already evaluates.
pub fn suggest_improvements(formula: &str) -> Vec<String> {
    let usage = function_usage(formula);
    let upper = formula.to_ascii_uppercase();
    let mut suggestions = Vec::new();

    if usage.contains_key("VLOOKUP") && !upper.contains("FALSE") && !upper.contains(",0)") {
        suggestions.push("Pass FALSE as the last VLOOKUP argument for an exact match".to_string());
    }
    if usage.contains_key("SUMIF") {
        suggestions.push("SUMIFS handles multiple criteria if you need more than one".to_string());
    }
    if usage.contains_key("COUNTIF") {
        suggestions.push("COUNTIFS handles multiple criteria if you need more than one".to_string());
    }
    if usage.get("IF").copied().unwrap_or(0) > 3 {
        suggestions.push("Consider IFS or SWITCH instead of deeply nested IF".to_string());
    }
    if has_whole_column_reference(&upper) {
        suggestions.push(
            "Whole-column ranges are slow on large sheets; a bounded range recalculates faster"
                .to_string(),
        );
    }
    suggestions
}

/// Whether the formula references an entire column such as `B:B` or `$C:$C`.
fn has_whole_column_reference(upper: &str) -> bool {
    upper
        .split(|c: char| !(c.is_ascii_alphabetic() || c == ':' || c == '$'))
        .filter_map(|token| token.split_once(':'))
        .any(|(left, right)| {
            let left = left.trim_start_matches('$');
            let right = right.trim_start_matches('$');
            !left.is_empty()
                && left.len() <= 3
                && left.chars().all(|c| c.is_ascii_alphabetic())
                && right.len() <= 3
                && right.chars().all(|c| c.is_ascii_alphabetic())
                && !right.is_empty()
        })
}
