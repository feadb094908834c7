//! Generation request types.

use serde::{Deserialize, Serialize};

/// Sampling parameters forwarded to the model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Sampling temperature. Low values keep formulas deterministic.
    pub temperature: f32,
    /// Nucleus sampling threshold.
    pub top_p: f32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
        }
    }
}

impl ModelParameters {
    pub fn new(temperature: f32, top_p: f32) -> Self {
        Self { temperature, top_p }
    }

    /// Reject values the endpoint would refuse anyway.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(crate::FormulaError::InvalidInput(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if !self.top_p.is_finite() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(crate::FormulaError::InvalidInput(format!(
                "top_p must be within 0.0..=1.0, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// Type inferred for a column from its sample values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
    Date,
    Boolean,
    #[default]
    Unknown,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Text => "text",
            ColumnKind::Date => "date",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Unknown => "unknown",
        }
    }

    /// Infer a kind from sample cell values.
    ///
    /// Blank samples are ignored; a column whose non-blank samples disagree
    /// is reported as text.
    pub fn infer<S: AsRef<str>>(samples: &[S]) -> Self {
        let mut kind = None;
        for sample in samples {
            let value = sample.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let this = if value.parse::<f64>().is_ok() {
                ColumnKind::Numeric
            } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
                ColumnKind::Boolean
            } else if looks_like_date(value) {
                ColumnKind::Date
            } else {
                ColumnKind::Text
            };
            match kind {
                None => kind = Some(this),
                Some(k) if k == this => {}
                Some(_) => return ColumnKind::Text,
            }
        }
        kind.unwrap_or_default()
    }
}

fn looks_like_date(value: &str) -> bool {
    ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .any(|fmt| chrono::NaiveDate::parse_from_str(value, fmt).is_ok())
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ColumnKind {
    type Err = crate::FormulaError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" | "number" => Ok(ColumnKind::Numeric),
            "text" | "string" => Ok(ColumnKind::Text),
            "date" => Ok(ColumnKind::Date),
            "boolean" | "bool" => Ok(ColumnKind::Boolean),
            "unknown" => Ok(ColumnKind::Unknown),
            other => Err(crate::FormulaError::InvalidInput(format!(
                "unknown column type '{other}'"
            ))),
        }
    }
}

/// A tagged column the description may refer to as `@Tag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnContext {
    /// Tag used in the description, without the leading `@`.
    pub tag: String,
    /// Column letter(s), e.g. `"B"` or `"AG"`.
    pub column: String,
    /// Header text as it appears in the sheet. Defaults to the tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// A few sample values from the column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<String>,
    pub kind: ColumnKind,
}

impl ColumnContext {
    pub fn new(tag: impl Into<String>, column: impl Into<String>, kind: ColumnKind) -> Self {
        let tag: String = tag.into();
        Self {
            tag: tag.trim_start_matches('@').to_string(),
            column: column.into(),
            header: None,
            samples: Vec::new(),
            kind,
        }
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn samples<I, S>(mut self, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.samples = samples.into_iter().map(Into::into).collect();
        self
    }

    /// Header text, falling back to the tag.
    pub fn header_text(&self) -> &str {
        self.header.as_deref().unwrap_or(&self.tag)
    }

    /// Whole-column range, e.g. `B:B`.
    pub fn range(&self) -> String {
        format!("{0}:{0}", self.column)
    }
}

/// A natural-language formula request.
///
/// Built once, then shared read-only by the coordinator and its waiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sheet: Option<String>,
    #[serde(default)]
    context: Vec<ColumnContext>,
    #[serde(default)]
    parameters: ModelParameters,
}

impl Request {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sheet: None,
            context: Vec::new(),
            parameters: ModelParameters::default(),
        }
    }

    /// Set the sheet the formula is meant for.
    pub fn sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Append a tagged column.
    pub fn column(mut self, column: ColumnContext) -> Self {
        self.context.push(column);
        self
    }

    /// Replace the whole column context.
    pub fn context(mut self, context: Vec<ColumnContext>) -> Self {
        self.context = context;
        self
    }

    pub fn parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn sheet_name(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    pub fn columns(&self) -> &[ColumnContext] {
        &self.context
    }

    pub fn model_parameters(&self) -> ModelParameters {
        self.parameters
    }

    /// Check the request is usable before anything is sent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.description.trim().is_empty() {
            return Err(crate::FormulaError::InvalidInput(
                "description cannot be empty".into(),
            ));
        }
        for column in &self.context {
            if column.tag.trim().is_empty() || column.column.trim().is_empty() {
                return Err(crate::FormulaError::InvalidInput(format!(
                    "column context needs both a tag and a column: {column:?}"
                )));
            }
        }
        self.parameters.validate()
    }
}
