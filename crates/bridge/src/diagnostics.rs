use serde::{Deserialize, Serialize};

use skyjet_core::{Error, Result};
use skyjet_value::AttributePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Invalid,
    Warning,
}

impl Severity {
    pub fn is_error(&self) -> bool { matches!(self, Severity::Error | Severity::Invalid) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(skip)]
    pub attribute: Option<AttributePath>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self { severity: Severity::Error, summary: summary.into(), detail: String::new(), attribute: None }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, summary: summary.into(), detail: String::new(), attribute: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    fn describe(&self) -> String {
        let mut s = self.summary.clone();
        if !self.detail.is_empty() {
            s.push_str(": ");
            s.push_str(&self.detail);
        }
        if let Some(a) = &self.attribute {
            s.push_str(&format!(" (at {a})"));
        }
        s
    }
}

/// Diagnostics returned by one provider call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, d: Diagnostic) { self.0.push(d); }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn has_errors(&self) -> bool { self.0.iter().any(|d| d.severity.is_error()) }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> { self.0.iter().filter(|d| d.severity.is_error()) }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> { self.0.iter().filter(|d| !d.severity.is_error()) }

    /// Error-severity diagnostics joined into one line.
    pub fn summary(&self) -> String { self.errors().map(|d| d.describe()).collect::<Vec<_>>().join("; ") }

    /// `Err` carrying every error diagnostic when any is present.
    pub fn into_result(&self, operation: &'static str) -> Result<()> {
        if self.has_errors() { Err(Error::Diagnostics { operation, summary: self.summary() }) } else { Ok(()) }
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(v: Vec<Diagnostic>) -> Self { Self(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_error_severities_fail() {
        let mut d = Diagnostics::new();
        d.push(Diagnostic::warning("deprecated argument"));
        assert!(d.into_result("read").is_ok());
        d.push(Diagnostic::error("access denied").with_detail("missing s3:GetObject"));
        d.push(Diagnostic { severity: Severity::Invalid, summary: "bad zone".into(), detail: String::new(), attribute: None });
        let err = d.into_result("apply").unwrap_err();
        assert_eq!(err.to_string(), "apply failed: access denied: missing s3:GetObject; bad zone");
        assert_eq!(d.warnings().count(), 1);
    }
}
