// Structured errors and deployment reports

pub mod errors;
pub mod summary;

pub use errors::DeployError;
pub use summary::{collect_reports, print_json, print_summary, ActionReport};

use std::fmt;

use serde::Serialize;

/// Structured, operator-facing error attached to actions, tasks and
/// check/init items. Carries what went wrong, the specifics, and how to
/// fix it. Execution errors ([`DeployError`]) convert into this shape
/// before being attached to a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportError {
    pub reason: String,
    pub detail: String,
    pub fix_methods: String,
}

impl ReportError {
    pub fn new(reason: impl Into<String>) -> Self {
        ReportError {
            reason: reason.into(),
            detail: String::new(),
            fix_methods: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix_methods = fix.into();
        self
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        if !self.fix_methods.is_empty() {
            write!(f, " (fix: {})", self.fix_methods)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_error_builders() {
        let err = ReportError::new("memory capacity not enough")
            .with_detail("current 2147483648 bytes, desired 4294967296 bytes")
            .with_fix("add more memory to the node");

        assert_eq!(err.reason, "memory capacity not enough");
        assert!(err.detail.contains("2147483648"));
        assert!(err.fix_methods.contains("add more memory"));
    }

    #[test]
    fn test_report_error_display() {
        let err = ReportError::new("port(s) occupied").with_detail("6443,10250");
        assert_eq!(format!("{}", err), "port(s) occupied: 6443,10250");
    }
}
