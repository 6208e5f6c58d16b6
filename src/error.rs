//! Error taxonomy for the harvest pipeline.
//!
//! Errors are split along the retry boundary: [`HarvestError::TransientFetch`]
//! is retried with backoff and then recorded on the affected harvest object,
//! while [`HarvestError::FatalConfig`] aborts the whole job. Mapping and
//! reconciliation failures stay per-object and never escalate.

use thiserror::Error;

/// A single field-level problem found while mapping a source record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldIssue {
    /// Target-schema field the issue applies to.
    pub field: String,
    /// The offending source value, if there was one.
    pub value: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}: {} (value: {:?})", self.field, self.reason, v),
            None => write!(f, "{}: {}", self.field, self.reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Authentication or configuration is invalid. Aborts the job.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    /// Network or server-side failure. Retried with backoff, then recorded
    /// as a per-object failure.
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// A mapped record failed schema validation.
    #[error("validation failed: {}", format_issues(.0))]
    Validation(Vec<FieldIssue>),

    /// More than one target dataset claims the same source GUID.
    #[error("reconciliation conflict for guid {guid}: {count} datasets claim it")]
    ReconciliationConflict { guid: String, count: usize },

    /// The target catalog rejected a create/update call.
    #[error("target catalog error: {0}")]
    Target(String),

    /// The harvest object store failed.
    #[error("store error: {0}")]
    Store(String),
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl HarvestError {
    /// Whether the retry policy should try this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvestError::TransientFetch(_))
    }

    /// Short stable label used when persisting an error on a harvest object.
    pub fn kind(&self) -> &'static str {
        match self {
            HarvestError::FatalConfig(_) => "fatal_config",
            HarvestError::TransientFetch(_) => "transient_fetch",
            HarvestError::Validation(_) => "validation",
            HarvestError::ReconciliationConflict { .. } => "reconciliation_conflict",
            HarvestError::Target(_) => "target",
            HarvestError::Store(_) => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field_and_value() {
        let err = HarvestError::Validation(vec![FieldIssue {
            field: "category".to_string(),
            value: Some("SPACE-WEATHER".to_string()),
            reason: "no vocabulary entry and no default".to_string(),
        }]);
        let msg = err.to_string();
        assert!(msg.contains("category"));
        assert!(msg.contains("SPACE-WEATHER"));
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(HarvestError::TransientFetch("503".into()).is_retryable());
        assert!(!HarvestError::FatalConfig("bad token".into()).is_retryable());
        assert!(!HarvestError::Validation(vec![]).is_retryable());
    }
}
