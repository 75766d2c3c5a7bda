//! Error taxonomy shared across the engine.
//!
//! Components never throw past the engine boundary: unrecovered failures are
//! translated into an [`ErrorKind`] so telemetry can aggregate them by kind
//! rather than by implementation type.

use serde::{Deserialize, Serialize};

/// Classification of every failure the engine knows how to talk about.
///
/// The kind decides policy: retry, skip, quarantine, or fatal exit. See the
/// per-component crates for how each kind is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Configuration failed validation. Fatal at startup.
    ConfigInvalid,
    /// Read/write failure against the vault.
    VaultIoError,
    /// Shadow cache update failed; the triggering event stays un-acked.
    CacheWriteError,
    /// Unparseable frontmatter; parsing continues with an empty map.
    FrontmatterInvalid,
    /// Transient LLM failure (network, 429, 5xx).
    LlmTransient,
    /// Permanent LLM failure (4xx other than 429, auth).
    LlmPermanent,
    /// The LLM circuit breaker is open; the provider was not contacted.
    LlmCircuitOpen,
    /// A structured LLM response could not be parsed.
    LlmParseError,
    /// A rule's condition raised instead of answering.
    RuleConditionError,
    /// A rule result was only partially applied.
    RuleApplyFailed,
    /// A rule exceeded its action timeout.
    RuleTimeout,
    /// A rule ignored cancellation past the grace period.
    RuleAbandoned,
    /// A rule was auto-disabled after repeated failures.
    RuleQuarantined,
    /// A workflow referenced a capability the host never injected.
    WorkflowMissingCapability,
    /// A workflow step exhausted its retries.
    WorkflowStepFailed,
}

impl ErrorKind {
    /// Whether a failure of this kind counts toward rule quarantine.
    pub fn counts_toward_quarantine(self) -> bool {
        matches!(
            self,
            ErrorKind::RuleConditionError
                | ErrorKind::RuleApplyFailed
                | ErrorKind::RuleTimeout
                | ErrorKind::RuleAbandoned
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ConfigInvalid => "CONFIG_INVALID",
            ErrorKind::VaultIoError => "VAULT_IO_ERROR",
            ErrorKind::CacheWriteError => "CACHE_WRITE_ERROR",
            ErrorKind::FrontmatterInvalid => "FRONTMATTER_INVALID",
            ErrorKind::LlmTransient => "LLM_TRANSIENT",
            ErrorKind::LlmPermanent => "LLM_PERMANENT",
            ErrorKind::LlmCircuitOpen => "LLM_CIRCUIT_OPEN",
            ErrorKind::LlmParseError => "LLM_PARSE_ERROR",
            ErrorKind::RuleConditionError => "RULE_CONDITION_ERROR",
            ErrorKind::RuleApplyFailed => "RULE_APPLY_FAILED",
            ErrorKind::RuleTimeout => "RULE_TIMEOUT",
            ErrorKind::RuleAbandoned => "RULE_ABANDONED",
            ErrorKind::RuleQuarantined => "RULE_QUARANTINED",
            ErrorKind::WorkflowMissingCapability => "WORKFLOW_MISSING_CAPABILITY",
            ErrorKind::WorkflowStepFailed => "WORKFLOW_STEP_FAILED",
        };
        f.write_str(s)
    }
}

/// A structured diagnostic produced by a component or a rule.
///
/// Diagnostics ride along on rule effects and synthetic events; they are
/// logged and counted but never abort the pipeline by themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    /// Free-form context (path, rule id, raw response...) for the log chain.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(ErrorKind::LlmCircuitOpen.to_string(), "LLM_CIRCUIT_OPEN");
        assert_eq!(ErrorKind::RuleApplyFailed.to_string(), "RULE_APPLY_FAILED");
    }

    #[test]
    fn quarantine_counting_covers_rule_failures_only() {
        assert!(ErrorKind::RuleTimeout.counts_toward_quarantine());
        assert!(ErrorKind::RuleConditionError.counts_toward_quarantine());
        assert!(!ErrorKind::LlmTransient.counts_toward_quarantine());
        assert!(!ErrorKind::CacheWriteError.counts_toward_quarantine());
    }

    #[test]
    fn serde_round_trip() {
        let d = Diagnostic::new(ErrorKind::FrontmatterInvalid, "bad yaml")
            .with_context(serde_json::json!({"path": "notes/a.md"}));
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
