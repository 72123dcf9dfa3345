use crate::types::RiskTier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why an invocation did not run. The variants keep "the agent tried
/// something prohibited", "a human said no" and "nobody answered" apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    Prohibited { pattern: Option<String> },
    Declined { reason: Option<String> },
    TimedOut { after_ms: u64 },
    Cancelled,
    ChannelUnavailable { detail: String },
    PolicyRefused { tier: RiskTier },
    ToolDisabled,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::Prohibited { .. } => "prohibited",
            DenialReason::Declined { .. } => "declined",
            DenialReason::TimedOut { .. } => "timed_out",
            DenialReason::Cancelled => "cancelled",
            DenialReason::ChannelUnavailable { .. } => "channel_unavailable",
            DenialReason::PolicyRefused { .. } => "policy_refused",
            DenialReason::ToolDisabled => "tool_disabled",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::Prohibited { pattern: Some(p) } => {
                write!(f, "the agent attempted a prohibited action (matched `{}`)", p)
            }
            DenialReason::Prohibited { pattern: None } => {
                write!(f, "the agent attempted a prohibited action")
            }
            DenialReason::Declined { reason: Some(r) } => write!(f, "declined by approver: {}", r),
            DenialReason::Declined { reason: None } => write!(f, "declined by approver"),
            DenialReason::TimedOut { after_ms } => {
                write!(f, "no approval response within {}ms", after_ms)
            }
            DenialReason::Cancelled => write!(f, "approval cancelled: session disconnected"),
            DenialReason::ChannelUnavailable { detail } => {
                write!(f, "approval channel unavailable: {}", detail)
            }
            DenialReason::PolicyRefused { tier } => {
                write!(f, "refused by policy for {} actions", tier)
            }
            DenialReason::ToolDisabled => write!(f, "tool is disabled"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Blocked: {0}")]
    Blocked(DenialReason),

    #[error("Denied: {0}")]
    Denied(DenialReason),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Denials can be re-issued; blocks and policy refusals cannot.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Denied(reason) => !matches!(
                reason,
                DenialReason::PolicyRefused { .. } | DenialReason::ToolDisabled
            ),
            ToolError::Timeout(_) | ToolError::Cancelled => true,
            _ => false,
        }
    }

    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            ToolError::Blocked(reason) | ToolError::Denied(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Failures of an approval channel. The coordinator turns all of these into
/// denials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("Approval channel unavailable: {0}")]
    Unavailable(String),

    #[error("Approval channel closed")]
    Closed,

    #[error("Approver did not respond within {0:?}")]
    TimedOut(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_distinguishable() {
        let prohibited = DenialReason::Prohibited { pattern: Some("sudo".into()) };
        let declined = DenialReason::Declined { reason: None };
        let timed_out = DenialReason::TimedOut { after_ms: 500 };

        assert!(prohibited.to_string().contains("prohibited"));
        assert!(declined.to_string().contains("declined"));
        assert!(timed_out.to_string().contains("no approval response"));
    }

    #[test]
    fn test_retryability() {
        assert!(!ToolError::Blocked(DenialReason::Prohibited { pattern: None }).is_retryable());
        assert!(ToolError::Denied(DenialReason::TimedOut { after_ms: 1 }).is_retryable());
        assert!(ToolError::Denied(DenialReason::Declined { reason: None }).is_retryable());
        assert!(!ToolError::Denied(DenialReason::PolicyRefused { tier: RiskTier::Caution })
            .is_retryable());
        assert!(!ToolError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_denial_reason_serializes_tagged() {
        let json = serde_json::to_value(DenialReason::TimedOut { after_ms: 10 }).unwrap();
        assert_eq!(json["kind"], "timed_out");
        assert_eq!(json["after_ms"], 10);
    }
}
