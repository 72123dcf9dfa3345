use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered risk classification. `Blocked` is terminal: no policy overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Safe,
    Caution,
    Dangerous,
    Blocked,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Safe,
        RiskTier::Caution,
        RiskTier::Dangerous,
        RiskTier::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::Caution => "caution",
            RiskTier::Dangerous => "dangerous",
            RiskTier::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the permission policy for a single risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoApprove,
    RequireApproval,
    Refuse,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AutoApprove => "auto_approve",
            Decision::RequireApproval => "require_approval",
            Decision::Refuse => "refuse",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Read,
    Write,
    Shell,
    Network,
    System,
    Other,
}

impl ToolCategory {
    /// Shell tools are re-assessed per call from the command they carry.
    pub fn is_dynamically_assessed(&self) -> bool {
        matches!(self, ToolCategory::Shell)
    }
}

/// Registry-owned description of a tool. Handed out as copies only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub declared_risk: RiskTier,
    pub category: ToolCategory,
    pub enabled: bool,
    pub schema: serde_json::Value,
}
