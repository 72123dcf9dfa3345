use crate::types::{Decision, RiskTier};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Paranoid,
    Balanced,
    Trusting,
    Unrestricted,
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paranoid" => Ok(PolicyMode::Paranoid),
            "balanced" => Ok(PolicyMode::Balanced),
            "trusting" => Ok(PolicyMode::Trusting),
            "unrestricted" => Ok(PolicyMode::Unrestricted),
            other => Err(format!("unknown policy mode: {}", other)),
        }
    }
}

/// Operator-supplied decision table. `Blocked` has no row and is always
/// refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPolicy {
    pub safe: Decision,
    pub caution: Decision,
    pub dangerous: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    Paranoid,
    Balanced,
    Trusting,
    Unrestricted,
    Custom(CustomPolicy),
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        PermissionPolicy::Balanced
    }
}

impl From<PolicyMode> for PermissionPolicy {
    fn from(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::Paranoid => PermissionPolicy::Paranoid,
            PolicyMode::Balanced => PermissionPolicy::Balanced,
            PolicyMode::Trusting => PermissionPolicy::Trusting,
            PolicyMode::Unrestricted => PermissionPolicy::Unrestricted,
        }
    }
}

impl PermissionPolicy {
    /// Total over every tier. `Blocked` is refused before the table is
    /// consulted, so no table (built-in or custom) can permit it.
    pub fn decide(&self, tier: RiskTier) -> Decision {
        use Decision::*;

        if tier == RiskTier::Blocked {
            return Refuse;
        }

        match (self, tier) {
            (PermissionPolicy::Paranoid, _) => RequireApproval,

            (PermissionPolicy::Balanced, RiskTier::Safe) => AutoApprove,
            (PermissionPolicy::Balanced, _) => RequireApproval,

            (PermissionPolicy::Trusting, RiskTier::Dangerous) => RequireApproval,
            (PermissionPolicy::Trusting, _) => AutoApprove,

            (PermissionPolicy::Unrestricted, _) => AutoApprove,

            (PermissionPolicy::Custom(table), RiskTier::Safe) => table.safe,
            (PermissionPolicy::Custom(table), RiskTier::Caution) => table.caution,
            (PermissionPolicy::Custom(table), _) => table.dangerous,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PermissionPolicy::Paranoid => "paranoid",
            PermissionPolicy::Balanced => "balanced",
            PermissionPolicy::Trusting => "trusting",
            PermissionPolicy::Unrestricted => "unrestricted",
            PermissionPolicy::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for PermissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn decide(tier: RiskTier, policy: &PermissionPolicy) -> Decision {
    policy.decide(tier)
}
