use crate::approval::{ApprovalCoordinator, ApprovalOutcome, ApprovalRequest};
use crate::audit::{AuditEvent, AuditEventType, InvocationRecord};
use crate::dispatcher::{execute_with_protection, TerminalGuard};
use crate::error::{DenialReason, ToolError};
use crate::execution_context::{ExecutionContext, SessionContext};
use crate::guard::{ClassifierConfig, PatternError, RiskClassifier};
use crate::policy::PermissionPolicy;
use crate::tools::{Tool, ToolResult};
use crate::traits::{ApprovalProvider, AuditSink};
use crate::types::{Decision, RiskTier, ToolCategory, ToolMetadata};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RESULT_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_ARGUMENT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub timeout_ms: u64,
    pub max_result_bytes: usize,
    pub max_argument_bytes: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            max_argument_bytes: DEFAULT_MAX_ARGUMENT_BYTES,
        }
    }
}

struct RegisteredTool {
    metadata: ToolMetadata,
    implementation: Arc<dyn Tool>,
}

/// Owns every tool and is the only path by which one is executed.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    classifier: RiskClassifier,
    policy: PermissionPolicy,
    coordinator: ApprovalCoordinator,
    settings: DispatchSettings,
}

impl ToolRegistry {
    pub fn new(
        classifier: RiskClassifier,
        policy: PermissionPolicy,
        coordinator: ApprovalCoordinator,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            classifier,
            policy,
            coordinator,
            settings,
        }
    }

    /// Registry with the built-in pattern lists and default coordinator.
    pub fn with_policy(policy: PermissionPolicy) -> Result<Self, PatternError> {
        Ok(Self::new(
            RiskClassifier::new(ClassifierConfig::default())?,
            policy,
            ApprovalCoordinator::default(),
            DispatchSettings::default(),
        ))
    }

    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        risk: RiskTier,
        category: ToolCategory,
    ) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }

        let metadata = ToolMetadata {
            name: name.clone(),
            description: tool.description().to_string(),
            declared_risk: risk,
            category,
            enabled: true,
            schema: tool.schema(),
        };
        info!("Registered tool {} ({}, {:?})", name, risk, category);
        tools.insert(
            name,
            RegisteredTool {
                metadata,
                implementation: tool,
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<ToolMetadata, ToolError> {
        self.tools
            .write()
            .remove(name)
            .map(|entry| entry.metadata)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn enable(&self, name: &str) -> Result<(), ToolError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), ToolError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ToolError> {
        let mut tools = self.tools.write();
        let entry = tools
            .get_mut(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        entry.metadata.enabled = enabled;
        info!("Tool {} {}", name, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.read().get(name).map(|entry| entry.metadata.clone())
    }

    /// Snapshot of every registered tool, sorted by name.
    pub fn list(&self) -> Vec<ToolMetadata> {
        let mut tools: Vec<ToolMetadata> = self
            .tools
            .read()
            .values()
            .map(|entry| entry.metadata.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn count(&self) -> usize {
        self.tools.read().len()
    }

    /// Function-calling schemas for the enabled tools.
    pub fn schemas(&self) -> Vec<Value> {
        self.list()
            .into_iter()
            .filter(|tool| tool.enabled)
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.schema
                    }
                })
            })
            .collect()
    }

    pub fn policy(&self) -> PermissionPolicy {
        self.policy
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    pub fn coordinator(&self) -> &ApprovalCoordinator {
        &self.coordinator
    }

    /// Forget once-per-session approvals when a connection ends.
    pub fn end_session(&self, session_id: &str) {
        self.coordinator.end_session(session_id);
    }

    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
        session: &SessionContext,
        approval: &dyn ApprovalProvider,
        audit: &dyn AuditSink,
    ) -> Result<ToolResult, ToolError> {
        let (metadata, implementation) = self.lookup(tool_name)?;
        self.validate_arguments(&arguments)?;

        let record = InvocationRecord::new(
            uuid::Uuid::new_v4().to_string(),
            tool_name,
            arguments.clone(),
            session.session_id.clone(),
            session.user.clone(),
        );
        audit.log(record.event(AuditEventType::Request));

        if !metadata.enabled {
            let reason = DenialReason::ToolDisabled;
            warn!("Refusing disabled tool {}", tool_name);
            audit.log(denial_event(&record, &reason, metadata.declared_risk));
            return Err(ToolError::Denied(reason));
        }

        let assessment = self.classifier.classify(Some(&metadata), &arguments);
        if assessment.tier == RiskTier::Blocked {
            let reason = DenialReason::Prohibited {
                pattern: assessment.matched_pattern.clone(),
            };
            warn!(
                "Blocked {} in session {}: {}",
                tool_name, session.session_id, reason
            );
            let mut event = record
                .event(AuditEventType::Blocked)
                .with_decision(Decision::Refuse.as_str())
                .with_error(reason.to_string())
                .with_metadata("risk_tier", RiskTier::Blocked.as_str())
                .with_metadata("reason_code", reason.code());
            if let Some(pattern) = &assessment.matched_pattern {
                event = event.with_metadata("matched_pattern", pattern.as_str());
            }
            audit.log(event);
            return Err(ToolError::Blocked(reason));
        }

        let tier = assessment.tier;
        let decision = self.policy.decide(tier);
        info!(
            "Tool {} assessed {} under {} policy: {}",
            tool_name, tier, self.policy, decision
        );

        match decision {
            Decision::AutoApprove => {}
            Decision::Refuse => {
                let reason = DenialReason::PolicyRefused { tier };
                warn!("Refused {} in session {}: {}", tool_name, session.session_id, reason);
                audit.log(denial_event(&record, &reason, tier));
                return Err(ToolError::Denied(reason));
            }
            Decision::RequireApproval => {
                let request = ApprovalRequest::new(
                    tool_name,
                    arguments.clone(),
                    tier,
                    session.session_id.clone(),
                );
                let approval_id = request.id.to_string();
                match self
                    .coordinator
                    .request_approval(request, approval, &session.cancellation)
                    .await
                {
                    ApprovalOutcome::Approved { cached, reason } => {
                        let mut event = record
                            .event(AuditEventType::Approval)
                            .with_decision("approved")
                            .with_metadata("risk_tier", tier.as_str())
                            .with_metadata("cached", cached)
                            .with_metadata("approval_id", approval_id);
                        if let Some(reason) = reason {
                            event = event.with_metadata("reason", reason);
                        }
                        audit.log(event);
                    }
                    ApprovalOutcome::Denied(reason) => {
                        audit.log(
                            denial_event(&record, &reason, tier)
                                .with_metadata("approval_id", approval_id),
                        );
                        return Err(ToolError::Denied(reason));
                    }
                }
            }
        }

        let mut execution = record
            .event(AuditEventType::Execution)
            .with_decision(decision.as_str())
            .with_metadata("risk_tier", tier.as_str());
        if assessment.escalated {
            execution = execution.with_metadata("escalated", true);
        }
        audit.log(execution);

        let ctx = ExecutionContext::new(session.session_id.clone(), self.settings.timeout_ms)
            .with_correlation_id(record.correlation_id.clone())
            .with_cancellation(session.cancellation.clone());
        let guard = TerminalGuard::new(record, audit, self.settings.max_result_bytes);

        execute_with_protection(implementation, ctx, arguments, guard).await
    }

    fn lookup(&self, tool_name: &str) -> Result<(ToolMetadata, Arc<dyn Tool>), ToolError> {
        self.tools
            .read()
            .get(tool_name)
            .map(|entry| (entry.metadata.clone(), entry.implementation.clone()))
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))
    }

    fn validate_arguments(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::ValidationError(
                "arguments must be a JSON object".into(),
            ));
        }
        let size = serde_json::to_vec(arguments)
            .map_err(|e| ToolError::ValidationError(e.to_string()))?
            .len();
        if size > self.settings.max_argument_bytes {
            return Err(ToolError::ValidationError(format!(
                "arguments are {} bytes, limit is {}",
                size, self.settings.max_argument_bytes
            )));
        }
        Ok(())
    }
}

/// Explicit, timed-out and cancelled denials all share this shape.
fn denial_event(record: &InvocationRecord, reason: &DenialReason, tier: RiskTier) -> AuditEvent {
    record
        .event(AuditEventType::Denial)
        .with_decision("denied")
        .with_error(reason.to_string())
        .with_metadata("risk_tier", tier.as_str())
        .with_metadata("reason_code", reason.code())
}
