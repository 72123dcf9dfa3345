//! Tool authorization pipeline: risk classification, permission policy,
//! approval coordination and audited dispatch.

pub mod approval;
pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod execution_context;
pub mod guard;
pub mod policy;
pub mod registry;
pub mod tools;
pub mod traits;
pub mod types;

pub use approval::{ApprovalCoordinator, ApprovalMode, ApprovalOutcome, ApprovalRequest, ApprovalResponse};
pub use audit::{AuditEvent, AuditEventType, InvocationRecord, RecordingAuditSink};
pub use error::{ApprovalError, DenialReason, ToolError};
pub use execution_context::{ExecutionContext, SessionContext};
pub use guard::{Assessment, ClassifierConfig, Pattern, PatternKind, PatternSet, RiskClassifier};
pub use policy::{CustomPolicy, PermissionPolicy, PolicyMode};
pub use registry::{DispatchSettings, ToolRegistry};
pub use tools::{Tool, ToolResult};
pub use traits::{ApprovalProvider, AuditSink};
pub use types::{Decision, RiskTier, ToolCategory, ToolMetadata};
