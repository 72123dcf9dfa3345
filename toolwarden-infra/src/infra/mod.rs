pub mod approval_modal;
pub mod approval_remote;
pub mod approval_terminal;
pub mod audit_logger;
pub mod audit_pipeline;
pub mod audit_sqlite;
pub mod audit_tracing;
pub mod contracts;
pub mod distributed;
pub mod distributed_adapters;
pub mod lock_manager;
pub mod rate_limiter;
pub mod rate_store_sqlite;
