//! Toolwarden Runtime
//!
//! Server-boundary glue: per-client admission, per-session serialization
//! around load/mutate/save handlers, configuration loading and
//! observability setup.

pub mod gateway;
pub mod guard_config;
pub mod interfaces;
pub mod logging;
pub mod metrics;
pub mod session_store;

pub use gateway::{resolve_session, GatewayRequest, SessionGateway};
pub use guard_config::{load_guard_config, ConfigError, GuardConfig};
pub use interfaces::{RuntimeError, SessionStore};
pub use logging::{init_logging, LoggingConfig};
pub use session_store::InMemorySessionStore;
