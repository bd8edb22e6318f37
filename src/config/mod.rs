//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → new ApmConfig swapped into the plugin
//! ```
//!
//! # Design Decisions
//! - All fields have defaults, so an empty file is a valid (inactive) config
//! - A reload that fails validation keeps the running configuration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApmConfig, GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig, TimeoutConfig,
    TracingMode,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
