//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI / environment overrides (PORT, UPSTREAM_URL, STORE_PATH)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is loaded once before serving; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError, ConfigOverrides};
pub use schema::{
    ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, StoreConfig, StoreKind,
    UpstreamConfig,
};
pub use validation::ValidationError;
