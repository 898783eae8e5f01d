//! Audit configuration.
//!
//! A TOML file names the user, the check items and the tuning knobs. Command
//! line overrides are applied before validation so a missing `github_user`
//! in the file can be supplied with `--user`.

pub mod error;
pub mod loader;

pub use error::ConfigError;
pub use error::Result;
pub use loader::AuditConfig;
pub use loader::ConfigOverrides;
pub use loader::DEFAULT_CONFIG_FILE;
pub use loader::DEFAULT_CONFIG_TEXT;
pub use loader::DisplayConfig;
pub use loader::load_config;
pub use loader::read_config;
pub use loader::write_default_config;
