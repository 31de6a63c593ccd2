//! Configuration loading and validation.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml`, `switchboard.yml` or
//! `switchboard.json`, searched in `./` then the user config directory.

pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{
        AgentConfig, DropPolicy, GroupChatConfig, HumanDelayConfig, HumanDelayMode,
        MessagesConfig, QueueConfig, QueueMode, SendPolicy, SessionConfig, SessionScope,
        SwitchboardConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_file},
};
