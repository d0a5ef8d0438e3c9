// src/config/mod.rs

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    BackendSettings, CheckpointSettings, ConfigFile, DataSection, RawConfigFile, SchedulerSettings,
};
pub use validate::parse_duration;
