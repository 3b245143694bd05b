//! Configuration module for Quarry.
//!
//! Handles the config file, environment variables, and settings.

mod settings;

pub use settings::{
    expand_env_vars, CatalogSettings, ConsistencySettings, FormulaSettings, LoggingSettings,
    Settings, SettingsError,
};
