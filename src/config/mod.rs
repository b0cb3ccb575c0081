//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The hook token is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;
pub mod settings;

pub use settings::Settings;

use std::path::PathBuf;

use crate::error::{Error, Result};
use secrets::SecretString;

#[derive(Debug)]
pub struct Config {
    pub vault_path: PathBuf,
    pub drop_folder: PathBuf,
    pub settings_path: Option<PathBuf>,
    pub hooks_dir: PathBuf,
    pub hook_token: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let vault_path = PathBuf::from(required_var("VAULT_PATH")?);
        Ok(Self {
            drop_folder: optional_var("DROP_FOLDER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| vault_path.join("Drop_Folder")),
            settings_path: optional_var("DEPUTY_SETTINGS").map(PathBuf::from),
            hooks_dir: optional_var("DEPUTY_HOOKS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("hooks")),
            hook_token: optional_var("DEPUTY_HOOK_TOKEN").map(SecretString::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            vault_path,
        })
    }

    /// Scheduler and policy settings from `DEPUTY_SETTINGS`, or defaults.
    pub fn load_settings(&self) -> Result<Settings> {
        match &self.settings_path {
            Some(path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
