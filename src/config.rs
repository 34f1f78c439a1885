//! Service configuration
//!
//! Defaults, optionally overridden by a JSON file named in `REDMOCK_CONFIG`,
//! then by the `REDMOCK_ADDR` and `REDMOCK_DATABASES` environment variables.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_ENV: &str = "REDMOCK_CONFIG";
pub const ADDR_ENV: &str = "REDMOCK_ADDR";
pub const DATABASES_ENV: &str = "REDMOCK_DATABASES";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceOptions {
    /// Address to listen on; port 0 picks a free port
    pub bind_address: String,

    /// Number of databases SELECT accepts
    pub databases: usize,

    /// Tracing filter used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        ServiceOptions {
            bind_address: "127.0.0.1:6379".to_string(),
            databases: 16,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceOptions {
    /// Load from the environment
    pub fn load() -> anyhow::Result<Self> {
        let mut options = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        options.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let options: ServiceOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(addr) = var(ADDR_ENV) {
            self.bind_address = addr;
        }
        if let Some(databases) = var(DATABASES_ENV) {
            self.databases = databases
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", DATABASES_ENV))?;
        }
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.databases > 0, "databases must be at least 1");
        Ok(())
    }
}
