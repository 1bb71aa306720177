pub mod config;
pub mod history;
pub mod init;
pub mod run;
pub mod watch;

use anyhow::Context;
use costwatch_core::{CostwatchConfig, Settings};

/// Layer the environment over the file config and validate.
pub fn resolve_settings(file: CostwatchConfig) -> anyhow::Result<Settings> {
    Settings::from_env(file).context("resolving settings")
}
