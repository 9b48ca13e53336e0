use std::{env, time::Duration};

use config::{Config, ConfigError, Environment, File};
use glob::glob;
use serde_derive::Deserialize;
use tracing::debug;

use crate::{
    error::ConfigurationError,
    reconcile::{retry::RetryPolicy, ReconcileOptions},
};

/// Read when `github.token` is not configured.
const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Github {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub token: String,
    /// Base URL override, e.g. for GitHub Enterprise.
    #[serde(default)]
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Run {
    /// Desired-state table: TOML/YAML/JSON, or a Markdown roadmap.
    pub table: String,
    pub dry_run: bool,
    pub concurrency: usize,
    pub call_timeout_secs: u64,
    /// Where to write the JSON run report, if anywhere.
    #[serde(default)]
    pub report: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub github: Github,
    pub run: Run,
    pub retry: Retry,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let cwd = match env::current_dir() {
            Ok(cwd) => cwd.display().to_string(),
            Err(_) => ".".to_string(),
        };

        debug!(
            "Looking for configuration file {cwd}/config and/or configuration files in {cwd}{}",
            "/config/"
        );

        let config_dir = glob(&format!("{cwd}/config/*"))
            .map_err(|e| ConfigError::Message(e.to_string()))?
            .filter_map(Result::ok)
            .map(File::from)
            .collect::<Vec<_>>();

        let config = Config::builder()
            .set_default("github.owner", "")?
            .set_default("github.repo", "")?
            .set_default("run.table", "issues.toml")?
            .set_default("run.dry_run", false)?
            .set_default("run.concurrency", 4)?
            .set_default("run.call_timeout_secs", 30)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 1000)?
            .set_default("retry.multiplier", 2.0)?
            .set_default("retry.max_delay_ms", 20_000)?
            .add_source(File::with_name(&format!("{cwd}/config")).required(false))
            .add_source(config_dir)
            .add_source(Environment::with_prefix("ISSUESYNC").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// The API token. Checked before anything talks to the remote.
    pub fn credential(&self) -> Result<String, ConfigurationError> {
        self.credential_or(env::var(TOKEN_VAR).ok())
    }

    fn credential_or(&self, fallback: Option<String>) -> Result<String, ConfigurationError> {
        let token = if self.github.token.trim().is_empty() {
            fallback.unwrap_or_default()
        } else {
            self.github.token.clone()
        };

        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigurationError::MissingCredential);
        }
        Ok(token.to_string())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.run.call_timeout_secs)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                multiplier: self.retry.multiplier,
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
            call_timeout: self.call_timeout(),
            concurrency: self.run.concurrency,
            dry_run: self.run.dry_run,
        }
    }
}
