//! Configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `batchwatch.yaml` but can be specified via `-f` or the `BATCHWATCH_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration
//! 2. **Environment variables** - Variables prefixed with `BATCHWATCH_` override YAML values
//!
//! Nested values use double underscores, e.g. `BATCHWATCH_CADENCE__STEADY_INTERVAL=3s`.
//!
//! ## Example
//!
//! ```yaml
//! api_url: https://app.example.com/api/v1
//! api_token: sk-live-...
//! request_timeout: 30s
//! cadence:
//!   queued_interval: 5s
//!   warmup_interval: 5s
//!   steady_interval: 2s
//!   finishing_interval: 1s
//!   warmup_below: 10
//!   finishing_from: 90
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::types::BatchId;

/// CLI args: config file location plus the command to run
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "BATCHWATCH_CONFIG", default_value = "batchwatch.yaml")]
    pub config: String,

    /// Validate configuration and exit.
    #[arg(long)]
    pub validate: bool,

    /// Print views as JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch the current progress of a batch once and print it
    Status {
        /// Batch to inspect
        batch_id: BatchId,
    },
    /// Follow one or more batches until they finish
    Watch {
        /// Batches to follow; each one is polled independently
        #[arg(required = true)]
        batch_ids: Vec<BatchId>,
    },
}

/// Root configuration, loaded from YAML and environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the batches API; progress is read from `{api_url}/batches/{id}/progress`
    pub api_url: Url,
    /// Bearer token sent with every progress request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Timeout for a single progress request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Poll cadence table
    pub cadence: CadenceConfig,
}

/// Intervals and progress thresholds that drive the poll cadence.
///
/// Evaluated by [`crate::cadence::next_poll`]: queued jobs poll at `queued_interval`, running
/// jobs below `warmup_below` percent at `warmup_interval`, at or above `finishing_from` percent
/// at `finishing_interval`, and everything in between at `steady_interval`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CadenceConfig {
    #[serde(with = "humantime_serde")]
    pub queued_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub warmup_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub steady_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub finishing_interval: Duration,
    /// Progress percentage below which a running job is still warming up
    pub warmup_below: f64,
    /// Progress percentage from which a running job is about to finish
    pub finishing_from: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: Url::parse("http://localhost:3001/api").expect("Default API URL should be valid"),
            api_token: None,
            request_timeout: Duration::from_secs(30),
            cadence: CadenceConfig::default(),
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            queued_interval: Duration::from_millis(5000),
            warmup_interval: Duration::from_millis(5000),
            steady_interval: Duration::from_millis(2000),
            finishing_interval: Duration::from_millis(1000),
            warmup_below: 10.0,
            finishing_from: 90.0,
        }
    }
}

impl CadenceConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let intervals = [
            ("queued_interval", self.queued_interval),
            ("warmup_interval", self.warmup_interval),
            ("steady_interval", self.steady_interval),
            ("finishing_interval", self.finishing_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(Error::Config {
                    message: format!("cadence.{name} must be greater than zero"),
                });
            }
        }

        for (name, threshold) in [("warmup_below", self.warmup_below), ("finishing_from", self.finishing_from)] {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(Error::Config {
                    message: format!("cadence.{name} must be between 0 and 100, got {threshold}"),
                });
            }
        }

        if self.warmup_below > self.finishing_from {
            return Err(Error::Config {
                message: format!(
                    "cadence.warmup_below ({}) must not exceed cadence.finishing_from ({})",
                    self.warmup_below, self.finishing_from
                ),
            });
        }

        Ok(())
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // BATCHWATCH_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("BATCHWATCH_").ignore(&["config"]).split("__"))
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            return Err(Error::Config {
                message: format!("api_url must be an http(s) URL, got {}", self.api_url),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request_timeout must be greater than zero".to_string(),
            });
        }

        if let Some(token) = &self.api_token
            && token.trim().is_empty()
        {
            return Err(Error::Config {
                message: "api_token is set but empty".to_string(),
            });
        }

        self.cadence.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
            json: false,
            command: None,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.api_url.as_str(), "http://localhost:3001/api");
            assert_eq!(config.request_timeout, Duration::from_secs(30));
            assert_eq!(config.cadence, CadenceConfig::default());
            assert!(config.api_token.is_none());

            Ok(())
        });
    }

    #[test]
    fn test_yaml_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
api_url: https://app.example.com/api/v1
api_token: sk-test
request_timeout: 10s
cadence:
  steady_interval: 3s
  finishing_interval: 500ms
  finishing_from: 95
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.api_url.as_str(), "https://app.example.com/api/v1");
            assert_eq!(config.api_token.as_deref(), Some("sk-test"));
            assert_eq!(config.request_timeout, Duration::from_secs(10));
            assert_eq!(config.cadence.steady_interval, Duration::from_secs(3));
            assert_eq!(config.cadence.finishing_interval, Duration::from_millis(500));
            assert_eq!(config.cadence.finishing_from, 95.0);
            // untouched values keep their defaults
            assert_eq!(config.cadence.queued_interval, Duration::from_secs(5));
            assert_eq!(config.cadence.warmup_below, 10.0);

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "api_url: https://app.example.com/api\n")?;

            jail.set_env("BATCHWATCH_API_URL", "https://staging.example.com/api");
            jail.set_env("BATCHWATCH_CADENCE__QUEUED_INTERVAL", "10s");
            jail.set_env("BATCHWATCH_CONFIG", "test.yaml");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.api_url.as_str(), "https://staging.example.com/api");
            assert_eq!(config.cadence.queued_interval, Duration::from_secs(10));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "poll_forever: true\n")?;

            assert!(Config::load(&args("test.yaml")).is_err());

            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.cadence.warmup_below = 95.0;
        config.cadence.finishing_from = 90.0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("warmup_below"));
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = Config::default();
        config.cadence.steady_interval = Duration::ZERO;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("steady_interval"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.cadence.finishing_from = 120.0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_non_http_url() {
        let config = Config {
            api_url: Url::parse("ftp://files.example.com").unwrap(),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = Config {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_watch_command() {
        let args = Args::parse_from(["batchwatch", "-f", "custom.yaml", "watch", "b-1", "b-2"]);

        assert_eq!(args.config, "custom.yaml");
        assert_eq!(
            args.command,
            Some(Command::Watch {
                batch_ids: vec![BatchId::from("b-1"), BatchId::from("b-2")],
            })
        );
    }

    #[test]
    fn test_watch_requires_batch_id() {
        assert!(Args::try_parse_from(["batchwatch", "watch"]).is_err());
    }
}
