//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Settings for one invocation of the rule runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// libSQL database holding emails and the audit log.
    pub db_path: PathBuf,
    /// JSON rule file.
    pub rules_file: PathBuf,
    /// Process at most this many of the newest emails.
    pub max_emails: Option<usize>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Also write logs to this file.
    pub log_file: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mail-rules.db"),
            rules_file: PathBuf::from("config/rules.json"),
            max_emails: None,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl RunnerConfig {
    /// Build from `MAIL_RULES_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_emails = match non_empty("MAIL_RULES_MAX_EMAILS") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue {
                    key: "MAIL_RULES_MAX_EMAILS".into(),
                    message: format!("'{raw}': {e}"),
                }
            })?),
            None => None,
        };

        Ok(Self {
            db_path: non_empty("MAIL_RULES_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            rules_file: non_empty("MAIL_RULES_RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_file),
            max_emails,
            log_level: non_empty("MAIL_RULES_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_file: non_empty("MAIL_RULES_LOG_FILE").map(PathBuf::from),
        })
    }
}
