// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reporter configuration.
//!
//! Layers, lowest precedence first:
//! - built-in defaults
//! - TOML file (`~/.config/loom/crash-reporter.toml` unless a path is given)
//! - `LOOM_CRASH_*` environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::upload::DEFAULT_COLLECTOR_URL_TEMPLATE;

const ENV_PREFIX: &str = "LOOM_CRASH_";

/// Retry policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
	pub max_attempts: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	pub jitter: bool,
}

impl Default for RetrySettings {
	fn default() -> Self {
		let defaults = RetryConfig::default();
		Self {
			max_attempts: defaults.max_attempts,
			base_delay_ms: defaults.base_delay.as_millis() as u64,
			max_delay_ms: defaults.max_delay.as_millis() as u64,
			jitter: defaults.jitter,
		}
	}
}

impl RetrySettings {
	pub fn to_retry_config(&self) -> RetryConfig {
		RetryConfig {
			max_attempts: self.max_attempts,
			base_delay: Duration::from_millis(self.base_delay_ms),
			max_delay: Duration::from_millis(self.max_delay_ms),
			jitter: self.jitter,
			..RetryConfig::default()
		}
	}
}

/// Crash reporter settings.
///
/// Identity fields left unset fall back to the application bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
	pub database: Option<String>,
	pub application_name: Option<String>,
	pub application_version: Option<String>,
	pub user_name: Option<String>,
	pub user_email: Option<String>,
	pub application_key: Option<String>,
	pub notes: Option<String>,
	/// Send reports without asking.
	pub auto_submit: bool,
	/// Ask for name and email in the prompt.
	pub ask_user_details: bool,
	/// Remember what the user typed into the prompt.
	pub persist_user_details: bool,
	/// Reports older than this are sent without asking.
	pub expiration_secs: Option<u64>,
	pub banner_image: Option<String>,
	pub collector_url_template: String,
	pub request_timeout_secs: u64,
	pub retry: RetrySettings,
}

impl Default for ReporterConfig {
	fn default() -> Self {
		Self {
			database: None,
			application_name: None,
			application_version: None,
			user_name: None,
			user_email: None,
			application_key: None,
			notes: None,
			auto_submit: false,
			ask_user_details: true,
			persist_user_details: false,
			expiration_secs: None,
			banner_image: None,
			collector_url_template: DEFAULT_COLLECTOR_URL_TEMPLATE.to_string(),
			request_timeout_secs: 30,
			retry: RetrySettings::default(),
		}
	}
}

impl ReporterConfig {
	/// Default config file location.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|d| d.join("loom").join("crash-reporter.toml"))
	}

	/// Parses a TOML file. Missing keys take their defaults.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		Self::from_toml_str(&contents, path)
	}

	fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(contents).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Loads defaults, then `path` (or the default location) if it exists,
	/// then the process environment, and validates the result.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let path = path.map(Path::to_path_buf).or_else(Self::default_path);

		let mut config = match path {
			Some(path) if path.exists() => {
				debug!(path = %path.display(), "loading crash reporter config");
				Self::from_file(&path)?
			}
			_ => Self::default(),
		};

		config.apply_env(std::env::vars())?;
		config.validate()?;
		Ok(config)
	}

	/// Applies `LOOM_CRASH_*` overrides from `vars`. Other variables are
	/// ignored.
	pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: Into<String>,
	{
		for (key, value) in vars {
			let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
				continue;
			};
			let value: String = value.into();
			let field = name.to_ascii_lowercase();

			match name {
				"DATABASE" => self.database = non_empty(value),
				"APPLICATION_NAME" => self.application_name = non_empty(value),
				"APPLICATION_VERSION" => self.application_version = non_empty(value),
				"USER_NAME" => self.user_name = non_empty(value),
				"USER_EMAIL" => self.user_email = non_empty(value),
				"APPLICATION_KEY" => self.application_key = non_empty(value),
				"NOTES" => self.notes = non_empty(value),
				"BANNER_IMAGE" => self.banner_image = non_empty(value),
				"COLLECTOR_URL_TEMPLATE" => self.collector_url_template = value,
				"AUTO_SUBMIT" => self.auto_submit = parse_bool(&field, &value)?,
				"ASK_USER_DETAILS" => self.ask_user_details = parse_bool(&field, &value)?,
				"PERSIST_USER_DETAILS" => self.persist_user_details = parse_bool(&field, &value)?,
				"EXPIRATION_SECS" => {
					self.expiration_secs = if value.is_empty() {
						None
					} else {
						Some(parse_number(&field, &value)?)
					}
				}
				"REQUEST_TIMEOUT_SECS" => self.request_timeout_secs = parse_number(&field, &value)?,
				"RETRY_MAX_ATTEMPTS" => {
					self.retry.max_attempts = parse_number::<u32>(&field, &value)?
				}
				_ => {
					debug!(variable = %key.as_ref(), "ignoring unknown crash reporter variable");
				}
			}
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if let Some(database) = &self.database {
			if database.trim().is_empty() {
				return Err(ConfigError::invalid_value("database", "must not be blank"));
			}
		}
		if self.collector_url_template.trim().is_empty() {
			return Err(ConfigError::invalid_value(
				"collector_url_template",
				"must not be empty",
			));
		}
		if self.request_timeout_secs == 0 {
			return Err(ConfigError::invalid_value(
				"request_timeout_secs",
				"must be greater than zero",
			));
		}
		if self.retry.max_attempts == 0 {
			return Err(ConfigError::invalid_value(
				"retry.max_attempts",
				"must be at least 1",
			));
		}
		if self.retry.base_delay_ms > self.retry.max_delay_ms {
			return Err(ConfigError::invalid_value(
				"retry.base_delay_ms",
				"must not exceed retry.max_delay_ms",
			));
		}
		Ok(())
	}

	pub fn expiration(&self) -> Option<Duration> {
		self.expiration_secs.map(Duration::from_secs)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}
}

fn non_empty(value: String) -> Option<String> {
	if value.is_empty() {
		None
	} else {
		Some(value)
	}
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(ConfigError::invalid_value(
			field,
			format!("expected a boolean, got {other:?}"),
		)),
	}
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
	value
		.trim()
		.parse()
		.map_err(|_| ConfigError::invalid_value(field, format!("expected a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn defaults_are_conservative() {
		let config = ReporterConfig::default();
		assert!(!config.auto_submit);
		assert!(config.ask_user_details);
		assert!(!config.persist_user_details);
		assert!(config.expiration().is_none());
		assert_eq!(config.request_timeout(), Duration::from_secs(30));
		assert_eq!(config.collector_url_template, DEFAULT_COLLECTOR_URL_TEMPLATE);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn parses_partial_toml() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("crash.toml");
		std::fs::write(
			&path,
			r#"
database = "fred"
auto_submit = true
expiration_secs = 86400

[retry]
max_attempts = 5
"#,
		)
		.unwrap();

		let config = ReporterConfig::from_file(&path).unwrap();
		assert_eq!(config.database.as_deref(), Some("fred"));
		assert!(config.auto_submit);
		assert_eq!(config.expiration(), Some(Duration::from_secs(86400)));
		assert_eq!(config.retry.max_attempts, 5);
		assert_eq!(config.retry.max_delay_ms, RetrySettings::default().max_delay_ms);
		assert!(config.ask_user_details);
	}

	#[test]
	fn toml_errors_name_the_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("broken.toml");
		std::fs::write(&path, "auto_submit = \"maybe\"").unwrap();

		match ReporterConfig::from_file(&path) {
			Err(ConfigError::TomlParse { path: p, .. }) => assert_eq!(p, path),
			other => panic!("expected TomlParse, got {other:?}"),
		}
	}

	#[test]
	fn env_overrides_file_values() {
		let mut config = ReporterConfig {
			database: Some("file-db".to_string()),
			..Default::default()
		};
		config
			.apply_env([
				("LOOM_CRASH_DATABASE", "env-db"),
				("LOOM_CRASH_AUTO_SUBMIT", "yes"),
				("LOOM_CRASH_EXPIRATION_SECS", "60"),
				("LOOM_CRASH_RETRY_MAX_ATTEMPTS", "2"),
				("HOME", "/root"),
			])
			.unwrap();

		assert_eq!(config.database.as_deref(), Some("env-db"));
		assert!(config.auto_submit);
		assert_eq!(config.expiration_secs, Some(60));
		assert_eq!(config.retry.max_attempts, 2);
	}

	#[test]
	fn bad_env_values_are_rejected() {
		let mut config = ReporterConfig::default();
		let err = config
			.apply_env([("LOOM_CRASH_AUTO_SUBMIT", "sometimes")])
			.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "auto_submit"));

		let err = config
			.apply_env([("LOOM_CRASH_REQUEST_TIMEOUT_SECS", "soon")])
			.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));
	}

	#[test]
	fn validation_catches_bad_values() {
		let config = ReporterConfig {
			request_timeout_secs: 0,
			..Default::default()
		};
		assert!(config.validate().is_err());

		let config = ReporterConfig {
			database: Some("  ".to_string()),
			..Default::default()
		};
		assert!(config.validate().is_err());

		let mut config = ReporterConfig::default();
		config.retry.base_delay_ms = 10_000;
		config.retry.max_delay_ms = 1;
		assert!(config.validate().is_err());
	}

	#[test]
	fn retry_settings_convert() {
		let settings = RetrySettings {
			max_attempts: 4,
			base_delay_ms: 10,
			max_delay_ms: 100,
			jitter: false,
		};
		let retry = settings.to_retry_config();
		assert_eq!(retry.max_attempts, 4);
		assert_eq!(retry.base_delay, Duration::from_millis(10));
		assert_eq!(retry.max_delay, Duration::from_millis(100));
		assert!(!retry.jitter);
	}

	#[test]
	fn load_with_explicit_missing_path_uses_defaults() {
		let dir = TempDir::new().unwrap();
		let config = ReporterConfig::load(Some(&dir.path().join("absent.toml")));
		assert!(config.is_ok());
	}
}
