//! Environment-sourced configuration.
//!
//! An optional `lifelist.toml` in the working directory supplies defaults;
//! `LIFELIST_*` environment variables win over the file. The token secret
//! has no usable default and is checked at startup — it is never logged.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Config file name looked up in the working directory.
const CONFIG_FILE: &str = "lifelist.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file; created on first start.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lifelist.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret for bearer tokens. Required, no default.
    pub token_secret: String,
    /// Token lifetime in minutes.
    pub token_ttl_minutes: i64,
    pub password: PasswordPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_ttl_minutes: 45,
            password: PasswordPolicy::default(),
        }
    }
}

/// Minimum-strength policy applied at registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    /// Require at least one letter and one digit.
    pub require_letter_and_digit: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_letter_and_digit: true,
        }
    }
}

impl PasswordPolicy {
    /// Check a candidate password, returning a human-readable rejection.
    pub fn check(&self, password: &str) -> Result<(), String> {
        if password.chars().count() < self.min_length {
            return Err(format!(
                "password must be at least {} characters",
                self.min_length
            ));
        }
        if self.require_letter_and_digit {
            let has_letter = password.chars().any(|c| c.is_alphabetic());
            let has_digit = password.chars().any(|c| c.is_ascii_digit());
            if !has_letter || !has_digit {
                return Err("password must contain at least one letter and one digit".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Base URL of the Gemini-compatible classification endpoint.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Outbound request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: String::new(),
            model: "gemini-2.5-flash".into(),
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load `lifelist.toml` (if present), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(raw) => toml::from_str(&raw).with_context(|| format!("parsing {CONFIG_FILE}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e).with_context(|| format!("reading {CONFIG_FILE}")),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_nonempty("LIFELIST_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env_parse("LIFELIST_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_nonempty("LIFELIST_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("LIFELIST_TOKEN_SECRET") {
            self.auth.token_secret = v;
        }
        if let Some(v) = env_parse("LIFELIST_TOKEN_TTL_MINUTES") {
            self.auth.token_ttl_minutes = v;
        }
        if let Some(v) = env_parse("LIFELIST_PASSWORD_MIN_LENGTH") {
            self.auth.password.min_length = v;
        }
        if let Some(v) = env_parse("LIFELIST_PASSWORD_REQUIRE_LETTER_AND_DIGIT") {
            self.auth.password.require_letter_and_digit = v;
        }
        if let Some(v) = env_nonempty("LIFELIST_CLASSIFIER_URL") {
            self.classifier.base_url = v;
        }
        if let Some(v) = env_nonempty("LIFELIST_CLASSIFIER_API_KEY") {
            self.classifier.api_key = v;
        }
        if let Some(v) = env_nonempty("LIFELIST_CLASSIFIER_MODEL") {
            self.classifier.model = v;
        }
        if let Some(v) = env_parse("LIFELIST_CLASSIFIER_TIMEOUT_SECS") {
            self.classifier.timeout_secs = v;
        }
    }

    /// Fail fast on settings the server cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.auth.token_secret.trim().is_empty() {
            bail!("token secret is not set (LIFELIST_TOKEN_SECRET or [auth] token_secret)");
        }
        if self.auth.token_ttl_minutes <= 0 {
            bail!("token TTL must be positive");
        }
        if self.classifier.timeout_secs == 0 {
            bail!("classifier timeout must be positive");
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|v| v.parse().ok())
}
