//! Application settings
//!
//! Loaded once at startup from an optional `filevault.toml` in the working
//! directory, then from `FILEVAULT__SECTION__KEY` environment variables.

use std::time::Duration;

use auth::tokens::MIN_SECRET_LEN;
use auth::{TokenConfig, TokenService};
use config::{Config, ConfigError, Environment as EnvSource, File};
use serde::Deserialize;
use storage::S3Config;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind_address: String,
    /// Base of the links put in emails
    pub public_base_url: String,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSettings {
    pub secret: Option<String>,
    pub confirmation_ttl_secs: u64,
    pub reset_ttl_secs: u64,
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharingSettings {
    pub link_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub timeout_secs: u64,
    pub max_object_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    /// Transactional mail endpoint; emails are only logged when unset
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub sender: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSettings {
    pub enabled: bool,
    /// Six-field cron expression, seconds first
    pub schedule: String,
    pub grace_period_secs: u64,
}

/// Everything the API service reads from its configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub environment: Environment,
    pub server: ServerSettings,
    pub tokens: TokenSettings,
    pub sharing: SharingSettings,
    pub storage: StorageSettings,
    pub mail: MailSettings,
    pub reconcile: ReconcileSettings,
}

impl Settings {
    /// Load from `filevault.toml` (if present) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("filevault").required(false))
            .add_source(
                EnvSource::with_prefix("FILEVAULT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "0.0.0.0:3001")?
            .set_default("server.public_base_url", "http://localhost:3001")?
            .set_default("server.max_upload_bytes", 64 * 1024 * 1024)?
            .set_default("tokens.confirmation_ttl_secs", 86_400)?
            .set_default("tokens.reset_ttl_secs", 600)?
            .set_default("tokens.session_ttl_secs", 3_600)?
            .set_default("sharing.link_ttl_secs", 3_600)?
            .set_default("storage.bucket", "filevault")?
            .set_default("storage.timeout_secs", 30)?
            .set_default("storage.max_object_bytes", 64 * 1024 * 1024)?
            .set_default("mail.sender", "filevault <no-reply@localhost>")?
            .set_default("mail.timeout_secs", 10)?
            .set_default("reconcile.enabled", true)?
            .set_default("reconcile.schedule", "0 */15 * * * *")?
            .set_default("reconcile.grace_period_secs", 3_600)
    }

    /// Token configuration, refusing to run production without a real secret
    pub fn token_config(&self) -> anyhow::Result<TokenConfig> {
        let mut config = match (&self.tokens.secret, self.environment) {
            (Some(secret), _) if !secret.is_empty() => TokenConfig::new(secret.clone()),
            (_, Environment::Production) => anyhow::bail!(
                "FILEVAULT__TOKENS__SECRET must be set in production (at least {} bytes)",
                MIN_SECRET_LEN
            ),
            (_, Environment::Development) => TokenConfig::ephemeral(),
        };

        config.confirmation_ttl = Duration::from_secs(self.tokens.confirmation_ttl_secs);
        config.reset_ttl = Duration::from_secs(self.tokens.reset_ttl_secs);
        config.session_ttl = Duration::from_secs(self.tokens.session_ttl_secs);
        Ok(config)
    }

    /// Token service built from `token_config`
    pub fn token_service(&self) -> anyhow::Result<TokenService> {
        Ok(TokenService::new(self.token_config()?)?)
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            bucket: self.storage.bucket.clone(),
            region: self.storage.region.clone(),
            endpoint_url: self.storage.endpoint_url.clone(),
            max_object_bytes: self.storage.max_object_bytes,
            operation_timeout: Duration::from_secs(self.storage.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "FILEVAULT__ENVIRONMENT",
        "FILEVAULT__TOKENS__SECRET",
        "FILEVAULT__TOKENS__RESET_TTL_SECS",
        "FILEVAULT__SHARING__LINK_TTL_SECS",
        "FILEVAULT__STORAGE__ENDPOINT_URL",
    ];

    fn clear() {
        for var in VARS {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_without_any_source() {
        clear();
        let settings = Settings::load().unwrap();

        assert_eq!(settings.environment, Environment::Development);
        assert_eq!(settings.tokens.reset_ttl_secs, 600);
        assert_eq!(settings.tokens.confirmation_ttl_secs, 86_400);
        assert_eq!(settings.sharing.link_ttl_secs, 3_600);
        assert!(settings.storage.endpoint_url.is_none());
        assert!(settings.reconcile.enabled);
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear();
        unsafe {
            env::set_var("FILEVAULT__TOKENS__RESET_TTL_SECS", "120");
            env::set_var("FILEVAULT__SHARING__LINK_TTL_SECS", "60");
            env::set_var("FILEVAULT__STORAGE__ENDPOINT_URL", "http://localhost:9000");
        }

        let settings = Settings::load().unwrap();
        assert_eq!(settings.tokens.reset_ttl_secs, 120);
        assert_eq!(settings.sharing.link_ttl_secs, 60);
        assert_eq!(
            settings.s3_config().endpoint_url.as_deref(),
            Some("http://localhost:9000")
        );

        let tokens = settings.token_config().unwrap();
        assert_eq!(tokens.reset_ttl, Duration::from_secs(120));

        clear();
    }

    #[test]
    #[serial]
    fn production_requires_a_secret() {
        clear();
        unsafe { env::set_var("FILEVAULT__ENVIRONMENT", "production") };

        let settings = Settings::load().unwrap();
        assert!(settings.token_config().is_err());

        unsafe { env::set_var("FILEVAULT__TOKENS__SECRET", "too-short") };
        let settings = Settings::load().unwrap();
        assert!(settings.token_service().is_err());

        unsafe {
            env::set_var(
                "FILEVAULT__TOKENS__SECRET",
                "a-production-secret-that-is-long-enough",
            )
        };
        let settings = Settings::load().unwrap();
        assert!(settings.token_service().is_ok());

        clear();
    }

    #[test]
    #[serial]
    fn development_falls_back_to_an_ephemeral_secret() {
        clear();
        let settings = Settings::load().unwrap();
        let config = settings.token_config().unwrap();
        assert!(config.secret.len() >= MIN_SECRET_LEN);
    }
}
