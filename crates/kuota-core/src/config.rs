//! Application configuration management.
//!
//! Configuration is stored at `~/.config/kuota/config.json`. Every field can
//! be overridden from the environment (see [`Config::apply_env`]), which is
//! how deployments usually supply the SSO account secrets.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Application name used for config/data directory paths
const APP_NAME: &str = "kuota";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Bearer tokens issued by the SSO provider are good for a working day.
const DEFAULT_TOKEN_TTL_HOURS: u64 = 8;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Retries allowed after a 401 before the call is reported as failed.
const DEFAULT_MAX_AUTH_RETRIES: u32 = 2;

const DEFAULT_OTP_TTL_MINUTES: u64 = 5;

/// Longest bearer-token lifetime accepted (30 days)
const MAX_TOKEN_TTL_HOURS: u64 = 720;

const MAX_OTP_TTL_MINUTES: u64 = 60;

/// Where `kuota serve` listens unless told otherwise
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sso_base_url: String,
    pub vendor_base_url: String,
    pub sso_static_key: String,
    pub username: String,
    /// Falls back to the OS keychain when absent.
    pub password: Option<String>,
    pub token_ttl_hours: u64,
    pub request_timeout_secs: u64,
    pub max_auth_retries: u32,
    pub otp_ttl_minutes: u64,
    pub data_dir: Option<PathBuf>,
    /// Key inbound HTTP clients must present to `kuota serve`.
    pub api_key: Option<String>,
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sso_base_url: String::new(),
            vendor_base_url: String::new(),
            sso_static_key: String::new(),
            username: String::new(),
            password: None,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            otp_ttl_minutes: DEFAULT_OTP_TTL_MINUTES,
            data_dir: None,
            api_key: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `KUOTA_*` variables. The lookup is injected so
    /// tests don't have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KUOTA_SSO_URL") {
            self.sso_base_url = v;
        }
        if let Some(v) = lookup("KUOTA_VENDOR_URL") {
            self.vendor_base_url = v;
        }
        if let Some(v) = lookup("KUOTA_SSO_KEY") {
            self.sso_static_key = v;
        }
        if let Some(v) = lookup("KUOTA_USERNAME") {
            self.username = v;
        }
        if let Some(v) = lookup("KUOTA_PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = lookup("KUOTA_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KUOTA_TOKEN_TTL_HOURS") {
            self.token_ttl_hours = v
                .parse()
                .with_context(|| format!("KUOTA_TOKEN_TTL_HOURS is not a number: {}", v))?;
        }
        if let Some(v) = lookup("KUOTA_OTP_TTL_MINUTES") {
            self.otp_ttl_minutes = v
                .parse()
                .with_context(|| format!("KUOTA_OTP_TTL_MINUTES is not a number: {}", v))?;
        }
        if let Some(v) = lookup("KUOTA_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("KUOTA_BIND") {
            self.bind_address = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sso_base_url.trim().is_empty() {
            bail!("sso_base_url must not be empty");
        }
        if self.vendor_base_url.trim().is_empty() {
            bail!("vendor_base_url must not be empty");
        }
        if self.sso_static_key.trim().is_empty() {
            bail!("sso_static_key must not be empty");
        }
        if self.username.trim().is_empty() {
            bail!("username must not be empty");
        }
        if self.token_ttl_hours == 0 || self.token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            bail!(
                "token_ttl_hours must be between 1 and {}, got {}",
                MAX_TOKEN_TTL_HOURS,
                self.token_ttl_hours
            );
        }
        if self.otp_ttl_minutes == 0 || self.otp_ttl_minutes > MAX_OTP_TTL_MINUTES {
            bail!(
                "otp_ttl_minutes must be between 1 and {}, got {}",
                MAX_OTP_TTL_MINUTES,
                self.otp_ttl_minutes
            );
        }
        Ok(())
    }

    /// Extra checks for `kuota serve`: an API key is mandatory.
    pub fn validate_server(&self) -> Result<()> {
        self.validate()?;
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => bail!("api_key must be set to run the HTTP server (set KUOTA_API_KEY)"),
        }
        if self.bind_address.trim().is_empty() {
            bail!("bind_address must not be empty");
        }
        Ok(())
    }

    /// Token lifetime, saturating instead of panicking on absurd values.
    pub fn token_ttl(&self) -> chrono::Duration {
        i64::try_from(self.token_ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        i64::try_from(self.otp_ttl_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the transaction journal and log files.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> Config {
        Config {
            sso_base_url: "https://sso.example.test/api".to_string(),
            vendor_base_url: "https://vendor.example.test/api/user".to_string(),
            sso_static_key: "client-key".to_string(),
            username: "reseller".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.token_ttl(), chrono::Duration::hours(8));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_auth_retries, 2);
        assert_eq!(config.otp_ttl(), chrono::Duration::minutes(5));
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());

        let mut config = valid();
        config.token_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_ttls() {
        let mut config = valid();
        config.token_ttl_hours = MAX_TOKEN_TTL_HOURS;
        assert!(config.validate().is_ok());
        config.token_ttl_hours = MAX_TOKEN_TTL_HOURS + 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.otp_ttl_minutes = MAX_OTP_TTL_MINUTES + 1;
        assert!(config.validate().is_err());
        config.otp_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_ttl_from_env_does_not_panic() {
        let mut config = valid();
        config
            .apply_env(|key| (key == "KUOTA_TOKEN_TTL_HOURS").then(|| "3000000000000".to_string()))
            .unwrap();

        assert!(config.validate().is_err());
        assert_eq!(config.token_ttl(), chrono::Duration::MAX);

        config.otp_ttl_minutes = u64::MAX;
        assert_eq!(config.otp_ttl(), chrono::Duration::MAX);
    }

    #[test]
    fn test_validate_server_requires_api_key() {
        let mut config = valid();
        assert!(config.validate_server().is_err());

        config.api_key = Some("  ".to_string());
        assert!(config.validate_server().is_err());

        config
            .apply_env(|key| match key {
                "KUOTA_API_KEY" => Some("admin-key".to_string()),
                "KUOTA_BIND" => Some("0.0.0.0:9000".to_string()),
                _ => None,
            })
            .unwrap();
        assert!(config.validate_server().is_ok());
        assert_eq!(config.bind_address, "0.0.0.0:9000");
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KUOTA_USERNAME", "from-env"),
            ("KUOTA_PASSWORD", "secret"),
            ("KUOTA_TOKEN_TTL_HOURS", "2"),
        ]
        .into_iter()
        .collect();

        let mut config = valid();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.username, "from-env");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.token_ttl_hours, 2);
        assert_eq!(config.sso_static_key, "client-key");
    }

    #[test]
    fn test_apply_env_rejects_bad_ttl() {
        let mut config = valid();
        let result = config.apply_env(|key| {
            (key == "KUOTA_TOKEN_TTL_HOURS").then(|| "eight".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"username":"reseller"}"#).unwrap();
        assert_eq!(config.username, "reseller");
        assert_eq!(config.token_ttl_hours, 8);
    }
}
