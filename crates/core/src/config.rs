use serde::Deserialize;

use crate::error::{ConsoleError, ConsoleResult};

/// Root console configuration. Loaded from environment variables
/// with the prefix `LICENSE_CONSOLE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub licensing: LicensingConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Backend REST API connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request. Anonymous when unset.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout. The HTTP client default applies when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LicensingConfig {
    /// Reject blank license keys instead of letting the backend generate one.
    #[serde(default)]
    pub require_license_key: bool,
    /// Length of the default validity window.
    #[serde(default = "default_validity_months")]
    pub validity_months: u32,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub json: bool,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}
fn default_validity_months() -> u32 {
    12
}
fn default_page_size() -> u32 {
    100
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_ms: None,
        }
    }
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            require_license_key: false,
            validity_months: default_validity_months(),
            default_page_size: default_page_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            licensing: LicensingConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> ConsoleResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("LICENSE_CONSOLE")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the rest of the console cannot work with.
    pub fn validate(&self) -> ConsoleResult<()> {
        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConsoleError::InvalidSetting {
                key: "api.base_url",
                reason: format!("expected an http(s) URL, got `{url}`"),
            });
        }
        if self.licensing.validity_months == 0 {
            return Err(ConsoleError::InvalidSetting {
                key: "licensing.validity_months",
                reason: "must be at least 1".into(),
            });
        }
        if self.licensing.default_page_size == 0 {
            return Err(ConsoleError::InvalidSetting {
                key: "licensing.default_page_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.base_url, "http://localhost:8000/api/v1");
        assert!(config.api.token.is_none());
        assert!(!config.licensing.require_license_key);
        assert_eq!(config.licensing.validity_months, 12);
        assert_eq!(config.licensing.default_page_size, 100);
    }

    #[test]
    fn test_rejects_zero_validity() {
        let mut config = AppConfig::default();
        config.licensing.validity_months = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::InvalidSetting {
                key: "licensing.validity_months",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = AppConfig::default();
        config.api.base_url = "ftp://backend".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"licensing": {"require_license_key": true}}"#).unwrap();
        assert!(config.licensing.require_license_key);
        assert_eq!(config.licensing.validity_months, 12);
        assert_eq!(config.api.base_url, "http://localhost:8000/api/v1");
    }
}
