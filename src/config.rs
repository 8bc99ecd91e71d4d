use chrono::FixedOffset;
use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_true")]
    pub use_backoff: bool,
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub email_enabled: bool,
    #[serde(default = "default_email_api_url")]
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    pub email_reply_to: Option<String>,
    #[serde(default)]
    pub clinic_utc_offset_minutes: i32,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub sentry_dsn: Option<String>,
}

fn default_dispatch_interval() -> u64 {
    900_000 // every 15 minutes
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_email_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_email_from() -> String {
    "Clinic <no-reply@localhost>".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Builds and validates a config from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars)?;

        if config.database_url.is_none() {
            return Err(envy::Error::MissingValue("DATABASE_URL"));
        }

        if config.email_enabled && config.email_api_key.is_none() {
            return Err(envy::Error::Custom(
                "EMAIL_API_KEY is required while EMAIL_ENABLED is true".to_string(),
            ));
        }

        if config.clinic_offset().is_none() {
            return Err(envy::Error::Custom(format!(
                "CLINIC_UTC_OFFSET_MINUTES out of range: {}",
                config.clinic_utc_offset_minutes
            )));
        }

        Ok(config)
    }

    /// Returns the database URL.
    ///
    /// # Panics
    /// Panics if the database_url is not set. This should only be
    /// called after `load()` which validates it.
    pub fn database_url(&self) -> &str {
        self.database_url
            .as_deref()
            .expect("DATABASE_URL is not set")
    }

    /// Reference timezone used to compute reminder windows.
    pub fn clinic_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.clinic_utc_offset_minutes.checked_mul(60)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_delay_ms, self.use_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/clinic"),
            ("EMAIL_API_KEY", "re_test"),
        ]))
        .expect("config should load");

        assert_eq!(config.dispatch_interval_ms, 900_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert!(config.use_backoff);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert!(config.email_enabled);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.clinic_offset(), FixedOffset::east_opt(0));
        assert_eq!(config.database_url(), "postgres://localhost/clinic");
    }

    #[test]
    fn test_missing_database_url_is_rejected() {
        let result = Config::from_vars(vars(&[("EMAIL_ENABLED", "false")]));

        assert!(matches!(result, Err(envy::Error::MissingValue("DATABASE_URL"))));
    }

    #[test]
    fn test_enabled_email_requires_api_key() {
        let result = Config::from_vars(vars(&[("DATABASE_URL", "postgres://localhost/clinic")]));
        assert!(result.is_err());

        let disabled = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/clinic"),
            ("EMAIL_ENABLED", "false"),
        ]));
        assert!(disabled.is_ok());
    }

    #[test]
    fn test_offset_and_retry_policy_overrides() {
        let config = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/clinic"),
            ("EMAIL_ENABLED", "false"),
            ("CLINIC_UTC_OFFSET_MINUTES", "-180"),
            ("MAX_RETRIES", "5"),
            ("BASE_DELAY_MS", "250"),
            ("USE_BACKOFF", "false"),
        ]))
        .expect("config should load");

        assert_eq!(config.clinic_offset(), FixedOffset::west_opt(3 * 3600));
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay_ms, 250);
        assert!(!policy.use_backoff);
    }

    #[test]
    fn test_out_of_range_offset_is_rejected() {
        let result = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/clinic"),
            ("EMAIL_ENABLED", "false"),
            ("CLINIC_UTC_OFFSET_MINUTES", "2000"),
        ]));

        assert!(result.is_err());
    }
}
