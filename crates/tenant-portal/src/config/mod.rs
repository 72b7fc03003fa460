use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::payments::domain::{Country, PollingPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the portal backend.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub payments: PaymentsConfig,
}

impl AppConfig {
    /// Load from the process environment after applying any `.env` file.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let environment =
            AppEnvironment::from_str(&vars.get_or("APP_ENV", "development"));

        let host = vars.get_or("APP_HOST", "127.0.0.1");
        let port = vars
            .get_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let telemetry = TelemetryConfig {
            log_level: vars.get_or("APP_LOG_LEVEL", "info"),
            payment_log_level: vars.get("PAYMENT_LOG_LEVEL"),
            ansi: vars.flag("APP_LOG_ANSI")?.unwrap_or(false),
            with_target: vars.flag("APP_LOG_TARGET")?.unwrap_or(false),
        };

        let payments = PaymentsConfig::from_vars(&vars, environment)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry,
            payments,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn number<T: std::str::FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
            None => Ok(None),
        }
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidFlag { key, value: raw }),
            },
            None => Ok(None),
        }
    }

    fn list(&self, key: &str, default: &str) -> Vec<String> {
        self.get_or(key, default)
            .split(',')
            .map(|item| item.trim().to_ascii_uppercase())
            .filter(|item| !item.is_empty())
            .collect()
    }

    fn countries(&self, key: &'static str, default: &str) -> Result<Vec<Country>, ConfigError> {
        self.list(key, default)
            .into_iter()
            .map(|code| {
                Country::from_iso(&code).ok_or(ConfigError::UnknownCountry { key, value: code })
            })
            .collect()
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Optional override for the payment flow modules only.
    pub payment_log_level: Option<String>,
    pub ansi: bool,
    pub with_target: bool,
}

impl TelemetryConfig {
    pub fn filter_directive(&self) -> String {
        match &self.payment_log_level {
            Some(level) => format!(
                "{},tenant_portal::workflows::payments={}",
                self.log_level, level
            ),
            None => self.log_level.clone(),
        }
    }
}

/// Mobile-money settings shared by every payment flow.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Registers the in-process sandbox gateway.
    pub sandbox: bool,
    /// Upper bound on any single provider HTTP call.
    pub http_timeout: Duration,
    /// Secret provider callbacks must carry; callbacks are refused without it.
    pub callback_token: Option<String>,
    pub mtn_momo: Option<MtnMomoConfig>,
    pub orange_money: Option<OrangeMoneyConfig>,
}

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 24;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;

impl PaymentsConfig {
    fn from_vars<F>(vars: &Vars<'_, F>, environment: AppEnvironment) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let interval_ms = vars
            .number::<u64>("PAYMENT_POLL_INTERVAL_MS")?
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let max_attempts = vars
            .number::<u32>("PAYMENT_MAX_ATTEMPTS")?
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "PAYMENT_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let http_timeout_ms = vars
            .number::<u64>("PAYMENT_HTTP_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);
        let callback_token = vars.get("PAYMENT_CALLBACK_TOKEN");

        let sandbox = vars
            .flag("PAYMENT_SANDBOX")?
            .unwrap_or(environment != AppEnvironment::Production);

        Ok(Self {
            poll_interval: Duration::from_millis(interval_ms),
            max_attempts,
            sandbox,
            http_timeout: Duration::from_millis(http_timeout_ms),
            callback_token,
            mtn_momo: MtnMomoConfig::from_vars(vars)?,
            orange_money: OrangeMoneyConfig::from_vars(vars)?,
        })
    }

    pub fn polling_policy(&self) -> PollingPolicy {
        PollingPolicy {
            interval: self.poll_interval,
            max_attempts: self.max_attempts,
        }
    }
}

/// MTN MoMo Collections credentials.
#[derive(Debug, Clone)]
pub struct MtnMomoConfig {
    pub base_url: String,
    pub api_user: String,
    pub api_key: String,
    pub subscription_key: String,
    pub target_environment: String,
    pub callback_url: Option<String>,
    pub currencies: Vec<String>,
    pub countries: Vec<Country>,
}

impl MtnMomoConfig {
    fn from_vars<F>(vars: &Vars<'_, F>) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (Some(api_user), Some(api_key), Some(subscription_key)) = (
            vars.get("MTN_MOMO_API_USER"),
            vars.get("MTN_MOMO_API_KEY"),
            vars.get("MTN_MOMO_SUBSCRIPTION_KEY"),
        ) else {
            return Ok(None);
        };

        Ok(Some(Self {
            base_url: vars.get_or("MTN_MOMO_BASE_URL", "https://sandbox.momodeveloper.mtn.com"),
            api_user,
            api_key,
            subscription_key,
            target_environment: vars.get_or("MTN_MOMO_TARGET_ENVIRONMENT", "sandbox"),
            callback_url: vars.get("MTN_MOMO_CALLBACK_URL"),
            currencies: vars.list("MTN_MOMO_CURRENCIES", "XAF"),
            countries: vars.countries("MTN_MOMO_COUNTRIES", "CM")?,
        }))
    }
}

/// Orange Money merchant-payment credentials.
#[derive(Debug, Clone)]
pub struct OrangeMoneyConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_username: String,
    pub api_password: String,
    pub channel_msisdn: String,
    pub pin: String,
    pub notif_url: Option<String>,
    pub currencies: Vec<String>,
    pub countries: Vec<Country>,
}

impl OrangeMoneyConfig {
    fn from_vars<F>(vars: &Vars<'_, F>) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = [
            "ORANGE_MONEY_CLIENT_ID",
            "ORANGE_MONEY_CLIENT_SECRET",
            "ORANGE_MONEY_API_USERNAME",
            "ORANGE_MONEY_API_PASSWORD",
            "ORANGE_MONEY_CHANNEL_MSISDN",
            "ORANGE_MONEY_PIN",
        ];
        let values: Vec<String> = required.iter().filter_map(|key| vars.get(key)).collect();
        if values.is_empty() {
            return Ok(None);
        }
        if values.len() != required.len() {
            let missing = required
                .iter()
                .find(|key| vars.get(key).is_none())
                .copied()
                .unwrap_or("ORANGE_MONEY_CLIENT_ID");
            return Err(ConfigError::IncompleteProvider {
                provider: "Orange Money",
                missing,
            });
        }

        let mut values = values.into_iter();
        let mut next = || values.next().unwrap_or_default();

        Ok(Some(Self {
            base_url: vars.get_or("ORANGE_MONEY_BASE_URL", "https://api-s1.orange.cm"),
            client_id: next(),
            client_secret: next(),
            api_username: next(),
            api_password: next(),
            channel_msisdn: next(),
            pin: next(),
            notif_url: vars.get("ORANGE_MONEY_NOTIF_URL"),
            currencies: vars.list("ORANGE_MONEY_CURRENCIES", "XAF"),
            countries: vars.countries("ORANGE_MONEY_COUNTRIES", "CM")?,
        }))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidNumber {
        key: &'static str,
        value: String,
    },
    InvalidFlag {
        key: &'static str,
        value: String,
    },
    UnknownCountry {
        key: &'static str,
        value: String,
    },
    IncompleteProvider {
        provider: &'static str,
        missing: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer (got '{value}')")
            }
            ConfigError::InvalidFlag { key, value } => {
                write!(f, "{key} must be true/false (got '{value}')")
            }
            ConfigError::UnknownCountry { key, value } => {
                write!(f, "{key} lists unsupported country code '{value}'")
            }
            ConfigError::IncompleteProvider { provider, missing } => {
                write!(f, "{provider} is partially configured: {missing} is missing")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        for key in ["APP_ENV", "APP_HOST", "APP_PORT", "APP_LOG_LEVEL"] {
            env::remove_var(key);
        }
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn defaults_enable_sandbox_outside_production() {
        let config = from_pairs(&[]).expect("defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.payments.sandbox);
        assert_eq!(config.payments.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            config.payments.poll_interval,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
        assert!(config.payments.mtn_momo.is_none());
        assert!(config.payments.orange_money.is_none());
        assert_eq!(
            config.payments.http_timeout,
            Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS)
        );
        assert!(config.payments.callback_token.is_none());

        let production = from_pairs(&[("APP_ENV", "production")]).expect("production");
        assert!(!production.payments.sandbox);
    }

    #[test]
    fn accepts_localhost_host() {
        let config = from_pairs(&[("APP_HOST", "localhost")]).expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_http_timeout_and_callback_token() {
        let config = from_pairs(&[
            ("PAYMENT_HTTP_TIMEOUT_MS", "4000"),
            ("PAYMENT_CALLBACK_TOKEN", "cb-secret"),
        ])
        .expect("config loads");
        assert_eq!(config.payments.http_timeout, Duration::from_millis(4000));
        assert_eq!(config.payments.callback_token.as_deref(), Some("cb-secret"));

        let blank = from_pairs(&[("PAYMENT_CALLBACK_TOKEN", "  ")]).expect("config loads");
        assert!(blank.payments.callback_token.is_none());
    }

    #[test]
    fn rejects_zero_attempts_and_bad_numbers() {
        assert!(matches!(
            from_pairs(&[("PAYMENT_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::InvalidNumber { key: "PAYMENT_MAX_ATTEMPTS", .. })
        ));
        assert!(matches!(
            from_pairs(&[("PAYMENT_POLL_INTERVAL_MS", "soon")]),
            Err(ConfigError::InvalidNumber { key: "PAYMENT_POLL_INTERVAL_MS", .. })
        ));
    }

    #[test]
    fn mtn_momo_requires_all_credentials() {
        let config = from_pairs(&[
            ("MTN_MOMO_API_USER", "user"),
            ("MTN_MOMO_API_KEY", "key"),
            ("MTN_MOMO_SUBSCRIPTION_KEY", "sub"),
            ("MTN_MOMO_CURRENCIES", "xaf, eur"),
            ("MTN_MOMO_COUNTRIES", "CM,CI"),
        ])
        .expect("momo config");
        let momo = config.payments.mtn_momo.expect("momo configured");
        assert_eq!(momo.currencies, vec!["XAF".to_string(), "EUR".to_string()]);
        assert_eq!(momo.countries, vec![Country::Cameroon, Country::CoteDIvoire]);
        assert_eq!(momo.target_environment, "sandbox");

        let partial = from_pairs(&[("MTN_MOMO_API_USER", "user")]).expect("partial ignored");
        assert!(partial.payments.mtn_momo.is_none());
    }

    #[test]
    fn orange_money_reports_missing_credential() {
        match from_pairs(&[
            ("ORANGE_MONEY_CLIENT_ID", "id"),
            ("ORANGE_MONEY_CLIENT_SECRET", "secret"),
        ]) {
            Err(ConfigError::IncompleteProvider { missing, .. }) => {
                assert_eq!(missing, "ORANGE_MONEY_API_USERNAME")
            }
            other => panic!("expected incomplete provider, got {other:?}"),
        }
    }

    #[test]
    fn unknown_country_is_rejected() {
        let result = from_pairs(&[
            ("MTN_MOMO_API_USER", "user"),
            ("MTN_MOMO_API_KEY", "key"),
            ("MTN_MOMO_SUBSCRIPTION_KEY", "sub"),
            ("MTN_MOMO_COUNTRIES", "XX"),
        ]);
        assert!(matches!(result, Err(ConfigError::UnknownCountry { .. })));
    }
}
