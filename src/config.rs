//! Configuration module for environment variables and application settings

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Credential signing configuration
    pub auth: AuthConfig,

    /// Failed-login lockout policy
    pub lockout: LockoutConfig,

    /// Result cache configuration
    pub cache: CacheConfig,
}

/// Deployment environment. Controls loopback rate-limit exemption and secret requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" | "test" => Ok(Environment::Development),
            other => Err(anyhow!("unknown APP_ENV value '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub cors_allowed_origins: Vec<String>,
    /// Lowercased emails allowed to read the security status report
    pub operator_emails: Vec<String>,
}

impl ServerConfig {
    pub fn is_operator(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.operator_emails.iter().any(|operator| *operator == email)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret for access credentials
    pub access_secret: String,
    /// Secret for refresh credentials, must differ from `access_secret`
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_secret: DEV_REFRESH_SECRET.to_string(),
            issuer: "timeguard-server".to_string(),
            audience: "timeguard-api".to_string(),
            access_token_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Failures inside one window before the identifier is locked
    pub threshold: u32,
    /// Window length; a locked identifier stays locked until it elapses
    pub duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    /// Interval of the background sweep
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: crate::cache::store::DEFAULT_TTL,
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let environment: Environment = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .parse()?;

        let defaults = AuthConfig::default();
        let auth = AuthConfig {
            access_secret: secret("JWT_ACCESS_SECRET", environment, &defaults.access_secret)?,
            refresh_secret: secret("JWT_REFRESH_SECRET", environment, &defaults.refresh_secret)?,
            issuer: env::var("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: env::var("JWT_AUDIENCE").unwrap_or(defaults.audience),
            access_token_ttl: seconds_or("ACCESS_TOKEN_TTL_SECS", defaults.access_token_ttl),
            refresh_token_ttl: seconds_or("REFRESH_TOKEN_TTL_SECS", defaults.refresh_token_ttl),
        };

        if auth.access_secret == auth.refresh_secret {
            bail!("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ");
        }

        let lockout_defaults = LockoutConfig::default();
        let cache_defaults = CacheConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_or("PORT", 3000),
                environment,
                cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3001".to_string())
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
                operator_emails: env::var("OPERATOR_EMAILS")
                    .unwrap_or_default()
                    .split(',')
                    .map(|email| email.trim().to_lowercase())
                    .filter(|email| !email.is_empty())
                    .collect(),
            },

            auth,

            lockout: LockoutConfig {
                threshold: parse_or("LOCKOUT_THRESHOLD", lockout_defaults.threshold),
                duration: seconds_or("LOCKOUT_DURATION_SECS", lockout_defaults.duration),
            },

            cache: CacheConfig {
                default_ttl: seconds_or("CACHE_TTL_SECS", cache_defaults.default_ttl),
                sweep_interval: seconds_or("CACHE_SWEEP_INTERVAL_SECS", cache_defaults.sweep_interval),
            },
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn seconds_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Production refuses to start on a missing secret; development falls back to a fixed one.
fn secret(key: &str, environment: Environment, dev_default: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ if environment.is_production() => {
            Err(anyhow!("{} environment variable is required in production", key))
        }
        _ => {
            tracing::warn!("{} not set, using development secret", key);
            Ok(dev_default.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_default_secrets_differ() {
        let auth = AuthConfig::default();
        assert_ne!(auth.access_secret, auth.refresh_secret);
    }

    #[test]
    fn test_operator_match_ignores_case_and_whitespace() {
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: Environment::Development,
            cors_allowed_origins: Vec::new(),
            operator_emails: vec!["ops@example.com".to_string()],
        };
        assert!(server.is_operator(" Ops@Example.com"));
        assert!(!server.is_operator("dev@example.com"));
    }

    #[test]
    fn test_production_requires_secret() {
        assert!(secret("TIMEGUARD_TEST_UNSET_SECRET", Environment::Production, "x").is_err());
        assert_eq!(
            secret("TIMEGUARD_TEST_UNSET_SECRET", Environment::Development, "x").unwrap(),
            "x"
        );
    }
}
