use std::env;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Publishable and secret keys for the payment gateway.
#[derive(Clone)]
pub struct StripeKeys {
    pub publishable_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for StripeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeKeys")
            .field("publishable_key", &self.publishable_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub env: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub stripe_keys: StripeKeys,
    /// Symmetric key used to sign password-reset links.
    pub secret_key: String,
    pub frontend_url: String,
    /// Deadline for every database and gateway call.
    pub call_timeout: Duration,
    pub token_ttl: chrono::Duration,
    pub reset_link_ttl: chrono::Duration,
    /// How long an unread receipt is kept for its session.
    pub receipt_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let config = Config {
            port: parse_or("PORT", 4001)?,
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5)?,
            stripe_keys: StripeKeys {
                publishable_key: required("STRIPE_KEY")?,
                secret_key: required("STRIPE_SECRET")?,
            },
            secret_key: required("SECRET_KEY")?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:4000".to_string()),
            call_timeout: Duration::from_secs(parse_or("CALL_TIMEOUT_SECS", 3)?),
            token_ttl: chrono::Duration::hours(parse_or("TOKEN_TTL_HOURS", 24)?),
            reset_link_ttl: chrono::Duration::minutes(parse_or("RESET_LINK_TTL_MINUTES", 60)?),
            receipt_ttl: Duration::from_secs(60 * parse_or("RECEIPT_TTL_MINUTES", 30)?),
            bcrypt_cost: parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
        };

        info!(
            "Loaded configuration for {} environment on port {}",
            config.env, config.port
        );
        Ok(config)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
