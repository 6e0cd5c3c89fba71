//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a flat
//! struct, then derives the typed [`LedgerPolicy`] the services work with.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT`: HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS`: pool size, defaults to 5
/// - `CORS_ALLOWED_ORIGIN`: browser origin allowed to call the API
/// - `PASSWORD_RECOVERY_URL`: prefix the reset token is appended to
/// - `SESSION_TTL_HOURS` / `RESET_TOKEN_TTL_MINUTES`: credential lifetimes
/// - `MIN_TRANSFER_CENTS` / `MAX_TRANSFER_CENTS`: inclusive transfer bounds
/// - `MAX_CARDS_PER_ACCOUNT`: card registry limit
/// - `STORAGE_TIMEOUT_MS`, `TRANSFER_MAX_ATTEMPTS`, `TRANSFER_RETRY_BACKOFF_MS`:
///   commit timeout and retry behaviour of the transfer engine
/// - `REJECT_CARD_REMOVAL_WITH_BALANCE`: refuse to remove funded cards
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_cors_origin")]
    pub cors_allowed_origin: String,

    #[serde(default = "default_recovery_url")]
    pub password_recovery_url: String,

    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    #[serde(default = "default_reset_token_ttl_minutes")]
    pub reset_token_ttl_minutes: i64,

    #[serde(default = "default_min_transfer_cents")]
    pub min_transfer_cents: i64,

    #[serde(default = "default_max_transfer_cents")]
    pub max_transfer_cents: i64,

    #[serde(default = "default_max_cards_per_account")]
    pub max_cards_per_account: usize,

    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    #[serde(default = "default_transfer_max_attempts")]
    pub transfer_max_attempts: u32,

    #[serde(default = "default_transfer_retry_backoff_ms")]
    pub transfer_retry_backoff_ms: u64,

    #[serde(default)]
    pub reject_card_removal_with_balance: bool,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_recovery_url() -> String {
    "http://localhost:3000/recovery/".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_reset_token_ttl_minutes() -> i64 {
    10
}

/// 100.00 in minor units.
fn default_min_transfer_cents() -> i64 {
    10_000
}

/// 100000.00 in minor units.
fn default_max_transfer_cents() -> i64 {
    10_000_000
}

fn default_max_cards_per_account() -> usize {
    3
}

fn default_storage_timeout_ms() -> u64 {
    5_000
}

fn default_transfer_max_attempts() -> u32 {
    3
}

fn default_transfer_retry_backoff_ms() -> u64 {
    50
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Default for Config {
    /// Defaults for every optional variable and an empty database URL.
    ///
    /// Used by in-process deployments and tests that never touch PostgreSQL.
    fn default() -> Self {
        Self {
            database_url: String::new(),
            server_port: default_port(),
            database_max_connections: default_max_connections(),
            cors_allowed_origin: default_cors_origin(),
            password_recovery_url: default_recovery_url(),
            session_ttl_hours: default_session_ttl_hours(),
            reset_token_ttl_minutes: default_reset_token_ttl_minutes(),
            min_transfer_cents: default_min_transfer_cents(),
            max_transfer_cents: default_max_transfer_cents(),
            max_cards_per_account: default_max_cards_per_account(),
            storage_timeout_ms: default_storage_timeout_ms(),
            transfer_max_attempts: default_transfer_max_attempts(),
            transfer_retry_backoff_ms: default_transfer_retry_backoff_ms(),
            reject_card_removal_with_balance: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    /// - The ledger values are inconsistent (see [`Config::ledger_policy`])
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.ledger_policy()?;
        Ok(config)
    }

    /// Build the typed policy consumed by the card registry and transfer engine.
    pub fn ledger_policy(&self) -> Result<LedgerPolicy, ConfigError> {
        if self.min_transfer_cents <= 0 {
            return Err(ConfigError::Invalid(
                "MIN_TRANSFER_CENTS must be positive".to_string(),
            ));
        }
        if self.min_transfer_cents > self.max_transfer_cents {
            return Err(ConfigError::Invalid(
                "MIN_TRANSFER_CENTS exceeds MAX_TRANSFER_CENTS".to_string(),
            ));
        }
        if self.transfer_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "TRANSFER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.max_cards_per_account == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CARDS_PER_ACCOUNT must be at least 1".to_string(),
            ));
        }

        let card_removal = if self.reject_card_removal_with_balance {
            CardRemovalPolicy::RejectNonZeroBalance
        } else {
            CardRemovalPolicy::Permit
        };

        Ok(LedgerPolicy {
            limits: TransferLimits {
                min_cents: self.min_transfer_cents,
                max_cents: self.max_transfer_cents,
            },
            max_cards_per_account: self.max_cards_per_account,
            card_removal,
            retry: RetryPolicy {
                max_attempts: self.transfer_max_attempts,
                backoff: Duration::from_millis(self.transfer_retry_backoff_ms),
            },
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
        })
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn reset_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reset_token_ttl_minutes)
    }
}

/// Inclusive bounds for a single transfer, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    pub min_cents: i64,
    pub max_cents: i64,
}

impl TransferLimits {
    pub fn contains(&self, amount_cents: i64) -> bool {
        (self.min_cents..=self.max_cents).contains(&amount_cents)
    }
}

/// What happens when an owner removes a card that still holds money.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardRemovalPolicy {
    /// Remove it anyway. The balance stays on the soft-deleted row.
    Permit,
    /// Refuse until the card has been emptied.
    RejectNonZeroBalance,
}

/// Automatic retry of transient commit failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .checked_mul(2u32.saturating_pow(attempt.saturating_sub(2)))
            .unwrap_or(Duration::MAX)
    }
}

/// Business rules shared by the card registry and the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub limits: TransferLimits,
    pub max_cards_per_account: usize,
    pub card_removal: CardRemovalPolicy,
    pub retry: RetryPolicy,
    pub storage_timeout: Duration,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            limits: TransferLimits {
                min_cents: default_min_transfer_cents(),
                max_cents: default_max_transfer_cents(),
            },
            max_cards_per_account: default_max_cards_per_account(),
            card_removal: CardRemovalPolicy::Permit,
            retry: RetryPolicy {
                max_attempts: default_transfer_max_attempts(),
                backoff: Duration::from_millis(default_transfer_retry_backoff_ms()),
            },
            storage_timeout: Duration::from_millis(default_storage_timeout_ms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_business_constants() {
        let policy = LedgerPolicy::default();
        assert_eq!(policy.limits.min_cents, 10_000);
        assert_eq!(policy.limits.max_cents, 10_000_000);
        assert_eq!(policy.max_cards_per_account, 3);
        assert_eq!(policy.card_removal, CardRemovalPolicy::Permit);
    }

    #[test]
    fn test_limits_are_inclusive() {
        let limits = TransferLimits {
            min_cents: 10_000,
            max_cents: 10_000_000,
        };
        assert!(limits.contains(10_000));
        assert!(limits.contains(10_000_000));
        assert!(!limits.contains(9_999));
        assert!(!limits.contains(10_000_001));
    }

    #[test]
    fn test_inconsistent_limits_are_rejected() {
        let config = Config {
            min_transfer_cents: 500,
            max_transfer_cents: 100,
            ..Config::default()
        };
        assert!(matches!(
            config.ledger_policy(),
            Err(ConfigError::Invalid(_))
        ));

        let config = Config {
            transfer_max_attempts: 0,
            ..Config::default()
        };
        assert!(config.ledger_policy().is_err());
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let retry = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(50),
        };
        assert_eq!(retry.delay_before(2), Duration::from_millis(50));
        assert_eq!(retry.delay_before(3), Duration::from_millis(100));
        assert_eq!(retry.delay_before(4), Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let retry = RetryPolicy {
            max_attempts: u32::MAX,
            backoff: Duration::from_millis(u64::MAX),
        };
        assert_eq!(retry.delay_before(3), Duration::MAX);
        assert_eq!(retry.delay_before(40), Duration::MAX);
    }
}
