/// Configuration management for Message Deletion Service
///
/// Loads configuration from environment variables. Storage backends are
/// optional: without `DATABASE_URL` the service keeps messages in memory, and
/// without `REDIS_URL` the grace queue, fan-out and presence run in-process.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub policy: DeletionPolicyConfig,
    pub retention: RetentionConfig,
    pub s3: Option<S3Config>,
    /// Base URL of the follow/permission service
    pub permission_service_url: Option<String>,
    /// Bearer token required by operator endpoints
    pub admin_api_token: Option<String>,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

/// Knobs consumed by the deletion policy engine and request validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionPolicyConfig {
    /// Window after `created_at` in which a sender may delete for everyone
    pub delete_window_secs: i64,
    /// Upper bound for a caller supplied window override
    pub max_window_override_secs: i64,
    /// Sender keeps seeing (flagged) messages they deleted for everyone
    pub sender_sees_recalled: bool,
    /// Maximum message ids accepted by one request
    pub max_batch_size: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for DeletionPolicyConfig {
    fn default() -> Self {
        Self {
            delete_window_secs: 15 * 60,
            max_window_override_secs: 24 * 60 * 60,
            sender_sees_recalled: true,
            max_batch_size: 500,
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl DeletionPolicyConfig {
    /// Effective window for one call. Overrides are clamped to the configured ceiling.
    pub fn effective_window_secs(&self, override_secs: Option<i64>) -> i64 {
        match override_secs {
            Some(secs) => secs.clamp(0, self.max_window_override_secs),
            None => self.delete_window_secs,
        }
    }
}

/// Retention scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub sweep_interval_secs: u64,
    pub batch_size: i64,
    pub media_release_max_attempts: u32,
    pub media_release_initial_backoff_secs: i64,
    pub media_release_max_backoff_secs: i64,
    pub media_release_backoff_multiplier: f64,
    pub soft_delete_retention_days: i64,
    /// Undrained grace queues expire after this long
    pub grace_queue_ttl_secs: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            batch_size: 500,
            media_release_max_attempts: 5,
            media_release_initial_backoff_secs: 30,
            media_release_max_backoff_secs: 3600,
            media_release_backoff_multiplier: 2.0,
            soft_delete_retention_days: 30,
            grace_queue_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl RetentionConfig {
    /// Delay before the next release attempt after `attempts` failed ones:
    /// `initial * multiplier^attempts`, capped at the configured maximum.
    pub fn media_release_backoff(&self, attempts: u32) -> chrono::Duration {
        let initial = self.media_release_initial_backoff_secs.max(0) as f64;
        let max = self.media_release_max_backoff_secs.max(0) as f64;
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let secs = (initial * self.media_release_backoff_multiplier.powi(exponent)).min(max);
        chrono::Duration::seconds(secs as i64)
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let app = AppConfig {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8090),
        };

        let database = env_non_empty("DATABASE_URL").map(|url| DatabaseConfig {
            url,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
        });

        let redis = env_non_empty("REDIS_URL").map(|url| RedisConfig { url });

        let defaults = DeletionPolicyConfig::default();
        let policy = DeletionPolicyConfig {
            delete_window_secs: env_or("DELETE_FOR_EVERYONE_WINDOW_SECS", defaults.delete_window_secs),
            max_window_override_secs: env_or(
                "DELETE_WINDOW_MAX_OVERRIDE_SECS",
                defaults.max_window_override_secs,
            ),
            sender_sees_recalled: env_bool("SENDER_SEES_RECALLED", defaults.sender_sees_recalled),
            max_batch_size: env_or("MAX_BATCH_SIZE", defaults.max_batch_size),
            default_page_size: env_or("DEFAULT_PAGE_SIZE", defaults.default_page_size),
            max_page_size: env_or("MAX_PAGE_SIZE", defaults.max_page_size),
        };

        if policy.delete_window_secs < 0 {
            anyhow::bail!("DELETE_FOR_EVERYONE_WINDOW_SECS must not be negative");
        }

        let defaults = RetentionConfig::default();
        let retention = RetentionConfig {
            sweep_interval_secs: env_or("RETENTION_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            batch_size: env_or("RETENTION_SWEEP_BATCH_SIZE", defaults.batch_size),
            media_release_max_attempts: env_or(
                "MEDIA_RELEASE_MAX_ATTEMPTS",
                defaults.media_release_max_attempts,
            ),
            media_release_initial_backoff_secs: env_or(
                "MEDIA_RELEASE_INITIAL_BACKOFF_SECS",
                defaults.media_release_initial_backoff_secs,
            ),
            media_release_max_backoff_secs: env_or(
                "MEDIA_RELEASE_MAX_BACKOFF_SECS",
                defaults.media_release_max_backoff_secs,
            ),
            media_release_backoff_multiplier: env_or(
                "MEDIA_RELEASE_BACKOFF_MULTIPLIER",
                defaults.media_release_backoff_multiplier,
            ),
            soft_delete_retention_days: env_or(
                "SOFT_DELETE_RETENTION_DAYS",
                defaults.soft_delete_retention_days,
            ),
            grace_queue_ttl_secs: env_or("GRACE_QUEUE_TTL_SECS", defaults.grace_queue_ttl_secs),
        };

        if retention.sweep_interval_secs == 0 {
            anyhow::bail!("RETENTION_SWEEP_INTERVAL_SECS must be greater than zero");
        }

        let s3 = env_non_empty("S3_BUCKET").map(|bucket| S3Config {
            bucket,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: env_non_empty("S3_ENDPOINT"),
        });

        let permission_service_url = env_non_empty("PERMISSION_SERVICE_URL");
        let admin_api_token = env_non_empty("ADMIN_API_TOKEN");

        if app.env == "production" && admin_api_token.is_none() {
            return Err(anyhow::anyhow!("ADMIN_API_TOKEN missing"))
                .context("operator endpoints require a token in production");
        }

        Ok(Config {
            app,
            database,
            redis,
            policy,
            retention,
            s3,
            permission_service_url,
            admin_api_token,
        })
    }
}
