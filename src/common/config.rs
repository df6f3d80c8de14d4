//! Configuration for coordkit components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Largest machine id that fits in the 10 machine bits of an id.
pub const MAX_MACHINE_ID: i64 = (1 << 10) - 1;

/// Default custom epoch: 1998-08-13T00:00:00Z, in milliseconds.
pub const DEFAULT_EPOCH_MS: i64 = 903_024_000_000;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier, used in logs)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub id: IdConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub precache: PrecacheConfig,

    #[serde(default)]
    pub join: JoinConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_node_id() -> String {
    "node-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            log_level: default_log_level(),
            id: IdConfig::default(),
            store: StoreConfig::default(),
            lock: LockConfig::default(),
            precache: PrecacheConfig::default(),
            join: JoinConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `COORDKIT__SECTION__FIELD` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("coordkit").required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("COORDKIT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("precache.accounts")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the allocator or the lock layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_MACHINE_ID).contains(&self.id.machine_id) {
            return Err(Error::InvalidConfig(format!(
                "id.machine_id must be between 0 and {}, got {}",
                MAX_MACHINE_ID, self.id.machine_id
            )));
        }
        if self.id.epoch_ms < 0 {
            return Err(Error::InvalidConfig("id.epoch_ms must not be negative".into()));
        }
        if self.lock.lease_ttl_ms < 2 {
            return Err(Error::InvalidConfig(
                "lock.lease_ttl_ms must be at least 2ms".into(),
            ));
        }
        if self.precache.user_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "precache.user_timeout_ms must be positive".into(),
            ));
        }
        if self.precache.page_size == 0 || self.precache.page_count == 0 {
            return Err(Error::InvalidConfig(
                "precache.page_size and precache.page_count must be positive".into(),
            ));
        }
        if self.join.max_teams_per_user == 0 {
            return Err(Error::InvalidConfig(
                "join.max_teams_per_user must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Id allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    /// Machine id of this allocator shard (0..=1023)
    #[serde(default)]
    pub machine_id: i64,

    /// Custom epoch in Unix milliseconds
    #[serde(default = "default_epoch_ms")]
    pub epoch_ms: i64,
}

fn default_epoch_ms() -> i64 {
    DEFAULT_EPOCH_MS
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            machine_id: 0,
            epoch_ms: DEFAULT_EPOCH_MS,
        }
    }
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL of the lock database
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Connection attempts before giving up at startup
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,

    /// Initial delay between connection attempts
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff_ms: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/3".to_string()
}
fn default_connect_retries() -> usize {
    5
}
fn default_connect_backoff() -> u64 {
    200
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff(),
        }
    }
}

impl StoreConfig {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

/// Lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Base lease duration; the watchdog renews every half of it
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_ms: u64,
}

fn default_lease_ttl() -> u64 {
    30_000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: default_lease_ttl(),
        }
    }
}

impl LockConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

/// Recommendation pre-cache job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 6-field cron expression (sec min hour dom mon dow)
    #[serde(default = "default_precache_cron")]
    pub cron: String,

    #[serde(default = "default_precache_lock_key")]
    pub lock_key: String,

    /// Accounts whose recommendations are warmed
    #[serde(default = "default_precache_accounts")]
    pub accounts: Vec<String>,

    /// Pages are picked at random in 1..=page_count
    #[serde(default = "default_page_count")]
    pub page_count: u32,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Budget for one user's page query plus cache write
    #[serde(default = "default_user_timeout")]
    pub user_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_precache_cron() -> String {
    "0 0 0 * * *".to_string()
}
fn default_precache_lock_key() -> String {
    "save:precache:docache:lock".to_string()
}
fn default_precache_accounts() -> Vec<String> {
    vec!["save".to_string()]
}
fn default_page_count() -> u32 {
    20
}
fn default_page_size() -> u32 {
    10
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_user_timeout() -> u64 {
    5000
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_precache_cron(),
            lock_key: default_precache_lock_key(),
            accounts: default_precache_accounts(),
            page_count: default_page_count(),
            page_size: default_page_size(),
            cache_ttl_secs: default_cache_ttl(),
            user_timeout_ms: default_user_timeout(),
        }
    }
}

impl PrecacheConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn user_timeout(&self) -> Duration {
        Duration::from_millis(self.user_timeout_ms)
    }
}

/// Team join critical section configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(default = "default_join_lock_key")]
    pub lock_key: String,

    #[serde(default = "default_max_teams")]
    pub max_teams_per_user: u64,
}

fn default_join_lock_key() -> String {
    "save:team:join:lock".to_string()
}
fn default_max_teams() -> u64 {
    5
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            lock_key: default_join_lock_key(),
            max_teams_per_user: default_max_teams(),
        }
    }
}

/// Admin HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock.lease_ttl(), Duration::from_secs(30));
        assert_eq!(config.precache.lock_key, "save:precache:docache:lock");
        assert_eq!(config.id.epoch_ms, DEFAULT_EPOCH_MS);
    }

    #[test]
    fn test_machine_id_out_of_range() {
        let mut config = Config::default();
        config.id.machine_id = 1024;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.id.machine_id = -1;
        assert!(config.validate().is_err());

        config.id.machine_id = MAX_MACHINE_ID;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut config = Config::default();
        config.precache.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            node_id = "node-7"

            [id]
            machine_id = 7

            [precache]
            accounts = ["save", "admin"]
        "#;
        let settings = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.id.machine_id, 7);
        assert_eq!(config.id.epoch_ms, DEFAULT_EPOCH_MS);
        assert_eq!(config.precache.accounts, vec!["save", "admin"]);
        assert_eq!(config.precache.page_count, 20);
        assert_eq!(config.join.max_teams_per_user, 5);
    }
}
