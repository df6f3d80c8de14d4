//! Recommendation pre-cache job
//!
//! Periodically warms the recommendation cache for a short list of "main"
//! accounts. Every node registers the job; the coordinated section on
//! `precache.lock_key` makes sure only one of them does the work per trigger.

use super::{SafeUser, UserRecord};
use crate::common::{Error, PrecacheConfig, Result};
use crate::lock::{CoordinatedSection, SectionOutcome};
use crate::schedule::{Job, Scheduler};
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Read access to the user table
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_account(&self, account: &str) -> Result<Option<UserRecord>>;

    /// One page of users, pages starting at 1
    async fn list_page(&self, page: u32, page_size: u32) -> Result<Vec<UserRecord>>;
}

/// Destination for pre-computed recommendation pages
#[async_trait]
pub trait RecommendCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Cache key for one page of recommendations shown to `user_id`
pub fn recommend_key(user_id: i64, page: u32, page_size: u32) -> String {
    format!("save:user:recommend:{}:{}:{}", user_id, page, page_size)
}

/// What one run of the job did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    /// Keys written, in no particular order
    pub written: Vec<String>,
    /// Main users whose page could not be cached
    pub failed: usize,
}

pub struct PrecacheJob {
    section: CoordinatedSection,
    directory: Arc<dyn UserDirectory>,
    cache: Arc<dyn RecommendCache>,
    config: PrecacheConfig,
    lease_ttl: Duration,
    main_users: Vec<i64>,
}

impl PrecacheJob {
    /// Build the job and resolve the configured accounts to user ids.
    ///
    /// Accounts that cannot be resolved are logged and left out.
    pub async fn build(
        section: CoordinatedSection,
        directory: Arc<dyn UserDirectory>,
        cache: Arc<dyn RecommendCache>,
        config: PrecacheConfig,
        lease_ttl: Duration,
    ) -> Result<Self> {
        if config.page_count == 0 || config.page_size == 0 {
            return Err(Error::InvalidConfig(
                "precache page_count and page_size must be positive".into(),
            ));
        }
        let main_users = resolve_main_users(directory.as_ref(), &config.accounts).await;
        if main_users.is_empty() {
            warn!("No main users resolved, pre-cache runs will be empty");
        }

        Ok(Self {
            section,
            directory,
            cache,
            config,
            lease_ttl,
            main_users,
        })
    }

    pub fn main_users(&self) -> &[i64] {
        &self.main_users
    }

    /// One trigger: take the pre-cache lock and warm every main user's page.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SectionOutcome<PrecacheReport>> {
        self.section
            .run_with_cancel(&self.config.lock_key, self.lease_ttl, cancel, |_| {
                self.warm_all()
            })
            .await
    }

    async fn warm_all(&self) -> Result<PrecacheReport> {
        let results = join_all(
            self.main_users
                .iter()
                .map(|&user_id| self.warm_user_bounded(user_id)),
        )
        .await;

        let mut report = PrecacheReport::default();
        for result in results {
            match result {
                Ok(key) => report.written.push(key),
                Err(_) => report.failed += 1,
            }
        }
        info!(
            written = report.written.len(),
            failed = report.failed,
            "Recommendation pre-cache finished"
        );
        Ok(report)
    }

    async fn warm_user_bounded(&self, user_id: i64) -> Result<String> {
        let budget = self.config.user_timeout();
        match tokio::time::timeout(budget, self.warm_user(user_id)).await {
            Ok(result) => result,
            Err(_) => {
                error!(user_id, ?budget, "Pre-cache for user timed out");
                Err(Error::Timeout(format!("pre-cache for user {}", user_id)))
            }
        }
    }

    async fn warm_user(&self, user_id: i64) -> Result<String> {
        let page = rand::thread_rng().gen_range(1..=self.config.page_count);
        let page_size = self.config.page_size;

        let users = self
            .directory
            .list_page(page, page_size)
            .await
            .inspect_err(|e| error!(user_id, page, error = %e, "Failed to list users"))?;
        let safe: Vec<SafeUser> = users.iter().map(SafeUser::from).collect();
        let value = serde_json::to_string(&safe)
            .inspect_err(|e| error!(user_id, error = %e, "Failed to encode recommendations"))?;

        let key = recommend_key(user_id, page, page_size);
        self.cache
            .put(&key, &value, self.config.cache_ttl())
            .await
            .inspect_err(|e| error!(user_id, key = %key, error = %e, "Failed to write cache"))?;

        debug!(user_id, key = %key, users = safe.len(), "Cached recommendations");
        Ok(key)
    }

    /// Register the job on `scheduler` under the configured cron expression.
    pub fn register(self: Arc<Self>, scheduler: &mut dyn Scheduler) -> Result<()> {
        let expr = self.config.cron.clone();
        let job: Job = Arc::new(move |cancel: CancellationToken| {
            let this = self.clone();
            async move {
                match this.run_once(&cancel).await {
                    Ok(SectionOutcome::Completed(_)) => {}
                    Ok(SectionOutcome::Contended) => {
                        debug!("Pre-cache already running elsewhere")
                    }
                    Err(Error::Cancelled) => debug!("Pre-cache run cancelled"),
                    Err(e) => error!("Pre-cache run failed: {}", e),
                }
            }
            .boxed()
        });
        scheduler.schedule(&expr, job)
    }
}

async fn resolve_main_users(directory: &dyn UserDirectory, accounts: &[String]) -> Vec<i64> {
    let mut ids = Vec::with_capacity(accounts.len());
    for account in accounts {
        match directory.find_by_account(account).await {
            Ok(Some(user)) => ids.push(user.id),
            Ok(None) => warn!("Main account '{}' not found", account),
            Err(e) => error!("Failed to look up main account '{}': {}", account, e),
        }
    }
    ids
}

/// Recommendation cache stored as plain Redis strings with an expiry
#[derive(Clone)]
pub struct RedisRecommendCache {
    conn: ConnectionManager,
}

impl RedisRecommendCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RecommendCache for RedisRecommendCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }
}

/// In-memory user directory, pages ordered by user id
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: Mutex<Vec<UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new(mut users: Vec<UserRecord>) -> Self {
        users.sort_by_key(|u| u.id);
        Self {
            users: Mutex::new(users),
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_account(&self, account: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(users.iter().find(|u| u.account == account).cloned())
    }

    async fn list_page(&self, page: u32, page_size: u32) -> Result<Vec<UserRecord>> {
        if page == 0 {
            return Err(Error::InvalidArgument("pages start at 1".into()));
        }
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = (page as usize - 1) * page_size as usize;
        Ok(users
            .iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect())
    }
}

/// In-memory recommendation cache; expiry is recorded, not enforced
#[derive(Debug, Default)]
pub struct MemoryRecommendCache {
    entries: Mutex<HashMap<String, (String, Duration)>>,
}

impl MemoryRecommendCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|(value, _)| value.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|(_, ttl)| *ttl)
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }
}

#[async_trait]
impl RecommendCache for MemoryRecommendCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), (value.to_string(), ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{DistributedMutex, LockStore, MemoryLockStore};
    use chrono::{TimeZone, Utc};

    fn user(id: i64, account: &str) -> UserRecord {
        UserRecord {
            id,
            account: account.to_string(),
            username: format!("user-{}", id),
            avatar_url: String::new(),
            profile: String::new(),
            tags: "[]".to_string(),
            password_hash: "secret-hash".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    fn config() -> PrecacheConfig {
        PrecacheConfig {
            accounts: vec!["save".into(), "ghost".into()],
            page_count: 1,
            page_size: 3,
            ..PrecacheConfig::default()
        }
    }

    async fn job(store: Arc<MemoryLockStore>, cache: Arc<MemoryRecommendCache>) -> PrecacheJob {
        let users = (1..=5).map(|i| user(i, if i == 2 { "save" } else { "other" })).collect();
        PrecacheJob::build(
            CoordinatedSection::new(DistributedMutex::new(store)),
            Arc::new(MemoryUserDirectory::new(users)),
            cache,
            config(),
            Duration::from_secs(30),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_recommend_key() {
        assert_eq!(recommend_key(7, 3, 10), "save:user:recommend:7:3:10");
    }

    #[tokio::test]
    async fn test_unknown_accounts_are_skipped() {
        let job = job(Arc::new(MemoryLockStore::new()), Arc::new(MemoryRecommendCache::new())).await;
        assert_eq!(job.main_users(), &[2]);
    }

    #[tokio::test]
    async fn test_run_writes_safe_profiles() {
        let store = Arc::new(MemoryLockStore::new());
        let cache = Arc::new(MemoryRecommendCache::new());
        let job = job(store.clone(), cache.clone()).await;

        let report = job
            .run_once(&CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.written, vec!["save:user:recommend:2:1:3".to_string()]);
        assert_eq!(report.failed, 0);

        let value = cache.get("save:user:recommend:2:1:3").unwrap();
        assert!(!value.contains("secret-hash"));
        let parsed: Vec<SafeUser> = serde_json::from_str(&value).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].create_time, "2024-01-02 03:04:05");
        assert_eq!(
            cache.ttl("save:user:recommend:2:1:3"),
            Some(Duration::from_secs(3600))
        );
        assert!(store.holder(&config().lock_key).is_none());
    }

    #[tokio::test]
    async fn test_contended_run_writes_nothing() {
        let store = Arc::new(MemoryLockStore::new());
        let cache = Arc::new(MemoryRecommendCache::new());
        let job = job(store.clone(), cache.clone()).await;
        store
            .set_if_absent(&config().lock_key, "other-node", Duration::from_secs(30))
            .await
            .unwrap();

        let outcome = job.run_once(&CancellationToken::new()).await.unwrap();
        assert!(outcome.is_contended());
        assert!(cache.keys().is_empty());
    }

    struct StuckDirectory;

    #[async_trait]
    impl UserDirectory for StuckDirectory {
        async fn find_by_account(&self, _account: &str) -> Result<Option<UserRecord>> {
            Ok(Some(user(9, "save")))
        }

        async fn list_page(&self, _page: u32, _page_size: u32) -> Result<Vec<UserRecord>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_directory_times_out() {
        let store = Arc::new(MemoryLockStore::new());
        let cache = Arc::new(MemoryRecommendCache::new());
        let config = PrecacheConfig {
            accounts: vec!["save".into()],
            user_timeout_ms: 200,
            ..PrecacheConfig::default()
        };
        let job = PrecacheJob::build(
            CoordinatedSection::new(DistributedMutex::new(store.clone())),
            Arc::new(StuckDirectory),
            cache.clone(),
            config.clone(),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let report = job
            .run_once(&CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.written.is_empty());
        assert!(cache.keys().is_empty());
        assert!(store.holder(&config.lock_key).is_none());
    }
}
