//! Application jobs built on coordinated sections
//!
//! - [`precache`]: cluster-wide singleton that warms the recommendation cache
//! - [`join_team`]: serialised team membership changes

pub mod join_team;
pub mod precache;

pub use join_team::{
    JoinOutcome, JoinTeamRequest, MemoryTeamStore, Team, TeamJoinService, TeamStatus, TeamStore,
};
pub use precache::{
    recommend_key, MemoryRecommendCache, MemoryUserDirectory, PrecacheJob, PrecacheReport,
    RecommendCache, RedisRecommendCache, UserDirectory,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user row as stored, credentials included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub account: String,
    pub username: String,
    pub avatar_url: String,
    pub profile: String,
    /// JSON-encoded tag list
    pub tags: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The public view of a user, safe to cache and return to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeUser {
    pub id: i64,
    pub account: String,
    pub name: String,
    pub avatar: String,
    pub profile: String,
    pub tags: String,
    pub create_time: String,
}

impl From<&UserRecord> for SafeUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            account: user.account.clone(),
            name: user.username.clone(),
            avatar: user.avatar_url.clone(),
            profile: user.profile.clone(),
            tags: user.tags.clone(),
            create_time: user.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}
