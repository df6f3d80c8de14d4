//! Team join
//!
//! Membership limits are read-then-write checks: count the user's teams,
//! check for a duplicate row, count the team's members, then insert. They run
//! inside one coordinated section on `join.lock_key` so that concurrent joins
//! from any node cannot both pass the same check.

use crate::common::{Error, JoinConfig, Result};
use crate::lock::{CoordinatedSection, SectionOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamStatus {
    Public,
    Private,
    /// Joinable with the team password
    Encrypted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub max_members: u64,
    pub expire_time: DateTime<Utc>,
    /// Creator and current leader
    pub owner_id: i64,
    pub status: TeamStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTeamRequest {
    pub team_id: i64,
    #[serde(default)]
    pub password: String,
}

/// Result of a join attempt that passed request validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined,
    /// The user already belongs to the maximum number of teams
    TooManyTeams,
    AlreadyMember,
    TeamFull,
    /// Another join holds the lock; nothing was checked or written
    Contended,
}

/// Team and membership persistence
#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn find_team(&self, team_id: i64) -> Result<Option<Team>>;

    async fn password_matches(&self, team_id: i64, password: &str) -> Result<bool>;

    async fn count_teams_of_user(&self, user_id: i64) -> Result<u64>;

    async fn is_member(&self, team_id: i64, user_id: i64) -> Result<bool>;

    async fn count_members(&self, team_id: i64) -> Result<u64>;

    async fn add_membership(&self, team_id: i64, user_id: i64, joined_at: DateTime<Utc>) -> Result<()>;
}

pub struct TeamJoinService {
    section: CoordinatedSection,
    teams: Arc<dyn TeamStore>,
    config: JoinConfig,
    lease_ttl: Duration,
}

impl TeamJoinService {
    pub fn new(
        section: CoordinatedSection,
        teams: Arc<dyn TeamStore>,
        config: JoinConfig,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            section,
            teams,
            config,
            lease_ttl,
        }
    }

    /// Add `user_id` to the requested team.
    ///
    /// Malformed requests and teams that cannot be joined at all are errors.
    /// Limit violations and lock contention are reported as a [`JoinOutcome`].
    pub async fn join(&self, user_id: i64, request: &JoinTeamRequest) -> Result<JoinOutcome> {
        let team = self.validate(request).await?;

        let outcome = self
            .section
            .run(&self.config.lock_key, self.lease_ttl, || {
                self.join_locked(user_id, &team)
            })
            .await?;

        Ok(match outcome {
            SectionOutcome::Completed(outcome) => outcome,
            SectionOutcome::Contended => JoinOutcome::Contended,
        })
    }

    async fn validate(&self, request: &JoinTeamRequest) -> Result<Team> {
        if request.team_id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "invalid team id {}",
                request.team_id
            )));
        }
        let team = self
            .teams
            .find_team(request.team_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("team {}", request.team_id)))?;

        if team.expire_time < Utc::now() {
            return Err(Error::InvalidArgument(format!("team {} has expired", team.id)));
        }
        match team.status {
            TeamStatus::Public => {}
            TeamStatus::Private => {
                return Err(Error::InvalidArgument(format!(
                    "team {} is private",
                    team.id
                )))
            }
            TeamStatus::Encrypted => {
                if request.password.is_empty()
                    || !self
                        .teams
                        .password_matches(team.id, &request.password)
                        .await?
                {
                    return Err(Error::InvalidArgument("wrong team password".into()));
                }
            }
        }
        Ok(team)
    }

    async fn join_locked(&self, user_id: i64, team: &Team) -> Result<JoinOutcome> {
        let joined = self.teams.count_teams_of_user(user_id).await?;
        if joined >= self.config.max_teams_per_user {
            debug!(user_id, joined, "user is in too many teams");
            return Ok(JoinOutcome::TooManyTeams);
        }
        if self.teams.is_member(team.id, user_id).await? {
            return Ok(JoinOutcome::AlreadyMember);
        }
        let members = self.teams.count_members(team.id).await?;
        if members >= team.max_members {
            debug!(team_id = team.id, members, "team is full");
            return Ok(JoinOutcome::TeamFull);
        }

        self.teams.add_membership(team.id, user_id, Utc::now()).await?;
        info!(user_id, team_id = team.id, "User joined team");
        Ok(JoinOutcome::Joined)
    }
}

#[derive(Debug, Default)]
struct TeamTables {
    teams: HashMap<i64, (Team, Option<String>)>,
    memberships: HashSet<(i64, i64)>,
}

/// In-memory team store; passwords are compared verbatim
///
/// Every call yields once before touching the tables so that unsynchronised
/// callers interleave the way they would against a database.
#[derive(Debug, Default)]
pub struct MemoryTeamStore {
    tables: Mutex<TeamTables>,
}

impl MemoryTeamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_team(&self, team: Team, password: Option<&str>) {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .teams
            .insert(team.id, (team, password.map(str::to_string)));
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut TeamTables) -> T) -> T {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }
}

#[async_trait]
impl TeamStore for MemoryTeamStore {
    async fn find_team(&self, team_id: i64) -> Result<Option<Team>> {
        tokio::task::yield_now().await;
        Ok(self.with_tables(|t| t.teams.get(&team_id).map(|(team, _)| team.clone())))
    }

    async fn password_matches(&self, team_id: i64, password: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        Ok(self.with_tables(|t| {
            matches!(t.teams.get(&team_id), Some((_, Some(stored))) if stored == password)
        }))
    }

    async fn count_teams_of_user(&self, user_id: i64) -> Result<u64> {
        tokio::task::yield_now().await;
        Ok(self.with_tables(|t| t.memberships.iter().filter(|(_, u)| *u == user_id).count() as u64))
    }

    async fn is_member(&self, team_id: i64, user_id: i64) -> Result<bool> {
        tokio::task::yield_now().await;
        Ok(self.with_tables(|t| t.memberships.contains(&(team_id, user_id))))
    }

    async fn count_members(&self, team_id: i64) -> Result<u64> {
        tokio::task::yield_now().await;
        Ok(self.with_tables(|t| t.memberships.iter().filter(|(team, _)| *team == team_id).count() as u64))
    }

    async fn add_membership(&self, team_id: i64, user_id: i64, _joined_at: DateTime<Utc>) -> Result<()> {
        tokio::task::yield_now().await;
        self.with_tables(|t| {
            if !t.teams.contains_key(&team_id) {
                return Err(Error::NotFound(format!("team {}", team_id)));
            }
            t.memberships.insert((team_id, user_id));
            Ok(())
        })
    }
}
