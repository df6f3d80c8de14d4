//! Team joins from several nodes racing for the last seats

use chrono::Utc;
use coordkit::common::JoinConfig;
use coordkit::jobs::{
    JoinOutcome, JoinTeamRequest, MemoryTeamStore, Team, TeamJoinService, TeamStatus, TeamStore,
};
use coordkit::lock::{CoordinatedSection, DistributedMutex, MemoryLockStore};
use std::sync::Arc;
use std::time::Duration;

fn team(max_members: u64) -> Team {
    Team {
        id: 42,
        name: "rustaceans".into(),
        description: "weekly pairing".into(),
        max_members,
        expire_time: Utc::now() + chrono::Duration::days(7),
        owner_id: 1,
        status: TeamStatus::Public,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_team_never_overfills() {
    let locks = Arc::new(MemoryLockStore::new());
    let teams = Arc::new(MemoryTeamStore::new());
    teams.insert_team(team(3), None);

    let handles: Vec<_> = (100..110)
        .map(|user_id| {
            // each user arrives through a different node
            let service = TeamJoinService::new(
                CoordinatedSection::new(DistributedMutex::new(locks.clone())),
                teams.clone(),
                JoinConfig::default(),
                Duration::from_secs(30),
            );
            tokio::spawn(async move {
                let request = JoinTeamRequest {
                    team_id: 42,
                    password: String::new(),
                };
                loop {
                    match service.join(user_id, &request).await.unwrap() {
                        JoinOutcome::Contended => {
                            tokio::time::sleep(Duration::from_millis(1)).await
                        }
                        outcome => return outcome,
                    }
                }
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let joined = outcomes.iter().filter(|o| **o == JoinOutcome::Joined).count();
    let full = outcomes.iter().filter(|o| **o == JoinOutcome::TeamFull).count();
    assert_eq!(joined, 3);
    assert_eq!(full, 7);
    assert_eq!(teams.count_members(42).await.unwrap(), 3);
}

#[tokio::test]
async fn test_outcome_serialises_for_clients() {
    let json = serde_json::to_string(&JoinOutcome::TooManyTeams).unwrap();
    assert_eq!(json, "\"too_many_teams\"");

    let request: JoinTeamRequest = serde_json::from_str(r#"{"team_id": 42}"#).unwrap();
    assert_eq!(request.team_id, 42);
    assert!(request.password.is_empty());
}
