//! End-to-end behaviour of the team coordinator against the in-memory store.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
};

use futures::future::BoxFuture;
use serde_json::Value;

use team_coordinator::{
    dao::{
        document_store::{
            DocumentKey, DocumentStore, RetryPolicy, StoreSession, WriteOp,
            memory::MemoryDocumentStore,
        },
        membership::MEMBERSHIP_COLLECTION,
        models::{MembershipRecord, TeamRecord},
        storage::{StorageError, StorageResult},
        team::TEAM_COLLECTION,
    },
    dto::team::{CreateTeamRequest, JoinTeamRequest, KickTeamMemberRequest},
    error::{ErrorKind, OperationError},
    services::{
        clock::{Clock, ManualClock},
        team_coordinator::{CoordinatorSettings, TeamCoordinator},
        token_generator::{
            EntropySource, PLACEHOLDER_PASSWORD, PasswordFallback, TokenError, TokenGenerator,
        },
    },
};
use time::{Duration, macros::datetime};

struct Fixture {
    store: MemoryDocumentStore,
    clock: Arc<ManualClock>,
    coordinator: TeamCoordinator,
}

impl Fixture {
    fn new() -> Self {
        Self::with(CoordinatorSettings::default(), TokenGenerator::default())
    }

    fn with(settings: CoordinatorSettings, tokens: TokenGenerator) -> Self {
        let store = MemoryDocumentStore::new();
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 12:00 UTC)));
        let coordinator =
            TeamCoordinator::with_parts(Arc::new(store.clone()), tokens, clock.clone(), settings);
        Self {
            store,
            clock,
            coordinator,
        }
    }

    async fn create(&self, owner: &str, maximum_members: Option<u32>) -> (String, String) {
        let created = self
            .coordinator
            .create_team(
                owner,
                CreateTeamRequest {
                    password: None,
                    maximum_members,
                },
            )
            .await
            .unwrap();
        (created.team, created.password)
    }

    async fn join(&self, user: &str, team: &str, password: &str) -> Result<(), OperationError> {
        self.coordinator
            .join_team(
                user,
                JoinTeamRequest {
                    id: Some(team.into()),
                    password: Some(password.into()),
                },
            )
            .await
            .map(|joined| assert!(joined.joined))
    }

    async fn kick(&self, owner: &str, kicked: Option<&str>) -> Result<(), OperationError> {
        self.coordinator
            .kick_team_member(
                owner,
                KickTeamMemberRequest {
                    kicked: kicked.map(Into::into),
                },
            )
            .await
            .map(|done| assert!(done.kicked))
    }

    async fn membership(&self, user: &str) -> MembershipRecord {
        match self.store.document(MEMBERSHIP_COLLECTION, user).await {
            Some(value) => serde_json::from_value(value).unwrap(),
            None => MembershipRecord::default(),
        }
    }

    async fn team(&self, team: &str) -> Option<TeamRecord> {
        self.store
            .document(TEAM_COLLECTION, team)
            .await
            .map(|value| serde_json::from_value(value).unwrap())
    }

    async fn members(&self, team: &str) -> BTreeSet<String> {
        self.team(team).await.unwrap().members
    }

    /// Every membership pointer resolves to a team listing the user, every listed member
    /// points back, and no roster exceeds its limit.
    async fn assert_consistent(&self) {
        for user in self.store.keys(MEMBERSHIP_COLLECTION).await {
            if let Some(team_id) = self.membership(&user).await.team_id {
                let team = self
                    .team(&team_id)
                    .await
                    .unwrap_or_else(|| panic!("{user} points at missing team {team_id}"));
                assert!(team.members.contains(&user), "{user} missing from {team_id}");
            }
        }
        for team_id in self.store.keys(TEAM_COLLECTION).await {
            let team = self.team(&team_id).await.unwrap();
            assert!(team.members.len() <= team.maximum_members as usize);
            assert!(team.members.contains(&team.owner));
            for member in &team.members {
                assert_eq!(
                    self.membership(member).await.team_id.as_deref(),
                    Some(team_id.as_str())
                );
            }
        }
    }
}

fn kind<T: std::fmt::Debug>(result: Result<T, OperationError>) -> ErrorKind {
    result.unwrap_err().kind()
}

/// Yields one buffer of accepted bytes, then fails.
struct FailsAfterFirstFill(AtomicUsize);

impl EntropySource for FailsAfterFirstFill {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError> {
        if self.0.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(TokenError::Entropy("device unavailable".into()));
        }
        for (index, byte) in buf.iter_mut().enumerate() {
            *byte = (index % 62) as u8;
        }
        Ok(())
    }
}

fn flaky_tokens() -> TokenGenerator {
    TokenGenerator::new(Arc::new(FailsAfterFirstFill(AtomicUsize::new(0))))
}

#[tokio::test]
async fn full_lifecycle_scenario() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", Some(2)).await;
    assert_eq!(team.len(), 20);
    assert_eq!(password.len(), 48);

    fx.join("mate", &team, &password).await.unwrap();
    assert_eq!(
        fx.members(&team).await,
        BTreeSet::from(["mate".to_owned(), "owner".to_owned()])
    );

    assert_eq!(
        kind(fx.join("third", &team, &password).await),
        ErrorKind::ResourceExhausted
    );
    assert_eq!(fx.membership("third").await.team_id, None);

    fx.kick("owner", Some("mate")).await.unwrap();
    assert_eq!(fx.membership("mate").await.team_id, None);
    assert_eq!(
        fx.membership("mate").await.last_left_team,
        Some(fx.clock.now())
    );
    assert_eq!(fx.members(&team).await, BTreeSet::from(["owner".to_owned()]));

    fx.coordinator.leave_team("owner").await.unwrap();
    assert!(fx.team(&team).await.is_none());
    assert_eq!(fx.membership("owner").await.team_id, None);
    fx.assert_consistent().await;
}

#[tokio::test]
async fn creation_is_refused_during_cooldown() {
    let fx = Fixture::new();
    fx.create("owner", None).await;
    fx.coordinator.leave_team("owner").await.unwrap();

    fx.clock.advance(Duration::minutes(4));
    let refused = fx
        .coordinator
        .create_team("owner", CreateTeamRequest::default())
        .await;
    assert_eq!(kind(refused), ErrorKind::FailedPrecondition);

    let view = fx.coordinator.membership("owner").await.unwrap();
    assert_eq!(view.cooldown_remaining_secs, 60);

    fx.clock.advance(Duration::minutes(1));
    fx.create("owner", None).await;
    fx.assert_consistent().await;
}

#[tokio::test]
async fn cooldown_does_not_block_joining() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;
    fx.join("mate", &team, &password).await.unwrap();
    fx.coordinator.leave_team("mate").await.unwrap();

    fx.join("mate", &team, &password).await.unwrap();
    assert!(fx.members(&team).await.contains("mate"));
}

#[tokio::test]
async fn members_cannot_create_or_join_another_team() {
    let fx = Fixture::new();
    let (first, _) = fx.create("alice", None).await;
    let (second, password) = fx.create("bob", None).await;

    let create = fx
        .coordinator
        .create_team("alice", CreateTeamRequest::default())
        .await;
    assert_eq!(kind(create), ErrorKind::FailedPrecondition);
    assert_eq!(
        kind(fx.join("alice", &second, &password).await),
        ErrorKind::FailedPrecondition
    );

    assert_eq!(fx.membership("alice").await.team_id, Some(first));
    assert_eq!(fx.store.keys(TEAM_COLLECTION).await.len(), 2);
    fx.assert_consistent().await;
}

#[tokio::test]
async fn owner_leaving_disbands_the_team() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;
    for user in ["a", "b", "c"] {
        fx.join(user, &team, &password).await.unwrap();
    }

    fx.coordinator.leave_team("owner").await.unwrap();

    assert!(fx.team(&team).await.is_none());
    for user in ["owner", "a", "b", "c"] {
        let record = fx.membership(user).await;
        assert_eq!(record.team_id, None);
        assert!(record.last_left_team.is_some());
    }
    assert_eq!(
        kind(fx.join("d", &team, &password).await),
        ErrorKind::NotFound
    );
    assert_eq!(
        kind(fx.coordinator.team_details("owner", &team).await),
        ErrorKind::NotFound
    );
    fx.assert_consistent().await;
}

#[tokio::test]
async fn member_leaving_keeps_the_team() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;
    fx.join("mate", &team, &password).await.unwrap();

    fx.coordinator.leave_team("mate").await.unwrap();

    assert_eq!(fx.members(&team).await, BTreeSet::from(["owner".to_owned()]));
    assert_eq!(
        kind(fx.coordinator.leave_team("mate").await),
        ErrorKind::FailedPrecondition
    );
    fx.assert_consistent().await;
}

#[tokio::test]
async fn join_checks_run_in_order() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", Some(2)).await;

    let missing_fields = fx
        .coordinator
        .join_team("user", JoinTeamRequest::default())
        .await;
    assert_eq!(kind(missing_fields), ErrorKind::InvalidArgument);
    assert_eq!(
        kind(fx.join("user", "no-such-team", &password).await),
        ErrorKind::NotFound
    );
    assert_eq!(
        kind(fx.join("user", &team, "wrong").await),
        ErrorKind::Unauthenticated
    );
    assert_eq!(
        kind(fx.join("owner", "no-such-team", "wrong").await),
        ErrorKind::FailedPrecondition
    );

    fx.join("user", &team, &password).await.unwrap();
    assert_eq!(
        kind(fx.join("late", &team, "wrong").await),
        ErrorKind::Unauthenticated
    );
    fx.assert_consistent().await;
}

#[tokio::test]
async fn kick_checks_run_in_order() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;
    fx.join("mate", &team, &password).await.unwrap();

    assert_eq!(kind(fx.kick("owner", None).await), ErrorKind::InvalidArgument);
    assert_eq!(
        kind(fx.kick("owner", Some("owner")).await),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        kind(fx.kick("outsider", Some("mate")).await),
        ErrorKind::FailedPrecondition
    );
    assert_eq!(
        kind(fx.kick("mate", Some("owner")).await),
        ErrorKind::PermissionDenied
    );
    assert_eq!(
        kind(fx.kick("owner", Some("stranger")).await),
        ErrorKind::NotFound
    );

    assert_eq!(fx.membership("mate").await.team_id, Some(team.clone()));
    fx.assert_consistent().await;
}

#[tokio::test]
async fn kicked_member_loses_team_but_keeps_access_elsewhere() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;
    fx.join("mate", &team, &password).await.unwrap();
    fx.kick("owner", Some("mate")).await.unwrap();

    let (other, other_password) = fx.create("host", None).await;
    fx.join("mate", &other, &other_password).await.unwrap();
    fx.assert_consistent().await;
}

#[tokio::test]
async fn blank_caller_is_unauthenticated() {
    let fx = Fixture::new();
    let result = fx
        .coordinator
        .create_team("  ", CreateTeamRequest::default())
        .await;
    assert_eq!(kind(result), ErrorKind::Unauthenticated);
    assert!(fx.store.keys(TEAM_COLLECTION).await.is_empty());
}

#[tokio::test]
async fn invalid_limit_is_rejected_without_writes() {
    let fx = Fixture::new();
    let result = fx
        .coordinator
        .create_team(
            "owner",
            CreateTeamRequest {
                password: None,
                maximum_members: Some(0),
            },
        )
        .await;

    assert_eq!(kind(result), ErrorKind::InvalidArgument);
    assert!(fx.store.keys(TEAM_COLLECTION).await.is_empty());
    assert!(fx.store.keys(MEMBERSHIP_COLLECTION).await.is_empty());
}

#[tokio::test]
async fn supplied_password_is_kept() {
    let fx = Fixture::new();
    let created = fx
        .coordinator
        .create_team(
            "owner",
            CreateTeamRequest {
                password: Some("hunter2".into()),
                maximum_members: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(created.password, "hunter2");
    let team = fx.team(&created.team).await.unwrap();
    assert_eq!(team.maximum_members, 10);
    fx.join("mate", &created.team, "hunter2").await.unwrap();
}

#[tokio::test]
async fn password_generation_failure_is_internal_by_default() {
    let fx = Fixture::with(CoordinatorSettings::default(), flaky_tokens());
    let result = fx
        .coordinator
        .create_team("owner", CreateTeamRequest::default())
        .await;

    assert_eq!(kind(result), ErrorKind::Internal);
    assert!(fx.store.keys(TEAM_COLLECTION).await.is_empty());
    assert_eq!(fx.membership("owner").await.team_id, None);
}

#[tokio::test]
async fn placeholder_fallback_commits_the_weak_password() {
    let settings = CoordinatorSettings {
        password_fallback: PasswordFallback::Placeholder,
        ..CoordinatorSettings::default()
    };
    let fx = Fixture::with(settings, flaky_tokens());
    let created = fx
        .coordinator
        .create_team("owner", CreateTeamRequest::default())
        .await
        .unwrap();

    assert_eq!(created.password, PLACEHOLDER_PASSWORD);
    fx.join("mate", &created.team, PLACEHOLDER_PASSWORD)
        .await
        .unwrap();
    fx.assert_consistent().await;
}

#[tokio::test]
async fn leaving_a_vanished_team_clears_the_pointer() {
    let fx = Fixture::new();
    fx.store
        .insert(
            MEMBERSHIP_COLLECTION,
            "orphan",
            serde_json::json!({ "teamId": "gone" }),
        )
        .await;

    fx.coordinator.leave_team("orphan").await.unwrap();

    let record = fx.membership("orphan").await;
    assert_eq!(record.team_id, None);
    assert!(record.last_left_team.is_some());
}

#[tokio::test]
async fn details_reveal_the_password_to_members_only() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", Some(3)).await;

    let inside = fx.coordinator.team_details("owner", &team).await.unwrap();
    assert_eq!(inside.password.as_deref(), Some(password.as_str()));
    assert_eq!(inside.members, vec!["owner".to_owned()]);
    assert_eq!(inside.maximum_members, 3);

    let outside = fx.coordinator.team_details("visitor", &team).await.unwrap();
    assert_eq!(outside.password, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_joins_respect_capacity() {
    const JOINERS: usize = 64;
    const CAPACITY: u32 = 40;
    const ROUNDS: usize = 5;

    for _ in 0..ROUNDS {
        let fx = Arc::new(Fixture::new());
        let (team, password) = fx.create("owner", Some(CAPACITY)).await;

        let handles: Vec<_> = (0..JOINERS)
            .map(|index| {
                let fx = fx.clone();
                let team = team.clone();
                let password = password.clone();
                tokio::spawn(async move { fx.join(&format!("user-{index}"), &team, &password).await })
            })
            .collect();

        let mut joined = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => joined += 1,
                Err(err) => {
                    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
                    full += 1;
                }
            }
        }

        let open_seats = CAPACITY as usize - 1;
        assert_eq!(joined, open_seats);
        assert_eq!(full, JOINERS - open_seats);
        assert_eq!(fx.members(&team).await.len(), CAPACITY as usize);
        fx.assert_consistent().await;
    }
}

/// Fails the next `remaining` commits with a conflict, then behaves like `inner`.
struct ConflictingCommits {
    inner: MemoryDocumentStore,
    remaining: Arc<AtomicU32>,
}

impl DocumentStore for ConflictingCommits {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>> {
        let opening = self.inner.begin();
        let remaining = self.remaining.clone();
        Box::pin(async move {
            let inner = opening.await?;
            Ok(Box::new(ConflictingSession { inner, remaining }) as Box<dyn StoreSession>)
        })
    }

    fn begin_exclusive(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>> {
        let opening = self.inner.begin_exclusive();
        let remaining = self.remaining.clone();
        Box::pin(async move {
            let inner = opening.await?;
            Ok(Box::new(ConflictingSession { inner, remaining }) as Box<dyn StoreSession>)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }
}

struct ConflictingSession {
    inner: Box<dyn StoreSession>,
    remaining: Arc<AtomicU32>,
}

impl StoreSession for ConflictingSession {
    fn get<'a>(
        &'a mut self,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StorageResult<Option<Value>>> {
        self.inner.get(key)
    }

    fn commit(
        self: Box<Self>,
        writes: Vec<(DocumentKey, WriteOp)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let injected = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            let abort = self.inner.abort();
            return Box::pin(async move {
                abort.await;
                Err(StorageError::conflict(TEAM_COLLECTION, "injected"))
            });
        }
        self.inner.commit(writes)
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.inner.abort()
    }
}

async fn contended_join(conflicts: u32) -> (Fixture, String, Result<(), OperationError>) {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;

    let flaky = ConflictingCommits {
        inner: fx.store.clone(),
        remaining: Arc::new(AtomicU32::new(conflicts)),
    };
    let settings = CoordinatorSettings {
        retry: RetryPolicy::new(2),
        ..CoordinatorSettings::default()
    };
    let coordinator = TeamCoordinator::with_parts(
        Arc::new(flaky),
        TokenGenerator::default(),
        fx.clock.clone(),
        settings,
    );
    let result = coordinator
        .join_team(
            "mate",
            JoinTeamRequest {
                id: Some(team.clone()),
                password: Some(password),
            },
        )
        .await
        .map(|joined| assert!(joined.joined));
    (fx, team, result)
}

#[tokio::test]
async fn exhausted_retries_abort_without_writes() {
    let (fx, team, result) = contended_join(u32::MAX).await;

    assert_eq!(kind(result), ErrorKind::Aborted);
    assert_eq!(fx.members(&team).await, BTreeSet::from(["owner".to_owned()]));
    assert_eq!(fx.membership("mate").await, MembershipRecord::default());
    fx.assert_consistent().await;
}

#[tokio::test]
async fn a_single_conflict_is_replayed() {
    let (fx, team, result) = contended_join(1).await;

    result.unwrap();
    assert_eq!(
        fx.members(&team).await,
        BTreeSet::from(["mate".to_owned(), "owner".to_owned()])
    );
    assert_eq!(fx.membership("mate").await.team_id, Some(team));
    fx.assert_consistent().await;
}

#[tokio::test]
async fn failures_carry_the_resolved_team() {
    let fx = Fixture::new();
    let (team, password) = fx.create("owner", None).await;
    fx.join("mate", &team, &password).await.unwrap();

    let denied = fx.kick("mate", Some("owner")).await.unwrap_err();
    assert_eq!(denied.kind(), ErrorKind::PermissionDenied);
    assert_eq!(denied.team_id.as_deref(), Some(team.as_str()));

    let unresolved = fx.coordinator.leave_team("outsider").await.unwrap_err();
    assert_eq!(unresolved.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(unresolved.team_id, None);
}
