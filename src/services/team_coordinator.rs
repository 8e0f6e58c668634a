//! Transactional create/join/leave/kick of teams.
//!
//! Every operation reads the caller's membership (and the team it points to), validates
//! its preconditions against that snapshot and stages the new records, all inside one
//! [`run_transaction`] call. Nothing is written unless every check passed, and a write
//! conflict replays the whole attempt, so membership pointers and rosters always agree.

use std::sync::Arc;

use time::Duration;
use tracing::{error, info, warn};

use crate::{
    dao::{
        document_store::{DocumentStore, Retryable, RetryPolicy, Transaction, run_transaction},
        membership,
        models::{DEFAULT_MAXIMUM_MEMBERS, MembershipRecord, TeamId, TeamRecord, UserId},
        storage::StorageError,
        team::{self, TEAM_COLLECTION},
    },
    dto::team::{
        CreateTeamRequest, CreateTeamResponse, JoinTeamRequest, JoinTeamResponse,
        KickTeamMemberRequest, KickTeamMemberResponse, LeaveTeamResponse, MembershipResponse,
        TeamDetailsResponse,
    },
    error::{ErrorKind, Operation, OperationError, TeamError},
    services::{
        clock::{Clock, SystemClock},
        token_generator::{PasswordFallback, TokenGenerator, secrets_match},
    },
};

/// Time after leaving a team during which creating a new one is refused.
pub const DEFAULT_COOLDOWN: Duration = Duration::minutes(5);

/// Tunables of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Cooldown between leaving a team and creating a new one.
    pub cooldown: Duration,
    /// Roster limit applied when `createTeam` does not specify one.
    pub default_maximum_members: u32,
    /// Replay budget for contended transactions.
    pub retry: RetryPolicy,
    /// Behaviour when no password can be generated.
    pub password_fallback: PasswordFallback,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            default_maximum_members: DEFAULT_MAXIMUM_MEMBERS,
            retry: RetryPolicy::default(),
            password_fallback: PasswordFallback::default(),
        }
    }
}

/// Everything an attempt needs, owned so it can move into the transaction future.
#[derive(Clone)]
struct AttemptContext {
    tokens: TokenGenerator,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

/// Failure of one attempt, together with the team it had resolved so far.
struct Tagged {
    source: TeamError,
    team_id: Option<TeamId>,
}

impl Tagged {
    fn attach<T>(
        result: Result<T, TeamError>,
        team_id: Option<TeamId>,
    ) -> Result<(T, Option<TeamId>), Tagged> {
        match result {
            Ok(value) => Ok((value, team_id)),
            Err(source) => Err(Tagged { source, team_id }),
        }
    }

    fn split<T>(
        outcome: Result<(T, Option<TeamId>), Tagged>,
    ) -> (Option<TeamId>, Result<T, TeamError>) {
        match outcome {
            Ok((value, team_id)) => (team_id, Ok(value)),
            Err(failed) => (failed.team_id, Err(failed.source)),
        }
    }
}

impl From<StorageError> for Tagged {
    fn from(err: StorageError) -> Self {
        Self {
            source: err.into(),
            team_id: None,
        }
    }
}

impl Retryable for Tagged {
    fn is_conflict(&self) -> bool {
        self.source.is_conflict()
    }
}

/// Owns the team state transitions.
pub struct TeamCoordinator {
    store: Arc<dyn DocumentStore>,
    context: AttemptContext,
}

impl TeamCoordinator {
    /// Coordinator over `store` using the OS random source and the wall clock.
    pub fn new(store: Arc<dyn DocumentStore>, settings: CoordinatorSettings) -> Self {
        Self::with_parts(
            store,
            TokenGenerator::default(),
            Arc::new(SystemClock),
            settings,
        )
    }

    /// Coordinator with explicit token generator and clock.
    pub fn with_parts(
        store: Arc<dyn DocumentStore>,
        tokens: TokenGenerator,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            context: AttemptContext {
                tokens,
                clock,
                settings,
            },
        }
    }

    /// Store the coordinator runs its transactions against.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Active settings.
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.context.settings
    }

    /// Create a team owned by `caller`, with `caller` as its only member.
    pub async fn create_team(
        &self,
        caller: &str,
        request: CreateTeamRequest,
    ) -> Result<CreateTeamResponse, OperationError> {
        self.require_caller(Operation::CreateTeam, caller)?;
        let owner = caller.to_owned();
        let context = self.context.clone();
        let supplied_password = request
            .password
            .filter(|password| !password.trim().is_empty());
        let maximum_members = request
            .maximum_members
            .unwrap_or(context.settings.default_maximum_members);

        let outcome: Result<CreateTeamResponse, TeamError> =
            run_transaction(self.store.as_ref(), context.settings.retry, move |tx| {
                let owner = owner.clone();
                let supplied_password = supplied_password.clone();
                let context = context.clone();
                Box::pin(async move {
                    let mut record = membership::load(tx, &owner).await?;
                    if let Some(current) = &record.team_id {
                        return Err(TeamError::FailedPrecondition(format!(
                            "already a member of team `{current}`"
                        )));
                    }

                    let now = context.clock.now();
                    if let Some(left) = record.last_left_team {
                        let elapsed = now - left;
                        if elapsed < context.settings.cooldown {
                            let remaining = (context.settings.cooldown - elapsed)
                                .as_seconds_f64()
                                .ceil();
                            return Err(TeamError::FailedPrecondition(format!(
                                "a new team can be created in {remaining} seconds"
                            )));
                        }
                    }

                    if maximum_members < 1 {
                        return Err(TeamError::InvalidArgument(
                            "maximumMembers must be at least 1".into(),
                        ));
                    }

                    let team_id = context.tokens.team_id()?;
                    if team::load(tx, &team_id).await?.is_some() {
                        // Replayed with a fresh identifier.
                        return Err(TeamError::from(StorageError::conflict(
                            TEAM_COLLECTION,
                            team_id,
                        )));
                    }

                    let password = match supplied_password {
                        Some(password) => password,
                        None => context
                            .tokens
                            .password_or_fallback(context.settings.password_fallback)?,
                    };

                    let roster = TeamRecord::founded_by(
                        owner.clone(),
                        password.clone(),
                        maximum_members,
                        now,
                    );
                    team::store(tx, &team_id, &roster)?;

                    record.team_id = Some(team_id.clone());
                    membership::store(tx, &owner, &record)?;

                    Ok(CreateTeamResponse {
                        team: team_id,
                        password,
                    })
                })
            })
            .await;

        let team_id = outcome.as_ref().ok().map(|created| created.team.clone());
        self.finish(Operation::CreateTeam, caller, team_id, outcome)
    }

    /// Add `caller` to the team named in `request` after checking its password and capacity.
    pub async fn join_team(
        &self,
        caller: &str,
        request: JoinTeamRequest,
    ) -> Result<JoinTeamResponse, OperationError> {
        self.require_caller(Operation::JoinTeam, caller)?;
        let user = caller.to_owned();
        let team_id = request.id.filter(|id| !id.is_empty());
        let password = request.password.filter(|password| !password.is_empty());
        let hint = team_id.clone();

        let outcome: Result<JoinTeamResponse, TeamError> = run_transaction(
            self.store.as_ref(),
            self.context.settings.retry,
            move |tx| {
                let user = user.clone();
                let team_id = team_id.clone();
                let password = password.clone();
                Box::pin(async move {
                    let mut record = membership::load(tx, &user).await?;
                    if let Some(current) = &record.team_id {
                        return Err(TeamError::FailedPrecondition(format!(
                            "already a member of team `{current}`"
                        )));
                    }

                    let (Some(team_id), Some(password)) = (team_id, password) else {
                        return Err(TeamError::InvalidArgument(
                            "team id and password are required".into(),
                        ));
                    };

                    let Some(mut roster) = team::load(tx, &team_id).await? else {
                        return Err(TeamError::NotFound(format!(
                            "team `{team_id}` does not exist"
                        )));
                    };

                    if !secrets_match(&roster.password, &password) {
                        return Err(TeamError::Unauthenticated(
                            "wrong team password".into(),
                        ));
                    }

                    if !roster.has_room() {
                        return Err(TeamError::ResourceExhausted(format!(
                            "team `{team_id}` already has {} members",
                            roster.maximum_members
                        )));
                    }

                    roster.members.insert(user.clone());
                    team::store(tx, &team_id, &roster)?;

                    record.team_id = Some(team_id);
                    membership::store(tx, &user, &record)?;

                    Ok(JoinTeamResponse { joined: true })
                })
            },
        )
        .await;

        self.finish(Operation::JoinTeam, caller, hint, outcome)
    }

    /// Leave the caller's team. When the caller owns it, the team is disbanded.
    pub async fn leave_team(&self, caller: &str) -> Result<LeaveTeamResponse, OperationError> {
        self.require_caller(Operation::LeaveTeam, caller)?;
        let user = caller.to_owned();
        let context = self.context.clone();

        let outcome: Result<(LeaveTeamResponse, Option<TeamId>), Tagged> =
            run_transaction(self.store.as_ref(), context.settings.retry, move |tx| {
                let user = user.clone();
                let context = context.clone();
                Box::pin(async move {
                    let mut observed = None;
                    let result = leave_attempt(tx, &user, &context, &mut observed).await;
                    Tagged::attach(result, observed)
                })
            })
            .await;

        let (team_id, outcome) = Tagged::split(outcome);
        self.finish(Operation::LeaveTeam, caller, team_id, outcome)
    }

    /// Remove `request.kicked` from the team owned by `caller`.
    pub async fn kick_team_member(
        &self,
        caller: &str,
        request: KickTeamMemberRequest,
    ) -> Result<KickTeamMemberResponse, OperationError> {
        self.require_caller(Operation::KickTeamMember, caller)?;
        let owner = caller.to_owned();
        let kicked = request.kicked.filter(|kicked| !kicked.is_empty());
        let context = self.context.clone();

        let outcome: Result<(KickTeamMemberResponse, Option<TeamId>), Tagged> =
            run_transaction(self.store.as_ref(), context.settings.retry, move |tx| {
                let owner = owner.clone();
                let kicked = kicked.clone();
                let context = context.clone();
                Box::pin(async move {
                    let mut observed = None;
                    let result =
                        kick_attempt(tx, &owner, kicked, &context, &mut observed).await;
                    Tagged::attach(result, observed)
                })
            })
            .await;

        let (team_id, outcome) = Tagged::split(outcome);
        self.finish(Operation::KickTeamMember, caller, team_id, outcome)
    }

    /// The caller's membership, including how long the creation cooldown still runs.
    pub async fn membership(&self, caller: &str) -> Result<MembershipResponse, OperationError> {
        self.require_caller(Operation::Membership, caller)?;
        let user = caller.to_owned();
        let context = self.context.clone();

        let outcome: Result<MembershipResponse, TeamError> =
            run_transaction(self.store.as_ref(), context.settings.retry, move |tx| {
                let user = user.clone();
                let context = context.clone();
                Box::pin(async move {
                    let record = membership::load(tx, &user).await?;
                    Ok(MembershipResponse::from_record(
                        record,
                        context.settings.cooldown,
                        context.clock.now(),
                    ))
                })
            })
            .await;

        let team_id = outcome.as_ref().ok().and_then(|view| view.team_id.clone());
        self.finish(Operation::Membership, caller, team_id, outcome)
    }

    /// Roster of `team_id`. The password is only revealed to members.
    pub async fn team_details(
        &self,
        caller: &str,
        team_id: &str,
    ) -> Result<TeamDetailsResponse, OperationError> {
        self.require_caller(Operation::TeamDetails, caller)?;
        let user = caller.to_owned();
        let requested = team_id.to_owned();

        let outcome: Result<TeamDetailsResponse, TeamError> = run_transaction(
            self.store.as_ref(),
            self.context.settings.retry,
            move |tx| {
                let user = user.clone();
                let team_id = requested.clone();
                Box::pin(async move {
                    if team_id.is_empty() {
                        return Err(TeamError::InvalidArgument("team id is required".into()));
                    }
                    let Some(roster) = team::load(tx, &team_id).await? else {
                        return Err(TeamError::NotFound(format!(
                            "team `{team_id}` does not exist"
                        )));
                    };
                    let is_member = roster.is_member(&user);
                    Ok(TeamDetailsResponse::from_record(team_id, roster, is_member))
                })
            },
        )
        .await;

        self.finish(
            Operation::TeamDetails,
            caller,
            Some(team_id.to_owned()),
            outcome,
        )
    }

    fn require_caller(&self, operation: Operation, caller: &str) -> Result<(), OperationError> {
        if caller.trim().is_empty() {
            return self.finish(
                operation,
                caller,
                None,
                Err(TeamError::Unauthenticated("caller identity is required".into())),
            );
        }
        Ok(())
    }

    fn finish<T>(
        &self,
        operation: Operation,
        caller: &str,
        team_id: Option<TeamId>,
        outcome: Result<T, TeamError>,
    ) -> Result<T, OperationError> {
        match outcome {
            Ok(value) => {
                info!(
                    operation = %operation,
                    caller,
                    team_id = team_id.as_deref(),
                    "team operation succeeded"
                );
                Ok(value)
            }
            Err(source) => {
                let kind = source.kind();
                match kind {
                    ErrorKind::Internal => error!(
                        operation = %operation,
                        caller,
                        team_id = team_id.as_deref(),
                        detail = source.detail().as_deref(),
                        "team operation failed"
                    ),
                    _ => warn!(
                        operation = %operation,
                        caller,
                        team_id = team_id.as_deref(),
                        kind = %kind,
                        reason = %source.summary(),
                        "team operation rejected"
                    ),
                }
                Err(OperationError {
                    operation,
                    caller: caller.to_owned(),
                    team_id,
                    source,
                })
            }
        }
    }
}

async fn leave_attempt(
    tx: &mut Transaction,
    user: &str,
    context: &AttemptContext,
    observed: &mut Option<TeamId>,
) -> Result<LeaveTeamResponse, TeamError> {
    let record = membership::load(tx, user).await?;
    let Some(team_id) = record.team_id else {
        return Err(TeamError::FailedPrecondition(
            "not a member of any team".into(),
        ));
    };
    *observed = Some(team_id.clone());

    let departed = MembershipRecord::departed(context.clock.now());
    match team::load(tx, &team_id).await? {
        None => {
            warn!(
                caller = %user,
                team_id = %team_id,
                "membership points at a missing team; clearing it"
            );
            membership::store(tx, user, &departed)?;
        }
        Some(roster) if roster.is_owner(user) => {
            for member in &roster.members {
                membership::store(tx, member, &departed)?;
            }
            membership::store(tx, user, &departed)?;
            team::delete(tx, &team_id);
        }
        Some(mut roster) => {
            roster.members.remove(user);
            team::store(tx, &team_id, &roster)?;
            membership::store(tx, user, &departed)?;
        }
    }

    Ok(LeaveTeamResponse { left: true })
}

async fn kick_attempt(
    tx: &mut Transaction,
    owner: &str,
    kicked: Option<UserId>,
    context: &AttemptContext,
    observed: &mut Option<TeamId>,
) -> Result<KickTeamMemberResponse, TeamError> {
    let Some(kicked) = kicked else {
        return Err(TeamError::InvalidArgument(
            "the member to remove is required".into(),
        ));
    };
    if kicked == owner {
        return Err(TeamError::InvalidArgument(
            "use leaveTeam to leave your own team".into(),
        ));
    }

    let record = membership::load(tx, owner).await?;
    let Some(team_id) = record.team_id else {
        return Err(TeamError::FailedPrecondition(
            "not a member of any team".into(),
        ));
    };
    *observed = Some(team_id.clone());

    let Some(mut roster) = team::load(tx, &team_id).await? else {
        return Err(TeamError::NotFound(format!(
            "team `{team_id}` does not exist"
        )));
    };
    if !roster.is_owner(owner) {
        return Err(TeamError::PermissionDenied(
            "only the team owner can remove members".into(),
        ));
    }
    if !roster.members.remove(&kicked) {
        return Err(TeamError::NotFound(format!(
            "`{kicked}` is not a member of team `{team_id}`"
        )));
    }

    team::store(tx, &team_id, &roster)?;
    membership::store(
        tx,
        &kicked,
        &MembershipRecord::departed(context.clock.now()),
    )?;

    Ok(KickTeamMemberResponse { kicked: true })
}
