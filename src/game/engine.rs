//! Game Engine
//!
//! Owns the room membership, the role, and either the canonical state
//! (dealer) or the latest mirrored snapshot (player). Every dealer mutation,
//! whether it comes from the public API or from a decoded message, ends in
//! [`Game::commit`], the single place that persists, computes the hint,
//! redacts, notifies subscribers and publishes.
//!
//! ```text
//!   API call ──► guard ──► mutate ──► commit ──► events + transport
//!                                                     │
//!   transport / loopback ──► dispatcher ──► mutate ───┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::core::clock::{Clock, Millis, MonotonicStamp};
use crate::core::room::Room;
use crate::game::autoreveal::{AutoRevealScheduler, Transition};
use crate::game::config::GameConfig;
use crate::game::events::{EventBus, EventStream, GameEvent};
use crate::game::hint::compute_hint;
use crate::game::presence;
use crate::game::state::{
    Deck, Issue, IssueId, Player, PlayerId, State, VoteResult, VoteState, VoteValue,
};
use crate::network::dispatcher::{self, Role, SnapshotOutcome, VoteLedger};
use crate::network::protocol::Message;
use crate::network::transport::{Subscription, Transport};
use crate::storage::Storage;

/// Name used when storage has none.
pub const DEFAULT_PLAYER_NAME: &str = "Anonymous";

/// Engine errors returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// A required collaborator was not supplied to the builder.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    /// `initialize` has not been called.
    #[error("game not initialized")]
    NotInitialized,

    /// Operation requires another role.
    #[error("operation requires role {required}, current role is {actual}")]
    WrongRole {
        /// Role the operation needs.
        required: Role,
        /// Role of this engine.
        actual: Role,
    },

    /// Not currently in a room.
    #[error("not in a room")]
    NotInRoom,

    /// Already in this room.
    #[error("already in this room")]
    AlreadyInRoom,

    /// In another room; leave it first.
    #[error("already in another room")]
    InAnotherRoom,

    /// No snapshot received from the dealer yet.
    #[error("no state received yet")]
    NoState,

    /// Operation not allowed in the current vote state.
    #[error("cannot {operation} while vote state is {state}")]
    WrongVoteState {
        /// Attempted operation.
        operation: &'static str,
        /// Current vote state.
        state: VoteState,
    },

    /// Value is not a card of the deck.
    #[error("value {0} is not in the deck")]
    NotInDeck(VoteValue),

    /// Issue index out of range.
    #[error("issue index {index} out of range ({len} issues)")]
    IssueOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of issues.
        len: usize,
    },

    /// An issue with this title exists.
    #[error("issue {0:?} already exists")]
    DuplicateIssue(String),

    /// Issue title is blank.
    #[error("issue title is empty")]
    EmptyTitle,

    /// Transport refused the subscription.
    #[error("transport error: {0}")]
    Transport(String),
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects the engine's collaborators.
#[derive(Default)]
pub struct GameBuilder {
    config: GameConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn Storage>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GameBuilder {
    /// Builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine configuration.
    pub fn config(mut self, config: GameConfig) -> Self {
        self.config = config;
        self
    }

    /// Pub/sub transport (required).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Clock (required).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persistence. Without it the engine runs anonymously.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Game, GameError> {
        let transport = self.transport.ok_or(GameError::MissingDependency("transport"))?;
        let clock = self.clock.ok_or(GameError::MissingDependency("clock"))?;
        let (shutdown, _) = broadcast::channel(1);

        Ok(Game {
            shared: Arc::new(Shared {
                auto_reveal: AutoRevealScheduler::new(self.config.auto_reveal_delay),
                config: self.config,
                transport,
                storage: self.storage,
                clock,
                events: EventBus::new(),
                shutdown,
                inner: Mutex::new(Inner::default()),
            }),
        })
    }
}

// =============================================================================
// ENGINE
// =============================================================================

struct Joined {
    room: Room,
    role: Role,
    /// Dropped on leave, which stops every loop of this join.
    exit: broadcast::Sender<()>,
    /// Dealer only: own published bytes back into the dispatcher.
    loopback: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[derive(Default)]
struct Inner {
    player: Option<Player>,
    joined: Option<Joined>,
    /// Incremented on every join; loops of an earlier join stop acting.
    epoch: u64,
    state: Option<State>,
    snapshot: Option<Arc<State>>,
    my_vote: Option<VoteResult>,
    ledger: VoteLedger,
    state_stamp: MonotonicStamp,
    vote_stamp: MonotonicStamp,
}

impl Inner {
    fn role(&self) -> Role {
        self.joined.as_ref().map_or(Role::Unset, |j| j.role)
    }

    fn require_player(&self) -> Result<&Player, GameError> {
        self.player.as_ref().ok_or(GameError::NotInitialized)
    }

    fn require_role(&self, required: Role) -> Result<(), GameError> {
        self.require_player()?;
        let actual = self.role();
        if actual != required {
            return Err(GameError::WrongRole { required, actual });
        }
        Ok(())
    }

    fn dealer_state(&mut self) -> Result<&mut State, GameError> {
        self.require_role(Role::Dealer)?;
        self.state.as_mut().ok_or(GameError::NoState)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.joined.is_some() && self.epoch == epoch
    }
}

struct Shared {
    config: GameConfig,
    transport: Arc<dyn Transport>,
    storage: Option<Arc<dyn Storage>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    auto_reveal: AutoRevealScheduler,
    shutdown: broadcast::Sender<()>,
    inner: Mutex<Inner>,
}

/// Handle to a planning poker engine. Cheap to clone.
#[derive(Clone)]
pub struct Game {
    shared: Arc<Shared>,
}

impl Game {
    /// Start building an engine.
    pub fn builder() -> GameBuilder {
        GameBuilder::new()
    }

    fn now(&self) -> Millis {
        self.shared.clock.now_millis()
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    /// Load or create the local player identity. Idempotent.
    pub async fn initialize(&self) -> Result<Player, GameError> {
        let mut inner = self.shared.inner.lock().await;
        if let Some(player) = &inner.player {
            return Ok(player.clone());
        }

        let storage = self.shared.storage.as_deref();
        let id = match storage.and_then(|s| s.player_id()) {
            Some(id) => id,
            None => {
                let id = PlayerId::generate();
                if let Some(storage) = storage {
                    if let Err(e) = storage.set_player_id(id) {
                        warn!(error = %e, "failed to save player id");
                    }
                }
                id
            }
        };
        let name = storage
            .and_then(|s| s.player_name())
            .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string());

        let player = Player::new(id, name, self.now());
        info!(player = %player.id, name = %player.name, "initialized");
        inner.player = Some(player.clone());
        Ok(player)
    }

    /// Change the local player's display name.
    pub async fn rename(&self, name: &str) -> Result<(), GameError> {
        let mut inner = self.shared.inner.lock().await;
        let player = inner.player.as_mut().ok_or(GameError::NotInitialized)?;
        player.name = name.trim().to_string();

        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.set_player_name(&player.name) {
                warn!(error = %e, "failed to save player name");
            }
        }
        if inner.joined.is_some() {
            self.send_presence(&inner);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Room lifecycle
    // -------------------------------------------------------------------------

    /// Allocate a new room with the local player as its only member.
    /// Does not join it.
    pub async fn create_new_room(&self) -> Result<(Room, State), GameError> {
        let inner = self.shared.inner.lock().await;
        let player = inner.require_player()?;
        let now = self.now();
        let room = Room::generate();
        let state = State::new(Player::new(player.id, player.name.clone(), now), now);
        info!(room = %room.id(), "room created");
        Ok((room, state))
    }

    /// The state this player last committed as dealer of `room`, if stored.
    pub async fn saved_room_state(&self, room: &Room) -> Option<State> {
        let storage = self.shared.storage.as_ref()?;
        match storage.load_room_state(&room.id()) {
            Ok(state) => state,
            Err(e) => {
                warn!(room = %room.id(), error = %e, "failed to load room state");
                None
            }
        }
    }

    /// Join `room`. With a state the engine becomes the dealer, without one
    /// it becomes a player waiting for the dealer's first snapshot.
    #[instrument(skip(self, state), fields(dealer = state.is_some()))]
    pub async fn join_room(&self, room: Room, state: Option<State>) -> Result<(), GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let player = inner.require_player()?.clone();
        if let Some(joined) = &inner.joined {
            return Err(if joined.room.id() == room.id() {
                GameError::AlreadyInRoom
            } else {
                GameError::InAnotherRoom
            });
        }

        let subscription = self
            .shared
            .transport
            .subscribe(&room)
            .map_err(|e| GameError::Transport(e.to_string()))?;

        let role = if state.is_some() { Role::Dealer } else { Role::Player };
        let (exit, _) = broadcast::channel(1);
        inner.epoch += 1;
        let epoch = inner.epoch;

        let loopback = if role == Role::Dealer {
            let (tx, rx) = mpsc::unbounded_channel();
            self.spawn_loopback_loop(epoch, rx, exit.subscribe());
            Some(tx)
        } else {
            None
        };

        inner.joined = Some(Joined {
            room: room.clone(),
            role,
            exit,
            loopback,
        });
        inner.state = state;
        inner.snapshot = None;
        inner.my_vote = None;
        inner.ledger.clear();

        self.spawn_inbound_loop(epoch, subscription, inner);
        self.spawn_presence_loop(epoch, inner);

        if role == Role::Dealer {
            let now = self.now();
            if let Some(state) = inner.state.as_mut() {
                inner.state_stamp.observe(state.timestamp);
                presence::mark_online(state, &player, now);
            }
            self.commit(inner);
            self.spawn_sweep_loop(epoch, inner);
            if let Some(period) = self.shared.config.state_interval {
                self.spawn_state_loop(epoch, period, inner);
            }
        }

        self.send_presence(inner);
        info!(room = %room.id(), role = %role, "joined room");
        Ok(())
    }

    /// Leave the current room. Does nothing when not in a room.
    pub async fn leave_room(&self) -> Result<(), GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let player = inner.require_player()?.clone();
        if inner.joined.is_none() {
            return Ok(());
        }

        self.send(inner, &Message::player_offline(player, self.now()));
        self.shared.auto_reveal.cancel();

        if let Some(joined) = inner.joined.take() {
            info!(room = %joined.room.id(), role = %joined.role, "left room");
        }
        inner.state = None;
        inner.snapshot = None;
        inner.my_vote = None;
        inner.ledger.clear();
        self.shared.events.publish(GameEvent::RoomLeft);
        Ok(())
    }

    /// Shut the engine down: close the event bus, leave the room, stop loops.
    pub async fn stop(&self) {
        self.shared.events.close();
        if let Err(e) = self.leave_room().await {
            debug!(error = %e, "leave on stop");
        }
        let _ = self.shared.shutdown.send(());
    }

    // -------------------------------------------------------------------------
    // Dealer operations
    // -------------------------------------------------------------------------

    /// Add an issue and start voting on it.
    #[instrument(skip(self))]
    pub async fn deal(&self, title: &str) -> Result<IssueId, GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let state = inner.dealer_state()?;
        let vote_state = state.vote_state();
        if vote_state == VoteState::Revealed {
            return Err(GameError::WrongVoteState { operation: "deal", state: vote_state });
        }
        let title = non_empty(title)?;

        state.issues.push(Issue::new(title));
        let id = state
            .activate(state.issues.len() - 1)
            .ok_or(GameError::NoState)?;
        inner.my_vote = None;
        info!(issue = %id, title, "dealt");
        self.commit(inner);
        Ok(id)
    }

    /// Add an issue without activating it.
    pub async fn add_issue(&self, title: &str) -> Result<IssueId, GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let state = inner.dealer_state()?;
        let title = non_empty(title)?;
        if state.has_issue_titled(title) {
            return Err(GameError::DuplicateIssue(title.to_string()));
        }

        let issue = Issue::new(title);
        let id = issue.id;
        state.issues.push(issue);
        debug!(issue = %id, title, "issue added");
        self.commit(inner);
        Ok(id)
    }

    /// Start voting on the issue at `index`, discarding its votes and result.
    pub async fn select_issue(&self, index: usize) -> Result<IssueId, GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let state = inner.dealer_state()?;
        let vote_state = state.vote_state();
        if vote_state == VoteState::Revealed {
            return Err(GameError::WrongVoteState { operation: "select an issue", state: vote_state });
        }
        let len = state.issues.len();
        let id = state
            .activate(index)
            .ok_or(GameError::IssueOutOfRange { index, len })?;
        inner.my_vote = None;
        info!(issue = %id, index, "issue selected");
        self.commit(inner);
        Ok(id)
    }

    /// Replace the deck. Only between rounds.
    pub async fn set_deck(&self, deck: Deck) -> Result<(), GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let state = inner.dealer_state()?;
        let vote_state = state.vote_state();
        if !matches!(vote_state, VoteState::Idle | VoteState::Finished) {
            return Err(GameError::WrongVoteState { operation: "change the deck", state: vote_state });
        }
        state.deck = deck;
        self.commit(inner);
        Ok(())
    }

    /// Show the votes on the active issue.
    pub async fn reveal(&self) -> Result<(), GameError> {
        let mut guard = self.shared.inner.lock().await;
        self.reveal_locked(&mut guard)
    }

    fn reveal_locked(&self, inner: &mut Inner) -> Result<(), GameError> {
        let state = inner.dealer_state()?;
        let vote_state = state.vote_state();
        if vote_state != VoteState::Voting {
            return Err(GameError::WrongVoteState { operation: "reveal", state: vote_state });
        }
        if self.shared.auto_reveal.cancel() {
            self.shared.events.publish(GameEvent::AutoRevealCancelled);
        }
        state.votes_revealed = true;
        info!(issue = ?state.active_issue, votes = state.active().map_or(0, |i| i.votes.len()), "votes revealed");
        self.commit(inner);
        Ok(())
    }

    /// Record the final estimation and move on to the next issue without a
    /// result, or to idle.
    pub async fn finish(&self, value: VoteValue) -> Result<(), GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let state = inner.dealer_state()?;
        let vote_state = state.vote_state();
        if vote_state != VoteState::Revealed {
            return Err(GameError::WrongVoteState { operation: "finish", state: vote_state });
        }
        if !state.deck.contains(&value) {
            return Err(GameError::NotInDeck(value));
        }

        let finished = state.active_mut().ok_or(GameError::NoState)?;
        finished.result = Some(value.clone());
        let finished = finished.id;

        match state.next_undealt(&finished) {
            Some(index) => {
                state.activate(index);
            }
            None => state.active_issue = None,
        }
        state.votes_revealed = false;
        inner.my_vote = None;
        info!(issue = %finished, result = %value, "issue finished");
        self.commit(inner);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Any role
    // -------------------------------------------------------------------------

    /// Vote on the active issue. `None` retracts the local player's vote.
    pub async fn publish_vote(&self, value: Option<VoteValue>) -> Result<(), GameError> {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        let player_id = inner.require_player()?.id;
        let role = inner.role();
        if role == Role::Unset {
            return Err(GameError::NotInRoom);
        }

        let state = inner.state.as_mut().ok_or(GameError::NoState)?;
        let vote_state = state.vote_state();
        if vote_state != VoteState::Voting {
            return Err(GameError::WrongVoteState { operation: "vote", state: vote_state });
        }
        if let Some(value) = &value {
            if !state.deck.contains(value) {
                return Err(GameError::NotInDeck(value.clone()));
            }
        }
        let issue = state.active_issue.ok_or(GameError::NoState)?;

        let now = self.now();
        let vote = VoteResult {
            value: value.clone(),
            timestamp: inner.vote_stamp.next(now),
        };

        // Players echo their own vote, hidden, into the mirror right away.
        // The dealer's canonical state only changes through the dispatcher.
        if role == Role::Player {
            if let Some(active) = state.active_mut() {
                match &value {
                    Some(_) => {
                        active.votes.insert(player_id, vote.redacted());
                    }
                    None => {
                        active.votes.remove(&player_id);
                    }
                }
            }
            let snapshot = Arc::new(state.clone());
            inner.snapshot = Some(snapshot.clone());
            self.shared.events.publish(GameEvent::StateChanged(snapshot));
        }

        inner.my_vote = value.map(|_| vote.clone());
        debug!(issue = %issue, retract = inner.my_vote.is_none(), "publishing vote");
        self.send(inner, &Message::player_vote(player_id, issue, vote, now));
        Ok(())
    }

    /// Subscribe to local events. The current snapshot, if any, comes first.
    pub async fn subscribe(&self) -> EventStream {
        let inner = self.shared.inner.lock().await;
        let initial = inner.snapshot.clone().map(GameEvent::StateChanged);
        self.shared.events.subscribe(initial)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Latest snapshot as subscribers see it.
    pub async fn state(&self) -> Option<Arc<State>> {
        self.shared.inner.lock().await.snapshot.clone()
    }

    /// Current vote state, `Idle` without state.
    pub async fn vote_state(&self) -> VoteState {
        let inner = self.shared.inner.lock().await;
        inner.snapshot.as_ref().map_or(VoteState::Idle, |s| s.vote_state())
    }

    /// Role in the current room.
    pub async fn role(&self) -> Role {
        self.shared.inner.lock().await.role()
    }

    /// Current room.
    pub async fn room(&self) -> Option<Room> {
        let inner = self.shared.inner.lock().await;
        inner.joined.as_ref().map(|j| j.room.clone())
    }

    /// Local player, once initialized.
    pub async fn player(&self) -> Option<Player> {
        self.shared.inner.lock().await.player.clone()
    }

    /// The local player's own vote on the active issue.
    pub async fn my_vote(&self) -> Option<VoteResult> {
        self.shared.inner.lock().await.my_vote.clone()
    }

    // -------------------------------------------------------------------------
    // Commit and publish
    // -------------------------------------------------------------------------

    /// Dealer state-commit: stamp, hint, persist, redact, notify, publish,
    /// then reconcile the auto-reveal timer.
    fn commit(&self, inner: &mut Inner) {
        let Some(joined) = inner.joined.as_ref() else { return };
        let room_id = joined.room.id();
        let now = self.now();
        let Some(state) = inner.state.as_mut() else { return };

        state.timestamp = inner.state_stamp.next(now);

        if state.vote_state() == VoteState::Revealed {
            let deck = state.deck.clone();
            if let Some(issue) = state.active_mut() {
                match compute_hint(&deck, &issue.votes) {
                    Ok(hint) => issue.hint = Some(hint),
                    Err(e) => {
                        error!(issue = %issue.id, error = %e, "cannot compute hint");
                        issue.hint = None;
                    }
                }
            }
        }

        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.save_room_state(&room_id, state) {
                warn!(room = %room_id, error = %e, "failed to save room state");
            }
        }

        let snapshot = Arc::new(state.redacted());
        inner.snapshot = Some(snapshot.clone());
        self.shared.events.publish(GameEvent::StateChanged(snapshot.clone()));
        self.send(inner, &Message::state((*snapshot).clone(), now));

        self.reconcile_auto_reveal(inner);
    }

    fn reconcile_auto_reveal(&self, inner: &Inner) {
        if !self.shared.config.auto_reveal {
            return;
        }
        let all_voted = inner
            .state
            .as_ref()
            .filter(|s| s.vote_state() == VoteState::Voting && s.all_players_voted())
            .and_then(|s| s.active_issue);

        let transition = self.shared.auto_reveal.update(all_voted, |ticket, delay| {
            let game = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if game.shared.auto_reveal.claim(ticket) {
                    game.fire_auto_reveal(ticket.issue).await;
                }
            })
        });

        match transition {
            Some(Transition::Scheduled(delay)) => {
                self.shared.events.publish(GameEvent::AutoRevealScheduled { delay })
            }
            Some(Transition::Cancelled) => self.shared.events.publish(GameEvent::AutoRevealCancelled),
            None => {}
        }
    }

    /// Timer callback. Goes through the same guarded path as `reveal`.
    /// A timer armed for an issue that is no longer active is skipped.
    async fn fire_auto_reveal(&self, issue: IssueId) {
        let mut guard = self.shared.inner.lock().await;
        let active = guard.state.as_ref().and_then(|s| s.active_issue);
        if active != Some(issue) {
            warn!(armed_for = %issue, active = ?active, "auto-reveal fired for an inactive issue, skipping");
            return;
        }
        match self.reveal_locked(&mut guard) {
            Ok(()) => info!(issue = %issue, "auto-revealed"),
            Err(e) => debug!(issue = %issue, error = %e, "auto-reveal not applicable"),
        }
    }

    /// Publish a message to the room; a dealer also feeds it to itself.
    /// Failures are logged only: local state has already moved on.
    fn send(&self, inner: &Inner, message: &Message) {
        let Some(joined) = inner.joined.as_ref() else { return };
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind = message.kind(), error = %e, "failed to encode message");
                return;
            }
        };

        if let Some(loopback) = &joined.loopback {
            let _ = loopback.send(payload.clone());
        }

        let result = if self.shared.config.encryption {
            self.shared.transport.publish_public_message(&joined.room, payload)
        } else {
            self.shared.transport.publish_unencrypted_message(&joined.room, payload)
        };
        match result {
            Ok(()) => trace!(kind = message.kind(), "published"),
            Err(e) => warn!(kind = message.kind(), error = %e, "publish failed"),
        }
    }

    fn send_presence(&self, inner: &Inner) {
        if let Some(player) = &inner.player {
            let now = self.now();
            let heartbeat = Player::new(player.id, player.name.clone(), now);
            self.send(inner, &Message::player_online(heartbeat, now));
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    async fn handle_payload(&self, epoch: u64, payload: &[u8]) {
        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping undecodable message");
                return;
            }
        };

        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        if !inner.is_current(epoch) {
            return;
        }
        let role = inner.role();
        if !dispatcher::accepts(role, &message) {
            trace!(kind = message.kind(), role = %role, "ignoring message");
            return;
        }

        match message {
            Message::State(msg) => self.apply_snapshot(inner, msg.state),
            Message::PlayerOnline(msg) => {
                let now = self.now();
                let Some(state) = inner.state.as_mut() else { return };
                if dispatcher::apply_player_online(state, &msg.player, now) {
                    info!(player = %msg.player.id, name = %msg.player.name, "player online");
                    self.commit(inner);
                }
            }
            Message::PlayerOffline(msg) => {
                let Some(state) = inner.state.as_mut() else { return };
                if dispatcher::apply_player_offline(state, &msg.player.id) {
                    info!(player = %msg.player.id, "player offline");
                    self.commit(inner);
                }
            }
            Message::PlayerVote(msg) => {
                let Some(state) = inner.state.as_mut() else { return };
                match dispatcher::apply_player_vote(state, &mut inner.ledger, &msg) {
                    Ok(applied) if applied.changed() => {
                        debug!(player = %msg.player_id, issue = %msg.issue, outcome = ?applied, "vote applied");
                        self.commit(inner);
                    }
                    Ok(_) => {}
                    Err(reason) => {
                        debug!(player = %msg.player_id, issue = %msg.issue, reason = %reason, "vote rejected");
                    }
                }
            }
        }
    }

    fn apply_snapshot(&self, inner: &mut Inner, mut incoming: State) {
        match dispatcher::accept_snapshot(inner.state.as_ref(), &mut incoming) {
            SnapshotOutcome::Stale => {
                debug!(timestamp = incoming.timestamp, "ignoring stale snapshot");
            }
            SnapshotOutcome::Replace { issue_changed } => {
                if issue_changed {
                    inner.my_vote = None;
                }
                let snapshot = Arc::new(incoming.clone());
                inner.state = Some(incoming);
                inner.snapshot = Some(snapshot.clone());
                self.shared.events.publish(GameEvent::StateChanged(snapshot));
            }
        }
    }

    async fn sweep_presence(&self, epoch: u64) {
        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;
        if !inner.is_current(epoch) || inner.role() != Role::Dealer {
            return;
        }
        let now = self.now();
        let timeout = self.shared.config.offline_timeout.as_millis() as Millis;
        let Some(state) = inner.state.as_mut() else { return };
        let stale = presence::sweep_stale(state, now, timeout);
        if !stale.is_empty() {
            info!(count = stale.len(), "players timed out");
            self.commit(inner);
        }
    }

    async fn heartbeat(&self, epoch: u64) {
        let inner = self.shared.inner.lock().await;
        if inner.is_current(epoch) {
            self.send_presence(&inner);
        }
    }

    async fn rebroadcast_state(&self, epoch: u64) {
        let inner = self.shared.inner.lock().await;
        if !inner.is_current(epoch) || inner.role() != Role::Dealer {
            return;
        }
        if let Some(snapshot) = &inner.snapshot {
            self.send(&inner, &Message::state((**snapshot).clone(), self.now()));
        }
    }

    // -------------------------------------------------------------------------
    // Background loops
    // -------------------------------------------------------------------------

    fn exit_signal(inner: &Inner) -> Option<broadcast::Receiver<()>> {
        inner.joined.as_ref().map(|j| j.exit.subscribe())
    }

    fn spawn_inbound_loop(&self, epoch: u64, mut subscription: Subscription, inner: &Inner) {
        let Some(mut exit) = Self::exit_signal(inner) else { return };
        let mut shutdown = self.shared.shutdown.subscribe();
        let game = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = subscription.recv() => match payload {
                        Some(payload) => game.handle_payload(epoch, &payload).await,
                        None => {
                            warn!("transport closed the subscription");
                            break;
                        }
                    },
                    _ = exit.recv() => break,
                    _ = shutdown.recv() => break,
                }
            }
            trace!(epoch, "inbound loop stopped");
        });
    }

    fn spawn_loopback_loop(
        &self,
        epoch: u64,
        mut loopback: mpsc::UnboundedReceiver<Vec<u8>>,
        mut exit: broadcast::Receiver<()>,
    ) {
        let mut shutdown = self.shared.shutdown.subscribe();
        let game = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = loopback.recv() => match payload {
                        Some(payload) => game.handle_payload(epoch, &payload).await,
                        None => break,
                    },
                    _ = exit.recv() => break,
                    _ = shutdown.recv() => break,
                }
            }
            trace!(epoch, "loopback loop stopped");
        });
    }

    fn spawn_presence_loop(&self, epoch: u64, inner: &Inner) {
        let period = self.shared.config.presence_interval;
        self.spawn_periodic(epoch, period, inner, "presence", |game, epoch| async move {
            game.heartbeat(epoch).await
        });
    }

    fn spawn_sweep_loop(&self, epoch: u64, inner: &Inner) {
        let period = self.shared.config.sweep_interval;
        self.spawn_periodic(epoch, period, inner, "sweep", |game, epoch| async move {
            game.sweep_presence(epoch).await
        });
    }

    fn spawn_state_loop(&self, epoch: u64, period: Duration, inner: &Inner) {
        self.spawn_periodic(epoch, period, inner, "state", |game, epoch| async move {
            game.rebroadcast_state(epoch).await
        });
    }

    fn spawn_periodic<F, Fut>(&self, epoch: u64, period: Duration, inner: &Inner, name: &'static str, tick: F)
    where
        F: Fn(Game, u64) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let Some(mut exit) = Self::exit_signal(inner) else { return };
        let mut shutdown = self.shared.shutdown.subscribe();
        let game = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(game.clone(), epoch).await,
                    _ = exit.recv() => break,
                    _ = shutdown.recv() => break,
                }
            }
            trace!(epoch, name, "periodic loop stopped");
        });
    }
}

fn non_empty(title: &str) -> Result<&str, GameError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(GameError::EmptyTitle);
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{ManualClock, SystemClock};
    use crate::game::state::VoteStatus;
    use crate::network::transport::MemoryHub;
    use crate::storage::MemoryStorage;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn quiet_config() -> GameConfig {
        GameConfig {
            presence_interval: Duration::from_secs(60),
            state_interval: None,
            sweep_interval: Duration::from_secs(60),
            ..GameConfig::default()
        }
    }

    fn auto_config(delay_ms: u64) -> GameConfig {
        GameConfig {
            auto_reveal: true,
            auto_reveal_delay: Duration::from_millis(delay_ms),
            ..quiet_config()
        }
    }

    async fn peer(hub: &MemoryHub, config: GameConfig) -> Game {
        let game = Game::builder()
            .config(config)
            .transport(Arc::new(hub.connect()))
            .clock(Arc::new(SystemClock))
            .build()
            .unwrap();
        game.initialize().await.unwrap();
        game
    }

    async fn dealer(hub: &MemoryHub, config: GameConfig) -> (Game, Room) {
        let game = peer(hub, config).await;
        let (room, state) = game.create_new_room().await.unwrap();
        game.join_room(room.clone(), Some(state)).await.unwrap();
        (game, room)
    }

    async fn wait_event(events: &mut EventStream, pred: impl Fn(&GameEvent) -> bool) -> GameEvent {
        timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_state(events: &mut EventStream, pred: impl Fn(&State) -> bool) -> Arc<State> {
        let event = wait_event(events, |e| matches!(e, GameEvent::StateChanged(s) if pred(s))).await;
        match event {
            GameEvent::StateChanged(state) => state,
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    async fn wait_wire_state(wire: &mut Subscription, pred: impl Fn(&State) -> bool) -> State {
        timeout(WAIT, async {
            loop {
                let payload = wire.recv().await.expect("subscription closed");
                if let Ok(Message::State(msg)) = Message::decode(&payload) {
                    if pred(&msg.state) {
                        return msg.state;
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    fn has_vote(state: &State, player: &PlayerId) -> bool {
        state.active().map_or(false, |i| i.votes.contains_key(player))
    }

    #[test]
    fn test_build_requires_transport_and_clock() {
        let hub = MemoryHub::new();
        assert_eq!(
            Game::builder().clock(Arc::new(SystemClock)).build().err(),
            Some(GameError::MissingDependency("transport"))
        );
        assert_eq!(
            Game::builder().transport(Arc::new(hub.connect())).build().err(),
            Some(GameError::MissingDependency("clock"))
        );
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let hub = MemoryHub::new();
        let game = Game::builder()
            .transport(Arc::new(hub.connect()))
            .clock(Arc::new(SystemClock))
            .build()
            .unwrap();

        assert_eq!(game.create_new_room().await.err(), Some(GameError::NotInitialized));
        assert_eq!(game.join_room(Room::generate(), None).await, Err(GameError::NotInitialized));
        assert_eq!(game.deal("a").await, Err(GameError::NotInitialized));
        assert_eq!(game.publish_vote(None).await, Err(GameError::NotInitialized));
        assert_eq!(game.leave_room().await, Err(GameError::NotInitialized));
        assert_eq!(game.rename("ana").await, Err(GameError::NotInitialized));
    }

    #[tokio::test]
    async fn test_identity_persists_in_storage() {
        let hub = MemoryHub::new();
        let storage = Arc::new(MemoryStorage::new());
        let build = || {
            Game::builder()
                .transport(Arc::new(hub.connect()))
                .clock(Arc::new(SystemClock))
                .storage(storage.clone())
                .build()
                .unwrap()
        };

        let first = build();
        let original = first.initialize().await.unwrap();
        assert_eq!(original.name, DEFAULT_PLAYER_NAME);
        assert_eq!(first.initialize().await.unwrap(), original);
        first.rename("ana").await.unwrap();

        let restarted = build().initialize().await.unwrap();
        assert_eq!(restarted.id, original.id);
        assert_eq!(restarted.name, "ana");
    }

    #[tokio::test]
    async fn test_join_rules() {
        let hub = MemoryHub::new();
        let (game, room) = dealer(&hub, quiet_config()).await;
        assert_eq!(game.role().await, Role::Dealer);
        assert_eq!(game.room().await.map(|r| r.id()), Some(room.id()));

        assert_eq!(game.join_room(room.clone(), None).await, Err(GameError::AlreadyInRoom));
        assert_eq!(game.join_room(Room::generate(), None).await, Err(GameError::InAnotherRoom));

        let mut events = game.subscribe().await;
        game.leave_room().await.unwrap();
        wait_event(&mut events, |e| matches!(e, GameEvent::RoomLeft)).await;
        game.leave_room().await.unwrap();
        assert_eq!(game.role().await, Role::Unset);
        assert!(game.state().await.is_none());
        assert!(game.room().await.is_none());

        game.join_room(room, None).await.unwrap();
        assert_eq!(game.role().await, Role::Player);
    }

    #[tokio::test]
    async fn test_role_guards() {
        let hub = MemoryHub::new();
        let (_dealer, room) = dealer(&hub, quiet_config()).await;
        let player = peer(&hub, quiet_config()).await;
        player.join_room(room, None).await.unwrap();

        let wrong = Err(GameError::WrongRole { required: Role::Dealer, actual: Role::Player });
        assert_eq!(player.deal("a").await.map(|_| ()), wrong);
        assert_eq!(player.reveal().await, wrong);
        assert_eq!(player.set_deck(Deck::tshirt()).await, wrong);

        let outsider = peer(&hub, quiet_config()).await;
        assert_eq!(
            outsider.add_issue("a").await,
            Err(GameError::WrongRole { required: Role::Dealer, actual: Role::Unset })
        );
        assert_eq!(outsider.publish_vote(None).await, Err(GameError::NotInRoom));
    }

    #[tokio::test]
    async fn test_vote_state_machine() {
        let hub = MemoryHub::new();
        let (game, _room) = dealer(&hub, quiet_config()).await;
        assert_eq!(game.vote_state().await, VoteState::Idle);

        assert_eq!(
            game.reveal().await,
            Err(GameError::WrongVoteState { operation: "reveal", state: VoteState::Idle })
        );
        assert_eq!(
            game.publish_vote(Some("1".into())).await,
            Err(GameError::WrongVoteState { operation: "vote", state: VoteState::Idle })
        );
        assert_eq!(game.deal("  ").await, Err(GameError::EmptyTitle));

        game.deal("a").await.unwrap();
        assert_eq!(game.vote_state().await, VoteState::Voting);
        assert_eq!(
            game.finish("1".into()).await,
            Err(GameError::WrongVoteState { operation: "finish", state: VoteState::Voting })
        );
        assert_eq!(
            game.set_deck(Deck::tshirt()).await,
            Err(GameError::WrongVoteState { operation: "change the deck", state: VoteState::Voting })
        );
        assert_eq!(
            game.publish_vote(Some("XL".into())).await,
            Err(GameError::NotInDeck("XL".into()))
        );

        game.reveal().await.unwrap();
        assert_eq!(
            game.deal("b").await,
            Err(GameError::WrongVoteState { operation: "deal", state: VoteState::Revealed })
        );
        assert_eq!(
            game.select_issue(0).await,
            Err(GameError::WrongVoteState { operation: "select an issue", state: VoteState::Revealed })
        );
        assert_eq!(game.finish("XL".into()).await, Err(GameError::NotInDeck("XL".into())));

        game.finish("3".into()).await.unwrap();
        assert_eq!(game.vote_state().await, VoteState::Idle);
        game.set_deck(Deck::tshirt()).await.unwrap();
        assert_eq!(game.select_issue(5).await, Err(GameError::IssueOutOfRange { index: 5, len: 1 }));
        assert_eq!(game.add_issue("a").await, Err(GameError::DuplicateIssue("a".into())));
    }

    #[tokio::test]
    async fn test_finish_moves_to_next_issue_without_result() {
        let hub = MemoryHub::new();
        let (game, _room) = dealer(&hub, quiet_config()).await;
        let queued = game.add_issue("later").await.unwrap();
        let first = game.deal("now").await.unwrap();

        game.reveal().await.unwrap();
        game.finish("5".into()).await.unwrap();

        let state = game.state().await.unwrap();
        assert_eq!(state.active_issue, Some(queued));
        assert_eq!(state.issue(&first).unwrap().result, Some("5".into()));
        assert!(!state.votes_revealed);
        assert_eq!(state.vote_state(), VoteState::Voting);
    }

    #[tokio::test]
    async fn test_dealer_round_on_the_wire() {
        let hub = MemoryHub::new();
        let game = peer(&hub, quiet_config()).await;
        let me = game.player().await.unwrap().id;
        let (room, state) = game.create_new_room().await.unwrap();
        let observer = hub.connect();
        let mut wire = observer.subscribe(&room).unwrap();
        game.join_room(room, Some(state)).await.unwrap();

        let snapshot = wait_wire_state(&mut wire, |s| s.players.len() == 1).await;
        assert!(snapshot.active_issue.is_none());
        assert!(snapshot.players[0].online);

        let issue = game.deal("https://tracker/ISSUE-1").await.unwrap();
        let snapshot = wait_wire_state(&mut wire, |s| s.active_issue == Some(issue)).await;
        assert!(snapshot.active().unwrap().votes.is_empty());

        game.publish_vote(Some("1".into())).await.unwrap();
        let snapshot = wait_wire_state(&mut wire, |s| has_vote(s, &me)).await;
        assert!(matches!(
            snapshot.active().unwrap().vote_status(&me),
            VoteStatus::Hidden { .. }
        ));
        assert_eq!(game.my_vote().await.unwrap().value, Some("1".into()));

        game.reveal().await.unwrap();
        let snapshot = wait_wire_state(&mut wire, |s| s.votes_revealed).await;
        let active = snapshot.active().unwrap();
        assert_eq!(active.votes[&me].value, Some("1".into()));
        let hint = active.hint.as_ref().unwrap();
        assert!(hint.acceptable);
        assert_eq!(hint.value, Some("1".into()));

        game.finish("1".into()).await.unwrap();
        let snapshot = wait_wire_state(&mut wire, |s| s.active_issue.is_none()).await;
        assert_eq!(snapshot.issues[0].result, Some("1".into()));
        assert!(!snapshot.votes_revealed);
        assert!(game.my_vote().await.is_none());
    }

    #[tokio::test]
    async fn test_player_mirrors_dealer() {
        let hub = MemoryHub::new();
        let (dealer, room) = dealer(&hub, quiet_config()).await;
        let dealer_id = dealer.player().await.unwrap().id;
        let mut dealer_events = dealer.subscribe().await;

        let player = peer(&hub, quiet_config()).await;
        let player_id = player.player().await.unwrap().id;
        let mut player_events = player.subscribe().await;
        player.join_room(room, None).await.unwrap();

        wait_state(&mut dealer_events, |s| s.players.len() == 2).await;
        wait_state(&mut player_events, |s| s.players.len() == 2).await;

        let issue = dealer.deal("a").await.unwrap();
        wait_state(&mut player_events, |s| s.active_issue == Some(issue)).await;

        player.publish_vote(Some("5".into())).await.unwrap();
        let seen = wait_state(&mut dealer_events, |s| has_vote(s, &player_id)).await;
        assert_eq!(seen.active().unwrap().votes[&player_id].value, None);

        dealer.publish_vote(Some("8".into())).await.unwrap();
        wait_state(&mut dealer_events, |s| has_vote(s, &dealer_id)).await;
        let mirrored = wait_state(&mut player_events, |s| has_vote(s, &dealer_id)).await;
        assert_eq!(mirrored.active().unwrap().votes[&dealer_id].value, None);

        dealer.reveal().await.unwrap();
        let revealed = wait_state(&mut player_events, |s| s.votes_revealed).await;
        let active = revealed.active().unwrap();
        assert_eq!(active.votes[&player_id].value, Some("5".into()));
        assert_eq!(active.votes[&dealer_id].value, Some("8".into()));
        let hint = active.hint.as_ref().unwrap();
        assert!(hint.acceptable);
        assert_eq!(hint.value, Some("8".into()));

        assert!(player.my_vote().await.is_some());
        dealer.finish("8".into()).await.unwrap();
        wait_state(&mut player_events, |s| s.active_issue.is_none()).await;
        assert!(player.my_vote().await.is_none());
        assert_eq!(player.vote_state().await, VoteState::Idle);
    }

    #[tokio::test]
    async fn test_repeated_heartbeat_is_not_rebroadcast() {
        let hub = MemoryHub::new();
        let (dealer, room) = dealer(&hub, quiet_config()).await;
        let mut events = dealer.subscribe().await;
        wait_state(&mut events, |s| s.players.len() == 1).await;

        let stranger = hub.connect();
        let heartbeat = Message::player_online(Player::new(PlayerId::generate(), "bo", 0), 0)
            .encode()
            .unwrap();
        stranger.publish_public_message(&room, heartbeat.clone()).unwrap();
        wait_state(&mut events, |s| s.players.len() == 2).await;

        stranger.publish_public_message(&room, b"garbage".to_vec()).unwrap();
        stranger.publish_public_message(&room, heartbeat).unwrap();
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
        assert_eq!(dealer.state().await.unwrap().players.len(), 2);
    }

    #[tokio::test]
    async fn test_silent_player_goes_offline() {
        let hub = MemoryHub::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let dealer = Game::builder()
            .config(GameConfig { sweep_interval: Duration::from_millis(20), ..quiet_config() })
            .transport(Arc::new(hub.connect()))
            .clock(clock.clone())
            .build()
            .unwrap();
        dealer.initialize().await.unwrap();
        let (room, state) = dealer.create_new_room().await.unwrap();
        dealer.join_room(room.clone(), Some(state)).await.unwrap();
        let mut events = dealer.subscribe().await;

        let bo = PlayerId::generate();
        let heartbeat = Message::player_online(Player::new(bo, "bo", 0), 0).encode().unwrap();
        hub.connect().publish_public_message(&room, heartbeat).unwrap();
        wait_state(&mut events, |s| s.player(&bo).map_or(false, |p| p.online)).await;

        clock.advance(21_000);
        let state = wait_state(&mut events, |s| s.player(&bo).map_or(false, |p| !p.online)).await;
        assert_eq!(state.players.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_reveal_after_everyone_voted() {
        let hub = MemoryHub::new();
        let (game, _room) = dealer(&hub, auto_config(50)).await;
        let mut events = game.subscribe().await;

        game.deal("a").await.unwrap();
        game.publish_vote(Some("3".into())).await.unwrap();

        let scheduled =
            wait_event(&mut events, |e| matches!(e, GameEvent::AutoRevealScheduled { .. })).await;
        assert!(matches!(
            scheduled,
            GameEvent::AutoRevealScheduled { delay } if delay == Duration::from_millis(50)
        ));
        let state = wait_state(&mut events, |s| s.votes_revealed).await;
        assert!(state.active().unwrap().hint.is_some());
    }

    #[tokio::test]
    async fn test_retraction_cancels_auto_reveal() {
        let hub = MemoryHub::new();
        let (game, _room) = dealer(&hub, auto_config(300)).await;
        let mut events = game.subscribe().await;

        game.deal("a").await.unwrap();
        game.publish_vote(Some("3".into())).await.unwrap();
        wait_event(&mut events, |e| matches!(e, GameEvent::AutoRevealScheduled { .. })).await;

        game.publish_vote(None).await.unwrap();
        wait_event(&mut events, |e| matches!(e, GameEvent::AutoRevealCancelled)).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(game.vote_state().await, VoteState::Voting);
        assert!(game.my_vote().await.is_none());
    }

    #[tokio::test]
    async fn test_auto_reveal_for_inactive_issue_is_skipped() {
        let hub = MemoryHub::new();
        let (game, _room) = dealer(&hub, quiet_config()).await;
        let first = game.deal("a").await.unwrap();
        let second = game.deal("b").await.unwrap();

        game.fire_auto_reveal(first).await;

        let state = game.state().await.unwrap();
        assert_eq!(state.active_issue, Some(second));
        assert_eq!(state.vote_state(), VoteState::Voting);
    }

    #[tokio::test]
    async fn test_encryption_flag_selects_publish_variant() {
        for encryption in [true, false] {
            let hub = MemoryHub::new();
            let transport = Arc::new(hub.connect());
            let game = Game::builder()
                .config(GameConfig { encryption, ..quiet_config() })
                .transport(transport.clone())
                .clock(Arc::new(SystemClock))
                .build()
                .unwrap();
            game.initialize().await.unwrap();
            let (room, state) = game.create_new_room().await.unwrap();
            game.join_room(room, Some(state)).await.unwrap();

            if encryption {
                assert!(transport.encrypted_count() > 0);
                assert_eq!(transport.unencrypted_count(), 0);
            } else {
                assert!(transport.unencrypted_count() > 0);
                assert_eq!(transport.encrypted_count(), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_dealer_state_survives_restart() {
        let hub = MemoryHub::new();
        let storage = Arc::new(MemoryStorage::new());
        let build = || {
            Game::builder()
                .config(quiet_config())
                .transport(Arc::new(hub.connect()))
                .clock(Arc::new(SystemClock))
                .storage(storage.clone())
                .build()
                .unwrap()
        };

        let first = build();
        first.initialize().await.unwrap();
        let (room, state) = first.create_new_room().await.unwrap();
        first.join_room(room.clone(), Some(state)).await.unwrap();
        first.deal("a").await.unwrap();
        first.stop().await;

        let second = build();
        second.initialize().await.unwrap();
        let saved = second.saved_room_state(&room).await.unwrap();
        assert_eq!(saved.issues.len(), 1);
        second.join_room(room, Some(saved)).await.unwrap();
        assert_eq!(second.role().await, Role::Dealer);
        assert_eq!(second.vote_state().await, VoteState::Voting);
    }

    #[tokio::test]
    async fn test_stop_closes_event_streams() {
        let hub = MemoryHub::new();
        let (game, _room) = dealer(&hub, quiet_config()).await;
        let mut events = game.subscribe().await;

        game.stop().await;

        assert!(matches!(events.recv().await, Some(GameEvent::StateChanged(_))));
        assert!(events.recv().await.is_none());
        assert_eq!(game.role().await, Role::Unset);
    }
}
