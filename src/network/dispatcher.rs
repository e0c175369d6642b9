//! Message Dispatch
//!
//! Routes decoded messages by role and applies them to state. A player only
//! takes snapshots; a dealer only takes presence and votes. That split keeps
//! exactly one writer for the canonical state. Nothing here fails loudly:
//! a rejected message is stale or misdirected traffic and is merely logged
//! by the caller.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::clock::Millis;
use crate::game::presence::{self, PresenceChange};
use crate::game::state::{Deck, IssueId, Player, PlayerId, State, VoteState, VoteValue};
use crate::network::protocol::{Message, VoteMessage};

/// Role of the local engine in its room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Not in a room.
    Unset,
    /// Owns the canonical state.
    Dealer,
    /// Mirrors the dealer's snapshots.
    Player,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Unset => "unset",
            Role::Dealer => "dealer",
            Role::Player => "player",
        };
        f.write_str(name)
    }
}

/// Whether a peer in `role` processes `message` at all.
pub fn accepts(role: Role, message: &Message) -> bool {
    match (role, message) {
        (Role::Player, Message::State(_)) => true,
        (Role::Dealer, Message::PlayerOnline(_))
        | (Role::Dealer, Message::PlayerOffline(_))
        | (Role::Dealer, Message::PlayerVote(_)) => true,
        _ => false,
    }
}

// =============================================================================
// SNAPSHOTS (player side)
// =============================================================================

/// Result of offering a snapshot to a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Snapshot replaces the local state.
    Replace {
        /// The active issue differs from the previous snapshot's.
        issue_changed: bool,
    },
    /// Snapshot is older than the one already held.
    Stale,
}

/// Decide whether `incoming` replaces `current`, normalizing it in place.
pub fn accept_snapshot(current: Option<&State>, incoming: &mut State) -> SnapshotOutcome {
    if incoming.deck.is_empty() {
        incoming.deck = Deck::default();
    }
    match current {
        Some(current) if incoming.timestamp < current.timestamp => SnapshotOutcome::Stale,
        Some(current) => SnapshotOutcome::Replace {
            issue_changed: current.active_issue != incoming.active_issue,
        },
        None => SnapshotOutcome::Replace { issue_changed: true },
    }
}

// =============================================================================
// PRESENCE (dealer side)
// =============================================================================

/// Apply a heartbeat. Returns whether the state changed observably.
pub fn apply_player_online(state: &mut State, player: &Player, now: Millis) -> bool {
    presence::mark_online(state, player, now) != PresenceChange::Refreshed
}

/// Apply a goodbye. Returns whether the state changed.
pub fn apply_player_offline(state: &mut State, id: &PlayerId) -> bool {
    presence::mark_offline(state, id)
}

// =============================================================================
// VOTES (dealer side)
// =============================================================================

/// Latest vote timestamp applied per (issue, player), retractions included.
///
/// A retraction deletes the vote entry, so without this record an older vote
/// delivered after the retraction would resurrect it.
#[derive(Debug, Default, Clone)]
pub struct VoteLedger {
    latest: BTreeMap<(IssueId, PlayerId), Millis>,
}

impl VoteLedger {
    fn latest(&self, issue: IssueId, player: PlayerId) -> Option<Millis> {
        self.latest.get(&(issue, player)).copied()
    }

    fn record(&mut self, issue: IssueId, player: PlayerId, timestamp: Millis) {
        self.latest.insert((issue, player), timestamp);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.latest.clear();
    }
}

/// Accepted vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteApplied {
    /// Vote stored or replaced.
    Stored,
    /// Existing vote removed.
    Retracted,
    /// Retraction of a vote that does not exist.
    NothingToRetract,
}

impl VoteApplied {
    /// Whether the state changed.
    pub fn changed(self) -> bool {
        !matches!(self, VoteApplied::NothingToRetract)
    }
}

/// Why a vote was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteRejection {
    /// Round is not collecting votes.
    NotVoting(VoteState),
    /// Value is not a card of the deck.
    NotInDeck(VoteValue),
    /// Vote targets another issue than the active one.
    WrongIssue {
        /// Issue in the message.
        voted: IssueId,
        /// Currently active issue.
        active: Option<IssueId>,
    },
    /// A vote at least as recent was already applied.
    Stale {
        /// Timestamp already applied.
        applied: Millis,
        /// Timestamp of the message.
        incoming: Millis,
    },
}

impl fmt::Display for VoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteRejection::NotVoting(state) => write!(f, "vote state is {}", state),
            VoteRejection::NotInDeck(value) => write!(f, "value {:?} is not in the deck", value.as_str()),
            VoteRejection::WrongIssue { voted, active } => match active {
                Some(active) => write!(f, "vote for {} while {} is active", voted, active),
                None => write!(f, "vote for {} while idle", voted),
            },
            VoteRejection::Stale { applied, incoming } => {
                write!(f, "timestamp {} is not newer than {}", incoming, applied)
            }
        }
    }
}

/// Apply a vote with last-write-wins on the sender timestamp.
pub fn apply_player_vote(
    state: &mut State,
    ledger: &mut VoteLedger,
    msg: &VoteMessage,
) -> Result<VoteApplied, VoteRejection> {
    let vote_state = state.vote_state();
    if vote_state != VoteState::Voting {
        return Err(VoteRejection::NotVoting(vote_state));
    }
    if let Some(value) = &msg.vote.value {
        if !state.deck.contains(value) {
            return Err(VoteRejection::NotInDeck(value.clone()));
        }
    }
    if state.active_issue != Some(msg.issue) {
        return Err(VoteRejection::WrongIssue {
            voted: msg.issue,
            active: state.active_issue,
        });
    }

    let issue = match state.active_mut() {
        Some(issue) => issue,
        None => {
            return Err(VoteRejection::WrongIssue { voted: msg.issue, active: None });
        }
    };

    let stored = issue.votes.get(&msg.player_id).map(|v| v.timestamp);
    let applied = stored.max(ledger.latest(msg.issue, msg.player_id));
    if let Some(applied) = applied {
        if msg.vote.timestamp <= applied {
            return Err(VoteRejection::Stale { applied, incoming: msg.vote.timestamp });
        }
    }
    ledger.record(msg.issue, msg.player_id, msg.vote.timestamp);

    match msg.vote.value {
        Some(_) => {
            issue.votes.insert(msg.player_id, msg.vote.clone());
            Ok(VoteApplied::Stored)
        }
        None if issue.votes.remove(&msg.player_id).is_some() => Ok(VoteApplied::Retracted),
        None => Ok(VoteApplied::NothingToRetract),
    }
}
