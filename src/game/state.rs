//! Game State Definitions
//!
//! The replicated unit is [`State`]: players, issues in deal order, the
//! active issue, the reveal flag and the deck. The dealer owns the canonical
//! copy; every other peer holds the last snapshot it received.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::core::clock::Millis;
use crate::game::hint::Hint;

// =============================================================================
// IDS
// =============================================================================

/// Unique player identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique issue identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub Uuid);

impl IssueId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// A participant of the room. Never removed, only marked offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Player id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Whether the dealer currently considers the player alive.
    pub online: bool,
    /// Last heartbeat observed by the dealer.
    #[serde(rename = "onlineTimestampMs")]
    pub last_seen_at: Millis,
}

impl Player {
    /// Create an online player.
    pub fn new(id: PlayerId, name: impl Into<String>, now: Millis) -> Self {
        Self {
            id,
            name: name.into(),
            online: true,
            last_seen_at: now,
        }
    }
}

// =============================================================================
// VOTES
// =============================================================================

/// A single deck token, e.g. `"5"` or `"?"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteValue(pub String);

impl VoteValue {
    /// Create from any string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoteValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A cast vote. `value == None` means the vote exists but its value is hidden
/// (redacted snapshot) or, inside a vote message, that the vote is retracted.
///
/// On the wire the hidden value is an empty `estimation` string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    /// Estimation, if visible.
    #[serde(rename = "estimation", with = "hidden_value")]
    pub value: Option<VoteValue>,
    /// Sender-side timestamp used for last-write-wins.
    pub timestamp: Millis,
}

impl VoteResult {
    /// Visible vote.
    pub fn new(value: VoteValue, timestamp: Millis) -> Self {
        Self { value: Some(value), timestamp }
    }

    /// Vote whose value is withheld.
    pub fn hidden(timestamp: Millis) -> Self {
        Self { value: None, timestamp }
    }

    /// Copy with the value withheld, timestamp kept.
    pub fn redacted(&self) -> Self {
        Self::hidden(self.timestamp)
    }
}

mod hidden_value {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<VoteValue>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_ref().map(VoteValue::as_str).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<VoteValue>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        Ok(if raw.is_empty() { None } else { Some(VoteValue(raw)) })
    }
}

/// What is known about one player's vote on one issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteStatus {
    /// No vote entry.
    NotVoted,
    /// Voted, value withheld.
    Hidden {
        /// Vote timestamp.
        timestamp: Millis,
    },
    /// Voted, value known.
    Visible {
        /// Estimation.
        value: VoteValue,
        /// Vote timestamp.
        timestamp: Millis,
    },
}

// =============================================================================
// DECK
// =============================================================================

/// Value excluded from consensus computations.
pub const UNCERTAIN_VALUE: &str = "?";

/// Deck validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeckError {
    /// Deck has no values.
    #[error("deck is empty")]
    Empty,
    /// A value is blank.
    #[error("deck contains an empty value")]
    EmptyValue,
    /// A value appears twice.
    #[error("deck contains duplicate value {0:?}")]
    Duplicate(String),
}

/// Ordered set of allowed estimations. Order is significant: the hint engine
/// measures distance in deck positions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deck(Vec<VoteValue>);

impl Deck {
    /// Validate and build a deck.
    pub fn new(values: Vec<VoteValue>) -> Result<Self, DeckError> {
        if values.is_empty() {
            return Err(DeckError::Empty);
        }
        for (i, value) in values.iter().enumerate() {
            if value.as_str().trim().is_empty() {
                return Err(DeckError::EmptyValue);
            }
            if values[..i].contains(value) {
                return Err(DeckError::Duplicate(value.0.clone()));
            }
        }
        Ok(Self(values))
    }

    /// Parse a comma separated list, e.g. `"1,2,3,5,?"`.
    pub fn parse(list: &str) -> Result<Self, DeckError> {
        Self::new(list.split(',').map(|v| VoteValue::new(v.trim())).collect())
    }

    /// Fibonacci-like deck (the default).
    pub fn fibonacci() -> Self {
        Self(
            ["1", "2", "3", "5", "8", "13", "21", "34", UNCERTAIN_VALUE]
                .into_iter()
                .map(VoteValue::from)
                .collect(),
        )
    }

    /// T-shirt sizes.
    pub fn tshirt() -> Self {
        Self(
            ["XS", "S", "M", "L", "XL", "XXL", UNCERTAIN_VALUE]
                .into_iter()
                .map(VoteValue::from)
                .collect(),
        )
    }

    /// Whether `value` is one of the deck's cards.
    pub fn contains(&self, value: &VoteValue) -> bool {
        self.0.contains(value)
    }

    /// Position of `value` in the deck.
    pub fn index_of(&self, value: &VoteValue) -> Option<usize> {
        self.0.iter().position(|v| v == value)
    }

    /// Card at `index`.
    pub fn get(&self, index: usize) -> Option<&VoteValue> {
        self.0.get(index)
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the deck has no cards. Only possible for decoded snapshots.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the cards.
    pub fn iter(&self) -> impl Iterator<Item = &VoteValue> {
        self.0.iter()
    }
}

impl Default for Deck {
    fn default() -> Self {
        Self::fibonacci()
    }
}

// =============================================================================
// ISSUE
// =============================================================================

/// An estimable work item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Issue id.
    pub id: IssueId,
    /// Title or link.
    pub title_or_url: String,
    /// Votes keyed by player.
    #[serde(default)]
    pub votes: BTreeMap<PlayerId, VoteResult>,
    /// Final estimation, set by the dealer on finish.
    #[serde(default)]
    pub result: Option<VoteValue>,
    /// Consensus hint, computed once votes are revealed.
    #[serde(default)]
    pub hint: Option<Hint>,
}

impl Issue {
    /// New issue with no votes.
    pub fn new(title_or_url: impl Into<String>) -> Self {
        Self {
            id: IssueId::generate(),
            title_or_url: title_or_url.into(),
            votes: BTreeMap::new(),
            result: None,
            hint: None,
        }
    }

    /// Tri-state view of one player's vote.
    pub fn vote_status(&self, player: &PlayerId) -> VoteStatus {
        match self.votes.get(player) {
            None => VoteStatus::NotVoted,
            Some(VoteResult { value: None, timestamp }) => VoteStatus::Hidden { timestamp: *timestamp },
            Some(VoteResult { value: Some(value), timestamp }) => VoteStatus::Visible {
                value: value.clone(),
                timestamp: *timestamp,
            },
        }
    }

    /// Forget votes, result and hint.
    pub fn reset(&mut self) {
        self.votes.clear();
        self.result = None;
        self.hint = None;
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Phase of the active round, derived from the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteState {
    /// No active issue.
    Idle,
    /// Votes are being collected and are hidden.
    Voting,
    /// Votes are visible.
    Revealed,
    /// The active issue has a result.
    Finished,
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoteState::Idle => "idle",
            VoteState::Voting => "voting",
            VoteState::Revealed => "revealed",
            VoteState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// The replicated room state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// All players ever seen, in join order.
    pub players: Vec<Player>,
    /// Issues in deal order.
    pub issues: Vec<Issue>,
    /// Issue currently being estimated.
    #[serde(default)]
    pub active_issue: Option<IssueId>,
    /// Whether votes on the active issue are visible.
    #[serde(default)]
    pub votes_revealed: bool,
    /// Allowed estimations. Older snapshots omit it.
    #[serde(default)]
    pub deck: Deck,
    /// Dealer-side time of the last commit.
    #[serde(default)]
    pub timestamp: Millis,
}

impl State {
    /// Fresh state with a single player.
    pub fn new(owner: Player, now: Millis) -> Self {
        Self {
            players: vec![owner],
            issues: Vec::new(),
            active_issue: None,
            votes_revealed: false,
            deck: Deck::default(),
            timestamp: now,
        }
    }

    /// Current phase.
    pub fn vote_state(&self) -> VoteState {
        match self.active() {
            None => VoteState::Idle,
            Some(issue) if issue.result.is_some() => VoteState::Finished,
            Some(_) if self.votes_revealed => VoteState::Revealed,
            Some(_) => VoteState::Voting,
        }
    }

    /// The active issue.
    pub fn active(&self) -> Option<&Issue> {
        let id = self.active_issue?;
        self.issue(&id)
    }

    /// Mutable active issue.
    pub fn active_mut(&mut self) -> Option<&mut Issue> {
        let id = self.active_issue?;
        self.issues.iter_mut().find(|i| i.id == id)
    }

    /// Issue by id.
    pub fn issue(&self, id: &IssueId) -> Option<&Issue> {
        self.issues.iter().find(|i| &i.id == id)
    }

    /// Player by id.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    /// Mutable player by id.
    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    /// Whether an issue with this title already exists.
    pub fn has_issue_titled(&self, title: &str) -> bool {
        self.issues.iter().any(|i| i.title_or_url == title)
    }

    /// Activate the issue at `index`, clearing its votes and result.
    pub fn activate(&mut self, index: usize) -> Option<IssueId> {
        let issue = self.issues.get_mut(index)?;
        issue.reset();
        self.active_issue = Some(issue.id);
        self.votes_revealed = false;
        Some(issue.id)
    }

    /// First issue without a result, excluding `skip`.
    pub fn next_undealt(&self, skip: &IssueId) -> Option<usize> {
        self.issues
            .iter()
            .position(|i| &i.id != skip && i.result.is_none())
    }

    /// Whether every known player has a vote entry on the active issue.
    pub fn all_players_voted(&self) -> bool {
        match self.active() {
            Some(issue) => !self.players.is_empty() && issue.votes.len() == self.players.len(),
            None => false,
        }
    }

    /// Copy safe to hand out while voting is open: vote values of the active
    /// issue are withheld, counts and timestamps stay visible.
    pub fn redacted(&self) -> State {
        let mut copy = self.clone();
        if copy.vote_state() == VoteState::Voting {
            if let Some(issue) = copy.active_mut() {
                for vote in issue.votes.values_mut() {
                    *vote = vote.redacted();
                }
            }
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_issue() -> State {
        let owner = Player::new(PlayerId::generate(), "dealer", 0);
        let mut state = State::new(owner, 0);
        state.issues.push(Issue::new("a"));
        state.issues.push(Issue::new("b"));
        state
    }

    #[test]
    fn test_vote_state_derivation() {
        let mut state = state_with_issue();
        assert_eq!(state.vote_state(), VoteState::Idle);

        state.activate(0).unwrap();
        assert_eq!(state.vote_state(), VoteState::Voting);

        state.votes_revealed = true;
        assert_eq!(state.vote_state(), VoteState::Revealed);

        state.active_mut().unwrap().result = Some("3".into());
        assert_eq!(state.vote_state(), VoteState::Finished);
    }

    #[test]
    fn test_activate_clears_votes_and_result() {
        let mut state = state_with_issue();
        let voter = state.players[0].id;
        state.issues[1].votes.insert(voter, VoteResult::new("5".into(), 10));
        state.issues[1].result = Some("5".into());
        state.votes_revealed = true;

        let id = state.activate(1).unwrap();
        assert_eq!(state.active_issue, Some(id));
        assert!(state.issues[1].votes.is_empty());
        assert!(state.issues[1].result.is_none());
        assert!(!state.votes_revealed);
        assert!(state.activate(7).is_none());
    }

    #[test]
    fn test_redaction_hides_values_only_while_voting() {
        let mut state = state_with_issue();
        let voter = state.players[0].id;
        state.activate(0).unwrap();
        state.active_mut().unwrap().votes.insert(voter, VoteResult::new("8".into(), 77));

        let hidden = state.redacted();
        let vote = &hidden.active().unwrap().votes[&voter];
        assert_eq!(vote.value, None);
        assert_eq!(vote.timestamp, 77);
        assert_eq!(hidden.active().unwrap().vote_status(&voter), VoteStatus::Hidden { timestamp: 77 });

        state.votes_revealed = true;
        let shown = state.redacted();
        assert_eq!(shown.active().unwrap().votes[&voter].value, Some("8".into()));
    }

    #[test]
    fn test_vote_status_tri_state() {
        let mut issue = Issue::new("x");
        let a = PlayerId::generate();
        let b = PlayerId::generate();
        let c = PlayerId::generate();
        issue.votes.insert(a, VoteResult::hidden(1));
        issue.votes.insert(b, VoteResult::new("2".into(), 2));

        assert_eq!(issue.vote_status(&a), VoteStatus::Hidden { timestamp: 1 });
        assert_eq!(
            issue.vote_status(&b),
            VoteStatus::Visible { value: "2".into(), timestamp: 2 }
        );
        assert_eq!(issue.vote_status(&c), VoteStatus::NotVoted);
    }

    #[test]
    fn test_hidden_vote_wire_format() {
        let json = serde_json::to_string(&VoteResult::hidden(5)).unwrap();
        assert_eq!(json, r#"{"estimation":"","timestamp":5}"#);

        let parsed: VoteResult = serde_json::from_str(r#"{"estimation":"13","timestamp":9}"#).unwrap();
        assert_eq!(parsed, VoteResult::new("13".into(), 9));

        let parsed: VoteResult = serde_json::from_str(r#"{"estimation":"","timestamp":9}"#).unwrap();
        assert_eq!(parsed.value, None);
    }

    #[test]
    fn test_deck_validation() {
        assert_eq!(Deck::new(vec![]), Err(DeckError::Empty));
        assert_eq!(Deck::parse("1, ,3"), Err(DeckError::EmptyValue));
        assert_eq!(Deck::parse("1,2,1"), Err(DeckError::Duplicate("1".into())));

        let deck = Deck::parse("S, M, L").unwrap();
        assert_eq!(deck.len(), 3);
        assert_eq!(deck.index_of(&"M".into()), Some(1));
        assert!(!deck.contains(&"XL".into()));
    }

    #[test]
    fn test_missing_deck_falls_back_to_default() {
        let owner = Player::new(PlayerId::generate(), "dealer", 0);
        let mut json = serde_json::to_value(State::new(owner, 0)).unwrap();
        json.as_object_mut().unwrap().remove("deck");

        let state: State = serde_json::from_value(json).unwrap();
        assert_eq!(state.deck, Deck::fibonacci());
    }

    #[test]
    fn test_all_players_voted_counts_entries() {
        let mut state = state_with_issue();
        let first = state.players[0].id;
        let second = PlayerId::generate();
        state.players.push(Player::new(second, "p2", 0));
        state.activate(0).unwrap();
        assert!(!state.all_players_voted());

        state.active_mut().unwrap().votes.insert(first, VoteResult::new("1".into(), 1));
        assert!(!state.all_players_voted());

        state.active_mut().unwrap().votes.insert(second, VoteResult::new(UNCERTAIN_VALUE.into(), 1));
        assert!(state.all_players_voted());
    }
}
