//! Protocol Messages
//!
//! Wire format shared by every peer of a room. Messages are JSON objects
//! tagged by `type`; field names are part of the compatibility surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::clock::Millis;
use crate::game::state::{IssueId, Player, PlayerId, State, VoteResult};

// =============================================================================
// MESSAGES
// =============================================================================

/// Every message exchanged on a room topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Full snapshot, dealer to everyone.
    #[serde(rename = "__state")]
    State(StateMessage),

    /// Presence heartbeat, anyone to dealer.
    #[serde(rename = "__player_online")]
    PlayerOnline(PlayerMessage),

    /// Presence goodbye, anyone to dealer.
    #[serde(rename = "__player_left")]
    PlayerOffline(PlayerMessage),

    /// Vote or vote retraction, anyone to dealer.
    #[serde(rename = "__player_vote")]
    PlayerVote(VoteMessage),
}

/// Snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    /// Sender time.
    pub updated_at: Millis,
    /// The (redacted) state.
    pub state: State,
}

/// Presence payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMessage {
    /// Sender time.
    pub updated_at: Millis,
    /// The sender.
    pub player: Player,
}

/// Vote payload. A vote without value retracts the sender's vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMessage {
    /// Sender time.
    pub updated_at: Millis,
    /// Voter.
    pub player_id: PlayerId,
    /// Issue voted on.
    pub issue: IssueId,
    /// The vote.
    pub vote: VoteResult,
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Message {
    /// Snapshot message.
    pub fn state(state: State, now: Millis) -> Self {
        Message::State(StateMessage { updated_at: now, state })
    }

    /// Heartbeat message.
    pub fn player_online(player: Player, now: Millis) -> Self {
        Message::PlayerOnline(PlayerMessage { updated_at: now, player })
    }

    /// Goodbye message.
    pub fn player_offline(mut player: Player, now: Millis) -> Self {
        player.online = false;
        Message::PlayerOffline(PlayerMessage { updated_at: now, player })
    }

    /// Vote message.
    pub fn player_vote(player_id: PlayerId, issue: IssueId, vote: VoteResult, now: Millis) -> Self {
        Message::PlayerVote(VoteMessage {
            updated_at: now,
            player_id,
            issue,
            vote,
        })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::State(_) => "state",
            Message::PlayerOnline(_) => "player_online",
            Message::PlayerOffline(_) => "player_offline",
            Message::PlayerVote(_) => "player_vote",
        }
    }

    /// Sender-side timestamp carried by every message.
    pub fn updated_at(&self) -> Millis {
        match self {
            Message::State(m) => m.updated_at,
            Message::PlayerOnline(m) | Message::PlayerOffline(m) => m.updated_at,
            Message::PlayerVote(m) => m.updated_at,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
