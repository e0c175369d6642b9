//! Presence Tracking
//!
//! Peers heartbeat with `player_online`; the dealer records when it last heard
//! from each player and periodically flips silent players offline. There is
//! no required goodbye: a crashed peer simply stops heartbeating.

use tracing::debug;

use crate::core::clock::Millis;
use crate::game::state::{Player, PlayerId, State};

/// Outcome of applying a heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceChange {
    /// First time this player is seen.
    Joined,
    /// Known player came back online or was renamed.
    Updated,
    /// Only the last-seen time moved; nothing observable changed.
    Refreshed,
}

impl PresenceChange {
    /// Whether the change must be committed and broadcast.
    pub fn is_observable(self) -> bool {
        !matches!(self, PresenceChange::Refreshed)
    }
}

/// Record a heartbeat from `player` at dealer time `now`.
pub fn mark_online(state: &mut State, player: &Player, now: Millis) -> PresenceChange {
    let Some(known) = state.player_mut(&player.id) else {
        state.players.push(Player::new(player.id, player.name.clone(), now));
        return PresenceChange::Joined;
    };

    known.last_seen_at = known.last_seen_at.max(now);
    if !known.online || known.name != player.name {
        known.online = true;
        known.name = player.name.clone();
        return PresenceChange::Updated;
    }
    PresenceChange::Refreshed
}

/// Mark a player offline. Returns whether anything changed.
pub fn mark_offline(state: &mut State, id: &PlayerId) -> bool {
    match state.player_mut(id) {
        Some(player) if player.online => {
            player.online = false;
            true
        }
        _ => false,
    }
}

/// Flip every online player not heard from within `timeout` ms to offline.
/// Returns the ids that changed.
pub fn sweep_stale(state: &mut State, now: Millis, timeout: Millis) -> Vec<PlayerId> {
    let mut stale = Vec::new();
    for player in state.players.iter_mut() {
        if player.online && now - player.last_seen_at > timeout {
            player.online = false;
            debug!(player = %player.id, last_seen = player.last_seen_at, "player timed out");
            stale.push(player.id);
        }
    }
    stale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(Player::new(PlayerId::generate(), "dealer", 0), 0)
    }

    #[test]
    fn test_new_player_joins_online() {
        let mut state = state();
        let newcomer = Player::new(PlayerId::generate(), "ana", 0);

        assert_eq!(mark_online(&mut state, &newcomer, 500), PresenceChange::Joined);
        let stored = state.player(&newcomer.id).unwrap();
        assert!(stored.online);
        assert_eq!(stored.last_seen_at, 500);
        assert_eq!(state.players.len(), 2);
    }

    #[test]
    fn test_replayed_heartbeat_is_not_observable() {
        let mut state = state();
        let player = Player::new(PlayerId::generate(), "ana", 0);

        assert!(mark_online(&mut state, &player, 100).is_observable());
        let second = mark_online(&mut state, &player, 100);
        assert_eq!(second, PresenceChange::Refreshed);
        assert!(!second.is_observable());
        assert_eq!(state.players.len(), 2);
    }

    #[test]
    fn test_rename_and_return_are_observable() {
        let mut state = state();
        let mut player = Player::new(PlayerId::generate(), "ana", 0);
        mark_online(&mut state, &player, 100);

        player.name = "ana b.".into();
        assert_eq!(mark_online(&mut state, &player, 200), PresenceChange::Updated);
        assert_eq!(state.player(&player.id).unwrap().name, "ana b.");

        assert!(mark_offline(&mut state, &player.id));
        assert!(!mark_offline(&mut state, &player.id));
        assert_eq!(mark_online(&mut state, &player, 300), PresenceChange::Updated);
    }

    #[test]
    fn test_sweep_marks_only_stale_players() {
        let mut state = state();
        let dealer_player = state.players[0].clone();
        let dealer = dealer_player.id;
        let quiet = Player::new(PlayerId::generate(), "quiet", 0);
        let chatty = Player::new(PlayerId::generate(), "chatty", 0);
        mark_online(&mut state, &quiet, 1_000);
        mark_online(&mut state, &chatty, 1_000);
        mark_online(&mut state, &dealer_player, 1_000);

        mark_online(&mut state, &chatty, 15_000);
        mark_online(&mut state, &dealer_player, 15_000);

        let stale = sweep_stale(&mut state, 21_500, 20_000);
        assert_eq!(stale, vec![quiet.id]);
        assert!(!state.player(&quiet.id).unwrap().online);
        assert!(state.player(&chatty.id).unwrap().online);
        assert!(state.player(&dealer).unwrap().online);

        assert!(sweep_stale(&mut state, 21_500, 20_000).is_empty());
    }
}
