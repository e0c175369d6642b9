//! Engine Configuration

use std::time::Duration;

/// Tunables of the game engine.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Reveal automatically once every player voted.
    pub auto_reveal: bool,
    /// Debounce before an automatic reveal.
    pub auto_reveal_delay: Duration,
    /// How often each peer republishes its own presence.
    pub presence_interval: Duration,
    /// How often the dealer republishes the full state. `None` disables the
    /// periodic broadcast (snapshots still follow every change).
    pub state_interval: Option<Duration>,
    /// How often the dealer looks for silent players.
    pub sweep_interval: Duration,
    /// Silence after which a player is considered offline.
    pub offline_timeout: Duration,
    /// Publish through the encrypted transport variant.
    pub encryption: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            auto_reveal: false,
            auto_reveal_delay: Duration::from_secs(3),
            presence_interval: Duration::from_secs(5),
            state_interval: Some(Duration::from_secs(10)),
            sweep_interval: Duration::from_secs(1),
            offline_timeout: Duration::from_secs(20),
            encryption: true,
        }
    }
}

impl GameConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_reveal: env_flag("POKER_AUTO_REVEAL").unwrap_or(defaults.auto_reveal),
            auto_reveal_delay: env_millis("POKER_AUTO_REVEAL_DELAY_MS")
                .unwrap_or(defaults.auto_reveal_delay),
            presence_interval: env_millis("POKER_PRESENCE_INTERVAL_MS")
                .unwrap_or(defaults.presence_interval),
            state_interval: match env_millis("POKER_STATE_INTERVAL_MS") {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.state_interval,
            },
            sweep_interval: env_millis("POKER_SWEEP_INTERVAL_MS")
                .unwrap_or(defaults.sweep_interval),
            offline_timeout: env_millis("POKER_OFFLINE_TIMEOUT_MS")
                .unwrap_or(defaults.offline_timeout),
            encryption: env_flag("POKER_ENCRYPTION").unwrap_or(defaults.encryption),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v == "true" || v == "1")
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
