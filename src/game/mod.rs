//! Game Module
//!
//! Planning poker rules and the engine that runs them.
//!
//! ## Module Structure
//!
//! - `state`: Players, issues, votes, deck and the replicated room state
//! - `engine`: Dealer/player engine, the only writer of state
//! - `hint`: Consensus hint computed on reveal
//! - `presence`: Heartbeat bookkeeping and offline sweep
//! - `autoreveal`: Debounced reveal once everyone voted
//! - `events`: Local fan-out to UI subscribers
//! - `config`: Engine tunables

pub mod autoreveal;
pub mod config;
pub mod engine;
pub mod events;
pub mod hint;
pub mod presence;
pub mod state;

// Re-export key types
pub use config::GameConfig;
pub use engine::{Game, GameBuilder, GameError};
pub use events::{EventStream, GameEvent};
pub use hint::{Hint, HintError};
pub use state::{
    Deck, Issue, IssueId, Player, PlayerId, State, VoteResult, VoteState, VoteStatus, VoteValue,
};
