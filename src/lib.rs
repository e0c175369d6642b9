//! # Planning Poker
//!
//! Peer-to-peer planning poker over a room-scoped pub/sub transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PLANNING POKER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── clock.rs    - Clock trait, monotonic stamps             │
//! │  └── room.rs     - Room key, topic id, share token           │
//! │                                                              │
//! │  game/           - Rules and engine                          │
//! │  ├── state.rs    - Players, issues, votes, deck              │
//! │  ├── engine.rs   - Dealer/player engine                      │
//! │  ├── hint.rs     - Consensus hint                            │
//! │  ├── presence.rs - Heartbeats and offline sweep              │
//! │  ├── autoreveal.rs - Debounced auto-reveal                   │
//! │  ├── events.rs   - Local event fan-out                       │
//! │  └── config.rs   - Engine tunables                           │
//! │                                                              │
//! │  network/        - Messaging                                 │
//! │  ├── protocol.rs - Wire messages                             │
//! │  ├── dispatcher.rs - Role routing, LWW vote merge            │
//! │  └── transport.rs - Pub/sub contract, in-memory hub          │
//! │                                                              │
//! │  storage/        - Identity and dealer state persistence     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! The dealer is the only writer of a room's state:
//! - Players send presence and votes; the dealer applies them
//! - The dealer publishes a full snapshot after every change
//! - Vote values stay hidden in snapshots until reveal
//! - Votes merge last-write-wins on the sender's timestamp
//!
//! Messages may arrive late, twice or out of order. Snapshots and votes both
//! carry timestamps, so replicas converge regardless.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::room::{Room, RoomId};
pub use game::engine::{Game, GameBuilder, GameError};
pub use game::state::{Deck, PlayerId, State, VoteState, VoteValue};
pub use network::transport::{MemoryHub, Transport};
pub use storage::{JsonFileStorage, MemoryStorage, Storage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
