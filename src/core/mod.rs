//! Core primitives shared by every layer: time and room identity.

pub mod clock;
pub mod room;

// Re-export core types
pub use clock::{Clock, ManualClock, Millis, MonotonicStamp, SystemClock};
pub use room::{Room, RoomError, RoomId};
