//! Network Layer
//!
//! Wire messages, role-based dispatch, and the pub/sub transport contract.
//! Delivery is best effort; convergence comes from timestamps, not ordering.

pub mod dispatcher;
pub mod protocol;
pub mod transport;

pub use dispatcher::Role;
pub use protocol::{Message, PlayerMessage, ProtocolError, StateMessage, VoteMessage};
pub use transport::{MemoryHub, MemoryTransport, Subscription, Transport, TransportError};
