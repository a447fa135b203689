//! Protocol Module
//!
//! The coherence protocol core: wire messages, the per-instance write and
//! receive paths, and reconnection reconciliation.

mod coherence;
mod message;
mod reconnect;

// Re-export public types
pub use coherence::{CoherenceProtocol, InvalidateListener, ListenerId};
pub use message::{CoherenceMessage, MessageEntry, MessageKind};
pub use reconnect::ReconnectionHandler;
