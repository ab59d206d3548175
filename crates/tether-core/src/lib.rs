//! tether-core: Shared protocol library for the tether relay.
//!
//! Provides the error taxonomy, signed session tokens (mint/verify),
//! frame classification, and the JSON control vocabulary the relay emits.

pub mod error;
pub mod frame;
pub mod token;

// Re-export commonly used items at crate root.
pub use error::{RelayError, RelayResult};
pub use frame::{classify, inject_seq, peer_error, throttle_event, FrameKind};
pub use token::{mint_token, verify_token, Claims};
