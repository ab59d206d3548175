//! Per-session state: the actor, replay ring, and rate limiter.

pub mod actor;
pub mod rate;
pub mod ring;

pub use actor::{Role, SessionActor};
pub use rate::RateLimiter;
pub use ring::Ring;
