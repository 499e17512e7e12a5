//! Spell challenges: a timed circle-tracing mini-game that may interrupt a conversation.

pub mod kinds;
pub mod runner;
pub mod validator;

pub use kinds::{ChallengeKind, ChallengeSpec};
pub use runner::{spawn_challenge, ChallengeHandle};
pub use validator::{ChallengeEvent, ChallengePhase, ChallengeResult, ChallengeSession, CircleGeometry, PointerSample};
