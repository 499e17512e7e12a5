//! Error taxonomy for the game core and its collaborators.
//!
//! Challenge failure causes are not errors; they live in `challenge::validator::FailureReason`.
//! Unknown level ids in progression are silent no-ops and have no variant here.

use thiserror::Error;

/// Rejections from the turn state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
  #[error("session already finished; turn ignored")]
  AlreadyTerminal,
  #[error("a turn is already in flight for this session")]
  TurnInFlight,
}

/// Failures while obtaining a decision from the upstream source.
/// All of them are retryable and leave the session untouched.
#[derive(Debug, Error)]
pub enum DecisionError {
  #[error("decision source transport error: {0}")]
  Transport(String),
  #[error("decision source HTTP {status}: {message}")]
  Http { status: u16, message: String },
  /// Malformed or missing fields in the structured decision.
  #[error("malformed decision: {0}")]
  Parse(String),
  #[error("decision source unavailable: {0}")]
  Unavailable(String),
}

impl From<reqwest::Error> for DecisionError {
  fn from(e: reqwest::Error) -> Self {
    DecisionError::Transport(e.to_string())
  }
}

impl From<serde_json::Error> for DecisionError {
  fn from(e: serde_json::Error) -> Self {
    DecisionError::Parse(e.to_string())
  }
}

/// Persistence collaborator failures. Callers degrade to the next level source.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store payload error: {0}")]
  Payload(#[from] serde_json::Error),
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

/// Errors surfaced by the game orchestration layer.
#[derive(Debug, Error)]
pub enum GameError {
  #[error(transparent)]
  Turn(#[from] TurnError),
  #[error(transparent)]
  Decision(#[from] DecisionError),
  #[error("unknown session: {0}")]
  UnknownSession(String),
  #[error("unknown level: {0}")]
  UnknownLevel(String),
  #[error("level is locked: {0}")]
  LevelLocked(String),
  #[error("a challenge is already running for this session")]
  ChallengeRunning,
  #[error("no challenge running for this session")]
  NoChallenge,
  #[error("no challenge was offered for this session")]
  ChallengeNotOffered,
}

impl GameError {
  /// Whether the player may resubmit the same action.
  pub fn is_retryable(&self) -> bool {
    matches!(self, GameError::Decision(_) | GameError::Turn(TurnError::TurnInFlight))
  }
}
