//! Turn/outcome state machine.
//!
//! A `TurnSession` holds the character's mood, the departure risk and the turn counter.
//! Each accepted player message produces exactly one `TurnDecision` (from the decision
//! source, or synthesised by an instant override) which `apply_turn_result` folds into a
//! new session value. Sessions are plain values: callers keep the old one on failure.
//!
//! Turn policy, applied by the caller before the decision is requested:
//!   - turns 1..=7   : open play
//!   - turns 8..=9   : escalation hint (remaining turns)
//!   - turn 10       : mandatory finale, see `enforce_turn_limit`

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{LevelContent, Mood};
use crate::error::TurnError;
use crate::util::contains_any_token;

pub const MAX_TURNS: u32 = 10;
pub const INITIAL_DEPARTURE_RISK: i32 = 50;
/// Risk strictly above this loses the finale; at or below wins it.
pub const OUTCOME_THRESHOLD: i32 = 50;
pub const ESCALATION_FROM_TURN: u32 = 8;
pub const RISK_MIN: i32 = 0;
pub const RISK_MAX: i32 = 100;

/// Secret words that make the character stay on the spot.
pub const VICTORY_TOKENS: &[&str] = &["youpi", "yay", "hooray"];
/// Insults about the character's non-magical origin; the character leaves on the spot.
pub const INSULT_TOKENS: &[&str] = &["moldu", "muggle"];

/// One structured decision for one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnDecision {
  pub mood: Mood,
  pub departure_risk: i32,
  pub game_over: bool,
  pub game_won: bool,
  pub suggested_actions: Vec<String>,
  /// Character reply, opaque to the engine; goes to the conversation log.
  pub reply: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Won,
  Lost,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnSession {
  pub turn_number: u32,
  pub departure_risk: i32,
  pub mood: Mood,
  pub game_over: bool,
  pub game_won: bool,
  pub suggested_actions: Vec<String>,
  /// Highest risk reached so far (achievement input).
  pub peak_departure_risk: i32,
}

impl TurnSession {
  pub fn new(mood: Mood, suggested_actions: Vec<String>) -> Self {
    Self {
      turn_number: 0,
      departure_risk: INITIAL_DEPARTURE_RISK,
      mood,
      game_over: false,
      game_won: false,
      suggested_actions,
      peak_departure_risk: INITIAL_DEPARTURE_RISK,
    }
  }

  /// Seed a session from level content, using `fallback_actions` when the level has none.
  pub fn from_content(content: &LevelContent, fallback_actions: &[String]) -> Self {
    let actions = if content.suggested_actions.is_empty() {
      fallback_actions.to_vec()
    } else {
      content.suggested_actions.clone()
    };
    Self::new(content.initial_mood.unwrap_or_default(), actions)
  }

  pub fn is_terminal(&self) -> bool {
    self.game_over || self.game_won
  }

  pub fn outcome(&self) -> Option<Outcome> {
    if self.game_won {
      Some(Outcome::Won)
    } else if self.game_over {
      Some(Outcome::Lost)
    } else {
      None
    }
  }

  /// Turn number the next accepted message will carry.
  pub fn next_turn(&self) -> u32 {
    self.turn_number + 1
  }
}

/// Phase of a given turn number, used to build the turn instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
  Open,
  Escalation { remaining: u32 },
  Finale,
}

pub fn turn_phase(turn: u32) -> TurnPhase {
  if turn >= MAX_TURNS {
    TurnPhase::Finale
  } else if turn >= ESCALATION_FROM_TURN {
    TurnPhase::Escalation { remaining: MAX_TURNS - turn }
  } else {
    TurnPhase::Open
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOverride {
  Victory,
  Defeat,
}

/// Scan the player's raw text for instant-outcome tokens.
/// The insult wins when both kinds appear in one message.
pub fn detect_override(text: &str) -> Option<TurnOverride> {
  if contains_any_token(text, INSULT_TOKENS) {
    Some(TurnOverride::Defeat)
  } else if contains_any_token(text, VICTORY_TOKENS) {
    Some(TurnOverride::Victory)
  } else {
    None
  }
}

/// Decision that replaces the upstream one when an override fired.
pub fn override_decision(kind: TurnOverride, reply: String) -> TurnDecision {
  match kind {
    TurnOverride::Victory => TurnDecision {
      mood: Mood::Happy,
      departure_risk: RISK_MIN,
      game_over: false,
      game_won: true,
      suggested_actions: Vec::new(),
      reply,
    },
    TurnOverride::Defeat => TurnDecision {
      mood: Mood::Angry,
      departure_risk: RISK_MAX,
      game_over: true,
      game_won: false,
      suggested_actions: Vec::new(),
      reply,
    },
  }
}

pub fn clamp_risk(risk: i32) -> i32 {
  risk.clamp(RISK_MIN, RISK_MAX)
}

/// Force a conclusion on the finale turn when the decision did not pick one.
pub fn enforce_turn_limit(mut decision: TurnDecision, turn: u32) -> TurnDecision {
  if turn >= MAX_TURNS && !decision.game_over && !decision.game_won {
    let risk = clamp_risk(decision.departure_risk);
    decision.game_over = risk > OUTCOME_THRESHOLD;
    decision.game_won = risk <= OUTCOME_THRESHOLD;
    debug!(target: "turn", turn, risk, won = decision.game_won, "Finale forced a conclusion");
  }
  decision
}

/// Fold one decision into the session, returning the next session value.
///
/// Risk is clamped to `[0, 100]`, the turn counter advances by one and the finale rule is
/// re-checked so a session can never outlive `MAX_TURNS`. When a decision carries both
/// terminal flags the risk threshold picks the outcome.
#[instrument(level = "debug", target = "turn", skip_all, fields(turn = session.turn_number, risk_in = decision.departure_risk))]
pub fn apply_turn_result(session: &TurnSession, decision: &TurnDecision) -> Result<TurnSession, TurnError> {
  if session.is_terminal() {
    return Err(TurnError::AlreadyTerminal);
  }

  let turn_number = (session.turn_number + 1).min(MAX_TURNS);
  let decision = enforce_turn_limit(decision.clone(), turn_number);
  let risk = clamp_risk(decision.departure_risk);

  let (game_over, game_won) = if decision.game_over && decision.game_won {
    (risk > OUTCOME_THRESHOLD, risk <= OUTCOME_THRESHOLD)
  } else {
    (decision.game_over, decision.game_won)
  };

  let next = TurnSession {
    turn_number,
    departure_risk: risk,
    mood: decision.mood,
    game_over,
    game_won,
    suggested_actions: decision.suggested_actions,
    peak_departure_risk: session.peak_departure_risk.max(risk),
  };
  debug!(target: "turn", turn = next.turn_number, risk = next.departure_risk, mood = ?next.mood, over = next.game_over, won = next.game_won, "Turn applied");
  Ok(next)
}
