//! Game orchestration shared by the HTTP and WebSocket handlers.
//!
//! A turn goes through: pending check, instant override or decision source, finale forcing,
//! `apply_turn_result`, level completion on a win, challenge spawn roll, and a session
//! summary once the conversation is over. A failed decision leaves the session exactly as
//! it was so the player can resend the same message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::challenge::kinds::{random_kind, should_spawn, ChallengeKind};
use crate::challenge::validator::{ChallengeResult, ChallengeSession, CircleGeometry};
use crate::config::{GameConfig, LocalizedPrompts};
use crate::decision::DecisionRequest;
use crate::domain::{ChatMessage, Language, Level, LevelStatus};
use crate::error::{GameError, TurnError};
use crate::progression;
use crate::seeds::default_suggested_actions;
use crate::state::AppState;
use crate::turn::{
  apply_turn_result, detect_override, enforce_turn_limit, override_decision, turn_phase, Outcome, TurnDecision,
  TurnOverride, TurnPhase, TurnSession, MAX_TURNS,
};
use crate::util::{fill_template, same_phrase};

/// Wins faster than this earn `speed_runner`.
pub const SPEED_RUN_LIMIT: Duration = Duration::from_secs(300);
/// Peak risk a win must come back from to earn `comeback_kid`.
pub const COMEBACK_RISK: i32 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
  FirstWin,
  SpeedRunner,
  ComebackKid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
  Won,
  Lost,
  Abandoned,
}

impl From<Outcome> for SessionOutcome {
  fn from(o: Outcome) -> Self {
    match o {
      Outcome::Won => SessionOutcome::Won,
      Outcome::Lost => SessionOutcome::Lost,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
  pub session_id: String,
  pub level_id: String,
  pub outcome: SessionOutcome,
  pub final_risk: i32,
  pub turns: u32,
  pub duration_secs: u64,
  pub peak_risk: i32,
  pub xp_earned: u32,
  /// Achievements unlocked by this session (already-held ones are not repeated).
  pub achievements: Vec<Achievement>,
}

#[derive(Clone, Debug)]
pub struct GameSession {
  pub id: String,
  pub level_id: String,
  pub language: Language,
  pub turn: TurnSession,
  pub transcript: Vec<ChatMessage>,
  /// Set while a turn is being resolved. Shared by clones of the session.
  pub turn_pending: Arc<AtomicBool>,
  pub started_at: Instant,
  pub xp_earned: u32,
  /// Challenge rolled by the last turn and not yet started. Replaced on every turn.
  pub pending_challenge: Option<ChallengeKind>,
  pub challenge_active: bool,
  pub summary: Option<SessionSummary>,
}

impl GameSession {
  pub fn is_turn_pending(&self) -> bool {
    self.turn_pending.load(Ordering::Acquire)
  }

  pub fn start(level: &Level, language: Language) -> Self {
    let fallback = default_suggested_actions(language);
    let mut transcript = Vec::new();
    if let Some(opening) = level.content.initial_message.as_deref().filter(|m| !m.trim().is_empty()) {
      transcript.push(ChatMessage::assistant(opening));
    }
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      level_id: level.id.clone(),
      language,
      turn: TurnSession::from_content(&level.content, &fallback),
      transcript,
      turn_pending: Arc::new(AtomicBool::new(false)),
      started_at: Instant::now(),
      xp_earned: 0,
      pending_challenge: None,
      challenge_active: false,
      summary: None,
    }
  }
}

/// Claim on a session's pending-turn flag, released on drop. A turn future dropped
/// mid-decision releases it too.
struct PendingTurn(Arc<AtomicBool>);

impl PendingTurn {
  fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| Self(flag.clone()))
  }
}

impl Drop for PendingTurn {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Result of one accepted turn.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
  pub session_id: String,
  pub reply: String,
  pub turn: TurnSession,
  /// The player's text matched one of the suggestions offered for this turn.
  pub was_suggested: bool,
  pub risk_delta: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub overridden: Option<TurnOverride>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub outcome: Option<Outcome>,
  /// True only when this turn newly completed the level.
  pub level_completed: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub challenge: Option<ChallengeKind>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub summary: Option<SessionSummary>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelsOverview {
  pub levels: Vec<Level>,
  pub current_level_id: Option<String>,
  pub progress_percent: u8,
}

pub fn turn_instruction(prompts: &LocalizedPrompts, turn: u32) -> String {
  let turn_s = turn.to_string();
  let max_s = MAX_TURNS.to_string();
  match turn_phase(turn) {
    TurnPhase::Open => fill_template(&prompts.turn_open, &[("turn", &turn_s), ("max", &max_s)]),
    TurnPhase::Escalation { remaining } => fill_template(
      &prompts.turn_escalation,
      &[("turn", &turn_s), ("max", &max_s), ("remaining", &remaining.to_string())],
    ),
    TurnPhase::Finale => prompts.turn_finale.clone(),
  }
}

/// Character sheet, shared rules and the instruction for `turn`.
pub fn build_system_prompt(cfg: &GameConfig, level: &Level, language: Language, turn: u32) -> String {
  let prompts = cfg.prompts.for_language(language);
  let content = &level.content;
  let name = content.character.as_deref().unwrap_or(&level.title);
  let location = content.location.as_deref().unwrap_or("");
  let objective = content.objective.as_deref().unwrap_or(&level.description);
  let context = content.context.as_deref().unwrap_or("");

  let sheet = match cfg.character_for(name) {
    Some(character) => character.render(language, location, objective, context),
    None => fill_template(
      &prompts.generic_character,
      &[("name", name), ("location", location), ("objective", objective), ("context", context)],
    ),
  };
  format!("{}\n\n{}\n\n{}", sheet, prompts.common_rules, turn_instruction(prompts, turn))
}

/// Achievements a finished session qualifies for, before de-duplication.
pub fn earned_achievements(outcome: SessionOutcome, duration: Duration, peak_risk: i32) -> Vec<Achievement> {
  if outcome != SessionOutcome::Won {
    return Vec::new();
  }
  let mut out = vec![Achievement::FirstWin];
  if duration < SPEED_RUN_LIMIT {
    out.push(Achievement::SpeedRunner);
  }
  if peak_risk >= COMEBACK_RISK {
    out.push(Achievement::ComebackKid);
  }
  out
}

#[instrument(level = "info", skip(state), fields(%level_id, language = language.tag()))]
pub async fn start_session(state: &AppState, level_id: &str, language: Language) -> Result<GameSession, GameError> {
  let level = state.level(level_id).await.ok_or_else(|| GameError::UnknownLevel(level_id.to_string()))?;
  if level.status == LevelStatus::Locked {
    return Err(GameError::LevelLocked(level_id.to_string()));
  }
  let session = GameSession::start(&level, language);
  info!(target: "turn", session_id = %session.id, %level_id, mood = ?session.turn.mood, "Session started");
  state.sessions.write().await.insert(session.id.clone(), session.clone());
  Ok(session)
}

pub async fn get_session(state: &AppState, session_id: &str) -> Result<GameSession, GameError> {
  state
    .sessions
    .read()
    .await
    .get(session_id)
    .cloned()
    .ok_or_else(|| GameError::UnknownSession(session_id.to_string()))
}

async fn resolve_turn(
  state: &AppState,
  before: &TurnSession,
  mut history: Vec<ChatMessage>,
  level_id: &str,
  language: Language,
  text: &str,
) -> Result<(TurnDecision, Option<TurnOverride>, TurnSession), GameError> {
  let next_turn = before.next_turn();
  let overridden = detect_override(text);
  let decision = match overridden {
    Some(kind) => {
      let prompts = state.config.prompts.for_language(language);
      let reply = match kind {
        TurnOverride::Victory => prompts.victory_reply.clone(),
        TurnOverride::Defeat => prompts.defeat_reply.clone(),
      };
      info!(target: "turn", ?kind, turn = next_turn, "Instant override; decision source bypassed");
      override_decision(kind, reply)
    }
    None => {
      let level = state.level(level_id).await.ok_or_else(|| GameError::UnknownLevel(level_id.to_string()))?;
      history.push(ChatMessage::user(text));
      let request = DecisionRequest {
        system_prompt: build_system_prompt(&state.config, &level, language, next_turn),
        history,
        language,
        turn_number: next_turn,
        departure_risk: before.departure_risk,
        mood: before.mood,
      };
      state.decisions.decide(&request).await?
    }
  };
  let decision = enforce_turn_limit(decision, next_turn);
  let next = apply_turn_result(before, &decision)?;
  Ok((decision, overridden, next))
}

#[instrument(level = "info", target = "turn", skip(state, text, rng), fields(%session_id, text_len = text.len()))]
pub async fn play_turn(state: &AppState, session_id: &str, text: &str, rng: &mut StdRng) -> Result<TurnOutcome, GameError> {
  let (before, history, level_id, language, pending) = {
    let sessions = state.sessions.read().await;
    let s = sessions.get(session_id).ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
    if s.turn.is_terminal() {
      return Err(TurnError::AlreadyTerminal.into());
    }
    let pending = PendingTurn::claim(&s.turn_pending).ok_or(TurnError::TurnInFlight)?;
    (s.turn.clone(), s.transcript.clone(), s.level_id.clone(), s.language, pending)
  };

  let resolved = resolve_turn(state, &before, history, &level_id, language, text).await;

  let (decision, overridden, next, challenge) = {
    let mut sessions = state.sessions.write().await;
    let s = sessions.get_mut(session_id).ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
    let (decision, overridden, next) = match resolved {
      Ok(r) => r,
      Err(e) => {
        warn!(target: "turn", %session_id, error = %e, retryable = e.is_retryable(), "Turn rejected; session unchanged");
        return Err(e);
      }
    };
    let challenge = if !next.is_terminal() && should_spawn(rng) { Some(random_kind(rng)) } else { None };
    s.turn = next.clone();
    s.pending_challenge = challenge;
    s.transcript.push(ChatMessage::user(text));
    s.transcript.push(ChatMessage::assistant(decision.reply.clone()));
    drop(pending);
    (decision, overridden, next, challenge)
  };

  let level_completed = if next.game_won { complete_level(state, &level_id).await } else { false };
  let summary = match next.outcome() {
    Some(outcome) => Some(record_summary(state, session_id, outcome.into()).await?),
    None => None,
  };

  info!(
    target: "turn",
    %session_id,
    turn = next.turn_number,
    risk = next.departure_risk,
    mood = ?next.mood,
    outcome = ?next.outcome(),
    ?challenge,
    "Turn accepted"
  );

  Ok(TurnOutcome {
    session_id: session_id.to_string(),
    reply: decision.reply,
    was_suggested: before.suggested_actions.iter().any(|a| same_phrase(a, text)),
    risk_delta: next.departure_risk - before.departure_risk,
    overridden,
    outcome: next.outcome(),
    level_completed,
    challenge,
    summary,
    turn: next,
  })
}

/// Build (once) the summary of a session and unlock the achievements it earned.
async fn record_summary(state: &AppState, session_id: &str, outcome: SessionOutcome) -> Result<SessionSummary, GameError> {
  let mut sessions = state.sessions.write().await;
  let s = sessions.get_mut(session_id).ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
  if let Some(existing) = &s.summary {
    return Ok(existing.clone());
  }
  let duration = s.started_at.elapsed();
  let earned = earned_achievements(outcome, duration, s.turn.peak_departure_risk);
  let mut unlocked = state.achievements.write().await;
  let fresh: Vec<Achievement> = earned.into_iter().filter(|a| unlocked.insert(*a)).collect();
  drop(unlocked);

  let summary = SessionSummary {
    session_id: s.id.clone(),
    level_id: s.level_id.clone(),
    outcome,
    final_risk: s.turn.departure_risk,
    turns: s.turn.turn_number,
    duration_secs: duration.as_secs(),
    peak_risk: s.turn.peak_departure_risk,
    xp_earned: s.xp_earned,
    achievements: fresh,
  };
  info!(target: "turn", %session_id, outcome = ?summary.outcome, turns = summary.turns, achievements = ?summary.achievements, "Session finished");
  s.summary = Some(summary.clone());
  Ok(summary)
}

/// Drop a session. Unfinished sessions are summarised as abandoned.
#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn end_session(state: &AppState, session_id: &str) -> Result<SessionSummary, GameError> {
  let outcome = {
    let sessions = state.sessions.read().await;
    let s = sessions.get(session_id).ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
    s.turn.outcome().map(SessionOutcome::from).unwrap_or(SessionOutcome::Abandoned)
  };
  let summary = record_summary(state, session_id, outcome).await?;
  state.sessions.write().await.remove(session_id);
  Ok(summary)
}

/// Complete a level in the active list, the store and the cache. Returns true when the
/// level was not completed before.
#[instrument(level = "info", target = "progression", skip(state), fields(%level_id))]
pub async fn complete_level(state: &AppState, level_id: &str) -> bool {
  let snapshot = {
    let mut levels = state.levels.write().await;
    let updated = progression::complete_level(&levels, level_id);
    if updated == *levels {
      return false;
    }
    *levels = updated;
    levels.clone()
  };
  if let Err(e) = state.store.mark_complete(level_id).await {
    warn!(target: "progression", %level_id, error = %e, "Failed to store completion marker");
  }
  state.persist_levels(&snapshot).await;
  info!(target: "progression", %level_id, progress = progression::progress_percent(&snapshot), "Level completed");
  true
}

pub async fn levels_overview(state: &AppState) -> LevelsOverview {
  let levels = state.levels.read().await.clone();
  LevelsOverview {
    current_level_id: progression::current_level(&levels).map(|l| l.id.clone()),
    progress_percent: progression::progress_percent(&levels),
    levels,
  }
}

#[instrument(level = "info", target = "progression", skip(state))]
pub async fn reset_levels(state: &AppState) -> LevelsOverview {
  if let Err(e) = state.store.clear_completed().await {
    warn!(target: "progression", error = %e, "Failed to clear stored completion markers");
  }
  let snapshot = {
    let mut levels = state.levels.write().await;
    *levels = progression::reset_progress(&levels);
    levels.clone()
  };
  state.persist_levels(&snapshot).await;
  info!(target: "progression", "Progress reset");
  levels_overview(state).await
}

/// Start the challenge the session's last turn rolled, consuming the offer. `kind`, when
/// given, must name that challenge. The hint, if the player wins it, is one of the level's
/// win conditions.
#[instrument(level = "info", target = "challenge", skip(state, rng), fields(%session_id))]
pub async fn prepare_challenge(
  state: &AppState,
  session_id: &str,
  kind: Option<ChallengeKind>,
  rng: &mut StdRng,
) -> Result<ChallengeSession, GameError> {
  let (level_id, kind) = {
    let mut sessions = state.sessions.write().await;
    let s = sessions.get_mut(session_id).ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
    if s.challenge_active {
      return Err(GameError::ChallengeRunning);
    }
    if s.turn.is_terminal() {
      return Err(TurnError::AlreadyTerminal.into());
    }
    let offered = s.pending_challenge.ok_or(GameError::ChallengeNotOffered)?;
    if kind.is_some_and(|k| k != offered) {
      return Err(GameError::ChallengeNotOffered);
    }
    s.pending_challenge = None;
    s.challenge_active = true;
    (s.level_id.clone(), offered)
  };
  let hint = state
    .level(&level_id)
    .await
    .and_then(|l| l.content.win_conditions.choose(rng).cloned());
  info!(target: "challenge", %session_id, ?kind, "Challenge prepared");
  Ok(ChallengeSession::new(kind, CircleGeometry::default(), hint))
}

/// Close the session's running challenge, crediting the XP bonus on success.
pub async fn finish_challenge(state: &AppState, session_id: &str, result: Option<&ChallengeResult>) -> Result<(), GameError> {
  let mut sessions = state.sessions.write().await;
  let s = sessions.get_mut(session_id).ok_or_else(|| GameError::UnknownSession(session_id.to_string()))?;
  if !s.challenge_active {
    return Err(GameError::NoChallenge);
  }
  s.challenge_active = false;
  if let Some(r) = result.filter(|r| r.success) {
    s.xp_earned += r.xp_bonus;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  use async_trait::async_trait;
  use rand::SeedableRng;

  use crate::decision::DecisionSource;
  use crate::domain::Mood;
  use crate::error::DecisionError;
  use crate::seeds::{default_levels, HAGRID_LEVEL_ID, HERMIONE_LEVEL_ID};
  use crate::store::MemoryProgressStore;

  #[derive(Default)]
  struct Scripted {
    queue: Mutex<VecDeque<Result<TurnDecision, DecisionError>>>,
    calls: AtomicUsize,
  }

  impl Scripted {
    fn push(&self, d: Result<TurnDecision, DecisionError>) {
      self.queue.lock().unwrap().push_back(d);
    }
  }

  #[async_trait]
  impl DecisionSource for Scripted {
    fn name(&self) -> &'static str {
      "scripted"
    }
    async fn decide(&self, _: &DecisionRequest) -> Result<TurnDecision, DecisionError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(DecisionError::Unavailable("script exhausted".into())))
    }
  }

  fn decision(mood: Mood, risk: i32) -> TurnDecision {
    TurnDecision {
      mood,
      departure_risk: risk,
      game_over: false,
      game_won: false,
      suggested_actions: vec!["Tell her a joke".into()],
      reply: "*sniffs*".into(),
    }
  }

  async fn setup() -> (AppState, Arc<Scripted>) {
    let source = Arc::new(Scripted::default());
    let state = AppState::with_parts(
      GameConfig::default(),
      Arc::new(MemoryProgressStore::new(default_levels())),
      None,
      source.clone(),
    )
    .await;
    (state, source)
  }

  fn rng() -> StdRng {
    StdRng::seed_from_u64(11)
  }

  #[tokio::test]
  async fn victory_token_on_turn_five_wins_and_unlocks_the_next_level() {
    let (state, source) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    for _ in 0..4 {
      source.push(Ok(decision(Mood::Neutral, 45)));
      play_turn(&state, &session.id, "I'm here for you", &mut r).await.unwrap();
    }

    let out = play_turn(&state, &session.id, "Yay!", &mut r).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    assert_eq!(out.overridden, Some(TurnOverride::Victory));
    assert_eq!(out.outcome, Some(Outcome::Won));
    assert_eq!((out.turn.turn_number, out.turn.departure_risk, out.turn.mood), (5, 0, Mood::Happy));
    assert!(out.level_completed);
    assert!(out.challenge.is_none());
    let summary = out.summary.unwrap();
    assert_eq!(summary.outcome, SessionOutcome::Won);
    assert_eq!(summary.achievements, vec![Achievement::FirstWin, Achievement::SpeedRunner]);

    let overview = levels_overview(&state).await;
    assert_eq!(overview.levels[0].status, LevelStatus::Completed);
    assert_eq!(overview.levels[1].status, LevelStatus::Unlocked);
    assert_eq!(overview.current_level_id.as_deref(), Some(HAGRID_LEVEL_ID));
    assert_eq!(overview.progress_percent, 50);

    let again = play_turn(&state, &session.id, "hello?", &mut r).await;
    assert!(matches!(again, Err(GameError::Turn(TurnError::AlreadyTerminal))));
  }

  #[tokio::test]
  async fn insult_beats_victory_and_skips_the_source() {
    let (state, source) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::Fr).await.unwrap();
    let out = play_turn(&state, &session.id, "Youpi, sale moldue", &mut rng()).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.overridden, Some(TurnOverride::Defeat));
    assert_eq!((out.turn.departure_risk, out.turn.mood), (100, Mood::Angry));
    assert_eq!(out.outcome, Some(Outcome::Lost));
    assert!(!out.level_completed);
    assert!(out.reply.contains("SORCIÈRE"));
  }

  #[tokio::test]
  async fn failed_decision_leaves_the_session_untouched() {
    let (state, source) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    source.push(Err(DecisionError::Parse("missing field `mood`".into())));
    let err = play_turn(&state, &session.id, "Talk to me", &mut r).await.unwrap_err();
    assert!(err.is_retryable());

    let after = get_session(&state, &session.id).await.unwrap();
    assert_eq!(after.turn, session.turn);
    assert_eq!(after.transcript, session.transcript);
    assert!(!after.is_turn_pending());

    source.push(Ok(decision(Mood::Sad, 55)));
    let out = play_turn(&state, &session.id, "Talk to me", &mut r).await.unwrap();
    assert_eq!(out.turn.turn_number, 1);
    assert_eq!(get_session(&state, &session.id).await.unwrap().transcript.len(), 2);
  }

  #[tokio::test]
  async fn pending_turn_rejects_a_second_submission() {
    let (state, _) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    state.sessions.read().await[&session.id].turn_pending.store(true, Ordering::SeqCst);
    let err = play_turn(&state, &session.id, "hello", &mut rng()).await.unwrap_err();
    assert!(matches!(err, GameError::Turn(TurnError::TurnInFlight)));
  }

  /// Hangs on its first call, then answers normally.
  struct StallsOnce {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl DecisionSource for StallsOnce {
    fn name(&self) -> &'static str {
      "stalls-once"
    }
    async fn decide(&self, _: &DecisionRequest) -> Result<TurnDecision, DecisionError> {
      if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
        std::future::pending::<()>().await;
      }
      Ok(decision(Mood::Neutral, 40))
    }
  }

  #[tokio::test]
  async fn cancelled_turn_releases_the_session() {
    let source = Arc::new(StallsOnce { calls: AtomicUsize::new(0) });
    let state = Arc::new(
      AppState::with_parts(
        GameConfig::default(),
        Arc::new(MemoryProgressStore::new(default_levels())),
        None,
        source.clone(),
      )
      .await,
    );
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();

    let task = tokio::spawn({
      let state = state.clone();
      let id = session.id.clone();
      async move { play_turn(&state, &id, "Talk to me", &mut rng()).await }
    });
    while source.calls.load(Ordering::SeqCst) == 0 {
      tokio::task::yield_now().await;
    }
    assert!(get_session(&state, &session.id).await.unwrap().is_turn_pending());
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let after = get_session(&state, &session.id).await.unwrap();
    assert!(!after.is_turn_pending());
    assert_eq!(after.turn, session.turn);
    let out = play_turn(&state, &session.id, "Talk to me", &mut rng()).await.unwrap();
    assert_eq!((out.turn.turn_number, out.turn.departure_risk), (1, 40));
  }

  #[tokio::test]
  async fn tenth_turn_forces_a_conclusion() {
    let (state, source) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    let mut last = None;
    for _ in 0..10 {
      source.push(Ok(decision(Mood::Sad, 60)));
      last = Some(play_turn(&state, &session.id, "Please", &mut r).await.unwrap());
    }
    let last = last.unwrap();
    assert_eq!(last.turn.turn_number, 10);
    assert_eq!(last.outcome, Some(Outcome::Lost));
    assert_eq!(last.summary.unwrap().outcome, SessionOutcome::Lost);
  }

  #[tokio::test]
  async fn choice_metadata_tracks_suggestions_and_risk() {
    let (state, source) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    source.push(Ok(decision(Mood::Nervous, 70)));
    let out = play_turn(&state, &session.id, "  what's WRONG? ", &mut r).await.unwrap();
    assert!(out.was_suggested);
    assert_eq!(out.risk_delta, 20);

    source.push(Ok(decision(Mood::Neutral, 58)));
    let out = play_turn(&state, &session.id, "Something else entirely", &mut r).await.unwrap();
    assert!(!out.was_suggested);
    assert_eq!(out.risk_delta, -12);
  }

  #[tokio::test]
  async fn sessions_only_start_on_open_levels() {
    let (state, _) = setup().await;
    assert!(matches!(start_session(&state, "nope", Language::En).await, Err(GameError::UnknownLevel(_))));
    assert!(matches!(start_session(&state, HAGRID_LEVEL_ID, Language::En).await, Err(GameError::LevelLocked(_))));
  }

  #[tokio::test]
  async fn ending_an_open_session_is_an_abandon() {
    let (state, _) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let summary = end_session(&state, &session.id).await.unwrap();
    assert_eq!(summary.outcome, SessionOutcome::Abandoned);
    assert!(summary.achievements.is_empty());
    assert!(matches!(get_session(&state, &session.id).await, Err(GameError::UnknownSession(_))));
  }

  #[tokio::test]
  async fn reset_restores_the_initial_layout() {
    let (state, _) = setup().await;
    assert!(complete_level(&state, HERMIONE_LEVEL_ID).await);
    assert!(!complete_level(&state, HERMIONE_LEVEL_ID).await);
    let overview = reset_levels(&state).await;
    assert_eq!(overview.progress_percent, 0);
    assert_eq!(overview.current_level_id.as_deref(), Some(HERMIONE_LEVEL_ID));
  }

  #[tokio::test]
  async fn challenges_are_exclusive_and_credit_xp() {
    let (state, _) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    offer(&state, &session.id, ChallengeKind::Fire).await;
    let challenge = prepare_challenge(&state, &session.id, Some(ChallengeKind::Fire), &mut r).await.unwrap();
    assert_eq!(challenge.kind, ChallengeKind::Fire);
    assert!(get_session(&state, &session.id).await.unwrap().pending_challenge.is_none());
    assert!(matches!(prepare_challenge(&state, &session.id, None, &mut r).await, Err(GameError::ChallengeRunning)));

    let result = ChallengeResult { success: true, xp_bonus: 30, hint_revealed: false, hint: None, completion_time_ms: Some(4_000) };
    finish_challenge(&state, &session.id, Some(&result)).await.unwrap();
    assert_eq!(get_session(&state, &session.id).await.unwrap().xp_earned, 30);
    assert!(matches!(finish_challenge(&state, &session.id, None).await, Err(GameError::NoChallenge)));
    assert!(matches!(
      prepare_challenge(&state, &session.id, None, &mut r).await,
      Err(GameError::ChallengeNotOffered)
    ));
  }

  async fn offer(state: &AppState, session_id: &str, kind: ChallengeKind) {
    state.sessions.write().await.get_mut(session_id).unwrap().pending_challenge = Some(kind);
  }

  #[tokio::test]
  async fn only_the_offered_challenge_can_start() {
    let (state, _) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    assert!(matches!(
      prepare_challenge(&state, &session.id, None, &mut r).await,
      Err(GameError::ChallengeNotOffered)
    ));

    offer(&state, &session.id, ChallengeKind::Spider).await;
    assert!(matches!(
      prepare_challenge(&state, &session.id, Some(ChallengeKind::Fire), &mut r).await,
      Err(GameError::ChallengeNotOffered)
    ));
    let challenge = prepare_challenge(&state, &session.id, None, &mut r).await.unwrap();
    assert_eq!(challenge.kind, ChallengeKind::Spider);
  }

  #[tokio::test]
  async fn finished_sessions_cannot_farm_challenges() {
    let (state, _) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    let out = play_turn(&state, &session.id, "muggle", &mut r).await.unwrap();
    assert_eq!(out.outcome, Some(Outcome::Lost));
    assert!(get_session(&state, &session.id).await.unwrap().pending_challenge.is_none());

    offer(&state, &session.id, ChallengeKind::Fire).await;
    assert!(matches!(
      prepare_challenge(&state, &session.id, None, &mut r).await,
      Err(GameError::Turn(TurnError::AlreadyTerminal))
    ));
    assert_eq!(get_session(&state, &session.id).await.unwrap().xp_earned, 0);
  }

  #[tokio::test]
  async fn each_turn_replaces_the_challenge_offer() {
    let (state, source) = setup().await;
    let session = start_session(&state, HERMIONE_LEVEL_ID, Language::En).await.unwrap();
    let mut r = rng();
    let mut offered = None;
    for _ in 0..9 {
      source.push(Ok(decision(Mood::Neutral, 45)));
      let out = play_turn(&state, &session.id, "I'm here", &mut r).await.unwrap();
      assert_eq!(get_session(&state, &session.id).await.unwrap().pending_challenge, out.challenge);
      if out.challenge.is_some() {
        offered = out.challenge;
        break;
      }
    }
    if let Some(kind) = offered {
      let challenge = prepare_challenge(&state, &session.id, None, &mut r).await.unwrap();
      assert_eq!(challenge.kind, kind);
    }
  }

  #[test]
  fn achievements_follow_outcome_duration_and_peak() {
    let slow = Duration::from_secs(400);
    assert!(earned_achievements(SessionOutcome::Lost, Duration::ZERO, 90).is_empty());
    assert_eq!(earned_achievements(SessionOutcome::Won, slow, 60), vec![Achievement::FirstWin]);
    assert_eq!(
      earned_achievements(SessionOutcome::Won, slow, 80),
      vec![Achievement::FirstWin, Achievement::ComebackKid]
    );
  }

  #[test]
  fn system_prompt_carries_sheet_rules_and_phase() {
    let cfg = GameConfig::default();
    let level = &default_levels()[0];
    let open = build_system_prompt(&cfg, level, Language::En, 3);
    assert!(open.contains("Hermione Granger"));
    assert!(open.contains("Hogwarts Library"));
    assert!(open.contains("TURN 3/10"));

    let late = build_system_prompt(&cfg, level, Language::Fr, 8);
    assert!(late.contains("2 tour(s)"));
    assert!(build_system_prompt(&cfg, level, Language::En, 10).contains("MANDATORY FINALE"));
  }
}
