//! Gesture validator for the spell challenge.
//!
//! The player traces a circle through `N` checkpoints laid out clockwise from the top.
//! State machine: `NotStarted -> Active -> {Success, Failed}`, plus `Aborted` on
//! cancellation. Two inputs drive it:
//!   - `on_sample`: irregular pointer samples `(x, y, t_ms)`; speed uses the real time
//!     delta between samples, never the sample count.
//!   - `tick`: the fixed 100 ms countdown.
//!
//! Every call returns the events it produced so an owner (see `runner`) can forward them.

use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::kinds::{ChallengeKind, ChallengeSpec, HINT_REVEAL_CHANCE, XP_BONUS};

/// Faster than this (px/s) costs a life.
pub const SPEED_LIMIT_PX_PER_S: f64 = 800.0;
/// A checkpoint counts when a sample lands strictly inside this radius.
pub const CHECKPOINT_RADIUS: f64 = 20.0;
pub const TICK_MS: i64 = 100;
pub const STARTING_LIVES: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }

  pub fn distance_to(&self, other: &Point) -> f64 {
    (self.x - other.x).hypot(self.y - other.y)
  }
}

/// One raw pointer sample, timestamped by the input device in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
  pub x: f64,
  pub y: f64,
  pub t_ms: f64,
}

impl PointerSample {
  pub fn point(&self) -> Point {
    Point::new(self.x, self.y)
  }
}

/// Ideal circle the player has to follow, in canvas units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircleGeometry {
  pub center: Point,
  pub radius: f64,
}

impl Default for CircleGeometry {
  fn default() -> Self {
    Self { center: Point::new(300.0, 300.0), radius: 120.0 }
  }
}

impl CircleGeometry {
  pub fn distance_from_circle(&self, p: &Point) -> f64 {
    (p.distance_to(&self.center) - self.radius).abs()
  }

  /// `count` points at equal angular spacing, the first one at the top (-90°).
  pub fn checkpoints(&self, count: usize) -> Vec<Point> {
    let step = (2.0 * PI) / count as f64;
    (0..count)
      .map(|i| {
        let angle = i as f64 * step - PI / 2.0;
        Point::new(self.center.x + angle.cos() * self.radius, self.center.y + angle.sin() * self.radius)
      })
      .collect()
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
  /// Left the tolerance band after the first contact.
  PathDeviation,
  /// Too many speed violations.
  LivesExhausted,
  Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum ChallengePhase {
  NotStarted,
  Active,
  Success,
  Failed(FailureReason),
  Aborted,
}

impl ChallengePhase {
  pub fn is_terminal(&self) -> bool {
    matches!(self, ChallengePhase::Success | ChallengePhase::Failed(_) | ChallengePhase::Aborted)
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResult {
  pub success: bool,
  pub xp_bonus: u32,
  pub hint_revealed: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hint: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completion_time_ms: Option<u64>,
}

/// What a single input did to the session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChallengeEvent {
  Started,
  SpeedWarning { lives_remaining: u8 },
  CheckpointValidated { index: usize, progress_percent: f64 },
  Tick { time_remaining_ms: i64 },
  Succeeded { result: ChallengeResult },
  Failed { reason: FailureReason },
}

#[derive(Clone, Debug, Serialize)]
pub struct ChallengeSession {
  pub kind: ChallengeKind,
  pub spec: ChallengeSpec,
  pub geometry: CircleGeometry,
  pub checkpoints: Vec<Point>,
  pub checkpoints_validated: Vec<bool>,
  pub current_checkpoint: usize,
  pub lives_remaining: u8,
  pub time_remaining_ms: i64,
  pub has_started: bool,
  pub phase: ChallengePhase,
  #[serde(skip)]
  started_at_ms: Option<f64>,
  #[serde(skip)]
  last_sample: Option<PointerSample>,
  #[serde(skip)]
  hint: Option<String>,
  pub result: Option<ChallengeResult>,
}

impl ChallengeSession {
  pub fn new(kind: ChallengeKind, geometry: CircleGeometry, hint: Option<String>) -> Self {
    let spec = kind.spec();
    let checkpoints = geometry.checkpoints(spec.control_points);
    Self {
      kind,
      checkpoints_validated: vec![false; checkpoints.len()],
      checkpoints,
      current_checkpoint: 0,
      lives_remaining: STARTING_LIVES,
      time_remaining_ms: spec.duration_ms,
      has_started: false,
      phase: ChallengePhase::NotStarted,
      started_at_ms: None,
      last_sample: None,
      hint,
      result: None,
      geometry,
      spec,
    }
  }

  pub fn validated_count(&self) -> usize {
    self.checkpoints_validated.iter().filter(|v| **v).count()
  }

  pub fn progress_percent(&self) -> f64 {
    if self.checkpoints.is_empty() {
      return 0.0;
    }
    self.validated_count() as f64 * 100.0 / self.checkpoints.len() as f64
  }

  pub fn is_terminal(&self) -> bool {
    self.phase.is_terminal()
  }

  fn fail(&mut self, reason: FailureReason) -> ChallengeEvent {
    self.phase = ChallengePhase::Failed(reason);
    info!(target: "challenge", kind = ?self.kind, ?reason, validated = self.validated_count(), "Challenge failed");
    ChallengeEvent::Failed { reason }
  }

  /// Feed one pointer sample.
  pub fn on_sample<R: Rng>(&mut self, sample: PointerSample, rng: &mut R) -> Vec<ChallengeEvent> {
    let mut events = Vec::new();
    let here = sample.point();
    let off_circle = self.geometry.distance_from_circle(&here);

    match self.phase {
      ChallengePhase::NotStarted => {
        // Approaching from anywhere is free until the first in-tolerance contact.
        if off_circle <= self.spec.tolerance {
          self.phase = ChallengePhase::Active;
          self.has_started = true;
          self.started_at_ms = Some(sample.t_ms);
          self.last_sample = Some(sample);
          debug!(target: "challenge", kind = ?self.kind, x = sample.x, y = sample.y, "Trace started");
          events.push(ChallengeEvent::Started);
        }
        return events;
      }
      ChallengePhase::Active => {}
      _ => return events,
    }

    if self.has_started && off_circle > self.spec.tolerance {
      events.push(self.fail(FailureReason::PathDeviation));
      return events;
    }

    if let Some(prev) = self.last_sample {
      let dt_ms = sample.t_ms - prev.t_ms;
      let speed = if dt_ms > 0.0 { here.distance_to(&prev.point()) / dt_ms * 1000.0 } else { 0.0 };
      if speed > SPEED_LIMIT_PX_PER_S {
        self.lives_remaining = self.lives_remaining.saturating_sub(1);
        debug!(target: "challenge", speed, lives = self.lives_remaining, "Too fast");
        events.push(ChallengeEvent::SpeedWarning { lives_remaining: self.lives_remaining });
        if self.lives_remaining == 0 {
          events.push(self.fail(FailureReason::LivesExhausted));
          return events;
        }
      }
    }
    self.last_sample = Some(sample);

    // Only the current checkpoint is checkable; earlier ones are frozen, later ones wait.
    let idx = self.current_checkpoint;
    if let Some(target) = self.checkpoints.get(idx) {
      if here.distance_to(target) < CHECKPOINT_RADIUS {
        self.checkpoints_validated[idx] = true;
        self.current_checkpoint = idx + 1;
        events.push(ChallengeEvent::CheckpointValidated { index: idx, progress_percent: self.progress_percent() });

        if self.current_checkpoint == self.checkpoints.len() {
          let result = self.succeed(sample.t_ms, rng);
          events.push(ChallengeEvent::Succeeded { result });
        }
      }
    }
    events
  }

  fn succeed<R: Rng>(&mut self, now_ms: f64, rng: &mut R) -> ChallengeResult {
    self.phase = ChallengePhase::Success;
    let completion = (now_ms - self.started_at_ms.unwrap_or(now_ms)).max(0.0).round() as u64;
    let hint_revealed = rng.gen_bool(HINT_REVEAL_CHANCE);
    let result = ChallengeResult {
      success: true,
      xp_bonus: XP_BONUS,
      hint_revealed,
      hint: if hint_revealed { self.hint.clone() } else { None },
      completion_time_ms: Some(completion),
    };
    info!(target: "challenge", kind = ?self.kind, completion_ms = completion, hint_revealed, "Challenge succeeded");
    self.result = Some(result.clone());
    result
  }

  /// Advance the countdown by one 100 ms tick. Runs before and after the first contact.
  pub fn tick(&mut self) -> Vec<ChallengeEvent> {
    if self.is_terminal() {
      return Vec::new();
    }
    self.time_remaining_ms = (self.time_remaining_ms - TICK_MS).max(0);
    let mut events = vec![ChallengeEvent::Tick { time_remaining_ms: self.time_remaining_ms }];
    if self.time_remaining_ms <= 0 {
      events.push(self.fail(FailureReason::Timeout));
    }
    events
  }

  /// Stop the session without a result. Returns false if it had already ended.
  pub fn cancel(&mut self) -> bool {
    if self.is_terminal() {
      return false;
    }
    self.phase = ChallengePhase::Aborted;
    debug!(target: "challenge", kind = ?self.kind, "Challenge aborted");
    true
  }
}
