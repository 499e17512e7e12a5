//! Async owner of a live challenge.
//!
//! One tokio task per challenge: pointer samples arrive on an mpsc channel, the countdown
//! runs on a 100 ms `interval`, and both are funneled through the same `select!` loop so
//! the validator is only ever touched from one place. Events flow out on a second channel
//! that closes when the challenge ends.

use std::time::Duration;

use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};

use super::kinds::ChallengeKind;
use super::validator::{ChallengeEvent, ChallengeSession, PointerSample, TICK_MS};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug)]
enum Command {
  Pointer(PointerSample),
  Abort,
}

/// Control side of a running challenge. Dropping it aborts the challenge.
pub struct ChallengeHandle {
  kind: ChallengeKind,
  tx: mpsc::Sender<Command>,
  task: JoinHandle<ChallengeSession>,
}

impl ChallengeHandle {
  pub fn kind(&self) -> ChallengeKind {
    self.kind
  }

  /// Whether the challenge task is still accepting input.
  pub fn is_running(&self) -> bool {
    !self.tx.is_closed()
  }

  /// Forward one pointer sample. Returns false once the challenge has ended.
  pub async fn send_pointer(&self, sample: PointerSample) -> bool {
    self.tx.send(Command::Pointer(sample)).await.is_ok()
  }

  /// Cancel the challenge and wait for its final state.
  pub async fn abort(self) -> Option<ChallengeSession> {
    let _ = self.tx.send(Command::Abort).await;
    self.task.await.ok()
  }

  /// Wait for the challenge to end on its own (success, failure, timeout).
  pub async fn finished(self) -> Option<ChallengeSession> {
    let ChallengeHandle { tx, task, .. } = self;
    // Keep the sender alive so waiting does not count as an abort.
    let result = task.await.ok();
    drop(tx);
    result
  }
}

/// Start the challenge task. The returned receiver yields every validator event in order.
pub fn spawn_challenge(session: ChallengeSession, rng: StdRng) -> (ChallengeHandle, mpsc::UnboundedReceiver<ChallengeEvent>) {
  let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
  let (events_tx, events_rx) = mpsc::unbounded_channel();
  let kind = session.kind;
  let task = tokio::spawn(run(session, rng, rx, events_tx));
  (ChallengeHandle { kind, tx, task }, events_rx)
}

#[instrument(level = "debug", target = "challenge", skip_all, fields(kind = ?session.kind))]
async fn run(
  mut session: ChallengeSession,
  mut rng: StdRng,
  mut commands: mpsc::Receiver<Command>,
  events: mpsc::UnboundedSender<ChallengeEvent>,
) -> ChallengeSession {
  let period = Duration::from_millis(TICK_MS as u64);
  let mut ticker = interval_at(Instant::now() + period, period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  info!(target: "challenge", kind = ?session.kind, duration_ms = session.time_remaining_ms, "Challenge running");

  loop {
    let produced = tokio::select! {
      cmd = commands.recv() => match cmd {
        Some(Command::Pointer(sample)) => session.on_sample(sample, &mut rng),
        Some(Command::Abort) | None => {
          session.cancel();
          break;
        }
      },
      _ = ticker.tick() => session.tick(),
    };

    for event in produced {
      if events.send(event).is_err() {
        debug!(target: "challenge", "Event receiver gone");
      }
    }
    if session.is_terminal() {
      break;
    }
  }

  debug!(target: "challenge", phase = ?session.phase, "Challenge task finished");
  session
}
