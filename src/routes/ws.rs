//! WebSocket upgrade + message loop.
//!
//! Client messages are parsed as JSON and forwarded to the game layer with one reply per
//! request. A connection may own one running challenge; its events are pushed to the
//! client as they happen, interleaved with replies by a single `select!` loop.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::challenge::{spawn_challenge, ChallengeEvent, ChallengeHandle, ChallengePhase, PointerSample};
use crate::error::GameError;
use crate::game;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

/// The challenge owned by this connection.
struct ActiveChallenge {
  session_id: String,
  handle: ChallengeHandle,
  events: mpsc::UnboundedReceiver<ChallengeEvent>,
}

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "bertrand_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn error_msg(e: &GameError) -> ServerWsMessage {
  ServerWsMessage::Error { message: e.to_string(), retryable: e.is_retryable() }
}

async fn send_json(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e), "retryable": false }).to_string()
  });
  match socket.send(Message::Text(out)).await {
    Ok(()) => true,
    Err(e) => {
      error!(target: "bertrand_backend", error = %e, "WS send error");
      false
    }
  }
}

/// Next event of the running challenge; never resolves when there is none.
async fn next_event(active: &mut Option<ActiveChallenge>) -> Option<ChallengeEvent> {
  match active {
    Some(a) => a.events.recv().await,
    None => std::future::pending().await,
  }
}

/// Collect the final state of an ended challenge and release it in the game session.
async fn close_challenge(state: &AppState, active: ActiveChallenge, abort: bool) -> ServerWsMessage {
  let ActiveChallenge { session_id, handle, .. } = active;
  let done = if abort { handle.abort().await } else { handle.finished().await };
  let (phase, result) = match done {
    Some(s) => (s.phase, s.result),
    None => (ChallengePhase::Aborted, None),
  };
  if let Err(e) = game::finish_challenge(state, &session_id, result.as_ref()).await {
    warn!(target: "challenge", %session_id, error = %e, "Could not release challenge");
  }
  ServerWsMessage::ChallengeFinished { phase, result }
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "bertrand_backend", "WebSocket connected");
  let mut active: Option<ActiveChallenge> = None;
  let mut rng = StdRng::from_entropy();

  loop {
    tokio::select! {
      msg = socket.recv() => {
        let txt = match msg {
          Some(Ok(Message::Text(txt))) => txt,
          Some(Ok(Message::Ping(payload))) => { let _ = socket.send(Message::Pong(payload)).await; continue; }
          Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
          Some(Ok(_)) => continue,
        };
        let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "bertrand_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &mut active, &mut rng).await
          }
          Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e), retryable: false }),
        };
        if let Some(reply) = reply {
          if !send_json(&mut socket, &reply).await {
            break;
          }
        }
      }
      event = next_event(&mut active) => {
        let msg = match event {
          Some(event) => ServerWsMessage::ChallengeEvent { event },
          None => match active.take() {
            Some(ended) => close_challenge(&state, ended, false).await,
            None => continue,
          },
        };
        if !send_json(&mut socket, &msg).await {
          break;
        }
      }
    }
  }

  if let Some(leftover) = active.take() {
    close_challenge(&state, leftover, true).await;
  }
  info!(target: "bertrand_backend", "WebSocket disconnected");
}

#[instrument(level = "debug", skip_all)]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  active: &mut Option<ActiveChallenge>,
  rng: &mut StdRng,
) -> Option<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => Some(ServerWsMessage::Pong),

    ClientWsMessage::PlayTurn { session_id, text } => Some(match game::play_turn(state, &session_id, &text, rng).await {
      Ok(outcome) => ServerWsMessage::TurnResult { outcome },
      Err(e) => error_msg(&e),
    }),

    ClientWsMessage::StartChallenge { session_id, kind } => {
      if active.is_some() {
        return Some(error_msg(&GameError::ChallengeRunning));
      }
      Some(match game::prepare_challenge(state, &session_id, kind, rng).await {
        Ok(challenge) => {
          let snapshot = challenge.clone();
          let (handle, events) = spawn_challenge(challenge, StdRng::from_rng(&mut *rng).unwrap_or_else(|_| StdRng::from_entropy()));
          *active = Some(ActiveChallenge { session_id: session_id.clone(), handle, events });
          ServerWsMessage::ChallengeStarted { session_id, challenge: snapshot }
        }
        Err(e) => error_msg(&e),
      })
    }

    ClientWsMessage::Pointer { x, y, t_ms } => {
      match active {
        Some(a) => {
          if !a.handle.send_pointer(PointerSample { x, y, t_ms }).await {
            debug!(target: "challenge", "Pointer sample after challenge end");
          }
        }
        None => debug!(target: "challenge", "Pointer sample without a running challenge"),
      }
      None
    }

    ClientWsMessage::AbortChallenge => match active.take() {
      Some(a) => Some(close_challenge(state, a, true).await),
      None => Some(error_msg(&GameError::NoChallenge)),
    },
  }
}
