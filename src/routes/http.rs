//! HTTP endpoint handlers. These are thin wrappers that forward to the game layer.
//! Each handler is instrumented; errors map to a status code plus a JSON `{error}` body.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, instrument, warn};

use crate::error::{GameError, TurnError};
use crate::game;
use crate::protocol::*;
use crate::state::AppState;

/// `GameError` as an HTTP response.
pub struct ApiError(pub GameError);

impl From<GameError> for ApiError {
  fn from(e: GameError) -> Self {
    ApiError(e)
  }
}

pub fn status_for(e: &GameError) -> StatusCode {
  match e {
    GameError::Turn(TurnError::AlreadyTerminal | TurnError::TurnInFlight) => StatusCode::CONFLICT,
    GameError::ChallengeRunning | GameError::NoChallenge | GameError::ChallengeNotOffered => {
      StatusCode::CONFLICT
    }
    GameError::UnknownSession(_) | GameError::UnknownLevel(_) => StatusCode::NOT_FOUND,
    GameError::LevelLocked(_) => StatusCode::FORBIDDEN,
    GameError::Decision(_) => StatusCode::BAD_GATEWAY,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = status_for(&self.0);
    if status.is_server_error() {
      warn!(target: "bertrand_backend", %status, error = %self.0, "Request failed");
    }
    (status, Json(ErrorOut { error: self.0.to_string() })).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_levels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(game::levels_overview(&state).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_reset_levels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(game::reset_levels(&state).await)
}

#[instrument(level = "info", skip(state, body), fields(level_id = %body.level_id, language = body.language.tag()))]
pub async fn http_start_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartSessionIn>,
) -> Result<impl IntoResponse, ApiError> {
  let session = game::start_session(&state, &body.level_id, body.language).await?;
  info!(target: "bertrand_backend", session_id = %session.id, "HTTP session started");
  Ok((StatusCode::CREATED, Json(to_session_out(&session))))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let session = game::get_session(&state, &id).await?;
  Ok(Json(to_session_out(&session)))
}

#[instrument(level = "info", skip(state, body), fields(%id, text_len = body.text.len()))]
pub async fn http_post_turn(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<TurnIn>,
) -> Result<impl IntoResponse, ApiError> {
  let mut rng = StdRng::from_entropy();
  let outcome = game::play_turn(&state, &id, &body.text, &mut rng).await?;
  Ok(Json(outcome))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let summary = game::end_session(&state, &id).await?;
  Ok(Json(summary))
}
