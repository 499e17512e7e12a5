//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::challenge::{ChallengeEvent, ChallengeKind, ChallengePhase, ChallengeResult, ChallengeSession};
use crate::domain::{ChatMessage, Language};
use crate::game::{GameSession, SessionSummary, TurnOutcome};
use crate::turn::TurnSession;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    PlayTurn {
        #[serde(rename = "sessionId")]
        session_id: String,
        text: String,
    },
    StartChallenge {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default)]
        kind: Option<ChallengeKind>,
    },
    Pointer {
        x: f64,
        y: f64,
        #[serde(rename = "tMs")]
        t_ms: f64,
    },
    AbortChallenge,
}

/// Messages the server sends over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    TurnResult {
        outcome: TurnOutcome,
    },
    ChallengeStarted {
        #[serde(rename = "sessionId")]
        session_id: String,
        challenge: ChallengeSession,
    },
    ChallengeEvent {
        event: ChallengeEvent,
    },
    ChallengeFinished {
        phase: ChallengePhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ChallengeResult>,
    },
    Error {
        message: String,
        retryable: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionIn {
    pub level_id: String,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Deserialize)]
pub struct TurnIn {
    pub text: String,
}

/// Public view of a game session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub session_id: String,
    pub level_id: String,
    pub language: Language,
    pub turn: TurnSession,
    pub transcript: Vec<ChatMessage>,
    pub xp_earned: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_challenge: Option<ChallengeKind>,
    pub challenge_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

pub fn to_session_out(s: &GameSession) -> SessionOut {
    SessionOut {
        session_id: s.id.clone(),
        level_id: s.level_id.clone(),
        language: s.language,
        turn: s.turn.clone(),
        transcript: s.transcript.clone(),
        xp_earned: s.xp_earned,
        pending_challenge: s.pending_challenge,
        challenge_active: s.challenge_active,
        summary: s.summary.clone(),
    }
}
