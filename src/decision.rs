//! Decision sources: whoever voices the character and judges the player's message.
//!
//! The game asks a `DecisionSource` for one `TurnDecision` per accepted turn. The
//! production source is the OpenAI client (`openai.rs`); `LocalNarrator` is the offline
//! fallback used when no API key is configured.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{ChatMessage, Language, Mood, Role};
use crate::error::DecisionError;
use crate::seeds::default_suggested_actions;
use crate::turn::{clamp_risk, TurnDecision, RISK_MAX};
use crate::util::{contains_any_token, trunc_for_log};

/// Everything a source needs to produce the next decision.
#[derive(Clone, Debug)]
pub struct DecisionRequest {
  /// Character sheet + common rules + turn instruction.
  pub system_prompt: String,
  /// Full conversation so far, ending with the player's new message.
  pub history: Vec<ChatMessage>,
  pub language: Language,
  pub turn_number: u32,
  pub departure_risk: i32,
  pub mood: Mood,
}

impl DecisionRequest {
  pub fn last_player_message(&self) -> &str {
    self
      .history
      .iter()
      .rev()
      .find(|m| m.role == Role::User)
      .map(|m| m.content.as_str())
      .unwrap_or("")
  }
}

#[async_trait]
pub trait DecisionSource: Send + Sync {
  fn name(&self) -> &'static str;
  async fn decide(&self, request: &DecisionRequest) -> Result<TurnDecision, DecisionError>;
}

/// Wire shape expected from the model. Every field is required.
#[derive(Deserialize)]
struct RawDecision {
  character_reply: String,
  mood: Mood,
  departure_risk: f64,
  game_over: bool,
  game_won: bool,
  suggested_actions: Vec<String>,
}

/// Strictly parse a model answer. Missing fields or an unknown mood are errors.
pub fn parse_decision(text: &str) -> Result<TurnDecision, DecisionError> {
  let raw: RawDecision = serde_json::from_str(text.trim()).map_err(|e| {
    debug!(target: "turn", error = %e, body = %trunc_for_log(text, 200), "Rejected decision payload");
    DecisionError::Parse(e.to_string())
  })?;
  if !raw.departure_risk.is_finite() {
    return Err(DecisionError::Parse("departure_risk is not a number".into()));
  }
  Ok(TurnDecision {
    mood: raw.mood,
    departure_risk: raw.departure_risk.round() as i32,
    game_over: raw.game_over,
    game_won: raw.game_won,
    suggested_actions: raw.suggested_actions,
    reply: raw.character_reply,
  })
}

const WARM_TOKENS: &[&str] = &[
  "friend", "need", "stay", "listen", "understand", "help", "sorry", "proud",
  "ami", "besoin", "reste", "écoute", "comprends", "aide", "désolé", "fier",
];
const COLD_TOKENS: &[&str] = &[
  "stupid", "shut up", "whatever", "idiot", "go away", "boring",
  "stupide", "tais-toi", "peu importe", "va-t'en", "ennuyeux",
];

/// Keyword heuristic standing in for the model when none is configured.
#[derive(Clone, Debug, Default)]
pub struct LocalNarrator;

impl LocalNarrator {
  fn reply(language: Language, mood: Mood) -> &'static str {
    match (language, mood) {
      (Language::En, Mood::Happy) => "*smiles faintly* \"Maybe you're right. Maybe I don't have to go.\"",
      (Language::En, Mood::Angry) => "*glares at you* \"Is that really all you have to say?\"",
      (Language::En, Mood::Desperate) => "*grips the suitcase handle* \"I can't do this anymore...\"",
      (Language::En, _) => "*hesitates, eyes on the floor* \"I don't know... go on.\"",
      (Language::Fr, Mood::Happy) => "*esquisse un sourire* « Tu as peut-être raison. Je ne suis pas obligée de partir. »",
      (Language::Fr, Mood::Angry) => "*te fusille du regard* « C'est vraiment tout ce que tu as à dire ? »",
      (Language::Fr, Mood::Desperate) => "*serre la poignée de sa valise* « Je n'en peux plus... »",
      (Language::Fr, _) => "*hésite, les yeux baissés* « Je ne sais pas... continue. »",
    }
  }
}

#[async_trait]
impl DecisionSource for LocalNarrator {
  fn name(&self) -> &'static str {
    "local"
  }

  #[instrument(level = "debug", target = "turn", skip_all, fields(turn = request.turn_number))]
  async fn decide(&self, request: &DecisionRequest) -> Result<TurnDecision, DecisionError> {
    let text = request.last_player_message();
    let cold = contains_any_token(text, COLD_TOKENS);
    let warm = contains_any_token(text, WARM_TOKENS);
    let delta = match (warm, cold) {
      (_, true) => 18,
      (true, false) => -8,
      (false, false) => 2,
    };
    let risk = clamp_risk(request.departure_risk + delta);
    let mood = if cold {
      Mood::Angry
    } else if risk >= 80 {
      Mood::Desperate
    } else if risk >= 60 {
      Mood::Sad
    } else if risk <= 25 {
      Mood::Happy
    } else {
      Mood::Neutral
    };
    Ok(TurnDecision {
      mood,
      departure_risk: risk,
      game_over: risk >= RISK_MAX,
      game_won: false,
      suggested_actions: default_suggested_actions(request.language),
      reply: Self::reply(request.language, mood).to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(text: &str, risk: i32) -> DecisionRequest {
    DecisionRequest {
      system_prompt: String::new(),
      history: vec![ChatMessage::assistant("..."), ChatMessage::user(text)],
      language: Language::En,
      turn_number: 3,
      departure_risk: risk,
      mood: Mood::Sad,
    }
  }

  #[test]
  fn parses_a_complete_decision() {
    let d = parse_decision(
      r#"{"character_reply":"*sighs*","mood":"nervous","departure_risk":62.6,"game_over":false,"game_won":false,"suggested_actions":["a","b"]}"#,
    )
    .unwrap();
    assert_eq!(d.mood, Mood::Nervous);
    assert_eq!(d.departure_risk, 63);
    assert_eq!(d.reply, "*sighs*");
    assert_eq!(d.suggested_actions.len(), 2);
  }

  #[test]
  fn rejects_missing_fields_and_unknown_moods() {
    let missing = r#"{"character_reply":"hi","mood":"sad","departure_risk":40,"game_over":false,"suggested_actions":[]}"#;
    assert!(matches!(parse_decision(missing), Err(DecisionError::Parse(_))));
    let bad_mood = r#"{"character_reply":"hi","mood":"ecstatic","departure_risk":40,"game_over":false,"game_won":false,"suggested_actions":[]}"#;
    assert!(matches!(parse_decision(bad_mood), Err(DecisionError::Parse(_))));
    assert!(matches!(parse_decision("not json"), Err(DecisionError::Parse(_))));
  }

  #[tokio::test]
  async fn local_narrator_reacts_to_tone() {
    let narrator = LocalNarrator;
    let cold = narrator.decide(&request("Whatever, you're boring", 50)).await.unwrap();
    assert_eq!((cold.mood, cold.departure_risk), (Mood::Angry, 68));

    let warm = narrator.decide(&request("Harry and Ron need you, stay", 30)).await.unwrap();
    assert_eq!((warm.mood, warm.departure_risk), (Mood::Happy, 22));
    assert!(!warm.game_over && !warm.game_won);
    assert_eq!(warm.suggested_actions.len(), 4);

    let worn_out = narrator.decide(&request("idiot", 95)).await.unwrap();
    assert_eq!(worn_out.departure_risk, 100);
    assert!(worn_out.game_over);
  }
}
