//! Minimal OpenAI client used as the production decision source.
//!
//! One call per turn: chat.completions with the conversation history and a strict JSON
//! object response. Calls are instrumented and log model name, latency and response size;
//! replies are only logged truncated.
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::decision::{parse_decision, DecisionRequest, DecisionSource};
use crate::domain::{ChatMessage, Role};
use crate::error::DecisionError;
use crate::turn::TurnDecision;
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let temperature = std::env::var("OPENAI_TEMPERATURE")
      .ok()
      .and_then(|t| t.parse::<f32>().ok())
      .unwrap_or(0.8);

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model, temperature })
  }

  /// JSON-object chat completion. Returns the raw message content.
  #[instrument(level = "info", skip(self, system, history), fields(model = %self.model, history_len = history.len()))]
  async fn chat_json(&self, system: &str, history: &[ChatMessage]) -> Result<String, DecisionError> {
    let url = format!("{}/chat/completions", self.base_url);
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessageReq { role: "system", content: system.to_string() });
    messages.extend(history.iter().map(|m| ChatMessageReq { role: role_name(m.role), content: m.content.clone() }));

    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages,
      temperature: self.temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "bertrand-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(DecisionError::Http { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    body
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .filter(|c| !c.trim().is_empty())
      .ok_or_else(|| DecisionError::Parse("empty completion".into()))
  }
}

fn role_name(role: Role) -> &'static str {
  match role {
    Role::System => "system",
    Role::User => "user",
    Role::Assistant => "assistant",
  }
}

#[async_trait]
impl DecisionSource for OpenAI {
  fn name(&self) -> &'static str {
    "openai"
  }

  #[instrument(level = "info", target = "turn", skip_all, fields(turn = request.turn_number, language = request.language.tag()))]
  async fn decide(&self, request: &DecisionRequest) -> Result<TurnDecision, DecisionError> {
    let start = Instant::now();
    let result = self.chat_json(&request.system_prompt, &request.history).await;
    let elapsed = start.elapsed();

    let text = match result {
      Ok(t) => t,
      Err(e) => {
        error!(target: "turn", ?elapsed, error = %e, "Model call failed");
        return Err(e);
      }
    };
    info!(target: "turn", ?elapsed, len = text.len(), "Model response received");
    debug!(target: "turn", reply = %trunc_for_log(&text, 160), "Model response (truncated)");
    parse_decision(&text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: &'static str, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
