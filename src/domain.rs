//! Domain models shared by the core state machines and the HTTP layer:
//! moods, languages, levels and conversation messages.

use serde::{Deserialize, Serialize};

/// Emotional state of the character, as reported by the decision source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
  Sad,
  Angry,
  Neutral,
  Happy,
  Desperate,
  Nervous,
}
impl Default for Mood {
  fn default() -> Self { Mood::Sad }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
  Fr,
  En,
}
impl Default for Language {
  fn default() -> Self { Language::Fr }
}
impl Language {
  pub fn tag(self) -> &'static str {
    match self {
      Language::Fr => "fr",
      Language::En => "en",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
  Locked,
  Unlocked,
  Completed,
}

/// Authoring data attached to a level. Everything is optional; sessions fall back to defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelContent {
  #[serde(default)] pub character: Option<String>,
  #[serde(default)] pub location: Option<String>,
  #[serde(default)] pub initial_mood: Option<Mood>,
  #[serde(default)] pub objective: Option<String>,
  #[serde(default)] pub difficulty: Option<String>,
  #[serde(default)] pub initial_message: Option<String>,
  #[serde(default)] pub context: Option<String>,
  #[serde(default)] pub win_conditions: Vec<String>,
  #[serde(default)] pub lose_conditions: Vec<String>,
  #[serde(default)] pub suggested_actions: Vec<String>,
}

/// One story level with its unlock state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Level {
  pub id: String,
  pub order: i32,
  pub status: LevelStatus,
  #[serde(default)] pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub content: LevelContent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  System,
  User,
  Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: Role,
  pub content: String,
}

impl ChatMessage {
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: Role::User, content: content.into() }
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self { role: Role::Assistant, content: content.into() }
  }
}
