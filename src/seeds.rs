//! Built-in default content: the level catalog used when no store or cache has data,
//! and the opening suggestions for sessions whose level defines none.

use crate::domain::{Language, Level, LevelContent, LevelStatus, Mood};

pub const HERMIONE_LEVEL_ID: &str = "level-hermione-1";
pub const HAGRID_LEVEL_ID: &str = "level-hagrid-1";

/// Ids every accepted level set must contain.
pub const CANONICAL_LEVEL_IDS: &[&str] = &[HERMIONE_LEVEL_ID, HAGRID_LEVEL_ID];

/// Absolute last-resort catalog: two levels, the first unlocked.
pub fn default_levels() -> Vec<Level> {
  vec![
    Level {
      id: HERMIONE_LEVEL_ID.into(),
      order: 1,
      status: LevelStatus::Unlocked,
      title: "Hogwarts Library - Hermione".into(),
      description: "Hermione is revising alone in the library. She looks worried and is thinking about leaving.".into(),
      content: LevelContent {
        character: Some("Hermione Granger".into()),
        location: Some("Hogwarts Library".into()),
        initial_mood: Some(Mood::Sad),
        objective: Some("Convince Hermione to stay at Hogwarts".into()),
        difficulty: Some("medium".into()),
        win_conditions: vec![
          "Show her that Harry and Ron need her".into(),
          "Acknowledge her fear instead of dismissing it".into(),
        ],
        lose_conditions: vec!["Mock her origins".into()],
        ..Default::default()
      },
    },
    Level {
      id: HAGRID_LEVEL_ID.into(),
      order: 2,
      status: LevelStatus::Locked,
      title: "Hagrid's Hut - Forbidden Secret".into(),
      description: "Hagrid is hiding something in his hut. Find out his secret without rushing him.".into(),
      content: LevelContent {
        character: Some("Hagrid".into()),
        location: Some("Hagrid's Hut".into()),
        initial_mood: Some(Mood::Nervous),
        objective: Some("Discover Hagrid's secret while keeping his trust".into()),
        difficulty: Some("hard".into()),
        win_conditions: vec![
          "Ask about his creatures with genuine interest".into(),
          "Promise to keep the secret".into(),
        ],
        lose_conditions: vec!["Threaten to tell Dumbledore".into()],
        ..Default::default()
      },
    },
  ]
}

/// Opening suggestions when the level content has none.
pub fn default_suggested_actions(language: Language) -> Vec<String> {
  let actions: [&str; 4] = match language {
    Language::Fr => [
      "Qu'est-ce qui ne va pas ?",
      "Lui rappeler Harry et Ron",
      "Lui offrir une écoute attentive",
      "Bloquer le passage",
    ],
    Language::En => [
      "What's wrong?",
      "Remind her of Harry and Ron",
      "Offer to listen",
      "Block the way",
    ],
  };
  actions.iter().map(|s| s.to_string()).collect()
}
