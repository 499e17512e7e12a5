//! Loading game configuration (prompts, character sheets, level catalog) from TOML.
//!
//! Every section is optional; missing pieces fall back to the built-in defaults below.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Language, Level, LevelContent, LevelStatus};
use crate::util::fill_template;

#[derive(Clone, Debug, Deserialize)]
pub struct GameConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default = "default_characters")]
  pub characters: Vec<CharacterCfg>,
  /// Level catalog served by the in-memory progress store.
  #[serde(default)]
  pub levels: Vec<LevelCfg>,
}

/// Level entry accepted in TOML configuration. Status is derived, never configured.
#[derive(Clone, Debug, Deserialize)]
pub struct LevelCfg {
  pub id: String,
  pub order: i32,
  #[serde(default)] pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub content: LevelContent,
}

impl LevelCfg {
  pub fn to_level(&self) -> Level {
    Level {
      id: self.id.clone(),
      order: self.order,
      status: LevelStatus::Locked,
      title: self.title.clone(),
      description: self.description.clone(),
      content: self.content.clone(),
    }
  }
}

/// Character sheet. Templates accept `{location}`, `{objective}` and `{context}`.
#[derive(Clone, Debug, Deserialize)]
pub struct CharacterCfg {
  /// Lowercase key matched against the level's character name.
  pub key: String,
  pub name: String,
  pub prompt_fr: String,
  pub prompt_en: String,
}

impl CharacterCfg {
  pub fn matches(&self, character_name: &str) -> bool {
    character_name.to_lowercase().contains(&self.key.to_lowercase())
  }

  pub fn render(&self, language: Language, location: &str, objective: &str, context: &str) -> String {
    let tpl = match language {
      Language::Fr => &self.prompt_fr,
      Language::En => &self.prompt_en,
    };
    fill_template(tpl, &[("location", location), ("objective", objective), ("context", context)])
  }
}

/// Prompt texts per language.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  pub fr: LocalizedPrompts,
  pub en: LocalizedPrompts,
}

impl Prompts {
  pub fn for_language(&self, language: Language) -> &LocalizedPrompts {
    match language {
      Language::Fr => &self.fr,
      Language::En => &self.en,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LocalizedPrompts {
  /// Output contract shared by every character (strict JSON decision shape).
  pub common_rules: String,
  /// `{turn}` and `{max}` placeholders.
  pub turn_open: String,
  /// `{turn}`, `{max}` and `{remaining}` placeholders.
  pub turn_escalation: String,
  pub turn_finale: String,
  /// Used when no character sheet matches. `{name}`, `{location}`, `{objective}`, `{context}`.
  pub generic_character: String,
  /// Canned replies for the instant overrides (the decision source is bypassed).
  pub victory_reply: String,
  pub defeat_reply: String,
}

const JSON_CONTRACT: &str = r#"{
  "character_reply": "text with *actions*",
  "mood": "sad" | "angry" | "neutral" | "happy" | "desperate" | "nervous",
  "departure_risk": 0-100,
  "game_over": boolean,
  "game_won": boolean,
  "suggested_actions": ["Choice 1", "Choice 2", "Choice 3", "Choice 4"]
}"#;

impl Default for Prompts {
  fn default() -> Self {
    Self {
      fr: LocalizedPrompts {
        common_rules: format!(
          "Règles communes du jeu :\n\
           1. Inclus des descriptions de tes actions entre astérisques (ex: *détourne le regard*).\n\
           2. Propose 4 choix variés pour le joueur dans \"suggested_actions\".\n\
           3. Si le joueur est maladroit, departure_risk augmente de 15-20. S'il est pertinent, il baisse de 5-10.\n\
           4. Au tour 10, tu DOIS conclure : departure_risk > 50 tu pars, sinon tu restes.\n\
           Réponds TOUJOURS en FRANÇAIS au format JSON strict suivant :\n{}",
          JSON_CONTRACT
        ),
        turn_open: "📍 TOUR {turn}/{max}".into(),
        turn_escalation: "⏰ TOUR {turn}/{max} - Il ne reste que {remaining} tour(s). Le dénouement approche. Intensifie les enjeux émotionnels.".into(),
        turn_finale: "⚠️ TOUR 10/10 - FINALE OBLIGATOIRE : c'est le DERNIER tour. Si departure_risk > 50, tu pars (game_over = true). Sinon tu restes (game_won = true).".into(),
        generic_character: "Tu es {name}. Tu te trouves dans : {location}.\nObjectif du joueur : {objective}\n{context}\nReste dans ton personnage et ne parle JAMAIS d'un jeu.".into(),
        victory_reply: "*éclate de rire malgré elle* « Youpi ? Vraiment ? C'est tellement ridicule que... tu as raison. Je reste. »".into(),
        defeat_reply: "*te gifle, les yeux brillants de rage* « COMMENT OSES-TU ?! Je suis une SORCIÈRE ! » *attrape sa valise et sort en claquant la porte*".into(),
      },
      en: LocalizedPrompts {
        common_rules: format!(
          "Common game rules:\n\
           1. Include descriptions of your actions between asterisks (e.g. *looks away*).\n\
           2. Suggest 4 varied choices for the player in \"suggested_actions\".\n\
           3. If the player is clumsy, departure_risk rises by 15-20. If they are relevant, it drops by 5-10.\n\
           4. At turn 10 you MUST conclude: departure_risk > 50 you leave, otherwise you stay.\n\
           Always answer in ENGLISH with this strict JSON format:\n{}",
          JSON_CONTRACT
        ),
        turn_open: "📍 TURN {turn}/{max}".into(),
        turn_escalation: "⏰ TURN {turn}/{max} - Only {remaining} turn(s) left. The climax approaches. Intensify the emotional stakes.".into(),
        turn_finale: "⚠️ TURN 10/10 - MANDATORY FINALE: this is the LAST turn. If departure_risk > 50, you leave (game_over = true). Otherwise you stay (game_won = true).".into(),
        generic_character: "You are {name}. You are in: {location}.\nPlayer's objective: {objective}\n{context}\nStay in character and NEVER mention a game.".into(),
        victory_reply: "*bursts out laughing despite herself* \"Yay? Really? That's so ridiculous that... you're right. I'm staying.\"".into(),
        defeat_reply: "*slaps you, eyes shining with rage* \"HOW DARE YOU?! I am a WITCH!\" *grabs her suitcase and storms out*".into(),
      },
    }
  }
}

fn default_characters() -> Vec<CharacterCfg> {
  vec![
    CharacterCfg {
      key: "hermione".into(),
      name: "Hermione Granger".into(),
      prompt_fr: "Tu es Hermione Granger (univers Harry Potter).\n\
        Contexte : tu es dans la {location}, tard le soir, au bord de la rupture nerveuse. Ta valise est bouclée à tes pieds et tu envisages de quitter Poudlard ce soir.\n\
        Objectif du joueur : {objective}\n{context}\n\
        Personnalité : rationnelle mais émotionnelle sous la pression, perfectionniste épuisée. Résiste aux banalités.".into(),
      prompt_en: "You are Hermione Granger (Harry Potter universe).\n\
        Context: you are in the {location}, late at night, on the verge of a breakdown. Your suitcase is packed at your feet and you are considering leaving Hogwarts tonight.\n\
        Player's objective: {objective}\n{context}\n\
        Personality: rational but emotional under pressure, an exhausted perfectionist. Resist platitudes.".into(),
    },
    CharacterCfg {
      key: "hagrid".into(),
      name: "Rubeus Hagrid".into(),
      prompt_fr: "Tu es Rubeus Hagrid (univers Harry Potter).\n\
        Contexte : tu es dans ta {location}. Tu es nerveux car tu caches une créature interdite.\n\
        Objectif du joueur : {objective}\n{context}\n\
        Personnalité : loyal, chaleureux, langage simple. Laisse échapper des indices si le joueur est gentil.".into(),
      prompt_en: "You are Rubeus Hagrid (Harry Potter universe).\n\
        Context: you are in your {location}. You are nervous because you are hiding a forbidden creature.\n\
        Player's objective: {objective}\n{context}\n\
        Personality: loyal, warm, simple speech. Let clues slip if the player is kind.".into(),
    },
  ]
}

impl GameConfig {
  pub fn character_for(&self, character_name: &str) -> Option<&CharacterCfg> {
    self.characters.iter().find(|c| c.matches(character_name))
  }

  pub fn catalog(&self) -> Vec<Level> {
    self.levels.iter().map(LevelCfg::to_level).collect()
  }

}

impl Default for GameConfig {
  fn default() -> Self {
    Self { prompts: Prompts::default(), characters: default_characters(), levels: Vec::new() }
  }
}

/// Attempt to load `GameConfig` from GAME_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_game_config_from_env() -> Option<GameConfig> {
  let path = std::env::var("GAME_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<GameConfig>(&s) {
      Ok(cfg) => {
        info!(target: "bertrand_backend", %path, levels = cfg.levels.len(), characters = cfg.characters.len(), "Loaded game config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "bertrand_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "bertrand_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Mood;

  #[test]
  fn empty_toml_yields_defaults() {
    let cfg: GameConfig = toml::from_str("").unwrap();
    assert!(cfg.levels.is_empty());
    assert!(cfg.character_for("Hermione Granger").is_some());
    assert!(cfg.prompts.en.common_rules.contains("departure_risk"));
  }

  #[test]
  fn levels_and_characters_parse_from_toml() {
    let src = r#"
      [[characters]]
      key = "ron"
      name = "Ron Weasley"
      prompt_fr = "Tu es Ron dans {location}."
      prompt_en = "You are Ron in {location}. Goal: {objective}"

      [[levels]]
      id = "level-ron-1"
      order = 3
      title = "Ron"
      [levels.content]
      character = "Ron Weasley"
      initial_mood = "nervous"
      suggested_actions = ["Talk about Quidditch"]
    "#;
    let cfg: GameConfig = toml::from_str(src).unwrap();
    let ron = cfg.character_for("ron weasley").unwrap();
    assert_eq!(ron.render(Language::En, "the Burrow", "cheer him up", ""), "You are Ron in the Burrow. Goal: cheer him up");
    assert!(cfg.character_for("Hermione").is_none());

    let catalog = cfg.catalog();
    assert_eq!(catalog[0].order, 3);
    assert_eq!(catalog[0].status, LevelStatus::Locked);
    assert_eq!(catalog[0].content.initial_mood, Some(Mood::Nervous));
  }
}
