//! Application state: live game sessions, the active level list, unlocked achievements,
//! persistence collaborators and the decision source.
//!
//! Progression is single-player per process: one level list and one achievement set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::{load_game_config_from_env, GameConfig};
use crate::decision::{DecisionSource, LocalNarrator};
use crate::domain::Level;
use crate::game::{Achievement, GameSession};
use crate::openai::OpenAI;
use crate::progression::completed_ids;
use crate::seeds::{default_levels, CANONICAL_LEVEL_IDS};
use crate::store::{load_levels, JsonFileCache, LevelOrigin, LevelSource, MemoryProgressStore, ProgressStore};

pub struct AppState {
  pub config: GameConfig,
  pub sessions: RwLock<HashMap<String, GameSession>>,
  pub levels: RwLock<Vec<Level>>,
  pub achievements: RwLock<HashSet<Achievement>>,
  pub store: Arc<dyn ProgressStore>,
  pub cache: Option<JsonFileCache>,
  pub decisions: Arc<dyn DecisionSource>,
}

impl AppState {
  /// Build state from env: load config, restore cached progress, pick the decision source,
  /// then resolve the level list through the loading chain.
  #[instrument(level = "info", skip_all)]
  pub async fn from_env() -> Self {
    let config = load_game_config_from_env().unwrap_or_default();
    let cache = JsonFileCache::from_env();

    let catalog = {
      let c = config.catalog();
      if c.is_empty() { default_levels() } else { c }
    };
    // The memory store starts from whatever completion markers the cache remembers.
    let restored = match &cache {
      Some(cache) => match cache.load().await {
        Ok(Some(levels)) => completed_ids(&levels),
        Ok(None) => HashSet::new(),
        Err(e) => {
          warn!(target: "progression", path = %cache.path().display(), error = %e, "Unreadable progress cache");
          HashSet::new()
        }
      },
      None => HashSet::new(),
    };
    let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::with_completed(catalog, restored));

    let decisions: Arc<dyn DecisionSource> = match OpenAI::from_env() {
      Some(oa) => {
        info!(target: "bertrand_backend", base_url = %oa.base_url, model = %oa.model, temperature = oa.temperature, "OpenAI enabled.");
        Arc::new(oa)
      }
      None => {
        info!(target: "bertrand_backend", "OpenAI disabled (no OPENAI_API_KEY). Using the local narrator.");
        Arc::new(LocalNarrator)
      }
    };

    Self::with_parts(config, store, cache, decisions).await
  }

  /// Assemble state from explicit collaborators.
  pub async fn with_parts(
    config: GameConfig,
    store: Arc<dyn ProgressStore>,
    cache: Option<JsonFileCache>,
    decisions: Arc<dyn DecisionSource>,
  ) -> Self {
    let mut sources = vec![LevelSource::Store(store.as_ref())];
    if let Some(c) = &cache {
      sources.push(LevelSource::Cache(c));
    }
    let (levels, origin) = load_levels(&sources, CANONICAL_LEVEL_IDS).await;
    drop(sources);
    info!(target: "bertrand_backend", ?origin, levels = levels.len(), decisions = decisions.name(), "Game state ready");
    if origin == LevelOrigin::Defaults {
      warn!(target: "progression", "Progress is starting from the built-in levels");
    }

    Self {
      config,
      sessions: RwLock::new(HashMap::new()),
      levels: RwLock::new(levels),
      achievements: RwLock::new(HashSet::new()),
      store,
      cache,
      decisions,
    }
  }

  /// Write the level list to the local cache, if one is configured. Failures are logged only.
  pub async fn persist_levels(&self, levels: &[Level]) {
    if let Some(cache) = &self.cache {
      if let Err(e) = cache.save(levels).await {
        warn!(target: "progression", path = %cache.path().display(), error = %e, "Failed to write progress cache");
      }
    }
  }

  pub async fn level(&self, level_id: &str) -> Option<Level> {
    self.levels.read().await.iter().find(|l| l.id == level_id).cloned()
  }
}
