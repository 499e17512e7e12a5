//! Progress persistence.
//!
//! `ProgressStore` is the durable side (level catalog + completion markers). The in-memory
//! implementation serves the catalog from the TOML config. `JsonFileCache` is a local
//! snapshot of the last known level list, written after every change.
//!
//! `load_levels` walks the sources in order and keeps the first non-empty list that
//! contains every canonical level id; otherwise the built-in defaults are used.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::Level;
use crate::error::StoreError;
use crate::progression::{compute_statuses, has_canonical_levels};
use crate::seeds::default_levels;

#[async_trait]
pub trait ProgressStore: Send + Sync {
  /// Catalog with statuses derived from the stored completion markers.
  async fn read_levels(&self) -> Result<Vec<Level>, StoreError>;
  async fn read_completed(&self) -> Result<HashSet<String>, StoreError>;
  /// Idempotent.
  async fn mark_complete(&self, level_id: &str) -> Result<(), StoreError>;
  async fn clear_completed(&self) -> Result<(), StoreError>;
}

pub struct MemoryProgressStore {
  catalog: Vec<Level>,
  completed: RwLock<HashSet<String>>,
}

impl MemoryProgressStore {
  pub fn new(catalog: Vec<Level>) -> Self {
    Self::with_completed(catalog, HashSet::new())
  }

  pub fn with_completed(catalog: Vec<Level>, completed: HashSet<String>) -> Self {
    Self { catalog, completed: RwLock::new(completed) }
  }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
  async fn read_levels(&self) -> Result<Vec<Level>, StoreError> {
    let completed = self.completed.read().await;
    Ok(compute_statuses(&self.catalog, &completed))
  }

  async fn read_completed(&self) -> Result<HashSet<String>, StoreError> {
    Ok(self.completed.read().await.clone())
  }

  async fn mark_complete(&self, level_id: &str) -> Result<(), StoreError> {
    if self.completed.write().await.insert(level_id.to_string()) {
      debug!(target: "progression", %level_id, "Completion marker stored");
    }
    Ok(())
  }

  async fn clear_completed(&self) -> Result<(), StoreError> {
    self.completed.write().await.clear();
    Ok(())
  }
}

/// Level list snapshot as a JSON file.
#[derive(Clone, Debug)]
pub struct JsonFileCache {
  path: PathBuf,
}

impl JsonFileCache {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Cache at PROGRESS_CACHE_PATH, if set.
  pub fn from_env() -> Option<Self> {
    std::env::var("PROGRESS_CACHE_PATH").ok().filter(|p| !p.trim().is_empty()).map(Self::new)
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  /// `Ok(None)` when nothing has been cached yet.
  pub async fn load(&self) -> Result<Option<Vec<Level>>, StoreError> {
    match tokio::fs::read_to_string(&self.path).await {
      Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  pub async fn save(&self, levels: &[Level]) -> Result<(), StoreError> {
    let raw = serde_json::to_string_pretty(levels)?;
    tokio::fs::write(&self.path, raw).await?;
    Ok(())
  }
}

/// One layer of the loading chain.
pub enum LevelSource<'a> {
  Store(&'a dyn ProgressStore),
  Cache(&'a JsonFileCache),
}

impl LevelSource<'_> {
  fn name(&self) -> &'static str {
    match self {
      LevelSource::Store(_) => "store",
      LevelSource::Cache(_) => "cache",
    }
  }

  async fn fetch(&self) -> Result<Option<Vec<Level>>, StoreError> {
    match self {
      LevelSource::Store(store) => store.read_levels().await.map(Some),
      LevelSource::Cache(cache) => cache.load().await,
    }
  }
}

/// Where the active level list came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelOrigin {
  Store,
  Cache,
  Defaults,
}

#[instrument(level = "info", target = "progression", skip_all, fields(sources = sources.len()))]
pub async fn load_levels(sources: &[LevelSource<'_>], canonical_ids: &[&str]) -> (Vec<Level>, LevelOrigin) {
  for source in sources {
    match source.fetch().await {
      Ok(Some(levels)) if !levels.is_empty() => {
        if has_canonical_levels(&levels, canonical_ids) {
          info!(target: "progression", source = source.name(), count = levels.len(), "Levels loaded");
          let origin = match source {
            LevelSource::Store(_) => LevelOrigin::Store,
            LevelSource::Cache(_) => LevelOrigin::Cache,
          };
          return (levels, origin);
        }
        warn!(target: "progression", source = source.name(), count = levels.len(), "Level set missing canonical ids; skipping");
      }
      Ok(_) => debug!(target: "progression", source = source.name(), "No levels in source"),
      Err(e) => warn!(target: "progression", source = source.name(), error = %e, "Level source failed; trying next"),
    }
  }
  info!(target: "progression", "Using built-in default levels");
  (default_levels(), LevelOrigin::Defaults)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::LevelStatus;
  use crate::seeds::{CANONICAL_LEVEL_IDS, HAGRID_LEVEL_ID, HERMIONE_LEVEL_ID};

  fn temp_cache() -> JsonFileCache {
    JsonFileCache::new(std::env::temp_dir().join(format!("bertrand-progress-{}.json", uuid::Uuid::new_v4())))
  }

  struct BrokenStore;

  #[async_trait]
  impl ProgressStore for BrokenStore {
    async fn read_levels(&self) -> Result<Vec<Level>, StoreError> {
      Err(StoreError::Unavailable("offline".into()))
    }
    async fn read_completed(&self) -> Result<HashSet<String>, StoreError> {
      Err(StoreError::Unavailable("offline".into()))
    }
    async fn mark_complete(&self, _: &str) -> Result<(), StoreError> {
      Err(StoreError::Unavailable("offline".into()))
    }
    async fn clear_completed(&self) -> Result<(), StoreError> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn memory_store_derives_statuses_from_markers() {
    let store = MemoryProgressStore::new(default_levels());
    store.mark_complete(HERMIONE_LEVEL_ID).await.unwrap();
    store.mark_complete(HERMIONE_LEVEL_ID).await.unwrap();
    let levels = store.read_levels().await.unwrap();
    assert_eq!(levels[0].status, LevelStatus::Completed);
    assert_eq!(levels[1].status, LevelStatus::Unlocked);
    assert_eq!(store.read_completed().await.unwrap().len(), 1);

    store.clear_completed().await.unwrap();
    assert_eq!(store.read_levels().await.unwrap()[0].status, LevelStatus::Unlocked);
  }

  #[tokio::test]
  async fn cache_round_trips_and_reports_missing_file() {
    let cache = temp_cache();
    assert!(cache.load().await.unwrap().is_none());
    cache.save(&default_levels()).await.unwrap();
    assert_eq!(cache.load().await.unwrap(), Some(default_levels()));
    let _ = std::fs::remove_file(cache.path());
  }

  #[tokio::test]
  async fn chain_falls_through_broken_and_empty_sources() {
    let broken = BrokenStore;
    let empty = MemoryProgressStore::new(Vec::new());
    let cache = temp_cache();
    let (levels, origin) = load_levels(
      &[LevelSource::Store(&broken), LevelSource::Store(&empty), LevelSource::Cache(&cache)],
      CANONICAL_LEVEL_IDS,
    )
    .await;
    assert_eq!(origin, LevelOrigin::Defaults);
    assert_eq!(levels, default_levels());
  }

  #[tokio::test]
  async fn chain_rejects_sets_without_canonical_ids() {
    let partial: Vec<Level> = default_levels().into_iter().filter(|l| l.id != HAGRID_LEVEL_ID).collect();
    let store = MemoryProgressStore::new(partial);
    let cache = temp_cache();
    let mut cached = default_levels();
    cached[0].status = LevelStatus::Completed;
    cached[1].status = LevelStatus::Unlocked;
    cache.save(&cached).await.unwrap();

    let (levels, origin) = load_levels(&[LevelSource::Store(&store), LevelSource::Cache(&cache)], CANONICAL_LEVEL_IDS).await;
    assert_eq!(origin, LevelOrigin::Cache);
    assert_eq!(levels, cached);
    let _ = std::fs::remove_file(cache.path());
  }
}
