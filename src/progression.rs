//! Level progression graph.
//!
//! Pure transformations over `Vec<Level>`: status computation from completion markers,
//! completion with linear unlock of the next level by `order`, and current-level lookup.
//! Unknown ids are ignored (stale client state must never break progression).

use std::collections::HashSet;

use tracing::debug;

use crate::domain::{Level, LevelStatus};

fn sorted_by_order(levels: &[Level]) -> Vec<Level> {
  let mut out = levels.to_vec();
  out.sort_by_key(|l| l.order);
  out
}

/// Derive every level's status from the set of completed ids.
///
/// Output is sorted by ascending `order`. A level is completed when its id is in
/// `completed_ids`, unlocked when every lower-order level is completed, locked otherwise.
pub fn compute_statuses(levels: &[Level], completed_ids: &HashSet<String>) -> Vec<Level> {
  let mut out = sorted_by_order(levels);
  let mut all_before_completed = true;
  for level in out.iter_mut() {
    level.status = if completed_ids.contains(&level.id) {
      LevelStatus::Completed
    } else if all_before_completed {
      LevelStatus::Unlocked
    } else {
      LevelStatus::Locked
    };
    if level.status != LevelStatus::Completed {
      all_before_completed = false;
    }
  }
  out
}

/// Mark `level_id` completed and unlock the next level by order if it is still locked.
///
/// Idempotent. Unknown ids and completed levels leave the input unchanged; a locked level
/// is completed like any other. Nothing is ever demoted.
pub fn complete_level(levels: &[Level], level_id: &str) -> Vec<Level> {
  let Some(target) = levels.iter().find(|l| l.id == level_id) else {
    debug!(target: "progression", %level_id, "Unknown level id; ignoring completion");
    return levels.to_vec();
  };
  if target.status == LevelStatus::Completed {
    return levels.to_vec();
  }

  let target_order = target.order;
  let next_id = levels
    .iter()
    .filter(|l| l.order > target_order)
    .min_by_key(|l| l.order)
    .map(|l| l.id.clone());

  levels
    .iter()
    .map(|l| {
      let mut l = l.clone();
      if l.id == level_id {
        l.status = LevelStatus::Completed;
      } else if Some(&l.id) == next_id.as_ref() && l.status == LevelStatus::Locked {
        l.status = LevelStatus::Unlocked;
      }
      l
    })
    .collect()
}

/// First unlocked level; when none is unlocked (everything completed) the last level,
/// which is what the player replays. `None` only for an empty list.
pub fn current_level(levels: &[Level]) -> Option<&Level> {
  levels
    .iter()
    .find(|l| l.status == LevelStatus::Unlocked)
    .or_else(|| levels.last())
}

/// Completed share of the catalog, rounded to a whole percent.
pub fn progress_percent(levels: &[Level]) -> u8 {
  if levels.is_empty() {
    return 0;
  }
  let completed = levels.iter().filter(|l| l.status == LevelStatus::Completed).count();
  ((completed as f64 / levels.len() as f64) * 100.0).round() as u8
}

/// Back to the initial layout: first level unlocked, everything else locked.
pub fn reset_progress(levels: &[Level]) -> Vec<Level> {
  compute_statuses(levels, &HashSet::new())
}

pub fn completed_ids(levels: &[Level]) -> HashSet<String> {
  levels
    .iter()
    .filter(|l| l.status == LevelStatus::Completed)
    .map(|l| l.id.clone())
    .collect()
}

/// A loaded level set is only trusted when it contains every canonical id.
pub fn has_canonical_levels(levels: &[Level], canonical_ids: &[&str]) -> bool {
  canonical_ids.iter().all(|id| levels.iter().any(|l| l.id == *id))
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn level(id: &str, order: i32) -> Level {
    Level {
      id: id.into(),
      order,
      status: LevelStatus::Locked,
      title: id.to_uppercase(),
      description: String::new(),
      content: Default::default(),
    }
  }

  fn abc() -> Vec<Level> {
    compute_statuses(&[level("c", 3), level("a", 1), level("b", 2)], &HashSet::new())
  }

  fn statuses(levels: &[Level]) -> Vec<LevelStatus> {
    levels.iter().map(|l| l.status).collect()
  }

  #[test]
  fn scenario_three_levels_unlock_linearly() {
    use LevelStatus::*;
    let levels = abc();
    assert_eq!(levels.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), ["a", "b", "c"]);
    assert_eq!(statuses(&levels), [Unlocked, Locked, Locked]);

    let after = complete_level(&levels, "a");
    assert_eq!(statuses(&after), [Completed, Unlocked, Locked]);
  }

  #[test]
  fn compute_statuses_uses_completion_markers() {
    use LevelStatus::*;
    let done: HashSet<String> = ["a".to_string()].into();
    assert_eq!(statuses(&compute_statuses(&abc(), &done)), [Completed, Unlocked, Locked]);

    let gap: HashSet<String> = ["b".to_string()].into();
    assert_eq!(statuses(&compute_statuses(&abc(), &gap)), [Unlocked, Completed, Locked]);
  }

  #[test]
  fn completion_is_idempotent() {
    let once = complete_level(&abc(), "a");
    let twice = complete_level(&once, "a");
    assert_eq!(once, twice);
  }

  #[test]
  fn unknown_ids_are_no_ops() {
    let levels = abc();
    assert_eq!(complete_level(&levels, "nope"), levels);
  }

  #[test]
  fn locked_levels_can_still_be_completed() {
    use LevelStatus::*;
    let after = complete_level(&abc(), "b");
    assert_eq!(statuses(&after), [Unlocked, Completed, Unlocked]);
    assert_eq!(statuses(&complete_level(&abc(), "c")), [Unlocked, Locked, Completed]);
  }

  #[test]
  fn current_level_falls_back_to_last_when_all_done() {
    let mut levels = abc();
    assert_eq!(current_level(&levels).map(|l| l.id.as_str()), Some("a"));
    for id in ["a", "b", "c"] {
      levels = complete_level(&levels, id);
    }
    assert_eq!(current_level(&levels).map(|l| l.id.as_str()), Some("c"));
    assert_eq!(progress_percent(&levels), 100);
    assert!(current_level(&[]).is_none());
  }

  #[test]
  fn progress_and_reset() {
    let levels = complete_level(&abc(), "a");
    assert_eq!(progress_percent(&levels), 33);
    assert_eq!(reset_progress(&levels), abc());
  }

  #[test]
  fn random_completion_sequences_never_regress() {
    let ids = ["a", "b", "c", "d", "ghost", ""];
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
      let mut levels = compute_statuses(
        &[level("a", 1), level("b", 2), level("c", 5), level("d", 9)],
        &HashSet::new(),
      );
      for _ in 0..12 {
        let id = ids[rng.gen_range(0..ids.len())];
        let before = levels.clone();
        levels = complete_level(&levels, id);

        for (old, new) in before.iter().zip(levels.iter()) {
          if old.status == LevelStatus::Completed {
            assert_eq!(new.status, LevelStatus::Completed);
          }
          if old.status != LevelStatus::Locked {
            assert_ne!(new.status, LevelStatus::Locked);
          }
        }
        for pair in levels.windows(2) {
          if pair[0].status == LevelStatus::Completed {
            assert_ne!(pair[1].status, LevelStatus::Locked);
          }
        }
        assert_ne!(levels[0].status, LevelStatus::Locked);
      }
    }
  }

  #[test]
  fn canonical_validation() {
    let levels = abc();
    assert!(has_canonical_levels(&levels, &["a", "c"]));
    assert!(!has_canonical_levels(&levels, &["a", "z"]));
  }
}
