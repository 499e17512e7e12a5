//! Challenge catalog: per-kind timing, tolerance, checkpoint count and cosmetics.
//! Pure data; the validator reads `duration_ms`, `tolerance` and `control_points`.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// XP awarded on every successful challenge.
pub const XP_BONUS: u32 = 30;
/// Probability that a success also reveals a hint.
pub const HINT_REVEAL_CHANCE: f64 = 0.2;
/// Probability that an accepted turn spawns a challenge.
pub const CHALLENGE_SPAWN_RATE: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeKind {
  Dementor,
  Spider,
  Fire,
  DevilSnare,
  Serpent,
  IceTrap,
}

pub const ALL_KINDS: [ChallengeKind; 6] = [
  ChallengeKind::Dementor,
  ChallengeKind::Spider,
  ChallengeKind::Fire,
  ChallengeKind::DevilSnare,
  ChallengeKind::Serpent,
  ChallengeKind::IceTrap,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeDifficulty {
  Easy,
  Medium,
  Hard,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChallengeSpec {
  pub kind: ChallengeKind,
  pub spell: &'static str,
  pub difficulty: ChallengeDifficulty,
  pub description: &'static str,
  pub enemy_name: &'static str,
  pub color: &'static str,
  pub glow_color: &'static str,
  pub duration_ms: i64,
  /// Max distance from the ideal radius before the trace is off path.
  pub tolerance: f64,
  pub control_points: usize,
}

impl ChallengeKind {
  pub fn spec(self) -> ChallengeSpec {
    use ChallengeDifficulty::*;
    let (spell, difficulty, description, enemy_name, color, glow_color, duration_ms, tolerance, control_points) = match self {
      ChallengeKind::Dementor => ("Expecto Patronum", Hard, "A Dementor rises from the darkness!", "Dementor", "#C0D6E4", "rgba(192, 214, 228, 0.8)", 10_000, 35.0, 6),
      ChallengeKind::Spider => ("Arania Exumai", Medium, "A giant spider attacks!", "Acromantula", "#E74C3C", "rgba(231, 76, 60, 0.8)", 12_000, 40.0, 5),
      ChallengeKind::Fire => ("Aguamenti", Easy, "Magical flames are spreading!", "Cursed Fire", "#3498DB", "rgba(52, 152, 219, 0.8)", 15_000, 45.0, 5),
      ChallengeKind::DevilSnare => ("Lumos Solem", Medium, "Devil's Snare tightens around you!", "Devil's Snare", "#F39C12", "rgba(243, 156, 18, 0.8)", 12_000, 40.0, 5),
      ChallengeKind::Serpent => ("Vipera Evanesca", Easy, "A venomous serpent rears up!", "Cursed Serpent", "#2ECC71", "rgba(46, 204, 113, 0.8)", 15_000, 45.0, 5),
      ChallengeKind::IceTrap => ("Incendio", Medium, "An ice trap closes in!", "Ice Trap", "#E67E22", "rgba(230, 126, 34, 0.8)", 12_000, 40.0, 5),
    };
    ChallengeSpec { kind: self, spell, difficulty, description, enemy_name, color, glow_color, duration_ms, tolerance, control_points }
  }
}

/// Roll the per-turn spawn chance.
pub fn should_spawn<R: Rng>(rng: &mut R) -> bool {
  rng.gen_bool(CHALLENGE_SPAWN_RATE)
}

pub fn random_kind<R: Rng>(rng: &mut R) -> ChallengeKind {
  *ALL_KINDS.choose(rng).unwrap_or(&ChallengeKind::Fire)
}
