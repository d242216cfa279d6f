//! Synthetic lift-ride payload generation.
//!
//! Every logical request gets a fresh [`LiftRide`] with independently drawn
//! fields. Each worker owns its own [`PayloadFactory`] so generation needs no
//! shared state, and a seeded factory yields a reproducible sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Inclusive bounds for the generated fields.
pub const TIME_RANGE: (u32, u32) = (1, 360);
pub const LIFT_ID_RANGE: (u32, u32) = (1, 40);
pub const RESORT_ID_RANGE: (u32, u32) = (0, 10);
pub const DAY_ID_RANGE: (u32, u32) = (1, 365);
pub const SKIER_ID_RANGE: (u32, u32) = (0, 100_000);

/// One lift ride event addressed to a skier on a given resort/season/day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftRide {
    pub time: u32,
    pub lift_id: u32,
    pub resort_id: u32,
    pub season_id: String,
    pub day_id: String,
    pub skier_id: u32,
}

/// JSON body sent to the endpoint; the path carries the remaining fields.
#[derive(Debug, Serialize)]
pub struct LiftRideBody {
    pub time: u32,
    #[serde(rename = "liftID")]
    pub lift_id: u32,
}

impl LiftRide {
    /// Request path below the configured base URL.
    pub fn path(&self) -> String {
        format!(
            "/{}/seasons/{}/days/{}/skiers/{}",
            self.resort_id, self.season_id, self.day_id, self.skier_id
        )
    }

    pub fn body(&self) -> LiftRideBody {
        LiftRideBody {
            time: self.time,
            lift_id: self.lift_id,
        }
    }
}

/// Per-worker payload generator.
pub struct PayloadFactory {
    rng: StdRng,
    season_id: String,
}

impl PayloadFactory {
    /// Factory with a fixed seed, for reproducible runs.
    pub fn seeded(seed: u64, season_id: impl Into<String>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            season_id: season_id.into(),
        }
    }

    /// Factory seeded from OS entropy.
    pub fn from_entropy(season_id: impl Into<String>) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            season_id: season_id.into(),
        }
    }

    /// Factory for one worker of a run. With a run seed the worker's stream
    /// is derived from `(seed, phase, worker)`, otherwise it is unseeded.
    pub fn for_worker(
        run_seed: Option<u64>,
        phase_index: usize,
        worker_index: usize,
        season_id: &str,
    ) -> Self {
        match run_seed {
            Some(seed) => Self::seeded(derive_seed(seed, phase_index, worker_index), season_id),
            None => Self::from_entropy(season_id),
        }
    }

    pub fn next_ride(&mut self) -> LiftRide {
        LiftRide {
            time: self.rng.gen_range(TIME_RANGE.0..=TIME_RANGE.1),
            lift_id: self.rng.gen_range(LIFT_ID_RANGE.0..=LIFT_ID_RANGE.1),
            resort_id: self.rng.gen_range(RESORT_ID_RANGE.0..=RESORT_ID_RANGE.1),
            season_id: self.season_id.clone(),
            day_id: self
                .rng
                .gen_range(DAY_ID_RANGE.0..=DAY_ID_RANGE.1)
                .to_string(),
            skier_id: self.rng.gen_range(SKIER_ID_RANGE.0..=SKIER_ID_RANGE.1),
        }
    }
}

/// Mix the run seed with the worker coordinates (splitmix64 finalizer) so
/// neighbouring workers do not get correlated streams.
fn derive_seed(seed: u64, phase_index: usize, worker_index: usize) -> u64 {
    let mut z = seed
        ^ (phase_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (worker_index as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
