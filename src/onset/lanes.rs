//! Lane assignment for emitted onsets.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanePolicy {
    /// Jump to a random other lane when the energy changes sharply or a
    /// different band fired; otherwise stay on the previous lane.
    #[default]
    Adaptive,
    /// Always jump to a random lane other than the previous one.
    Random,
    /// Lane is the firing band's index, wrapped to the lane count.
    Band,
    /// Louder onsets relative to the baseline land on higher lanes.
    EnergyRatio,
}

/// What the detector knows about the onset being placed.
#[derive(Debug, Clone, Copy)]
pub struct LaneContext {
    pub band: usize,
    pub energy: f32,
    pub average: f32,
    pub variance: f32,
}

#[derive(Debug)]
pub struct LaneAssigner {
    policy: LanePolicy,
    change_factor: f32,
    seed: Option<u64>,
    rng: StdRng,
}

impl LaneAssigner {
    pub fn new(policy: LanePolicy, change_factor: f32, seed: Option<u64>) -> Self {
        Self {
            policy,
            change_factor,
            seed,
            rng: make_rng(seed),
        }
    }

    pub fn policy(&self) -> LanePolicy {
        self.policy
    }

    /// Change policy and threshold without disturbing the random sequence.
    pub fn configure(&mut self, policy: LanePolicy, change_factor: f32) {
        self.policy = policy;
        self.change_factor = change_factor;
    }

    /// Restart the random sequence from the configured seed.
    pub fn reset(&mut self, seed: Option<u64>) {
        self.seed = seed;
        self.rng = make_rng(seed);
    }

    /// Pick a lane in `0..num_lanes`.
    ///
    /// `last` is the previous emission as `(lane, band, energy)`.
    pub fn assign(
        &mut self,
        ctx: &LaneContext,
        last: Option<(usize, usize, f32)>,
        num_lanes: usize,
    ) -> usize {
        let num_lanes = num_lanes.max(1);
        let previous = last.map(|(lane, _, _)| lane);

        match self.policy {
            LanePolicy::Adaptive => match last {
                Some((lane, band, energy)) if lane < num_lanes => {
                    let sharp =
                        (ctx.energy - energy).abs() > self.change_factor * ctx.variance;
                    if sharp || band != ctx.band {
                        self.random_excluding(previous, num_lanes)
                    } else {
                        lane
                    }
                }
                _ => self.random_excluding(previous, num_lanes),
            },
            LanePolicy::Random => self.random_excluding(previous, num_lanes),
            LanePolicy::Band => ctx.band % num_lanes,
            LanePolicy::EnergyRatio => {
                let ratio = if ctx.average > 0.0 {
                    ctx.energy / ctx.average
                } else {
                    1.0
                };
                ratio.clamp(1.0, num_lanes as f32) as usize - 1
            }
        }
    }

    fn random_excluding(&mut self, previous: Option<usize>, num_lanes: usize) -> usize {
        match previous {
            Some(p) if p < num_lanes && num_lanes > 1 => {
                let r = self.rng.gen_range(0..num_lanes - 1);
                if r >= p { r + 1 } else { r }
            }
            _ => self.rng.gen_range(0..num_lanes),
        }
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
