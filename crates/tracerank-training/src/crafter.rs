//! Weight crafting: the stochastic search that proposes each cycle's weights.
//!
//! A crafter owns the live weight vector plus a snapshot of the best weights
//! ever accepted. After every cycle the trainer reports whether the proposal
//! improved the rank total; the crafter reacts by keeping or discarding the
//! proposal and mutating the live vector again for the next cycle.
//!
//! The concrete [`GeometricCrafter`] alternates between two regimes:
//!
//! - **random search**: perturb a geometrically-spaced sparse set of indices
//!   by large random deltas, shrinking the index spacing over time;
//! - **crawl**: once a random perturbation stops paying off, retry the same
//!   index set in unit steps (and once, in the reversed directions) to climb
//!   the local slope it found.

use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Geometric};

use tracerank_engine::{MAX_WEIGHT, MIN_WEIGHT, WEIGHT_CARDINALITY, Weight};

/// Shrink factor applied to the sparsity numerator on every re-randomization.
const P_NUMERATOR_MULTIPLIER: f64 = 0.99;
/// Below this the numerator cycles back up to `weights_count * 0.99`.
const MIN_P_NUMERATOR: f64 = 0.1;

/// Largest magnitude a single random alteration may have.
const MAX_WEIGHT_DELTA: u32 = WEIGHT_CARDINALITY - 1;
/// Largest single decrement of the delta ceiling, cycling it back up when it
/// would drop too low.
const MAX_WEIGHT_DELTA_DECREMENT: u32 = MAX_WEIGHT_DELTA / 1000;

/// Strategy seam for weight proposal engines.
///
/// The trainer drives a crafter purely through improvement notifications, so
/// alternative search strategies can be plugged in behind this trait.
pub trait WeightsCrafter {
    fn weights_count(&self) -> usize;

    /// The live weight vector the next cycle should evaluate.
    fn current(&self) -> &[Weight];

    /// The best known weight vector: the starting vector until a proposal is
    /// accepted, then the latest accepted proposal.
    fn best(&self) -> &[Weight];

    /// The latest proposal beat the best known rank total: keep it and
    /// propose a further step in the same spirit.
    fn notify_improved(&mut self);

    /// The latest proposal did not improve: discard it and propose a
    /// different step.
    fn notify_no_improvement(&mut self);

    /// Copies the best known weights back into the live vector, so the
    /// persisted result is the best ever observed.
    fn restore_best(&mut self);

    /// One-line state description for progress records.
    fn state_summary(&self) -> String;
}

/// The geometric random-search crafter.
pub struct GeometricCrafter {
    rng: StdRng,
    current: Vec<Weight>,
    best: Vec<Weight>,
    /// Indices the next alteration touches, ascending.
    alter_indices: Vec<usize>,
    /// Per-index direction, parallel to `alter_indices`. True is up.
    alter_directions: Vec<bool>,
    p_numerator: f64,
    max_interval: u64,
    max_weight_delta: u32,
    crawl: bool,
    previously_improved: bool,
}

impl GeometricCrafter {
    /// A crafter over `weights_count` uniformly random weights.
    #[must_use]
    pub fn new(weights_count: usize) -> Self {
        let mut rng = StdRng::from_os_rng();
        let current = (0..weights_count).map(|_| rng.random()).collect();
        Self::from_parts(rng, current)
    }

    /// A crafter starting from an existing weight vector, typically loaded
    /// from a weights file. The initial vector is remembered as the best.
    #[must_use]
    pub fn with_weights(weights: Vec<Weight>) -> Self {
        Self::from_parts(StdRng::from_os_rng(), weights)
    }

    fn from_parts(rng: StdRng, current: Vec<Weight>) -> Self {
        assert!(!current.is_empty(), "a crafter needs at least one weight");
        let best = current.clone();
        let mut crafter = Self {
            rng,
            current,
            best,
            alter_indices: Vec::new(),
            alter_directions: Vec::new(),
            p_numerator: 0.0,
            max_interval: 0,
            max_weight_delta: 0,
            crawl: false,
            previously_improved: false,
        };
        crafter.randomize_alterings();
        crafter.alter_until_changed();
        crafter
    }

    /// Draws a fresh alteration plan: which indices to touch, in which
    /// directions. Leaves the crafter in the random-search regime.
    ///
    /// Index spacing is geometric: a spacing ceiling is drawn from a
    /// geometric distribution whose parameter decays by 1% per call, so plans
    /// oscillate between touching nearly every weight and touching a sparse
    /// scattering of them.
    fn randomize_alterings(&mut self) {
        self.crawl = false;
        self.previously_improved = false;

        let count = self.current.len();
        self.p_numerator *= P_NUMERATOR_MULTIPLIER;
        if self.p_numerator < MIN_P_NUMERATOR {
            self.p_numerator = count as f64 * P_NUMERATOR_MULTIPLIER;
        }

        let spacing = Geometric::new(self.p_numerator / count as f64).unwrap();
        self.max_interval = (spacing.sample(&mut self.rng) + 1).min(count as u64);

        self.alter_indices.clear();
        self.alter_directions.clear();
        if self.max_interval > 1 {
            let mut index = self.rng.random_range(0..self.max_interval) as usize;
            while index < count {
                self.alter_indices.push(index);
                self.alter_directions.push(self.rng.random());
                index += self.rng.random_range(1..=self.max_interval) as usize;
            }
        } else {
            for index in 0..count {
                self.alter_indices.push(index);
                self.alter_directions.push(self.rng.random());
            }
        }
    }

    /// Applies the current plan to the live weights. Returns whether at least
    /// one weight actually moved; saturation at the type bounds can swallow
    /// individual alterations.
    fn alter(&mut self) -> bool {
        let mut altered = false;

        if self.crawl {
            for (&index, &up) in self.alter_indices.iter().zip(&self.alter_directions) {
                let weight = &mut self.current[index];
                if up {
                    if *weight < MAX_WEIGHT {
                        *weight += 1;
                        altered = true;
                    }
                } else if *weight > MIN_WEIGHT {
                    *weight -= 1;
                    altered = true;
                }
            }
            return altered;
        }

        // Walk the delta ceiling down, cycling back to the top when it would
        // bottom out, so magnitudes sweep from coarse to fine and back.
        let decrement = self.rng.random_range(1..=MAX_WEIGHT_DELTA_DECREMENT);
        if decrement + 2 > self.max_weight_delta {
            self.max_weight_delta = MAX_WEIGHT_DELTA;
        } else {
            self.max_weight_delta -= decrement;
        }

        for (&index, &up) in self.alter_indices.iter().zip(&self.alter_directions) {
            let weight = self.current[index];
            if up {
                if weight < MAX_WEIGHT {
                    let delta = self.rng.random_range(1..=self.max_weight_delta) as i32;
                    self.current[index] =
                        (i32::from(weight) + delta).min(i32::from(MAX_WEIGHT)) as Weight;
                    altered = true;
                }
            } else if weight > MIN_WEIGHT {
                let delta = self.rng.random_range(1..=self.max_weight_delta) as i32;
                self.current[index] =
                    (i32::from(weight) - delta).max(i32::from(MIN_WEIGHT)) as Weight;
                altered = true;
            }
        }
        altered
    }

    /// Alters the live weights, redrawing the plan until something moves.
    /// Every notification must leave a genuinely new proposal behind.
    fn alter_until_changed(&mut self) {
        while !self.alter() {
            self.randomize_alterings();
        }
    }
}

impl WeightsCrafter for GeometricCrafter {
    fn weights_count(&self) -> usize {
        self.current.len()
    }

    fn current(&self) -> &[Weight] {
        &self.current
    }

    fn best(&self) -> &[Weight] {
        &self.best
    }

    fn notify_improved(&mut self) {
        self.best.copy_from_slice(&self.current);
        self.previously_improved = true;
        self.alter_until_changed();
    }

    fn notify_no_improvement(&mut self) {
        self.current.copy_from_slice(&self.best);

        if self.crawl {
            if self.previously_improved {
                // Crawling stopped paying off, or the reversed directions
                // never paid off either: start over with a fresh plan.
                self.randomize_alterings();
            } else {
                // The crawl never improved anything; try the opposite slope
                // once before giving up on this plan.
                for direction in &mut self.alter_directions {
                    *direction = !*direction;
                }
                self.previously_improved = true;
            }
        } else if self.previously_improved {
            // The random plan improved before it stalled; climb its
            // neighborhood in unit steps.
            self.crawl = true;
            self.previously_improved = false;
        } else {
            self.randomize_alterings();
        }

        self.alter_until_changed();
    }

    fn restore_best(&mut self) {
        self.current.copy_from_slice(&self.best);
    }

    fn state_summary(&self) -> String {
        format!(
            "weight delta ceiling {}/{MAX_WEIGHT_DELTA}, index spacing ceiling {}/{}{}",
            self.max_weight_delta,
            self.max_interval,
            self.current.len(),
            if self.crawl { ", crawling" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A crafter with a fully pinned alteration plan, for exercising the
    /// notification state machine deterministically.
    fn pinned(weights: Vec<Weight>, indices: Vec<usize>, directions: Vec<bool>) -> GeometricCrafter {
        let mut crafter = GeometricCrafter::with_weights(weights);
        crafter.current.copy_from_slice(&crafter.best);
        crafter.crawl = false;
        crafter.previously_improved = false;
        crafter.alter_indices = indices;
        crafter.alter_directions = directions;
        crafter
    }

    #[test]
    fn test_construction_leaves_a_live_proposal() {
        let crafter = GeometricCrafter::new(40);
        assert_eq!(crafter.weights_count(), 40);
        assert_ne!(crafter.current, crafter.best, "construction must pre-alter");
    }

    #[test]
    fn test_with_weights_remembers_initial_vector_as_best() {
        let initial: Vec<Weight> = (0..30).map(|i| i * 100).collect();
        let crafter = GeometricCrafter::with_weights(initial.clone());
        assert_eq!(crafter.best, initial);
        assert_ne!(crafter.current, initial);
    }

    #[test]
    fn test_saturated_weights_still_produce_a_change() {
        // With every weight at the top, only a downward alteration can move
        // anything; the redraw-until-changed loop must find one.
        let crafter = GeometricCrafter::with_weights(vec![MAX_WEIGHT; 25]);
        assert_ne!(crafter.current, crafter.best);
        let crafter = GeometricCrafter::with_weights(vec![MIN_WEIGHT; 25]);
        assert_ne!(crafter.current, crafter.best);
    }

    #[test]
    fn test_improvement_snapshots_current_as_best() {
        let mut crafter = pinned(vec![5; 10], vec![3], vec![true]);
        crafter.current[3] = 77;
        crafter.notify_improved();
        assert_eq!(crafter.best[3], 77);
        assert!(crafter.previously_improved);
        // The plan was re-applied on top of the snapshot.
        assert!(crafter.current[3] > 77);
    }

    #[test]
    fn test_stalled_random_plan_enters_crawl() {
        let mut crafter = pinned(vec![100; 10], vec![4], vec![true]);
        crafter.previously_improved = true;

        crafter.notify_no_improvement();
        assert!(crafter.crawl);
        assert!(!crafter.previously_improved);
        // Crawl steps by exactly one in the planned direction.
        assert_eq!(crafter.current[4], 101);
        assert_eq!(crafter.best[4], 100);
    }

    #[test]
    fn test_fruitless_crawl_reverses_directions_once_then_rerandomizes() {
        let mut crafter = pinned(vec![100; 10], vec![4], vec![true]);
        crafter.crawl = true;

        // First setback in a fruitless crawl: same indices, reversed slope.
        crafter.notify_no_improvement();
        assert!(crafter.crawl);
        assert!(crafter.previously_improved);
        assert_eq!(crafter.alter_directions, vec![false]);
        assert_eq!(crafter.current[4], 99);

        // Second setback: the plan is abandoned for a fresh random one.
        crafter.notify_no_improvement();
        assert!(!crafter.crawl);
        assert_ne!(crafter.current, crafter.best);
    }

    #[test]
    fn test_stalled_unimproved_plan_rerandomizes() {
        let mut crafter = pinned(vec![100; 10], vec![4], vec![true]);
        crafter.notify_no_improvement();
        assert!(!crafter.crawl);
        assert_ne!(crafter.current, crafter.best);
    }

    #[test]
    fn test_restore_best_discards_the_live_proposal() {
        let mut crafter = GeometricCrafter::new(20);
        assert_ne!(crafter.current, crafter.best);
        crafter.restore_best();
        assert_eq!(crafter.current, crafter.best);
    }

    #[test]
    fn test_sparsity_numerator_decays_and_cycles() {
        let mut crafter = GeometricCrafter::new(50);
        let ceiling = 50.0 * P_NUMERATOR_MULTIPLIER;
        for _ in 0..5_000 {
            let before = crafter.p_numerator;
            crafter.randomize_alterings();
            assert!(crafter.p_numerator > 0.0);
            assert!(crafter.p_numerator <= ceiling);
            // Either decayed by one multiplier step or wrapped to the top.
            assert!(
                crafter.p_numerator < before || crafter.p_numerator == ceiling,
                "numerator {} after {before}",
                crafter.p_numerator,
            );
            assert!(!crafter.alter_indices.is_empty());
            assert!((1..=50).contains(&crafter.max_interval));
        }
    }

    #[test]
    fn test_weights_survive_many_notification_cycles() {
        // Overflow in the widened arithmetic or a broken retry loop would
        // panic or stall here; the proposal must also always differ from the
        // snapshot it will be judged against.
        let mut crafter = GeometricCrafter::new(70);
        for cycle in 0..500 {
            if cycle % 7 == 0 {
                crafter.notify_improved();
            } else {
                crafter.notify_no_improvement();
            }
            assert_ne!(crafter.current, crafter.best);
        }
    }
}
