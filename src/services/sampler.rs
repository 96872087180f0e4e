//! Non-repeating first-axis sampler for Mode A drills
//!
//! Draws (base angle, offset) pairs from a shuffled cross-product of the two
//! sets. Every pair is returned exactly once before the pool is reshuffled.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampler needs at least one base angle and one offset (got {bases} and {offsets})")]
    EmptySet { bases: usize, offsets: usize },
}

/// Shuffle bag over base × offset
///
/// Takes `&mut self` to draw; one owner per sampler.
#[derive(Debug)]
pub struct NonRepeatingSampler {
    bases: Vec<f64>,
    offsets: Vec<f64>,
    pool: Vec<(f64, f64)>,
    cursor: usize,
    shuffles: u64,
    rng: StdRng,
}

impl NonRepeatingSampler {
    /// Build a sampler; `seed` makes the draw order reproducible
    pub fn new(bases: &[f64], offsets: &[f64], seed: Option<u64>) -> Result<Self, SamplerError> {
        if bases.is_empty() || offsets.is_empty() {
            return Err(SamplerError::EmptySet { bases: bases.len(), offsets: offsets.len() });
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            bases: bases.to_vec(),
            offsets: offsets.to_vec(),
            pool: Vec::new(),
            cursor: 0,
            shuffles: 0,
            rng,
        })
    }

    /// Next (base, offset) pair
    pub fn draw(&mut self) -> (f64, f64) {
        if self.cursor >= self.pool.len() {
            self.reshuffle();
        }
        let pair = self.pool[self.cursor];
        self.cursor += 1;
        pair
    }

    /// Number of draws in one cycle
    pub fn pool_size(&self) -> usize {
        self.bases.len() * self.offsets.len()
    }

    /// How many times the pool has been (re)built
    pub fn shuffles(&self) -> u64 {
        self.shuffles
    }

    fn reshuffle(&mut self) {
        self.pool.clear();
        for &base in &self.bases {
            for &offset in &self.offsets {
                self.pool.push((base, offset));
            }
        }
        self.pool.shuffle(&mut self.rng);
        self.cursor = 0;
        self.shuffles += 1;

        info!(pool_size = %self.pool.len(), cycle = %self.shuffles, "sampler_reshuffled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;
    use rustc_hash::FxHashSet;

    fn key(pair: (f64, f64)) -> (u64, u64) {
        (pair.0.to_bits(), pair.1.to_bits())
    }

    fn full_product(bases: &[f64], offsets: &[f64]) -> FxHashSet<(u64, u64)> {
        bases.iter().flat_map(|&b| offsets.iter().map(move |&o| key((b, o)))).collect()
    }

    #[test]
    fn test_each_cycle_is_a_permutation() {
        let config = Config::default();
        let mut sampler =
            NonRepeatingSampler::new(config.base_angles(), config.offsets(), Some(7)).unwrap();
        let size = sampler.pool_size();
        assert_eq!(size, 126);
        let expected = full_product(config.base_angles(), config.offsets());

        for cycle in 1..=3u64 {
            let mut seen = FxHashSet::default();
            for _ in 0..size {
                assert!(seen.insert(key(sampler.draw())), "repeat within cycle {}", cycle);
            }
            assert_eq!(seen, expected);
            assert_eq!(sampler.shuffles(), cycle);
        }
    }

    #[test]
    fn test_reshuffles_on_next_draw_after_exhaustion() {
        let mut sampler = NonRepeatingSampler::new(&[0.0, 15.0], &[0.0, -1.0, -2.0], Some(1)).unwrap();
        assert_eq!(sampler.shuffles(), 0);

        for _ in 0..6 {
            sampler.draw();
        }
        assert_eq!(sampler.shuffles(), 1);

        sampler.draw();
        assert_eq!(sampler.shuffles(), 2);
    }

    #[test]
    fn test_same_seed_same_order() {
        let draw_all = |seed| {
            let mut sampler =
                NonRepeatingSampler::new(&[-160.0, -145.0, -130.0], &[0.0, -1.0], Some(seed)).unwrap();
            (0..12).map(|_| key(sampler.draw())).collect::<Vec<_>>()
        };
        assert_eq!(draw_all(42), draw_all(42));
    }

    #[test]
    fn test_single_pair() {
        let mut sampler = NonRepeatingSampler::new(&[30.0], &[-2.0], None).unwrap();
        assert_eq!(sampler.draw(), (30.0, -2.0));
        assert_eq!(sampler.draw(), (30.0, -2.0));
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(
            NonRepeatingSampler::new(&[], &[0.0], None),
            Err(SamplerError::EmptySet { bases: 0, offsets: 1 })
        ));
        assert!(NonRepeatingSampler::new(&[0.0], &[], None).is_err());
    }
}
