use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Uniform integer generator owned by a single worker thread.
pub trait RandomSource: Send {
    /// Returns an integer uniformly drawn in `[0, cap)`. A `cap` of 0 yields 0.
    fn next_below(&mut self, cap: u32) -> u32;
}

/// ChaCha8 backed source, seeded from OS entropy unless a seed is given.
pub struct EntropySource {
    rng: ChaCha8Rng,
}

impl EntropySource {
    pub fn new() -> EntropySource {
        EntropySource { rng: ChaCha8Rng::from_entropy() }
    }

    /// Reproducible source: `stream` selects an independent ChaCha stream for the same seed
    pub fn seeded(seed: u64, stream: u64) -> EntropySource {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        EntropySource { rng }
    }
}

impl Default for EntropySource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for EntropySource {
    fn next_below(&mut self, cap: u32) -> u32 {
        if cap == 0 {
            return 0;
        }
        self.rng.gen_range(0..cap)
    }
}

/// Source returning the same value on every draw (clamped below `cap`).
///
/// Used to make breeding deterministic: with a value of 1 crossover always keeps
/// the first parent, mutation never fires and roulette selection picks the worst
/// individual.
#[derive(Clone, Debug)]
pub struct ConstantSource {
    value: u32,
}

impl ConstantSource {
    pub fn new(value: u32) -> ConstantSource {
        ConstantSource { value }
    }
}

impl RandomSource for ConstantSource {
    fn next_below(&mut self, cap: u32) -> u32 {
        self.value.min(cap.saturating_sub(1))
    }
}

/// Builds `count` independent sources, one per worker thread.
///
/// # Arguments
///
/// * `seed` - Optional run seed; without it every source is seeded from entropy.
/// * `family` - Identifies the owner (e.g. the population index) so that owners sharing
///   a seed never share a stream.
/// * `count` - Number of sources (at least one is always returned).
pub fn sources(seed: Option<u64>, family: u64, count: usize) -> Vec<Box<dyn RandomSource>> {
    (0..count.max(1) as u64)
        .map(|thread_id| -> Box<dyn RandomSource> {
            match seed {
                Some(seed) => Box::new(EntropySource::seeded(seed, family * 1024 + thread_id)),
                None => Box::new(EntropySource::new()),
            }
        })
        .collect()
}
