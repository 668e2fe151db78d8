//! RandomSource — jitter abstraction for the retry decorator's backoff
//! calculator. Kept as a trait (rather than calling `rand` directly from
//! the retry module) so deterministic jitter can be substituted in tests.

use rand::Rng;

pub trait RandomSource: Send + Sync + std::fmt::Debug {
    /// A uniform value in `[0.0, 1.0)`.
    fn next_f64(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic source for tests: always returns the configured value.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandomSource(pub f64);

impl RandomSource for FixedRandomSource {
    fn next_f64(&self) -> f64 {
        self.0
    }
}
