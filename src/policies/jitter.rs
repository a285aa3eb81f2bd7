//! # Jitter sources for retry delays.
//!
//! Jitter spreads redeliveries of messages that failed together so they do not
//! come back as a herd. The policy perturbs each scheduled delay with a sample
//! from a normal distribution centred on that delay.
//!
//! The randomness is injectable through [`JitterSource`]:
//! - [`GaussianJitter`]: default, draws from the thread-local RNG;
//! - [`FixedJitter`]: returns a preset value and records the requested
//!   parameters, for deterministic tests.

use std::fmt;
use std::sync::Mutex;

use rand::Rng;

/// Source of normally distributed samples.
pub trait JitterSource: Send + Sync + 'static {
    /// Draws one sample with the given mean and standard deviation.
    fn gauss(&self, mean: f64, stddev: f64) -> f64;
}

/// Box–Muller sampler over [`rand::rng`].
#[derive(Clone, Copy, Debug, Default)]
pub struct GaussianJitter;

impl JitterSource for GaussianJitter {
    fn gauss(&self, mean: f64, stddev: f64) -> f64 {
        let mut rng = rand::rng();
        // u1 in (0, 1] keeps ln() finite.
        let u1 = 1.0 - rng.random::<f64>();
        let u2 = rng.random::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mean + z * stddev
    }
}

/// Deterministic source returning a preset sample.
///
/// Every call is recorded as `(mean, stddev)` and can be inspected with
/// [`FixedJitter::calls`].
pub struct FixedJitter {
    value: f64,
    calls: Mutex<Vec<(f64, f64)>>,
}

impl FixedJitter {
    /// Creates a source that always returns `value`.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the `(mean, stddev)` pairs requested so far.
    pub fn calls(&self) -> Vec<(f64, f64)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl fmt::Debug for FixedJitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedJitter")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl JitterSource for FixedJitter {
    fn gauss(&self, mean: f64, stddev: f64) -> f64 {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((mean, stddev)),
            Err(poisoned) => poisoned.into_inner().push((mean, stddev)),
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_zero_stddev_returns_mean() {
        let source = GaussianJitter;
        for _ in 0..100 {
            assert_eq!(source.gauss(1000.0, 0.0), 1000.0);
        }
    }

    #[test]
    fn gaussian_samples_center_on_mean() {
        let source = GaussianJitter;
        let n = 10_000;
        let sum: f64 = (0..n).map(|_| source.gauss(2000.0, 100.0)).sum();
        let mean = sum / f64::from(n);
        assert!((mean - 2000.0).abs() < 10.0, "sample mean {mean} too far from 2000");
    }

    #[test]
    fn fixed_records_calls() {
        let source = FixedJitter::new(42.0);
        assert_eq!(source.gauss(1.0, 2.0), 42.0);
        assert_eq!(source.gauss(3.0, 4.0), 42.0);
        assert_eq!(source.calls(), vec![(1.0, 2.0), (3.0, 4.0)]);
    }
}
