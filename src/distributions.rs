//! Samplers, thresholds and the self-adjusting effort distribution.

use crate::config::{check_finite, check_num};
use crate::error::{Error, Result};
use crate::stats::{Accumulator, MassStats};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fixed-probability boolean draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BernoulliSampler {
    probability: f64,
}

impl BernoulliSampler {
    pub fn new(probability: f64) -> Result<Self> {
        let sampler = Self { probability };
        sampler.validate()?;
        Ok(sampler)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.probability, 0.0..=1.0, "probability")
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Returns `true` with probability `probability`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random_bool(self.probability)
    }
}

/// Fixed-range continuous draw over `[lower_bound, upper_bound]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformSampler {
    lower_bound: f64,
    upper_bound: f64,
}

impl UniformSampler {
    pub fn new(lower_bound: f64, upper_bound: f64) -> Result<Self> {
        let sampler = Self {
            lower_bound,
            upper_bound,
        };
        sampler.validate()?;
        Ok(sampler)
    }

    pub fn validate(&self) -> Result<()> {
        check_finite(self.lower_bound, "lower bound")?;
        check_finite(self.upper_bound, "upper bound")?;
        if self.lower_bound > self.upper_bound {
            return Err(Error::InvalidConfiguration(format!(
                "lower bound {} must not exceed upper bound {}",
                self.lower_bound, self.upper_bound
            )));
        }
        check_finite(self.upper_bound - self.lower_bound, "range width")?;
        Ok(())
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.random_range(self.lower_bound..=self.upper_bound)
    }

    /// Evenly spaced values covering the range, for reporting only.
    ///
    /// Value `i` is `lower + i * (upper - lower) / granularity`.
    pub fn mass(&self, granularity: usize) -> Vec<f64> {
        let width = self.upper_bound - self.lower_bound;
        (0..granularity)
            .map(|i| self.lower_bound + i as f64 * width / granularity as f64)
            .collect()
    }
}

/// Scalar cutoff moved in steps of `1 / granularity`, clamped to its bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveThreshold {
    granularity: f64,
    value: f64,
    min_value: f64,
    max_value: f64,
}

impl AdaptiveThreshold {
    /// Threshold bounded to `[0, 1]`.
    pub fn new(granularity: f64, initial_value: f64) -> Result<Self> {
        Self::with_bounds(granularity, initial_value, 0.0, 1.0)
    }

    pub fn with_bounds(
        granularity: f64,
        initial_value: f64,
        min_value: f64,
        max_value: f64,
    ) -> Result<Self> {
        let threshold = Self {
            granularity,
            value: initial_value,
            min_value,
            max_value,
        };
        threshold.validate()?;
        Ok(threshold)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(
            self.granularity,
            f64::MIN_POSITIVE..f64::INFINITY,
            "threshold granularity",
        )?;
        check_finite(self.min_value, "threshold minimum")?;
        check_finite(self.max_value, "threshold maximum")?;
        check_num(
            self.value,
            self.min_value..=self.max_value,
            "threshold value",
        )?;
        Ok(())
    }

    pub fn granularity(&self) -> f64 {
        self.granularity
    }

    pub(crate) fn set_granularity(&mut self, granularity: f64) {
        self.granularity = granularity;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    /// Whether `value` reaches the threshold (inclusive).
    pub fn passes(&self, value: f64) -> bool {
        value >= self.value
    }

    pub fn increase(&mut self, amount: f64) {
        self.shift(amount / self.granularity);
    }

    pub fn decrease(&mut self, amount: f64) {
        self.shift(-amount / self.granularity);
    }

    fn shift(&mut self, delta: f64) {
        self.value = (self.value + delta).clamp(self.min_value, self.max_value);
    }
}

/// Which bin the next reinforcement applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Cursor {
    #[default]
    AwaitingSample,
    Ready(usize),
}

/// Discretized empirical distribution over effort levels.
///
/// After [`sample`](Self::sample), every [`increase`](Self::increase) or
/// [`decrease`](Self::decrease) acts on the bin that produced the sample,
/// until the next call to `sample`. Consecutive reinforcements stack on
/// the same bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveDistribution {
    granularity: usize,
    mass: Vec<f64>,
    #[serde(skip)]
    cursor: Cursor,
}

impl AdaptiveDistribution {
    /// Fresh distribution with `mass[i] = i / granularity`.
    pub fn new(granularity: usize) -> Result<Self> {
        check_num(granularity, 2.., "granularity")?;
        let mass = (0..granularity)
            .map(|i| i as f64 / granularity as f64)
            .collect();
        Ok(Self {
            granularity,
            mass,
            cursor: Cursor::AwaitingSample,
        })
    }

    /// Distribution resumed from a previously learned mass.
    pub fn from_mass(granularity: usize, mass: Vec<f64>) -> Result<Self> {
        let dist = Self {
            granularity,
            mass,
            cursor: Cursor::AwaitingSample,
        };
        dist.validate()?;
        Ok(dist)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.granularity, 2.., "granularity")?;
        if self.mass.len() != self.granularity {
            return Err(Error::InvalidConfiguration(format!(
                "mass must have {} entries, but has {}",
                self.granularity,
                self.mass.len()
            )));
        }
        for (i, &val) in self.mass.iter().enumerate() {
            check_num(val, 0.0..=1.0, &format!("mass entry {i}"))?;
        }
        Ok(())
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    pub fn mass(&self) -> &[f64] {
        &self.mass
    }

    /// Bin chosen by the most recent sample, if any.
    pub fn last_sampled_index(&self) -> Option<usize> {
        match self.cursor {
            Cursor::AwaitingSample => None,
            Cursor::Ready(index) => Some(index),
        }
    }

    /// Pick a bin uniformly at random and return its value.
    pub fn sample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let index = rng.random_range(0..self.mass.len());
        self.cursor = Cursor::Ready(index);
        self.mass[index]
    }

    /// Move the last sampled bin up by `amount / granularity`.
    ///
    /// # Errors
    /// Returns [`Error::PrematureStateUse`] if nothing was sampled yet.
    pub fn increase(&mut self, amount: f64) -> Result<()> {
        self.shift(amount / self.granularity as f64)
    }

    /// Move the last sampled bin down by `amount / granularity`.
    ///
    /// # Errors
    /// Returns [`Error::PrematureStateUse`] if nothing was sampled yet.
    pub fn decrease(&mut self, amount: f64) -> Result<()> {
        self.shift(-amount / self.granularity as f64)
    }

    fn shift(&mut self, delta: f64) -> Result<()> {
        let Cursor::Ready(index) = self.cursor else {
            return Err(Error::PrematureStateUse);
        };
        let val = &mut self.mass[index];
        *val = (*val + delta).clamp(0.0, 1.0);
        Ok(())
    }

    /// Mean, variance and extrema of the mass, computed on demand.
    pub fn stats(&self) -> MassStats {
        self.mass.iter().copied().collect::<Accumulator>().report()
    }
}
