use serde::{Deserialize, Serialize};

/// Running mean, variance and extrema of a stream of values.
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    min: f64,
    max: f64,
}

/// Summary statistics of a probability mass sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassStats {
    pub mean: f64,
    /// Sample variance (`n - 1` denominator).
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;

        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }

    pub fn report(&self) -> MassStats {
        if self.n_vals == 0 {
            return MassStats {
                mean: f64::NAN,
                variance: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        MassStats {
            mean: self.mean,
            variance: if self.n_vals > 1 {
                self.diff_2_sum / (self.n_vals as f64 - 1.0)
            } else {
                f64::NAN
            },
            min: self.min,
            max: self.max,
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<f64> for Accumulator {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Self::new();
        iter.into_iter().for_each(|val| acc.add(val));
        acc
    }
}

/// Count values into `n_bins` equal bins spanning `[0, 1]`.
///
/// Values outside the range are clamped into the first or last bin.
pub fn histogram(vals: &[f64], n_bins: usize) -> Vec<usize> {
    let mut counts = vec![0; n_bins];
    if n_bins == 0 {
        return counts;
    }
    for &val in vals {
        let i_bin = (val.clamp(0.0, 1.0) * n_bins as f64) as usize;
        counts[i_bin.min(n_bins - 1)] += 1;
    }
    counts
}
