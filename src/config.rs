use crate::error::{Error, Result};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Step sizes applied by the update rule after each round.
///
/// Every value is a multiple of `1 / granularity`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Sensitivities {
    /// Guess threshold shift when a guess about player 1 was wrong.
    pub honest_threshold: f64,
    /// Honest effort increase after a failed communication.
    pub honest_success: f64,
    /// Honest effort decrease after a successful communication.
    pub honest_avoids_effort: f64,
    /// Honest effort increase after being perceived as dishonest.
    pub honest_perception: f64,
    /// Dishonest effort decrease after a successful communication.
    pub dishonest_failure: f64,
    /// Dishonest effort increase after being perceived as dishonest.
    pub dishonest_perception: f64,
}

impl Sensitivities {
    pub fn validate(&self) -> Result<()> {
        let range = 0.0..f64::INFINITY;
        check_num(self.honest_threshold, range.clone(), "honest threshold sensitivity")?;
        check_num(self.honest_success, range.clone(), "honest success sensitivity")?;
        check_num(self.honest_avoids_effort, range.clone(), "honest avoids effort sensitivity")?;
        check_num(self.honest_perception, range.clone(), "honest perception sensitivity")?;
        check_num(self.dishonest_failure, range.clone(), "dishonest failure sensitivity")?;
        check_num(self.dishonest_perception, range, "dishonest perception sensitivity")?;
        Ok(())
    }
}

/// Guess threshold parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Step size divisor.
    pub granularity: f64,
    /// Starting cutoff.
    #[serde(default = "default_threshold")]
    pub initial: f64,
}

fn default_threshold() -> f64 {
    0.5
}

/// Game parameters.
///
/// Everything needed to build a fresh [`Simulator`](crate::simulator::Simulator).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Number of bins of both effort distributions.
    pub granularity: usize,
    /// Cutoff above which communication succeeds (exclusive).
    pub success_threshold: f64,
    /// Probability that a player is assigned the honest role.
    pub honest_probability: f64,
    /// Bounds of the uniform noise, `[lower, upper]`.
    pub noise: (f64, f64),
    /// Guess threshold parameters.
    pub guess_threshold: ThresholdConfig,
    /// Update step sizes.
    pub sensitivities: Sensitivities,
}

impl GameConfig {
    /// Check the scalar parameters.
    ///
    /// Sampler and threshold parameters are checked by their constructors.
    pub fn validate(&self) -> Result<()> {
        check_num(self.granularity, 2.., "granularity")?;
        check_finite(self.success_threshold, "success threshold")?;
        self.sensitivities.validate()?;
        Ok(())
    }
}

/// Sparse replacement of top-level game parameters.
///
/// Used to derive one job from a base state; unset fields keep the base value.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub granularity: Option<usize>,
    pub success_threshold: Option<f64>,
    pub honest_probability: Option<f64>,
    pub noise: Option<(f64, f64)>,
    pub guess_threshold_granularity: Option<f64>,
    pub honest_threshold: Option<f64>,
    pub honest_success: Option<f64>,
    pub honest_avoids_effort: Option<f64>,
    pub honest_perception: Option<f64>,
    pub dishonest_failure: Option<f64>,
    pub dishonest_perception: Option<f64>,
}

/// What to do with a job whose output already exists.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistsPolicy {
    /// Leave the existing output untouched.
    #[default]
    Skip,
    /// Discard the existing output and start from the configured state.
    Restart,
    /// Continue from the existing output.
    Resume,
}

/// Settings shared by all jobs.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of trials run by each job.
    pub n_iterations: u64,
    /// Default policy for jobs with existing output.
    #[serde(default)]
    pub if_exists: ExistsPolicy,
    /// Master seed; job `i` uses stream `i`. Seeded from the OS when absent.
    pub seed: Option<u64>,
    /// Number of worker threads.
    pub n_threads: Option<usize>,
}

/// A single job of the sweep.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Name of the job, also the name of its output directory.
    pub name: String,
    /// Per-job policy, overriding [`RunConfig::if_exists`].
    pub if_exists: Option<ExistsPolicy>,
    /// Per-job trial count, overriding [`RunConfig::n_iterations`].
    pub n_iterations: Option<u64>,
    /// Parameters replaced relative to the base game.
    #[serde(flatten)]
    pub overrides: Overrides,
}

/// Simulation configuration.
///
/// Loaded from the `config.toml` file of a simulation directory.
/// See [`SimConfig::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub game: GameConfig,
    pub run: RunConfig,
    pub jobs: Vec<JobConfig>,
}

impl SimConfig {
    /// Load a [`SimConfig`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> anyhow::Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: SimConfig = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.game.validate().context("invalid game parameters")?;

        check_num(self.run.n_iterations, 1.., "number of iterations")?;
        if let Some(n_threads) = self.run.n_threads {
            check_num(n_threads, 1..1024, "number of threads")?;
        }

        if self.jobs.is_empty() {
            bail!("at least one job must be configured");
        }
        let mut names = HashSet::new();
        for job in &self.jobs {
            check_name(&job.name).with_context(|| format!("invalid job name {:?}", job.name))?;
            if !names.insert(job.name.as_str()) {
                bail!("job name {:?} is used more than once", job.name);
            }
            if let Some(n_iterations) = job.n_iterations {
                check_num(n_iterations, 1.., "number of iterations")
                    .with_context(|| format!("invalid job {:?}", job.name))?;
            }
        }

        Ok(())
    }
}

fn check_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("name must be a plain directory name");
    }
    Ok(())
}

pub(crate) fn check_num<T, R>(num: T, range: R, name: &str) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        return Err(Error::InvalidConfiguration(format!(
            "{name} must be in the range {range:?}, but is {num:?}"
        )));
    }
    Ok(())
}

pub(crate) fn check_finite(num: f64, name: &str) -> Result<()> {
    if !num.is_finite() {
        return Err(Error::InvalidConfiguration(format!(
            "{name} must be finite, but is {num:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[game]
granularity = 100
success_threshold = 0.5
honest_probability = 1.0
noise = [0.2, 0.4]

[game.guess_threshold]
granularity = 100.0

[game.sensitivities]
honest_threshold = 1.0
honest_success = 1.0
honest_avoids_effort = 1.0
honest_perception = 0.0
dishonest_failure = 1.0
dishonest_perception = 1.0

[run]
n_iterations = 1000

[[jobs]]
name = "base"

[[jobs]]
name = "noise_0.0_0.2"
noise = [0.0, 0.2]
if_exists = "resume"
honest_perception = 2.0
"#;

    #[test]
    fn parses_jobs_and_overrides() {
        let config: SimConfig = toml::from_str(CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.game.guess_threshold.initial, 0.5);
        assert_eq!(config.run.if_exists, ExistsPolicy::Skip);
        assert_eq!(config.jobs[0].overrides, Overrides::default());

        let job = &config.jobs[1];
        assert_eq!(job.if_exists, Some(ExistsPolicy::Resume));
        assert_eq!(job.overrides.noise, Some((0.0, 0.2)));
        assert_eq!(job.overrides.honest_perception, Some(2.0));
        assert_eq!(job.overrides.granularity, None);
    }

    #[test]
    fn rejects_duplicate_job_names() {
        let mut config: SimConfig = toml::from_str(CONFIG).unwrap();
        config.jobs[1].name = "base".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_path_like_job_names() {
        let mut config: SimConfig = toml::from_str(CONFIG).unwrap();
        config.jobs[1].name = "../escape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_small_granularity() {
        let mut config: SimConfig = toml::from_str(CONFIG).unwrap();
        config.game.granularity = 1;
        let err = config.game.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_negative_sensitivity() {
        let mut config: SimConfig = toml::from_str(CONFIG).unwrap();
        config.game.sensitivities.dishonest_failure = -1.0;
        assert!(matches!(
            config.game.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
