//! Offline analysis of a saved simulator.

use crate::config::Sensitivities;
use crate::simulator::{RoundOutcome, Simulator};
use crate::stats::{MassStats, histogram};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufWriter, path::Path};

#[derive(Debug, Serialize, Deserialize)]
pub struct Parameters {
    pub granularity: usize,
    pub success_threshold: f64,
    pub honest_probability: f64,
    pub noise: (f64, f64),
    pub sensitivities: Sensitivities,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Learned {
    pub trials_run: u64,
    pub guess_honest_threshold: f64,
    pub guess_threshold_bounds: (f64, f64),
    pub honest_distribution: MassStats,
    pub dishonest_distribution: MassStats,
}

/// A count out of a total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tally {
    pub count: usize,
    pub total: usize,
}

impl Tally {
    fn fraction(self) -> f64 {
        self.count as f64 / self.total as f64
    }
}

/// Statistics of forced honest-vs-honest and honest-vs-dishonest games.
#[derive(Debug, Serialize, Deserialize)]
pub struct Games {
    pub n_trials: usize,
    /// Honest pairs that communicate successfully.
    pub hh_success: f64,
    /// Mixed pairs that fail to communicate.
    pub hd_raw_failure: f64,
    /// Mixed pairs that fail while the dishonest player passes as honest.
    pub hd_fail_hide: f64,
    pub honest_perceived_honest: Tally,
    pub honest_perceived_dishonest: Tally,
    pub dishonest_perceived_honest: Tally,
    pub honest_precision: f64,
    pub honest_recall: f64,
    pub honest_f_score: f64,
}

/// Data for histogram plots of the learned state.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlotData {
    pub n_bins: usize,
    pub honest_histogram: Vec<usize>,
    pub dishonest_histogram: Vec<usize>,
    pub noise_histogram: Vec<usize>,
    /// Communication values whose outcome depends on the noise.
    pub uncertain_outcome: (f64, f64),
    /// Signals whose honesty judgement depends on the noise.
    pub uncertain_alignment: (f64, f64),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Report {
    pub parameters: Parameters,
    pub results: Learned,
    pub games: Games,
    pub plot: PlotData,
}

impl Report {
    /// Analyze `sim` by playing `n_trials` forced games of each pairing.
    ///
    /// Games are played on a copy, so `sim` is left untouched.
    pub fn new<R: Rng + ?Sized>(sim: &Simulator, n_trials: usize, rng: &mut R) -> Self {
        Self {
            parameters: Parameters {
                granularity: sim.granularity(),
                success_threshold: sim.success_threshold(),
                honest_probability: sim.honest_assignment().probability(),
                noise: (sim.noise().lower_bound(), sim.noise().upper_bound()),
                sensitivities: sim.sensitivities().clone(),
            },
            results: Learned {
                trials_run: sim.trials_run(),
                guess_honest_threshold: sim.guess_honest_threshold().value(),
                guess_threshold_bounds: sim.guess_honest_threshold().bounds(),
                honest_distribution: sim.honest_distribution().stats(),
                dishonest_distribution: sim.dishonest_distribution().stats(),
            },
            games: play_games(sim, n_trials, rng),
            plot: plot_data(sim),
        }
    }

    pub fn summary(&self) -> String {
        let games = &self.games;
        format!(
            "trials: {}; threshold: {:.4}; hh success: {:.4}; hd failure: {:.4}; \
             precision: {:.4}; recall: {:.4}; f-score: {:.4}",
            self.results.trials_run,
            self.results.guess_honest_threshold,
            games.hh_success,
            games.hd_raw_failure,
            games.honest_precision,
            games.honest_recall,
            games.honest_f_score,
        )
    }

    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).context("failed to serialize report")?;
        Ok(())
    }
}

fn play_games<R: Rng + ?Sized>(sim: &Simulator, n_trials: usize, rng: &mut R) -> Games {
    let mut sim = sim.clone();
    let hh: Vec<RoundOutcome> = (0..n_trials)
        .map(|_| sim.play_round(rng, Some(true), Some(true)))
        .collect();
    let hd: Vec<RoundOutcome> = (0..n_trials)
        .map(|_| sim.play_round(rng, Some(true), Some(false)))
        .collect();

    let count = |games: &[RoundOutcome], pred: fn(&RoundOutcome) -> bool| Tally {
        count: games.iter().filter(|g| pred(g)).count(),
        total: games.len(),
    };

    let hh_success = count(&hh, |g| g.communication_succeeds);
    let hd_raw_failure = count(&hd, |g| !g.communication_succeeds);
    let hd_fail_hide = count(&hd, |g| !g.communication_succeeds && g.player1_guesses_honest);

    // Judgements of an honest player: both guesses of honest pairs, and
    // the dishonest player's guess of the honest player 1.
    let judged_honest = [
        count(&hh, |g| g.player1_guesses_honest),
        count(&hh, |g| g.player2_guesses_honest),
        count(&hd, |g| g.player2_guesses_honest),
    ];
    let honest_perceived_honest = Tally {
        count: judged_honest.iter().map(|t| t.count).sum(),
        total: judged_honest.iter().map(|t| t.total).sum(),
    };
    let honest_perceived_dishonest = Tally {
        count: honest_perceived_honest.total - honest_perceived_honest.count,
        total: honest_perceived_honest.total,
    };
    let dishonest_perceived_honest = count(&hd, |g| g.player1_guesses_honest);

    let hph = honest_perceived_honest.count as f64;
    let honest_precision = hph / (hph + dishonest_perceived_honest.count as f64);
    let honest_recall = hph / (hph + honest_perceived_dishonest.count as f64);
    let honest_f_score =
        2.0 * honest_precision * honest_recall / (honest_precision + honest_recall);

    Games {
        n_trials,
        hh_success: hh_success.fraction(),
        hd_raw_failure: hd_raw_failure.fraction(),
        hd_fail_hide: hd_fail_hide.fraction(),
        honest_perceived_honest,
        honest_perceived_dishonest,
        dishonest_perceived_honest,
        honest_precision,
        honest_recall,
        honest_f_score,
    }
}

fn plot_data(sim: &Simulator) -> PlotData {
    let n_bins = sim.granularity();
    let noise = sim.noise();
    let threshold = sim.guess_honest_threshold().value();
    PlotData {
        n_bins,
        honest_histogram: histogram(sim.honest_distribution().mass(), n_bins),
        dishonest_histogram: histogram(sim.dishonest_distribution().mass(), n_bins),
        noise_histogram: histogram(&noise.mass(n_bins * 10), n_bins),
        uncertain_outcome: (
            (sim.success_threshold() + noise.lower_bound()) / 2.0,
            (sim.success_threshold() + noise.upper_bound()) / 2.0,
        ),
        uncertain_alignment: (
            threshold + noise.lower_bound(),
            threshold + noise.upper_bound(),
        ),
    }
}
