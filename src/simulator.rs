//! The communication game and its adaptive update rule.

use crate::config::{GameConfig, Overrides, Sensitivities, check_finite, check_num};
use crate::distributions::{
    AdaptiveDistribution, AdaptiveThreshold, BernoulliSampler, UniformSampler,
};
use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Result of a single round of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    pub player1_honest: bool,
    pub player2_honest: bool,
    pub communication_succeeds: bool,
    /// Player 1 judges player 2 honest.
    pub player1_guesses_honest: bool,
    /// Player 2 judges player 1 honest.
    pub player2_guesses_honest: bool,
}

/// State of one simulated population of games.
///
/// Owns both effort distributions and the guess threshold. Field order
/// puts plain values before tables so the text form is valid TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulator {
    granularity: usize,
    success_threshold: f64,
    trials_run: u64,
    honest_assignment: BernoulliSampler,
    noise: UniformSampler,
    guess_honest_threshold: AdaptiveThreshold,
    sensitivities: Sensitivities,
    honest_distribution: AdaptiveDistribution,
    dishonest_distribution: AdaptiveDistribution,
}

impl Simulator {
    /// Fresh simulator with untrained distributions.
    pub fn new(cfg: &GameConfig) -> Result<Self> {
        let honest_distribution = AdaptiveDistribution::new(cfg.granularity)?;
        let dishonest_distribution = AdaptiveDistribution::new(cfg.granularity)?;
        Self::from_parts(cfg, 0, honest_distribution, dishonest_distribution)
    }

    /// Simulator resumed from previously learned distributions.
    pub fn from_parts(
        cfg: &GameConfig,
        trials_run: u64,
        honest_distribution: AdaptiveDistribution,
        dishonest_distribution: AdaptiveDistribution,
    ) -> Result<Self> {
        cfg.validate()?;
        let sim = Self {
            granularity: cfg.granularity,
            success_threshold: cfg.success_threshold,
            trials_run,
            honest_assignment: BernoulliSampler::new(cfg.honest_probability)?,
            noise: UniformSampler::new(cfg.noise.0, cfg.noise.1)?,
            guess_honest_threshold: AdaptiveThreshold::new(
                cfg.guess_threshold.granularity,
                cfg.guess_threshold.initial,
            )?,
            sensitivities: cfg.sensitivities.clone(),
            honest_distribution,
            dishonest_distribution,
        };
        sim.validate()?;
        Ok(sim)
    }

    /// Deep copy with some top-level parameters replaced.
    ///
    /// The guess threshold keeps its current value. Changing the
    /// granularity starts both distributions over at the new size.
    pub fn with_overrides(&self, overrides: &Overrides) -> Result<Self> {
        let mut sim = self.clone();

        if let Some(granularity) = overrides.granularity
            && granularity != sim.granularity
        {
            sim.granularity = granularity;
            sim.honest_distribution = AdaptiveDistribution::new(granularity)?;
            sim.dishonest_distribution = AdaptiveDistribution::new(granularity)?;
        }
        if let Some(success_threshold) = overrides.success_threshold {
            sim.success_threshold = success_threshold;
        }
        if let Some(probability) = overrides.honest_probability {
            sim.honest_assignment = BernoulliSampler::new(probability)?;
        }
        if let Some((lower, upper)) = overrides.noise {
            sim.noise = UniformSampler::new(lower, upper)?;
        }
        if let Some(granularity) = overrides.guess_threshold_granularity {
            sim.guess_honest_threshold.set_granularity(granularity);
        }

        let sens = &mut sim.sensitivities;
        let pairs = [
            (&mut sens.honest_threshold, overrides.honest_threshold),
            (&mut sens.honest_success, overrides.honest_success),
            (&mut sens.honest_avoids_effort, overrides.honest_avoids_effort),
            (&mut sens.honest_perception, overrides.honest_perception),
            (&mut sens.dishonest_failure, overrides.dishonest_failure),
            (&mut sens.dishonest_perception, overrides.dishonest_perception),
        ];
        for (field, value) in pairs {
            if let Some(value) = value {
                *field = value;
            }
        }

        sim.validate()?;
        Ok(sim)
    }

    /// Check every invariant of a complete state.
    pub fn validate(&self) -> Result<()> {
        check_num(self.granularity, 2.., "granularity")?;
        check_finite(self.success_threshold, "success threshold")?;
        self.honest_assignment.validate()?;
        self.noise.validate()?;
        self.guess_honest_threshold.validate()?;
        self.sensitivities.validate()?;
        for (name, dist) in [
            ("honest", &self.honest_distribution),
            ("dishonest", &self.dishonest_distribution),
        ] {
            dist.validate().map_err(|err| {
                Error::InvalidConfiguration(format!("{name} distribution: {err}"))
            })?;
            if dist.granularity() != self.granularity {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} distribution granularity must be {}, but is {}",
                    self.granularity,
                    dist.granularity()
                )));
            }
        }
        Ok(())
    }

    /// Play one round without learning from it.
    ///
    /// Roles are drawn from the honest assignment unless forced. Both
    /// effort distributions remember which bin they sampled.
    pub fn play_round<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        player1_honest: Option<bool>,
        player2_honest: Option<bool>,
    ) -> RoundOutcome {
        let player1_honest =
            player1_honest.unwrap_or_else(|| self.honest_assignment.sample(rng));
        let player2_honest =
            player2_honest.unwrap_or_else(|| self.honest_assignment.sample(rng));

        let effort1 = self.distribution_mut(player1_honest).sample(rng);
        let effort2 = self.distribution_mut(player2_honest).sample(rng);
        let noise = self.noise.sample(rng);

        self.judge(player1_honest, player2_honest, effort1, effort2, noise)
    }

    /// Play one round and learn from it.
    ///
    /// Only player 2's sampled effort is reinforced, and only player 2's
    /// guess moves the threshold. Analysis code relies on this half-update.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<RoundOutcome> {
        self.trials_run += 1;
        let outcome = self.play_round(rng, None, None);
        self.learn(&outcome)?;
        Ok(outcome)
    }

    fn judge(
        &self,
        player1_honest: bool,
        player2_honest: bool,
        effort1: f64,
        effort2: f64,
        noise: f64,
    ) -> RoundOutcome {
        let communication_value = effort1 + effort2 - noise;
        let player1_signal = effort2 - noise;
        let player2_signal = effort1 - noise;
        RoundOutcome {
            player1_honest,
            player2_honest,
            communication_succeeds: self.success_threshold < communication_value,
            player1_guesses_honest: self.guess_honest_threshold.passes(player1_signal),
            player2_guesses_honest: self.guess_honest_threshold.passes(player2_signal),
        }
    }

    fn learn(&mut self, outcome: &RoundOutcome) -> Result<()> {
        let sens = &self.sensitivities;

        if outcome.player2_guesses_honest && !outcome.player1_honest {
            self.guess_honest_threshold.increase(sens.honest_threshold);
        } else if !outcome.player2_guesses_honest && outcome.player1_honest {
            self.guess_honest_threshold.decrease(sens.honest_threshold);
        }

        if outcome.player2_honest {
            let dist = &mut self.honest_distribution;
            if outcome.communication_succeeds {
                dist.decrease(sens.honest_avoids_effort)?;
            } else {
                dist.increase(sens.honest_success)?;
            }
            if !outcome.player1_guesses_honest {
                dist.increase(sens.honest_perception)?;
            }
        } else {
            let dist = &mut self.dishonest_distribution;
            if outcome.communication_succeeds {
                dist.decrease(sens.dishonest_failure)?;
            }
            if !outcome.player1_guesses_honest {
                dist.increase(sens.dishonest_perception)?;
            }
        }

        Ok(())
    }

    fn distribution_mut(&mut self, honest: bool) -> &mut AdaptiveDistribution {
        if honest {
            &mut self.honest_distribution
        } else {
            &mut self.dishonest_distribution
        }
    }

    /// Human-readable TOML form that [`from_text`](Self::from_text) parses back exactly.
    pub fn to_text(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| Error::SerializationMismatch(err.to_string()))
    }

    /// Parse and validate the text form produced by [`to_text`](Self::to_text).
    pub fn from_text(text: &str) -> Result<Self> {
        let sim: Simulator =
            toml::from_str(text).map_err(|err| Error::SerializationMismatch(err.to_string()))?;
        sim.validate()
            .map_err(|err| Error::SerializationMismatch(err.to_string()))?;
        Ok(sim)
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    pub fn success_threshold(&self) -> f64 {
        self.success_threshold
    }

    pub fn trials_run(&self) -> u64 {
        self.trials_run
    }

    pub fn honest_assignment(&self) -> &BernoulliSampler {
        &self.honest_assignment
    }

    pub fn noise(&self) -> &UniformSampler {
        &self.noise
    }

    pub fn guess_honest_threshold(&self) -> &AdaptiveThreshold {
        &self.guess_honest_threshold
    }

    pub fn sensitivities(&self) -> &Sensitivities {
        &self.sensitivities
    }

    pub fn honest_distribution(&self) -> &AdaptiveDistribution {
        &self.honest_distribution
    }

    pub fn dishonest_distribution(&self) -> &AdaptiveDistribution {
        &self.dishonest_distribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn game_config(granularity: usize) -> GameConfig {
        GameConfig {
            granularity,
            success_threshold: 0.5,
            honest_probability: 0.7,
            noise: (0.2, 0.4),
            guess_threshold: ThresholdConfig {
                granularity: granularity as f64,
                initial: 0.5,
            },
            sensitivities: Sensitivities {
                honest_threshold: 1.0,
                honest_success: 1.0,
                honest_avoids_effort: 1.0,
                honest_perception: 1.0,
                dishonest_failure: 1.0,
                dishonest_perception: 1.0,
            },
        }
    }

    fn outcome(
        player1_honest: bool,
        player2_honest: bool,
        communication_succeeds: bool,
        player1_guesses_honest: bool,
        player2_guesses_honest: bool,
    ) -> RoundOutcome {
        RoundOutcome {
            player1_honest,
            player2_honest,
            communication_succeeds,
            player1_guesses_honest,
            player2_guesses_honest,
        }
    }

    #[test]
    fn success_threshold_is_exclusive() {
        let sim = Simulator::new(&game_config(100)).unwrap();

        let round = sim.judge(true, true, 0.3, 0.3, 0.0);
        assert!(round.communication_succeeds);

        let round = sim.judge(true, true, 0.25, 0.25, 0.0);
        assert!(!round.communication_succeeds);
    }

    #[test]
    fn guess_threshold_is_inclusive() {
        let sim = Simulator::new(&game_config(100)).unwrap();

        // player 1 sees 0.75 - 0.25, player 2 sees 0.5 - 0.25
        let round = sim.judge(true, false, 0.5, 0.75, 0.25);
        assert!(round.player1_guesses_honest);
        assert!(!round.player2_guesses_honest);
    }

    #[test]
    fn forced_roles_are_respected() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut sim = Simulator::new(&game_config(100)).unwrap();
        for _ in 0..100 {
            let round = sim.play_round(&mut rng, Some(true), Some(false));
            assert!(round.player1_honest);
            assert!(!round.player2_honest);
        }
    }

    #[test]
    fn play_round_leaves_learned_state_alone() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut sim = Simulator::new(&game_config(50)).unwrap();
        let before = sim.to_text().unwrap();
        for _ in 0..1000 {
            sim.play_round(&mut rng, None, None);
        }
        assert_eq!(sim.to_text().unwrap(), before);
        assert_eq!(sim.trials_run(), 0);
    }

    #[test]
    fn hidden_failing_dishonest_player_is_not_updated() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut sim = Simulator::new(&game_config(100)).unwrap();
        sim.play_round(&mut rng, Some(true), Some(false));

        let threshold = sim.guess_honest_threshold().value();
        let mass = sim.dishonest_distribution().mass().to_vec();

        sim.learn(&outcome(true, false, false, true, true)).unwrap();

        assert_eq!(sim.guess_honest_threshold().value(), threshold);
        assert_eq!(sim.dishonest_distribution().mass(), mass.as_slice());
    }

    #[test]
    fn perceived_dishonest_player_raises_effort() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let mut cfg = game_config(100);
        cfg.sensitivities.dishonest_perception = 2.0;
        let mut sim = Simulator::new(&cfg).unwrap();
        sim.play_round(&mut rng, Some(true), Some(false));

        let index = sim.dishonest_distribution().last_sampled_index().unwrap();
        let before = sim.dishonest_distribution().mass()[index];
        let threshold = sim.guess_honest_threshold().value();

        sim.learn(&outcome(true, false, false, false, true)).unwrap();

        let after = sim.dishonest_distribution().mass()[index];
        assert!((after - (before + 0.02).min(1.0)).abs() < 1e-12);
        assert_eq!(sim.guess_honest_threshold().value(), threshold);
    }

    #[test]
    fn threshold_rises_when_dishonest_player_passes() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let mut cfg = game_config(100);
        cfg.sensitivities.honest_threshold = 3.0;
        let mut sim = Simulator::new(&cfg).unwrap();
        sim.play_round(&mut rng, Some(false), Some(true));

        sim.learn(&outcome(false, true, true, true, true)).unwrap();

        assert!((sim.guess_honest_threshold().value() - 0.53).abs() < 1e-12);
    }

    #[test]
    fn threshold_falls_when_honest_player_is_doubted() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut sim = Simulator::new(&game_config(100)).unwrap();
        sim.play_round(&mut rng, Some(true), Some(true));

        sim.learn(&outcome(true, true, true, true, false)).unwrap();

        assert!((sim.guess_honest_threshold().value() - 0.49).abs() < 1e-12);
    }

    #[test]
    fn honest_update_stacks_on_player2_bin() {
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let mut cfg = game_config(10);
        cfg.sensitivities.honest_success = 2.0;
        cfg.sensitivities.honest_perception = 1.0;
        let mut sim = Simulator::new(&cfg).unwrap();

        sim.play_round(&mut rng, Some(false), Some(true));
        let index = sim.honest_distribution().last_sampled_index().unwrap();
        let mut expected = sim.honest_distribution().mass().to_vec();
        expected[index] = (expected[index] + 0.3).clamp(0.0, 1.0);
        let dishonest = sim.dishonest_distribution().mass().to_vec();

        sim.learn(&outcome(false, true, false, false, false)).unwrap();

        for (val, exp) in sim.honest_distribution().mass().iter().zip(&expected) {
            assert!((val - exp).abs() < 1e-12);
        }
        assert_eq!(sim.dishonest_distribution().mass(), dishonest.as_slice());
    }

    #[test]
    fn player1_effort_is_never_reinforced() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let mut sim = Simulator::new(&game_config(10)).unwrap();

        // player 1 dishonest, player 2 honest: dishonest mass must stay put
        sim.play_round(&mut rng, Some(false), Some(true));
        let dishonest = sim.dishonest_distribution().mass().to_vec();
        sim.learn(&outcome(false, true, true, false, true)).unwrap();
        assert_eq!(sim.dishonest_distribution().mass(), dishonest.as_slice());
    }

    #[test]
    fn advance_counts_trials_and_keeps_bounds() {
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let mut cfg = game_config(20);
        cfg.sensitivities.honest_threshold = 5.0;
        cfg.sensitivities.honest_success = 7.0;
        let mut sim = Simulator::new(&cfg).unwrap();

        for i in 1..=5000 {
            sim.advance(&mut rng).unwrap();
            assert_eq!(sim.trials_run(), i);
        }

        let value = sim.guess_honest_threshold().value();
        assert!((0.0..=1.0).contains(&value));
        for dist in [sim.honest_distribution(), sim.dishonest_distribution()] {
            assert!(dist.mass().iter().all(|val| (0.0..=1.0).contains(val)));
        }
    }

    #[test]
    fn text_round_trip_continues_identically() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut sim = Simulator::new(&game_config(30)).unwrap();
        for _ in 0..2000 {
            sim.advance(&mut rng).unwrap();
        }

        let text = sim.to_text().unwrap();
        let mut restored = Simulator::from_text(&text).unwrap();
        assert_eq!(restored.to_text().unwrap(), text);
        assert_eq!(restored.trials_run(), 2000);

        let mut rng_restored = rng.clone();
        for _ in 0..2000 {
            let a = sim.advance(&mut rng).unwrap();
            let b = restored.advance(&mut rng_restored).unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(sim.to_text().unwrap(), restored.to_text().unwrap());
    }

    #[test]
    fn from_text_rejects_mismatched_granularity() {
        let sim = Simulator::new(&game_config(4)).unwrap();
        let text = sim.to_text().unwrap().replacen("granularity = 4", "granularity = 5", 1);

        let err = Simulator::from_text(&text).unwrap_err();
        assert!(matches!(err, Error::SerializationMismatch(_)));
    }

    #[test]
    fn from_text_rejects_garbage() {
        let err = Simulator::from_text("granularity = \"many\"").unwrap_err();
        assert!(matches!(err, Error::SerializationMismatch(_)));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut rng = ChaCha12Rng::seed_from_u64(10);
        let mut base = Simulator::new(&game_config(10)).unwrap();
        for _ in 0..100 {
            base.advance(&mut rng).unwrap();
        }

        let overrides = Overrides {
            noise: Some((0.0, 0.2)),
            honest_perception: Some(4.0),
            ..Overrides::default()
        };
        let sim = base.with_overrides(&overrides).unwrap();

        assert_eq!(sim.noise(), &UniformSampler::new(0.0, 0.2).unwrap());
        assert_eq!(sim.sensitivities().honest_perception, 4.0);
        assert_eq!(sim.sensitivities().honest_success, 1.0);
        assert_eq!(sim.success_threshold(), base.success_threshold());
        assert_eq!(sim.trials_run(), 100);
        assert_eq!(sim.honest_distribution().mass(), base.honest_distribution().mass());
        assert_eq!(
            sim.guess_honest_threshold().value(),
            base.guess_honest_threshold().value()
        );
    }

    #[test]
    fn granularity_override_rebuilds_distributions() {
        let base = Simulator::new(&game_config(10)).unwrap();
        let overrides = Overrides {
            granularity: Some(4),
            guess_threshold_granularity: Some(4.0),
            ..Overrides::default()
        };
        let sim = base.with_overrides(&overrides).unwrap();

        assert_eq!(sim.granularity(), 4);
        assert_eq!(sim.honest_distribution().mass(), &[0.0, 0.25, 0.5, 0.75]);
        assert_eq!(sim.dishonest_distribution().granularity(), 4);
        assert_eq!(sim.guess_honest_threshold().granularity(), 4.0);
    }

    #[test]
    fn unbounded_noise_width_is_rejected() {
        let mut cfg = game_config(10);
        cfg.noise = (-f64::MAX, f64::MAX);
        let err = Simulator::new(&cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn from_parts_keeps_learned_state() {
        let mut rng = ChaCha12Rng::seed_from_u64(12);
        let cfg = game_config(10);
        let mut trained = Simulator::new(&cfg).unwrap();
        for _ in 0..1000 {
            trained.advance(&mut rng).unwrap();
        }

        let honest = AdaptiveDistribution::from_mass(
            10,
            trained.honest_distribution().mass().to_vec(),
        )
        .unwrap();
        let dishonest = AdaptiveDistribution::from_mass(
            10,
            trained.dishonest_distribution().mass().to_vec(),
        )
        .unwrap();
        let resumed = Simulator::from_parts(&cfg, 1000, honest, dishonest).unwrap();

        assert_eq!(resumed.trials_run(), 1000);
        assert_eq!(
            resumed.honest_distribution().mass(),
            trained.honest_distribution().mass()
        );
        assert_eq!(
            resumed.dishonest_distribution().mass(),
            trained.dishonest_distribution().mass()
        );
        assert_eq!(resumed.honest_distribution().last_sampled_index(), None);
    }

    #[test]
    fn from_parts_rejects_mismatched_granularity() {
        let cfg = game_config(10);
        let honest = AdaptiveDistribution::new(10).unwrap();
        let dishonest = AdaptiveDistribution::from_mass(4, vec![0.1, 0.2, 0.3, 0.4]).unwrap();

        let err = Simulator::from_parts(&cfg, 5, honest, dishonest).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let base = Simulator::new(&game_config(10)).unwrap();
        for overrides in [
            Overrides {
                honest_probability: Some(1.5),
                ..Overrides::default()
            },
            Overrides {
                noise: Some((0.4, 0.2)),
                ..Overrides::default()
            },
            Overrides {
                dishonest_failure: Some(-1.0),
                ..Overrides::default()
            },
            Overrides {
                granularity: Some(1),
                ..Overrides::default()
            },
        ] {
            let err = base.with_overrides(&overrides).unwrap_err();
            assert!(matches!(err, Error::InvalidConfiguration(_)));
        }
    }
}
