//! Removal-effect estimation and attribution.
//!
//! [`MarkovModel::fit`] runs the whole pipeline for one path table:
//!
//! 1. **Validate** parameters and every path before any work is done
//! 2. **Build** the catalog and the baseline transition index
//! 3. **Baseline** - simulate `nsim` walks and measure the conversion rate
//! 4. **Removal** - for each channel, simulate `nsim` walks with that channel
//!    redirected to `(null)` and measure the conversion rate again
//! 5. **Normalize** - `effect(c) = max(0, baseline - rate_without_c)`, and
//!    each channel receives `effect(c) / Σ effect` of the observed
//!    conversions (and of the observed conversion value, if any)
//!
//! A channel that no transition enters (e.g. one seen only on zero-weight
//! paths) has an effect of exactly zero and is not simulated.
//!
//! # Reproducibility
//!
//! Every simulation batch draws its seed from a generator seeded with
//! [`MarkovParams::seed`] in a fixed order (baseline first, then channels in
//! catalog order), so a fixed seed reproduces the result for any thread
//! count. Without a seed, the generator is seeded from the OS.

use std::{num::NonZeroUsize, thread};

use rand::{Rng as _, SeedableRng as _};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    AttributionError, ValidationError,
    path::PathRecord,
    removal::{Baseline, RemovalScenario, TransitionRule},
    simulation::{self, WalkParams},
    state::StateCatalog,
    transition::{self, TransitionIndex, TransitionProbability},
};

/// Steps per catalog state allowed when no explicit step limit is given.
const DEFAULT_STEPS_PER_STATE: usize = 10;

/// Parameters of a Markov attribution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovParams {
    /// Number of most recent channels that make up a chain state.
    pub order: usize,
    /// Simulated walks per scenario (baseline and each channel removal).
    pub nsim: u64,
    /// Maximum transitions per walk; defaults to ten per catalog state.
    pub max_step: Option<usize>,
    /// Include the transition table and removal effects in the result.
    pub out_more: bool,
    /// Seed for reproducible results.
    pub seed: Option<u64>,
    /// Worker threads; defaults to the available parallelism.
    pub threads: Option<usize>,
    /// Share of failed walks tolerated per scenario before aborting.
    pub max_failure_ratio: f64,
}

impl Default for MarkovParams {
    fn default() -> Self {
        Self {
            order: 1,
            nsim: 10_000,
            max_step: None,
            out_more: false,
            seed: None,
            threads: None,
            max_failure_ratio: 0.01,
        }
    }
}

impl MarkovParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order < 1 {
            return Err(ValidationError::InvalidOrder { order: self.order });
        }
        if self.nsim < 1 {
            return Err(ValidationError::InvalidSimulationCount);
        }
        if self.max_step == Some(0) {
            return Err(ValidationError::InvalidMaxStep);
        }
        if self.threads == Some(0) {
            return Err(ValidationError::InvalidThreadCount);
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return Err(ValidationError::InvalidFailureRatio {
                ratio: self.max_failure_ratio,
            });
        }
        Ok(())
    }
}

/// Attribution of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAttribution {
    pub channel_name: String,
    pub total_conversions: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_conversion_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalEffect {
    pub channel_name: String,
    /// Drop of the conversion rate when the channel is removed.
    pub removal_effect: f64,
    /// `removal_effect` relative to the baseline conversion rate.
    pub relative_removal_effect: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkovAttribution {
    pub channels: Vec<ChannelAttribution>,
    pub baseline_conversion_rate: f64,
    /// Set when every removal effect is zero and no credit was assigned.
    pub degenerate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_effects: Option<Vec<RemovalEffect>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_matrix: Option<Vec<TransitionProbability>>,
}

impl MarkovAttribution {
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&ChannelAttribution> {
        self.channels.iter().find(|c| c.channel_name == name)
    }

    #[must_use]
    pub fn removal_effect(&self, name: &str) -> Option<&RemovalEffect> {
        self.removal_effects
            .as_ref()?
            .iter()
            .find(|e| e.channel_name == name)
    }
}

#[derive(Debug, Clone)]
struct Observed {
    conversions: f64,
    value: Option<f64>,
}

impl Observed {
    #[expect(clippy::cast_precision_loss)]
    fn from_paths(paths: &[PathRecord]) -> Self {
        let conversions = paths.iter().map(|p| p.conversions as f64).sum();
        let value = paths
            .iter()
            .filter_map(|p| p.value)
            .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v));
        Self { conversions, value }
    }
}

/// Markov-chain removal-effect attribution model.
#[derive(Debug, Clone, Default)]
pub struct MarkovModel {
    params: MarkovParams,
}

impl MarkovModel {
    #[must_use]
    pub fn new(params: MarkovParams) -> Self {
        Self { params }
    }

    #[must_use]
    pub fn params(&self) -> &MarkovParams {
        &self.params
    }

    /// Fits the model to `paths` and attributes the observed conversions.
    pub fn fit(&self, paths: &[PathRecord]) -> Result<MarkovAttribution, AttributionError> {
        let params = &self.params;
        params.validate()?;
        for (i, path) in paths.iter().enumerate() {
            path.validate(i)?;
        }

        let (catalog, index) = transition::build(paths, params.order)?;
        info!(
            paths = paths.len(),
            channels = catalog.channel_count(),
            states = catalog.state_count(),
            transitions = index.transition_count(),
            "built transition index"
        );

        let threads = params.threads.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, NonZeroUsize::get)
        });
        let max_step = params
            .max_step
            .unwrap_or(DEFAULT_STEPS_PER_STATE * catalog.state_count());
        let mut seeder = match params.seed {
            Some(seed) => Pcg64::seed_from_u64(seed),
            None => Pcg64::from_os_rng(),
        };
        let estimate = |rule: &dyn TransitionRule, seed: u64| {
            let walk_params = WalkParams {
                nsim: params.nsim,
                max_step,
                threads,
                seed,
            };
            simulation::simulate(&index, rule, &walk_params)
                .conversion_rate(params.max_failure_ratio)
        };

        let baseline = estimate(&Baseline, seeder.random())?;
        info!(rate = baseline, nsim = params.nsim, max_step, "simulated baseline");

        let mut effects = Vec::with_capacity(catalog.channel_count());
        for channel in catalog.channels() {
            // drawn for every channel so that seeds do not depend on skips
            let seed = seeder.random();
            let name = catalog.channel_name(channel);
            if index.incoming_weight(&catalog, channel) == 0 {
                debug!(channel = name, "channel has no incoming transitions");
                effects.push(0.0);
                continue;
            }
            let rate = estimate(&RemovalScenario::new(&catalog, channel), seed)?;
            let effect = (baseline - rate).max(0.0);
            debug!(channel = name, rate, effect, "simulated removal");
            effects.push(effect);
        }

        Ok(self.attribute(&catalog, &index, paths, baseline, &effects))
    }

    fn attribute(
        &self,
        catalog: &StateCatalog,
        index: &TransitionIndex,
        paths: &[PathRecord],
        baseline: f64,
        effects: &[f64],
    ) -> MarkovAttribution {
        let observed = Observed::from_paths(paths);
        let effect_sum = effects.iter().sum::<f64>();
        let degenerate = effect_sum <= 0.0;
        if degenerate {
            warn!(
                baseline,
                "all removal effects are zero, no conversions attributed"
            );
        }
        let share = |effect: f64| {
            if degenerate {
                0.0
            } else {
                effect / effect_sum
            }
        };

        let channels = catalog
            .channels()
            .zip(effects)
            .map(|(channel, &effect)| ChannelAttribution {
                channel_name: catalog.channel_name(channel).to_owned(),
                total_conversions: share(effect) * observed.conversions,
                total_conversion_value: observed.value.map(|v| share(effect) * v),
            })
            .collect();

        let removal_effects = self.params.out_more.then(|| {
            catalog
                .channels()
                .zip(effects)
                .map(|(channel, &effect)| RemovalEffect {
                    channel_name: catalog.channel_name(channel).to_owned(),
                    removal_effect: effect,
                    relative_removal_effect: if baseline > 0.0 {
                        effect / baseline
                    } else {
                        0.0
                    },
                })
                .collect()
        });
        let transition_matrix = self
            .params
            .out_more
            .then(|| index.probabilities(catalog));

        MarkovAttribution {
            channels,
            baseline_conversion_rate: baseline,
            degenerate,
            removal_effects,
            transition_matrix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulationError;

    fn example_paths() -> Vec<PathRecord> {
        vec![
            PathRecord::converted(["A", "B"], 1),
            PathRecord::converted(["A", "B"], 1),
            PathRecord::lost(["A", "C"], 1),
        ]
    }

    fn seeded(nsim: u64, seed: u64) -> MarkovParams {
        MarkovParams {
            nsim,
            seed: Some(seed),
            out_more: true,
            ..MarkovParams::default()
        }
    }

    fn total_conversions(result: &MarkovAttribution) -> f64 {
        result.channels.iter().map(|c| c.total_conversions).sum()
    }

    #[test]
    fn test_end_to_end_example() {
        let result = MarkovModel::new(seeded(100_000, 2024))
            .fit(&example_paths())
            .unwrap();

        assert!((result.baseline_conversion_rate - 2.0 / 3.0).abs() < 0.01);
        assert!(!result.degenerate);

        let effect_a = result.removal_effect("A").unwrap().removal_effect;
        let effect_b = result.removal_effect("B").unwrap().removal_effect;
        let effect_c = result.removal_effect("C").unwrap().removal_effect;
        // removing A or B blocks every conversion
        assert!((effect_a - 2.0 / 3.0).abs() < 0.01);
        assert!((effect_b - 2.0 / 3.0).abs() < 0.01);
        assert!(effect_c < 0.01);

        let b = result.channel("B").unwrap();
        let c = result.channel("C").unwrap();
        assert!(c.total_conversions < 0.05);
        assert!(b.total_conversions > 0.95);
        assert!((total_conversions(&result) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_path_channel_gets_all_credit() {
        let paths = vec![
            PathRecord::converted(["B"], 2),
            PathRecord::lost(["C"], 1),
        ];
        let result = MarkovModel::new(seeded(50_000, 1)).fit(&paths).unwrap();
        let b = result.channel("B").unwrap();
        assert!(b.total_conversions > 1.95);
        assert!((total_conversions(&result) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_effects_are_non_negative() {
        let paths = vec![
            PathRecord::new(["A", "B", "C"], 3, 5),
            PathRecord::new(["B", "A"], 1, 4),
            PathRecord::new(["C"], 2, 2),
            PathRecord::new(["A", "C", "A", "B"], 1, 0),
        ];
        let result = MarkovModel::new(seeded(5000, 8)).fit(&paths).unwrap();
        for effect in result.removal_effects.as_ref().unwrap() {
            assert!(effect.removal_effect >= 0.0);
            assert!(effect.relative_removal_effect >= 0.0);
        }
        for channel in &result.channels {
            assert!(channel.total_conversions >= 0.0);
        }
        assert!((total_conversions(&result) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_unreached_channel_has_zero_effect() {
        let mut paths = example_paths();
        paths.push(PathRecord::new(["Z"], 0, 0));
        let result = MarkovModel::new(seeded(2000, 3)).fit(&paths).unwrap();
        assert_eq!(result.removal_effect("Z").unwrap().removal_effect, 0.0);
        assert_eq!(result.channel("Z").unwrap().total_conversions, 0.0);
    }

    #[test]
    fn test_conversion_value_is_attributed() {
        let paths = vec![
            PathRecord::converted(["A", "B"], 2).with_value(30.0),
            PathRecord::lost(["A", "C"], 1),
            PathRecord::converted(["C"], 1).with_value(10.0),
        ];
        let result = MarkovModel::new(seeded(5000, 4)).fit(&paths).unwrap();
        let total_value = result
            .channels
            .iter()
            .map(|c| c.total_conversion_value.unwrap())
            .sum::<f64>();
        assert!((total_value - 40.0).abs() < 1e-9);
        assert!((total_conversions(&result) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_value_column() {
        let result = MarkovModel::new(seeded(1000, 4))
            .fit(&example_paths())
            .unwrap();
        assert!(result.channels.iter().all(|c| c.total_conversion_value.is_none()));
    }

    #[test]
    fn test_single_step_walks_never_convert() {
        let params = MarkovParams {
            max_step: Some(1),
            ..seeded(1000, 5)
        };
        let result = MarkovModel::new(params).fit(&example_paths()).unwrap();
        assert_eq!(result.baseline_conversion_rate, 0.0);
        assert!(result.degenerate);
        assert_eq!(total_conversions(&result), 0.0);
    }

    #[test]
    fn test_single_step_direct_conversion() {
        let paths = vec![PathRecord::converted(Vec::<String>::new(), 1)];
        let params = MarkovParams {
            max_step: Some(1),
            ..seeded(100, 5)
        };
        let result = MarkovModel::new(params).fit(&paths).unwrap();
        assert_eq!(result.baseline_conversion_rate, 1.0);
        assert!(result.channels.is_empty());
    }

    #[test]
    fn test_seed_reproduces_result_across_threads() {
        let one = MarkovParams {
            threads: Some(1),
            ..seeded(9000, 77)
        };
        let many = MarkovParams {
            threads: Some(5),
            ..seeded(9000, 77)
        };
        let a = MarkovModel::new(one).fit(&example_paths()).unwrap();
        let b = MarkovModel::new(many).fit(&example_paths()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_more_is_optional() {
        let params = MarkovParams {
            out_more: false,
            ..seeded(1000, 6)
        };
        let result = MarkovModel::new(params).fit(&example_paths()).unwrap();
        assert!(result.removal_effects.is_none());
        assert!(result.transition_matrix.is_none());

        let result = MarkovModel::new(seeded(1000, 6))
            .fit(&example_paths())
            .unwrap();
        assert_eq!(result.transition_matrix.unwrap().len(), 5);
    }

    #[test]
    fn test_second_order_model() {
        let paths = vec![
            PathRecord::converted(["A", "B", "C"], 3),
            PathRecord::lost(["A", "C"], 2),
            PathRecord::converted(["B"], 1),
        ];
        let params = MarkovParams {
            order: 2,
            ..seeded(20_000, 10)
        };
        let result = MarkovModel::new(params).fit(&paths).unwrap();
        assert!((result.baseline_conversion_rate - 4.0 / 6.0).abs() < 0.02);
        assert!((total_conversions(&result) - 4.0).abs() < 1e-9);
        let labels = result
            .transition_matrix
            .as_ref()
            .unwrap()
            .iter()
            .map(|t| t.from.as_str())
            .collect::<Vec<_>>();
        assert!(labels.contains(&"A,B"));
    }

    #[test]
    fn test_second_order_removal_effects() {
        // states: [A,B] -> [B,C] -> conv, [A,C] -> null, [B] -> conv
        let paths = vec![
            PathRecord::converted(["A", "B", "C"], 3),
            PathRecord::lost(["A", "C"], 2),
            PathRecord::converted(["B"], 1),
        ];
        let params = MarkovParams {
            order: 2,
            ..seeded(40_000, 12)
        };
        let result = MarkovModel::new(params).fit(&paths).unwrap();

        let effect = |name: &str| result.removal_effect(name).unwrap().removal_effect;
        // without A or C only [B] converts, without B nothing does
        assert!((effect("A") - 0.5).abs() < 0.02, "A = {}", effect("A"));
        assert!((effect("B") - 4.0 / 6.0).abs() < 0.02, "B = {}", effect("B"));
        assert!((effect("C") - 0.5).abs() < 0.02, "C = {}", effect("C"));

        let conversions = |name: &str| result.channel(name).unwrap().total_conversions;
        assert!((conversions("A") - 1.2).abs() < 0.1);
        assert!((conversions("B") - 1.6).abs() < 0.1);
        assert!((conversions("C") - 1.2).abs() < 0.1);
        assert!((total_conversions(&result) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_parameters_are_validated_first() {
        let cases = [
            (
                MarkovParams {
                    nsim: 0,
                    ..MarkovParams::default()
                },
                ValidationError::InvalidSimulationCount,
            ),
            (
                MarkovParams {
                    max_step: Some(0),
                    ..MarkovParams::default()
                },
                ValidationError::InvalidMaxStep,
            ),
            (
                MarkovParams {
                    order: 0,
                    ..MarkovParams::default()
                },
                ValidationError::InvalidOrder { order: 0 },
            ),
            (
                MarkovParams {
                    threads: Some(0),
                    ..MarkovParams::default()
                },
                ValidationError::InvalidThreadCount,
            ),
        ];
        for (params, expected) in cases {
            let err = MarkovModel::new(params).fit(&example_paths()).unwrap_err();
            assert_eq!(err, AttributionError::Validation(expected));
        }

        let params = MarkovParams {
            max_failure_ratio: 1.5,
            ..MarkovParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_paths_are_validated_first() {
        let mut paths = example_paths();
        paths.push(PathRecord::converted(["A"], 1).with_value(f64::INFINITY));
        let err = MarkovModel::new(seeded(10, 0)).fit(&paths).unwrap_err();
        assert_eq!(
            err,
            AttributionError::Validation(ValidationError::InvalidValue { path_index: 3 })
        );
    }

    #[test]
    fn test_simulation_error_is_not_validation() {
        // sanity check on the taxonomy used by callers
        let err = AttributionError::from(SimulationError::PervasiveFailure {
            failed: 1,
            attempted: 1,
            first: Box::new(SimulationError::NoTransition {
                origin: crate::StateId::START,
            }),
        });
        assert!(matches!(err, AttributionError::Simulation(_)));
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: MarkovParams = serde_json::from_str(r#"{ "order": 2, "seed": 9 }"#).unwrap();
        assert_eq!(params.order, 2);
        assert_eq!(params.seed, Some(9));
        assert_eq!(params.nsim, MarkovParams::default().nsim);
    }
}
