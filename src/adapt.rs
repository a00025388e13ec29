//! Adaptive step-size controller for single-parameter jumps.
//!
//! A Robbins-Monro stochastic-approximation scheme: after every
//! single-parameter-style jump the chosen parameter's sigma grows on
//! acceptance and shrinks on rejection, converging towards the step size
//! that produces the target acceptance rate (commonly 0.234).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::params::ParameterSet;
use crate::prior::PriorBounds;

/// Per-parameter adaptation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigmaEntry {
    pub sigma: f64,
    pub proposed: u64,
    pub accepted: u64,
}

/// Configuration of the adaptation schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Adaptation is skipped entirely when false; the single-parameter kernel
    /// then falls back to its fixed-step variant.
    pub enabled: bool,
    /// Decay exponent: adaptation runs for `10^tau` iterations.
    pub tau: u32,
    /// Iterations to wait after a restart before adapting again.
    pub reset_buffer: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tau: 5,
            reset_buffer: 100,
        }
    }
}

/// Mutable state of the adaptive controller for one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveState {
    entries: IndexMap<String, SigmaEntry>,
    pub config: AdaptiveConfig,
    /// Scale of sigma changes; may be decayed by an external schedule.
    pub s_gamma: f64,
    pub adapt_length: u64,
    pub adapt_start: u64,
    #[serde(with = "lossless_f64")]
    pub log_l_at_adapt_start: f64,
    /// Name of the parameter perturbed by the last adaptable jump, if any.
    last_adaptable: Option<String>,
}

impl AdaptiveState {
    /// Initialize sigmas for every non-fixed scalar in `params`.
    ///
    /// Starting sigmas follow the parameter class: narrow (1e-3) for time,
    /// mass ratios and spin magnitudes, wide (0.1) for angular parameters,
    /// 0.01 otherwise.
    pub fn for_parameters(params: &ParameterSet, config: AdaptiveConfig) -> Self {
        let mut entries = IndexMap::new();
        for name in params.non_fixed_scalar_names() {
            let sigma = initial_sigma(name);
            entries.insert(
                name.to_string(),
                SigmaEntry {
                    sigma,
                    proposed: 0,
                    accepted: 0,
                },
            );
        }
        Self {
            entries,
            config,
            s_gamma: 1.0,
            adapt_length: 10u64.pow(config.tau),
            adapt_start: 0,
            log_l_at_adapt_start: f64::NEG_INFINITY,
            last_adaptable: None,
        }
    }

    pub fn adapting(&self) -> bool {
        self.config.enabled
    }

    /// Sigma for `name`. Panics if no entry exists: an adaptive jump for an
    /// unregistered parameter reflects a broken setup.
    pub fn sigma(&self, name: &str) -> f64 {
        match self.entries.get(name) {
            Some(entry) => entry.sigma,
            None => panic!("no adaptive sigma registered for {}", name),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&SigmaEntry> {
        self.entries.get(name)
    }

    /// Record that the last proposal was a single-parameter adaptable jump of
    /// `name`. Called by the single-adapt kernel only.
    pub fn mark_adaptable_step(&mut self, name: &str) {
        self.last_adaptable = Some(name.to_string());
    }

    pub fn last_adaptable(&self) -> Option<&str> {
        self.last_adaptable.as_deref()
    }

    /// Apply the post-decision update for the last iteration.
    ///
    /// Must be called once per iteration, after the outer sampler's
    /// accept/reject decision. No-op unless the last proposal marked an
    /// adaptable step.
    pub fn update(&mut self, accepted: bool, target_acceptance: f64, priors: &PriorBounds) {
        let Some(name) = self.last_adaptable.take() else {
            return;
        };
        if !self.config.enabled {
            return;
        }

        let entry = match self.entries.get_mut(&name) {
            Some(entry) => entry,
            None => panic!("no adaptive sigma registered for {}", name),
        };
        entry.proposed += 1;
        if accepted {
            entry.accepted += 1;
        }

        if !priors.has_min_max(&name) {
            return;
        }
        let (min, max) = priors.min_max(&name);
        let dprior = max - min;

        if accepted {
            entry.sigma += self.s_gamma * (dprior / 100.0) * (1.0 - target_acceptance);
        } else {
            entry.sigma -= self.s_gamma * (dprior / 100.0) * target_acceptance;
        }
        entry.sigma = entry.sigma.clamp(f64::MIN_POSITIVE, dprior);
    }

    /// Re-arm adaptation after a chain restart.
    pub fn restart(&mut self, log_likelihood: f64, iteration: u64) {
        self.adapt_start = iteration;
        self.log_l_at_adapt_start = log_likelihood;
        for entry in self.entries.values_mut() {
            entry.proposed = 0;
            entry.accepted = 0;
        }
    }

    /// Acceptance rate of the adaptable jumps for `name`, if any were made.
    pub fn acceptance_rate(&self, name: &str) -> Option<f64> {
        let entry = self.entries.get(name)?;
        if entry.proposed == 0 {
            None
        } else {
            Some(entry.accepted as f64 / entry.proposed as f64)
        }
    }
}

/// serde helper: JSON cannot represent non-finite floats (`serde_json`
/// encodes them as `null`), so encode this `f64` as a string to survive a
/// round trip — `log_l_at_adapt_start` starts life as `-inf`.
mod lossless_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse::<f64>().map_err(serde::de::Error::custom)
    }
}

fn initial_sigma(name: &str) -> f64 {
    match name {
        "eta" | "q" | "time" | "a_spin1" | "a_spin2" => 0.001,
        "polarisation" | "phase" | "costheta_jn" => 0.1,
        _ => 0.01,
    }
}
