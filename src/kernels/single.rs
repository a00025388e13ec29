//! Single-parameter jumps: the adaptive workhorse proposal and its fixed-step
//! fallback.

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::ParameterSet;

fn choose_scalar(
    params: &ParameterSet,
    rng: &mut dyn RngCore,
) -> Option<String> {
    use rand::seq::SliceRandom;
    let names: Vec<&str> = params.non_fixed_scalar_names().collect();
    names.choose(&mut *rng).map(|s| s.to_string())
}

/// Perturb one uniformly-chosen non-fixed scalar by
/// `N(0,1) · sigma[name] · √temperature`, with `sigma` taken from the
/// adaptive table. Symmetric.
///
/// Falls back to [`SingleProposal`] when adaptation is globally disabled.
pub struct SingleAdaptProposal {
    fallback: SingleProposal,
}

impl SingleAdaptProposal {
    pub fn new() -> Self {
        Self {
            fallback: SingleProposal::new(),
        }
    }
}

impl Default for SingleAdaptProposal {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for SingleAdaptProposal {
    fn name(&self) -> &str {
        "Single"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        if !ctx.adaptive.adapting() {
            return self.fallback.propose(ctx, current, rng);
        }

        let Some(name) = choose_scalar(current, rng) else {
            return Ok(None);
        };

        let sigma = ctx.adaptive.sigma(&name);
        let z: f64 = StandardNormal.sample(rng);

        let mut proposed = current.clone();
        let value = proposed.scalar(&name) + z * sigma * ctx.sqrt_temperature();
        proposed.set_scalar(&name, value);
        proposed.apply_cyclic_reflective_bounds(&ctx.priors);

        ctx.adaptive.mark_adaptable_step(&name);

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: 0.0,
        }))
    }
}

/// Non-adaptive single-parameter jump.
///
/// The step is a fixed small fraction of 0.1·√temperature chosen by
/// parameter class, occasionally inflated by a large factor (10× with
/// probability 1e-3, 100× with probability 1e-4) to allow rare long
/// excursions. Symmetric.
pub struct SingleProposal;

impl SingleProposal {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SingleProposal {
    fn default() -> Self {
        Self::new()
    }
}

fn step_fraction(name: &str) -> f64 {
    match name {
        "eta" | "q" | "time" | "a_spin1" | "a_spin2" => 0.001,
        "polarisation" | "phase" | "costheta_jn" => 0.1,
        _ => 0.01,
    }
}

impl JumpProposal for SingleProposal {
    fn name(&self) -> &str {
        "Single"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        let Some(name) = choose_scalar(current, rng) else {
            return Ok(None);
        };

        let sigma = 0.1 * ctx.sqrt_temperature();
        let mut big_sigma = 1.0;
        if rng.gen::<f64>() < 1.0e-3 {
            big_sigma = 1.0e1;
        }
        if rng.gen::<f64>() < 1.0e-4 {
            big_sigma = 1.0e2;
        }

        let z: f64 = StandardNormal.sample(rng);
        let step = z * big_sigma * sigma * step_fraction(&name);

        let mut proposed = current.clone();
        let value = proposed.scalar(&name) + step;
        proposed.set_scalar(&name, value);
        proposed.apply_cyclic_reflective_bounds(&ctx.priors);

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: 0.0,
        }))
    }
}
