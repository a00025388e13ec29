//! Polarisation/phase degeneracy jumps.

use rand::RngCore;

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::ParameterSet;

const PI: f64 = std::f64::consts::PI;
const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

/// Deterministic shift exploiting the exact waveform degeneracy
/// `(φ, ψ) → (φ + π, ψ + π/2)`, wrapped into canonical ranges. Symmetric.
pub struct PolarizationPhaseJump;

impl PolarizationPhaseJump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PolarizationPhaseJump {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for PolarizationPhaseJump {
    fn name(&self) -> &str {
        "PolarizationPhase"
    }

    fn propose(
        &mut self,
        _ctx: &mut ProposalContext,
        current: &ParameterSet,
        _rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        if !current.is_non_fixed("phase") || !current.is_non_fixed("polarisation") {
            return Ok(None);
        }

        let mut proposed = current.clone();
        let phi = (proposed.scalar("phase") + PI).rem_euclid(TWO_PI);
        let psi = (proposed.scalar("polarisation") + PI / 2.0).rem_euclid(PI);
        proposed.set_scalar("phase", phi);
        proposed.set_scalar("polarisation", psi);

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: 0.0,
        }))
    }
}

/// Correlated polarisation/phase jump in sum/difference coordinates.
///
/// Transforms to `α = ψ + φ`, `β = ψ − φ`, makes a large uniform jump in one
/// of the two, transforms back and applies the cyclic/reflective bounds.
/// Symmetric.
pub struct CorrPolarizationPhaseJump;

impl CorrPolarizationPhaseJump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CorrPolarizationPhaseJump {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for CorrPolarizationPhaseJump {
    fn name(&self) -> &str {
        "CorrPolarizationPhase"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        if !current.is_non_fixed("phase") || !current.is_non_fixed("polarisation") {
            return Ok(None);
        }

        let mut proposed = current.clone();
        let psi = proposed.scalar("polarisation");
        let phi = proposed.scalar("phase");

        // alpha spans [0, 3π), beta spans [−2π, π).
        let mut alpha = psi + phi;
        let mut beta = psi - phi;

        if rng.gen::<f64>() < 0.5 {
            alpha = rng.gen::<f64>() * 3.0 * PI;
        } else {
            beta = -TWO_PI + rng.gen::<f64>() * 3.0 * PI;
        }

        let new_psi = (alpha + beta) * 0.5;
        let new_phi = (alpha - beta) * 0.5;

        proposed.set_scalar("polarisation", new_psi);
        proposed.set_scalar("phase", new_phi);
        proposed.apply_cyclic_reflective_bounds(&ctx.priors);

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: 0.0,
        }))
    }
}
