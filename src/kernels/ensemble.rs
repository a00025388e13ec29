//! Affine-invariant ensemble moves over the history buffer.
//!
//! The stretch move follows Goodman & Weare (2010): the proposal slides the
//! current point along its separation from another ensemble member, and the
//! non-symmetric Jacobian enters the proposal ratio. The walk move combines
//! a small subset of ensemble points into a Gaussian step matched to the
//! local ensemble covariance and is symmetric.

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::kernels::Subspace;
use crate::params::ParameterSet;

/// Tuning constant of the stretch move; must exceed 1. Larger values lower
/// the acceptance rate.
const STRETCH_SCALE: f64 = 3.0;

/// Number of ensemble points combined by one walk move.
const WALK_POINTS: usize = 3;

/// Stretch move: `proposed = other + z·(current − other)` with
/// `z = exp(U(−ln a, ln a))`, so `p(z) ∝ 1/z` on `[1/a, a]`.
///
/// The log proposal ratio is `Ndim·ln z`, the Jacobian correction required
/// for detailed balance; it must not be treated as zero.
pub struct EnsembleStretchProposal {
    subspace: Subspace,
    name: String,
}

impl EnsembleStretchProposal {
    pub fn new(subspace: Subspace) -> Self {
        Self {
            subspace,
            name: format!("EnsembleStretch{}", subspace.label()),
        }
    }
}

impl JumpProposal for EnsembleStretchProposal {
    fn name(&self) -> &str {
        &self.name
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        let names = self.subspace.names(ctx, current);
        let ndim = names.len();
        if ndim == 0 {
            return Ok(None);
        }

        let Some(other) = ctx.de_buffer.other_than(current, rng) else {
            return Ok(None);
        };

        let log_max = STRETCH_SCALE.ln();
        let scale = (2.0 * log_max * rng.gen::<f64>() - log_max).exp();

        let mut proposed = current.clone();
        for name in &names {
            let Some(other_value) = other.try_scalar(name) else {
                continue;
            };
            let value = other_value + scale * (proposed.scalar(name) - other_value);
            proposed.set_scalar(name, value);
        }

        let log_ratio = if scale < STRETCH_SCALE && scale > 1.0 / STRETCH_SCALE {
            scale.ln() * ndim as f64
        } else {
            f64::NEG_INFINITY
        };

        Ok(Some(Proposed {
            params: proposed,
            log_ratio,
        }))
    }
}

/// Walk move: displace the current point by `Σᵢ zᵢ·(pᵢ − centroid)` over a
/// random 3-point subset of the history buffer, with independent standard
/// normal weights `zᵢ`. Symmetric.
pub struct EnsembleWalkProposal {
    subspace: Subspace,
    name: String,
}

impl EnsembleWalkProposal {
    pub fn new(subspace: Subspace) -> Self {
        Self {
            subspace,
            name: format!("EnsembleWalk{}", subspace.label()),
        }
    }
}

impl JumpProposal for EnsembleWalkProposal {
    fn name(&self) -> &str {
        &self.name
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        let names = self.subspace.names(ctx, current);
        if names.is_empty() {
            return Ok(None);
        }

        let Some(points) = ctx.de_buffer.choose_subset(WALK_POINTS, rng) else {
            return Ok(None);
        };

        let mut centroid = vec![0.0; names.len()];
        for point in &points {
            for (k, name) in names.iter().enumerate() {
                if let Some(v) = point.try_scalar(name) {
                    centroid[k] += v / WALK_POINTS as f64;
                }
            }
        }

        let weights: Vec<f64> = (0..WALK_POINTS)
            .map(|_| StandardNormal.sample(rng))
            .collect();

        let mut step = vec![0.0; names.len()];
        for (point, z) in points.iter().zip(&weights) {
            for (k, name) in names.iter().enumerate() {
                if let Some(v) = point.try_scalar(name) {
                    step[k] += (v - centroid[k]) * z;
                }
            }
        }

        let mut proposed = current.clone();
        for (k, name) in names.iter().enumerate() {
            let value = proposed.scalar(name) + step[k];
            proposed.set_scalar(name, value);
        }

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: 0.0,
        }))
    }
}
