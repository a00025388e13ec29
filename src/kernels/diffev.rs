//! Differential-evolution jumps along history difference vectors.

use rand::RngCore;

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::kernels::Subspace;
use crate::params::ParameterSet;

/// Fraction of jumps made exactly along the difference vector, enabling
/// hops between well-separated posterior modes.
const MODE_HOPPING_FRAC: f64 = 0.5;

/// Jump by a random multiple of the difference between two distinct
/// history-buffer points, over a parameter subspace. Symmetric.
pub struct DifferentialEvolutionProposal {
    subspace: Subspace,
    name: String,
}

impl DifferentialEvolutionProposal {
    pub fn new(subspace: Subspace) -> Self {
        Self {
            subspace,
            name: format!("DifferentialEvolution{}", subspace.label()),
        }
    }
}

impl JumpProposal for DifferentialEvolutionProposal {
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

        let Some((point_i, point_j)) = ctx.de_buffer.distinct_pair(rng) else {
            return Ok(None);
        };

        let scale = if rng.gen::<f64>() < MODE_HOPPING_FRAC {
            1.0
        } else {
            // Log-uniform between 0.1 and 10 times the tuned random-walk
            // Metropolis scale.
            2.38 / (ndim as f64).sqrt()
                * (0.1f64.ln() + 100.0f64.ln() * rng.gen::<f64>()).exp()
        };

        let mut proposed = current.clone();
        for name in &names {
            let (Some(vi), Some(vj)) = (point_i.try_scalar(name), point_j.try_scalar(name)) else {
                continue;
            };
            let value = proposed.scalar(name) + scale * (vj - vi);
            proposed.set_scalar(name, value);
        }

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: 0.0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::AdaptiveConfig;
    use crate::geometry::three_detector_network;
    use crate::params::VaryType;
    use crate::prior::PriorBounds;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn point(mc: f64, ra: f64) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert_scalar("chirpmass", mc, VaryType::Linear);
        params.insert_scalar("rightascension", ra, VaryType::Circular);
        params
    }

    fn setup() -> (ProposalContext, ParameterSet) {
        let current = point(20.0, 1.0);
        let ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &current,
            AdaptiveConfig::default(),
        );
        (ctx, current)
    }

    #[test]
    fn empty_buffer_produces_no_proposal() {
        let (mut ctx, current) = setup();
        let mut kernel = DifferentialEvolutionProposal::new(Subspace::Full);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(kernel
            .propose(&mut ctx, &current, &mut rng)
            .unwrap()
            .is_none());

        ctx.de_buffer.record(&point(19.0, 0.9));
        assert!(kernel
            .propose(&mut ctx, &current, &mut rng)
            .unwrap()
            .is_none());
    }

    #[test]
    fn jumps_along_difference_vectors() {
        let (mut ctx, current) = setup();
        ctx.de_buffer.record(&point(19.0, 0.9));
        ctx.de_buffer.record(&point(21.0, 1.1));

        let mut kernel = DifferentialEvolutionProposal::new(Subspace::Full);
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let proposed = kernel
                .propose(&mut ctx, &current, &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(proposed.log_ratio, 0.0);
            // The two buffer points differ by (±2, ±0.2); the proposal moves
            // both coordinates by the same signed multiple of that vector.
            let dmc = proposed.params.scalar("chirpmass") - 20.0;
            let dra = proposed.params.scalar("rightascension") - 1.0;
            assert!(is_close::is_close!(dmc / 2.0, dra / 0.2, rel_tol = 1e-9));
        }
    }

    #[test]
    fn intrinsic_subspace_leaves_extrinsic_untouched() {
        let (mut ctx, current) = setup();
        ctx.de_buffer.record(&point(19.0, 0.9));
        ctx.de_buffer.record(&point(21.0, 1.1));

        let mut kernel = DifferentialEvolutionProposal::new(Subspace::Intrinsic);
        let mut rng = StdRng::seed_from_u64(3);
        let proposed = kernel
            .propose(&mut ctx, &current, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(proposed.params.scalar("rightascension"), 1.0);
    }
}
