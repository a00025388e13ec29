//! Jump along a random eigenvector of an externally supplied posterior
//! covariance estimate.

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::ParameterSet;

/// Pick one eigen-direction uniformly and move every non-fixed scalar along
/// it by `N(0,1)·√(temperature·eigenvalue)`. Symmetric.
///
/// The eigenbasis is a fixed local quadratic approximation of the posterior,
/// e.g. from a Fisher-matrix estimate, supplied through the context. Without
/// one the kernel produces no proposal.
pub struct CovarianceEigenvectorJump;

impl CovarianceEigenvectorJump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CovarianceEigenvectorJump {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for CovarianceEigenvectorJump {
    fn name(&self) -> &str {
        "CovarianceEigenvector"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        let Some(eigen) = ctx.eigen.as_ref() else {
            return Ok(None);
        };

        let n = eigen.values.len();
        if n == 0 {
            return Ok(None);
        }

        let direction = rng.gen_range(0..n);
        let z: f64 = StandardNormal.sample(rng);
        let jump_size = (ctx.temperature * eigen.values[direction]).sqrt() * z;

        let mut proposed = current.clone();
        let names: Vec<String> = current
            .non_fixed_scalar_names()
            .take(n)
            .map(|s| s.to_string())
            .collect();
        for (j, name) in names.iter().enumerate() {
            let increment = jump_size * eigen.vectors[[j, direction]];
            let value = proposed.scalar(name) + increment;
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
    use crate::context::EigenBasis;
    use crate::geometry::three_detector_network;
    use crate::params::VaryType;
    use crate::prior::PriorBounds;
    use ndarray::{arr1, arr2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (ProposalContext, ParameterSet) {
        let mut params = ParameterSet::new();
        params.insert_scalar("chirpmass", 20.0, VaryType::Linear);
        params.insert_scalar("q", 0.5, VaryType::Linear);
        let ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        );
        (ctx, params)
    }

    #[test]
    fn missing_basis_produces_no_proposal() {
        let (mut ctx, current) = setup();
        let mut kernel = CovarianceEigenvectorJump::new();
        let mut rng = StdRng::seed_from_u64(31);
        assert!(kernel
            .propose(&mut ctx, &current, &mut rng)
            .unwrap()
            .is_none());
    }

    #[test]
    fn moves_along_eigenvectors() {
        let (mut ctx, current) = setup();
        ctx.eigen = Some(EigenBasis {
            values: arr1(&[4.0, 0.01]),
            vectors: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
        });
        let mut kernel = CovarianceEigenvectorJump::new();
        let mut rng = StdRng::seed_from_u64(32);
        for _ in 0..50 {
            let proposed = kernel
                .propose(&mut ctx, &current, &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(proposed.log_ratio, 0.0);
            // With an axis-aligned basis exactly one coordinate moves.
            let moved = [("chirpmass", 20.0), ("q", 0.5)]
                .iter()
                .filter(|(n, v)| proposed.params.scalar(n) != *v)
                .count();
            assert_eq!(moved, 1);
        }
    }
}
