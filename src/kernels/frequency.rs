//! Narrowband frequency-bin hop for quasi-monochromatic signals.

use rand::RngCore;

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::ParameterSet;

/// Move `f0` up or down by exactly one bin width `df`, with equal
/// probability. Symmetric.
pub struct FrequencyBinJump;

impl FrequencyBinJump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FrequencyBinJump {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for FrequencyBinJump {
    fn name(&self) -> &str {
        "FrequencyBin"
    }

    fn propose(
        &mut self,
        _ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        if !current.is_non_fixed("f0") || current.try_scalar("df").is_none() {
            return Ok(None);
        }

        let mut proposed = current.clone();
        let df = proposed.scalar("df");
        let f0 = proposed.scalar("f0");
        let new_f0 = if rng.gen::<f64>() < 0.5 {
            f0 - df
        } else {
            f0 + df
        };
        proposed.set_scalar("f0", new_f0);

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

    #[test]
    fn hops_exactly_one_bin() {
        let mut params = ParameterSet::new();
        params.insert_scalar("f0", 100.0, VaryType::Linear);
        params.insert_scalar("df", 0.25, VaryType::Fixed);
        let mut ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        );
        let mut kernel = FrequencyBinJump::new();
        let mut rng = StdRng::seed_from_u64(61);
        for _ in 0..50 {
            let proposed = kernel
                .propose(&mut ctx, &params, &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(proposed.log_ratio, 0.0);
            let delta = proposed.params.scalar("f0") - 100.0;
            assert!(delta.abs() == 0.25);
        }
    }
}
