//! Gaussian jump of the PSD-fit noise-model scale factors.

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::{ParamValue, ParameterSet};

/// Perturb every entry of the per-detector `psdscale` matrix by an
/// independent Gaussian with per-bin sigma taken from the `psdsigma`
/// nuisance vector. Symmetric.
pub struct PsdFitJump;

impl PsdFitJump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PsdFitJump {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for PsdFitJump {
    fn name(&self) -> &str {
        "PSDFitJump"
    }

    fn propose(
        &mut self,
        _ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        let has_scale = matches!(
            current.get("psdscale"),
            Some(p) if matches!(p.value, ParamValue::Matrix(_))
        );
        let has_sigma = matches!(
            current.get("psdsigma"),
            Some(p) if matches!(p.value, ParamValue::Vector(_))
        );
        if !has_scale || !has_sigma {
            return Ok(None);
        }

        let mut proposed = current.clone();
        let sigmas = proposed.vector("psdsigma").to_vec();
        let scales = proposed.matrix_mut("psdscale");
        if scales.ncols() > sigmas.len() {
            return Ok(None);
        }

        for mut row in scales.rows_mut() {
            for (j, entry) in row.iter_mut().enumerate() {
                let z: f64 = StandardNormal.sample(rng);
                *entry += z * sigmas[j];
            }
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
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn perturbs_every_scale_entry() {
        let mut params = ParameterSet::new();
        params.insert(
            "psdscale",
            ParamValue::Matrix(Array2::ones((2, 4))),
            VaryType::Linear,
        );
        params.insert(
            "psdsigma",
            ParamValue::Vector(vec![0.1; 4]),
            VaryType::Fixed,
        );
        let mut ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        );
        let mut kernel = PsdFitJump::new();
        let mut rng = StdRng::seed_from_u64(71);
        let proposed = kernel
            .propose(&mut ctx, &params, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(proposed.log_ratio, 0.0);
        let scales = proposed.params.matrix("psdscale");
        assert!(scales.iter().all(|&v| v != 1.0));
    }

    #[test]
    fn missing_noise_block_produces_no_proposal() {
        let params = ParameterSet::new();
        let mut ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        );
        let mut kernel = PsdFitJump::new();
        let mut rng = StdRng::seed_from_u64(72);
        assert!(kernel
            .propose(&mut ctx, &params, &mut rng)
            .unwrap()
            .is_none());
    }
}
