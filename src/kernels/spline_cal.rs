//! Spline-calibration nuisance jumps.

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::{ParamValue, ParameterSet};

/// Jointly perturb the per-detector spline calibration amplitude and phase
/// knots, named `{detector}_spcal_amp` and `{detector}_spcal_phase`.
///
/// Each knot moves by `width · N(0,1) / √(Nifo·Nknots)` so the overall
/// calibration perturbation stays comparable as the network and knot count
/// grow. Symmetric.
pub struct SplineCalibrationProposal {
    amp_width: f64,
    phase_width: f64,
}

impl SplineCalibrationProposal {
    pub fn new() -> Self {
        Self {
            amp_width: 0.1,
            phase_width: 0.1,
        }
    }

    /// Override the calibration uncertainty widths.
    pub fn with_widths(amp_width: f64, phase_width: f64) -> Self {
        Self {
            amp_width,
            phase_width,
        }
    }
}

impl Default for SplineCalibrationProposal {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for SplineCalibrationProposal {
    fn name(&self) -> &str {
        "SplineCalibration"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        let nifo = ctx.network.len();
        let mut proposed = current.clone();
        let mut touched = false;

        for det in ctx.network.detectors() {
            let amp_name = format!("{}_spcal_amp", det.name);
            let phase_name = format!("{}_spcal_phase", det.name);
            if !matches!(
                proposed.get(&amp_name),
                Some(p) if matches!(p.value, ParamValue::Vector(_))
            ) {
                continue;
            }

            let n_knots = proposed.vector(&amp_name).len();
            if n_knots == 0 {
                continue;
            }
            let norm = ((nifo * n_knots) as f64).sqrt();

            for (name, width) in [(amp_name, self.amp_width), (phase_name, self.phase_width)] {
                if !matches!(
                    proposed.get(&name),
                    Some(p) if matches!(p.value, ParamValue::Vector(_))
                ) {
                    continue;
                }
                for knot in proposed.vector_mut(&name).iter_mut() {
                    let z: f64 = StandardNormal.sample(rng);
                    *knot += width * z / norm;
                }
                touched = true;
            }
        }

        if !touched {
            return Ok(None);
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

    #[test]
    fn perturbs_all_registered_detectors() {
        let mut params = ParameterSet::new();
        for det in ["H1", "L1", "V1"] {
            params.insert(
                format!("{}_spcal_amp", det),
                ParamValue::Vector(vec![0.0; 5]),
                VaryType::Linear,
            );
            params.insert(
                format!("{}_spcal_phase", det),
                ParamValue::Vector(vec![0.0; 5]),
                VaryType::Linear,
            );
        }
        let mut ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        );
        let mut kernel = SplineCalibrationProposal::new();
        let mut rng = StdRng::seed_from_u64(81);
        let proposed = kernel
            .propose(&mut ctx, &params, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(proposed.log_ratio, 0.0);
        for det in ["H1", "L1", "V1"] {
            let amps = proposed.params.vector(&format!("{}_spcal_amp", det));
            assert!(amps.iter().any(|&v| v != 0.0));
        }
    }

    #[test]
    fn no_calibration_knots_means_no_proposal() {
        let params = ParameterSet::new();
        let mut ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        );
        let mut kernel = SplineCalibrationProposal::new();
        let mut rng = StdRng::seed_from_u64(82);
        assert!(kernel
            .propose(&mut ctx, &params, &mut rng)
            .unwrap()
            .is_none());
    }
}
