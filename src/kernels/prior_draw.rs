//! Independence sampler drawing from closed-form approximate priors.

use rand::RngCore;

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::ProposalResult;
use crate::params::{ParamValue, ParameterSet};
use crate::prior::{
    approx_log_prior, draw_chirpmass, draw_colatitude, draw_declination, draw_distance,
    draw_flat, draw_logdistance,
};

/// Parameters whose approximate prior is flat over the registered range.
const FLAT_PARAMS: &[&str] = &[
    "q",
    "eta",
    "time",
    "phase",
    "polarisation",
    "rightascension",
    "costheta_jn",
    "phi_jl",
    "phi12",
    "a_spin1",
    "a_spin2",
];

const PSD_SCALE_MIN: f64 = 0.10;
const PSD_SCALE_MAX: f64 = 10.0;

/// Draw each parameter with a known closed-form prior directly from that law.
///
/// An independence sampler, so the ratio is
/// `approx_log_prior(current) − approx_log_prior(proposed)`. Under a
/// synthetic analytic test likelihood every prior is flat and the ratio is
/// identically zero.
pub struct DrawApproxPrior;

impl DrawApproxPrior {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DrawApproxPrior {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for DrawApproxPrior {
    fn name(&self) -> &str {
        "DrawApproxPrior"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        let mut proposed = current.clone();

        if ctx.analytic_test {
            let names: Vec<String> = current
                .non_fixed_scalar_names()
                .map(|s| s.to_string())
                .collect();
            for name in &names {
                let value = draw_flat(&ctx.priors, name, rng);
                proposed.set_scalar(name, value);
            }
            return Ok(Some(Proposed {
                params: proposed,
                log_ratio: 0.0,
            }));
        }

        let log_backward_jump = approx_log_prior(current);

        for name in FLAT_PARAMS {
            if proposed.is_non_fixed(name) {
                let value = draw_flat(&ctx.priors, name, rng);
                proposed.set_scalar(name, value);
            }
        }

        if proposed.is_non_fixed("chirpmass") {
            let mc = draw_chirpmass(&ctx.priors, rng);
            proposed.set_scalar("chirpmass", mc);
        }

        if proposed.is_non_fixed("logdistance") {
            let logdist = draw_logdistance(&ctx.priors, rng);
            proposed.set_scalar("logdistance", logdist);
        } else if proposed.is_non_fixed("distance") {
            let dist = draw_distance(&ctx.priors, rng);
            proposed.set_scalar("distance", dist);
        }

        if proposed.is_non_fixed("declination") {
            let dec = draw_declination(&ctx.priors, rng);
            proposed.set_scalar("declination", dec);
        }

        for tilt in ["tilt_spin1", "tilt_spin2"] {
            if proposed.is_non_fixed(tilt) {
                let value = draw_colatitude(&ctx.priors, tilt, rng);
                proposed.set_scalar(tilt, value);
            }
        }

        let has_psd_block = matches!(
            proposed.get("psdscale"),
            Some(p) if matches!(p.value, ParamValue::Matrix(_))
        );
        if has_psd_block {
            let scales = proposed.matrix_mut("psdscale");
            for entry in scales.iter_mut() {
                *entry = PSD_SCALE_MIN + rng.gen::<f64>() * (PSD_SCALE_MAX - PSD_SCALE_MIN);
            }
        }

        let log_ratio = log_backward_jump - approx_log_prior(&proposed);

        Ok(Some(Proposed {
            params: proposed,
            log_ratio,
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

    fn setup() -> (ProposalContext, ParameterSet) {
        let mut params = ParameterSet::new();
        params.insert_scalar("chirpmass", 20.0, VaryType::Linear);
        params.insert_scalar("q", 0.5, VaryType::Linear);
        params.insert_scalar("declination", 0.1, VaryType::Linear);
        params.insert_scalar("distance", 400.0, VaryType::Linear);

        let mut priors = PriorBounds::new();
        priors.insert("chirpmass", 5.0, 50.0).unwrap();
        priors.insert("q", 0.05, 0.25).unwrap();
        priors
            .insert(
                "declination",
                -std::f64::consts::FRAC_PI_2,
                std::f64::consts::FRAC_PI_2,
            )
            .unwrap();
        priors.insert("distance", 10.0, 1000.0).unwrap();

        let ctx = ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            priors,
            &params,
            AdaptiveConfig::default(),
        );
        (ctx, params)
    }

    #[test]
    fn ratio_matches_approx_prior_densities() {
        let (mut ctx, current) = setup();
        let mut kernel = DrawApproxPrior::new();
        let mut rng = StdRng::seed_from_u64(41);
        for _ in 0..100 {
            let proposed = kernel
                .propose(&mut ctx, &current, &mut rng)
                .unwrap()
                .unwrap();
            let expected = approx_log_prior(&current) - approx_log_prior(&proposed.params);
            assert!(is_close::is_close!(proposed.log_ratio, expected));
        }
    }

    #[test]
    fn analytic_test_draws_flat_with_zero_ratio() {
        let (mut ctx, current) = setup();
        ctx.analytic_test = true;
        let mut kernel = DrawApproxPrior::new();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let proposed = kernel
                .propose(&mut ctx, &current, &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(proposed.log_ratio, 0.0);
            let mc = proposed.params.scalar("chirpmass");
            assert!((5.0..50.0).contains(&mc));
        }
    }

    #[test]
    fn draws_stay_inside_prior_ranges() {
        let (mut ctx, current) = setup();
        let mut kernel = DrawApproxPrior::new();
        let mut rng = StdRng::seed_from_u64(43);
        for _ in 0..200 {
            let proposed = kernel
                .propose(&mut ctx, &current, &mut rng)
                .unwrap()
                .unwrap()
                .params;
            assert!((5.0..=50.0).contains(&proposed.scalar("chirpmass")));
            assert!((0.05..=0.25).contains(&proposed.scalar("q")));
            assert!((10.0..=1000.0).contains(&proposed.scalar("distance")));
        }
    }
}
