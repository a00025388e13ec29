//! Prior bounds and closed-form prior draws.
//!
//! The bounds provider backs the adaptive-sigma clamping, the cyclic and
//! reflective boundary corrections, and the independence-sampler draws used
//! by the approximate-prior proposal.

use indexmap::IndexMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::{ProposalError, ProposalResult};
use crate::params::ParameterSet;

/// Ordered map of per-parameter prior ranges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorBounds {
    ranges: IndexMap<String, (f64, f64)>,
}

impl PriorBounds {
    pub fn new() -> Self {
        Self {
            ranges: IndexMap::new(),
        }
    }

    /// Register a prior range for `name`.
    ///
    /// A range with `min >= max` or non-finite endpoints is rejected.
    pub fn insert(&mut self, name: impl Into<String>, min: f64, max: f64) -> ProposalResult<()> {
        let name = name.into();
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ProposalError::MalformedPriorRange { name, min, max });
        }
        self.ranges.insert(name, (min, max));
        Ok(())
    }

    pub fn has_min_max(&self, name: &str) -> bool {
        self.ranges.contains_key(name)
    }

    /// Prior range of `name`. Panics if no range is registered; callers that
    /// are unsure must check with [`PriorBounds::has_min_max`] first.
    pub fn min_max(&self, name: &str) -> (f64, f64) {
        match self.ranges.get(name) {
            Some(&(min, max)) => (min, max),
            None => panic!("no prior range registered for {}", name),
        }
    }

    pub fn width(&self, name: &str) -> f64 {
        let (min, max) = self.min_max(name);
        max - min
    }
}

/// Draw uniformly within the prior range of `name`.
pub fn draw_flat(priors: &PriorBounds, name: &str, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let (min, max) = priors.min_max(name);
    min + rng.gen::<f64>() * (max - min)
}

/// Draw from the cubic-in-distance (uniform-in-volume) prior.
pub fn draw_distance(priors: &PriorBounds, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let (dmin, dmax) = priors.min_max("distance");
    let x = rng.gen::<f64>();
    (x * (dmax.powi(3) - dmin.powi(3)) + dmin.powi(3)).cbrt()
}

/// Draw log-distance consistent with a uniform-in-volume distance prior.
pub fn draw_logdistance(priors: &PriorBounds, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let (logdmin, logdmax) = priors.min_max("logdistance");
    let dmin = logdmin.exp();
    let dmax = logdmax.exp();
    let x = rng.gen::<f64>();
    (x * (dmax.powi(3) - dmin.powi(3)) + dmin.powi(3)).cbrt().ln()
}

/// Draw a colatitude angle flat in its cosine.
pub fn draw_colatitude(priors: &PriorBounds, name: &str, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let (min, max) = priors.min_max(name);
    let x = rng.gen::<f64>();
    (min.cos() - x * (min.cos() - max.cos())).acos()
}

/// Draw a declination flat in its sine (uniform on the sphere).
pub fn draw_declination(priors: &PriorBounds, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let (min, max) = priors.min_max("declination");
    let x = rng.gen::<f64>();
    (x * (max.sin() - min.sin()) + min.sin()).asin()
}

/// Draw a chirp mass from the power-law prior `p(Mc) ∝ Mc^(-11/6)`.
pub fn draw_chirpmass(priors: &PriorBounds, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let (min, max) = priors.min_max("chirpmass");
    let m_min56 = min.powf(5.0 / 6.0);
    let m_max56 = max.powf(5.0 / 6.0);
    let delta = 1.0 / m_min56 - 1.0 / m_max56;
    let u = delta * rng.gen::<f64>();
    (1.0 / (1.0 / m_min56 - u)).powf(6.0 / 5.0)
}

/// Log-density of the approximate analytic prior used by the
/// independence-sampler correction.
///
/// Flat in time, right ascension, polarisation and phase; power-law in chirp
/// mass; uniform-in-volume in distance; uniform on the sphere in declination.
pub fn approx_log_prior(params: &ParameterSet) -> f64 {
    let mut log_p = 0.0;

    let mc = params.scalar("chirpmass");
    log_p += -11.0 / 6.0 * mc.ln();

    if let Some(logdist) = params.try_scalar("logdistance") {
        log_p += 3.0 * logdist;
    } else if let Some(dist) = params.try_scalar("distance") {
        log_p += 2.0 * dist.ln();
    }

    let dec = params.scalar("declination");
    log_p += dec.cos().ln();

    log_p
}
