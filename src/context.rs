//! Per-chain proposal context.
//!
//! One context exists per chain; chains never share mutable state, so
//! parallel-tempering ladders give every rung its own context, buffer and
//! adaptive table.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::adapt::{AdaptiveConfig, AdaptiveState};
use crate::buffer::DifferentialEvolutionBuffer;
use crate::geometry::DetectorNetwork;
use crate::glitch::GlitchData;
use crate::kde::ClusteredKdeSet;
use crate::params::ParameterSet;
use crate::prior::PriorBounds;

/// Externally supplied local quadratic approximation of the posterior, e.g.
/// from a Fisher-matrix estimate. Column `i` of `vectors` is the eigenvector
/// belonging to `values[i]`, in the iteration order of the non-fixed scalar
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenBasis {
    pub values: Array1<f64>,
    pub vectors: Array2<f64>,
}

/// Everything a jump kernel may consult besides the current parameter set.
#[derive(Debug)]
pub struct ProposalContext {
    pub network: DetectorNetwork,
    /// Reference GPS epoch of the analyzed segment.
    pub epoch: f64,
    pub priors: PriorBounds,
    /// Parallel-tempering temperature of this chain; 1 for an untempered run.
    pub temperature: f64,
    /// The likelihood marginalizes over arrival time analytically.
    pub marg_time: bool,
    /// The likelihood marginalizes over orbital phase analytically.
    pub marg_phi: bool,
    /// Synthetic analytic test likelihood: every prior is flat.
    pub analytic_test: bool,
    pub de_buffer: DifferentialEvolutionBuffer,
    pub adaptive: AdaptiveState,
    pub eigen: Option<EigenBasis>,
    pub kde: ClusteredKdeSet,
    pub glitch: Option<GlitchData>,
}

impl ProposalContext {
    /// Build a context for one chain.
    ///
    /// The DE buffer defaults to 5000 retained snapshots at stride 1; the
    /// adaptive table covers every non-fixed scalar of `initial_params`.
    pub fn new(
        network: DetectorNetwork,
        epoch: f64,
        priors: PriorBounds,
        initial_params: &ParameterSet,
        adaptive_config: AdaptiveConfig,
    ) -> Self {
        Self {
            network,
            epoch,
            priors,
            temperature: 1.0,
            marg_time: false,
            marg_phi: false,
            analytic_test: false,
            de_buffer: DifferentialEvolutionBuffer::new(5000, 1),
            adaptive: AdaptiveState::for_parameters(initial_params, adaptive_config),
            eigen: None,
            kde: ClusteredKdeSet::new(),
            glitch: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn sqrt_temperature(&self) -> f64 {
        self.temperature.sqrt()
    }
}
