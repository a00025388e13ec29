//! Jump-proposal engine for Bayesian gravitational-wave parameter
//! estimation.
//!
//! Supplies the proposal side of a Metropolis-Hastings or nested-sampling
//! framework: a weighted, shuffleable cycle of heterogeneous jump kernels
//! (adaptive single-parameter jumps, differential evolution, ensemble
//! stretch/walk moves, covariance-eigenvector jumps, detector-geometry sky
//! moves, a reversible-jump Morlet-wavelet glitch model and clustered-KDE
//! independence samplers), the adaptive step-size controller, and the
//! differential-evolution history buffer. The outer sampler owns the
//! likelihood and the accept/reject decision; this crate produces candidate
//! points and the log proposal-density ratios needed to preserve detailed
//! balance.

pub mod adapt;
pub mod buffer;
pub mod context;
pub mod cycle;
pub mod geometry;
pub mod glitch;
pub mod kde;
pub mod kernels;
pub mod params;
pub mod prior;

pub mod errors;

pub use adapt::{AdaptiveConfig, AdaptiveState};
pub use buffer::DifferentialEvolutionBuffer;
pub use context::{EigenBasis, ProposalContext};
pub use cycle::{
    setup_default_cycle, CycleOptions, CycleOutcome, CycleWeights, JumpProposal, ProposalCycle,
    Proposed,
};
pub use errors::{ProposalError, ProposalResult};
pub use kernels::distance::LogLikelihood;
pub use params::{ParamValue, Parameter, ParameterSet, VaryType};
pub use prior::PriorBounds;
