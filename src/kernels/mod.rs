//! The library of jump kernels cycled by the proposal scheduler.

pub mod diffev;
pub mod distance;
pub mod eigen;
pub mod ensemble;
pub mod frequency;
pub mod polarization;
pub mod prior_draw;
pub mod psd;
pub mod single;
pub mod sky;
pub mod spline_cal;

use crate::context::ProposalContext;
use crate::params::{extrinsic_subspace, ParameterSet, INTRINSIC_NAMES};

/// Which block of parameters a subspace-aware kernel operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subspace {
    /// All non-fixed real scalars.
    Full,
    /// Mass and spin parameters.
    Intrinsic,
    /// Sky location, distance, time and phase, honouring analytic
    /// marginalization of time and/or phase.
    Extrinsic,
}

impl Subspace {
    pub fn label(&self) -> &'static str {
        match self {
            Subspace::Full => "Full",
            Subspace::Intrinsic => "Intrinsic",
            Subspace::Extrinsic => "Extrinsic",
        }
    }

    /// Parameter names of this subspace that are present and non-fixed in
    /// `params`, in iteration order for `Full` and canonical order otherwise.
    pub fn names(&self, ctx: &ProposalContext, params: &ParameterSet) -> Vec<String> {
        match self {
            Subspace::Full => params
                .non_fixed_scalar_names()
                .map(|s| s.to_string())
                .collect(),
            Subspace::Intrinsic => INTRINSIC_NAMES
                .iter()
                .filter(|name| params.is_non_fixed(name))
                .map(|s| s.to_string())
                .collect(),
            Subspace::Extrinsic => extrinsic_subspace(ctx.marg_time, ctx.marg_phi)
                .iter()
                .filter(|name| params.is_non_fixed(name))
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
