//! Parameter sets for jump proposals.
//!
//! A [`ParameterSet`] is an ordered, named collection of typed variables.
//! Every proposal call deep-clones the current set, mutates the clone in
//! place, and hands it back to the sampler together with the log proposal
//! ratio. Iteration order is stable and deterministic, which index-based
//! kernel selection (single-parameter jumps, eigenvector jumps) relies on.

use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::prior::PriorBounds;

/// How a parameter is allowed to vary during sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaryType {
    /// Held constant for the whole run.
    Fixed,
    /// Sampled with reflective boundary behaviour.
    Linear,
    /// Sampled with cyclic (wrap-around) boundary behaviour.
    Circular,
    /// Derived quantity carried along for output only; never jumped.
    Output,
}

/// Value of a single parameter.
///
/// Kernels match exhaustively at their boundary and fail fast on a type
/// mismatch instead of reinterpreting memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Array2<f64>),
    /// Per-detector component counts for trans-dimensional sub-models.
    Count(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: ParamValue,
    pub vary: VaryType,
}

/// Ordered mapping from parameter name to value and vary type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    params: IndexMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self {
            params: IndexMap::new(),
        }
    }

    /// Add a parameter to the set.
    ///
    /// Panics if a parameter with the same name already exists; a duplicate
    /// registration is a broken setup, not a runtime condition.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue, vary: VaryType) {
        let name = name.into();
        if self.params.contains_key(&name) {
            panic!("parameter {} already exists", name);
        }
        self.params.insert(name, Parameter { value, vary });
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f64, vary: VaryType) {
        self.insert(name, ParamValue::Scalar(value), vary);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// Scalar value of `name`.
    ///
    /// Panics if the parameter is missing or not scalar-valued; numeric-only
    /// kernels must not be handed non-numeric parameters.
    pub fn scalar(&self, name: &str) -> f64 {
        match self.params.get(name) {
            Some(Parameter {
                value: ParamValue::Scalar(v),
                ..
            }) => *v,
            Some(_) => panic!("parameter {} is not scalar-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn try_scalar(&self, name: &str) -> Option<f64> {
        match self.params.get(name) {
            Some(Parameter {
                value: ParamValue::Scalar(v),
                ..
            }) => Some(*v),
            _ => None,
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) {
        match self.params.get_mut(name) {
            Some(Parameter {
                value: ParamValue::Scalar(v),
                ..
            }) => *v = value,
            Some(_) => panic!("parameter {} is not scalar-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn matrix(&self, name: &str) -> &Array2<f64> {
        match self.params.get(name) {
            Some(Parameter {
                value: ParamValue::Matrix(m),
                ..
            }) => m,
            Some(_) => panic!("parameter {} is not matrix-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn matrix_mut(&mut self, name: &str) -> &mut Array2<f64> {
        match self.params.get_mut(name) {
            Some(Parameter {
                value: ParamValue::Matrix(m),
                ..
            }) => m,
            Some(_) => panic!("parameter {} is not matrix-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn vector(&self, name: &str) -> &[f64] {
        match self.params.get(name) {
            Some(Parameter {
                value: ParamValue::Vector(v),
                ..
            }) => v,
            Some(_) => panic!("parameter {} is not vector-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn vector_mut(&mut self, name: &str) -> &mut Vec<f64> {
        match self.params.get_mut(name) {
            Some(Parameter {
                value: ParamValue::Vector(v),
                ..
            }) => v,
            Some(_) => panic!("parameter {} is not vector-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn counts(&self, name: &str) -> &[usize] {
        match self.params.get(name) {
            Some(Parameter {
                value: ParamValue::Count(v),
                ..
            }) => v,
            Some(_) => panic!("parameter {} is not count-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    pub fn counts_mut(&mut self, name: &str) -> &mut Vec<usize> {
        match self.params.get_mut(name) {
            Some(Parameter {
                value: ParamValue::Count(v),
                ..
            }) => v,
            Some(_) => panic!("parameter {} is not count-valued", name),
            None => panic!("parameter {} not found", name),
        }
    }

    /// Whether `name` takes part in sampling (present and neither fixed nor
    /// output-only).
    pub fn is_non_fixed(&self, name: &str) -> bool {
        matches!(
            self.params.get(name),
            Some(Parameter {
                vary: VaryType::Linear | VaryType::Circular,
                ..
            })
        )
    }

    /// Total number of registered parameters, of any type.
    pub fn dimension(&self) -> usize {
        self.params.len()
    }

    /// Number of non-fixed real-valued scalars, i.e. the dimensionality seen
    /// by the generic jump kernels.
    pub fn sampling_dimension(&self) -> usize {
        self.non_fixed_scalar_names().count()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(|s| s.as_str())
    }

    /// Names of non-fixed scalar parameters, in iteration order.
    pub fn non_fixed_scalar_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|(name, p)| {
            if matches!(p.vary, VaryType::Linear | VaryType::Circular)
                && matches!(p.value, ParamValue::Scalar(_))
            {
                Some(name.as_str())
            } else {
                None
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(name, p)| (name.as_str(), p))
    }

    /// Whether the non-fixed scalar values of `self` equal those of `other`.
    ///
    /// The stretch move uses this to reject drawing the current point itself
    /// from the ensemble history.
    pub fn same_sampled_values(&self, other: &ParameterSet) -> bool {
        self.non_fixed_scalar_names()
            .all(|name| other.try_scalar(name) == Some(self.scalar(name)))
    }

    /// Map every bounded non-fixed scalar back into its prior range.
    ///
    /// Circular parameters wrap around; linear parameters reflect off the
    /// bounds until inside. Parameters without registered bounds are left
    /// untouched.
    pub fn apply_cyclic_reflective_bounds(&mut self, priors: &PriorBounds) {
        let names: Vec<String> = self
            .non_fixed_scalar_names()
            .map(|s| s.to_string())
            .collect();
        for name in names {
            if !priors.has_min_max(&name) {
                continue;
            }
            let (min, max) = priors.min_max(&name);
            let width = max - min;
            let v = self.scalar(&name);
            let vary = self.params[&name].vary;
            let corrected = match vary {
                VaryType::Circular => min + (v - min).rem_euclid(width),
                VaryType::Linear => reflect_into(v, min, max),
                VaryType::Fixed | VaryType::Output => v,
            };
            self.set_scalar(&name, corrected);
        }
    }
}

fn reflect_into(mut v: f64, min: f64, max: f64) -> f64 {
    let width = max - min;
    // Fold into a single period of the doubled interval first so that far
    // excursions terminate in one step.
    if !(min..=max).contains(&v) {
        let folded = (v - min).rem_euclid(2.0 * width);
        v = if folded <= width {
            min + folded
        } else {
            min + 2.0 * width - folded
        };
    }
    v
}

/// Canonical intrinsic (mass/spin) parameter subspace.
pub const INTRINSIC_NAMES: &[&str] = &[
    "chirpmass",
    "q",
    "eta",
    "m1",
    "m2",
    "a_spin1",
    "a_spin2",
    "tilt_spin1",
    "tilt_spin2",
    "phi12",
];

/// Canonical extrinsic (sky/distance/time/phase) parameter subspace.
pub const EXTRINSIC_NAMES: &[&str] = &[
    "rightascension",
    "declination",
    "polarisation",
    "distance",
    "logdistance",
    "phase",
    "time",
    "costheta_jn",
];

/// Extrinsic subspace for the requested marginalization setting.
///
/// Time and/or phase drop out of the jump subspace when the likelihood
/// marginalizes them analytically.
pub fn extrinsic_subspace(marg_time: bool, marg_phi: bool) -> Vec<&'static str> {
    EXTRINSIC_NAMES
        .iter()
        .copied()
        .filter(|&name| !(marg_time && name == "time") && !(marg_phi && name == "phase"))
        .collect()
}
