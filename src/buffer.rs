//! Differential-evolution history buffer.
//!
//! A bounded, thinned history of accepted samples. Several kernels read it:
//! the differential-evolution family jumps along difference vectors of two
//! history points, the ensemble stretch/walk moves treat it as the walker
//! ensemble, and the clustered-KDE proposal can be rebuilt from its contents
//! mid-run.

use ndarray::Array2;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::params::ParameterSet;

/// Append-only bounded ring of accepted parameter-set snapshots.
///
/// Samples are recorded every `skip` iterations. When the buffer reaches its
/// capacity it is thinned in place by dropping every other retained point and
/// doubling the stride, so the memory footprint stays bounded while the
/// history keeps covering the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialEvolutionBuffer {
    points: Vec<ParameterSet>,
    capacity: usize,
    skip: usize,
    iterations_seen: u64,
}

impl DifferentialEvolutionBuffer {
    /// Create an empty buffer retaining at most `capacity` snapshots,
    /// recording every `skip`-th accepted sample.
    pub fn new(capacity: usize, skip: usize) -> Self {
        Self {
            points: Vec::new(),
            capacity: capacity.max(2),
            skip: skip.max(1),
            iterations_seen: 0,
        }
    }

    /// Record one iteration's current sample.
    pub fn record(&mut self, sample: &ParameterSet) {
        self.iterations_seen += 1;
        if self.iterations_seen % self.skip as u64 != 0 {
            return;
        }
        if self.points.len() == self.capacity {
            // Thin by a factor of two, keeping even-index entries.
            let mut idx = 0;
            self.points.retain(|_| {
                let keep = idx % 2 == 0;
                idx += 1;
                keep
            });
            self.skip *= 2;
        }
        self.points.push(sample.clone());
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn get(&self, index: usize) -> &ParameterSet {
        &self.points[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSet> {
        self.points.iter()
    }

    /// Two distinct history points, or `None` when fewer than two snapshots
    /// are available and the DE-family kernels must not fire.
    pub fn distinct_pair(&self, rng: &mut dyn RngCore) -> Option<(&ParameterSet, &ParameterSet)> {
        use rand::Rng;
        if self.points.len() <= 1 {
            return None;
        }
        let i = rng.gen_range(0..self.points.len());
        let mut j = rng.gen_range(0..self.points.len());
        while j == i {
            j = rng.gen_range(0..self.points.len());
        }
        Some((&self.points[i], &self.points[j]))
    }

    /// One history point whose sampled values differ from `current`, for the
    /// stretch move. `None` when the buffer is too small or degenerate.
    pub fn other_than<'a>(
        &'a self,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> Option<&'a ParameterSet> {
        use rand::Rng;
        if self.points.len() <= 1 {
            return None;
        }
        // Bounded retry: a buffer full of copies of the current point cannot
        // supply a usable companion.
        for _ in 0..4 * self.points.len() {
            let i = rng.gen_range(0..self.points.len());
            if !current.same_sampled_values(&self.points[i]) {
                return Some(&self.points[i]);
            }
        }
        None
    }

    /// A random subset of `count` distinct history points, for the walk move.
    pub fn choose_subset(&self, count: usize, rng: &mut dyn RngCore) -> Option<Vec<&ParameterSet>> {
        use rand::seq::index::sample;
        if self.points.len() < count || count == 0 {
            return None;
        }
        let picked = sample(&mut *rng, self.points.len(), count);
        Some(picked.iter().map(|i| &self.points[i]).collect())
    }

    /// Dense matrix of the buffer contents over `names`, one row per
    /// snapshot, thinned by `step`.
    pub fn to_array(&self, names: &[String], step: usize) -> Array2<f64> {
        let step = step.max(1);
        let rows: Vec<&ParameterSet> = self.points.iter().step_by(step).collect();
        let mut array = Array2::zeros((rows.len(), names.len()));
        for (r, point) in rows.iter().enumerate() {
            for (c, name) in names.iter().enumerate() {
                array[[r, c]] = point.scalar(name);
            }
        }
        array
    }
}

/// Maximum single-parameter autocorrelation length of `samples` (rows are
/// snapshots, columns parameters).
///
/// Uses the windowed estimate: the shortest lag `s` such that
/// `1 + 2·ACF(1) + … + 2·ACF(M·s) < s` with `M = 5`, capped at half the
/// sample count. Returns infinity when no finite estimate exists.
pub fn max_autocorr_len(samples: &Array2<f64>) -> f64 {
    const M: f64 = 5.0;
    const K: usize = 2;

    let (n_points, n_par) = samples.dim();
    if n_points <= 1 {
        return f64::INFINITY;
    }

    let imax = n_points / K;
    let mut max_acl: f64 = 0.0;

    for par in 0..n_par {
        let column: Vec<f64> = samples.column(par).to_vec();
        let mean = column.iter().sum::<f64>() / n_points as f64;
        let centered: Vec<f64> = column.iter().map(|v| v - mean).collect();
        let variance = centered.iter().map(|v| v * v).sum::<f64>() / n_points as f64;
        if variance == 0.0 {
            continue;
        }

        let mut lag = 1usize;
        let mut cum_acf = 1.0;
        let mut s = 1.0;
        let mut overran = false;
        while cum_acf >= s {
            let mut cov = 0.0;
            for i in 0..(n_points - lag) {
                cov += centered[i] * centered[i + lag];
            }
            cov /= (n_points - lag) as f64;
            cum_acf += 2.0 * cov / variance;
            lag += 1;
            s = lag as f64 / M;
            if lag > imax {
                overran = true;
                break;
            }
        }
        let acl = if overran { f64::INFINITY } else { s };
        if acl > max_acl {
            max_acl = acl;
        }
    }

    if max_acl == 0.0 {
        f64::INFINITY
    } else {
        max_acl
    }
}
