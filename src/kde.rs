//! Clustered kernel-density-estimate proposals.
//!
//! A k-means-like partition of a posterior sample set, with a Gaussian
//! density per cluster, yields an independence sampler over a fixed
//! parameter subspace. Estimates are built offline from sample files or
//! mid-run from the differential-evolution buffer, held in an ordered
//! name-keyed set with relative weights, and hot-swappable by name without
//! disturbing the set order.

use std::io::BufRead;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::buffer::{max_autocorr_len, DifferentialEvolutionBuffer};
use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::{ProposalError, ProposalResult};
use crate::params::{ParameterSet, VaryType};
use crate::prior::PriorBounds;

const LN_TWO_PI: f64 = 1.837_877_066_409_345_5;

/// Largest cluster count attempted by the BIC search.
const MAX_CLUSTERS: usize = 8;

/// One cluster: sample-fraction weight, mean and Cholesky factor of the
/// covariance, all in whitened coordinates.
#[derive(Debug, Clone)]
struct ClusterComponent {
    weight: f64,
    mean: DVector<f64>,
    chol_l: DMatrix<f64>,
    log_det_l: f64,
}

impl ClusterComponent {
    fn log_density(&self, point: &DVector<f64>) -> f64 {
        let d = self.mean.len();
        let centered = point - &self.mean;
        let solved = self
            .chol_l
            .solve_lower_triangular(&centered)
            .expect("cholesky factor is nonsingular");
        self.weight.ln()
            - 0.5 * d as f64 * LN_TWO_PI
            - self.log_det_l
            - 0.5 * solved.norm_squared()
    }
}

/// Optional per-dimension boundary behaviour applied to drawn samples.
#[derive(Debug, Clone, Copy)]
struct DimBound {
    min: f64,
    max: f64,
    circular: bool,
}

/// Cluster-weighted Gaussian density estimate over a named parameter
/// subspace.
#[derive(Debug, Clone)]
pub struct ClusteredKde {
    names: Vec<String>,
    whiten_mean: Vec<f64>,
    whiten_scale: Vec<f64>,
    components: Vec<ClusterComponent>,
    bounds: Vec<Option<DimBound>>,
}

impl ClusteredKde {
    /// Estimate the density of `samples` (rows are draws, columns follow
    /// `names`) with a BIC-optimized k-means partition and one Gaussian per
    /// cluster.
    ///
    /// Fails when there are too few samples to estimate a covariance or no
    /// clustering attempt produces valid factors. Construction problems are
    /// fatal at setup time, never deferred to the sampling loop.
    pub fn from_samples(
        samples: ArrayView2<'_, f64>,
        names: &[String],
        ntrials: usize,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Self> {
        let (n, d) = samples.dim();
        if d == 0 || names.len() != d {
            return Err(ProposalError::Setup(
                "KDE subspace is empty or misnamed".to_string(),
            ));
        }
        if n < d + 2 {
            return Err(ProposalError::ClusteringFailed(ntrials));
        }

        // Diagonal whitening keeps cluster distances comparable across
        // dimensions of very different scales.
        let mut whiten_mean = vec![0.0; d];
        let mut whiten_scale = vec![1.0; d];
        for j in 0..d {
            let column = samples.column(j);
            let mean = column.sum() / n as f64;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            whiten_mean[j] = mean;
            whiten_scale[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }
        let mut whitened = Array2::zeros((n, d));
        for i in 0..n {
            for j in 0..d {
                whitened[[i, j]] = (samples[[i, j]] - whiten_mean[j]) / whiten_scale[j];
            }
        }

        let k_max = MAX_CLUSTERS.min(n / (d + 2)).max(1);
        let mut best: Option<(f64, Vec<ClusterComponent>)> = None;
        for k in 1..=k_max {
            let mut best_at_k: Option<(f64, Vec<ClusterComponent>)> = None;
            for _ in 0..ntrials.max(1) {
                let Some(assignments) = lloyd(&whitened, k, rng) else {
                    continue;
                };
                let Some(components) = build_components(&whitened, &assignments, k) else {
                    continue;
                };
                let log_l: f64 = (0..n)
                    .map(|i| {
                        let row = DVector::from_iterator(d, whitened.row(i).iter().copied());
                        mixture_log_density(&components, &row)
                    })
                    .sum();
                let n_free = (k * (d + d * (d + 1) / 2) + k - 1) as f64;
                let bic = 2.0 * log_l - n_free * (n as f64).ln();
                if best_at_k.as_ref().map_or(true, |(b, _)| bic > *b) {
                    best_at_k = Some((bic, components));
                }
            }
            let Some((bic, components)) = best_at_k else {
                continue;
            };
            match &best {
                Some((best_bic, _)) if bic <= *best_bic => break,
                _ => best = Some((bic, components)),
            }
        }

        let Some((_, components)) = best else {
            return Err(ProposalError::ClusteringFailed(ntrials));
        };

        Ok(Self {
            names: names.to_vec(),
            whiten_mean,
            whiten_scale,
            components,
            bounds: vec![None; d],
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_clusters(&self) -> usize {
        self.components.len()
    }

    /// Apply cyclic/reflective boundary behaviour to future draws, for every
    /// subspace dimension with registered prior bounds.
    pub fn impose_bounds(&mut self, priors: &PriorBounds, params: &ParameterSet) {
        for (j, name) in self.names.iter().enumerate() {
            if !priors.has_min_max(name) {
                continue;
            }
            let (min, max) = priors.min_max(name);
            let circular = matches!(
                params.get(name),
                Some(p) if p.vary == VaryType::Circular
            );
            self.bounds[j] = Some(DimBound { min, max, circular });
        }
    }

    fn whiten(&self, point: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            point.len(),
            point
                .iter()
                .zip(self.whiten_mean.iter().zip(&self.whiten_scale))
                .map(|(v, (m, s))| (v - m) / s),
        )
    }

    /// Log-density of `point` (unwhitened coordinates, ordered as
    /// [`ClusteredKde::names`]).
    pub fn log_pdf(&self, point: &[f64]) -> f64 {
        let whitened = self.whiten(point);
        let jacobian: f64 = self.whiten_scale.iter().map(|s| s.ln()).sum();
        mixture_log_density(&self.components, &whitened) - jacobian
    }

    /// Draw one sample, in unwhitened coordinates.
    pub fn draw(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        use rand::Rng;

        let pick = rng.gen::<f64>();
        let mut cumulative = 0.0;
        let mut component = &self.components[0];
        for candidate in &self.components {
            cumulative += candidate.weight;
            if pick < cumulative {
                component = candidate;
                break;
            }
        }

        let d = component.mean.len();
        let z = DVector::from_iterator(d, (0..d).map(|_| {
            let v: f64 = StandardNormal.sample(rng);
            v
        }));
        let whitened = &component.mean + &component.chol_l * z;

        let mut value: Vec<f64> = whitened
            .iter()
            .zip(self.whiten_mean.iter().zip(&self.whiten_scale))
            .map(|(y, (m, s))| y * s + m)
            .collect();

        for (v, bound) in value.iter_mut().zip(&self.bounds) {
            if let Some(b) = bound {
                let width = b.max - b.min;
                if b.circular {
                    *v = b.min + (*v - b.min).rem_euclid(width);
                } else if !(b.min..=b.max).contains(v) {
                    let folded = (*v - b.min).rem_euclid(2.0 * width);
                    *v = if folded <= width {
                        b.min + folded
                    } else {
                        b.min + 2.0 * width - folded
                    };
                }
            }
        }
        value
    }
}

fn mixture_log_density(components: &[ClusterComponent], point: &DVector<f64>) -> f64 {
    let terms: Vec<f64> = components.iter().map(|c| c.log_density(point)).collect();
    let max = terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}

/// Standard Lloyd iteration; `None` when a stable partition with `k`
/// non-empty clusters cannot be found.
fn lloyd(data: &Array2<f64>, k: usize, rng: &mut dyn RngCore) -> Option<Vec<usize>> {
    use rand::seq::index::sample;

    let (n, d) = data.dim();
    if k > n {
        return None;
    }

    let seeds = sample(&mut *rng, n, k);
    let mut centroids = Array2::zeros((k, d));
    for (c, i) in seeds.iter().enumerate() {
        centroids.row_mut(c).assign(&data.row(i));
    }

    let mut assignments = vec![0usize; n];
    for _ in 0..64 {
        let mut changed = false;
        for i in 0..n {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for c in 0..k {
                let dist: f64 = data
                    .row(i)
                    .iter()
                    .zip(centroids.row(c).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let mut counts = vec![0usize; k];
        centroids.fill(0.0);
        for i in 0..n {
            counts[assignments[i]] += 1;
            for j in 0..d {
                centroids[[assignments[i], j]] += data[[i, j]];
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Reseed an empty cluster on a random point.
                use rand::Rng;
                let i = rng.gen_range(0..n);
                centroids.row_mut(c).assign(&data.row(i));
                changed = true;
            } else {
                for j in 0..d {
                    centroids[[c, j]] /= counts[c] as f64;
                }
            }
        }

        if !changed {
            return Some(assignments);
        }
    }
    Some(assignments)
}

fn build_components(
    data: &Array2<f64>,
    assignments: &[usize],
    k: usize,
) -> Option<Vec<ClusterComponent>> {
    let (n, d) = data.dim();
    let mut components = Vec::with_capacity(k);

    for c in 0..k {
        let members: Vec<usize> = (0..n).filter(|&i| assignments[i] == c).collect();
        if members.len() < d + 2 {
            return None;
        }
        let m = members.len();

        let mut mean = DVector::zeros(d);
        for &i in &members {
            for j in 0..d {
                mean[j] += data[[i, j]];
            }
        }
        mean /= m as f64;

        let mut cov = DMatrix::zeros(d, d);
        for &i in &members {
            let centered =
                DVector::from_iterator(d, data.row(i).iter().copied()) - &mean;
            cov += &centered * centered.transpose();
        }
        cov /= (m - 1) as f64;

        // Ridge the covariance until the factorization succeeds.
        let mut jitter = 1e-10;
        let chol_l = loop {
            let mut ridged = cov.clone();
            for j in 0..d {
                ridged[(j, j)] += jitter;
            }
            if let Some(chol) = ridged.cholesky() {
                break chol.l();
            }
            jitter *= 100.0;
            if jitter > 1.0 {
                return None;
            }
        };
        let log_det_l = (0..d).map(|j| chol_l[(j, j)].ln()).sum();

        components.push(ClusterComponent {
            weight: m as f64 / n as f64,
            mean,
            chol_l,
            log_det_l,
        });
    }
    Some(components)
}

/// A KDE estimate with its relative selection weight.
#[derive(Debug, Clone)]
pub struct WeightedKde {
    pub kde: ClusteredKde,
    pub weight: f64,
}

/// Ordered, name-keyed set of KDE proposals.
#[derive(Debug, Clone, Default)]
pub struct ClusteredKdeSet {
    entries: IndexMap<String, WeightedKde>,
}

impl ClusteredKdeSet {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert or replace by name. Replacing keeps the entry's position, so
    /// a mid-run rebuild does not disturb the set order.
    pub fn upsert(&mut self, name: impl Into<String>, kde: ClusteredKde, weight: f64) {
        self.entries.insert(name.into(), WeightedKde { kde, weight });
    }

    pub fn get(&self, name: &str) -> Option<&WeightedKde> {
        self.entries.get(name)
    }

    pub fn order(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Weight-proportional selection of one estimate.
    pub fn choose(&self, rng: &mut dyn RngCore) -> Option<&WeightedKde> {
        use rand::Rng;
        if self.entries.is_empty() {
            return None;
        }
        let total: f64 = self.entries.values().map(|e| e.weight).sum();
        let pick = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        for entry in self.entries.values() {
            cumulative += entry.weight;
            if pick < cumulative {
                return Some(entry);
            }
        }
        self.entries.values().last()
    }
}

/// Independence sampler drawing from one weight-selected clustered KDE.
///
/// The ratio is `log p(current) − log p(proposed)` under the selected
/// estimate. Produces no proposal while the KDE set is empty.
pub struct ClusteredKdeProposal;

impl ClusteredKdeProposal {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClusteredKdeProposal {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for ClusteredKdeProposal {
    fn name(&self) -> &str {
        "ClusteredKDEProposal"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        let Some(entry) = ctx.kde.choose(rng) else {
            return Ok(None);
        };
        let kde = &entry.kde;

        let mut current_point = Vec::with_capacity(kde.names().len());
        for name in kde.names() {
            match current.try_scalar(name) {
                Some(v) => current_point.push(v),
                None => return Ok(None),
            }
        }

        let drawn = kde.draw(rng);
        let mut proposed = current.clone();
        for (name, value) in kde.names().iter().zip(&drawn) {
            proposed.set_scalar(name, *value);
        }

        let log_ratio = kde.log_pdf(&current_point) - kde.log_pdf(&drawn);

        Ok(Some(Proposed {
            params: proposed,
            log_ratio,
        }))
    }
}

/// Build a KDE estimate from a delimited ASCII sample file.
///
/// The first line is a whitespace-separated header of parameter names; only
/// columns naming non-fixed scalars of `current` are clustered. `burn_in`
/// leading sample rows are discarded. Malformed input is fatal at setup
/// time.
pub fn kde_from_ascii<R: BufRead>(
    input: R,
    burn_in: usize,
    current: &ParameterSet,
    ntrials: usize,
    rng: &mut dyn RngCore,
) -> ProposalResult<ClusteredKde> {
    let mut lines = input.lines();
    let header = lines
        .next()
        .ok_or_else(|| ProposalError::MalformedSampleFile("empty file".to_string()))?
        .map_err(|e| ProposalError::MalformedSampleFile(e.to_string()))?;
    let columns: Vec<String> = header.split_whitespace().map(|s| s.to_string()).collect();

    let valid: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, name)| current.is_non_fixed(name))
        .map(|(i, _)| i)
        .collect();
    if valid.is_empty() {
        return Err(ProposalError::MalformedSampleFile(
            "no sampled parameters among file columns".to_string(),
        ));
    }
    let names: Vec<String> = valid.iter().map(|&i| columns[i].clone()).collect();

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let line = line.map_err(|e| ProposalError::MalformedSampleFile(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != columns.len() {
            return Err(ProposalError::MalformedSampleFile(format!(
                "line {}: expected {} columns, found {}",
                line_no + 2,
                columns.len(),
                fields.len()
            )));
        }
        let mut row = Vec::with_capacity(valid.len());
        for &i in &valid {
            let value: f64 = fields[i].parse().map_err(|_| {
                ProposalError::MalformedSampleFile(format!(
                    "line {}: cannot parse {:?}",
                    line_no + 2,
                    fields[i]
                ))
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    let kept = rows.len().saturating_sub(burn_in);
    let mut samples = Array2::zeros((kept, valid.len()));
    for (r, row) in rows.into_iter().skip(burn_in).enumerate() {
        for (c, value) in row.into_iter().enumerate() {
            samples[[r, c]] = value;
        }
    }

    ClusteredKde::from_samples(samples.view(), &names, ntrials, rng)
}

/// Build a KDE estimate from the differential-evolution buffer, thinned to
/// approximately independent samples by the autocorrelation-length
/// estimate.
pub fn kde_from_de_buffer(
    buffer: &DifferentialEvolutionBuffer,
    current: &ParameterSet,
    ntrials: usize,
    rng: &mut dyn RngCore,
) -> ProposalResult<ClusteredKde> {
    let names: Vec<String> = current
        .non_fixed_scalar_names()
        .map(|s| s.to_string())
        .collect();
    let full = buffer.to_array(&names, 1);
    let acl = max_autocorr_len(&full);
    let step = if acl.is_finite() && acl > 1.0 {
        acl.floor() as usize
    } else {
        1
    };
    let thinned = buffer.to_array(&names, step);
    ClusteredKde::from_samples(thinned.view(), &names, ntrials, rng)
}
