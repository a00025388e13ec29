//! Reversible-jump glitch model: a per-detector sum of Morlet-Gabor
//! wavelets with birth/death moves and a diagonal-Fisher in-model jump.
//!
//! The model state lives in the parameter set: a per-detector component
//! count (`glitch_size`), five component-parameter matrices (`morlet_t0`,
//! `morlet_f0`, `morlet_q`, `morlet_amp`, `morlet_phi`) and the cached
//! frequency-domain sum of all active wavelets (`morlet_fd`). The cached sum
//! is maintained through incremental add/remove deltas; it is recomputed
//! from scratch only at initialization.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::context::ProposalContext;
use crate::cycle::{JumpProposal, Proposed};
use crate::errors::{ProposalError, ProposalResult};
use crate::params::{ParamValue, ParameterSet, VaryType};
use crate::prior::{draw_flat, PriorBounds};

const PI: f64 = std::f64::consts::PI;
const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

/// `1/√(2π)`: the factor converting a wavelet amplitude into its
/// matched-filter SNR, `SNR = A·√(Q/(√(2π)·f₀))`.
const PI_TERM: f64 = 0.398_942_280_401_432_7;

/// Peak of the Malmquist-like SNR prior.
const SNR_PEAK: f64 = 5.0;

struct InverseFft(Arc<dyn Fft<f64>>);

impl fmt::Debug for InverseFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InverseFft(len = {})", self.0.len())
    }
}

/// Per-detector data context for the glitch proposals: band limits, noise
/// spectra, frequency-domain data and the inverse-FFT plan used by the
/// cross-correlation maximization.
#[derive(Debug)]
pub struct GlitchData {
    n_time: usize,
    delta_t: f64,
    flows: Vec<f64>,
    fhighs: Vec<f64>,
    asds: Vec<Vec<f64>>,
    psds: Vec<Vec<f64>>,
    fd_data: Vec<Vec<Complex<f64>>>,
    /// Normalization of the stored wavelet amplitudes relative to physical
    /// strain.
    pub amp_norm: f64,
    /// Inclusive lower bound on the per-detector component count.
    pub dim_min: usize,
    /// Exclusive upper bound on the per-detector component count.
    pub dim_max: usize,
    inverse_fft: InverseFft,
}

impl GlitchData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        delta_t: f64,
        flows: Vec<f64>,
        fhighs: Vec<f64>,
        asds: Vec<Vec<f64>>,
        psds: Vec<Vec<f64>>,
        fd_data: Vec<Vec<Complex<f64>>>,
        amp_norm: f64,
        dim_min: usize,
        dim_max: usize,
    ) -> ProposalResult<Self> {
        let n_ifo = fd_data.len();
        if n_ifo == 0 {
            return Err(ProposalError::Setup(
                "glitch model needs at least one detector".to_string(),
            ));
        }
        let n_freq = fd_data[0].len();
        if flows.len() != n_ifo
            || fhighs.len() != n_ifo
            || asds.len() != n_ifo
            || psds.len() != n_ifo
            || asds.iter().any(|a| a.len() != n_freq)
            || psds.iter().any(|p| p.len() != n_freq)
            || fd_data.iter().any(|d| d.len() != n_freq)
        {
            return Err(ProposalError::Setup(
                "glitch data arrays disagree on detector count or length".to_string(),
            ));
        }
        if dim_max <= dim_min {
            return Err(ProposalError::Setup(format!(
                "glitch dimension bounds [{}, {}) are empty",
                dim_min, dim_max
            )));
        }

        let n_time = 2 * n_freq;
        let mut planner = FftPlanner::new();
        let plan = planner.plan_fft_inverse(n_time);

        Ok(Self {
            n_time,
            delta_t,
            flows,
            fhighs,
            asds,
            psds,
            fd_data,
            amp_norm,
            dim_min,
            dim_max,
            inverse_fft: InverseFft(plan),
        })
    }

    pub fn n_ifo(&self) -> usize {
        self.fd_data.len()
    }

    pub fn n_freq(&self) -> usize {
        self.n_time / 2
    }

    pub fn observation_time(&self) -> f64 {
        self.n_time as f64 * self.delta_t
    }

    fn band(&self, ifo: usize) -> (usize, usize) {
        let delta_f = 1.0 / self.observation_time();
        let lower = (self.flows[ifo] / delta_f).ceil() as usize;
        let upper = ((self.fhighs[ifo] / delta_f).floor() as usize).min(self.n_freq() - 1);
        (lower, upper)
    }
}

/// Register the glitch-model blocks in a parameter set: zero components per
/// detector and empty component matrices sized for `data.dim_max`.
pub fn setup_glitch_params(params: &mut ParameterSet, data: &GlitchData) {
    use ndarray::Array2;

    let n_ifo = data.n_ifo();
    let n_max = data.dim_max;
    params.insert(
        "glitch_size",
        ParamValue::Count(vec![0; n_ifo]),
        VaryType::Linear,
    );
    for name in [
        "morlet_t0",
        "morlet_f0",
        "morlet_q",
        "morlet_amp",
        "morlet_phi",
    ] {
        params.insert(
            name,
            ParamValue::Matrix(Array2::zeros((n_ifo, n_max))),
            VaryType::Linear,
        );
    }
    params.insert(
        "morlet_fd",
        ParamValue::Matrix(Array2::zeros((n_ifo, 2 * data.n_freq()))),
        VaryType::Output,
    );
}

fn has_glitch_blocks(params: &ParameterSet) -> bool {
    params.contains("glitch_size") && params.contains("morlet_fd")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaveletOp {
    Add,
    Remove,
}

/// Apply one wavelet's frequency-domain contribution to a raw interleaved
/// (re, im) row.
#[allow(clippy::too_many_arguments)]
fn accumulate_wavelet(
    row: &mut [f64],
    data: &GlitchData,
    ifo: usize,
    t0: f64,
    f0: f64,
    q: f64,
    amp: f64,
    phi0: f64,
    sign: f64,
) {
    let t_obs = data.observation_time();
    let delta_f = 1.0 / t_obs;
    let (lower, upper) = data.band(ifo);

    // Truncate the wavelet to the band where its Gaussian envelope is
    // non-negligible.
    let tau = q / (TWO_PI * f0);
    let glitch_lower = (((f0 - 1.0 / tau) / delta_f).floor()).max(0.0) as usize;
    let glitch_upper = (((f0 + 1.0 / tau) / delta_f).floor()).max(0.0) as usize;

    let asd = &data.asds[ifo];
    for i in glitch_lower..glitch_upper {
        if i < lower || i > upper {
            continue;
        }
        let freq = i as f64 * delta_f;
        let amp_arg = (freq - f0) * PI * tau;
        let phi_arg = PI * i as f64 + phi0 - TWO_PI * freq * (t0 - t_obs / 2.0);
        let a_i = amp * tau * 0.5 * PI.sqrt() * (-amp_arg * amp_arg).exp() * asd[i]
            / t_obs.sqrt();
        row[2 * i] += sign * a_i * phi_arg.cos();
        row[2 * i + 1] += sign * a_i * phi_arg.sin();
    }
}

/// Incrementally add or remove component `k` of detector `ifo` in the
/// cached frequency-domain sum.
fn update_wavelet_sum(
    params: &mut ParameterSet,
    data: &GlitchData,
    ifo: usize,
    k: usize,
    op: WaveletOp,
) {
    let t0 = params.matrix("morlet_t0")[[ifo, k]];
    let f0 = params.matrix("morlet_f0")[[ifo, k]];
    let q = params.matrix("morlet_q")[[ifo, k]];
    let amp = params.matrix("morlet_amp")[[ifo, k]];
    let phi0 = params.matrix("morlet_phi")[[ifo, k]];

    let sign = match op {
        WaveletOp::Add => 1.0,
        WaveletOp::Remove => -1.0,
    };
    let sum = params.matrix_mut("morlet_fd");
    let mut row = sum.row_mut(ifo);
    accumulate_wavelet(
        row.as_slice_mut().expect("contiguous row"),
        data,
        ifo,
        t0,
        f0,
        q,
        amp,
        phi0,
        sign,
    );
}

/// Recompute the cached sum from the literal component list. Used at
/// initialization only; all in-run updates are incremental.
pub fn rebuild_wavelet_sum(params: &mut ParameterSet, data: &GlitchData) {
    params.matrix_mut("morlet_fd").fill(0.0);
    for ifo in 0..data.n_ifo() {
        let count = params.counts("glitch_size")[ifo];
        for k in 0..count {
            update_wavelet_sum(params, data, ifo, k, WaveletOp::Add);
        }
    }
}

/// Log-density of the Malmquist-like amplitude prior, expressed in the
/// stored (normalized) amplitude.
pub fn log_glitch_amplitude_density(amp: f64, q: f64, f0: f64) -> f64 {
    let dsnr_damp = (PI_TERM * q / f0).sqrt();
    let snr = amp * dsnr_damp;
    if snr <= 0.0 {
        return f64::NEG_INFINITY;
    }
    snr.ln() - 2.0 * SNR_PEAK.ln() - snr / SNR_PEAK + dsnr_damp.ln()
}

/// Draw a wavelet amplitude whose matched-filter SNR follows
/// `p(ρ) ∝ ρ/a²·exp(−ρ/a)` with `a = 5`, by rejection sampling under a flat
/// envelope out to `20a`.
pub fn glitch_amplitude_draw(q: f64, f0: f64, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;

    let max = 1.0 / (SNR_PEAK * std::f64::consts::E);
    let snr = loop {
        let snr = 20.0 * SNR_PEAK * rng.gen::<f64>();
        let density = snr / (SNR_PEAK * SNR_PEAK) * (-snr / SNR_PEAK).exp() / max;
        if rng.gen::<f64>() <= density {
            break snr;
        }
    };
    snr / (PI_TERM * q / f0).sqrt()
}

/// Closed-form diagonal Fisher-matrix step sizes for one wavelet, ordered
/// `[t0, f0, Q, amp, phi0]`. The SNR is floored at 5 to cap the jump size.
pub fn morlet_fisher_sigmas(f0: f64, q: f64, amp: f64) -> [f64; 5] {
    let sqrt3 = 3.0f64.sqrt();
    let mut snr = amp * (q / (2.0 * TWO_PI.sqrt() * f0)).sqrt();
    if snr < 5.0 {
        snr = 5.0;
    }
    [
        1.0 / (TWO_PI * f0 * snr),
        2.0 * f0 / (q * snr),
        2.0 * q / (sqrt3 * snr),
        amp / snr,
        1.0 / snr,
    ]
}

/// Whitened cross-correlation of two frequency-domain series as a function
/// of time lag, in phase and quadrature.
fn phase_blind_time_shift(
    data: &GlitchData,
    ifo: usize,
    series_a: &[Complex<f64>],
    series_b: &[Complex<f64>],
) -> (Vec<f64>, Vec<f64>) {
    let n = data.n_time;
    let n_freq = data.n_freq();
    let (lower, upper) = data.band(ifo);
    let psd = &data.psds[ifo];

    let mut corr_fd = vec![Complex::new(0.0, 0.0); n];
    let mut corrf_fd = vec![Complex::new(0.0, 0.0); n];
    for i in (lower + 1)..upper.min(n_freq - 1) {
        let z = series_a[i] * series_b[i].conj() / psd[i];
        corr_fd[i] = z;
        corrf_fd[i] = Complex::new(-z.im, z.re);
    }
    // Hermitian extension so the inverse transforms are real.
    for i in 1..n_freq {
        corr_fd[n - i] = corr_fd[i].conj();
        corrf_fd[n - i] = corrf_fd[i].conj();
    }

    data.inverse_fft.0.process(&mut corr_fd);
    data.inverse_fft.0.process(&mut corrf_fd);

    (
        corr_fd.iter().map(|z| z.re).collect(),
        corrf_fd.iter().map(|z| z.re).collect(),
    )
}

/// Refine a freshly drawn wavelet by cross-correlating it against the
/// residual and shifting its centroid time and phase to the lag of maximum
/// correlation. The amplitude is left unscaled.
fn maximize_glitch_parameters(params: &mut ParameterSet, data: &GlitchData, ifo: usize, k: usize) {
    let n = data.n_time;
    let n_freq = data.n_freq();
    let t_obs = data.observation_time();
    let scale = (2.0 * data.delta_t / n as f64).sqrt();
    let (lower, upper) = data.band(ifo);

    // Render the new wavelet alone.
    let mut h_row = vec![0.0; 2 * n_freq];
    {
        let t0 = params.matrix("morlet_t0")[[ifo, k]];
        let f0 = params.matrix("morlet_f0")[[ifo, k]];
        let q = params.matrix("morlet_q")[[ifo, k]];
        let amp = params.matrix("morlet_amp")[[ifo, k]];
        let phi0 = params.matrix("morlet_phi")[[ifo, k]];
        accumulate_wavelet(&mut h_row, data, ifo, t0, f0, q, amp, phi0, 1.0);
    }

    let have_glitch = params.counts("glitch_size")[ifo] > 0;
    let sum = params.matrix("morlet_fd");
    let mut template = vec![Complex::new(0.0, 0.0); n_freq];
    let mut residual = vec![Complex::new(0.0, 0.0); n_freq];
    for i in (lower + 1)..upper.min(n_freq - 1) {
        template[i] = Complex::new(scale * h_row[2 * i], scale * h_row[2 * i + 1]);
        let (g_re, g_im) = if have_glitch {
            (sum[[ifo, 2 * i]], sum[[ifo, 2 * i + 1]])
        } else {
            (0.0, 0.0)
        };
        let s = data.fd_data[ifo][i];
        residual[i] = Complex::new(
            scale * (s.re / data.delta_t - g_re),
            scale * (s.im / data.delta_t - g_im),
        );
    }

    let (in_phase, quadrature) = phase_blind_time_shift(data, ifo, &residual, &template);

    let mut i_max = 0;
    let mut max = f64::NEG_INFINITY;
    for i in 0..n {
        let corr = (in_phase[i] * in_phase[i] + quadrature[i] * quadrature[i]).sqrt();
        if corr > max {
            max = corr;
            i_max = i;
        }
    }

    let d_phase = quadrature[i_max].atan2(in_phase[i_max]);
    let d_time = if i_max < n / 2 - 1 {
        i_max as f64 / n as f64 * t_obs
    } else {
        (i_max as f64 - n as f64) / n as f64 * t_obs
    };

    let t0 = (params.matrix("morlet_t0")[[ifo, k]] + d_time).rem_euclid(t_obs);
    let phi0 = (params.matrix("morlet_phi")[[ifo, k]] - d_phase).rem_euclid(TWO_PI);
    params.matrix_mut("morlet_t0")[[ifo, k]] = t0;
    params.matrix_mut("morlet_phi")[[ifo, k]] = phi0;
}

/// Joint prior log-density of one wavelet's own parameters: flat in t0, f0,
/// Q and phase over their registered ranges, Malmquist in amplitude.
fn evaluate_morlet_prior(
    priors: &PriorBounds,
    params: &ParameterSet,
    data: &GlitchData,
    ifo: usize,
    k: usize,
) -> f64 {
    let mut prior = 0.0;
    for name in ["morlet_f0", "morlet_q", "morlet_t0", "morlet_phi"] {
        let (min, max) = priors.min_max(name);
        prior -= (max - min).ln();
    }
    let amp = params.matrix("morlet_amp")[[ifo, k]];
    let q = params.matrix("morlet_q")[[ifo, k]];
    let f0 = params.matrix("morlet_f0")[[ifo, k]];
    prior += log_glitch_amplitude_density(amp * data.amp_norm, q, f0);
    prior
}

/// In-model jump: perturb one existing wavelet's five parameters by
/// independent Gaussians scaled by the diagonal Fisher estimate.
///
/// The ratio is the two-sided anisotropic Gaussian density ratio, which is
/// not symmetric since the Fisher sigmas depend on position.
pub struct GlitchMorletProposal;

/// Per-dimension shrink of the Fisher step, `1/√6`.
const FISHER_JUMP_SCALE: f64 = 0.408_248_2;

impl GlitchMorletProposal {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GlitchMorletProposal {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for GlitchMorletProposal {
    fn name(&self) -> &str {
        "glitchMorletJump"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        let Some(data) = ctx.glitch.as_ref() else {
            return Ok(None);
        };
        if !has_glitch_blocks(current) {
            return Ok(None);
        }

        let ifo = rng.gen_range(0..data.n_ifo());
        let n_active = current.counts("glitch_size")[ifo];
        if n_active == 0 {
            return Ok(None);
        }
        let k = rng.gen_range(0..n_active);

        let amp_scale = 0.25 * data.amp_norm;
        let x = [
            current.matrix("morlet_t0")[[ifo, k]],
            current.matrix("morlet_f0")[[ifo, k]],
            current.matrix("morlet_q")[[ifo, k]],
            current.matrix("morlet_amp")[[ifo, k]] * amp_scale,
            current.matrix("morlet_phi")[[ifo, k]],
        ];
        let sigmas_x = morlet_fisher_sigmas(x[1], x[2], x[3]);

        let mut y = [0.0; 5];
        for i in 0..5 {
            let z: f64 = StandardNormal.sample(rng);
            y[i] = x[i] + z * sigmas_x[i] * FISHER_JUMP_SCALE;
        }

        // A wavelet with non-positive frequency, quality or amplitude has no
        // valid Fisher estimate; propose a certain rejection instead.
        if y[1] <= 0.0 || y[2] <= 0.0 || y[3] <= 0.0 {
            return Ok(Some(Proposed {
                params: current.clone(),
                log_ratio: f64::NEG_INFINITY,
            }));
        }

        let mut proposed = current.clone();
        update_wavelet_sum(&mut proposed, data, ifo, k, WaveletOp::Remove);
        proposed.matrix_mut("morlet_t0")[[ifo, k]] = y[0];
        proposed.matrix_mut("morlet_f0")[[ifo, k]] = y[1];
        proposed.matrix_mut("morlet_q")[[ifo, k]] = y[2];
        proposed.matrix_mut("morlet_amp")[[ifo, k]] = y[3] / amp_scale;
        proposed.matrix_mut("morlet_phi")[[ifo, k]] = y[4];
        update_wavelet_sum(&mut proposed, data, ifo, k, WaveletOp::Add);

        let sigmas_y = morlet_fisher_sigmas(y[1], y[2], y[3]);

        let mut log_q_forward = 0.0;
        let mut log_q_reverse = 0.0;
        for i in 0..5 {
            let sx = FISHER_JUMP_SCALE * sigmas_x[i];
            let sy = FISHER_JUMP_SCALE * sigmas_y[i];
            let dx = (x[i] - y[i]) / sx;
            let dy = (x[i] - y[i]) / sy;
            log_q_forward += -dx * dx / 2.0 - sx.ln();
            log_q_reverse += -dy * dy / 2.0 - sy.ln();
        }

        Ok(Some(Proposed {
            params: proposed,
            log_ratio: log_q_reverse - log_q_forward,
        }))
    }
}

/// Trans-dimensional birth/death move on the wavelet count.
///
/// Birth draws a component from its priors (amplitude from the Malmquist
/// sampler) and, while adaptation is active, refines centroid time and phase
/// with the matched-filter maximization; that refinement concentrates the
/// proposal, which the acceptance ratio flags with a fixed +10 log bonus for
/// the lost proposal entropy. Death removes a uniformly chosen component and
/// compacts the arrays. The uniform discrete-choice factors (1/(n+1) for the
/// death pick versus append-at-end placement for birth) cancel exactly
/// because the components are exchangeable, so only the component's own
/// prior density enters the ratio.
pub struct GlitchMorletReverseJump;

/// Log-entropy bonus applied when the birth maximization is active.
const MAXIMIZATION_LOG_BONUS: f64 = 10.0;

impl GlitchMorletReverseJump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GlitchMorletReverseJump {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpProposal for GlitchMorletReverseJump {
    fn name(&self) -> &str {
        "glitchMorletReverseJump"
    }

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>> {
        use rand::Rng;

        let Some(data) = ctx.glitch.as_ref() else {
            return Ok(None);
        };
        if !has_glitch_blocks(current) {
            return Ok(None);
        }
        let adapting = ctx.adaptive.adapting();

        let ifo = rng.gen_range(0..data.n_ifo());
        let n_x = current.counts("glitch_size")[ifo];

        let birth = rng.gen::<f64>() < 0.5;
        let n_y = if birth {
            n_x + 1
        } else if n_x == 0 {
            return Ok(None);
        } else {
            n_x - 1
        };
        if n_y < data.dim_min || n_y >= data.dim_max {
            return Ok(None);
        }

        let mut proposed = current.clone();
        let log_ratio;

        if birth {
            let t0 = draw_flat(&ctx.priors, "morlet_t0", rng);
            let f0 = draw_flat(&ctx.priors, "morlet_f0", rng);
            let q = draw_flat(&ctx.priors, "morlet_q", rng);
            let amp = glitch_amplitude_draw(q, f0, rng) / data.amp_norm;
            let phi0 = draw_flat(&ctx.priors, "morlet_phi", rng);

            proposed.matrix_mut("morlet_t0")[[ifo, n_x]] = t0;
            proposed.matrix_mut("morlet_f0")[[ifo, n_x]] = f0;
            proposed.matrix_mut("morlet_q")[[ifo, n_x]] = q;
            proposed.matrix_mut("morlet_amp")[[ifo, n_x]] = amp;
            proposed.matrix_mut("morlet_phi")[[ifo, n_x]] = phi0;

            if adapting {
                maximize_glitch_parameters(&mut proposed, data, ifo, n_x);
            }
            update_wavelet_sum(&mut proposed, data, ifo, n_x, WaveletOp::Add);

            let mut log_q_birth = evaluate_morlet_prior(&ctx.priors, &proposed, data, ifo, n_x);
            if adapting {
                log_q_birth += MAXIMIZATION_LOG_BONUS;
            }
            log_ratio = -log_q_birth;
        } else {
            let k = rng.gen_range(0..n_x);
            update_wavelet_sum(&mut proposed, data, ifo, k, WaveletOp::Remove);

            let mut log_q_death = evaluate_morlet_prior(&ctx.priors, &proposed, data, ifo, k);
            if adapting {
                log_q_death += MAXIMIZATION_LOG_BONUS;
            }

            // Compact the component arrays over the removed slot.
            for name in [
                "morlet_t0",
                "morlet_f0",
                "morlet_q",
                "morlet_amp",
                "morlet_phi",
            ] {
                let matrix = proposed.matrix_mut(name);
                for i in k..n_y {
                    matrix[[ifo, i]] = matrix[[ifo, i + 1]];
                }
            }
            log_ratio = log_q_death;
        }

        proposed.counts_mut("glitch_size")[ifo] = n_y;

        Ok(Some(Proposed {
            params: proposed,
            log_ratio,
        }))
    }
}
