//! The proposal cycle: a weighted, shuffleable schedule of jump kernels.
//!
//! The outer sampler calls [`ProposalCycle::next`] once per iteration. The
//! cycle reads the kernel index at the cursor, invokes the kernel, retries
//! with the next cursor position whenever a kernel reports that its
//! preconditions failed, and records which kernel fired for acceptance
//! bookkeeping.

use log::debug;
use rand::RngCore;

use crate::context::ProposalContext;
use crate::errors::ProposalResult;
use crate::kernels::diffev::DifferentialEvolutionProposal;
use crate::kernels::eigen::CovarianceEigenvectorJump;
use crate::kernels::ensemble::{EnsembleStretchProposal, EnsembleWalkProposal};
use crate::kernels::polarization::PolarizationPhaseJump;
use crate::kernels::prior_draw::DrawApproxPrior;
use crate::kernels::psd::PsdFitJump;
use crate::kernels::single::SingleAdaptProposal;
use crate::kernels::sky::{
    ExtrinsicParamProposal, SkyLocWanderJump, SkyReflectDetPlane, SkyRingProposal,
};
use crate::kernels::spline_cal::SplineCalibrationProposal;
use crate::kernels::Subspace;
use crate::kde::ClusteredKdeProposal;
use crate::glitch::{GlitchMorletProposal, GlitchMorletReverseJump};
use crate::params::ParameterSet;

/// A proposed sample and the log proposal-density ratio needed for detailed
/// balance.
#[derive(Debug, Clone)]
pub struct Proposed {
    pub params: ParameterSet,
    pub log_ratio: f64,
}

/// A single jump kernel.
///
/// Kernels return `Ok(None)` when a recoverable precondition fails (wrong
/// detector count, DE buffer too small, trans-dimensional boundary) so the
/// cycle can retry the next kernel; they never return a garbage proposal.
pub trait JumpProposal {
    /// Unique name within a cycle, used for bookkeeping and diagnostics.
    fn name(&self) -> &str;

    fn propose(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<Option<Proposed>>;
}

struct KernelRecord {
    kernel: Box<dyn JumpProposal>,
    proposed: u64,
    accepted: u64,
}

/// Outcome of one scheduler step.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub params: ParameterSet,
    pub log_ratio: f64,
    /// Name of the kernel that produced the proposal.
    pub kernel: String,
}

/// Ordered, weighted cycle of jump kernels with a position cursor.
#[derive(Default)]
pub struct ProposalCycle {
    kernels: Vec<KernelRecord>,
    /// Flattened schedule: each kernel index appears weight-many times.
    schedule: Vec<usize>,
    cursor: usize,
    last_used: Option<usize>,
}

impl ProposalCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `weight` schedule slots for `kernel`. A weight of zero is a
    /// no-op.
    pub fn add_kernel(&mut self, kernel: Box<dyn JumpProposal>, weight: usize) {
        if weight == 0 {
            return;
        }
        let index = self.kernels.len();
        self.kernels.push(KernelRecord {
            kernel,
            proposed: 0,
            accepted: 0,
        });
        self.schedule.extend(std::iter::repeat(index).take(weight));
    }

    pub fn num_kernels(&self) -> usize {
        self.kernels.len()
    }

    pub fn schedule_len(&self) -> usize {
        self.schedule.len()
    }

    /// How many schedule slots point at the kernel named `name`.
    pub fn weight_of(&self, name: &str) -> usize {
        match self
            .kernels
            .iter()
            .position(|record| record.kernel.name() == name)
        {
            Some(index) => self.schedule.iter().filter(|&&i| i == index).count(),
            None => 0,
        }
    }

    /// Fisher-Yates shuffle of the schedule in place.
    pub fn shuffle(&mut self, rng: &mut dyn RngCore) {
        use rand::Rng;
        for i in (1..self.schedule.len()).rev() {
            let j = rng.gen_range(0..=i);
            self.schedule.swap(i, j);
        }
    }

    /// Produce the next proposal.
    ///
    /// Advances the cursor after every kernel invocation, including failed
    /// ones, and keeps trying until some kernel produces a proposal. Panics
    /// if the cycle is empty or no registered kernel can fire at all; both
    /// are programming errors, not runtime conditions.
    pub fn next(
        &mut self,
        ctx: &mut ProposalContext,
        current: &ParameterSet,
        rng: &mut dyn RngCore,
    ) -> ProposalResult<CycleOutcome> {
        if self.schedule.is_empty() {
            panic!("ProposalCycle::next called on an empty cycle");
        }

        // Two full passes with nothing but precondition failures means the
        // cycle can never produce a proposal for this setup.
        let max_attempts = 2 * self.schedule.len();
        for _ in 0..max_attempts {
            let index = self.schedule[self.cursor];
            self.cursor = (self.cursor + 1) % self.schedule.len();
            self.last_used = Some(index);

            let record = &mut self.kernels[index];
            let result = record.kernel.propose(ctx, current, rng)?;
            match result {
                Some(proposed) => {
                    return Ok(CycleOutcome {
                        params: proposed.params,
                        log_ratio: proposed.log_ratio,
                        kernel: record.kernel.name().to_string(),
                    });
                }
                None => {
                    debug!(
                        "proposal {} produced no candidate, retrying next slot",
                        record.kernel.name()
                    );
                }
            }
        }
        panic!("no kernel in the proposal cycle can fire for this configuration");
    }

    /// Record the sampler's accept/reject decision for the last-invoked
    /// kernel.
    pub fn record_outcome(&mut self, accepted: bool) {
        if let Some(index) = self.last_used {
            let record = &mut self.kernels[index];
            record.proposed += 1;
            if accepted {
                record.accepted += 1;
            }
        }
    }

    /// Zero all per-kernel acceptance counters.
    pub fn zero_stats(&mut self) {
        for record in &mut self.kernels {
            record.proposed = 0;
            record.accepted = 0;
        }
    }

    /// `(name, proposed, accepted)` per kernel, in registration order.
    pub fn acceptance_summary(&self) -> Vec<(String, u64, u64)> {
        self.kernels
            .iter()
            .map(|record| {
                (
                    record.kernel.name().to_string(),
                    record.proposed,
                    record.accepted,
                )
            })
            .collect()
    }
}

/// Integer weight scheme for the default cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleWeights {
    pub big: usize,
    pub small: usize,
    pub tiny: usize,
}

impl Default for CycleWeights {
    fn default() -> Self {
        Self {
            big: 20,
            small: 5,
            tiny: 1,
        }
    }
}

/// Feature flags for [`setup_default_cycle`].
///
/// Every kernel family defaults to on except the reversible-jump glitch
/// moves, spline calibration and PSD fitting, which require explicit
/// opt-in.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub single_adapt: bool,
    pub psi_phi: bool,
    pub extrinsic_param: bool,
    pub sky_wander: bool,
    pub sky_reflect: bool,
    pub draw_prior: bool,
    pub cov_eigen: bool,
    pub diff_evo: bool,
    pub stretch: bool,
    pub walk: bool,
    pub sky_ring: bool,
    pub kde: bool,
    pub spline_cal: bool,
    pub psd_fit: bool,
    pub glitch_fit: bool,
    pub weights: CycleWeights,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            single_adapt: true,
            psi_phi: true,
            extrinsic_param: true,
            sky_wander: true,
            sky_reflect: true,
            draw_prior: true,
            cov_eigen: true,
            diff_evo: true,
            stretch: true,
            walk: true,
            sky_ring: true,
            kde: true,
            spline_cal: false,
            psd_fit: false,
            glitch_fit: false,
            weights: CycleWeights::default(),
        }
    }
}

/// Build the default inspiral proposal cycle from feature flags.
///
/// Kernel families whose geometric preconditions the detector network cannot
/// satisfy are dropped up front: the sky-ring move needs at least two unique
/// detector positions, the plane-reflection moves need exactly three. The
/// polarisation-phase degeneracy jump is dropped when the likelihood
/// marginalizes over phase.
pub fn setup_default_cycle(options: &CycleOptions, ctx: &ProposalContext) -> ProposalCycle {
    let weights = options.weights;
    let n_unique = ctx.network.num_unique_positions();

    let sky_ring = options.sky_ring && n_unique >= 2;
    let sky_reflect = options.sky_reflect && n_unique == 3;
    let extrinsic_param = options.extrinsic_param && n_unique == 3;
    let psi_phi = options.psi_phi && !ctx.marg_phi;

    let mut cycle = ProposalCycle::new();

    if options.single_adapt {
        cycle.add_kernel(Box::new(SingleAdaptProposal::new()), weights.big);
    }
    if psi_phi {
        cycle.add_kernel(Box::new(PolarizationPhaseJump::new()), weights.tiny);
    }
    if extrinsic_param {
        cycle.add_kernel(Box::new(ExtrinsicParamProposal::new()), weights.small);
    }
    if options.sky_wander {
        cycle.add_kernel(Box::new(SkyLocWanderJump::new()), weights.small);
    }
    if sky_reflect {
        cycle.add_kernel(Box::new(SkyReflectDetPlane::new()), weights.tiny);
    }
    if options.draw_prior {
        cycle.add_kernel(Box::new(DrawApproxPrior::new()), weights.tiny);
    }
    if options.cov_eigen {
        cycle.add_kernel(Box::new(CovarianceEigenvectorJump::new()), weights.big);
    }
    if options.diff_evo {
        cycle.add_kernel(
            Box::new(DifferentialEvolutionProposal::new(Subspace::Full)),
            weights.big,
        );
        cycle.add_kernel(
            Box::new(DifferentialEvolutionProposal::new(Subspace::Intrinsic)),
            weights.small,
        );
        cycle.add_kernel(
            Box::new(DifferentialEvolutionProposal::new(Subspace::Extrinsic)),
            weights.small,
        );
    }
    if options.stretch {
        cycle.add_kernel(
            Box::new(EnsembleStretchProposal::new(Subspace::Full)),
            weights.big,
        );
        cycle.add_kernel(
            Box::new(EnsembleStretchProposal::new(Subspace::Intrinsic)),
            weights.small,
        );
        cycle.add_kernel(
            Box::new(EnsembleStretchProposal::new(Subspace::Extrinsic)),
            weights.small,
        );
    }
    if options.walk {
        cycle.add_kernel(
            Box::new(EnsembleWalkProposal::new(Subspace::Full)),
            weights.big,
        );
        cycle.add_kernel(
            Box::new(EnsembleWalkProposal::new(Subspace::Intrinsic)),
            weights.small,
        );
        cycle.add_kernel(
            Box::new(EnsembleWalkProposal::new(Subspace::Extrinsic)),
            weights.small,
        );
    }
    if sky_ring {
        cycle.add_kernel(Box::new(SkyRingProposal::new()), weights.small);
    }
    if options.kde {
        cycle.add_kernel(Box::new(ClusteredKdeProposal::new()), weights.big);
    }
    if options.spline_cal {
        cycle.add_kernel(Box::new(SplineCalibrationProposal::new()), weights.small);
    }
    if options.psd_fit {
        cycle.add_kernel(Box::new(PsdFitJump::new()), weights.small);
    }
    if options.glitch_fit {
        cycle.add_kernel(Box::new(GlitchMorletProposal::new()), weights.small);
        cycle.add_kernel(Box::new(GlitchMorletReverseJump::new()), weights.small);
    }

    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct FixedKernel {
        name: &'static str,
        succeed: bool,
    }

    impl JumpProposal for FixedKernel {
        fn name(&self) -> &str {
            self.name
        }

        fn propose(
            &mut self,
            _ctx: &mut ProposalContext,
            current: &ParameterSet,
            _rng: &mut dyn RngCore,
        ) -> ProposalResult<Option<Proposed>> {
            if self.succeed {
                Ok(Some(Proposed {
                    params: current.clone(),
                    log_ratio: 0.0,
                }))
            } else {
                Ok(None)
            }
        }
    }

    fn test_context() -> ProposalContext {
        use crate::adapt::AdaptiveConfig;
        use crate::geometry::three_detector_network;
        use crate::params::{ParameterSet, VaryType};
        use crate::prior::PriorBounds;

        let mut params = ParameterSet::new();
        params.insert_scalar("x", 0.0, VaryType::Linear);
        ProposalContext::new(
            three_detector_network(),
            1_126_259_462.0,
            PriorBounds::new(),
            &params,
            AdaptiveConfig::default(),
        )
    }

    #[test]
    fn weights_fill_the_schedule_exactly() {
        let mut cycle = ProposalCycle::new();
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "a",
                succeed: true,
            }),
            20,
        );
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "b",
                succeed: true,
            }),
            5,
        );
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "c",
                succeed: true,
            }),
            1,
        );
        assert_eq!(cycle.schedule_len(), 26);
        assert_eq!(cycle.weight_of("a"), 20);
        assert_eq!(cycle.weight_of("b"), 5);
        assert_eq!(cycle.weight_of("c"), 1);
    }

    #[test]
    fn zero_weight_is_a_no_op() {
        let mut cycle = ProposalCycle::new();
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "a",
                succeed: true,
            }),
            0,
        );
        assert_eq!(cycle.num_kernels(), 0);
        assert_eq!(cycle.schedule_len(), 0);
    }

    #[test]
    fn shuffle_preserves_weight_counts() {
        let mut cycle = ProposalCycle::new();
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "a",
                succeed: true,
            }),
            20,
        );
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "b",
                succeed: true,
            }),
            5,
        );
        let mut rng = StdRng::seed_from_u64(42);
        cycle.shuffle(&mut rng);
        assert_eq!(cycle.weight_of("a"), 20);
        assert_eq!(cycle.weight_of("b"), 5);
    }

    #[test]
    fn failing_kernels_are_skipped() {
        let mut cycle = ProposalCycle::new();
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "never",
                succeed: false,
            }),
            3,
        );
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "always",
                succeed: true,
            }),
            1,
        );
        let mut ctx = test_context();
        let current = {
            let mut p = ParameterSet::new();
            p.insert_scalar("x", 0.0, crate::params::VaryType::Linear);
            p
        };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..8 {
            let outcome = cycle.next(&mut ctx, &current, &mut rng).unwrap();
            assert_eq!(outcome.kernel, "always");
        }
    }

    #[test]
    #[should_panic]
    fn empty_cycle_panics() {
        let mut cycle = ProposalCycle::new();
        let mut ctx = test_context();
        let current = ParameterSet::new();
        let mut rng = StdRng::seed_from_u64(1);
        let _ = cycle.next(&mut ctx, &current, &mut rng);
    }

    #[test]
    fn acceptance_bookkeeping_targets_last_kernel() {
        let mut cycle = ProposalCycle::new();
        cycle.add_kernel(
            Box::new(FixedKernel {
                name: "only",
                succeed: true,
            }),
            2,
        );
        let mut ctx = test_context();
        let current = {
            let mut p = ParameterSet::new();
            p.insert_scalar("x", 0.0, crate::params::VaryType::Linear);
            p
        };
        let mut rng = StdRng::seed_from_u64(1);
        cycle.next(&mut ctx, &current, &mut rng).unwrap();
        cycle.record_outcome(true);
        cycle.next(&mut ctx, &current, &mut rng).unwrap();
        cycle.record_outcome(false);

        let summary = cycle.acceptance_summary();
        assert_eq!(summary, vec![("only".to_string(), 2, 1)]);
    }
}
