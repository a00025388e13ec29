//! Cross-cutting invariants of the proposal engine: detailed-balance
//! bookkeeping, geometric invariants of the sky moves, and scheduler
//! behaviour under a realistic parameter set.

use is_close::is_close;
use rand::rngs::StdRng;
use rand::SeedableRng;

use gwprop::adapt::AdaptiveConfig;
use gwprop::cycle::{setup_default_cycle, CycleOptions, JumpProposal};
use gwprop::geometry::{
    greenwich_mean_sidereal_time, line_of_sight, ligo_hanford, ligo_livingston,
    three_detector_network, DetectorNetwork,
};
use gwprop::kernels::polarization::PolarizationPhaseJump;
use gwprop::kernels::sky::SkyRingProposal;
use gwprop::params::{ParameterSet, VaryType};
use gwprop::prior::PriorBounds;
use gwprop::ProposalContext;

const PI: f64 = std::f64::consts::PI;
const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

const EPOCH: f64 = 1_126_259_462.0;

fn cbc_params() -> ParameterSet {
    let mut params = ParameterSet::new();
    params.insert_scalar("chirpmass", 20.0, VaryType::Linear);
    params.insert_scalar("q", 0.5, VaryType::Linear);
    params.insert_scalar("a_spin1", 0.1, VaryType::Linear);
    params.insert_scalar("a_spin2", 0.2, VaryType::Linear);
    params.insert_scalar("time", EPOCH + 0.05, VaryType::Linear);
    params.insert_scalar("phase", 1.2, VaryType::Circular);
    params.insert_scalar("polarisation", 0.4, VaryType::Circular);
    params.insert_scalar("rightascension", 2.0, VaryType::Circular);
    params.insert_scalar("declination", -0.3, VaryType::Linear);
    params.insert_scalar("logdistance", 6.0, VaryType::Linear);
    params.insert_scalar("costheta_jn", 0.3, VaryType::Linear);
    params
}

fn cbc_priors() -> PriorBounds {
    let mut priors = PriorBounds::new();
    priors.insert("chirpmass", 5.0, 50.0).unwrap();
    priors.insert("q", 0.05, 1.0).unwrap();
    priors.insert("a_spin1", 0.0, 1.0).unwrap();
    priors.insert("a_spin2", 0.0, 1.0).unwrap();
    priors.insert("time", EPOCH - 0.1, EPOCH + 0.1).unwrap();
    priors.insert("phase", 0.0, TWO_PI).unwrap();
    priors.insert("polarisation", 0.0, PI).unwrap();
    priors.insert("rightascension", 0.0, TWO_PI).unwrap();
    priors
        .insert("declination", -PI / 2.0, PI / 2.0)
        .unwrap();
    priors.insert("logdistance", 3.0, 8.0).unwrap();
    priors.insert("costheta_jn", -1.0, 1.0).unwrap();
    priors
}

fn cbc_context() -> ProposalContext {
    ProposalContext::new(
        three_detector_network(),
        EPOCH,
        cbc_priors(),
        &cbc_params(),
        AdaptiveConfig::default(),
    )
}

#[test]
fn default_cycle_respects_the_weight_scheme() {
    let ctx = cbc_context();
    let options = CycleOptions::default();
    let cycle = setup_default_cycle(&options, &ctx);

    // 20/5/1 weight scheme over the default-on families.
    assert_eq!(cycle.weight_of("Single"), 20);
    assert_eq!(cycle.weight_of("PolarizationPhase"), 1);
    assert_eq!(cycle.weight_of("ExtrinsicParamProposal"), 5);
    assert_eq!(cycle.weight_of("SkyLocWander"), 5);
    assert_eq!(cycle.weight_of("SkyReflectDetPlane"), 1);
    assert_eq!(cycle.weight_of("DrawApproxPrior"), 1);
    assert_eq!(cycle.weight_of("CovarianceEigenvector"), 20);
    assert_eq!(cycle.weight_of("DifferentialEvolutionFull"), 20);
    assert_eq!(cycle.weight_of("DifferentialEvolutionIntrinsic"), 5);
    assert_eq!(cycle.weight_of("DifferentialEvolutionExtrinsic"), 5);
    assert_eq!(cycle.weight_of("EnsembleStretchFull"), 20);
    assert_eq!(cycle.weight_of("SkyRingProposal"), 5);
    assert_eq!(cycle.weight_of("ClusteredKDEProposal"), 20);

    // Default-off families stay out until explicitly requested.
    assert_eq!(cycle.weight_of("glitchMorletJump"), 0);
    assert_eq!(cycle.weight_of("SplineCalibration"), 0);
    assert_eq!(cycle.weight_of("PSDFitJump"), 0);
}

#[test]
fn geometry_gates_disable_unsupported_families() {
    let mut params = cbc_params();
    params.insert_scalar("extra", 0.0, VaryType::Fixed);
    let two_site = ProposalContext::new(
        DetectorNetwork::new(vec![ligo_hanford(), ligo_livingston()]),
        EPOCH,
        cbc_priors(),
        &params,
        AdaptiveConfig::default(),
    );
    let cycle = setup_default_cycle(&CycleOptions::default(), &two_site);
    assert_eq!(cycle.weight_of("SkyReflectDetPlane"), 0);
    assert_eq!(cycle.weight_of("ExtrinsicParamProposal"), 0);
    assert_eq!(cycle.weight_of("SkyRingProposal"), 5);
}

#[test]
fn symmetric_kernels_always_report_zero_ratio() {
    let mut ctx = cbc_context();
    let current = cbc_params();
    let mut rng = StdRng::seed_from_u64(1234);

    // Seed the history buffer so the ensemble kernels fire.
    for i in 0..32 {
        let mut point = cbc_params();
        point.set_scalar("chirpmass", 18.0 + 0.1 * i as f64);
        point.set_scalar("q", 0.3 + 0.01 * i as f64);
        ctx.de_buffer.record(&point);
    }

    let mut cycle = setup_default_cycle(&CycleOptions::default(), &ctx);
    cycle.shuffle(&mut rng);

    let symmetric = [
        "Single",
        "PolarizationPhase",
        "SkyLocWander",
        "CovarianceEigenvector",
        "DifferentialEvolutionFull",
        "DifferentialEvolutionIntrinsic",
        "DifferentialEvolutionExtrinsic",
        "EnsembleWalkFull",
        "EnsembleWalkIntrinsic",
        "EnsembleWalkExtrinsic",
    ];

    for _ in 0..2000 {
        let outcome = cycle.next(&mut ctx, &current, &mut rng).unwrap();
        if symmetric.contains(&outcome.kernel.as_str()) {
            assert_eq!(
                outcome.log_ratio, 0.0,
                "kernel {} must be symmetric",
                outcome.kernel
            );
        }
        cycle.record_outcome(false);
        ctx.adaptive.update(false, 0.234, &cbc_priors());
    }
}

#[test]
fn cycle_bookkeeping_counts_every_iteration() {
    let mut ctx = cbc_context();
    let current = cbc_params();
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..8 {
        ctx.de_buffer.record(&cbc_params());
    }

    let mut cycle = setup_default_cycle(&CycleOptions::default(), &ctx);
    let n_iter = 500;
    for _ in 0..n_iter {
        cycle.next(&mut ctx, &current, &mut rng).unwrap();
        cycle.record_outcome(true);
    }
    let total: u64 = cycle
        .acceptance_summary()
        .iter()
        .map(|(_, proposed, _)| proposed)
        .sum();
    assert_eq!(total, n_iter);
}

#[test]
fn polarization_phase_end_to_end_scenario() {
    let mut params = ParameterSet::new();
    params.insert_scalar("time", 0.0, VaryType::Linear);
    params.insert_scalar("phase", 0.0, VaryType::Circular);
    params.insert_scalar("polarisation", 0.0, VaryType::Circular);

    let mut ctx = ProposalContext::new(
        three_detector_network(),
        EPOCH,
        cbc_priors(),
        &params,
        AdaptiveConfig::default(),
    );
    let mut kernel = PolarizationPhaseJump::new();
    let mut rng = StdRng::seed_from_u64(5);
    let proposed = kernel.propose(&mut ctx, &params, &mut rng).unwrap().unwrap();

    assert_eq!(proposed.log_ratio, 0.0);
    assert!(is_close!(proposed.params.scalar("phase"), PI));
    assert!(is_close!(proposed.params.scalar("polarisation"), PI / 2.0));
    assert_eq!(proposed.params.scalar("time"), 0.0);
}

#[test]
fn sky_ring_preserves_the_axis_baseline_delay() {
    // With exactly two sites the rotation axis is always the H1-L1
    // baseline, so the defining invariant is directly checkable: the
    // projection of the line of sight onto the baseline is unchanged.
    let h1 = ligo_hanford();
    let l1 = ligo_livingston();
    let network = DetectorNetwork::new(vec![h1.clone(), l1.clone()]);

    let current = cbc_params();
    let mut ctx = ProposalContext::new(
        network,
        EPOCH,
        cbc_priors(),
        &current,
        AdaptiveConfig::default(),
    );
    let mut kernel = SkyRingProposal::new();
    let mut rng = StdRng::seed_from_u64(7);

    let baseline = [
        h1.location[0] - l1.location[0],
        h1.location[1] - l1.location[1],
        h1.location[2] - l1.location[2],
    ];

    for _ in 0..50 {
        let proposed = kernel
            .propose(&mut ctx, &current, &mut rng)
            .unwrap()
            .unwrap();
        let new = &proposed.params;

        // Both directions evaluated at the construction-epoch sidereal time.
        let gmst = greenwich_mean_sidereal_time(current.scalar("time"));
        let k_old = line_of_sight(
            current.scalar("rightascension"),
            current.scalar("declination"),
            gmst,
        );
        let k_new = line_of_sight(
            new.scalar("rightascension"),
            new.scalar("declination"),
            gmst,
        );

        let project = |k: [f64; 3]| baseline[0] * k[0] + baseline[1] * k[1] + baseline[2] * k[2];
        assert!(
            is_close!(project(k_old), project(k_new), rel_tol = 1e-9, abs_tol = 1e-3),
            "baseline delay changed"
        );
    }
}

#[test]
fn adaptive_updates_survive_a_long_random_run() {
    use rand::Rng;

    let mut ctx = cbc_context();
    let current = cbc_params();
    let mut rng = StdRng::seed_from_u64(11);
    let priors = cbc_priors();

    for _ in 0..16 {
        ctx.de_buffer.record(&cbc_params());
    }
    let mut cycle = setup_default_cycle(&CycleOptions::default(), &ctx);

    for _ in 0..3000 {
        let outcome = cycle.next(&mut ctx, &current, &mut rng).unwrap();
        let accepted = rng.gen::<f64>() < 0.3;
        cycle.record_outcome(accepted);
        ctx.adaptive.update(accepted, 0.234, &priors);
        assert!(outcome.log_ratio.is_finite() || outcome.log_ratio == f64::NEG_INFINITY);
    }

    // Sigmas stayed clamped to their prior widths throughout.
    for name in current.non_fixed_scalar_names() {
        let sigma = ctx.adaptive.sigma(name);
        let (min, max) = priors.min_max(name);
        assert!(sigma >= f64::MIN_POSITIVE && sigma <= max - min);
    }
}

#[test]
fn adaptive_state_serde_round_trip() {
    let ctx = cbc_context();
    let json = serde_json::to_string(&ctx.adaptive).unwrap();
    let back: gwprop::AdaptiveState = serde_json::from_str(&json).unwrap();
    assert_eq!(back.sigma("chirpmass"), ctx.adaptive.sigma("chirpmass"));
}
