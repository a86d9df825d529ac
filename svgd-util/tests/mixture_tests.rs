use candle_core::Device;
use svgd_util::cli::mixture::MixtureSummary;
use svgd_util::sampling::normal_particles;
use svgd_util::{Adagrad, AdagradConfig, Ensemble, GradientSet, ParameterSet, Svgd, UpdateRule};

const NUM_PARTICLES: usize = 100;
const NUM_ITERS: usize = 3000;

/// ∇ log(⅓ N(x; −2, 1) + ⅔ N(x; 2, 1)) = −x + 2 − 4 / (2 e^{4x} + 1)
fn mixture_gradients(particles: &[ParameterSet]) -> anyhow::Result<Vec<GradientSet>> {
    particles
        .iter()
        .map(|p| {
            let x = p.vars()[0].as_tensor();
            let denom = x.affine(4.0, 0.0)?.exp()?.affine(2.0, 1.0)?;
            let g = (x.affine(-1.0, 2.0)? - (denom.recip()? * 4.0)?)?;
            Ok(vec![g])
        })
        .collect()
}

fn run(rule: &mut dyn UpdateRule) -> anyhow::Result<MixtureSummary> {
    for _ in 0..NUM_ITERS {
        let grads = mixture_gradients(rule.particles())?;
        rule.update(&grads)?;
    }
    MixtureSummary::from_particles(rule.particles())
}

fn initial_particles() -> anyhow::Result<Vec<ParameterSet>> {
    normal_particles(NUM_PARTICLES, &[vec![1]], -10.0, 1.0, 0, &Device::Cpu)
}

fn config() -> AdagradConfig {
    AdagradConfig::new(0.01).decay(0.9)
}

#[test]
fn svgd_finds_both_modes() -> anyhow::Result<()> {
    let mut svgd = Svgd::<Adagrad>::new(initial_particles()?, config())?;
    let summary = run(&mut svgd)?;

    assert!(
        (summary.left_peak + 2.0).abs() < 0.5,
        "left peak: {:?}",
        summary
    );
    assert!(
        (summary.right_peak - 2.0).abs() < 0.5,
        "right peak: {:?}",
        summary
    );
    assert!(summary.variance > 1.0, "collapsed: {:?}", summary);
    assert!(
        summary.right_share > 0.3 && summary.right_share < 0.95,
        "mode weights: {:?}",
        summary
    );
    Ok(())
}

#[test]
fn ensemble_collapses_to_nearest_mode() -> anyhow::Result<()> {
    let mut ensemble = Ensemble::<Adagrad>::new(initial_particles()?, config())?;
    let summary = run(&mut ensemble)?;

    assert!(
        (summary.left_peak + 2.0).abs() < 0.5,
        "left peak: {:?}",
        summary
    );
    assert_eq!(summary.right_share, 0.0, "{:?}", summary);
    assert!(summary.variance < 0.1, "spread: {:?}", summary);
    Ok(())
}
