pub mod classify;
pub mod mixture;

use crate::autodiff::ensemble_gradients;
use crate::particles::ParameterSet;
use crate::traits::{GradientTransform, UpdateRule};
use crate::{Ensemble, Svgd};
use anyhow::Result;
use candle_core::Tensor;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

pub use classify::ClassifyArgs;
pub use mixture::MixtureArgs;

#[derive(Parser)]
#[command(name = "svgd-util")]
#[command(about = "Particle-based inference with Stein variational gradient descent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample a two-mode 1-D Gaussian mixture
    Mixture(MixtureArgs),
    /// Bayesian neural-network classification on two Gaussian blobs
    Classify(ClassifyArgs),
}

#[derive(Clone, Debug, ValueEnum)]
pub enum Algorithm {
    /// Kernelized, interacting particles
    Svgd,
    /// Independent gradient ascent per particle
    Ensemble,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum OptimizerType {
    Adam,
    Adagrad,
}

/// Set up logging and the global thread pool
pub fn init_runtime(verbose: bool, max_threads: usize) -> Result<()> {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let max_threads = num_cpus::get().min(max_threads.max(1));
    rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads)
        .build_global()?;
    info!("will use {} threads", rayon::current_num_threads());
    Ok(())
}

/// Wrap `particles` in the update rule selected by `algorithm`
pub fn build_rule<O>(
    algorithm: &Algorithm,
    particles: Vec<ParameterSet>,
    config: O::Config,
) -> Result<Box<dyn UpdateRule>>
where
    O: GradientTransform + 'static,
{
    Ok(match algorithm {
        Algorithm::Svgd => Box::new(Svgd::<O>::new(particles, config)?),
        Algorithm::Ensemble => Box::new(Ensemble::<O>::new(particles, config)?),
    })
}

///
/// Evaluate gradients of `log_prob` for the current particles and hand
/// them to `rule`, `iters` times.
///
/// * `rule` - update rule owning the particles
/// * `iters` - number of iterations
/// * `verbose` - log progress instead of drawing a progress bar
/// * `log_prob` - log-density of one particle
///
pub fn run_iterations<F>(
    rule: &mut dyn UpdateRule,
    iters: usize,
    verbose: bool,
    log_prob: &F,
) -> Result<()>
where
    F: Fn(&ParameterSet) -> candle_core::Result<Tensor> + Sync,
{
    let pb = ProgressBar::new(iters as u64);
    if verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    info!(
        "running {} iterations over {} particles",
        iters,
        rule.num_particles()
    );

    for t in 0..iters {
        let grads = ensemble_gradients(rule.particles(), log_prob)?;
        rule.update(&grads)?;

        if verbose && (t % 500 == 0 || t + 1 == iters) {
            info!("iter {:5}/{}", t + 1, iters);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(())
}
