use super::{build_rule, init_runtime, run_iterations, Algorithm};
use crate::adagrad::{Adagrad, AdagradConfig};
use crate::io::{mkdir, write_particles};
use crate::particles::ParameterSet;
use crate::sampling::normal_particles;
use crate::summary::{kde_mode, EnsembleSummary};
use anyhow::Result;
use candle_core::{Device, Tensor};
use clap::Args;
use log::info;

/// KDE bandwidth used to locate the two modes
const KDE_BANDWIDTH: f32 = 0.5;

#[derive(Args, Debug)]
pub struct MixtureArgs {
    #[arg(short, long, default_value = "svgd")]
    pub algorithm: Algorithm,

    #[arg(long, default_value = "100")]
    pub particles: usize,

    #[arg(long, default_value = "3000")]
    pub iters: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(
        long,
        default_value = "0.9",
        value_parser = parse_decay,
        help = "Adagrad history decay, in [0, 1)"
    )]
    pub decay: f64,

    #[arg(
        long,
        conflicts_with = "decay",
        help = "Use the plain running sum of squared gradients instead of a decayed history"
    )]
    pub running_sum: bool,

    #[arg(long, default_value = "-10", allow_negative_numbers = true)]
    pub init_mean: f32,

    #[arg(long, default_value = "1")]
    pub init_std: f32,

    #[arg(long, default_value = "0")]
    pub seed: u64,

    #[arg(short, long, help = "Write final particles (.tsv or .tsv.gz)")]
    pub output: Option<String>,

    #[arg(long, default_value_t = num_cpus::get())]
    pub max_threads: usize,

    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_decay(s: &str) -> std::result::Result<f64, String> {
    let alpha: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..1.0).contains(&alpha) {
        Ok(alpha)
    } else {
        Err(format!("decay must be in [0, 1), got {}", alpha))
    }
}

impl MixtureArgs {
    pub fn adagrad_config(&self) -> AdagradConfig {
        let config = AdagradConfig::new(self.lr);
        if self.running_sum {
            config
        } else {
            config.decay(self.decay)
        }
    }
}

///
/// Unnormalised log-density of `⅓ N(−2, 1) + ⅔ N(2, 1)` at the particle's
/// single scalar slot
///
pub fn mixture_log_prob(p: &ParameterSet) -> candle_core::Result<Tensor> {
    let x = p.vars()[0].as_tensor();
    let left = x.affine(1.0, 2.0)?.sqr()?.affine(-0.5, (1f64 / 3.0).ln())?;
    let right = x.affine(1.0, -2.0)?.sqr()?.affine(-0.5, (2f64 / 3.0).ln())?;
    Tensor::stack(&[left, right], 1)?.log_sum_exp(1)
}

/// Where the particles ended up relative to the two modes
#[derive(Debug, Clone)]
pub struct MixtureSummary {
    pub mean: f32,
    pub variance: f32,
    pub quantiles: Vec<(f32, f32)>,
    /// Share of particles with `x > 0`
    pub right_share: f32,
    /// KDE peak in `[−6, 0]`
    pub left_peak: f32,
    /// KDE peak in `[0, 6]`
    pub right_peak: f32,
}

impl MixtureSummary {
    pub fn from_particles(particles: &[ParameterSet]) -> Result<Self> {
        let summary = EnsembleSummary::from_particles(particles)?;
        if summary.dim() != 1 {
            anyhow::bail!("expected scalar particles, got dimension {}", summary.dim());
        }
        let x = summary
            .coordinate(0)
            .ok_or_else(|| anyhow::anyhow!("empty ensemble"))?;

        let quantiles = [0.05, 0.25, 0.5, 0.75, 0.95]
            .iter()
            .map(|&q| (q, summary.quantile(q)[0]))
            .collect();

        Ok(Self {
            mean: summary.mean()[0],
            variance: summary.variance().first().copied().unwrap_or(0.0),
            quantiles,
            right_share: x.iter().filter(|&&v| v > 0.0).count() as f32 / x.len() as f32,
            left_peak: kde_mode(&x, -6.0, 0.0, KDE_BANDWIDTH),
            right_peak: kde_mode(&x, 0.0, 6.0, KDE_BANDWIDTH),
        })
    }
}

pub fn run(args: &MixtureArgs) -> Result<()> {
    init_runtime(args.verbose, args.max_threads)?;

    let device = Device::Cpu;
    let particles = normal_particles(
        args.particles,
        &[vec![1]],
        args.init_mean,
        args.init_std,
        args.seed,
        &device,
    )?;

    let config = args.adagrad_config();
    info!("algorithm: {:?}, adagrad: {:?}", args.algorithm, config);

    let mut rule = build_rule::<Adagrad>(&args.algorithm, particles, config)?;
    run_iterations(rule.as_mut(), args.iters, args.verbose, &mixture_log_prob)?;

    let summary = MixtureSummary::from_particles(rule.particles())?;
    info!("mean = {:.4}, variance = {:.4}", summary.mean, summary.variance);
    for (q, v) in summary.quantiles.iter() {
        info!("quantile {:.2}: {:.4}", q, v);
    }
    info!(
        "right mode share = {:.3}, KDE peaks at {:.3} and {:.3}",
        summary.right_share, summary.left_peak, summary.right_peak
    );

    if let Some(out) = &args.output {
        mkdir(out)?;
        write_particles(rule.particles(), out)?;
        info!("wrote {} particles to {}", rule.num_particles(), out);
    }

    Ok(())
}
