use super::{build_rule, init_runtime, run_iterations, Algorithm, OptimizerType};
use crate::adagrad::{Adagrad, AdagradConfig};
use crate::adam::{Adam, AdamConfig};
use crate::io::{mkdir, write_particles};
use crate::particles::ParameterSet;
use crate::sampling::{normal_particles, normal_tensor};
use crate::traits::UpdateRule;
use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::Linear;
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Class means are `(−c, −c)` and `(c, c)`
const BLOB_CENTER: f32 = 3.0;
const BLOB_STD: f32 = 0.5;
const INPUT_DIM: usize = 2;

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    #[arg(short, long, default_value = "svgd")]
    pub algorithm: Algorithm,

    #[arg(long, default_value = "adam")]
    pub optimizer: OptimizerType,

    #[arg(long, default_value = "0.001")]
    pub lr: f64,

    #[arg(long, default_value = "20")]
    pub particles: usize,

    #[arg(long, default_value = "1000")]
    pub iters: usize,

    #[arg(long, default_value = "2", help = "Number of hidden layers")]
    pub layers: usize,

    #[arg(long, default_value = "100", help = "Units per hidden layer")]
    pub hidden: usize,

    #[arg(long, default_value = "400", help = "Total number of data points")]
    pub num_points: usize,

    #[arg(long, default_value = "200", help = "Points in class 0")]
    pub num0: usize,

    #[arg(long, default_value = "300", help = "Points used for training")]
    pub train: usize,

    #[arg(long, default_value = "0.1", help = "Std of the initial weights")]
    pub init_std: f32,

    #[arg(long, default_value = "0")]
    pub seed: u64,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long, help = "Write final particles (.tsv or .tsv.gz)")]
    pub output: Option<String>,

    #[arg(long, default_value_t = num_cpus::get())]
    pub max_threads: usize,

    #[arg(short, long)]
    pub verbose: bool,
}

///
/// Two Gaussian blobs, `num0` points with label 0 around `(−3, −3)` and
/// the rest with label 1 around `(3, 3)`, in shuffled order.
///
/// Returns `x (n, 2)` and `y (n,)`
///
pub fn two_blobs(
    num_points: usize,
    num0: usize,
    seed: u64,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    if num0 > num_points {
        anyhow::bail!("num0 ({}) exceeds num_points ({})", num0, num_points);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = normal_tensor(&mut rng, &[num_points, INPUT_DIM], 0.0, BLOB_STD, device)?
        .to_vec2::<f32>()?;

    let mut rows: Vec<(f32, f32, f32)> = noise
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let (center, label) = if i < num0 {
                (-BLOB_CENTER, 0.0)
            } else {
                (BLOB_CENTER, 1.0)
            };
            (center + e[0], center + e[1], label)
        })
        .collect();
    rows.shuffle(&mut rng);

    let x: Vec<f32> = rows.iter().flat_map(|&(a, b, _)| [a, b]).collect();
    let y: Vec<f32> = rows.iter().map(|&(_, _, l)| l).collect();
    Ok((
        Tensor::from_vec(x, (num_points, INPUT_DIM), device)?,
        Tensor::from_vec(y, num_points, device)?,
    ))
}

/// Slot shapes of an MLP: `(out, in)` weight then `(out,)` bias per layer
pub fn mlp_shapes(input_dim: usize, hidden: usize, layers: usize) -> Vec<Vec<usize>> {
    let mut dims = vec![input_dim];
    dims.extend(std::iter::repeat(hidden).take(layers));
    dims.push(1);
    dims.windows(2)
        .flat_map(|w| [vec![w[1], w[0]], vec![w[1]]])
        .collect()
}

/// Logits `(n,)` of a tanh MLP whose layers are the particle's slots
pub fn mlp_logits(p: &ParameterSet, x: &Tensor) -> candle_core::Result<Tensor> {
    let vars = p.vars();
    let nlayers = vars.len() / 2;
    let mut h = x.clone();
    for l in 0..nlayers {
        let layer = Linear::new(
            vars[2 * l].as_tensor().clone(),
            Some(vars[2 * l + 1].as_tensor().clone()),
        );
        h = layer.forward(&h)?;
        if l + 1 < nlayers {
            h = h.tanh()?;
        }
    }
    h.squeeze(1)
}

/// `log(1 + exp(z))` without overflow
fn softplus(z: &Tensor) -> candle_core::Result<Tensor> {
    let tail = z.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    z.relu()? + tail
}

/// Σ_i [y_i z_i − log(1 + exp(z_i))], the negative sigmoid cross-entropy
pub fn bernoulli_log_likelihood(logits: &Tensor, y: &Tensor) -> candle_core::Result<Tensor> {
    ((y * logits)? - softplus(logits)?)?.sum_all()
}

/// Predictive probability of label 1, averaged over particles
pub fn predictive_probability(particles: &[ParameterSet], x: &Tensor) -> Result<Vec<f32>> {
    let probs = particles
        .iter()
        .map(|p| candle_nn::ops::sigmoid(&mlp_logits(p, x)?.detach()))
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::stack(&probs, 0)?
        .mean(0)?
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()?)
}

/// Share of points whose thresholded predictive probability misses the label
pub fn error_rate(prob: &[f32], y: &Tensor) -> Result<f32> {
    let labels = y.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    if labels.is_empty() {
        return Ok(0.0);
    }
    let wrong = prob
        .iter()
        .zip(labels.iter())
        .filter(|&(&p, &l)| (p > 0.5) != (l > 0.5))
        .count();
    Ok(wrong as f32 / labels.len() as f32)
}

fn select_device(gpu: bool) -> Device {
    if gpu {
        #[cfg(target_os = "macos")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(target_os = "linux")]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

///
/// Train the particle ensemble on the first `args.train` points
///
/// Returns the update rule and the test error of the particle-averaged
/// predictive probability on the remaining points
///
pub fn fit(args: &ClassifyArgs, device: &Device) -> Result<(Box<dyn UpdateRule>, f32)> {
    if args.train > args.num_points {
        anyhow::bail!("train ({}) exceeds num_points ({})", args.train, args.num_points);
    }

    let (x, y) = two_blobs(args.num_points, args.num0, args.seed, device)?;
    let x_train = x.narrow(0, 0, args.train)?;
    let y_train = y.narrow(0, 0, args.train)?;
    let x_test = x.narrow(0, args.train, args.num_points - args.train)?;
    let y_test = y.narrow(0, args.train, args.num_points - args.train)?;
    info!(
        "{} training and {} test points",
        args.train,
        args.num_points - args.train
    );

    let shapes = mlp_shapes(INPUT_DIM, args.hidden, args.layers);
    let particles = normal_particles(
        args.particles,
        &shapes,
        0.0,
        args.init_std,
        args.seed.wrapping_add(1),
        device,
    )?;
    info!(
        "{} particles, {} parameters each",
        args.particles,
        particles.first().map(|p| p.dim()).unwrap_or(0)
    );

    let mut rule = match args.optimizer {
        OptimizerType::Adam => {
            build_rule::<Adam>(&args.algorithm, particles, AdamConfig::new(args.lr))?
        }
        OptimizerType::Adagrad => {
            build_rule::<Adagrad>(&args.algorithm, particles, AdagradConfig::new(args.lr))?
        }
    };

    let log_lik = |p: &ParameterSet| bernoulli_log_likelihood(&mlp_logits(p, &x_train)?, &y_train);
    run_iterations(rule.as_mut(), args.iters, args.verbose, &log_lik)?;

    let prob = predictive_probability(rule.particles(), &x_test)?;
    let err = error_rate(&prob, &y_test)?;
    Ok((rule, err))
}

pub fn run(args: &ClassifyArgs) -> Result<()> {
    init_runtime(args.verbose, args.max_threads)?;

    let device = select_device(args.gpu);
    info!("Using device: {:?}", device);

    let (rule, err) = fit(args, &device)?;
    info!("test error = {:.4}", err);

    if let Some(out) = &args.output {
        mkdir(out)?;
        write_particles(rule.particles(), out)?;
        info!("wrote {} particles to {}", rule.num_particles(), out);
    }
    Ok(())
}
