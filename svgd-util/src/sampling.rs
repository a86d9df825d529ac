use crate::particles::ParameterSet;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Sample a tensor of `N(mean, std²)` entries from `rng`
pub fn normal_tensor<R: Rng + ?Sized>(
    rng: &mut R,
    shape: &[usize],
    mean: f32,
    std: f32,
    device: &Device,
) -> anyhow::Result<Tensor> {
    let normal = Normal::new(mean, std)?;
    let nelem: usize = shape.iter().product();
    let values: Vec<f32> = (0..nelem).map(|_| normal.sample(rng)).collect();
    Ok(Tensor::from_vec(values, shape, device)?)
}

/// Draw `n` particles with one slot per entry of `shapes`, every entry
/// `N(mean, std²)`.
///
/// Particle `i` uses its own stream seeded with `seed + i`, so a particle's
/// initial value does not depend on how many particles are drawn.
pub fn normal_particles(
    n: usize,
    shapes: &[Vec<usize>],
    mean: f32,
    std: f32,
    seed: u64,
    device: &Device,
) -> anyhow::Result<Vec<ParameterSet>> {
    (0..n)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let slots = shapes
                .iter()
                .map(|shape| normal_tensor(&mut rng, shape, mean, std, device))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(ParameterSet::from_tensors(&slots)?)
        })
        .collect()
}
