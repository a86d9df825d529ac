//! Stein variational gradient descent over an ensemble of particles.
//!
//! For particles `x_1, …, x_n` with log-density gradients `g_1, …, g_n`,
//! the transported direction of particle `i` is
//!
//! ```text
//! φ(x_i) = (1/n) Σ_j [ K[j][i] g_j + ∇_{x_j} K[j][i] ]
//! ```
//!
//! The first term averages the gradients of nearby particles, the second
//! pushes particles apart. `φ` is computed on the flattened parameter vector
//! of each particle, split back into slots, and handed to that particle's own
//! [`GradientTransform`].
//!
//! # Example
//!
//! ```ignore
//! use svgd_util::{Adagrad, AdagradConfig, Svgd, UpdateRule};
//!
//! let mut svgd = Svgd::<Adagrad>::new(particles, AdagradConfig::new(0.01).decay(0.9))?;
//! for _ in 0..num_iters {
//!     let grads = ensemble_gradients(svgd.particles(), &log_prob)?;
//!     svgd.update(&grads)?;
//! }
//! ```

use crate::error::Result;
use crate::kernel::RbfKernel;
use crate::particles::*;
use crate::traits::{GradientTransform, UpdateRule};
use log::debug;
use rayon::prelude::*;

pub struct Svgd<O: GradientTransform> {
    particles: Vec<ParameterSet>,
    transforms: Vec<O>,
    kernel: RbfKernel,
}

impl<O: GradientTransform> Svgd<O> {
    /// Build with one transform per particle, all from the same configuration
    pub fn new(particles: Vec<ParameterSet>, config: O::Config) -> Result<Self> {
        Self::from_factory(particles, |p| O::new(p.vars().to_vec(), config.clone()))
    }

    /// Build with `make_transform` called once per particle, in index order
    pub fn from_factory<F>(particles: Vec<ParameterSet>, make_transform: F) -> Result<Self>
    where
        F: FnMut(&ParameterSet) -> Result<O>,
    {
        let transforms = build_transforms(&particles, make_transform)?;
        Ok(Self {
            particles,
            transforms,
            kernel: RbfKernel::default(),
        })
    }

    pub fn with_kernel(mut self, kernel: RbfKernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn kernel(&self) -> &RbfKernel {
        &self.kernel
    }

    pub fn transforms(&self) -> &[O] {
        &self.transforms
    }

    /// Transported directions `φ` for every particle, split by slot.
    /// Nothing is mutated.
    pub fn stein_directions(&self, gradients: &[GradientSet]) -> Result<Vec<GradientSet>> {
        check_gradients(&self.particles, gradients)?;

        let n = self.particles.len();
        let x_nd = stack_positions(&self.particles)?;
        let g_nd = stack_gradients(gradients)?;

        let kernel = self.kernel.compute_stacked(&x_nd)?;
        debug!(
            "svgd: n = {}, d = {}, h = {:.4e}",
            n,
            x_nd.dim(1)?,
            kernel.bandwidth
        );

        let drive_nd = kernel.kxy.t()?.matmul(&g_nd)?;
        let phi_nd = ((drive_nd + kernel.repulsion()?)? / n as f64)?;

        self.particles
            .par_iter()
            .enumerate()
            .map(|(i, p)| p.unflatten(&phi_nd.get(i)?))
            .collect()
    }
}

impl<O: GradientTransform> UpdateRule for Svgd<O> {
    fn update(&mut self, gradients: &[GradientSet]) -> Result<()> {
        let directions = self.stein_directions(gradients)?;
        self.transforms
            .par_iter_mut()
            .zip(directions.par_iter())
            .try_for_each(|(opt, phi)| opt.apply(phi))
    }

    fn particles(&self) -> &[ParameterSet] {
        &self.particles
    }
}
