use crate::error::Result;
use crate::particles::*;
use crate::traits::{GradientTransform, UpdateRule};
use rayon::prelude::*;

/// Independent gradient ascent for every particle.
///
/// Same construction and call protocol as [`crate::Svgd`], but each particle
/// only ever sees its own gradient: no kernel, no information sharing.
pub struct Ensemble<O: GradientTransform> {
    particles: Vec<ParameterSet>,
    transforms: Vec<O>,
}

impl<O: GradientTransform> Ensemble<O> {
    pub fn new(particles: Vec<ParameterSet>, config: O::Config) -> Result<Self> {
        Self::from_factory(particles, |p| O::new(p.vars().to_vec(), config.clone()))
    }

    pub fn from_factory<F>(particles: Vec<ParameterSet>, make_transform: F) -> Result<Self>
    where
        F: FnMut(&ParameterSet) -> Result<O>,
    {
        let transforms = build_transforms(&particles, make_transform)?;
        Ok(Self {
            particles,
            transforms,
        })
    }

    pub fn transforms(&self) -> &[O] {
        &self.transforms
    }
}

impl<O: GradientTransform> UpdateRule for Ensemble<O> {
    fn update(&mut self, gradients: &[GradientSet]) -> Result<()> {
        check_gradients(&self.particles, gradients)?;
        self.transforms
            .par_iter_mut()
            .zip(gradients.par_iter())
            .try_for_each(|(opt, g)| opt.apply(g))
    }

    fn particles(&self) -> &[ParameterSet] {
        &self.particles
    }
}
