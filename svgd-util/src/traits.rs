use crate::error::Result;
use crate::particles::{GradientSet, ParameterSet};
use candle_core::{Tensor, Var};

/// Stateful per-particle transform that turns an ascent direction into a
/// parameter step and applies it in place.
///
/// One instance owns the optimiser state of exactly one particle.
pub trait GradientTransform: Sized + Send {
    type Config: Clone;

    /// Build a transform over the slots of one particle,
    /// with zero-initialised state
    fn new(vars: Vec<Var>, config: Self::Config) -> Result<Self>;

    /// Take one ascent step, `θ_k ← θ_k + update(direction_k)`
    /// * `directions` - one tensor per slot, same shapes as the variables
    fn apply(&mut self, directions: &[Tensor]) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// One iteration of a particle ensemble update.
pub trait UpdateRule {
    /// Consume one gradient set per particle and update every particle in place
    fn update(&mut self, gradients: &[GradientSet]) -> Result<()>;

    /// Current particles (read access for reporting)
    fn particles(&self) -> &[ParameterSet];

    fn num_particles(&self) -> usize {
        self.particles().len()
    }
}
