//! Gradient collaborators built on candle's reverse-mode autodiff.
//!
//! The update rules only consume gradients; these helpers are one way to
//! produce them from a log-density expression over a particle's variables.

use crate::error::Result;
use crate::particles::{GradientSet, ParameterSet};
use candle_core::Tensor;
use rayon::prelude::*;

/// Back-propagate `log_prob` and collect one gradient per slot of `params`.
///
/// A non-scalar `log_prob` is summed first. Slots that do not take part in
/// the expression get a zero gradient.
pub fn log_prob_gradients(params: &ParameterSet, log_prob: &Tensor) -> Result<GradientSet> {
    let total = if log_prob.rank() == 0 {
        log_prob.clone()
    } else {
        log_prob.sum_all()?
    };
    let grads = total.backward()?;

    let mut out = Vec::with_capacity(params.num_slots());
    for var in params.vars() {
        let g = match grads.get(var.as_tensor()) {
            Some(g) => g.clone(),
            None => var.as_tensor().zeros_like()?,
        };
        out.push(g);
    }
    Ok(out)
}

/// Gradients for every particle, evaluated in parallel, in particle order
/// * `log_prob` - builds the log-density of one particle
pub fn ensemble_gradients<F>(particles: &[ParameterSet], log_prob: &F) -> Result<Vec<GradientSet>>
where
    F: Fn(&ParameterSet) -> candle_core::Result<Tensor> + Sync,
{
    particles
        .par_iter()
        .map(|p| {
            let lp = log_prob(p)?;
            log_prob_gradients(p, &lp)
        })
        .collect()
}
