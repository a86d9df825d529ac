use crate::error::Result;
use crate::traits::GradientTransform;
use candle_core::{Tensor, Var};

/// Configuration for the Adagrad ascent transform.
///
/// With `decay = None` the squared-gradient history is the running sum
/// `G ← G + g²`. With `decay = Some(α)` it is the exponentially weighted
/// history `G ← α G + (1 − α) g²`, started from `G = g²` at the first step.
#[derive(Clone, Debug)]
pub struct AdagradConfig {
    pub learning_rate: f64,
    pub eps: f64,
    pub decay: Option<f64>,
}

impl Default for AdagradConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            eps: 1e-8,
            decay: None,
        }
    }
}

impl AdagradConfig {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Default::default()
        }
    }

    pub fn decay(mut self, alpha: f64) -> Self {
        self.decay = Some(alpha);
        self
    }

    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }
}

#[derive(Debug)]
struct VarAdagrad {
    var: Var,
    sum_sq: Tensor,
}

/// Adagrad applied as gradient *ascent*:
/// `θ ← θ + lr · g / (√G + ε)`
#[derive(Debug)]
pub struct Adagrad {
    vars: Vec<VarAdagrad>,
    config: AdagradConfig,
    step_t: usize,
}

impl Adagrad {
    /// Squared-gradient history `G`, one tensor per slot
    pub fn history(&self) -> Vec<&Tensor> {
        self.vars.iter().map(|v| &v.sum_sq).collect()
    }

    pub fn step_count(&self) -> usize {
        self.step_t
    }

    pub fn config(&self) -> &AdagradConfig {
        &self.config
    }
}

impl GradientTransform for Adagrad {
    type Config = AdagradConfig;

    fn new(vars: Vec<Var>, config: AdagradConfig) -> Result<Self> {
        let vars = vars
            .into_iter()
            .map(|var| {
                let sum_sq = var.as_tensor().zeros_like()?;
                Ok(VarAdagrad { var, sum_sq })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            config,
            step_t: 0,
        })
    }

    fn apply(&mut self, directions: &[Tensor]) -> Result<()> {
        if directions.len() != self.vars.len() {
            return Err(candle_core::Error::Msg(format!(
                "adagrad: expected {} directions, got {}",
                self.vars.len(),
                directions.len()
            ))
            .into());
        }

        let step_t = self.step_t + 1;
        let lr = self.config.learning_rate;
        let eps = self.config.eps;

        // every slot is computed before any is written
        let mut staged = Vec::with_capacity(self.vars.len());
        for (v, g) in self.vars.iter().zip(directions.iter()) {
            let g2 = g.sqr()?;
            let sum_sq = match self.config.decay {
                None => (&v.sum_sq + g2)?,
                Some(_) if step_t == 1 => g2,
                Some(alpha) => ((&v.sum_sq * alpha)? + (g2 * (1.0 - alpha))?)?,
            };
            let update = ((g / (sum_sq.sqrt()? + eps)?)? * lr)?;
            let value = (v.var.as_tensor() + update)?.detach();
            staged.push((value, sum_sq));
        }

        for (v, (value, sum_sq)) in self.vars.iter_mut().zip(staged) {
            v.var.set(&value)?;
            v.sum_sq = sum_sq;
        }
        self.step_t = step_t;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }
}
