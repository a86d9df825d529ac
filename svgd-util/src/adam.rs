use crate::error::Result;
use crate::traits::GradientTransform;
use candle_core::{Tensor, Var};

#[derive(Clone, Debug)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl AdamConfig {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct VarAdam {
    var: Var,
    first_moment: Tensor,
    second_moment: Tensor,
}

/// Adam with bias correction, applied as ascent:
/// `θ ← θ + lr · m̂ / (√v̂ + ε)`
#[derive(Debug)]
pub struct Adam {
    vars: Vec<VarAdam>,
    config: AdamConfig,
    step_t: usize,
}

impl Adam {
    pub fn step_count(&self) -> usize {
        self.step_t
    }
}

impl GradientTransform for Adam {
    type Config = AdamConfig;

    fn new(vars: Vec<Var>, config: AdamConfig) -> Result<Self> {
        let vars = vars
            .into_iter()
            .map(|var| {
                let first_moment = var.as_tensor().zeros_like()?;
                let second_moment = var.as_tensor().zeros_like()?;
                Ok(VarAdam {
                    var,
                    first_moment,
                    second_moment,
                })
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
                "adam: expected {} directions, got {}",
                self.vars.len(),
                directions.len()
            ))
            .into());
        }

        let step_t = self.step_t + 1;
        let AdamConfig {
            learning_rate: lr,
            beta1,
            beta2,
            eps,
        } = self.config;
        let scale_m = 1.0 / (1.0 - beta1.powi(step_t as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(step_t as i32));

        let mut staged = Vec::with_capacity(self.vars.len());
        for (v, g) in self.vars.iter().zip(directions.iter()) {
            let m = ((&v.first_moment * beta1)? + (g * (1.0 - beta1))?)?;
            let s = ((&v.second_moment * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&m * scale_m)?;
            let v_hat = (&s * scale_v)?;
            let update = ((m_hat / (v_hat.sqrt()? + eps)?)? * lr)?;
            let value = (v.var.as_tensor() + update)?.detach();
            staged.push((value, m, s));
        }

        for (v, (value, m, s)) in self.vars.iter_mut().zip(staged) {
            v.var.set(&value)?;
            v.first_moment = m;
            v.second_moment = s;
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn test_first_step_moves_by_lr() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x = Var::from_tensor(&Tensor::new(&[1f32, 1.0, 1.0], &dev)?)?;
        let mut opt = Adam::new(vec![x.clone()], AdamConfig::new(0.01))?;

        opt.apply(&[Tensor::new(&[3f32, -0.5, 0.0], &dev)?])?;
        let v = x.as_tensor().to_vec1::<f32>()?;
        // bias correction makes the first step ±lr regardless of magnitude
        assert_abs_diff_eq!(v[0], 1.01, epsilon = 1e-5);
        assert_abs_diff_eq!(v[1], 0.99, epsilon = 1e-5);
        assert_eq!(v[2], 1.0);
        assert_eq!(opt.step_count(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_step_leaves_state() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let a = Var::from_tensor(&Tensor::new(&[0f32], &dev)?)?;
        let b = Var::from_tensor(&Tensor::new(&[0f32], &dev)?)?;
        let mut opt = Adam::new(vec![a.clone(), b], AdamConfig::new(0.1))?;

        let mixed = [Tensor::new(&[1f32], &dev)?, Tensor::new(&[1f64], &dev)?];
        assert!(opt.apply(&mixed).is_err());
        assert_eq!(a.as_tensor().to_vec1::<f32>()?, vec![0.0]);
        assert_eq!(opt.step_count(), 0);
        Ok(())
    }

    #[test]
    fn test_ascends_quadratic() -> anyhow::Result<()> {
        // maximise -(x - 3)²
        let dev = Device::Cpu;
        let x = Var::from_tensor(&Tensor::new(&[0f32], &dev)?)?;
        let mut opt = Adam::new(vec![x.clone()], AdamConfig::new(0.1))?;
        for _ in 0..500 {
            let g = ((x.as_tensor() - 3.0)? * -2.0)?;
            opt.apply(&[g])?;
        }
        assert_abs_diff_eq!(x.as_tensor().to_vec1::<f32>()?[0], 3.0, epsilon = 0.05);
        Ok(())
    }
}
