use crate::error::Result;
use crate::particles::{stack_positions, ParameterSet};
use candle_core::DType;

/// Snapshot of flattened particle positions with per-coordinate statistics.
pub struct EnsembleSummary {
    positions: Vec<Vec<f32>>,
}

impl EnsembleSummary {
    pub fn from_particles(particles: &[ParameterSet]) -> Result<Self> {
        if particles.is_empty() {
            return Ok(Self { positions: vec![] });
        }
        let x_nd = stack_positions(particles)?.to_dtype(DType::F32)?;
        Ok(Self {
            positions: x_nd.to_vec2::<f32>()?,
        })
    }

    pub fn num_particles(&self) -> usize {
        self.positions.len()
    }

    pub fn dim(&self) -> usize {
        self.positions.first().map(|x| x.len()).unwrap_or(0)
    }

    /// Values of coordinate `j` across particles, `None` if `j >= dim()`
    pub fn coordinate(&self, j: usize) -> Option<Vec<f32>> {
        if j >= self.dim() {
            return None;
        }
        Some(self.column(j))
    }

    fn column(&self, j: usize) -> Vec<f32> {
        self.positions.iter().map(|x| x[j]).collect()
    }

    /// Element-wise mean across particles.
    pub fn mean(&self) -> Vec<f32> {
        let n = self.num_particles();
        if n == 0 {
            return vec![];
        }
        let mut mean = vec![0.0f32; self.dim()];
        for x in &self.positions {
            for (m, &v) in mean.iter_mut().zip(x.iter()) {
                *m += v;
            }
        }
        let inv_n = 1.0 / n as f32;
        for m in &mut mean {
            *m *= inv_n;
        }
        mean
    }

    /// Element-wise variance across particles (`n - 1` denominator).
    pub fn variance(&self) -> Vec<f32> {
        let n = self.num_particles();
        if n < 2 {
            return vec![];
        }
        let mean = self.mean();
        let mut var = vec![0.0f32; mean.len()];
        for x in &self.positions {
            for ((v, &xi), &mi) in var.iter_mut().zip(x.iter()).zip(mean.iter()) {
                let diff = xi - mi;
                *v += diff * diff;
            }
        }
        let inv = 1.0 / (n - 1) as f32;
        for v in &mut var {
            *v *= inv;
        }
        var
    }

    /// Element-wise quantile (0 <= q <= 1) across particles.
    pub fn quantile(&self, q: f32) -> Vec<f32> {
        let n = self.num_particles();
        if n == 0 {
            return vec![];
        }
        (0..self.dim())
            .map(|j| {
                let mut vals = self.column(j);
                vals.sort_unstable_by(|a, b| a.total_cmp(b));
                let idx = (q * (n - 1) as f32).clamp(0.0, (n - 1) as f32);
                let lo = idx.floor() as usize;
                let hi = idx.ceil() as usize;
                if lo == hi {
                    vals[lo]
                } else {
                    let frac = idx - lo as f32;
                    vals[lo] * (1.0 - frac) + vals[hi] * frac
                }
            })
            .collect()
    }
}

/// Gaussian kernel density estimate of `values` at each grid point
pub fn gaussian_kde(values: &[f32], grid: &[f32], bw: f32) -> Vec<f32> {
    let norm = 1.0 / (values.len() as f32 * bw * (2.0 * std::f32::consts::PI).sqrt());
    grid.iter()
        .map(|&g| {
            values
                .iter()
                .map(|&v| {
                    let z = (g - v) / bw;
                    (-0.5 * z * z).exp()
                })
                .sum::<f32>()
                * norm
        })
        .collect()
}

/// Location of the highest KDE peak within `[lo, hi]`
pub fn kde_mode(values: &[f32], lo: f32, hi: f32, bw: f32) -> f32 {
    const NGRID: usize = 401;
    let step = (hi - lo) / (NGRID - 1) as f32;
    let grid: Vec<f32> = (0..NGRID).map(|k| lo + step * k as f32).collect();
    let density = gaussian_kde(values, &grid, bw);

    let mut best = 0;
    for (k, &d) in density.iter().enumerate() {
        if d > density[best] {
            best = k;
        }
    }
    grid[best]
}
