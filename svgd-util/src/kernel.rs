//! RBF kernel over particle positions with the median bandwidth heuristic.
//!
//! For flattened positions `x_1, …, x_n`:
//!
//! * `d2[i][j] = ‖x_i − x_j‖²`
//! * `h = median{d2[i][j] : j < i} / ln n`
//! * `K[i][j] = exp(−d2[i][j] / h)`
//! * `∇_{x_j} K[j][i] = −K[j][i] · (2/h) · (x_j − x_i)`
//!
//! The heuristic is undefined for `n < 2` (`ln 1 = 0`) and collapses to zero
//! when most particles coincide. In both cases `h` falls back to
//! [`MIN_BANDWIDTH`]; with a single particle there is no kernel interaction
//! at all (`K = [[1]]`, zero kernel gradient).

use crate::error::{Mismatch, Result, SvgdError};
use candle_core::{DType, Tensor};
use log::debug;

/// Bandwidth used whenever the heuristic cannot produce a positive value.
pub const MIN_BANDWIDTH: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Bandwidth {
    /// Recompute `h` from the current positions on every call
    #[default]
    Median,
    /// Use a fixed `h`
    Fixed(f64),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RbfKernel {
    pub bandwidth: Bandwidth,
}

/// Kernel matrix and bandwidth for one set of positions.
///
/// Lives for a single update; nothing here is carried across iterations.
#[derive(Clone, Debug)]
pub struct KernelOutput {
    /// `(n, n)` similarities, symmetric with unit diagonal
    pub kxy: Tensor,
    pub bandwidth: f64,
    positions: Tensor,
}

impl RbfKernel {
    pub fn new(bandwidth: Bandwidth) -> Self {
        Self { bandwidth }
    }

    pub fn fixed(h: f64) -> Self {
        Self::new(Bandwidth::Fixed(h))
    }

    /// Kernel over a sequence of position vectors of equal dimension
    pub fn compute(&self, positions: &[Tensor]) -> Result<KernelOutput> {
        let first = positions.first().ok_or(SvgdError::EmptyEnsemble)?;
        let d = first.elem_count();
        let mut flat = Vec::with_capacity(positions.len());
        for (index, x) in positions.iter().enumerate() {
            if x.elem_count() != d {
                return Err(Mismatch::PositionDim {
                    index,
                    expected: d,
                    got: x.elem_count(),
                }
                .into());
            }
            flat.push(x.flatten_all()?);
        }
        self.compute_stacked(&Tensor::stack(&flat, 0)?)
    }

    /// Kernel over the rows of an `(n, d)` position matrix
    pub fn compute_stacked(&self, x_nd: &Tensor) -> Result<KernelOutput> {
        let n = x_nd.dim(0)?;
        if n == 0 {
            return Err(SvgdError::EmptyEnsemble);
        }

        let d2 = pairwise_sq_distances(x_nd)?;

        let h = match self.bandwidth {
            Bandwidth::Fixed(h) => floor_bandwidth(h),
            Bandwidth::Median => median_heuristic(&d2)?,
        };

        let kxy = d2.affine(-1.0 / h, 0.0)?.exp()?;

        Ok(KernelOutput {
            kxy,
            bandwidth: h,
            positions: x_nd.clone(),
        })
    }
}

impl KernelOutput {
    pub fn num_particles(&self) -> usize {
        self.kxy.dims()[0]
    }

    /// Aggregated kernel gradient for every particle:
    /// `Σ_j ∇_{x_j} K[j][i] = (2/h) (x_i Σ_j K[j][i] − Σ_j K[j][i] x_j)`,
    /// shape `(n, d)`
    pub fn repulsion(&self) -> Result<Tensor> {
        if self.num_particles() < 2 {
            return Ok(self.positions.zeros_like()?);
        }
        let k_sum = self.kxy.sum(0)?.unsqueeze(1)?;
        let kx = self.kxy.t()?.matmul(&self.positions)?;
        let rep = (self.positions.broadcast_mul(&k_sum)? - kx)?;
        Ok((rep * (2.0 / self.bandwidth))?)
    }

    /// Pairwise kernel gradients `∇_{x_j} K[j][i]` at entry `[j, i, :]`,
    /// shape `(n, n, d)`. Memory grows with `n²d`; prefer [`Self::repulsion`]
    /// for large particles.
    pub fn kernel_gradients(&self) -> Result<Tensor> {
        let diff = self
            .positions
            .unsqueeze(1)?
            .broadcast_sub(&self.positions.unsqueeze(0)?)?;
        let grad = diff.broadcast_mul(&self.kxy.unsqueeze(2)?)?;
        Ok((grad * (-2.0 / self.bandwidth))?)
    }
}

/// Fixed bandwidths that are not positive and finite fall back to
/// [`MIN_BANDWIDTH`], so `K` stays in `(0, 1]` with a unit diagonal.
fn floor_bandwidth(h: f64) -> f64 {
    if h.is_finite() && h > MIN_BANDWIDTH {
        h
    } else {
        debug!(
            "fixed bandwidth {:.4e}: bandwidth set to {:.1e}",
            h, MIN_BANDWIDTH
        );
        MIN_BANDWIDTH
    }
}

/// Squared Euclidean distances between rows of `x_nd`.
///
/// Uses `‖x_i‖² + ‖x_j‖² − 2 x_i·x_j` accumulated in `f64`, clamped at zero,
/// symmetrised and with an exactly zero diagonal, then cast back to the
/// dtype of `x_nd`. Metal has no `f64` kernels and stays in the input dtype.
pub fn pairwise_sq_distances(x_nd: &Tensor) -> Result<Tensor> {
    let n = x_nd.dim(0)?;
    let acc = if x_nd.device().is_metal() {
        x_nd.dtype()
    } else {
        DType::F64
    };
    let x = x_nd.to_dtype(acc)?;
    let sq = x.sqr()?.sum_keepdim(1)?;
    let dot = x.matmul(&x.t()?)?;
    let d2 = (sq.broadcast_add(&sq.t()?)? - (dot * 2.0)?)?.relu()?;
    let d2 = ((&d2 + &d2.t()?)? * 0.5)?;
    let off_diag = (1.0 - Tensor::eye(n, acc, x.device())?)?;
    Ok((d2 * off_diag)?.to_dtype(x_nd.dtype())?)
}

/// `h = median(lower triangle of d2) / ln n`, floored at [`MIN_BANDWIDTH`]
pub fn median_heuristic(d2: &Tensor) -> Result<f64> {
    let n = d2.dim(0)?;
    if n < 2 {
        debug!("single particle: bandwidth set to {:.1e}", MIN_BANDWIDTH);
        return Ok(MIN_BANDWIDTH);
    }

    let rows = d2.to_dtype(DType::F64)?.to_vec2::<f64>()?;
    let mut lower: Vec<f64> = rows
        .iter()
        .enumerate()
        .flat_map(|(i, row)| row[..i].iter().copied())
        .collect();
    lower.sort_unstable_by(|a, b| a.total_cmp(b));

    let m = lower.len();
    let med = if m % 2 == 1 {
        lower[m / 2]
    } else {
        0.5 * (lower[m / 2 - 1] + lower[m / 2])
    };

    let h = med / (n as f64).ln();
    if h > MIN_BANDWIDTH {
        debug!("median heuristic: h = {:.4e} (n = {})", h, n);
        Ok(h)
    } else {
        debug!(
            "degenerate median distance {:.4e}: bandwidth set to {:.1e}",
            med, MIN_BANDWIDTH
        );
        Ok(MIN_BANDWIDTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    fn positions(rows: &[[f32; 2]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (rows.len(), 2), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_symmetric_unit_diagonal() -> anyhow::Result<()> {
        let x = positions(&[[0.3, -1.2], [2.5, 0.1], [-0.7, 0.9], [1.1, 1.1], [4.0, -3.0]]);
        let out = RbfKernel::default().compute_stacked(&x)?;
        let k = out.kxy.to_vec2::<f32>()?;

        for i in 0..5 {
            assert_eq!(k[i][i], 1.0);
            for j in 0..5 {
                assert_eq!(k[i][j], k[j][i]);
                assert!(k[i][j] >= 0.0 && k[i][j] <= 1.0);
            }
        }
        Ok(())
    }

    #[test]
    fn test_median_bandwidth() -> anyhow::Result<()> {
        // unit square: squared distances 1,1,1,1,2,2
        let x = positions(&[[0., 0.], [1., 0.], [0., 1.], [1., 1.]]);
        let out = RbfKernel::default().compute_stacked(&x)?;
        assert_abs_diff_eq!(out.bandwidth, 1.0 / 4f64.ln(), epsilon = 1e-6);

        let k = out.kxy.to_vec2::<f32>()?;
        assert_abs_diff_eq!(k[0][1], (-4f32.ln()).exp(), epsilon = 1e-5);
        assert_abs_diff_eq!(k[0][3], (-2.0 * 4f32.ln()).exp(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_single_particle() -> anyhow::Result<()> {
        let x = positions(&[[3.0, -1.0]]);
        let out = RbfKernel::default().compute_stacked(&x)?;
        assert_eq!(out.bandwidth, MIN_BANDWIDTH);
        assert_eq!(out.kxy.to_vec2::<f32>()?, vec![vec![1.0]]);
        assert_eq!(out.repulsion()?.to_vec2::<f32>()?, vec![vec![0.0, 0.0]]);
        Ok(())
    }

    #[test]
    fn test_identical_particles() -> anyhow::Result<()> {
        let x = positions(&[[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]]);
        let out = RbfKernel::default().compute_stacked(&x)?;
        assert_eq!(out.bandwidth, MIN_BANDWIDTH);
        for row in out.kxy.to_vec2::<f32>()? {
            assert_eq!(row, vec![1.0, 1.0, 1.0]);
        }
        for row in out.repulsion()?.to_vec2::<f32>()? {
            assert_abs_diff_eq!(row[0], 0.0);
            assert_abs_diff_eq!(row[1], 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_two_point_repulsion() -> anyhow::Result<()> {
        let x = Tensor::new(&[[0f32], [1.0]], &Device::Cpu)?;
        let out = RbfKernel::fixed(1.0).compute_stacked(&x)?;
        let rep = out.repulsion()?.to_vec2::<f32>()?;
        let e = (-1f32).exp();
        // particles are pushed apart
        assert_abs_diff_eq!(rep[0][0], -2.0 * e, epsilon = 1e-6);
        assert_abs_diff_eq!(rep[1][0], 2.0 * e, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_repulsion_matches_pairwise_gradients() -> anyhow::Result<()> {
        let x = positions(&[[0.3, -1.2], [2.5, 0.1], [-0.7, 0.9], [1.1, 1.1]]);
        let out = RbfKernel::default().compute_stacked(&x)?;
        let summed = out.kernel_gradients()?.sum(0)?.to_vec2::<f32>()?;
        let rep = out.repulsion()?.to_vec2::<f32>()?;
        for (a, b) in summed.iter().zip(rep.iter()) {
            for (u, v) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(u, v, epsilon = 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_fixed_bandwidth_floored() -> anyhow::Result<()> {
        let x = Tensor::new(&[[0f32], [1.0]], &Device::Cpu)?;
        for h in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let out = RbfKernel::fixed(h).compute_stacked(&x)?;
            assert_eq!(out.bandwidth, MIN_BANDWIDTH);
            let k = out.kxy.to_vec2::<f32>()?;
            assert_eq!(k, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        }
        Ok(())
    }

    #[test]
    fn test_distances_far_from_origin() -> anyhow::Result<()> {
        // large norms, small separations: f32 cancellation would swamp d2
        let xs = [4096.1f32, 4096.2, 4096.35];
        let x = Tensor::from_slice(&xs, (3, 1), &Device::Cpu)?;
        let d2 = pairwise_sq_distances(&x)?.to_vec2::<f32>()?;
        for i in 0..3 {
            for j in 0..3 {
                let diff = xs[i] as f64 - xs[j] as f64;
                assert_abs_diff_eq!(d2[i][j], (diff * diff) as f32, epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_inconsistent_dimension() {
        let dev = Device::Cpu;
        let xs = vec![
            Tensor::new(&[1f32, 2.0], &dev).unwrap(),
            Tensor::new(&[1f32, 2.0, 3.0], &dev).unwrap(),
        ];
        match RbfKernel::default().compute(&xs) {
            Err(SvgdError::ShapeMismatch(Mismatch::PositionDim { index, expected, got })) => {
                assert_eq!((index, expected, got), (1, 2, 3));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
