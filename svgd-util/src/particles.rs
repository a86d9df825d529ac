use crate::error::{Mismatch, Result, SvgdError};
use crate::traits::GradientTransform;
use candle_core::{Tensor, Var};

/// One gradient tensor per parameter slot, aligned with a [`ParameterSet`].
pub type GradientSet = Vec<Tensor>;

/// Parameter tensors owned by one particle.
///
/// Slots keep the shape they were created with. `Var` handles are shared, so
/// a caller holding a clone of a slot sees every update applied to it.
#[derive(Clone, Debug)]
pub struct ParameterSet {
    vars: Vec<Var>,
}

impl ParameterSet {
    pub fn new(vars: Vec<Var>) -> Self {
        Self { vars }
    }

    /// Wrap copies of `tensors` as fresh variables
    pub fn from_tensors(tensors: &[Tensor]) -> Result<Self> {
        let vars = tensors
            .iter()
            .map(Var::from_tensor)
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars })
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn num_slots(&self) -> usize {
        self.vars.len()
    }

    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.vars.iter().map(|v| v.dims().to_vec()).collect()
    }

    /// Total number of scalar parameters across all slots
    pub fn dim(&self) -> usize {
        self.vars.iter().map(|v| v.elem_count()).sum()
    }

    /// Detached copies of the current slot values
    pub fn values(&self) -> Result<Vec<Tensor>> {
        Ok(self
            .vars
            .iter()
            .map(|v| v.as_tensor().copy())
            .collect::<candle_core::Result<Vec<_>>>()?)
    }

    /// Concatenate all slots, each in row-major order, into one `(d,)` vector
    pub fn flatten(&self) -> Result<Tensor> {
        let slots: Vec<&Tensor> = self.vars.iter().map(|v| v.as_tensor()).collect();
        flatten_slots(&slots)
    }

    /// Split a `(d,)` vector back into tensors shaped like the slots
    pub fn unflatten(&self, flat: &Tensor) -> Result<Vec<Tensor>> {
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.vars.len());
        for var in self.vars.iter() {
            let len = var.elem_count();
            out.push(flat.narrow(0, offset, len)?.reshape(var.dims())?);
            offset += len;
        }
        Ok(out)
    }
}

/// Concatenate tensors into one flat `(d,)` vector
pub fn flatten_slots<T: AsRef<Tensor>>(slots: &[T]) -> Result<Tensor> {
    if slots.is_empty() {
        return Err(SvgdError::EmptyParameterSet);
    }
    let flat = slots
        .iter()
        .map(|t| t.as_ref().flatten_all())
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::cat(&flat, 0)?)
}

/// Stack the flattened particle positions into an `(n, d)` matrix
pub fn stack_positions(particles: &[ParameterSet]) -> Result<Tensor> {
    let flat = particles
        .iter()
        .map(|p| p.flatten())
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&flat, 0)?)
}

/// Stack flattened gradient sets into an `(n, d)` matrix
pub fn stack_gradients(grads: &[GradientSet]) -> Result<Tensor> {
    let flat = grads
        .iter()
        .map(|g| flatten_slots(g))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&flat, 0)?)
}

/// Every particle must have the same slot count and slot shapes as particle 0.
pub fn check_homogeneous(particles: &[ParameterSet]) -> Result<()> {
    let first = particles.first().ok_or(SvgdError::EmptyEnsemble)?;
    if first.num_slots() == 0 {
        return Err(SvgdError::EmptyParameterSet);
    }
    let reference = first.shapes();

    for (i, p) in particles.iter().enumerate().skip(1) {
        let shapes = p.shapes();
        check_slots(i, &reference, &shapes)?;
    }
    Ok(())
}

/// Validate the ensemble and build one transform per particle
pub(crate) fn build_transforms<O, F>(particles: &[ParameterSet], make_transform: F) -> Result<Vec<O>>
where
    O: GradientTransform,
    F: FnMut(&ParameterSet) -> Result<O>,
{
    check_homogeneous(particles)?;
    particles.iter().map(make_transform).collect()
}

/// Gradient sets must mirror the particles slot by slot: shape, dtype
/// and device.
pub fn check_gradients(particles: &[ParameterSet], grads: &[GradientSet]) -> Result<()> {
    if grads.len() != particles.len() {
        return Err(Mismatch::ParticleCount {
            expected: particles.len(),
            got: grads.len(),
        }
        .into());
    }

    for (i, (p, g)) in particles.iter().zip(grads.iter()).enumerate() {
        let shapes: Vec<Vec<usize>> = g.iter().map(|t| t.dims().to_vec()).collect();
        check_slots(i, &p.shapes(), &shapes)?;

        for (slot, (var, t)) in p.vars().iter().zip(g.iter()).enumerate() {
            if var.dtype() != t.dtype() {
                return Err(Mismatch::SlotDType {
                    particle: i,
                    slot,
                    expected: var.dtype(),
                    got: t.dtype(),
                }
                .into());
            }
            let (expected, got) = (var.device().location(), t.device().location());
            if expected != got {
                return Err(Mismatch::SlotDevice {
                    particle: i,
                    slot,
                    expected,
                    got,
                }
                .into());
            }
        }
    }
    Ok(())
}

fn check_slots(particle: usize, expected: &[Vec<usize>], got: &[Vec<usize>]) -> Result<()> {
    if expected.len() != got.len() {
        return Err(Mismatch::SlotCount {
            particle,
            expected: expected.len(),
            got: got.len(),
        }
        .into());
    }
    for (slot, (e, g)) in expected.iter().zip(got.iter()).enumerate() {
        if e != g {
            return Err(Mismatch::SlotShape {
                particle,
                slot,
                expected: e.clone(),
                got: g.clone(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn particle(a: &[f32], b: &[f32]) -> ParameterSet {
        let dev = Device::Cpu;
        let t0 = Tensor::from_slice(a, (a.len(),), &dev).unwrap();
        let t1 = Tensor::from_slice(b, (b.len() / 2, 2), &dev).unwrap();
        ParameterSet::from_tensors(&[t0, t1]).unwrap()
    }

    #[test]
    fn test_flatten_unflatten() -> anyhow::Result<()> {
        let p = particle(&[1., 2.], &[3., 4., 5., 6.]);
        assert_eq!(p.dim(), 6);

        let flat = p.flatten()?;
        assert_eq!(flat.to_vec1::<f32>()?, vec![1., 2., 3., 4., 5., 6.]);

        let slots = p.unflatten(&flat)?;
        assert_eq!(slots[0].dims(), &[2]);
        assert_eq!(slots[1].dims(), &[2, 2]);
        assert_eq!(slots[1].to_vec2::<f32>()?, vec![vec![3., 4.], vec![5., 6.]]);
        Ok(())
    }

    #[test]
    fn test_shared_var_sees_updates() -> anyhow::Result<()> {
        let p = particle(&[1., 2.], &[0., 0.]);
        let handle = p.vars()[0].clone();
        let dev = Device::Cpu;
        p.vars()[0].set(&Tensor::new(&[7f32, 8.], &dev)?)?;
        assert_eq!(handle.as_tensor().to_vec1::<f32>()?, vec![7., 8.]);
        Ok(())
    }

    #[test]
    fn test_stack_positions() -> anyhow::Result<()> {
        let ps = vec![
            particle(&[1., 2.], &[0., 0.]),
            particle(&[3., 4.], &[1., 1.]),
        ];
        let x = stack_positions(&ps)?;
        assert_eq!(x.dims(), &[2, 4]);
        assert_eq!(x.to_vec2::<f32>()?[1], vec![3., 4., 1., 1.]);
        Ok(())
    }

    #[test]
    fn test_heterogeneous_particles() {
        let ps = vec![
            particle(&[1., 2.], &[0., 0.]),
            particle(&[1., 2., 3.], &[0., 0.]),
        ];
        match check_homogeneous(&ps) {
            Err(SvgdError::ShapeMismatch(Mismatch::SlotShape { particle, slot, .. })) => {
                assert_eq!((particle, slot), (1, 0));
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            check_homogeneous(&[]),
            Err(SvgdError::EmptyEnsemble)
        ));
        assert!(matches!(
            check_homogeneous(&[ParameterSet::new(vec![])]),
            Err(SvgdError::EmptyParameterSet)
        ));
    }

    #[test]
    fn test_gradient_mismatch() -> anyhow::Result<()> {
        let ps = vec![particle(&[1., 2.], &[0., 0.])];
        let dev = Device::Cpu;

        let missing = vec![vec![Tensor::zeros(2, candle_core::DType::F32, &dev)?]];
        assert!(matches!(
            check_gradients(&ps, &missing),
            Err(SvgdError::ShapeMismatch(Mismatch::SlotCount { .. }))
        ));

        assert!(matches!(
            check_gradients(&ps, &[]),
            Err(SvgdError::ShapeMismatch(Mismatch::ParticleCount { .. }))
        ));

        let wrong_dtype = vec![vec![
            Tensor::zeros(2, candle_core::DType::F32, &dev)?,
            Tensor::zeros((1, 2), candle_core::DType::F64, &dev)?,
        ]];
        match check_gradients(&ps, &wrong_dtype) {
            Err(SvgdError::ShapeMismatch(Mismatch::SlotDType { particle, slot, .. })) => {
                assert_eq!((particle, slot), (0, 1));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let good = vec![vec![
            Tensor::zeros(2, candle_core::DType::F32, &dev)?,
            Tensor::zeros((1, 2), candle_core::DType::F32, &dev)?,
        ]];
        check_gradients(&ps, &good)?;
        Ok(())
    }
}
