//! Error types for particle updates.

use candle_core::{DType, DeviceLocation};
use thiserror::Error;

/// Which structural property of an ensemble disagreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// Number of gradient sets differs from the number of particles.
    ParticleCount { expected: usize, got: usize },

    /// A particle (or its gradient set) has a different number of slots.
    SlotCount {
        particle: usize,
        expected: usize,
        got: usize,
    },

    /// A parameter or gradient tensor has a different shape than slot `slot`
    /// of particle 0.
    SlotShape {
        particle: usize,
        slot: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// A gradient tensor has a different element type than its slot.
    SlotDType {
        particle: usize,
        slot: usize,
        expected: DType,
        got: DType,
    },

    /// A gradient tensor lives on a different device than its slot.
    SlotDevice {
        particle: usize,
        slot: usize,
        expected: DeviceLocation,
        got: DeviceLocation,
    },

    /// A flattened position vector handed to the kernel has a different
    /// dimension.
    PositionDim {
        index: usize,
        expected: usize,
        got: usize,
    },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::ParticleCount { expected, got } => {
                write!(f, "expected {} particles, got {}", expected, got)
            }
            Mismatch::SlotCount {
                particle,
                expected,
                got,
            } => write!(
                f,
                "particle {}: expected {} parameter slots, got {}",
                particle, expected, got
            ),
            Mismatch::SlotShape {
                particle,
                slot,
                expected,
                got,
            } => write!(
                f,
                "particle {}, slot {}: expected shape {:?}, got {:?}",
                particle, slot, expected, got
            ),
            Mismatch::SlotDType {
                particle,
                slot,
                expected,
                got,
            } => write!(
                f,
                "particle {}, slot {}: expected dtype {:?}, got {:?}",
                particle, slot, expected, got
            ),
            Mismatch::SlotDevice {
                particle,
                slot,
                expected,
                got,
            } => write!(
                f,
                "particle {}, slot {}: expected device {:?}, got {:?}",
                particle, slot, expected, got
            ),
            Mismatch::PositionDim {
                index,
                expected,
                got,
            } => write!(
                f,
                "position {}: expected dimension {}, got {}",
                index, expected, got
            ),
        }
    }
}

/// Errors raised by the kernel, the gradient transforms and the update rules.
#[derive(Debug, Error)]
pub enum SvgdError {
    /// An update rule needs at least one particle.
    #[error("ensemble cannot be empty")]
    EmptyEnsemble,

    /// A particle must own at least one parameter tensor.
    #[error("parameter set cannot be empty")]
    EmptyParameterSet,

    /// Particles or gradients are not structurally homogeneous.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(Mismatch),

    /// Failure inside the tensor backend.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl SvgdError {
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, SvgdError::ShapeMismatch(_))
    }
}

impl From<Mismatch> for SvgdError {
    fn from(m: Mismatch) -> Self {
        SvgdError::ShapeMismatch(m)
    }
}

pub type Result<T> = std::result::Result<T, SvgdError>;
