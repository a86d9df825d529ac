pub mod adagrad;
pub mod adam;
pub mod autodiff;
pub mod cli;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod kernel;
pub mod particles;
pub mod sampling;
pub mod summary;
pub mod svgd;
pub mod traits;

pub use adagrad::{Adagrad, AdagradConfig};
pub use adam::{Adam, AdamConfig};
pub use autodiff::{ensemble_gradients, log_prob_gradients};
pub use ensemble::Ensemble;
pub use error::{Mismatch, SvgdError};
pub use kernel::{Bandwidth, KernelOutput, RbfKernel, MIN_BANDWIDTH};
pub use particles::{GradientSet, ParameterSet};
pub use svgd::Svgd;
pub use traits::{GradientTransform, UpdateRule};

pub use candle_core;
pub use candle_nn;
