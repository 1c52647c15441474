//! briny_conv: a 2D convolution layer with CPU and WebGPU forward passes.
//!
//! A [`Conv2d`] holds fixed shape parameters, weights and bias, and computes
//! a valid-mode, stride-1 convolution followed by a sigmoid. The forward
//! pass runs either on the CPU (multi-threaded through `rayon`) or as a WGSL
//! compute kernel dispatched through `wgpu`; both read the same flat
//! layouts and agree within a small tolerance.
//!
//! # Modules
//!
//! - [`volume`]: Shapes and flat `[depth][height][width]` volumes.
//! - [`layer`]: The [`Layer`] trait, [`ConvParams`] and [`Conv2d`].
//! - [`ops`]: The CPU and device forward-pass engines.
//! - [`backend`]: Process-wide backend selection (`BRINY_CONV_BACKEND`).
//! - [`descriptor`]: JSON layer descriptors.
//! - [`error`]: Configuration, device and layer errors.
//! - [`approx`]: Tolerance-based comparison of outputs.
//! - [`telemetry`]: Optional `tracing` subscriber setup.
//!
//! # Example
//!
//! ```rust
//! use briny_conv::{Conv2d, ConvParams, Shape, Volume};
//!
//! let params = ConvParams::new(Shape::new(3, 3, 1), 2, 1).unwrap();
//! let mut conv = Conv2d::new(params, vec![1.0, 0.0, 0.0, 1.0], vec![0.0]).unwrap();
//!
//! let input = Volume::new(Shape::new(3, 3, 1), (1..=9).map(|x| x as f32).collect()).unwrap();
//! let out = conv.forward_cpu(&input).unwrap();
//! assert!(out.data().iter().all(|&y| y > 0.99));
//! ```
//!
//! # Feature Flags
//!
//! - `wgpu` *(default)*: Enables the device path. Without it every device
//!   call returns [`DeviceError::Unavailable`].

pub mod approx;
pub mod backend;
pub mod descriptor;
pub mod error;
pub mod layer;
pub mod ops;
pub mod telemetry;
pub mod volume;

pub use backend::Backend;
pub use descriptor::ConvDescriptor;
pub use error::{ConfigError, DeviceError, LayerError};
pub use layer::{Conv2d, ConvParams, Layer};
pub use volume::{Shape, Volume};
