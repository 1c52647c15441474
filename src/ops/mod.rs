//! # Convolution Engines
//!
//! This module holds the two implementations of the convolution forward pass.
//! [`Conv2d`](crate::layer::Conv2d) selects between them per call.
//!
//! ## Submodules
//!
//! - [`cpu`]: Multi-threaded CPU reference path (default backend)
//! - [`wgpu`] *(default feature)*: WGSL compute kernel dispatched through `wgpu`
//!
//! ## Notes
//!
//! - Both engines read the same flat layouts: input `[iDepth][iHeight][iWidth]`,
//!   weight `[oDepth][iDepth][k][k]`, output `[oDepth][oHeight][oWidth]`
//! - Results agree within [`DEVICE_TOLERANCE`](crate::approx::DEVICE_TOLERANCE)
//!
//! ## Feature Flags
//!
//! - `wgpu`: Enables the `wgpu` (WebGPU) backend

pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu;
