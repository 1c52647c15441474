//! GPU-accelerated convolution using WGPU.
//!
//! This module runs the convolution forward pass as a WGSL compute shader.
//! It handles device acquisition, shader validation and compilation, launch
//! grid sizing and the upload / launch / readback sequence:
//!
//! 1. upload input, weight and bias into read-only storage buffers and
//!    allocate an uninitialised output buffer
//! 2. bind the four buffers and the seven layer dimensions to the
//!    `conv2d_forward` entry point
//! 3. launch a 16×16-tiled grid covering `oWidth × (oDepth * oHeight)`
//! 4. wait for completion (timed) and read the output back
//!
//! Unlike a process-wide context, every [`ConvDevice`] owns its own device
//! and queue; dropping it releases them. Only the `wgpu::Instance` is shared.
//!
//! Every backend call that can fail is wrapped in a WGPU error scope, so a
//! rejected call surfaces as a [`DeviceError`] instead of a panic in the
//! uncaptured-error handler.

use crate::error::DeviceError;
use briny::prelude::*;

mod conv2d;
pub use self::conv2d::{check_limits, launch_grid, round_up, ConvDevice, ConvDims, LaunchGrid};

const CONV2D: &str = include_str!("shaders/conv2d.wgsl");

/// Edge of the square workgroup the kernel is tiled into.
pub const WORKGROUP_SIZE: u32 = 16;

/// Name of the kernel entry point in the shader module.
pub const ENTRY_POINT: &str = "conv2d_forward";

lazy_static::lazy_static! {
    static ref INSTANCE: wgpu::Instance = wgpu::Instance::default();
}

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Owned by exactly one [`ConvDevice`]; the device is destroyed on drop.
pub struct GpuContext {
    /// Information about the selected adapter.
    pub adapter: wgpu::AdapterInfo,
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The queue kernels and copies are submitted to.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and opens a device + queue on it.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::Adapter`] if no adapter is available
    /// - [`DeviceError::RequestDevice`] if the adapter refuses to open a device
    pub fn new() -> Result<Self, DeviceError> {
        let adapter = pollster::block_on(
            INSTANCE.request_adapter(&wgpu::RequestAdapterOptions::default()),
        )
        .inspect_err(|e| tracing::error!(%e, "failed requesting an adapter"))?;

        let info = adapter.get_info();
        tracing::info!(name = %info.name, backend = ?info.backend, "selected adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("briny_conv"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .inspect_err(|e| tracing::error!(%e, "failed opening the device"))?;

        Ok(Self {
            adapter: info,
            device,
            queue,
        })
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        tracing::debug!(name = %self.adapter.name, "releasing device");
        self.device.destroy();
    }
}

/// Wrapper for WGSL source code checked before compilation.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 {
            return Err(ValidationError);
        }

        if !src.contains(&format!("fn {ENTRY_POINT}")) {
            return Err(ValidationError);
        }

        // no source inclusion
        if src.contains("#include") || src.contains("import ") {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// Validates and compiles a WGSL shader module.
///
/// # Errors
///
/// Returns [`DeviceError::Validation`] if the source fails the pre-check or
/// the device rejects it.
pub fn load_shader(
    device: &wgpu::Device,
    label: &'static str,
    source: &str,
) -> Result<wgpu::ShaderModule, DeviceError> {
    WgslSource(source)
        .validate()
        .map_err(|_| DeviceError::Validation {
            step: "shader validation",
            message: format!("`{label}` is not a valid kernel source"),
        })?;

    scoped(device, "shader compilation", || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    })
}

/// Runs `f` inside validation and out-of-memory error scopes.
///
/// # Errors
///
/// Returns [`DeviceError::Validation`] or [`DeviceError::OutOfMemory`] naming
/// `step` if the device reported an error while `f` ran.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    step: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T, DeviceError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let value = f();

    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());

    if let Some(err) = validation {
        tracing::error!(step, %err, "device rejected call");
        return Err(DeviceError::Validation {
            step,
            message: err.to_string(),
        });
    }
    if oom.is_some() {
        tracing::error!(step, "device out of memory");
        return Err(DeviceError::OutOfMemory { step });
    }

    Ok(value)
}
