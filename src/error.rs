//! Error types for layer configuration, device execution and forward calls.
//!
//! Configuration errors are caller-correctable and come back from constructors
//! and the descriptor loader. Device errors make the current device call fail;
//! the caller decides whether to retry, fall back to the CPU path or abort.

use crate::volume::Shape;
use thiserror::Error;

/// A malformed or size-mismatched layer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A shape dimension, the kernel size or the output depth is zero.
    #[error("zero-sized dimension in input {input} (kernel {kernel_size}, output depth {output_depth})")]
    ZeroDimension {
        /// Input shape as given.
        input: Shape,
        /// Kernel edge as given.
        kernel_size: usize,
        /// Output depth as given.
        output_depth: usize,
    },
    /// The kernel does not fit inside the input feature map.
    #[error("kernel size {kernel} exceeds input feature map {width}x{height}")]
    KernelTooLarge {
        /// Kernel edge.
        kernel: usize,
        /// Input width.
        width: usize,
        /// Input height.
        height: usize,
    },
    /// The weight tensor has the wrong number of elements.
    #[error("weight length mismatch: expected {expected}, got {actual}")]
    WeightLength {
        /// `oDepth * iDepth * kernelSize²`.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// The bias vector has the wrong number of elements.
    #[error("bias length mismatch: expected {expected}, got {actual}")]
    BiasLength {
        /// `oDepth`.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// A volume buffer does not match its shape.
    #[error("volume length mismatch: expected {expected}, got {actual}")]
    VolumeLength {
        /// Product of the shape.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// A derived size does not fit in `usize`.
    #[error("layer dimensions overflow")]
    Overflow,
    /// The descriptor could not be (de)serialized.
    #[error("descriptor format error: {0}")]
    Json(#[from] serde_json::Error),
    /// The descriptor file could not be read or written.
    #[error("descriptor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure in the device compute backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No adapter could be acquired.
    #[cfg(feature = "wgpu")]
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// The adapter refused to open a device.
    #[cfg(feature = "wgpu")]
    #[error("device error: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    /// The backend rejected a call.
    #[error("{step} failed: {message}")]
    Validation {
        /// The step that failed (buffer creation, pipeline, binding, launch).
        step: &'static str,
        /// Backend diagnostic.
        message: String,
    },
    /// The device ran out of memory.
    #[error("{step} failed: out of device memory")]
    OutOfMemory {
        /// The step that failed.
        step: &'static str,
    },
    /// A buffer exceeds the storage binding limit.
    #[error("{name} buffer of {bytes} bytes exceeds device limit of {limit} bytes")]
    BufferTooLarge {
        /// Buffer label.
        name: &'static str,
        /// Requested size.
        bytes: u64,
        /// Device limit.
        limit: u64,
    },
    /// The launch grid needs more workgroups than the device allows.
    #[error("launch grid needs {workgroups} workgroups in one dimension, device allows {limit}")]
    GridTooLarge {
        /// Requested workgroups.
        workgroups: u32,
        /// Device limit.
        limit: u32,
    },
    /// A layer dimension does not fit the device's 32-bit indexing.
    #[error("dimension {0} does not fit in 32 bits")]
    DimensionTooLarge(usize),
    /// Waiting on the queue failed.
    #[cfg(feature = "wgpu")]
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    /// Mapping the readback buffer failed.
    #[cfg(feature = "wgpu")]
    #[error("reading the output failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    /// The readback callback never fired.
    #[error("reading the output failed: map callback dropped")]
    MapDropped,
    /// The crate was built without a device backend.
    #[error("device backend unavailable (built without the `wgpu` feature)")]
    Unavailable,
}

/// A failed forward call.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Device failure.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// The input volume does not have the layer's input shape.
    #[error("input shape mismatch: expected {expected}, got {actual}")]
    InputShape {
        /// Layer input shape.
        expected: Shape,
        /// Shape supplied.
        actual: Shape,
    },
}
