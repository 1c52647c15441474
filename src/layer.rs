//! Layers and the convolution layer.
//!
//! [`Layer`] is the capability every layer in a pipeline exposes: shape
//! accessors and a `forward` that turns one input volume into the layer's
//! output volume. [`Conv2d`] implements it for a valid-mode, stride-1 2D
//! convolution followed by a sigmoid.
//!
//! # Lifecycle
//!
//! Parameters, weights and bias are fixed at construction. The output volume
//! and the window scratch buffers are sized once and overwritten on every
//! call. Device resources are acquired on the first device-path call (or by
//! [`Conv2d::init_device`]) and released by [`Conv2d::release_device`] or
//! when the layer is dropped.
//!
//! # Example
//!
//! ```rust
//! use briny_conv::layer::{Conv2d, ConvParams};
//! use briny_conv::volume::{Shape, Volume};
//!
//! let params = ConvParams::new(Shape::new(3, 3, 1), 2, 1).unwrap();
//! let mut conv = Conv2d::new(params, vec![1.0, 0.0, 0.0, 1.0], vec![0.0]).unwrap();
//!
//! let input = Volume::new(Shape::new(3, 3, 1), (1..=9).map(|x| x as f32).collect()).unwrap();
//! let out = conv.forward_cpu(&input).unwrap();
//! assert_eq!(out.shape(), Shape::new(2, 2, 1));
//! ```

use crate::backend::{get_backend, Backend};
use crate::error::{ConfigError, DeviceError, LayerError};
use crate::ops::cpu;
use crate::volume::{Shape, Volume};

#[cfg(feature = "wgpu")]
use crate::ops::wgpu::ConvDevice;

/// Common contract of layers in a network pipeline.
pub trait Layer {
    /// Short layer kind name, for logs.
    fn name(&self) -> &'static str;

    /// Shape of the volume `forward` accepts.
    fn input_shape(&self) -> Shape;

    /// Shape of the volume `forward` produces.
    fn output_shape(&self) -> Shape;

    /// Computes the output volume for `input`.
    ///
    /// # Errors
    ///
    /// Fails if `input` has the wrong shape or the selected backend fails.
    fn forward(&mut self, input: &Volume) -> Result<&Volume, LayerError>;
}

/// Shape parameters of a convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConvParams {
    pub(crate) input: Shape,
    pub(crate) kernel_size: usize,
    pub(crate) output_depth: usize,
}

impl ConvParams {
    /// Validates and creates layer parameters.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroDimension`] if any dimension, the kernel or the output depth is zero
    /// - [`ConfigError::KernelTooLarge`] if the kernel is wider or taller than the input
    /// - [`ConfigError::Overflow`] if a derived buffer size does not fit in `usize`
    pub fn new(input: Shape, kernel_size: usize, output_depth: usize) -> Result<Self, ConfigError> {
        if input.width == 0
            || input.height == 0
            || input.depth == 0
            || kernel_size == 0
            || output_depth == 0
        {
            return Err(ConfigError::ZeroDimension {
                input,
                kernel_size,
                output_depth,
            });
        }

        if kernel_size > input.width || kernel_size > input.height {
            return Err(ConfigError::KernelTooLarge {
                kernel: kernel_size,
                width: input.width,
                height: input.height,
            });
        }

        let params = Self {
            input,
            kernel_size,
            output_depth,
        };

        input.checked_len().ok_or(ConfigError::Overflow)?;
        params
            .output_shape()
            .checked_len()
            .ok_or(ConfigError::Overflow)?;
        kernel_size
            .checked_mul(kernel_size)
            .and_then(|k2| k2.checked_mul(input.depth))
            .and_then(|n| n.checked_mul(output_depth))
            .ok_or(ConfigError::Overflow)?;

        Ok(params)
    }

    /// Input volume shape.
    #[must_use]
    pub const fn input(&self) -> Shape {
        self.input
    }

    /// Edge of the square kernel.
    #[must_use]
    pub const fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Number of output feature maps.
    #[must_use]
    pub const fn output_depth(&self) -> usize {
        self.output_depth
    }

    /// Output volume shape: `(iWidth - k + 1, iHeight - k + 1, oDepth)`.
    #[must_use]
    pub const fn output_shape(&self) -> Shape {
        Shape::new(
            self.input.width - self.kernel_size + 1,
            self.input.height - self.kernel_size + 1,
            self.output_depth,
        )
    }

    /// Elements in one kernel window (`k²`).
    #[must_use]
    pub const fn window_len(&self) -> usize {
        self.kernel_size * self.kernel_size
    }

    /// Expected weight length (`oDepth * iDepth * k²`).
    #[must_use]
    pub const fn weight_len(&self) -> usize {
        self.output_depth * self.input.depth * self.window_len()
    }
}

/// A 2D convolution layer with sigmoid activation.
pub struct Conv2d {
    params: ConvParams,
    weight: Vec<f32>,
    bias: Vec<f32>,
    output: Volume,
    windows: Vec<Vec<f32>>,
    #[cfg(feature = "wgpu")]
    device: Option<ConvDevice>,
}

impl core::fmt::Debug for Conv2d {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Conv2d")
            .field("params", &self.params)
            .field("has_device", &self.has_device())
            .finish_non_exhaustive()
    }
}

impl Conv2d {
    /// Creates a layer from validated parameters, weights and bias.
    ///
    /// `weight` is laid out `[oDepth][iDepth][k][k]`; `bias` holds one value
    /// per output feature map. No device resources are touched here.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::WeightLength`] if `weight.len() != oDepth * iDepth * k²`
    /// - [`ConfigError::BiasLength`] if `bias.len() != oDepth`
    pub fn new(params: ConvParams, weight: Vec<f32>, bias: Vec<f32>) -> Result<Self, ConfigError> {
        if weight.len() != params.weight_len() {
            return Err(ConfigError::WeightLength {
                expected: params.weight_len(),
                actual: weight.len(),
            });
        }
        if bias.len() != params.output_depth {
            return Err(ConfigError::BiasLength {
                expected: params.output_depth,
                actual: bias.len(),
            });
        }

        let windows = (0..params.output_depth)
            .map(|_| vec![0.0; params.window_len()])
            .collect();

        tracing::debug!(
            input = %params.input,
            kernel = params.kernel_size,
            output = %params.output_shape(),
            "created convolution layer"
        );

        Ok(Self {
            params,
            weight,
            bias,
            output: Volume::zeros(params.output_shape()),
            windows,
            #[cfg(feature = "wgpu")]
            device: None,
        })
    }

    /// Layer parameters.
    #[must_use]
    pub const fn params(&self) -> &ConvParams {
        &self.params
    }

    /// Flat weight tensor.
    #[must_use]
    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    /// Bias vector.
    #[must_use]
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Output of the most recent forward call (zeros before the first).
    #[must_use]
    pub const fn output(&self) -> &Volume {
        &self.output
    }

    fn check_input(&self, input: &Volume) -> Result<(), LayerError> {
        if input.shape() != self.params.input {
            return Err(LayerError::InputShape {
                expected: self.params.input,
                actual: input.shape(),
            });
        }
        Ok(())
    }

    /// Runs the forward pass on the globally selected [`Backend`].
    ///
    /// # Errors
    ///
    /// Fails on an input shape mismatch or, on the device path, on any device error.
    pub fn forward(&mut self, input: &Volume) -> Result<&Volume, LayerError> {
        match get_backend() {
            Backend::Cpu => self.forward_cpu(input),
            Backend::Wgpu => self.forward_gpu(input),
        }
    }

    /// Runs the forward pass on the CPU.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InputShape`] if `input` does not match the layer.
    pub fn forward_cpu(&mut self, input: &Volume) -> Result<&Volume, LayerError> {
        self.check_input(input)?;
        tracing::trace!(output = %self.params.output_shape(), "cpu forward");

        cpu::forward(
            &self.params,
            input.data(),
            &self.weight,
            &self.bias,
            &mut self.windows,
            self.output.data_mut(),
        );

        Ok(&self.output)
    }

    /// Runs the forward pass on the device, acquiring it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InputShape`] on a shape mismatch and
    /// [`LayerError::Device`] if the device cannot be acquired or any step of
    /// the launch fails. The output volume is unspecified after a device error.
    #[cfg(feature = "wgpu")]
    pub fn forward_gpu(&mut self, input: &Volume) -> Result<&Volume, LayerError> {
        self.check_input(input)?;
        self.init_device()?;

        let device = self.device.as_ref().ok_or(DeviceError::Unavailable)?;
        let elapsed = device.run(
            &self.params,
            input.data(),
            &self.weight,
            &self.bias,
            self.output.data_mut(),
        )?;
        tracing::debug!(?elapsed, "gpu forward");

        Ok(&self.output)
    }

    /// Runs the forward pass on the device.
    ///
    /// # Errors
    ///
    /// Always returns [`DeviceError::Unavailable`]: the crate was built without `wgpu`.
    #[cfg(not(feature = "wgpu"))]
    pub fn forward_gpu(&mut self, input: &Volume) -> Result<&Volume, LayerError> {
        self.check_input(input)?;
        Err(DeviceError::Unavailable.into())
    }

    /// Acquires device resources now instead of on the first device call.
    ///
    /// Does nothing if they are already held.
    ///
    /// # Errors
    ///
    /// Returns the [`DeviceError`] raised while acquiring the device.
    pub fn init_device(&mut self) -> Result<(), DeviceError> {
        #[cfg(feature = "wgpu")]
        {
            if self.device.is_none() {
                self.device = Some(ConvDevice::new()?);
            }
            Ok(())
        }
        #[cfg(not(feature = "wgpu"))]
        {
            Err(DeviceError::Unavailable)
        }
    }

    /// Releases device resources. The next device call acquires them again.
    pub fn release_device(&mut self) {
        #[cfg(feature = "wgpu")]
        if let Some(device) = self.device.take() {
            drop(device);
        }
    }

    /// Whether device resources are currently held.
    #[must_use]
    pub const fn has_device(&self) -> bool {
        #[cfg(feature = "wgpu")]
        {
            self.device.is_some()
        }
        #[cfg(not(feature = "wgpu"))]
        {
            false
        }
    }
}

impl Layer for Conv2d {
    fn name(&self) -> &'static str {
        "convolution"
    }

    fn input_shape(&self) -> Shape {
        self.params.input
    }

    fn output_shape(&self) -> Shape {
        self.params.output_shape()
    }

    fn forward(&mut self, input: &Volume) -> Result<&Volume, LayerError> {
        Self::forward(self, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shape_is_valid_mode() {
        let p = ConvParams::new(Shape::new(7, 5, 3), 3, 4).unwrap();
        assert_eq!(p.output_shape(), Shape::new(5, 3, 4));
        assert_eq!(p.weight_len(), 4 * 3 * 9);
    }

    #[test]
    fn kernel_as_large_as_input_gives_single_pixel() {
        let p = ConvParams::new(Shape::new(4, 4, 2), 4, 1).unwrap();
        assert_eq!(p.output_shape(), Shape::new(1, 1, 1));
    }

    #[test]
    fn rejects_kernel_larger_than_input() {
        assert!(matches!(
            ConvParams::new(Shape::new(3, 5, 1), 4, 1),
            Err(ConfigError::KernelTooLarge {
                kernel: 4,
                width: 3,
                height: 5
            })
        ));
        assert!(matches!(
            ConvParams::new(Shape::new(5, 3, 1), 4, 1),
            Err(ConfigError::KernelTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(matches!(
            ConvParams::new(Shape::new(3, 3, 0), 1, 1),
            Err(ConfigError::ZeroDimension { .. })
        ));
        assert!(matches!(
            ConvParams::new(Shape::new(3, 3, 1), 0, 1),
            Err(ConfigError::ZeroDimension { .. })
        ));
        assert!(matches!(
            ConvParams::new(Shape::new(3, 3, 1), 1, 0),
            Err(ConfigError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn rejects_overflowing_shapes() {
        assert!(matches!(
            ConvParams::new(Shape::new(usize::MAX, 2, 2), 1, 1),
            Err(ConfigError::Overflow)
        ));
    }

    #[test]
    fn construction_checks_tensor_lengths() {
        let p = ConvParams::new(Shape::new(3, 3, 2), 2, 2).unwrap();
        assert!(matches!(
            Conv2d::new(p, vec![0.0; 15], vec![0.0; 2]),
            Err(ConfigError::WeightLength {
                expected: 16,
                actual: 15
            })
        ));
        assert!(matches!(
            Conv2d::new(p, vec![0.0; 16], vec![0.0; 3]),
            Err(ConfigError::BiasLength {
                expected: 2,
                actual: 3
            })
        ));
        assert!(Conv2d::new(p, vec![0.0; 16], vec![0.0; 2]).is_ok());
    }

    #[test]
    fn construction_does_not_acquire_device() {
        let p = ConvParams::new(Shape::new(2, 2, 1), 1, 1).unwrap();
        let conv = Conv2d::new(p, vec![1.0], vec![0.0]).unwrap();
        assert!(!conv.has_device());
    }

    #[test]
    fn forward_rejects_wrong_input_shape() {
        let p = ConvParams::new(Shape::new(3, 3, 1), 2, 1).unwrap();
        let mut conv = Conv2d::new(p, vec![0.0; 4], vec![0.0]).unwrap();
        let input = Volume::zeros(Shape::new(3, 3, 2));
        assert!(matches!(
            conv.forward_cpu(&input),
            Err(LayerError::InputShape { .. })
        ));
    }
}
