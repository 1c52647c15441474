use super::{load_shader, scoped, GpuContext, CONV2D, ENTRY_POINT, WORKGROUP_SIZE};
use crate::error::DeviceError;
use crate::layer::ConvParams;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use wgpu::util::DeviceExt;

/// The seven scalar kernel arguments, in binding order.
///
/// Padded to 32 bytes for the uniform address space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvDims {
    /// Input width.
    pub i_width: u32,
    /// Input height.
    pub i_height: u32,
    /// Input depth.
    pub i_depth: u32,
    /// Output width.
    pub o_width: u32,
    /// Output height.
    pub o_height: u32,
    /// Output depth.
    pub o_depth: u32,
    /// Kernel edge.
    pub kernel_size: u32,
    pad0: u32,
}

fn to_u32(v: usize) -> Result<u32, DeviceError> {
    u32::try_from(v).map_err(|_| DeviceError::DimensionTooLarge(v))
}

impl ConvDims {
    /// Narrows layer parameters to the kernel's 32-bit arguments.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DimensionTooLarge`] if a dimension or the
    /// flattened `oDepth * oHeight` extent does not fit in `u32`.
    pub fn new(params: &ConvParams) -> Result<Self, DeviceError> {
        let input = params.input();
        let output = params.output_shape();

        let dims = Self {
            i_width: to_u32(input.width)?,
            i_height: to_u32(input.height)?,
            i_depth: to_u32(input.depth)?,
            o_width: to_u32(output.width)?,
            o_height: to_u32(output.height)?,
            o_depth: to_u32(output.depth)?,
            kernel_size: to_u32(params.kernel_size())?,
            pad0: 0,
        };
        to_u32(output.depth * output.height)?;

        Ok(dims)
    }
}

/// A 2D launch: global extent, workgroup size and workgroup count per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGrid {
    /// Global size, each a multiple of the local size.
    pub global: [u32; 2],
    /// Local (workgroup) size.
    pub local: [u32; 2],
    /// `global / local`.
    pub workgroups: [u32; 2],
}

/// Smallest multiple of `items` that is `>= extent`, or `None` on overflow.
#[must_use]
pub const fn round_up(items: u32, extent: u32) -> Option<u32> {
    extent.div_ceil(items).checked_mul(items)
}

/// Computes the launch grid: dimension 0 covers `oWidth`, dimension 1 covers
/// `oDepth * oHeight`, both rounded up to [`WORKGROUP_SIZE`].
///
/// # Errors
///
/// Returns [`DeviceError::DimensionTooLarge`] if an extent does not fit in `u32`.
pub fn launch_grid(params: &ConvParams) -> Result<LaunchGrid, DeviceError> {
    let output = params.output_shape();
    let rows = output.depth * output.height;

    let global = [
        round_up(WORKGROUP_SIZE, to_u32(output.width)?)
            .ok_or(DeviceError::DimensionTooLarge(output.width))?,
        round_up(WORKGROUP_SIZE, to_u32(rows)?).ok_or(DeviceError::DimensionTooLarge(rows))?,
    ];

    Ok(LaunchGrid {
        global,
        local: [WORKGROUP_SIZE; 2],
        workgroups: [global[0] / WORKGROUP_SIZE, global[1] / WORKGROUP_SIZE],
    })
}

/// Rejects launches the device cannot run: too many workgroups in one
/// dimension or a buffer larger than one storage binding.
///
/// # Errors
///
/// Returns [`DeviceError::GridTooLarge`] or [`DeviceError::BufferTooLarge`].
pub fn check_limits(
    limits: &wgpu::Limits,
    grid: &LaunchGrid,
    sizes: &[(&'static str, u64)],
) -> Result<(), DeviceError> {
    let max_groups = limits.max_compute_workgroups_per_dimension;
    if let Some(&workgroups) = grid.workgroups.iter().find(|&&w| w > max_groups) {
        tracing::error!(workgroups, max_groups, "launch grid exceeds device limit");
        return Err(DeviceError::GridTooLarge {
            workgroups,
            limit: max_groups,
        });
    }

    let max_bytes = u64::from(limits.max_storage_buffer_binding_size);
    if let Some(&(name, bytes)) = sizes.iter().find(|(_, b)| *b > max_bytes) {
        tracing::error!(name, bytes, max_bytes, "buffer exceeds device limit");
        return Err(DeviceError::BufferTooLarge {
            name,
            bytes,
            limit: max_bytes,
        });
    }

    Ok(())
}

/// Device resources for the convolution kernel: context, queue and pipeline.
///
/// Acquired once per layer and released when dropped.
pub struct ConvDevice {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    // dropped last: destroys the device
    ctx: GpuContext,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ConvDevice {
    /// Opens a device and compiles the convolution kernel on it.
    ///
    /// # Errors
    ///
    /// Returns any [`DeviceError`] raised by adapter/device acquisition,
    /// shader compilation or pipeline creation.
    pub fn new() -> Result<Self, DeviceError> {
        let ctx = GpuContext::new()?;
        let device = &ctx.device;

        let module = load_shader(device, "conv2d", CONV2D)?;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("conv2d_bgl"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline = scoped(device, "kernel creation", || {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("conv2d_pipeline_layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("conv2d_pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(ENTRY_POINT),
                cache: None,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        })?;

        tracing::debug!("convolution kernel ready");

        Ok(Self {
            layout,
            pipeline,
            ctx,
        })
    }

    /// Information about the adapter the device was opened on.
    #[must_use]
    pub const fn adapter(&self) -> &wgpu::AdapterInfo {
        &self.ctx.adapter
    }

    /// Limits of the opened device.
    #[must_use]
    pub fn limits(&self) -> wgpu::Limits {
        self.ctx.device.limits()
    }

    /// Runs the convolution kernel and reads the result into `output`.
    ///
    /// Blocks until the kernel has finished and the output is on the host.
    /// Returns the measured kernel time, which is informational only.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] naming the step that failed: buffer creation,
    /// argument binding, kernel launch or readback.
    ///
    /// # Panics
    ///
    /// Panics if the slice lengths disagree with `params`.
    pub fn run(
        &self,
        params: &ConvParams,
        input: &[f32],
        weight: &[f32],
        bias: &[f32],
        output: &mut [f32],
    ) -> Result<Duration, DeviceError> {
        assert_eq!(input.len(), params.input().len(), "input length mismatch");
        assert_eq!(weight.len(), params.weight_len(), "weight length mismatch");
        assert_eq!(bias.len(), params.output_depth(), "bias length mismatch");
        assert_eq!(output.len(), params.output_shape().len(), "output length mismatch");

        let device = &self.ctx.device;
        let queue = &self.ctx.queue;

        let dims = ConvDims::new(params)?;
        let grid = launch_grid(params)?;
        let out_bytes = (output.len() * size_of::<f32>()) as u64;

        check_limits(
            &self.limits(),
            &grid,
            &[
                ("input", (input.len() * size_of::<f32>()) as u64),
                ("weight", (weight.len() * size_of::<f32>()) as u64),
                ("bias", (bias.len() * size_of::<f32>()) as u64),
                ("output", out_bytes),
            ],
        )?;

        tracing::debug!(
            global = ?grid.global,
            local = ?grid.local,
            workgroups = ?grid.workgroups,
            "launching conv2d"
        );

        let (input_buf, weight_buf, bias_buf, output_buf, dims_buf, staging) =
            scoped(device, "buffer creation", || {
                let init = |label: &'static str, contents: &[u8]| {
                    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents,
                        usage: wgpu::BufferUsages::STORAGE,
                    })
                };
                let input_buf = init("conv2d_input", bytemuck::cast_slice(input));
                let weight_buf = init("conv2d_weight", bytemuck::cast_slice(weight));
                let bias_buf = init("conv2d_bias", bytemuck::cast_slice(bias));

                let output_buf = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("conv2d_output"),
                    size: out_bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });

                let dims_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("conv2d_dims"),
                    contents: bytemuck::bytes_of(&dims),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

                let staging = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("conv2d_staging"),
                    size: out_bytes,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });

                (input_buf, weight_buf, bias_buf, output_buf, dims_buf, staging)
            })?;

        let bind_group = scoped(device, "argument binding", || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("conv2d_bind_group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: input_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: weight_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: bias_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: output_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: dims_buf.as_entire_binding(),
                    },
                ],
            })
        })?;

        // launch and time
        let start = Instant::now();
        scoped(device, "kernel launch", || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("conv2d_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("conv2d_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(grid.workgroups[0], grid.workgroups[1], 1);
            }
            queue.submit(Some(encoder.finish()));
        })?;
        device
            .poll(wgpu::PollType::Wait)
            .inspect_err(|e| tracing::error!(%e, "failed waiting for the kernel"))?;
        let elapsed = start.elapsed();

        // readback
        scoped(device, "readback", || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("conv2d_readback"),
            });
            encoder.copy_buffer_to_buffer(&output_buf, 0, &staging, 0, out_bytes);
            queue.submit(Some(encoder.finish()));
        })?;

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .inspect_err(|e| tracing::error!(%e, "failed waiting for the readback"))?;

        rx.recv()
            .map_err(|_| DeviceError::MapDropped)?
            .inspect_err(|e| tracing::error!(%e, "failed reading the output"))?;

        {
            let data = slice.get_mapped_range();
            let values: &[f32] =
                bytemuck::try_cast_slice(&data).map_err(|e| DeviceError::Validation {
                    step: "readback",
                    message: e.to_string(),
                })?;
            output.copy_from_slice(values);
        }
        staging.unmap();

        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Shape;

    #[test]
    fn round_up_to_workgroup() {
        assert_eq!(round_up(16, 1), Some(16));
        assert_eq!(round_up(16, 16), Some(16));
        assert_eq!(round_up(16, 17), Some(32));
        assert_eq!(round_up(16, 0), Some(0));
        assert_eq!(round_up(16, u32::MAX), None);
    }

    #[test]
    fn grid_flattens_maps_and_rows() {
        // output 30x10x3 -> rows = 30
        let p = ConvParams::new(Shape::new(32, 12, 2), 3, 3).unwrap();
        let grid = launch_grid(&p).unwrap();
        assert_eq!(grid.global, [32, 32]);
        assert_eq!(grid.local, [16, 16]);
        assert_eq!(grid.workgroups, [2, 2]);
    }

    #[test]
    fn grid_covers_exact_multiples_without_slack() {
        let p = ConvParams::new(Shape::new(17, 17, 1), 2, 1).unwrap();
        let grid = launch_grid(&p).unwrap();
        assert_eq!(grid.global, [16, 16]);
        assert_eq!(grid.workgroups, [1, 1]);
    }

    #[test]
    fn dims_follow_argument_order() {
        let p = ConvParams::new(Shape::new(5, 4, 3), 2, 6).unwrap();
        let dims = ConvDims::new(&p).unwrap();
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&dims));
        assert_eq!(words, &[5, 4, 3, 4, 3, 6, 2, 0]);
        assert_eq!(size_of::<ConvDims>(), 32);
    }

    #[test]
    fn limits_reject_oversized_grid() {
        let limits = wgpu::Limits {
            max_compute_workgroups_per_dimension: 4,
            ..wgpu::Limits::default()
        };
        // 1 x 80 output rows -> 5 workgroups in dimension 1
        let p = ConvParams::new(Shape::new(1, 80, 1), 1, 1).unwrap();
        let grid = launch_grid(&p).unwrap();
        assert!(matches!(
            check_limits(&limits, &grid, &[]),
            Err(DeviceError::GridTooLarge {
                workgroups: 5,
                limit: 4
            })
        ));

        let p = ConvParams::new(Shape::new(1, 64, 1), 1, 1).unwrap();
        assert!(check_limits(&limits, &launch_grid(&p).unwrap(), &[]).is_ok());
    }

    #[test]
    fn limits_reject_oversized_buffer() {
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1024,
            ..wgpu::Limits::default()
        };
        let p = ConvParams::new(Shape::new(4, 4, 1), 1, 1).unwrap();
        let grid = launch_grid(&p).unwrap();

        let sizes = [("input", 1024), ("weight", 1025), ("bias", 4096)];
        assert!(matches!(
            check_limits(&limits, &grid, &sizes),
            Err(DeviceError::BufferTooLarge {
                name: "weight",
                bytes: 1025,
                limit: 1024
            })
        ));
        assert!(check_limits(&limits, &grid, &sizes[..1]).is_ok());
    }
}
