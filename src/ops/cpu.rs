//! Parallel CPU convolution engine
//!
//! # CPU Backend
//!
//! Reference implementation of the valid-mode, stride-1 convolution forward
//! pass followed by a sigmoid activation. This is the default path of
//! [`Conv2d::forward`](crate::layer::Conv2d::forward).
//!
//! ## Algorithm
//!
//! For each output feature map `o`:
//!
//! 1. For each input feature map `i` and output position `(r, c)`, copy the
//!    `k×k` window of channel `i` anchored at `(r, c)` into a scratch buffer
//!    (`window[x*k + y] = input[i][r+x][c+y]`) and accumulate its dot product
//!    with `weight[o][i]` into `output[o][r][c]`.
//! 2. Once every input channel is summed, apply
//!    `output[o][r][c] = sigmoid(output[o][r][c] + bias[o])`.
//!
//! ## Design Goals
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon), one task per
//!   output feature map
//! - Deterministic results: every output element is accumulated by a single
//!   task in the fixed order above, so repeated calls agree bit for bit

use crate::layer::ConvParams;
use rayon::prelude::*;

/// Logistic activation: `1 / (1 + e^-x)`.
#[inline]
#[must_use]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Index of `output[o][r][c]` in the flat output volume.
#[inline]
#[must_use]
pub const fn output_index(params: &ConvParams, o: usize, r: usize, c: usize) -> usize {
    let out = params.output_shape();
    o * out.width * out.height + r * out.width + c
}

/// First index of the `weight[o][i]` kernel in the flat weight tensor.
#[inline]
#[must_use]
pub const fn weight_base(params: &ConvParams, o: usize, i: usize) -> usize {
    (o * params.input.depth + i) * params.window_len()
}

/// Copies the `k×k` window of input channel `i` anchored at `(r, c)` into `window`.
///
/// # Panics
///
/// Panics if `window` is shorter than `k²` or the window leaves the input.
#[inline]
pub fn extract_window(
    params: &ConvParams,
    input: &[f32],
    i: usize,
    r: usize,
    c: usize,
    window: &mut [f32],
) {
    let k = params.kernel_size;
    let width = params.input.width;
    let base = i * params.input.plane();

    let mut idx = 0;
    for x in 0..k {
        let row = base + (r + x) * width + c;
        for y in 0..k {
            window[idx] = input[row + y];
            idx += 1;
        }
    }
}

/// Dot product of a kernel and a window, accumulated front to back.
#[inline]
#[must_use]
pub fn dot(kernel: &[f32], window: &[f32]) -> f32 {
    kernel
        .iter()
        .zip(window)
        .fold(0.0, |sum, (&w, &x)| sum + w * x)
}

/// Runs the convolution forward pass into `output`.
///
/// `windows` holds one `k²` scratch buffer per output feature map; they are
/// overwritten freely and never carry state between calls.
///
/// # Panics
///
/// Panics if any slice length disagrees with `params`; callers check shapes
/// before getting here.
pub fn forward(
    params: &ConvParams,
    input: &[f32],
    weight: &[f32],
    bias: &[f32],
    windows: &mut [Vec<f32>],
    output: &mut [f32],
) {
    let out = params.output_shape();
    let k2 = params.window_len();

    assert_eq!(input.len(), params.input.len(), "input length mismatch");
    assert_eq!(weight.len(), params.weight_len(), "weight length mismatch");
    assert_eq!(bias.len(), params.output_depth, "bias length mismatch");
    assert_eq!(output.len(), out.len(), "output length mismatch");
    assert_eq!(windows.len(), params.output_depth, "scratch count mismatch");

    output.fill(0.0);

    output
        .par_chunks_mut(out.plane())
        .zip(windows.par_iter_mut())
        .enumerate()
        .for_each(|(o, (map, window))| {
            window.resize(k2, 0.0);

            for i in 0..params.input.depth {
                let base = weight_base(params, o, i);
                let kernel = &weight[base..base + k2];

                for r in 0..out.height {
                    for c in 0..out.width {
                        extract_window(params, input, i, r, c, window);
                        map[r * out.width + c] += dot(kernel, window);
                    }
                }
            }

            // activate
            let offset = bias[o];
            for v in map.iter_mut() {
                *v = sigmoid(*v + offset);
            }
        });
}
