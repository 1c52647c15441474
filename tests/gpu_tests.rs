#![cfg(feature = "wgpu")]

use briny_conv::approx::{approx_eq_tol, DEVICE_TOLERANCE};
use briny_conv::backend::{get_backend, set_backend, Backend};
use briny_conv::layer::{Conv2d, ConvParams};
use briny_conv::volume::{Shape, Volume};
use briny_conv::ops::wgpu::ConvDevice;
use briny_conv::{DeviceError, LayerError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_layer(seed: u64, input: Shape, k: usize, out_depth: usize) -> (Conv2d, Volume) {
    let mut rng = StdRng::seed_from_u64(seed);
    let params = ConvParams::new(input, k, out_depth).unwrap();
    let weight = (0..params.weight_len())
        .map(|_| rng.random_range(-0.5f32..0.5))
        .collect();
    let bias = (0..out_depth).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    let data = (0..input.len()).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    (
        Conv2d::new(params, weight, bias).unwrap(),
        Volume::new(input, data).unwrap(),
    )
}

/// Machines without a usable adapter or device skip device tests.
fn missing_device(err: &DeviceError) -> bool {
    match err {
        DeviceError::Adapter(e) => eprintln!("skipping device test: {e}"),
        DeviceError::RequestDevice(e) => eprintln!("skipping device test: {e}"),
        _ => return false,
    }
    true
}

/// Acquires the device, or returns `false` when none is available.
fn device_available(conv: &mut Conv2d) -> bool {
    match conv.init_device() {
        Ok(()) => true,
        Err(e) if missing_device(&e) => false,
        Err(e) => panic!("device acquisition failed: {e}"),
    }
}

fn open_device() -> Option<ConvDevice> {
    match ConvDevice::new() {
        Ok(device) => Some(device),
        Err(e) if missing_device(&e) => None,
        Err(e) => panic!("device acquisition failed: {e}"),
    }
}

fn assert_paths_agree(seed: u64, input: Shape, k: usize, out_depth: usize) {
    let (mut conv, volume) = random_layer(seed, input, k, out_depth);
    if !device_available(&mut conv) {
        return;
    }

    let cpu = conv.forward_cpu(&volume).unwrap().clone();
    let gpu = conv.forward_gpu(&volume).unwrap();

    assert_eq!(gpu.shape(), cpu.shape());
    assert!(
        approx_eq_tol(gpu.data(), cpu.data(), DEVICE_TOLERANCE),
        "{input} k={k} o={out_depth}"
    );
}

#[test]
fn test_diagonal_kernel_on_device() {
    let params = ConvParams::new(Shape::new(3, 3, 1), 2, 1).unwrap();
    let mut conv = Conv2d::new(params, vec![1.0, 0.0, 0.0, 1.0], vec![0.0]).unwrap();
    if !device_available(&mut conv) {
        return;
    }
    let input = Volume::new(params.input(), (1..=9).map(|x| x as f32).collect()).unwrap();

    let out = conv.forward_gpu(&input).unwrap();

    let expected: Vec<f32> = [6.0f32, 8.0, 12.0, 14.0]
        .iter()
        .map(|s| 1.0 / (1.0 + (-s).exp()))
        .collect();
    assert!(approx_eq_tol(out.data(), &expected, DEVICE_TOLERANCE));
}

#[test]
fn test_device_matches_cpu() {
    assert_paths_agree(1, Shape::new(8, 8, 3), 3, 4);
}

#[test]
fn test_grid_slack_is_ignored() {
    // neither oWidth (19) nor oDepth * oHeight (3 * 7) is a multiple of 16
    assert_paths_agree(2, Shape::new(21, 9, 2), 3, 3);
}

#[test]
fn test_multiple_workgroups() {
    assert_paths_agree(3, Shape::new(40, 40, 2), 5, 6);
}

#[test]
fn test_device_output_is_overwritten() {
    let (mut conv, input) = random_layer(4, Shape::new(10, 10, 2), 3, 2);
    if !device_available(&mut conv) {
        return;
    }
    let other = Volume::new(input.shape(), vec![0.5; input.shape().len()]).unwrap();

    let expected = conv.forward_gpu(&input).unwrap().clone();
    conv.forward_gpu(&other).unwrap();
    let again = conv.forward_gpu(&input).unwrap();
    assert!(approx_eq_tol(again.data(), expected.data(), DEVICE_TOLERANCE));
}

#[test]
fn test_release_and_reacquire() {
    let (mut conv, input) = random_layer(5, Shape::new(6, 6, 1), 3, 2);
    if !device_available(&mut conv) {
        return;
    }
    assert!(conv.has_device());

    let first = conv.forward_gpu(&input).unwrap().clone();
    conv.release_device();
    assert!(!conv.has_device());

    let second = conv.forward_gpu(&input).unwrap();
    assert!(approx_eq_tol(second.data(), first.data(), DEVICE_TOLERANCE));
    assert!(conv.has_device());
}

#[test]
fn test_forward_follows_selected_backend() {
    let (mut conv, input) = random_layer(6, Shape::new(5, 5, 1), 2, 1);
    if !device_available(&mut conv) {
        return;
    }
    conv.release_device();

    set_backend(Backend::Wgpu);
    let result = conv.forward(&input).map(Volume::clone);
    set_backend(Backend::Cpu);
    assert_eq!(get_backend(), Backend::Cpu);

    let gpu = result.unwrap();
    assert!(conv.has_device());
    let cpu = conv.forward(&input).unwrap();
    assert!(approx_eq_tol(gpu.data(), cpu.data(), DEVICE_TOLERANCE));
}

#[test]
fn test_device_path_rejects_wrong_input_shape() {
    let (mut conv, _) = random_layer(7, Shape::new(6, 6, 2), 3, 2);
    let wrong = Volume::zeros(Shape::new(6, 6, 1));

    assert!(matches!(
        conv.forward_gpu(&wrong),
        Err(LayerError::InputShape { .. })
    ));
    assert!(!conv.has_device());
}

#[test]
fn test_oversized_grid_is_rejected() {
    let Some(device) = open_device() else {
        return;
    };
    let max = device.limits().max_compute_workgroups_per_dimension;
    drop(device);

    // one workgroup more than allowed along the flattened row dimension
    let Some(rows) = max.checked_add(1).and_then(|g| g.checked_mul(16)) else {
        return;
    };
    let rows = rows as usize;
    if rows > 1 << 26 {
        return;
    }

    let params = ConvParams::new(Shape::new(1, rows, 1), 1, 1).unwrap();
    let mut conv = Conv2d::new(params, vec![1.0], vec![0.0]).unwrap();
    let input = Volume::zeros(params.input());

    match conv.forward_gpu(&input) {
        Err(LayerError::Device(DeviceError::GridTooLarge { workgroups, limit })) => {
            assert_eq!(limit, max);
            assert_eq!(workgroups, max + 1);
        }
        other => panic!("expected a grid limit error, got {other:?}"),
    }
}
