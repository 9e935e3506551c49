//! Runtime dispatch over encoded device ids, exercised on the host platform

use std::ffi::c_void;
use std::sync::Arc;

use kernelforge::{DeviceId, PlatformTag, Runtime, RuntimeError};

fn host_dev() -> i32 {
    DeviceId::new(PlatformTag::Host, 0).encode()
}

#[test]
fn float_vector_round_trip() {
    let runtime = Runtime::new(false);
    let dev = host_dev();
    let bytes = (1024 * std::mem::size_of::<f32>()) as i64;

    let source: Vec<f32> = (0..1024).map(|i| i as f32).collect();
    let buffer = runtime.alloc(dev, bytes).expect("device alloc");

    runtime
        .copy(
            dev,
            source.as_ptr() as *const c_void,
            0,
            dev,
            buffer,
            0,
            bytes,
        )
        .expect("upload");
    runtime.synchronize(dev).expect("synchronize");

    let mut readback = vec![0.0f32; 1024];
    runtime
        .copy(
            dev,
            buffer,
            0,
            dev,
            readback.as_mut_ptr() as *mut c_void,
            0,
            bytes,
        )
        .expect("download");

    assert_eq!(source, readback);
    runtime.release(dev, buffer).expect("release");
}

#[test]
fn copy_with_offsets_moves_the_right_window() {
    let runtime = Runtime::new(false);
    let dev = host_dev();

    let buffer = runtime.alloc(dev, 64).unwrap();
    let payload = [9u8, 8, 7, 6];
    runtime
        .copy(dev, payload.as_ptr() as *const c_void, 0, dev, buffer, 32, 4)
        .unwrap();

    let mut back = [0u8; 4];
    runtime
        .copy(dev, buffer, 32, dev, back.as_mut_ptr() as *mut c_void, 0, 4)
        .unwrap();
    assert_eq!(back, payload);

    runtime.release(dev, buffer).unwrap();
}

#[test]
fn zero_size_alloc_returns_null_without_touching_the_backend() {
    let runtime = Runtime::new(false);
    assert!(runtime.alloc(host_dev(), 0).unwrap().is_null());
    assert!(runtime.alloc_host(host_dev(), 0).unwrap().is_null());
    assert!(runtime.alloc_unified(host_dev(), 0).unwrap().is_null());
}

#[test]
fn unknown_platform_tag_names_the_tag() {
    let runtime = Runtime::new(false);
    let encoded_tag_7 = 7i32;
    let err = runtime.alloc(encoded_tag_7, 64).unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownPlatform(7)));
    assert!(err.to_string().contains('7'));
}

#[test]
fn device_index_is_validated() {
    let runtime = Runtime::new(false);
    let dev = DeviceId::new(PlatformTag::Host, 9).encode();
    let err = runtime.synchronize(dev).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::InvalidDevice { index: 9, count: 1, .. }
    ));
}

#[test]
fn negative_sizes_and_offsets_reject() {
    let runtime = Runtime::new(false);
    let dev = host_dev();
    assert!(matches!(
        runtime.alloc(dev, -8),
        Err(RuntimeError::NegativeSize(-8))
    ));

    let buffer = runtime.alloc(dev, 16).unwrap();
    let mut sink = [0u8; 4];
    let err = runtime
        .copy(dev, buffer, -1, dev, sink.as_mut_ptr() as *mut c_void, 0, 4)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NegativeSize(-1)));
    runtime.release(dev, buffer).unwrap();
}

#[test]
fn host_platform_reports_launch_as_unsupported() {
    let runtime = Runtime::new(false);
    let params = kernelforge::LaunchParams {
        file: "k.gcn",
        name: "main",
        grid: [64, 1, 1],
        block: [64, 1, 1],
        args: &[],
        arg_sizes: &[],
        arg_types: &[],
    };
    let err = runtime.launch_kernel(host_dev(), &params).unwrap_err();
    assert!(err.to_string().contains("cannot launch"));
}

#[test]
fn concurrent_allocations_from_many_threads() {
    use rand::Rng;

    let runtime = Arc::new(Runtime::new(false));
    let dev = host_dev();

    let handles: Vec<_> = (0..8)
        .map(|worker: usize| {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..16 {
                    let len = rng.gen_range(1..=4096);
                    let bytes = len as i64;
                    let buffer = runtime.alloc(dev, bytes).unwrap();

                    let payload = vec![worker as u8; len];
                    runtime
                        .copy(
                            dev,
                            payload.as_ptr() as *const c_void,
                            0,
                            dev,
                            buffer,
                            0,
                            bytes,
                        )
                        .unwrap();

                    let mut back = vec![0u8; len];
                    runtime
                        .copy(
                            dev,
                            buffer,
                            0,
                            dev,
                            back.as_mut_ptr() as *mut c_void,
                            0,
                            bytes,
                        )
                        .unwrap();
                    assert_eq!(back, payload);
                    runtime.release(dev, buffer).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    runtime.synchronize(dev).unwrap();
}
