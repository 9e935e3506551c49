//! C ABI facade
//!
//! Stateless forwarders from the flat device-id ABI to the runtime
//! registry. Errors at this boundary are not recoverable: every failure is
//! logged and terminates the process with a non-zero exit code.

use std::ffi::{c_char, c_void, CStr};

use crate::error::RuntimeError;
use crate::launch::{KernelArgType, LaunchParams};
use crate::{profiling, runtime};

fn fatal(err: RuntimeError) -> ! {
    tracing::error!(error = %err, "fatal runtime error");
    eprintln!("kernelforge: {err}");
    std::process::exit(1);
}

unsafe fn cstr<'a>(ptr: *const c_char) -> &'a str {
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => s,
        Err(_) => fatal(RuntimeError::Internal(
            "non-UTF-8 string passed through the ABI".to_string(),
        )),
    }
}

#[no_mangle]
pub extern "C" fn kf_alloc(dev: i32, bytes: i64) -> *mut c_void {
    runtime::global()
        .alloc(dev, bytes)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_alloc_host(dev: i32, bytes: i64) -> *mut c_void {
    runtime::global()
        .alloc_host(dev, bytes)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_alloc_unified(dev: i32, bytes: i64) -> *mut c_void {
    runtime::global()
        .alloc_unified(dev, bytes)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_get_device_ptr(dev: i32, host: *mut c_void) -> *mut c_void {
    runtime::global()
        .get_device_ptr(dev, host)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_release(dev: i32, ptr: *mut c_void) {
    runtime::global()
        .release(dev, ptr)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_release_host(dev: i32, ptr: *mut c_void) {
    runtime::global()
        .release_host(dev, ptr)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_copy(
    src_dev: i32,
    src: *const c_void,
    src_off: i64,
    dst_dev: i32,
    dst: *mut c_void,
    dst_off: i64,
    bytes: i64,
) {
    runtime::global()
        .copy(src_dev, src, src_off, dst_dev, dst, dst_off, bytes)
        .unwrap_or_else(|e| fatal(e))
}

/// # Safety
///
/// `file` and `name` must be NUL-terminated strings; `grid` and `block`
/// must point to three `u32` each; `args`, `sizes`, and `types` must point
/// to `num_args` entries each, with every argument pointer readable for its
/// declared size.
#[no_mangle]
pub unsafe extern "C" fn kf_launch_kernel(
    dev: i32,
    file: *const c_char,
    name: *const c_char,
    grid: *const u32,
    block: *const u32,
    args: *mut *mut c_void,
    sizes: *const u32,
    types: *const u8,
    num_args: u32,
) {
    let file = cstr(file);
    let name = cstr(name);
    let grid = [*grid, *grid.add(1), *grid.add(2)];
    let block = [*block, *block.add(1), *block.add(2)];

    let n = num_args as usize;
    let args = std::slice::from_raw_parts(args, n);
    let sizes = std::slice::from_raw_parts(sizes, n);
    let types: Vec<KernelArgType> = std::slice::from_raw_parts(types, n)
        .iter()
        .map(|&t| KernelArgType::from_raw(t))
        .collect();

    let params = LaunchParams {
        file,
        name,
        grid,
        block,
        args,
        arg_sizes: sizes,
        arg_types: &types,
    };
    runtime::global()
        .launch_kernel(dev, &params)
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_synchronize(dev: i32) {
    runtime::global()
        .synchronize(dev)
        .unwrap_or_else(|e| fatal(e))
}

/// # Safety
///
/// `file` and `name` must be NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn kf_load_kernel(dev: i32, file: *const c_char, name: *const c_char) {
    runtime::global()
        .load_kernel(dev, cstr(file), cstr(name))
        .unwrap_or_else(|e| fatal(e))
}

/// # Safety
///
/// `path` and `text` must be NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn kf_register_file(dev: i32, path: *const c_char, text: *const c_char) {
    runtime::global()
        .register_file(dev, cstr(path), cstr(text))
        .unwrap_or_else(|e| fatal(e))
}

#[no_mangle]
pub extern "C" fn kf_get_kernel_time() -> u64 {
    profiling::total_micros()
}

#[no_mangle]
pub extern "C" fn kf_get_micro_time() -> u64 {
    profiling::micro_time()
}

#[no_mangle]
pub extern "C" fn kf_info() {
    for line in runtime::global().describe() {
        eprintln!("{line}");
    }
}

#[no_mangle]
pub extern "C" fn kf_print_i16(value: i16) {
    eprint!("{value}");
}

#[no_mangle]
pub extern "C" fn kf_print_i32(value: i32) {
    eprint!("{value}");
}

#[no_mangle]
pub extern "C" fn kf_print_i64(value: i64) {
    eprint!("{value}");
}

#[no_mangle]
pub extern "C" fn kf_print_f32(value: f32) {
    eprint!("{value}");
}

#[no_mangle]
pub extern "C" fn kf_print_f64(value: f64) {
    eprint!("{value}");
}

#[no_mangle]
pub extern "C" fn kf_print_char(value: c_char) {
    eprint!("{}", value as u8 as char);
}

/// # Safety
///
/// `value` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn kf_print_string(value: *const c_char) {
    eprint!("{}", cstr(value));
}
