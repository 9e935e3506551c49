//! CUDA driver and NVVM FFI bindings
//!
//! Declarations bound to the CUDA driver API (`libcuda`) and libNVVM. All
//! functions are called through wrapper methods on the platform; the
//! dead_code allowance is needed because FFI symbols appear unused to the
//! compiler.

use std::ffi::c_void;

pub type CuResult = i32;
pub type CuDevice = i32;
pub type CuDeviceptr = u64;
pub type CuContext = *mut c_void;
pub type CuModule = *mut c_void;
pub type CuFunction = *mut c_void;
pub type CuStream = *mut c_void;
pub type CuEvent = *mut c_void;
pub type CuTexRef = *mut c_void;

pub type NvvmResult = i32;
pub type NvvmProgram = *mut c_void;

pub const CUDA_SUCCESS: CuResult = 0;
pub const NVVM_SUCCESS: NvvmResult = 0;

// cuDeviceGetAttribute
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

// cuModuleLoadDataEx JIT options
pub const CU_JIT_ERROR_LOG_BUFFER: i32 = 5;
pub const CU_JIT_ERROR_LOG_BUFFER_SIZE_BYTES: i32 = 6;
pub const CU_JIT_TARGET: i32 = 9;

// texture references
pub const CU_TRSF_READ_AS_INTEGER: u32 = 0x01;
pub const CU_AD_FORMAT_UNSIGNED_INT8: i32 = 0x01;
pub const CU_AD_FORMAT_UNSIGNED_INT32: i32 = 0x03;
pub const CU_AD_FORMAT_SIGNED_INT32: i32 = 0x0a;
pub const CU_AD_FORMAT_FLOAT: i32 = 0x20;

pub const CU_MEM_ATTACH_GLOBAL: u32 = 1;
pub const CU_EVENT_DEFAULT: u32 = 0;

#[link(name = "cuda")]
#[allow(dead_code)]
extern "C" {
    pub fn cuInit(flags: u32) -> CuResult;
    pub fn cuDriverGetVersion(version: *mut i32) -> CuResult;
    pub fn cuGetErrorName(error: CuResult, name: *mut *const i8) -> CuResult;
    pub fn cuGetErrorString(error: CuResult, string: *mut *const i8) -> CuResult;
    pub fn cuDeviceGetCount(count: *mut i32) -> CuResult;
    pub fn cuDeviceGet(device: *mut CuDevice, ordinal: i32) -> CuResult;
    pub fn cuDeviceGetName(name: *mut i8, len: i32, device: CuDevice) -> CuResult;
    pub fn cuDeviceGetAttribute(value: *mut i32, attribute: i32, device: CuDevice) -> CuResult;
    pub fn cuCtxCreate_v2(ctx: *mut CuContext, flags: u32, device: CuDevice) -> CuResult;
    pub fn cuCtxDestroy_v2(ctx: CuContext) -> CuResult;
    pub fn cuCtxSynchronize() -> CuResult;
    pub fn cuMemAlloc_v2(dptr: *mut CuDeviceptr, bytes: usize) -> CuResult;
    pub fn cuMemFree_v2(dptr: CuDeviceptr) -> CuResult;
    pub fn cuMemAllocHost_v2(pp: *mut *mut c_void, bytes: usize) -> CuResult;
    pub fn cuMemFreeHost(p: *mut c_void) -> CuResult;
    pub fn cuMemAllocManaged(dptr: *mut CuDeviceptr, bytes: usize, flags: u32) -> CuResult;
    pub fn cuMemHostGetDevicePointer_v2(
        dptr: *mut CuDeviceptr,
        p: *mut c_void,
        flags: u32,
    ) -> CuResult;
    pub fn cuMemcpyHtoD_v2(dst: CuDeviceptr, src: *const c_void, bytes: usize) -> CuResult;
    pub fn cuMemcpyDtoH_v2(dst: *mut c_void, src: CuDeviceptr, bytes: usize) -> CuResult;
    pub fn cuMemcpyDtoD_v2(dst: CuDeviceptr, src: CuDeviceptr, bytes: usize) -> CuResult;
    pub fn cuModuleLoadDataEx(
        module: *mut CuModule,
        image: *const c_void,
        num_options: u32,
        options: *mut i32,
        option_values: *mut *mut c_void,
    ) -> CuResult;
    pub fn cuModuleUnload(module: CuModule) -> CuResult;
    pub fn cuModuleGetFunction(func: *mut CuFunction, module: CuModule, name: *const i8)
        -> CuResult;
    pub fn cuModuleGetTexRef(texref: *mut CuTexRef, module: CuModule, name: *const i8) -> CuResult;
    pub fn cuTexRefSetFormat(texref: CuTexRef, format: i32, num_components: i32) -> CuResult;
    pub fn cuTexRefSetFlags(texref: CuTexRef, flags: u32) -> CuResult;
    pub fn cuTexRefSetAddress_v2(
        byte_offset: *mut usize,
        texref: CuTexRef,
        dptr: CuDeviceptr,
        bytes: usize,
    ) -> CuResult;
    pub fn cuLaunchKernel(
        func: CuFunction,
        grid_x: u32,
        grid_y: u32,
        grid_z: u32,
        block_x: u32,
        block_y: u32,
        block_z: u32,
        shared_mem_bytes: u32,
        stream: CuStream,
        kernel_params: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> CuResult;
    pub fn cuEventCreate(event: *mut CuEvent, flags: u32) -> CuResult;
    pub fn cuEventRecord(event: CuEvent, stream: CuStream) -> CuResult;
    pub fn cuEventSynchronize(event: CuEvent) -> CuResult;
    pub fn cuEventElapsedTime(ms: *mut f32, start: CuEvent, end: CuEvent) -> CuResult;
    pub fn cuEventDestroy_v2(event: CuEvent) -> CuResult;
}

#[link(name = "nvvm")]
#[allow(dead_code)]
extern "C" {
    pub fn nvvmVersion(major: *mut i32, minor: *mut i32) -> NvvmResult;
    pub fn nvvmGetErrorString(result: NvvmResult) -> *const i8;
    pub fn nvvmCreateProgram(program: *mut NvvmProgram) -> NvvmResult;
    pub fn nvvmDestroyProgram(program: *mut NvvmProgram) -> NvvmResult;
    pub fn nvvmAddModuleToProgram(
        program: NvvmProgram,
        buffer: *const i8,
        size: usize,
        name: *const i8,
    ) -> NvvmResult;
    pub fn nvvmCompileProgram(
        program: NvvmProgram,
        num_options: i32,
        options: *const *const i8,
    ) -> NvvmResult;
    pub fn nvvmGetProgramLogSize(program: NvvmProgram, size: *mut usize) -> NvvmResult;
    pub fn nvvmGetProgramLog(program: NvvmProgram, buffer: *mut i8) -> NvvmResult;
    pub fn nvvmGetCompiledResultSize(program: NvvmProgram, size: *mut usize) -> NvvmResult;
    pub fn nvvmGetCompiledResult(program: NvvmProgram, buffer: *mut i8) -> NvvmResult;
}

/// "NAME: description" text for a driver status code.
pub fn error_string(error: CuResult) -> String {
    let mut name: *const i8 = std::ptr::null();
    let mut text: *const i8 = std::ptr::null();
    unsafe {
        cuGetErrorName(error, &mut name);
        cuGetErrorString(error, &mut text);
    }
    let name = if name.is_null() {
        "CUDA_ERROR_UNKNOWN".to_string()
    } else {
        unsafe { std::ffi::CStr::from_ptr(name) }
            .to_string_lossy()
            .into_owned()
    };
    let text = if text.is_null() {
        format!("driver status {error}")
    } else {
        unsafe { std::ffi::CStr::from_ptr(text) }
            .to_string_lossy()
            .into_owned()
    };
    format!("{name}: {text}")
}

/// Text for an NVVM status code.
pub fn nvvm_error_string(result: NvvmResult) -> String {
    let text = unsafe { nvvmGetErrorString(result) };
    if text.is_null() {
        format!("NVVM status {result}")
    } else {
        unsafe { std::ffi::CStr::from_ptr(text) }
            .to_string_lossy()
            .into_owned()
    }
}
