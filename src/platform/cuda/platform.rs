//! CUDA driver + NVVM platform
//!
//! NVVM IR is compiled to PTX through libNVVM, the PTX is JIT-loaded by the
//! driver, and launches go through a single default context on the driver's
//! default stream. Module and function lookups share the two-level cache
//! protocol of the HSA platform.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex};

use crate::device::PlatformTag;
use crate::error::{RuntimeError, RuntimeResult};
use crate::launch::{self, LaunchParams};
use crate::platform::cuda::ffi::{self, CuDevice, CuFunction, CuModule, CuResult, NvvmResult};
use crate::platform::Platform;
use crate::profiling;
use crate::registry::ProgramRegistry;

const ERROR_LOG_SIZE: usize = 10240;

fn check(result: CuResult, api: &'static str) -> RuntimeResult<()> {
    if result == ffi::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(RuntimeError::Backend {
            api,
            code: result as i64,
            message: ffi::error_string(result),
        })
    }
}

fn check_nvvm(result: NvvmResult, api: &'static str) -> RuntimeResult<()> {
    if result == ffi::NVVM_SUCCESS {
        Ok(())
    } else {
        Err(RuntimeError::Backend {
            api,
            code: result as i64,
            message: ffi::nvvm_error_string(result),
        })
    }
}

fn launch_raw(
    func: CuFunction,
    blocks: [u32; 3],
    block: [u32; 3],
    arg_ptrs: &mut [*mut c_void],
) -> RuntimeResult<()> {
    check(
        unsafe {
            ffi::cuLaunchKernel(
                func,
                blocks[0],
                blocks[1],
                blocks[2],
                block[0],
                block[1],
                block[2],
                0,
                ptr::null_mut(),
                arg_ptrs.as_mut_ptr(),
                ptr::null_mut(),
            )
        },
        "cuLaunchKernel",
    )
}

#[derive(Debug, Default)]
struct CudaCaches {
    modules: HashMap<String, CuModule>,
    functions: HashMap<(usize, String), CuFunction>,
}

#[derive(Debug)]
struct CudaDevice {
    handle: CuDevice,
    name: String,
    capability: (i32, i32),
    caches: Mutex<CudaCaches>,
}

// SAFETY: module and function handles are driver references valid for the
// lifetime of the context; cache access is guarded by the per-device mutex.
unsafe impl Send for CudaDevice {}
unsafe impl Sync for CudaDevice {}

pub struct CudaPlatform {
    devices: Vec<CudaDevice>,
    context: ffi::CuContext,
    profiling: bool,
    registry: Arc<ProgramRegistry>,
}

// SAFETY: the context is a process-global driver handle; the driver API is
// thread-safe for calls within the same context.
unsafe impl Send for CudaPlatform {}
unsafe impl Sync for CudaPlatform {}

impl CudaPlatform {
    pub fn new(registry: Arc<ProgramRegistry>, profiling: bool) -> RuntimeResult<Self> {
        // The driver's on-disk JIT cache would mask recompilations.
        std::env::set_var("CUDA_CACHE_DISABLE", "1");

        check(unsafe { ffi::cuInit(0) }, "cuInit")?;

        let mut driver_version = 0;
        check(
            unsafe { ffi::cuDriverGetVersion(&mut driver_version) },
            "cuDriverGetVersion",
        )?;
        let (mut nvvm_major, mut nvvm_minor) = (0, 0);
        check_nvvm(
            unsafe { ffi::nvvmVersion(&mut nvvm_major, &mut nvvm_minor) },
            "nvvmVersion",
        )?;
        tracing::debug!(
            "CUDA driver {}.{}, NVVM {}.{}",
            driver_version / 1000,
            (driver_version % 100) / 10,
            nvvm_major,
            nvvm_minor
        );

        let mut count = 0;
        check(unsafe { ffi::cuDeviceGetCount(&mut count) }, "cuDeviceGetCount")?;

        let mut devices = Vec::with_capacity(count as usize);
        for ordinal in 0..count {
            let mut handle: CuDevice = 0;
            check(unsafe { ffi::cuDeviceGet(&mut handle, ordinal) }, "cuDeviceGet")?;

            let mut name_buf = [0i8; 100];
            check(
                unsafe { ffi::cuDeviceGetName(name_buf.as_mut_ptr(), 100, handle) },
                "cuDeviceGetName",
            )?;
            let name = unsafe { std::ffi::CStr::from_ptr(name_buf.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            let (mut major, mut minor) = (0, 0);
            check(
                unsafe {
                    ffi::cuDeviceGetAttribute(
                        &mut major,
                        ffi::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
                        handle,
                    )
                },
                "cuDeviceGetAttribute",
            )?;
            check(
                unsafe {
                    ffi::cuDeviceGetAttribute(
                        &mut minor,
                        ffi::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
                        handle,
                    )
                },
                "cuDeviceGetAttribute",
            )?;
            tracing::debug!(
                device = ordinal,
                name = %name,
                capability = %format!("{major}.{minor}"),
                "CUDA device"
            );

            devices.push(CudaDevice {
                handle,
                name,
                capability: (major, minor),
                caches: Mutex::new(CudaCaches::default()),
            });
        }

        let mut context: ffi::CuContext = ptr::null_mut();
        if let Some(first) = devices.first() {
            check(
                unsafe { ffi::cuCtxCreate_v2(&mut context, 0, first.handle) },
                "cuCtxCreate",
            )?;
        }

        Ok(CudaPlatform {
            devices,
            context,
            profiling,
            registry,
        })
    }

    /// Lower NVVM IR to PTX text. The result is NUL-terminated, ready for
    /// the driver's module loader.
    fn compile_nvvm(&self, capability: (i32, i32), file: &str, source: &str) -> RuntimeResult<Vec<u8>> {
        tracing::debug!(file, "compiling NVVM IR to PTX");

        let mut program: ffi::NvvmProgram = ptr::null_mut();
        check_nvvm(unsafe { ffi::nvvmCreateProgram(&mut program) }, "nvvmCreateProgram")?;

        let source_c = CString::new(source)
            .map_err(|e| RuntimeError::Jit(format!("NUL byte in IR for '{file}': {e}")))?;
        let name_c = CString::new(file)
            .map_err(|e| RuntimeError::Jit(format!("invalid module name '{file}': {e}")))?;
        let result = unsafe {
            ffi::nvvmAddModuleToProgram(
                program,
                source_c.as_ptr(),
                source_c.as_bytes().len(),
                name_c.as_ptr(),
            )
        };
        if result != ffi::NVVM_SUCCESS {
            unsafe { ffi::nvvmDestroyProgram(&mut program) };
            check_nvvm(result, "nvvmAddModuleToProgram")?;
        }

        let arch = CString::new(format!("-arch=compute_{}{}", capability.0, capability.1))
            .map_err(|e| RuntimeError::Internal(e.to_string()))?;
        let ftz = CString::new("-ftz=1").map_err(|e| RuntimeError::Internal(e.to_string()))?;
        let options = [arch.as_ptr(), ftz.as_ptr()];
        let result =
            unsafe { ffi::nvvmCompileProgram(program, options.len() as i32, options.as_ptr()) };
        if result != ffi::NVVM_SUCCESS {
            let log = Self::program_log(program);
            unsafe { ffi::nvvmDestroyProgram(&mut program) };
            return Err(RuntimeError::Jit(format!(
                "NVVM compilation of '{file}' failed: {}",
                log.unwrap_or_else(|| ffi::nvvm_error_string(result))
            )));
        }

        let mut ptx_size: usize = 0;
        let result = unsafe { ffi::nvvmGetCompiledResultSize(program, &mut ptx_size) };
        if result != ffi::NVVM_SUCCESS {
            unsafe { ffi::nvvmDestroyProgram(&mut program) };
            check_nvvm(result, "nvvmGetCompiledResultSize")?;
        }
        let mut ptx = vec![0u8; ptx_size];
        let result = unsafe { ffi::nvvmGetCompiledResult(program, ptx.as_mut_ptr() as *mut i8) };
        unsafe { ffi::nvvmDestroyProgram(&mut program) };
        check_nvvm(result, "nvvmGetCompiledResult")?;

        Ok(ptx)
    }

    fn program_log(program: ffi::NvvmProgram) -> Option<String> {
        let mut size: usize = 0;
        if unsafe { ffi::nvvmGetProgramLogSize(program, &mut size) } != ffi::NVVM_SUCCESS
            || size == 0
        {
            return None;
        }
        let mut buffer = vec![0u8; size];
        if unsafe { ffi::nvvmGetProgramLog(program, buffer.as_mut_ptr() as *mut i8) }
            != ffi::NVVM_SUCCESS
        {
            return None;
        }
        Some(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Load PTX into a driver module under JIT options targeting the
    /// device's compute capability.
    fn load_ptx(&self, capability: (i32, i32), file: &str, ptx: &[u8]) -> RuntimeResult<CuModule> {
        // cuModuleLoadDataEx expects a NUL-terminated image.
        let image = if ptx.last() == Some(&0) {
            ptx.to_vec()
        } else {
            let mut v = ptx.to_vec();
            v.push(0);
            v
        };

        let mut error_log = [0u8; ERROR_LOG_SIZE];
        let target = (capability.0 * 10 + capability.1) as usize;
        let mut options = [
            ffi::CU_JIT_ERROR_LOG_BUFFER,
            ffi::CU_JIT_ERROR_LOG_BUFFER_SIZE_BYTES,
            ffi::CU_JIT_TARGET,
        ];
        let mut option_values = [
            error_log.as_mut_ptr() as *mut c_void,
            ERROR_LOG_SIZE as *mut c_void,
            target as *mut c_void,
        ];

        let mut module: CuModule = ptr::null_mut();
        let result = unsafe {
            ffi::cuModuleLoadDataEx(
                &mut module,
                image.as_ptr() as *const c_void,
                options.len() as u32,
                options.as_mut_ptr(),
                option_values.as_mut_ptr(),
            )
        };
        if result != ffi::CUDA_SUCCESS {
            let end = error_log
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(error_log.len());
            let log = String::from_utf8_lossy(&error_log[..end]).into_owned();
            tracing::error!(file, log = %log, "PTX JIT failed");
            check(result, "cuModuleLoadDataEx")?;
        }
        Ok(module)
    }

    fn module_for(&self, dev: usize, file: &str) -> RuntimeResult<CuModule> {
        let device = &self.devices[dev];

        if let Some(module) = device.caches.lock()?.modules.get(file) {
            return Ok(*module);
        }

        // Build outside the lock; compilation can take a while.
        let ext = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let ptx: Vec<u8> = match ext {
            "ptx" => self.registry.load_binary(file)?,
            "nvvm" | "ll" => {
                let source = self.registry.load(file)?;
                self.compile_nvvm(device.capability, file, &source)?
            }
            _ => return Err(RuntimeError::UnsupportedExtension(file.to_string())),
        };
        let module = self.load_ptx(device.capability, file, &ptx)?;

        let mut caches = device.caches.lock()?;
        match caches.modules.entry(file.to_string()) {
            Entry::Occupied(mut existing) => {
                // Compile race; the last writer wins and the evicted module
                // is unloaded.
                let evicted = existing.insert(module);
                drop(caches);
                let result = unsafe { ffi::cuModuleUnload(evicted) };
                if result != ffi::CUDA_SUCCESS {
                    tracing::debug!(result, "unloading evicted module failed");
                }
                Ok(module)
            }
            Entry::Vacant(slot) => Ok(*slot.insert(module)),
        }
    }

    fn function_for(&self, dev: usize, file: &str, name: &str) -> RuntimeResult<CuFunction> {
        let device = &self.devices[dev];
        let module = self.module_for(dev, file)?;

        let key = (module as usize, name.to_string());
        if let Some(func) = device.caches.lock()?.functions.get(&key) {
            return Ok(*func);
        }

        let name_c = CString::new(name)
            .map_err(|e| RuntimeError::Internal(format!("invalid kernel name '{name}': {e}")))?;
        let mut func: CuFunction = ptr::null_mut();
        check(
            unsafe { ffi::cuModuleGetFunction(&mut func, module, name_c.as_ptr()) },
            "cuModuleGetFunction",
        )?;

        device.caches.lock()?.functions.entry(key).or_insert(func);
        Ok(func)
    }

    /// Bind a device allocation to a texture reference declared by the
    /// kernel module. `bytes` is the length of the bound range.
    pub fn bind_texture(
        &self,
        dev: usize,
        file: &str,
        tex_name: &str,
        ptr_value: *mut c_void,
        bytes: usize,
        format: i32,
    ) -> RuntimeResult<()> {
        let module = self.module_for(dev, file)?;
        let name_c = CString::new(tex_name)
            .map_err(|e| RuntimeError::Internal(format!("invalid texture name '{tex_name}': {e}")))?;
        let mut texref: ffi::CuTexRef = ptr::null_mut();
        check(
            unsafe { ffi::cuModuleGetTexRef(&mut texref, module, name_c.as_ptr()) },
            "cuModuleGetTexRef",
        )?;
        check(
            unsafe { ffi::cuTexRefSetFormat(texref, format, 1) },
            "cuTexRefSetFormat",
        )?;
        check(
            unsafe { ffi::cuTexRefSetFlags(texref, ffi::CU_TRSF_READ_AS_INTEGER) },
            "cuTexRefSetFlags",
        )?;
        check(
            unsafe {
                ffi::cuTexRefSetAddress_v2(ptr::null_mut(), texref, ptr_value as u64, bytes)
            },
            "cuTexRefSetAddress",
        )
    }
}

impl Platform for CudaPlatform {
    fn tag(&self) -> PlatformTag {
        PlatformTag::Cuda
    }

    fn name(&self) -> &'static str {
        "cuda"
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn alloc(&self, _dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        if bytes == 0 {
            return Ok(ptr::null_mut());
        }
        let mut dptr: ffi::CuDeviceptr = 0;
        check(unsafe { ffi::cuMemAlloc_v2(&mut dptr, bytes) }, "cuMemAlloc")?;
        Ok(dptr as *mut c_void)
    }

    fn alloc_host(&self, _dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        if bytes == 0 {
            return Ok(ptr::null_mut());
        }
        let mut mem: *mut c_void = ptr::null_mut();
        check(unsafe { ffi::cuMemAllocHost_v2(&mut mem, bytes) }, "cuMemAllocHost")?;
        Ok(mem)
    }

    fn alloc_unified(&self, _dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        if bytes == 0 {
            return Ok(ptr::null_mut());
        }
        let mut dptr: ffi::CuDeviceptr = 0;
        check(
            unsafe { ffi::cuMemAllocManaged(&mut dptr, bytes, ffi::CU_MEM_ATTACH_GLOBAL) },
            "cuMemAllocManaged",
        )?;
        Ok(dptr as *mut c_void)
    }

    fn get_device_ptr(&self, _dev: usize, host: *mut c_void) -> RuntimeResult<*mut c_void> {
        let mut dptr: ffi::CuDeviceptr = 0;
        check(
            unsafe { ffi::cuMemHostGetDevicePointer_v2(&mut dptr, host, 0) },
            "cuMemHostGetDevicePointer",
        )?;
        Ok(dptr as *mut c_void)
    }

    fn release(&self, _dev: usize, ptr_value: *mut c_void) -> RuntimeResult<()> {
        if ptr_value.is_null() {
            return Ok(());
        }
        check(unsafe { ffi::cuMemFree_v2(ptr_value as u64) }, "cuMemFree")
    }

    fn release_host(&self, _dev: usize, ptr_value: *mut c_void) -> RuntimeResult<()> {
        if ptr_value.is_null() {
            return Ok(());
        }
        check(unsafe { ffi::cuMemFreeHost(ptr_value) }, "cuMemFreeHost")
    }

    fn copy(
        &self,
        _dev: usize,
        src: *const c_void,
        src_off: usize,
        dst: *mut c_void,
        dst_off: usize,
        bytes: usize,
    ) -> RuntimeResult<()> {
        check(
            unsafe {
                ffi::cuMemcpyDtoD_v2(dst as u64 + dst_off as u64, src as u64 + src_off as u64, bytes)
            },
            "cuMemcpyDtoD",
        )
    }

    fn copy_from_host(
        &self,
        _dev: usize,
        src: *const c_void,
        dst: *mut c_void,
        dst_off: usize,
        bytes: usize,
    ) -> RuntimeResult<()> {
        check(
            unsafe { ffi::cuMemcpyHtoD_v2(dst as u64 + dst_off as u64, src, bytes) },
            "cuMemcpyHtoD",
        )
    }

    fn copy_to_host(
        &self,
        _dev: usize,
        src: *const c_void,
        src_off: usize,
        dst: *mut c_void,
        bytes: usize,
    ) -> RuntimeResult<()> {
        check(
            unsafe { ffi::cuMemcpyDtoH_v2(dst, src as u64 + src_off as u64, bytes) },
            "cuMemcpyDtoH",
        )
    }

    fn launch_kernel(&self, dev: usize, params: &LaunchParams) -> RuntimeResult<()> {
        params.validate()?;
        let func = self.function_for(dev, params.file, params.name)?;

        // The ABI hands work-item counts; the driver wants block counts.
        let blocks = launch::grid_blocks(params.grid, params.block);
        let mut arg_ptrs: Vec<*mut c_void> = params.args.to_vec();

        if !self.profiling {
            return launch_raw(func, blocks, params.block, &mut arg_ptrs);
        }

        let mut start: ffi::CuEvent = ptr::null_mut();
        let mut end: ffi::CuEvent = ptr::null_mut();
        check(
            unsafe { ffi::cuEventCreate(&mut start, ffi::CU_EVENT_DEFAULT) },
            "cuEventCreate",
        )?;
        check(
            unsafe { ffi::cuEventCreate(&mut end, ffi::CU_EVENT_DEFAULT) },
            "cuEventCreate",
        )?;

        check(
            unsafe { ffi::cuEventRecord(start, ptr::null_mut()) },
            "cuEventRecord",
        )?;
        let launched = launch_raw(func, blocks, params.block, &mut arg_ptrs);
        check(
            unsafe { ffi::cuEventRecord(end, ptr::null_mut()) },
            "cuEventRecord",
        )?;
        check(unsafe { ffi::cuEventSynchronize(end) }, "cuEventSynchronize")?;

        let mut ms: f32 = 0.0;
        check(
            unsafe { ffi::cuEventElapsedTime(&mut ms, start, end) },
            "cuEventElapsedTime",
        )?;
        unsafe {
            ffi::cuEventDestroy_v2(start);
            ffi::cuEventDestroy_v2(end);
        }

        profiling::add_micros((ms as f64 * 1000.0) as u64);
        tracing::debug!(
            kernel = params.name,
            blocks = ?blocks,
            block = ?params.block,
            elapsed_ms = ms,
            "kernel timing"
        );
        launched
    }

    fn synchronize(&self, _dev: usize) -> RuntimeResult<()> {
        check(unsafe { ffi::cuCtxSynchronize() }, "cuCtxSynchronize")
    }

    fn load_kernel(&self, dev: usize, file: &str, name: &str) -> RuntimeResult<()> {
        self.function_for(dev, file, name).map(|_| ())
    }
}

impl Drop for CudaPlatform {
    fn drop(&mut self) {
        for device in self.devices.iter_mut().rev() {
            let caches = device.caches.get_mut().unwrap_or_else(|e| e.into_inner());
            caches.functions.clear();
            for (_, module) in caches.modules.drain() {
                let result = unsafe { ffi::cuModuleUnload(module) };
                if result != ffi::CUDA_SUCCESS {
                    tracing::debug!(result, device = %device.name, "cuModuleUnload failed");
                }
            }
        }
        if !self.context.is_null() {
            let result = unsafe { ffi::cuCtxDestroy_v2(self.context) };
            if result != ffi::CUDA_SUCCESS {
                tracing::debug!(result, "cuCtxDestroy failed");
            }
        }
    }
}
