//! HSA platform state machine
//!
//! Queue and signal management, the two-level kernel cache, kernarg
//! marshaling, and the asynchronous dispatch/completion protocol.

use std::collections::hash_map::Entry;
use std::ffi::{c_void, CString};
use std::path::Path;
use std::ptr;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::device::PlatformTag;
use crate::error::{RuntimeError, RuntimeResult};
use crate::launch::{self, LaunchParams};
use crate::platform::hsa::device::{
    buf_to_string, device_type_str, profile_str, segment_str, HsaDevice, KernelCaches, KernelInfo,
    ProfileJob,
};
use crate::platform::hsa::ffi::{self, HsaAgent, HsaRegion, HsaSignal, HsaStatus};
use crate::platform::Platform;
use crate::profiling;
use crate::registry::ProgramRegistry;

/// Launches a reaper can fall behind before the launcher blocks.
const PROFILE_QUEUE_DEPTH: usize = 64;

fn check(status: HsaStatus, api: &'static str) -> RuntimeResult<()> {
    if status == ffi::HSA_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(RuntimeError::Backend {
            api,
            code: status as i64,
            message: ffi::status_string(status),
        })
    }
}

extern "C" fn collect_agents(agent: HsaAgent, data: *mut c_void) -> HsaStatus {
    let agents = unsafe { &mut *(data as *mut Vec<HsaAgent>) };
    agents.push(agent);
    ffi::HSA_STATUS_SUCCESS
}

extern "C" fn collect_regions(region: HsaRegion, data: *mut c_void) -> HsaStatus {
    let regions = unsafe { &mut *(data as *mut Vec<HsaRegion>) };
    regions.push(region);
    ffi::HSA_STATUS_SUCCESS
}

pub struct HsaPlatform {
    devices: Vec<HsaDevice>,
    /// System timestamp frequency in Hz, used to convert dispatch times.
    frequency: u64,
    registry: Arc<ProgramRegistry>,
    reapers: Vec<JoinHandle<()>>,
}

impl HsaPlatform {
    pub fn new(registry: Arc<ProgramRegistry>, profiling: bool) -> RuntimeResult<Self> {
        check(unsafe { ffi::hsa_init() }, "hsa_init")?;

        let mut version_major: u16 = 0;
        let mut version_minor: u16 = 0;
        check(
            unsafe {
                ffi::hsa_system_get_info(
                    ffi::HSA_SYSTEM_INFO_VERSION_MAJOR,
                    &mut version_major as *mut u16 as *mut c_void,
                )
            },
            "hsa_system_get_info",
        )?;
        check(
            unsafe {
                ffi::hsa_system_get_info(
                    ffi::HSA_SYSTEM_INFO_VERSION_MINOR,
                    &mut version_minor as *mut u16 as *mut c_void,
                )
            },
            "hsa_system_get_info",
        )?;
        tracing::debug!("HSA system runtime version {version_major}.{version_minor}");

        let mut frequency: u64 = 0;
        check(
            unsafe {
                ffi::hsa_system_get_info(
                    ffi::HSA_SYSTEM_INFO_TIMESTAMP_FREQUENCY,
                    &mut frequency as *mut u64 as *mut c_void,
                )
            },
            "hsa_system_get_info",
        )?;

        let mut agents: Vec<HsaAgent> = Vec::new();
        check(
            unsafe {
                ffi::hsa_iterate_agents(collect_agents, &mut agents as *mut _ as *mut c_void)
            },
            "hsa_iterate_agents",
        )?;

        let mut devices = Vec::with_capacity(agents.len());
        for (index, agent) in agents.into_iter().enumerate() {
            devices.push(Self::init_device(agent, index)?);
        }

        let mut platform = HsaPlatform {
            devices,
            frequency,
            registry,
            reapers: Vec::new(),
        };
        if profiling {
            platform.spawn_reapers()?;
        }
        Ok(platform)
    }

    fn init_device(agent: HsaAgent, index: usize) -> RuntimeResult<HsaDevice> {
        let mut name_buf = [0u8; 64];
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_NAME,
                    name_buf.as_mut_ptr() as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        let name = buf_to_string(&name_buf);
        tracing::debug!(device = index, name = %name, "HSA device");

        let mut vendor_buf = [0u8; 64];
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_VENDOR_NAME,
                    vendor_buf.as_mut_ptr() as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        tracing::debug!(vendor = %buf_to_string(&vendor_buf), "  vendor");

        let mut profile: i32 = 0;
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_PROFILE,
                    &mut profile as *mut i32 as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        tracing::debug!(profile = profile_str(profile), "  profile");

        let mut float_mode: i32 = 0;
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_DEFAULT_FLOAT_ROUNDING_MODE,
                    &mut float_mode as *mut i32 as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;

        let isa = Self::query_isa(agent)?;
        tracing::debug!(isa = %isa, "  ISA");

        let mut device_type: i32 = 0;
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_DEVICE,
                    &mut device_type as *mut i32 as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        tracing::debug!(device_type = device_type_str(device_type), "  type");

        let mut version_major: u16 = 0;
        let mut version_minor: u16 = 0;
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_VERSION_MAJOR,
                    &mut version_major as *mut u16 as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_VERSION_MINOR,
                    &mut version_minor as *mut u16 as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        tracing::debug!("  HSA runtime version {version_major}.{version_minor}");

        let mut queue_size: u32 = 0;
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_QUEUE_MAX_SIZE,
                    &mut queue_size as *mut u32 as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;
        tracing::debug!(queue_size, "  queue capacity");

        let mut queue: *mut ffi::HsaQueue = ptr::null_mut();
        if queue_size > 0 {
            check(
                unsafe {
                    ffi::hsa_queue_create(
                        agent,
                        queue_size,
                        ffi::HSA_QUEUE_TYPE_SINGLE,
                        ptr::null_mut(),
                        ptr::null_mut(),
                        u32::MAX,
                        u32::MAX,
                        &mut queue,
                    )
                },
                "hsa_queue_create",
            )?;
            check(
                unsafe { ffi::hsa_amd_profiling_set_profiler_enabled(queue, 1) },
                "hsa_amd_profiling_set_profiler_enabled",
            )?;
        }

        let mut signal = HsaSignal::default();
        check(
            unsafe { ffi::hsa_signal_create(0, 0, ptr::null(), &mut signal) },
            "hsa_signal_create",
        )?;

        let mut device = HsaDevice {
            agent,
            name,
            isa,
            profile,
            float_mode,
            queue,
            signal,
            kernarg_region: HsaRegion::default(),
            finegrained_region: HsaRegion::default(),
            coarsegrained_region: HsaRegion::default(),
            caches: Mutex::new(KernelCaches::default()),
            profile_tx: None,
        };
        Self::classify_regions(&mut device)?;
        Ok(device)
    }

    fn query_isa(agent: HsaAgent) -> RuntimeResult<String> {
        let mut isa = ffi::HsaIsa::default();
        check(
            unsafe {
                ffi::hsa_agent_get_info(
                    agent,
                    ffi::HSA_AGENT_INFO_ISA,
                    &mut isa as *mut _ as *mut c_void,
                )
            },
            "hsa_agent_get_info",
        )?;

        let mut name_length: u32 = 0;
        check(
            unsafe {
                ffi::hsa_isa_get_info_alt(
                    isa,
                    ffi::HSA_ISA_INFO_NAME_LENGTH,
                    &mut name_length as *mut u32 as *mut c_void,
                )
            },
            "hsa_isa_get_info_alt",
        )?;
        let mut name_buf = vec![0u8; name_length as usize + 1];
        check(
            unsafe {
                ffi::hsa_isa_get_info_alt(
                    isa,
                    ffi::HSA_ISA_INFO_NAME,
                    name_buf.as_mut_ptr() as *mut c_void,
                )
            },
            "hsa_isa_get_info_alt",
        )?;

        // Full name is e.g. "amdgcn-amd-amdhsa--gfx906"; the code
        // generator only needs the suffix after the last dash.
        let full = buf_to_string(&name_buf);
        Ok(full
            .rsplit('-')
            .next()
            .map(str::to_string)
            .unwrap_or_default())
    }

    fn classify_regions(device: &mut HsaDevice) -> RuntimeResult<()> {
        let mut regions: Vec<HsaRegion> = Vec::new();
        check(
            unsafe {
                ffi::hsa_agent_iterate_regions(
                    device.agent,
                    collect_regions,
                    &mut regions as *mut _ as *mut c_void,
                )
            },
            "hsa_agent_iterate_regions",
        )?;

        for region in regions {
            let mut segment: u32 = 0;
            check(
                unsafe {
                    ffi::hsa_region_get_info(
                        region,
                        ffi::HSA_REGION_INFO_SEGMENT,
                        &mut segment as *mut u32 as *mut c_void,
                    )
                },
                "hsa_region_get_info",
            )?;
            let mut flags: u32 = 0;
            check(
                unsafe {
                    ffi::hsa_region_get_info(
                        region,
                        ffi::HSA_REGION_INFO_GLOBAL_FLAGS,
                        &mut flags as *mut u32 as *mut c_void,
                    )
                },
                "hsa_region_get_info",
            )?;
            let mut alloc_allowed: u8 = 0;
            check(
                unsafe {
                    ffi::hsa_region_get_info(
                        region,
                        ffi::HSA_REGION_INFO_RUNTIME_ALLOC_ALLOWED,
                        &mut alloc_allowed as *mut u8 as *mut c_void,
                    )
                },
                "hsa_region_get_info",
            )?;
            tracing::debug!(
                segment = segment_str(segment),
                flags,
                alloc_allowed = alloc_allowed != 0,
                "  region"
            );

            if flags & ffi::HSA_REGION_GLOBAL_FLAG_KERNARG != 0 {
                device.kernarg_region = region;
            }
            if flags & ffi::HSA_REGION_GLOBAL_FLAG_FINE_GRAINED != 0 {
                device.finegrained_region = region;
            }
            if flags & ffi::HSA_REGION_GLOBAL_FLAG_COARSE_GRAINED != 0 {
                device.coarsegrained_region = region;
            }
        }
        Ok(())
    }

    fn spawn_reapers(&mut self) -> RuntimeResult<()> {
        for (index, device) in self.devices.iter_mut().enumerate() {
            let (tx, rx) = sync_channel(PROFILE_QUEUE_DEPTH);
            device.profile_tx = Some(tx);
            let agent = device.agent;
            let device_signal = device.signal;
            let frequency = self.frequency;
            let handle = std::thread::Builder::new()
                .name(format!("kf-hsa-reaper-{index}"))
                .spawn(move || reap_completions(rx, agent, device_signal, frequency))
                .map_err(|e| RuntimeError::Internal(format!("cannot spawn reaper: {e}")))?;
            self.reapers.push(handle);
        }
        Ok(())
    }

    fn alloc_from(&self, region: HsaRegion, bytes: usize) -> RuntimeResult<*mut c_void> {
        if bytes == 0 {
            return Ok(ptr::null_mut());
        }
        let mut mem: *mut c_void = ptr::null_mut();
        check(
            unsafe { ffi::hsa_memory_allocate(region, bytes, &mut mem) },
            "hsa_memory_allocate",
        )?;
        Ok(mem)
    }

    /// Resolve `(file, name)` into a launchable kernel, compiling and
    /// loading on the first call per device. The device lock is released
    /// across file I/O, JIT compilation, and symbol resolution.
    fn kernel_for(&self, dev: usize, file: &str, name: &str) -> RuntimeResult<KernelInfo> {
        let device = &self.devices[dev];

        let cached = device.caches.lock()?.programs.get(file).copied();
        let executable = match cached {
            Some(executable) => executable,
            None => {
                let built = self.build_executable(device, dev, file)?;
                let mut caches = device.caches.lock()?;
                match caches.programs.entry(file.to_string()) {
                    Entry::Occupied(mut existing) => {
                        // Compile race; the last writer wins and the evicted
                        // executable is destroyed.
                        let evicted = existing.insert(built);
                        drop(caches);
                        let status = unsafe { ffi::hsa_executable_destroy(evicted) };
                        if status != ffi::HSA_STATUS_SUCCESS {
                            tracing::debug!(status, "destroying evicted executable failed");
                        }
                        built
                    }
                    Entry::Vacant(slot) => *slot.insert(built),
                }
            }
        };

        let key = (executable.handle, name.to_string());
        if let Some(info) = device.caches.lock()?.kernels.get(&key) {
            return Ok(*info);
        }
        let info = Self::resolve_symbol(device, executable, name)?;
        device.caches.lock()?.kernels.entry(key).or_insert(info);
        Ok(info)
    }

    fn build_executable(
        &self,
        device: &HsaDevice,
        dev: usize,
        file: &str,
    ) -> RuntimeResult<ffi::HsaExecutable> {
        let ext = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let gcn: Vec<u8> = match ext {
            "gcn" => self.registry.load_binary(file)?,
            "amdgpu" => {
                let source = self.registry.load(file)?;
                self.compile_gcn(dev, file, &source, &device.isa)?
            }
            _ => return Err(RuntimeError::UnsupportedExtension(file.to_string())),
        };

        tracing::debug!(
            file,
            device = dev,
            profile = profile_str(device.profile),
            "loading code object"
        );

        let mut reader = ffi::HsaCodeObjectReader::default();
        check(
            unsafe {
                ffi::hsa_code_object_reader_create_from_memory(
                    gcn.as_ptr() as *const c_void,
                    gcn.len(),
                    &mut reader,
                )
            },
            "hsa_code_object_reader_create_from_memory",
        )?;

        let mut executable = ffi::HsaExecutable::default();
        check(
            unsafe {
                ffi::hsa_executable_create_alt(
                    ffi::HSA_PROFILE_FULL,
                    device.float_mode,
                    ptr::null(),
                    &mut executable,
                )
            },
            "hsa_executable_create_alt",
        )?;

        let mut loaded = ffi::HsaLoadedCodeObject::default();
        check(
            unsafe {
                ffi::hsa_executable_load_agent_code_object(
                    executable,
                    device.agent,
                    reader,
                    ptr::null(),
                    &mut loaded,
                )
            },
            "hsa_executable_load_agent_code_object",
        )?;
        check(
            unsafe { ffi::hsa_executable_freeze(executable, ptr::null()) },
            "hsa_executable_freeze",
        )?;
        check(
            unsafe { ffi::hsa_code_object_reader_destroy(reader) },
            "hsa_code_object_reader_destroy",
        )?;

        let mut validated: u32 = 0;
        check(
            unsafe { ffi::hsa_executable_validate(executable, &mut validated) },
            "hsa_executable_validate",
        )?;
        if validated != 0 {
            tracing::debug!(validated, file, "executable validation reported non-zero");
        }

        Ok(executable)
    }

    #[cfg(feature = "jit")]
    fn compile_gcn(
        &self,
        dev: usize,
        file: &str,
        source: &str,
        isa: &str,
    ) -> RuntimeResult<Vec<u8>> {
        tracing::debug!(file, device = dev, isa, "lowering IR to GCN");
        super::codegen::emit_gcn(source, isa, file, &self.registry)
    }

    #[cfg(not(feature = "jit"))]
    fn compile_gcn(
        &self,
        _dev: usize,
        file: &str,
        _source: &str,
        _isa: &str,
    ) -> RuntimeResult<Vec<u8>> {
        Err(RuntimeError::Jit(format!(
            "built without the `jit` feature; cannot compile '{file}'"
        )))
    }

    fn resolve_symbol(
        device: &HsaDevice,
        executable: ffi::HsaExecutable,
        name: &str,
    ) -> RuntimeResult<KernelInfo> {
        let symbol_name = CString::new(name)
            .map_err(|e| RuntimeError::Internal(format!("invalid kernel name '{name}': {e}")))?;
        let mut symbol = ffi::HsaExecutableSymbol::default();
        check(
            unsafe {
                ffi::hsa_executable_get_symbol_by_name(
                    executable,
                    symbol_name.as_ptr(),
                    &device.agent,
                    &mut symbol,
                )
            },
            "hsa_executable_get_symbol_by_name",
        )?;

        let mut object: u64 = 0;
        check(
            unsafe {
                ffi::hsa_executable_symbol_get_info(
                    symbol,
                    ffi::HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_OBJECT,
                    &mut object as *mut u64 as *mut c_void,
                )
            },
            "hsa_executable_symbol_get_info",
        )?;
        let mut kernarg_segment_size: u32 = 0;
        check(
            unsafe {
                ffi::hsa_executable_symbol_get_info(
                    symbol,
                    ffi::HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_KERNARG_SEGMENT_SIZE,
                    &mut kernarg_segment_size as *mut u32 as *mut c_void,
                )
            },
            "hsa_executable_symbol_get_info",
        )?;
        let mut group_segment_size: u32 = 0;
        check(
            unsafe {
                ffi::hsa_executable_symbol_get_info(
                    symbol,
                    ffi::HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_GROUP_SEGMENT_SIZE,
                    &mut group_segment_size as *mut u32 as *mut c_void,
                )
            },
            "hsa_executable_symbol_get_info",
        )?;
        let mut private_segment_size: u32 = 0;
        check(
            unsafe {
                ffi::hsa_executable_symbol_get_info(
                    symbol,
                    ffi::HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_PRIVATE_SEGMENT_SIZE,
                    &mut private_segment_size as *mut u32 as *mut c_void,
                )
            },
            "hsa_executable_symbol_get_info",
        )?;

        Ok(KernelInfo {
            object,
            kernarg_segment_size,
            group_segment_size,
            private_segment_size,
        })
    }
}

/// Per-device completion worker. Waits for each profiled launch to finish,
/// accounts its dispatch time, and retires the in-flight count.
fn reap_completions(
    rx: Receiver<ProfileJob>,
    agent: HsaAgent,
    device_signal: HsaSignal,
    frequency: u64,
) {
    while let Ok(job) = rx.recv() {
        let completion = unsafe {
            ffi::hsa_signal_wait_relaxed(
                job.signal,
                ffi::HSA_SIGNAL_CONDITION_EQ,
                0,
                u64::MAX,
                ffi::HSA_WAIT_STATE_ACTIVE,
            )
        };
        if completion != 0 {
            tracing::debug!(completion, "launch signal completed with non-zero value");
        }

        let mut times = ffi::HsaAmdProfilingDispatchTime::default();
        let status =
            unsafe { ffi::hsa_amd_profiling_get_dispatch_time(agent, job.signal, &mut times) };
        if status != ffi::HSA_STATUS_SUCCESS {
            tracing::error!(
                status,
                message = %ffi::status_string(status),
                "hsa_amd_profiling_get_dispatch_time failed"
            );
        } else {
            let elapsed = times.end.saturating_sub(times.start);
            let us = elapsed as f64 * 1_000_000.0 / frequency as f64;
            profiling::add_micros(us as u64);
        }

        // The device signal must retire even when timing failed.
        unsafe { ffi::hsa_signal_subtract_relaxed(device_signal, 1) };

        if !job.kernarg.is_null() {
            let status = unsafe { ffi::hsa_memory_free(job.kernarg) };
            if status != ffi::HSA_STATUS_SUCCESS {
                tracing::debug!(status, "freeing kernarg buffer failed");
            }
        }
        let status = unsafe { ffi::hsa_signal_destroy(job.signal) };
        if status != ffi::HSA_STATUS_SUCCESS {
            tracing::debug!(status, "destroying launch signal failed");
        }
    }
}

impl Platform for HsaPlatform {
    fn tag(&self) -> PlatformTag {
        PlatformTag::Hsa
    }

    fn name(&self) -> &'static str {
        "hsa"
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn alloc(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        self.alloc_from(self.devices[dev].coarsegrained_region, bytes)
    }

    fn alloc_host(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        self.alloc_from(self.devices[dev].finegrained_region, bytes)
    }

    fn alloc_unified(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        self.alloc_from(self.devices[dev].finegrained_region, bytes)
    }

    fn get_device_ptr(&self, _dev: usize, host: *mut c_void) -> RuntimeResult<*mut c_void> {
        // Fine-grained allocations are visible to the agent as-is.
        Ok(host)
    }

    fn release(&self, _dev: usize, ptr: *mut c_void) -> RuntimeResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        check(unsafe { ffi::hsa_memory_free(ptr) }, "hsa_memory_free")
    }

    fn release_host(&self, dev: usize, ptr: *mut c_void) -> RuntimeResult<()> {
        self.release(dev, ptr)
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
                ffi::hsa_memory_copy(
                    (dst as *mut u8).add(dst_off) as *mut c_void,
                    (src as *const u8).add(src_off) as *const c_void,
                    bytes,
                )
            },
            "hsa_memory_copy",
        )
    }

    fn copy_from_host(
        &self,
        dev: usize,
        src: *const c_void,
        dst: *mut c_void,
        dst_off: usize,
        bytes: usize,
    ) -> RuntimeResult<()> {
        self.copy(dev, src, 0, dst, dst_off, bytes)
    }

    fn copy_to_host(
        &self,
        dev: usize,
        src: *const c_void,
        src_off: usize,
        dst: *mut c_void,
        bytes: usize,
    ) -> RuntimeResult<()> {
        self.copy(dev, src, src_off, dst, 0, bytes)
    }

    fn launch_kernel(&self, dev: usize, params: &LaunchParams) -> RuntimeResult<()> {
        params.validate()?;
        let device = &self.devices[dev];
        if device.queue.is_null() {
            return Err(RuntimeError::Unsupported(format!(
                "HSA device {dev} ('{}') cannot execute kernels",
                device.name
            )));
        }

        let info = self.kernel_for(dev, params.file, params.name)?;

        let kernarg =
            self.alloc_from(device.kernarg_region, info.kernarg_segment_size as usize)?;
        let packed = unsafe {
            launch::pack_kernargs(kernarg as *mut u8, info.kernarg_segment_size as usize, params)
        };
        if packed != info.kernarg_segment_size as usize {
            tracing::debug!(
                kernel = params.name,
                declared = info.kernarg_segment_size,
                packed,
                "kernarg segment size differs from packed argument size"
            );
        }

        unsafe { ffi::hsa_signal_add_relaxed(device.signal, 1) };

        let completion_signal = match &device.profile_tx {
            Some(tx) => {
                let mut launch_signal = HsaSignal::default();
                check(
                    unsafe { ffi::hsa_signal_create(1, 0, ptr::null(), &mut launch_signal) },
                    "hsa_signal_create",
                )?;
                tx.send(ProfileJob {
                    signal: launch_signal,
                    kernarg,
                })
                .map_err(|_| {
                    RuntimeError::Internal("completion reaper is not running".to_string())
                })?;
                launch_signal
            }
            None => device.signal,
        };

        let mut aql: ffi::HsaKernelDispatchPacket = unsafe { std::mem::zeroed() };
        aql.header = (ffi::HSA_FENCE_SCOPE_SYSTEM << ffi::HSA_PACKET_HEADER_ACQUIRE_FENCE_SCOPE)
            | (ffi::HSA_FENCE_SCOPE_SYSTEM << ffi::HSA_PACKET_HEADER_RELEASE_FENCE_SCOPE)
            | (ffi::HSA_PACKET_TYPE_KERNEL_DISPATCH << ffi::HSA_PACKET_HEADER_TYPE);
        aql.setup = 3 << ffi::HSA_KERNEL_DISPATCH_PACKET_SETUP_DIMENSIONS;
        aql.workgroup_size_x = params.block[0] as u16;
        aql.workgroup_size_y = params.block[1] as u16;
        aql.workgroup_size_z = params.block[2] as u16;
        aql.grid_size_x = params.grid[0];
        aql.grid_size_y = params.grid[1];
        aql.grid_size_z = params.grid[2];
        aql.completion_signal = completion_signal;
        aql.kernel_object = info.object;
        aql.kernarg_address = kernarg;
        aql.private_segment_size = info.private_segment_size;
        aql.group_segment_size = info.group_segment_size;

        unsafe {
            let queue = device.queue;
            let index = ffi::hsa_queue_load_write_index_relaxed(queue);
            let mask = (*queue).size as u64 - 1;
            let slot =
                ((*queue).base_address as *mut ffi::HsaKernelDispatchPacket).add((index & mask) as usize);
            slot.write(aql);
            ffi::hsa_queue_store_write_index_relaxed(queue, index + 1);
            ffi::hsa_signal_store_relaxed((*queue).doorbell_signal, index as i64);
        }

        // When profiling is off the packet completion itself decrements the
        // device signal, so nothing more to do here.
        Ok(())
    }

    fn synchronize(&self, dev: usize) -> RuntimeResult<()> {
        let completion = unsafe {
            ffi::hsa_signal_wait_relaxed(
                self.devices[dev].signal,
                ffi::HSA_SIGNAL_CONDITION_EQ,
                0,
                u64::MAX,
                ffi::HSA_WAIT_STATE_ACTIVE,
            )
        };
        if completion != 0 {
            tracing::debug!(completion, "device signal completed with non-zero value");
        }
        Ok(())
    }

    fn load_kernel(&self, dev: usize, file: &str, name: &str) -> RuntimeResult<()> {
        self.kernel_for(dev, file, name).map(|_| ())
    }
}

impl Drop for HsaPlatform {
    fn drop(&mut self) {
        // Closing the channels lets the reapers drain and exit.
        for device in self.devices.iter_mut() {
            device.profile_tx.take();
        }
        for handle in self.reapers.drain(..) {
            let _ = handle.join();
        }

        for device in self.devices.iter_mut().rev() {
            let caches = device.caches.get_mut().unwrap_or_else(|e| e.into_inner());
            for (_, executable) in caches.programs.drain() {
                let status = unsafe { ffi::hsa_executable_destroy(executable) };
                if status != ffi::HSA_STATUS_SUCCESS {
                    tracing::debug!(status, "hsa_executable_destroy failed");
                }
            }
            if !device.queue.is_null() {
                let status = unsafe { ffi::hsa_queue_destroy(device.queue) };
                if status != ffi::HSA_STATUS_SUCCESS {
                    tracing::debug!(status, "hsa_queue_destroy failed");
                }
            }
            let status = unsafe { ffi::hsa_signal_destroy(device.signal) };
            if status != ffi::HSA_STATUS_SUCCESS {
                tracing::debug!(status, "hsa_signal_destroy failed");
            }
        }

        let status = unsafe { ffi::hsa_shut_down() };
        if status != ffi::HSA_STATUS_SUCCESS {
            tracing::debug!(status, "hsa_shut_down failed");
        }
    }
}
