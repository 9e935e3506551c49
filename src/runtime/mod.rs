//! Runtime registry and dispatch
//!
//! Owns the ordered platform list, decodes device ids, and routes every ABI
//! call to the platform that owns the target device. Cross-platform copies
//! are mediated through host memory.

use std::ffi::c_void;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::device::{DeviceId, PlatformTag};
use crate::error::{RuntimeError, RuntimeResult};
use crate::launch::LaunchParams;
use crate::platform::host::HostPlatform;
use crate::platform::Platform;
use crate::registry::ProgramRegistry;

const PROFILE_ENV: &str = "KERNELFORGE_PROFILE";

static GLOBAL: Lazy<Runtime> = Lazy::new(Runtime::from_env);

/// Process-wide runtime instance used by the C ABI.
pub fn global() -> &'static Runtime {
    &GLOBAL
}

pub struct Runtime {
    platforms: Vec<Box<dyn Platform>>,
    registry: Arc<ProgramRegistry>,
    profiling: bool,
}

impl Runtime {
    /// Construct from the environment: logging, profiling flag, and every
    /// platform compiled into this build. Platform construction failures
    /// are fatal; a runtime without its configured backends is unusable.
    pub fn from_env() -> Self {
        crate::logging::init_from_env();
        let profiling = std::env::var(PROFILE_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self::new(profiling)
    }

    pub fn new(profiling: bool) -> Self {
        let registry = Arc::new(ProgramRegistry::new());
        let mut platforms: Vec<Box<dyn Platform>> = vec![Box::new(HostPlatform::new())];

        #[cfg(feature = "cuda")]
        {
            use crate::platform::cuda::CudaPlatform;
            match CudaPlatform::new(Arc::clone(&registry), profiling) {
                Ok(platform) => platforms.push(Box::new(platform)),
                Err(err) => {
                    tracing::error!(error = %err, "CUDA platform initialization failed");
                    eprintln!("kernelforge: CUDA platform initialization failed: {err}");
                    std::process::exit(1);
                }
            }
        }

        #[cfg(feature = "hsa")]
        {
            use crate::platform::hsa::HsaPlatform;
            match HsaPlatform::new(Arc::clone(&registry), profiling) {
                Ok(platform) => platforms.push(Box::new(platform)),
                Err(err) => {
                    tracing::error!(error = %err, "HSA platform initialization failed");
                    eprintln!("kernelforge: HSA platform initialization failed: {err}");
                    std::process::exit(1);
                }
            }
        }

        Runtime {
            platforms,
            registry,
            profiling,
        }
    }

    pub fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    fn platform_for(&self, tag: PlatformTag) -> RuntimeResult<&dyn Platform> {
        self.platforms
            .iter()
            .map(|p| p.as_ref())
            .find(|p| p.tag() == tag)
            .ok_or(RuntimeError::UnknownPlatform(tag as u32))
    }

    fn resolve(&self, dev: i32) -> RuntimeResult<(&dyn Platform, usize)> {
        let id = DeviceId::decode(dev)?;
        let platform = self.platform_for(id.tag)?;
        if id.index >= platform.device_count() {
            return Err(RuntimeError::InvalidDevice {
                platform: platform.name(),
                index: id.index,
                count: platform.device_count(),
            });
        }
        Ok((platform, id.index))
    }

    pub fn alloc(&self, dev: i32, bytes: i64) -> RuntimeResult<*mut c_void> {
        let bytes = check_size(bytes)?;
        if bytes == 0 {
            return Ok(std::ptr::null_mut());
        }
        let (platform, index) = self.resolve(dev)?;
        platform.alloc(index, bytes)
    }

    pub fn alloc_host(&self, dev: i32, bytes: i64) -> RuntimeResult<*mut c_void> {
        let bytes = check_size(bytes)?;
        if bytes == 0 {
            return Ok(std::ptr::null_mut());
        }
        let (platform, index) = self.resolve(dev)?;
        platform.alloc_host(index, bytes)
    }

    pub fn alloc_unified(&self, dev: i32, bytes: i64) -> RuntimeResult<*mut c_void> {
        let bytes = check_size(bytes)?;
        if bytes == 0 {
            return Ok(std::ptr::null_mut());
        }
        let (platform, index) = self.resolve(dev)?;
        platform.alloc_unified(index, bytes)
    }

    pub fn get_device_ptr(&self, dev: i32, host: *mut c_void) -> RuntimeResult<*mut c_void> {
        let (platform, index) = self.resolve(dev)?;
        platform.get_device_ptr(index, host)
    }

    pub fn release(&self, dev: i32, ptr: *mut c_void) -> RuntimeResult<()> {
        let (platform, index) = self.resolve(dev)?;
        platform.release(index, ptr)
    }

    pub fn release_host(&self, dev: i32, ptr: *mut c_void) -> RuntimeResult<()> {
        let (platform, index) = self.resolve(dev)?;
        platform.release_host(index, ptr)
    }

    /// Copy `bytes` from `(src_dev, src + src_off)` to
    /// `(dst_dev, dst + dst_off)`. Same-platform copies are delegated and
    /// may use device-side DMA; everything else stages through the host.
    pub fn copy(
        &self,
        src_dev: i32,
        src: *const c_void,
        src_off: i64,
        dst_dev: i32,
        dst: *mut c_void,
        dst_off: i64,
        bytes: i64,
    ) -> RuntimeResult<()> {
        let bytes = check_size(bytes)?;
        let src_off = check_size(src_off)?;
        let dst_off = check_size(dst_off)?;
        if bytes == 0 {
            return Ok(());
        }

        let (src_platform, src_index) = self.resolve(src_dev)?;
        let (dst_platform, dst_index) = self.resolve(dst_dev)?;

        if src_platform.tag() == dst_platform.tag() {
            return src_platform.copy(src_index, src, src_off, dst, dst_off, bytes);
        }

        match (src_platform.tag(), dst_platform.tag()) {
            (PlatformTag::Host, _) => {
                let src = unsafe { (src as *const u8).add(src_off) } as *const c_void;
                dst_platform.copy_from_host(dst_index, src, dst, dst_off, bytes)
            }
            (_, PlatformTag::Host) => {
                let dst = unsafe { (dst as *mut u8).add(dst_off) } as *mut c_void;
                src_platform.copy_to_host(src_index, src, src_off, dst, bytes)
            }
            _ => {
                let mut staging = vec![0u8; bytes];
                src_platform.copy_to_host(
                    src_index,
                    src,
                    src_off,
                    staging.as_mut_ptr() as *mut c_void,
                    bytes,
                )?;
                dst_platform.copy_from_host(
                    dst_index,
                    staging.as_ptr() as *const c_void,
                    dst,
                    dst_off,
                    bytes,
                )
            }
        }
    }

    pub fn launch_kernel(&self, dev: i32, params: &LaunchParams) -> RuntimeResult<()> {
        let (platform, index) = self.resolve(dev)?;
        platform.launch_kernel(index, params)
    }

    pub fn synchronize(&self, dev: i32) -> RuntimeResult<()> {
        let (platform, index) = self.resolve(dev)?;
        platform.synchronize(index)
    }

    pub fn load_kernel(&self, dev: i32, file: &str, name: &str) -> RuntimeResult<()> {
        let (platform, index) = self.resolve(dev)?;
        platform.load_kernel(index, file, name)
    }

    pub fn register_file(&self, dev: i32, path: &str, text: &str) -> RuntimeResult<()> {
        self.resolve(dev)?;
        self.registry.register(path, text);
        Ok(())
    }

    /// One line per registered platform, for `kf_info`.
    pub fn describe(&self) -> Vec<String> {
        self.platforms
            .iter()
            .map(|p| format!("{}: {} device(s)", p.name(), p.device_count()))
            .collect()
    }
}

fn check_size(value: i64) -> RuntimeResult<usize> {
    if value < 0 {
        Err(RuntimeError::NegativeSize(value))
    } else {
        Ok(value as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceId, PlatformTag};

    fn host_dev() -> i32 {
        DeviceId::new(PlatformTag::Host, 0).encode()
    }

    #[test]
    fn alloc_and_copy_through_encoded_ids() {
        let runtime = Runtime::new(false);
        let dev = host_dev();

        let bytes = 256i64;
        let a = runtime.alloc(dev, bytes).unwrap();
        let b = runtime.alloc(dev, bytes).unwrap();

        let payload: Vec<u8> = (0..=255).collect();
        runtime
            .copy(
                dev,
                payload.as_ptr() as *const c_void,
                0,
                dev,
                a,
                0,
                bytes,
            )
            .unwrap();
        runtime.copy(dev, a, 0, dev, b, 0, bytes).unwrap();

        let mut back = vec![0u8; 256];
        runtime
            .copy(dev, b, 0, dev, back.as_mut_ptr() as *mut c_void, 0, bytes)
            .unwrap();
        assert_eq!(back, payload);

        runtime.synchronize(dev).unwrap();
        runtime.release(dev, a).unwrap();
        runtime.release(dev, b).unwrap();
    }

    #[test]
    fn zero_size_alloc_returns_null() {
        let runtime = Runtime::new(false);
        let ptr = runtime.alloc(host_dev(), 0).unwrap();
        assert!(ptr.is_null());
    }

    #[test]
    fn negative_size_is_rejected() {
        let runtime = Runtime::new(false);
        let err = runtime.alloc(host_dev(), -1).unwrap_err();
        assert!(matches!(err, RuntimeError::NegativeSize(-1)));
    }

    #[test]
    fn unknown_tag_is_named_in_the_error() {
        let runtime = Runtime::new(false);
        let err = runtime.alloc(7, 64).unwrap_err();
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn unregistered_platform_is_rejected() {
        let runtime = Runtime::new(false);
        let dev = DeviceId::new(PlatformTag::OpenCl, 0).encode();
        assert!(matches!(
            runtime.alloc(dev, 64),
            Err(RuntimeError::UnknownPlatform(_))
        ));
    }

    #[test]
    fn out_of_range_device_index_is_rejected() {
        let runtime = Runtime::new(false);
        let dev = DeviceId::new(PlatformTag::Host, 3).encode();
        let err = runtime.alloc(dev, 64).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidDevice { index: 3, .. }));
    }

    #[test]
    fn register_file_feeds_the_registry() {
        let runtime = Runtime::new(false);
        runtime
            .register_file(host_dev(), "embedded.amdgpu", "define void @k() { ret void }")
            .unwrap();
        assert_eq!(
            runtime.registry().load("embedded.amdgpu").unwrap(),
            "define void @k() { ret void }"
        );
    }

    #[test]
    fn describe_lists_the_host_platform() {
        let runtime = Runtime::new(false);
        let lines = runtime.describe();
        assert!(lines.iter().any(|l| l.starts_with("host:")));
    }
}
