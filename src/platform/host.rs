//! Host CPU platform
//!
//! Memory services for code running on the host. Kernels never launch here;
//! host-side compute is compiled into the calling binary, so `launch_kernel`
//! and `load_kernel` are unsupported.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::Mutex;

use crate::device::PlatformTag;
use crate::error::{RuntimeError, RuntimeResult};
use crate::launch::LaunchParams;
use crate::platform::Platform;

/// Alignment of host allocations; generated code assumes cache-line and
/// vector-width friendly pointers.
const HOST_ALIGN: usize = 64;

#[derive(Debug, Default)]
pub struct HostPlatform {
    // Layout is needed again at dealloc time, keyed by pointer address.
    allocations: Mutex<HashMap<usize, Layout>>,
}

impl HostPlatform {
    pub fn new() -> Self {
        tracing::debug!("host platform initialized");
        Self::default()
    }

    fn layout_for(bytes: usize) -> RuntimeResult<Layout> {
        Layout::from_size_align(bytes, HOST_ALIGN)
            .map_err(|e| RuntimeError::Internal(format!("bad host allocation layout: {e}")))
    }
}

impl Platform for HostPlatform {
    fn tag(&self) -> PlatformTag {
        PlatformTag::Host
    }

    fn name(&self) -> &'static str {
        "host"
    }

    fn device_count(&self) -> usize {
        1
    }

    fn alloc(&self, _dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        if bytes == 0 {
            return Ok(ptr::null_mut());
        }
        let layout = Self::layout_for(bytes)?;
        let mem = unsafe { alloc(layout) };
        if mem.is_null() {
            return Err(RuntimeError::Internal(format!(
                "host allocation of {bytes} bytes failed"
            )));
        }
        self.allocations.lock()?.insert(mem as usize, layout);
        Ok(mem as *mut c_void)
    }

    fn alloc_host(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        self.alloc(dev, bytes)
    }

    fn alloc_unified(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void> {
        self.alloc(dev, bytes)
    }

    fn get_device_ptr(&self, _dev: usize, host: *mut c_void) -> RuntimeResult<*mut c_void> {
        Ok(host)
    }

    fn release(&self, _dev: usize, ptr: *mut c_void) -> RuntimeResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let layout = self
            .allocations
            .lock()?
            .remove(&(ptr as usize))
            .ok_or_else(|| {
                RuntimeError::Internal(format!(
                    "pointer {ptr:p} was not allocated by the host platform"
                ))
            })?;
        unsafe { dealloc(ptr as *mut u8, layout) };
        Ok(())
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
        if bytes == 0 {
            return Ok(());
        }
        unsafe {
            ptr::copy(
                (src as *const u8).add(src_off),
                (dst as *mut u8).add(dst_off),
                bytes,
            );
        }
        Ok(())
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

    fn launch_kernel(&self, _dev: usize, params: &LaunchParams) -> RuntimeResult<()> {
        Err(RuntimeError::Unsupported(format!(
            "the host platform cannot launch kernels (kernel '{}')",
            params.name
        )))
    }

    fn synchronize(&self, _dev: usize) -> RuntimeResult<()> {
        // Host operations complete synchronously.
        Ok(())
    }

    fn load_kernel(&self, _dev: usize, file: &str, _name: &str) -> RuntimeResult<()> {
        Err(RuntimeError::Unsupported(format!(
            "the host platform cannot load kernels (file '{file}')"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_copy_release_round_trip() {
        let platform = HostPlatform::new();
        let bytes = 1024 * std::mem::size_of::<f32>();

        let src: Vec<f32> = (0..1024).map(|i| i as f32).collect();
        let dev = platform.alloc(0, bytes).unwrap();
        platform
            .copy_from_host(0, src.as_ptr() as *const c_void, dev, 0, bytes)
            .unwrap();

        let mut back = vec![0.0f32; 1024];
        platform
            .copy_to_host(0, dev, 0, back.as_mut_ptr() as *mut c_void, bytes)
            .unwrap();
        assert_eq!(src, back);

        platform.release(0, dev).unwrap();
    }

    #[test]
    fn zero_size_alloc_is_null() {
        let platform = HostPlatform::new();
        let ptr = platform.alloc(0, 0).unwrap();
        assert!(ptr.is_null());
        platform.release(0, ptr).unwrap();
    }

    #[test]
    fn allocations_are_aligned() {
        let platform = HostPlatform::new();
        let ptr = platform.alloc(0, 17).unwrap();
        assert_eq!(ptr as usize % HOST_ALIGN, 0);
        platform.release(0, ptr).unwrap();
    }

    #[test]
    fn foreign_pointer_release_is_an_error() {
        let platform = HostPlatform::new();
        let mut local = 0u64;
        let err = platform
            .release(0, &mut local as *mut u64 as *mut c_void)
            .unwrap_err();
        assert!(err.to_string().contains("not allocated"));
    }

    #[test]
    fn copy_honors_offsets() {
        let platform = HostPlatform::new();
        let dev = platform.alloc(0, 16).unwrap();
        let payload = [1u8, 2, 3, 4];
        platform
            .copy_from_host(0, payload.as_ptr() as *const c_void, dev, 8, 4)
            .unwrap();

        let mut back = [0u8; 4];
        platform
            .copy_to_host(0, dev, 8, back.as_mut_ptr() as *mut c_void, 4)
            .unwrap();
        assert_eq!(back, payload);
        platform.release(0, dev).unwrap();
    }

    #[test]
    fn launch_is_unsupported() {
        let platform = HostPlatform::new();
        let params = LaunchParams {
            file: "k.gcn",
            name: "main",
            grid: [1, 1, 1],
            block: [1, 1, 1],
            args: &[],
            arg_sizes: &[],
            arg_types: &[],
        };
        assert!(platform.launch_kernel(0, &params).is_err());
    }
}
