//! Platform abstraction over heterogeneous compute backends
//!
//! Each backend implements the same capability set; the runtime registry
//! routes decoded device ids to the owning platform. All sizes and offsets
//! are in bytes. `dev` is the intra-platform device index, validated by the
//! registry before any trait method is called.

pub mod host;

#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "hsa")]
pub mod hsa;

use std::ffi::c_void;

use crate::device::PlatformTag;
use crate::error::RuntimeResult;
use crate::launch::LaunchParams;

pub trait Platform: Send + Sync {
    fn tag(&self) -> PlatformTag;
    fn name(&self) -> &'static str;
    fn device_count(&self) -> usize;

    /// Device-local allocation.
    fn alloc(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void>;
    /// Host-accessible allocation the device can also reach.
    fn alloc_host(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void>;
    /// Allocation migrated on demand between host and device.
    fn alloc_unified(&self, dev: usize, bytes: usize) -> RuntimeResult<*mut c_void>;
    /// Device-visible alias of a host-accessible allocation.
    fn get_device_ptr(&self, dev: usize, host: *mut c_void) -> RuntimeResult<*mut c_void>;
    fn release(&self, dev: usize, ptr: *mut c_void) -> RuntimeResult<()>;
    fn release_host(&self, dev: usize, ptr: *mut c_void) -> RuntimeResult<()>;

    /// Copy between two allocations owned by this platform.
    fn copy(
        &self,
        dev: usize,
        src: *const c_void,
        src_off: usize,
        dst: *mut c_void,
        dst_off: usize,
        bytes: usize,
    ) -> RuntimeResult<()>;
    /// Copy pageable host memory into a device allocation.
    fn copy_from_host(
        &self,
        dev: usize,
        src: *const c_void,
        dst: *mut c_void,
        dst_off: usize,
        bytes: usize,
    ) -> RuntimeResult<()>;
    /// Copy a device allocation into pageable host memory.
    fn copy_to_host(
        &self,
        dev: usize,
        src: *const c_void,
        src_off: usize,
        dst: *mut c_void,
        bytes: usize,
    ) -> RuntimeResult<()>;

    /// Queue one kernel dispatch. Completion is observed via
    /// [`synchronize`](Self::synchronize).
    fn launch_kernel(&self, dev: usize, params: &LaunchParams) -> RuntimeResult<()>;
    /// Block until every kernel previously launched on `dev` has completed.
    fn synchronize(&self, dev: usize) -> RuntimeResult<()>;
    /// Warm the program and kernel caches for `(file, name)` on `dev`.
    fn load_kernel(&self, dev: usize, file: &str, name: &str) -> RuntimeResult<()>;
}
