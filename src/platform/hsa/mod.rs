//! HSA/ROCm accelerator platform
//!
//! Kernel dispatch over user-mode AQL queues, a two-level kernel cache, and
//! optional in-process lowering of portable IR to GCN code objects.

#[cfg(feature = "jit")]
mod codegen;
mod device;
mod ffi;
mod platform;

pub use device::KernelInfo;
pub use platform::HsaPlatform;
