//! KernelForge - heterogeneous device runtime
//!
//! Compiler-emitted host code drives accelerators through a stable C ABI:
//! allocate device memory, move data, JIT-compile kernels from portable IR,
//! launch them with an explicit grid/block geometry, and synchronize.
//! Backends are multiplexed behind encoded device ids: the host CPU is
//! always present, CUDA rides the driver + NVVM path (`cuda` feature), and
//! HSA/ROCm dispatches AQL packets (`hsa` feature, with in-process LLVM
//! lowering of portable IR under `jit`).

#![allow(clippy::too_many_arguments)] // FFI entry points and kernel launches need many args
#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod abi;
pub mod device;
pub mod error;
pub mod launch;
pub mod logging;
pub mod platform;
pub mod profiling;
pub mod registry;
pub mod runtime;

pub use device::{DeviceId, PlatformTag};
pub use error::{RuntimeError, RuntimeResult};
pub use launch::{KernelArgType, LaunchParams};
pub use platform::Platform;
pub use registry::ProgramRegistry;
pub use runtime::Runtime;
