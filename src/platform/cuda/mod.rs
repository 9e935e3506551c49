//! CUDA driver + NVVM accelerator platform

mod ffi;
mod platform;

pub use ffi::{
    CU_AD_FORMAT_FLOAT, CU_AD_FORMAT_SIGNED_INT32, CU_AD_FORMAT_UNSIGNED_INT32,
    CU_AD_FORMAT_UNSIGNED_INT8,
};
pub use platform::CudaPlatform;
