//! Per-agent device state

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::mpsc::SyncSender;
use std::sync::Mutex;

use crate::platform::hsa::ffi::{self, HsaAgent, HsaExecutable, HsaQueue, HsaRegion, HsaSignal};

/// Resolved kernel symbol with its segment requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelInfo {
    pub object: u64,
    pub kernarg_segment_size: u32,
    pub group_segment_size: u32,
    pub private_segment_size: u32,
}

/// Two-level kernel cache: file path to frozen executable, then
/// (executable handle, kernel name) to the resolved symbol.
#[derive(Debug, Default)]
pub struct KernelCaches {
    pub programs: HashMap<String, HsaExecutable>,
    pub kernels: HashMap<(u64, String), KernelInfo>,
}

/// A profiled launch handed to the per-device completion reaper.
#[derive(Debug)]
pub struct ProfileJob {
    pub signal: HsaSignal,
    pub kernarg: *mut c_void,
}

// SAFETY: the signal is a process-global runtime handle and the kernarg
// buffer is exclusively owned by the job once the packet is retired.
unsafe impl Send for ProfileJob {}

#[derive(Debug)]
pub struct HsaDevice {
    pub agent: HsaAgent,
    pub name: String,
    pub isa: String,
    pub profile: i32,
    pub float_mode: i32,
    /// Null when the agent exposes no user-mode queue (CPU agents).
    pub queue: *mut HsaQueue,
    /// Counts in-flight kernels; the launcher increments, the reaper (or the
    /// packet completion itself when profiling is off) decrements.
    pub signal: HsaSignal,
    pub kernarg_region: HsaRegion,
    pub finegrained_region: HsaRegion,
    pub coarsegrained_region: HsaRegion,
    pub caches: Mutex<KernelCaches>,
    /// Present when profiling is enabled; feeds the completion reaper.
    pub profile_tx: Option<SyncSender<ProfileJob>>,
}

// SAFETY: raw handles are process-global runtime references; the queue is
// single-producer and every submission happens under the runtime dispatch,
// while cache access is guarded by the per-device mutex.
unsafe impl Send for HsaDevice {}
unsafe impl Sync for HsaDevice {}

pub fn profile_str(profile: i32) -> &'static str {
    match profile {
        ffi::HSA_PROFILE_BASE => "HSA_PROFILE_BASE",
        ffi::HSA_PROFILE_FULL => "HSA_PROFILE_FULL",
        _ => "unknown HSA profile",
    }
}

pub fn device_type_str(device_type: i32) -> &'static str {
    match device_type {
        ffi::HSA_DEVICE_TYPE_CPU => "HSA_DEVICE_TYPE_CPU",
        ffi::HSA_DEVICE_TYPE_GPU => "HSA_DEVICE_TYPE_GPU",
        ffi::HSA_DEVICE_TYPE_DSP => "HSA_DEVICE_TYPE_DSP",
        _ => "unknown HSA device type",
    }
}

pub fn segment_str(segment: u32) -> &'static str {
    match segment {
        ffi::HSA_REGION_SEGMENT_GLOBAL => "HSA_REGION_SEGMENT_GLOBAL",
        ffi::HSA_REGION_SEGMENT_READONLY => "HSA_REGION_SEGMENT_READONLY",
        ffi::HSA_REGION_SEGMENT_PRIVATE => "HSA_REGION_SEGMENT_PRIVATE",
        ffi::HSA_REGION_SEGMENT_GROUP => "HSA_REGION_SEGMENT_GROUP",
        ffi::HSA_REGION_SEGMENT_KERNARG => "HSA_REGION_SEGMENT_KERNARG",
        _ => "unknown HSA region segment",
    }
}

/// Text up to the first NUL in a fixed-size info buffer.
pub fn buf_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
