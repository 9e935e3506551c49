//! HSA runtime FFI bindings
//!
//! Declarations bound to the ROCR runtime (`hsa-runtime64`). All functions
//! are called through wrapper methods on the platform; the dead_code
//! allowance is needed because FFI symbols appear unused to the compiler.

use std::ffi::c_void;

pub type HsaStatus = i32;
pub type HsaSignalValue = i64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaAgent {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaSignal {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaRegion {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaIsa {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaExecutable {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaExecutableSymbol {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaCodeObjectReader {
    pub handle: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsaLoadedCodeObject {
    pub handle: u64,
}

/// User-mode queue descriptor mapped by the runtime.
#[repr(C)]
#[derive(Debug)]
pub struct HsaQueue {
    pub queue_type: u32,
    pub features: u32,
    pub base_address: *mut c_void,
    pub doorbell_signal: HsaSignal,
    pub size: u32,
    pub reserved1: u32,
    pub id: u64,
}

/// 64-byte AQL kernel dispatch packet.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HsaKernelDispatchPacket {
    pub header: u16,
    pub setup: u16,
    pub workgroup_size_x: u16,
    pub workgroup_size_y: u16,
    pub workgroup_size_z: u16,
    pub reserved0: u16,
    pub grid_size_x: u32,
    pub grid_size_y: u32,
    pub grid_size_z: u32,
    pub private_segment_size: u32,
    pub group_segment_size: u32,
    pub kernel_object: u64,
    pub kernarg_address: *mut c_void,
    pub reserved2: u64,
    pub completion_signal: HsaSignal,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HsaAmdProfilingDispatchTime {
    pub start: u64,
    pub end: u64,
}

pub const HSA_STATUS_SUCCESS: HsaStatus = 0;

// hsa_agent_info_t
pub const HSA_AGENT_INFO_NAME: i32 = 0;
pub const HSA_AGENT_INFO_VENDOR_NAME: i32 = 1;
pub const HSA_AGENT_INFO_PROFILE: i32 = 4;
pub const HSA_AGENT_INFO_DEFAULT_FLOAT_ROUNDING_MODE: i32 = 5;
pub const HSA_AGENT_INFO_QUEUE_MAX_SIZE: i32 = 14;
pub const HSA_AGENT_INFO_DEVICE: i32 = 17;
pub const HSA_AGENT_INFO_ISA: i32 = 19;
pub const HSA_AGENT_INFO_VERSION_MAJOR: i32 = 21;
pub const HSA_AGENT_INFO_VERSION_MINOR: i32 = 22;

// hsa_system_info_t
pub const HSA_SYSTEM_INFO_VERSION_MAJOR: i32 = 0;
pub const HSA_SYSTEM_INFO_VERSION_MINOR: i32 = 1;
pub const HSA_SYSTEM_INFO_TIMESTAMP_FREQUENCY: i32 = 3;

// hsa_isa_info_t
pub const HSA_ISA_INFO_NAME_LENGTH: i32 = 0;
pub const HSA_ISA_INFO_NAME: i32 = 1;

// hsa_region_info_t
pub const HSA_REGION_INFO_SEGMENT: i32 = 0;
pub const HSA_REGION_INFO_GLOBAL_FLAGS: i32 = 1;
pub const HSA_REGION_INFO_RUNTIME_ALLOC_ALLOWED: i32 = 5;

// hsa_region_segment_t
pub const HSA_REGION_SEGMENT_GLOBAL: u32 = 0;
pub const HSA_REGION_SEGMENT_READONLY: u32 = 1;
pub const HSA_REGION_SEGMENT_PRIVATE: u32 = 2;
pub const HSA_REGION_SEGMENT_GROUP: u32 = 3;
pub const HSA_REGION_SEGMENT_KERNARG: u32 = 4;

// hsa_region_global_flag_t bits
pub const HSA_REGION_GLOBAL_FLAG_KERNARG: u32 = 1;
pub const HSA_REGION_GLOBAL_FLAG_FINE_GRAINED: u32 = 2;
pub const HSA_REGION_GLOBAL_FLAG_COARSE_GRAINED: u32 = 4;

// hsa_queue_type_t
pub const HSA_QUEUE_TYPE_SINGLE: u32 = 1;

// hsa_profile_t
pub const HSA_PROFILE_BASE: i32 = 0;
pub const HSA_PROFILE_FULL: i32 = 1;

// hsa_device_type_t
pub const HSA_DEVICE_TYPE_CPU: i32 = 0;
pub const HSA_DEVICE_TYPE_GPU: i32 = 1;
pub const HSA_DEVICE_TYPE_DSP: i32 = 2;

// AQL packet header fields
pub const HSA_PACKET_TYPE_KERNEL_DISPATCH: u16 = 2;
pub const HSA_PACKET_HEADER_TYPE: u16 = 0;
pub const HSA_PACKET_HEADER_ACQUIRE_FENCE_SCOPE: u16 = 9;
pub const HSA_PACKET_HEADER_RELEASE_FENCE_SCOPE: u16 = 11;
pub const HSA_FENCE_SCOPE_SYSTEM: u16 = 2;
pub const HSA_KERNEL_DISPATCH_PACKET_SETUP_DIMENSIONS: u16 = 0;

// hsa_signal_condition_t / hsa_wait_state_t
pub const HSA_SIGNAL_CONDITION_EQ: i32 = 0;
pub const HSA_WAIT_STATE_ACTIVE: i32 = 1;

// hsa_executable_symbol_info_t
pub const HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_OBJECT: i32 = 22;
pub const HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_KERNARG_SEGMENT_SIZE: i32 = 23;
pub const HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_GROUP_SEGMENT_SIZE: i32 = 25;
pub const HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_PRIVATE_SEGMENT_SIZE: i32 = 26;

pub type AgentCallback = extern "C" fn(HsaAgent, *mut c_void) -> HsaStatus;
pub type RegionCallback = extern "C" fn(HsaRegion, *mut c_void) -> HsaStatus;

#[link(name = "hsa-runtime64")]
#[allow(dead_code)]
extern "C" {
    pub fn hsa_init() -> HsaStatus;
    pub fn hsa_shut_down() -> HsaStatus;
    pub fn hsa_status_string(status: HsaStatus, string: *mut *const i8) -> HsaStatus;
    pub fn hsa_system_get_info(attribute: i32, value: *mut c_void) -> HsaStatus;
    pub fn hsa_iterate_agents(callback: AgentCallback, data: *mut c_void) -> HsaStatus;
    pub fn hsa_agent_get_info(agent: HsaAgent, attribute: i32, value: *mut c_void) -> HsaStatus;
    pub fn hsa_agent_iterate_regions(
        agent: HsaAgent,
        callback: RegionCallback,
        data: *mut c_void,
    ) -> HsaStatus;
    pub fn hsa_region_get_info(region: HsaRegion, attribute: i32, value: *mut c_void) -> HsaStatus;
    pub fn hsa_isa_get_info_alt(isa: HsaIsa, attribute: i32, value: *mut c_void) -> HsaStatus;
    pub fn hsa_queue_create(
        agent: HsaAgent,
        size: u32,
        queue_type: u32,
        callback: *mut c_void,
        data: *mut c_void,
        private_segment_size: u32,
        group_segment_size: u32,
        queue: *mut *mut HsaQueue,
    ) -> HsaStatus;
    pub fn hsa_queue_destroy(queue: *mut HsaQueue) -> HsaStatus;
    pub fn hsa_queue_load_write_index_relaxed(queue: *const HsaQueue) -> u64;
    pub fn hsa_queue_store_write_index_relaxed(queue: *const HsaQueue, value: u64);
    pub fn hsa_signal_create(
        initial_value: HsaSignalValue,
        num_consumers: u32,
        consumers: *const HsaAgent,
        signal: *mut HsaSignal,
    ) -> HsaStatus;
    pub fn hsa_signal_destroy(signal: HsaSignal) -> HsaStatus;
    pub fn hsa_signal_add_relaxed(signal: HsaSignal, value: HsaSignalValue);
    pub fn hsa_signal_subtract_relaxed(signal: HsaSignal, value: HsaSignalValue);
    pub fn hsa_signal_store_relaxed(signal: HsaSignal, value: HsaSignalValue);
    pub fn hsa_signal_wait_relaxed(
        signal: HsaSignal,
        condition: i32,
        compare_value: HsaSignalValue,
        timeout_hint: u64,
        wait_state_hint: i32,
    ) -> HsaSignalValue;
    pub fn hsa_memory_allocate(region: HsaRegion, size: usize, ptr: *mut *mut c_void) -> HsaStatus;
    pub fn hsa_memory_free(ptr: *mut c_void) -> HsaStatus;
    pub fn hsa_memory_copy(dst: *mut c_void, src: *const c_void, size: usize) -> HsaStatus;
    pub fn hsa_code_object_reader_create_from_memory(
        code_object: *const c_void,
        size: usize,
        code_object_reader: *mut HsaCodeObjectReader,
    ) -> HsaStatus;
    pub fn hsa_code_object_reader_destroy(code_object_reader: HsaCodeObjectReader) -> HsaStatus;
    pub fn hsa_executable_create_alt(
        profile: i32,
        default_float_rounding_mode: i32,
        options: *const i8,
        executable: *mut HsaExecutable,
    ) -> HsaStatus;
    pub fn hsa_executable_load_agent_code_object(
        executable: HsaExecutable,
        agent: HsaAgent,
        code_object_reader: HsaCodeObjectReader,
        options: *const i8,
        loaded_code_object: *mut HsaLoadedCodeObject,
    ) -> HsaStatus;
    pub fn hsa_executable_freeze(executable: HsaExecutable, options: *const i8) -> HsaStatus;
    pub fn hsa_executable_validate(executable: HsaExecutable, result: *mut u32) -> HsaStatus;
    pub fn hsa_executable_destroy(executable: HsaExecutable) -> HsaStatus;
    pub fn hsa_executable_get_symbol_by_name(
        executable: HsaExecutable,
        symbol_name: *const i8,
        agent: *const HsaAgent,
        symbol: *mut HsaExecutableSymbol,
    ) -> HsaStatus;
    pub fn hsa_executable_symbol_get_info(
        executable_symbol: HsaExecutableSymbol,
        attribute: i32,
        value: *mut c_void,
    ) -> HsaStatus;
    pub fn hsa_amd_profiling_set_profiler_enabled(queue: *mut HsaQueue, enable: i32) -> HsaStatus;
    pub fn hsa_amd_profiling_get_dispatch_time(
        agent: HsaAgent,
        signal: HsaSignal,
        time: *mut HsaAmdProfilingDispatchTime,
    ) -> HsaStatus;
}

/// Human-readable text for an HSA status code.
pub fn status_string(status: HsaStatus) -> String {
    let mut text: *const i8 = std::ptr::null();
    let ret = unsafe { hsa_status_string(status, &mut text) };
    if ret != HSA_STATUS_SUCCESS || text.is_null() {
        return format!("unknown HSA status {status}");
    }
    unsafe { std::ffi::CStr::from_ptr(text) }
        .to_string_lossy()
        .into_owned()
}
