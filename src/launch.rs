//! Launch descriptors, kernel argument layout, and grid geometry

use std::ffi::c_void;

use crate::error::{RuntimeError, RuntimeResult};

/// How a kernel argument slot is passed through the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelArgType {
    Value = 0,
    Pointer = 1,
    Struct = 2,
}

impl KernelArgType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => KernelArgType::Pointer,
            2 => KernelArgType::Struct,
            _ => KernelArgType::Value,
        }
    }
}

/// Per-launch parameter block.
///
/// Argument data stays owned by the caller; the runtime only reads through
/// the pointers while the launch call is on the stack. `grid` counts
/// work-items per axis, `block` work-items per workgroup.
pub struct LaunchParams<'a> {
    pub file: &'a str,
    pub name: &'a str,
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub args: &'a [*mut c_void],
    pub arg_sizes: &'a [u32],
    pub arg_types: &'a [KernelArgType],
}

impl LaunchParams<'_> {
    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.args.len() != self.arg_sizes.len() || self.args.len() != self.arg_types.len() {
            return Err(RuntimeError::Internal(format!(
                "mismatched argument arrays for kernel '{}': {} pointers, {} sizes, {} types",
                self.name,
                self.args.len(),
                self.arg_sizes.len(),
                self.arg_types.len()
            )));
        }
        Ok(())
    }
}

/// Alignment of one kernarg slot: the element size, capped at 8 bytes.
pub fn kernarg_align(size: usize) -> usize {
    size.clamp(1, 8)
}

fn align_up(base: usize, align: usize) -> usize {
    (base + align - 1) / align * align
}

/// Byte offset of every argument in the kernarg block plus the total size.
pub fn kernarg_offsets(sizes: &[u32]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut offset = 0usize;
    for &size in sizes {
        let size = size as usize;
        offset = align_up(offset, kernarg_align(size));
        offsets.push(offset);
        offset += size;
    }
    (offsets, offset)
}

/// Copy the argument block into `dst` using the kernarg layout.
///
/// Arguments that would cross `capacity` are skipped so the buffer is never
/// overrun; the returned value is the full layout size, which the caller
/// compares against the kernel's declared kernarg segment size.
///
/// # Safety
///
/// `dst` must be valid for writes of `capacity` bytes and every argument
/// pointer must be readable for its declared size.
pub unsafe fn pack_kernargs(dst: *mut u8, capacity: usize, params: &LaunchParams) -> usize {
    let mut offset = 0usize;
    for i in 0..params.num_args() {
        let size = params.arg_sizes[i] as usize;
        offset = align_up(offset, kernarg_align(size));
        if offset + size <= capacity {
            std::ptr::copy_nonoverlapping(params.args[i] as *const u8, dst.add(offset), size);
        }
        offset += size;
    }
    offset
}

/// Ceiling division; zero divisor yields zero so the backend rejects the
/// launch instead of the runtime faulting.
pub fn ceil_div(n: u32, d: u32) -> u32 {
    if d == 0 {
        0
    } else {
        (n + d - 1) / d
    }
}

/// Blocks per axis needed to cover `problem` work-items with `block`-sized
/// workgroups. Ceiling division, so partial workgroups are launched and the
/// whole problem domain is covered.
pub fn grid_blocks(problem: [u32; 3], block: [u32; 3]) -> [u32; 3] {
    [
        ceil_div(problem[0], block[0]),
        ceil_div(problem[1], block[1]),
        ceil_div(problem[2], block[2]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernarg_align_caps_at_eight() {
        assert_eq!(kernarg_align(1), 1);
        assert_eq!(kernarg_align(4), 4);
        assert_eq!(kernarg_align(8), 8);
        assert_eq!(kernarg_align(16), 8);
        assert_eq!(kernarg_align(0), 1);
    }

    #[test]
    fn kernarg_offsets_align_each_slot() {
        // i8, i32, ptr, i16
        let (offsets, total) = kernarg_offsets(&[1, 4, 8, 2]);
        assert_eq!(offsets, vec![0, 4, 8, 16]);
        assert_eq!(total, 18);
    }

    #[test]
    fn kernarg_offsets_empty() {
        let (offsets, total) = kernarg_offsets(&[]);
        assert!(offsets.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn pack_writes_at_computed_offsets() {
        let a = 0x11u8;
        let b = 0x2233_4455u32;
        let args = [
            &a as *const u8 as *mut c_void,
            &b as *const u32 as *mut c_void,
        ];
        let sizes = [1u32, 4];
        let types = [KernelArgType::Value, KernelArgType::Value];
        let params = LaunchParams {
            file: "k.gcn",
            name: "main",
            grid: [1, 1, 1],
            block: [1, 1, 1],
            args: &args,
            arg_sizes: &sizes,
            arg_types: &types,
        };

        let mut buf = [0u8; 8];
        let written = unsafe { pack_kernargs(buf.as_mut_ptr(), buf.len(), &params) };
        assert_eq!(written, 8);
        assert_eq!(buf[0], 0x11);
        assert_eq!(u32::from_ne_bytes(buf[4..8].try_into().unwrap()), b);
    }

    #[test]
    fn pack_never_overruns_the_buffer() {
        let big = [0u8; 16];
        let args = [big.as_ptr() as *mut c_void];
        let sizes = [16u32];
        let types = [KernelArgType::Struct];
        let params = LaunchParams {
            file: "k.gcn",
            name: "main",
            grid: [1, 1, 1],
            block: [1, 1, 1],
            args: &args,
            arg_sizes: &sizes,
            arg_types: &types,
        };

        let mut buf = [0xAAu8; 8];
        let written = unsafe { pack_kernargs(buf.as_mut_ptr(), buf.len(), &params) };
        // Layout size still reported so the mismatch can be diagnosed.
        assert_eq!(written, 16);
        assert_eq!(buf, [0xAAu8; 8]);
    }

    #[test]
    fn grid_blocks_cover_the_problem() {
        assert_eq!(grid_blocks([1000, 1, 1], [32, 1, 1]), [32, 1, 1]);
        assert_eq!(grid_blocks([1024, 1, 1], [32, 1, 1]), [32, 1, 1]);
        assert_eq!(grid_blocks([1, 1, 1], [256, 1, 1]), [1, 1, 1]);
    }

    #[test]
    fn validate_rejects_mismatched_arrays() {
        let args: [*mut c_void; 1] = [std::ptr::null_mut()];
        let params = LaunchParams {
            file: "k.gcn",
            name: "main",
            grid: [1, 1, 1],
            block: [1, 1, 1],
            args: &args,
            arg_sizes: &[],
            arg_types: &[],
        };
        assert!(params.validate().is_err());
    }
}
