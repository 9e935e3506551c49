//! AMDGPU JIT pipeline: portable IR to a loadable GCN shared object
//!
//! The kernel module is linked against the ROCm device libraries plus a
//! synthesized configuration module, optimized, emitted as an object file,
//! and turned into a shared object by the system linker.

use std::process::Command;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetTriple,
};
use inkwell::OptimizationLevel;

use crate::error::{RuntimeError, RuntimeResult};
use crate::registry::ProgramRegistry;

const AMDGPU_TRIPLE: &str = "amdgcn-amd-amdhsa";

const OCML_PATH_ENV: &str = "KERNELFORGE_OCML_PATH";
const IRIF_PATH_ENV: &str = "KERNELFORGE_IRIF_PATH";
const LLD_ENV: &str = "KERNELFORGE_LLD";

const DEFAULT_OCML: &str = "/opt/rocm/lib/ocml.amdgcn.bc";
const DEFAULT_IRIF: &str = "/opt/rocm/lib/irif.amdgcn.bc";

/// Numeric ISA version from a `gfxNNN` string.
fn isa_version(isa: &str) -> RuntimeResult<u32> {
    isa.strip_prefix("gfx")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| RuntimeError::Jit(format!("expected gfx ISA, got '{isa}'")))
}

/// Tiny module expressing runtime options the device libraries branch on.
fn runtime_config(isa_version: u32) -> String {
    format!(
        r#"; kernelforge device-library configuration
define i32 @__oclc_finite_only_opt() alwaysinline {{ ret i32 0 }}
define i32 @__oclc_unsafe_math_opt() alwaysinline {{ ret i32 0 }}
define i32 @__oclc_daz_opt() alwaysinline {{ ret i32 0 }}
define i32 @__oclc_amd_opt() alwaysinline {{ ret i32 1 }}
define i32 @__oclc_correctly_rounded_sqrt32() alwaysinline {{ ret i32 1 }}
define i32 @__oclc_ISA_version() alwaysinline {{ ret i32 {isa_version} }}
"#
    )
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Lower `source` for `isa` and return the linked native binary. The object
/// and shared-object intermediates land next to the kernel file so the
/// linker can run over them.
pub fn emit_gcn(
    source: &str,
    isa: &str,
    file: &str,
    registry: &ProgramRegistry,
) -> RuntimeResult<Vec<u8>> {
    let version = isa_version(isa)?;

    Target::initialize_amd_gpu(&InitializationConfig::default());

    let context = Context::create();
    let buffer = MemoryBuffer::create_from_memory_range_copy(source.as_bytes(), file);
    let module = context
        .create_module_from_ir(buffer)
        .map_err(|e| RuntimeError::Jit(format!("IR parse failed for '{file}': {e}")))?;

    let triple = TargetTriple::create(AMDGPU_TRIPLE);
    let target = Target::from_triple(&triple)
        .map_err(|e| RuntimeError::Jit(format!("AMDGPU target unavailable: {e}")))?;
    let machine = target
        .create_target_machine(
            &triple,
            isa,
            "",
            OptimizationLevel::Aggressive,
            RelocMode::PIC,
            CodeModel::Kernel,
        )
        .ok_or_else(|| RuntimeError::Jit(format!("no target machine for '{isa}'")))?;
    let layout = machine.get_target_data().get_data_layout();
    module.set_data_layout(&layout);

    let config_text = runtime_config(version);
    let config = context
        .create_module_from_ir(MemoryBuffer::create_from_memory_range_copy(
            config_text.as_bytes(),
            "oclc_config",
        ))
        .map_err(|e| RuntimeError::Jit(format!("cannot create configuration module: {e}")))?;
    config.set_data_layout(&layout);
    module
        .link_in_module(config)
        .map_err(|e| RuntimeError::Jit(format!("linking configuration module failed: {e}")))?;

    for path in [
        env_or(OCML_PATH_ENV, DEFAULT_OCML),
        env_or(IRIF_PATH_ENV, DEFAULT_IRIF),
    ] {
        let library = Module::parse_bitcode_from_path(&path, &context)
            .map_err(|e| RuntimeError::Jit(format!("cannot load device library '{path}': {e}")))?;
        library.set_data_layout(&layout);
        module
            .link_in_module(library)
            .map_err(|e| RuntimeError::Jit(format!("linking '{path}' failed: {e}")))?;
    }

    module
        .run_passes("default<O3>", &machine, PassBuilderOptions::create())
        .map_err(|e| RuntimeError::Jit(format!("optimization pipeline failed: {e}")))?;

    let object = machine
        .write_to_memory_buffer(&module, FileType::Object)
        .map_err(|e| RuntimeError::Jit(format!("object emission failed for '{file}': {e}")))?;

    let obj_file = format!("{file}.o");
    let gcn_file = format!("{file}.gcn");
    registry.store_bytes(&obj_file, object.as_slice())?;

    let lld = env_or(LLD_ENV, "ld.lld");
    let status = Command::new(&lld)
        .arg("-shared")
        .arg(&obj_file)
        .arg("-o")
        .arg(&gcn_file)
        .status()
        .map_err(|e| RuntimeError::Jit(format!("cannot run linker '{lld}': {e}")))?;
    if !status.success() {
        return Err(RuntimeError::Jit(format!(
            "linker '{lld}' exited with {status} for '{obj_file}'"
        )));
    }

    registry.load_binary(&gcn_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isa_version_parses_gfx_names() {
        assert_eq!(isa_version("gfx906").unwrap(), 906);
        assert_eq!(isa_version("gfx1030").unwrap(), 1030);
        assert!(isa_version("sm_75").is_err());
        assert!(isa_version("gfx").is_err());
    }

    #[test]
    fn runtime_config_embeds_the_isa_version() {
        let text = runtime_config(906);
        assert!(text.contains("ret i32 906"));
        assert!(text.contains("__oclc_correctly_rounded_sqrt32"));
    }
}
