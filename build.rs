use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=ROCM_PATH");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    if env::var_os("CARGO_FEATURE_HSA").is_some() {
        let rocm_root = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string());
        println!("cargo:rustc-link-search=native={}/lib", rocm_root);
        println!("cargo:rustc-link-lib=dylib=hsa-runtime64");
    }

    if env::var_os("CARGO_FEATURE_CUDA").is_some() {
        let cuda_root = env::var("CUDA_PATH").unwrap_or_else(|_| "/usr/local/cuda".to_string());
        println!("cargo:rustc-link-search=native={}/lib64", cuda_root);
        println!("cargo:rustc-link-search=native={}/lib64/stubs", cuda_root);
        println!("cargo:rustc-link-search=native={}/nvvm/lib64", cuda_root);
        println!("cargo:rustc-link-lib=dylib=cuda");
        println!("cargo:rustc-link-lib=dylib=nvvm");
    }
}
