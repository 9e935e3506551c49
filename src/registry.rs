//! Program string registry
//!
//! Compiler-emitted host code can embed kernel IR payloads and hand them to
//! the runtime without touching the filesystem. Lookups fall back to disk
//! for files that were never registered.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Default)]
pub struct ProgramRegistry {
    files: Mutex<HashMap<String, String>>,
    disk_reads: AtomicUsize,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `path` with an in-memory program text. Later registrations
    /// for the same path replace the text.
    pub fn register(&self, path: &str, text: &str) {
        tracing::debug!(path, bytes = text.len(), "registering program text");
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), text.to_string());
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    /// True when the path is either registered or present on disk.
    pub fn exists(&self, path: &str) -> bool {
        self.is_registered(path) || Path::new(path).exists()
    }

    /// Registered text for `path`, else the file contents from disk.
    pub fn load(&self, path: &str) -> RuntimeResult<String> {
        if let Some(text) = self.files.lock()?.get(path) {
            return Ok(text.clone());
        }
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        std::fs::read_to_string(path)
            .map_err(|_| RuntimeError::KernelFileNotFound(path.to_string()))
    }

    /// Like [`load`](Self::load) but for binary payloads (native kernel
    /// objects).
    pub fn load_binary(&self, path: &str) -> RuntimeResult<Vec<u8>> {
        if let Some(text) = self.files.lock()?.get(path) {
            return Ok(text.clone().into_bytes());
        }
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        std::fs::read(path).map_err(|_| RuntimeError::KernelFileNotFound(path.to_string()))
    }

    /// Write `text` to disk unconditionally.
    pub fn store(&self, path: &str, text: &str) -> RuntimeResult<()> {
        self.store_bytes(path, text.as_bytes())
    }

    pub fn store_bytes(&self, path: &str, bytes: &[u8]) -> RuntimeResult<()> {
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Number of lookups that fell back to the filesystem. Cache hits on
    /// registered texts and on compiled programs never touch disk.
    pub fn disk_reads(&self) -> usize {
        self.disk_reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_text_round_trips() {
        let registry = ProgramRegistry::new();
        registry.register("kernels/vec_add.amdgpu", "define void @main() { ret void }");
        assert_eq!(
            registry.load("kernels/vec_add.amdgpu").unwrap(),
            "define void @main() { ret void }"
        );
        assert_eq!(registry.disk_reads(), 0);
    }

    #[test]
    fn registration_replaces_previous_text() {
        let registry = ProgramRegistry::new();
        registry.register("k.amdgpu", "first");
        registry.register("k.amdgpu", "second");
        assert_eq!(registry.load("k.amdgpu").unwrap(), "second");
    }

    #[test]
    fn missing_file_is_reported_by_path() {
        let registry = ProgramRegistry::new();
        let err = registry.load("/no/such/kernel.amdgpu").unwrap_err();
        assert!(err.to_string().contains("/no/such/kernel.amdgpu"));
        assert_eq!(registry.disk_reads(), 1);
    }

    #[test]
    fn disk_fallback_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.gcn");
        std::fs::write(&path, b"native object bytes").unwrap();

        let registry = ProgramRegistry::new();
        let bytes = registry.load_binary(path.to_str().unwrap()).unwrap();
        assert_eq!(bytes, b"native object bytes");
        assert_eq!(registry.disk_reads(), 1);
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ptx");
        let path = path.to_str().unwrap();

        let registry = ProgramRegistry::new();
        registry.store(path, ".version 7.0").unwrap();
        assert_eq!(registry.load(path).unwrap(), ".version 7.0");
    }
}
