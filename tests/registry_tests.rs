//! Program registry behavior: in-memory texts, disk fallback, and the
//! runtime's register_file entry point

use kernelforge::{DeviceId, PlatformTag, ProgramRegistry, Runtime};

#[test]
fn registered_text_wins_over_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.amdgpu");
    std::fs::write(&path, "on disk").unwrap();
    let path = path.to_str().unwrap();

    let registry = ProgramRegistry::new();
    registry.register(path, "in memory");
    assert_eq!(registry.load(path).unwrap(), "in memory");
    assert_eq!(registry.disk_reads(), 0);
}

#[test]
fn unregistered_path_falls_back_to_disk_once_per_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.gcn");
    std::fs::write(&path, b"object").unwrap();
    let path = path.to_str().unwrap();

    let registry = ProgramRegistry::new();
    assert_eq!(registry.load_binary(path).unwrap(), b"object");
    assert_eq!(registry.load_binary(path).unwrap(), b"object");
    assert_eq!(registry.disk_reads(), 2);
}

#[test]
fn store_writes_unconditionally() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.gcn");
    let path = path.to_str().expect("utf-8 temp path");

    let registry = ProgramRegistry::new();
    registry.store(path, "first")?;
    registry.store(path, "second")?;
    assert_eq!(std::fs::read_to_string(path)?, "second");
    Ok(())
}

#[test]
fn exists_covers_both_sources() {
    let dir = tempfile::tempdir().unwrap();
    let on_disk = dir.path().join("disk.amdgpu");
    std::fs::write(&on_disk, "x").unwrap();

    let registry = ProgramRegistry::new();
    registry.register("memory-only.amdgpu", "y");

    assert!(registry.exists("memory-only.amdgpu"));
    assert!(registry.exists(on_disk.to_str().unwrap()));
    assert!(!registry.exists("nowhere.amdgpu"));
}

#[test]
fn runtime_register_file_is_visible_to_load() {
    let runtime = Runtime::new(false);
    let dev = DeviceId::new(PlatformTag::Host, 0).encode();

    for (path, text) in [
        ("a.amdgpu", "module a"),
        ("b.amdgpu", "module b"),
        ("nested/dir/c.amdgpu", ""),
    ] {
        runtime.register_file(dev, path, text).unwrap();
        assert_eq!(runtime.registry().load(path).unwrap(), text);
    }
}

#[test]
fn register_file_validates_the_device_id() {
    let runtime = Runtime::new(false);
    assert!(runtime.register_file(7, "x.amdgpu", "text").is_err());
}
