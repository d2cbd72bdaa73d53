// tests/image_lock.rs

//! Cache image persistence under the write lock.

mod common;

use common::{build, edges, pkg, system};
use pkgcore::cache::image;
use pkgcore::{CacheLock, DebVersioning, DefaultPolicy, DepCache, Error, VersioningSystem};
use std::sync::Arc;
use tempfile::TempDir;

fn vs() -> Arc<dyn VersioningSystem> {
    Arc::new(DebVersioning::new())
}

#[test]
fn test_save_and_load_preserves_graph() {
    let temp_dir = TempDir::new().unwrap();
    let image_path = temp_dir.path().join("pkgcache.bin");
    let lock = CacheLock::acquire(temp_dir.path().join("pkgcache.lock")).unwrap();

    let cache = build(&system());
    image::save(&cache, &image_path, &lock).unwrap();
    let loaded = image::load(&image_path, vs()).unwrap();

    assert_eq!(loaded.package_count(), cache.package_count());
    assert_eq!(loaded.version_count(), cache.version_count());
    assert_eq!(loaded.ver_file_count(), cache.ver_file_count());
    assert_eq!(edges(&loaded), edges(&cache));

    // the loaded image drives a dependency cache like the original
    let policy = DefaultPolicy::new();
    let dc = DepCache::new(&loaded, &policy);
    let curl = pkg(&loaded, "curl");
    assert!(dc.state(curl).is_upgradable());
    assert_eq!(dc.broken_count(), 0);
}

#[test]
fn test_second_writer_gets_lock_error() {
    let temp_dir = TempDir::new().unwrap();
    let lock_path = temp_dir.path().join("pkgcache.lock");
    let _held = CacheLock::acquire(&lock_path).unwrap();

    assert!(CacheLock::is_locked(&lock_path));
    assert!(matches!(CacheLock::try_acquire(&lock_path), Err(Error::LockError(_))));
}

#[test]
fn test_corrupt_image_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    let image_path = temp_dir.path().join("pkgcache.bin");
    let lock = CacheLock::acquire(temp_dir.path().join("pkgcache.lock")).unwrap();

    std::fs::write(&image_path, b"not a cache image").unwrap();
    assert!(matches!(image::load(&image_path, vs()), Err(Error::ImageError(_))));

    let mut built = false;
    let cache = image::load_or_build(&image_path, vs(), &lock, || {
        built = true;
        Ok(build(&system()))
    })
    .unwrap();
    assert!(built);
    assert!(cache.find_package("curl", "amd64").is_some());

    // the rewritten image is valid now
    let reloaded = image::load(&image_path, vs()).unwrap();
    assert_eq!(reloaded.package_count(), cache.package_count());
}

#[test]
fn test_valid_image_skips_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let image_path = temp_dir.path().join("pkgcache.bin");
    let lock = CacheLock::acquire(temp_dir.path().join("pkgcache.lock")).unwrap();
    image::save(&build(&system()), &image_path, &lock).unwrap();

    let cache = image::load_or_build(&image_path, vs(), &lock, || {
        panic!("valid image must not be rebuilt")
    })
    .unwrap();
    assert!(cache.find_package("legacy", "amd64").is_some());
}
