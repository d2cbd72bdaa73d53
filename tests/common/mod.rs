// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use pkgcore::cache::builder::build_cache;
use pkgcore::{
    DebVersioning, DefaultPolicy, Diagnostics, IndexSource, PackageCache, PackageFileInfo,
    PackageStanza, PkgId,
};
use std::sync::Arc;

/// A normal repository index named `file_name` in archive `stable`
pub fn repo(file_name: &str, stanzas: Vec<PackageStanza>) -> IndexSource {
    IndexSource::new(PackageFileInfo::index(file_name, "stable"), stanzas)
}

/// The installed-package status source
pub fn status(stanzas: Vec<PackageStanza>) -> IndexSource {
    IndexSource::new(PackageFileInfo::status_file(), stanzas)
}

/// Build an amd64 cache with the Debian versioning system.
pub fn build(sources: &[IndexSource]) -> PackageCache {
    let mut diag = Diagnostics::new();
    build_cache("amd64", Arc::new(DebVersioning::new()), sources, &mut diag).unwrap()
}

/// Look up a native package that must exist.
pub fn pkg(cache: &PackageCache, name: &str) -> PkgId {
    cache
        .find_package(name, "amd64")
        .unwrap_or_else(|| panic!("package {} not in cache", name))
}

pub fn policy() -> DefaultPolicy {
    DefaultPolicy::new()
}

/// Every dependency edge as (parent name, parent version, type, target name)
pub fn edges(cache: &PackageCache) -> Vec<(String, String, String, String)> {
    let mut out = Vec::new();
    for p in cache.all_packages() {
        for v in cache.versions(p) {
            for d in cache.depends(v) {
                out.push((
                    cache.full_name(p),
                    cache.ver_str(v).to_string(),
                    cache.dep(d).dep_type().to_string(),
                    cache.describe_dep(d),
                ));
            }
        }
    }
    out.sort();
    out
}

/// A small installed system plus a repository with upgrades.
///
/// - `libssl` 3.0 installed, 3.1 available
/// - `curl` 8.0 installed (needs `libssl (>= 3.0)`), 8.5 available (needs `libssl (>= 3.1)`)
/// - `mail-client` depends on the virtual `mail-transport-agent`, provided by
///   `postfix` and `exim4`
/// - `legacy` 1.0 installed and pinned to `libssl (<< 3.1)`
pub fn system() -> Vec<IndexSource> {
    use pkgcore::cache::DepAtom;
    use pkgcore::CompareOp;

    vec![
        repo(
            "main_Packages",
            vec![
                PackageStanza::new("libssl", "3.1").sizes(2_000, 6_000),
                PackageStanza::new("libssl", "3.0").sizes(1_900, 5_800),
                PackageStanza::new("curl", "8.5")
                    .depends(DepAtom::versioned("libssl", CompareOp::GreaterEq, "3.1"))
                    .sizes(400, 1_000),
                PackageStanza::new("mail-client", "2.0")
                    .depends(DepAtom::new("mail-transport-agent")),
                PackageStanza::new("postfix", "3.7").provides("mail-transport-agent", None),
                PackageStanza::new("exim4", "4.96").provides("mail-transport-agent", None),
            ],
        ),
        status(vec![
            PackageStanza::new("libssl", "3.0").installed().sizes(1_900, 5_800),
            PackageStanza::new("curl", "8.0")
                .depends(DepAtom::versioned("libssl", CompareOp::GreaterEq, "3.0"))
                .installed()
                .sizes(380, 950),
            PackageStanza::new("legacy", "1.0")
                .depends(DepAtom::versioned("libssl", CompareOp::Less, "3.1"))
                .installed(),
        ]),
    ]
}
