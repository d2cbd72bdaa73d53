// src/cache/builder.rs

//! Merging index sources into a package cache
//!
//! Each [`IndexSource`] becomes one PackageFile record. Each of its stanzas
//! is looked up by (name, architecture), creating the package if needed, and
//! either adds a new version (inserted in descending version order) or, when
//! the exact version string is already known, a further VerFile on the
//! existing version.
//!
//! A source is validated completely before anything is inserted, so a
//! malformed source leaves the cache as it was. An error while inserting
//! (string pool or id space exhausted) poisons the builder.

use super::records::{
    file_flags, pkg_flags, CacheId, Dependency, FileId, Package, PackageFile, PkgId,
    Provides, VerFile, VerId, Version, dep_flags,
};
use super::stanza::{IndexSource, InstallStatus, PackageFileInfo, PackageStanza};
use super::{hash_bucket, PackageCache};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::version::VersioningSystem;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Incremental cache constructor
pub struct CacheBuilder {
    cache: PackageCache,
    poisoned: bool,
}

fn next_id(len: usize, kind: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::BuildError(format!("{} table is full", kind)))
}

impl CacheBuilder {
    /// Start an empty cache for `native_arch`
    pub fn new(native_arch: &str, vs: Arc<dyn VersioningSystem>) -> Result<Self> {
        if native_arch.is_empty() || native_arch == "all" {
            return Err(Error::BuildError(format!(
                "'{}' is not a usable native architecture",
                native_arch
            )));
        }
        let mut cache = PackageCache::empty(vs);
        cache.native_arch = cache.strings.intern(native_arch)?;
        cache.vs_label = cache.strings.intern(cache.vs.label())?;
        Ok(Self {
            cache,
            poisoned: false,
        })
    }

    /// Continue building on top of an existing cache
    pub fn from_cache(cache: PackageCache) -> Self {
        Self {
            cache,
            poisoned: false,
        }
    }

    /// Merge one index source
    pub fn add_source(&mut self, source: &IndexSource, diag: &mut Diagnostics) -> Result<()> {
        if self.poisoned {
            return Err(Error::BuildError(
                "builder is unusable after a failed insert".to_string(),
            ));
        }

        for (i, stanza) in source.stanzas.iter().enumerate() {
            if let Err(e) = stanza.validate() {
                diag.error(format!("{} stanza {}: {}", source.file.file_name, i, e));
                return Err(e);
            }
        }

        let result = self.insert_source(source, diag);
        if let Err(e) = &result {
            self.poisoned = true;
            diag.error(format!("{}: {}", source.file.file_name, e));
        }
        result
    }

    pub fn finish(self) -> Result<PackageCache> {
        if self.poisoned {
            return Err(Error::BuildError(
                "cache build did not complete".to_string(),
            ));
        }
        info!(
            "Built package cache: {} packages, {} versions, {} dependencies, {} provides, {} files",
            self.cache.package_count(),
            self.cache.version_count(),
            self.cache.dependency_count(),
            self.cache.provides_count(),
            self.cache.file_count()
        );
        Ok(self.cache)
    }

    fn insert_source(&mut self, source: &IndexSource, diag: &mut Diagnostics) -> Result<()> {
        let file = self.new_package_file(&source.file)?;
        debug!(
            "Merging {} stanzas from {}",
            source.stanzas.len(),
            source.file.file_name
        );
        for stanza in &source.stanzas {
            self.insert_stanza(file, &source.file, stanza, diag)?;
        }
        Ok(())
    }

    fn new_package_file(&mut self, info: &PackageFileInfo) -> Result<FileId> {
        let c = &mut self.cache;
        let id = next_id(c.files.len(), "package file")?;
        let mut flags = 0;
        if info.status {
            flags |= file_flags::NOT_SOURCE;
        }
        if info.not_automatic {
            flags |= file_flags::NOT_AUTOMATIC;
        }
        let record = PackageFile {
            file_name: c.strings.intern(&info.file_name)?,
            archive: c.strings.intern(&info.archive)?,
            component: c.strings.intern(&info.component)?,
            version: c.strings.intern(&info.version)?,
            origin: c.strings.intern(&info.origin)?,
            label: c.strings.intern(&info.label)?,
            architecture: c.strings.intern(&info.architecture)?,
            site: c.strings.intern(&info.site)?,
            index_type: c.strings.intern(&info.index_type)?,
            size: info.size,
            mtime: info.mtime,
            priority: info.effective_priority(),
            flags,
            next_file: 0,
        };
        c.files.push(record);

        // Append so iteration follows the order sources were added
        let last = c.package_files().last();
        match last {
            Some(last) => c.files[last.index()].next_file = id,
            None => c.file_list = id,
        }
        Ok(FileId(id))
    }

    /// Architecture a package key is stored under
    fn key_arch(&self, arch: &str) -> String {
        match arch {
            "" | "all" | "any" | "native" => self.cache.native_arch().to_string(),
            other => other.to_string(),
        }
    }

    fn find_or_create_package(&mut self, name: &str, arch: &str) -> Result<PkgId> {
        let key_arch = self.key_arch(arch);
        let c = &mut self.cache;
        let bucket = hash_bucket(name, c.hash_table.len());

        // Chains stay sorted by (name, arch) so iteration order never
        // depends on insertion order
        let mut prev = 0u32;
        let mut cursor = c.hash_table[bucket];
        while cursor != 0 {
            let p = &c.packages[cursor as usize];
            match (c.strings.get(p.name), c.strings.get(p.arch)).cmp(&(name, key_arch.as_str())) {
                Ordering::Equal => return Ok(PkgId(cursor)),
                Ordering::Greater => break,
                Ordering::Less => {
                    prev = cursor;
                    cursor = p.next_package;
                }
            }
        }

        let id = next_id(c.packages.len(), "package")?;
        let record = Package {
            name: c.strings.intern(name)?,
            arch: c.strings.intern(&key_arch)?,
            next_package: cursor,
            ..Default::default()
        };
        c.packages.push(record);
        if prev == 0 {
            c.hash_table[bucket] = id;
        } else {
            c.packages[prev as usize].next_package = id;
        }
        trace!("New package {}:{}", name, key_arch);
        Ok(PkgId(id))
    }

    fn insert_stanza(
        &mut self,
        file: FileId,
        info: &PackageFileInfo,
        stanza: &PackageStanza,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let ver_arch = stanza
            .architecture
            .clone()
            .unwrap_or_else(|| self.cache.native_arch().to_string());
        let pkg = self.find_or_create_package(&stanza.name, &ver_arch)?;
        let pkg_arch = self.cache.pkg_arch(pkg).to_string();

        if let Err(e) = self.cache.vs.validate(&stanza.version) {
            diag.warning(format!("{}: {}", stanza.name, e));
        }

        let existing = self.cache.find_version(pkg, &stanza.version);
        let ver = match existing {
            Some(existing) => existing,
            None => self.new_version(pkg, &ver_arch, &pkg_arch, stanza)?,
        };
        self.add_ver_file(ver, file, stanza)?;

        let c = &mut self.cache;
        let p = &mut c.packages[pkg.index()];
        if stanza.essential {
            p.flags |= pkg_flags::ESSENTIAL;
        }
        if stanza.important {
            p.flags |= pkg_flags::IMPORTANT;
        }
        if p.section.is_none() {
            p.section = c.strings.intern(stanza.section.as_deref().unwrap_or(""))?;
        }

        if info.status {
            let status = stanza.status.unwrap_or_else(InstallStatus::installed);
            let p = &mut c.packages[pkg.index()];
            p.selected_state = status.selected.as_u8();
            p.inst_state = status.inst.as_u8();
            p.current_state = status.current.as_u8();
            if status.current.has_current_version() {
                p.current_ver = ver.raw();
            }
            if stanza.auto_installed {
                p.flags |= pkg_flags::AUTO;
            }
        }
        Ok(())
    }

    fn new_version(
        &mut self,
        pkg: PkgId,
        ver_arch: &str,
        pkg_arch: &str,
        stanza: &PackageStanza,
    ) -> Result<VerId> {
        let id = next_id(self.cache.versions.len(), "version")?;
        let c = &mut self.cache;

        // Descending order; equal-comparing strings go after existing ones
        let mut prev = 0u32;
        let mut cursor = c.packages[pkg.index()].version_list;
        while cursor != 0 {
            let existing = c.strings.get(c.versions[cursor as usize].ver_str);
            if c.vs.compare(&stanza.version, existing) == Ordering::Greater {
                break;
            }
            prev = cursor;
            cursor = c.versions[cursor as usize].next_ver;
        }

        let record = Version {
            ver_str: c.strings.intern(&stanza.version)?,
            arch: c.strings.intern(ver_arch)?,
            section: c.strings.intern(stanza.section.as_deref().unwrap_or(""))?,
            hash: c.strings.intern(stanza.hash.as_deref().unwrap_or(""))?,
            parent_pkg: pkg.raw(),
            next_ver: cursor,
            size: stanza.size,
            installed_size: stanza.installed_size,
            multi_arch: stanza.multi_arch.as_u8(),
            priority: stanza.priority.as_u8(),
            ..Default::default()
        };
        c.versions.push(record);
        if prev == 0 {
            c.packages[pkg.index()].version_list = id;
        } else {
            c.versions[prev as usize].next_ver = id;
        }

        let ver = VerId(id);
        self.add_depends(ver, pkg_arch, stanza)?;
        self.add_provides(ver, pkg_arch, stanza)?;
        Ok(ver)
    }

    fn add_ver_file(&mut self, ver: VerId, file: FileId, stanza: &PackageStanza) -> Result<()> {
        let c = &mut self.cache;
        let id = next_id(c.ver_files.len(), "version file")?;
        c.ver_files.push(VerFile {
            file: file.raw(),
            next_file: 0,
            offset: stanza.offset,
            size: stanza.size,
        });
        let last = c.ver_files(ver).last();
        match last {
            Some(last) => c.ver_files[last.index()].next_file = id,
            None => c.versions[ver.index()].file_list = id,
        }
        Ok(())
    }

    fn add_depends(&mut self, ver: VerId, pkg_arch: &str, stanza: &PackageStanza) -> Result<()> {
        let mut tail = 0u32;
        for relation in &stanza.depends {
            let count = relation.alternatives.len();
            for (i, atom) in relation.alternatives.iter().enumerate() {
                let target_arch = atom.arch.as_deref().unwrap_or(pkg_arch);
                let target = self.find_or_create_package(&atom.name, target_arch)?;

                let c = &mut self.cache;
                let id = next_id(c.depends.len(), "dependency")?;
                let record = Dependency {
                    target_ver: c.strings.intern(atom.version.as_deref().unwrap_or(""))?,
                    package: target.raw(),
                    parent_ver: ver.raw(),
                    next_depends: 0,
                    next_rev_depends: c.packages[target.index()].rev_depends,
                    dep_type: relation.dep_type as u8,
                    op: atom.op.as_u8(),
                    flags: if i + 1 < count { dep_flags::OR } else { 0 },
                };
                c.depends.push(record);
                c.packages[target.index()].rev_depends = id;
                if tail == 0 {
                    c.versions[ver.index()].depends_list = id;
                } else {
                    c.depends[tail as usize].next_depends = id;
                }
                tail = id;
            }
        }
        Ok(())
    }

    fn add_provides(&mut self, ver: VerId, pkg_arch: &str, stanza: &PackageStanza) -> Result<()> {
        for provide in &stanza.provides {
            let target = self.find_or_create_package(&provide.name, pkg_arch)?;
            let c = &mut self.cache;
            let id = next_id(c.provides.len(), "provides")?;
            let record = Provides {
                provide_version: c.strings.intern(provide.version.as_deref().unwrap_or(""))?,
                parent_pkg: target.raw(),
                version: ver.raw(),
                next_provides: c.packages[target.index()].provides_list,
                next_pkg_prov: c.versions[ver.index()].provides_list,
            };
            c.provides.push(record);
            c.packages[target.index()].provides_list = id;
            c.versions[ver.index()].provides_list = id;
        }
        Ok(())
    }
}

/// Build a cache from a list of sources in one go
pub fn build_cache(
    native_arch: &str,
    vs: Arc<dyn VersioningSystem>,
    sources: &[IndexSource],
    diag: &mut Diagnostics,
) -> Result<PackageCache> {
    let mut builder = CacheBuilder::new(native_arch, vs)?;
    for source in sources {
        builder.add_source(source, diag)?;
    }
    let cache = builder.finish()?;
    debug!(
        "Current versions: {}",
        cache
            .all_packages()
            .filter(|&p| cache.current_ver(p).is_some())
            .count()
    );
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::records::{CurrentState, DepType};
    use crate::cache::stanza::DepAtom;
    use crate::version::{CompareOp, DebVersioning};

    fn vs() -> Arc<dyn VersioningSystem> {
        Arc::new(DebVersioning::new())
    }

    fn source(name: &str, stanzas: Vec<PackageStanza>) -> IndexSource {
        IndexSource::new(PackageFileInfo::index(name, "stable"), stanzas)
    }

    #[test]
    fn test_versions_sorted_descending() {
        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            vs(),
            &[source(
                "main",
                vec![
                    PackageStanza::new("foo", "1.0"),
                    PackageStanza::new("foo", "2.0~rc1"),
                    PackageStanza::new("foo", "1:0.1"),
                    PackageStanza::new("foo", "2.0"),
                ],
            )],
            &mut diag,
        )
        .unwrap();
        let foo = cache.find_package("foo", "amd64").unwrap();
        let order: Vec<&str> = cache.versions(foo).map(|v| cache.ver_str(v)).collect();
        assert_eq!(order, vec!["1:0.1", "2.0", "2.0~rc1", "1.0"]);
    }

    #[test]
    fn test_same_version_adds_ver_file_only() {
        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            vs(),
            &[
                source("mirror-a", vec![PackageStanza::new("foo", "1.0")]),
                source("mirror-b", vec![PackageStanza::new("foo", "1.0")]),
            ],
            &mut diag,
        )
        .unwrap();
        let foo = cache.find_package("foo", "amd64").unwrap();
        assert_eq!(cache.versions(foo).count(), 1);
        let ver = cache.newest_ver(foo).unwrap();
        let files: Vec<&str> = cache
            .ver_files(ver)
            .map(|vf| cache.file_name(cache.ver_file(vf).file()))
            .collect();
        assert_eq!(files, vec!["mirror-a", "mirror-b"]);
    }

    #[test]
    fn test_dependency_lists_and_reverse_links() {
        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            vs(),
            &[source(
                "main",
                vec![
                    PackageStanza::new("app", "1.0")
                        .depends(DepAtom::versioned("lib", CompareOp::GreaterEq, "2.0"))
                        .relation(DepType::Recommends, vec![DepAtom::new("docs")]),
                    PackageStanza::new("tool", "1.0").depends(DepAtom::new("lib")),
                    PackageStanza::new("lib", "2.0"),
                ],
            )],
            &mut diag,
        )
        .unwrap();
        let app = cache.find_package("app", "amd64").unwrap();
        let lib = cache.find_package("lib", "amd64").unwrap();
        let deps: Vec<_> = cache.depends(cache.newest_ver(app).unwrap()).collect();
        assert_eq!(deps.len(), 2);
        assert_eq!(cache.dep(deps[0]).dep_type(), DepType::Depends);
        assert_eq!(cache.dep(deps[0]).target_pkg(), lib);
        assert_eq!(cache.dep_target_ver(deps[0]), Some("2.0"));
        assert_eq!(cache.dep(deps[1]).dep_type(), DepType::Recommends);

        let parents: Vec<String> = cache
            .rev_depends(lib)
            .map(|d| cache.full_name(cache.dep_parent_pkg(d)))
            .collect();
        assert_eq!(parents.len(), 2);
        assert!(parents.contains(&"app:amd64".to_string()));
        assert!(parents.contains(&"tool:amd64".to_string()));

        // docs exists only as a dependency target
        let docs = cache.find_package("docs", "amd64").unwrap();
        assert!(cache.is_virtual(docs));
    }

    #[test]
    fn test_malformed_source_leaves_cache_untouched() {
        let mut builder = CacheBuilder::new("amd64", vs()).unwrap();
        let mut diag = Diagnostics::new();
        builder
            .add_source(&source("good", vec![PackageStanza::new("a", "1")]), &mut diag)
            .unwrap();

        diag.push_scope();
        let bad = source(
            "bad",
            vec![PackageStanza::new("b", "1"), PackageStanza::new("", "1")],
        );
        assert!(matches!(
            builder.add_source(&bad, &mut diag),
            Err(Error::BuildError(_))
        ));
        assert!(diag.pending_error());
        diag.pop_scope(false);

        let cache = builder.finish().unwrap();
        assert_eq!(cache.package_count(), 1);
        assert_eq!(cache.file_count(), 1);
        assert!(cache.find_package("b", "amd64").is_none());
    }

    #[test]
    fn test_invalid_version_is_warning() {
        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            vs(),
            &[source("main", vec![PackageStanza::new("odd", "1.0 beta")])],
            &mut diag,
        )
        .unwrap();
        assert!(cache.find_package("odd", "amd64").is_some());
        assert!(!diag.pending_error());
        assert!(!diag.is_empty());
    }

    #[test]
    fn test_status_file_sets_current_version() {
        let mut diag = Diagnostics::new();
        let mut removed = PackageStanza::new("gone", "1.0");
        removed.status = Some(InstallStatus {
            current: CurrentState::ConfigFiles,
            ..InstallStatus::installed()
        });
        let cache = build_cache(
            "amd64",
            vs(),
            &[
                source("main", vec![PackageStanza::new("bash", "5.2-1")]),
                IndexSource::new(
                    PackageFileInfo::status_file(),
                    vec![PackageStanza::new("bash", "5.2-1").installed(), removed],
                ),
            ],
            &mut diag,
        )
        .unwrap();
        let bash = cache.find_package("bash", "amd64").unwrap();
        let current = cache.current_ver(bash).unwrap();
        assert_eq!(cache.ver_str(current), "5.2-1");
        assert!(cache.is_downloadable(current));
        assert_eq!(cache.priority(current), 500);

        let gone = cache.find_package("gone", "amd64").unwrap();
        assert!(cache.current_ver(gone).is_none());
        assert_eq!(cache.pkg(gone).current_state(), CurrentState::ConfigFiles);
        assert!(!cache.is_downloadable(cache.newest_ver(gone).unwrap()));
    }

    #[test]
    fn test_rejects_all_as_native() {
        assert!(CacheBuilder::new("all", vs()).is_err());
        assert!(CacheBuilder::new("", vs()).is_err());
    }
}
