// src/cache/mod.rs

//! The package cache
//!
//! A read-only graph of packages, versions, dependencies, provides and the
//! index files they came from. Everything lives in per-kind flat tables of
//! fixed-size records addressed by integer ids (see [`records`]), all text
//! lives in one [`strings::StringPool`], and packages are found through a
//! fixed-size hash table whose buckets chain packages through their
//! `next_package` links.
//!
//! The cache is produced by [`CacheBuilder`] from any number of
//! [`IndexSource`]s and can be written to and restored from a flat byte image
//! ([`image`]).

pub mod builder;
pub mod image;
pub mod records;
pub mod stanza;
pub mod strings;

pub use builder::CacheBuilder;
pub use records::{
    CacheId, CurrentState, DepId, DepType, Dependency, FileId, InstState, MultiArch, Package,
    PackageFile, PkgId, Provides, PrvId, SelectedState, VerFile, VerFileId, VerId, Version,
    VersionPriority,
};
pub use stanza::{DepAtom, IndexSource, InstallStatus, PackageFileInfo, PackageStanza, Relation};

use crate::version::{CompareOp, VersioningSystem};
use records::link;
use std::marker::PhantomData;
use std::sync::Arc;
use strings::{StrRef, StringPool};
use xxhash_rust::xxh3::xxh3_64;

/// Number of buckets in the package hash table
pub const HASH_TABLE_SIZE: usize = 4096;

/// Bucket of a package name in a table of `buckets` entries
pub(crate) fn hash_bucket(name: &str, buckets: usize) -> usize {
    (xxh3_64(name.as_bytes()) % buckets.max(1) as u64) as usize
}

/// The package graph
pub struct PackageCache {
    pub(crate) native_arch: StrRef,
    pub(crate) vs_label: StrRef,
    pub(crate) strings: StringPool,
    pub(crate) packages: Vec<Package>,
    pub(crate) versions: Vec<Version>,
    pub(crate) depends: Vec<Dependency>,
    pub(crate) provides: Vec<Provides>,
    pub(crate) files: Vec<PackageFile>,
    pub(crate) ver_files: Vec<VerFile>,
    pub(crate) hash_table: Vec<u32>,
    pub(crate) file_list: u32,
    pub(crate) vs: Arc<dyn VersioningSystem>,
}

impl std::fmt::Debug for PackageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageCache")
            .field("native_arch", &self.native_arch())
            .field("versioning", &self.vs.label())
            .field("packages", &self.package_count())
            .field("versions", &self.version_count())
            .field("depends", &self.dependency_count())
            .finish_non_exhaustive()
    }
}

/// Walks one singly linked record list
pub struct Chain<'a, I> {
    cache: &'a PackageCache,
    next: u32,
    remaining: usize,
    step: fn(&PackageCache, u32) -> u32,
    _id: PhantomData<I>,
}

impl<I: CacheId> Iterator for Chain<'_, I> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        if self.next == 0 || self.remaining == 0 {
            return None;
        }
        let current = self.next;
        self.next = (self.step)(self.cache, current);
        self.remaining -= 1;
        Some(I::from_raw(current))
    }
}

impl PackageCache {
    /// Empty cache; slot 0 of every table is the null record
    pub(crate) fn empty(vs: Arc<dyn VersioningSystem>) -> Self {
        Self {
            native_arch: StrRef::NONE,
            vs_label: StrRef::NONE,
            strings: StringPool::new(),
            packages: vec![Package::default()],
            versions: vec![Version::default()],
            depends: vec![Dependency::default()],
            provides: vec![Provides::default()],
            files: vec![PackageFile::default()],
            ver_files: vec![VerFile::default()],
            hash_table: vec![0; HASH_TABLE_SIZE],
            file_list: 0,
            vs,
        }
    }

    fn chain<I>(&self, head: u32, limit: usize, step: fn(&PackageCache, u32) -> u32) -> Chain<'_, I> {
        Chain {
            cache: self,
            next: head,
            remaining: limit,
            step,
            _id: PhantomData,
        }
    }

    pub fn native_arch(&self) -> &str {
        self.strings.get(self.native_arch)
    }

    pub fn vs(&self) -> &Arc<dyn VersioningSystem> {
        &self.vs
    }

    pub fn str(&self, r: StrRef) -> &str {
        self.strings.get(r)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len() - 1
    }

    pub fn version_count(&self) -> usize {
        self.versions.len() - 1
    }

    pub fn dependency_count(&self) -> usize {
        self.depends.len() - 1
    }

    pub fn provides_count(&self) -> usize {
        self.provides.len() - 1
    }

    pub fn file_count(&self) -> usize {
        self.files.len() - 1
    }

    pub fn ver_file_count(&self) -> usize {
        self.ver_files.len() - 1
    }

    /// Size of the per-package tables a state overlay needs (slot 0 included)
    pub(crate) fn package_slots(&self) -> usize {
        self.packages.len()
    }

    pub fn pkg(&self, id: PkgId) -> &Package {
        &self.packages[id.index()]
    }

    pub fn ver(&self, id: VerId) -> &Version {
        &self.versions[id.index()]
    }

    pub fn dep(&self, id: DepId) -> &Dependency {
        &self.depends[id.index()]
    }

    pub fn prv(&self, id: PrvId) -> &Provides {
        &self.provides[id.index()]
    }

    pub fn file(&self, id: FileId) -> &PackageFile {
        &self.files[id.index()]
    }

    pub fn ver_file(&self, id: VerFileId) -> &VerFile {
        &self.ver_files[id.index()]
    }

    pub fn pkg_name(&self, id: PkgId) -> &str {
        self.str(self.pkg(id).name)
    }

    pub fn pkg_arch(&self, id: PkgId) -> &str {
        self.str(self.pkg(id).arch)
    }

    pub fn pkg_section(&self, id: PkgId) -> &str {
        self.str(self.pkg(id).section)
    }

    /// "name:arch"
    pub fn full_name(&self, id: PkgId) -> String {
        format!("{}:{}", self.pkg_name(id), self.pkg_arch(id))
    }

    pub fn ver_str(&self, id: VerId) -> &str {
        self.str(self.ver(id).ver_str)
    }

    pub fn ver_arch(&self, id: VerId) -> &str {
        self.str(self.ver(id).arch)
    }

    pub fn ver_section(&self, id: VerId) -> &str {
        self.str(self.ver(id).section)
    }

    pub fn ver_hash(&self, id: VerId) -> &str {
        self.str(self.ver(id).hash)
    }

    pub fn dep_target_ver(&self, id: DepId) -> Option<&str> {
        let r = self.dep(id).target_ver;
        (!r.is_none()).then(|| self.str(r))
    }

    pub fn prv_version(&self, id: PrvId) -> Option<&str> {
        let r = self.prv(id).provide_version;
        (!r.is_none()).then(|| self.str(r))
    }

    pub fn file_name(&self, id: FileId) -> &str {
        self.str(self.file(id).file_name)
    }

    pub fn file_archive(&self, id: FileId) -> &str {
        self.str(self.file(id).archive)
    }

    pub fn file_origin(&self, id: FileId) -> &str {
        self.str(self.file(id).origin)
    }

    pub fn file_component(&self, id: FileId) -> &str {
        self.str(self.file(id).component)
    }

    pub fn file_label(&self, id: FileId) -> &str {
        self.str(self.file(id).label)
    }

    /// Architecture a lookup key maps to ("all" and "" mean native)
    fn key_arch<'a>(&'a self, arch: &'a str) -> &'a str {
        if arch.is_empty() || arch == "all" || arch == "native" {
            self.native_arch()
        } else {
            arch
        }
    }

    /// Look up the package keyed by (name, arch)
    pub fn find_package(&self, name: &str, arch: &str) -> Option<PkgId> {
        let arch = self.key_arch(arch);
        let bucket = hash_bucket(name, self.hash_table.len());
        self.bucket_chain(self.hash_table[bucket])
            .find(|&p| self.pkg_name(p) == name && self.pkg_arch(p) == arch)
    }

    /// Every architecture of a package name, in hash chain order
    pub fn find_packages_by_name(&self, name: &str) -> Vec<PkgId> {
        let bucket = hash_bucket(name, self.hash_table.len());
        self.bucket_chain(self.hash_table[bucket])
            .filter(|&p| self.pkg_name(p) == name)
            .collect()
    }

    fn bucket_chain(&self, head: u32) -> Chain<'_, PkgId> {
        self.chain(head, self.packages.len(), |c, i| {
            c.packages.get(i as usize).map_or(0, |p| p.next_package)
        })
    }

    /// Every package in hash-bucket order
    pub fn all_packages(&self) -> impl Iterator<Item = PkgId> + '_ {
        self.hash_table
            .iter()
            .flat_map(move |&head| self.bucket_chain(head))
    }

    /// Versions of a package, newest first
    pub fn versions(&self, pkg: PkgId) -> Chain<'_, VerId> {
        self.chain(self.pkg(pkg).version_list, self.versions.len(), |c, i| {
            c.versions.get(i as usize).map_or(0, |v| v.next_ver)
        })
    }

    /// Dependencies declared by a version, in declaration order
    pub fn depends(&self, ver: VerId) -> Chain<'_, DepId> {
        self.chain(self.ver(ver).depends_list, self.depends.len(), |c, i| {
            c.depends.get(i as usize).map_or(0, |d| d.next_depends)
        })
    }

    /// Dependencies that name this package as their target
    pub fn rev_depends(&self, pkg: PkgId) -> Chain<'_, DepId> {
        self.chain(self.pkg(pkg).rev_depends, self.depends.len(), |c, i| {
            c.depends.get(i as usize).map_or(0, |d| d.next_rev_depends)
        })
    }

    /// Provides records through which versions stand in for this name
    pub fn pkg_provides(&self, pkg: PkgId) -> Chain<'_, PrvId> {
        self.chain(self.pkg(pkg).provides_list, self.provides.len(), |c, i| {
            c.provides.get(i as usize).map_or(0, |p| p.next_provides)
        })
    }

    /// Names a version provides
    pub fn ver_provides(&self, ver: VerId) -> Chain<'_, PrvId> {
        self.chain(self.ver(ver).provides_list, self.provides.len(), |c, i| {
            c.provides.get(i as usize).map_or(0, |p| p.next_pkg_prov)
        })
    }

    /// Files listing a version
    pub fn ver_files(&self, ver: VerId) -> Chain<'_, VerFileId> {
        self.chain(self.ver(ver).file_list, self.ver_files.len(), |c, i| {
            c.ver_files.get(i as usize).map_or(0, |f| f.next_file)
        })
    }

    /// Every index file, in the order sources were added
    pub fn package_files(&self) -> Chain<'_, FileId> {
        self.chain(self.file_list, self.files.len(), |c, i| {
            c.files.get(i as usize).map_or(0, |f| f.next_file)
        })
    }

    pub fn current_ver(&self, pkg: PkgId) -> Option<VerId> {
        self.pkg(pkg).current_ver()
    }

    pub fn find_version(&self, pkg: PkgId, ver_str: &str) -> Option<VerId> {
        self.versions(pkg).find(|&v| self.ver_str(v) == ver_str)
    }

    /// Highest pin priority among the files that list `ver`
    pub fn priority(&self, ver: VerId) -> i32 {
        self.ver_files(ver)
            .map(|vf| self.file(self.ver_file(vf).file()).priority())
            .max()
            .unwrap_or(0)
    }

    /// Whether some non-status file lists `ver`
    pub fn is_downloadable(&self, ver: VerId) -> bool {
        self.ver_files(ver)
            .any(|vf| self.file(self.ver_file(vf).file()).is_source())
    }

    /// A package with no versions, only reachable through provides
    pub fn is_virtual(&self, pkg: PkgId) -> bool {
        !self.pkg(pkg).has_versions()
    }

    pub fn dep_parent_pkg(&self, dep: DepId) -> PkgId {
        self.ver(self.dep(dep).parent_ver()).parent_pkg()
    }

    /// Whether a version string satisfies the operator and version of `dep`
    pub fn dep_matches(&self, dep: DepId, ver_str: &str) -> bool {
        let d = self.dep(dep);
        match d.op() {
            CompareOp::NoOp => true,
            op => self.vs.check_dep(ver_str, op, self.str(d.target_ver)),
        }
    }

    /// First and last record of the OR group containing `dep`
    pub fn or_group(&self, dep: DepId) -> (DepId, DepId) {
        let parent = self.dep(dep).parent_ver();
        let mut start = None;
        for d in self.depends(parent) {
            let s = *start.get_or_insert(d);
            if !self.dep(d).is_or() {
                if s <= dep && dep <= d {
                    return (s, d);
                }
                start = None;
            }
        }
        (dep, dep)
    }

    /// Dependencies of `ver` split into OR groups, in declaration order
    pub fn or_groups(&self, ver: VerId) -> Vec<Vec<DepId>> {
        let mut groups = Vec::new();
        let mut current = Vec::new();
        for d in self.depends(ver) {
            current.push(d);
            if !self.dep(d).is_or() {
                groups.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Every version that could satisfy (or, for negative types, trigger) `dep`
    ///
    /// Direct versions of the target come first (newest first), then the
    /// versions providing the target name. A negative dependency never
    /// matches its own package.
    pub fn all_targets(&self, dep: DepId) -> Vec<VerId> {
        let d = self.dep(dep);
        let negative = d.dep_type().is_negative();
        let parent_pkg = self.dep_parent_pkg(dep);
        let target = d.target_pkg();
        let mut out = Vec::new();

        if !(negative && target == parent_pkg) {
            out.extend(
                self.versions(target)
                    .filter(|&v| self.dep_matches(dep, self.ver_str(v))),
            );
        }

        for prv in self.pkg_provides(target) {
            let owner = self.prv(prv).owner_ver();
            if negative && self.ver(owner).parent_pkg() == parent_pkg {
                continue;
            }
            if self.provide_matches(dep, prv) {
                out.push(owner);
            }
        }
        out
    }

    /// Whether a provides record satisfies the version restriction of `dep`
    pub fn provide_matches(&self, dep: DepId, prv: PrvId) -> bool {
        match (self.dep(dep).op(), self.prv_version(prv)) {
            (CompareOp::NoOp, _) => true,
            // an unversioned provide never satisfies a versioned clause
            (_, None) => false,
            (_, Some(version)) => self.dep_matches(dep, version),
        }
    }

    /// The real package behind a dependency target
    ///
    /// A virtual target with exactly one providing package resolves to that
    /// package; otherwise `None` when the target is virtual.
    pub fn smart_target_pkg(&self, dep: DepId) -> Option<PkgId> {
        let target = self.dep(dep).target_pkg();
        if !self.is_virtual(target) {
            return Some(target);
        }
        let mut providers = self
            .pkg_provides(target)
            .map(|p| self.ver(self.prv(p).owner_ver()).parent_pkg());
        let first = providers.next()?;
        providers.all(|p| p == first).then_some(first)
    }

    /// Render one atom, e.g. "libfoo (>= 2.0)"
    pub fn describe_dep(&self, dep: DepId) -> String {
        let d = self.dep(dep);
        let target = d.target_pkg();
        let mut name = self.pkg_name(target).to_string();
        if self.pkg_arch(target) != self.pkg_arch(self.dep_parent_pkg(dep)) {
            name = self.full_name(target);
        }
        match d.op() {
            CompareOp::NoOp => name,
            op => format!("{} ({} {})", name, op, self.str(d.target_ver)),
        }
    }

    /// Render an OR group, e.g. "Depends: libfoo (>= 2.0) | bar"
    pub fn describe_group(&self, group: &[DepId]) -> String {
        let Some(&first) = group.first() else {
            return String::new();
        };
        let atoms: Vec<String> = group.iter().map(|&d| self.describe_dep(d)).collect();
        format!("{}: {}", self.dep(first).dep_type(), atoms.join(" | "))
    }

    /// Packages whose versions provide the name `pkg`
    pub fn providers(&self, pkg: PkgId) -> Vec<PkgId> {
        let mut out: Vec<PkgId> = self
            .pkg_provides(pkg)
            .map(|p| self.ver(self.prv(p).owner_ver()).parent_pkg())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Versions of `pkg` satisfying `op version`
    pub fn matching_versions(&self, pkg: PkgId, op: CompareOp, version: &str) -> Vec<VerId> {
        self.versions(pkg)
            .filter(|&v| op == CompareOp::NoOp || self.vs.check_dep(self.ver_str(v), op, version))
            .collect()
    }

    /// Newest version of a package
    pub fn newest_ver(&self, pkg: PkgId) -> Option<VerId> {
        link(self.pkg(pkg).version_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::version::DebVersioning;

    fn build(stanzas: Vec<PackageStanza>) -> PackageCache {
        let mut builder = CacheBuilder::new("amd64", Arc::new(DebVersioning::new())).unwrap();
        let mut diag = Diagnostics::new();
        builder
            .add_source(
                &IndexSource::new(PackageFileInfo::index("main", "stable"), stanzas),
                &mut diag,
            )
            .unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_find_package_all_maps_to_native() {
        let cache = build(vec![PackageStanza::new("tzdata", "2024a-1").arch("all")]);
        let pkg = cache.find_package("tzdata", "amd64").unwrap();
        assert_eq!(cache.find_package("tzdata", "all"), Some(pkg));
        assert_eq!(cache.find_package("tzdata", "i386"), None);
        let ver = cache.newest_ver(pkg).unwrap();
        assert_eq!(cache.ver_arch(ver), "all");
    }

    #[test]
    fn test_or_group_bounds() {
        let cache = build(vec![
            PackageStanza::new("app", "1.0")
                .depends(DepAtom::new("libc6"))
                .relation(
                    DepType::Depends,
                    vec![DepAtom::new("mawk"), DepAtom::new("gawk"), DepAtom::new("busybox")],
                ),
        ]);
        let app = cache.find_package("app", "amd64").unwrap();
        let ver = cache.newest_ver(app).unwrap();
        let groups = cache.or_groups(ver);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 3);
        assert_eq!(cache.or_group(groups[1][1]), (groups[1][0], groups[1][2]));
        assert_eq!(cache.or_group(groups[0][0]), (groups[0][0], groups[0][0]));
        assert_eq!(
            cache.describe_group(&groups[1]),
            "Depends: mawk | gawk | busybox"
        );
    }

    #[test]
    fn test_all_targets_through_provides() {
        let cache = build(vec![
            PackageStanza::new("mta-user", "1.0").depends(DepAtom::new("mail-transport-agent")),
            PackageStanza::new("postfix", "3.7").provides("mail-transport-agent", None),
            PackageStanza::new("exim4", "4.96").provides("mail-transport-agent", None),
        ]);
        let user = cache.find_package("mta-user", "amd64").unwrap();
        let dep = cache.depends(cache.newest_ver(user).unwrap()).next().unwrap();
        let targets = cache.all_targets(dep);
        assert_eq!(targets.len(), 2);
        assert_eq!(cache.smart_target_pkg(dep), None);

        let mta = cache.find_package("mail-transport-agent", "amd64").unwrap();
        assert!(cache.is_virtual(mta));
        assert_eq!(cache.providers(mta).len(), 2);
    }

    #[test]
    fn test_versioned_dep_ignores_unversioned_provide() {
        let cache = build(vec![
            PackageStanza::new("a", "1").depends(DepAtom::versioned("virt", CompareOp::GreaterEq, "2")),
            PackageStanza::new("p1", "1").provides("virt", None),
            PackageStanza::new("p2", "1").provides("virt", Some("3")),
        ]);
        let a = cache.find_package("a", "amd64").unwrap();
        let dep = cache.depends(cache.newest_ver(a).unwrap()).next().unwrap();
        let targets = cache.all_targets(dep);
        assert_eq!(targets.len(), 1);
        let p2 = cache.find_package("p2", "amd64").unwrap();
        assert_eq!(cache.ver(targets[0]).parent_pkg(), p2);
        assert_eq!(cache.smart_target_pkg(dep), None);
    }

    #[test]
    fn test_conflict_with_own_provide_is_ignored() {
        let cache = build(vec![
            PackageStanza::new("postfix", "3.7")
                .provides("mail-transport-agent", None)
                .conflicts("mail-transport-agent"),
        ]);
        let postfix = cache.find_package("postfix", "amd64").unwrap();
        let dep = cache.depends(cache.newest_ver(postfix).unwrap()).next().unwrap();
        assert!(cache.all_targets(dep).is_empty());
    }

    #[test]
    fn test_priority_is_max_of_files() {
        let vs: Arc<dyn VersioningSystem> = Arc::new(DebVersioning::new());
        let mut builder = CacheBuilder::new("amd64", vs).unwrap();
        let mut diag = Diagnostics::new();
        let mut low = PackageFileInfo::index("backports", "backports");
        low.not_automatic = true;
        builder
            .add_source(&IndexSource::new(low, vec![PackageStanza::new("x", "2.0")]), &mut diag)
            .unwrap();
        let cache = builder.finish().unwrap();
        let x = cache.find_package("x", "amd64").unwrap();
        let ver = cache.newest_ver(x).unwrap();
        assert_eq!(cache.priority(ver), 1);

        let mut builder = CacheBuilder::from_cache(cache);
        builder
            .add_source(
                &IndexSource::new(
                    PackageFileInfo::index("main", "stable"),
                    vec![PackageStanza::new("x", "2.0")],
                ),
                &mut diag,
            )
            .unwrap();
        let cache = builder.finish().unwrap();
        assert_eq!(cache.priority(ver), 500);
        assert_eq!(cache.ver_files(ver).count(), 2);
    }
}
