// src/cache/records.rs

//! Fixed-size cache records and their typed ids
//!
//! Records never hold references to each other. Every link is the raw index
//! of another record in its per-kind table, with 0 meaning "none" (slot 0 of
//! every table is a placeholder). Lists are singly linked through `next_*`
//! fields stored in the records themselves. This keeps the whole graph a set
//! of flat arrays that can be written to, and read back from, a byte image.

use super::strings::StrRef;
use crate::error::{Error, Result};
use crate::version::CompareOp;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

/// Common behaviour of the typed record ids
pub trait CacheId: Copy + Eq + fmt::Debug {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;

    fn index(self) -> usize {
        self.raw() as usize
    }
}

macro_rules! cache_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl CacheId for $name {
            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }
            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

cache_id!(
    /// Index of a [`Package`] record
    PkgId
);
cache_id!(
    /// Index of a [`Version`] record
    VerId
);
cache_id!(
    /// Index of a [`Dependency`] record
    DepId
);
cache_id!(
    /// Index of a [`Provides`] record
    PrvId
);
cache_id!(
    /// Index of a [`PackageFile`] record
    FileId
);
cache_id!(
    /// Index of a [`VerFile`] record
    VerFileId
);

/// Convert a raw link into an optional id
pub(crate) fn link<I: CacheId>(raw: u32) -> Option<I> {
    (raw != 0).then(|| I::from_raw(raw))
}

macro_rules! from_u8_impl {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            pub fn as_u8(self) -> u8 {
                self as u8
            }

            pub fn from_u8(value: u8) -> Option<Self> {
                $(
                    if value == $ty::$variant as u8 {
                        return Some($ty::$variant);
                    }
                )+
                None
            }
        }
    };
}

/// Relationship kind of a dependency record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum DepType {
    Depends = 1,
    #[strum(serialize = "Pre-Depends")]
    #[serde(rename = "Pre-Depends")]
    PreDepends = 2,
    Suggests = 3,
    Recommends = 4,
    Conflicts = 5,
    Replaces = 6,
    Obsoletes = 7,
}

from_u8_impl!(DepType {
    Depends,
    PreDepends,
    Suggests,
    Recommends,
    Conflicts,
    Replaces,
    Obsoletes,
});

impl DepType {
    /// Dependencies that decide whether a package is broken
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            DepType::Depends | DepType::PreDepends | DepType::Conflicts | DepType::Obsoletes
        )
    }

    /// Satisfied when the target is absent rather than present
    pub fn is_negative(self) -> bool {
        matches!(self, DepType::Conflicts | DepType::Replaces | DepType::Obsoletes)
    }
}

/// Archive priority of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum VersionPriority {
    #[default]
    Unknown = 0,
    Important = 1,
    Required = 2,
    Standard = 3,
    Optional = 4,
    Extra = 5,
}

from_u8_impl!(VersionPriority {
    Unknown,
    Important,
    Required,
    Standard,
    Optional,
    Extra,
});

/// Multi-Arch field of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MultiArch {
    #[default]
    No = 0,
    Same = 1,
    Foreign = 2,
    Allowed = 3,
}

from_u8_impl!(MultiArch { No, Same, Foreign, Allowed });

/// What the administrator asked dpkg to do with a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SelectedState {
    #[default]
    Unknown = 0,
    Install = 1,
    Hold = 2,
    #[serde(rename = "deinstall")]
    DeInstall = 3,
    Purge = 4,
}

from_u8_impl!(SelectedState {
    Unknown,
    Install,
    Hold,
    DeInstall,
    Purge,
});

/// Error flags recorded by dpkg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum InstState {
    #[default]
    Ok = 0,
    ReInstReq = 1,
    HoldInst = 2,
    HoldReInstReq = 3,
}

from_u8_impl!(InstState {
    Ok,
    ReInstReq,
    HoldInst,
    HoldReInstReq,
});

/// Unpack/configure state of the installed version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum CurrentState {
    #[default]
    NotInstalled = 0,
    UnPacked = 1,
    HalfConfigured = 2,
    HalfInstalled = 4,
    ConfigFiles = 5,
    Installed = 6,
}

from_u8_impl!(CurrentState {
    NotInstalled,
    UnPacked,
    HalfConfigured,
    HalfInstalled,
    ConfigFiles,
    Installed,
});

impl CurrentState {
    /// Whether a version in this state counts as the current version
    pub fn has_current_version(self) -> bool {
        !matches!(self, CurrentState::NotInstalled | CurrentState::ConfigFiles)
    }
}

/// Package flag bits
pub mod pkg_flags {
    pub const AUTO: u8 = 1 << 0;
    pub const ESSENTIAL: u8 = 1 << 1;
    pub const IMPORTANT: u8 = 1 << 2;
}

/// Package file flag bits
pub mod file_flags {
    /// The file is not a download source (e.g. the dpkg status file)
    pub const NOT_SOURCE: u8 = 1 << 0;
    pub const NOT_AUTOMATIC: u8 = 1 << 1;
}

/// Dependency flag bits
pub mod dep_flags {
    /// The next dependency record is an alternative of this one
    pub const OR: u8 = 1 << 0;
}

/// A (name, architecture) pair with its versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Package {
    pub(crate) name: StrRef,
    pub(crate) arch: StrRef,
    pub(crate) section: StrRef,
    pub(crate) version_list: u32,
    pub(crate) current_ver: u32,
    pub(crate) rev_depends: u32,
    pub(crate) provides_list: u32,
    pub(crate) next_package: u32,
    pub(crate) flags: u8,
    pub(crate) selected_state: u8,
    pub(crate) inst_state: u8,
    pub(crate) current_state: u8,
}

impl Package {
    pub const SIZE: usize = 36;

    pub fn current_ver(&self) -> Option<VerId> {
        link(self.current_ver)
    }

    pub fn has_versions(&self) -> bool {
        self.version_list != 0
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_essential(&self) -> bool {
        self.flags & pkg_flags::ESSENTIAL != 0
    }

    pub fn is_important(&self) -> bool {
        self.flags & pkg_flags::IMPORTANT != 0
    }

    pub fn selected_state(&self) -> SelectedState {
        SelectedState::from_u8(self.selected_state).unwrap_or_default()
    }

    pub fn inst_state(&self) -> InstState {
        InstState::from_u8(self.inst_state).unwrap_or_default()
    }

    pub fn current_state(&self) -> CurrentState {
        CurrentState::from_u8(self.current_state).unwrap_or_default()
    }

    pub(crate) fn encode(&self, w: &mut RecordWriter<'_>) {
        w.str_ref(self.name);
        w.str_ref(self.arch);
        w.str_ref(self.section);
        w.u32(self.version_list);
        w.u32(self.current_ver);
        w.u32(self.rev_depends);
        w.u32(self.provides_list);
        w.u32(self.next_package);
        w.u8(self.flags);
        w.u8(self.selected_state);
        w.u8(self.inst_state);
        w.u8(self.current_state);
    }

    pub(crate) fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            name: r.str_ref()?,
            arch: r.str_ref()?,
            section: r.str_ref()?,
            version_list: r.u32()?,
            current_ver: r.u32()?,
            rev_depends: r.u32()?,
            provides_list: r.u32()?,
            next_package: r.u32()?,
            flags: r.u8()?,
            selected_state: r.u8()?,
            inst_state: r.u8()?,
            current_state: r.u8()?,
        })
    }
}

/// One version of a package, as listed by one or more index files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version {
    pub(crate) ver_str: StrRef,
    pub(crate) arch: StrRef,
    pub(crate) section: StrRef,
    pub(crate) hash: StrRef,
    pub(crate) parent_pkg: u32,
    pub(crate) next_ver: u32,
    pub(crate) depends_list: u32,
    pub(crate) provides_list: u32,
    pub(crate) file_list: u32,
    pub(crate) size: u64,
    pub(crate) installed_size: u64,
    pub(crate) multi_arch: u8,
    pub(crate) priority: u8,
}

impl Version {
    pub const SIZE: usize = 54;

    pub fn parent_pkg(&self) -> PkgId {
        PkgId(self.parent_pkg)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn installed_size(&self) -> u64 {
        self.installed_size
    }

    pub fn multi_arch(&self) -> MultiArch {
        MultiArch::from_u8(self.multi_arch).unwrap_or_default()
    }

    pub fn priority(&self) -> VersionPriority {
        VersionPriority::from_u8(self.priority).unwrap_or_default()
    }

    /// Provided-only versions have no backing file
    pub fn is_virtual(&self) -> bool {
        self.file_list == 0
    }

    pub(crate) fn encode(&self, w: &mut RecordWriter<'_>) {
        w.str_ref(self.ver_str);
        w.str_ref(self.arch);
        w.str_ref(self.section);
        w.str_ref(self.hash);
        w.u32(self.parent_pkg);
        w.u32(self.next_ver);
        w.u32(self.depends_list);
        w.u32(self.provides_list);
        w.u32(self.file_list);
        w.u64(self.size);
        w.u64(self.installed_size);
        w.u8(self.multi_arch);
        w.u8(self.priority);
    }

    pub(crate) fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            ver_str: r.str_ref()?,
            arch: r.str_ref()?,
            section: r.str_ref()?,
            hash: r.str_ref()?,
            parent_pkg: r.u32()?,
            next_ver: r.u32()?,
            depends_list: r.u32()?,
            provides_list: r.u32()?,
            file_list: r.u32()?,
            size: r.u64()?,
            installed_size: r.u64()?,
            multi_arch: r.u8()?,
            priority: r.u8()?,
        })
    }
}

/// Directed edge from a version to a target package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dependency {
    pub(crate) target_ver: StrRef,
    pub(crate) package: u32,
    pub(crate) parent_ver: u32,
    pub(crate) next_depends: u32,
    pub(crate) next_rev_depends: u32,
    pub(crate) dep_type: u8,
    pub(crate) op: u8,
    pub(crate) flags: u8,
}

impl Dependency {
    pub const SIZE: usize = 23;

    pub fn target_pkg(&self) -> PkgId {
        PkgId(self.package)
    }

    pub fn parent_ver(&self) -> VerId {
        VerId(self.parent_ver)
    }

    pub fn dep_type(&self) -> DepType {
        DepType::from_u8(self.dep_type).unwrap_or(DepType::Depends)
    }

    pub fn op(&self) -> CompareOp {
        CompareOp::from_u8(self.op).unwrap_or_default()
    }

    /// Whether the following record is an alternative of this one
    pub fn is_or(&self) -> bool {
        self.flags & dep_flags::OR != 0
    }

    pub(crate) fn encode(&self, w: &mut RecordWriter<'_>) {
        w.str_ref(self.target_ver);
        w.u32(self.package);
        w.u32(self.parent_ver);
        w.u32(self.next_depends);
        w.u32(self.next_rev_depends);
        w.u8(self.dep_type);
        w.u8(self.op);
        w.u8(self.flags);
    }

    pub(crate) fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        let dep = Self {
            target_ver: r.str_ref()?,
            package: r.u32()?,
            parent_ver: r.u32()?,
            next_depends: r.u32()?,
            next_rev_depends: r.u32()?,
            dep_type: r.u8()?,
            op: r.u8()?,
            flags: r.u8()?,
        };
        if dep.package != 0 && DepType::from_u8(dep.dep_type).is_none() {
            return Err(Error::ImageError(format!("unknown dependency type {}", dep.dep_type)));
        }
        if CompareOp::from_u8(dep.op).is_none() {
            return Err(Error::ImageError(format!("unknown compare operator {}", dep.op)));
        }
        Ok(dep)
    }
}

/// A version standing in for a (usually virtual) package name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Provides {
    pub(crate) provide_version: StrRef,
    pub(crate) parent_pkg: u32,
    pub(crate) version: u32,
    pub(crate) next_provides: u32,
    pub(crate) next_pkg_prov: u32,
}

impl Provides {
    pub const SIZE: usize = 20;

    /// The provided name
    pub fn parent_pkg(&self) -> PkgId {
        PkgId(self.parent_pkg)
    }

    /// The version doing the providing
    pub fn owner_ver(&self) -> VerId {
        VerId(self.version)
    }

    pub(crate) fn encode(&self, w: &mut RecordWriter<'_>) {
        w.str_ref(self.provide_version);
        w.u32(self.parent_pkg);
        w.u32(self.version);
        w.u32(self.next_provides);
        w.u32(self.next_pkg_prov);
    }

    pub(crate) fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            provide_version: r.str_ref()?,
            parent_pkg: r.u32()?,
            version: r.u32()?,
            next_provides: r.u32()?,
            next_pkg_prov: r.u32()?,
        })
    }
}

/// One physical repository index file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageFile {
    pub(crate) file_name: StrRef,
    pub(crate) archive: StrRef,
    pub(crate) component: StrRef,
    pub(crate) version: StrRef,
    pub(crate) origin: StrRef,
    pub(crate) label: StrRef,
    pub(crate) architecture: StrRef,
    pub(crate) site: StrRef,
    pub(crate) index_type: StrRef,
    pub(crate) size: u64,
    pub(crate) mtime: i64,
    pub(crate) priority: i32,
    pub(crate) flags: u8,
    pub(crate) next_file: u32,
}

impl PackageFile {
    pub const SIZE: usize = 61;

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    /// Default pin priority of versions listed by this file
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_source(&self) -> bool {
        self.flags & file_flags::NOT_SOURCE == 0
    }

    pub fn is_not_automatic(&self) -> bool {
        self.flags & file_flags::NOT_AUTOMATIC != 0
    }

    pub(crate) fn encode(&self, w: &mut RecordWriter<'_>) {
        w.str_ref(self.file_name);
        w.str_ref(self.archive);
        w.str_ref(self.component);
        w.str_ref(self.version);
        w.str_ref(self.origin);
        w.str_ref(self.label);
        w.str_ref(self.architecture);
        w.str_ref(self.site);
        w.str_ref(self.index_type);
        w.u64(self.size);
        w.i64(self.mtime);
        w.i32(self.priority);
        w.u8(self.flags);
        w.u32(self.next_file);
    }

    pub(crate) fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            file_name: r.str_ref()?,
            archive: r.str_ref()?,
            component: r.str_ref()?,
            version: r.str_ref()?,
            origin: r.str_ref()?,
            label: r.str_ref()?,
            architecture: r.str_ref()?,
            site: r.str_ref()?,
            index_type: r.str_ref()?,
            size: r.u64()?,
            mtime: r.i64()?,
            priority: r.i32()?,
            flags: r.u8()?,
            next_file: r.u32()?,
        })
    }
}

/// Links a version to one file that lists it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerFile {
    pub(crate) file: u32,
    pub(crate) next_file: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl VerFile {
    pub const SIZE: usize = 24;

    pub fn file(&self) -> FileId {
        FileId(self.file)
    }

    /// Offset of the stanza inside the index file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn encode(&self, w: &mut RecordWriter<'_>) {
        w.u32(self.file);
        w.u32(self.next_file);
        w.u64(self.offset);
        w.u64(self.size);
    }

    pub(crate) fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            file: r.u32()?,
            next_file: r.u32()?,
            offset: r.u64()?,
            size: r.u64()?,
        })
    }
}

/// Little-endian field writer used by the image encoder
pub(crate) struct RecordWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> RecordWriter<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn str_ref(&mut self, v: StrRef) {
        self.u32(v.0);
    }
}

/// Bounds-checked little-endian field reader
pub(crate) struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or_else(|| Error::ImageError(format!("truncated record at byte {}", self.pos)))?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos += N;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub(crate) fn str_ref(&mut self) -> Result<StrRef> {
        Ok(StrRef(self.u32()?))
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn encoded_len(encode: impl FnOnce(&mut RecordWriter<'_>)) -> usize {
        let mut buf = Vec::new();
        encode(&mut RecordWriter::new(&mut buf));
        buf.len()
    }

    #[test]
    fn test_record_sizes_are_fixed() {
        assert_eq!(encoded_len(|w| Package::default().encode(w)), Package::SIZE);
        assert_eq!(encoded_len(|w| Version::default().encode(w)), Version::SIZE);
        assert_eq!(
            encoded_len(|w| Dependency::default().encode(w)),
            Dependency::SIZE
        );
        assert_eq!(encoded_len(|w| Provides::default().encode(w)), Provides::SIZE);
        assert_eq!(
            encoded_len(|w| PackageFile::default().encode(w)),
            PackageFile::SIZE
        );
        assert_eq!(encoded_len(|w| VerFile::default().encode(w)), VerFile::SIZE);
    }

    #[test]
    fn test_dependency_decode_rejects_bad_type() {
        let dep = Dependency {
            package: 3,
            dep_type: 99,
            ..Default::default()
        };
        let mut buf = Vec::new();
        dep.encode(&mut RecordWriter::new(&mut buf));
        assert!(Dependency::decode(&mut RecordReader::new(&buf)).is_err());
    }

    #[test]
    fn test_reader_truncation() {
        let mut r = RecordReader::new(&[1, 2]);
        assert!(r.u32().is_err());
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_dep_type_classification() {
        assert!(DepType::Depends.is_critical());
        assert!(DepType::Conflicts.is_critical());
        assert!(!DepType::Recommends.is_critical());
        assert!(!DepType::Replaces.is_critical());
        assert!(DepType::Replaces.is_negative());
        assert!(!DepType::PreDepends.is_negative());
        assert_eq!(DepType::PreDepends.to_string(), "Pre-Depends");
        assert_eq!(DepType::from_str("Obsoletes").unwrap(), DepType::Obsoletes);
        assert_eq!(DepType::from_u8(2), Some(DepType::PreDepends));
    }

    #[test]
    fn test_current_state_has_version() {
        assert!(CurrentState::Installed.has_current_version());
        assert!(CurrentState::HalfConfigured.has_current_version());
        assert!(!CurrentState::ConfigFiles.has_current_version());
        assert!(!CurrentState::NotInstalled.has_current_version());
    }
}
