// src/cache/stanza.rs

//! Pre-parsed index input
//!
//! The cache never reads repository index text. An external parser hands it
//! one [`IndexSource`] per index file: the file's metadata plus the package
//! stanzas it listed, already split into fields. The types deserialize from
//! JSON so the command-line driver and the tests can feed fixtures directly.

use super::records::{CurrentState, DepType, InstState, MultiArch, SelectedState, VersionPriority};
use crate::error::{Error, Result};
use crate::version::CompareOp;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default pin priority of the dpkg status file
pub const STATUS_FILE_PRIORITY: i32 = 100;
/// Default pin priority of a normal index file
pub const DEFAULT_FILE_PRIORITY: i32 = 500;
/// Default pin priority of a NotAutomatic index file
pub const NOT_AUTOMATIC_PRIORITY: i32 = 1;

/// Metadata of one physical index file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFileInfo {
    /// Local path of the index file
    pub file_name: String,

    /// Release archive ("stable", "bookworm-updates" ...)
    #[serde(default)]
    pub archive: String,

    #[serde(default)]
    pub component: String,

    /// Release version string of the archive
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub origin: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub architecture: String,

    /// Host the file was fetched from
    #[serde(default)]
    pub site: String,

    /// Index format, e.g. "Debian Package Index"
    #[serde(default)]
    pub index_type: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub mtime: i64,

    /// Versions from this file are only chosen when explicitly requested
    #[serde(default)]
    pub not_automatic: bool,

    /// This is the dpkg status file: its stanzas describe installed packages
    #[serde(default)]
    pub status: bool,

    /// Explicit pin priority, overriding the per-kind default
    #[serde(default)]
    pub priority: Option<i32>,
}

impl PackageFileInfo {
    /// A normal downloadable index file
    pub fn index(file_name: impl Into<String>, archive: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            archive: archive.into(),
            index_type: "Debian Package Index".to_string(),
            ..Default::default()
        }
    }

    /// The dpkg status file
    pub fn status_file() -> Self {
        Self {
            file_name: "/var/lib/dpkg/status".to_string(),
            archive: "now".to_string(),
            index_type: "Debian dpkg status file".to_string(),
            status: true,
            ..Default::default()
        }
    }

    pub fn effective_priority(&self) -> i32 {
        match self.priority {
            Some(p) => p,
            None if self.status => STATUS_FILE_PRIORITY,
            None if self.not_automatic => NOT_AUTOMATIC_PRIORITY,
            None => DEFAULT_FILE_PRIORITY,
        }
    }
}

/// One alternative of a relation clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepAtom {
    pub name: String,

    /// Target architecture; defaults to the architecture of the declaring version
    #[serde(default)]
    pub arch: Option<String>,

    #[serde(default)]
    pub op: CompareOp,

    #[serde(default)]
    pub version: Option<String>,
}

impl DepAtom {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: None,
            op: CompareOp::NoOp,
            version: None,
        }
    }

    pub fn versioned(name: impl Into<String>, op: CompareOp, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: None,
            op,
            version: Some(version.into()),
        }
    }
}

/// A relation clause: satisfied when any alternative holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "type")]
    pub dep_type: DepType,
    pub alternatives: Vec<DepAtom>,
}

/// A provided name, optionally at a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideSpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Installation state read from the status file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStatus {
    #[serde(default)]
    pub selected: SelectedState,
    #[serde(default)]
    pub inst: InstState,
    #[serde(default)]
    pub current: CurrentState,
}

impl InstallStatus {
    /// "install ok installed"
    pub fn installed() -> Self {
        Self {
            selected: SelectedState::Install,
            inst: InstState::Ok,
            current: CurrentState::Installed,
        }
    }
}

/// One package stanza of an index file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStanza {
    pub name: String,
    pub version: String,

    /// Missing means the native architecture
    #[serde(default)]
    pub architecture: Option<String>,

    #[serde(default)]
    pub section: Option<String>,

    /// Download size in bytes
    #[serde(default)]
    pub size: u64,

    /// Unpacked size in bytes
    #[serde(default)]
    pub installed_size: u64,

    #[serde(default)]
    pub multi_arch: MultiArch,

    #[serde(default)]
    pub hash: Option<String>,

    #[serde(default)]
    pub priority: VersionPriority,

    #[serde(default)]
    pub essential: bool,

    #[serde(default)]
    pub important: bool,

    /// Installed as a dependency rather than by request
    #[serde(default)]
    pub auto_installed: bool,

    #[serde(default)]
    pub depends: Vec<Relation>,

    #[serde(default)]
    pub provides: Vec<ProvideSpec>,

    /// Only present in status file stanzas
    #[serde(default)]
    pub status: Option<InstallStatus>,

    /// Byte offset of the stanza inside its index file
    #[serde(default)]
    pub offset: u64,
}

impl PackageStanza {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            architecture: None,
            section: None,
            size: 0,
            installed_size: 0,
            multi_arch: MultiArch::No,
            hash: None,
            priority: VersionPriority::Unknown,
            essential: false,
            important: false,
            auto_installed: false,
            depends: Vec::new(),
            provides: Vec::new(),
            status: None,
            offset: 0,
        }
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.architecture = Some(arch.into());
        self
    }

    pub fn relation(mut self, dep_type: DepType, alternatives: Vec<DepAtom>) -> Self {
        self.depends.push(Relation {
            dep_type,
            alternatives,
        });
        self
    }

    pub fn depends(self, atom: DepAtom) -> Self {
        self.relation(DepType::Depends, vec![atom])
    }

    pub fn conflicts(self, name: impl Into<String>) -> Self {
        self.relation(DepType::Conflicts, vec![DepAtom::new(name)])
    }

    pub fn provides(mut self, name: impl Into<String>, version: Option<&str>) -> Self {
        self.provides.push(ProvideSpec {
            name: name.into(),
            version: version.map(str::to_string),
        });
        self
    }

    pub fn installed(mut self) -> Self {
        self.status = Some(InstallStatus::installed());
        self
    }

    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    pub fn sizes(mut self, size: u64, installed_size: u64) -> Self {
        self.size = size;
        self.installed_size = installed_size;
        self
    }

    /// Structural checks; version syntax is checked by the builder
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(Error::BuildError(format!("invalid package name '{}'", self.name)));
        }
        if self.version.is_empty() {
            return Err(Error::BuildError(format!("{}: empty version", self.name)));
        }
        if let Some(arch) = &self.architecture
            && arch.is_empty()
        {
            return Err(Error::BuildError(format!("{}: empty architecture", self.name)));
        }
        for relation in &self.depends {
            if relation.alternatives.is_empty() {
                return Err(Error::BuildError(format!(
                    "{}: empty {} clause",
                    self.name, relation.dep_type
                )));
            }
            for atom in &relation.alternatives {
                if atom.name.is_empty() {
                    return Err(Error::BuildError(format!(
                        "{}: {} clause names no package",
                        self.name, relation.dep_type
                    )));
                }
                let versioned = atom.version.as_deref().is_some_and(|v| !v.is_empty());
                if versioned != (atom.op != CompareOp::NoOp) {
                    return Err(Error::BuildError(format!(
                        "{}: operator and version of '{}' must appear together",
                        self.name, atom.name
                    )));
                }
            }
        }
        if let Some(p) = self.provides.iter().find(|p| p.name.is_empty()) {
            return Err(Error::BuildError(format!(
                "{}: provides entry with empty name (version {:?})",
                self.name, p.version
            )));
        }
        Ok(())
    }
}

/// One index file and the stanzas it listed, in file order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSource {
    pub file: PackageFileInfo,
    #[serde(default)]
    pub stanzas: Vec<PackageStanza>,
}

impl IndexSource {
    pub fn new(file: PackageFileInfo, stanzas: Vec<PackageStanza>) -> Self {
        Self { file, stanzas }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }
}
