// src/lib.rs

//! pkgcore - package cache and dependency resolution core
//!
//! In-memory engine behind a binary package manager: it merges pre-parsed
//! repository index stanzas into a relocatable package graph, layers a
//! per-session dependency-state overlay on top of it, and repairs a set of
//! user requests into a dependency-consistent transaction.
//!
//! # Architecture
//!
//! - Package cache: arena of fixed-size records addressed by integer ids,
//!   serializable to a flat byte image
//! - Versioning: pluggable comparison policy (Debian algorithm by default)
//! - Dependency cache: candidate/install versions, modes and satisfaction
//!   bits per package, with incrementally maintained counters
//! - Problem resolver: scored, pass-wise fixed-point repair of broken packages
//!
//! Fetching, unpacking and script execution live outside this crate; the
//! resolver hands an ordered [`ResolutionPlan`] to whatever executes it.

pub mod cache;
pub mod config;
pub mod depcache;
pub mod diagnostics;
mod error;
pub mod lock;
pub mod policy;
pub mod resolver;
pub mod upgrade;
pub mod version;

pub use cache::{
    CacheBuilder, DepId, DepType, IndexSource, PackageCache, PackageFileInfo, PackageStanza,
    PkgId, PrvId, VerId,
};
pub use config::CoreConfig;
pub use depcache::{DepCache, Mode};
pub use diagnostics::{Diagnostics, Message, Severity};
pub use error::{Error, Result};
pub use lock::CacheLock;
pub use policy::{DefaultPolicy, Policy};
pub use resolver::{ActionKind, PlannedAction, ProblemResolver, ResolutionPlan};
pub use version::{CompareOp, DebVersion, DebVersioning, VersioningSystem};
