// src/version/mod.rs

//! Version handling and dependency operator checks
//!
//! This module provides the pluggable [`VersioningSystem`] capability used by
//! the package cache and the dependency state overlay, plus the Debian
//! implementation of it: epoch:upstream-revision strings compared by
//! alternating non-digit and digit runs, with `~` sorting before everything
//! (including the end of the string).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use strum_macros::{Display, EnumString};
use tracing::warn;

/// Comparison operator attached to a dependency
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum CompareOp {
    /// No version restriction
    #[default]
    #[strum(to_string = "")]
    #[serde(rename = "")]
    NoOp = 0,
    #[strum(to_string = "<=")]
    #[serde(rename = "<=")]
    LessEq = 1,
    #[strum(to_string = ">=")]
    #[serde(rename = ">=")]
    GreaterEq = 2,
    #[strum(to_string = "<<", serialize = "<")]
    #[serde(rename = "<<", alias = "<")]
    Less = 3,
    #[strum(to_string = ">>", serialize = ">")]
    #[serde(rename = ">>", alias = ">")]
    Greater = 4,
    #[strum(to_string = "=")]
    #[serde(rename = "=")]
    Equals = 5,
    #[strum(to_string = "!=")]
    #[serde(rename = "!=")]
    NotEquals = 6,
}

impl CompareOp {
    /// Apply the operator to the result of `compare(package_version, required)`
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompareOp::NoOp => true,
            CompareOp::LessEq => ord != Ordering::Greater,
            CompareOp::GreaterEq => ord != Ordering::Less,
            CompareOp::Less => ord == Ordering::Less,
            CompareOp::Greater => ord == Ordering::Greater,
            CompareOp::Equals => ord == Ordering::Equal,
            CompareOp::NotEquals => ord != Ordering::Equal,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => CompareOp::NoOp,
            1 => CompareOp::LessEq,
            2 => CompareOp::GreaterEq,
            3 => CompareOp::Less,
            4 => CompareOp::Greater,
            5 => CompareOp::Equals,
            6 => CompareOp::NotEquals,
            _ => return None,
        })
    }
}

/// Versioning policy consulted by the cache and the dependency state
///
/// The cache never hardcodes comparison; alternate schemes implement this
/// trait and are injected at construction time.
pub trait VersioningSystem: fmt::Debug + Send + Sync {
    /// Name recorded in cache images so a mismatch forces a rebuild
    fn label(&self) -> &'static str;

    /// Total order over version strings, tolerant of malformed input
    fn compare(&self, a: &str, b: &str) -> Ordering;

    /// Strict well-formedness check
    fn validate(&self, version: &str) -> Result<()>;

    /// Whether `pkg_ver` satisfies `op dep_ver`
    ///
    /// A malformed operand makes the pair unordered: only `!=` holds.
    fn check_dep(&self, pkg_ver: &str, op: CompareOp, dep_ver: &str) -> bool {
        if op == CompareOp::NoOp {
            return true;
        }
        if let Err(e) = self.validate(pkg_ver).and_then(|_| self.validate(dep_ver)) {
            warn!("Treating '{}' {} '{}' as unordered: {}", pkg_ver, op, dep_ver, e);
            return op == CompareOp::NotEquals;
        }
        op.matches(self.compare(pkg_ver, dep_ver))
    }

    /// Version with epoch and revision stripped
    fn upstream_version<'a>(&self, version: &'a str) -> &'a str;
}

/// A Debian version split into its three fields
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: Option<String>,
}

impl DebVersion {
    /// Parse a Debian version string
    ///
    /// Format: [epoch:]upstream[-revision]
    /// Examples:
    /// - "1.2.3" → epoch=0, upstream="1.2.3", revision=None
    /// - "2:1.2.3" → epoch=2, upstream="1.2.3", revision=None
    /// - "1.2.3-4ubuntu1" → epoch=0, upstream="1.2.3", revision=Some("4ubuntu1")
    /// - "1:2.3-4-5" → epoch=1, upstream="2.3-4", revision=Some("5")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::VersionParseError("empty version string".to_string()));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(Error::VersionParseError(format!(
                "version '{}' has embedded spaces",
                s
            )));
        }

        let (epoch, upstream, revision) = match s.split_once(':') {
            Some((e, rest)) => {
                if e.is_empty() || !e.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::VersionParseError(format!(
                        "epoch in version '{}' is not a number",
                        s
                    )));
                }
                let epoch = e.parse::<u64>().map_err(|err| {
                    Error::VersionParseError(format!("epoch in version '{}': {}", s, err))
                })?;
                let (up, rev) = split_revision(rest);
                (epoch, up, rev)
            }
            None => {
                let (up, rev) = split_revision(s);
                (0, up, rev)
            }
        };

        if upstream.is_empty() {
            return Err(Error::VersionParseError(format!(
                "empty upstream version in '{}'",
                s
            )));
        }
        if let Some(bad) = upstream
            .chars()
            .find(|&c| !(c.is_ascii_alphanumeric() || ".+~-:".contains(c)))
        {
            return Err(Error::VersionParseError(format!(
                "invalid character '{}' in upstream version '{}'",
                bad, s
            )));
        }
        if let Some(rev) = revision {
            if rev.is_empty() {
                return Err(Error::VersionParseError(format!("empty revision in '{}'", s)));
            }
            if let Some(bad) = rev
                .chars()
                .find(|&c| !(c.is_ascii_alphanumeric() || ".+~".contains(c)))
            {
                return Err(Error::VersionParseError(format!(
                    "invalid character '{}' in revision of '{}'",
                    bad, s
                )));
            }
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.map(str::to_string),
        })
    }

    /// Split without validation, for the tolerant comparison path
    fn split_lenient(s: &str) -> (u64, &str, &str) {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) if !e.is_empty() && e.bytes().all(|b| b.is_ascii_digit()) => {
                (e.parse::<u64>().unwrap_or(u64::MAX), rest)
            }
            _ => (0, s),
        };
        let (upstream, revision) = split_revision(rest);
        (epoch, upstream, revision.unwrap_or(""))
    }

    /// Compare two parsed versions
    pub fn compare(&self, other: &DebVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match verrevcmp(self.upstream.as_bytes(), other.upstream.as_bytes()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        verrevcmp(
            self.revision.as_deref().unwrap_or("").as_bytes(),
            other.revision.as_deref().unwrap_or("").as_bytes(),
        )
    }
}

fn split_revision(s: &str) -> (&str, Option<&str>) {
    match s.rfind('-') {
        Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
        None => (s, None),
    }
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(ref revision) = self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort weight of one character in a non-digit run
///
/// End of string and digits weigh 0, letters their ASCII value, `~` sorts
/// below everything and remaining punctuation above all letters.
fn order(c: u8) -> i32 {
    if c.is_ascii_digit() {
        0
    } else if c.is_ascii_alphabetic() {
        c as i32
    } else if c == b'~' {
        -1
    } else if c != 0 {
        c as i32 + 256
    } else {
        0
    }
}

fn verrevcmp(a: &[u8], b: &[u8]) -> Ordering {
    let at = |s: &[u8], i: usize| s.get(i).copied().unwrap_or(0);
    let (mut i, mut j) = (0usize, 0usize);

    while i < a.len() || j < b.len() {
        let mut first_diff: i32 = 0;

        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = order(at(a, i));
            let bc = order(at(b, j));
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while at(a, i) == b'0' {
            i += 1;
        }
        while at(b, j) == b'0' {
            j += 1;
        }

        while at(a, i).is_ascii_digit() && at(b, j).is_ascii_digit() {
            if first_diff == 0 {
                first_diff = at(a, i) as i32 - at(b, j) as i32;
            }
            i += 1;
            j += 1;
        }

        if at(a, i).is_ascii_digit() {
            return Ordering::Greater;
        }
        if at(b, j).is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != 0 {
            return first_diff.cmp(&0);
        }
    }

    Ordering::Equal
}

/// The Debian (dpkg) versioning system
#[derive(Debug, Clone, Copy, Default)]
pub struct DebVersioning;

impl DebVersioning {
    pub const LABEL: &'static str = "Standard .deb";

    pub fn new() -> Self {
        Self
    }
}

impl VersioningSystem for DebVersioning {
    fn label(&self) -> &'static str {
        Self::LABEL
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        let (ea, ua, ra) = DebVersion::split_lenient(a.trim());
        let (eb, ub, rb) = DebVersion::split_lenient(b.trim());
        ea.cmp(&eb)
            .then_with(|| verrevcmp(ua.as_bytes(), ub.as_bytes()))
            .then_with(|| verrevcmp(ra.as_bytes(), rb.as_bytes()))
    }

    fn validate(&self, version: &str) -> Result<()> {
        DebVersion::parse(version).map(|_| ())
    }

    fn upstream_version<'a>(&self, version: &'a str) -> &'a str {
        let (_, upstream, _) = DebVersion::split_lenient(version);
        upstream
    }
}
