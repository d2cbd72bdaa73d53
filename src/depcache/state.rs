// src/depcache/state.rs

//! Per-package and per-dependency state records of the overlay

use crate::cache::VerId;

/// What should happen to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    Delete,
    #[default]
    Keep,
    Install,
}

/// Which version of a target a dependency is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    /// The installed version
    Now,
    /// The version the overlay is going to install
    Install,
    /// The policy candidate
    Candidate,
}

/// Package state flag bits
pub mod flags {
    /// Installed only to satisfy dependencies
    pub const AUTO: u16 = 1 << 0;
    /// Remove configuration files too
    pub const PURGE: u16 = 1 << 1;
    pub const REINSTALL: u16 = 1 << 2;
    /// Auto-installed and no longer needed
    pub const GARBAGE: u16 = 1 << 3;
    /// The installed version has an unsatisfied critical dependency
    pub const NOW_BROKEN: u16 = 1 << 4;
    /// The install version has an unsatisfied critical dependency
    pub const INST_BROKEN: u16 = 1 << 5;
}

/// Per-dependency satisfaction bits
///
/// The first three hold the dependency on its own; the `G` variants hold the
/// whole OR group the dependency belongs to.
pub mod dep_bits {
    pub const NOW: u8 = 1 << 0;
    pub const INSTALL: u8 = 1 << 1;
    pub const CVER: u8 = 1 << 2;
    pub const GNOW: u8 = 1 << 3;
    pub const GINSTALL: u8 = 1 << 4;
    pub const GCVER: u8 = 1 << 5;

    pub const BASE: u8 = NOW | INSTALL | CVER;
}

/// Per-package aggregate bits: set when every relevant group is satisfied
///
/// `MIN` covers critical dependencies, `POLICY` adds Recommends.
pub mod pkg_bits {
    pub const NOW_POLICY: u8 = 1 << 0;
    pub const NOW_MIN: u8 = 1 << 1;
    pub const INST_POLICY: u8 = 1 << 2;
    pub const INST_MIN: u8 = 1 << 3;
    pub const CAND_POLICY: u8 = 1 << 4;
    pub const CAND_MIN: u8 = 1 << 5;
}

/// One package's slot of the overlay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCache {
    pub(crate) candidate_ver: Option<VerId>,
    pub(crate) install_ver: Option<VerId>,
    pub(crate) mode: Mode,
    pub(crate) flags: u16,
    pub(crate) dep_state: u8,
    /// Candidate against installed: 2 not installed, 1 newer, 0 same, -1 older
    pub(crate) status: i8,
}

impl StateCache {
    pub fn candidate_ver(&self) -> Option<VerId> {
        self.candidate_ver
    }

    pub fn install_ver(&self) -> Option<VerId> {
        self.install_ver
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn dep_state(&self) -> u8 {
        self.dep_state
    }

    pub fn status(&self) -> i8 {
        self.status
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn is_install(&self) -> bool {
        self.mode == Mode::Install
    }

    pub fn is_delete(&self) -> bool {
        self.mode == Mode::Delete
    }

    pub fn is_keep(&self) -> bool {
        self.mode == Mode::Keep
    }

    pub fn is_new_install(&self) -> bool {
        self.status == 2 && self.mode == Mode::Install
    }

    pub fn is_upgrade(&self) -> bool {
        self.status > 0 && self.mode == Mode::Install
    }

    pub fn is_downgrade(&self) -> bool {
        self.status < 0 && self.mode == Mode::Install
    }

    /// A newer candidate exists (or the package is not installed)
    pub fn is_upgradable(&self) -> bool {
        self.status >= 1 && self.candidate_ver.is_some()
    }

    /// Kept although the candidate differs from the installed version
    pub fn is_held(&self) -> bool {
        self.status != 0 && self.mode == Mode::Keep
    }

    pub fn is_now_broken(&self) -> bool {
        self.has_flag(flags::NOW_BROKEN)
    }

    pub fn is_inst_broken(&self) -> bool {
        self.has_flag(flags::INST_BROKEN)
    }

    pub fn is_inst_policy_broken(&self) -> bool {
        self.install_ver.is_some() && self.dep_state & pkg_bits::INST_POLICY == 0
    }

    pub fn is_auto(&self) -> bool {
        self.has_flag(flags::AUTO)
    }

    pub fn is_garbage(&self) -> bool {
        self.has_flag(flags::GARBAGE)
    }
}

/// Aggregate counters over every package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub broken: i64,
    pub policy_broken: i64,
    pub bad: i64,
    pub install: i64,
    pub delete: i64,
    pub keep: i64,
    pub usr_size: i64,
    pub deb_size: i64,
}

impl Counters {
    /// Add (`sign` 1) or withdraw (`sign` -1) one package's share
    pub(crate) fn apply(&mut self, c: &Counters, sign: i64) {
        self.broken += sign * c.broken;
        self.policy_broken += sign * c.policy_broken;
        self.bad += sign * c.bad;
        self.install += sign * c.install;
        self.delete += sign * c.delete;
        self.keep += sign * c.keep;
        self.usr_size += sign * c.usr_size;
        self.deb_size += sign * c.deb_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_queries() {
        let mut st = StateCache {
            candidate_ver: Some(VerId(3)),
            install_ver: Some(VerId(3)),
            mode: Mode::Install,
            status: 2,
            ..Default::default()
        };
        assert!(st.is_new_install());
        assert!(st.is_upgrade());
        assert!(!st.is_held());

        st.mode = Mode::Keep;
        st.status = 1;
        st.install_ver = Some(VerId(2));
        assert!(st.is_held());
        assert!(st.is_upgradable());
        assert!(!st.is_upgrade());
    }

    #[test]
    fn test_counters_apply() {
        let mut counters = Counters::default();
        let c = Counters {
            install: 1,
            usr_size: 400,
            ..Default::default()
        };
        counters.apply(&c, 1);
        counters.apply(&c, 1);
        counters.apply(&c, -1);
        assert_eq!(counters.install, 1);
        assert_eq!(counters.usr_size, 400);
    }
}
