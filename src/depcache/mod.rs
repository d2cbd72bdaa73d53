// src/depcache/mod.rs

//! Dependency state overlay
//!
//! A [`DepCache`] sits on top of a read-only [`PackageCache`] and records,
//! per package, the policy candidate, the version the session is going to
//! install and the resulting [`Mode`]. For every dependency record it keeps
//! satisfaction bits against the installed, install and candidate versions
//! of its target, and for every package whether the critical (and the
//! recommended) dependencies of those versions are satisfied.
//!
//! Marking a package changes only the states that can observe it: the
//! package itself, the dependencies naming it, and the dependencies naming
//! anything one of its versions provides. Aggregate counters are kept exact
//! by storing each package's share and replacing it whenever the package is
//! refreshed.

mod garbage;
pub mod state;

pub use state::{dep_bits, flags, pkg_bits, Counters, Mode, StateCache, VersionKind};

use crate::cache::records::pkg_flags;
use crate::cache::{CacheId, CurrentState, DepId, DepType, InstState, PackageCache, PkgId, VerId};
use crate::policy::Policy;
use std::cmp::Ordering;
use tracing::{debug, trace};

/// Default recursion cap of automatic dependency installation
pub const DEFAULT_MAX_DEPTH: u32 = 100;

/// Per-session package state overlay
pub struct DepCache<'c> {
    cache: &'c PackageCache,
    policy: &'c dyn Policy,
    states: Vec<StateCache>,
    dep_states: Vec<u8>,
    shares: Vec<Counters>,
    totals: Counters,
    max_depth: u32,
    install_recommends: bool,
}

impl<'c> DepCache<'c> {
    /// Seed the overlay from `policy`: every package keeps its installed version
    pub fn new(cache: &'c PackageCache, policy: &'c dyn Policy) -> Self {
        let slots = cache.package_slots();
        let mut dc = Self {
            cache,
            policy,
            states: vec![StateCache::default(); slots],
            dep_states: vec![0; cache.dependency_count() + 1],
            shares: vec![Counters::default(); slots],
            totals: Counters::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            install_recommends: true,
        };
        dc.init();
        dc
    }

    fn init(&mut self) {
        let c = self.cache;
        for pkg in c.all_packages() {
            let candidate = self.policy.candidate(c, pkg);
            let status = self.compute_status(pkg, candidate);
            let st = &mut self.states[pkg.index()];
            st.candidate_ver = candidate;
            st.install_ver = c.current_ver(pkg);
            st.mode = Mode::Keep;
            st.status = status;
            if c.pkg(pkg).flags() & pkg_flags::AUTO != 0 {
                st.flags |= flags::AUTO;
            }
        }
        self.recompute_all();
        debug!(
            "Dependency cache ready: {} broken, {} need attention",
            self.broken_count(),
            self.bad_count()
        );
    }

    /// Recompute every dependency and package state, and the counters
    pub fn recompute_all(&mut self) {
        let c = self.cache;
        for raw in 1..=c.dependency_count() {
            let dep = DepId::from_raw(raw as u32);
            self.dep_states[raw] = self.dependency_state(dep);
        }
        for raw in 1..=c.version_count() {
            self.build_group_ors(VerId::from_raw(raw as u32));
        }
        self.totals = Counters::default();
        for pkg in c.all_packages() {
            self.shares[pkg.index()] = Counters::default();
            self.refresh(pkg);
        }
    }

    pub fn cache(&self) -> &'c PackageCache {
        self.cache
    }

    pub fn policy(&self) -> &'c dyn Policy {
        self.policy
    }

    pub fn set_max_auto_install_depth(&mut self, depth: u32) {
        self.max_depth = depth;
    }

    /// Whether Recommends count for policy state and automatic installation
    pub fn set_install_recommends(&mut self, on: bool) {
        if self.install_recommends != on {
            self.install_recommends = on;
            self.recompute_all();
        }
    }

    pub fn state(&self, pkg: PkgId) -> &StateCache {
        &self.states[pkg.index()]
    }

    pub fn mode(&self, pkg: PkgId) -> Mode {
        self.state(pkg).mode
    }

    pub fn candidate_ver(&self, pkg: PkgId) -> Option<VerId> {
        self.state(pkg).candidate_ver
    }

    pub fn install_ver(&self, pkg: PkgId) -> Option<VerId> {
        self.state(pkg).install_ver
    }

    pub fn dep_state(&self, dep: DepId) -> u8 {
        self.dep_states[dep.index()]
    }

    pub fn is_inst_broken(&self, pkg: PkgId) -> bool {
        self.state(pkg).is_inst_broken()
    }

    pub fn is_now_broken(&self, pkg: PkgId) -> bool {
        self.state(pkg).is_now_broken()
    }

    /// Packages whose install version has an unsatisfied critical dependency
    pub fn broken_count(&self) -> usize {
        self.totals.broken.max(0) as usize
    }

    pub fn policy_broken_count(&self) -> usize {
        self.totals.policy_broken.max(0) as usize
    }

    /// Installed packages dpkg left half-done or flagged for reinstallation
    pub fn bad_count(&self) -> usize {
        self.totals.bad.max(0) as usize
    }

    pub fn inst_count(&self) -> usize {
        self.totals.install.max(0) as usize
    }

    pub fn del_count(&self) -> usize {
        self.totals.delete.max(0) as usize
    }

    /// Upgradable packages being kept back
    pub fn keep_count(&self) -> usize {
        self.totals.keep.max(0) as usize
    }

    /// Change in installed bytes
    pub fn usr_size(&self) -> i64 {
        self.totals.usr_size
    }

    /// Bytes to download
    pub fn deb_size(&self) -> u64 {
        self.totals.deb_size.max(0) as u64
    }

    pub fn counters(&self) -> Counters {
        self.totals
    }

    /// Count every aggregate again from the per-package states
    pub fn recount(&self) -> Counters {
        let mut fresh = Counters::default();
        for pkg in self.cache.all_packages() {
            fresh.apply(&self.share(pkg), 1);
        }
        fresh
    }

    fn version_of(&self, pkg: PkgId, kind: VersionKind) -> Option<VerId> {
        match kind {
            VersionKind::Now => self.cache.current_ver(pkg),
            VersionKind::Install => self.states[pkg.index()].install_ver,
            VersionKind::Candidate => self.states[pkg.index()].candidate_ver,
        }
    }

    fn compute_status(&self, pkg: PkgId, candidate: Option<VerId>) -> i8 {
        let c = self.cache;
        match (c.current_ver(pkg), candidate) {
            (None, _) => 2,
            (Some(_), None) => 0,
            (Some(current), Some(candidate)) => {
                match c.vs().compare(c.ver_str(candidate), c.ver_str(current)) {
                    Ordering::Greater => 1,
                    Ordering::Equal => 0,
                    Ordering::Less => -1,
                }
            }
        }
    }

    fn is_important(&self, dep_type: DepType) -> bool {
        dep_type.is_critical() || (self.install_recommends && dep_type == DepType::Recommends)
    }

    /// Whether `dep` holds against the `kind` versions of its targets
    ///
    /// Negative dependencies hold when no matching version is present. A
    /// negative dependency never matches its own package.
    pub fn check_dep(&self, dep: DepId, kind: VersionKind) -> bool {
        let c = self.cache;
        let d = c.dep(dep);
        let dep_type = d.dep_type();
        let negative = dep_type.is_negative();
        let parent = c.dep_parent_pkg(dep);
        let target = d.target_pkg();

        let mut hit = false;
        if !(negative && target == parent)
            && let Some(ver) = self.version_of(target, kind)
            && c.dep_matches(dep, c.ver_str(ver))
        {
            hit = true;
        }
        if !hit && dep_type != DepType::Obsoletes {
            hit = c.pkg_provides(target).any(|prv| {
                let owner = c.prv(prv).owner_ver();
                let owner_pkg = c.ver(owner).parent_pkg();
                !(negative && owner_pkg == parent)
                    && self.version_of(owner_pkg, kind) == Some(owner)
                    && c.provide_matches(dep, prv)
            });
        }
        hit != negative
    }

    fn dependency_state(&self, dep: DepId) -> u8 {
        let mut bits = 0;
        if self.check_dep(dep, VersionKind::Now) {
            bits |= dep_bits::NOW;
        }
        if self.check_dep(dep, VersionKind::Install) {
            bits |= dep_bits::INSTALL;
        }
        if self.check_dep(dep, VersionKind::Candidate) {
            bits |= dep_bits::CVER;
        }
        bits
    }

    /// Spread each OR group's combined bits onto the group bits of its members
    fn build_group_ors(&mut self, ver: VerId) {
        let c = self.cache;
        let mut group: Vec<DepId> = Vec::new();
        let mut bits = 0u8;
        let flush = |states: &mut Vec<u8>, group: &mut Vec<DepId>, bits: u8| {
            for d in group.drain(..) {
                let s = &mut states[d.index()];
                *s = (*s & dep_bits::BASE) | (bits << 3);
            }
        };
        for dep in c.depends(ver) {
            group.push(dep);
            bits |= self.dep_states[dep.index()] & dep_bits::BASE;
            if !c.dep(dep).is_or() {
                flush(&mut self.dep_states, &mut group, bits);
                bits = 0;
            }
        }
        flush(&mut self.dep_states, &mut group, bits);
    }

    /// (critical groups satisfied, important groups satisfied) of `ver`
    fn version_state(&self, ver: VerId, check: u8) -> (bool, bool) {
        let c = self.cache;
        let mut min = true;
        let mut policy = true;
        for group in c.or_groups(ver) {
            if group.iter().any(|d| self.dep_states[d.index()] & check != 0) {
                continue;
            }
            let dep_type = c.dep(group[0]).dep_type();
            if dep_type.is_critical() {
                min = false;
                policy = false;
            } else if self.is_important(dep_type) {
                policy = false;
            }
        }
        (min, policy)
    }

    fn update_ver_state(&mut self, pkg: PkgId) {
        let c = self.cache;
        let st = self.states[pkg.index()];
        let current = c.current_ver(pkg);

        let levels = [
            (current, dep_bits::GNOW, pkg_bits::NOW_MIN, pkg_bits::NOW_POLICY),
            (st.candidate_ver, dep_bits::GINSTALL, pkg_bits::CAND_MIN, pkg_bits::CAND_POLICY),
            (st.install_ver, dep_bits::GINSTALL, pkg_bits::INST_MIN, pkg_bits::INST_POLICY),
        ];
        let mut bits = 0u8;
        for (ver, check, min_bit, policy_bit) in levels {
            let (min, policy) = ver.map_or((true, true), |v| self.version_state(v, check));
            if min {
                bits |= min_bit;
            }
            if policy {
                bits |= policy_bit;
            }
        }

        let mut f = st.flags & !(flags::NOW_BROKEN | flags::INST_BROKEN);
        if current.is_some() && bits & pkg_bits::NOW_MIN == 0 {
            f |= flags::NOW_BROKEN;
        }
        if st.install_ver.is_some() && bits & pkg_bits::INST_MIN == 0 {
            f |= flags::INST_BROKEN;
        }
        let st = &mut self.states[pkg.index()];
        st.dep_state = bits;
        st.flags = f;
    }

    fn needs_attention(&self, pkg: PkgId) -> bool {
        let p = self.cache.pkg(pkg);
        matches!(
            p.current_state(),
            CurrentState::UnPacked | CurrentState::HalfConfigured | CurrentState::HalfInstalled
        ) || matches!(p.inst_state(), InstState::ReInstReq | InstState::HoldReInstReq)
    }

    /// What `pkg` currently adds to the counters
    fn share(&self, pkg: PkgId) -> Counters {
        let c = self.cache;
        let st = &self.states[pkg.index()];
        let current = c.current_ver(pkg);
        let reinstall = st.has_flag(flags::REINSTALL);
        let mut k = Counters {
            broken: st.is_inst_broken() as i64,
            policy_broken: st.is_inst_policy_broken() as i64,
            bad: self.needs_attention(pkg) as i64,
            ..Default::default()
        };

        match current {
            None => {
                k.delete = (st.mode == Mode::Delete) as i64;
                k.install = (st.mode == Mode::Install) as i64;
            }
            Some(_) if st.status == 0 => {
                if st.mode == Mode::Delete {
                    k.delete = 1;
                } else if reinstall {
                    k.install = 1;
                }
            }
            Some(_) => match st.mode {
                Mode::Keep => k.keep = 1,
                Mode::Delete => k.delete = 1,
                Mode::Install => k.install = 1,
            },
        }

        match (current, st.install_ver) {
            (None, Some(v)) if st.mode == Mode::Install => {
                k.usr_size = c.ver(v).installed_size() as i64;
                k.deb_size = c.ver(v).size() as i64;
            }
            (Some(cur), Some(v)) if v != cur || reinstall => {
                k.usr_size = c.ver(v).installed_size() as i64 - c.ver(cur).installed_size() as i64;
                k.deb_size = c.ver(v).size() as i64;
            }
            (Some(cur), None) => {
                k.usr_size = -(c.ver(cur).installed_size() as i64);
            }
            _ => {}
        }
        k
    }

    fn account(&mut self, pkg: PkgId) {
        let new = self.share(pkg);
        let old = std::mem::replace(&mut self.shares[pkg.index()], new);
        self.totals.apply(&old, -1);
        self.totals.apply(&new, 1);
    }

    fn refresh(&mut self, pkg: PkgId) {
        self.update_ver_state(pkg);
        self.account(pkg);
    }

    /// Recompute `pkg` and every state that can observe it
    ///
    /// That is the package itself, the dependencies naming it and the
    /// dependencies naming anything one of its versions provides, plus the
    /// packages declaring those dependencies.
    pub fn update(&mut self, pkg: PkgId) {
        let c = self.cache;
        self.refresh(pkg);

        let mut deps: Vec<DepId> = c.rev_depends(pkg).collect();
        for ver in c.versions(pkg) {
            for prv in c.ver_provides(ver) {
                deps.extend(c.rev_depends(c.prv(prv).parent_pkg()));
            }
        }
        deps.sort_unstable();
        deps.dedup();

        let mut parents: Vec<VerId> = Vec::with_capacity(deps.len());
        for &dep in &deps {
            self.dep_states[dep.index()] = self.dependency_state(dep);
            parents.push(c.dep(dep).parent_ver());
        }
        parents.sort_unstable();
        parents.dedup();

        let mut pkgs: Vec<PkgId> = Vec::with_capacity(parents.len());
        for &ver in &parents {
            self.build_group_ors(ver);
            pkgs.push(c.ver(ver).parent_pkg());
        }
        pkgs.sort_unstable();
        pkgs.dedup();
        for p in pkgs {
            self.refresh(p);
        }
    }

    /// Keep the installed version (or nothing, if not installed)
    pub fn mark_keep(&mut self, pkg: PkgId) {
        let c = self.cache;
        if c.is_virtual(pkg) {
            return;
        }
        let current = c.current_ver(pkg);
        let st = &mut self.states[pkg.index()];
        if st.mode == Mode::Keep && st.install_ver == current {
            return;
        }
        st.mode = Mode::Keep;
        st.install_ver = current;
        st.flags &= !flags::PURGE;
        trace!("Keep {}", c.full_name(pkg));
        self.update(pkg);
    }

    /// Remove a package, optionally with its configuration files
    ///
    /// A package with nothing on disk stays in Keep mode with no install
    /// version; with `purge` leftover configuration files still make it a
    /// deletion.
    pub fn mark_delete(&mut self, pkg: PkgId, purge: bool) {
        let c = self.cache;
        if c.is_virtual(pkg) {
            return;
        }
        let current = c.current_ver(pkg);
        let residue = c.pkg(pkg).current_state() == CurrentState::ConfigFiles;
        let mode = if current.is_none() && !(purge && residue) {
            Mode::Keep
        } else {
            Mode::Delete
        };

        let st = &mut self.states[pkg.index()];
        let new_flags = if mode == Mode::Delete && purge {
            st.flags | flags::PURGE
        } else {
            st.flags & !flags::PURGE
        };
        if st.mode == mode && st.install_ver.is_none() && st.flags == new_flags {
            return;
        }
        st.mode = mode;
        st.install_ver = None;
        st.flags = new_flags;
        trace!("Delete {} (purge: {})", c.full_name(pkg), purge);
        self.update(pkg);
    }

    /// Install the candidate version of `pkg`
    ///
    /// With `auto_inst` unsatisfied dependencies of the candidate are
    /// installed too (and conflicting packages removed), recursively up to the
    /// configured depth. `from_user` clears the automatic flag; a new install
    /// made on behalf of another package gets it.
    pub fn mark_install(&mut self, pkg: PkgId, auto_inst: bool, from_user: bool) {
        self.mark_install_depth(pkg, auto_inst, 0, from_user);
    }

    fn mark_install_depth(&mut self, pkg: PkgId, auto_inst: bool, depth: u32, from_user: bool) {
        let c = self.cache;
        if depth > self.max_depth {
            debug!("Auto-install depth exceeded at {}", c.full_name(pkg));
            return;
        }

        let current = c.current_ver(pkg);
        let st = self.states[pkg.index()];
        if !st.is_inst_broken()
            && !st.is_inst_policy_broken()
            && (st.mode == Mode::Install || st.candidate_ver == current)
        {
            if st.candidate_ver == current && st.install_ver.is_none() {
                self.mark_keep(pkg);
            }
            return;
        }
        let Some(candidate) = st.candidate_ver else {
            return;
        };
        if c.is_virtual(pkg) {
            return;
        }

        let st = &mut self.states[pkg.index()];
        st.mode = if Some(candidate) == current {
            Mode::Keep
        } else {
            Mode::Install
        };
        st.install_ver = Some(candidate);
        st.flags &= !flags::PURGE;
        if from_user {
            st.flags &= !flags::AUTO;
        } else if st.status == 2 {
            st.flags |= flags::AUTO;
        }
        trace!(
            "Install {} {} (depth {})",
            c.full_name(pkg),
            c.ver_str(candidate),
            depth
        );
        self.update(pkg);

        if auto_inst {
            self.auto_install_deps(pkg, candidate, depth);
        }
    }

    fn auto_install_deps(&mut self, pkg: PkgId, ver: VerId, depth: u32) {
        let c = self.cache;
        let installed = c.current_ver(pkg).is_some();
        for group in c.or_groups(ver) {
            if group
                .iter()
                .any(|d| self.dep_states[d.index()] & dep_bits::INSTALL != 0)
            {
                continue;
            }
            let dep_type = c.dep(group[0]).dep_type();
            if !self.is_important(dep_type) || (installed && !dep_type.is_critical()) {
                continue;
            }

            if dep_type.is_negative() {
                for &dep in &group {
                    for target in c.all_targets(dep) {
                        let victim = c.ver(target).parent_pkg();
                        if victim != pkg && self.install_ver(victim) == Some(target) {
                            self.mark_delete(victim, false);
                        }
                    }
                }
                continue;
            }

            // first alternative some candidate can satisfy
            let Some(&start) = group
                .iter()
                .find(|d| self.dep_states[d.index()] & dep_bits::CVER != 0)
            else {
                continue;
            };
            if let Some(target) = self.install_target(start) {
                self.mark_install_depth(target, true, depth + 1, false);
            }
        }
    }

    /// Package whose candidate would satisfy `dep`
    ///
    /// The target itself wins; otherwise the best provider whose candidate is
    /// the providing version.
    fn install_target(&self, dep: DepId) -> Option<PkgId> {
        let c = self.cache;
        let target = c.dep(dep).target_pkg();
        let versions = c.all_targets(dep);
        if let Some(&v) = versions
            .iter()
            .find(|&&v| c.ver(v).parent_pkg() == target && self.candidate_ver(target) == Some(v))
        {
            return Some(c.ver(v).parent_pkg());
        }

        let mut best: Option<(PkgId, (bool, bool, i32))> = None;
        for v in versions {
            let p = c.ver(v).parent_pkg();
            if p == target || self.candidate_ver(p) != Some(v) {
                continue;
            }
            let key = (
                self.install_ver(p) == Some(v),
                c.pkg(p).is_essential() || c.pkg(p).is_important(),
                -(c.ver(v).priority().as_u8() as i32),
            );
            if best.is_none_or(|(_, k)| key > k) {
                best = Some((p, key));
            }
        }
        best.map(|(p, _)| p)
    }

    /// Retarget `pkg` to a specific version
    ///
    /// A package already being installed at its old candidate follows the
    /// new one.
    pub fn set_candidate_version(&mut self, pkg: PkgId, ver: VerId) {
        let c = self.cache;
        if c.ver(ver).parent_pkg() != pkg || self.candidate_ver(pkg) == Some(ver) {
            return;
        }
        let status = self.compute_status(pkg, Some(ver));
        let current = c.current_ver(pkg);
        let st = &mut self.states[pkg.index()];
        if st.mode == Mode::Install && st.install_ver == st.candidate_ver {
            st.install_ver = Some(ver);
            if Some(ver) == current {
                st.mode = Mode::Keep;
            }
        }
        st.candidate_ver = Some(ver);
        st.status = status;
        debug!("Candidate of {} set to {}", c.full_name(pkg), c.ver_str(ver));
        self.update(pkg);
    }

    /// Download and unpack the installed version again
    pub fn set_reinstall(&mut self, pkg: PkgId, on: bool) {
        if self.cache.current_ver(pkg).is_none() {
            return;
        }
        let st = &mut self.states[pkg.index()];
        if on {
            st.flags |= flags::REINSTALL;
        } else {
            st.flags &= !flags::REINSTALL;
        }
        self.account(pkg);
    }

    pub fn mark_auto(&mut self, pkg: PkgId, auto: bool) {
        let st = &mut self.states[pkg.index()];
        if auto {
            st.flags |= flags::AUTO;
        } else {
            st.flags &= !flags::AUTO;
        }
    }

    /// Whether one OR group of `ver` holds at install level
    pub fn group_satisfied(&self, group: &[DepId]) -> bool {
        group
            .iter()
            .any(|d| self.dep_states[d.index()] & dep_bits::GINSTALL != 0)
    }

    /// First unsatisfied critical OR group of the install version
    pub fn first_broken_group(&self, pkg: PkgId) -> Option<Vec<DepId>> {
        let ver = self.install_ver(pkg)?;
        self.cache.or_groups(ver).into_iter().find(|g| {
            self.cache.dep(g[0]).dep_type().is_critical() && !self.group_satisfied(g)
        })
    }
}
