// src/resolver/mod.rs

//! Problem resolver
//!
//! The resolver turns a set of requested marks on a [`DepCache`] into a
//! state where no install version has an unsatisfied critical dependency.
//! It works in passes over the broken packages, highest score first:
//!
//! - an unsatisfied requirement is fixed by installing the best alternative
//!   (one already going to be installed, then the highest score, then the
//!   candidate, then the first listed), pulling in its own requirements;
//! - a triggered conflict removes the lower-scored side;
//! - a package nothing can fix is kept back or removed, unless it is
//!   protected, in which case it stays broken.
//!
//! Passes repeat until one changes nothing or the pass cap is reached.
//! Anything still broken is reported through [`Diagnostics`] and as
//! [`Error::UnresolvableConstraint`].

pub mod graph;
pub mod plan;

pub use graph::OrderGraph;
pub use plan::{ActionKind, PlannedAction, ResolutionPlan};

use crate::cache::{CacheId, DepId, PkgId, VerId, VersionPriority};
use crate::config::ResolverConfig;
use crate::depcache::{DepCache, DEFAULT_MAX_DEPTH};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Resolver flag bits per package
pub mod resolver_flags {
    /// The resolver must not change the package's mode
    pub const PROTECTED: u8 = 1 << 0;
    /// Never chosen to satisfy a dependency
    pub const REJECTED: u8 = 1 << 1;
    /// Requested for removal
    pub const TO_REMOVE: u8 = 1 << 2;
    /// Version picked by the resolver to satisfy a dependency
    pub const SELECTED: u8 = 1 << 3;
}

use resolver_flags::{PROTECTED, REJECTED, SELECTED, TO_REMOVE};

/// Default cap on scan-and-repair passes
pub const DEFAULT_MAX_PASSES: u32 = 10;

/// Score weights; only their relative order matters
pub mod weights {
    pub const PRIORITY: i32 = 5;
    pub const ESSENTIAL: i32 = 100;
    pub const IMPORTANT: i32 = 50;
    pub const REV_DEPENDS_CAP: i32 = 30;
    pub const MARKED_DELETE: i32 = -10;
    pub const INSTALLED: i32 = 20;
}

fn priority_weight(priority: VersionPriority) -> i32 {
    match priority {
        VersionPriority::Important => 3,
        VersionPriority::Required => 2,
        VersionPriority::Standard => 1,
        VersionPriority::Optional | VersionPriority::Unknown => 0,
        VersionPriority::Extra => -1,
    }
}

pub struct ProblemResolver<'a, 'c> {
    cache: &'a mut DepCache<'c>,
    flags: Vec<u8>,
    scores: Vec<i32>,
    max_passes: u32,
    max_depth: u32,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, 'c> ProblemResolver<'a, 'c> {
    pub fn new(cache: &'a mut DepCache<'c>) -> Self {
        let slots = cache.cache().package_count() + 1;
        Self {
            cache,
            flags: vec![0; slots],
            scores: vec![0; slots],
            max_passes: DEFAULT_MAX_PASSES,
            max_depth: DEFAULT_MAX_DEPTH,
            cancel: None,
        }
    }

    pub fn from_config(cache: &'a mut DepCache<'c>, config: &ResolverConfig) -> Self {
        let mut resolver = Self::new(cache).with_max_passes(config.max_passes);
        resolver.max_depth = config.max_auto_install_depth;
        resolver
    }

    pub fn with_max_passes(mut self, passes: u32) -> Self {
        self.max_passes = passes.max(1);
        self
    }

    /// Abort flag checked before every pass
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn depcache(&self) -> &DepCache<'c> {
        self.cache
    }

    pub fn protect(&mut self, pkg: PkgId) {
        self.flags[pkg.index()] |= PROTECTED;
    }

    /// Mark `pkg` for removal and keep it that way
    pub fn remove(&mut self, pkg: PkgId, purge: bool) {
        self.cache.mark_delete(pkg, purge);
        self.flags[pkg.index()] |= PROTECTED | TO_REMOVE;
    }

    pub fn reject(&mut self, pkg: PkgId) {
        self.flags[pkg.index()] |= REJECTED;
    }

    /// Forget every resolver flag of `pkg`
    pub fn clear(&mut self, pkg: PkgId) {
        self.flags[pkg.index()] = 0;
    }

    pub fn is_protected(&self, pkg: PkgId) -> bool {
        self.flags[pkg.index()] & PROTECTED != 0
    }

    pub fn is_rejected(&self, pkg: PkgId) -> bool {
        self.flags[pkg.index()] & REJECTED != 0
    }

    /// Protect every package currently headed for installation
    ///
    /// Protected removals are re-applied first so an install made since
    /// [`ProblemResolver::remove`] cannot undo them.
    pub fn install_protect(&mut self) {
        let c = self.cache.cache();
        for pkg in c.all_packages() {
            let f = self.flags[pkg.index()];
            if f & PROTECTED != 0 && f & TO_REMOVE != 0 {
                let purge = self.cache.state(pkg).has_flag(crate::depcache::flags::PURGE);
                self.cache.mark_delete(pkg, purge);
            } else if self.cache.state(pkg).is_install() {
                self.protect(pkg);
            }
        }
    }

    pub fn score(&self, pkg: PkgId) -> i32 {
        self.scores[pkg.index()]
    }

    /// Recompute every package's score from the current state
    pub fn make_scores(&mut self) {
        let c = self.cache.cache();
        for pkg in c.all_packages() {
            let p = c.pkg(pkg);
            let mut score = 0;
            if let Some(ver) = self.cache.candidate_ver(pkg).or(c.current_ver(pkg)) {
                score += priority_weight(c.ver(ver).priority()) * weights::PRIORITY;
            }
            if p.is_essential() {
                score += weights::ESSENTIAL;
            }
            if p.is_important() {
                score += weights::IMPORTANT;
            }
            let dependents = c
                .rev_depends(pkg)
                .filter(|&d| {
                    let dep_type = c.dep(d).dep_type();
                    dep_type.is_critical() && !dep_type.is_negative() && c.dep_parent_pkg(d) != pkg
                })
                .count() as i32;
            score += dependents.min(weights::REV_DEPENDS_CAP);
            if self.cache.state(pkg).is_delete() {
                score += weights::MARKED_DELETE;
            }
            if c.current_ver(pkg).is_some() {
                score += weights::INSTALLED;
            }
            self.scores[pkg.index()] = score;
        }
    }

    /// Packages by descending score, then ascending id
    fn visit_order(&self) -> Vec<PkgId> {
        let mut order: Vec<PkgId> = self.cache.cache().all_packages().collect();
        order.sort_by_key(|&p| (std::cmp::Reverse(self.score(p)), p));
        order
    }

    fn check_cancelled(&self) -> Result<()> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            debug!("Resolver cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Whether a broken package is left alone
    ///
    /// Without `broken_fix`, packages that were broken before and are not
    /// being changed are not the resolver's business.
    fn skips(&self, pkg: PkgId, broken_fix: bool) -> bool {
        let st = self.cache.state(pkg);
        !broken_fix && st.is_now_broken() && st.is_keep()
    }

    /// Repair the overlay until no package is broken
    pub fn resolve(&mut self, broken_fix: bool, diag: &mut Diagnostics) -> Result<()> {
        self.make_scores();
        let order = self.visit_order();
        debug!(
            "Resolving {} broken packages (fix broken: {})",
            self.cache.broken_count(),
            broken_fix
        );

        let mut pass = 0;
        while pass < self.max_passes {
            self.check_cancelled()?;
            pass += 1;
            let mut changed = false;
            for &pkg in &order {
                if !self.cache.is_inst_broken(pkg) || self.skips(pkg, broken_fix) {
                    continue;
                }
                changed |= self.fix_package(pkg);
            }
            debug!(
                "Resolver pass {}: {} broken, changed: {}",
                pass,
                self.cache.broken_count(),
                changed
            );
            if !changed {
                break;
            }
        }

        self.report(broken_fix, diag)?;
        info!("Resolved after {} passes", pass);
        Ok(())
    }

    fn fix_package(&mut self, pkg: PkgId) -> bool {
        let c = self.cache.cache();
        let Some(ver) = self.cache.install_ver(pkg) else {
            return false;
        };
        let mut changed = false;
        for group in c.or_groups(ver) {
            // the package itself may have been given up meanwhile
            if self.cache.install_ver(pkg) != Some(ver) {
                break;
            }
            let dep_type = c.dep(group[0]).dep_type();
            if !dep_type.is_critical() || self.cache.group_satisfied(&group) {
                continue;
            }
            trace!("{} has unsatisfied {}", c.full_name(pkg), c.describe_group(&group));
            changed |= if dep_type.is_negative() {
                self.fix_conflict(pkg, &group)
            } else {
                self.fix_requirement(pkg, &group)
            };
        }
        changed
    }

    fn fix_requirement(&mut self, pkg: PkgId, group: &[DepId]) -> bool {
        let c = self.cache.cache();
        if let Some(target) = self.choose_alternative(pkg, group) {
            let owner = c.ver(target).parent_pkg();
            debug!(
                "{} needs {}: installing {} {}",
                c.full_name(pkg),
                c.describe_group(group),
                c.full_name(owner),
                c.ver_str(target)
            );
            self.select(owner, target);
            self.install_with_deps(owner, 0);
            if self.cache.group_satisfied(group) {
                return true;
            }
        }

        if self.is_protected(pkg) {
            debug!(
                "{} is protected, leaving {} unsatisfied",
                c.full_name(pkg),
                c.describe_group(group)
            );
            return false;
        }
        self.sacrifice(pkg);
        true
    }

    fn fix_conflict(&mut self, pkg: PkgId, group: &[DepId]) -> bool {
        let c = self.cache.cache();
        let mut changed = false;
        for &dep in group {
            for target in c.all_targets(dep) {
                let other = c.ver(target).parent_pkg();
                if other == pkg || self.cache.install_ver(other) != Some(target) {
                    continue;
                }
                let victim = match (self.is_protected(pkg), self.is_protected(other)) {
                    (true, true) => {
                        debug!(
                            "{} and {} conflict and are both protected",
                            c.full_name(pkg),
                            c.full_name(other)
                        );
                        continue;
                    }
                    (true, false) => other,
                    (false, true) => pkg,
                    (false, false) if self.score(pkg) < self.score(other) => pkg,
                    (false, false) => other,
                };
                debug!(
                    "{} conflicts with {}: giving up {}",
                    c.full_name(pkg),
                    c.full_name(other),
                    c.full_name(victim)
                );
                self.sacrifice(victim);
                changed = true;
                if victim == pkg {
                    return true;
                }
            }
        }
        changed
    }

    /// Best version satisfying one of the alternatives of `group`
    ///
    /// Alternatives rank by (already being installed, owner score); ties keep
    /// the first listed. Within one alternative the candidate version wins.
    fn choose_alternative(&self, pkg: PkgId, group: &[DepId]) -> Option<VerId> {
        let mut best: Option<(VerId, (bool, i32))> = None;
        for &dep in group {
            let Some((target, (installing, score, _))) = self.best_target(pkg, dep) else {
                continue;
            };
            let key = (installing, score);
            if best.is_none_or(|(_, k)| key > k) {
                best = Some((target, key));
            }
        }
        best.map(|(v, _)| v)
    }

    /// Best usable version among the targets of a single alternative
    fn best_target(&self, pkg: PkgId, dep: DepId) -> Option<(VerId, (bool, i32, bool))> {
        let c = self.cache.cache();
        let mut best: Option<(VerId, (bool, i32, bool))> = None;
        for target in c.all_targets(dep) {
            let owner = c.ver(target).parent_pkg();
            let installing = self.cache.install_ver(owner) == Some(target);
            let pinned = self.flags[owner.index()] & (PROTECTED | SELECTED) != 0;
            if owner == pkg
                || self.is_rejected(owner)
                || (pinned && !installing)
                || (!c.is_downloadable(target) && c.current_ver(owner) != Some(target))
            {
                continue;
            }
            let key = (
                installing,
                self.score(owner),
                self.cache.candidate_ver(owner) == Some(target),
            );
            // strict comparison keeps the first listed on ties
            if best.is_none_or(|(_, k)| key > k) {
                best = Some((target, key));
            }
        }
        best
    }

    /// Settle `pkg` on `ver`; later passes will not switch it again
    fn select(&mut self, pkg: PkgId, ver: VerId) {
        if self.cache.candidate_ver(pkg) != Some(ver) {
            self.cache.set_candidate_version(pkg, ver);
        }
        self.flags[pkg.index()] |= SELECTED;
    }

    /// Install `pkg` and, recursively, whatever its hard requirements need
    fn install_with_deps(&mut self, pkg: PkgId, depth: u32) -> bool {
        let c = self.cache.cache();
        if depth > self.max_depth || self.is_rejected(pkg) {
            return false;
        }
        self.cache.mark_install(pkg, false, false);
        let Some(ver) = self.cache.install_ver(pkg) else {
            return false;
        };
        for group in c.or_groups(ver) {
            let dep_type = c.dep(group[0]).dep_type();
            if !dep_type.is_critical() || dep_type.is_negative() || self.cache.group_satisfied(&group)
            {
                continue;
            }
            let Some(target) = self.choose_alternative(pkg, &group) else {
                return false;
            };
            let owner = c.ver(target).parent_pkg();
            self.select(owner, target);
            if !self.install_with_deps(owner, depth + 1) {
                return false;
            }
        }
        true
    }

    /// Give up on `pkg`: keep an upgrade back, otherwise remove it
    fn sacrifice(&mut self, pkg: PkgId) {
        let c = self.cache.cache();
        let st = *self.cache.state(pkg);
        let current = c.current_ver(pkg);
        if st.is_install() && current.is_some() && st.install_ver() != current {
            debug!("Keeping back {}", c.full_name(pkg));
            self.cache.mark_keep(pkg);
        } else {
            debug!("Removing {}", c.full_name(pkg));
            self.cache.mark_delete(pkg, false);
        }
        self.flags[pkg.index()] |= REJECTED;
    }

    /// Raise an error for every package still broken
    fn report(&self, broken_fix: bool, diag: &mut Diagnostics) -> Result<()> {
        let c = self.cache.cache();
        let mut culprit: Option<(bool, String, String)> = None;
        for pkg in c.all_packages() {
            if !self.cache.is_inst_broken(pkg) || self.skips(pkg, broken_fix) {
                continue;
            }
            let clause = self
                .cache
                .first_broken_group(pkg)
                .map(|g| c.describe_group(&g))
                .unwrap_or_default();
            let name = c.full_name(pkg);
            diag.error(format!("{} : {} but it is not going to be installed", name, clause));
            let protected = self.is_protected(pkg);
            if culprit.as_ref().is_none_or(|(p, _, _)| protected && !p) {
                culprit = Some((protected, name, clause));
            }
        }
        match culprit {
            Some((_, package, clause)) => Err(Error::UnresolvableConstraint { package, clause }),
            None => Ok(()),
        }
    }

    /// Repair by keeping packages back instead of installing or removing
    pub fn resolve_by_keep(&mut self, diag: &mut Diagnostics) -> Result<()> {
        let c = self.cache.cache();
        self.make_scores();
        let order = self.visit_order();

        for pass in 1..=self.max_passes {
            self.check_cancelled()?;
            let mut changed = false;
            for &pkg in &order {
                if !self.cache.is_inst_broken(pkg) || self.skips(pkg, false) {
                    continue;
                }
                if !self.is_protected(pkg) && self.cache.state(pkg).is_install() {
                    debug!("Keeping back broken {}", c.full_name(pkg));
                    self.cache.mark_keep(pkg);
                    changed = true;
                }
                if !self.cache.is_inst_broken(pkg) {
                    continue;
                }
                // keep back whatever is being installed and trips it
                let Some(ver) = self.cache.install_ver(pkg) else {
                    continue;
                };
                for group in c.or_groups(ver) {
                    if !c.dep(group[0]).dep_type().is_critical() || self.cache.group_satisfied(&group) {
                        continue;
                    }
                    for &dep in &group {
                        let mut involved: Vec<PkgId> = c
                            .all_targets(dep)
                            .into_iter()
                            .map(|v| c.ver(v).parent_pkg())
                            .collect();
                        involved.push(c.dep(dep).target_pkg());
                        involved.sort_unstable();
                        involved.dedup();
                        for other in involved {
                            if other != pkg
                                && !self.is_protected(other)
                                && self.cache.state(other).is_install()
                            {
                                debug!(
                                    "Keeping back {} for {}",
                                    c.full_name(other),
                                    c.full_name(pkg)
                                );
                                self.cache.mark_keep(other);
                                changed = true;
                            }
                        }
                    }
                }
            }
            debug!("Keep pass {}: {} broken", pass, self.cache.broken_count());
            if !changed {
                break;
            }
        }

        self.report(false, diag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::builder::build_cache;
    use crate::cache::{DepAtom, IndexSource, PackageCache, PackageFileInfo, PackageStanza};
    use crate::depcache::Mode;
    use crate::policy::DefaultPolicy;
    use crate::version::{CompareOp, DebVersioning};

    fn cache(repo: Vec<PackageStanza>, installed: Vec<PackageStanza>) -> PackageCache {
        let mut diag = Diagnostics::new();
        let mut sources = vec![IndexSource::new(PackageFileInfo::index("main", "stable"), repo)];
        if !installed.is_empty() {
            sources.push(IndexSource::new(PackageFileInfo::status_file(), installed));
        }
        build_cache("amd64", Arc::new(DebVersioning::new()), &sources, &mut diag).unwrap()
    }

    fn find(cache: &PackageCache, name: &str) -> PkgId {
        cache.find_package(name, "amd64").unwrap()
    }

    #[test]
    fn test_alternative_choice_respects_reject() {
        let c = cache(
            vec![
                PackageStanza::new("app", "1.0").relation(
                    crate::cache::DepType::Depends,
                    vec![DepAtom::new("first"), DepAtom::new("second")],
                ),
                PackageStanza::new("first", "1.0"),
                PackageStanza::new("second", "1.0"),
            ],
            vec![],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        dc.mark_install(find(&c, "app"), false, true);

        let mut diag = Diagnostics::new();
        let mut resolver = ProblemResolver::new(&mut dc);
        resolver.reject(find(&c, "first"));
        resolver.resolve(true, &mut diag).unwrap();
        assert_eq!(dc.mode(find(&c, "first")), Mode::Keep);
        assert_eq!(dc.mode(find(&c, "second")), Mode::Install);
    }

    #[test]
    fn test_tie_prefers_first_listed() {
        let c = cache(
            vec![
                PackageStanza::new("app", "1.0").relation(
                    crate::cache::DepType::Depends,
                    vec![DepAtom::new("first"), DepAtom::new("second")],
                ),
                PackageStanza::new("first", "1.0"),
                PackageStanza::new("second", "1.0"),
            ],
            vec![],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        dc.mark_install(find(&c, "app"), false, true);
        let mut diag = Diagnostics::new();
        ProblemResolver::new(&mut dc).resolve(true, &mut diag).unwrap();
        assert_eq!(dc.mode(find(&c, "first")), Mode::Install);
        assert_eq!(dc.mode(find(&c, "second")), Mode::Keep);
    }

    fn either_or(first: DepAtom, extra: Vec<PackageStanza>) -> PackageCache {
        let mut repo = vec![
            PackageStanza::new("app", "1.0").relation(
                crate::cache::DepType::Depends,
                vec![first, DepAtom::new("second")],
            ),
        ];
        repo.extend(extra);
        cache(repo, vec![])
    }

    #[test]
    fn test_tie_ignores_candidate_of_other_alternative() {
        // only first 1.0 fits, and it is not first's candidate
        let c = either_or(
            DepAtom::versioned("first", CompareOp::Less, "2.0"),
            vec![
                PackageStanza::new("first", "2.0"),
                PackageStanza::new("first", "1.0"),
                PackageStanza::new("second", "1.0"),
            ],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let first = find(&c, "first");
        dc.mark_install(find(&c, "app"), false, true);
        let mut diag = Diagnostics::new();
        ProblemResolver::new(&mut dc).resolve(true, &mut diag).unwrap();
        assert_eq!(dc.mode(first), Mode::Install);
        assert_eq!(dc.install_ver(first).map(|v| c.ver_str(v)), Some("1.0"));
        assert_eq!(dc.mode(find(&c, "second")), Mode::Keep);
        assert_eq!(dc.broken_count(), 0);
    }

    #[test]
    fn test_alternative_already_installing_wins() {
        let c = either_or(
            DepAtom::new("first"),
            vec![
                PackageStanza::new("first", "1.0"),
                PackageStanza::new("second", "1.0"),
            ],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let (app, second) = (find(&c, "app"), find(&c, "second"));
        dc.mark_install(second, false, true);
        let app_ver = dc.candidate_ver(app).unwrap();
        let second_ver = dc.candidate_ver(second);

        let mut resolver = ProblemResolver::new(&mut dc);
        resolver.make_scores();
        let group = c.or_groups(app_ver).remove(0);
        assert_eq!(resolver.choose_alternative(app, &group), second_ver);
    }

    #[test]
    fn test_higher_scored_alternative_wins() {
        let c = either_or(
            DepAtom::new("first"),
            vec![
                PackageStanza::new("first", "1.0"),
                PackageStanza::new("second", "1.0").essential(),
            ],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        dc.mark_install(find(&c, "app"), false, true);
        let mut diag = Diagnostics::new();
        ProblemResolver::new(&mut dc).resolve(true, &mut diag).unwrap();
        assert_eq!(dc.mode(find(&c, "first")), Mode::Keep);
        assert_eq!(dc.mode(find(&c, "second")), Mode::Install);
    }

    #[test]
    fn test_unfixable_package_is_removed_when_unprotected() {
        let c = cache(
            vec![PackageStanza::new("app", "1.0")
                .depends(DepAtom::versioned("lib", CompareOp::GreaterEq, "9"))],
            vec![],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let app = find(&c, "app");
        dc.mark_install(app, true, true);

        let mut diag = Diagnostics::new();
        ProblemResolver::new(&mut dc).resolve(true, &mut diag).unwrap();
        assert!(dc.install_ver(app).is_none());
        assert_eq!(dc.broken_count(), 0);
        assert!(!diag.pending_error());
    }

    #[test]
    fn test_scores_order() {
        let c = cache(
            vec![
                PackageStanza::new("base", "1.0").essential(),
                PackageStanza::new("plain", "1.0"),
                PackageStanza::new("user", "1.0").depends(DepAtom::new("plain")),
            ],
            vec![PackageStanza::new("old", "1.0").installed()],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let mut resolver = ProblemResolver::new(&mut dc);
        resolver.make_scores();
        let score = |n| resolver.score(find(&c, n));
        assert!(score("base") > score("old"));
        assert!(score("old") > score("plain"));
        assert!(score("plain") > score("user"));
    }

    #[test]
    fn test_cancel_flag_stops_before_first_pass() {
        let c = cache(vec![PackageStanza::new("a", "1.0")], vec![]);
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let flag = Arc::new(AtomicBool::new(true));
        let mut diag = Diagnostics::new();
        let result = ProblemResolver::new(&mut dc)
            .with_cancel_flag(flag)
            .resolve(true, &mut diag);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_protected_removal_survives_install_protect() {
        let c = cache(
            vec![PackageStanza::new("tool", "1.0").depends(DepAtom::new("lib"))],
            vec![PackageStanza::new("lib", "1.0").installed()],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let (tool, lib) = (find(&c, "tool"), find(&c, "lib"));
        dc.mark_install(tool, false, true);

        let mut diag = Diagnostics::new();
        let mut resolver = ProblemResolver::new(&mut dc);
        resolver.remove(lib, false);
        resolver.install_protect();
        assert!(resolver.is_protected(tool));
        let err = resolver.resolve(true, &mut diag).unwrap_err();
        assert!(matches!(err, Error::UnresolvableConstraint { ref package, .. } if package == "tool:amd64"));
        assert_eq!(dc.mode(lib), Mode::Delete);
        assert_eq!(dc.mode(tool), Mode::Install);
    }

    #[test]
    fn test_resolve_by_keep_holds_back_breaking_upgrade() {
        let c = cache(
            vec![
                PackageStanza::new("lib", "2.0"),
                PackageStanza::new("app", "1.0")
                    .depends(DepAtom::versioned("lib", CompareOp::Less, "2.0")),
            ],
            vec![
                PackageStanza::new("lib", "1.0").installed(),
                PackageStanza::new("app", "1.0")
                    .depends(DepAtom::versioned("lib", CompareOp::Less, "2.0"))
                    .installed(),
            ],
        );
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&c, &policy);
        let (app, lib) = (find(&c, "app"), find(&c, "lib"));
        dc.mark_install(lib, false, true);
        assert!(dc.is_inst_broken(app));

        let mut diag = Diagnostics::new();
        ProblemResolver::new(&mut dc).resolve_by_keep(&mut diag).unwrap();
        assert_eq!(dc.mode(lib), Mode::Keep);
        assert_eq!(dc.broken_count(), 0);
        assert_eq!(dc.keep_count(), 1);
    }
}
