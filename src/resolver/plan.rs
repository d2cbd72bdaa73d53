// src/resolver/plan.rs

//! Ordered action list handed to the package manager
//!
//! Removals come first, each dependent before what it depends on. Installs
//! follow with dependencies before dependents. Upgradable packages being
//! kept back close the list.

use super::graph::OrderGraph;
use crate::cache::{PackageCache, PkgId, VerId};
use crate::depcache::{flags, DepCache, Mode};
use std::fmt;
use strum_macros::Display;

/// What the package manager should do with one package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    Install,
    Remove,
    Purge,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub package: PkgId,
    /// `name:arch`
    pub name: String,
    /// Target version; `None` for removals
    pub version: Option<String>,
    /// Installed version before the action
    pub current: Option<String>,
    pub kind: ActionKind,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)?;
        match (&self.current, &self.version) {
            (Some(cur), Some(ver)) if cur != ver => write!(f, " [{} -> {}]", cur, ver),
            (_, Some(ver)) => write!(f, " [{}]", ver),
            (Some(cur), None) => write!(f, " [{}]", cur),
            (None, None) => Ok(()),
        }
    }
}

/// Result of a resolution, ready for execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub actions: Vec<PlannedAction>,
    /// Bytes to download
    pub download_size: u64,
    /// Change in installed bytes
    pub disk_usage: i64,
}

impl ResolutionPlan {
    /// Collect and order the actions the overlay currently describes
    pub fn from_depcache(depcache: &DepCache<'_>) -> Self {
        let cache = depcache.cache();
        let mut removals = OrderGraph::new();
        let mut installs = OrderGraph::new();
        let mut kept = Vec::new();

        for pkg in cache.all_packages() {
            let st = depcache.state(pkg);
            match st.mode() {
                Mode::Delete => removals.add_node(pkg),
                Mode::Install => installs.add_node(pkg),
                Mode::Keep if st.has_flag(flags::REINSTALL) => installs.add_node(pkg),
                Mode::Keep => {
                    if cache.current_ver(pkg).is_some() && st.is_upgradable() {
                        kept.push(pkg);
                    }
                }
            }
        }

        // a removal must wait for the removal of whatever still needs it
        let members: Vec<PkgId> = removals.nodes().collect();
        for pkg in members {
            if let Some(ver) = cache.current_ver(pkg) {
                for needed in needed_packages(cache, ver, |p| cache.current_ver(p)) {
                    removals.add_edge(needed, pkg);
                }
            }
        }
        let members: Vec<PkgId> = installs.nodes().collect();
        for pkg in members {
            if let Some(ver) = depcache.install_ver(pkg) {
                for needed in needed_packages(cache, ver, |p| depcache.install_ver(p)) {
                    installs.add_edge(pkg, needed);
                }
            }
        }

        let mut actions = Vec::new();
        for pkg in removals.topological_sort() {
            let purge = depcache.state(pkg).has_flag(flags::PURGE);
            actions.push(action(
                cache,
                depcache,
                pkg,
                if purge { ActionKind::Purge } else { ActionKind::Remove },
            ));
        }
        for pkg in installs.topological_sort() {
            actions.push(action(cache, depcache, pkg, ActionKind::Install));
        }
        kept.sort_unstable();
        for pkg in kept {
            actions.push(action(cache, depcache, pkg, ActionKind::Keep));
        }

        Self {
            actions,
            download_size: depcache.deb_size(),
            disk_usage: depcache.usr_size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(|a| a.kind == ActionKind::Keep)
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Installs that replace an installed version
    pub fn upgrade_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Install && a.current.is_some())
            .count()
    }

    pub fn summary(&self) -> String {
        let upgraded = self.upgrade_count();
        format!(
            "{} upgraded, {} newly installed, {} to remove and {} not upgraded",
            upgraded,
            self.count(ActionKind::Install) - upgraded,
            self.count(ActionKind::Remove) + self.count(ActionKind::Purge),
            self.count(ActionKind::Keep)
        )
    }
}

/// Packages whose `version_of` version satisfies a hard dependency of `ver`
fn needed_packages<F>(cache: &PackageCache, ver: VerId, version_of: F) -> Vec<PkgId>
where
    F: Fn(PkgId) -> Option<VerId>,
{
    let mut needed = Vec::new();
    for dep in cache.depends(ver) {
        let dep_type = cache.dep(dep).dep_type();
        if !dep_type.is_critical() || dep_type.is_negative() {
            continue;
        }
        for target in cache.all_targets(dep) {
            let owner = cache.ver(target).parent_pkg();
            if version_of(owner) == Some(target) {
                needed.push(owner);
            }
        }
    }
    needed.sort_unstable();
    needed.dedup();
    needed
}

fn action(cache: &PackageCache, depcache: &DepCache<'_>, pkg: PkgId, kind: ActionKind) -> PlannedAction {
    let target = match kind {
        ActionKind::Install => depcache.install_ver(pkg),
        ActionKind::Keep => depcache.candidate_ver(pkg),
        ActionKind::Remove | ActionKind::Purge => None,
    };
    PlannedAction {
        package: pkg,
        name: cache.full_name(pkg),
        version: target.map(|v| cache.ver_str(v).to_string()),
        current: cache.current_ver(pkg).map(|v| cache.ver_str(v).to_string()),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::builder::build_cache;
    use crate::cache::{DepAtom, IndexSource, PackageFileInfo, PackageStanza};
    use crate::diagnostics::Diagnostics;
    use crate::policy::DefaultPolicy;
    use crate::version::DebVersioning;
    use std::sync::Arc;

    fn names(plan: &ResolutionPlan, kind: ActionKind) -> Vec<&str> {
        plan.actions
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.name.as_str())
            .collect()
    }

    #[test]
    fn test_plan_orders_removals_then_installs() {
        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            Arc::new(DebVersioning::new()),
            &[
                IndexSource::new(
                    PackageFileInfo::index("main", "stable"),
                    vec![
                        PackageStanza::new("app", "1.0").depends(DepAtom::new("libz")),
                        PackageStanza::new("libz", "1.3"),
                    ],
                ),
                IndexSource::new(
                    PackageFileInfo::status_file(),
                    vec![
                        PackageStanza::new("libold", "1.0").installed(),
                        PackageStanza::new("oldtool", "1.0")
                            .depends(DepAtom::new("libold"))
                            .installed(),
                    ],
                ),
            ],
            &mut diag,
        )
        .unwrap();
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&cache, &policy);
        let find = |n: &str| cache.find_package(n, "amd64").unwrap();

        dc.mark_install(find("app"), true, true);
        dc.mark_delete(find("libold"), false);
        dc.mark_delete(find("oldtool"), true);

        let plan = ResolutionPlan::from_depcache(&dc);
        let kinds: Vec<ActionKind> = plan.actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Purge, ActionKind::Remove, ActionKind::Install, ActionKind::Install]
        );
        assert_eq!(names(&plan, ActionKind::Purge), vec!["oldtool:amd64"]);
        assert_eq!(names(&plan, ActionKind::Install), vec!["libz:amd64", "app:amd64"]);
        assert_eq!(plan.summary(), "0 upgraded, 2 newly installed, 2 to remove and 0 not upgraded");
    }

    #[test]
    fn test_action_display() {
        let action = PlannedAction {
            package: PkgId(1),
            name: "curl:amd64".to_string(),
            version: Some("8.5".to_string()),
            current: Some("8.0".to_string()),
            kind: ActionKind::Install,
        };
        assert_eq!(action.to_string(), "install curl:amd64 [8.0 -> 8.5]");
        assert_eq!(ActionKind::Purge.to_string(), "purge");
    }
}
