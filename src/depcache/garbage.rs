// src/depcache/garbage.rs

//! Mark-and-sweep over automatically installed packages

use super::{flags, DepCache};
use crate::cache::{CacheId, PkgId};
use tracing::debug;

impl DepCache<'_> {
    /// Flag automatically installed packages nothing needs any more
    ///
    /// Roots are manually installed packages and essential ones. From there
    /// critical and recommended dependencies are followed to the versions the
    /// overlay is going to have installed. Every unreached automatic package
    /// with an install version gets [`flags::GARBAGE`]. Returns those packages
    /// in id order.
    pub fn mark_and_sweep(&mut self) -> Vec<PkgId> {
        let c = self.cache;
        let mut reached = vec![false; self.states.len()];
        let mut stack: Vec<PkgId> = Vec::new();

        for pkg in c.all_packages() {
            let st = &self.states[pkg.index()];
            if st.install_ver.is_some() && (!st.is_auto() || c.pkg(pkg).is_essential()) {
                reached[pkg.index()] = true;
                stack.push(pkg);
            }
        }

        while let Some(pkg) = stack.pop() {
            let Some(ver) = self.states[pkg.index()].install_ver else {
                continue;
            };
            for dep in c.depends(ver) {
                let dep_type = c.dep(dep).dep_type();
                if dep_type.is_negative() || !self.is_important(dep_type) {
                    continue;
                }
                for target in c.all_targets(dep) {
                    let owner = c.ver(target).parent_pkg();
                    if !reached[owner.index()] && self.install_ver(owner) == Some(target) {
                        reached[owner.index()] = true;
                        stack.push(owner);
                    }
                }
            }
        }

        let mut garbage = Vec::new();
        for pkg in c.all_packages() {
            let st = &mut self.states[pkg.index()];
            st.flags &= !flags::GARBAGE;
            if st.install_ver.is_some() && st.is_auto() && !reached[pkg.index()] {
                st.flags |= flags::GARBAGE;
                garbage.push(pkg);
            }
        }
        garbage.sort_unstable();
        debug!("Mark and sweep: {} unneeded packages", garbage.len());
        garbage
    }

    /// Packages flagged by the last [`DepCache::mark_and_sweep`]
    pub fn garbage(&self) -> Vec<PkgId> {
        self.cache
            .all_packages()
            .filter(|&pkg| self.states[pkg.index()].is_garbage())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::builder::build_cache;
    use crate::cache::{DepAtom, IndexSource, PackageFileInfo, PackageStanza};
    use crate::depcache::DepCache;
    use crate::diagnostics::Diagnostics;
    use crate::policy::DefaultPolicy;
    use crate::version::DebVersioning;
    use std::sync::Arc;

    #[test]
    fn test_unreachable_auto_package_is_garbage() {
        let mut orphan = PackageStanza::new("liborphan", "1.0").installed();
        orphan.auto_installed = true;
        let mut used = PackageStanza::new("libused", "1.0").installed();
        used.auto_installed = true;

        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            Arc::new(DebVersioning::new()),
            &[IndexSource::new(
                PackageFileInfo::status_file(),
                vec![
                    PackageStanza::new("app", "1.0")
                        .depends(DepAtom::new("libused"))
                        .installed(),
                    used,
                    orphan,
                ],
            )],
            &mut diag,
        )
        .unwrap();
        let policy = DefaultPolicy::new();
        let mut dc = DepCache::new(&cache, &policy);

        let garbage = dc.mark_and_sweep();
        let orphan = cache.find_package("liborphan", "amd64").unwrap();
        assert_eq!(garbage, vec![orphan]);
        assert!(dc.state(orphan).is_garbage());

        // removing the root frees its dependency too
        let app = cache.find_package("app", "amd64").unwrap();
        dc.mark_delete(app, false);
        assert_eq!(dc.mark_and_sweep().len(), 2);
        assert_eq!(dc.garbage().len(), 2);
    }
}
