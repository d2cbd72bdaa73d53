// src/upgrade.rs

//! Whole-system requests built on the dependency cache and the resolver

use crate::cache::{PackageCache, PkgId, SelectedState, VerId};
use crate::config::ResolverConfig;
use crate::depcache::DepCache;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::resolver::ProblemResolver;
use tracing::{debug, info};

/// A package request: `name`, `name:arch` or `name=version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub name: String,
    pub arch: Option<String>,
    pub version: Option<String>,
}

impl PackageRequest {
    pub fn parse(spec: &str) -> Result<Self> {
        let (rest, version) = match spec.split_once('=') {
            Some((rest, version)) => (rest, Some(version.to_string())),
            None => (spec, None),
        };
        let (name, arch) = match rest.split_once(':') {
            Some((name, arch)) => (name, Some(arch.to_string())),
            None => (rest, None),
        };
        if name.is_empty() || version.as_deref() == Some("") || arch.as_deref() == Some("") {
            return Err(Error::ResolutionError(format!("malformed package request '{}'", spec)));
        }
        Ok(Self {
            name: name.to_string(),
            arch,
            version,
        })
    }

    /// Look the package up, native architecture unless one is given
    pub fn find(&self, cache: &PackageCache) -> Result<PkgId> {
        let arch = self.arch.as_deref().unwrap_or(cache.native_arch());
        cache
            .find_package(&self.name, arch)
            .ok_or_else(|| Error::NotFoundError(format!("Unable to locate package {}", self.name)))
    }
}

fn is_held(cache: &PackageCache, pkg: PkgId) -> bool {
    cache.pkg(pkg).selected_state() == SelectedState::Hold
}

/// Upgrade installed packages without installing or removing anything else
///
/// Upgrades that would break something are kept back.
pub fn all_upgrade(depcache: &mut DepCache<'_>, diag: &mut Diagnostics) -> Result<()> {
    let c = depcache.cache();
    for pkg in c.all_packages() {
        if c.current_ver(pkg).is_some() && depcache.state(pkg).is_upgradable() && !is_held(c, pkg) {
            depcache.mark_install(pkg, false, false);
        }
    }
    debug!("Upgrade marked {} packages", depcache.inst_count());
    ProblemResolver::new(depcache).resolve_by_keep(diag)
}

/// Upgrade everything, installing and removing packages as needed
pub fn dist_upgrade(
    depcache: &mut DepCache<'_>,
    config: &ResolverConfig,
    diag: &mut Diagnostics,
) -> Result<()> {
    let c = depcache.cache();
    let upgradable: Vec<PkgId> = c
        .all_packages()
        .filter(|&p| c.current_ver(p).is_some() && !is_held(c, p))
        .collect();

    for &pkg in &upgradable {
        depcache.mark_install(pkg, false, false);
    }
    // essential packages must be present and working
    for pkg in c.all_packages() {
        if c.pkg(pkg).is_essential() && !is_held(c, pkg) {
            depcache.mark_install(pkg, true, false);
        }
    }
    for &pkg in &upgradable {
        depcache.mark_install(pkg, true, false);
    }

    let mut resolver = ProblemResolver::from_config(depcache, config);
    for pkg in c.all_packages() {
        if is_held(c, pkg) {
            resolver.protect(pkg);
        }
    }
    resolver.resolve(true, diag)?;
    info!(
        "Dist-upgrade: {} to install, {} to remove",
        depcache.inst_count(),
        depcache.del_count()
    );
    Ok(())
}

/// Repair packages that are broken now
pub fn fix_broken(
    depcache: &mut DepCache<'_>,
    config: &ResolverConfig,
    diag: &mut Diagnostics,
) -> Result<()> {
    let c = depcache.cache();
    let broken: Vec<PkgId> = c
        .all_packages()
        .filter(|&p| depcache.is_now_broken(p) || depcache.is_inst_broken(p))
        .collect();
    debug!("Fixing {} broken packages", broken.len());
    for pkg in broken {
        depcache.mark_install(pkg, true, false);
    }
    ProblemResolver::from_config(depcache, config).resolve(true, diag)
}

/// Mark a requested package for installation
///
/// A virtual name resolves to its single installed provider, or else to
/// its single provider with an installation candidate. Several possible
/// providers are an error naming them.
pub fn install_by_name(
    depcache: &mut DepCache<'_>,
    request: &PackageRequest,
    diag: &mut Diagnostics,
) -> Result<PkgId> {
    let c = depcache.cache();
    let pkg = request.find(c)?;

    if c.is_virtual(pkg) {
        let chosen = select_provider(depcache, pkg)?;
        diag.notice(format!(
            "Note, selecting '{}' instead of '{}'",
            c.pkg_name(chosen),
            request.name
        ));
        depcache.mark_install(chosen, true, true);
        return Ok(chosen);
    }

    if let Some(version) = &request.version {
        let ver = c.find_version(pkg, version).ok_or_else(|| {
            Error::NotFoundError(format!(
                "Version '{}' for '{}' was not found",
                version, request.name
            ))
        })?;
        depcache.set_candidate_version(pkg, ver);
    }
    if depcache.candidate_ver(pkg).is_none() {
        return Err(Error::ResolutionError(format!(
            "Package '{}' has no installation candidate",
            request.name
        )));
    }
    depcache.mark_install(pkg, true, true);
    Ok(pkg)
}

fn provides_name(c: &PackageCache, ver: VerId, name: PkgId) -> bool {
    c.ver_provides(ver).any(|p| c.prv(p).parent_pkg() == name)
}

fn select_provider(depcache: &DepCache<'_>, virt: PkgId) -> Result<PkgId> {
    let c = depcache.cache();
    let providers = c.providers(virt);

    let installed: Vec<PkgId> = providers
        .iter()
        .copied()
        .filter(|&p| c.current_ver(p).is_some_and(|v| provides_name(c, v, virt)))
        .collect();
    if let [only] = installed.as_slice() {
        return Ok(*only);
    }

    let installable: Vec<PkgId> = providers
        .iter()
        .copied()
        .filter(|&p| {
            depcache
                .candidate_ver(p)
                .is_some_and(|v| provides_name(c, v, virt))
        })
        .collect();
    match installable.as_slice() {
        [only] => Ok(*only),
        [] => Err(Error::NotFoundError(format!(
            "Package '{}' has no installation candidate",
            c.pkg_name(virt)
        ))),
        many => {
            let names: Vec<String> = many.iter().map(|&p| c.full_name(p)).collect();
            Err(Error::ResolutionError(format!(
                "Package '{}' is a virtual package provided by: {}; select one to install",
                c.pkg_name(virt),
                names.join(", ")
            )))
        }
    }
}

/// Mark every unneeded automatically installed package for removal
pub fn auto_remove(depcache: &mut DepCache<'_>) -> Vec<PkgId> {
    let garbage = depcache.mark_and_sweep();
    for &pkg in &garbage {
        depcache.mark_delete(pkg, false);
    }
    garbage
}
