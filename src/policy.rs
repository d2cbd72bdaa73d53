// src/policy.rs

//! Candidate version selection
//!
//! A [`Policy`] decides which version of a package would be installed if the
//! package were installed now. The dependency cache asks it once per package
//! when it is created; the resolver never consults it directly.
//!
//! [`DefaultPolicy`] follows pin priorities: every version starts from the
//! highest priority of the index files listing it (status 100, normal 500,
//! NotAutomatic 1), a matching configured pin replaces that, and the highest
//! priority wins. Equal priorities go to the architecture listed earlier in
//! the preference list, then to the newer version. Held packages keep their
//! installed version, versions of architectures outside the preference list
//! are ignored, and installed packages are only downgraded by a pin of at
//! least [`DOWNGRADE_PRIORITY`].

use crate::cache::{PackageCache, PkgId, SelectedState, VerId};
use crate::config::{CoreConfig, PinMatcher, PinRule};
use crate::error::Result;
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Pin priority from which a version may replace a newer installed one
pub const DOWNGRADE_PRIORITY: i32 = 1000;

/// Candidate-selection capability
pub trait Policy: Send + Sync {
    /// Version to install for `pkg`, if any is installable
    fn candidate(&self, cache: &PackageCache, pkg: PkgId) -> Option<VerId>;

    /// Effective pin priority of a version
    fn priority(&self, cache: &PackageCache, ver: VerId) -> i32;
}

/// Pin, hold and architecture aware policy
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    architectures: Vec<String>,
    pins: Vec<PinMatcher>,
    holds: HashSet<String>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            architectures: CoreConfig::default().architectures,
            pins: Vec::new(),
            holds: HashSet::new(),
        }
    }
}

impl DefaultPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration; a pin glob that does not compile is a
    /// [`crate::Error::ConfigError`]
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let pins = config.pin_matchers()?;
        debug!("Policy with {} pins and {} holds", pins.len(), config.holds.len());
        Ok(Self {
            architectures: config.architectures.clone(),
            pins,
            holds: config.holds.iter().cloned().collect(),
        })
    }

    pub fn with_pin(mut self, pin: PinRule) -> Result<Self> {
        self.pins.push(PinMatcher::new(pin)?);
        Ok(self)
    }

    pub fn with_hold(mut self, name: impl Into<String>) -> Self {
        self.holds.insert(name.into());
        self
    }

    /// Held by configuration or by the status file
    pub fn is_held(&self, cache: &PackageCache, pkg: PkgId) -> bool {
        cache.pkg(pkg).selected_state() == SelectedState::Hold
            || self.holds.contains(cache.pkg_name(pkg))
    }

    /// Position of the version's architecture in the preference list
    fn arch_rank(&self, cache: &PackageCache, ver: VerId) -> Option<usize> {
        let arch = cache.ver_arch(ver);
        self.architectures.iter().position(|a| a == arch)
    }

    fn pin_matches(&self, pin: &PinMatcher, cache: &PackageCache, ver: VerId) -> bool {
        let pkg = cache.ver(ver).parent_pkg();
        if !pin.matches_name(cache.pkg_name(pkg)) || !pin.matches_version(cache.ver_str(ver)) {
            return false;
        }
        let pin = &pin.rule;
        if pin.archive.is_none() && pin.origin.is_none() {
            return true;
        }
        cache.ver_files(ver).any(|vf| {
            let file = cache.ver_file(vf).file();
            pin.archive
                .as_deref()
                .is_none_or(|a| a == cache.file_archive(file))
                && pin
                    .origin
                    .as_deref()
                    .is_none_or(|o| o == cache.file_origin(file))
        })
    }
}

impl Policy for DefaultPolicy {
    fn priority(&self, cache: &PackageCache, ver: VerId) -> i32 {
        self.pins
            .iter()
            .find(|pin| self.pin_matches(pin, cache, ver))
            .map(|pin| pin.rule.priority)
            .unwrap_or_else(|| cache.priority(ver))
    }

    fn candidate(&self, cache: &PackageCache, pkg: PkgId) -> Option<VerId> {
        let current = cache.current_ver(pkg);
        if let Some(current) = current
            && self.is_held(cache, pkg)
        {
            return Some(current);
        }

        let mut best: Option<(VerId, (i32, Reverse<usize>))> = None;
        for ver in cache.versions(pkg) {
            let is_current = Some(ver) == current;
            let rank = self.arch_rank(cache, ver);
            if !is_current && (!cache.is_downloadable(ver) || rank.is_none()) {
                continue;
            }
            let priority = self.priority(cache, ver);
            if priority < 0 {
                continue;
            }
            if let Some(current) = current
                && !is_current
                && priority < DOWNGRADE_PRIORITY
                && cache
                    .vs()
                    .compare(cache.ver_str(ver), cache.ver_str(current))
                    == Ordering::Less
            {
                continue;
            }
            let key = (
                priority,
                Reverse(rank.unwrap_or(self.architectures.len())),
            );
            // versions come newest first, so ties keep the newer one
            if best.is_none_or(|(_, k)| key > k) {
                best = Some((ver, key));
            }
        }

        let chosen = best.map(|(v, _)| v).or(current);
        trace!(
            "Candidate for {}: {:?}",
            cache.full_name(pkg),
            chosen.map(|v| cache.ver_str(v))
        );
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::builder::build_cache;
    use crate::cache::{IndexSource, PackageFileInfo, PackageStanza};
    use crate::diagnostics::Diagnostics;
    use crate::version::DebVersioning;
    use std::sync::Arc;

    fn cache() -> PackageCache {
        let mut backports = PackageFileInfo::index("backports_Packages", "backports");
        backports.not_automatic = true;
        let mut diag = Diagnostics::new();
        build_cache(
            "amd64",
            Arc::new(DebVersioning::new()),
            &[
                IndexSource::new(
                    PackageFileInfo::index("main_Packages", "stable"),
                    vec![
                        PackageStanza::new("editor", "1.0"),
                        PackageStanza::new("editor", "1.2"),
                        PackageStanza::new("kernel", "6.1"),
                        PackageStanza::new("kernel", "6.6"),
                        PackageStanza::new("foreign", "1.0").arch("s390x"),
                    ],
                ),
                IndexSource::new(backports, vec![PackageStanza::new("editor", "2.0")]),
                IndexSource::new(
                    PackageFileInfo::status_file(),
                    vec![
                        PackageStanza::new("kernel", "6.1").installed(),
                        PackageStanza::new("local", "0.1").installed(),
                    ],
                ),
            ],
            &mut diag,
        )
        .unwrap()
    }

    fn cand(policy: &DefaultPolicy, cache: &PackageCache, name: &str) -> Option<String> {
        let pkg = cache.find_package(name, "amd64")?;
        policy
            .candidate(cache, pkg)
            .map(|v| cache.ver_str(v).to_string())
    }

    #[test]
    fn test_not_automatic_loses_to_normal_file() {
        let cache = cache();
        let policy = DefaultPolicy::new();
        assert_eq!(cand(&policy, &cache, "editor").as_deref(), Some("1.2"));
    }

    #[test]
    fn test_pin_raises_backports() {
        let cache = cache();
        let policy = DefaultPolicy::new().with_pin(PinRule {
            package: Some("edit*".to_string()),
            version: None,
            archive: Some("backports".to_string()),
            origin: None,
            priority: 600,
        })
        .unwrap();
        assert_eq!(cand(&policy, &cache, "editor").as_deref(), Some("2.0"));
    }

    #[test]
    fn test_pin_glob_inside_name() {
        let cache = cache();
        let pin = |package: &str| PinRule {
            package: Some(package.to_string()),
            version: None,
            archive: Some("backports".to_string()),
            origin: None,
            priority: 600,
        };
        let policy = DefaultPolicy::new().with_pin(pin("e*tor")).unwrap();
        assert_eq!(cand(&policy, &cache, "editor").as_deref(), Some("2.0"));
        let policy = DefaultPolicy::new().with_pin(pin("edit?r")).unwrap();
        assert_eq!(cand(&policy, &cache, "editor").as_deref(), Some("2.0"));
        assert!(DefaultPolicy::new().with_pin(pin("edit[or")).is_err());
    }

    #[test]
    fn test_from_config_rejects_bad_glob() {
        let mut config = CoreConfig::default();
        config.pins.push(PinRule {
            package: Some("[".to_string()),
            version: None,
            archive: None,
            origin: None,
            priority: 600,
        });
        assert!(matches!(
            DefaultPolicy::from_config(&config),
            Err(crate::Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_native_arch_preferred_on_equal_priority() {
        let mut diag = Diagnostics::new();
        let cache = build_cache(
            "amd64",
            Arc::new(DebVersioning::new()),
            &[IndexSource::new(
                PackageFileInfo::index("main_Packages", "stable"),
                vec![
                    PackageStanza::new("fonts", "2.0").arch("all"),
                    PackageStanza::new("fonts", "1.0"),
                ],
            )],
            &mut diag,
        )
        .unwrap();
        let policy = DefaultPolicy::new();
        assert_eq!(cand(&policy, &cache, "fonts").as_deref(), Some("1.0"));

        let pinned = DefaultPolicy::new()
            .with_pin(PinRule {
                package: Some("fonts".to_string()),
                version: Some("2.*".to_string()),
                archive: None,
                origin: None,
                priority: 600,
            })
            .unwrap();
        assert_eq!(cand(&pinned, &cache, "fonts").as_deref(), Some("2.0"));
    }

    #[test]
    fn test_hold_keeps_current() {
        let cache = cache();
        assert_eq!(cand(&DefaultPolicy::new(), &cache, "kernel").as_deref(), Some("6.6"));
        let held = DefaultPolicy::new().with_hold("kernel");
        assert_eq!(cand(&held, &cache, "kernel").as_deref(), Some("6.1"));
    }

    #[test]
    fn test_no_downgrade_without_high_pin() {
        let cache = cache();
        let pin = |priority| PinRule {
            package: Some("kernel".to_string()),
            version: Some("6.1*".to_string()),
            archive: None,
            origin: None,
            priority,
        };
        // pinning the installed version above the newer one keeps it
        let policy = DefaultPolicy::new().with_pin(pin(900)).unwrap();
        assert_eq!(cand(&policy, &cache, "kernel").as_deref(), Some("6.1"));

        let negative = DefaultPolicy::new().with_pin(PinRule {
            version: Some("6.6".to_string()),
            ..pin(-1)
        })
        .unwrap();
        assert_eq!(cand(&negative, &cache, "kernel").as_deref(), Some("6.1"));
    }

    #[test]
    fn test_local_only_and_foreign() {
        let cache = cache();
        let policy = DefaultPolicy::new();
        assert_eq!(cand(&policy, &cache, "local").as_deref(), Some("0.1"));
        let foreign = cache.find_package("foreign", "s390x").unwrap();
        assert!(policy.candidate(&cache, foreign).is_none());
    }
}
