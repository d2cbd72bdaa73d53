// src/config.rs

//! Engine configuration loaded from TOML
//!
//! ```toml
//! architectures = ["amd64", "i386", "all"]
//! holds = ["linux-image-amd64"]
//!
//! [[pins]]
//! package = "firefox*"
//! archive = "unstable"
//! priority = 990
//!
//! [resolver]
//! max_passes = 10
//!
//! [cache]
//! image_path = "/var/cache/pkgcore/pkgcache.bin"
//! ```

use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest absolute pin priority accepted
pub const MAX_PIN_PRIORITY: i32 = 10_000;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Architecture preference order; the first entry is native
    pub architectures: Vec<String>,

    /// Packages whose candidate stays at the installed version
    pub holds: Vec<String>,

    /// Candidate-selection pins, first match wins
    pub pins: Vec<PinRule>,

    pub resolver: ResolverConfig,

    pub cache: CacheConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            architectures: vec!["amd64".to_string(), "all".to_string()],
            holds: Vec::new(),
            pins: Vec::new(),
            resolver: ResolverConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// One pin: versions matching every given field get `priority`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRule {
    /// Package name glob (`*`, `?` and `[..]` classes)
    #[serde(default)]
    pub package: Option<String>,

    /// Version string glob
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub archive: Option<String>,

    #[serde(default)]
    pub origin: Option<String>,

    pub priority: i32,
}

/// A [`PinRule`] with its name and version globs compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMatcher {
    pub rule: PinRule,
    package: Option<Pattern>,
    version: Option<Pattern>,
}

fn compile_glob(field: &str, pattern: Option<&str>) -> Result<Option<Pattern>> {
    pattern
        .map(|pat| {
            Pattern::new(pat).map_err(|e| {
                Error::ConfigError(format!("invalid {} pattern '{}': {}", field, pat, e))
            })
        })
        .transpose()
}

impl PinMatcher {
    pub fn new(rule: PinRule) -> Result<Self> {
        let package = compile_glob("package", rule.package.as_deref())?;
        let version = compile_glob("version", rule.version.as_deref())?;
        Ok(Self {
            rule,
            package,
            version,
        })
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.package.as_ref().is_none_or(|p| p.matches(name))
    }

    pub fn matches_version(&self, version: &str) -> bool {
        self.version.as_ref().is_none_or(|p| p.matches(version))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Cap on scan-and-repair passes
    pub max_passes: u32,

    /// Recursion cap for automatic dependency installation
    pub max_auto_install_depth: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_passes: 10,
            max_auto_install_depth: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub image_path: Option<PathBuf>,
    pub lock_path: Option<PathBuf>,
}

impl CoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let Some(native) = self.architectures.first() else {
            return Err(Error::ConfigError(
                "architectures must list at least one entry".to_string(),
            ));
        };
        if native == "all" || native.is_empty() {
            return Err(Error::ConfigError(format!(
                "'{}' cannot be the native architecture",
                native
            )));
        }
        for pin in &self.pins {
            PinMatcher::new(pin.clone())?;
            if pin.priority.abs() > MAX_PIN_PRIORITY {
                return Err(Error::ConfigError(format!(
                    "pin priority {} is outside -{}..={}",
                    pin.priority, MAX_PIN_PRIORITY, MAX_PIN_PRIORITY
                )));
            }
        }
        if self.resolver.max_passes == 0 {
            return Err(Error::ConfigError("resolver.max_passes must be positive".to_string()));
        }
        Ok(())
    }

    /// Compile every pin, in configuration order
    pub fn pin_matchers(&self) -> Result<Vec<PinMatcher>> {
        self.pins.iter().cloned().map(PinMatcher::new).collect()
    }

    pub fn native_arch(&self) -> &str {
        self.architectures.first().map(String::as_str).unwrap_or("amd64")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))
    }
}
