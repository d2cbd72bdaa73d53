// src/error.rs

//! Error types shared by the cache, dependency state and resolver

use thiserror::Error;

/// Errors produced by pkgcore operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or truncated index input, or the arena could not grow
    #[error("Cache build failed: {0}")]
    BuildError(String),

    /// The cache write lock is held by another process
    #[error("Could not acquire cache lock: {0}")]
    LockError(String),

    /// A broken package survived resolution
    #[error("Unable to satisfy {clause} for {package}")]
    UnresolvableConstraint { package: String, clause: String },

    /// Malformed version string
    #[error("Invalid version: {0}")]
    VersionParseError(String),

    /// Request could not be mapped onto the package graph
    #[error("Resolution error: {0}")]
    ResolutionError(String),

    /// Cache image failed signature, major version, size or checksum checks
    #[error("Invalid cache image: {0}")]
    ImageError(String),

    /// Cache image is structurally valid but must be rebuilt
    #[error("Stale cache image: {0}")]
    StaleImage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    /// The caller raised the abort flag between resolver passes
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::BuildError(format!("malformed index source: {}", err))
    }
}

/// Result type alias for pkgcore operations
pub type Result<T> = std::result::Result<T, Error>;
