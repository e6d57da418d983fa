//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`Error`] groups failures by the component that
//! produced them:
//! - [`ResourceError`]: missing files, load bodies that failed, bounded waits that expired
//! - [`ShaderError`]: include cycles, preprocessor parse errors, compile and link failures
//! - [`CacheError`]: unusable program binary cache files
//!
//! Errors are never thrown across component boundaries. A failing resource or
//! shader records `error.to_string()` in its log and flips its validity flag;
//! callers check validity explicitly.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kiln_core::errors::{Error, ResourceError, Result};
//!
//! fn read_config(name: &str) -> Result<()> {
//!     Err(Error::Resource(ResourceError::FileNotFound(name.to_string())))
//! }
//! ```

use thiserror::Error;

/// The main error type for the Kiln engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource lifecycle error.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Shader preprocessing or compilation error.
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Program binary cache error.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

// ============================================================================
// Resource Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The file system could not resolve the logical name.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The load body of an asset class reported a failure.
    #[error("Failed to load '{name}': {reason}")]
    LoadFailed { name: String, reason: String },

    /// An asset class may only be registered once per resource cache.
    #[error("Asset class '{0}' is already registered")]
    ClassRegistered(String),

    /// A synchronous waiter gave up on a load running on another thread.
    #[error("Timed out after {waited_ms} ms waiting for '{name}' to finish loading")]
    WaitTimeout { name: String, waited_ms: u64 },
}

// ============================================================================
// Shader Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// `#include` chain loops back onto a file already being processed.
    #[error("Cyclic include of '{target}' from '{from}'")]
    CyclicInclude { from: String, target: String },

    /// Malformed source text (unterminated comment or directive).
    #[error("{file}({line}): parse error: {message}")]
    Parse {
        file: String,
        line: u32,
        message: String,
    },

    /// An included file failed; the nested log is carried along.
    #[error("In file included from '{from}':\n{nested}")]
    Include { from: String, nested: String },

    /// The driver rejected one of the shader stages.
    #[error("Compile error in '{name}':\n{log}")]
    Compile { name: String, log: String },

    /// The driver failed to link the compiled stages.
    #[error("Link error in '{name}':\n{log}")]
    Link { name: String, log: String },

    /// The shader source itself could not be loaded.
    #[error("Shader source '{name}' is unavailable: {log}")]
    SourceInvalid { name: String, log: String },

    /// The owning shader source has been released.
    #[error("Shader source '{0}' is no longer loaded")]
    SourceReleased(String),

    /// Driver entry points were called away from the graphics thread.
    #[error("Shader '{0}' must be compiled on the graphics thread")]
    WrongThread(String),
}

// ============================================================================
// Cache Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache file is structurally invalid.
    #[error("Shader cache corrupt: {0}")]
    Corrupt(String),

    /// The cache was produced by a different driver.
    #[error("Shader cache built for driver {found:#010x}, running driver is {expected:#010x}")]
    DriverMismatch { expected: u32, found: u32 },
}

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
