//! Engine Settings
//!
//! Runtime configuration shared by the resource and shader layers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use kiln_core::EngineSettings;
//!
//! // Defaults: blocking loads, two loader threads, binary cache enabled
//! let settings = EngineSettings::default();
//!
//! // Streaming setup: every AddResource call returns immediately
//! let settings = EngineSettings {
//!     deferred_loading: true,
//!     worker_threads: 4,
//!     ..Default::default()
//! };
//! ```
//!
//! Settings can also be read from a JSON document; missing fields fall back
//! to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Error, ResourceError, Result};
use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Number of background loader threads. `0` disables the pool; queued
    /// resources are then only loaded by synchronous waiters or by
    /// `ResourceCache::process_queue_once`.
    pub worker_threads: usize,

    /// When set, `AddResource` queues loads instead of blocking.
    pub deferred_loading: bool,

    /// Sleep between polls while waiting on a load owned by another thread.
    pub poll_interval_ms: u64,

    /// Upper bound for a synchronous wait. `0` waits forever.
    pub load_wait_timeout_ms: u64,

    /// First line of every assembled shader stage.
    pub glsl_version: String,

    /// Whether compiled program binaries are looked up and stored.
    pub binary_cache_enabled: bool,

    /// Location of the persisted program binary cache.
    pub binary_cache_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            deferred_loading: false,
            poll_interval_ms: 1,
            load_wait_timeout_ms: 30_000,
            glsl_version: "#version 330 core".to_string(),
            binary_cache_enabled: true,
            binary_cache_path: PathBuf::from("cache/shaders.bin"),
        }
    }
}

impl EngineSettings {
    /// Parses settings from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads settings from a file resolved through the file system.
    pub fn load(fs: &dyn FileSystem, name: &str) -> Result<Self> {
        let full = fs
            .find(name)
            .ok_or_else(|| Error::Resource(ResourceError::FileNotFound(name.to_string())))?;
        let text = fs.read_text(&full)?;
        let settings = Self::from_json(&text)?;
        log::info!("Loaded engine settings from {}", full.display());
        Ok(settings)
    }

    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// `None` means waits are unbounded.
    #[inline]
    #[must_use]
    pub fn load_wait_timeout(&self) -> Option<Duration> {
        (self.load_wait_timeout_ms > 0).then(|| Duration::from_millis(self.load_wait_timeout_ms))
    }

    #[inline]
    #[must_use]
    pub fn binary_cache_path(&self) -> &Path {
        &self.binary_cache_path
    }
}
