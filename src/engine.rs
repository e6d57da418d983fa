//! Engine Context
//!
//! [`EngineContext`] owns every table the resource and shader systems share:
//! the [`ResourceCache`] with its managers and load queue, the
//! [`ShaderLibrary`] with its driver and binary cache, and the background
//! [`LoaderPool`]. It is created once and passed by reference, there are no
//! process-wide singletons.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::{EngineContext, EngineSettings, DiskFileSystem};
//!
//! let fs = Arc::new(DiskFileSystem::new("assets"));
//! let mut engine = EngineContext::new(fs, EngineSettings::default(), Box::new(driver))?;
//!
//! let (_source, shader) = engine.shaders().shader("lit.glsl", ShaderKind::Render, &defines);
//! engine.shaders().compile(&shader);
//!
//! loop {
//!     engine.update();
//!     // ... render frame ...
//! }
//! ```

use std::sync::Arc;

use kiln_core::errors::Result;
use kiln_core::fs::FileSystem;
use kiln_core::settings::EngineSettings;
use kiln_resources::{BlobLoader, LoadEvent, LoaderPool, ResourceCache};
use kiln_shader::{ShaderDriver, ShaderLibrary};

/// What one [`EngineContext::update`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Load completions published since the previous update.
    pub loaded: Vec<LoadEvent>,
    /// Queued resources loaded on the calling thread (no worker pool).
    pub loaded_inline: usize,
    /// Shaders recompiled after invalidation.
    pub recompiled: usize,
}

pub struct EngineContext {
    resources: Arc<ResourceCache>,
    shaders: ShaderLibrary,
    loaders: Option<LoaderPool>,
    frame_count: u64,
}

impl EngineContext {
    /// Builds the resource cache, registers the bundled asset classes, loads
    /// the shader binary cache and starts `settings.worker_threads` loaders.
    ///
    /// Must be called on the graphics thread.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        settings: EngineSettings,
        driver: Box<dyn ShaderDriver>,
    ) -> Result<Self> {
        let workers = settings.worker_threads;
        let resources = ResourceCache::new(fs, settings);
        resources.register(BlobLoader);
        let shaders = ShaderLibrary::new(&resources, driver)?;

        let loaders = if workers > 0 {
            Some(LoaderPool::spawn(&resources, workers)?)
        } else {
            None
        };

        log::info!(
            "Engine context ready ({workers} loader threads, {} cached shader binaries)",
            shaders.binary_cache().len()
        );
        Ok(Self {
            resources,
            shaders,
            loaders,
            frame_count: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    #[inline]
    #[must_use]
    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        self.resources.settings()
    }

    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Per-frame housekeeping on the graphics thread: drains load events,
    /// loads queued resources when there is no worker pool and recompiles
    /// invalidated shaders.
    pub fn update(&mut self) -> FrameReport {
        self.frame_count += 1;
        let loaded_inline = if self.loaders.is_none() {
            self.resources.process_queue_once()
        } else {
            0
        };
        FrameReport {
            loaded: self.resources.drain_events(),
            loaded_inline,
            recompiled: self.shaders.recompile_invalidated(),
        }
    }

    /// Reloads every resource whose file changed, then recompiles the
    /// shaders that depended on them. Returns the number of reloaded
    /// resources.
    pub fn hot_reload(&mut self) -> usize {
        let reloaded = self.resources.reload_resources(true);
        if reloaded > 0 {
            self.shaders.recompile_invalidated();
        }
        reloaded
    }

    /// Evicts unreferenced resources and deletes programs of dropped shaders.
    pub fn collect_garbage(&mut self) -> usize {
        let evicted = self.resources.remove_unused_resources();
        self.shaders.release_retired_programs();
        evicted
    }

    /// Stops the loader threads and persists the shader binary cache.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(mut pool) = self.loaders.take() {
            pool.shutdown();
        }
        self.shaders.release_retired_programs();
        self.shaders.save_binary_cache()?;
        Ok(())
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("Engine shutdown: {err}");
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("resources", &self.resources)
            .field("shaders", &self.shaders)
            .field("loaders", &self.loaders)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}
