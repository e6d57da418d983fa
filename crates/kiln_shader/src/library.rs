//! Graphics-thread side of the shader system.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread::ThreadId;
use xxhash_rust::xxh32::xxh32;

use kiln_core::errors::{Result, ShaderError};
use kiln_resources::{Resource, ResourceCache, ResourceFlags, ResourceManager};

use crate::binary_cache::ShaderBinaryCache;
use crate::context::ShaderContext;
use crate::defines::ShaderDefines;
use crate::driver::{ShaderDriver, ShaderStage};
use crate::shader::{Shader, ShaderKind};
use crate::source::{ShaderSource, ShaderSourceLoader};

/// Owns the driver and the program binary cache, and is the only place
/// shaders get compiled.
///
/// The thread that creates the library is recorded as the graphics thread.
/// Compilation requested from any other thread fails with
/// [`ShaderError::WrongThread`].
pub struct ShaderLibrary {
    ctx: Arc<ShaderContext>,
    resources: Arc<ResourceCache>,
    sources: Arc<ResourceManager<ShaderSource>>,
    driver: Mutex<Box<dyn ShaderDriver>>,
    binary_cache: ShaderBinaryCache,
    graphics_thread: ThreadId,
}

impl ShaderLibrary {
    /// Registers the `ShaderSource` asset class on `resources` and loads the
    /// binary cache configured in its settings.
    ///
    /// Fails if shader sources are already registered on `resources`.
    pub fn new(resources: &Arc<ResourceCache>, driver: Box<dyn ShaderDriver>) -> Result<Self> {
        let ctx = ShaderContext::new();
        let sources = resources.try_register(ShaderSourceLoader::new(Arc::clone(&ctx)))?;

        let settings = resources.settings();
        let binary_cache = if settings.binary_cache_enabled {
            ShaderBinaryCache::load(
                resources.fs(),
                settings.binary_cache_path(),
                driver.driver_id(),
            )
        } else {
            ShaderBinaryCache::new(driver.driver_id())
        };

        Ok(Self {
            ctx,
            resources: Arc::clone(resources),
            sources,
            driver: Mutex::new(driver),
            binary_cache,
            graphics_thread: std::thread::current().id(),
        })
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<ShaderContext> {
        &self.ctx
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }

    #[inline]
    #[must_use]
    pub fn sources(&self) -> &Arc<ResourceManager<ShaderSource>> {
        &self.sources
    }

    #[inline]
    #[must_use]
    pub fn binary_cache(&self) -> &ShaderBinaryCache {
        &self.binary_cache
    }

    #[must_use]
    pub fn binary_cache_enabled(&self) -> bool {
        self.resources.settings().binary_cache_enabled
    }

    /// Loads (or reuses) the shader source `name`.
    pub fn load_source(&self, name: &str) -> Arc<Resource<ShaderSource>> {
        self.sources
            .add_resource(&self.resources, name, ResourceFlags::empty())
    }

    /// Loads `name` and returns its variant for `kind` and `defines`.
    ///
    /// The source handle is returned too: variants are owned by their source
    /// and are released with it.
    pub fn shader(
        &self,
        name: &str,
        kind: ShaderKind,
        defines: &ShaderDefines,
    ) -> (Arc<Resource<ShaderSource>>, Arc<Shader>) {
        let source = self.load_source(name);
        let shader = source.create_instance(&self.resources, kind, defines);
        (source, shader)
    }

    /// Compiles `shader` if needed. See [`Shader::compile`].
    pub fn compile(&self, shader: &Shader) -> bool {
        shader.compile(self)
    }

    pub(crate) fn check_thread(&self, name: &str) -> std::result::Result<(), ShaderError> {
        if std::thread::current().id() == self.graphics_thread {
            Ok(())
        } else {
            Err(ShaderError::WrongThread(name.to_string()))
        }
    }

    pub(crate) fn with_driver<R>(&self, f: impl FnOnce(&mut dyn ShaderDriver) -> R) -> R {
        let mut driver = self.driver.lock();
        f(&mut **driver)
    }

    /// Binary-cache validity key of a program built from text with checksum
    /// `processed`. The GLSL version header is folded in; stage and define
    /// lines are already covered by the shader uid.
    #[must_use]
    pub fn binary_checksum(&self, processed: u32) -> u32 {
        xxh32(self.resources.settings().glsl_version.as_bytes(), processed)
    }

    /// Full text handed to the driver for one stage.
    #[must_use]
    pub fn assemble(&self, stage: ShaderStage, defines: &ShaderDefines, processed: &str) -> String {
        let version = &self.resources.settings().glsl_version;
        let mut text =
            String::with_capacity(version.len() + defines.text().len() + processed.len() + 32);
        text.push_str(version);
        text.push('\n');
        text.push_str("#define ");
        text.push_str(stage.define());
        text.push('\n');
        text.push_str(defines.text());
        text.push_str(processed);
        text
    }

    /// Reprocesses every invalidated source once, then compiles every shader
    /// flagged since the last call once. Returns the number of shaders
    /// compiled.
    pub fn recompile_invalidated(&self) -> usize {
        if let Err(err) = self.check_thread("<recompile>") {
            log::error!("{err}");
            return 0;
        }
        self.release_retired_programs();

        for source in self.ctx.take_dirty_sources() {
            if !source.is_processed()
                && let Err(err) = source.process(&self.resources)
            {
                log::warn!("{err}");
            }
        }

        let mut compiled = 0;
        for shader in self.ctx.take_pending_shaders() {
            shader.clear_queued();
            if shader.is_compiled() {
                continue;
            }
            shader.compile(self);
            compiled += 1;
        }
        if compiled > 0 {
            log::info!("Recompiled {compiled} shaders");
        }
        compiled
    }

    /// Deletes programs of shaders dropped since the last call.
    pub fn release_retired_programs(&self) -> usize {
        let retired = self.ctx.take_retired_programs();
        if retired.is_empty() {
            return 0;
        }
        self.with_driver(|driver| {
            for program in &retired {
                driver.delete_program(*program);
            }
        });
        retired.len()
    }

    /// Persists the binary cache to the configured path if it changed.
    pub fn save_binary_cache(&self) -> Result<bool> {
        let settings = self.resources.settings();
        if !settings.binary_cache_enabled || !self.binary_cache.is_dirty() {
            return Ok(false);
        }
        self.save_binary_cache_to(settings.binary_cache_path())?;
        Ok(true)
    }

    pub fn save_binary_cache_to(&self, path: &Path) -> Result<()> {
        self.binary_cache.save(self.resources.fs(), path)
    }
}

impl std::fmt::Debug for ShaderLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderLibrary")
            .field("sources", &self.sources.len())
            .field("binary_cache", &self.binary_cache)
            .field("graphics_thread", &self.graphics_thread)
            .finish_non_exhaustive()
    }
}
