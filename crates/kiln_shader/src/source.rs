//! Shader source files.
//!
//! [`ShaderSource`] is the payload of the `ShaderSource` asset class. The load
//! body only reads the raw text. Include expansion runs right after, once the
//! resource is `Loaded`, so a source that fails to expand is never reported
//! valid. Expansion uses an explicit include stack: cycles are reported
//! instead of waiting on a resource that is itself mid-expansion.
//!
//! # Invalidation
//!
//! When a reload brings in different text, the source and everything that
//! transitively includes it is invalidated exactly once: processed text is
//! dropped, the source is queued for reprocessing and every shader built from
//! it is flagged for recompilation. Nothing is recompiled until
//! [`ShaderLibrary::recompile_invalidated`](crate::ShaderLibrary::recompile_invalidated)
//! runs on the graphics thread.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use kiln_core::errors::{ResourceError, Result, ShaderError};
use kiln_core::hash::{normalize_name, sibling_path};
use kiln_resources::{AssetLoader, LoadContext, LoadFlags, Resource, ResourceCache, ResourceFlags};

use crate::context::ShaderContext;
use crate::defines::{DefinesId, ShaderDefines};
use crate::graph::{SourceKey, SourceRef};
use crate::preprocess::{content_checksum, expand_includes};
use crate::shader::{Shader, ShaderKind};

/// Fully expanded source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub text: Arc<str>,
    /// xxh32 of `text` with `#line` source ids left out, so it does not depend
    /// on the order files were first loaded in.
    pub checksum: u32,
}

thread_local! {
    /// Set while the current thread expands includes. Sources loaded to
    /// resolve an include are expanded by that expansion, not by their loader.
    static EXPANDING: Cell<bool> = const { Cell::new(false) };
}

type Outcome = std::result::Result<Processed, ShaderError>;

#[derive(Default)]
struct ProcessState {
    outcome: Option<Outcome>,
    /// Sources this one was expanded from. Kept alive as long as the
    /// expansion is.
    includes: Vec<Arc<Resource<ShaderSource>>>,
}

pub struct ShaderSource {
    ctx: Arc<ShaderContext>,
    this: SourceRef,
    name: String,
    source_id: usize,
    node: SourceKey,

    raw: RwLock<Option<Arc<str>>>,
    loaded_once: AtomicBool,
    generation: AtomicU64,
    state: Mutex<ProcessState>,
    instances: RwLock<FxHashMap<DefinesId, Arc<Shader>>>,
}

impl ShaderSource {
    /// Normalized file name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id written into `#line` markers for this file.
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> usize {
        self.source_id
    }

    /// Node of this source in the dependency graph.
    #[inline]
    #[must_use]
    pub fn node(&self) -> SourceKey {
        self.node
    }

    /// Text as read from the file, before include expansion.
    #[must_use]
    pub fn raw_text(&self) -> Option<Arc<str>> {
        self.raw.read().clone()
    }

    /// Whether a processing result (success or failure) is cached.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    #[must_use]
    pub fn processed(&self) -> Option<Processed> {
        match &self.state.lock().outcome {
            Some(Ok(processed)) => Some(processed.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn checksum(&self) -> Option<u32> {
        self.processed().map(|p| p.checksum)
    }

    /// Names of the files this source includes, as recorded in the graph.
    #[must_use]
    pub fn include_names(&self) -> Vec<String> {
        self.neighbour_names(|graph, key| graph.includes(key))
    }

    /// Names of the files including this source, as recorded in the graph.
    #[must_use]
    pub fn dependent_names(&self) -> Vec<String> {
        self.neighbour_names(|graph, key| graph.dependents(key))
    }

    fn neighbour_names(
        &self,
        edges: impl Fn(&crate::graph::DependencyGraph, SourceKey) -> Vec<SourceKey>,
    ) -> Vec<String> {
        let mut names: Vec<String> = self.ctx.with_graph(|graph| {
            edges(graph, self.node)
                .into_iter()
                .filter_map(|key| graph.name(key).map(str::to_string))
                .collect()
        });
        names.sort();
        names
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Processed text, expanding includes if no result is cached.
    ///
    /// Failures are cached too, and recorded in the resource log with the
    /// resource marked invalid. They are retried after the next invalidation.
    pub fn process(&self, cache: &ResourceCache) -> Outcome {
        let _serial = self.ctx.processing.lock();
        let outer = EXPANDING.replace(true);
        let mut stack = Vec::new();
        let outcome = self.process_locked(cache, &mut stack);
        EXPANDING.set(outer);
        outcome
    }

    fn process_locked(&self, cache: &ResourceCache, stack: &mut Vec<SourceKey>) -> Outcome {
        if let Some(outcome) = &self.state.lock().outcome {
            return outcome.clone();
        }
        let generation = self.generation.load(Ordering::Acquire);
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| ShaderError::SourceReleased(self.name.clone()))?;

        this.touch(cache, true);
        let Some(raw) = self.raw_text() else {
            let err = ShaderError::SourceInvalid {
                name: self.name.clone(),
                log: this.log(),
            };
            self.store(generation, Err(err.clone()), Vec::new());
            return Err(err);
        };

        self.ctx.graph_mut(|graph| graph.unlink_includes(self.node));
        stack.push(self.node);
        let mut includes = Vec::new();
        let expanded = expand_includes(&raw, &self.name, self.source_id, &mut |include, _line| {
            let target = self.resolve_include(cache, include, &mut includes)?;
            self.ctx.graph_mut(|graph| graph.link(self.node, target.node));

            if stack.contains(&target.node) {
                return Err(ShaderError::CyclicInclude {
                    from: self.name.clone(),
                    target: target.asset().name().to_string(),
                });
            }
            includes.push(Arc::clone(&target));

            match target.process_locked(cache, stack) {
                Ok(processed) => Ok(processed.text),
                Err(err @ ShaderError::CyclicInclude { .. }) => Err(err),
                Err(err) => Err(ShaderError::Include {
                    from: self.name.clone(),
                    nested: err.to_string(),
                }),
            }
        });
        stack.pop();

        let outcome = expanded.map(|text| Processed {
            checksum: content_checksum(&text),
            text: Arc::from(text),
        });
        match &outcome {
            Ok(processed) => {
                log::debug!(
                    "Processed '{}' (checksum {:#010x})",
                    self.name,
                    processed.checksum
                );
                this.set_validity(true, "");
            }
            Err(err) => {
                log::warn!("Failed to process '{}': {err}", self.name);
                this.set_validity(false, &err.to_string());
            }
        }
        self.store(generation, outcome.clone(), includes);
        outcome
    }

    /// Resolves an include relative to this file first, then as a logical name.
    ///
    /// When neither file exists both candidates are linked and kept in
    /// `missing`, so the includer is invalidated whichever of them appears.
    fn resolve_include(
        &self,
        cache: &ResourceCache,
        include: &str,
        missing: &mut Vec<Arc<Resource<ShaderSource>>>,
    ) -> std::result::Result<Arc<Resource<ShaderSource>>, ShaderError> {
        let sibling = sibling_path(&self.name, include);
        let name = if cache.fs().find(&sibling).is_some() {
            sibling.clone()
        } else {
            normalize_name(include)
        };
        let manager = cache
            .manager::<ShaderSource>()
            .ok_or_else(|| ShaderError::SourceReleased(name.clone()))?;
        let target =
            manager.add_resource_with(cache, &name, ResourceFlags::empty(), LoadFlags::WAIT);
        if target.raw_text().is_some() {
            return Ok(target);
        }

        let mut candidates = vec![target];
        if name != sibling {
            candidates.push(manager.add_resource_with(
                cache,
                &sibling,
                ResourceFlags::empty(),
                LoadFlags::WAIT,
            ));
        }
        for candidate in candidates {
            self.ctx
                .graph_mut(|graph| graph.link(self.node, candidate.node));
            missing.push(candidate);
        }
        Err(ShaderError::Include {
            from: self.name.clone(),
            nested: ResourceError::FileNotFound(name).to_string(),
        })
    }

    fn store(&self, generation: u64, outcome: Outcome, includes: Vec<Arc<Resource<ShaderSource>>>) {
        let released = {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::Acquire) != generation {
                // Invalidated while expanding, the result is already stale
                return;
            }
            state.outcome = Some(outcome);
            self.ctx
                .graph_mut(|graph| graph.clear_invalidated(self.node));
            std::mem::replace(&mut state.includes, includes)
        };
        drop(released);
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Invalidates this source and every source that includes it, directly or
    /// not. Returns how many sources were newly invalidated; `0` when they all
    /// already were.
    pub fn invalidate(&self) -> usize {
        self.ctx.invalidate(self.node)
    }

    pub(crate) fn mark_dirty(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.state.lock().outcome = None;
        self.ctx.push_dirty_source(self.this.clone());
        for shader in self.instances.read().values() {
            shader.mark_stale();
        }
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Shader for `kind` and `defines`, created on first request.
    ///
    /// Creating an instance processes the source first so include errors
    /// surface early; compilation itself is left to the graphics thread.
    pub fn create_instance(
        &self,
        cache: &ResourceCache,
        kind: ShaderKind,
        defines: &ShaderDefines,
    ) -> Arc<Shader> {
        let mut defines = defines.clone();
        kind.fold_into(&mut defines);
        let defs_id = self.ctx.defines().intern(&defines);

        if let Some(shader) = self.instances.read().get(&defs_id) {
            return Arc::clone(shader);
        }

        if let Err(err) = self.process(cache) {
            log::debug!("Creating '{}' variant of a failing source: {err}", self.name);
        }

        let mut instances = self.instances.write();
        let shader = instances.entry(defs_id).or_insert_with(|| {
            Arc::new(Shader::new(
                Arc::clone(&self.ctx),
                self.this.clone(),
                &self.name,
                defs_id,
                Arc::new(defines),
                kind,
            ))
        });
        Arc::clone(shader)
    }

    #[must_use]
    pub fn instance(&self, defs_id: DefinesId) -> Option<Arc<Shader>> {
        self.instances.read().get(&defs_id).cloned()
    }

    #[must_use]
    pub fn instances(&self) -> Vec<Arc<Shader>> {
        self.instances.read().values().cloned().collect()
    }

    /// Forgets a variant. Its program is released once the last handle drops.
    pub fn remove_instance(&self, defs_id: DefinesId) -> bool {
        let removed = self.instances.write().remove(&defs_id);
        removed.is_some()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    fn set_raw_text(&self, text: &str) {
        let changed = {
            let mut raw = self.raw.write();
            let changed = raw.as_deref() != Some(text);
            if changed {
                *raw = Some(Arc::from(text));
            }
            changed
        };
        let reloaded = self.loaded_once.swap(true, Ordering::AcqRel);
        // A file that was missing on first load can already have includers
        let included = self
            .ctx
            .with_graph(|graph| !graph.dependents(self.node).is_empty());
        if changed && (reloaded || included) {
            log::debug!("'{}' changed on disk", self.name);
            self.invalidate();
        }
    }
}

impl Drop for ShaderSource {
    fn drop(&mut self) {
        self.ctx.graph_mut(|graph| graph.remove(self.node));
    }
}

impl std::fmt::Debug for ShaderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderSource")
            .field("name", &self.name)
            .field("source_id", &self.source_id)
            .field("processed", &self.is_processed())
            .finish_non_exhaustive()
    }
}

/// Asset class of [`ShaderSource`].
pub struct ShaderSourceLoader {
    ctx: Arc<ShaderContext>,
}

impl ShaderSourceLoader {
    #[must_use]
    pub fn new(ctx: Arc<ShaderContext>) -> Self {
        Self { ctx }
    }
}

impl AssetLoader for ShaderSourceLoader {
    type Asset = ShaderSource;

    fn class_name(&self) -> &'static str {
        "ShaderSource"
    }

    fn create(&self, name: &str, this: &Weak<Resource<ShaderSource>>) -> ShaderSource {
        let node = self
            .ctx
            .graph_mut(|graph| graph.insert(name, this.clone()));
        ShaderSource {
            ctx: Arc::clone(&self.ctx),
            this: this.clone(),
            name: name.to_string(),
            source_id: self.ctx.source_id(name),
            node,
            raw: RwLock::new(None),
            loaded_once: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            state: Mutex::default(),
            instances: RwLock::default(),
        }
    }

    fn load(&self, resource: &Resource<ShaderSource>, ctx: &LoadContext<'_>) -> Result<()> {
        let text = ctx.read_text()?;
        resource.set_raw_text(&text);
        Ok(())
    }

    fn loaded(&self, resource: &Resource<ShaderSource>, cache: &ResourceCache) {
        if !resource.is_valid() || EXPANDING.get() {
            return;
        }
        // A cached failure survives a reload of unchanged text
        if let Err(err) = resource.process(cache) {
            resource.set_validity(false, &err.to_string());
        }
    }
}
