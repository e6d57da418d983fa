//! Shared shader tables.
//!
//! [`ShaderContext`] owns everything shader sources and shaders share:
//!
//! - the source-name table behind `#line` source ids
//! - the include dependency graph
//! - the defines intern table
//! - the hand-off queues from invalidation (any thread) to recompilation
//!   (graphics thread)
//!
//! Each structure has its own lock. Preprocessing is additionally serialized
//! by one processing lock, so nested includes can be expanded without
//! ordering per-source locks.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use kiln_core::interner::Interner;
use kiln_resources::Resource;

use crate::defines::DefinesRegistry;
use crate::diagnostics::remap_source_ids;
use crate::driver::ProgramHandle;
use crate::graph::{DependencyGraph, SourceKey, SourceRef};
use crate::shader::Shader;
use crate::source::ShaderSource;

pub struct ShaderContext {
    names: Interner,
    graph: Mutex<DependencyGraph>,
    defines: DefinesRegistry,
    pub(crate) processing: Mutex<()>,

    dirty_sources: Mutex<Vec<SourceRef>>,
    pending_tx: flume::Sender<Weak<Shader>>,
    pending_rx: flume::Receiver<Weak<Shader>>,
    retired_tx: flume::Sender<ProgramHandle>,
    retired_rx: flume::Receiver<ProgramHandle>,
}

impl ShaderContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (pending_tx, pending_rx) = flume::unbounded();
        let (retired_tx, retired_rx) = flume::unbounded();
        Arc::new(Self {
            names: Interner::new(),
            graph: Mutex::default(),
            defines: DefinesRegistry::new(),
            processing: Mutex::new(()),
            dirty_sources: Mutex::default(),
            pending_tx,
            pending_rx,
            retired_tx,
            retired_rx,
        })
    }

    // ========================================================================
    // Source names
    // ========================================================================

    /// Small integer written into `#line` markers for `name`.
    pub fn source_id(&self, name: &str) -> usize {
        Interner::index_of(self.names.intern(name))
    }

    #[must_use]
    pub fn source_name(&self, id: usize) -> Option<&str> {
        self.names.resolve_index(id)
    }

    /// Rewrites `<sourceId>:<line>` and `<sourceId>(<line>)` locations in a
    /// driver log to file names.
    #[must_use]
    pub fn remap_diagnostics(&self, log: &str) -> String {
        remap_source_ids(log, |id| self.source_name(id))
    }

    // ========================================================================
    // Tables
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn defines(&self) -> &DefinesRegistry {
        &self.defines
    }

    /// Runs `f` with the dependency graph locked.
    pub fn with_graph<R>(&self, f: impl FnOnce(&DependencyGraph) -> R) -> R {
        f(&self.graph.lock())
    }

    pub(crate) fn graph_mut<R>(&self, f: impl FnOnce(&mut DependencyGraph) -> R) -> R {
        f(&mut self.graph.lock())
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Invalidates `start` and its transitive dependents. Returns how many
    /// sources were newly invalidated.
    pub(crate) fn invalidate(&self, start: SourceKey) -> usize {
        // Weak refs are upgraded after the graph lock is released: dropping
        // the last strong ref of a source takes that lock again
        let marked = self.graph_mut(|graph| graph.invalidate_closure(start));
        let sources: Vec<Arc<Resource<ShaderSource>>> =
            marked.iter().filter_map(Weak::upgrade).collect();
        for source in &sources {
            source.mark_dirty();
        }
        if !sources.is_empty() {
            log::debug!("Invalidated {} shader sources", sources.len());
        }
        sources.len()
    }

    pub(crate) fn push_dirty_source(&self, source: SourceRef) {
        self.dirty_sources.lock().push(source);
    }

    /// Sources invalidated since the last call, deduplicated.
    pub(crate) fn take_dirty_sources(&self) -> Vec<Arc<Resource<ShaderSource>>> {
        let drained = std::mem::take(&mut *self.dirty_sources.lock());
        let mut sources: Vec<Arc<Resource<ShaderSource>>> = Vec::with_capacity(drained.len());
        for source in drained.iter().filter_map(Weak::upgrade) {
            if !sources.iter().any(|s| Arc::ptr_eq(s, &source)) {
                sources.push(source);
            }
        }
        sources
    }

    #[must_use]
    pub fn dirty_source_count(&self) -> usize {
        self.dirty_sources.lock().len()
    }

    pub(crate) fn queue_shader(&self, shader: Weak<Shader>) {
        // Unbounded channel, send only fails without a receiver
        let _ = self.pending_tx.send(shader);
    }

    pub(crate) fn take_pending_shaders(&self) -> Vec<Arc<Shader>> {
        self.pending_rx
            .try_iter()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// Number of shaders waiting for recompilation.
    #[must_use]
    pub fn pending_shader_count(&self) -> usize {
        self.pending_rx.len()
    }

    // ========================================================================
    // Program release
    // ========================================================================

    /// Hands a program to the graphics thread for deletion.
    pub(crate) fn retire_program(&self, program: ProgramHandle) {
        let _ = self.retired_tx.send(program);
    }

    pub(crate) fn take_retired_programs(&self) -> Vec<ProgramHandle> {
        self.retired_rx.try_iter().collect()
    }
}

impl std::fmt::Debug for ShaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderContext")
            .field("sources", &self.names.len())
            .field("defines", &self.defines.len())
            .field("pending", &self.pending_shader_count())
            .finish_non_exhaustive()
    }
}
