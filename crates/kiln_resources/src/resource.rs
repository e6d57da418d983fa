//! Loadable Resources
//!
//! A [`Resource`] couples the engine-side bookkeeping of one asset (name,
//! load state, validity, file time, log) with the asset payload produced by an
//! [`AssetLoader`].
//!
//! # Load protocol
//!
//! - `Load(WAIT)`: claim the resource (`Queued -> Loading` or
//!   `Unloaded -> Loading`) and run the load body on the calling thread. If
//!   another thread owns the load, poll until it reaches `Loaded`, bounded by
//!   the configured wait timeout.
//! - `Load(ASYNC)`: `Unloaded -> Queued` and return; a worker runs the body.
//! - `Load(RELOAD [| FORCE_RELOAD])`: re-queue a loaded resource when its file
//!   changed (or unconditionally).
//!
//! A failed load body leaves the resource `Loaded` but invalid. It is not
//! retried until the next reload.

use parking_lot::Mutex;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use kiln_core::errors::{Error, ResourceError, Result};
use kiln_core::fs::{FileSystem, FileTime};
use kiln_core::hash::{ClassId, NameHash};

use crate::cache::{LoadEvent, ResourceCache};
use crate::flags::{LoadFlags, ResourceFlags};
use crate::queue::QueueKey;
use crate::state::{LoadState, StateCell};

// ─── Asset classes ───────────────────────────────────────────────────────────

/// Describes one asset class: how to construct a payload and how to fill it.
pub trait AssetLoader: Send + Sync + 'static {
    type Asset: Send + Sync + 'static;

    /// Class name, hashed into the class id.
    fn class_name(&self) -> &'static str;

    /// Builds an empty payload. `this` points at the resource being built and
    /// can be stored by payloads that need to hand out references to it.
    fn create(&self, name: &str, this: &Weak<Resource<Self::Asset>>) -> Self::Asset;

    /// Blocking load body. Runs on a worker or on a synchronous waiter.
    fn load(&self, resource: &Resource<Self::Asset>, ctx: &LoadContext<'_>) -> Result<()>;

    /// Runs on the loading thread once the resource reached `Loaded`, before
    /// the load is reported. Classes whose payload is post-processed settle
    /// the final validity here with [`Resource::set_validity`].
    fn loaded(&self, _resource: &Resource<Self::Asset>, _cache: &ResourceCache) {}
}

/// What a load body gets to work with.
pub struct LoadContext<'a> {
    cache: &'a ResourceCache,
    path: &'a Path,
}

impl<'a> LoadContext<'a> {
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &'a ResourceCache {
        self.cache
    }

    #[inline]
    #[must_use]
    pub fn fs(&self) -> &'a dyn FileSystem {
        self.cache.fs()
    }

    /// Full path the resource name resolved to.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &'a Path {
        self.path
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.fs().read(self.path)?)
    }

    pub fn read_text(&self) -> Result<String> {
        Ok(self.fs().read_text(self.path)?)
    }
}

// ─── Type-erased view used by the queue and workers ──────────────────────────

pub trait Loadable: Send + Sync {
    fn id(&self) -> NameHash;
    fn name(&self) -> &str;
    fn class_id(&self) -> ClassId;
    fn state_cell(&self) -> &StateCell;
    fn queue_slot(&self) -> &Mutex<Option<QueueKey>>;

    /// Runs the load body. The caller must have moved the state to `Loading`.
    fn run_load(&self, cache: &ResourceCache);

    #[inline]
    fn state(&self) -> LoadState {
        self.state_cell().get()
    }
}

// ─── Resource ────────────────────────────────────────────────────────────────

pub struct Resource<A: Send + Sync + 'static> {
    id: NameHash,
    name: String,
    class_id: ClassId,
    flags: ResourceFlags,

    state: StateCell,
    valid: AtomicBool,
    uses: AtomicU32,
    file_time: Mutex<Option<FileTime>>,
    log: Mutex<String>,
    queue_slot: Mutex<Option<QueueKey>>,

    loader: Arc<dyn AssetLoader<Asset = A>>,
    asset: A,
}

impl<A: Send + Sync + 'static> Resource<A> {
    pub(crate) fn new_cyclic(
        id: NameHash,
        name: String,
        class_id: ClassId,
        flags: ResourceFlags,
        loader: Arc<dyn AssetLoader<Asset = A>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let asset = loader.create(&name, this);
            Self {
                id,
                name,
                class_id,
                flags,
                state: StateCell::new(),
                valid: AtomicBool::new(false),
                uses: AtomicU32::new(1),
                file_time: Mutex::new(None),
                log: Mutex::new(String::new()),
                queue_slot: Mutex::new(None),
                loader,
                asset,
            }
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> NameHash {
        self.id
    }

    /// Normalized resource name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state.get()
    }

    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Whether the last completed load succeeded.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Number of `AddResource` calls that returned this instance.
    #[inline]
    #[must_use]
    pub fn uses(&self) -> u32 {
        self.uses.load(Ordering::Relaxed)
    }

    pub(crate) fn add_use(&self) {
        self.uses.fetch_add(1, Ordering::Relaxed);
    }

    /// Modification time of the file at the last load.
    #[must_use]
    pub fn file_time(&self) -> Option<FileTime> {
        *self.file_time.lock()
    }

    /// Human-readable log of the last failure, empty when valid.
    #[must_use]
    pub fn log(&self) -> String {
        self.log.lock().clone()
    }

    /// Appends a line to the log without touching validity.
    pub fn append_log(&self, line: &str) {
        let mut log = self.log.lock();
        if !log.is_empty() {
            log.push('\n');
        }
        log.push_str(line);
    }

    /// Overrides the validity of a loaded resource. Used by asset classes whose
    /// payload can fail after the load body succeeded (post-processing).
    pub fn set_validity(&self, valid: bool, log: &str) {
        log.clone_into(&mut self.log.lock());
        self.valid.store(valid, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn asset(&self) -> &A {
        &self.asset
    }

    /// Requests a load according to `flags`. Returns the validity observed
    /// when the call completes.
    pub fn load(self: &Arc<Self>, cache: &ResourceCache, flags: LoadFlags) -> bool {
        let erased: Arc<dyn Loadable> = Arc::clone(self) as Arc<dyn Loadable>;

        if flags.contains(LoadFlags::RELOAD)
            && (flags.contains(LoadFlags::FORCE_RELOAD) || self.is_source_newer(cache.fs()))
            && (cache.enqueue_from(&erased, LoadState::Loaded)
                || cache.enqueue_from(&erased, LoadState::Unloaded))
        {
            log::debug!("Queued reload of '{}'", self.name);
        }

        if flags.contains(LoadFlags::WAIT) {
            return self.wait_loaded(cache);
        }

        if flags.contains(LoadFlags::ASYNC) && cache.enqueue_from(&erased, LoadState::Unloaded) {
            log::debug!("Queued '{}'", self.name);
        }

        self.is_valid()
    }

    /// Makes sure the resource is (being) loaded. With `wait`, blocks until
    /// the load completes and returns the resulting validity.
    pub fn touch(self: &Arc<Self>, cache: &ResourceCache, wait: bool) -> bool {
        if self.is_loaded() {
            return self.is_valid();
        }
        let mode = if wait { LoadFlags::WAIT } else { LoadFlags::ASYNC };
        self.load(cache, mode)
    }

    /// `true` when the file changed since the last load and the resource is
    /// eligible for an automatic reload.
    #[must_use]
    pub fn begin_reload(&self, fs: &dyn FileSystem) -> bool {
        !self.flags.contains(ResourceFlags::MANUAL)
            && self.is_loaded()
            && self.is_source_newer(fs)
    }

    fn is_source_newer(&self, fs: &dyn FileSystem) -> bool {
        let current = fs.find(&self.name).and_then(|path| fs.mod_time(&path));
        match (*self.file_time.lock(), current) {
            (Some(loaded), Some(now)) => now > loaded,
            (None, Some(_)) => true,
            _ => false,
        }
    }

    fn wait_loaded(&self, cache: &ResourceCache) -> bool {
        let started = Instant::now();
        let timeout = cache.settings().load_wait_timeout();
        let poll = cache.settings().poll_interval();

        loop {
            match self.state() {
                LoadState::Loaded => return self.is_valid(),
                LoadState::Queued => {
                    if cache.claim(self) {
                        self.run_load(cache);
                        continue;
                    }
                }
                LoadState::Unloaded => {
                    if self
                        .state
                        .compare_and_transition(LoadState::Unloaded, LoadState::Loading)
                    {
                        self.run_load(cache);
                        continue;
                    }
                }
                LoadState::Loading => {}
            }

            if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                let err = ResourceError::WaitTimeout {
                    name: self.name.clone(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                };
                log::error!("{err}");
                self.append_log(&err.to_string());
                return false;
            }
            std::thread::sleep(poll);
        }
    }

    fn finish(&self, cache: &ResourceCache, outcome: Result<()>) {
        match outcome {
            Ok(()) => {
                self.log.lock().clear();
                self.valid.store(true, Ordering::Release);
                log::debug!("Loaded '{}'", self.name);
            }
            Err(err) => {
                log::warn!("Failed to load '{}': {err}", self.name);
                *self.log.lock() = err.to_string();
                self.valid.store(false, Ordering::Release);
            }
        }

        if !self
            .state
            .compare_and_transition(LoadState::Loading, LoadState::Loaded)
        {
            log::error!(
                "'{}' left Loading while its load body was running (now {:?})",
                self.name,
                self.state()
            );
        }
        self.loader.loaded(self, cache);

        cache.report(LoadEvent {
            id: self.id,
            class_id: self.class_id,
            name: self.name.clone(),
            valid: self.is_valid(),
        });
    }
}

impl<A: Send + Sync + 'static> Loadable for Resource<A> {
    fn id(&self) -> NameHash {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn state_cell(&self) -> &StateCell {
        &self.state
    }

    fn queue_slot(&self) -> &Mutex<Option<QueueKey>> {
        &self.queue_slot
    }

    fn run_load(&self, cache: &ResourceCache) {
        let fs = cache.fs();
        let outcome = match fs.find(&self.name) {
            None => Err(Error::Resource(ResourceError::FileNotFound(self.name.clone()))),
            Some(path) => {
                *self.file_time.lock() = fs.mod_time(&path);
                let ctx = LoadContext {
                    cache,
                    path: &path,
                };
                self.loader.load(self, &ctx)
            }
        };
        self.finish(cache, outcome);
    }
}

impl<A: Send + Sync + 'static> Deref for Resource<A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        &self.asset
    }
}

impl<A: Send + Sync + 'static> std::fmt::Debug for Resource<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("valid", &self.is_valid())
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
