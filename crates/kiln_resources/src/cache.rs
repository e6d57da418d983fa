//! Resource Cache
//!
//! Directory of every [`ResourceManager`] plus the single pending-load queue
//! shared by all asset classes.
//!
//! # Synchronization
//!
//! One mutex guards the queue. Every transition into `Queued` and every
//! transition out of it (`Queued -> Loading`) happens while holding it, so a
//! resource is in the queue exactly when its state is `Queued`. Load bodies
//! always run with the lock released.
//!
//! Any thread may enqueue and any thread may claim: workers pop the tail,
//! synchronous waiters pull their own resource out of the middle.

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use kiln_core::errors::{ResourceError, Result};
use kiln_core::fs::FileSystem;
use kiln_core::hash::{ClassId, NameHash};
use kiln_core::settings::EngineSettings;

use crate::flags::ResourceFlags;
use crate::manager::{ManagerOps, ResourceManager};
use crate::queue::LoadQueue;
use crate::resource::{AssetLoader, Loadable, Resource};
use crate::state::LoadState;

const EVENT_CAPACITY: usize = 4096;
const WORKER_IDLE_WAIT: Duration = Duration::from_millis(50);

/// Completion notice published after every load body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEvent {
    pub id: NameHash,
    pub class_id: ClassId,
    pub name: String,
    pub valid: bool,
}

struct ManagerEntry {
    ops: Arc<dyn ManagerOps>,
    any: Arc<dyn Any + Send + Sync>,
}

pub struct ResourceCache {
    fs: Arc<dyn FileSystem>,
    settings: EngineSettings,

    managers: RwLock<FxHashMap<ClassId, ManagerEntry>>,
    classes_by_type: RwLock<FxHashMap<TypeId, ClassId>>,

    queue: Mutex<LoadQueue>,
    queue_signal: Condvar,
    shutdown: AtomicBool,

    reload_depth: AtomicU32,
    reload_total: AtomicUsize,

    events_tx: flume::Sender<LoadEvent>,
    events_rx: flume::Receiver<LoadEvent>,
}

impl ResourceCache {
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, settings: EngineSettings) -> Arc<Self> {
        let (events_tx, events_rx) = flume::bounded(EVENT_CAPACITY);
        Arc::new(Self {
            fs,
            settings,
            managers: RwLock::default(),
            classes_by_type: RwLock::default(),
            queue: Mutex::new(LoadQueue::default()),
            queue_signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
            reload_depth: AtomicU32::new(0),
            reload_total: AtomicUsize::new(0),
            events_tx,
            events_rx,
        })
    }

    #[inline]
    #[must_use]
    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ========================================================================
    // Managers
    // ========================================================================

    /// Registers an asset class. Registering the same loader type twice
    /// returns the existing manager.
    pub fn register<L: AssetLoader>(&self, loader: L) -> Arc<ResourceManager<L::Asset>> {
        if let Some(existing) = self.manager::<L::Asset>() {
            log::warn!(
                "Asset class '{}' registered twice, keeping the first loader",
                loader.class_name()
            );
            return existing;
        }
        self.insert_manager(loader)
    }

    /// Registers an asset class, failing if its payload type already has a
    /// manager. For loaders that carry state the caller must own.
    pub fn try_register<L: AssetLoader>(&self, loader: L) -> Result<Arc<ResourceManager<L::Asset>>> {
        if self.manager::<L::Asset>().is_some() {
            return Err(ResourceError::ClassRegistered(loader.class_name().to_string()).into());
        }
        Ok(self.insert_manager(loader))
    }

    fn insert_manager<L: AssetLoader>(&self, loader: L) -> Arc<ResourceManager<L::Asset>> {
        let manager = Arc::new(ResourceManager::new(Arc::new(loader)));
        let class_id = manager.class_id();
        let mut managers = self.managers.write();
        if managers.contains_key(&class_id) {
            log::error!(
                "Asset class id collision for '{}', replacing the previous manager",
                manager.class_name()
            );
        }
        managers.insert(
            class_id,
            ManagerEntry {
                ops: Arc::clone(&manager) as Arc<dyn ManagerOps>,
                any: Arc::clone(&manager) as Arc<dyn Any + Send + Sync>,
            },
        );
        self.classes_by_type
            .write()
            .insert(TypeId::of::<L::Asset>(), class_id);
        log::debug!("Registered asset class '{}'", manager.class_name());
        manager
    }

    /// Manager for payload type `A`, if its class was registered.
    #[must_use]
    pub fn manager<A: Send + Sync + 'static>(&self) -> Option<Arc<ResourceManager<A>>> {
        let class_id = *self.classes_by_type.read().get(&TypeId::of::<A>())?;
        self.manager_by_class(class_id)?
            .downcast::<ResourceManager<A>>()
            .ok()
    }

    fn manager_by_class(&self, class_id: ClassId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.managers
            .read()
            .get(&class_id)
            .map(|entry| Arc::clone(&entry.any))
    }

    /// Number of registered asset classes.
    #[must_use]
    pub fn manager_count(&self) -> usize {
        self.managers.read().len()
    }

    fn all_managers(&self) -> Vec<Arc<dyn ManagerOps>> {
        self.managers
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.ops))
            .collect()
    }

    /// Shorthand for `manager::<A>()?.add_resource(self, name, flags)`.
    pub fn add_resource<A: Send + Sync + 'static>(
        &self,
        name: &str,
        flags: ResourceFlags,
    ) -> Option<Arc<Resource<A>>> {
        let manager = self.manager::<A>()?;
        Some(manager.add_resource(self, name, flags))
    }

    /// Reload scan over every manager. Returns the number of reloaded resources.
    pub fn reload_resources(&self, wait: bool) -> usize {
        let _batch = self.begin_reload_batch();
        self.all_managers()
            .iter()
            .map(|manager| manager.reload_resources(self, wait))
            .sum()
    }

    /// Eviction pass over every manager. Returns the number of evicted resources.
    pub fn remove_unused_resources(&self) -> usize {
        // Evicting one class can release resources of another, loop until stable
        let mut total = 0;
        loop {
            let removed: usize = self
                .all_managers()
                .iter()
                .map(|manager| manager.remove_unused_resources())
                .sum();
            if removed == 0 {
                return total;
            }
            total += removed;
        }
    }

    // ========================================================================
    // Reload batches
    // ========================================================================

    /// Enters a (possibly nested) reload batch. The outermost guard logs the
    /// total number of reloaded resources when dropped.
    pub fn begin_reload_batch(&self) -> ReloadBatch<'_> {
        self.reload_depth.fetch_add(1, Ordering::AcqRel);
        ReloadBatch { cache: self }
    }

    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.reload_depth.load(Ordering::Acquire) > 0
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Moves `resource` from `from` to `Queued` and pushes it to the queue head.
    pub(crate) fn enqueue_from(&self, resource: &Arc<dyn Loadable>, from: LoadState) -> bool {
        let mut queue = self.queue.lock();
        if !resource
            .state_cell()
            .compare_and_transition(from, LoadState::Queued)
        {
            return false;
        }
        let key = queue.push(Arc::clone(resource));
        *resource.queue_slot().lock() = Some(key);
        drop(queue);
        self.queue_signal.notify_one();
        true
    }

    /// Pulls a `Queued` resource out of the queue and marks it `Loading`.
    /// Returns `false` if another thread got to it first.
    pub(crate) fn claim(&self, resource: &dyn Loadable) -> bool {
        let mut queue = self.queue.lock();
        if !resource
            .state_cell()
            .compare_and_transition(LoadState::Queued, LoadState::Loading)
        {
            return false;
        }
        let released = resource
            .queue_slot()
            .lock()
            .take()
            .and_then(|key| queue.remove(key));
        drop(queue);
        // The queue's reference is released outside the lock
        drop(released);
        true
    }

    /// Pops the oldest queued resource, already moved to `Loading`.
    pub(crate) fn pop_next(&self) -> Option<Arc<dyn Loadable>> {
        let mut queue = self.queue.lock();
        Self::pop_locked(&mut queue)
    }

    fn pop_locked(queue: &mut LoadQueue) -> Option<Arc<dyn Loadable>> {
        while let Some(resource) = queue.pop_back() {
            resource.queue_slot().lock().take();
            if resource
                .state_cell()
                .compare_and_transition(LoadState::Queued, LoadState::Loading)
            {
                return Some(resource);
            }
            log::error!(
                "'{}' was in the load queue while {:?}",
                resource.name(),
                resource.state()
            );
        }
        None
    }

    /// Blocks until a resource is available or shutdown is requested.
    pub(crate) fn wait_next(&self) -> Option<Arc<dyn Loadable>> {
        let mut queue = self.queue.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(resource) = Self::pop_locked(&mut queue) {
                return Some(resource);
            }
            self.queue_signal.wait_for(&mut queue, WORKER_IDLE_WAIT);
        }
    }

    /// Loads every queued resource on the calling thread.
    pub fn process_queue_once(&self) -> usize {
        let mut processed = 0;
        while let Some(resource) = self.pop_next() {
            resource.run_load(self);
            processed += 1;
        }
        processed
    }

    /// Number of resources currently waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn set_shutdown(&self, value: bool) {
        self.shutdown.store(value, Ordering::Release);
        if value {
            self.queue_signal.notify_all();
        }
    }

    // ========================================================================
    // Completion events
    // ========================================================================

    pub(crate) fn report(&self, event: LoadEvent) {
        if self.events_tx.try_send(event).is_err() {
            log::trace!("Load event buffer full, dropping event");
        }
    }

    /// Drains completion events published since the last call.
    #[must_use]
    pub fn drain_events(&self) -> Vec<LoadEvent> {
        self.events_rx.try_iter().collect()
    }
}

/// Guard returned by [`ResourceCache::begin_reload_batch`].
pub struct ReloadBatch<'a> {
    cache: &'a ResourceCache,
}

impl ReloadBatch<'_> {
    /// Adds reloaded resources to the batch total.
    pub fn add(&self, count: usize) {
        self.cache.reload_total.fetch_add(count, Ordering::AcqRel);
    }
}

impl Drop for ReloadBatch<'_> {
    fn drop(&mut self) {
        if self.cache.reload_depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            let total = self.cache.reload_total.swap(0, Ordering::AcqRel);
            if total > 0 {
                log::info!("Reloaded {total} resources");
            }
        }
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("managers", &self.manager_count())
            .field("queued", &self.queue_len())
            .finish_non_exhaustive()
    }
}
