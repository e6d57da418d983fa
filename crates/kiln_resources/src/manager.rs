//! Per-class resource registry.
//!
//! A [`ResourceManager`] deduplicates resources of one asset class by the hash
//! of their normalized name. It keeps two tables:
//!
//! - `cache`: strong references, eligible for eviction once nobody else
//!   holds the resource
//! - `all`: weak references to every live instance, temporaries included,
//!   used by reload scans

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};

use kiln_core::hash::{ClassId, NameHash, class_id, name_hash, normalize_name};

use crate::cache::ResourceCache;
use crate::flags::{LoadFlags, ResourceFlags};
use crate::resource::{AssetLoader, Resource};

/// Class-independent view the [`ResourceCache`] uses to drive every manager.
pub(crate) trait ManagerOps: Send + Sync {
    fn reload_resources(&self, cache: &ResourceCache, wait: bool) -> usize;
    fn remove_unused_resources(&self) -> usize;
}

struct ManagerInner<A: Send + Sync + 'static> {
    cache: FxHashMap<NameHash, Arc<Resource<A>>>,
    all: FxHashMap<NameHash, Vec<Weak<Resource<A>>>>,
}

impl<A: Send + Sync + 'static> Default for ManagerInner<A> {
    fn default() -> Self {
        Self {
            cache: FxHashMap::default(),
            all: FxHashMap::default(),
        }
    }
}

pub struct ResourceManager<A: Send + Sync + 'static> {
    class_id: ClassId,
    class_name: &'static str,
    loader: Arc<dyn AssetLoader<Asset = A>>,
    inner: RwLock<ManagerInner<A>>,
}

impl<A: Send + Sync + 'static> ResourceManager<A> {
    pub(crate) fn new(loader: Arc<dyn AssetLoader<Asset = A>>) -> Self {
        let class_name = loader.class_name();
        Self {
            class_id: class_id(class_name),
            class_name,
            loader,
            inner: RwLock::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[inline]
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// Returns the resource for `name`, creating and loading it on a miss.
    ///
    /// Loads synchronously unless deferred loading is enabled in the settings.
    pub fn add_resource(
        &self,
        cache: &ResourceCache,
        name: &str,
        flags: ResourceFlags,
    ) -> Arc<Resource<A>> {
        let mode = if cache.settings().deferred_loading {
            LoadFlags::ASYNC
        } else {
            LoadFlags::WAIT
        };
        self.add_resource_with(cache, name, flags, mode)
    }

    /// Like [`add_resource`](Self::add_resource) with an explicit load mode.
    pub fn add_resource_with(
        &self,
        cache: &ResourceCache,
        name: &str,
        flags: ResourceFlags,
        load_flags: LoadFlags,
    ) -> Arc<Resource<A>> {
        let name = normalize_name(name);
        let id = name_hash(&name);

        if !flags.contains(ResourceFlags::TEMP)
            && let Some(existing) = self.get_by_id(id)
        {
            existing.add_use();
            if !existing.is_loaded() {
                existing.load(cache, load_flags);
            }
            return existing;
        }

        let resource = {
            let mut inner = self.inner.write();

            // Another thread may have created it between the lookup and the lock
            if !flags.contains(ResourceFlags::TEMP)
                && let Some(existing) = inner.cache.get(&id)
            {
                let existing = Arc::clone(existing);
                drop(inner);
                existing.add_use();
                if !existing.is_loaded() {
                    existing.load(cache, load_flags);
                }
                return existing;
            }

            let resource = Resource::new_cyclic(
                id,
                name,
                self.class_id,
                flags,
                Arc::clone(&self.loader),
            );
            inner
                .all
                .entry(id)
                .or_default()
                .push(Arc::downgrade(&resource));
            if !flags.contains(ResourceFlags::TEMP) {
                inner.cache.insert(id, Arc::clone(&resource));
            }
            resource
        };

        log::debug!(
            "Created {} resource '{}'",
            self.class_name,
            resource.name()
        );
        resource.load(cache, load_flags);
        resource
    }

    /// Cached resource for `name`, without loading or counting a use.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Resource<A>>> {
        self.get_by_id(name_hash(&normalize_name(name)))
    }

    #[must_use]
    pub fn get_by_id(&self, id: NameHash) -> Option<Arc<Resource<A>>> {
        self.inner.read().cache.get(&id).cloned()
    }

    /// Number of cached (deduplicated) resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().cache.is_empty()
    }

    /// Every live instance of this class, temporaries included.
    #[must_use]
    pub fn resources(&self) -> Vec<Arc<Resource<A>>> {
        self.inner
            .read()
            .all
            .values()
            .flat_map(|list| list.iter().filter_map(Weak::upgrade))
            .collect()
    }

    /// Evicts cached resources that only the cache still references.
    ///
    /// Loops until nothing more can be evicted, since dropping one resource
    /// can release the last outside reference to another.
    pub fn remove_unused_resources(&self) -> usize {
        let mut total = 0;
        loop {
            let evicted: Vec<Arc<Resource<A>>> = {
                let mut inner = self.inner.write();
                let unused: Vec<NameHash> = inner
                    .cache
                    .iter()
                    .filter(|(_, res)| {
                        Arc::strong_count(res) == 1 && !res.flags().intersects(ResourceFlags::PINNED)
                    })
                    .map(|(id, _)| *id)
                    .collect();
                unused
                    .into_iter()
                    .filter_map(|id| inner.cache.remove(&id))
                    .collect()
            };

            if evicted.is_empty() {
                break;
            }
            total += evicted.len();
            for resource in &evicted {
                log::debug!("Evicted {} resource '{}'", self.class_name, resource.name());
            }
            // Dropped without the lock held: payload destructors may release
            // other resources of this class
            drop(evicted);
        }

        self.inner.write().all.retain(|_, list| {
            list.retain(|weak| weak.strong_count() > 0);
            !list.is_empty()
        });
        total
    }

    /// Reloads every resource whose file changed since its last load.
    pub fn reload_resources(&self, cache: &ResourceCache, wait: bool) -> usize {
        let batch = cache.begin_reload_batch();
        let mut flags = LoadFlags::RELOAD | LoadFlags::FORCE_RELOAD;
        if wait {
            flags |= LoadFlags::WAIT;
        }

        let stale: Vec<Arc<Resource<A>>> = self
            .resources()
            .into_iter()
            .filter(|res| res.begin_reload(cache.fs()))
            .collect();

        for resource in &stale {
            log::debug!("Reloading '{}'", resource.name());
            resource.load(cache, flags);
        }
        batch.add(stale.len());
        stale.len()
    }
}

impl<A: Send + Sync + 'static> ManagerOps for ResourceManager<A> {
    fn reload_resources(&self, cache: &ResourceCache, wait: bool) -> usize {
        ResourceManager::reload_resources(self, cache, wait)
    }

    fn remove_unused_resources(&self) -> usize {
        ResourceManager::remove_unused_resources(self)
    }
}

impl<A: Send + Sync + 'static> std::fmt::Debug for ResourceManager<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("class", &self.class_name)
            .field("cached", &self.len())
            .finish_non_exhaustive()
    }
}
