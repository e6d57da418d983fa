//! Kiln Resources
//!
//! Generic loadable-asset lifecycle:
//!
//! - [`state`]: the `Unloaded -> Queued -> Loading -> Loaded` state machine
//! - [`resource`]: [`Resource`] handles and the [`AssetLoader`] contract
//! - [`manager`]: per-class deduplication, reload scans and eviction
//! - [`cache`]: the directory of managers and the shared load queue
//! - [`workers`]: background loader threads
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = ResourceCache::new(Arc::new(fs), EngineSettings::default());
//! cache.register(BlobLoader);
//! let blob = cache.add_resource::<Blob>("data/table.bin", ResourceFlags::empty())?;
//! assert!(blob.is_valid());
//! ```

pub mod blob;
pub mod cache;
pub mod flags;
pub mod manager;
mod queue;
pub mod resource;
pub mod state;
pub mod workers;

pub use blob::{Blob, BlobLoader};
pub use cache::{LoadEvent, ReloadBatch, ResourceCache};
pub use flags::{LoadFlags, ResourceFlags};
pub use manager::ResourceManager;
pub use queue::QueueKey;
pub use resource::{AssetLoader, LoadContext, Loadable, Resource};
pub use state::{LoadState, StateCell};
pub use workers::LoaderPool;

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{EngineSettings, MemoryFileSystem};
    use std::sync::Arc;

    fn cache_with(fs: &MemoryFileSystem, settings: EngineSettings) -> Arc<ResourceCache> {
        let _ = env_logger::builder().is_test(true).try_init();
        let cache = ResourceCache::new(Arc::new(fs.clone()), settings);
        cache.register(BlobLoader);
        cache
    }

    #[test]
    fn queue_membership_follows_state() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.bin", vec![1, 2, 3]);
        let settings = EngineSettings {
            deferred_loading: true,
            ..EngineSettings::default()
        };
        let cache = cache_with(&fs, settings);

        let blob = cache
            .add_resource::<Blob>("a.bin", ResourceFlags::empty())
            .unwrap();
        assert_eq!(blob.state(), LoadState::Queued);
        assert_eq!(cache.queue_len(), 1);

        assert_eq!(cache.process_queue_once(), 1);
        assert_eq!(blob.state(), LoadState::Loaded);
        assert_eq!(cache.queue_len(), 0);
        assert_eq!(blob.len(), 3);
    }

    #[test]
    fn waiter_claims_its_own_queued_resource() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.bin", vec![7]);
        fs.insert("b.bin", vec![8]);
        let settings = EngineSettings {
            deferred_loading: true,
            ..EngineSettings::default()
        };
        let cache = cache_with(&fs, settings);

        let a = cache.add_resource::<Blob>("a.bin", ResourceFlags::empty()).unwrap();
        let b = cache.add_resource::<Blob>("b.bin", ResourceFlags::empty()).unwrap();
        assert_eq!(cache.queue_len(), 2);

        assert!(b.touch(&cache, true));
        assert_eq!(b.state(), LoadState::Loaded);
        assert_eq!(a.state(), LoadState::Queued);
        assert_eq!(cache.queue_len(), 1);
    }

    #[test]
    fn load_events_are_published() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.bin", vec![1]);
        let cache = cache_with(&fs, EngineSettings::default());

        let _a = cache.add_resource::<Blob>("a.bin", ResourceFlags::empty()).unwrap();
        let _missing = cache.add_resource::<Blob>("missing.bin", ResourceFlags::empty()).unwrap();

        let events = cache.drain_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.name == "a.bin" && e.valid));
        assert!(events.iter().any(|e| e.name == "missing.bin" && !e.valid));
        assert!(cache.drain_events().is_empty());
    }

    /// Reads like a blob but rejects empty files after the read succeeded.
    struct NonEmptyLoader;

    impl AssetLoader for NonEmptyLoader {
        type Asset = parking_lot::Mutex<usize>;

        fn class_name(&self) -> &'static str {
            "NonEmpty"
        }

        fn create(
            &self,
            _name: &str,
            _this: &std::sync::Weak<Resource<Self::Asset>>,
        ) -> Self::Asset {
            parking_lot::Mutex::new(0)
        }

        fn load(
            &self,
            resource: &Resource<Self::Asset>,
            ctx: &LoadContext<'_>,
        ) -> kiln_core::Result<()> {
            *resource.lock() = ctx.read_bytes()?.len();
            Ok(())
        }

        fn loaded(&self, resource: &Resource<Self::Asset>, _cache: &ResourceCache) {
            if resource.is_valid() && *resource.lock() == 0 {
                resource.set_validity(false, "empty file");
            }
        }
    }

    #[test]
    fn post_load_hook_settles_validity_before_the_event() {
        let fs = MemoryFileSystem::new();
        fs.insert("empty.dat", Vec::<u8>::new());
        fs.insert("full.dat", vec![1]);
        let cache = cache_with(&fs, EngineSettings::default());
        let checked = cache.register(NonEmptyLoader);

        let empty = checked.add_resource(&cache, "empty.dat", ResourceFlags::empty());
        let full = checked.add_resource(&cache, "full.dat", ResourceFlags::empty());
        assert!(!empty.touch(&cache, true));
        assert_eq!(empty.log(), "empty file");
        assert!(full.touch(&cache, true));

        let events = cache.drain_events();
        assert!(events.iter().any(|e| e.name == "empty.dat" && !e.valid));
        assert!(events.iter().any(|e| e.name == "full.dat" && e.valid));

        fs.insert("empty.dat", vec![1, 2]);
        assert_eq!(cache.reload_resources(true), 1);
        assert!(empty.is_valid());
        assert!(empty.log().is_empty());
    }

    #[test]
    fn pool_drains_queue() {
        let fs = MemoryFileSystem::new();
        for i in 0..16 {
            fs.insert(&format!("f{i}.bin"), vec![i as u8]);
        }
        let settings = EngineSettings {
            deferred_loading: true,
            ..EngineSettings::default()
        };
        let cache = cache_with(&fs, settings);
        let mut pool = LoaderPool::spawn(&cache, 3).unwrap();

        let blobs: Vec<_> = (0..16)
            .map(|i| {
                cache
                    .add_resource::<Blob>(&format!("f{i}.bin"), ResourceFlags::empty())
                    .unwrap()
            })
            .collect();
        for blob in &blobs {
            assert!(blob.touch(&cache, true));
        }
        pool.shutdown();
        assert!(pool.is_empty());
        assert_eq!(cache.queue_len(), 0);
    }
}
