//! Background loader threads.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cache::ResourceCache;

/// Fixed pool of OS threads draining the [`ResourceCache`] load queue.
///
/// Workers stop when the pool is shut down or dropped. Loads already running
/// are finished; queued resources stay queued.
pub struct LoaderPool {
    cache: Arc<ResourceCache>,
    threads: Vec<JoinHandle<()>>,
}

impl LoaderPool {
    /// Spawns `count` workers. Fails only if the OS refuses to create a thread.
    pub fn spawn(cache: &Arc<ResourceCache>, count: usize) -> std::io::Result<Self> {
        cache.set_shutdown(false);
        let mut pool = Self {
            cache: Arc::clone(cache),
            threads: Vec::with_capacity(count),
        };
        for index in 0..count {
            let cache = Arc::clone(cache);
            let handle = std::thread::Builder::new()
                .name(format!("kiln-loader-{index}"))
                .spawn(move || worker_loop(&cache))?;
            pool.threads.push(handle);
        }
        log::debug!("Started {count} loader threads");
        Ok(pool)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Signals every worker and joins them.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.cache.set_shutdown(true);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("Loader thread panicked");
            }
        }
        log::debug!("Loader threads stopped");
    }
}

fn worker_loop(cache: &ResourceCache) {
    while let Some(resource) = cache.wait_next() {
        resource.run_load(cache);
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LoaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderPool")
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}
