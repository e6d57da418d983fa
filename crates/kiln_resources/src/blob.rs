//! Raw byte assets.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use kiln_core::errors::Result;

use crate::resource::{AssetLoader, LoadContext, Resource};

/// File contents loaded verbatim. Useful for data that is parsed elsewhere.
#[derive(Debug, Default)]
pub struct Blob {
    bytes: RwLock<Arc<[u8]>>,
}

impl Blob {
    /// Snapshot of the current contents.
    #[must_use]
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes.read())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.read().is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BlobLoader;

impl AssetLoader for BlobLoader {
    type Asset = Blob;

    fn class_name(&self) -> &'static str {
        "Blob"
    }

    fn create(&self, _name: &str, _this: &Weak<Resource<Blob>>) -> Blob {
        Blob::default()
    }

    fn load(&self, resource: &Resource<Blob>, ctx: &LoadContext<'_>) -> Result<()> {
        let bytes = ctx.read_bytes()?;
        *resource.bytes.write() = Arc::from(bytes);
        Ok(())
    }
}
