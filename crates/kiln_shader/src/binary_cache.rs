//! Persistent program binary cache.
//!
//! Maps a shader uid to the program binary the driver produced for it,
//! together with the checksum of the processed source it was built from. An
//! entry is only handed out while that checksum still matches.
//!
//! # File format
//!
//! All integers are little-endian `u32`:
//!
//! ```text
//! "SHCH" driverId maxItemSize itemCount
//! itemCount × { id checksum format size data[size] }
//! ```
//!
//! Loading is fail-safe: a truncated or oversized file, an item larger than
//! `maxItemSize` or a file written by another driver is discarded as a whole
//! and the cache starts empty.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use kiln_core::errors::{CacheError, Result};
use kiln_core::fs::FileSystem;

const MAGIC: &[u8; 4] = b"SHCH";
const HEADER_SIZE: usize = 16;
const ITEM_HEADER_SIZE: usize = 16;

/// One cached program binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub id: u32,
    pub checksum: u32,
    pub format: u32,
    pub bytes: Vec<u8>,
}

pub struct ShaderBinaryCache {
    driver_id: u32,
    items: RwLock<FxHashMap<u32, CacheItem>>,
    dirty: AtomicBool,
}

impl ShaderBinaryCache {
    #[must_use]
    pub fn new(driver_id: u32) -> Self {
        Self {
            driver_id,
            items: RwLock::default(),
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn driver_id(&self) -> u32 {
        self.driver_id
    }

    /// Entry for `id`, only if it was built from a source with `checksum`.
    #[must_use]
    pub fn get(&self, id: u32, checksum: u32) -> Option<CacheItem> {
        self.items
            .read()
            .get(&id)
            .filter(|item| item.checksum == checksum)
            .cloned()
    }

    /// Inserts or overwrites the entry for `id`.
    pub fn set(&self, id: u32, checksum: u32, format: u32, bytes: Vec<u8>) {
        self.items.write().insert(
            id,
            CacheItem {
                id,
                checksum,
                format,
                bytes,
            },
        );
        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, id: u32) -> bool {
        let removed = self.items.write().remove(&id).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Whether entries changed since the last load or save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Serializes the cache. Items are written in id order so equal caches
    /// produce equal files.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let items = self.items.read();
        let mut sorted: Vec<&CacheItem> = items.values().collect();
        sorted.sort_unstable_by_key(|item| item.id);

        let max_item_size = sorted.iter().map(|item| item.bytes.len()).max().unwrap_or(0);
        let payload: usize = sorted
            .iter()
            .map(|item| ITEM_HEADER_SIZE + item.bytes.len())
            .sum();

        let mut out = Vec::with_capacity(HEADER_SIZE + payload);
        out.extend_from_slice(MAGIC);
        put_u32(&mut out, self.driver_id);
        put_u32(&mut out, len_u32(max_item_size));
        put_u32(&mut out, len_u32(sorted.len()));
        for item in sorted {
            put_u32(&mut out, item.id);
            put_u32(&mut out, item.checksum);
            put_u32(&mut out, item.format);
            put_u32(&mut out, len_u32(item.bytes.len()));
            out.extend_from_slice(&item.bytes);
        }
        out
    }

    /// Parses a cache file produced for `driver_id`.
    pub fn decode(bytes: &[u8], driver_id: u32) -> std::result::Result<Self, CacheError> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.take(4)? != MAGIC {
            return Err(CacheError::Corrupt("bad magic".to_string()));
        }
        let found = reader.u32()?;
        if found != driver_id {
            return Err(CacheError::DriverMismatch {
                expected: driver_id,
                found,
            });
        }
        let max_item_size = reader.u32()?;
        let count = reader.u32()?;

        let mut items = FxHashMap::default();
        for index in 0..count {
            let id = reader.u32()?;
            let checksum = reader.u32()?;
            let format = reader.u32()?;
            let size = reader.u32()?;
            if size > max_item_size {
                return Err(CacheError::Corrupt(format!(
                    "item {index} is {size} bytes, limit is {max_item_size}"
                )));
            }
            let data = reader.take(size as usize)?.to_vec();
            items.insert(
                id,
                CacheItem {
                    id,
                    checksum,
                    format,
                    bytes: data,
                },
            );
        }

        if reader.remaining() != 0 {
            return Err(CacheError::Corrupt(format!(
                "{} trailing bytes after {count} items",
                reader.remaining()
            )));
        }

        Ok(Self {
            driver_id,
            items: RwLock::new(items),
            dirty: AtomicBool::new(false),
        })
    }

    /// Loads the cache file at `path`. Missing or unusable files yield an
    /// empty cache.
    pub fn load(fs: &dyn FileSystem, path: &Path, driver_id: u32) -> Self {
        let Some(full) = fs.find(&path.to_string_lossy()) else {
            log::debug!("No shader cache at {}", path.display());
            return Self::new(driver_id);
        };
        let bytes = match fs.read(&full) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Failed to read shader cache {}: {err}", full.display());
                return Self::new(driver_id);
            }
        };
        match Self::decode(&bytes, driver_id) {
            Ok(cache) => {
                log::info!(
                    "Loaded {} shader binaries from {}",
                    cache.len(),
                    full.display()
                );
                cache
            }
            Err(err) => {
                log::warn!("Discarding shader cache {}: {err}", full.display());
                Self::new(driver_id)
            }
        }
    }

    /// Writes the cache to `path`, creating its directory if needed.
    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let path = fs.resolve_write(&path.to_string_lossy());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !fs.create_dir(parent)
        {
            log::warn!("Could not create shader cache directory {}", parent.display());
        }
        let bytes = self.encode();
        let mut writer = fs.write(&path)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        self.dirty.store(false, Ordering::Release);
        log::info!("Saved {} shader binaries to {}", self.len(), path.display());
        Ok(())
    }
}

impl std::fmt::Debug for ShaderBinaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderBinaryCache")
            .field("driver_id", &self.driver_id)
            .field("items", &self.len())
            .finish_non_exhaustive()
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], CacheError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CacheError::Corrupt(format!(
                    "unexpected end of file at offset {} (wanted {len} bytes)",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> std::result::Result<u32, CacheError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}
