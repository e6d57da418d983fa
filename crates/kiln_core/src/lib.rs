//! Kiln Core
//!
//! Foundational types shared by every Kiln crate:
//!
//! - [`errors`]: the engine-wide error taxonomy
//! - [`fs`]: the [`FileSystem`] contract and its disk / memory backends
//! - [`hash`]: name normalization and content hashing
//! - [`interner`]: string interning used for source-name tables
//! - [`settings`]: runtime configuration

pub mod errors;
pub mod fs;
pub mod hash;
pub mod interner;
pub mod settings;

pub use errors::{CacheError, Error, ResourceError, Result, ShaderError};
pub use fs::{DiskFileSystem, FileSystem, FileTime, MemoryFileSystem};
pub use hash::{ClassId, NameHash};
pub use interner::{Interner, Symbol};
pub use settings::EngineSettings;
