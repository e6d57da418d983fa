//! Kiln
//!
//! Resource lifecycle and shader artifact cache for real-time engines.
//!
//! The umbrella crate re-exports the workspace crates and adds
//! [`EngineContext`], the single owner of the resource and shader tables.
//!
//! - [`kiln_core`]: errors, file systems, hashing, settings
//! - [`kiln_resources`]: load state machine, managers, load queue, workers
//! - [`kiln_shader`]: include expansion, dependency graph, variants, binary cache

pub mod engine;

pub use engine::{EngineContext, FrameReport};

pub use kiln_core as core;
pub use kiln_resources as resources;
pub use kiln_shader as shader;

pub use kiln_core::{
    CacheError, DiskFileSystem, EngineSettings, Error, FileSystem, MemoryFileSystem,
    ResourceError, Result, ShaderError,
};
pub use kiln_resources::{
    AssetLoader, Blob, BlobLoader, LoadContext, LoadEvent, LoadFlags, LoadState, LoaderPool,
    Resource, ResourceCache, ResourceFlags, ResourceManager,
};
pub use kiln_shader::{
    ParamKind, ProgramBinary, ProgramHandle, ReflectedParam, Shader, ShaderBinaryCache,
    ShaderDefines, ShaderDriver, ShaderKind, ShaderLibrary, ShaderParam, ShaderSource,
    ShaderStage, StageHandle,
};
