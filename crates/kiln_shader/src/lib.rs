//! Kiln Shader
//!
//! Shader sources as resources, with:
//!
//! - recursive `#include` expansion and cycle detection ([`ShaderSource`])
//! - a live include/dependents graph driving invalidation ([`graph`])
//! - content-addressed variant deduplication ([`ShaderDefines`])
//! - compilation with a persistent program binary cache ([`ShaderLibrary`],
//!   [`ShaderBinaryCache`])
//!
//! # Example
//!
//! ```rust,ignore
//! let library = ShaderLibrary::new(&resources, Box::new(driver))?;
//! let defines = ShaderDefines::from_pairs([("USE_FOG", "1")]);
//! let (_source, shader) = library.shader("shaders/lit.glsl", ShaderKind::Render, &defines);
//! library.compile(&shader);
//!
//! // After a reload brought in edited files:
//! resources.reload_resources(true);
//! library.recompile_invalidated();
//! ```

pub mod binary_cache;
pub mod context;
pub mod defines;
pub mod diagnostics;
pub mod driver;
pub mod graph;
pub mod library;
mod preprocess;
pub mod shader;
pub mod source;

pub use binary_cache::{CacheItem, ShaderBinaryCache};
pub use context::ShaderContext;
pub use defines::{DefinesId, DefinesRegistry, ShaderDefines};
pub use driver::{
    ParamKind, ProgramBinary, ProgramHandle, ReflectedParam, ShaderDriver, ShaderStage,
    StageHandle,
};
pub use graph::{DependencyGraph, SourceKey};
pub use library::ShaderLibrary;
pub use shader::{Shader, ShaderKind, ShaderParam, shader_uid};
pub use source::{Processed, ShaderSource, ShaderSourceLoader};
