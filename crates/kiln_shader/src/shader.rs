//! Compiled shader variants.
//!
//! A [`Shader`] is one GPU program built from a
//! [`ShaderSource`](crate::source::ShaderSource) and an interned defines set.
//! It is created lazily by `ShaderSource::create_instance`, owned by its
//! source, and compiled on the graphics thread by [`Shader::compile`].
//!
//! Compilation first asks the [`ShaderBinaryCache`](crate::ShaderBinaryCache)
//! for a program binary built from the same processed text. Only on a miss
//! (or when the driver rejects the stored blob) are the stages compiled and
//! linked, after which the fresh binary overwrites the cache entry.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_core::errors::ShaderError;
use kiln_core::hash::checksum32;
use kiln_resources::Resource;

use crate::context::ShaderContext;
use crate::defines::{DefinesId, ShaderDefines};
use crate::driver::{ParamKind, ProgramHandle, ReflectedParam, ShaderDriver, ShaderStage};
use crate::graph::SourceRef;
use crate::library::ShaderLibrary;
use crate::source::ShaderSource;

/// Pipeline a shader is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderKind {
    /// Vertex + fragment program.
    #[default]
    Render,
    Compute,
}

impl ShaderKind {
    /// Marker folded into the defines of compute variants, so a render and a
    /// compute variant of the same source never share an instance.
    pub const COMPUTE_MARKER: &'static str = "KILN_COMPUTE";

    #[must_use]
    pub const fn stages(self) -> &'static [ShaderStage] {
        match self {
            Self::Render => &[ShaderStage::Vertex, ShaderStage::Fragment],
            Self::Compute => &[ShaderStage::Compute],
        }
    }

    pub(crate) fn fold_into(self, defines: &mut ShaderDefines) {
        match self {
            Self::Render => {
                defines.remove(Self::COMPUTE_MARKER);
            }
            Self::Compute => defines.set(Self::COMPUTE_MARKER, "1"),
        }
    }
}

/// Reflected program parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderParam {
    pub name: String,
    pub kind: ParamKind,
    pub type_tag: u32,
    /// Binding slot for textures, samplers and uniform blocks.
    pub slot: Option<u32>,
}

/// Assigns slots in reflection order: textures and samplers share one
/// counter, uniform blocks use another.
pub(crate) fn assign_slots(reflected: Vec<ReflectedParam>) -> Vec<ShaderParam> {
    let mut next_texture = 0;
    let mut next_block = 0;
    reflected
        .into_iter()
        .map(|param| {
            let slot = match param.kind {
                ParamKind::Uniform => None,
                ParamKind::Texture | ParamKind::Sampler => {
                    next_texture += 1;
                    Some(next_texture - 1)
                }
                ParamKind::UniformBlock => {
                    next_block += 1;
                    Some(next_block - 1)
                }
            };
            ShaderParam {
                name: param.name,
                kind: param.kind,
                type_tag: param.type_tag,
                slot,
            }
        })
        .collect()
}

#[derive(Default)]
struct ShaderState {
    program: Option<ProgramHandle>,
    compiled: bool,
    valid: bool,
    from_binary_cache: bool,
    /// Bumped by every invalidation. A compile only counts if it is unchanged
    /// when the build finishes.
    epoch: u64,
    log: String,
    params: Vec<ShaderParam>,
    param_index: FxHashMap<String, usize>,
}

struct Built {
    program: ProgramHandle,
    params: Vec<ShaderParam>,
    from_binary_cache: bool,
}

pub struct Shader {
    ctx: Arc<ShaderContext>,
    source: SourceRef,
    source_name: String,
    defs_id: DefinesId,
    defines: Arc<ShaderDefines>,
    kind: ShaderKind,
    uid: u32,
    queued: AtomicBool,
    state: Mutex<ShaderState>,
}

impl Shader {
    pub(crate) fn new(
        ctx: Arc<ShaderContext>,
        source: SourceRef,
        source_name: &str,
        defs_id: DefinesId,
        defines: Arc<ShaderDefines>,
        kind: ShaderKind,
    ) -> Self {
        let uid = shader_uid(source_name, &defines);
        Self {
            ctx,
            source,
            source_name: source_name.to_string(),
            defs_id,
            defines,
            kind,
            uid,
            queued: AtomicBool::new(false),
            state: Mutex::default(),
        }
    }

    /// Binary-cache key, stable across runs.
    #[inline]
    #[must_use]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    #[inline]
    #[must_use]
    pub fn defs_id(&self) -> DefinesId {
        self.defs_id
    }

    /// Defines the variant was built with, kind marker included.
    #[inline]
    #[must_use]
    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    #[must_use]
    pub fn source(&self) -> Option<Arc<Resource<ShaderSource>>> {
        self.source.upgrade()
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.state.lock().compiled
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    /// Whether the current program was recreated from the binary cache.
    #[must_use]
    pub fn is_from_binary_cache(&self) -> bool {
        self.state.lock().from_binary_cache
    }

    #[must_use]
    pub fn log(&self) -> String {
        self.state.lock().log.clone()
    }

    #[must_use]
    pub fn program(&self) -> Option<ProgramHandle> {
        self.state.lock().program
    }

    #[must_use]
    pub fn params(&self) -> Vec<ShaderParam> {
        self.state.lock().params.clone()
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<ShaderParam> {
        let state = self.state.lock();
        state
            .param_index
            .get(name)
            .map(|&index| state.params[index].clone())
    }

    /// Flags the shader for recompilation and queues it for the graphics thread.
    pub(crate) fn mark_stale(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.compiled = false;
            state.epoch += 1;
        }
        if !self.queued.swap(true, Ordering::AcqRel) {
            self.ctx.queue_shader(Arc::downgrade(self));
        }
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    /// Compiles the program if needed. Returns whether the shader is usable.
    ///
    /// Must run on the graphics thread of `library`. A failed compile is not
    /// retried until the source changes. If the source is invalidated while
    /// the program is being built, the result is installed but the shader
    /// stays flagged for recompilation.
    pub fn compile(&self, library: &ShaderLibrary) -> bool {
        if let Err(err) = library.check_thread(&self.source_name) {
            log::error!("{err}");
            self.state.lock().log = err.to_string();
            return false;
        }

        let epoch = {
            let state = self.state.lock();
            if state.compiled {
                return state.valid;
            }
            state.epoch
        };

        let outcome = self.build(library);

        let mut state = self.state.lock();
        if let Some(old) = state.program.take() {
            library.with_driver(|driver| driver.delete_program(old));
        }
        state.compiled = state.epoch == epoch;
        if !state.compiled {
            log::debug!(
                "'{}' was invalidated while compiling, left queued",
                self.source_name
            );
        }
        match outcome {
            Ok(built) => {
                state.param_index = built
                    .params
                    .iter()
                    .enumerate()
                    .map(|(index, param)| (param.name.clone(), index))
                    .collect();
                state.params = built.params;
                state.program = Some(built.program);
                state.from_binary_cache = built.from_binary_cache;
                state.valid = true;
                state.log.clear();
                log::debug!(
                    "Compiled '{}' ({:?}, uid {:#010x}{})",
                    self.source_name,
                    self.kind,
                    self.uid,
                    if built.from_binary_cache { ", cached" } else { "" }
                );
            }
            Err(err) => {
                log::error!("{err}");
                state.valid = false;
                state.from_binary_cache = false;
                state.params.clear();
                state.param_index.clear();
                state.log = err.to_string();
            }
        }
        state.valid
    }

    fn build(&self, library: &ShaderLibrary) -> std::result::Result<Built, ShaderError> {
        let source = self
            .source
            .upgrade()
            .ok_or_else(|| ShaderError::SourceReleased(self.source_name.clone()))?;
        let processed = source.process(library.resources())?;
        let checksum = library.binary_checksum(processed.checksum);
        let use_cache = library.binary_cache_enabled();

        if use_cache
            && let Some(item) = library.binary_cache().get(self.uid, checksum)
        {
            let restored = library.with_driver(|driver| {
                driver
                    .program_from_binary(item.format, &item.bytes)
                    .map(|program| (program, driver.reflect(program)))
            });
            if let Some((program, reflected)) = restored {
                return Ok(Built {
                    program,
                    params: assign_slots(reflected),
                    from_binary_cache: true,
                });
            }
            log::warn!(
                "Driver rejected the cached binary of '{}', recompiling",
                self.source_name
            );
        }

        let stages: Vec<(ShaderStage, String)> = self
            .kind
            .stages()
            .iter()
            .map(|&stage| (stage, library.assemble(stage, &self.defines, &processed.text)))
            .collect();

        let (program, binary, reflected) = library.with_driver(|driver| {
            let program = self.compile_and_link(driver, &stages)?;
            let binary = if use_cache {
                driver.program_binary(program)
            } else {
                None
            };
            Ok::<_, ShaderError>((program, binary, driver.reflect(program)))
        })?;

        if let Some(binary) = binary {
            library
                .binary_cache()
                .set(self.uid, checksum, binary.format, binary.bytes);
        }

        Ok(Built {
            program,
            params: assign_slots(reflected),
            from_binary_cache: false,
        })
    }

    fn compile_and_link(
        &self,
        driver: &mut dyn ShaderDriver,
        stages: &[(ShaderStage, String)],
    ) -> std::result::Result<ProgramHandle, ShaderError> {
        let mut handles = Vec::with_capacity(stages.len());
        for (stage, text) in stages {
            match driver.compile_stage(*stage, text) {
                Ok(handle) => handles.push(handle),
                Err(log) => {
                    for handle in handles {
                        driver.delete_stage(handle);
                    }
                    return Err(ShaderError::Compile {
                        name: format!("{} ({stage:?})", self.source_name),
                        log: self.ctx.remap_diagnostics(&log),
                    });
                }
            }
        }
        driver
            .link_program(&handles)
            .map_err(|log| ShaderError::Link {
                name: self.source_name.clone(),
                log: self.ctx.remap_diagnostics(&log),
            })
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        if let Some(program) = self.state.get_mut().program.take() {
            self.ctx.retire_program(program);
        }
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Shader")
            .field("source", &self.source_name)
            .field("kind", &self.kind)
            .field("uid", &format_args!("{:#010x}", self.uid))
            .field("compiled", &state.compiled)
            .field("valid", &state.valid)
            .finish_non_exhaustive()
    }
}

/// Stable binary-cache key of a (source, defines) pair.
#[must_use]
pub fn shader_uid(source_name: &str, defines: &ShaderDefines) -> u32 {
    let mut key = String::with_capacity(source_name.len() + defines.text().len() + 1);
    key.push_str(source_name);
    key.push('\n');
    key.push_str(defines.text());
    checksum32(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_reflection_order() {
        let reflected = vec![
            ReflectedParam {
                name: "u_color".into(),
                kind: ParamKind::Uniform,
                type_tag: 1,
            },
            ReflectedParam {
                name: "u_albedo".into(),
                kind: ParamKind::Texture,
                type_tag: 2,
            },
            ReflectedParam {
                name: "Camera".into(),
                kind: ParamKind::UniformBlock,
                type_tag: 3,
            },
            ReflectedParam {
                name: "u_shadow".into(),
                kind: ParamKind::Sampler,
                type_tag: 4,
            },
        ];
        let params = assign_slots(reflected);
        let slots: Vec<_> = params.iter().map(|p| (p.name.as_str(), p.slot)).collect();
        assert_eq!(
            slots,
            vec![
                ("u_color", None),
                ("u_albedo", Some(0)),
                ("Camera", Some(0)),
                ("u_shadow", Some(1)),
            ]
        );
    }

    #[test]
    fn uid_depends_on_name_and_defines() {
        let a = ShaderDefines::from_pairs([("X", "1")]);
        let b = ShaderDefines::from_pairs([("X", "2")]);
        assert_eq!(shader_uid("s.glsl", &a), shader_uid("s.glsl", &a.clone()));
        assert_ne!(shader_uid("s.glsl", &a), shader_uid("s.glsl", &b));
        assert_ne!(shader_uid("s.glsl", &a), shader_uid("t.glsl", &a));
    }

    #[test]
    fn kind_marker() {
        let mut defines = ShaderDefines::from_pairs([("X", "1")]);
        ShaderKind::Compute.fold_into(&mut defines);
        assert_eq!(defines.get(ShaderKind::COMPUTE_MARKER), Some("1"));
        ShaderKind::Render.fold_into(&mut defines);
        assert!(!defines.contains(ShaderKind::COMPUTE_MARKER));
    }
}
