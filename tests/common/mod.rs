//! Shared fixtures for the integration tests: a recording shader driver and
//! helpers to build caches over an in-memory file system.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use kiln::{
    EngineSettings, MemoryFileSystem, ParamKind, ProgramBinary, ProgramHandle, ReflectedParam,
    ResourceCache, ShaderDriver, ShaderLibrary, ShaderStage, StageHandle,
};

pub const DRIVER_ID: u32 = 0x0BAD_CAFE;
const BINARY_FORMAT: u32 = 7;
const BINARY_PREFIX: &[u8] = b"prog:";

/// Counters shared between a [`RecordingDriver`] and the test body.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub stage_compiles: AtomicUsize,
    pub links: AtomicUsize,
    pub binary_loads: AtomicUsize,
    pub deleted_programs: AtomicUsize,
    /// Source text of the last compiled stage.
    pub last_source: parking_lot::Mutex<String>,
}

impl DriverStats {
    pub fn stage_compiles(&self) -> usize {
        self.stage_compiles.load(Ordering::SeqCst)
    }

    pub fn binary_loads(&self) -> usize {
        self.binary_loads.load(Ordering::SeqCst)
    }

    pub fn deleted_programs(&self) -> usize {
        self.deleted_programs.load(Ordering::SeqCst)
    }
}

/// Fake driver. Stages containing `BROKEN` fail to compile with a log that
/// points at line 2 of the first `#line` source id in the stage.
pub struct RecordingDriver {
    stats: Arc<DriverStats>,
    next_handle: AtomicU64,
}

impl RecordingDriver {
    pub fn new(stats: &Arc<DriverStats>) -> Self {
        Self {
            stats: Arc::clone(stats),
            next_handle: AtomicU64::new(1),
        }
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }
}

impl ShaderDriver for RecordingDriver {
    fn driver_id(&self) -> u32 {
        DRIVER_ID
    }

    fn compile_stage(&mut self, _stage: ShaderStage, source: &str) -> Result<StageHandle, String> {
        self.stats.stage_compiles.fetch_add(1, Ordering::SeqCst);
        source.clone_into(&mut self.stats.last_source.lock());
        if source.contains("BROKEN") {
            let id = first_source_id(source).unwrap_or(0);
            return Err(format!("ERROR: {id}(2): 'BROKEN' : undeclared identifier"));
        }
        Ok(StageHandle(self.handle()))
    }

    fn delete_stage(&mut self, _stage: StageHandle) {}

    fn link_program(&mut self, _stages: &[StageHandle]) -> Result<ProgramHandle, String> {
        self.stats.links.fetch_add(1, Ordering::SeqCst);
        Ok(ProgramHandle(self.handle()))
    }

    fn program_binary(&mut self, program: ProgramHandle) -> Option<ProgramBinary> {
        let mut bytes = BINARY_PREFIX.to_vec();
        bytes.extend_from_slice(&program.0.to_le_bytes());
        Some(ProgramBinary {
            format: BINARY_FORMAT,
            bytes,
        })
    }

    fn program_from_binary(&mut self, format: u32, bytes: &[u8]) -> Option<ProgramHandle> {
        if format != BINARY_FORMAT || !bytes.starts_with(BINARY_PREFIX) {
            return None;
        }
        self.stats.binary_loads.fetch_add(1, Ordering::SeqCst);
        Some(ProgramHandle(self.handle()))
    }

    fn reflect(&mut self, _program: ProgramHandle) -> Vec<ReflectedParam> {
        vec![
            ReflectedParam {
                name: "u_tint".into(),
                kind: ParamKind::Uniform,
                type_tag: 0x8B52,
            },
            ReflectedParam {
                name: "u_albedo".into(),
                kind: ParamKind::Texture,
                type_tag: 0x8B5E,
            },
            ReflectedParam {
                name: "Camera".into(),
                kind: ParamKind::UniformBlock,
                type_tag: 0,
            },
            ReflectedParam {
                name: "u_shadow".into(),
                kind: ParamKind::Sampler,
                type_tag: 0x8B62,
            },
        ]
    }

    fn delete_program(&mut self, _program: ProgramHandle) {
        self.stats.deleted_programs.fetch_add(1, Ordering::SeqCst);
    }
}

fn first_source_id(source: &str) -> Option<usize> {
    source
        .lines()
        .find_map(|line| line.strip_prefix("#line 1 "))
        .and_then(|id| id.trim().parse().ok())
}

/// Routes `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic settings: no worker threads, blocking loads, short waits.
pub fn test_settings() -> EngineSettings {
    init_logging();
    EngineSettings {
        worker_threads: 0,
        load_wait_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub fn cache_over(fs: &MemoryFileSystem, settings: EngineSettings) -> Arc<ResourceCache> {
    ResourceCache::new(Arc::new(fs.clone()), settings)
}

/// Fresh resource cache and shader library over `fs`, sharing `stats`.
pub fn library_over(
    fs: &MemoryFileSystem,
    stats: &Arc<DriverStats>,
) -> (Arc<ResourceCache>, ShaderLibrary) {
    let cache = cache_over(fs, test_settings());
    let library = ShaderLibrary::new(&cache, Box::new(RecordingDriver::new(stats)))
        .expect("shader sources registered once");
    (cache, library)
}
