//! Shader System Tests
//!
//! Tests for:
//! - Include expansion through ShaderSource: markers, checksums, cycles, missing files
//! - Validity of sources settled at load time, including reloads of unchanged text
//! - Variant deduplication by defines content and shader kind
//! - Compilation: stage assembly, reflection slots, diagnostics, graphics-thread check
//! - Invalidation of includers and their shaders, recompilation after reloads
//! - Diamond include graphs, edits landing while a compile is running
//! - Eviction of sources and release of retired programs

mod common;

use std::sync::Arc;

use kiln::{
    MemoryFileSystem, ProgramBinary, ProgramHandle, ReflectedParam, ResourceCache, ShaderDefines,
    ShaderDriver, ShaderError, ShaderKind, ShaderLibrary, ShaderStage, StageHandle,
};

use common::{DriverStats, RecordingDriver, cache_over, library_over, test_settings};

const MAIN: &str = "#include \"common.glsl\"\nvoid main() { gl_Position = tint(); }\n";
const COMMON: &str = "vec4 tint() { return vec4(1.0); }\n";

fn fixture() -> MemoryFileSystem {
    let fs = MemoryFileSystem::new();
    fs.insert("shaders/main.glsl", MAIN);
    fs.insert("shaders/common.glsl", COMMON);
    fs
}

// ============================================================================
// Processing
// ============================================================================

#[test]
fn source_without_includes_gets_one_marker() {
    let fs = MemoryFileSystem::new();
    fs.insert("plain.glsl", COMMON);
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let source = library.load_source("plain.glsl");
    assert!(source.is_valid());
    let processed = source.process(&cache).expect("plain source processes");

    assert_eq!(
        &*processed.text,
        format!("#line 1 {}\n{COMMON}", source.source_id())
    );
    assert_eq!(processed.text.matches("#line").count(), 1);
    assert!(processed.text.ends_with(COMMON));
    assert_eq!(source.checksum(), Some(processed.checksum));
}

#[test]
fn checksums_do_not_depend_on_load_order() {
    let fs = fixture();
    fs.insert("other.glsl", COMMON);
    let stats = Arc::new(DriverStats::default());

    let (_first_cache, first) = library_over(&fs, &stats);
    let main_first = first.load_source("shaders/main.glsl");

    let (_second_cache, second) = library_over(&fs, &stats);
    let _other = second.load_source("other.glsl");
    let main_second = second.load_source("shaders/main.glsl");

    assert_ne!(main_first.source_id(), main_second.source_id());
    assert_ne!(main_first.processed(), main_second.processed());
    assert!(main_first.checksum().is_some());
    assert_eq!(main_first.checksum(), main_second.checksum());
}

#[test]
fn includes_resolve_next_to_the_including_file() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let main = library.load_source("shaders/main.glsl");
    let processed = main.process(&cache).expect("main processes");
    let common = library
        .sources()
        .get("shaders/common.glsl")
        .expect("include was loaded as a resource");

    assert!(processed.text.contains(COMMON));
    assert!(processed.text.contains(&format!("#line 2 {}", main.source_id())));
    assert_eq!(main.include_names(), vec!["shaders/common.glsl".to_string()]);
    assert_eq!(common.dependent_names(), vec!["shaders/main.glsl".to_string()]);
}

fn mutual_fixture() -> MemoryFileSystem {
    let fs = MemoryFileSystem::new();
    fs.insert("a.glsl", "#include \"b.glsl\"\nfloat a;\n");
    fs.insert("b.glsl", "#include \"a.glsl\"\nfloat b;\n");
    fs
}

#[test]
fn mutual_includes_are_invalid_once_loaded() {
    let fs = mutual_fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let a = library.load_source("a.glsl");
    let b = library.sources().get("b.glsl").expect("b was loaded");
    assert!(!a.touch(&cache, true));
    assert!(!b.touch(&cache, true));
    assert!(!a.is_valid());
    assert!(!b.is_valid());
    assert!(a.log().contains("Cyclic include"), "{}", a.log());
    assert!(b.log().contains("Cyclic include"), "{}", b.log());

    let err = a.process(&cache).unwrap_err();
    assert!(matches!(err, ShaderError::CyclicInclude { .. }), "{err}");
    let err = b.process(&cache).unwrap_err();
    assert!(matches!(err, ShaderError::CyclicInclude { .. }), "{err}");

    let events = cache.drain_events();
    assert!(events.iter().any(|e| e.name == "a.glsl" && !e.valid));
}

#[test]
fn reloading_unchanged_cyclic_sources_keeps_them_invalid() {
    let fs = mutual_fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let a = library.load_source("a.glsl");
    let b = library.sources().get("b.glsl").expect("b was loaded");

    fs.touch("a.glsl");
    fs.touch("b.glsl");
    assert_eq!(cache.reload_resources(true), 2);
    assert!(!a.touch(&cache, true));
    assert!(!b.touch(&cache, true));
    assert!(a.log().contains("Cyclic include"), "{}", a.log());
    assert!(b.log().contains("Cyclic include"), "{}", b.log());

    fs.insert("b.glsl", "float b;\n");
    cache.reload_resources(true);
    assert!(b.is_valid());
    assert!(a.process(&cache).is_ok());
    assert!(a.is_valid());
}

#[test]
fn self_include_is_cyclic() {
    let fs = MemoryFileSystem::new();
    fs.insert("self.glsl", "#include \"self.glsl\"\n");
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let source = library.load_source("self.glsl");
    assert!(!source.is_valid());
    assert!(matches!(
        source.process(&cache),
        Err(ShaderError::CyclicInclude { .. })
    ));
}

#[test]
fn missing_include_recovers_once_the_file_appears() {
    let fs = MemoryFileSystem::new();
    fs.insert("main.glsl", "#include \"late.glsl\"\nvoid main() {}\n");
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let main = library.load_source("main.glsl");
    let err = main.process(&cache).unwrap_err();
    assert!(matches!(err, ShaderError::Include { .. }), "{err}");
    assert!(err.to_string().contains("File not found: late.glsl"));

    fs.insert("late.glsl", "float late;\n");
    cache.reload_resources(true);
    assert!(!main.is_processed());

    let processed = main.process(&cache).expect("include now resolves");
    assert!(processed.text.contains("float late;"));
    assert!(main.is_valid());
}

#[test]
fn missing_include_next_to_the_includer_is_watched_too() {
    let fs = MemoryFileSystem::new();
    fs.insert("shaders/main.glsl", "#include \"late.glsl\"\nvoid main() {}\n");
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let main = library.load_source("shaders/main.glsl");
    assert!(!main.is_valid());
    assert_eq!(
        main.include_names(),
        vec!["late.glsl".to_string(), "shaders/late.glsl".to_string()]
    );
    assert_eq!(cache.remove_unused_resources(), 0);

    fs.insert("shaders/late.glsl", "float late;\n");
    assert_eq!(cache.reload_resources(true), 1);
    assert!(!main.is_processed());

    let processed = main.process(&cache).expect("sibling include now resolves");
    assert!(processed.text.contains("float late;"));
    assert!(main.is_valid());
    assert_eq!(main.include_names(), vec!["shaders/late.glsl".to_string()]);
}

#[test]
fn parse_errors_report_file_and_line() {
    let fs = MemoryFileSystem::new();
    fs.insert("bad.glsl", "float x;\n#include common.glsl\n");
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let source = library.load_source("bad.glsl");
    let err = source.process(&cache).unwrap_err();
    assert_eq!(
        err,
        ShaderError::Parse {
            file: "bad.glsl".into(),
            line: 2,
            message: "expected a quoted file name after #include".into(),
        }
    );
}

// ============================================================================
// Variants
// ============================================================================

#[test]
fn defines_order_does_not_create_new_variants() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (_cache, library) = library_over(&fs, &stats);

    let xy = ShaderDefines::from_pairs([("X", "1"), ("Y", "2")]);
    let yx = ShaderDefines::from_pairs([("Y", "2"), ("X", "1")]);

    let (source, first) = library.shader("shaders/main.glsl", ShaderKind::Render, &xy);
    let (_, second) = library.shader("shaders/main.glsl", ShaderKind::Render, &yx);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.defs_id(), second.defs_id());
    assert_eq!(first.uid(), second.uid());

    let (_, compute) = library.shader("shaders/main.glsl", ShaderKind::Compute, &xy);
    assert!(!Arc::ptr_eq(&first, &compute));
    assert_ne!(first.uid(), compute.uid());
    assert_eq!(source.instances().len(), 2);
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn compile_assembles_stages_and_assigns_slots() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (_cache, library) = library_over(&fs, &stats);

    let defines = ShaderDefines::from_pairs([("FOG", "1")]);
    let (_source, shader) = library.shader("shaders/main.glsl", ShaderKind::Render, &defines);
    assert!(!shader.is_compiled());
    assert!(library.compile(&shader));
    assert!(shader.is_valid());
    assert!(shader.program().is_some());
    assert!(!shader.is_from_binary_cache());
    assert_eq!(stats.stage_compiles(), 2);

    let fragment = stats.last_source.lock().clone();
    assert!(fragment.starts_with("#version 330 core\n#define FRAGMENT_SHADER\n#define FOG 1\n"));
    assert!(fragment.contains(COMMON));

    assert_eq!(shader.param("u_tint").and_then(|p| p.slot), None);
    assert_eq!(shader.param("u_albedo").and_then(|p| p.slot), Some(0));
    assert_eq!(shader.param("u_shadow").and_then(|p| p.slot), Some(1));
    assert_eq!(shader.param("Camera").and_then(|p| p.slot), Some(0));
    assert!(shader.param("missing").is_none());

    assert!(library.compile(&shader));
    assert_eq!(stats.stage_compiles(), 2);
}

#[test]
fn compile_errors_name_the_failing_file() {
    let fs = MemoryFileSystem::new();
    fs.insert("shaders/broken.glsl", "void main() {\n  BROKEN;\n}\n");
    let stats = Arc::new(DriverStats::default());
    let (_cache, library) = library_over(&fs, &stats);

    let (_source, shader) =
        library.shader("shaders/broken.glsl", ShaderKind::Render, &ShaderDefines::new());
    assert!(!library.compile(&shader));
    assert!(shader.is_compiled());
    assert!(!shader.is_valid());
    assert!(shader.log().contains("shaders/broken.glsl(2)"), "{}", shader.log());

    // Failures stick until the source changes
    let compiles = stats.stage_compiles();
    assert!(!library.compile(&shader));
    assert_eq!(stats.stage_compiles(), compiles);
}

#[test]
fn compile_off_the_graphics_thread_is_refused() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (_cache, library) = library_over(&fs, &stats);
    let (_source, shader) =
        library.shader("shaders/main.glsl", ShaderKind::Render, &ShaderDefines::new());

    std::thread::scope(|scope| {
        let compiled = scope
            .spawn(|| library.compile(&shader))
            .join()
            .expect("compile thread");
        assert!(!compiled);
    });
    assert!(!shader.is_compiled());
    assert!(shader.log().contains("graphics thread"));
    assert_eq!(stats.stage_compiles(), 0);

    assert!(library.compile(&shader));
}

#[test]
fn library_registers_shader_sources_once() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, _library) = library_over(&fs, &stats);

    let second = kiln::ShaderLibrary::new(&cache, Box::new(common::RecordingDriver::new(&stats)));
    assert!(second.is_err());
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn invalidating_an_include_flags_includers_and_shaders() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (_cache, library) = library_over(&fs, &stats);

    let (main, plain) =
        library.shader("shaders/main.glsl", ShaderKind::Render, &ShaderDefines::new());
    let (_, fog) = library.shader(
        "shaders/main.glsl",
        ShaderKind::Render,
        &ShaderDefines::from_pairs([("FOG", "1")]),
    );
    assert!(library.compile(&plain));
    assert!(library.compile(&fog));
    assert!(main.is_processed());

    let common = library
        .sources()
        .get("shaders/common.glsl")
        .expect("include loaded");
    assert_eq!(common.invalidate(), 2);
    assert_eq!(common.invalidate(), 0);

    assert!(!main.is_processed());
    assert!(!common.is_processed());
    assert!(!plain.is_compiled());
    assert!(!fog.is_compiled());
    assert_eq!(library.context().pending_shader_count(), 2);

    assert_eq!(library.recompile_invalidated(), 2);
    assert!(main.is_processed());
    assert!(plain.is_valid());
    assert!(fog.is_valid());
    assert_eq!(library.recompile_invalidated(), 0);
}

#[test]
fn edited_include_recompiles_after_reload() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let (main, shader) =
        library.shader("shaders/main.glsl", ShaderKind::Render, &ShaderDefines::new());
    assert!(library.compile(&shader));
    let old_checksum = main.checksum().expect("processed");

    fs.insert("shaders/common.glsl", "vec4 tint() { return vec4(0.5); }\n");
    assert_eq!(cache.reload_resources(true), 1);
    assert!(!shader.is_compiled());

    assert_eq!(library.recompile_invalidated(), 1);
    assert!(shader.is_valid());
    assert!(!shader.is_from_binary_cache());
    assert_eq!(stats.stage_compiles(), 4);

    let new_checksum = main.checksum().expect("reprocessed");
    assert_ne!(old_checksum, new_checksum);
    let cached = |checksum| {
        library
            .binary_cache()
            .get(shader.uid(), library.binary_checksum(checksum))
    };
    assert!(cached(old_checksum).is_none());
    assert!(cached(new_checksum).is_some());
    assert_eq!(library.binary_cache().len(), 1);
}

#[test]
fn diamond_includes_are_invalidated_once() {
    let fs = MemoryFileSystem::new();
    fs.insert("a.glsl", "#include \"b.glsl\"\n#include \"c.glsl\"\nvoid main() {}\n");
    fs.insert("b.glsl", "#include \"d.glsl\"\nfloat b;\n");
    fs.insert("c.glsl", "#include \"d.glsl\"\nfloat c;\n");
    fs.insert("d.glsl", "float d = 1.0;\n");
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let (a, plain) = library.shader("a.glsl", ShaderKind::Render, &ShaderDefines::new());
    let (_, fog) = library.shader(
        "a.glsl",
        ShaderKind::Render,
        &ShaderDefines::from_pairs([("FOG", "1")]),
    );
    assert!(a.is_valid());
    assert!(library.compile(&plain));
    assert!(library.compile(&fog));
    assert_eq!(stats.stage_compiles(), 4);

    fs.insert("d.glsl", "float d = 2.0;\n");
    assert_eq!(cache.reload_resources(true), 1);
    assert_eq!(library.context().dirty_source_count(), 4);
    assert_eq!(library.context().pending_shader_count(), 2);

    assert_eq!(library.recompile_invalidated(), 2);
    assert_eq!(stats.stage_compiles(), 8);
    let processed = a.processed().expect("reprocessed");
    assert_eq!(processed.text.matches("float d = 2.0;").count(), 2);
    assert_eq!(library.context().dirty_source_count(), 0);
    assert_eq!(library.recompile_invalidated(), 0);
}

/// Edits a file and runs a reload scan from inside the first stage compile,
/// the way a loader thread can while the graphics thread is compiling.
struct EditingDriver {
    inner: RecordingDriver,
    fs: MemoryFileSystem,
    cache: Arc<ResourceCache>,
    edit: Option<(&'static str, &'static str)>,
}

impl ShaderDriver for EditingDriver {
    fn driver_id(&self) -> u32 {
        self.inner.driver_id()
    }

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageHandle, String> {
        if let Some((name, text)) = self.edit.take() {
            self.fs.insert(name, text);
            self.cache.reload_resources(true);
        }
        self.inner.compile_stage(stage, source)
    }

    fn delete_stage(&mut self, stage: StageHandle) {
        self.inner.delete_stage(stage);
    }

    fn link_program(&mut self, stages: &[StageHandle]) -> Result<ProgramHandle, String> {
        self.inner.link_program(stages)
    }

    fn program_binary(&mut self, program: ProgramHandle) -> Option<ProgramBinary> {
        self.inner.program_binary(program)
    }

    fn program_from_binary(&mut self, format: u32, bytes: &[u8]) -> Option<ProgramHandle> {
        self.inner.program_from_binary(format, bytes)
    }

    fn reflect(&mut self, program: ProgramHandle) -> Vec<ReflectedParam> {
        self.inner.reflect(program)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.inner.delete_program(program);
    }
}

#[test]
fn edit_during_compile_is_not_lost() {
    const EDITED: &str = "vec4 tint() { return vec4(0.5); }\n";
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let cache = cache_over(&fs, test_settings());
    let driver = EditingDriver {
        inner: RecordingDriver::new(&stats),
        fs: fs.clone(),
        cache: Arc::clone(&cache),
        edit: Some(("shaders/common.glsl", EDITED)),
    };
    let library = ShaderLibrary::new(&cache, Box::new(driver)).expect("library");

    let (main, shader) =
        library.shader("shaders/main.glsl", ShaderKind::Render, &ShaderDefines::new());
    assert!(library.compile(&shader));
    assert!(shader.is_valid());
    assert!(!shader.is_compiled());
    assert!(!main.is_processed());
    assert!(!stats.last_source.lock().contains(EDITED));

    assert_eq!(library.recompile_invalidated(), 1);
    assert!(shader.is_compiled());
    assert!(shader.is_valid());
    assert!(stats.last_source.lock().contains(EDITED));
    assert_eq!(library.recompile_invalidated(), 0);
}

#[test]
fn reload_with_unchanged_text_keeps_shaders() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let (_main, shader) =
        library.shader("shaders/main.glsl", ShaderKind::Render, &ShaderDefines::new());
    assert!(library.compile(&shader));

    fs.touch("shaders/common.glsl");
    assert_eq!(cache.reload_resources(true), 1);
    assert!(shader.is_compiled());
    assert_eq!(library.recompile_invalidated(), 0);
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn evicting_a_source_releases_its_includes_and_programs() {
    let fs = fixture();
    let stats = Arc::new(DriverStats::default());
    let (cache, library) = library_over(&fs, &stats);

    let (main, shader) =
        library.shader("shaders/main.glsl", ShaderKind::Render, &ShaderDefines::new());
    assert!(library.compile(&shader));
    assert_eq!(library.context().with_graph(kiln::shader::DependencyGraph::len), 2);

    drop(main);
    assert_eq!(cache.remove_unused_resources(), 2);
    assert!(library.sources().is_empty());
    assert!(shader.source().is_none());
    assert_eq!(library.context().with_graph(kiln::shader::DependencyGraph::len), 0);

    drop(shader);
    assert_eq!(library.release_retired_programs(), 1);
    assert_eq!(stats.deleted_programs(), 1);
}
