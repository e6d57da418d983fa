//! Graphics API entry points used by shader compilation.
//!
//! The engine never talks to a graphics API directly. A [`ShaderDriver`]
//! wraps the handful of calls compilation needs. Every method is invoked on
//! the graphics thread only.

/// Pipeline stage of a compiled shader object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Macro defined in front of the source of this stage.
    #[must_use]
    pub const fn define(self) -> &'static str {
        match self {
            Self::Vertex => "VERTEX_SHADER",
            Self::Fragment => "FRAGMENT_SHADER",
            Self::Compute => "COMPUTE_SHADER",
        }
    }
}

/// Driver handle of one compiled stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageHandle(pub u64);

/// Driver handle of a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Serialized program as returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinary {
    pub format: u32,
    pub bytes: Vec<u8>,
}

/// Category of a reflected program parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Plain uniform value.
    Uniform,
    Texture,
    Sampler,
    UniformBlock,
}

impl ParamKind {
    /// Whether parameters of this kind are bound through a numbered slot.
    #[must_use]
    pub const fn has_slot(self) -> bool {
        !matches!(self, Self::Uniform)
    }
}

/// Parameter as reported by the driver, in reflection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedParam {
    pub name: String,
    pub kind: ParamKind,
    /// Driver specific type tag (e.g. a GL type enum).
    pub type_tag: u32,
}

pub trait ShaderDriver: Send {
    /// Identifies the driver build. Binary caches from another id are discarded.
    fn driver_id(&self) -> u32;

    /// Compiles one stage. On failure returns the driver log.
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageHandle, String>;

    /// Releases a compiled stage that will not be linked.
    fn delete_stage(&mut self, stage: StageHandle);

    /// Links compiled stages into a program. Stage objects are consumed.
    fn link_program(&mut self, stages: &[StageHandle]) -> Result<ProgramHandle, String>;

    /// Serialized form of a linked program, if the driver supports it.
    fn program_binary(&mut self, program: ProgramHandle) -> Option<ProgramBinary>;

    /// Recreates a program from a serialized form. `None` when the driver
    /// rejects the blob.
    fn program_from_binary(&mut self, format: u32, bytes: &[u8]) -> Option<ProgramHandle>;

    /// Active parameters of a linked program.
    fn reflect(&mut self, program: ProgramHandle) -> Vec<ReflectedParam>;

    fn delete_program(&mut self, program: ProgramHandle);
}
