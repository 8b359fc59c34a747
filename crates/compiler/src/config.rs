//! Compiler configuration.
//!
//! Options the driver threads through the pipeline instead of keeping
//! process-wide state.

use std::path::PathBuf;

/// How far the pipeline runs and what lands at the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Stop after emitting QBE SSA IR.
    Ssa,
    /// Stop after the IR assembler (`qbe`).
    Assembly,
    /// Stop after the native assembler (`as`).
    Object,
    /// Link an executable.
    #[default]
    Executable,
}

impl OutputFormat {
    /// Extension used for the default output path (empty for executables).
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Ssa => "ssa",
            OutputFormat::Assembly => "s",
            OutputFormat::Object => "o",
            OutputFormat::Executable => "",
        }
    }
}

/// Configuration for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Directories searched by `include` after the literal path, in order.
    pub include_dirs: Vec<PathBuf>,

    /// Extra object files or archives handed to the linker.
    pub link_inputs: Vec<PathBuf>,

    pub output_format: OutputFormat,

    /// Skip the bundled standard library: neither link its archive nor
    /// search its include directories.
    pub no_stdlib: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Add an include directory (builder pattern)
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Add a link input
    pub fn with_link_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.link_inputs.push(input.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn without_stdlib(mut self) -> Self {
        self.no_stdlib = true;
        self
    }
}
