//! Tack Compiler Library
//!
//! Provides compilation from .tack source to QBE SSA IR and, through the
//! external `qbe`, `as`, and `cc` tools, on to assembly, object files, and
//! executables.
//!
//! ```rust,ignore
//! use std::path::Path;
//! use tackc::{CompilerConfig, OutputFormat, compile_file};
//!
//! let config = CompilerConfig::new().with_output_format(OutputFormat::Ssa);
//! compile_file(Path::new("hello.tack"), Path::new("hello.ssa"), &config)?;
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod intrinsics;
pub mod lexer;
pub mod parser;
pub mod typechecker;
pub mod types;

pub use ast::Program;
pub use codegen::CodeGen;
pub use config::{CompilerConfig, OutputFormat};
pub use lexer::Lexer;
pub use parser::Parser;
pub use types::{Signature, Type, TypeStack};

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Compile source text to QBE SSA IR.
pub fn compile_to_ssa(
    source: &str,
    file: &Path,
    include_dirs: Vec<PathBuf>,
) -> Result<String, String> {
    let program = Parser::new(source, file, include_dirs).parse()?;
    CodeGen::new()
        .codegen_program(&program)
        .map_err(|e| e.to_string())
}

/// Default output path: the input with its suffix replaced per the format
/// (stripped entirely for executables).
pub fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    input.with_extension(format.extension())
}

/// Compile a .tack source file to `output` per the configured format.
pub fn compile_file(input: &Path, output: &Path, config: &CompilerConfig) -> Result<(), String> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("failed to read {}: {}", input.display(), e))?;

    let mut include_dirs = config.include_dirs.clone();
    if !config.no_stdlib {
        include_dirs.extend(stdlib_include_dirs());
    }

    let ssa = compile_to_ssa(&source, input, include_dirs)?;
    debug!("emitted {} bytes of SSA IR for {}", ssa.len(), input.display());

    if config.output_format == OutputFormat::Ssa {
        return fs::write(output, ssa)
            .map_err(|e| format!("failed to write {}: {}", output.display(), e));
    }

    let assembly = run_qbe(&ssa)?;
    debug!("qbe produced {} bytes of assembly", assembly.len());

    if config.output_format == OutputFormat::Assembly {
        return fs::write(output, assembly)
            .map_err(|e| format!("failed to write {}: {}", output.display(), e));
    }

    if config.output_format == OutputFormat::Object {
        return run_assembler(&assembly, output);
    }

    // Executable: assemble into a temporary object, then link. The
    // temporary is removed whether or not the linker succeeds.
    let object = std::env::temp_dir().join(format!("tack-{}.o", std::process::id()));
    run_assembler(&assembly, &object)?;
    let result = link(&object, output, config);
    fs::remove_file(&object).ok();
    result
}

fn run_qbe(ssa: &str) -> Result<Vec<u8>, String> {
    let mut cmd = Command::new("qbe");
    cmd.arg("-");
    run_tool(cmd, ssa.as_bytes(), "qbe")
}

fn run_assembler(assembly: &[u8], output: &Path) -> Result<(), String> {
    let mut cmd = Command::new("as");
    cmd.arg("-o").arg(output).arg("-");
    run_tool(cmd, assembly, "as").map(|_| ())
}

fn link(object: &Path, output: &Path, config: &CompilerConfig) -> Result<(), String> {
    let mut cmd = Command::new("cc");
    cmd.arg("-o").arg(output).arg(object);
    for input in &config.link_inputs {
        cmd.arg(input);
    }
    if !config.no_stdlib {
        match find_runtime_library() {
            Some(archive) => {
                cmd.arg(archive);
            }
            None => {
                return Err(
                    "libtack.a not found next to the compiler (pass -nostdlib to link without it)"
                        .to_string(),
                );
            }
        }
    }
    debug!("linking {}", output.display());
    let output = cmd
        .output()
        .map_err(|e| format!("failed to run cc: {}", e))?;
    if !output.status.success() {
        return Err(format!(
            "cc failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Run an external tool with `input` piped to stdin, returning its stdout.
/// A non-zero exit surfaces the captured stderr.
fn run_tool(mut cmd: Command, input: &[u8], what: &str) -> Result<Vec<u8>, String> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to run {}: {}", what, e))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| format!("failed to open stdin of {}", what))?;
    stdin
        .write_all(input)
        .map_err(|e| format!("failed to write to {}: {}", what, e))?;
    drop(stdin);

    let output = child
        .wait_with_output()
        .map_err(|e| format!("failed to wait for {}: {}", what, e))?;
    if !output.status.success() {
        return Err(format!(
            "{} failed:\n{}",
            what,
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(output.stdout)
}

/// Locate the bundled runtime archive: `libtack.a` next to the compiler
/// executable, then under its `lib/` directory.
pub fn find_runtime_library() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;
    [
        exe_dir.join("libtack.a"),
        exe_dir.join("lib").join("libtack.a"),
    ]
    .into_iter()
    .find(|candidate| candidate.is_file())
}

/// Include directories that ship with the compiler.
pub fn stdlib_include_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        dirs.push(exe_dir.join("lib").join("include"));
    }
    dirs.push(PathBuf::from("/usr/include"));
    dirs
}
