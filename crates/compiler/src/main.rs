//! Tack Compiler CLI
//!
//! Command-line interface for compiling .tack programs to QBE SSA IR,
//! assembly, object files, or executables.

use clap::{CommandFactory, Parser as ClapParser};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

use tackc::{CompilerConfig, OutputFormat};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "tack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tack compiler - compile .tack programs to executables", long_about = None)]
struct Cli {
    /// Input .tack source file
    input: Option<PathBuf>,

    /// Output path (defaults to the input path with its suffix replaced)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after an intermediate stage: `-cssa` emits QBE SSA IR, `-cs`
    /// emits assembly, bare `-c` emits an object file
    #[arg(
        short = 'c',
        value_name = "STAGE",
        num_args = 0..=1,
        default_missing_value = "o",
        value_parser = ["ssa", "s", "o"],
    )]
    stage: Option<String>,

    /// Extra object files or archives for the linker
    #[arg(short = 'l', value_name = "FILE")]
    link: Vec<PathBuf>,

    /// Do not link the standard library or search its include path
    /// (spelled `-nostdlib`, cc-style; `--nostdlib` also works)
    #[arg(long)]
    nostdlib: bool,

    /// Extra include directories, searched in order
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// clap cannot express cc-style single-dash word flags, so the documented
/// spelling `-nostdlib` is rewritten to `--nostdlib` before parsing. Left
/// as a short cluster it would parse as `-n -o stdlib ...`.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            if arg == "-nostdlib" {
                OsString::from("--nostdlib")
            } else {
                arg
            }
        })
        .collect()
}

fn main() {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(input) = cli.input else {
        print_help_and_exit();
    };
    if !input.is_file() {
        eprintln!("Error: {} is not a readable file\n", input.display());
        print_help_and_exit();
    }

    let format = match cli.stage.as_deref() {
        Some("ssa") => OutputFormat::Ssa,
        Some("s") => OutputFormat::Assembly,
        Some(_) => OutputFormat::Object,
        None => OutputFormat::Executable,
    };

    let mut config = CompilerConfig::new().with_output_format(format);
    config.include_dirs = cli.include;
    config.link_inputs = cli.link;
    config.no_stdlib = cli.nostdlib;

    let output = cli
        .output
        .unwrap_or_else(|| tackc::default_output_path(&input, format));

    if let Err(e) = tackc::compile_file(&input, &output, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn print_help_and_exit() -> ! {
    Cli::command().print_help().ok();
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_cli(args: &[&str]) -> Cli {
        let args = normalize_args(args.iter().map(|arg| OsString::from(*arg)));
        Cli::try_parse_from(args).expect("cli parse error")
    }

    #[test]
    fn test_single_dash_nostdlib_accepted() {
        let cli = parse_cli(&["tack", "-nostdlib", "in.tack"]);
        assert!(cli.nostdlib);
        assert_eq!(cli.input, Some(PathBuf::from("in.tack")));
    }

    #[test]
    fn test_double_dash_nostdlib_accepted() {
        let cli = parse_cli(&["tack", "--nostdlib", "in.tack"]);
        assert!(cli.nostdlib);
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(parse_cli(&["tack", "in.tack"]).stage, None);
        assert_eq!(
            parse_cli(&["tack", "-cssa", "in.tack"]).stage.as_deref(),
            Some("ssa")
        );
        assert_eq!(
            parse_cli(&["tack", "-cs", "in.tack"]).stage.as_deref(),
            Some("s")
        );
        assert_eq!(
            parse_cli(&["tack", "-c", "in.tack"]).stage.as_deref(),
            Some("o")
        );
    }

    #[test]
    fn test_link_and_include_flags_attach() {
        let cli = parse_cli(&["tack", "-lfoo.o", "-l", "bar.o", "-Ilib", "in.tack"]);
        assert_eq!(
            cli.link,
            vec![PathBuf::from("foo.o"), PathBuf::from("bar.o")]
        );
        assert_eq!(cli.include, vec![PathBuf::from("lib")]);
    }
}
