//! The Funxy CLI.
//!
//! `funxyc run <path>` executes a source file, package directory, or
//! compiled `.fbc` bundle. `--backend` selects the tree-walk evaluator or
//! the bytecode VM; `--emit` writes a bundle instead of running it.
//!
//! Exit codes: 0 success, 1 user-facing error (parse/analysis/runtime),
//! 2 internal error. Diagnostics go to stderr, program output to stdout.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use funxy_common::Severity;
use funxyc::pipeline::{self, BackendKind, PipelineError};

#[derive(Parser)]
#[command(name = "funxyc", version, about = "The Funxy compiler and runner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to run when no subcommand is given (stdin when omitted).
    path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Vm)]
    backend: Backend,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file, package directory, or compiled bundle.
    Run {
        /// Path to the program (stdin when omitted).
        path: Option<PathBuf>,

        /// Execution backend.
        #[arg(long, value_enum, default_value_t = Backend::Vm)]
        backend: Backend,
    },
    /// Compile a program to a `.fbc` bundle.
    Build {
        path: PathBuf,

        /// Output path for the bundle.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Tree,
    Vm,
}

impl From<Backend> for BackendKind {
    fn from(value: Backend) -> BackendKind {
        match value {
            Backend::Tree => BackendKind::Tree,
            Backend::Vm => BackendKind::Vm,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run { path, backend }) => run(path, backend.into()),
        Some(Commands::Build { path, output }) => build(path, output),
        None => run(cli.path, cli.backend.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::User) => ExitCode::from(1),
        Err(CliError::Internal(message)) => {
            eprintln!("internal error: {message}");
            ExitCode::from(2)
        }
    }
}

enum CliError {
    /// Already reported to stderr.
    User,
    Internal(String),
}

fn run(path: Option<PathBuf>, backend: BackendKind) -> Result<(), CliError> {
    let path = match path {
        Some(path) => path,
        None => stdin_to_temp_file()?,
    };

    // Compiled bundles run directly.
    if funxy_loader::discovery::is_bytecode_file(&path) {
        let bytes = std::fs::read(&path).map_err(|e| {
            eprintln!("error: cannot read {}: {e}", path.display());
            CliError::User
        })?;
        let bundle = funxy_codegen::deserialize_bundle(&bytes).map_err(|e| {
            eprintln!("error: {e}");
            CliError::User
        })?;
        return finish(pipeline::run_bundle(&bundle));
    }

    finish(pipeline::run_file(&path, backend))
}

fn build(path: PathBuf, output: Option<PathBuf>) -> Result<(), CliError> {
    let bundle = match pipeline::compile_source(&path) {
        Ok(bundle) => bundle,
        Err(e) => return finish::<funxy_runtime::Value>(Err(e)).map(|_| ()),
    };
    let bytes = funxy_codegen::serialize_bundle(&bundle)
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let out = output.unwrap_or_else(|| path.with_extension("fbc"));
    std::fs::write(&out, bytes).map_err(|e| {
        eprintln!("error: cannot write {}: {e}", out.display());
        CliError::User
    })?;
    eprintln!("  wrote {}", out.display());
    Ok(())
}

/// Report a pipeline result: diagnostics to stderr, success silently.
fn finish<T>(result: Result<T, PipelineError>) -> Result<(), CliError> {
    match result {
        Ok(_) => Ok(()),
        Err(PipelineError::Diagnostics(diags)) => {
            for diag in &diags {
                eprintln!("{}", diag.render_plain());
            }
            let errors = diags.iter().filter(|d| d.severity == Severity::Error).count();
            log::debug!("{errors} error(s) reported");
            Err(CliError::User)
        }
        Err(PipelineError::Runtime(e)) => {
            if e.line > 0 {
                eprintln!("runtime error: [{}] {} (line {})", e.code, e.message, e.line);
            } else {
                eprintln!("runtime error: [{}] {}", e.code, e.message);
            }
            Err(CliError::User)
        }
        Err(PipelineError::Internal(message)) => Err(CliError::Internal(message)),
        Err(other) => {
            eprintln!("error: {other}");
            Err(CliError::User)
        }
    }
}

/// Source from stdin lands in a temp file so the loader has a directory
/// to resolve relative imports against.
fn stdin_to_temp_file() -> Result<PathBuf, CliError> {
    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let path = std::env::temp_dir().join(format!("funxy-stdin-{}.fx", std::process::id()));
    std::fs::write(&path, source).map_err(|e| CliError::Internal(e.to_string()))?;
    Ok(path)
}
