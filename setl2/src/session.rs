use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use compiler::{CompiledUnit, Compiler};
use library::{Library, LibraryError, UnitKind};
use log::LevelFilter;
use vm::Interpreter;

use crate::cli::{CommonArgs, RunCli};
use crate::error::DriverError;

/// Level of `-v N`: 0 silent, 1 errors, 2 progress, 3 and above debugging.
pub fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Maps `-v N` onto a default filter. `RUST_LOG` wins when set.
pub fn init_logging(verbose: u8) {
    let level = log_level(verbose).to_string();
    let env = env_logger::Env::default().default_filter_or(level);
    let initialized = env_logger::Builder::from_env(env).format_timestamp(None).try_init();
    if initialized.is_err() {
        log::debug!("logger already initialized");
    }
}

/// Opens the libraries named on the command line, then the search path.
///
/// With `writable` the first `--library` file receives compiled units and
/// is created on first use. Read-only files that do not exist are skipped,
/// so lookups fall through to the next library.
pub fn open_library(args: &CommonArgs, writable: bool) -> Result<Library, LibraryError> {
    let mut library = Library::new();
    library.set_safety_check(args.safety_check);
    for (i, path) in args.libraries.iter().enumerate() {
        let write = writable && i == 0;
        if !write && !path.exists() {
            log::warn!("library {} not found", path.display());
            continue;
        }
        library.add_lib_file(path, write)?;
    }
    if let Some(path) = &args.library_path {
        library.add_lib_path(path)?;
    }
    Ok(library)
}

fn compile_input(compiler: &mut Compiler, file: &Path) -> Result<Vec<CompiledUnit>, DriverError> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source).map_err(DriverError::Stdin)?;
        return Ok(compiler.compile_source(&source, "stdin")?);
    }
    Ok(compiler.compile_file(file)?)
}

/// Compiles `files` in order into the first library. Stops at the first
/// file that fails.
pub fn compile_files(
    args: &CommonArgs,
    files: &[PathBuf],
    report: Box<dyn Write>,
) -> Result<Vec<CompiledUnit>, DriverError> {
    let library = open_library(args, true)?;
    let mut compiler = Compiler::new(library, args.compiler_options()).with_report(report);
    let mut compiled = Vec::new();
    for file in files {
        let units = compile_input(&mut compiler, file)?;
        for unit in &units {
            log::info!("stored {} `{}`", unit.kind, unit.name);
        }
        compiled.extend(units);
    }
    Ok(compiled)
}

fn is_source_file(program: &str) -> bool {
    let path = Path::new(program);
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("stl")) && path.is_file()
}

/// Runs a program unit. A `.stl` file is compiled into a scratch library
/// under the temp path first and its last program is run; the scratch
/// library is removed afterwards.
pub fn run_program(cli: &RunCli, out: Box<dyn Write>) -> Result<(), DriverError> {
    let mut library = open_library(&cli.common, false)?;
    let mut scratch = None;
    let program = if is_source_file(&cli.program) {
        let temp = cli.common.temp_dir();
        let dir = tempfile::Builder::new()
            .prefix("setl2-")
            .tempdir_in(&temp)
            .map_err(|source| DriverError::Scratch { path: temp, source })?;
        library.add_lib_file(dir.path().join("scratch.lib"), true)?;
        let mut compiler = Compiler::new(library, cli.common.compiler_options());
        let units = compiler.compile_file(Path::new(&cli.program))?;
        library = compiler.into_library();
        scratch = Some(dir);
        units
            .iter()
            .rev()
            .find(|unit| unit.kind == UnitKind::Program)
            .map(|unit| unit.name.clone())
            .ok_or_else(|| DriverError::NoProgram(cli.program.clone()))?
    } else {
        cli.program.clone()
    };

    let mut interp = Interpreter::new(library, cli.interpreter_options()).with_output(out);
    let result = interp.run(&program);
    drop(interp);
    if let Some(dir) = scratch {
        log::debug!("removing scratch library {}", dir.path().display());
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(log_level(0), LevelFilter::Off);
        assert_eq!(log_level(1), LevelFilter::Error);
        assert_eq!(log_level(2), LevelFilter::Info);
        assert_eq!(log_level(3), LevelFilter::Debug);
        assert_eq!(log_level(9), LevelFilter::Debug);
    }
}
