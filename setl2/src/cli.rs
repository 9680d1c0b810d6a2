use std::path::PathBuf;

use clap::{Args, Parser};
use compiler::{CompilerOptions, DebugFlags};
use vm::InterpreterOptions;

use crate::DEFAULT_LIBRARY;

fn parse_debug_flag(name: &str) -> Result<DebugFlags, String> {
    DebugFlags::parse_name(name).ok_or_else(|| {
        let known: Vec<&str> = DebugFlags::NAMES.iter().map(|(n, _)| *n).collect();
        format!("unknown debug option `{name}`, expected one of {}", known.join(", "))
    })
}

/// Options understood by both tools.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Library files, comma separated. `setl2c` stores compiled units in the first one.
    #[arg(
        short = 'l',
        long = "library",
        env = "SETL2_LIB",
        value_delimiter = ',',
        default_value = DEFAULT_LIBRARY,
        value_name = "FILE"
    )]
    pub libraries: Vec<PathBuf>,

    /// Colon separated library files or directories searched after `--library`.
    #[arg(short = 'p', long = "library-path", env = "SETL2_LIBPATH", value_name = "PATH")]
    pub library_path: Option<String>,

    /// Directory for scratch libraries.
    #[arg(long = "temp-path", env = "SETL2_TEMP", value_name = "DIR")]
    pub temp_path: Option<PathBuf>,

    /// 0 silent, 1 errors, 2 progress, 3 and above debugging.
    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 0)]
    pub verbose: u8,

    /// Refuse to replace a library unit with one of another kind.
    #[arg(long = "safety-check")]
    pub safety_check: bool,

    /// List failing units with their diagnostics under the offending lines.
    #[arg(long)]
    pub markup: bool,

    /// Print a numbered listing of every source file.
    #[arg(long)]
    pub listing: bool,

    #[arg(long = "tab-width", value_name = "N", default_value_t = 8)]
    pub tab_width: usize,

    /// Tables to dump: ast, quads, symtab, code, lex, profiler, dump, alloc.
    #[arg(long = "debug", value_name = "OPTION", value_parser = parse_debug_flag)]
    pub debug: Vec<DebugFlags>,
}

impl CommonArgs {
    pub fn debug_flags(&self) -> DebugFlags {
        self.debug.iter().fold(DebugFlags::empty(), |all, flag| all | *flag)
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            listing: self.listing,
            markup: self.markup,
            tab_width: self.tab_width,
            safety_check: self.safety_check,
            debug: self.debug_flags(),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_path.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// `setl2c`: compile source files into a library.
#[derive(Parser, Debug)]
#[command(name = "setl2c", author, version, about, long_about = None)]
pub struct CompileCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source files; `-` reads standard input.
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

/// `setl2`: run a compiled program.
#[derive(Parser, Debug)]
#[command(name = "setl2", author, version, about, long_about = None)]
pub struct RunCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Opcodes a process runs before another one gets the processor.
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub slice: u32,

    /// Program unit to run, or a `.stl` file compiled into a scratch library first.
    #[arg(value_name = "PROGRAM")]
    pub program: String,

    /// Handed to the program as `command_line`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

impl RunCli {
    pub fn interpreter_options(&self) -> InterpreterOptions {
        let debug = self.common.debug_flags();
        InterpreterOptions {
            slice: self.slice.max(1),
            command_line: self.args.clone(),
            dump: debug.contains(DebugFlags::DUMP),
            profile: debug.contains(DebugFlags::PROFILER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libraries_split_on_commas() {
        let argv = ["setl2c", "-l", "a.lib,b.lib", "-v", "2", "x.stl"];
        let cli = CompileCli::try_parse_from(argv).unwrap();
        assert_eq!(cli.common.libraries, vec![PathBuf::from("a.lib"), PathBuf::from("b.lib")]);
        assert_eq!(cli.common.verbose, 2);
        assert_eq!(cli.files, vec![PathBuf::from("x.stl")]);
    }

    #[test]
    fn debug_options_combine() {
        let argv = ["setl2c", "--debug", "quads", "--debug", "CODE", "x.stl"];
        let cli = CompileCli::try_parse_from(argv).unwrap();
        assert_eq!(cli.common.debug_flags(), DebugFlags::QUADS | DebugFlags::CODE);
        assert!(CompileCli::try_parse_from(["setl2c", "--debug", "colors", "x.stl"]).is_err());
    }

    #[test]
    fn trailing_arguments_reach_the_program() {
        let argv = ["setl2", "--slice", "50", "--debug", "profiler", "main", "-x", "two"];
        let cli = RunCli::try_parse_from(argv).unwrap();
        let options = cli.interpreter_options();
        assert_eq!(cli.program, "main");
        assert_eq!(options.command_line, vec!["-x".to_string(), "two".to_string()]);
        assert_eq!(options.slice, 50);
        assert!(options.profile && !options.dump);
    }

    #[test]
    fn compiler_options_follow_the_flags() {
        let argv = ["setl2c", "--listing", "--tab-width", "4", "--safety-check", "x.stl"];
        let cli = CompileCli::try_parse_from(argv).unwrap();
        let options = cli.common.compiler_options();
        assert!(options.listing && options.safety_check && !options.markup);
        assert_eq!(options.tab_width, 4);
    }
}
