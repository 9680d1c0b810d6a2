//! Command line driver for the SETL2 tools.
//!
//! `setl2c` compiles source files into a library; `setl2` loads a program
//! from the libraries and runs it. Both read the same options and
//! environment variables, see [`CommonArgs`].

pub mod cli;
pub mod error;
pub mod session;

pub use cli::{CommonArgs, CompileCli, RunCli};
pub use error::DriverError;
pub use session::{compile_files, init_logging, log_level, open_library, run_program};

pub const SUCCESS_EXIT: i32 = 0;
pub const COMPILE_ERROR_EXIT: i32 = 1;
pub const ABEND_EXIT: i32 = 2;
/// Library or loader failure before the program starts.
pub const LIBRARY_ERROR_EXIT: i32 = 3;

/// Library used when neither `--library` nor `SETL2_LIB` names one.
pub const DEFAULT_LIBRARY: &str = "setl2.lib";
