use std::path::PathBuf;

use compiler::CompileError;
use library::LibraryError;
use vm::VmError;

use crate::{ABEND_EXIT, COMPILE_ERROR_EXIT, LIBRARY_ERROR_EXIT};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("cannot read standard input: {0}")]
    Stdin(#[source] std::io::Error),
    #[error("cannot create a scratch library in {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} contains no program")]
    NoProgram(String),
}

impl DriverError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::Compile(CompileError::Library(_)) => LIBRARY_ERROR_EXIT,
            DriverError::Compile(_) | DriverError::NoProgram(_) | DriverError::Stdin(_) => {
                COMPILE_ERROR_EXIT
            }
            DriverError::Vm(VmError::Abend(_) | VmError::Output(_)) => ABEND_EXIT,
            DriverError::Vm(VmError::Load(_))
            | DriverError::Library(_)
            | DriverError::Scratch { .. } => LIBRARY_ERROR_EXIT,
        }
    }
}
