use bytecode::{DecodeError, Op};
use library::LibraryError;
use object::ValueError;

use crate::abend::Abend;

/// Failure while bringing units into memory.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error("unit `{unit}` is out of date, recompile it ({reason})")]
    StaleDependency { unit: String, reason: String },
    #[error("unit `{0}` is not a program")]
    NotAProgram(String),
    #[error("unit `{unit}` has bad pcode: {source}")]
    Pcode {
        unit: String,
        #[source]
        source: DecodeError,
    },
    #[error("unit `{unit}` is malformed: {reason}")]
    Malformed { unit: String, reason: String },
    #[error("native package `{0}` has no registered implementation")]
    MissingNative(String),
}

/// An error raised by the running program. These become abends.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("{0}")]
    Abort(String),
    #[error("wrong number of arguments to `{name}`: expected {expected}, found {found}")]
    Arity { name: String, expected: usize, found: usize },
    #[error("{0} is not a procedure")]
    NotCallable(String),
    #[error("`{slot}` is not a slot of class `{class}`")]
    NoSlot { class: String, slot: String },
    #[error("slot `{slot}` of class `{class}` is private")]
    PrivateSlot { class: String, slot: String },
    #[error("instance variable `{0}` of a process is not accessible")]
    ProcessVariable(String),
    #[error("{op} needs an object, found {found}")]
    NotAnObject { op: &'static str, found: String },
    #[error("`self` used outside a method")]
    NoSelf,
    #[error("{0} is read-only")]
    ReadOnly(&'static str),
    #[error("{builtin}: {reason}")]
    BadArgument { builtin: &'static str, reason: String },
    #[error("all processes are waiting, nothing can run")]
    Deadlock,
    #[error("cannot wait for a mailbox inside {0}")]
    BlockedInHost(&'static str),
    #[error("process {0} has been killed")]
    ProcessKilled(u32),
    #[error("no callout host installed")]
    NoCalloutHost,
    #[error("callout failed: {0}")]
    Callout(String),
    #[error("native procedure `{name}` failed: {reason}")]
    Native { name: String, reason: String },
    #[error("program stack underflow at {0}")]
    StackUnderflow(&'static str),
    #[error("bad operand for {op:?}: {reason}")]
    BadOperand { op: Op, reason: String },
    #[error("abend trap nested too deeply")]
    TrapDepth,
    /// A nested call ended in an abend that was not trapped.
    #[error("{0}")]
    Unwound(Box<Abend>),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Everything [`crate::Interpreter::run`] can fail with.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{0}")]
    Abend(Box<Abend>),
    #[error("cannot write program output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<Abend> for VmError {
    fn from(abend: Abend) -> Self {
        VmError::Abend(Box::new(abend))
    }
}

impl From<LibraryError> for VmError {
    fn from(err: LibraryError) -> Self {
        VmError::Load(LoadError::Library(err))
    }
}
