use std::fmt;
use std::path::PathBuf;

use bytecode::{BuildError, FilePos};
use library::{LibraryError, UnitKind};
use parser::ParseError;

/// A problem found while resolving or generating code for a unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemanticError {
    #[error("unit `{0}` not found in the library")]
    SpecNotFound(String),
    #[error("cannot read unit `{name}`: {reason}")]
    Unreadable { name: String, reason: String },
    #[error("`{name}` is a {found}, expected a {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: UnitKind,
    },
    #[error("`{0}` was compiled against an older version of `{1}`")]
    StaleImport(String, String),
    #[error("`{0}` is declared with two different meanings")]
    NameConflict(String),
    #[error("`{0}` is declared twice")]
    Duplicate(String),
    #[error("procedure `{name}` does not match its specification: {reason}")]
    SpecMismatch { name: String, reason: String },
    #[error("procedure `{0}` is declared in the specification but never defined")]
    ForwardReferenceMissing(String),
    #[error("`{0}` is ambiguous; qualify it with its unit name")]
    Ambiguous(String),
    #[error("`{package}` has no public symbol `{name}`")]
    UnknownMember { package: String, name: String },
    #[error("`{0}` is read-only")]
    ReadOnly(String),
    #[error("expression cannot be assigned to")]
    NotAssignable,
    #[error("argument {index} of `{name}` is written back and must be assignable")]
    WriteArgument { name: String, index: usize },
    #[error("`{name}` takes {expected} argument(s), {found} given")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("`{0}` is only allowed inside a loop")]
    OutsideLoop(&'static str),
    #[error("`{0}` is only allowed inside a class")]
    OutsideClass(&'static str),
    #[error("a {0} may not contain executable statements")]
    StatementsInSpec(&'static str),
    #[error("bad literal `{0}`")]
    BadLiteral(String),
    #[error("only the last formal may collect extra arguments")]
    VarArgsMode,
    #[error("`{name}` is not a {expected}")]
    NotA { name: String, expected: &'static str },
}

/// A located diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub pos: FilePos,
    pub error: SemanticError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}: {}", self.file, self.pos.line, self.pos.column, self.error)
    }
}

/// Semantic errors collected for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::debug!("{diagnostic}");
        self.0.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{file}: {error}")]
    Syntax { file: String, error: ParseError },
    #[error("{} error(s) in unit `{unit}`:\n{diagnostics}", diagnostics.len())]
    Semantic { unit: String, diagnostics: Diagnostics },
    #[error("body `{0}` has no specification in the library")]
    MissingSpec(String),
    #[error("`{unit}` is a {found}, its body needs a {expected}")]
    KindMismatch {
        unit: String,
        expected: UnitKind,
        found: UnitKind,
    },
    #[error("unit `{name}` already exists as a {existing}")]
    DuplicateUnit { name: String, existing: UnitKind },
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Library(LibraryError),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<LibraryError> for CompileError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Conflict { name, existing } => {
                CompileError::DuplicateUnit { name, existing }
            }
            other => CompileError::Library(other),
        }
    }
}

impl From<BuildError> for CompileError {
    fn from(err: BuildError) -> Self {
        CompileError::Internal(err.to_string())
    }
}
