//! Abnormal ends.
//!
//! A runtime error stops the faulting opcode and unwinds to the trap: if
//! `ABEND_TRAP` holds a procedure it is called with the message and the
//! call stack, and execution resumes after the faulting opcode with its
//! target set to `om`. Otherwise the program ends with an [`Abend`].

use std::fmt;

use bytecode::{CodeSpace, FilePos, GlobalVar};
use object::Specifier;

use crate::error::RuntimeError;
use crate::interpreter::{Interpreter, writes_target};

/// Traps running inside traps give up after this many levels.
pub const MAX_TRAP_DEPTH: u32 = 3;

/// One line of an abend's call stack, innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct StackEntry {
    pub unit: String,
    pub procedure: Option<String>,
    pub file: String,
    pub pos: FilePos,
    /// The source line, when the library holds the file.
    pub text: Option<String>,
}

impl fmt::Display for StackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.procedure {
            Some(procedure) => write!(f, "{}.{}", self.unit, procedure)?,
            None => f.write_str(&self.unit)?,
        }
        write!(f, " ({} line {}, column {})", self.file, self.pos.line, self.pos.column)?;
        if let Some(text) = &self.text {
            write!(f, ": {}", text.trim())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Abend {
    pub message: String,
    pub frames: Vec<StackEntry>,
}

impl Abend {
    pub fn stack_strings(&self) -> Vec<String> {
        self.frames.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Abend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "abnormal end: {}", self.message)?;
        for frame in &self.frames {
            write!(f, "\n  at {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Abend {}

impl Interpreter {
    /// Snapshot of the current call stack.
    pub(crate) fn build_abend(&mut self, err: &RuntimeError) -> Abend {
        let mut positions = Vec::new();
        let frames = &self.sched.ctx().frames;
        for (depth, frame) in frames.iter().enumerate().rev() {
            let pos = if depth + 1 == frames.len() {
                self.current_record().map(|(_, record)| record.pos)
            } else {
                let unit = &self.image.units[frame.unit];
                let code = match frame.space {
                    CodeSpace::Init => &unit.init,
                    CodeSpace::Body => &unit.body,
                };
                frame.ip.checked_sub(1).and_then(|ip| code.get(ip)).map(|r| r.pos)
            };
            positions.push((frame.unit, frame.proc, pos.unwrap_or_default()));
        }
        let entries = positions
            .into_iter()
            .map(|(unit, proc, pos)| {
                let loaded = &self.image.units[unit];
                let name = loaded.name.clone();
                let procedure = proc
                    .and_then(|p| loaded.procs.get(p as usize))
                    .map(|p| p.name.to_string());
                let file = loaded.source_name.clone();
                let text = self.image.source_line(&self.library, &file, pos.line);
                StackEntry {
                    unit: name,
                    procedure,
                    file,
                    pos,
                    text,
                }
            })
            .collect();
        Abend {
            message: err.to_string(),
            frames: entries,
        }
    }

    /// Runs the abend trap for `err`, or returns the abend that ends the
    /// program.
    pub(crate) fn handle_error(&mut self, err: RuntimeError) -> Result<(), Abend> {
        let err = match err {
            RuntimeError::Unwound(abend) => return Err(*abend),
            other => other,
        };
        let abend = self.build_abend(&err);
        log::debug!("{abend}");
        if matches!(err, RuntimeError::Deadlock | RuntimeError::TrapDepth) {
            return Err(abend);
        }
        let trap = self.global(GlobalVar::AbendTrap).clone();
        let Specifier::Proc(body) = &trap else {
            return Err(abend);
        };
        if self.abend_depth >= MAX_TRAP_DEPTH {
            return Err(self.build_abend(&RuntimeError::TrapDepth));
        }
        let faulting = self.current_record();
        let mut args = vec![
            Specifier::from(abend.message.as_str()),
            Specifier::tuple_of(
                abend.stack_strings().iter().map(|s| Specifier::from(s.as_str())).collect(),
            ),
        ];
        args.truncate(body.formal_count.min(2) as usize);

        self.abend_depth += 1;
        let result = self.call_value(&trap, args, Specifier::Omega);
        self.abend_depth -= 1;
        match result {
            Ok(_) => {}
            Err(RuntimeError::Unwound(inner)) => return Err(*inner),
            Err(other) => return Err(self.build_abend(&other)),
        }

        if let Some((_, record)) = faulting {
            if writes_target(record.op) {
                if let Err(err) = self.write(record.operands[0], Specifier::Omega) {
                    let op = record.op.name();
                    log::warn!("could not clear the target of `{op}` after a trap: {err}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(procedure: Option<&str>, text: Option<&str>) -> StackEntry {
        StackEntry {
            unit: "main".into(),
            procedure: procedure.map(str::to_string),
            file: "main.stl".into(),
            pos: FilePos::new(4, 7),
            text: text.map(str::to_string),
        }
    }

    #[test]
    fn stack_lines_name_procedure_and_position() {
        assert_eq!(
            entry(Some("f"), Some("   x := 1 / 0;")).to_string(),
            "main.f (main.stl line 4, column 7): x := 1 / 0;"
        );
        assert_eq!(entry(None, None).to_string(), "main (main.stl line 4, column 7)");
    }

    #[test]
    fn abend_display_lists_frames_innermost_first() {
        let abend = Abend {
            message: "bad".into(),
            frames: vec![entry(Some("f"), None), entry(None, None)],
        };
        let text = abend.to_string();
        assert!(text.starts_with("abnormal end: bad\n  at main.f"));
        assert_eq!(abend.stack_strings().len(), 2);
    }
}
