//! Quadruples: the compiler's intermediate code.
//!
//! One [`Quad::Code`] becomes exactly one pcode record. Operands are
//! still symbolic here; the emitter turns them into table offsets.

use std::fmt;

use bytecode::{
    CodeSpace, FilePos, IMMEDIATE_FALSE, IMMEDIATE_OMEGA, IMMEDIATE_TRUE, Op, PcodeRecord,
};

use crate::slots::SlotRef;
use crate::symtab::{SymId, Symtab};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QLabel(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QOperand {
    None,
    Sym(SymId),
    /// Immediate specifier (`om`, `false`, `true`).
    Imm(i32),
    Int(i32),
    Label(QLabel),
    Slot(SlotRef),
    /// Class unit by unit number.
    Class(i16),
}

impl QOperand {
    pub const OMEGA: QOperand = QOperand::Imm(IMMEDIATE_OMEGA);
    pub const FALSE: QOperand = QOperand::Imm(IMMEDIATE_FALSE);
    pub const TRUE: QOperand = QOperand::Imm(IMMEDIATE_TRUE);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Quad {
    Code {
        op: Op,
        operands: [QOperand; 3],
        pos: FilePos,
    },
    Label(QLabel),
    /// Pcode copied from another unit; labels into `space` are shifted
    /// by the offset the block lands at.
    Block {
        records: Vec<PcodeRecord>,
        space: CodeSpace,
    },
}

impl Quad {
    pub fn code(op: Op, operands: &[QOperand], pos: FilePos) -> Self {
        let mut ops = [QOperand::None; 3];
        for (dst, src) in ops.iter_mut().zip(operands) {
            *dst = *src;
        }
        Quad::Code { op, operands: ops, pos }
    }
}

/// Listing form of a quadruple list, for `--debug quads`.
pub struct QuadListing<'a> {
    pub quads: &'a [Quad],
    pub symtab: &'a Symtab,
}

impl fmt::Display for QuadListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for quad in self.quads {
            match quad {
                Quad::Label(l) => writeln!(f, "L{}:", l.0)?,
                Quad::Block { records, .. } => {
                    writeln!(f, "    <{} copied records>", records.len())?
                }
                Quad::Code { op, operands, pos } => {
                    write!(f, "    {:<12}", op.name())?;
                    let mut first = true;
                    for operand in operands.iter().filter(|o| **o != QOperand::None) {
                        if !first {
                            write!(f, ", ")?;
                        }
                        first = false;
                        match operand {
                            QOperand::None => {}
                            QOperand::Sym(s) => write!(f, "{}", self.symtab.get(*s).name)?,
                            QOperand::Imm(IMMEDIATE_OMEGA) => write!(f, "om")?,
                            QOperand::Imm(IMMEDIATE_FALSE) => write!(f, "false")?,
                            QOperand::Imm(IMMEDIATE_TRUE) => write!(f, "true")?,
                            QOperand::Imm(v) | QOperand::Int(v) => write!(f, "#{v}")?,
                            QOperand::Label(l) => write!(f, "L{}", l.0)?,
                            QOperand::Slot(s) => write!(f, ".{}", s.0)?,
                            QOperand::Class(u) => write!(f, "class {u}")?,
                        }
                    }
                    writeln!(f, "  ; {pos}")?;
                }
            }
        }
        Ok(())
    }
}
