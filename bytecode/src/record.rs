use core::fmt;

use crate::op::{Op, OperandKind};

/// Size in bytes of one encoded pcode record.
///
/// `opcode:u16 | line:i32 | column:i32 | 3 × (unit_num:i16, offset:i32)`,
/// little-endian, no padding.
pub const RECORD_SIZE: usize = 2 + 4 + 4 + 3 * OPERAND_SIZE;
const OPERAND_SIZE: usize = 2 + 4;

/// Unit number of literal and label operands.
pub const LITERAL_UNIT: i16 = 0;
/// Unit number of the unit's own specifier table.
pub const SELF_UNIT: i16 = 1;
/// First unit number assigned to imported or inherited units.
pub const FIRST_IMPORT_UNIT: i16 = 2;

/// Immediate specifiers encoded with [`LITERAL_UNIT`] in a `Spec` position.
pub const IMMEDIATE_OMEGA: i32 = 0;
pub const IMMEDIATE_FALSE: i32 = 1;
pub const IMMEDIATE_TRUE: i32 = 2;

/// `Call` argument-count word: the low 16 bits hold the count.
pub const CALL_ARGC_MASK: i32 = 0xFFFF;
/// The caller pops write-back values after the call returns.
pub const CALL_KEEP_WRITEBACK: i32 = 1 << 16;
/// The callee pushes its final `self` after its write-back values.
pub const CALL_SELF_WRITEBACK: i32 = 1 << 17;

/// Which pcode vector a label points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSpace {
    Init,
    Body,
}

/// Source position of the construct a record was generated from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilePos {
    pub line: i32,
    pub column: i32,
}

impl FilePos {
    pub const fn new(line: i32, column: i32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for FilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One pcode operand.
///
/// `unit_num` 0 marks literals and labels, 1 the unit's own specifier
/// table, and 2 onwards the unit's imports in manifest order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Operand {
    pub unit_num: i16,
    pub offset: i32,
}

impl Operand {
    pub const NONE: Operand = Operand {
        unit_num: 0,
        offset: 0,
    };

    pub const fn new(unit_num: i16, offset: i32) -> Self {
        Self { unit_num, offset }
    }

    pub const fn literal(value: i32) -> Self {
        Self::new(LITERAL_UNIT, value)
    }

    pub const fn spec(unit_num: i16, offset: i32) -> Self {
        Self::new(unit_num, offset)
    }

    pub const fn omega() -> Self {
        Self::literal(IMMEDIATE_OMEGA)
    }

    pub const fn boolean(value: bool) -> Self {
        Self::literal(if value {
            IMMEDIATE_TRUE
        } else {
            IMMEDIATE_FALSE
        })
    }

    /// Labels are stored as signed absolute offsets: body offsets as-is,
    /// init offsets as `-(offset + 1)`.
    pub const fn label(space: CodeSpace, offset: u32) -> Self {
        match space {
            CodeSpace::Body => Self::literal(offset as i32),
            CodeSpace::Init => Self::literal(-(offset as i32) - 1),
        }
    }

    pub const fn decode_label(self) -> (CodeSpace, u32) {
        if self.offset < 0 {
            (CodeSpace::Init, (-(self.offset + 1)) as u32)
        } else {
            (CodeSpace::Body, self.offset as u32)
        }
    }

    pub const fn slot(slot_num: i32) -> Self {
        Self::new(SELF_UNIT, slot_num)
    }

    pub const fn is_literal(self) -> bool {
        self.unit_num == LITERAL_UNIT
    }
}

/// A fixed-size pcode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcodeRecord {
    pub op: Op,
    pub pos: FilePos,
    pub operands: [Operand; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("pcode stream length {0} is not a multiple of {RECORD_SIZE}")]
    Truncated(usize),
    #[error("unknown opcode {opcode} in record {index}")]
    UnknownOpcode { index: usize, opcode: u16 },
}

impl PcodeRecord {
    pub fn new(op: Op, pos: FilePos, operands: [Operand; 3]) -> Self {
        Self { op, pos, operands }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.op as u16).to_le_bytes());
        buf.extend_from_slice(&self.pos.line.to_le_bytes());
        buf.extend_from_slice(&self.pos.column.to_le_bytes());
        for operand in &self.operands {
            buf.extend_from_slice(&operand.unit_num.to_le_bytes());
            buf.extend_from_slice(&operand.offset.to_le_bytes());
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        self.encode_into(&mut buf);
        let mut out = [0u8; RECORD_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode one record; `bytes` must hold at least [`RECORD_SIZE`] bytes.
    pub fn decode(bytes: &[u8], index: usize) -> Result<Self, DecodeError> {
        if bytes.len() < RECORD_SIZE {
            return Err(DecodeError::Truncated(bytes.len()));
        }
        let raw_op = u16::from_le_bytes([bytes[0], bytes[1]]);
        let op = Op::try_from(raw_op).map_err(|opcode| {
            DecodeError::UnknownOpcode { index, opcode }
        })?;
        let line = read_i32(bytes, 2);
        let column = read_i32(bytes, 6);
        let mut operands = [Operand::NONE; 3];
        for (i, operand) in operands.iter_mut().enumerate() {
            let base = 10 + i * OPERAND_SIZE;
            operand.unit_num = i16::from_le_bytes([bytes[base], bytes[base + 1]]);
            operand.offset = read_i32(bytes, base + 2);
        }
        Ok(Self {
            op,
            pos: FilePos::new(line, column),
            operands,
        })
    }

    /// The pcode address a `Label` operand of this record points to.
    pub fn label_target(&self) -> Option<(CodeSpace, u32)> {
        self.op
            .operand_kinds()
            .iter()
            .position(|k| *k == OperandKind::Label)
            .map(|i| self.operands[i].decode_label())
    }
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Encode a whole pcode vector.
pub fn encode_all(records: &[PcodeRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        record.encode_into(&mut buf);
    }
    buf
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit_num, self.offset)
    }
}

impl fmt::Display for PcodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12}", self.op.name())?;
        let kinds = self.op.operand_kinds();
        let mut first = true;
        for (kind, operand) in kinds.iter().zip(self.operands.iter()) {
            let text = match kind {
                OperandKind::None => continue,
                OperandKind::Int => format!("#{}", operand.offset),
                OperandKind::Label => match operand.decode_label() {
                    (CodeSpace::Body, at) => format!("@b{at}"),
                    (CodeSpace::Init, at) => format!("@i{at}"),
                },
                OperandKind::Slot => format!(".{}", operand.offset),
                OperandKind::Class => format!("class {}", operand.unit_num),
                OperandKind::Spec | OperandKind::Target => {
                    if operand.is_literal() {
                        match operand.offset {
                            IMMEDIATE_OMEGA => "om".to_string(),
                            IMMEDIATE_FALSE => "false".to_string(),
                            IMMEDIATE_TRUE => "true".to_string(),
                            other => format!("imm {other}"),
                        }
                    } else {
                        operand.to_string()
                    }
                }
            };
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{text}")?;
        }
        write!(f, "  ; {}", self.pos)
    }
}
