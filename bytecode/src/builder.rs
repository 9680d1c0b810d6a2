use crate::op::{Op, OperandKind};
use crate::record::{CodeSpace, FilePos, Operand, PcodeRecord};

/// A jump target that may not be bound yet.
///
/// Created by [`PcodeBuilder::new_label`]; jumps may refer to it before
/// [`PcodeBuilder::bind`] fixes its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("label {0} was used but never bound")]
    Unbound(u32),
    #[error("label {0} bound twice")]
    Rebound(u32),
    #[error("{op} takes no label operand")]
    NoLabelOperand { op: &'static str },
}

#[derive(Debug)]
struct Fixup {
    space: CodeSpace,
    record: usize,
    operand: usize,
    label: Label,
}

/// Builds the two pcode vectors of a unit.
///
/// Records go to whichever [`CodeSpace`] is current; the position set with
/// [`PcodeBuilder::set_pos`] is stamped on every record emitted after it.
pub struct PcodeBuilder {
    init: Vec<PcodeRecord>,
    body: Vec<PcodeRecord>,
    space: CodeSpace,
    pos: FilePos,
    labels: Vec<Option<(CodeSpace, u32)>>,
    fixups: Vec<Fixup>,
}

impl Default for PcodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PcodeBuilder {
    pub fn new() -> Self {
        Self {
            init: Vec::new(),
            body: Vec::new(),
            space: CodeSpace::Body,
            pos: FilePos::default(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn space(&self) -> CodeSpace {
        self.space
    }

    pub fn set_space(&mut self, space: CodeSpace) {
        self.space = space;
    }

    pub fn set_pos(&mut self, pos: FilePos) {
        self.pos = pos;
    }

    pub fn pos(&self) -> FilePos {
        self.pos
    }

    fn code_mut(&mut self) -> &mut Vec<PcodeRecord> {
        match self.space {
            CodeSpace::Init => &mut self.init,
            CodeSpace::Body => &mut self.body,
        }
    }

    /// Offset the next record will land at in the current space.
    pub fn current_offset(&self) -> u32 {
        match self.space {
            CodeSpace::Init => self.init.len() as u32,
            CodeSpace::Body => self.body.len() as u32,
        }
    }

    // ── labels ─────────────────────────────────────────────────────

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the next record of the current space.
    pub fn bind(&mut self, label: Label) -> Result<(), BuildError> {
        let at = (self.space, self.current_offset());
        let slot = &mut self.labels[label.0 as usize];
        if slot.is_some() {
            return Err(BuildError::Rebound(label.0));
        }
        *slot = Some(at);
        Ok(())
    }

    /// Address of a bound label.
    pub fn label_address(&self, label: Label) -> Option<(CodeSpace, u32)> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    // ── emission ───────────────────────────────────────────────────

    /// Emit a record with explicit operands; missing trailing operands
    /// are zero.
    pub fn emit(&mut self, op: Op, operands: &[Operand]) -> usize {
        let mut ops = [Operand::NONE; 3];
        for (dst, src) in ops.iter_mut().zip(operands) {
            *dst = *src;
        }
        let pos = self.pos;
        let code = self.code_mut();
        code.push(PcodeRecord::new(op, pos, ops));
        code.len() - 1
    }

    /// Emit a record whose `Label` operand refers to `label`.
    ///
    /// `operands` holds the non-label operands in order; the label is
    /// placed wherever the opcode's layout expects it.
    pub fn emit_jump(
        &mut self,
        op: Op,
        operands: &[Operand],
        label: Label,
    ) -> Result<usize, BuildError> {
        let kinds = op.operand_kinds();
        let label_at = kinds
            .iter()
            .position(|k| *k == OperandKind::Label)
            .ok_or(BuildError::NoLabelOperand { op: op.name() })?;
        let mut ops = [Operand::NONE; 3];
        let mut rest = operands.iter();
        for (i, dst) in ops.iter_mut().enumerate() {
            if i == label_at {
                continue;
            }
            if let Some(src) = rest.next() {
                *dst = *src;
            }
        }
        let pos = self.pos;
        let space = self.space;
        let code = self.code_mut();
        code.push(PcodeRecord::new(op, pos, ops));
        let record = code.len() - 1;
        self.fixups.push(Fixup {
            space,
            record,
            operand: label_at,
            label,
        });
        Ok(record)
    }

    pub fn go(&mut self, label: Label) -> Result<usize, BuildError> {
        self.emit_jump(Op::Go, &[], label)
    }

    /// Resolve every label reference and return `(init, body)`.
    pub fn finish(mut self) -> Result<(Vec<PcodeRecord>, Vec<PcodeRecord>), BuildError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let (space, at) = self.labels[fixup.label.0 as usize]
                .ok_or(BuildError::Unbound(fixup.label.0))?;
            let code = match fixup.space {
                CodeSpace::Init => &mut self.init,
                CodeSpace::Body => &mut self.body,
            };
            code[fixup.record].operands[fixup.operand] = Operand::label(space, at);
        }
        Ok((self.init, self.body))
    }
}
