/// Pcode opcodes.
///
/// Every record carries exactly three operands; [`Op::operand_kinds`]
/// says how each position is interpreted. Operations that need more than
/// three inputs (ranges, slices, calls) take the extra values from the
/// program stack, pushed with `Push1`/`Push2`/`Push3` immediately before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Op {
    Noop = 0,

    // ── program stack ──────────────────────────────────────────────
    /// Push one specifier. Operands: `a`
    Push1,
    /// Push two specifiers, `a` first. Operands: `a b`
    Push2,
    /// Push three specifiers, `a` first. Operands: `a b c`
    Push3,
    /// Pop the top of the stack into a target. Operands: `t`
    Pop1,
    /// Pop the top of the stack into the current `self`.
    PopSelf,

    // ── assignment and arithmetic ──────────────────────────────────
    /// `t := a`
    Assign,
    /// `t := a + b` (integers, reals, strings, tuples, set union)
    Add,
    /// `t := a - b` (numbers, set difference)
    Sub,
    /// `t := a * b` (numbers, set intersection, string/tuple repetition)
    Mult,
    /// `t := a / b` (integer division on integers)
    Div,
    /// `t := a div b`
    IntDiv,
    /// `t := a mod b`
    Mod,
    /// `t := a ** b`
    Exp,
    /// `t := a max b`
    Max,
    /// `t := a min b`
    Min,
    /// `t := -a`
    Uminus,

    // ── comparison and logic ───────────────────────────────────────
    Eq,
    Ne,
    Lt,
    Le,
    In,
    NotIn,
    Incs,
    Subset,
    /// `t := not a`
    Not,

    // ── set / map / tuple operators ────────────────────────────────
    /// `t := a with b`
    With,
    /// `t := a less b`
    Less,
    /// `t := a lessf b`
    Lessf,
    /// `t := #a`
    Card,
    /// `t := arb a`
    Arb,
    /// `t := domain a`
    Domain,
    /// `t := range a`
    Range,
    /// `t := pow a`
    Pow,
    /// `t := arb element removed from s`. Operands: `t s`
    From,
    /// `t := first element of s`, which is shortened. Operands: `t s`
    Fromb,
    /// `t := last element of s`, which is shortened. Operands: `t s`
    Frome,
    /// Build a set from the top `n` stack entries. Operands: `t n`
    Set,
    /// Build a tuple from the top `n` stack entries. Operands: `t n`
    Tuple,
    /// Build an arithmetic-progression set; pops `first second last`
    /// (`second` may be omega). Operands: `t`
    SetRange,
    /// Tuple counterpart of [`Op::SetRange`]. Operands: `t`
    TupleRange,
    /// `t := f(a)` Operands: `t f a`
    Of,
    /// `t := f{a}` Operands: `t f a`
    Ofa,
    /// `t := f(lo..hi)`; pops `lo hi` (`hi` omega = to the end). Operands: `t f`
    Slice,
    /// `f(a) := v` Operands: `f a v`
    Sof,
    /// `f{a} := v` Operands: `f a v`
    Sofa,
    /// `f(lo..hi) := v`; pops `lo hi`. Operands: `f v`
    Sslice,

    // ── iteration ──────────────────────────────────────────────────
    /// `it := iterator over s`. Operands: `it s kind`
    IterStart,
    /// `x := next of it`, or jump to `label` when exhausted.
    /// Operands: `x it label`
    IterNext,

    // ── control flow ───────────────────────────────────────────────
    /// Operands: `label`
    Go,
    /// Operands: `a label`
    GoTrue,
    /// Operands: `a label`
    GoFalse,
    /// Jump when `a` is omega. Operands: `a label`
    GoOm,

    // ── procedures ─────────────────────────────────────────────────
    /// Build a procedure value from a procedure literal. Operands: `t p`
    Proc,
    /// Call `p` with `argc` stacked arguments. Operands: `t p argc|flags`
    Call,
    /// Operands: `a`
    Return,
    /// Terminate the program normally.
    Stop,

    // ── objects and processes ──────────────────────────────────────
    /// `t := self` Operands: `t`
    SelfVal,
    /// `t := o.s` Operands: `t o slot`
    Slot,
    /// `o.s := v` Operands: `o slot v`
    SSlot,
    /// `t := self.s` Operands: `t slot`
    SlotSelf,
    /// `self.s := v` Operands: `slot v`
    SSlotSelf,
    /// Instantiate a class or process class with `argc` stacked
    /// arguments. Operands: `t class argc`
    New,

    // ── predefined variables ───────────────────────────────────────
    /// `t := predefined variable i` Operands: `t i`
    Gvar,
    /// `predefined variable i := v` Operands: `i v`
    Sgvar,

    /// Abnormal end with message `a`.
    Abend,
}

/// How a record operand position is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// A specifier that is read.
    Spec,
    /// A specifier that is written.
    Target,
    /// An integer literal carried in the offset field.
    Int,
    /// A pcode address (see [`crate::Operand::label`]).
    Label,
    /// A slot number, relative to the unit's declared-slot table.
    Slot,
    /// A class unit, as a unit number.
    Class,
}

use OperandKind::{Class, Int, Label, None as Nil, Slot, Spec, Target};

const ALL: [Op; Op::COUNT] = [
    Op::Noop,
    Op::Push1,
    Op::Push2,
    Op::Push3,
    Op::Pop1,
    Op::PopSelf,
    Op::Assign,
    Op::Add,
    Op::Sub,
    Op::Mult,
    Op::Div,
    Op::IntDiv,
    Op::Mod,
    Op::Exp,
    Op::Max,
    Op::Min,
    Op::Uminus,
    Op::Eq,
    Op::Ne,
    Op::Lt,
    Op::Le,
    Op::In,
    Op::NotIn,
    Op::Incs,
    Op::Subset,
    Op::Not,
    Op::With,
    Op::Less,
    Op::Lessf,
    Op::Card,
    Op::Arb,
    Op::Domain,
    Op::Range,
    Op::Pow,
    Op::From,
    Op::Fromb,
    Op::Frome,
    Op::Set,
    Op::Tuple,
    Op::SetRange,
    Op::TupleRange,
    Op::Of,
    Op::Ofa,
    Op::Slice,
    Op::Sof,
    Op::Sofa,
    Op::Sslice,
    Op::IterStart,
    Op::IterNext,
    Op::Go,
    Op::GoTrue,
    Op::GoFalse,
    Op::GoOm,
    Op::Proc,
    Op::Call,
    Op::Return,
    Op::Stop,
    Op::SelfVal,
    Op::Slot,
    Op::SSlot,
    Op::SlotSelf,
    Op::SSlotSelf,
    Op::New,
    Op::Gvar,
    Op::Sgvar,
    Op::Abend,
];

impl Op {
    pub const COUNT: usize = Op::Abend as usize + 1;

    pub const fn operand_kinds(self) -> [OperandKind; 3] {
        match self {
            Op::Noop | Op::PopSelf | Op::Stop => [Nil, Nil, Nil],
            Op::Push1 | Op::Return | Op::Abend => [Spec, Nil, Nil],
            Op::Push2 => [Spec, Spec, Nil],
            Op::Push3 => [Spec, Spec, Spec],
            Op::Pop1
            | Op::SetRange
            | Op::TupleRange
            | Op::SelfVal => [Target, Nil, Nil],
            Op::Assign
            | Op::Uminus
            | Op::Not
            | Op::Card
            | Op::Arb
            | Op::Domain
            | Op::Range
            | Op::Pow
            | Op::Slice
            | Op::Proc => [Target, Spec, Nil],
            Op::From | Op::Fromb | Op::Frome => [Target, Target, Nil],
            Op::Add
            | Op::Sub
            | Op::Mult
            | Op::Div
            | Op::IntDiv
            | Op::Mod
            | Op::Exp
            | Op::Max
            | Op::Min
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Le
            | Op::In
            | Op::NotIn
            | Op::Incs
            | Op::Subset
            | Op::With
            | Op::Less
            | Op::Lessf
            | Op::Of
            | Op::Ofa => [Target, Spec, Spec],
            Op::Set | Op::Tuple | Op::Gvar => [Target, Int, Nil],
            Op::Sof | Op::Sofa => [Target, Spec, Spec],
            Op::Sslice => [Target, Spec, Nil],
            Op::IterStart => [Target, Spec, Int],
            Op::IterNext => [Target, Target, Label],
            Op::Go => [Label, Nil, Nil],
            Op::GoTrue | Op::GoFalse | Op::GoOm => [Spec, Label, Nil],
            Op::Call => [Target, Spec, Int],
            Op::Slot => [Target, Spec, Slot],
            Op::SSlot => [Target, Slot, Spec],
            Op::SlotSelf => [Target, Slot, Nil],
            Op::SSlotSelf => [Slot, Spec, Nil],
            Op::New => [Target, Class, Int],
            Op::Sgvar => [Int, Spec, Nil],
        }
    }

    /// Lower-case mnemonic used by listings and disassembly.
    pub const fn name(self) -> &'static str {
        match self {
            Op::Noop => "noop",
            Op::Push1 => "push1",
            Op::Push2 => "push2",
            Op::Push3 => "push3",
            Op::Pop1 => "pop1",
            Op::PopSelf => "popself",
            Op::Assign => "assign",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mult => "mult",
            Op::Div => "div",
            Op::IntDiv => "intdiv",
            Op::Mod => "mod",
            Op::Exp => "exp",
            Op::Max => "max",
            Op::Min => "min",
            Op::Uminus => "uminus",
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::In => "in",
            Op::NotIn => "notin",
            Op::Incs => "incs",
            Op::Subset => "subset",
            Op::Not => "not",
            Op::With => "with",
            Op::Less => "less",
            Op::Lessf => "lessf",
            Op::Card => "nelt",
            Op::Arb => "arb",
            Op::Domain => "domain",
            Op::Range => "range",
            Op::Pow => "pow",
            Op::From => "from",
            Op::Fromb => "fromb",
            Op::Frome => "frome",
            Op::Set => "set",
            Op::Tuple => "tuple",
            Op::SetRange => "set_range",
            Op::TupleRange => "tuple_range",
            Op::Of => "of",
            Op::Ofa => "ofa",
            Op::Slice => "slice",
            Op::Sof => "sof",
            Op::Sofa => "sofa",
            Op::Sslice => "sslice",
            Op::IterStart => "iter_start",
            Op::IterNext => "iter_next",
            Op::Go => "go",
            Op::GoTrue => "gotrue",
            Op::GoFalse => "gofalse",
            Op::GoOm => "goom",
            Op::Proc => "proc",
            Op::Call => "call",
            Op::Return => "return",
            Op::Stop => "stop",
            Op::SelfVal => "self",
            Op::Slot => "slot",
            Op::SSlot => "sslot",
            Op::SlotSelf => "slotself",
            Op::SSlotSelf => "sslotself",
            Op::New => "new",
            Op::Gvar => "gvar",
            Op::Sgvar => "sgvar",
            Op::Abend => "abend",
        }
    }

    /// Whether control can fall through to the next record.
    pub const fn falls_through(self) -> bool {
        !matches!(self, Op::Go | Op::Return | Op::Stop | Op::Abend)
    }
}

impl TryFrom<u16> for Op {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, u16> {
        ALL.get(raw as usize).copied().ok_or(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_discriminants() {
        for (i, op) in ALL.iter().enumerate() {
            assert_eq!(*op as usize, i, "{op:?} out of place");
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert_eq!(Op::try_from(Op::COUNT as u16), Err(Op::COUNT as u16));
        assert_eq!(Op::try_from(0), Ok(Op::Noop));
    }

    #[test]
    fn targets_come_first() {
        assert_eq!(Op::Add.operand_kinds()[0], OperandKind::Target);
        assert_eq!(Op::Call.operand_kinds()[2], OperandKind::Int);
        assert_eq!(Op::IterNext.operand_kinds()[2], OperandKind::Label);
    }
}
