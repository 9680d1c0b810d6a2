//! Compiler symbol table.
//!
//! Symbols live in one arena per unit and are referred to by [`SymId`].
//! A symbol's table offset stays `None` until the emitter allocates it;
//! imported symbols carry the offset recorded in their own unit.

use std::collections::HashMap;

use bytecode::FilePos;
use library::{FormalRecord, SymFlags, SymKind, SymtabRecord};
use object::LongInt;
use parser::FormalMode;

use crate::proctab::ProcId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymId(u32);

impl SymId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind-specific payload; exactly one is meaningful per [`SymKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum SymAux {
    None,
    Integer(LongInt),
    Real(f64),
    String(Vec<u8>),
    /// Literal of a procedure compiled in this unit.
    Proc(ProcId),
    /// Literal bound to a builtin procedure.
    Builtin(u16),
    /// Literal bound to export `n` of a native unit.
    Native(u32),
    /// Selector name, bound to its hash literal.
    Selector(SymId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalSig {
    pub name: String,
    pub mode: FormalMode,
}

impl FormalSig {
    pub fn to_record(&self) -> FormalRecord {
        let mut flags = SymFlags::empty();
        if self.mode.reads() {
            flags |= SymFlags::RPARAM;
        }
        if self.mode.writes() {
            flags |= SymFlags::WPARAM;
        }
        FormalRecord {
            name: self.name.clone(),
            flags,
        }
    }

    pub fn from_record(record: &FormalRecord) -> Self {
        let reads = record.flags.contains(SymFlags::RPARAM);
        let writes = record.flags.contains(SymFlags::WPARAM);
        let mode = match (reads, writes) {
            (_, false) => FormalMode::Rd,
            (false, true) => FormalMode::Wr,
            (true, true) => FormalMode::Rw,
        };
        Self {
            name: record.name.clone(),
            mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymKind,
    pub flags: SymFlags,
    pub owner: Option<ProcId>,
    pub unit_num: i16,
    pub offset: Option<u32>,
    pub slot_num: Option<u32>,
    pub aux: SymAux,
    /// Signature of a procedure or method symbol.
    pub formals: Vec<FormalSig>,
    pub pos: FilePos,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymKind, owner: Option<ProcId>) -> Self {
        Self {
            name: name.into(),
            kind,
            flags: SymFlags::empty(),
            owner,
            unit_num: bytecode::SELF_UNIT,
            offset: None,
            slot_num: None,
            aux: SymAux::None,
            formals: Vec::new(),
            pos: FilePos::default(),
        }
    }

    pub fn is_own(&self) -> bool {
        self.unit_num == bytecode::SELF_UNIT
    }

    pub fn var_args(&self) -> bool {
        self.flags.contains(SymFlags::VAR_ARGS)
    }

    pub fn to_record(&self) -> SymtabRecord {
        SymtabRecord {
            name: self.name.clone(),
            kind: self.kind,
            unit_num: self.unit_num,
            offset: self.offset.map_or(-1, |o| o as i32),
            slot_num: self.slot_num.map_or(-1, |s| s as i32),
            flags: self.flags,
            formals: self.formals.iter().map(FormalSig::to_record).collect(),
        }
    }
}

/// Deduplication key of literal pool entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LitKey {
    Integer(String),
    Real(u64),
    String(Vec<u8>),
    Builtin(u16),
}

#[derive(Debug, Default)]
pub struct Symtab {
    symbols: Vec<Symbol>,
    literals: HashMap<LitKey, SymId>,
}

impl Symtab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: Symbol) -> SymId {
        self.symbols.push(symbol);
        SymId((self.symbols.len() - 1) as u32)
    }

    pub fn get(&self, id: SymId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymId, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, s)| (SymId(i as u32), s))
    }

    fn literal(&mut self, key: LitKey, make: impl FnOnce() -> Symbol) -> SymId {
        if let Some(id) = self.literals.get(&key) {
            return *id;
        }
        let mut symbol = make();
        symbol.flags |= SymFlags::CONSTANT | SymFlags::HIDDEN;
        let id = self.add(symbol);
        self.literals.insert(key, id);
        id
    }

    pub fn integer(&mut self, value: LongInt) -> SymId {
        let key = LitKey::Integer(value.to_string());
        self.literal(key, || {
            let mut s = Symbol::new(value.to_string(), SymKind::Integer, None);
            s.aux = SymAux::Integer(value);
            s
        })
    }

    pub fn real(&mut self, value: f64) -> SymId {
        self.literal(LitKey::Real(value.to_bits()), || {
            let mut s = Symbol::new(format!("{value:?}"), SymKind::Real, None);
            s.aux = SymAux::Real(value);
            s
        })
    }

    pub fn string(&mut self, value: &[u8]) -> SymId {
        self.literal(LitKey::String(value.to_vec()), || {
            let name = String::from_utf8_lossy(value).into_owned();
            let mut s = Symbol::new(name, SymKind::String, None);
            s.aux = SymAux::String(value.to_vec());
            s
        })
    }

    pub fn builtin(&mut self, index: u16) -> SymId {
        self.literal(LitKey::Builtin(index), || {
            let spec = bytecode::BUILTINS[index as usize];
            let mut s = Symbol::new(spec.name, SymKind::Procedure, None);
            s.aux = SymAux::Builtin(index);
            if spec.var_args {
                s.flags |= SymFlags::VAR_ARGS;
            }
            s
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_shared() {
        let mut t = Symtab::new();
        let a = t.integer(LongInt::from_i64(7));
        let b = t.integer(LongInt::from_i64(7));
        let c = t.string(b"7");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.len(), 2);
        assert!(t.get(a).flags.contains(SymFlags::CONSTANT));
    }

    #[test]
    fn formal_modes_survive_records() {
        for mode in [FormalMode::Rd, FormalMode::Wr, FormalMode::Rw] {
            let sig = FormalSig {
                name: "x".into(),
                mode,
            };
            assert_eq!(FormalSig::from_record(&sig.to_record()), sig);
        }
    }
}
