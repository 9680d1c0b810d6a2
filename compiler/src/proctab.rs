//! Procedure scopes.
//!
//! The unit itself is the root scope; every procedure, method and the
//! implicit `initobj` of a class is a child somewhere below it. Each
//! scope owns a contiguous area of the unit's specifier table: formals,
//! then locals, then temporaries.

use std::collections::HashMap;

use bytecode::FilePos;

use crate::quads::{QLabel, Quad};
use crate::symtab::SymId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId(u32);

impl ProcId {
    pub const ROOT: ProcId = ProcId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Unit,
    Procedure,
    Method,
    Initobj,
}

#[derive(Debug)]
pub struct ProcEntry {
    pub name: String,
    pub kind: ScopeKind,
    pub parent: Option<ProcId>,
    pub children: Vec<ProcId>,
    /// Every symbol whose storage lives in this scope's area, in
    /// declaration order.
    pub symbols: Vec<SymId>,
    pub names: HashMap<String, SymId>,
    pub formals: Vec<SymId>,
    pub var_args: bool,
    /// The procedure literal in the unit table.
    pub literal: Option<SymId>,
    pub body: Vec<Quad>,
    pub entry: QLabel,
    pub spec_offset: u32,
    pub spec_count: u32,
    pub free_temps: Vec<SymId>,
    pub stmt_temps: Vec<SymId>,
    pub temp_count: u32,
    pub pos: FilePos,
}

#[derive(Debug, Default)]
pub struct ProcTab {
    procs: Vec<ProcEntry>,
}

impl ProcTab {
    pub fn new(unit_name: &str, entry: QLabel) -> Self {
        let mut tab = Self::default();
        tab.procs.push(ProcEntry::new(unit_name, ScopeKind::Unit, None, entry, FilePos::default()));
        tab
    }

    pub fn add(
        &mut self,
        name: &str,
        kind: ScopeKind,
        parent: ProcId,
        entry: QLabel,
        pos: FilePos,
    ) -> ProcId {
        let id = ProcId(self.procs.len() as u32);
        self.procs.push(ProcEntry::new(name, kind, Some(parent), entry, pos));
        self.procs[parent.index()].children.push(id);
        id
    }

    pub fn get(&self, id: ProcId) -> &ProcEntry {
        &self.procs[id.index()]
    }

    pub fn get_mut(&mut self, id: ProcId) -> &mut ProcEntry {
        &mut self.procs[id.index()]
    }

    /// Scopes below the root, parents before children.
    pub fn depth_first(&self) -> Vec<ProcId> {
        let mut out = Vec::new();
        let mut stack: Vec<ProcId> = self.procs[0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev());
        }
        out
    }

    /// `id` followed by its enclosing scopes up to the root.
    pub fn chain(&self, id: ProcId) -> Vec<ProcId> {
        let mut out = vec![id];
        let mut at = id;
        while let Some(parent) = self.get(at).parent {
            out.push(parent);
            at = parent;
        }
        out
    }
}

impl ProcEntry {
    fn new(
        name: &str,
        kind: ScopeKind,
        parent: Option<ProcId>,
        entry: QLabel,
        pos: FilePos,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent,
            children: Vec::new(),
            symbols: Vec::new(),
            names: HashMap::new(),
            formals: Vec::new(),
            var_args: false,
            literal: None,
            body: Vec::new(),
            entry,
            spec_offset: 0,
            spec_count: 0,
            free_temps: Vec::new(),
            stmt_temps: Vec::new(),
            temp_count: 0,
            pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_first_visits_parents_first() {
        let mut tab = ProcTab::new("u", QLabel(0));
        let a = tab.add("a", ScopeKind::Procedure, ProcId::ROOT, QLabel(1), FilePos::default());
        let b = tab.add("b", ScopeKind::Procedure, a, QLabel(2), FilePos::default());
        let c = tab.add("c", ScopeKind::Procedure, ProcId::ROOT, QLabel(3), FilePos::default());
        assert_eq!(tab.depth_first(), vec![a, b, c]);
        assert_eq!(tab.chain(b), vec![b, a, ProcId::ROOT]);
    }
}
