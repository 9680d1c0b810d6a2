//! Per-unit compilation state.

use std::collections::HashMap;

use bytecode::{FilePos, Op};
use library::{Library, SymFlags, SymKind, UnitKind};
use parser::{AstArena, Span, Unit, UnitHeader};

use crate::error::{Diagnostic, Diagnostics, SemanticError};
use crate::proctab::{ProcId, ProcTab, ScopeKind};
use crate::quads::{QLabel, QOperand, Quad};
use crate::resolve::{ImportedUnit, SpecInfo};
use crate::slots::{SlotNumbers, SlotTable};
use crate::symtab::{SymId, Symbol, Symtab};

/// Top-level variables of `eval` fragments, kept between compilations.
#[derive(Debug)]
pub struct EvalGlobals {
    pub names: HashMap<String, i32>,
    pub next: i32,
}

impl Default for EvalGlobals {
    fn default() -> Self {
        Self {
            names: HashMap::new(),
            next: bytecode::FIRST_EVAL_GLOBAL,
        }
    }
}

impl EvalGlobals {
    pub fn get_or_insert(&mut self, name: &str) -> i32 {
        if let Some(index) = self.names.get(name) {
            return *index;
        }
        let index = self.next;
        self.next += 1;
        self.names.insert(name.to_string(), index);
        index
    }
}

pub fn unit_kind(header: UnitHeader) -> UnitKind {
    match header {
        UnitHeader::Program => UnitKind::Program,
        UnitHeader::Package => UnitKind::PackageSpec,
        UnitHeader::PackageBody => UnitKind::PackageBody,
        UnitHeader::Class => UnitKind::ClassSpec,
        UnitHeader::ClassBody => UnitKind::ClassBody,
        UnitHeader::Process => UnitKind::ProcessSpec,
        UnitHeader::ProcessBody => UnitKind::ProcessBody,
        UnitHeader::NativePackage => UnitKind::NativePackage,
    }
}

pub fn file_pos(span: Span) -> FilePos {
    FilePos::new(span.start.line as i32, span.start.column as i32)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopLabels {
    pub next: QLabel,
    pub exit: QLabel,
}

pub(crate) struct CompUnit<'a> {
    pub arena: &'a AstArena,
    pub ast: &'a Unit,
    pub kind: UnitKind,
    pub name: String,
    pub file: String,
    pub library: &'a Library,
    pub symtab: Symtab,
    pub procs: ProcTab,
    pub slots: SlotTable,
    /// Inherited then imported units; unit number `i + 2`.
    pub units: Vec<ImportedUnit>,
    pub inherit_count: usize,
    pub spec: Option<SpecInfo>,
    pub diagnostics: Diagnostics,
    pub eval: Option<&'a mut EvalGlobals>,
    /// Slot numbers shared with the other units of this compilation.
    pub slot_numbers: &'a mut SlotNumbers,
    pub initobj: Option<ProcId>,
    /// Quads of the `initobj` body that form the slot-initialization stream.
    pub slot_init_len: usize,
    pub needs_body: bool,
    /// Procedure literals a body still has to define, by name.
    pub spec_literals: HashMap<String, SymId>,
    /// Imported public symbols already materialized, by `(unit_num, name)`.
    pub import_syms: HashMap<(i16, String), SymId>,
    pub native_count: u32,
    pub cur: ProcId,
    pub loops: Vec<LoopLabels>,
    next_label: u32,
    pub pos: FilePos,
}

impl<'a> CompUnit<'a> {
    pub fn new(
        arena: &'a AstArena,
        ast: &'a Unit,
        file: &str,
        library: &'a Library,
        eval: Option<&'a mut EvalGlobals>,
        slot_numbers: &'a mut SlotNumbers,
    ) -> Self {
        let kind = unit_kind(ast.header);
        let name = library::fold_name(&ast.name);
        let procs = ProcTab::new(&name, QLabel(0));
        Self {
            arena,
            ast,
            kind,
            name,
            file: file.to_string(),
            library,
            symtab: Symtab::new(),
            procs,
            slots: SlotTable::new(),
            units: Vec::new(),
            inherit_count: 0,
            spec: None,
            diagnostics: Diagnostics::default(),
            eval,
            slot_numbers,
            initobj: None,
            slot_init_len: 0,
            needs_body: false,
            spec_literals: HashMap::new(),
            import_syms: HashMap::new(),
            native_count: 0,
            cur: ProcId::ROOT,
            loops: Vec::new(),
            next_label: 1,
            pos: file_pos(ast.span),
        }
    }

    pub fn is_class(&self) -> bool {
        self.kind.is_class()
    }

    pub fn error(&mut self, span: Span, error: SemanticError) {
        self.diagnostics.push(Diagnostic {
            file: self.file.clone(),
            pos: file_pos(span),
            error,
        });
    }

    // ── quads ──────────────────────────────────────────────────────

    pub fn emit(&mut self, op: Op, operands: &[QOperand]) {
        let quad = Quad::code(op, operands, self.pos);
        self.procs.get_mut(self.cur).body.push(quad);
    }

    pub fn new_label(&mut self) -> QLabel {
        self.next_label += 1;
        QLabel(self.next_label - 1)
    }

    pub fn bind(&mut self, label: QLabel) {
        self.procs.get_mut(self.cur).body.push(Quad::Label(label));
    }

    pub fn jump(&mut self, op: Op, operand: QOperand, label: QLabel) {
        match op {
            Op::Go => self.emit(op, &[QOperand::Label(label)]),
            _ => self.emit(op, &[operand, QOperand::Label(label)]),
        }
    }

    // ── temporaries ────────────────────────────────────────────────

    pub fn temp(&mut self) -> QOperand {
        let cur = self.cur;
        if let Some(id) = self.procs.get_mut(cur).free_temps.pop() {
            self.procs.get_mut(cur).stmt_temps.push(id);
            return QOperand::Sym(id);
        }
        let n = self.procs.get(cur).temp_count;
        let mut symbol = Symbol::new(format!("$t{n}"), SymKind::Id, Some(cur));
        symbol.flags |= SymFlags::HIDDEN;
        let id = self.symtab.add(symbol);
        let proc = self.procs.get_mut(cur);
        proc.temp_count += 1;
        proc.symbols.push(id);
        proc.stmt_temps.push(id);
        QOperand::Sym(id)
    }

    pub fn temp_mark(&self) -> usize {
        self.procs.get(self.cur).stmt_temps.len()
    }

    pub fn release_temps(&mut self, mark: usize) {
        let proc = self.procs.get_mut(self.cur);
        let freed = proc.stmt_temps.split_off(mark.min(proc.stmt_temps.len()));
        proc.free_temps.extend(freed);
    }

    // ── scopes ─────────────────────────────────────────────────────

    /// Adds a variable owned by `scope` and binds its name there.
    pub fn add_var(&mut self, name: &str, scope: ProcId, flags: SymFlags, span: Span) -> SymId {
        let mut symbol = Symbol::new(name, SymKind::Id, Some(scope));
        symbol.flags |= flags;
        symbol.pos = file_pos(span);
        let id = self.symtab.add(symbol);
        let proc = self.procs.get_mut(scope);
        proc.symbols.push(id);
        proc.names.insert(name.to_string(), id);
        id
    }

    /// Whether code in the current scope runs with a `self`.
    pub fn in_method(&self) -> bool {
        self.is_class()
            && self
                .procs
                .chain(self.cur)
                .iter()
                .any(|p| matches!(self.procs.get(*p).kind, ScopeKind::Method | ScopeKind::Initobj))
    }

    pub fn imported(&self, unit_num: i16) -> Option<&ImportedUnit> {
        let index = usize::try_from(unit_num - bytecode::FIRST_IMPORT_UNIT).ok()?;
        self.units.get(index)
    }
}
