//! Name resolution.
//!
//! Loads the interfaces a unit depends on from the library, declares the
//! unit's own names, and maps every identifier in the source onto a
//! [`Binding`].

use bytecode::{GlobalVar, PcodeDecoder, PcodeRecord, SELF_UNIT};
use library::{
    ControlRecord, ImportRecord, Library, LibraryError, OpenMode, SlotRecord, StreamId, SymFlags,
    SymKind, SymtabRecord, UnitKind, fold_name,
};
use object::{LongInt, Specifier, hash_of};
use parser::{Block, Decl, ProcDecl, Span, VarDecl};

use crate::error::{CompileError, SemanticError};
use crate::proctab::{ProcId, ScopeKind};
use crate::quads::{QOperand, Quad};
use crate::slots::SlotRef;
use crate::symtab::{FormalSig, SymAux, SymId, Symbol};
use crate::unit::{CompUnit, file_pos};

/// Interface of a used or inherited unit.
#[derive(Debug, Clone)]
pub struct ImportedUnit {
    pub name: String,
    pub kind: UnitKind,
    pub record: ImportRecord,
    pub public: Vec<SymtabRecord>,
    pub slots: Vec<SlotRecord>,
}

/// What a body needs from its specification.
#[derive(Debug, Clone)]
pub struct SpecInfo {
    pub control: ControlRecord,
    pub symtab: Vec<SymtabRecord>,
    pub slots: Vec<SlotRecord>,
    pub imports: Vec<ImportRecord>,
    pub inherits: Vec<ImportRecord>,
    pub init: Vec<PcodeRecord>,
    pub slot_init: Vec<PcodeRecord>,
}

fn unreadable(name: &str, err: LibraryError) -> SemanticError {
    SemanticError::Unreadable {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

pub fn load_interface(library: &Library, name: &str) -> Result<ImportedUnit, SemanticError> {
    let key = fold_name(name);
    let unit = library
        .open_libunit(&key, None, OpenMode::Read)
        .ok_or_else(|| SemanticError::SpecNotFound(key.clone()))?;
    let control = unit.control().map_err(|e| unreadable(&key, e))?;
    let public = unit.read_records(StreamId::Public).map_err(|e| unreadable(&key, e))?;
    let slots = unit.read_records(StreamId::DeclaredSlot).map_err(|e| unreadable(&key, e))?;
    log::trace!("loaded interface of {key} ({})", control.kind);
    Ok(ImportedUnit {
        record: ImportRecord {
            name: key.clone(),
            kind: control.kind,
            time_stamp: control.time_stamp,
            source_name: control.source_name.clone(),
        },
        name: key,
        kind: control.kind,
        public,
        slots,
    })
}

fn decode_pcode(unit: &library::LibUnit, id: StreamId) -> Result<Vec<PcodeRecord>, CompileError> {
    PcodeDecoder::decode_all(unit.stream(id)).map_err(|e| {
        CompileError::Library(LibraryError::CorruptUnit {
            unit: unit.name().to_string(),
            reason: format!("{} stream: {e}", id.name()),
        })
    })
}

/// Reads the specification a body of kind `body_kind` implements.
pub fn load_spec(
    library: &Library,
    name: &str,
    body_kind: UnitKind,
) -> Result<SpecInfo, CompileError> {
    let key = fold_name(name);
    let unit = library
        .open_libunit(&key, None, OpenMode::Read)
        .ok_or_else(|| CompileError::MissingSpec(key.clone()))?;
    let control = unit.control()?;
    let expected = body_kind.spec_kind().unwrap_or(body_kind);
    if control.kind != expected {
        return Err(CompileError::KindMismatch {
            unit: key,
            expected,
            found: control.kind,
        });
    }
    Ok(SpecInfo {
        symtab: unit.read_records(StreamId::Symtab)?,
        slots: unit.read_records(StreamId::DeclaredSlot)?,
        imports: unit.read_records(StreamId::Import)?,
        inherits: unit.read_records(StreamId::Inherit)?,
        init: decode_pcode(&unit, StreamId::InitPcode)?,
        slot_init: decode_pcode(&unit, StreamId::SlotInitPcode)?,
        control,
    })
}

/// Dependencies whose library copy no longer matches the recorded stamp
/// or source file.
pub fn stale_imports<'r>(
    library: &Library,
    unit: &str,
    records: impl IntoIterator<Item = &'r ImportRecord>,
) -> Vec<SemanticError> {
    let mut out = Vec::new();
    for record in records {
        match library.open_libunit(&record.name, None, OpenMode::Read).map(|u| u.control()) {
            None => out.push(SemanticError::SpecNotFound(record.name.clone())),
            Some(Err(e)) => out.push(unreadable(&record.name, e)),
            Some(Ok(control))
                if control.time_stamp != record.time_stamp
                    || control.source_name != record.source_name =>
            {
                out.push(SemanticError::StaleImport(unit.to_string(), record.name.clone()))
            }
            Some(Ok(_)) => {}
        }
    }
    out
}

/// Meaning of an identifier at one use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    /// A specifier in this or an imported unit's table.
    Sym(SymId),
    /// A procedure whose signature is known here.
    Proc(SymId),
    Builtin(u16),
    Class(i16),
    Package(i16),
    /// Instance variable or method of `self`.
    SelfSlot(SlotRef),
    Global(i32),
}

fn formal_flags(sig: &FormalSig) -> SymFlags {
    let mut flags = SymFlags::empty();
    if sig.mode.reads() {
        flags |= SymFlags::RPARAM;
    }
    if sig.mode.writes() {
        flags |= SymFlags::WPARAM;
    }
    flags
}

impl<'a> CompUnit<'a> {
    // ── header clauses ─────────────────────────────────────────────

    pub fn resolve_header(&mut self) -> Result<(), CompileError> {
        let ast = self.ast;
        if self.kind.is_body() {
            let spec = load_spec(self.library, &self.name, self.kind)?;
            let ancestors = spec.inherits.iter().chain(&spec.imports);
            let stale = stale_imports(self.library, &self.name, ancestors);
            for err in stale {
                self.error(ast.span, err);
            }
            for record in &spec.inherits {
                match load_interface(self.library, &record.name) {
                    Ok(unit) => self.units.push(unit),
                    Err(err) => self.error(ast.span, err),
                }
            }
            self.inherit_count = self.units.len();
            for record in &spec.imports {
                match load_interface(self.library, &record.name) {
                    Ok(unit) => self.units.push(unit),
                    Err(err) => self.error(ast.span, err),
                }
            }
            self.preset_spec(&spec);
            self.spec = Some(spec);
            if let Some((_, span)) = ast.inherits.first() {
                self.error(
                    *span,
                    SemanticError::SpecMismatch {
                        name: self.name.clone(),
                        reason: "inherit clauses belong in the specification".into(),
                    },
                );
            }
        } else {
            for (name, span) in &ast.inherits {
                self.add_inherit(name, *span);
            }
        }
        for (name, span) in &ast.uses {
            self.add_use(name, *span);
        }
        Ok(())
    }

    fn unit_num_of(&self, name: &str) -> Option<i16> {
        self.units
            .iter()
            .position(|u| u.name == name)
            .map(|i| i as i16 + bytecode::FIRST_IMPORT_UNIT)
    }

    fn add_inherit(&mut self, name: &str, span: Span) {
        if !self.is_class() {
            self.error(span, SemanticError::OutsideClass("inherit"));
            return;
        }
        let key = fold_name(name);
        if self.unit_num_of(&key).is_some() || key == self.name {
            self.error(span, SemanticError::Duplicate(key));
            return;
        }
        let unit = match load_interface(self.library, &key) {
            Ok(unit) => unit,
            Err(err) => return self.error(span, err),
        };
        if !matches!(unit.kind, UnitKind::ClassSpec | UnitKind::ProcessSpec) {
            self.error(
                span,
                SemanticError::TypeMismatch {
                    name: key,
                    expected: "class",
                    found: unit.kind,
                },
            );
            return;
        }
        let unit_num = self.units.len() as i16 + bytecode::FIRST_IMPORT_UNIT;
        for record in &unit.slots {
            if let Err(err) = self.slots.inherit(record, unit_num) {
                self.error(span, err);
            }
        }
        self.units.push(unit);
        self.inherit_count = self.units.len();
    }

    fn add_use(&mut self, name: &str, span: Span) {
        let key = fold_name(name);
        if self.unit_num_of(&key).is_some() || key == self.name {
            self.error(span, SemanticError::Duplicate(key));
            return;
        }
        match load_interface(self.library, &key) {
            Ok(unit) if unit.kind.is_spec() => self.units.push(unit),
            Ok(unit) => self.error(
                span,
                SemanticError::TypeMismatch {
                    name: key,
                    expected: "package or class",
                    found: unit.kind,
                },
            ),
            Err(err) => self.error(span, err),
        }
    }

    /// Makes the specification's names visible in its body at their
    /// recorded offsets.
    fn preset_spec(&mut self, spec: &SpecInfo) {
        for record in &spec.slots {
            self.slots.preset(record);
        }
        for record in &spec.symtab {
            if record.kind == SymKind::Slot {
                continue;
            }
            let mut symbol = Symbol::new(record.name.clone(), record.kind, Some(ProcId::ROOT));
            symbol.flags = record.flags;
            symbol.offset = u32::try_from(record.offset).ok();
            symbol.slot_num = u32::try_from(record.slot_num).ok();
            symbol.formals = record.formals.iter().map(FormalSig::from_record).collect();
            let id = self.symtab.add(symbol);
            match record.kind {
                SymKind::Method => {
                    self.spec_literals.insert(record.name.clone(), id);
                }
                SymKind::Procedure => {
                    self.spec_literals.insert(record.name.clone(), id);
                    if record.name != "initobj" {
                        self.procs.get_mut(ProcId::ROOT).names.insert(record.name.clone(), id);
                    }
                }
                _ => {
                    self.procs.get_mut(ProcId::ROOT).names.insert(record.name.clone(), id);
                }
            }
        }
    }

    // ── declarations ───────────────────────────────────────────────

    /// The implicit instance-creation procedure of a class unit.
    pub fn declare_initobj(&mut self) {
        let entry = self.new_label();
        let pid = self.procs.add("initobj", ScopeKind::Initobj, ProcId::ROOT, entry, self.pos);
        let lit = match self.spec_literals.remove("initobj") {
            Some(id) => id,
            None => self.symtab.add(Symbol::new("initobj", SymKind::Procedure, Some(ProcId::ROOT))),
        };
        self.symtab.get_mut(lit).aux = SymAux::Proc(pid);
        self.procs.get_mut(pid).literal = Some(lit);
        if let Some(spec) = &self.spec {
            let records = spec.slot_init.clone();
            self.procs.get_mut(pid).body.push(Quad::Block {
                records,
                space: bytecode::CodeSpace::Body,
            });
        }
        self.initobj = Some(pid);
    }

    /// Declares the names of `block` in `scope` and generates their
    /// initializers. Returns the procedures whose bodies are still to be
    /// generated.
    pub fn declare_block(
        &mut self,
        block: &'a Block,
        scope: ProcId,
    ) -> Vec<(ProcId, &'a ProcDecl)> {
        let mut nested = Vec::new();
        for decl in &block.decls {
            if let Decl::Proc(proc) = decl {
                if let Some(pid) = self.declare_proc(proc, scope) {
                    nested.push((pid, proc));
                }
            }
        }
        for decl in &block.decls {
            match decl {
                Decl::Var(vars) => {
                    for var in vars {
                        self.declare_var(var, scope, false);
                    }
                }
                Decl::Const(consts) => {
                    for var in consts {
                        self.declare_var(var, scope, true);
                    }
                }
                Decl::Sel(names) => {
                    for (name, span) in names {
                        self.declare_selector(name, *span, scope);
                    }
                }
                Decl::Proc(_) => {}
            }
        }
        nested
    }

    fn spec_flags(&self) -> SymFlags {
        if self.kind.is_spec() {
            SymFlags::PUBLIC | SymFlags::IN_SPEC
        } else {
            SymFlags::empty()
        }
    }

    fn declare_var(&mut self, var: &VarDecl, scope: ProcId, constant: bool) {
        self.pos = file_pos(var.span);
        if scope == ProcId::ROOT && self.is_class() && !constant {
            return self.declare_instance_var(var);
        }
        if scope == ProcId::ROOT && self.eval.is_some() && !constant {
            let index = self.eval.as_mut().map_or(0, |e| e.get_or_insert(&var.name));
            if let Some(init) = var.init {
                let mark = self.temp_mark();
                let value = self.gen_expr(init, None);
                self.emit(bytecode::Op::Sgvar, &[QOperand::Int(index), value]);
                self.release_temps(mark);
            }
            return;
        }
        if self.procs.get(scope).names.contains_key(&var.name) {
            return self.error(var.span, SemanticError::Duplicate(var.name.clone()));
        }
        let mut flags = if scope == ProcId::ROOT {
            self.spec_flags()
        } else {
            SymFlags::empty()
        };
        if constant {
            flags |= SymFlags::CONSTANT;
        }
        let id = self.add_var(&var.name, scope, flags, var.span);
        if let Some(init) = var.init {
            let mark = self.temp_mark();
            self.gen_expr(init, Some(QOperand::Sym(id)));
            self.symtab.get_mut(id).flags |= SymFlags::INITIALIZED;
            self.release_temps(mark);
        }
    }

    fn declare_instance_var(&mut self, var: &VarDecl) {
        let public = self.kind.is_spec();
        let mut symbol = Symbol::new(var.name.clone(), SymKind::Slot, Some(ProcId::ROOT));
        symbol.flags |= SymFlags::VISIBLE_SLOT | self.spec_flags();
        symbol.pos = file_pos(var.span);
        let sym = self.symtab.add(symbol);
        let slot = match self.slots.declare(&var.name, false, public, sym) {
            Ok(slot) => slot,
            Err(err) => return self.error(var.span, err),
        };
        let (Some(init), Some(initobj)) = (var.init, self.initobj) else {
            return;
        };
        let saved = self.cur;
        self.cur = initobj;
        let mark = self.temp_mark();
        let value = self.gen_expr(init, None);
        self.emit(bytecode::Op::SSlotSelf, &[QOperand::Slot(slot), value]);
        self.release_temps(mark);
        self.cur = saved;
    }

    fn declare_selector(&mut self, name: &str, span: Span, scope: ProcId) {
        if self.procs.get(scope).names.contains_key(name) {
            return self.error(span, SemanticError::Duplicate(name.to_string()));
        }
        let key = hash_of(&Specifier::string(name)) as i64;
        let lit = self.symtab.integer(LongInt::from_i64(key));
        let mut symbol = Symbol::new(name, SymKind::Selector, Some(scope));
        symbol.aux = SymAux::Selector(lit);
        symbol.flags |= SymFlags::CONSTANT;
        if scope == ProcId::ROOT {
            symbol.flags |= self.spec_flags();
        }
        symbol.pos = file_pos(span);
        let id = self.symtab.add(symbol);
        self.procs.get_mut(scope).names.insert(name.to_string(), id);
    }

    fn declare_proc(&mut self, decl: &ProcDecl, parent: ProcId) -> Option<ProcId> {
        self.pos = file_pos(decl.span);
        let is_method = parent == ProcId::ROOT && self.is_class();
        let formals: Vec<FormalSig> = decl
            .formals
            .iter()
            .map(|f| FormalSig {
                name: f.name.clone(),
                mode: f.mode,
            })
            .collect();
        if decl.var_args && formals.last().is_some_and(|f| f.mode != parser::FormalMode::Rd) {
            self.error(decl.span, SemanticError::VarArgsMode);
        }
        let mut lit_flags = SymFlags::empty();
        if decl.var_args {
            lit_flags |= SymFlags::VAR_ARGS;
        }
        let lit_kind = if is_method {
            SymKind::Method
        } else {
            SymKind::Procedure
        };

        if decl.body.is_none() {
            return self.declare_header(decl, formals, lit_kind, lit_flags, parent);
        }

        let spec_lit = if parent == ProcId::ROOT {
            self.spec_literals.remove(&decl.name)
        } else {
            None
        };
        let taken = self.procs.get(parent).names.contains_key(&decl.name);
        if spec_lit.is_none() && !is_method && taken {
            self.error(decl.span, SemanticError::Duplicate(decl.name.clone()));
            return None;
        }

        let entry = self.new_label();
        let kind = if is_method {
            ScopeKind::Method
        } else {
            ScopeKind::Procedure
        };
        let pid = self.procs.add(&decl.name, kind, parent, entry, file_pos(decl.span));
        for (formal, sig) in decl.formals.iter().zip(&formals) {
            let id = self.add_var(&formal.name, pid, formal_flags(sig), formal.span);
            self.procs.get_mut(pid).formals.push(id);
        }
        self.procs.get_mut(pid).var_args = decl.var_args;

        let lit = match spec_lit {
            Some(id) => {
                self.check_against_spec(id, decl, &formals, lit_kind);
                id
            }
            None => {
                let mut symbol = Symbol::new(decl.name.clone(), lit_kind, Some(parent));
                symbol.pos = file_pos(decl.span);
                self.symtab.add(symbol)
            }
        };
        let symbol = self.symtab.get_mut(lit);
        symbol.aux = SymAux::Proc(pid);
        symbol.formals = formals;
        symbol.flags |= lit_flags;
        self.procs.get_mut(pid).literal = Some(lit);

        if is_method {
            if let Err(err) = self.slots.declare(&decl.name, true, false, lit) {
                self.error(decl.span, err);
            }
        } else {
            self.procs.get_mut(parent).names.insert(decl.name.clone(), lit);
        }
        Some(pid)
    }

    /// A procedure header in a specification.
    fn declare_header(
        &mut self,
        decl: &ProcDecl,
        formals: Vec<FormalSig>,
        kind: SymKind,
        flags: SymFlags,
        parent: ProcId,
    ) -> Option<ProcId> {
        let mut symbol = Symbol::new(decl.name.clone(), kind, Some(parent));
        symbol.flags |= flags | SymFlags::PUBLIC | SymFlags::IN_SPEC;
        symbol.formals = formals;
        symbol.pos = file_pos(decl.span);
        if self.kind == UnitKind::NativePackage {
            symbol.aux = SymAux::Native(self.native_count);
            self.native_count += 1;
        } else {
            self.needs_body = true;
        }
        let id = self.symtab.add(symbol);
        if kind == SymKind::Method {
            if let Err(err) = self.slots.declare(&decl.name, true, true, id) {
                self.error(decl.span, err);
            }
        } else if self.procs.get(parent).names.contains_key(&decl.name) {
            self.error(decl.span, SemanticError::Duplicate(decl.name.clone()));
        } else {
            self.procs.get_mut(parent).names.insert(decl.name.clone(), id);
        }
        None
    }

    fn check_against_spec(
        &mut self,
        lit: SymId,
        decl: &ProcDecl,
        formals: &[FormalSig],
        kind: SymKind,
    ) {
        let spec = self.symtab.get(lit);
        let reason = if spec.kind != kind {
            Some(format!("declared as a {} in the specification", spec.kind.name()))
        } else if spec.formals.len() != formals.len() {
            Some(format!(
                "{} formal(s) in the specification, {} here",
                spec.formals.len(),
                formals.len()
            ))
        } else if let Some((s, b)) = spec.formals.iter().zip(formals).find(|(s, b)| s != b) {
            Some(format!("formal `{}` was `{}` ({:?})", b.name, s.name, s.mode))
        } else if spec.var_args() != decl.var_args {
            Some("variadic in only one declaration".into())
        } else {
            None
        };
        if let Some(reason) = reason {
            self.error(
                decl.span,
                SemanticError::SpecMismatch {
                    name: decl.name.clone(),
                    reason,
                },
            );
        }
    }

    // ── lookup ─────────────────────────────────────────────────────

    fn binding_of(&self, id: SymId) -> Binding {
        let symbol = self.symtab.get(id);
        match (&symbol.kind, &symbol.aux) {
            (_, SymAux::Builtin(index)) => Binding::Builtin(*index),
            (SymKind::Procedure | SymKind::Method, _) => Binding::Proc(id),
            (SymKind::Selector, SymAux::Selector(lit)) => Binding::Sym(*lit),
            _ => Binding::Sym(id),
        }
    }

    fn materialize(&mut self, unit_num: i16, record: &SymtabRecord) -> SymId {
        let key = (unit_num, record.name.clone());
        if let Some(id) = self.import_syms.get(&key) {
            return *id;
        }
        let mut symbol = Symbol::new(record.name.clone(), record.kind, None);
        symbol.unit_num = unit_num;
        symbol.offset = u32::try_from(record.offset).ok();
        symbol.flags = record.flags;
        symbol.formals = record.formals.iter().map(FormalSig::from_record).collect();
        let id = self.symtab.add(symbol);
        self.import_syms.insert(key, id);
        id
    }

    /// `unit.name`, for a used package or class.
    pub fn lookup_member(&mut self, unit_num: i16, name: &str, span: Span) -> Option<Binding> {
        if unit_num == SELF_UNIT {
            let id = self.procs.get(ProcId::ROOT).names.get(name).copied();
            return id.map(|id| self.binding_of(id));
        }
        let unit = self.imported(unit_num)?;
        let package = unit.name.clone();
        let record = unit
            .public
            .iter()
            .find(|r| r.name == name && !matches!(r.kind, SymKind::Method | SymKind::Slot))
            .cloned();
        match record {
            Some(record) => {
                let id = self.materialize(unit_num, &record);
                Some(self.binding_of(id))
            }
            None => {
                self.error(
                    span,
                    SemanticError::UnknownMember {
                        package,
                        name: name.to_string(),
                    },
                );
                None
            }
        }
    }

    /// Resolves an identifier used in the current scope, declaring it
    /// implicitly when nothing else matches.
    pub fn lookup(&mut self, name: &str, span: Span) -> Binding {
        if let Some(binding) = self.lookup_existing(name, span) {
            return binding;
        }
        if self.cur == ProcId::ROOT {
            if let Some(eval) = self.eval.as_mut() {
                return Binding::Global(eval.get_or_insert(name));
            }
        }
        let id = self.add_var(name, self.cur, SymFlags::empty(), span);
        Binding::Sym(id)
    }

    /// Like [`CompUnit::lookup`] but never declares.
    pub fn lookup_existing(&mut self, name: &str, span: Span) -> Option<Binding> {
        for scope in self.procs.chain(self.cur) {
            if let Some(id) = self.procs.get(scope).names.get(name) {
                return Some(self.binding_of(*id));
            }
        }
        if self.in_method() {
            if let Some(slot) = self.slots.find(name).filter(|s| self.slots.get(*s).in_class) {
                return Some(Binding::SelfSlot(slot));
            }
        }
        if name == self.name {
            return Some(if self.is_class() {
                Binding::Class(SELF_UNIT)
            } else {
                Binding::Package(SELF_UNIT)
            });
        }
        if let Some(unit_num) = self.unit_num_of(name) {
            let kind = self.imported(unit_num).map(|u| u.kind);
            return Some(match kind {
                Some(kind) if kind.is_class() => Binding::Class(unit_num),
                _ => Binding::Package(unit_num),
            });
        }
        let candidates: Vec<(i16, SymtabRecord)> = self
            .units
            .iter()
            .enumerate()
            .filter_map(|(i, u)| {
                u.public
                    .iter()
                    .find(|r| r.name == name && !matches!(r.kind, SymKind::Method | SymKind::Slot))
                    .map(|r| (i as i16 + bytecode::FIRST_IMPORT_UNIT, r.clone()))
            })
            .collect();
        if let Some((unit_num, record)) = candidates.first() {
            if candidates.len() > 1 {
                self.error(span, SemanticError::Ambiguous(name.to_string()));
            }
            let id = self.materialize(*unit_num, record);
            return Some(self.binding_of(id));
        }
        if let Some(global) = GlobalVar::lookup(name) {
            return Some(Binding::Global(global.index()));
        }
        if let Some(index) = bytecode::lookup_builtin(name) {
            return Some(Binding::Builtin(index));
        }
        if let Some(index) = self.eval.as_ref().and_then(|e| e.names.get(name)) {
            return Some(Binding::Global(*index));
        }
        None
    }

    pub fn is_read_only(&self, binding: Binding) -> bool {
        match binding {
            Binding::Sym(id) => {
                let symbol = self.symtab.get(id);
                symbol.flags.contains(SymFlags::CONSTANT) || symbol.kind != SymKind::Id
            }
            Binding::Global(index) => index == GlobalVar::CommandLine.index(),
            Binding::SelfSlot(slot) => self.slots.get(slot).is_method,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_interface_is_reported_by_name() {
        let library = Library::new();
        assert_eq!(
            load_interface(&library, "Nowhere").err(),
            Some(SemanticError::SpecNotFound("nowhere".into()))
        );
        assert!(matches!(
            load_spec(&library, "Nowhere", UnitKind::PackageBody),
            Err(CompileError::MissingSpec(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn imports_compiled_from_another_file_are_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut library = Library::new();
        library.add_lib_file(dir.path().join("test.lib"), true).unwrap();
        let mut c = crate::Compiler::new(library, crate::CompilerOptions::default())
            .with_report(Box::new(std::io::sink()));
        c.compile_source("package tools; procedure f(); end tools;", "tools.stl").unwrap();
        let control = c.library().read_unit("tools").unwrap().control().unwrap();
        let current = ImportRecord {
            name: "tools".into(),
            kind: UnitKind::PackageSpec,
            time_stamp: control.time_stamp,
            source_name: control.source_name.clone(),
        };
        assert!(stale_imports(c.library(), "user", [&current]).is_empty());

        let moved = ImportRecord {
            source_name: "elsewhere.stl".into(),
            ..current.clone()
        };
        assert_eq!(
            stale_imports(c.library(), "user", [&moved]),
            vec![SemanticError::StaleImport("user".into(), "tools".into())]
        );
    }

    #[test]
    fn formal_flags_follow_modes() {
        let sig = FormalSig {
            name: "y".into(),
            mode: parser::FormalMode::Wr,
        };
        assert_eq!(formal_flags(&sig), SymFlags::WPARAM);
    }
}
