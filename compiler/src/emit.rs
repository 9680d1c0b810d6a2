//! Storage allocation, pcode emission and library output.

use std::collections::HashMap;

use bytecode::{
    CodeSpace, Label, Operand, OperandKind, PcodeBuilder, PcodeRecord, SELF_UNIT, encode_all,
};
use library::{
    ControlRecord, ImportRecord, IntegerRecord, Library, LibraryError, OpenMode, ProcRecord,
    ProcRecordKind, RealRecord, SlotRecord, SourceText, StreamId, StringRecord, SymFlags, SymKind,
    SymtabRecord, UnitKind, body_unit_name, file_unit_name, fold_name,
};

use crate::error::CompileError;
use crate::proctab::ProcId;
use crate::quads::{QLabel, QOperand, Quad};
use crate::symtab::SymAux;
use crate::unit::CompUnit;

/// Everything written for one unit.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub key: String,
    pub control: ControlRecord,
    pub init: Vec<PcodeRecord>,
    pub body: Vec<PcodeRecord>,
    pub slot_init: Vec<PcodeRecord>,
    pub integers: Vec<IntegerRecord>,
    pub reals: Vec<RealRecord>,
    pub strings: Vec<StringRecord>,
    pub procs: Vec<ProcRecord>,
    pub symtab: Vec<SymtabRecord>,
    pub public: Vec<SymtabRecord>,
    pub imports: Vec<ImportRecord>,
    pub inherits: Vec<ImportRecord>,
    pub slots: Vec<SlotRecord>,
}

/// Quad labels of one builder.
struct Labels(HashMap<QLabel, Label>);

impl Labels {
    fn get(&mut self, builder: &mut PcodeBuilder, label: QLabel) -> Label {
        *self.0.entry(label).or_insert_with(|| builder.new_label())
    }
}

/// Copies `records` into the builder, shifting labels into `space` by the
/// offset the copy starts at.
fn emit_block(builder: &mut PcodeBuilder, records: &[PcodeRecord], space: CodeSpace) {
    let base = builder.current_offset();
    for record in records {
        let mut operands = record.operands;
        for (operand, kind) in operands.iter_mut().zip(record.op.operand_kinds()) {
            if kind != OperandKind::Label {
                continue;
            }
            let (target_space, offset) = operand.decode_label();
            if target_space == space {
                *operand = Operand::label(space, offset + base);
            }
        }
        builder.set_pos(record.pos);
        builder.emit(record.op, &operands);
    }
}

impl CompUnit<'_> {
    /// Library key of the unit being compiled.
    pub fn key(&self) -> String {
        if self.kind.is_body() {
            body_unit_name(&self.name)
        } else {
            fold_name(&self.name)
        }
    }

    fn reserved(&self) -> u32 {
        self.spec.as_ref().map_or(0, |s| s.control.spec_count)
    }

    // ── allocation ─────────────────────────────────────────────────

    /// Gives every own symbol a table offset: literals first, then the
    /// unit's variables, then one contiguous area per procedure.
    pub fn allocate(&mut self) -> u32 {
        let mut next = self.reserved();
        let pending: Vec<_> = self
            .symtab
            .iter()
            .filter(|(_, s)| s.is_own() && s.offset.is_none() && s.kind.is_literal())
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            self.symtab.get_mut(id).offset = Some(next);
            next += 1;
        }

        let selectors: Vec<_> = self
            .symtab
            .iter()
            .filter_map(|(id, s)| match s.aux {
                SymAux::Selector(lit) if s.offset.is_none() => Some((id, lit)),
                _ => None,
            })
            .collect();
        for (id, lit) in selectors {
            let offset = self.symtab.get(lit).offset;
            self.symtab.get_mut(id).offset = offset;
        }

        for id in self.procs.get(ProcId::ROOT).symbols.clone() {
            let symbol = self.symtab.get_mut(id);
            if symbol.offset.is_none() {
                symbol.offset = Some(next);
                symbol.flags |= SymFlags::ALLOCED;
                next += 1;
            }
        }
        for pid in self.procs.depth_first() {
            let start = next;
            for id in self.procs.get(pid).symbols.clone() {
                let symbol = self.symtab.get_mut(id);
                symbol.offset = Some(next);
                symbol.flags |= SymFlags::ALLOCED;
                next += 1;
            }
            let proc = self.procs.get_mut(pid);
            proc.spec_offset = start;
            proc.spec_count = next - start;
        }
        log::debug!("{}: {} table entries ({} reserved)", self.name, next, self.reserved());
        next
    }

    // ── pcode ──────────────────────────────────────────────────────

    fn operand(&self, operand: QOperand) -> Result<Operand, CompileError> {
        Ok(match operand {
            QOperand::None | QOperand::Label(_) => Operand::NONE,
            QOperand::Sym(id) => {
                let symbol = self.symtab.get(id);
                let offset = symbol.offset.ok_or_else(|| {
                    CompileError::Internal(format!("`{}` has no table offset", symbol.name))
                })?;
                Operand::spec(symbol.unit_num, offset as i32)
            }
            QOperand::Imm(v) | QOperand::Int(v) => Operand::literal(v),
            QOperand::Slot(slot) => Operand::slot(self.slots.number_of(slot) as i32),
            QOperand::Class(unit_num) => Operand::new(unit_num, 0),
        })
    }

    fn emit_quads(
        &self,
        builder: &mut PcodeBuilder,
        labels: &mut Labels,
        quads: &[Quad],
    ) -> Result<(), CompileError> {
        for quad in quads {
            match quad {
                Quad::Label(label) => {
                    let label = labels.get(builder, *label);
                    builder.bind(label)?;
                }
                Quad::Block { records, space } => emit_block(builder, records, *space),
                Quad::Code { op, operands, pos } => {
                    builder.set_pos(*pos);
                    let target = operands.iter().find_map(|o| match o {
                        QOperand::Label(l) => Some(*l),
                        _ => None,
                    });
                    match target {
                        Some(target) => {
                            let mut rest = Vec::with_capacity(2);
                            for o in operands {
                                if !matches!(o, QOperand::Label(_) | QOperand::None) {
                                    rest.push(self.operand(*o)?);
                                }
                            }
                            let label = labels.get(builder, target);
                            builder.emit_jump(*op, &rest, label)?;
                        }
                        None => {
                            let mut mapped = [Operand::NONE; 3];
                            for (dst, src) in mapped.iter_mut().zip(operands) {
                                *dst = self.operand(*src)?;
                            }
                            builder.emit(*op, &mapped);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the init and body pcode; returns the entry offset of every
    /// procedure.
    fn generate_pcode(
        &self,
    ) -> Result<(Vec<PcodeRecord>, Vec<PcodeRecord>, HashMap<ProcId, u32>), CompileError> {
        let mut builder = PcodeBuilder::new();
        let mut labels = Labels(HashMap::new());
        let root = self.procs.get(ProcId::ROOT);
        if self.kind == UnitKind::Program {
            builder.set_space(CodeSpace::Body);
        } else {
            builder.set_space(CodeSpace::Init);
            if let Some(spec) = &self.spec {
                let count = spec.control.spec_init_count as usize;
                emit_block(&mut builder, &spec.init[..count.min(spec.init.len())], CodeSpace::Init);
            }
        }
        self.emit_quads(&mut builder, &mut labels, &root.body)?;

        builder.set_space(CodeSpace::Body);
        let mut entries = HashMap::new();
        for pid in self.procs.depth_first() {
            let proc = self.procs.get(pid);
            entries.insert(pid, builder.current_offset());
            let entry = labels.get(&mut builder, proc.entry);
            builder.bind(entry)?;
            self.emit_quads(&mut builder, &mut labels, &proc.body)?;
        }
        let (init, body) = builder.finish()?;
        Ok((init, body, entries))
    }

    /// The leading part of `initobj` a derived body copies: instance
    /// variable initializers of this specification.
    fn generate_slot_init(&self) -> Result<Vec<PcodeRecord>, CompileError> {
        let Some(initobj) = self.initobj.filter(|_| self.kind.is_spec()) else {
            return Ok(Vec::new());
        };
        let quads = &self.procs.get(initobj).body;
        let mut builder = PcodeBuilder::new();
        let mut labels = Labels(HashMap::new());
        self.emit_quads(&mut builder, &mut labels, &quads[..self.slot_init_len.min(quads.len())])?;
        let (_, body) = builder.finish()?;
        Ok(body)
    }

    // ── streams ────────────────────────────────────────────────────

    /// Allocates storage and produces every stream of the unit.
    pub fn emit_unit(&mut self) -> Result<Emitted, CompileError> {
        let spec_count = self.allocate();
        let (init, body, entries) = self.generate_pcode()?;
        let slot_init = self.generate_slot_init()?;
        let reserved = self.reserved();

        let mut integers = Vec::new();
        let mut reals = Vec::new();
        let mut strings = Vec::new();
        let mut procs = Vec::new();
        for (_, symbol) in self.symtab.iter() {
            let Some(offset) = symbol.offset.filter(|_| symbol.is_own()) else {
                continue;
            };
            if offset < reserved && !matches!(symbol.aux, SymAux::Proc(_)) {
                continue;
            }
            match &symbol.aux {
                SymAux::Integer(value) => integers.push(IntegerRecord {
                    offset,
                    negative: value.is_negative(),
                    cells: value.cells().to_vec(),
                }),
                SymAux::Real(value) => reals.push(RealRecord { offset, value: *value }),
                SymAux::String(value) => strings.push(StringRecord {
                    offset,
                    value: value.clone(),
                }),
                SymAux::Proc(pid) => {
                    let proc = self.procs.get(*pid);
                    let parent_offset = match proc.parent {
                        Some(parent) if parent != ProcId::ROOT => self
                            .procs
                            .get(parent)
                            .literal
                            .and_then(|l| self.symtab.get(l).offset)
                            .map_or(-1, |o| o as i32),
                        _ => -1,
                    };
                    procs.push(ProcRecord {
                        offset,
                        name: symbol.name.clone(),
                        kind: ProcRecordKind::User,
                        parent_offset,
                        entry: entries.get(pid).copied().unwrap_or(0),
                        spec_offset: proc.spec_offset,
                        spec_count: proc.spec_count,
                        formal_count: proc.formals.len() as u32,
                        var_args: proc.var_args,
                    });
                }
                SymAux::Builtin(index) => {
                    let builtin = bytecode::BUILTINS[*index as usize];
                    procs.push(ProcRecord {
                        offset,
                        name: symbol.name.clone(),
                        kind: ProcRecordKind::Builtin,
                        parent_offset: -1,
                        entry: *index as u32,
                        spec_offset: 0,
                        spec_count: 0,
                        formal_count: builtin.formals,
                        var_args: builtin.var_args,
                    });
                }
                SymAux::Native(index) => procs.push(ProcRecord {
                    offset,
                    name: symbol.name.clone(),
                    kind: ProcRecordKind::Native,
                    parent_offset: -1,
                    entry: *index,
                    spec_offset: 0,
                    spec_count: 0,
                    formal_count: symbol.formals.len() as u32,
                    var_args: symbol.var_args(),
                }),
                SymAux::None if matches!(symbol.kind, SymKind::Procedure | SymKind::Method) => {
                    procs.push(ProcRecord {
                        offset,
                        name: symbol.name.clone(),
                        kind: ProcRecordKind::User,
                        parent_offset: -1,
                        entry: 0,
                        spec_offset: 0,
                        spec_count: 0,
                        formal_count: symbol.formals.len() as u32,
                        var_args: symbol.var_args(),
                    })
                }
                _ => {}
            }
        }

        let symtab: Vec<SymtabRecord> = self
            .symtab
            .iter()
            .filter(|(_, s)| {
                s.is_own()
                    && s.owner == Some(ProcId::ROOT)
                    && s.kind != SymKind::Slot
                    && !s.flags.contains(SymFlags::HIDDEN)
            })
            .map(|(_, s)| s.to_record())
            .collect();
        let public: Vec<SymtabRecord> = if self.kind.is_spec() {
            symtab.iter().filter(|r| r.flags.contains(SymFlags::PUBLIC)).cloned().collect()
        } else {
            Vec::new()
        };

        let (inherited, used) = self.units.split_at(self.inherit_count);
        let inherits: Vec<ImportRecord> = inherited.iter().map(|u| u.record.clone()).collect();
        let imports: Vec<ImportRecord> = used.iter().map(|u| u.record.clone()).collect();

        let slots: Vec<SlotRecord> = self
            .slots
            .records()
            .into_iter()
            .zip(self.slots.iter())
            .map(|(mut record, entry)| {
                if record.is_method && record.unit_num == SELF_UNIT {
                    if let Some(offset) = entry.symbol.and_then(|s| self.symtab.get(s).offset) {
                        record.offset = offset as i32;
                    }
                }
                record
            })
            .collect();

        let mut control = ControlRecord::new(self.kind);
        control.needs_body = self.needs_body;
        match &self.spec {
            Some(spec) => {
                control.spec_time_stamp = spec.control.time_stamp;
                control.source_name = spec.control.source_name.clone();
                control.body_source_name = self.file.clone();
                control.spec_spec_count = spec.control.spec_count;
                control.spec_init_count = spec.control.spec_init_count;
            }
            None => {
                control.source_name = self.file.clone();
                control.spec_spec_count = spec_count;
                control.spec_init_count = if self.kind.is_spec() {
                    init.len().saturating_sub(1) as u32
                } else {
                    0
                };
            }
        }
        control.spec_count = spec_count;
        control.slot_init_count = slot_init.len() as u32;
        control.import_count = imports.len() as u32;
        control.inherit_count = inherits.len() as u32;
        control.unit_count = self.units.len() as u32 + bytecode::FIRST_IMPORT_UNIT as u32;
        control.symtab_count = symtab.len() as u32;
        control.init_count = init.len() as u32;
        control.body_count = body.len() as u32;
        control.integer_count = integers.len() as u32;
        control.real_count = reals.len() as u32;
        control.string_count = strings.len() as u32;
        control.proc_count = procs.len() as u32;
        control.label_count = 0;
        control.slot_count = slots.len() as u32;
        control.max_slot = self.slots.max_slot();
        control.initobj_offset = self
            .initobj
            .and_then(|pid| self.procs.get(pid).literal)
            .and_then(|lit| self.symtab.get(lit).offset)
            .unwrap_or(u32::MAX);

        Ok(Emitted {
            key: self.key(),
            control,
            init,
            body,
            slot_init,
            integers,
            reals,
            strings,
            procs,
            symtab,
            public,
            imports,
            inherits,
            slots,
        })
    }
}

impl Emitted {
    /// Stores the unit in the first writable library file.
    pub fn write(&self, library: &mut Library) -> Result<(), CompileError> {
        let mut unit = library
            .open_libunit(&self.key, None, OpenMode::Write)
            .ok_or_else(|| LibraryError::WriteProtected(self.key.clone()))?;
        unit.write_records(StreamId::Integer, &self.integers)?;
        unit.write_records(StreamId::Real, &self.reals)?;
        unit.write_records(StreamId::String, &self.strings)?;
        unit.write_records(StreamId::Procedure, &self.procs)?;
        unit.write_records::<library::LabelRecord>(StreamId::Label, &[])?;
        unit.write_libstr(StreamId::InitPcode, &encode_all(&self.init))?;
        unit.write_libstr(StreamId::SlotInitPcode, &encode_all(&self.slot_init))?;
        unit.write_libstr(StreamId::BodyPcode, &encode_all(&self.body))?;
        unit.write_records(StreamId::Symtab, &self.symtab)?;
        unit.write_records(StreamId::Public, &self.public)?;
        unit.write_records(StreamId::Import, &self.imports)?;
        unit.write_records(StreamId::Inherit, &self.inherits)?;
        unit.write_records(StreamId::DeclaredSlot, &self.slots)?;
        unit.set_control(&self.control)?;
        library.close_libunit(unit)?;
        log::info!(
            "stored {} `{}`: {} init, {} body records",
            self.control.kind,
            self.key,
            self.init.len(),
            self.body.len()
        );
        Ok(())
    }
}

/// Stores the text of a source file so runtime errors can show it.
pub fn write_file_unit(
    library: &mut Library,
    path: &str,
    source: &str,
) -> Result<(), CompileError> {
    let key = file_unit_name(path);
    let text = SourceText::new(source.as_bytes().to_vec());
    let mut unit = library
        .open_libunit(&key, None, OpenMode::Write)
        .ok_or_else(|| LibraryError::WriteProtected(key.clone()))?;
    let mut control = ControlRecord::new(UnitKind::FileUnit);
    control.source_name = path.to_string();
    unit.write_libstr(StreamId::Text, text.text())?;
    unit.write_libstr(StreamId::Length, &text.encode_lengths())?;
    unit.set_control(&control)?;
    library.close_libunit(unit)?;
    Ok(())
}

