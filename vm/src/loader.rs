//! Brings compiled units into memory.
//!
//! A specification and its body are merged into one [`LoadedUnit`]: the
//! specifier table holds the spec's literal pools overlaid with the
//! body's, and the code comes from the body. Operands are rewritten so
//! unit numbers index the image directly and slot numbers are global.

use std::collections::HashMap;
use std::rc::Rc;

use bytecode::{LITERAL_UNIT, OperandKind, PcodeDecoder, PcodeRecord, SELF_UNIT};
use library::{
    ImportRecord, IntegerRecord, LabelRecord, LibUnit, Library, ProcRecord,
    ProcRecordKind, RealRecord, SlotRecord, SourceText, StreamId, StringRecord, TimeStamp, UnitKind,
    body_unit_name, file_unit_name, fold_name,
};
use object::{ClassId, CodeAddr, LongInt, ProcBody, ProcKind, Specifier};

use crate::error::LoadError;

/// A procedure of a loaded unit.
#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub name: Rc<str>,
    /// Body pcode index of the first record.
    pub entry: u32,
    pub area_start: u32,
    pub area_len: u32,
    pub formal_count: u32,
    pub var_args: bool,
    /// Lexically enclosing procedure.
    pub parent: Option<u32>,
}

impl ProcInfo {
    pub fn accepts(&self, argc: usize) -> bool {
        if self.var_args {
            argc + 1 >= self.formal_count as usize
        } else {
            argc == self.formal_count as usize
        }
    }
}

#[derive(Debug, Default)]
pub struct LoadedUnit {
    /// Library key of the specification (or program).
    pub name: String,
    pub kind: Option<UnitKind>,
    /// Source file the code was compiled from.
    pub source_name: String,
    pub time_stamp: TimeStamp,
    /// Source file of the specification.
    pub spec_source: String,
    pub table: Vec<Specifier>,
    pub init: Vec<PcodeRecord>,
    pub body: Vec<PcodeRecord>,
    pub procs: Vec<ProcInfo>,
    /// Procedure index + 1 owning each table entry, 0 for unit variables.
    area_owner: Vec<u32>,
    /// Image indices of compile-time units 2, 3, ...
    pub units: Vec<usize>,
    pub class: Option<ClassId>,
    pub initobj: Option<Specifier>,
}

impl LoadedUnit {
    pub fn area_owner(&self, offset: usize) -> Option<u32> {
        match self.area_owner.get(offset) {
            Some(0) | None => None,
            Some(owner) => Some(owner - 1),
        }
    }

    pub fn is_native(&self) -> bool {
        self.kind == Some(UnitKind::NativePackage)
    }
}

#[derive(Debug, Clone)]
pub enum SlotKind {
    Var(usize),
    Method(Specifier),
}

#[derive(Debug, Clone)]
pub struct SlotBinding {
    pub kind: SlotKind,
    pub public: bool,
}

/// Runtime view of a class: where each slot lives in an instance.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: Rc<str>,
    pub unit: usize,
    pub is_process: bool,
    pub var_count: usize,
    pub slots: HashMap<u32, SlotBinding>,
    /// Instance initializers, most distant ancestor first.
    pub initobjs: Vec<Specifier>,
    /// This class followed by all its ancestors.
    pub lineage: Vec<ClassId>,
}

impl ClassInfo {
    pub fn descends_from(&self, other: ClassId) -> bool {
        self.lineage.contains(&other)
    }
}

/// Slot names interned across every loaded unit.
#[derive(Debug, Default)]
pub struct SlotNames {
    names: Vec<Rc<str>>,
    numbers: HashMap<String, u32>,
}

impl SlotNames {
    pub fn intern(&mut self, name: &str) -> u32 {
        let key = fold_name(name);
        if let Some(n) = self.numbers.get(&key) {
            return *n;
        }
        let n = self.names.len() as u32;
        self.names.push(Rc::from(key.as_str()));
        self.numbers.insert(key, n);
        n
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.numbers.get(&fold_name(name)).copied()
    }

    pub fn name(&self, number: u32) -> &str {
        self.names.get(number as usize).map_or("?", |n| n)
    }
}

/// Every unit loaded for one program run.
#[derive(Debug, Default)]
pub struct Image {
    pub units: Vec<LoadedUnit>,
    pub classes: Vec<ClassInfo>,
    pub slots: SlotNames,
    by_name: HashMap<String, usize>,
    /// Units in the order their initialization must run.
    pub init_order: Vec<usize>,
    sources: HashMap<String, Option<SourceText>>,
}

fn stale(unit: &str, reason: impl Into<String>) -> LoadError {
    LoadError::StaleDependency {
        unit: unit.to_string(),
        reason: reason.into(),
    }
}

fn malformed(unit: &str, reason: impl Into<String>) -> LoadError {
    LoadError::Malformed {
        unit: unit.to_string(),
        reason: reason.into(),
    }
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(&fold_name(name)).copied()
    }

    /// Loads `name` and, first, everything it depends on.
    ///
    /// `expected` is the manifest entry of the importing unit; its time
    /// stamp must match the unit found in the library.
    pub fn load(
        &mut self,
        library: &Library,
        name: &str,
        expected: Option<&ImportRecord>,
    ) -> Result<usize, LoadError> {
        let key = fold_name(name);
        if let Some(&index) = self.by_name.get(&key) {
            if let Some(record) = expected {
                let unit = &self.units[index];
                if unit.time_stamp != record.time_stamp || unit.spec_source != record.source_name {
                    let reason = "specification changed since the importer was compiled";
                    return Err(stale(&key, reason));
                }
            }
            return Ok(index);
        }

        let spec = library.read_unit(&key)?;
        let spec_control = spec.control()?;
        if let Some(record) = expected {
            if record.time_stamp != spec_control.time_stamp
                || record.source_name != spec_control.source_name
            {
                return Err(stale(
                    &key,
                    format!(
                        "compiled {} from {}, importer expects {} from {}",
                        spec_control.time_stamp,
                        spec_control.source_name,
                        record.time_stamp,
                        record.source_name
                    ),
                ));
            }
        }
        let body = if spec_control.needs_body {
            let body = library.read_unit(&body_unit_name(&key))?;
            let body_control = body.control()?;
            if body_control.spec_time_stamp != spec_control.time_stamp {
                return Err(stale(&key, "body was compiled against an older specification"));
            }
            Some((body, body_control))
        } else {
            None
        };

        let index = self.units.len();
        self.units.push(LoadedUnit {
            name: key.clone(),
            kind: Some(spec_control.kind),
            time_stamp: spec_control.time_stamp,
            ..LoadedUnit::default()
        });
        self.by_name.insert(key.clone(), index);

        let (code, control) = match &body {
            Some((unit, control)) => (unit, control),
            None => (&spec, &spec_control),
        };
        log::debug!("loading {} `{key}` as unit {index}", spec_control.kind);

        let table_len = control.spec_count.max(spec_control.spec_count) as usize;
        let mut table = vec![Specifier::Omega; table_len];
        if body.is_some() {
            load_pools(&spec, &key, index, &mut table, false)?;
        }
        let proc_records = load_pools(code, &key, index, &mut table, true)?;

        let inherits: Vec<ImportRecord> = code.read_records(StreamId::Inherit)?;
        let imports: Vec<ImportRecord> = code.read_records(StreamId::Import)?;
        let mut units = Vec::with_capacity(inherits.len() + imports.len());
        for record in inherits.iter().chain(imports.iter()) {
            units.push(self.load(library, &record.name, Some(record))?);
        }

        let slot_records: Vec<SlotRecord> = code.read_records(StreamId::DeclaredSlot)?;
        let slot_map: HashMap<u32, u32> = slot_records
            .iter()
            .map(|r| (r.slot_number, self.slots.intern(&r.name)))
            .collect();

        let decode = |id: StreamId| {
            PcodeDecoder::decode_all(code.stream(id)).map_err(|source| LoadError::Pcode {
                unit: key.clone(),
                source,
            })
        };
        let mut init = decode(StreamId::InitPcode)?;
        let mut body_code = decode(StreamId::BodyPcode)?;
        for record in init.iter_mut().chain(body_code.iter_mut()) {
            fix_operands(record, index, &units, &slot_map)
                .map_err(|reason| malformed(&key, reason))?;
        }

        let (procs, area_owner) = proc_infos(&proc_records, table.len());
        let initobj = match control.initobj_offset {
            u32::MAX => None,
            offset => table.get(offset as usize).cloned(),
        };

        let unit = &mut self.units[index];
        unit.source_name = if control.kind.is_body() {
            control.body_source_name.clone()
        } else {
            control.source_name.clone()
        };
        unit.spec_source = spec_control.source_name.clone();
        unit.table = table;
        unit.init = init;
        unit.body = body_code;
        unit.procs = procs;
        unit.area_owner = area_owner;
        unit.units = units;
        unit.initobj = initobj;

        if spec_control.kind.is_class() {
            let class = self.build_class(index, &slot_records, inherits.len())?;
            self.units[index].class = Some(class);
        }
        self.init_order.push(index);
        Ok(index)
    }

    fn build_class(
        &mut self,
        index: usize,
        records: &[SlotRecord],
        inherit_count: usize,
    ) -> Result<ClassId, LoadError> {
        let unit = &self.units[index];
        let id = ClassId(self.classes.len() as u32);
        let mut info = ClassInfo {
            id,
            name: Rc::from(unit.name.as_str()),
            unit: index,
            is_process: unit.kind.is_some_and(UnitKind::is_process),
            var_count: 0,
            slots: HashMap::new(),
            initobjs: Vec::new(),
            lineage: vec![id],
        };

        for &parent_unit in &unit.units[..inherit_count] {
            let parent = self.units[parent_unit]
                .class
                .and_then(|c| self.classes.get(c.0 as usize))
                .ok_or_else(|| {
                    let name = &self.units[parent_unit].name;
                    malformed(&unit.name, format!("inherits `{name}`, which is not a class"))
                })?;
            let mut inherited: Vec<(&u32, &SlotBinding)> = parent.slots.iter().collect();
            inherited.sort_by_key(|(slot, _)| **slot);
            for (slot, binding) in inherited {
                match &binding.kind {
                    SlotKind::Var(_) => {
                        if !info.slots.contains_key(slot) {
                            info.slots.insert(
                                *slot,
                                SlotBinding {
                                    kind: SlotKind::Var(info.var_count),
                                    public: binding.public,
                                },
                            );
                            info.var_count += 1;
                        }
                    }
                    SlotKind::Method(_) => {
                        info.slots.insert(*slot, binding.clone());
                    }
                }
            }
            for ancestor in &parent.lineage {
                if !info.lineage.contains(ancestor) {
                    info.lineage.push(*ancestor);
                }
            }
            for initobj in &parent.initobjs {
                if !info.initobjs.contains(initobj) {
                    info.initobjs.push(initobj.clone());
                }
            }
        }

        for record in records.iter().filter(|r| r.in_class && r.unit_num == SELF_UNIT) {
            let slot = self.slots.intern(&record.name);
            let kind = if record.is_method {
                match unit.table.get(record.offset.max(0) as usize) {
                    Some(method @ Specifier::Proc(_)) => SlotKind::Method(method.clone()),
                    _ => continue,
                }
            } else {
                match info.slots.get(&slot) {
                    Some(SlotBinding {
                        kind: SlotKind::Var(existing),
                        ..
                    }) => SlotKind::Var(*existing),
                    _ => {
                        info.var_count += 1;
                        SlotKind::Var(info.var_count - 1)
                    }
                }
            };
            info.slots.insert(
                slot,
                SlotBinding {
                    kind,
                    public: record.is_public,
                },
            );
        }
        if let Some(initobj) = &unit.initobj {
            info.initobjs.push(initobj.clone());
        }
        log::debug!(
            "class `{}`: {} instance variables, {} slots",
            info.name,
            info.var_count,
            info.slots.len()
        );
        self.classes.push(info);
        Ok(id)
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0 as usize]
    }

    /// Text of `line` in source file `file`, read from its file unit.
    pub fn source_line(&mut self, library: &Library, file: &str, line: i32) -> Option<String> {
        let text = self.sources.entry(file.to_string()).or_insert_with(|| {
            let unit = library.read_unit(&file_unit_name(file)).ok()?;
            SourceText::from_streams(
                unit.stream(StreamId::Text).to_vec(),
                unit.stream(StreamId::Length),
            )
            .ok()
        });
        let line = usize::try_from(line).ok()?;
        text.as_ref()?
            .line(line)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Native packages that are loaded.
    pub fn native_units(&self) -> impl Iterator<Item = &str> {
        self.units.iter().filter(|u| u.is_native()).map(|u| u.name.as_str())
    }
}

/// Fills `table` from a unit's literal pools and returns its procedure
/// records.
fn load_pools(
    unit: &LibUnit,
    key: &str,
    index: usize,
    table: &mut [Specifier],
    code_unit: bool,
) -> Result<Vec<ProcRecord>, LoadError> {
    let mut put = |offset: u32, value: Specifier| -> Result<(), LoadError> {
        let slot = table
            .get_mut(offset as usize)
            .ok_or_else(|| malformed(key, format!("literal at {offset} is outside the table")))?;
        *slot = value;
        Ok(())
    };
    for record in unit.read_records::<IntegerRecord>(StreamId::Integer)? {
        put(
            record.offset,
            Specifier::long(LongInt::from_parts(record.negative, record.cells)),
        )?;
    }
    for record in unit.read_records::<RealRecord>(StreamId::Real)? {
        put(record.offset, Specifier::real(record.value))?;
    }
    for record in unit.read_records::<StringRecord>(StreamId::String)? {
        put(record.offset, Specifier::string(record.value))?;
    }
    for record in unit.read_records::<LabelRecord>(StreamId::Label)? {
        let init = record.label < 0;
        let offset = if init {
            -(record.label + 1)
        } else {
            record.label
        } as u32;
        put(
            record.offset,
            Specifier::Label(CodeAddr {
                unit: index as u32,
                init,
                offset,
            }),
        )?;
    }
    let procs: Vec<ProcRecord> = unit.read_records(StreamId::Procedure)?;
    let mut user = 0u32;
    for record in &procs {
        let kind = match record.kind {
            ProcRecordKind::Builtin => ProcKind::Builtin(record.entry as u16),
            ProcRecordKind::Native => ProcKind::Native {
                unit: index as u32,
                index: record.entry,
            },
            ProcRecordKind::User => {
                user += 1;
                if !code_unit {
                    continue;
                }
                ProcKind::User {
                    unit: index as u32,
                    index: user - 1,
                }
            }
        };
        put(
            record.offset,
            Specifier::proc(ProcBody::new(
                kind,
                record.name.as_str(),
                record.formal_count,
                record.var_args,
            )),
        )?;
    }
    Ok(if code_unit { procs } else { Vec::new() })
}

fn proc_infos(records: &[ProcRecord], table_len: usize) -> (Vec<ProcInfo>, Vec<u32>) {
    let users: Vec<&ProcRecord> =
        records.iter().filter(|r| r.kind == ProcRecordKind::User).collect();
    let by_offset: HashMap<u32, u32> =
        users.iter().enumerate().map(|(i, r)| (r.offset, i as u32)).collect();
    let mut owner = vec![0u32; table_len];
    let procs = users
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let start = r.spec_offset as usize;
            let end = (start + r.spec_count as usize).min(table_len);
            for slot in owner.iter_mut().take(end).skip(start) {
                *slot = i as u32 + 1;
            }
            ProcInfo {
                name: Rc::from(r.name.as_str()),
                entry: r.entry,
                area_start: r.spec_offset,
                area_len: r.spec_count,
                formal_count: r.formal_count,
                var_args: r.var_args,
                parent: u32::try_from(r.parent_offset)
                    .ok()
                    .and_then(|offset| by_offset.get(&offset).copied()),
            }
        })
        .collect();
    (procs, owner)
}

/// Rewrites unit numbers to `image index + 1` and slot numbers to global
/// slot numbers.
fn fix_operands(
    record: &mut PcodeRecord,
    index: usize,
    units: &[usize],
    slots: &HashMap<u32, u32>,
) -> Result<(), String> {
    let kinds = record.op.operand_kinds();
    for (kind, operand) in kinds.iter().zip(record.operands.iter_mut()) {
        match kind {
            OperandKind::Spec | OperandKind::Target | OperandKind::Class => {
                if operand.unit_num == LITERAL_UNIT {
                    continue;
                }
                let target = if operand.unit_num == SELF_UNIT {
                    index
                } else {
                    let at = (operand.unit_num - bytecode::FIRST_IMPORT_UNIT) as usize;
                    *units.get(at).ok_or_else(|| {
                        format!("operand names unit {} of {}", operand.unit_num, units.len())
                    })?
                };
                operand.unit_num =
                    i16::try_from(target + 1).map_err(|_| "too many units loaded".to_string())?;
            }
            OperandKind::Slot => {
                let local = u32::try_from(operand.offset)
                    .map_err(|_| format!("bad slot {}", operand.offset))?;
                operand.offset = *slots
                    .get(&local)
                    .ok_or_else(|| format!("slot {local} is not declared"))? as i32;
            }
            OperandKind::None | OperandKind::Int | OperandKind::Label => {}
        }
    }
    Ok(())
}

/// Whether a unit of this kind has a body to run at load time.
pub fn runs_init(kind: Option<UnitKind>) -> bool {
    !matches!(kind, Some(UnitKind::Program) | Some(UnitKind::NativePackage) | None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::{FilePos, Op, Operand};

    #[test]
    fn operands_are_rebased_to_the_image() {
        let mut record = PcodeRecord::new(
            Op::Slot,
            FilePos::new(1, 1),
            [Operand::spec(SELF_UNIT, 3), Operand::spec(2, 7), Operand::slot(5)],
        );
        let slots = HashMap::from([(5, 11)]);
        fix_operands(&mut record, 4, &[9], &slots).unwrap();
        assert_eq!(record.operands[0], Operand::spec(5, 3));
        assert_eq!(record.operands[1], Operand::spec(10, 7));
        assert_eq!(record.operands[2].offset, 11);
    }

    #[test]
    fn literals_and_labels_are_left_alone() {
        let mut record = PcodeRecord::new(
            Op::GoTrue,
            FilePos::default(),
            [Operand::boolean(true), Operand::literal(12), Operand::NONE],
        );
        let before = record;
        fix_operands(&mut record, 0, &[], &HashMap::new()).unwrap();
        assert_eq!(record, before);
    }

    #[test]
    fn unknown_import_is_reported() {
        let mut record = PcodeRecord::new(
            Op::Assign,
            FilePos::default(),
            [Operand::spec(SELF_UNIT, 0), Operand::spec(3, 0), Operand::NONE],
        );
        assert!(fix_operands(&mut record, 0, &[1], &HashMap::new()).is_err());
    }

    #[test]
    fn procedure_areas_have_owners() {
        let record = |offset, start, count, parent| ProcRecord {
            offset,
            name: format!("p{offset}"),
            kind: ProcRecordKind::User,
            parent_offset: parent,
            entry: 0,
            spec_offset: start,
            spec_count: count,
            formal_count: 0,
            var_args: false,
        };
        let (procs, owner) = proc_infos(&[record(1, 4, 2, -1), record(2, 6, 3, 1)], 10);
        assert_eq!(procs[1].parent, Some(0));
        assert_eq!(owner[3], 0);
        assert_eq!(owner[5], 1);
        assert_eq!(owner[8], 2);
    }

    #[test]
    fn slot_names_fold_case() {
        let mut names = SlotNames::default();
        let a = names.intern("Count");
        assert_eq!(names.intern("count"), a);
        assert_eq!(names.lookup("COUNT"), Some(a));
        assert_eq!(names.name(a), "count");
    }
}
