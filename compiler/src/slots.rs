//! Slot numbering.
//!
//! Every name that can follow a `.` in a unit gets a unit-local slot
//! number. Inside a class the universe also holds the slots inherited
//! from every ancestor, added first and in ancestor order, so a name keeps
//! the number its first ancestor gave it. New names draw on [`SlotNumbers`],
//! shared by every unit of one compilation, so unrelated ancestors compiled
//! together agree on the numbers of names they share. One name always maps
//! to one number within a unit; the loader later maps these onto the global
//! slot numbering.

use std::collections::{HashMap, HashSet};

use library::SlotRecord;

use crate::error::SemanticError;
use crate::symtab::SymId;

pub const SLOT_INITOBJ: u32 = 0;
pub const SLOT_CREATE: u32 = 1;
pub const SLOT_SELFSTR: u32 = 2;
/// Last predefined slot; user slots are numbered from `M_USER + 1`.
pub const M_USER: u32 = 3;

pub const PREDEFINED_SLOTS: [&str; 3] = ["initobj", "create", "selfstr"];

pub fn predefined_slot(name: &str) -> Option<u32> {
    PREDEFINED_SLOTS.iter().position(|n| *n == name).map(|i| i as u32)
}

/// Slot names numbered so far in one compilation.
#[derive(Debug)]
pub struct SlotNumbers {
    by_name: HashMap<String, u32>,
    next: u32,
}

impl Default for SlotNumbers {
    fn default() -> Self {
        Self {
            by_name: HashMap::new(),
            next: M_USER + 1,
        }
    }
}

impl SlotNumbers {
    pub fn get(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Records a number chosen elsewhere, keeping the first one seen.
    fn observe(&mut self, name: &str, number: u32) {
        if number > M_USER {
            self.by_name.entry(name.to_string()).or_insert(number);
            self.next = self.next.max(number + 1);
        }
    }

    /// The next number not yet handed out and not in `used`.
    fn fresh(&mut self, used: &HashSet<u32>) -> u32 {
        while used.contains(&self.next) {
            self.next += 1;
        }
        self.next += 1;
        self.next - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub name: String,
    pub number: Option<u32>,
    /// Instance variable or method of this class, as opposed to a name
    /// only used after a `.`.
    pub in_class: bool,
    pub is_method: bool,
    pub is_public: bool,
    /// `1` for slots of this unit, the ancestor's unit number otherwise.
    pub unit_num: i16,
    /// Offset of a method's procedure literal, `-1` otherwise.
    pub offset: i32,
    pub declared_here: bool,
    /// Declared by this body's specification.
    pub from_spec: bool,
    pub symbol: Option<SymId>,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    entries: Vec<SlotEntry>,
    by_name: HashMap<String, SlotRef>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &str) -> Option<SlotRef> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, slot: SlotRef) -> &SlotEntry {
        &self.entries[slot.0 as usize]
    }

    pub fn get_mut(&mut self, slot: SlotRef) -> &mut SlotEntry {
        &mut self.entries[slot.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: SlotEntry) -> SlotRef {
        let slot = SlotRef(self.entries.len() as u32);
        self.by_name.insert(entry.name.clone(), slot);
        self.entries.push(entry);
        slot
    }

    fn blank(name: &str) -> SlotEntry {
        SlotEntry {
            name: name.to_string(),
            number: None,
            in_class: false,
            is_method: false,
            is_public: false,
            unit_num: 0,
            offset: -1,
            declared_here: false,
            from_spec: false,
            symbol: None,
        }
    }

    /// A name used after `.`; adds it if this unit has not seen it.
    pub fn reference(&mut self, name: &str) -> SlotRef {
        match self.find(name) {
            Some(slot) => slot,
            None => self.push(Self::blank(name)),
        }
    }

    fn number_taken(&self, number: u32) -> bool {
        self.entries.iter().any(|e| e.number == Some(number))
    }

    /// Merges one slot of an ancestor reached as unit `unit_num`. The
    /// ancestor's number is kept unless another name of this unit has it.
    pub fn inherit(&mut self, record: &SlotRecord, unit_num: i16) -> Result<(), SemanticError> {
        if !record.in_class {
            return Ok(());
        }
        let adopted = Some(record.slot_number).filter(|n| !self.number_taken(*n));
        if let Some(slot) = self.find(&record.name) {
            let entry = self.get_mut(slot);
            if entry.in_class && entry.is_method != record.is_method {
                return Err(SemanticError::NameConflict(record.name.clone()));
            }
            if !entry.in_class {
                entry.in_class = true;
                entry.is_method = record.is_method;
                entry.is_public = record.is_public;
                entry.unit_num = unit_num;
            }
            if entry.number.is_none() {
                entry.number = adopted;
            }
            return Ok(());
        }
        self.push(SlotEntry {
            number: adopted,
            in_class: true,
            is_method: record.is_method,
            is_public: record.is_public,
            unit_num,
            ..Self::blank(&record.name)
        });
        Ok(())
    }

    /// Copies the specification's slot list into a body, numbers included.
    pub fn preset(&mut self, record: &SlotRecord) {
        let from_spec = record.in_class && record.unit_num == bytecode::SELF_UNIT;
        self.push(SlotEntry {
            name: record.name.clone(),
            number: Some(record.slot_number),
            in_class: record.in_class,
            is_method: record.is_method,
            is_public: record.is_public,
            unit_num: record.unit_num,
            offset: record.offset,
            declared_here: false,
            from_spec,
            symbol: None,
        });
    }

    /// Declares an instance variable or method of the class being compiled.
    pub fn declare(
        &mut self,
        name: &str,
        is_method: bool,
        is_public: bool,
        symbol: SymId,
    ) -> Result<SlotRef, SemanticError> {
        let Some(slot) = self.find(name) else {
            return Ok(self.push(SlotEntry {
                in_class: true,
                is_method,
                is_public,
                unit_num: bytecode::SELF_UNIT,
                declared_here: true,
                symbol: Some(symbol),
                ..Self::blank(name)
            }));
        };
        let entry = self.get_mut(slot);
        if entry.in_class && entry.is_method != is_method {
            return Err(SemanticError::NameConflict(name.to_string()));
        }
        if entry.declared_here || (entry.from_spec && !is_method) {
            return Err(SemanticError::Duplicate(name.to_string()));
        }
        entry.in_class = true;
        entry.is_method = is_method;
        entry.is_public |= is_public;
        entry.unit_num = bytecode::SELF_UNIT;
        entry.declared_here = true;
        entry.symbol = Some(symbol);
        Ok(slot)
    }

    /// Assigns numbers to every slot still unnumbered and returns the
    /// largest number in use. A name keeps the number `numbers` already
    /// gave it unless an ancestor of this unit holds that number.
    pub fn number(&mut self, numbers: &mut SlotNumbers) -> u32 {
        let mut used: HashSet<u32> = self.entries.iter().filter_map(|e| e.number).collect();
        for (name, number) in self.entries.iter().filter_map(|e| e.number.map(|n| (&e.name, n))) {
            numbers.observe(name, number);
        }
        for entry in self.entries.iter_mut().filter(|e| e.number.is_none()) {
            let number = match predefined_slot(&entry.name) {
                Some(n) => n,
                None => match numbers.get(&entry.name).filter(|n| !used.contains(n)) {
                    Some(n) => n,
                    None => {
                        let n = numbers.fresh(&used);
                        numbers.observe(&entry.name, n);
                        n
                    }
                },
            };
            used.insert(number);
            entry.number = Some(number);
        }
        self.max_slot()
    }

    pub fn max_slot(&self) -> u32 {
        self.entries.iter().filter_map(|e| e.number).max().unwrap_or(M_USER)
    }

    pub fn number_of(&self, slot: SlotRef) -> u32 {
        self.get(slot).number.unwrap_or(M_USER)
    }

    pub fn records(&self) -> Vec<SlotRecord> {
        self.entries
            .iter()
            .map(|e| SlotRecord {
                slot_number: e.number.unwrap_or(M_USER),
                in_class: e.in_class,
                is_method: e.is_method,
                is_public: e.is_public,
                unit_num: e.unit_num,
                offset: e.offset,
                name: e.name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::{Symbol, Symtab};
    use library::SymKind;

    fn sym(t: &mut Symtab, name: &str) -> SymId {
        t.add(Symbol::new(name, SymKind::Slot, None))
    }

    #[test]
    fn inherited_slots_keep_their_numbers() {
        let mut t = Symtab::new();
        let mut numbers = SlotNumbers::default();
        let mut base = SlotTable::new();
        base.declare("x", false, true, sym(&mut t, "x")).unwrap();
        base.declare("m", true, true, sym(&mut t, "m")).unwrap();
        base.number(&mut numbers);

        let mut derived = SlotTable::new();
        for record in base.records() {
            derived.inherit(&record, 2).unwrap();
        }
        derived.declare("y", false, true, sym(&mut t, "y")).unwrap();
        derived.declare("m", true, true, sym(&mut t, "m")).unwrap();
        let max = derived.number(&mut numbers);

        let x = derived.find("x").unwrap();
        assert_eq!(derived.number_of(x), base.number_of(base.find("x").unwrap()));
        let m = derived.get(derived.find("m").unwrap());
        assert!(m.declared_here);
        assert_eq!(m.unit_num, 1);
        assert_eq!(max, M_USER + 3);
    }

    #[test]
    fn numbers_are_dense_after_predefined() {
        let mut t = Symtab::new();
        let mut slots = SlotTable::new();
        slots.declare("create", true, true, sym(&mut t, "create")).unwrap();
        slots.declare("a", false, false, sym(&mut t, "a")).unwrap();
        slots.reference("b");
        slots.number(&mut SlotNumbers::default());
        assert_eq!(slots.number_of(slots.find("create").unwrap()), SLOT_CREATE);
        let mut user: Vec<u32> = slots
            .iter()
            .filter(|e| predefined_slot(&e.name).is_none())
            .filter_map(|e| e.number)
            .collect();
        user.sort();
        assert_eq!(user, vec![M_USER + 1, M_USER + 2]);
    }

    #[test]
    fn conflicting_declarations() {
        let mut t = Symtab::new();
        let mut slots = SlotTable::new();
        slots.declare("x", false, true, sym(&mut t, "x")).unwrap();
        assert_eq!(
            slots.declare("x", false, false, sym(&mut t, "x")),
            Err(SemanticError::Duplicate("x".into()))
        );
        assert_eq!(
            slots.declare("x", true, false, sym(&mut t, "x")),
            Err(SemanticError::NameConflict("x".into()))
        );
    }

    #[test]
    fn body_defines_spec_methods() {
        let mut t = Symtab::new();
        let mut spec = SlotTable::new();
        spec.declare("m", true, true, sym(&mut t, "m")).unwrap();
        spec.declare("v", false, true, sym(&mut t, "v")).unwrap();
        spec.number(&mut SlotNumbers::default());

        let mut body = SlotTable::new();
        for record in spec.records() {
            body.preset(&record);
        }
        assert!(body.declare("m", true, false, sym(&mut t, "m")).is_ok());
        assert!(body.get(body.find("m").unwrap()).is_public);
        assert_eq!(
            body.declare("v", false, false, sym(&mut t, "v")),
            Err(SemanticError::Duplicate("v".into()))
        );
    }

    #[test]
    fn unrelated_ancestors_agree_on_shared_names() {
        let mut t = Symtab::new();
        let mut numbers = SlotNumbers::default();
        let mut a = SlotTable::new();
        a.declare("p", false, true, sym(&mut t, "p")).unwrap();
        a.declare("v", false, true, sym(&mut t, "v")).unwrap();
        a.number(&mut numbers);
        let mut b = SlotTable::new();
        b.declare("v", false, true, sym(&mut t, "v")).unwrap();
        b.number(&mut numbers);
        assert_eq!(b.number_of(b.find("v").unwrap()), a.number_of(a.find("v").unwrap()));

        let mut c = SlotTable::new();
        for record in a.records() {
            c.inherit(&record, 2).unwrap();
        }
        for record in b.records() {
            c.inherit(&record, 3).unwrap();
        }
        c.declare("w", false, true, sym(&mut t, "w")).unwrap();
        c.number(&mut numbers);
        let v = c.number_of(c.find("v").unwrap());
        assert_eq!(v, a.number_of(a.find("v").unwrap()));
        assert!(c.number_of(c.find("w").unwrap()) > v);
    }

    #[test]
    fn ancestors_from_separate_compilations_keep_numbers_distinct() {
        let mut t = Symtab::new();
        let mut a = SlotTable::new();
        a.declare("p", false, true, sym(&mut t, "p")).unwrap();
        a.number(&mut SlotNumbers::default());
        let mut b = SlotTable::new();
        b.declare("q", false, true, sym(&mut t, "q")).unwrap();
        b.number(&mut SlotNumbers::default());

        let mut c = SlotTable::new();
        for record in a.records().iter().chain(b.records().iter()) {
            c.inherit(record, 2).unwrap();
        }
        c.number(&mut SlotNumbers::default());
        let p = c.number_of(c.find("p").unwrap());
        let q = c.number_of(c.find("q").unwrap());
        assert_eq!(p, M_USER + 1);
        assert_ne!(p, q);
    }
}
