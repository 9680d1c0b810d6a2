use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;

/// Kind of compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitKind {
    Program = 1,
    PackageSpec,
    PackageBody,
    ClassSpec,
    ClassBody,
    ProcessSpec,
    ProcessBody,
    NativePackage,
    FileUnit,
}

impl UnitKind {
    pub const fn name(self) -> &'static str {
        match self {
            UnitKind::Program => "program",
            UnitKind::PackageSpec => "package",
            UnitKind::PackageBody => "package body",
            UnitKind::ClassSpec => "class",
            UnitKind::ClassBody => "class body",
            UnitKind::ProcessSpec => "process class",
            UnitKind::ProcessBody => "process class body",
            UnitKind::NativePackage => "native package",
            UnitKind::FileUnit => "file",
        }
    }

    pub const fn is_body(self) -> bool {
        matches!(
            self,
            UnitKind::PackageBody | UnitKind::ClassBody | UnitKind::ProcessBody
        )
    }

    pub const fn is_spec(self) -> bool {
        matches!(
            self,
            UnitKind::PackageSpec
                | UnitKind::ClassSpec
                | UnitKind::ProcessSpec
                | UnitKind::NativePackage
        )
    }

    /// Classes and process classes.
    pub const fn is_class(self) -> bool {
        matches!(
            self,
            UnitKind::ClassSpec
                | UnitKind::ClassBody
                | UnitKind::ProcessSpec
                | UnitKind::ProcessBody
        )
    }

    pub const fn is_process(self) -> bool {
        matches!(self, UnitKind::ProcessSpec | UnitKind::ProcessBody)
    }

    /// The specification kind a body kind implements.
    pub const fn spec_kind(self) -> Option<UnitKind> {
        match self {
            UnitKind::PackageBody => Some(UnitKind::PackageSpec),
            UnitKind::ClassBody => Some(UnitKind::ClassSpec),
            UnitKind::ProcessBody => Some(UnitKind::ProcessSpec),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for UnitKind {
    type Error = CodecError;

    fn try_from(raw: u8) -> Result<Self, CodecError> {
        Ok(match raw {
            1 => UnitKind::Program,
            2 => UnitKind::PackageSpec,
            3 => UnitKind::PackageBody,
            4 => UnitKind::ClassSpec,
            5 => UnitKind::ClassBody,
            6 => UnitKind::ProcessSpec,
            7 => UnitKind::ProcessBody,
            8 => UnitKind::NativePackage,
            9 => UnitKind::FileUnit,
            other => {
                return Err(CodecError::Invalid {
                    what: "unit kind",
                    value: other as u64,
                });
            }
        })
    }
}

/// Library key of a unit name: names are case-insensitive.
pub fn fold_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Library key of the body implementing specification `name`.
pub fn body_unit_name(name: &str) -> String {
    format!("{}$body", fold_name(name))
}

/// Library key of the file unit holding the text of `path`.
pub fn file_unit_name(path: &str) -> String {
    format!("$file:{path}")
}

/// Compilation time stamp; strictly increasing within one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(pub u64);

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

impl TimeStamp {
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut last = LAST_STAMP.load(Ordering::Relaxed);
        loop {
            let next = nanos.max(last + 1);
            let exchanged =
                LAST_STAMP.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed);
            match exchanged {
                Ok(_) => return TimeStamp(next),
                Err(seen) => last = seen,
            }
        }
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit control record.
///
/// ```text
/// kind:u8 needs_body:u8 reserved:u16
/// time_stamp:u64 spec_time_stamp:u64
/// 18 × count:u32
/// source_name:str body_source_name:str
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub kind: UnitKind,
    pub needs_body: bool,
    pub time_stamp: TimeStamp,
    /// For bodies, the stamp of the specification they were compiled
    /// against; otherwise equal to `time_stamp`.
    pub spec_time_stamp: TimeStamp,
    pub source_name: String,
    pub body_source_name: String,
    /// Size of the unit's specifier table.
    pub spec_count: u32,
    /// Entries of the table owned by the specification.
    pub spec_spec_count: u32,
    pub spec_init_count: u32,
    pub slot_init_count: u32,
    pub import_count: u32,
    pub inherit_count: u32,
    pub unit_count: u32,
    pub symtab_count: u32,
    pub init_count: u32,
    pub body_count: u32,
    pub integer_count: u32,
    pub real_count: u32,
    pub string_count: u32,
    pub proc_count: u32,
    pub label_count: u32,
    pub slot_count: u32,
    pub max_slot: u32,
    /// Offset of the unit's own instance-creation procedure, or `u32::MAX`.
    pub initobj_offset: u32,
}

impl ControlRecord {
    pub const FIXED_SIZE: usize = 4 + 8 + 8 + 18 * 4;

    pub fn new(kind: UnitKind) -> Self {
        let stamp = TimeStamp::now();
        Self {
            kind,
            needs_body: false,
            time_stamp: stamp,
            spec_time_stamp: stamp,
            source_name: String::new(),
            body_source_name: String::new(),
            spec_count: 0,
            spec_spec_count: 0,
            spec_init_count: 0,
            slot_init_count: 0,
            import_count: 0,
            inherit_count: 0,
            unit_count: 0,
            symtab_count: 0,
            init_count: 0,
            body_count: 0,
            integer_count: 0,
            real_count: 0,
            string_count: 0,
            proc_count: 0,
            label_count: 0,
            slot_count: 0,
            max_slot: 0,
            initobj_offset: u32::MAX,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u8(self.kind as u8);
        w.bool(self.needs_body);
        w.u16(0);
        w.u64(self.time_stamp.0);
        w.u64(self.spec_time_stamp.0);
        for count in self.counts() {
            w.u32(count);
        }
        w.str(&self.source_name);
        w.str(&self.body_source_name);
        w.into_bytes()
    }

    fn counts(&self) -> [u32; 18] {
        [
            self.spec_count,
            self.spec_spec_count,
            self.spec_init_count,
            self.slot_init_count,
            self.import_count,
            self.inherit_count,
            self.unit_count,
            self.symtab_count,
            self.init_count,
            self.body_count,
            self.integer_count,
            self.real_count,
            self.string_count,
            self.proc_count,
            self.label_count,
            self.slot_count,
            self.max_slot,
            self.initobj_offset,
        ]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let kind = UnitKind::try_from(r.u8()?)?;
        let needs_body = r.bool()?;
        let _reserved = r.u16()?;
        let time_stamp = TimeStamp(r.u64()?);
        let spec_time_stamp = TimeStamp(r.u64()?);
        let mut counts = [0u32; 18];
        for count in counts.iter_mut() {
            *count = r.u32()?;
        }
        let source_name = r.string()?;
        let body_source_name = r.string()?;
        let [
            spec_count,
            spec_spec_count,
            spec_init_count,
            slot_init_count,
            import_count,
            inherit_count,
            unit_count,
            symtab_count,
            init_count,
            body_count,
            integer_count,
            real_count,
            string_count,
            proc_count,
            label_count,
            slot_count,
            max_slot,
            initobj_offset,
        ] = counts;
        Ok(Self {
            kind,
            needs_body,
            time_stamp,
            spec_time_stamp,
            source_name,
            body_source_name,
            spec_count,
            spec_spec_count,
            spec_init_count,
            slot_init_count,
            import_count,
            inherit_count,
            unit_count,
            symtab_count,
            init_count,
            body_count,
            integer_count,
            real_count,
            string_count,
            proc_count,
            label_count,
            slot_count,
            max_slot,
            initobj_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_record_layout() {
        let mut control = ControlRecord::new(UnitKind::ClassBody);
        control.needs_body = true;
        control.spec_count = 12;
        control.max_slot = 9;
        control.source_name = "shapes.stl".into();
        let bytes = control.encode();
        assert_eq!(bytes[0], UnitKind::ClassBody as u8);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes.len(), ControlRecord::FIXED_SIZE + 4 + 10 + 4);
        assert_eq!(ControlRecord::decode(&bytes), Ok(control));
    }

    #[test]
    fn time_stamps_increase() {
        let a = TimeStamp::now();
        let b = TimeStamp::now();
        assert!(b > a);
    }

    #[test]
    fn body_names_never_clash_with_identifiers() {
        assert_eq!(body_unit_name("Stack"), "stack$body");
        assert_eq!(fold_name("MyProg"), "myprog");
    }

    #[test]
    fn body_kinds_know_their_spec() {
        assert_eq!(UnitKind::ClassBody.spec_kind(), Some(UnitKind::ClassSpec));
        assert_eq!(UnitKind::Program.spec_kind(), None);
        assert!(UnitKind::ProcessSpec.is_class());
        assert!(UnitKind::ProcessBody.is_process());
        assert!(UnitKind::try_from(0).is_err());
    }
}
