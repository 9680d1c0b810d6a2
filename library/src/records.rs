//! Records stored in the typed streams of a unit.

use bitflags::bitflags;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;
use crate::unit::{TimeStamp, UnitKind};

/// A fixed-layout record that can be appended to a stream.
pub trait Record: Sized {
    fn write(&self, w: &mut ByteWriter);
    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError>;
}

pub fn encode_records<T: Record>(records: &[T]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    for record in records {
        record.write(&mut w);
    }
    w.into_bytes()
}

pub fn decode_records<T: Record>(bytes: &[u8]) -> Result<Vec<T>, CodecError> {
    let mut r = ByteReader::new(bytes);
    let mut out = Vec::new();
    while !r.is_at_end() {
        out.push(T::read(&mut r)?);
    }
    Ok(out)
}

// ── literal pools ──────────────────────────────────────────────────

/// Integer literal: `{offset, cell_count}` then the cells. A negative
/// count marks a negative value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerRecord {
    pub offset: u32,
    pub negative: bool,
    pub cells: Vec<u32>,
}

impl Record for IntegerRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.u32(self.offset);
        let count = self.cells.len() as i32;
        w.i32(if self.negative { -count } else { count });
        for cell in &self.cells {
            w.u32(*cell);
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let offset = r.u32()?;
        let count = r.i32()?;
        let mut cells = Vec::with_capacity(count.unsigned_abs() as usize);
        for _ in 0..count.unsigned_abs() {
            cells.push(r.u32()?);
        }
        Ok(Self {
            offset,
            negative: count < 0,
            cells,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealRecord {
    pub offset: u32,
    pub value: f64,
}

impl Record for RealRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.u32(self.offset);
        w.f64(self.value);
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            offset: r.u32()?,
            value: r.f64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRecord {
    pub offset: u32,
    pub value: Vec<u8>,
}

impl Record for StringRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.u32(self.offset);
        w.bytes(&self.value);
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            offset: r.u32()?,
            value: r.bytes()?.to_vec(),
        })
    }
}

/// What a procedure literal refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcRecordKind {
    User = 0,
    Builtin,
    Native,
}

impl TryFrom<u8> for ProcRecordKind {
    type Error = CodecError;

    fn try_from(raw: u8) -> Result<Self, CodecError> {
        match raw {
            0 => Ok(ProcRecordKind::User),
            1 => Ok(ProcRecordKind::Builtin),
            2 => Ok(ProcRecordKind::Native),
            other => Err(CodecError::Invalid {
                what: "procedure kind",
                value: other as u64,
            }),
        }
    }
}

/// Procedure literal.
///
/// `parent_offset` is the table offset of the enclosing procedure's
/// literal, `-1` at unit level. `entry` indexes the body pcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcRecord {
    pub offset: u32,
    pub name: String,
    pub kind: ProcRecordKind,
    pub parent_offset: i32,
    pub entry: u32,
    pub spec_offset: u32,
    pub spec_count: u32,
    pub formal_count: u32,
    pub var_args: bool,
}

impl Record for ProcRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.u32(self.offset);
        w.str(&self.name);
        w.u8(self.kind as u8);
        w.i32(self.parent_offset);
        w.u32(self.entry);
        w.u32(self.spec_offset);
        w.u32(self.spec_count);
        w.u32(self.formal_count);
        w.bool(self.var_args);
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            offset: r.u32()?,
            name: r.string()?,
            kind: ProcRecordKind::try_from(r.u8()?)?,
            parent_offset: r.i32()?,
            entry: r.u32()?,
            spec_offset: r.u32()?,
            spec_count: r.u32()?,
            formal_count: r.u32()?,
            var_args: r.bool()?,
        })
    }
}

/// Label literal; negative values address init pcode (`-(k+1)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    pub offset: u32,
    pub label: i32,
}

impl Record for LabelRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.u32(self.offset);
        w.i32(self.label);
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            offset: r.u32()?,
            label: r.i32()?,
        })
    }
}

// ── symbol tables ──────────────────────────────────────────────────

/// Symbol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SymKind {
    Id = 0,
    Integer,
    Real,
    String,
    Procedure,
    Method,
    Selector,
    Label,
    Slot,
    Inherit,
    Package,
    Class,
    Process,
}

impl SymKind {
    pub const fn name(self) -> &'static str {
        match self {
            SymKind::Id => "identifier",
            SymKind::Integer => "integer",
            SymKind::Real => "real",
            SymKind::String => "string",
            SymKind::Procedure => "procedure",
            SymKind::Method => "method",
            SymKind::Selector => "selector",
            SymKind::Label => "label",
            SymKind::Slot => "slot",
            SymKind::Inherit => "inherit",
            SymKind::Package => "package",
            SymKind::Class => "class",
            SymKind::Process => "process",
        }
    }

    /// Kinds stored in a literal pool.
    pub const fn is_literal(self) -> bool {
        matches!(
            self,
            SymKind::Integer
                | SymKind::Real
                | SymKind::String
                | SymKind::Procedure
                | SymKind::Method
                | SymKind::Label
        )
    }
}

impl TryFrom<u8> for SymKind {
    type Error = CodecError;

    fn try_from(raw: u8) -> Result<Self, CodecError> {
        const KINDS: [SymKind; 13] = [
            SymKind::Id,
            SymKind::Integer,
            SymKind::Real,
            SymKind::String,
            SymKind::Procedure,
            SymKind::Method,
            SymKind::Selector,
            SymKind::Label,
            SymKind::Slot,
            SymKind::Inherit,
            SymKind::Package,
            SymKind::Class,
            SymKind::Process,
        ];
        KINDS.get(raw as usize).copied().ok_or(CodecError::Invalid {
            what: "symbol kind",
            value: raw as u64,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymFlags: u16 {
        const PUBLIC        = 1 << 0;
        const IN_SPEC       = 1 << 1;
        const ALLOCED       = 1 << 2;
        const VISIBLE_SLOT  = 1 << 3;
        const LVALUE        = 1 << 4;
        const RVALUE        = 1 << 5;
        const RPARAM        = 1 << 6;
        const WPARAM        = 1 << 7;
        const HIDDEN        = 1 << 8;
        const INITIALIZED   = 1 << 9;
        const CONSTANT      = 1 << 10;
        const VAR_ARGS      = 1 << 11;
    }
}

/// Formal parameter of an exported procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalRecord {
    pub name: String,
    /// `RPARAM` and/or `WPARAM`.
    pub flags: SymFlags,
}

/// Symbol exported through the symtab or public stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymtabRecord {
    pub name: String,
    pub kind: SymKind,
    pub unit_num: i16,
    pub offset: i32,
    pub slot_num: i32,
    pub flags: SymFlags,
    pub formals: Vec<FormalRecord>,
}

impl Record for SymtabRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.str(&self.name);
        w.u8(self.kind as u8);
        w.i16(self.unit_num);
        w.i32(self.offset);
        w.i32(self.slot_num);
        w.u16(self.flags.bits());
        w.u16(self.formals.len() as u16);
        for formal in &self.formals {
            w.str(&formal.name);
            w.u16(formal.flags.bits());
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let name = r.string()?;
        let kind = SymKind::try_from(r.u8()?)?;
        let unit_num = r.i16()?;
        let offset = r.i32()?;
        let slot_num = r.i32()?;
        let flags = SymFlags::from_bits_truncate(r.u16()?);
        let count = r.u16()?;
        let mut formals = Vec::with_capacity(count as usize);
        for _ in 0..count {
            formals.push(FormalRecord {
                name: r.string()?,
                flags: SymFlags::from_bits_truncate(r.u16()?),
            });
        }
        Ok(Self {
            name,
            kind,
            unit_num,
            offset,
            slot_num,
            flags,
            formals,
        })
    }
}

// ── manifests ──────────────────────────────────────────────────────

/// One entry of the import or inherit manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub name: String,
    pub kind: UnitKind,
    pub time_stamp: TimeStamp,
    pub source_name: String,
}

impl Record for ImportRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.str(&self.name);
        w.u8(self.kind as u8);
        w.u64(self.time_stamp.0);
        w.str(&self.source_name);
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            name: r.string()?,
            kind: UnitKind::try_from(r.u8()?)?,
            time_stamp: TimeStamp(r.u64()?),
            source_name: r.string()?,
        })
    }
}

/// Declared-slot entry of a class unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub slot_number: u32,
    pub in_class: bool,
    pub is_method: bool,
    pub is_public: bool,
    pub unit_num: i16,
    pub offset: i32,
    pub name: String,
}

impl Record for SlotRecord {
    fn write(&self, w: &mut ByteWriter) {
        w.u32(self.slot_number);
        w.bool(self.in_class);
        w.bool(self.is_method);
        w.bool(self.is_public);
        w.i16(self.unit_num);
        w.i32(self.offset);
        w.str(&self.name);
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            slot_number: r.u32()?,
            in_class: r.bool()?,
            is_method: r.bool()?,
            is_public: r.bool()?,
            unit_num: r.i16()?,
            offset: r.i32()?,
            name: r.string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_record_sign_rides_on_count() {
        let rec = IntegerRecord {
            offset: 3,
            negative: true,
            cells: vec![0, 1],
        };
        let bytes = encode_records(std::slice::from_ref(&rec));
        assert_eq!(&bytes[4..8], &(-2i32).to_le_bytes());
        assert_eq!(decode_records::<IntegerRecord>(&bytes), Ok(vec![rec]));
    }

    #[test]
    fn symtab_records_keep_formals() {
        let rec = SymtabRecord {
            name: "swap".into(),
            kind: SymKind::Procedure,
            unit_num: 1,
            offset: 7,
            slot_num: -1,
            flags: SymFlags::PUBLIC | SymFlags::IN_SPEC,
            formals: vec![
                FormalRecord {
                    name: "a".into(),
                    flags: SymFlags::RPARAM | SymFlags::WPARAM,
                },
                FormalRecord {
                    name: "b".into(),
                    flags: SymFlags::WPARAM,
                },
            ],
        };
        let bytes = encode_records(&[rec.clone(), rec.clone()]);
        assert_eq!(decode_records::<SymtabRecord>(&bytes), Ok(vec![rec.clone(), rec]));
    }

    #[test]
    fn truncated_stream_is_reported() {
        let bytes = encode_records(&[LabelRecord { offset: 1, label: -3 }]);
        assert!(decode_records::<LabelRecord>(&bytes[..5]).is_err());
    }

    #[test]
    fn literal_kinds() {
        assert!(SymKind::Procedure.is_literal());
        assert!(!SymKind::Id.is_literal());
        assert_eq!(SymKind::try_from(12), Ok(SymKind::Process));
    }
}
