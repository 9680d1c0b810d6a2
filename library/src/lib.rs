//! Persistent unit library.
//!
//! A library file holds named units; each unit is a set of typed
//! streams (control record, literal pools, pcode, symbol tables and
//! manifests). [`Library`] searches several files in order.

mod codec;
mod error;
mod file;
mod library;
mod records;
mod source;
mod stream;
mod unit;

pub use codec::{ByteReader, ByteWriter};
pub use error::{CodecError, LibraryError};
pub use file::{LIB_MAGIC, LIB_VERSION, LibFile, StoredUnit};
pub use library::{LibIndex, LibStream, LibUnit, Library, OpenMode};
pub use records::{
    FormalRecord, ImportRecord, IntegerRecord, LabelRecord, ProcRecord, ProcRecordKind, RealRecord,
    Record, SlotRecord, StringRecord, SymFlags, SymKind, SymtabRecord, decode_records,
    encode_records,
};
pub use source::{SourceText, expand_tabs};
pub use stream::StreamId;
pub use unit::{ControlRecord, TimeStamp, UnitKind, body_unit_name, file_unit_name, fold_name};
