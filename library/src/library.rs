//! The set of library files searched for units.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::LibraryError;
use crate::file::{LibFile, StoredUnit};
use crate::records::{Record, decode_records, encode_records};
use crate::stream::StreamId;
use crate::unit::{ControlRecord, fold_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Starts an empty unit that replaces any previous one on close.
    Write,
}

/// Index of a library file in search order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibIndex(pub usize);

#[derive(Debug, Default)]
pub struct Library {
    files: Vec<LibFile>,
    /// Files discovered through the search path, opened read-only.
    path_files: Vec<LibFile>,
    safety_check: bool,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to replace a unit with one of a different kind.
    pub fn set_safety_check(&mut self, on: bool) {
        self.safety_check = on;
    }

    pub fn add_lib_file(
        &mut self,
        path: impl Into<PathBuf>,
        writable: bool,
    ) -> Result<LibIndex, LibraryError> {
        let path = path.into();
        if let Some(i) = self.files.iter().position(|f| f.path() == path) {
            return Ok(LibIndex(i));
        }
        self.files.push(LibFile::open(path, writable)?);
        Ok(LibIndex(self.files.len() - 1))
    }

    /// Adds every entry of a colon separated path. Directories contribute
    /// their `*.lib` files; missing entries are skipped.
    pub fn add_lib_path(&mut self, path: &str) -> Result<(), LibraryError> {
        for entry in path.split(':').filter(|e| !e.is_empty()) {
            let entry = Path::new(entry);
            if entry.is_dir() {
                let read = std::fs::read_dir(entry).map_err(|source| LibraryError::Io {
                    path: entry.to_path_buf(),
                    source,
                })?;
                let mut found: Vec<PathBuf> = read
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.extension().is_some_and(|ext| ext == "lib"))
                    .collect();
                found.sort();
                for file in found {
                    self.add_path_file(file)?;
                }
            } else if entry.is_file() {
                self.add_path_file(entry.to_path_buf())?;
            } else {
                log::debug!("library path entry {} not found", entry.display());
            }
        }
        Ok(())
    }

    fn add_path_file(&mut self, path: PathBuf) -> Result<(), LibraryError> {
        let known = self.files.iter().chain(&self.path_files).any(|f| f.path() == path);
        if !known {
            self.path_files.push(LibFile::open(path, false)?);
        }
        Ok(())
    }

    fn search_order(&self) -> impl Iterator<Item = (LibIndex, &LibFile)> {
        let writable = self.files.iter().enumerate().filter(|(_, f)| f.is_writable());
        let read_only = self.files.iter().enumerate().filter(|(_, f)| !f.is_writable());
        let offset = self.files.len();
        let on_path = self.path_files.iter().enumerate().map(move |(i, f)| (i + offset, f));
        writable
            .chain(read_only)
            .chain(on_path)
            .map(|(i, f)| (LibIndex(i), f))
    }

    fn file(&self, index: LibIndex) -> Option<&LibFile> {
        if index.0 < self.files.len() {
            self.files.get(index.0)
        } else {
            self.path_files.get(index.0 - self.files.len())
        }
    }

    fn file_mut(&mut self, index: LibIndex) -> Option<&mut LibFile> {
        if index.0 < self.files.len() {
            self.files.get_mut(index.0)
        } else {
            let offset = self.files.len();
            self.path_files.get_mut(index.0 - offset)
        }
    }

    pub fn writable_index(&self) -> Option<LibIndex> {
        self.files.iter().position(LibFile::is_writable).map(LibIndex)
    }

    /// Where `name` would be found.
    pub fn find(&self, name: &str) -> Option<LibIndex> {
        let key = fold_name(name);
        self.search_order().find(|(_, f)| f.contains(&key)).map(|(i, _)| i)
    }

    /// Opens a unit. `hint` restricts the lookup to one file.
    pub fn open_libunit(
        &self,
        name: &str,
        hint: Option<LibIndex>,
        mode: OpenMode,
    ) -> Option<LibUnit> {
        let key = fold_name(name);
        match mode {
            OpenMode::Write => {
                let origin = hint.or_else(|| self.writable_index())?;
                self.file(origin).filter(|f| f.is_writable())?;
                Some(LibUnit::empty(key, origin))
            }
            OpenMode::Read => {
                let (origin, stored) = match hint {
                    Some(i) => (i, self.file(i)?.get(&key)?),
                    None => self
                        .search_order()
                        .find_map(|(i, f)| f.get(&key).map(|u| (i, u)))?,
                };
                if let Some(file) = self.file(origin) {
                    log::trace!("unit {key} found in {}", file.path().display());
                }
                Some(LibUnit {
                    name: key,
                    origin,
                    mode,
                    streams: stored.streams.clone(),
                })
            }
        }
    }

    /// Like [`Library::open_libunit`] but a missing unit is an error.
    pub fn read_unit(&self, name: &str) -> Result<LibUnit, LibraryError> {
        self.open_libunit(name, None, OpenMode::Read)
            .ok_or_else(|| LibraryError::NotFound(name.to_string()))
    }

    /// Stores a unit opened for writing.
    pub fn close_libunit(&mut self, unit: LibUnit) -> Result<(), LibraryError> {
        if unit.mode != OpenMode::Write {
            return Ok(());
        }
        let safety = self.safety_check;
        let new_control = unit.control().ok();
        let file = self
            .file_mut(unit.origin)
            .ok_or_else(|| LibraryError::WriteProtected(unit.name.clone()))?;
        if safety {
            let existing = file.get(&unit.name).and_then(LibUnit::stored_control);
            if let (Some(existing), Some(new)) = (existing, new_control) {
                if existing.kind != new.kind {
                    return Err(LibraryError::Conflict {
                        name: unit.name,
                        existing: existing.kind,
                    });
                }
                if existing.needs_body != new.needs_body {
                    return Err(LibraryError::BodyConflict(unit.name));
                }
            }
        }
        log::debug!("writing unit {}", unit.name);
        file.insert(unit.name, StoredUnit { streams: unit.streams })
    }

    /// Copies a unit between library files.
    pub fn copy_libunit(
        &mut self,
        name: &str,
        src: LibIndex,
        dst: LibIndex,
    ) -> Result<(), LibraryError> {
        let key = fold_name(name);
        let stored = self
            .file(src)
            .and_then(|f| f.get(&key))
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(name.to_string()))?;
        let dst = self
            .file_mut(dst)
            .ok_or_else(|| LibraryError::WriteProtected(name.to_string()))?;
        dst.insert(key, stored)
    }

    pub fn remove_libunit(&mut self, name: &str) -> Result<bool, LibraryError> {
        let index = self
            .writable_index()
            .ok_or_else(|| LibraryError::WriteProtected(name.to_string()))?;
        let key = fold_name(name);
        match self.file_mut(index) {
            Some(file) => Ok(file.remove(&key)?.is_some()),
            None => Ok(false),
        }
    }

    /// Saves every modified writable file.
    pub fn flush(&mut self) -> Result<(), LibraryError> {
        for file in self.files.iter_mut().filter(|f| f.is_dirty()) {
            file.save()?;
        }
        Ok(())
    }

    /// Visible unit names in search order, without duplicates.
    pub fn unit_names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (_, file) in self.search_order() {
            for name in file.names() {
                if !seen.iter().any(|s: &String| s == name) {
                    seen.push(name.to_string());
                }
            }
        }
        seen
    }
}

// ── units ──────────────────────────────────────────────────────────

/// An open unit: a private copy of its streams.
#[derive(Debug, Clone)]
pub struct LibUnit {
    name: String,
    origin: LibIndex,
    mode: OpenMode,
    streams: BTreeMap<u16, Vec<u8>>,
}

impl LibUnit {
    fn empty(name: String, origin: LibIndex) -> Self {
        Self {
            name,
            origin,
            mode: OpenMode::Write,
            streams: BTreeMap::new(),
        }
    }

    fn stored_control(stored: &StoredUnit) -> Option<ControlRecord> {
        let bytes = stored.streams.get(&(StreamId::Control as u16))?;
        ControlRecord::decode(bytes).ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> LibIndex {
        self.origin
    }

    pub fn stream(&self, id: StreamId) -> &[u8] {
        self.streams.get(&(id as u16)).map_or(&[], Vec::as_slice)
    }

    pub fn open_libstr(&self, id: StreamId) -> LibStream<'_> {
        LibStream {
            bytes: self.stream(id),
            at: 0,
        }
    }

    /// Appends to a stream.
    pub fn write_libstr(&mut self, id: StreamId, bytes: &[u8]) -> Result<(), LibraryError> {
        if self.mode != OpenMode::Write {
            return Err(LibraryError::WriteProtected(self.name.clone()));
        }
        self.streams.entry(id as u16).or_default().extend_from_slice(bytes);
        Ok(())
    }

    pub fn read_records<T: Record>(&self, id: StreamId) -> Result<Vec<T>, LibraryError> {
        decode_records(self.stream(id)).map_err(|err| LibraryError::CorruptUnit {
            unit: self.name.clone(),
            reason: format!("{} stream: {err}", id.name()),
        })
    }

    pub fn write_records<T: Record>(
        &mut self,
        id: StreamId,
        records: &[T],
    ) -> Result<(), LibraryError> {
        self.write_libstr(id, &encode_records(records))
    }

    pub fn control(&self) -> Result<ControlRecord, LibraryError> {
        ControlRecord::decode(self.stream(StreamId::Control)).map_err(|err| err.in_unit(&self.name))
    }

    /// Replaces the control record.
    pub fn set_control(&mut self, control: &ControlRecord) -> Result<(), LibraryError> {
        if self.mode != OpenMode::Write {
            return Err(LibraryError::WriteProtected(self.name.clone()));
        }
        self.streams.insert(StreamId::Control as u16, control.encode());
        Ok(())
    }
}

/// Sequential reader over one stream.
#[derive(Debug)]
pub struct LibStream<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl LibStream<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads exactly `buf.len()` bytes.
    pub fn read_libstr(&mut self, buf: &mut [u8]) -> Result<(), io::Error> {
        self.read_exact(buf)
    }
}

impl Read for LibStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.bytes[self.at..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.at += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::LabelRecord;
    use crate::unit::UnitKind;

    fn write_unit(lib: &mut Library, name: &str, kind: UnitKind) {
        let mut unit = lib.open_libunit(name, None, OpenMode::Write).unwrap();
        unit.set_control(&ControlRecord::new(kind)).unwrap();
        unit.write_libstr(StreamId::Text, b"hi").unwrap();
        lib.close_libunit(unit).unwrap();
    }

    #[test]
    fn write_then_read_back_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setl2.lib");
        let mut lib = Library::new();
        lib.add_lib_file(&path, true).unwrap();
        write_unit(&mut lib, "Main", UnitKind::Program);
        lib.flush().unwrap();

        let mut again = Library::new();
        again.add_lib_file(&path, false).unwrap();
        let unit = again.read_unit("MAIN").unwrap();
        assert_eq!(unit.control().unwrap().kind, UnitKind::Program);
        let mut text = Vec::new();
        unit.open_libstr(StreamId::Text).read_to_end(&mut text).unwrap();
        assert_eq!(text, b"hi");
    }

    #[test]
    fn writable_file_is_searched_first() {
        let dir = tempfile::tempdir().unwrap();
        let ro_path = dir.path().join("base.lib");
        {
            let mut lib = Library::new();
            lib.add_lib_file(&ro_path, true).unwrap();
            write_unit(&mut lib, "p", UnitKind::PackageSpec);
            lib.flush().unwrap();
        }
        let mut lib = Library::new();
        lib.add_lib_file(&ro_path, false).unwrap();
        let w = lib.add_lib_file(dir.path().join("work.lib"), true).unwrap();
        assert_eq!(lib.writable_index(), Some(w));
        write_unit(&mut lib, "p", UnitKind::PackageSpec);
        assert_eq!(lib.find("p"), Some(w));
    }

    #[test]
    fn path_directories_are_searched_last() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut lib = Library::new();
            lib.add_lib_file(dir.path().join("extra.lib"), true).unwrap();
            write_unit(&mut lib, "util", UnitKind::PackageSpec);
            lib.flush().unwrap();
        }
        let mut lib = Library::new();
        lib.add_lib_file(dir.path().join("main.lib"), true).unwrap();
        assert!(lib.find("util").is_none());
        lib.add_lib_path(&format!("/nonexistent:{}", dir.path().display())).unwrap();
        assert_eq!(lib.find("util"), Some(LibIndex(1)));
        assert_eq!(lib.unit_names(), vec!["util".to_string()]);
    }

    #[test]
    fn safety_check_rejects_kind_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = Library::new();
        lib.add_lib_file(dir.path().join("a.lib"), true).unwrap();
        lib.set_safety_check(true);
        write_unit(&mut lib, "q", UnitKind::PackageSpec);
        write_unit(&mut lib, "q", UnitKind::PackageSpec);
        let mut unit = lib.open_libunit("q", None, OpenMode::Write).unwrap();
        unit.set_control(&ControlRecord::new(UnitKind::Program)).unwrap();
        assert!(matches!(
            lib.close_libunit(unit),
            Err(LibraryError::Conflict { existing: UnitKind::PackageSpec, .. })
        ));
    }

    #[test]
    fn safety_check_rejects_losing_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = Library::new();
        lib.add_lib_file(dir.path().join("a.lib"), true).unwrap();
        lib.set_safety_check(true);
        let mut spec = ControlRecord::new(UnitKind::PackageSpec);
        spec.needs_body = true;
        let mut unit = lib.open_libunit("q", None, OpenMode::Write).unwrap();
        unit.set_control(&spec).unwrap();
        lib.close_libunit(unit).unwrap();

        let bodyless = ControlRecord::new(UnitKind::PackageSpec);
        let mut unit = lib.open_libunit("q", None, OpenMode::Write).unwrap();
        unit.set_control(&bodyless).unwrap();
        let result = lib.close_libunit(unit);
        assert!(matches!(result, Err(LibraryError::BodyConflict(name)) if name == "q"));

        let mut unit = lib.open_libunit("q", None, OpenMode::Write).unwrap();
        unit.set_control(&spec).unwrap();
        lib.close_libunit(unit).unwrap();
    }

    #[test]
    fn records_round_trip_through_a_unit() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = Library::new();
        lib.add_lib_file(dir.path().join("a.lib"), true).unwrap();
        let mut unit = lib.open_libunit("r", None, OpenMode::Write).unwrap();
        let labels = vec![
            LabelRecord { offset: 2, label: -1 },
            LabelRecord { offset: 3, label: 9 },
        ];
        unit.write_records(StreamId::Label, &labels).unwrap();
        lib.close_libunit(unit).unwrap();
        let back = lib.read_unit("r").unwrap();
        assert_eq!(back.read_records::<LabelRecord>(StreamId::Label).unwrap(), labels);
        assert!(back.control().is_err());
    }

    #[test]
    fn copy_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = Library::new();
        let a = lib.add_lib_file(dir.path().join("a.lib"), true).unwrap();
        let b = lib.add_lib_file(dir.path().join("b.lib"), true).unwrap();
        write_unit(&mut lib, "c", UnitKind::ClassSpec);
        lib.copy_libunit("c", a, b).unwrap();
        assert!(lib.open_libunit("c", Some(b), OpenMode::Read).is_some());
        assert!(matches!(
            lib.copy_libunit("missing", a, b),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn read_only_units_refuse_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = Library::new();
        lib.add_lib_file(dir.path().join("a.lib"), true).unwrap();
        write_unit(&mut lib, "z", UnitKind::Program);
        let mut unit = lib.read_unit("z").unwrap();
        assert!(unit.write_libstr(StreamId::Text, b"x").is_err());
    }
}
