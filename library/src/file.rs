//! One library file on disk.
//!
//! Layout: the magic bytes, a little-endian `u32` format version, then a
//! bincode image of every unit's streams.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LibraryError;

pub const LIB_MAGIC: &[u8; 8] = b"SETL2LIB";
/// Bumped on every layout change.
pub const LIB_VERSION: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUnit {
    pub streams: BTreeMap<u16, Vec<u8>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryImage {
    units: BTreeMap<String, StoredUnit>,
}

#[derive(Debug)]
pub struct LibFile {
    path: PathBuf,
    writable: bool,
    dirty: bool,
    image: LibraryImage,
}

impl LibFile {
    /// Opens `path`. A missing writable file starts out empty and is
    /// created on the first save.
    pub fn open(path: impl Into<PathBuf>, writable: bool) -> Result<Self, LibraryError> {
        let path = path.into();
        let image = match fs::read(&path) {
            Ok(bytes) => decode_image(&path, &bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && writable => {
                log::debug!("library {} does not exist yet", path.display());
                LibraryImage::default()
            }
            Err(source) => return Err(LibraryError::Io { path, source }),
        };
        log::debug!(
            "opened library {} ({} units, {})",
            path.display(),
            image.units.len(),
            if writable { "writable" } else { "read-only" }
        );
        Ok(Self {
            path,
            writable,
            dirty: false,
            image,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, name: &str) -> Option<&StoredUnit> {
        self.image.units.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.image.units.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.image.units.keys().map(String::as_str)
    }

    pub fn insert(&mut self, name: String, unit: StoredUnit) -> Result<(), LibraryError> {
        if !self.writable {
            return Err(LibraryError::WriteProtected(name));
        }
        self.image.units.insert(name, unit);
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<StoredUnit>, LibraryError> {
        if !self.writable {
            return Err(LibraryError::WriteProtected(name.to_string()));
        }
        let removed = self.image.units.remove(name);
        self.dirty |= removed.is_some();
        Ok(removed)
    }

    /// Writes a sibling temporary file and renames it over the library.
    pub fn save(&mut self) -> Result<(), LibraryError> {
        if !self.dirty {
            return Ok(());
        }
        let io = |source| LibraryError::Io {
            path: self.path.clone(),
            source,
        };
        let body = bincode::serialize(&self.image).map_err(|err| LibraryError::Corrupt {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        {
            let mut out = fs::File::create(&tmp).map_err(io)?;
            out.write_all(LIB_MAGIC).map_err(io)?;
            out.write_all(&LIB_VERSION.to_le_bytes()).map_err(io)?;
            out.write_all(&body).map_err(io)?;
            out.sync_all().map_err(io)?;
        }
        fs::rename(&tmp, &self.path).map_err(io)?;
        self.dirty = false;
        log::debug!("saved library {}", self.path.display());
        Ok(())
    }
}

fn decode_image(path: &Path, bytes: &[u8]) -> Result<LibraryImage, LibraryError> {
    let corrupt = |reason: String| LibraryError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let header = LIB_MAGIC.len() + 4;
    if bytes.len() < header || &bytes[..LIB_MAGIC.len()] != LIB_MAGIC {
        return Err(corrupt("not a library file".into()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[LIB_MAGIC.len()..header]);
    let version = u32::from_le_bytes(version);
    if version != LIB_VERSION {
        return Err(corrupt(format!(
            "format version {version}, expected {LIB_VERSION}"
        )));
    }
    bincode::deserialize(&bytes[header..]).map_err(|err| corrupt(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(bytes: &[u8]) -> StoredUnit {
        let mut streams = BTreeMap::new();
        streams.insert(0, bytes.to_vec());
        StoredUnit { streams }
    }

    #[test]
    fn missing_writable_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lib = LibFile::open(dir.path().join("new.lib"), true).unwrap();
        assert_eq!(lib.names().count(), 0);
    }

    #[test]
    fn missing_read_only_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibFile::open(dir.path().join("gone.lib"), false).unwrap_err();
        assert!(matches!(err, LibraryError::Io { .. }));
    }

    #[test]
    fn save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lib");
        let mut lib = LibFile::open(&path, true).unwrap();
        lib.insert("p".into(), unit(b"abc")).unwrap();
        lib.save().unwrap();
        assert!(!lib.is_dirty());

        let again = LibFile::open(&path, false).unwrap();
        assert_eq!(again.get("p"), Some(&unit(b"abc")));
        assert!(!dir.path().join("a.lib.tmp").exists());
    }

    #[test]
    fn read_only_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lib");
        LibFile::open(&path, true).unwrap();
        let mut w = LibFile::open(&path, true).unwrap();
        w.insert("x".into(), unit(b"")).unwrap();
        w.save().unwrap();
        let mut ro = LibFile::open(&path, false).unwrap();
        assert!(matches!(
            ro.insert("y".into(), unit(b"")),
            Err(LibraryError::WriteProtected(_))
        ));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.lib");
        fs::write(&path, b"SETL2LIB\x01\x00\x00\x00junk").unwrap();
        assert!(matches!(
            LibFile::open(&path, false),
            Err(LibraryError::Corrupt { .. })
        ));
    }
}
