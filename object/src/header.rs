use std::cell::Cell;

/// Dynamic type tag of a specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Form {
    Omega = 0,
    Atom,
    Short,
    Label,
    File,
    Opaque,
    Proc,
    Process,
    Mailbox,
    Iter,
    Real,
    Long,
    String,
    Tuple,
    Object,
    Set,
    Map,
    Void,
}

impl Form {
    pub const COUNT: usize = Self::Void as usize + 1;

    /// Name used in runtime error messages and by `type`.
    pub const fn name(self) -> &'static str {
        match self {
            Form::Omega => "OM",
            Form::Atom => "ATOM",
            Form::Short | Form::Long => "INTEGER",
            Form::Label => "LABEL",
            Form::File => "FILE",
            Form::Opaque => "OPAQUE",
            Form::Proc => "PROCEDURE",
            Form::Process => "PROCESS",
            Form::Mailbox => "MAILBOX",
            Form::Iter => "ITERATOR",
            Form::Real => "REAL",
            Form::String => "STRING",
            Form::Tuple => "TUPLE",
            Form::Object => "OBJECT",
            Form::Set => "SET",
            Form::Map => "MAP",
            Form::Void => "VOID",
        }
    }

    /// Forms whose specifier owns a reference-counted body.
    pub const fn has_body(self) -> bool {
        matches!(
            self,
            Form::Proc
                | Form::Process
                | Form::Mailbox
                | Form::Iter
                | Form::Real
                | Form::Long
                | Form::String
                | Form::Tuple
                | Form::Object
                | Form::Set
                | Form::Map
        )
    }
}

/// Cached hash code carried in every hashable body.
///
/// `-1` means the cache is stale; mutators must call
/// [`HashCache::invalidate`].
#[derive(Debug)]
pub struct HashCache(Cell<i32>);

impl HashCache {
    pub const INVALID: i32 = -1;

    pub const fn new() -> Self {
        Self(Cell::new(Self::INVALID))
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> i32) -> i32 {
        let cached = self.0.get();
        if cached != Self::INVALID {
            return cached;
        }
        // -1 is reserved for "stale"
        let mut code = compute();
        if code == Self::INVALID {
            code = 0;
        }
        self.0.set(code);
        code
    }

    pub fn invalidate(&self) {
        self.0.set(Self::INVALID);
    }

    pub fn is_valid(&self) -> bool {
        self.0.get() != Self::INVALID
    }
}

impl Default for HashCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Clones start stale.
impl Clone for HashCache {
    fn clone(&self) -> Self {
        Self::new()
    }
}
