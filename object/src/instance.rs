use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::header::HashCache;
use crate::specifier::{Specifier, hash_of};

/// Runtime index of a loaded class or process class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Class instance: a flat array of instance variables.
///
/// The class maps global slot numbers onto indices of `vars`.
#[derive(Debug, Clone)]
pub struct ObjectBody {
    pub class: ClassId,
    pub class_name: Rc<str>,
    vars: Vec<Specifier>,
    pub(crate) hash: HashCache,
}

impl PartialEq for ObjectBody {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.vars == other.vars
    }
}

impl Eq for ObjectBody {}

impl ObjectBody {
    pub fn new(class: ClassId, class_name: Rc<str>, var_count: usize) -> Self {
        Self {
            class,
            class_name,
            vars: vec![Specifier::Omega; var_count],
            hash: HashCache::new(),
        }
    }

    pub fn var(&self, index: usize) -> Specifier {
        self.vars.get(index).cloned().unwrap_or(Specifier::Omega)
    }

    pub fn set_var(&mut self, index: usize, value: Specifier) {
        self.hash.invalidate();
        if index >= self.vars.len() {
            self.vars.resize(index + 1, Specifier::Omega);
        }
        self.vars[index] = value;
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn hash_code(&self) -> i32 {
        self.hash.get_or_compute(|| {
            let mut h = self.class.0;
            for v in &self.vars {
                h = h.wrapping_mul(17).wrapping_add(hash_of(v) as u32);
            }
            (h & 0x7fff_ffff) as i32
        })
    }
}

/// Handle on a live process. Scheduler state is held by the interpreter,
/// keyed by `id`.
#[derive(Debug)]
pub struct ProcessBody {
    pub id: u32,
    pub class: ClassId,
    pub class_name: Rc<str>,
}

/// Unbounded FIFO of specifiers shared between processes.
#[derive(Debug, Default)]
pub struct MailboxBody {
    queue: RefCell<VecDeque<Specifier>>,
}

impl MailboxBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, value: Specifier) {
        self.queue.borrow_mut().push_back(value);
    }

    pub fn receive(&self) -> Option<Specifier> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// Kind of iteration requested by `iter_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum IterKind {
    /// Elements of a set, tuple, string or the pairs of a map.
    Elements = 0,
    /// `[index, element]` pairs of a tuple or string, or the pairs of a map.
    Pairs = 1,
}

impl TryFrom<i32> for IterKind {
    type Error = i32;

    fn try_from(raw: i32) -> Result<Self, i32> {
        match raw {
            0 => Ok(IterKind::Elements),
            1 => Ok(IterKind::Pairs),
            other => Err(other),
        }
    }
}

/// Snapshot iterator. The source is copied when iteration starts, so the
/// loop body may modify the iterated variable freely.
#[derive(Debug, Default)]
pub struct IterBody {
    items: Vec<Specifier>,
    next: std::cell::Cell<usize>,
}

impl IterBody {
    pub fn new(items: Vec<Specifier>) -> Self {
        Self {
            items,
            next: std::cell::Cell::new(0),
        }
    }

    pub fn step(&self) -> Option<Specifier> {
        let at = self.next.get();
        let item = self.items.get(at)?.clone();
        self.next.set(at + 1);
        Some(item)
    }

    pub fn remaining(&self) -> usize {
        self.items.len() - self.next.get()
    }
}
