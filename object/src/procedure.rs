use std::rc::Rc;

use crate::specifier::Specifier;

/// What a procedure value runs when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcKind {
    /// Index into the interpreter's builtin table.
    Builtin(u16),
    /// Procedure `index` of runtime unit `unit`.
    User { unit: u32, index: u32 },
    /// Export `index` of the native unit bound to runtime unit `unit`.
    Native { unit: u32, index: u32 },
}

/// Procedure closure.
#[derive(Debug, Clone)]
pub struct ProcBody {
    pub kind: ProcKind,
    pub name: Rc<str>,
    pub formal_count: u32,
    pub var_args: bool,
    /// Receiver bound when the value was fetched through a method slot.
    pub self_instance: Option<Specifier>,
    /// Values of the enclosing procedure's locals captured when the
    /// closure was built, restored if it runs after the parent returned.
    pub env: Option<Rc<[Specifier]>>,
}

impl ProcBody {
    pub fn new(
        kind: ProcKind,
        name: impl Into<Rc<str>>,
        formal_count: u32,
        var_args: bool,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            formal_count,
            var_args,
            self_instance: None,
            env: None,
        }
    }

    pub fn bound_to(&self, receiver: Specifier) -> Self {
        Self {
            self_instance: Some(receiver),
            ..self.clone()
        }
    }

    /// Whether `argc` actual arguments fit the formal list.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.var_args {
            argc + 1 >= self.formal_count as usize
        } else {
            argc == self.formal_count as usize
        }
    }
}
