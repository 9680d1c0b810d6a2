//! Builtin procedures.
//!
//! [`BUILTIN_TABLE`] holds one implementation per entry of
//! [`bytecode::BUILTINS`], in the same order, so `ProcKind::Builtin(i)`
//! indexes both.

use std::rc::Rc;

use bytecode::BUILTINS;
use object::{MailboxBody, Specifier};

use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::Interpreter;

pub mod host;
pub mod process;
pub mod values;

/// What a builtin asks the interpreter to do next.
#[derive(Debug)]
pub enum Flow {
    /// Store the value into the call's target.
    Value(Specifier),
    /// Wait until the mailbox has a message, then retry the call.
    Block(Rc<MailboxBody>),
    /// Give up the rest of the time slice.
    Yield,
}

impl From<Specifier> for Flow {
    fn from(value: Specifier) -> Self {
        Flow::Value(value)
    }
}

pub type BuiltinFn = fn(&mut Interpreter, &[Specifier]) -> RuntimeResult<Flow>;

#[derive(Clone, Copy)]
pub struct BuiltinDesc {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl BuiltinDesc {
    pub const fn new(name: &'static str, func: BuiltinFn) -> Self {
        Self { name, func }
    }
}

pub static BUILTIN_TABLE: &[BuiltinDesc] = &[
    BuiltinDesc::new("print", values::print),
    BuiltinDesc::new("nprint", values::nprint),
    BuiltinDesc::new("str", values::str),
    BuiltinDesc::new("abs", values::abs),
    BuiltinDesc::new("char", values::char),
    BuiltinDesc::new("ichar", values::ichar),
    BuiltinDesc::new("even", values::even),
    BuiltinDesc::new("odd", values::odd),
    BuiltinDesc::new("float", values::float),
    BuiltinDesc::new("fix", values::fix),
    BuiltinDesc::new("type", values::type_of),
    BuiltinDesc::new("is_integer", values::is_integer),
    BuiltinDesc::new("is_string", values::is_string),
    BuiltinDesc::new("is_tuple", values::is_tuple),
    BuiltinDesc::new("is_set", values::is_set),
    BuiltinDesc::new("is_map", values::is_map),
    BuiltinDesc::new("newat", values::newat),
    BuiltinDesc::new("unstr", values::unstr),
    BuiltinDesc::new("abort", values::abort),
    BuiltinDesc::new("await", process::await_message),
    BuiltinDesc::new("acheck", process::acheck),
    BuiltinDesc::new("pass", process::pass),
    BuiltinDesc::new("send", process::send),
    BuiltinDesc::new("suspend", process::suspend),
    BuiltinDesc::new("resume", process::resume),
    BuiltinDesc::new("kill", process::kill),
    BuiltinDesc::new("mailbox", process::mailbox),
    BuiltinDesc::new("ccallout", host::ccallout),
    BuiltinDesc::new("ccallout2", host::ccallout2),
    BuiltinDesc::new("callfunction", host::callfunction),
];

pub(crate) fn call_builtin(
    interp: &mut Interpreter,
    index: u16,
    args: &[Specifier],
) -> RuntimeResult<Flow> {
    let (spec, desc) = BUILTINS
        .get(index as usize)
        .zip(BUILTIN_TABLE.get(index as usize))
        .ok_or_else(|| RuntimeError::NotCallable(format!("builtin #{index}")))?;
    if !spec.accepts(args.len()) {
        return Err(RuntimeError::Arity {
            name: spec.name.to_string(),
            expected: spec.formals as usize,
            found: args.len(),
        });
    }
    log::trace!("builtin {}", desc.name);
    (desc.func)(interp, args)
}

pub(crate) fn bad_argument(builtin: &'static str, reason: impl Into<String>) -> RuntimeError {
    RuntimeError::BadArgument {
        builtin,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_follows_compiler_order() {
        assert_eq!(BUILTIN_TABLE.len(), BUILTINS.len());
        for (desc, spec) in BUILTIN_TABLE.iter().zip(BUILTINS) {
            assert_eq!(desc.name, spec.name);
        }
    }
}
