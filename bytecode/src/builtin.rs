//! Names the compiler and the interpreter agree on: the builtin
//! procedure table and the predefined variables.

/// A builtin procedure as seen by the compiler.
///
/// `formals` does not count the surplus tuple of a variadic builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinSpec {
    pub name: &'static str,
    pub formals: u32,
    pub var_args: bool,
}

impl BuiltinSpec {
    pub const fn new(name: &'static str, formals: u32, var_args: bool) -> Self {
        Self {
            name,
            formals,
            var_args,
        }
    }

    pub const fn accepts(&self, argc: usize) -> bool {
        if self.var_args {
            argc >= self.formals as usize
        } else {
            argc == self.formals as usize
        }
    }
}

/// Builtin procedures, indexed by `ProcKind::Builtin`.
///
/// The interpreter keeps an implementation table in the same order.
pub const BUILTINS: &[BuiltinSpec] = &[
    BuiltinSpec::new("print", 0, true),
    BuiltinSpec::new("nprint", 0, true),
    BuiltinSpec::new("str", 1, false),
    BuiltinSpec::new("abs", 1, false),
    BuiltinSpec::new("char", 1, false),
    BuiltinSpec::new("ichar", 1, false),
    BuiltinSpec::new("even", 1, false),
    BuiltinSpec::new("odd", 1, false),
    BuiltinSpec::new("float", 1, false),
    BuiltinSpec::new("fix", 1, false),
    BuiltinSpec::new("type", 1, false),
    BuiltinSpec::new("is_integer", 1, false),
    BuiltinSpec::new("is_string", 1, false),
    BuiltinSpec::new("is_tuple", 1, false),
    BuiltinSpec::new("is_set", 1, false),
    BuiltinSpec::new("is_map", 1, false),
    BuiltinSpec::new("newat", 0, false),
    BuiltinSpec::new("unstr", 1, false),
    BuiltinSpec::new("abort", 1, false),
    // processes
    BuiltinSpec::new("await", 1, false),
    BuiltinSpec::new("acheck", 1, false),
    BuiltinSpec::new("pass", 0, false),
    BuiltinSpec::new("send", 2, false),
    BuiltinSpec::new("suspend", 1, false),
    BuiltinSpec::new("resume", 1, false),
    BuiltinSpec::new("kill", 1, false),
    BuiltinSpec::new("mailbox", 0, false),
    // host bridge
    BuiltinSpec::new("ccallout", 3, false),
    BuiltinSpec::new("ccallout2", 3, false),
    BuiltinSpec::new("callfunction", 3, false),
];

/// Index of builtin `name` (already case-folded).
pub fn lookup_builtin(name: &str) -> Option<u16> {
    BUILTINS.iter().position(|b| b.name == name).map(|i| i as u16)
}

/// Predefined variables addressed by `Gvar`/`Sgvar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GlobalVar {
    /// Tuple of the program's arguments. Read-only.
    CommandLine = 0,
    /// Procedure invoked on abnormal end.
    AbendTrap = 1,
}

/// First global index handed out to fragment variables.
pub const FIRST_EVAL_GLOBAL: i32 = 2;

impl GlobalVar {
    pub const ALL: [GlobalVar; 2] = [GlobalVar::CommandLine, GlobalVar::AbendTrap];

    pub const fn name(self) -> &'static str {
        match self {
            GlobalVar::CommandLine => "command_line",
            GlobalVar::AbendTrap => "abend_trap",
        }
    }

    pub const fn index(self) -> i32 {
        self as i32
    }

    pub const fn is_read_only(self) -> bool {
        matches!(self, GlobalVar::CommandLine)
    }

    pub fn lookup(name: &str) -> Option<GlobalVar> {
        GlobalVar::ALL.into_iter().find(|g| g.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_unique_and_folded() {
        for (i, b) in BUILTINS.iter().enumerate() {
            assert_eq!(b.name, b.name.to_ascii_lowercase());
            assert_eq!(lookup_builtin(b.name), Some(i as u16));
        }
        assert_eq!(lookup_builtin("nosuch"), None);
    }

    #[test]
    fn variadic_arity() {
        let print = BUILTINS[lookup_builtin("print").unwrap() as usize];
        assert!(print.accepts(0) && print.accepts(5));
        let send = BUILTINS[lookup_builtin("send").unwrap() as usize];
        assert!(send.accepts(2) && !send.accepts(1));
    }

    #[test]
    fn predefined_variables() {
        assert_eq!(GlobalVar::lookup("abend_trap"), Some(GlobalVar::AbendTrap));
        assert!(GlobalVar::CommandLine.is_read_only());
        assert!(FIRST_EVAL_GLOBAL > GlobalVar::AbendTrap.index());
    }
}
