//! # Compiler
//!
//! Turns SETL2 source into library units.
//!
//! ```text
//!  source ──▶ parser ──(Unit)──▶ resolve ──▶ codegen ──(quads)──▶ emit ──▶ Library
//!                                  ▲                                 │
//!                                  └──── specs / imports ◀───────────┘
//! ```
//!
//! Every unit of a source file is compiled and stored before the next one
//! starts, so a file may hold a specification followed by its body.

mod codegen;
mod emit;
mod error;
mod listing;
mod proctab;
mod quads;
mod resolve;
mod slots;
mod symtab;
mod unit;

use std::io::Write;
use std::path::Path;

use bitflags::bitflags;
use library::{Library, UnitKind};
use parser::{Lexer, dump_unit, parse_source};

pub use emit::Emitted;
pub use error::{CompileError, Diagnostic, Diagnostics, SemanticError};
pub use slots::{M_USER, PREDEFINED_SLOTS, SLOT_CREATE, SLOT_INITOBJ, SLOT_SELFSTR, predefined_slot};
pub use unit::EvalGlobals;

use crate::slots::SlotNumbers;
use crate::unit::CompUnit;

bitflags! {
    /// Compiler and interpreter tables to dump.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u16 {
        const AST      = 1 << 0;
        const QUADS    = 1 << 1;
        const SYMTAB   = 1 << 2;
        const CODE     = 1 << 3;
        const LEX      = 1 << 4;
        const PROFILER = 1 << 5;
        const DUMP     = 1 << 6;
        const ALLOC    = 1 << 7;
    }
}

impl DebugFlags {
    pub const NAMES: [(&'static str, DebugFlags); 8] = [
        ("ast", DebugFlags::AST),
        ("quads", DebugFlags::QUADS),
        ("symtab", DebugFlags::SYMTAB),
        ("code", DebugFlags::CODE),
        ("lex", DebugFlags::LEX),
        ("profiler", DebugFlags::PROFILER),
        ("dump", DebugFlags::DUMP),
        ("alloc", DebugFlags::ALLOC),
    ];

    pub fn parse_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::NAMES.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
    }
}

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Print a numbered listing of every source file.
    pub listing: bool,
    /// Print the listing with diagnostics under their lines when a unit
    /// fails.
    pub markup: bool,
    pub tab_width: usize,
    pub safety_check: bool,
    pub debug: DebugFlags,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            listing: false,
            markup: false,
            tab_width: 8,
            safety_check: false,
            debug: DebugFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentMode {
    /// Top-level variables persist across fragments.
    Eval,
    Normal,
}

/// A unit stored by a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Library key.
    pub name: String,
    pub kind: UnitKind,
}

pub struct Compiler {
    library: Library,
    options: CompilerOptions,
    eval: EvalGlobals,
    slot_numbers: SlotNumbers,
    fragments: u32,
    report: Box<dyn Write>,
}

impl Compiler {
    pub fn new(mut library: Library, options: CompilerOptions) -> Self {
        library.set_safety_check(options.safety_check);
        Self {
            library,
            options,
            eval: EvalGlobals::default(),
            slot_numbers: SlotNumbers::default(),
            fragments: 0,
            report: Box::new(std::io::stdout()),
        }
    }

    /// Sends listings and dumps to `report` instead of standard output.
    pub fn with_report(mut self, report: Box<dyn Write>) -> Self {
        self.report = report;
        self
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut Library {
        &mut self.library
    }

    pub fn into_library(self) -> Library {
        self.library
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn eval_globals(&self) -> &EvalGlobals {
        &self.eval
    }

    pub fn compile_file(&mut self, path: &Path) -> Result<Vec<CompiledUnit>, CompileError> {
        let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.compile_source(&source, &path.display().to_string())
    }

    /// Compiles every unit in `source`; `file` names it in diagnostics and
    /// in the stored file unit.
    pub fn compile_source(
        &mut self,
        source: &str,
        file: &str,
    ) -> Result<Vec<CompiledUnit>, CompileError> {
        self.compile_units(source, file, false)
    }

    /// Compiles a statement sequence as a throw-away program and returns
    /// its library key.
    pub fn compile_fragment(
        &mut self,
        source: &str,
        mode: FragmentMode,
    ) -> Result<String, CompileError> {
        self.fragments += 1;
        let name = format!("fragment{}", self.fragments);
        let wrapped = format!("program {name}; {source}\nend {name};\n");
        self.compile_units(&wrapped, &name, mode == FragmentMode::Eval)?;
        Ok(name)
    }

    fn compile_units(
        &mut self,
        source: &str,
        file: &str,
        eval: bool,
    ) -> Result<Vec<CompiledUnit>, CompileError> {
        log::info!("compiling {file}");
        let debug = self.options.debug;
        let tab_width = self.options.tab_width;
        if debug.contains(DebugFlags::LEX) {
            for token in Lexer::from_str(source) {
                let start = token.span.start.to_string();
                write_report(&mut self.report, &format!("{start:>8}  {}\n", token.kind.name()));
            }
        }
        if self.options.listing {
            write_report(&mut self.report, &listing::source_listing(source, tab_width, &[]));
        }
        let (arena, units) = parse_source(source).map_err(|error| CompileError::Syntax {
            file: file.to_string(),
            error,
        })?;
        emit::write_file_unit(&mut self.library, file, source)?;

        let mut compiled = Vec::with_capacity(units.len());
        for ast in &units {
            if debug.contains(DebugFlags::AST) {
                write_report(&mut self.report, &dump_unit(&arena, ast));
            }
            let eval = if eval { Some(&mut self.eval) } else { None };
            let numbers = &mut self.slot_numbers;
            let mut unit = CompUnit::new(&arena, ast, file, &self.library, eval, numbers);
            unit.compile()?;
            if !unit.diagnostics.is_empty() {
                if self.options.markup {
                    let diagnostics: Vec<Diagnostic> = unit.diagnostics.iter().cloned().collect();
                    let text = listing::source_listing(source, tab_width, &diagnostics);
                    write_report(&mut self.report, &text);
                }
                return Err(CompileError::Semantic {
                    unit: unit.name.clone(),
                    diagnostics: unit.diagnostics,
                });
            }
            let emitted = unit.emit_unit()?;
            if debug.contains(DebugFlags::QUADS) {
                write_report(&mut self.report, &listing::quad_listing(&unit));
            }
            if debug.contains(DebugFlags::SYMTAB) {
                write_report(&mut self.report, &listing::symtab_listing(&unit));
            }
            if debug.contains(DebugFlags::ALLOC) {
                write_report(&mut self.report, &listing::alloc_listing(&unit));
            }
            if debug.contains(DebugFlags::CODE) {
                write_report(&mut self.report, &listing::code_listing(&emitted));
            }
            let kind = unit.kind;
            drop(unit);
            emitted.write(&mut self.library)?;
            compiled.push(CompiledUnit {
                name: emitted.key.clone(),
                kind,
            });
        }
        self.library.flush()?;
        Ok(compiled)
    }
}

fn write_report(report: &mut Box<dyn Write>, text: &str) {
    if let Err(err) = report.write_all(text.as_bytes()) {
        log::warn!("report output failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use bytecode::{Op, PcodeDecoder};
    use library::{ControlRecord, SlotRecord, StreamId, SymtabRecord};
    use tempfile::TempDir;

    fn compiler() -> (TempDir, Compiler) {
        let dir = tempfile::tempdir().unwrap();
        let mut library = Library::new();
        library.add_lib_file(dir.path().join("test.lib"), true).unwrap();
        let compiler = Compiler::new(library, CompilerOptions::default())
            .with_report(Box::new(std::io::sink()));
        (dir, compiler)
    }

    fn control(c: &Compiler, name: &str) -> ControlRecord {
        c.library().read_unit(name).unwrap().control().unwrap()
    }

    fn semantic_errors(err: CompileError) -> Vec<SemanticError> {
        match err {
            CompileError::Semantic { diagnostics, .. } => {
                diagnostics.iter().map(|d| d.error.clone()).collect()
            }
            other => panic!("expected semantic errors, got {other}"),
        }
    }

    #[test]
    fn hello_program() {
        let (_dir, mut c) = compiler();
        let units = c
            .compile_source("program hello;\n  print(\"hello\");\nend hello;\n", "hello.stl")
            .unwrap();
        assert_eq!(
            units,
            vec![CompiledUnit {
                name: "hello".into(),
                kind: UnitKind::Program
            }]
        );
        let control = control(&c, "hello");
        assert_eq!(control.kind, UnitKind::Program);
        assert!(!control.needs_body);
        assert!(control.spec_count >= 1);
        assert_eq!(control.init_count, 0);

        let unit = c.library().read_unit("hello").unwrap();
        let body = PcodeDecoder::decode_all(unit.stream(StreamId::BodyPcode)).unwrap();
        assert_eq!(body.last().map(|r| r.op), Some(Op::Stop));
        assert!(body.iter().any(|r| r.op == Op::Call && r.pos.line == 2));
        assert!(c.library().find("$file:hello.stl").is_some());
    }

    #[test]
    fn package_body_links_to_its_spec() {
        let (_dir, mut c) = compiler();
        c.compile_source(
            "package util;
               const answer := 42;
               procedure twice(x);
             end util;
             package body util;
               procedure twice(x);
                 return 2 * x;
               end twice;
             end util;",
            "util.stl",
        )
        .unwrap();
        let spec = control(&c, "util");
        assert!(spec.needs_body);
        let body = control(&c, "util$body");
        assert_eq!(body.kind, UnitKind::PackageBody);
        assert_eq!(body.spec_time_stamp, spec.time_stamp);
        assert_eq!(body.spec_spec_count, spec.spec_count);
        assert!(body.spec_count > spec.spec_count);

        let util = c.library().read_unit("util").unwrap();
        let public: Vec<SymtabRecord> = util.read_records(StreamId::Public).unwrap();
        let names: Vec<&str> = public.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"answer") && names.contains(&"twice"));
    }

    #[test]
    fn subclass_keeps_inherited_slot_numbers() {
        let (_dir, mut c) = compiler();
        c.compile_source(
            "class base; var x; procedure create(); procedure m(); end base;
             class body base;
               procedure create(); x := 1; end create;
               procedure m(); return 1; end m;
             end base;
             class derived; inherit base; var y; procedure m(); end derived;
             class body derived;
               procedure m(); return 2; end m;
             end derived;",
            "classes.stl",
        )
        .unwrap();
        let slots = |name: &str| -> Vec<SlotRecord> {
            c.library().read_unit(name).unwrap().read_records(StreamId::DeclaredSlot).unwrap()
        };
        let number = |records: &[SlotRecord], name: &str| {
            records.iter().find(|r| r.name == name).map(|r| r.slot_number)
        };
        let base = slots("base");
        let derived = slots("derived");
        assert_eq!(number(&base, "x"), number(&derived, "x"));
        assert_eq!(number(&base, "m"), number(&derived, "m"));
        assert_eq!(number(&base, "create"), Some(SLOT_CREATE));
        assert!(number(&derived, "y").is_some_and(|n| n > M_USER));
        assert_ne!(control(&c, "derived").initobj_offset, u32::MAX);
    }

    #[test]
    fn unrelated_ancestors_share_slot_numbers() {
        let (_dir, mut c) = compiler();
        c.compile_source(
            "class a; var p, v; end a;
             class b; var v; end b;
             class c; inherit a, b; var w; end c;",
            "ancestors.stl",
        )
        .unwrap();
        let number = |unit: &str, name: &str| {
            let records: Vec<SlotRecord> =
                c.library().read_unit(unit).unwrap().read_records(StreamId::DeclaredSlot).unwrap();
            records.iter().find(|r| r.name == name).map(|r| r.slot_number)
        };
        assert!(number("a", "v").is_some());
        assert_eq!(number("a", "v"), number("b", "v"));
        assert_eq!(number("a", "v"), number("c", "v"));
        assert_eq!(number("a", "p"), number("c", "p"));
        assert_ne!(number("c", "w"), number("c", "v"));
        assert_ne!(number("c", "w"), number("c", "p"));
    }

    #[test]
    fn body_rejects_a_recompiled_import() {
        let (_dir, mut c) = compiler();
        c.compile_source("package tools; procedure f(); end tools;", "tools.stl").unwrap();
        c.compile_source("package user; use tools; procedure g(); end user;", "user.stl").unwrap();
        c.compile_source("package tools; procedure f(); end tools;", "tools.stl").unwrap();
        let err = c
            .compile_source(
                "package body user; procedure g(); return 1; end g; end user;",
                "user_body.stl",
            )
            .unwrap_err();
        let errors = semantic_errors(err);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, SemanticError::StaleImport(_, dep) if dep == "tools")),
            "{errors:?}"
        );
        assert!(c.library().find("user$body").is_none());
    }

    #[test]
    fn names_exported_twice_are_ambiguous() {
        let (_dir, mut c) = compiler();
        c.compile_source(
            "package left; const shared := 1; end left;
             package right; const shared := 2; end right;",
            "both.stl",
        )
        .unwrap();
        let err = c
            .compile_source("program main; use left, right; print(shared); end main;", "main.stl")
            .unwrap_err();
        assert_eq!(semantic_errors(err), vec![SemanticError::Ambiguous("shared".into())]);
        c.compile_source("program other; use left; print(shared); end other;", "other.stl")
            .unwrap();
    }

    #[test]
    fn semantic_errors_are_collected() {
        let (_dir, mut c) = compiler();
        let err = c
            .compile_source(
                "program bad;
                   const k := 1;
                   k := 2;
                   p(1);
                   exit;
                   procedure p(wr y); y := 0; end p;
                 end bad;",
                "bad.stl",
            )
            .unwrap_err();
        let errors = semantic_errors(err);
        assert!(errors.contains(&SemanticError::ReadOnly("k".into())));
        assert!(errors.contains(&SemanticError::WriteArgument {
            name: "p".into(),
            index: 1
        }));
        assert!(errors.contains(&SemanticError::OutsideLoop("exit")));
        assert!(c.library().find("bad").is_none());
    }

    #[test]
    fn bodies_need_a_specification() {
        let (_dir, mut c) = compiler();
        let err = c
            .compile_source("package body nowhere; end nowhere;", "b.stl")
            .unwrap_err();
        assert!(matches!(err, CompileError::MissingSpec(name) if name == "nowhere"));

        let err = c
            .compile_source(
                "package half; procedure f(); end half;
                 package body half; end half;",
                "half.stl",
            )
            .unwrap_err();
        assert_eq!(semantic_errors(err), vec![SemanticError::ForwardReferenceMissing("f".into())]);
    }

    #[test]
    fn specs_hold_no_statements() {
        let (_dir, mut c) = compiler();
        let err = c.compile_source("package p; print(1); end p;", "p.stl").unwrap_err();
        assert_eq!(semantic_errors(err), vec![SemanticError::StatementsInSpec("package")]);
    }

    #[test]
    fn eval_fragments_share_top_level_names() {
        let (_dir, mut c) = compiler();
        let first = c.compile_fragment("x := 10;", FragmentMode::Eval).unwrap();
        let second = c.compile_fragment("print(x + 1);", FragmentMode::Eval).unwrap();
        assert_ne!(first, second);
        assert_eq!(c.eval_globals().names.get("x"), Some(&bytecode::FIRST_EVAL_GLOBAL));

        let unit = c.library().read_unit(&second).unwrap();
        let body = PcodeDecoder::decode_all(unit.stream(StreamId::BodyPcode)).unwrap();
        assert!(body.iter().any(|r| r.op == Op::Gvar));
    }

    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn storage_listing_places_each_procedure() {
        let dir = tempfile::tempdir().unwrap();
        let mut library = Library::new();
        library.add_lib_file(dir.path().join("test.lib"), true).unwrap();
        let options = CompilerOptions {
            debug: DebugFlags::ALLOC,
            ..CompilerOptions::default()
        };
        let captured = Captured::default();
        let mut c = Compiler::new(library, options).with_report(Box::new(captured.clone()));
        let source = "program t;\n  f(1);\n  procedure f(x);\n    return x;\n  end f;\nend t;\n";
        c.compile_source(source, "t.stl").unwrap();
        let text = String::from_utf8(captured.0.borrow().clone()).unwrap();
        assert!(text.starts_with("storage of `t`"), "{text}");
        let line = text.lines().find(|l| l.trim_start().starts_with("f ")).unwrap();
        assert!(line.contains(" at 3:"), "{line}");
        assert!(line.contains("1 formals"), "{line}");
    }

    #[test]
    fn debug_names() {
        assert_eq!(DebugFlags::parse_name("Quads"), Some(DebugFlags::QUADS));
        assert_eq!(DebugFlags::parse_name("nope"), None);
    }
}
