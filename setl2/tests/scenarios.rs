use std::path::PathBuf;

use clap::Parser as ClapParser;
use compiler::CompiledUnit;
use library::{ControlRecord, Library, SlotRecord, StreamId, UnitKind};
use setl2::{
    ABEND_EXIT, COMPILE_ERROR_EXIT, CompileCli, DriverError, LIBRARY_ERROR_EXIT, RunCli,
    compile_files, run_program,
};
use tempfile::TempDir;
use vm::{LoadError, SharedOutput, VmError};

struct Workspace {
    dir: TempDir,
    sources: usize,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            sources: 0,
        }
    }

    fn lib(&self) -> String {
        self.dir.path().join("test.lib").display().to_string()
    }

    fn write_source(&mut self, source: &str) -> PathBuf {
        self.sources += 1;
        let path = self.dir.path().join(format!("src{}.stl", self.sources));
        std::fs::write(&path, source).unwrap();
        path
    }

    fn compile(&mut self, source: &str) -> Result<Vec<CompiledUnit>, DriverError> {
        let path = self.write_source(source);
        let lib = self.lib();
        let argv = ["setl2c", "-l", lib.as_str(), path.to_str().unwrap()];
        let cli = CompileCli::try_parse_from(argv).unwrap();
        compile_files(&cli.common, &cli.files, Box::new(std::io::sink()))
    }

    fn run(&self, program: &str, args: &[&str]) -> (Result<(), DriverError>, String) {
        let lib = self.lib();
        let temp = self.dir.path().display().to_string();
        let mut argv = vec!["setl2", "-l", lib.as_str(), "--temp-path", temp.as_str(), program];
        argv.extend_from_slice(args);
        let cli = RunCli::try_parse_from(argv).unwrap();
        let out = SharedOutput::new();
        let result = run_program(&cli, Box::new(out.clone()));
        (result, out.contents())
    }

    fn output(&self, program: &str) -> String {
        let (result, text) = self.run(program, &[]);
        if let Err(err) = result {
            panic!("{program} failed: {err}\noutput so far:\n{text}");
        }
        text
    }

    fn library(&self) -> Library {
        let mut library = Library::new();
        library.add_lib_file(self.lib(), false).unwrap();
        library
    }

    fn control(&self, unit: &str) -> ControlRecord {
        self.library().read_unit(unit).unwrap().control().unwrap()
    }

    fn slot(&self, unit: &str, name: &str) -> Option<u32> {
        let unit = self.library().read_unit(unit).unwrap();
        let records: Vec<SlotRecord> = unit.read_records(StreamId::DeclaredSlot).unwrap();
        records.iter().find(|r| r.name == name).map(|r| r.slot_number)
    }
}

#[test]
fn hello_program_compiles_and_runs() {
    let mut ws = Workspace::new();
    let units = ws.compile("program hello; print(\"hello\"); end hello;").unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].kind, UnitKind::Program);

    let control = ws.control("hello");
    assert_eq!(control.kind, UnitKind::Program);
    assert!(control.spec_count >= 1);
    assert!(!control.needs_body);

    assert_eq!(ws.output("hello"), "hello\n");
}

#[test]
fn derived_class_overrides_and_shares_slots() {
    let mut ws = Workspace::new();
    ws.compile(
        "class base; var x; procedure create(); procedure m(); end base;
         class body base;
           procedure create(); x := 1; end create;
           procedure m(); return 1; end m;
         end base;
         class derived; inherit base; procedure m(); end derived;
         class body derived;
           procedure m(); return 2; end m;
         end derived;
         program main;
           use base, derived;
           b := base();
           d := derived();
           print(b.m(), d.m(), d.x);
         end main;",
    )
    .unwrap();
    assert_eq!(ws.output("main"), "1 2 1\n");

    assert!(ws.slot("base", "x").is_some());
    assert_eq!(ws.slot("base", "x"), ws.slot("derived", "x"));
    assert_eq!(ws.slot("base", "m"), ws.slot("derived", "m"));
}

#[test]
fn unrelated_ancestors_agree_on_shared_slots() {
    let mut ws = Workspace::new();
    ws.compile(
        "class a; var p, v; end a;
         class b; var v; end b;
         class c; inherit a, b; var w; procedure create(); end c;
         class body c;
           procedure create(); p := 1; v := 2; w := 3; end create;
         end c;
         program main;
           use c;
           o := c();
           print(o.p, o.v, o.w);
         end main;",
    )
    .unwrap();
    assert_eq!(ws.output("main"), "1 2 3\n");

    assert_eq!(ws.slot("a", "v"), ws.slot("b", "v"));
    assert_eq!(ws.slot("a", "v"), ws.slot("c", "v"));
}

#[test]
fn write_parameters_are_copied_back() {
    let mut ws = Workspace::new();
    ws.compile(
        "program main;
           z := 0;
           p(3, z);
           print(z);
           procedure p(rd x, wr y); y := x * 2; end p;
         end main;",
    )
    .unwrap();
    assert_eq!(ws.output("main"), "6\n");
}

#[test]
fn calls_with_zero_to_four_arguments() {
    let mut ws = Workspace::new();
    ws.compile(
        "program main;
           print(f0(), f1(1), f2(1, 2), f3(1, 2, 3), f4(1, 2, 3, 4), va(1, 2, 3));
           procedure f0(); return 0; end f0;
           procedure f1(a); return a; end f1;
           procedure f2(a, b); return a + b; end f2;
           procedure f3(a, b, c); return a + b + c; end f3;
           procedure f4(a, b, c, d); return a + b + c + d; end f4;
           procedure va(a, rest(*)); return [a, rest]; end va;
         end main;",
    )
    .unwrap();
    assert_eq!(ws.output("main"), "0 1 3 6 10 [1, [2, 3]]\n");
}

#[test]
fn processes_pass_messages_in_order() {
    let mut ws = Workspace::new();
    ws.compile(
        "process stage;
           procedure relay(inbox, outbox, n);
         end stage;
         process body stage;
           procedure relay(inbox, outbox, n);
             var i, msg;
             for i in [1..n] loop
               msg := await(inbox);
               send(outbox, msg * 10);
             end loop;
             return n;
           end relay;
         end stage;
         program main;
           use stage;
           a := mailbox();
           b := mailbox();
           c := mailbox();
           first := stage();
           second := stage();
           d1 := first.relay(a, b, 3);
           d2 := second.relay(b, c, 3);
           send(a, 1);
           send(a, 2);
           send(a, 3);
           print(await(c), await(c), await(c), await(d1) + await(d2));
         end main;",
    )
    .unwrap();
    assert_eq!(ws.output("main"), "100 200 300 6\n");
}

#[test]
fn abend_trap_sees_message_and_stack() {
    let mut ws = Workspace::new();
    ws.compile(
        "program main;
           abend_trap := report;
           check(-1);
           print(\"resumed\");
           procedure check(n);
             if n < 0 then abort(\"bad\"); end if;
           end check;
           procedure report(msg, stack);
             print(\"trapped\", msg);
             for entry in stack loop print(entry); end loop;
           end report;
         end main;",
    )
    .unwrap();
    let text = ws.output("main");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.first(), Some(&"trapped bad"));
    assert!(lines[1].contains("check"), "{text}");
    assert!(lines[1].contains("line 6"), "{text}");
    assert!(lines[2].contains("line 3"), "{text}");
    assert_eq!(lines.last(), Some(&"resumed"));
}

#[test]
fn untrapped_abend_exits_with_abend_code() {
    let mut ws = Workspace::new();
    ws.compile("program main; abort(\"bad\"); end main;").unwrap();
    let (result, _) = ws.run("main", &[]);
    let err = result.unwrap_err();
    let DriverError::Vm(VmError::Abend(abend)) = &err else {
        panic!("expected an abend, got {err:?}");
    };
    assert_eq!(abend.message, "bad");
    assert_eq!(abend.frames[0].pos.line, 1);
    assert_eq!(err.exit_code(), ABEND_EXIT);
}

#[test]
fn recompiled_spec_makes_importer_stale() {
    let mut ws = Workspace::new();
    ws.compile(
        "package tools; procedure f(); end tools;
         package body tools; procedure f(); return 1; end f; end tools;
         program main; use tools; print(f()); end main;",
    )
    .unwrap();
    assert_eq!(ws.output("main"), "1\n");

    ws.compile("package tools; procedure f(); end tools;").unwrap();
    let (result, _) = ws.run("main", &[]);
    let err = result.unwrap_err();
    let DriverError::Vm(VmError::Load(LoadError::StaleDependency { unit, .. })) = &err else {
        panic!("expected a stale dependency, got {err:?}");
    };
    assert_eq!(unit, "tools");
    assert_eq!(err.exit_code(), LIBRARY_ERROR_EXIT);
}

#[test]
fn body_compiled_against_a_stale_import_is_refused() {
    let mut ws = Workspace::new();
    ws.compile("package tools; procedure f(); end tools;").unwrap();
    ws.compile("package user; use tools; procedure g(); end user;").unwrap();
    ws.compile("package tools; procedure f(); end tools;").unwrap();
    let err = ws
        .compile("package body user; procedure g(); return 1; end g; end user;")
        .unwrap_err();
    assert_eq!(err.exit_code(), COMPILE_ERROR_EXIT);
    assert!(err.to_string().contains("tools"), "{err}");
}

#[test]
fn syntax_errors_exit_with_compile_code() {
    let mut ws = Workspace::new();
    let err = ws.compile("program main; x := ; end main;").unwrap_err();
    assert_eq!(err.exit_code(), COMPILE_ERROR_EXIT);
}

#[test]
fn missing_program_is_a_library_error() {
    let mut ws = Workspace::new();
    ws.compile("program main; end main;").unwrap();
    let (result, _) = ws.run("elsewhere", &[]);
    assert_eq!(result.unwrap_err().exit_code(), LIBRARY_ERROR_EXIT);
}

#[test]
fn source_files_run_from_a_scratch_library() {
    let mut ws = Workspace::new();
    let path = ws.write_source("program demo; print(command_line); end demo;");
    let (result, text) = ws.run(path.to_str().unwrap(), &["a", "-b"]);
    result.unwrap();
    assert_eq!(text, "[\"a\", \"-b\"]\n");
    assert!(!ws.dir.path().join("test.lib").exists());
}
