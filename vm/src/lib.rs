//! The SETL2 runtime.
//!
//! [`Interpreter::run`] loads a program and everything it uses from a
//! [`library::Library`], initializes packages and classes, and executes
//! the program body. Processes run cooperatively on the same thread.

pub mod abend;
pub mod callout;
pub mod dump;
pub mod error;
pub mod interpreter;
pub mod loader;
pub mod native;
pub mod output;
pub mod primitives;
pub mod scheduler;

pub use abend::{Abend, StackEntry};
pub use callout::{CCallout, CallbackContext, CalloutHost, setl2_callback};
pub use error::{LoadError, RuntimeError, VmError};
pub use interpreter::{Interpreter, InterpreterOptions};
pub use native::NativeUnit;
pub use output::SharedOutput;

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use compiler::{Compiler, CompilerOptions, FragmentMode};
    use library::Library;
    use object::Specifier;
    use tempfile::TempDir;

    use super::*;

    fn compile(source: &str) -> (TempDir, Compiler) {
        let dir = tempfile::tempdir().unwrap();
        let mut library = Library::new();
        library.add_lib_file(dir.path().join("test.lib"), true).unwrap();
        let mut compiler = Compiler::new(library, CompilerOptions::default())
            .with_report(Box::new(std::io::sink()));
        compiler.compile_source(source, "test.stl").unwrap();
        (dir, compiler)
    }

    fn interpreter(compiler: Compiler, options: InterpreterOptions) -> (Interpreter, SharedOutput) {
        let out = SharedOutput::new();
        let interp =
            Interpreter::new(compiler.into_library(), options).with_output(Box::new(out.clone()));
        (interp, out)
    }

    fn run(source: &str, program: &str) -> (Result<(), VmError>, String) {
        let (_dir, compiler) = compile(source);
        let (mut interp, out) = interpreter(compiler, InterpreterOptions::default());
        let result = interp.run(program);
        (result, out.contents())
    }

    fn output(source: &str, program: &str) -> String {
        let (result, text) = run(source, program);
        if let Err(err) = result {
            panic!("{program} failed: {err}\noutput so far:\n{text}");
        }
        text
    }

    #[test]
    fn loops_and_collections() {
        let text = output(
            "program t;
               s := {};
               for i in [1..5] | odd(i) loop
                 s with:= i * i;
               end loop;
               print(#s, 9 in s, +/ s);
               v := [10, 20, 30];
               v(2) := \"x\";
               print(v, v(2..3));
             end t;",
            "t",
        );
        assert_eq!(text, "3 #T 35\n[10, \"x\", 30] [\"x\", 30]\n");
    }

    #[test]
    fn procedures_write_back_and_recurse() {
        let text = output(
            "program t;
               a := 0;
               swap(1, a);
               print(a, fact(10));
               procedure swap(rd x, wr y); y := x + 1; end swap;
               procedure fact(n);
                 if n = 0 then return 1; end if;
                 return n * fact(n - 1);
               end fact;
             end t;",
            "t",
        );
        assert_eq!(text, "2 3628800\n");
    }

    #[test]
    fn closures_see_their_parent() {
        let text = output(
            "program t;
               print(outer(5));
               procedure outer(n);
                 var k := 10;
                 return inner(n);
                 procedure inner(m); return m + k; end inner;
               end outer;
             end t;",
            "t",
        );
        assert_eq!(text, "15\n");
    }

    #[test]
    fn package_state_is_initialized() {
        let text = output(
            "package counter;
               var hits;
               procedure bump();
             end counter;
             package body counter;
               hits := 100;
               procedure bump(); hits +:= 1; return hits; end bump;
             end counter;
             program t;
               use counter;
               bump();
               print(bump());
             end t;",
            "t",
        );
        assert_eq!(text, "102\n");
    }

    #[test]
    fn objects_dispatch_through_slots() {
        let text = output(
            "class point;
               var x, y;
               procedure create(a, b);
               procedure norm();
             end point;
             class body point;
               procedure create(a, b); x := a; y := b; end create;
               procedure norm(); return x * x + y * y; end norm;
             end point;
             program t;
               use point;
               p := point(3, 4);
               p.x := 1;
               print(p.norm(), p.y);
             end t;",
            "t",
        );
        assert_eq!(text, "17 4\n");
    }

    #[test]
    fn abend_without_trap_reports_the_stack() {
        let (result, _) = run(
            "program t;
               f(0);
               procedure f(n); return 1 div n; end f;
             end t;",
            "t",
        );
        let Err(VmError::Abend(abend)) = result else {
            panic!("expected an abend, got {result:?}");
        };
        assert_eq!(abend.message, "division by zero");
        assert_eq!(abend.frames[0].procedure.as_deref(), Some("f"));
        assert_eq!(abend.frames[0].pos.line, 3);
        assert_eq!(abend.frames[1].pos.line, 2);
    }

    #[test]
    fn trap_resumes_after_the_fault() {
        let text = output(
            "program t;
               abend_trap := handler;
               x := 1 div 0;
               print(x, \"after\");
               procedure handler(msg); print(\"trapped\", msg); end handler;
             end t;",
            "t",
        );
        assert_eq!(text, "trapped division by zero\n<om> after\n");
    }

    #[test]
    fn command_line_is_read_only() {
        let (_dir, compiler) = compile("program t; print(command_line); end t;");
        let options = InterpreterOptions {
            command_line: vec!["a".into(), "b".into()],
            ..InterpreterOptions::default()
        };
        let (mut interp, out) = interpreter(compiler, options);
        interp.run("t").unwrap();
        assert_eq!(out.contents(), "[\"a\", \"b\"]\n");
    }

    #[test]
    fn processes_answer_requests_in_order() {
        let text = output(
            "process acc;
               procedure add(n);
             end acc;
             process body acc;
               var total := 0;
               procedure add(n); total +:= n; return total; end add;
             end acc;
             program t;
               use acc;
               a := acc();
               m1 := a.add(5);
               m2 := a.add(7);
               print(await(m1), await(m2));
             end t;",
            "t",
        );
        assert_eq!(text, "5 12\n");
    }

    #[test]
    fn waiting_forever_is_a_deadlock() {
        let (result, _) = run("program t; m := mailbox(); x := await(m); end t;", "t");
        let Err(VmError::Abend(abend)) = result else {
            panic!("expected a deadlock, got {result:?}");
        };
        assert_eq!(abend.message, RuntimeError::Deadlock.to_string());
    }

    #[test]
    fn suspended_processes_wait_and_killed_ones_refuse_requests() {
        let (result, text) = run(
            "process doubler;
               procedure twice(n);
             end doubler;
             process body doubler;
               procedure twice(n); return n * 2; end twice;
             end doubler;
             program t;
               use doubler;
               d := doubler();
               suspend(d);
               r := d.twice(4);
               pass();
               print(acheck(r));
               resume(d);
               print(await(r));
               kill(d);
               r := d.twice(5);
             end t;",
            "t",
        );
        assert_eq!(text, "#F\n8\n");
        let Err(VmError::Abend(abend)) = result else {
            panic!("expected an abend, got {result:?}");
        };
        assert_eq!(abend.message, RuntimeError::ProcessKilled(0).to_string());
    }

    #[test]
    fn dropped_processes_free_their_entries() {
        let (_dir, compiler) = compile(
            "process worker;
               procedure f();
             end worker;
             process body worker;
               procedure f(); return 1; end f;
             end worker;
             program t;
               use worker;
               total := 0;
               for i in [1..200] loop
                 w := worker();
                 total +:= await(w.f());
                 kill(w);
                 w := om;
               end loop;
               print(total);
             end t;",
        );
        let (mut interp, out) = interpreter(compiler, InterpreterOptions::default());
        interp.run("t").unwrap();
        assert_eq!(out.contents(), "200\n");
        assert!(interp.sched.processes.len() < 5, "{} entries", interp.sched.processes.len());
    }

    #[test]
    fn faulting_traps_stop_after_three_levels() {
        let (result, text) = run(
            "program t;
               abend_trap := handler;
               x := 1 div 0;
               procedure handler(msg); print(\"trapped\"); y := 1 div 0; end handler;
             end t;",
            "t",
        );
        assert_eq!(text, "trapped\ntrapped\ntrapped\n");
        let Err(VmError::Abend(abend)) = result else {
            panic!("expected an abend, got {result:?}");
        };
        assert_eq!(abend.message, RuntimeError::TrapDepth.to_string());
    }

    struct Relay;

    impl CalloutHost for Relay {
        fn callout(
            &mut self,
            _: i32,
            _: &[Vec<u8>],
            _: &mut CallbackContext<'_>,
        ) -> Result<Option<Vec<u8>>, String> {
            Err("text callouts are not handled".into())
        }

        fn callout_binary(
            &mut self,
            code: i32,
            args: &[Vec<u8>],
            ctx: &mut CallbackContext<'_>,
        ) -> Result<Option<Vec<u8>>, String> {
            let parts: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
            let mut reply = ctx.invoke(&parts)?.unwrap_or_default();
            reply.push(0);
            reply.extend(code.to_string().bytes());
            Ok(Some(reply))
        }
    }

    #[test]
    fn binary_callouts_call_back_into_the_program() {
        let (_dir, compiler) = compile(
            "program t;
               r := ccallout2(7, joined, [\"a\", \"b\"]);
               print(#r, r(1), r(2), r(4));
               procedure joined(parts); return parts(1) + parts(2); end joined;
             end t;",
        );
        let (mut interp, out) = interpreter(compiler, InterpreterOptions::default());
        interp.set_callout_host(Box::new(Relay));
        interp.run("t").unwrap();
        assert_eq!(out.contents(), "4 a b 7\n");
    }

    struct Scale {
        factor: i64,
        finished: Rc<RefCell<bool>>,
    }

    impl NativeUnit for Scale {
        fn name(&self) -> &str {
            "scale"
        }

        fn call(
            &mut self,
            index: u32,
            args: &[Specifier],
            target: &mut Specifier,
        ) -> Result<(), String> {
            match (index, args) {
                (0, [Specifier::Short(v)]) => {
                    *target = Specifier::from(v * self.factor);
                    Ok(())
                }
                _ => Err(format!("bad call to export {index}")),
            }
        }

        fn finish(&mut self) {
            *self.finished.borrow_mut() = true;
        }
    }

    #[test]
    fn native_packages_call_into_the_host() {
        let (_dir, compiler) = compile(
            "native package scale; procedure times(x); end scale;
             program t; use scale; print(times(6)); end t;",
        );
        let (mut interp, out) = interpreter(compiler, InterpreterOptions::default());
        assert!(matches!(interp.load_program("t"), Err(LoadError::MissingNative(_))));

        let finished = Rc::new(RefCell::new(false));
        interp.register_native(Box::new(Scale {
            factor: 3,
            finished: finished.clone(),
        }));
        interp.run("t").unwrap();
        assert_eq!(out.contents(), "18\n");
        assert!(*finished.borrow());
    }

    #[test]
    fn eval_fragments_keep_their_globals() {
        let dir = tempfile::tempdir().unwrap();
        let mut library = Library::new();
        library.add_lib_file(dir.path().join("eval.lib"), true).unwrap();
        let mut compiler = Compiler::new(library, CompilerOptions::default())
            .with_report(Box::new(std::io::sink()));
        let first = compiler.compile_fragment("x := 41;", FragmentMode::Eval).unwrap();
        let second = compiler.compile_fragment("print(x + 1);", FragmentMode::Eval).unwrap();
        let (mut interp, out) = interpreter(compiler, InterpreterOptions::default());
        interp.run(&first).unwrap();
        interp.run(&second).unwrap();
        assert_eq!(out.contents(), "42\n");
    }

    struct Refusing;

    impl std::io::Write for Refusing {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("refused"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lost_profile_report_does_not_fail_the_run() {
        let (_dir, compiler) = compile("program t; x := 1 + 2; end t;");
        let options = InterpreterOptions {
            profile: true,
            ..InterpreterOptions::default()
        };
        let mut interp =
            Interpreter::new(compiler.into_library(), options).with_output(Box::new(Refusing));
        interp.run("t").unwrap();
    }

    #[test]
    fn profile_and_dump_go_to_the_output() {
        let (_dir, compiler) = compile("program t; x := 1 + 2; end t;");
        let options = InterpreterOptions {
            dump: true,
            profile: true,
            ..InterpreterOptions::default()
        };
        let (mut interp, out) = interpreter(compiler, options);
        interp.run("t").unwrap();
        let text = out.contents();
        assert!(text.contains("unit t [program]"));
        assert!(text.contains("opcode profile"));
        assert!(text.contains("stop"));
    }
}
