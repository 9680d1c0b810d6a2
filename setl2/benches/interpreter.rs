use std::hint::black_box;

use compiler::{Compiler, CompilerOptions};
use criterion::{Criterion, criterion_group, criterion_main};
use library::Library;
use tempfile::TempDir;
use vm::{Interpreter, InterpreterOptions};

fn compile(src: &str) -> (TempDir, Library) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut library = Library::new();
    library.add_lib_file(dir.path().join("bench.lib"), true).expect("library");
    let mut compiler = Compiler::new(library, CompilerOptions::default())
        .with_report(Box::new(std::io::sink()));
    compiler.compile_source(src, "bench.stl").expect("compile");
    (dir, compiler.into_library())
}

fn run_case(c: &mut Criterion, name: &str, src: &str, program: &str) {
    let (_dir, library) = compile(src);
    let mut interp = Interpreter::new(library, InterpreterOptions::default())
        .with_output(Box::new(std::io::sink()));
    interp.run(program).expect("warmup");

    c.bench_function(name, |b| {
        b.iter(|| {
            interp.run(black_box(program)).expect("interpret");
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    run_case(
        c,
        "arithmetic_loop",
        "program arith;
           total := 0;
           for i in [1..2000] loop total +:= i * 2 - 1; end loop;
         end arith;",
        "arith",
    );
    run_case(
        c,
        "set_building",
        "program sets;
           s := {};
           for i in [1..500] | even(i) loop s with:= i; end loop;
           n := #s;
         end sets;",
        "sets",
    );
    run_case(
        c,
        "procedure_calls",
        "program calls;
           x := fib(15);
           procedure fib(n);
             if n < 2 then return n; end if;
             return fib(n - 1) + fib(n - 2);
           end fib;
         end calls;",
        "calls",
    );
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
