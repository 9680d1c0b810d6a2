//! # Parser
//!
//! Streaming lexer and recursive-descent parser for SETL2 source.
//!
//! ```text
//!  impl Read ──▶ Lexer ──(Token)──▶ Parser ──(Unit)──▶
//! ```
//!
//! ```rust
//! use parser::{Lexer, Parser};
//!
//! let lexer = Lexer::from_str("program p; print(1); end p;");
//! let mut parser = Parser::new(lexer);
//! let unit = parser.next().unwrap().unwrap();
//! assert_eq!(unit.name, "p");
//! ```

pub mod ast;
pub mod dump;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;

pub use ast::{
    AstArena, BinOp, Block, Decl, ExprId, ExprKind, ExprNode, Formal, FormalMode, Former,
    FromKind, Iter, ProcDecl, Quantifier, Stmt, StmtKind, UnOp, Unit, UnitHeader, VarDecl,
    expr_to_string,
};
pub use dump::dump_unit;
pub use lexer::Lexer;
pub use parser::{ParseError, Parser};
pub use span::{Pos, Span};
pub use token::{Keyword, Token, TokenKind};

/// Parses every unit in `source`.
pub fn parse_source(source: &str) -> Result<(AstArena, Vec<Unit>), ParseError> {
    let mut parser = Parser::new(Lexer::from_str(source));
    let mut units = Vec::new();
    for unit in parser.by_ref() {
        units.push(unit?);
    }
    Ok((parser.into_arena(), units))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(source: &str) -> (AstArena, Unit) {
        let (arena, mut units) = parse_source(source).unwrap();
        assert_eq!(units.len(), 1);
        (arena, units.remove(0))
    }

    fn expr(source: &str) -> String {
        let (arena, unit) = one(&format!("program t; x := {source}; end t;"));
        match &unit.block.stmts[0].kind {
            StmtKind::Assign { value, .. } => expr_to_string(&arena, *value),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn minimal_program() {
        let (arena, unit) = one("program p; print(\"hello\"); end p;");
        assert_eq!(unit.header, UnitHeader::Program);
        assert_eq!(unit.block.stmts.len(), 1);
        let StmtKind::Expr(call) = unit.block.stmts[0].kind else {
            panic!("expected a call");
        };
        assert_eq!(expr_to_string(&arena, call), "print(\"hello\")");
    }

    #[test]
    fn precedence() {
        assert_eq!(expr("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(expr("-x ** 2"), "(- (x ** 2))");
        assert_eq!(expr("a or b and not c = d"), "(a or (b and (not (c = d))))");
        assert_eq!(expr("#s + 1"), "((# s) + 1)");
        assert_eq!(expr("s with 1 less 2"), "((s with 1) less 2)");
        assert_eq!(expr("f(x) ? 0"), "(f(x) ? 0)");
        assert_eq!(expr("+/ [1, 2]"), "(+/ [1, 2])");
    }

    #[test]
    fn formers() {
        assert_eq!(expr("{}"), "{}");
        assert_eq!(expr("[1..10]"), "[1..10]");
        assert_eq!(expr("[1, 3..9]"), "[1, 3..9]");
        assert_eq!(expr("{x * 2 : x in s | x > 1}"), "{(x * 2) : x in s | (x > 1)}");
        assert_eq!(expr("{x in s | odd(x)}"), "{x in s | odd(x)}");
        assert_eq!(expr("exists x in s | x > 2"), "exists x in s | (x > 2)");
    }

    #[test]
    fn postfix_forms() {
        assert_eq!(expr("t(2..)"), "t(2..)");
        assert_eq!(expr("f{x}.y(1)"), "f{x}.y(1)");
        assert_eq!(expr("o.m()"), "o.m()");
    }

    #[test]
    fn tuple_targets_with_placeholders() {
        let (arena, unit) = one("program t; [a, -, c] := [1, 2, 3]; end t;");
        let StmtKind::Assign { target, .. } = unit.block.stmts[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(expr_to_string(&arena, target), "[a, -, c]");
    }

    #[test]
    fn procedures_and_modes() {
        let (_, unit) = one(
            "program t;
               p(3, z);
               procedure p(rd x, wr y, rest(*));
                 y := x * 2;
               end p;
             end t;",
        );
        let Decl::Proc(proc) = &unit.block.decls[0] else {
            panic!("expected a procedure");
        };
        assert_eq!(proc.formals.len(), 3);
        assert_eq!(proc.formals[1].mode, FormalMode::Wr);
        assert!(proc.var_args);
        assert!(proc.body.is_some());
    }

    #[test]
    fn specs_hold_headers_only() {
        let (arena, units) = parse_source(
            "class base; var x; procedure create(); procedure m(); end base;
             class body base;
               procedure create(); x := 0; end create;
               procedure m(); return 1; end m;
             end base;",
        )
        .unwrap();
        assert!(!arena.is_empty());
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].header, UnitHeader::Class);
        assert!(units[0].block.decls.iter().all(|d| match d {
            Decl::Proc(p) => p.body.is_none(),
            _ => true,
        }));
        assert_eq!(units[1].header, UnitHeader::ClassBody);
    }

    #[test]
    fn control_flow() {
        let (_, unit) = one(
            "program t;
               if a then x := 1; elseif b then x := 2; else x := 3; end if;
               for i in [1..3] | i /= 2 loop print(i); end loop;
               while x > 0 loop x -:= 1; end loop;
               case x of (1, 2): print(1); (3): print(3); otherwise: print(0); end case;
               y from s;
             end t;",
        );
        let kinds: Vec<_> =
            unit.block.stmts.iter().map(|s| std::mem::discriminant(&s.kind)).collect();
        assert_eq!(kinds.len(), 5);
        let StmtKind::Case { arms, otherwise, .. } = &unit.block.stmts[3].kind else {
            panic!("expected case");
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[0].0.len(), 2);
        assert_eq!(otherwise.len(), 1);
    }

    #[test]
    fn mismatched_end_is_reported() {
        let err = parse_source("program p; end q;").unwrap_err();
        assert!(err.message.contains("closes"));
        assert_eq!(err.span.start.line, 1);
    }

    #[test]
    fn header_clauses() {
        let (_, unit) = one("class d; inherit base; use util, io; end d;");
        assert_eq!(unit.inherits.len(), 1);
        assert_eq!(unit.uses.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(), ["util", "io"]);
    }

    #[test]
    fn dump_lists_statements() {
        let (arena, unit) = one("program p;\nx := 1;\nprint(x);\nend p;");
        let text = dump_unit(&arena, &unit);
        assert!(text.contains("[2] x := 1"));
        assert!(text.contains("[3] print(x)"));
    }
}
