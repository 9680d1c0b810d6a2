use std::collections::VecDeque;

use crate::ast::{
    AstArena, BinOp, Block, Decl, ExprId, ExprKind, ExprNode, Formal, FormalMode, Former,
    FromKind, Iter, ProcDecl, Quantifier, Stmt, StmtKind, UnOp, Unit, UnitHeader, VarDecl,
};
use crate::span::{Pos, Span};
use crate::token::{Keyword, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at {span}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Recursive-descent parser producing one [`Unit`] per iteration.
pub struct Parser<I: Iterator<Item = Token>> {
    tokens: I,
    lookahead: VecDeque<Token>,
    arena: AstArena,
    last_span: Span,
    failed: bool,
}

impl<I: Iterator<Item = Token>> Parser<I> {
    pub fn new(tokens: I) -> Self {
        Self {
            tokens,
            lookahead: VecDeque::new(),
            arena: AstArena::default(),
            last_span: Span::point(Pos::origin()),
            failed: false,
        }
    }

    pub fn arena(&self) -> &AstArena {
        &self.arena
    }

    pub fn into_arena(self) -> AstArena {
        self.arena
    }

    // ── token plumbing ─────────────────────────────────────────────

    fn fill(&mut self, n: usize) {
        while self.lookahead.len() <= n {
            let tok = self
                .tokens
                .next()
                .unwrap_or_else(|| Token::new(TokenKind::Eof, self.last_span));
            self.lookahead.push_back(tok);
        }
    }

    fn peek_nth(&mut self, n: usize) -> &TokenKind {
        self.fill(n);
        &self.lookahead[n].kind
    }

    fn peek(&mut self) -> &TokenKind {
        self.peek_nth(0)
    }

    fn peek_span(&mut self) -> Span {
        self.fill(0);
        self.lookahead[0].span
    }

    fn advance(&mut self) -> Token {
        self.fill(0);
        let tok = self
            .lookahead
            .pop_front()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, self.last_span));
        self.last_span = tok.span;
        tok
    }

    fn check(&mut self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn check_kw(&mut self, kw: Keyword) -> bool {
        self.check(&TokenKind::Keyword(kw))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(kw))
    }

    fn unexpected(&mut self, expected: &str) -> ParseError {
        let tok = self.advance();
        let found = match &tok.kind {
            TokenKind::Error(msg) => return ParseError::new(msg.clone(), tok.span),
            other => other.name(),
        };
        ParseError::new(format!("expected {expected}, found {found}"), tok.span)
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Span> {
        if self.check(kind) {
            Ok(self.advance().span)
        } else {
            let name = kind.name();
            Err(self.unexpected(&name))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<Span> {
        self.expect(&TokenKind::Keyword(kw))
    }

    fn expect_ident(&mut self) -> PResult<(String, Span)> {
        if let TokenKind::Identifier(_) = self.peek() {
            let tok = self.advance();
            if let TokenKind::Identifier(name) = tok.kind {
                return Ok((name, tok.span));
            }
        }
        Err(self.unexpected("identifier"))
    }

    fn alloc(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.arena.alloc(ExprNode { kind, span })
    }

    fn span_from(&self, start: Span) -> Span {
        start.merge(self.last_span)
    }

    // ── units ──────────────────────────────────────────────────────

    pub fn parse_unit(&mut self) -> PResult<Unit> {
        let start = self.peek_span();
        let header = match self.advance().kind {
            TokenKind::Keyword(Keyword::Program) => UnitHeader::Program,
            TokenKind::Keyword(Keyword::Package) if self.eat_kw(Keyword::Body) => {
                UnitHeader::PackageBody
            }
            TokenKind::Keyword(Keyword::Package) => UnitHeader::Package,
            TokenKind::Keyword(Keyword::Class) if self.eat_kw(Keyword::Body) => {
                UnitHeader::ClassBody
            }
            TokenKind::Keyword(Keyword::Class) => UnitHeader::Class,
            TokenKind::Keyword(Keyword::Process) if self.eat_kw(Keyword::Body) => {
                UnitHeader::ProcessBody
            }
            TokenKind::Keyword(Keyword::Process) => UnitHeader::Process,
            TokenKind::Keyword(Keyword::Native) => {
                self.expect_kw(Keyword::Package)?;
                UnitHeader::NativePackage
            }
            TokenKind::Error(msg) => return Err(ParseError::new(msg, start)),
            other => {
                return Err(ParseError::new(
                    format!("expected a unit header, found {}", other.name()),
                    start,
                ));
            }
        };
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::Semicolon)?;
        log::trace!("parsing {} {name}", header.keyword());

        let mut uses = Vec::new();
        let mut inherits = Vec::new();
        loop {
            if self.eat_kw(Keyword::Use) {
                uses.extend(self.name_list()?);
            } else if self.eat_kw(Keyword::Inherit) {
                inherits.extend(self.name_list()?);
            } else {
                break;
            }
            self.expect(&TokenKind::Semicolon)?;
        }

        let block = self.parse_block(header.is_spec())?;
        self.parse_end(Some(&name))?;
        Ok(Unit {
            header,
            name,
            uses,
            inherits,
            block,
            span: self.span_from(start),
        })
    }

    fn name_list(&mut self) -> PResult<Vec<(String, Span)>> {
        let mut names = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    /// `end [name];`
    fn parse_end(&mut self, name: Option<&str>) -> PResult<()> {
        self.expect_kw(Keyword::End)?;
        if let TokenKind::Identifier(_) = self.peek() {
            let (closing, span) = self.expect_ident()?;
            if let Some(name) = name.filter(|n| *n != closing) {
                return Err(ParseError::new(format!("`end {closing}` closes `{name}`"), span));
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(())
    }

    /// `end kw;` for compound statements.
    fn parse_end_kw(&mut self, kw: Keyword) -> PResult<()> {
        self.expect_kw(Keyword::End)?;
        self.expect_kw(kw)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(())
    }

    fn parse_block(&mut self, headers_only: bool) -> PResult<Block> {
        let mut block = Block::default();
        loop {
            match self.peek() {
                TokenKind::Keyword(Keyword::Var) => {
                    self.advance();
                    block.decls.push(Decl::Var(self.var_list(false)?));
                }
                TokenKind::Keyword(Keyword::Const) => {
                    self.advance();
                    block.decls.push(Decl::Const(self.var_list(true)?));
                }
                TokenKind::Keyword(Keyword::Sel) => {
                    self.advance();
                    let names = self.name_list()?;
                    self.expect(&TokenKind::Semicolon)?;
                    block.decls.push(Decl::Sel(names));
                }
                TokenKind::Keyword(Keyword::Procedure) => {
                    let proc = self.parse_procedure(headers_only)?;
                    block.decls.push(Decl::Proc(proc));
                }
                TokenKind::Keyword(Keyword::End) | TokenKind::Eof => return Ok(block),
                _ => block.stmts.push(self.parse_stmt()?),
            }
        }
    }

    fn var_list(&mut self, constant: bool) -> PResult<Vec<VarDecl>> {
        let mut vars = Vec::new();
        loop {
            let (name, span) = self.expect_ident()?;
            let init = if self.eat(&TokenKind::Assign) || (constant && self.eat(&TokenKind::Eq)) {
                Some(self.parse_expr()?)
            } else if constant {
                return Err(ParseError::new(format!("constant `{name}` needs a value"), span));
            } else {
                None
            };
            vars.push(VarDecl { name, init, span });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(vars)
    }

    fn parse_procedure(&mut self, header_only: bool) -> PResult<ProcDecl> {
        let start = self.expect_kw(Keyword::Procedure)?;
        let (name, _) = self.expect_ident()?;
        let mut formals = Vec::new();
        let mut var_args = false;
        if self.eat(&TokenKind::LParen) && !self.eat(&TokenKind::RParen) {
            loop {
                let span = self.peek_span();
                if var_args {
                    return Err(ParseError::new("only the last formal may take `(*)`", span));
                }
                let mode = if self.eat_kw(Keyword::Rd) {
                    FormalMode::Rd
                } else if self.eat_kw(Keyword::Wr) {
                    FormalMode::Wr
                } else if self.eat_kw(Keyword::Rw) {
                    FormalMode::Rw
                } else {
                    FormalMode::Rd
                };
                let (formal, _) = self.expect_ident()?;
                if self.check(&TokenKind::LParen) && self.peek_nth(1) == &TokenKind::Star {
                    self.advance();
                    self.advance();
                    self.expect(&TokenKind::RParen)?;
                    var_args = true;
                }
                formals.push(Formal {
                    name: formal,
                    mode,
                    span: self.span_from(span),
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        self.expect(&TokenKind::Semicolon)?;
        let body = if header_only {
            None
        } else {
            let block = self.parse_block(false)?;
            self.parse_end(Some(&name))?;
            Some(block)
        };
        Ok(ProcDecl {
            name,
            formals,
            var_args,
            body,
            span: self.span_from(start),
        })
    }

    // ── statements ─────────────────────────────────────────────────

    /// Statements up to `end`, `else`, `elseif`, `otherwise` or, inside
    /// a case, the next `(`.
    fn parse_stmts(&mut self, in_case: bool) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Keyword(
                    Keyword::End | Keyword::Else | Keyword::Elseif | Keyword::Otherwise,
                )
                | TokenKind::Eof => return Ok(stmts),
                TokenKind::LParen if in_case => return Ok(stmts),
                TokenKind::Keyword(Keyword::Var | Keyword::Const | Keyword::Procedure) => {
                    let span = self.peek_span();
                    return Err(ParseError::new("declarations are not allowed here", span));
                }
                _ => stmts.push(self.parse_stmt()?),
            }
        }
    }

    pub fn parse_stmt(&mut self) -> PResult<Stmt> {
        let start = self.peek_span();
        let kind = match self.peek().clone() {
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.loop_body()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Keyword(Keyword::Until) => {
                self.advance();
                let cond = self.parse_expr()?;
                let body = self.loop_body()?;
                StmtKind::Until { cond, body }
            }
            TokenKind::Keyword(Keyword::Loop) => StmtKind::Loop { body: self.loop_body()? },
            TokenKind::Keyword(Keyword::For) => {
                self.advance();
                let iters = self.parse_iters()?;
                let cond = if self.eat(&TokenKind::Pipe) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                let body = self.loop_body()?;
                StmtKind::For { iters, cond, body }
            }
            TokenKind::Keyword(Keyword::Case) => self.parse_case()?,
            TokenKind::Keyword(Keyword::Exit) => {
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::Exit
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Stop) => {
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::Stop
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semicolon)?;
                StmtKind::Return(value)
            }
            _ => self.parse_simple_stmt()?,
        };
        Ok(Stmt {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_simple_stmt(&mut self) -> PResult<StmtKind> {
        let target = self.parse_expr()?;
        let kind = match self.peek().clone() {
            TokenKind::Assign => {
                self.advance();
                StmtKind::Assign {
                    target,
                    value: self.parse_expr()?,
                }
            }
            TokenKind::OpAssign(op) => {
                self.advance();
                StmtKind::AssignOp {
                    target,
                    op,
                    value: self.parse_expr()?,
                }
            }
            TokenKind::Keyword(kw @ (Keyword::From | Keyword::Fromb | Keyword::Frome)) => {
                self.advance();
                let kind = match kw {
                    Keyword::From => FromKind::Any,
                    Keyword::Fromb => FromKind::Begin,
                    _ => FromKind::End,
                };
                StmtKind::From {
                    kind,
                    target,
                    source: self.parse_expr()?,
                }
            }
            _ => StmtKind::Expr(target),
        };
        self.expect(&TokenKind::Semicolon)?;
        Ok(kind)
    }

    fn loop_body(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_kw(Keyword::Loop)?;
        let body = self.parse_stmts(false)?;
        self.parse_end_kw(Keyword::Loop)?;
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.expect_kw(Keyword::If)?;
        let mut arms = Vec::new();
        let mut otherwise = Vec::new();
        loop {
            let cond = self.parse_expr()?;
            self.expect_kw(Keyword::Then)?;
            arms.push((cond, self.parse_stmts(false)?));
            if self.eat_kw(Keyword::Elseif) {
                continue;
            }
            if self.eat_kw(Keyword::Else) {
                otherwise = self.parse_stmts(false)?;
            }
            break;
        }
        self.parse_end_kw(Keyword::If)?;
        Ok(StmtKind::If { arms, otherwise })
    }

    fn parse_case(&mut self) -> PResult<StmtKind> {
        self.expect_kw(Keyword::Case)?;
        let subject = self.parse_expr()?;
        self.expect_kw(Keyword::Of)?;
        let mut arms = Vec::new();
        while self.eat(&TokenKind::LParen) {
            let mut values = vec![self.parse_expr()?];
            while self.eat(&TokenKind::Comma) {
                values.push(self.parse_expr()?);
            }
            self.expect(&TokenKind::RParen)?;
            self.expect(&TokenKind::Colon)?;
            arms.push((values, self.parse_stmts(true)?));
        }
        let otherwise = if self.eat_kw(Keyword::Otherwise) {
            self.expect(&TokenKind::Colon)?;
            self.parse_stmts(false)?
        } else {
            Vec::new()
        };
        self.parse_end_kw(Keyword::Case)?;
        Ok(StmtKind::Case {
            subject,
            arms,
            otherwise,
        })
    }

    fn parse_iters(&mut self) -> PResult<Vec<Iter>> {
        let mut iters = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            iters.push(self.iter_from(expr)?);
            if !self.eat(&TokenKind::Comma) {
                return Ok(iters);
            }
        }
    }

    fn iter_from(&self, expr: ExprId) -> PResult<Iter> {
        match self.arena.kind(expr) {
            ExprKind::Binary {
                op: BinOp::In,
                left,
                right,
            } => Ok(Iter {
                target: *left,
                source: *right,
                span: self.arena.span(expr),
            }),
            _ => Err(ParseError::new("expected an iterator `x in s`", self.arena.span(expr))),
        }
    }

    // ── expressions ────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> PResult<ExprId> {
        self.parse_or()
    }

    fn binary(&mut self, op: BinOp, left: ExprId, right: ExprId) -> ExprId {
        let span = self.arena.span(left).merge(self.arena.span(right));
        self.alloc(ExprKind::Binary { op, left, right }, span)
    }

    fn parse_or(&mut self) -> PResult<ExprId> {
        let mut left = self.parse_and()?;
        while self.eat_kw(Keyword::Or) {
            let right = self.parse_and()?;
            left = self.binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<ExprId> {
        let mut left = self.parse_not()?;
        while self.eat_kw(Keyword::And) {
            let right = self.parse_not()?;
            left = self.binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<ExprId> {
        if self.check_kw(Keyword::Not) {
            let start = self.advance().span;
            let operand = self.parse_not()?;
            let span = start.merge(self.arena.span(operand));
            return Ok(self.alloc(ExprKind::Unary { op: UnOp::Not, operand }, span));
        }
        self.parse_compare()
    }

    fn compare_op(&mut self) -> Option<BinOp> {
        Some(match self.peek() {
            TokenKind::Eq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::Keyword(Keyword::In) => BinOp::In,
            TokenKind::Keyword(Keyword::Notin) => BinOp::NotIn,
            TokenKind::Keyword(Keyword::Subset) => BinOp::Subset,
            TokenKind::Keyword(Keyword::Incs) => BinOp::Incs,
            _ => return None,
        })
    }

    fn parse_compare(&mut self) -> PResult<ExprId> {
        let mut left = self.parse_default()?;
        while let Some(op) = self.compare_op() {
            self.advance();
            let right = self.parse_default()?;
            left = self.binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_default(&mut self) -> PResult<ExprId> {
        let mut left = self.parse_additive()?;
        while self.eat(&TokenKind::Question) {
            let right = self.parse_additive()?;
            left = self.binary(BinOp::Default, left, right);
        }
        Ok(left)
    }

    fn additive_op(&mut self) -> Option<BinOp> {
        Some(match self.peek() {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Keyword(Keyword::With) => BinOp::With,
            TokenKind::Keyword(Keyword::Less) => BinOp::Less,
            TokenKind::Keyword(Keyword::Lessf) => BinOp::Lessf,
            TokenKind::Keyword(Keyword::Max) => BinOp::Max,
            TokenKind::Keyword(Keyword::Min) => BinOp::Min,
            _ => return None,
        })
    }

    fn parse_additive(&mut self) -> PResult<ExprId> {
        let mut left = self.parse_mult()?;
        while let Some(op) = self.additive_op() {
            self.advance();
            let right = self.parse_mult()?;
            left = self.binary(op, left, right);
        }
        Ok(left)
    }

    fn mult_op(&mut self) -> Option<BinOp> {
        Some(match self.peek() {
            TokenKind::Star => BinOp::Mult,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Keyword(Keyword::Div) => BinOp::IntDiv,
            TokenKind::Keyword(Keyword::Mod) => BinOp::Mod,
            _ => return None,
        })
    }

    fn parse_mult(&mut self) -> PResult<ExprId> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.mult_op() {
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<ExprId> {
        let op = match self.peek() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Hash => UnOp::Card,
            TokenKind::Keyword(Keyword::Arb) => UnOp::Arb,
            TokenKind::Keyword(Keyword::Domain) => UnOp::Domain,
            TokenKind::Keyword(Keyword::Range) => UnOp::Range,
            TokenKind::Keyword(Keyword::Pow) => UnOp::Pow,
            TokenKind::Reduce(op) => {
                let op = *op;
                let start = self.advance().span;
                let operand = self.parse_unary()?;
                let span = start.merge(self.arena.span(operand));
                return Ok(self.alloc(ExprKind::Reduce { op, operand }, span));
            }
            _ => return self.parse_power(),
        };
        let start = self.advance().span;
        let operand = self.parse_unary()?;
        let span = start.merge(self.arena.span(operand));
        Ok(self.alloc(ExprKind::Unary { op, operand }, span))
    }

    fn parse_power(&mut self) -> PResult<ExprId> {
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::StarStar) {
            let exponent = self.parse_unary()?;
            return Ok(self.binary(BinOp::Exp, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> PResult<ExprId> {
        let mut expr = self.parse_primary()?;
        let start = self.arena.span(expr);
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    if self.eat(&TokenKind::RParen) {
                        expr = self.alloc(
                            ExprKind::Call {
                                callee: expr,
                                args: Vec::new(),
                            },
                            self.span_from(start),
                        );
                        continue;
                    }
                    let first = self.parse_expr()?;
                    if self.eat(&TokenKind::DotDot) {
                        let hi = if self.check(&TokenKind::RParen) {
                            None
                        } else {
                            Some(self.parse_expr()?)
                        };
                        self.expect(&TokenKind::RParen)?;
                        expr = self.alloc(
                            ExprKind::Slice {
                                target: expr,
                                lo: first,
                                hi,
                            },
                            self.span_from(start),
                        );
                        continue;
                    }
                    let mut args = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        args.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RParen)?;
                    expr = self.alloc(ExprKind::Call { callee: expr, args }, self.span_from(start));
                }
                TokenKind::LBrace => {
                    self.advance();
                    let arg = self.parse_expr()?;
                    self.expect(&TokenKind::RBrace)?;
                    expr = self.alloc(ExprKind::Image { map: expr, arg }, self.span_from(start));
                }
                TokenKind::Dot => {
                    self.advance();
                    let (name, _) = self.expect_ident()?;
                    let kind = ExprKind::Select { object: expr, name };
                    expr = self.alloc(kind, self.span_from(start));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<ExprId> {
        let span = self.peek_span();
        let kind = match self.peek().clone() {
            TokenKind::Integer(text) => ExprKind::Integer(text),
            TokenKind::Real(v) => ExprKind::Real(v),
            TokenKind::String(s) => ExprKind::String(s),
            TokenKind::Identifier(name) => ExprKind::Name(name),
            TokenKind::Keyword(Keyword::Om) => ExprKind::Omega,
            TokenKind::Keyword(Keyword::True) => ExprKind::True,
            TokenKind::Keyword(Keyword::False) => ExprKind::False,
            TokenKind::Keyword(Keyword::SelfKw) => ExprKind::SelfRef,
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBrace => {
                self.advance();
                let former = self.parse_former(&TokenKind::RBrace)?;
                return Ok(self.alloc(ExprKind::Set(former), self.span_from(span)));
            }
            TokenKind::LBracket => {
                self.advance();
                let former = self.parse_former(&TokenKind::RBracket)?;
                return Ok(self.alloc(ExprKind::Tuple(former), self.span_from(span)));
            }
            TokenKind::Keyword(kw @ (Keyword::Exists | Keyword::Forall)) => {
                self.advance();
                let iters = self.parse_iters()?;
                self.expect(&TokenKind::Pipe)?;
                let cond = self.parse_expr()?;
                let kind = if kw == Keyword::Exists {
                    Quantifier::Exists
                } else {
                    Quantifier::Forall
                };
                let node = ExprKind::Quantified { kind, iters, cond };
                return Ok(self.alloc(node, self.span_from(span)));
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(self.alloc(kind, span))
    }

    fn former_item(&mut self, closing: &TokenKind) -> PResult<ExprId> {
        let placeholder = self.check(&TokenKind::Minus)
            && closing == &TokenKind::RBracket
            && matches!(self.peek_nth(1), TokenKind::Comma | TokenKind::RBracket);
        if placeholder {
            let span = self.advance().span;
            return Ok(self.alloc(ExprKind::Placeholder, span));
        }
        self.parse_expr()
    }

    fn parse_former(&mut self, closing: &TokenKind) -> PResult<Former> {
        if self.eat(closing) {
            return Ok(Former::Enum(Vec::new()));
        }
        let first = self.former_item(closing)?;
        let former = match self.peek() {
            TokenKind::Colon => {
                self.advance();
                let iters = self.parse_iters()?;
                let cond = if self.eat(&TokenKind::Pipe) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Former::Compr {
                    expr: Some(first),
                    iters,
                    cond,
                }
            }
            TokenKind::Pipe => {
                self.advance();
                let iter = self.iter_from(first)?;
                Former::Compr {
                    expr: None,
                    iters: vec![iter],
                    cond: Some(self.parse_expr()?),
                }
            }
            TokenKind::DotDot => {
                self.advance();
                Former::Range {
                    first,
                    second: None,
                    last: self.parse_expr()?,
                }
            }
            TokenKind::Comma => {
                self.advance();
                let second = self.former_item(closing)?;
                if self.eat(&TokenKind::DotDot) {
                    Former::Range {
                        first,
                        second: Some(second),
                        last: self.parse_expr()?,
                    }
                } else {
                    let mut items = vec![first, second];
                    while self.eat(&TokenKind::Comma) {
                        items.push(self.former_item(closing)?);
                    }
                    Former::Enum(items)
                }
            }
            _ => Former::Enum(vec![first]),
        };
        self.expect(closing)?;
        Ok(former)
    }
}

impl<I: Iterator<Item = Token>> Iterator for Parser<I> {
    type Item = PResult<Unit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.check(&TokenKind::Eof) {
            return None;
        }
        let unit = self.parse_unit();
        self.failed = unit.is_err();
        Some(unit)
    }
}
