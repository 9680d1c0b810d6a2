//! Streaming lexer.
//!
//! [`Lexer`] pulls bytes from any [`std::io::Read`] and yields [`Token`]s,
//! ending with a single [`TokenKind::Eof`]. Identifiers and keywords are
//! case-insensitive and come out lowercased. `--` and `$` start comments
//! that run to the end of the line.

use std::io::Read;

use crate::ast::BinOp;
use crate::span::{Pos, Span};
use crate::token::{Keyword, Token, TokenKind};

// ── read buffer ────────────────────────────────────────────────────

/// Bytes of lookahead; `**:=` is the longest token needing it.
const LOOKAHEAD: usize = 4;

struct ReadBuf<R: Read> {
    reader: R,
    buf: [u8; LOOKAHEAD],
    filled: usize,
    reader_eof: bool,
    offset: usize,
    line: u32,
    column: u32,
}

impl<R: Read> ReadBuf<R> {
    fn new(reader: R) -> Self {
        let mut rb = Self {
            reader,
            buf: [0; LOOKAHEAD],
            filled: 0,
            reader_eof: false,
            offset: 0,
            line: 1,
            column: 1,
        };
        rb.fill();
        rb
    }

    fn fill(&mut self) {
        while !self.reader_eof && self.filled < LOOKAHEAD {
            let mut one = [0u8; 1];
            match self.reader.read(&mut one) {
                Ok(0) => self.reader_eof = true,
                Ok(_) => {
                    self.buf[self.filled] = one[0];
                    self.filled += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    log::warn!("source read failed: {err}");
                    self.reader_eof = true;
                }
            }
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        self.peek_ahead(0)
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        (n < self.filled).then(|| self.buf[n])
    }

    fn advance(&mut self) -> Option<u8> {
        if self.filled == 0 {
            return None;
        }
        let b = self.buf[0];
        self.buf.copy_within(1..self.filled, 0);
        self.filled -= 1;
        self.fill();
        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_assign(&self, n: usize) -> bool {
        self.peek_ahead(n) == Some(b':') && self.peek_ahead(n + 1) == Some(b'=')
    }
}

// ── lexer ──────────────────────────────────────────────────────────

pub struct Lexer<R: Read> {
    src: ReadBuf<R>,
    done: bool,
}

impl<'a> Lexer<&'a [u8]> {
    pub fn from_str(source: &'a str) -> Self {
        Self::new(source.as_bytes())
    }
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            src: ReadBuf::new(reader),
            done: false,
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.src.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.src.advance();
                }
                Some(b'$') => self.skip_line(),
                Some(b'-') if self.src.peek_ahead(1) == Some(b'-') => self.skip_line(),
                _ => return,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(b) = self.src.advance() {
            if b == b'\n' {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let start = self.src.pos();
        let kind = match self.src.peek() {
            None => TokenKind::Eof,
            Some(b) if b.is_ascii_alphabetic() => self.word(),
            Some(b) if b.is_ascii_digit() => self.number(),
            Some(b'"') => self.string(),
            Some(_) => self.punct(),
        };
        Token::new(kind, Span::new(start, self.src.pos()))
    }

    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(b) = self.src.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                word.push(b.to_ascii_lowercase() as char);
                self.src.advance();
            } else {
                break;
            }
        }
        let Some(kw) = Keyword::lookup(&word) else {
            return TokenKind::Identifier(word);
        };
        if let Some(op) = kw.as_binop() {
            if self.src.at_assign(0) {
                self.src.advance();
                self.src.advance();
                return TokenKind::OpAssign(op);
            }
            let reducible = matches!(kw, Keyword::Max | Keyword::Min);
            if reducible && self.src.peek() == Some(b'/') && self.src.peek_ahead(1) != Some(b'=') {
                self.src.advance();
                return TokenKind::Reduce(op);
            }
        }
        TokenKind::Keyword(kw)
    }

    fn number(&mut self) -> TokenKind {
        let mut text = String::new();
        self.digits(&mut text);
        let fraction = self.src.peek() == Some(b'.')
            && self.src.peek_ahead(1).is_some_and(|b| b.is_ascii_digit());
        if !fraction && !matches!(self.src.peek(), Some(b'e' | b'E')) {
            return TokenKind::Integer(text);
        }
        if fraction {
            self.src.advance();
            text.push('.');
            self.digits(&mut text);
        }
        if matches!(self.src.peek(), Some(b'e' | b'E')) {
            let signed = matches!(self.src.peek_ahead(1), Some(b'+' | b'-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.src.peek_ahead(digit_at).is_some_and(|b| b.is_ascii_digit()) {
                self.src.advance();
                text.push('e');
                if signed {
                    text.push(self.src.advance().map_or('+', char::from));
                }
                self.digits(&mut text);
            } else if !fraction {
                return TokenKind::Integer(text);
            }
        }
        match text.parse() {
            Ok(v) => TokenKind::Real(v),
            Err(_) => TokenKind::Error(format!("malformed real literal `{text}`")),
        }
    }

    fn digits(&mut self, out: &mut String) {
        while let Some(b) = self.src.peek().filter(u8::is_ascii_digit) {
            out.push(b as char);
            self.src.advance();
        }
    }

    fn string(&mut self) -> TokenKind {
        self.src.advance();
        let mut bytes = Vec::new();
        loop {
            match self.src.advance() {
                None => return TokenKind::Error("unterminated string literal".into()),
                Some(b'"') => break,
                Some(b'\\') => match self.src.advance() {
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(b'r') => bytes.push(b'\r'),
                    Some(b'0') => bytes.push(0),
                    Some(other) => bytes.push(other),
                    None => return TokenKind::Error("unterminated string literal".into()),
                },
                Some(b) => bytes.push(b),
            }
        }
        TokenKind::String(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Operator followed by `:=` or `/`.
    fn compound(&mut self, op: BinOp, plain: TokenKind, reducible: bool) -> TokenKind {
        if self.src.at_assign(0) {
            self.src.advance();
            self.src.advance();
            TokenKind::OpAssign(op)
        } else if reducible
            && self.src.peek() == Some(b'/')
            && self.src.peek_ahead(1) != Some(b'=')
        {
            self.src.advance();
            TokenKind::Reduce(op)
        } else {
            plain
        }
    }

    fn punct(&mut self) -> TokenKind {
        let Some(b) = self.src.advance() else {
            return TokenKind::Eof;
        };
        match b {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b'|' => TokenKind::Pipe,
            b'#' => TokenKind::Hash,
            b'=' => TokenKind::Eq,
            b':' if self.src.eat(b'=') => TokenKind::Assign,
            b':' => TokenKind::Colon,
            b'.' if self.src.eat(b'.') => TokenKind::DotDot,
            b'.' => TokenKind::Dot,
            b'?' => self.compound(BinOp::Default, TokenKind::Question, false),
            b'+' => self.compound(BinOp::Add, TokenKind::Plus, true),
            b'-' => self.compound(BinOp::Sub, TokenKind::Minus, false),
            b'*' if self.src.eat(b'*') => self.compound(BinOp::Exp, TokenKind::StarStar, false),
            b'*' => self.compound(BinOp::Mult, TokenKind::Star, true),
            b'/' if self.src.eat(b'=') => TokenKind::Ne,
            b'/' => self.compound(BinOp::Div, TokenKind::Slash, false),
            b'<' if self.src.eat(b'=') => TokenKind::Le,
            b'<' => TokenKind::Lt,
            b'>' if self.src.eat(b'=') => TokenKind::Ge,
            b'>' => TokenKind::Gt,
            other => TokenKind::Error(format!("unexpected character `{}`", other.escape_ascii())),
        }
    }
}

impl<R: Read> Iterator for Lexer<R> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        let tok = self.next_token();
        if tok.is_eof() {
            self.done = true;
        }
        Some(tok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::from_str(src).map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_fold_case() {
        assert_eq!(
            kinds("PROGRAM Hello;"),
            vec![
                TokenKind::Keyword(Keyword::Program),
                TokenKind::Identifier("hello".into()),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("x -- one\n$ two\ny"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Identifier("y".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_ranges() {
        assert_eq!(
            kinds("1..10 2.5 3e2 123456789012345678901234567890"),
            vec![
                TokenKind::Integer("1".into()),
                TokenKind::DotDot,
                TokenKind::Integer("10".into()),
                TokenKind::Real(2.5),
                TokenKind::Real(300.0),
                TokenKind::Integer("123456789012345678901234567890".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("+:= +/ with:= max/ /= ** *:="),
            vec![
                TokenKind::OpAssign(BinOp::Add),
                TokenKind::Reduce(BinOp::Add),
                TokenKind::OpAssign(BinOp::With),
                TokenKind::Reduce(BinOp::Max),
                TokenKind::Ne,
                TokenKind::StarStar,
                TokenKind::OpAssign(BinOp::Mult),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_unescape() {
        assert_eq!(kinds(r#""a\"b\n""#)[0], TokenKind::String("a\"b\n".into()));
        assert!(matches!(kinds("\"open")[0], TokenKind::Error(_)));
    }

    #[test]
    fn positions_track_lines() {
        let toks: Vec<Token> = Lexer::from_str("a\n  b").collect();
        assert_eq!(toks[1].span.start, Pos::new(4, 2, 3));
    }
}
