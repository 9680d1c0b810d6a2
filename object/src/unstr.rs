//! Reading values back from their printed form.

use crate::integer::LongInt;
use crate::set::SetBody;
use crate::specifier::Specifier;

struct Reader<'a> {
    text: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn skip_ws(&mut self) {
        while self.at < self.text.len() && self.text[self.at].is_ascii_whitespace() {
            self.at += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.text.get(self.at).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        self.skip_ws();
        let end = self.at + word.len();
        if self.text.len() >= end && self.text[self.at..end].eq_ignore_ascii_case(word.as_bytes()) {
            self.at = end;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Specifier> {
        match self.peek()? {
            b'[' => {
                self.at += 1;
                let items = self.list(b']')?;
                Some(Specifier::tuple_of(items))
            }
            b'{' => {
                self.at += 1;
                let items = self.list(b'}')?;
                Some(Specifier::set(items.into_iter().collect::<SetBody>()))
            }
            b'"' => self.quoted(),
            b'#' => {
                if self.eat_word("#T") {
                    Some(Specifier::boolean(true))
                } else if self.eat_word("#F") {
                    Some(Specifier::boolean(false))
                } else {
                    None
                }
            }
            b'<' => self.eat_word("<om>").then_some(Specifier::Omega),
            b'-' | b'+' | b'0'..=b'9' => self.number(),
            _ => {
                if self.eat_word("true") {
                    Some(Specifier::boolean(true))
                } else if self.eat_word("false") {
                    Some(Specifier::boolean(false))
                } else if self.eat_word("om") {
                    Some(Specifier::Omega)
                } else {
                    None
                }
            }
        }
    }

    fn list(&mut self, close: u8) -> Option<Vec<Specifier>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Some(items);
        }
        loop {
            items.push(self.value()?);
            if self.eat(close) {
                return Some(items);
            }
            if !self.eat(b',') {
                return None;
            }
        }
    }

    fn quoted(&mut self) -> Option<Specifier> {
        self.at += 1;
        let mut out = Vec::new();
        loop {
            let b = *self.text.get(self.at)?;
            self.at += 1;
            match b {
                b'"' => return Some(Specifier::string(out)),
                b'\\' => {
                    let esc = *self.text.get(self.at)?;
                    self.at += 1;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'x' => {
                            let digits = self.text.get(self.at..self.at + 2)?;
                            let hex = std::str::from_utf8(digits).ok()?;
                            out.push(u8::from_str_radix(hex, 16).ok()?);
                            self.at += 2;
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn number(&mut self) -> Option<Specifier> {
        let start = self.at;
        if matches!(self.text.get(self.at), Some(b'-' | b'+')) {
            self.at += 1;
        }
        let mut is_real = false;
        while let Some(b) = self.text.get(self.at) {
            match b {
                b'0'..=b'9' => {}
                b'.' | b'e' | b'E' => is_real = true,
                b'-' | b'+' if is_real => {}
                _ => break,
            }
            self.at += 1;
        }
        let text = std::str::from_utf8(&self.text[start..self.at]).ok()?;
        if is_real {
            text.parse::<f64>().ok().map(Specifier::real)
        } else {
            LongInt::parse(text).map(Specifier::long)
        }
    }
}

/// Parse the printed form of a value; `None` if the text is malformed.
pub fn unstr(text: &[u8]) -> Option<Specifier> {
    let mut reader = Reader { text, at: 0 };
    let value = reader.value()?;
    reader.skip_ws();
    (reader.at == text.len()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_values_read_back() {
        for text in [
            "42",
            "-2147483648",
            "123456789012345678901234567890",
            "[1, \"a\\\"b\", 2.5]",
            "{[1, 2], [3, 4]}",
            "#T",
            "<om>",
        ] {
            let value = unstr(text.as_bytes()).unwrap();
            assert_eq!(unstr(value.to_string().as_bytes()), Some(value), "{text}");
        }
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(unstr(b"[1, 2").is_none());
        assert!(unstr(b"1 2").is_none());
        assert!(unstr(b"").is_none());
    }
}
