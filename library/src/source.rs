//! Source text kept in a file unit.
//!
//! The text stream holds the raw bytes. The length stream holds one
//! unsigned VLQ per line giving its length without the terminator, so a
//! line can be located without scanning the text.

use crate::error::CodecError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceText {
    text: Vec<u8>,
    starts: Vec<usize>,
    lengths: Vec<u32>,
}

impl SourceText {
    pub fn new(text: impl Into<Vec<u8>>) -> Self {
        let text = text.into();
        let mut starts = Vec::new();
        let mut lengths = Vec::new();
        let mut start = 0;
        for (i, byte) in text.iter().enumerate() {
            if *byte == b'\n' {
                let end = if i > start && text[i - 1] == b'\r' {
                    i - 1
                } else {
                    i
                };
                starts.push(start);
                lengths.push((end - start) as u32);
                start = i + 1;
            }
        }
        if start < text.len() {
            starts.push(start);
            lengths.push((text.len() - start) as u32);
        }
        Self {
            text,
            starts,
            lengths,
        }
    }

    /// Rebuilds from the two streams of a file unit.
    pub fn from_streams(text: Vec<u8>, lengths: &[u8]) -> Result<Self, CodecError> {
        let mut pos = 0;
        let mut starts = Vec::new();
        let mut decoded = Vec::new();
        let mut at = 0usize;
        while pos < lengths.len() {
            let len = decode_vlq(lengths, &mut pos).ok_or(CodecError::Eof(pos))?;
            if at + len as usize > text.len() {
                return Err(CodecError::Invalid {
                    what: "line length",
                    value: len as u64,
                });
            }
            starts.push(at);
            decoded.push(len);
            at += len as usize;
            // Skip the terminator.
            if text.get(at) == Some(&b'\r') {
                at += 1;
            }
            if text.get(at) == Some(&b'\n') {
                at += 1;
            }
        }
        Ok(Self {
            text,
            starts,
            lengths: decoded,
        })
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.lengths.len()
    }

    /// The length stream.
    pub fn encode_lengths(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.lengths.len());
        for len in &self.lengths {
            encode_vlq(*len, &mut buf);
        }
        buf
    }

    /// Line `n`, counted from 1.
    pub fn line(&self, n: usize) -> Option<&[u8]> {
        let idx = n.checked_sub(1)?;
        let start = *self.starts.get(idx)?;
        let len = *self.lengths.get(idx)? as usize;
        self.text.get(start..start + len)
    }

    /// Numbered listing with tabs expanded to `tab_width`.
    pub fn listing(&self, tab_width: usize) -> String {
        let width = self.line_count().max(1).to_string().len();
        let mut out = String::new();
        for n in 1..=self.line_count() {
            let line = String::from_utf8_lossy(self.line(n).unwrap_or_default());
            out.push_str(&format!("{n:>width$}  {}\n", expand_tabs(&line, tab_width)));
        }
        out
    }
}

pub fn expand_tabs(line: &str, tab_width: usize) -> String {
    let tab_width = tab_width.max(1);
    let mut out = String::with_capacity(line.len());
    let mut col = 0;
    for ch in line.chars() {
        if ch == '\t' {
            let pad = tab_width - col % tab_width;
            out.extend(std::iter::repeat_n(' ', pad));
            col += pad;
        } else {
            out.push(ch);
            col += 1;
        }
    }
    out
}

// ── VLQ ────────────────────────────────────────────────────────────

fn encode_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_located_from_lengths() {
        let src = SourceText::new("program p;\r\n  print(1);\n\nend p;");
        assert_eq!(src.line_count(), 4);
        let back = SourceText::from_streams(src.text().to_vec(), &src.encode_lengths()).unwrap();
        assert_eq!(back.line(2), Some(&b"  print(1);"[..]));
        assert_eq!(back.line(3), Some(&b""[..]));
        assert_eq!(back.line(4), Some(&b"end p;"[..]));
        assert_eq!(back.line(5), None);
        assert_eq!(back.line(0), None);
    }

    #[test]
    fn long_lines_use_multibyte_lengths() {
        let long = "x".repeat(300);
        let src = SourceText::new(format!("{long}\n"));
        assert_eq!(src.encode_lengths(), vec![0xAC, 0x02]);
    }

    #[test]
    fn listing_expands_tabs() {
        let src = SourceText::new("a\n\tb\n");
        assert_eq!(src.listing(4), "1  a\n2      b\n");
    }
}
