use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cloneable in-memory sink for program output.
///
/// Hand one clone to [`crate::Interpreter::with_output`] and read the
/// text back through another.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_buffer() {
        let out = SharedOutput::new();
        let mut writer = out.clone();
        write!(writer, "a{}", 1).unwrap();
        writer.write_all(b"\n").unwrap();
        assert_eq!(out.contents(), "a1\n");
        out.clear();
        assert_eq!(out.contents(), "");
    }
}
