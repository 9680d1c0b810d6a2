use crate::header::HashCache;

/// Width in bytes of one string cell.
pub const STRING_CELL_WIDTH: usize = 32;

/// Byte string body. Strings may hold any bytes, including NUL.
#[derive(Debug, Clone, Default)]
pub struct SetlString {
    bytes: Vec<u8>,
    pub(crate) hash: HashCache,
}

impl PartialEq for SetlString {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SetlString {}

impl SetlString {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            hash: HashCache::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of fixed-width cells the text occupies.
    pub fn cell_count(&self) -> usize {
        self.bytes.len().div_ceil(STRING_CELL_WIDTH)
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        self.hash.invalidate();
        &mut self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn hash_code(&self) -> i32 {
        self.hash.get_or_compute(|| {
            // FNV-1a
            let mut h: u32 = 0x811c_9dc5;
            for b in &self.bytes {
                h ^= *b as u32;
                h = h.wrapping_mul(0x0100_0193);
            }
            (h & 0x7fff_ffff) as i32
        })
    }
}

impl From<&str> for SetlString {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_count_rounds_up() {
        assert_eq!(SetlString::from("").cell_count(), 0);
        assert_eq!(SetlString::from("a").cell_count(), 1);
        assert_eq!(SetlString::new(vec![b'x'; 32]).cell_count(), 1);
        assert_eq!(SetlString::new(vec![b'x'; 33]).cell_count(), 2);
    }

    #[test]
    fn embedded_nul_survives() {
        let s = SetlString::new(vec![b'a', 0, b'b']);
        assert_eq!(s.as_bytes(), &[b'a', 0, b'b']);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn mutation_drops_cached_hash() {
        let mut s = SetlString::from("abc");
        let before = s.hash_code();
        s.bytes_mut().push(b'd');
        assert!(!s.hash.is_valid());
        assert_ne!(s.hash_code(), before);
    }
}
