use crate::record::{DecodeError, PcodeRecord, RECORD_SIZE};

/// Decodes a pcode stream into [`PcodeRecord`]s.
///
/// Unlike variable-width bytecode the records are dense and fixed-size, so
/// the decoder can also seek to a record index directly.
pub struct PcodeDecoder<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> PcodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(DecodeError::Truncated(bytes.len()));
        }
        Ok(Self { bytes, index: 0 })
    }

    /// Number of records in the stream.
    pub fn len(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the record at `index` without moving the cursor.
    pub fn record_at(&self, index: usize) -> Option<Result<PcodeRecord, DecodeError>> {
        let start = index.checked_mul(RECORD_SIZE)?;
        let slice = self.bytes.get(start..start + RECORD_SIZE)?;
        Some(PcodeRecord::decode(slice, index))
    }

    /// Decode every record.
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<PcodeRecord>, DecodeError> {
        PcodeDecoder::new(bytes)?.collect()
    }
}

impl Iterator for PcodeDecoder<'_> {
    type Item = Result<PcodeRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.record_at(self.index)?;
        self.index += 1;
        Some(record)
    }
}
