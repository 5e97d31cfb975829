use thiserror::Error;

/// Size in bytes of one on-disk score record: two little-endian `u32`s.
pub const RECORD_SIZE: usize = 8;

/// Errors produced while decoding a score table.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScoreError {
    /// The raw data cannot be split into whole `(offset, score)` records.
    #[error("score data must contain only pairs of 32 bit integers (got {len} bytes)")]
    Format { len: usize },
}

/// A single `(offset, score)` pair from a score file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreEntry {
    pub offset: u32,
    pub score: u32,
}

impl ScoreEntry {
    pub const fn new(offset: u32, score: u32) -> Self {
        Self { offset, score }
    }
}

impl From<(u32, u32)> for ScoreEntry {
    fn from((offset, score): (u32, u32)) -> Self {
        Self { offset, score }
    }
}

/// An ordered, read-only list of score entries.
///
/// Entries keep the order in which they appear in the source data. Offsets are
/// not validated against any sample here; the mutation rules skip offsets that
/// fall outside the buffer they are applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreTable {
    entries: Vec<ScoreEntry>,
}

impl ScoreTable {
    /// Decodes a flat stream of `(offset, score)` records.
    ///
    /// Each 8-byte block holds two little-endian `u32`s. Fails without
    /// producing any entries when the length is not a multiple of 8.
    pub fn parse(data: &[u8]) -> Result<Self, ScoreError> {
        if data.len() % RECORD_SIZE != 0 {
            return Err(ScoreError::Format { len: data.len() });
        }

        let entries = data
            .chunks_exact(RECORD_SIZE)
            .map(|record| {
                let (offset, score) = record.split_at(4);
                ScoreEntry {
                    offset: u32::from_le_bytes([offset[0], offset[1], offset[2], offset[3]]),
                    score: u32::from_le_bytes([score[0], score[1], score[2], score[3]]),
                }
            })
            .collect();

        Ok(Self { entries })
    }

    /// Encodes the table back into the on-disk record format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * RECORD_SIZE);
        for entry in &self.entries {
            out.extend_from_slice(&entry.offset.to_le_bytes());
            out.extend_from_slice(&entry.score.to_le_bytes());
        }
        out
    }

    pub fn entries(&self) -> &[ScoreEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoreEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest score in the table, or 0 for an empty table.
    pub fn max_score(&self) -> u32 {
        self.entries.iter().map(|e| e.score).max().unwrap_or(0)
    }
}

impl From<Vec<ScoreEntry>> for ScoreTable {
    fn from(entries: Vec<ScoreEntry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(u32, u32)> for ScoreTable {
    fn from_iter<T: IntoIterator<Item = (u32, u32)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(ScoreEntry::from).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ScoreTable {
    type Item = &'a ScoreEntry;
    type IntoIter = std::slice::Iter<'a, ScoreEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
