//! Index error types.

use std::path::PathBuf;

use strata_types::Offset;

/// Errors surfaced by the segment indexes.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Append with a non-increasing offset. The log layer must roll the
    /// segment or reject the append; the index cannot repair this in place.
    #[error("offset {offset} is not greater than the last indexed offset {last}")]
    InvalidOffset { offset: Offset, last: Offset },

    /// Append whose offset does not fit the 32-bit relative range of the
    /// segment. The log layer rolls the segment.
    #[error("offset {offset} is outside the relative range of base offset {base}")]
    OffsetOverflow { offset: Offset, base: Offset },

    /// Append on an index at capacity. The log layer rolls the segment.
    #[error("index {path} is full ({entries} entries)")]
    IndexFull { path: PathBuf, entries: usize },

    /// Structural corruption found by a sanity check. The recovery path
    /// deletes the index and rebuilds it by scanning the paired segment.
    #[error("corrupt index {path}: {kind}")]
    Corrupt { path: PathBuf, kind: CorruptKind },

    /// Operation attempted on a closed index.
    #[error("index is closed")]
    Closed,

    /// Underlying file or mapping error.
    #[error("index I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// The specific structural defect behind an [`IndexError::Corrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CorruptKind {
    /// The backing file length is not a whole number of entries.
    #[error("file length {length} is not a multiple of the {entry_bytes}-byte entry size")]
    MisalignedLength { length: u64, entry_bytes: usize },

    /// The live prefix is not strictly increasing in its key component.
    #[error("entry at slot {slot} is not strictly increasing")]
    NonMonotonic { slot: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_error_names_the_defect() {
        let err = IndexError::Corrupt {
            path: PathBuf::from("00000000000000000050.index"),
            kind: CorruptKind::MisalignedLength {
                length: 13,
                entry_bytes: 8,
            },
        };
        let message = err.to_string();
        assert!(message.contains("00000000000000000050.index"));
        assert!(message.contains("13"));
    }

    #[test]
    fn invalid_offset_mentions_both_offsets() {
        let err = IndexError::InvalidOffset {
            offset: Offset::new(70),
            last: Offset::new(95),
        };
        assert_eq!(
            err.to_string(),
            "offset 70 is not greater than the last indexed offset 95"
        );
    }
}
