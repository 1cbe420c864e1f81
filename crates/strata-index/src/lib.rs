//! # strata-index: Memory-mapped sparse segment indexes
//!
//! Each log segment carries companion index files that map logical
//! coordinates to byte positions, so a fetch can seek into the segment
//! instead of scanning it:
//!
//! ```text
//! {data_dir}/{partition}/
//! ├── 00000000000000000050.log        <- segment records (external)
//! ├── 00000000000000000050.index      <- OffsetIndex: offset → position
//! └── 00000000000000000050.timeindex  <- TimeIndex: timestamp → offset
//! ```
//!
//! Both indexes are flat arrays of fixed-size big-endian entries in a
//! pre-allocated, memory-mapped file; lookups are a two-tier binary
//! search that touches the warm tail of the mapping first. The shared
//! machinery (region manager, entry codec, search engine, lifecycle
//! controller) is generic over the [`IndexEntry`] capability set; the
//! two variants instantiate it with 8-byte and 12-byte entries.
//!
//! # Lifecycle and concurrency
//!
//! An index is writable while its segment is active: one writer appends
//! under the index lock, and concurrent readers search a snapshot taken
//! under the same lock. When the segment rolls, [`OffsetIndex::make_read_only`]
//! trims the file to its live prefix and remaps it read-only; from then
//! on readers search lock-free. Closing releases the mapping and handle
//! and is idempotent; dropping an index closes it.

mod config;
mod entry;
mod error;
mod index;
mod offset_index;
mod paths;
mod region;
mod search;
mod time_index;

pub use config::IndexConfig;
pub use entry::{IndexEntry, OffsetPosition, TimestampOffset};
pub use error::{CorruptKind, IndexError};
pub use offset_index::OffsetIndex;
pub use paths::{
    OFFSET_INDEX_SUFFIX, TIME_INDEX_SUFFIX, base_offset_from_path, offset_index_file,
    time_index_file,
};
pub use time_index::TimeIndex;
