//! Index file naming.
//!
//! The base offset travels in the file name, zero-padded to 20 digits so
//! lexical and numeric ordering agree:
//!
//! ```text
//! 00000000000000000050.index      <- offset index
//! 00000000000000000050.timeindex  <- time index
//! ```
//!
//! There is no in-file header, so these names are the only place the
//! base offset is recorded; the format is interop-critical.

use std::path::{Path, PathBuf};

use strata_types::Offset;

/// Suffix of offset index files.
pub const OFFSET_INDEX_SUFFIX: &str = ".index";

/// Suffix of time index files.
pub const TIME_INDEX_SUFFIX: &str = ".timeindex";

/// Width of the zero-padded base offset in file names.
const BASE_OFFSET_DIGITS: usize = 20;

fn filename(base_offset: Offset, suffix: &str) -> String {
    format!(
        "{:0width$}{suffix}",
        base_offset.as_u64(),
        width = BASE_OFFSET_DIGITS
    )
}

/// Path of the offset index for the segment starting at `base_offset`.
pub fn offset_index_file(dir: &Path, base_offset: Offset) -> PathBuf {
    dir.join(filename(base_offset, OFFSET_INDEX_SUFFIX))
}

/// Path of the time index for the segment starting at `base_offset`.
pub fn time_index_file(dir: &Path, base_offset: Offset) -> PathBuf {
    dir.join(filename(base_offset, TIME_INDEX_SUFFIX))
}

/// Recovers the base offset encoded in an index file name, or `None`
/// when the name does not follow the convention.
pub fn base_offset_from_path(path: &Path) -> Option<Offset> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != BASE_OFFSET_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<u64>().ok().map(Offset::new)
}
