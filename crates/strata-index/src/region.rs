//! File-backed memory-mapped region underneath an index.
//!
//! [`MappedRegion`] owns the backing file and its mapping through the
//! index lifecycle: pre-allocated and mutably mapped while writable,
//! trimmed to the live prefix and remapped shared read-only once sealed.
//! Every length change drops the mapping first; some platforms refuse to
//! truncate a file that is still mapped.
//!
//! This is the one module that touches `unsafe`: `memmap2` mappings are
//! unsafe to create because another process could mutate the file behind
//! the map. Index files are exclusively owned by their index for the
//! lifetime of the process, which is the safety argument each call site
//! repeats.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};

/// The active mapping over the backing file.
#[derive(Debug)]
enum RegionMap {
    /// Mutable mapping of a writable index.
    Writable(MmapMut),
    /// Shared read-only mapping of a sealed index.
    ReadOnly(Arc<Mmap>),
    /// No mapping: a zero-length file, a closed region, or the window
    /// between unmap and remap.
    Unmapped,
}

/// A pre-allocated, memory-mapped index file.
#[derive(Debug)]
pub(crate) struct MappedRegion {
    file: Option<File>,
    path: PathBuf,
    map: RegionMap,
    /// Current backing file length in bytes.
    len: u64,
}

impl MappedRegion {
    /// Opens (or, when writable, creates) the backing file and maps it.
    ///
    /// A fresh writable file is pre-allocated to the largest multiple of
    /// `entry_bytes` not exceeding `max_bytes`; an existing writable file
    /// whose length is entry-aligned is grown to that size if smaller.
    /// A misaligned length is a corruption signal, so it is preserved
    /// untouched for the sanity check to report.
    ///
    /// # Panics
    ///
    /// Panics when a writable region is asked for a `max_bytes` that
    /// cannot hold a single entry; that is a configuration bug.
    pub(crate) fn open(
        path: &Path,
        max_bytes: u64,
        entry_bytes: u64,
        writable: bool,
    ) -> io::Result<Self> {
        if writable {
            assert!(
                max_bytes >= entry_bytes,
                "max index size {max_bytes} cannot hold a single {entry_bytes}-byte entry"
            );
        }

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;
        let mut len = file.metadata()?.len();

        if writable && len % entry_bytes == 0 {
            let target = max_bytes - max_bytes % entry_bytes;
            if len < target {
                file.set_len(target)?;
                len = target;
            }
        }

        let map = if len == 0 {
            RegionMap::Unmapped
        } else if writable {
            // Safety: the index exclusively owns this file for its
            // lifetime; no other process or handle mutates it.
            RegionMap::Writable(unsafe { MmapMut::map_mut(&file)? })
        } else {
            // Safety: as above; sealed files are additionally immutable.
            RegionMap::ReadOnly(Arc::new(unsafe { Mmap::map(&file)? }))
        };

        Ok(Self {
            file: Some(file),
            path: path.to_owned(),
            map,
            len,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Bytes of the current mapping. Empty when unmapped.
    pub(crate) fn buf(&self) -> &[u8] {
        match &self.map {
            RegionMap::Writable(mmap) => mmap,
            RegionMap::ReadOnly(mmap) => mmap,
            RegionMap::Unmapped => &[],
        }
    }

    /// Mutable bytes of a writable mapping.
    ///
    /// # Panics
    ///
    /// Panics when the region is not writable; mutation paths check the
    /// lifecycle state before reaching the region.
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        match &mut self.map {
            RegionMap::Writable(mmap) => mmap,
            RegionMap::ReadOnly(_) | RegionMap::Unmapped => {
                panic!("mutable access to a non-writable mapping")
            }
        }
    }

    /// The shared read-only mapping, when sealed and non-empty.
    pub(crate) fn read_only_map(&self) -> Option<Arc<Mmap>> {
        match &self.map {
            RegionMap::ReadOnly(mmap) => Some(Arc::clone(mmap)),
            RegionMap::Writable(_) | RegionMap::Unmapped => None,
        }
    }

    /// Remaps the file at `new_len` bytes, truncating or extending it.
    ///
    /// Valid only while writable.
    pub(crate) fn resize(&mut self, new_len: u64) -> io::Result<()> {
        self.flush();
        self.map = RegionMap::Unmapped;
        let file = self.file.as_ref().expect("region is open");
        file.set_len(new_len)?;
        self.len = new_len;
        if new_len > 0 {
            // Safety: see `open`.
            self.map = RegionMap::Writable(unsafe { MmapMut::map_mut(file)? });
        }
        Ok(())
    }

    /// Trims the file to `live_len` bytes and remaps it shared read-only.
    ///
    /// Returns the sealed mapping, or `None` when the live prefix is
    /// empty (an empty file is not mappable).
    pub(crate) fn seal(&mut self, live_len: u64) -> io::Result<Option<Arc<Mmap>>> {
        self.flush();
        self.map = RegionMap::Unmapped;
        let file = self.file.as_ref().expect("region is open");
        file.set_len(live_len)?;
        self.len = live_len;
        if live_len == 0 {
            return Ok(None);
        }
        // Safety: see `open`.
        let mmap = Arc::new(unsafe { Mmap::map(file)? });
        self.map = RegionMap::ReadOnly(Arc::clone(&mmap));
        Ok(Some(mmap))
    }

    /// Forces dirty pages of a writable mapping to disk.
    ///
    /// Best-effort: the page cache already backs the data, so a failed
    /// flush is logged and swallowed.
    pub(crate) fn flush(&self) {
        if let RegionMap::Writable(mmap) = &self.map
            && let Err(error) = mmap.flush()
        {
            tracing::warn!(path = %self.path.display(), %error, "index flush failed");
        }
    }

    /// Unmaps and releases the file handle. Idempotent.
    pub(crate) fn close(&mut self) {
        self.flush();
        self.map = RegionMap::Unmapped;
        self.file = None;
    }

    /// Renames the backing file, keeping the mapping intact.
    pub(crate) fn rename_to(&mut self, new_path: &Path) -> io::Result<()> {
        std::fs::rename(&self.path, new_path)?;
        self.path = new_path.to_owned();
        Ok(())
    }

    /// Closes the region and removes the backing file.
    ///
    /// Returns whether a file was actually removed.
    pub(crate) fn delete(&mut self) -> io::Result<bool> {
        self.map = RegionMap::Unmapped;
        self.file = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error),
        }
    }
}
