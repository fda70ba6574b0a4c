//! File information cache: an LRU pool of open file descriptors keyed
//! by `FHandle`, so the server can serve many more logical files than
//! the process fd budget permits.
//!
//! Grounded on `pds_sstorage_manager.c`'s FIC (`fic_entry`/fd-pool
//! bookkeeping): lazily open on first access, evict the LRU-open entry
//! when the pool is at capacity, never evict an entry while any
//! caller is mid-operation on it (this version enforces that by never
//! holding an eviction candidate across an `.await` or re-entrant
//! call -- the dispatcher is single-threaded, so a fd is only ever
//! open long enough for the one `read_at`/`write_at` call that needs
//! it).

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use crate::types::FHandle;

struct FicEntry {
    path: PathBuf,
    file: Option<File>,
    /// Monotonically increasing touch counter used as an LRU clock;
    /// avoids a second linked-list index for a pool that is typically
    /// small (tens of entries) compared to the block cache.
    last_used: u64,
    /// Bitwise OR of `PIOUS_R_OK`/`PIOUS_W_OK`/`PIOUS_X_OK`, fixed at
    /// `remember()` time (`pds_sstorage_manager.c`'s `fic_entry.amode`).
    /// Consulted by `faccess` and by the data manager's read/write gate.
    access_mode: u32,
}

/// Caps the number of simultaneously open file descriptors held by
/// the pool, independent of how many `FHandle`s are known. Chosen
/// well under typical `RLIMIT_NOFILE` defaults to leave headroom for
/// the listening socket, per-connection sockets, and the FHDB/TLOG/
/// error-log handles.
const DEFAULT_FD_BUDGET: usize = 128;

pub struct FileInfoCache {
    entries: HashMap<FHandle, FicEntry>,
    fd_budget: usize,
    open_count: usize,
    clock: u64,
}

impl FileInfoCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            fd_budget: DEFAULT_FD_BUDGET,
            open_count: 0,
            clock: 0,
        }
    }

    /// Register a known path/handle pair without opening it. Called
    /// from `lookup` once the handle is established via `fstat`.
    pub fn remember(&mut self, fhandle: FHandle, path: PathBuf, access_mode: u32) {
        self.entries.entry(fhandle).or_insert_with(|| FicEntry {
            path,
            file: None,
            last_used: 0,
            access_mode,
        });
    }

    pub fn contains(&self, fhandle: FHandle) -> bool {
        self.entries.contains_key(&fhandle)
    }

    /// `SS_faccess()`'s lookup half: the accessibility bits recorded
    /// when this handle was established. `None` if the handle is
    /// unknown to this FIC instance.
    pub fn access_mode(&self, fhandle: FHandle) -> Option<u32> {
        self.entries.get(&fhandle).map(|e| e.access_mode)
    }

    pub fn forget(&mut self, fhandle: FHandle) {
        if let Some(entry) = self.entries.remove(&fhandle) {
            if entry.file.is_some() {
                self.open_count -= 1;
            }
        }
    }

    /// Get (opening if necessary, evicting an LRU fd if the pool is
    /// full) a reference to the open file for `fhandle`.
    pub fn get(&mut self, fhandle: FHandle) -> std::io::Result<&File> {
        self.touch_open(fhandle)?;
        Ok(self.entries.get(&fhandle).unwrap().file.as_ref().unwrap())
    }

    fn touch_open(&mut self, fhandle: FHandle) -> std::io::Result<()> {
        if self.entries.get(&fhandle).map_or(false, |e| e.file.is_some()) {
            self.clock += 1;
            let clock = self.clock;
            self.entries.get_mut(&fhandle).unwrap().last_used = clock;
            return Ok(());
        }

        if self.open_count >= self.fd_budget {
            self.evict_one();
        }

        let path = self
            .entries
            .get(&fhandle)
            .map(|e| e.path.clone())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "unknown file handle"))?;

        let file = std::fs::OpenOptions::new().read(true).write(true).open(&path)?;
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(&fhandle).unwrap();
        entry.file = Some(file);
        entry.last_used = clock;
        self.open_count += 1;
        Ok(())
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.file.is_some())
            .min_by_key(|(_, e)| e.last_used)
            .map(|(fh, _)| *fh);
        if let Some(fh) = victim {
            if let Some(entry) = self.entries.get_mut(&fh) {
                entry.file = None;
                self.open_count -= 1;
            }
        }
    }

    pub fn path_of(&self, fhandle: FHandle) -> Option<&std::path::Path> {
        self.entries.get(&fhandle).map(|e| e.path.as_path())
    }
}
