//! Segmented-LRU block cache with dual write policy.
//!
//! Grounded on `pds_cache_manager.c`/`.h`. The original keeps each
//! cache slot in three simultaneous intrusive structures: a circular
//! doubly-linked LRU ring split into Protected/Probationary segments, a
//! block-key hash chain, and a file-handle hash chain. This version
//! keeps the same shape with a `Vec<Slot>` arena addressed by index
//! (DESIGN NOTES section 9) plus two `HashMap` indices and an explicit
//! doubly-linked list realized as `prev`/`next` index fields on each
//! slot, instead of raw pointers.

use std::collections::HashMap;

use crate::error::{PiousError, PiousResult};
use crate::stable_storage::StableStorageManager;
use crate::types::FHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Protected,
    Probationary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    fhandle: FHandle,
    block: u64,
}

struct Slot {
    key: Option<BlockKey>,
    dirty: bool,
    segment: Segment,
    faultmode: FaultMode,
    valid_bytes: usize,
    data: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Slot {
    fn empty(dblk_sz: usize) -> Self {
        Self {
            key: None,
            dirty: false,
            segment: Segment::Probationary,
            faultmode: FaultMode::Volatile,
            valid_bytes: 0,
            data: vec![0; dblk_sz],
            prev: None,
            next: None,
        }
    }

    fn valid(&self) -> bool {
        self.key.is_some()
    }
}

/// Segmented LRU cache manager. `dblk_sz` is the fixed block size;
/// `cache_sz` the slot count. Protected-segment size is
/// `floor(cache_sz * 0.70)`, clamped to `[1, cache_sz - 1]`
/// (spec.md section 3).
pub struct CacheManager {
    dblk_sz: usize,
    protected_cap: usize,
    slots: Vec<Slot>,
    by_key: HashMap<BlockKey, usize>,
    by_file: HashMap<FHandle, Vec<usize>>,
    free: Vec<usize>,
    mru_protected: Option<usize>,
    lru_protected: Option<usize>,
    mru_probationary: Option<usize>,
    lru_probationary: Option<usize>,
    protected_count: usize,
    probationary_count: usize,
}

impl CacheManager {
    pub fn new(cache_sz: usize, dblk_sz: usize) -> Self {
        let cache_sz = cache_sz.max(2);
        let protected_cap = ((cache_sz as f64) * 0.70).floor() as usize;
        let protected_cap = protected_cap.clamp(1, cache_sz - 1);
        let slots = (0..cache_sz).map(|_| Slot::empty(dblk_sz)).collect();
        Self {
            dblk_sz,
            protected_cap,
            slots,
            by_key: HashMap::new(),
            by_file: HashMap::new(),
            free: (0..cache_sz).collect(),
            mru_protected: None,
            lru_protected: None,
            mru_probationary: None,
            lru_probationary: None,
            protected_count: 0,
            probationary_count: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next, segment) = {
            let s = &self.slots[idx];
            (s.prev, s.next, s.segment)
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => match segment {
                Segment::Protected => self.mru_protected = next,
                Segment::Probationary => self.mru_probationary = next,
            },
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => match segment {
                Segment::Protected => self.lru_protected = prev,
                Segment::Probationary => self.lru_probationary = prev,
            },
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
        match segment {
            Segment::Protected => self.protected_count -= 1,
            Segment::Probationary => self.probationary_count -= 1,
        }
    }

    fn push_mru(&mut self, idx: usize, segment: Segment) {
        self.slots[idx].segment = segment;
        self.slots[idx].prev = None;
        let old_mru = match segment {
            Segment::Protected => self.mru_protected,
            Segment::Probationary => self.mru_probationary,
        };
        self.slots[idx].next = old_mru;
        if let Some(old) = old_mru {
            self.slots[old].prev = Some(idx);
        }
        match segment {
            Segment::Protected => {
                self.mru_protected = Some(idx);
                if self.lru_protected.is_none() {
                    self.lru_protected = Some(idx);
                }
                self.protected_count += 1;
            }
            Segment::Probationary => {
                self.mru_probationary = Some(idx);
                if self.lru_probationary.is_none() {
                    self.lru_probationary = Some(idx);
                }
                self.probationary_count += 1;
            }
        }
    }

    /// Promote `idx` to MRU-of-Protected, demoting the current
    /// LRU-of-Protected to MRU-of-Probationary if Protected is over
    /// capacity (spec.md section 4.2: "a hit promotes to MRU-of-Protected").
    fn promote_to_protected(&mut self, idx: usize) {
        self.unlink(idx);
        self.push_mru(idx, Segment::Protected);
        if self.protected_count > self.protected_cap {
            if let Some(overflow) = self.lru_protected {
                self.unlink(overflow);
                self.push_mru(overflow, Segment::Probationary);
            }
        }
    }

    fn insert_probationary(&mut self, idx: usize) {
        self.unlink(idx);
        self.push_mru(idx, Segment::Probationary);
    }

    fn block_range(&self, offset: u64, n: u64) -> impl Iterator<Item = (u64, usize, usize)> {
        let dblk_sz = self.dblk_sz as u64;
        let end = offset + n;
        let first_block = offset / dblk_sz;
        let last_block = if n == 0 { first_block } else { (end - 1) / dblk_sz };
        (first_block..=last_block).map(move |block| {
            let block_start = block * dblk_sz;
            let lo = offset.max(block_start) - block_start;
            let hi = end.min(block_start + dblk_sz) - block_start;
            (block, lo as usize, hi as usize)
        })
    }

    fn lookup_slot(&self, key: BlockKey) -> Option<usize> {
        self.by_key.get(&key).copied()
    }

    /// Allocate a slot for `key`, evicting from Probationary-LRU
    /// toward MRU if necessary (spec.md section 4.2 "Eviction").
    fn allocate(&mut self, ss: &mut StableStorageManager, key: BlockKey) -> PiousResult<usize> {
        if let Some(idx) = self.free.pop() {
            return Ok(idx);
        }

        let mut cursor = self.lru_probationary;
        while let Some(idx) = cursor {
            let next = self.slots[idx].prev; // walk toward MRU
            let ok = if self.slots[idx].dirty {
                self.flush_slot(ss, idx).is_ok()
            } else {
                true
            };
            if ok {
                self.evict(idx);
                return Ok(idx);
            }
            cursor = next;
        }

        let _ = key;
        Err(PiousError::ERecov)
    }

    fn evict(&mut self, idx: usize) {
        if let Some(key) = self.slots[idx].key.take() {
            self.by_key.remove(&key);
            if let Some(v) = self.by_file.get_mut(&key.fhandle) {
                v.retain(|&i| i != idx);
                if v.is_empty() {
                    self.by_file.remove(&key.fhandle);
                }
            }
        }
        self.unlink(idx);
        self.slots[idx].dirty = false;
        self.slots[idx].valid_bytes = 0;
        self.free.push(idx);
    }

    fn flush_slot(&mut self, ss: &mut StableStorageManager, idx: usize) -> PiousResult<()> {
        let slot = &self.slots[idx];
        if !slot.dirty || !slot.valid() {
            return Ok(());
        }
        let key = slot.key.unwrap();
        let bytes = slot.valid_bytes;
        let data = slot.data[..bytes].to_vec();
        ss.write(key.fhandle, key.block * self.dblk_sz as u64, &data, FaultMode::Stable)?;
        self.slots[idx].dirty = false;
        Ok(())
    }

    fn fill_from_ssm(
        &mut self,
        ss: &mut StableStorageManager,
        key: BlockKey,
    ) -> PiousResult<usize> {
        if let Some(idx) = self.lookup_slot(key) {
            if self.slots[idx].dirty {
                self.flush_slot(ss, idx)?;
            }
        }

        let idx = match self.lookup_slot(key) {
            Some(idx) => idx,
            None => {
                let idx = self.allocate(ss, key)?;
                self.slots[idx].key = Some(key);
                self.by_key.insert(key, idx);
                self.by_file.entry(key.fhandle).or_default().push(idx);
                self.insert_probationary(idx);
                idx
            }
        };

        let mut buf = vec![0u8; self.dblk_sz];
        let n = ss.read(key.fhandle, key.block * self.dblk_sz as u64, &mut buf)?;
        self.slots[idx].data = buf;
        self.slots[idx].valid_bytes = n;
        self.slots[idx].dirty = false;
        Ok(idx)
    }

    pub fn read(
        &mut self,
        ss: &mut StableStorageManager,
        fhandle: FHandle,
        offset: u64,
        n: u64,
        buf: &mut [u8],
    ) -> PiousResult<usize> {
        if n == 0 {
            return Ok(0);
        }
        let mut total = 0usize;
        for (block, lo, hi) in self.block_range(offset, n) {
            let key = BlockKey { fhandle, block };
            let idx = match self.lookup_slot(key) {
                Some(idx) if self.slots[idx].valid_bytes == self.dblk_sz => idx,
                _ => self.fill_from_ssm(ss, key)?,
            };
            let slot = &self.slots[idx];
            let avail_hi = hi.min(slot.valid_bytes);
            if avail_hi > lo {
                let len = avail_hi - lo;
                buf[total..total + len].copy_from_slice(&slot.data[lo..avail_hi]);
                total += len;
            }
            if hi > avail_hi {
                // past EOF/valid_bytes: POSIX hole semantics -> zeros already in buf
                let len = hi - avail_hi;
                for b in &mut buf[total..total + len] {
                    *b = 0;
                }
                total += len;
            }
            self.promote_to_protected(idx);
        }
        Ok(total)
    }

    /// Writes never allocate: a miss goes straight to SSM; a hit
    /// updates (volatile: write-through + update cache; stable:
    /// write-back only) and is promoted to MRU-of-Protected
    /// (spec.md section 4.2 "Write policy").
    pub fn write(
        &mut self,
        ss: &mut StableStorageManager,
        fhandle: FHandle,
        offset: u64,
        n: u64,
        buf: &[u8],
        faultmode: FaultMode,
    ) -> PiousResult<()> {
        if n == 0 {
            return Ok(());
        }
        let mut consumed = 0usize;
        for (block, lo, hi) in self.block_range(offset, n) {
            let key = BlockKey { fhandle, block };
            let len = hi - lo;
            let chunk = &buf[consumed..consumed + len];
            consumed += len;

            let abs_offset = block * self.dblk_sz as u64 + lo as u64;

            match self.lookup_slot(key) {
                None => {
                    ss.write(fhandle, abs_offset, chunk, faultmode)?;
                }
                Some(idx) => {
                    match faultmode {
                        FaultMode::Volatile => {
                            ss.write(fhandle, abs_offset, chunk, faultmode)?;
                        }
                        FaultMode::Stable => {
                            self.slots[idx].dirty = true;
                            self.slots[idx].faultmode = FaultMode::Stable;
                        }
                    }
                    let slot = &mut self.slots[idx];
                    if hi > slot.valid_bytes {
                        // zero-fill the hole between old valid_bytes and lo
                        for b in &mut slot.data[slot.valid_bytes.min(lo)..lo] {
                            *b = 0;
                        }
                        slot.valid_bytes = hi;
                    }
                    slot.data[lo..hi].copy_from_slice(chunk);
                    self.promote_to_protected(idx);
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self, ss: &mut StableStorageManager) -> PiousResult<()> {
        let indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid() && s.dirty)
            .map(|(i, _)| i)
            .collect();
        for idx in indices {
            self.flush_slot(ss, idx)?;
        }
        Ok(())
    }

    pub fn flush_file(&mut self, ss: &mut StableStorageManager, fhandle: FHandle) -> PiousResult<()> {
        let indices = self.by_file.get(&fhandle).cloned().unwrap_or_default();
        for idx in indices {
            if self.slots[idx].dirty {
                self.flush_slot(ss, idx)?;
            }
        }
        Ok(())
    }

    pub fn invalidate(&mut self) {
        let indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid())
            .map(|(i, _)| i)
            .collect();
        for idx in indices {
            self.evict(idx);
        }
    }

    pub fn invalidate_file(&mut self, fhandle: FHandle) {
        let indices = self.by_file.get(&fhandle).cloned().unwrap_or_default();
        for idx in indices {
            self.evict(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::lock_manager::LockManager;
    use tempfile_shim::TempDir;

    mod tempfile_shim {
        use std::path::PathBuf;

        /// Minimal self-deleting temp directory so cache/SSM tests do
        /// not depend on a `tempfile` dev-dependency the teacher does
        /// not carry.
        pub struct TempDir(pub PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut p = std::env::temp_dir();
                p.push(format!("pious-pds-test-{}", std::process::id()));
                p.push(format!("{:?}", std::time::Instant::now()));
                std::fs::create_dir_all(&p).unwrap();
                TempDir(p)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    fn ssm(dir: &TempDir) -> StableStorageManager {
        let cfg = ServerConfig {
            log_dir: dir.path().to_path_buf(),
            ..ServerConfig::default_for_tests()
        };
        StableStorageManager::open(&cfg).unwrap()
    }

    #[test]
    fn read_after_flush_matches_storage_p7() {
        let dir = TempDir::new();
        let mut ss = ssm(&dir);
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(4, 64);
        let fh = ss
            .lookup("p7.dat", crate::stable_storage::CreateFlag::Creat, false, 0o600, &mut lm, &mut cm)
            .unwrap();
        cm.write(&mut ss, fh, 0, 5, b"hello", FaultMode::Stable).unwrap();
        cm.flush(&mut ss).unwrap();

        let mut direct = vec![0u8; 5];
        let n = ss.read(fh, 0, &mut direct).unwrap();
        assert_eq!(&direct[..n], b"hello");

        let mut buf = vec![0u8; 5];
        let n = cm.read(&mut ss, fh, 0, 5, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn write_past_eof_zero_fills_hole() {
        let dir = TempDir::new();
        let mut ss = ssm(&dir);
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(4, 64);
        let fh = ss
            .lookup("hole.dat", crate::stable_storage::CreateFlag::Creat, false, 0o600, &mut lm, &mut cm)
            .unwrap();
        cm.write(&mut ss, fh, 0, 2, b"AB", FaultMode::Stable).unwrap();
        cm.write(&mut ss, fh, 10, 2, b"CD", FaultMode::Stable).unwrap();

        let mut buf = vec![0xffu8; 12];
        let n = cm.read(&mut ss, fh, 0, 12, &mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&buf[0..2], b"AB");
        assert_eq!(&buf[2..10], &[0u8; 8]);
        assert_eq!(&buf[10..12], b"CD");
    }
}
