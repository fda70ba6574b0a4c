//! Data manager: per-transaction write buffering, read-your-writes,
//! and the two-phase commit protocol's data-side half.
//!
//! Grounded on `pds_data_manager.c`/`.h`. A transaction's writes are
//! held in an in-memory buffer (not yet visible to other
//! transactions, and not yet pushed to the cache manager) until
//! `commit`; `read` overlays that buffer atop the cache manager's view
//! so a transaction always sees its own uncommitted writes. `prepare`
//! implements the 2PC read-only optimization from `DM_prepare()`'s
//! documentation: a transaction with no buffered writes needs no log
//! record and is immediately votable.

use std::collections::HashMap;

use crate::cache_manager::{CacheManager, FaultMode};
use crate::error::{PiousError, PiousResult};
use crate::recovery_manager::{LogHandle, RecoveryManager, TransState, WriteRecord};
use crate::stable_storage::{StableStorageManager, PIOUS_R_OK, PIOUS_W_OK};
use crate::types::{FHandle, TransId};

/// One buffered write awaiting commit. Ranges are kept in arrival
/// order and are replayed in that order, so a later write's overlap
/// with an earlier one in the same transaction always wins on read
/// (matches the original's "temporal order" guarantee in
/// `struct RM_wbuf`'s documentation).
struct BufferedWrite {
    fhandle: FHandle,
    offset: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct TransBuffer {
    writes: Vec<BufferedWrite>,
    prepared: bool,
    lhandle: Option<LogHandle>,
}

/// Per-transaction write buffers, keyed by `TransId`. Owned by
/// `ServerState` alongside the cache/lock/recovery managers; one
/// instance per process (spec.md section 5).
#[derive(Default)]
pub struct DataManager {
    buffers: HashMap<TransId, TransBuffer>,
}

impl DataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `DM_read()`: overlay this transaction's own buffered writes atop
    /// whatever the cache manager currently holds, implementing
    /// read-your-writes without requiring buffered writes to be
    /// pushed into the shared cache early.
    pub fn read(
        &self,
        cache: &mut CacheManager,
        ss: &mut StableStorageManager,
        transid: TransId,
        fhandle: FHandle,
        offset: u64,
        nbyte: u64,
        buf: &mut [u8],
    ) -> PiousResult<usize> {
        if self.buffers.get(&transid).map_or(false, |b| b.prepared) {
            return Err(PiousError::EProto);
        }

        let amode = ss.faccess(fhandle)?;
        if amode & PIOUS_R_OK == 0 {
            return Err(PiousError::EAccess);
        }

        let n = cache.read(ss, fhandle, offset, nbyte, buf)?;

        if let Some(tb) = self.buffers.get(&transid) {
            let end = offset + n as u64;
            for w in &tb.writes {
                if w.fhandle != fhandle {
                    continue;
                }
                let wend = w.offset + w.data.len() as u64;
                let lo = offset.max(w.offset);
                let hi = end.min(wend);
                if lo < hi {
                    let buf_lo = (lo - offset) as usize;
                    let buf_hi = (hi - offset) as usize;
                    let src_lo = (lo - w.offset) as usize;
                    let src_hi = (hi - w.offset) as usize;
                    buf[buf_lo..buf_hi].copy_from_slice(&w.data[src_lo..src_hi]);
                }
            }
        }

        Ok(n)
    }

    /// `DM_write()`: buffer the write; ownership of `data` transfers to
    /// the data manager (the original's warning that `buf` "can NOT
    /// be deallocated by caller" becomes, in Rust, simply taking
    /// `data` by value).
    pub fn write(
        &mut self,
        ss: &mut StableStorageManager,
        transid: TransId,
        fhandle: FHandle,
        offset: u64,
        data: Vec<u8>,
    ) -> PiousResult<()> {
        if self.buffers.get(&transid).map_or(false, |b| b.prepared) {
            return Err(PiousError::EProto);
        }

        let amode = ss.faccess(fhandle)?;
        if amode & PIOUS_W_OK == 0 {
            return Err(PiousError::EAccess);
        }

        let tb = self.buffers.entry(transid).or_default();
        tb.writes.push(BufferedWrite { fhandle, offset, data });
        Ok(())
    }

    /// `DM_prepare()`: a vote to commit (`Ok(())`) or an implicit vote
    /// to abort (`Err`). Read-only transactions (no buffered writes)
    /// are prepared without touching the log at all.
    pub fn prepare(
        &mut self,
        rm: &RecoveryManager,
        ss: &mut StableStorageManager,
        transid: TransId,
    ) -> PiousResult<()> {
        let tb = self.buffers.entry(transid).or_default();
        if tb.writes.is_empty() {
            tb.prepared = true;
            return Ok(());
        }

        let wbuf: Vec<WriteRecord> = tb
            .writes
            .iter()
            .map(|w| WriteRecord {
                fhandle: w.fhandle,
                offset: w.offset,
                data: w.data.clone(),
            })
            .collect();

        let lhandle = rm.log(ss, transid, &wbuf)?;
        let tb = self.buffers.get_mut(&transid).unwrap();
        tb.lhandle = Some(lhandle);
        tb.prepared = true;
        Ok(())
    }

    /// `DM_commit()`: record the commit outcome in the log (skipped
    /// for the read-only optimization path, which has no log record),
    /// then replay the buffered writes into the cache manager with
    /// `FaultMode::Stable` -- commit only returns once the effects are
    /// durable-or-durably-intended, matching invariant I4 in
    /// spec.md section 4.4.
    pub fn commit(
        &mut self,
        rm: &RecoveryManager,
        cache: &mut CacheManager,
        ss: &mut StableStorageManager,
        transid: TransId,
    ) -> PiousResult<()> {
        let tb = match self.buffers.remove(&transid) {
            Some(tb) => tb,
            None => return Ok(()),
        };

        if let Some(lhandle) = tb.lhandle {
            rm.set_state(ss, lhandle, TransState::Commit)?;
        }

        for w in tb.writes {
            cache.write(ss, w.fhandle, w.offset, w.data.len() as u64, &w.data, FaultMode::Stable)?;
        }
        Ok(())
    }

    /// `DM_abort()`: record the abort outcome (if a log record exists)
    /// and discard the buffer without ever touching the cache.
    pub fn abort(
        &mut self,
        rm: &RecoveryManager,
        ss: &mut StableStorageManager,
        transid: TransId,
    ) -> PiousResult<()> {
        let tb = match self.buffers.remove(&transid) {
            Some(tb) => tb,
            None => return Ok(()),
        };
        if let Some(lhandle) = tb.lhandle {
            rm.set_state(ss, lhandle, TransState::Abort)?;
        }
        Ok(())
    }

    pub fn is_read_only(&self, transid: TransId) -> bool {
        self.buffers.get(&transid).map_or(true, |b| b.writes.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::lock_manager::LockManager;
    use crate::stable_storage::CreateFlag;

    fn harness() -> (StableStorageManager, CacheManager, RecoveryManager, DataManager, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("pious-dm-test-{}-{:?}", std::process::id(), std::time::Instant::now()));
        let cfg = ServerConfig {
            log_dir: dir.clone(),
            ..ServerConfig::default_for_tests()
        };
        let ss = StableStorageManager::open(&cfg).unwrap();
        let cache = CacheManager::new(8, 64);
        (ss, cache, RecoveryManager::new(), DataManager::new(), dir)
    }

    fn tid(usec: i64) -> TransId {
        TransId { hostid: 1, procid: 1, sec: 0, usec }
    }

    #[test]
    fn read_your_own_uncommitted_write() {
        let (mut ss, mut cache, rm, mut dm, dir) = harness();
        let mut lm = LockManager::new();
        let fh = ss.lookup("f.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cache).unwrap();
        let t = tid(1);
        dm.write(&mut ss, t, fh, 0, b"abc".to_vec()).unwrap();

        let mut buf = vec![0u8; 3];
        let n = dm.read(&mut cache, &mut ss, t, fh, 0, 3, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");

        let _ = rm;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn commit_makes_writes_visible_to_other_transactions() {
        let (mut ss, mut cache, rm, mut dm, dir) = harness();
        let mut lm = LockManager::new();
        let fh = ss.lookup("g.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cache).unwrap();
        let t1 = tid(1);
        dm.write(&mut ss, t1, fh, 0, b"xyz".to_vec()).unwrap();
        dm.prepare(&rm, &mut ss, t1).unwrap();
        dm.commit(&rm, &mut cache, &mut ss, t1).unwrap();

        let t2 = tid(2);
        let mut buf = vec![0u8; 3];
        let n = dm.read(&mut cache, &mut ss, t2, fh, 0, 3, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"xyz");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn abort_discards_buffered_writes() {
        let (mut ss, mut cache, rm, mut dm, dir) = harness();
        let mut lm = LockManager::new();
        let fh = ss.lookup("h.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cache).unwrap();
        let t = tid(1);
        dm.write(&mut ss, t, fh, 0, b"qqq".to_vec()).unwrap();
        dm.prepare(&rm, &mut ss, t).unwrap();
        dm.abort(&rm, &mut ss, t).unwrap();

        let mut buf = vec![0xffu8; 3];
        let n = cache.read(&mut ss, fh, 0, 3, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0u8; 3]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn read_only_transaction_skips_the_log() {
        let (mut ss, mut cache, rm, mut dm, dir) = harness();
        let t = tid(1);
        dm.prepare(&rm, &mut ss, t).unwrap();
        assert!(dm.is_read_only(t));
        let _ = &mut cache;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn write_after_prepare_is_protocol_error() {
        let (mut ss, _cache, rm, mut dm, dir) = harness();
        let fh = FHandle::new(9, 9);
        let t = tid(1);
        dm.prepare(&rm, &mut ss, t).unwrap();
        let err = dm.write(&mut ss, t, fh, 0, b"late".to_vec()).unwrap_err();
        assert_eq!(err, PiousError::EProto);
        std::fs::remove_dir_all(&dir).ok();
    }
}
