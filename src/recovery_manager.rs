//! Recovery manager: writes the intentions-list log record for a
//! transaction's buffered writes ahead of commitment, then updates
//! that record's final disposition once the outcome is known.
//!
//! Grounded on `pds_recovery_manager.c`/`.h`: `RM_trans_log` appends a
//! fixed header plus one entry per write, `RM_trans_state` rewrites a
//! single state byte in place at a fixed offset within that header.
//! `RM_checkpt`/`RM_recover` are marked "[not implemented]" in the
//! original and remain out of scope here too (spec.md Non-goals);
//! `StableStorageManager::checkpoint` (SPEC_FULL.md section 9, O3)
//! covers FHDB compaction only, not TLOG-driven crash recovery.

use crate::error::{PiousError, PiousResult};
use crate::stable_storage::StableStorageManager;
use crate::types::{FHandle, TransId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransState {
    Unknown,
    Commit,
    Abort,
}

impl TransState {
    fn tag(self) -> u8 {
        match self {
            TransState::Commit => 0,
            TransState::Abort => 1,
            TransState::Unknown => 2,
        }
    }
}

/// One buffered write, in temporal order, as held by the data manager
/// for a single transaction (`struct RM_wbuf`).
pub struct WriteRecord {
    pub fhandle: FHandle,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Opaque handle into the TLOG identifying one transaction's log
/// record, returned by `log` and consumed by `set_state`
/// (`pious_offt lhandle` in the original -- the byte offset of the
/// record's header within the log file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHandle(u64);

const MAGIC: u32 = 0x5049_4F53; // "PIOS"
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8 + 1; // magic, hostid, procid, sec, usec, state
const STATE_OFFSET_IN_HEADER: u64 = (HEADER_LEN - 1) as u64;

fn encode_write_record(w: &WriteRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 8 + 8 + w.data.len());
    out.extend_from_slice(&w.fhandle.dev.to_be_bytes());
    out.extend_from_slice(&w.fhandle.ino.to_be_bytes());
    out.extend_from_slice(&w.offset.to_be_bytes());
    out.extend_from_slice(&(w.data.len() as u64).to_be_bytes());
    out.extend_from_slice(&w.data);
    out
}

pub struct RecoveryManager;

impl RecoveryManager {
    pub fn new() -> Self {
        Self
    }

    /// `RM_trans_log()`: append a header identifying `transid` (with
    /// committement state set to `Unknown`) followed by the encoded
    /// `wbuf` records, then fsync the log so the intentions are
    /// durable before `prepare` returns. Returns the handle needed by
    /// `set_state`.
    pub fn log(
        &self,
        ss: &mut StableStorageManager,
        transid: TransId,
        wbuf: &[WriteRecord],
    ) -> PiousResult<LogHandle> {
        let mut record = Vec::new();
        record.extend_from_slice(&MAGIC.to_be_bytes());
        record.extend_from_slice(&transid.hostid.to_be_bytes());
        record.extend_from_slice(&transid.procid.to_be_bytes());
        record.extend_from_slice(&transid.sec.to_be_bytes());
        record.extend_from_slice(&transid.usec.to_be_bytes());
        record.push(TransState::Unknown.tag());
        for w in wbuf {
            record.extend_from_slice(&encode_write_record(w));
        }

        let offset = ss.logwrite(&record)?;
        ss.logsync()?;
        Ok(LogHandle(offset))
    }

    /// `RM_trans_state()`: rewrite the single state byte of the
    /// header at `lhandle` to reflect the transaction's final
    /// committement decision.
    pub fn set_state(
        &self,
        ss: &mut StableStorageManager,
        lhandle: LogHandle,
        state: TransState,
    ) -> PiousResult<()> {
        if state == TransState::Unknown {
            return Err(PiousError::EInval);
        }
        let byte = [state.tag()];
        ss.write_log_byte(lhandle.0 + STATE_OFFSET_IN_HEADER, &byte)
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn tmp_ssm() -> (StableStorageManager, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("pious-rm-test-{}-{:?}", std::process::id(), std::time::Instant::now()));
        let cfg = ServerConfig {
            log_dir: dir.clone(),
            ..ServerConfig::default_for_tests()
        };
        (StableStorageManager::open(&cfg).unwrap(), dir)
    }

    fn tid() -> TransId {
        TransId { hostid: 1, procid: 2, sec: 100, usec: 200 }
    }

    #[test]
    fn log_then_set_state_round_trips() {
        let (mut ss, dir) = tmp_ssm();
        let rm = RecoveryManager::new();
        let wbuf = vec![WriteRecord {
            fhandle: FHandle::new(1, 1),
            offset: 0,
            data: b"abc".to_vec(),
        }];
        let lhandle = rm.log(&mut ss, tid(), &wbuf).unwrap();
        rm.set_state(&mut ss, lhandle, TransState::Commit).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn set_state_rejects_unknown() {
        let (mut ss, dir) = tmp_ssm();
        let rm = RecoveryManager::new();
        let lhandle = rm.log(&mut ss, tid(), &[]).unwrap();
        let err = rm.set_state(&mut ss, lhandle, TransState::Unknown).unwrap_err();
        assert_eq!(err, PiousError::EInval);
        std::fs::remove_dir_all(&dir).ok();
    }
}
