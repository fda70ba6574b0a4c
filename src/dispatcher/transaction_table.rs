//! The dispatcher's per-transaction bookkeeping: the `TransId -> entry`
//! hash index plus the `ready`/`blocked` queues from spec.md §4.6.
//!
//! Grounded on `pds_daemon.c`'s `trans_entryt` hash chain and
//! `ti_lookup()`/`rm_transrec()`. The original keeps `blocked` as an
//! intrusive doubly-linked list ordered by arrival so the FIFO
//! fairness predicate can scan "everything older than me"; this
//! version models the same order with a `Vec<TransId>` insertion-order
//! queue (DESIGN NOTES §9 arena-over-pointers) since the table is
//! small enough that a linear scan costs nothing a production PDS
//! would notice.

use std::collections::HashMap;
use std::time::Instant;

use crate::error::PiousError;
use crate::types::{FHandle, TransId};

/// What a transaction is doing right now, independent of whether its
/// *current operation* is admitted, blocked, or completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// No operation outstanding; ready to accept the next `seq`.
    Completed,
    /// Current operation is blocked on a lock conflict.
    Blocked,
}

/// A lock request that did not get granted immediately, kept around
/// so the FIFO fairness predicate (spec.md §4.6) and the retry sweep
/// can re-evaluate it without re-parsing the original request.
#[derive(Debug, Clone, Copy)]
pub struct PendingLock {
    pub fhandle: FHandle,
    pub start: u64,
    pub stop: u64,
    pub kind: crate::lock_manager::LockKind,
}

pub struct TransEntry {
    pub transid: TransId,
    pub prev_seq: u32,
    pub status: OpStatus,
    /// The last reply sent for `prev_seq`, retained so a retransmit of
    /// the same `seq` can be answered without re-executing the op
    /// (spec.md §4.6, "if the previous op completed, re-send the
    /// retained reply").
    pub retained_reply: Option<i32>,
    /// When the currently blocked op was first blocked; used by the
    /// deadlock-avoidance sweep to find ops older than `T_dead`.
    pub blocked_since: Option<Instant>,
    pub pending_lock: Option<PendingLock>,
    pub prepared: bool,
}

impl TransEntry {
    fn new(transid: TransId) -> Self {
        Self {
            transid,
            prev_seq: 0,
            status: OpStatus::Completed,
            retained_reply: None,
            blocked_since: None,
            pending_lock: None,
            prepared: false,
        }
    }
}

#[derive(Default)]
pub struct TransactionTable {
    entries: HashMap<TransId, TransEntry>,
    /// Insertion-ordered queue of transactions whose current op is
    /// blocked, oldest first -- exactly the order the FIFO fairness
    /// predicate and the deadlock sweep need.
    blocked: Vec<TransId>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, transid: TransId) -> Option<&TransEntry> {
        self.entries.get(&transid)
    }

    pub fn get_mut(&mut self, transid: TransId) -> Option<&mut TransEntry> {
        self.entries.get_mut(&transid)
    }

    pub fn insert_new(&mut self, transid: TransId) -> &mut TransEntry {
        self.entries.entry(transid).or_insert_with(|| TransEntry::new(transid))
    }

    pub fn remove(&mut self, transid: TransId) {
        self.entries.remove(&transid);
        self.blocked.retain(|&t| t != transid);
    }

    pub fn block(&mut self, transid: TransId, pending: PendingLock) {
        if let Some(entry) = self.entries.get_mut(&transid) {
            entry.status = OpStatus::Blocked;
            entry.blocked_since = Some(Instant::now());
            entry.pending_lock = Some(pending);
        }
        if !self.blocked.contains(&transid) {
            self.blocked.push(transid);
        }
    }

    pub fn unblock(&mut self, transid: TransId) {
        if let Some(entry) = self.entries.get_mut(&transid) {
            entry.status = OpStatus::Completed;
            entry.blocked_since = None;
            entry.pending_lock = None;
        }
        self.blocked.retain(|&t| t != transid);
    }

    /// Blocked transactions in arrival order (oldest first), as needed
    /// by the FIFO fairness predicate: "any entry in `blocked` older
    /// than this one" (spec.md §4.6).
    pub fn blocked_in_order(&self) -> &[TransId] {
        &self.blocked
    }

    /// The minimum `TransId` among all currently known transactions.
    /// The deadlock-avoidance sweep never aborts this one, guaranteeing
    /// progress (spec.md §4.6).
    pub fn minimum_transid(&self) -> Option<TransId> {
        self.entries.keys().min().copied()
    }

    pub fn all_transids(&self) -> impl Iterator<Item = TransId> + '_ {
        self.entries.keys().copied()
    }

    /// Protocol admission for a transaction op (spec.md §4.6). `abort`
    /// is exempt and is handled by the caller before reaching here.
    /// `is_commit` distinguishes a `commit` against an unknown transid
    /// (`ENotLog` -- nothing to commit, not a protocol violation) from
    /// any other op against one (`EAbort`).
    pub fn admit(&mut self, transid: TransId, seq: u32, is_commit: bool) -> Result<AdmitOutcome, PiousError> {
        match self.entries.get(&transid) {
            None if seq == 0 => {
                self.insert_new(transid);
                Ok(AdmitOutcome::NewActive)
            }
            None if is_commit => Err(PiousError::ENotLog),
            None => Err(PiousError::EAbort),
            Some(entry) => {
                if seq == entry.prev_seq {
                    return Ok(match entry.retained_reply {
                        Some(code) => AdmitOutcome::Retransmit(code),
                        None => AdmitOutcome::StillRunning,
                    });
                }
                if seq == entry.prev_seq + 1 {
                    if entry.status == OpStatus::Blocked {
                        // retransmit of the op currently blocked: the
                        // client is retrying what is still in flight.
                        return Ok(AdmitOutcome::StillRunning);
                    }
                    return Ok(AdmitOutcome::NewActive);
                }
                Err(PiousError::EProto)
            }
        }
    }

    pub fn complete(&mut self, transid: TransId, seq: u32, result_code: i32) {
        if let Some(entry) = self.entries.get_mut(&transid) {
            entry.prev_seq = seq;
            entry.status = OpStatus::Completed;
            entry.retained_reply = Some(result_code);
            entry.blocked_since = None;
            entry.pending_lock = None;
        }
        self.blocked.retain(|&t| t != transid);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AdmitOutcome {
    NewActive,
    Retransmit(i32),
    StillRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(usec: i64) -> TransId {
        TransId { hostid: 1, procid: 1, sec: 0, usec }
    }

    #[test]
    fn unknown_transid_on_commit_is_enotlog() {
        let mut table = TransactionTable::new();
        let err = table.admit(tid(1), 0, true).unwrap_err();
        assert_eq!(err, PiousError::ENotLog);
    }

    #[test]
    fn unknown_transid_on_non_commit_is_eabort() {
        let mut table = TransactionTable::new();
        let err = table.admit(tid(1), 0, false).unwrap_err();
        assert_eq!(err, PiousError::EAbort);
    }

    #[test]
    fn first_op_at_seq_zero_is_new_active() {
        let mut table = TransactionTable::new();
        assert!(matches!(table.admit(tid(1), 0, false), Ok(AdmitOutcome::NewActive)));
    }

    #[test]
    fn retransmit_of_completed_op_returns_retained_reply() {
        let mut table = TransactionTable::new();
        let t = tid(1);
        table.admit(t, 0, false).unwrap();
        table.complete(t, 0, 0);
        assert!(matches!(table.admit(t, 1, false), Ok(AdmitOutcome::NewActive)));
        table.complete(t, 1, -7);
        match table.admit(t, 1, false).unwrap() {
            AdmitOutcome::Retransmit(code) => assert_eq!(code, -7),
            other => panic!("expected Retransmit, got {:?}", other),
        }
    }

    #[test]
    fn retransmit_of_blocked_op_is_still_running_and_does_not_corrupt_entry() {
        let mut table = TransactionTable::new();
        let t = tid(1);
        table.admit(t, 0, false).unwrap();
        table.block(
            t,
            PendingLock { fhandle: FHandle::new(1, 1), start: 0, stop: 0, kind: crate::lock_manager::LockKind::Write },
        );

        // a client retransmitting the same still-in-flight op must not
        // be treated as a protocol error, and must not disturb the
        // entry's blocked state (no spurious `complete()`).
        assert!(matches!(table.admit(t, 1, false), Ok(AdmitOutcome::StillRunning)));
        let entry = table.get(t).unwrap();
        assert_eq!(entry.status, OpStatus::Blocked);
        assert!(entry.pending_lock.is_some());
    }

    #[test]
    fn seq_gap_is_protocol_error() {
        let mut table = TransactionTable::new();
        let t = tid(1);
        table.admit(t, 0, false).unwrap();
        table.complete(t, 0, 0);
        let err = table.admit(t, 5, false).unwrap_err();
        assert_eq!(err, PiousError::EProto);
    }
}
