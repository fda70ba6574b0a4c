//! The single-threaded cooperative dispatcher: the PDS main loop.
//!
//! Grounded on `pds_daemon.c`'s `main()` receive/classify/dispatch
//! loop, `do_transop()`/`do_cntrlop()`, `fcfs_conflict()` (the FIFO
//! fairness predicate), and the deadlock-avoidance sweep. Everything
//! here runs on one `tokio` task; network I/O happens on separate
//! tasks that only forward fully-decoded requests in over an `mpsc`
//! channel and wait on a `oneshot` channel for the reply (spec.md
//! section 5: "the message transport is the sole suspension point" --
//! nothing inside the managers ever awaits).

pub mod protocol;
pub mod transaction_table;

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::cache_manager::CacheManager;
use crate::config::ServerConfig;
use crate::data_manager::DataManager;
use crate::error::{PiousError, PiousResult};
use crate::lock_manager::{Grant, LockKind, LockManager};
use crate::recovery_manager::RecoveryManager;
use crate::stable_storage::StableStorageManager;
use crate::types::{FHandle, TransId, TransIdFactory};

use protocol::{CntrlRequest, TransRequest};
use transaction_table::{AdmitOutcome, PendingLock, TransactionTable};

pub struct TransReplyMsg {
    pub result_code: i32,
    pub payload: Vec<u8>,
}

pub struct CntrlReplyMsg {
    pub result_code: i32,
    pub payload: Vec<u8>,
}

pub struct TransRequestMsg {
    pub transid: TransId,
    pub seq: u32,
    pub req: TransRequest,
    pub reply: oneshot::Sender<TransReplyMsg>,
}

pub struct CntrlRequestMsg {
    pub cmsgid: u32,
    pub req: CntrlRequest,
    pub reply: oneshot::Sender<CntrlReplyMsg>,
}

pub enum Inbound {
    Trans(TransRequestMsg),
    Cntrl(CntrlRequestMsg),
}

struct PendingTransOp {
    seq: u32,
    req: TransRequest,
    reply: oneshot::Sender<TransReplyMsg>,
}

struct BlockedCntrl {
    cmsgid: u32,
    req: CntrlRequest,
    reply: oneshot::Sender<CntrlReplyMsg>,
    since: Instant,
}

/// Everything the dispatcher owns: the four managers, the transaction
/// id factory, and the transaction/control-op tables. One instance
/// per process, never shared -- the dispatcher task is its sole owner
/// (spec.md section 5).
pub struct ServerState {
    lock_manager: LockManager,
    cache_manager: CacheManager,
    ss: StableStorageManager,
    data_manager: DataManager,
    recovery_manager: RecoveryManager,
    transids: TransIdFactory,
    table: TransactionTable,
    pending_ops: std::collections::HashMap<TransId, PendingTransOp>,
    blocked_ctrl: Vec<BlockedCntrl>,
    t_dead: Duration,
    fatal: bool,
    shutting_down: bool,
}

impl ServerState {
    pub fn new(cfg: &ServerConfig) -> PiousResult<Self> {
        let ss = StableStorageManager::open(cfg)?;
        Ok(Self {
            lock_manager: LockManager::new(),
            cache_manager: CacheManager::new(cfg.cache_sz, cfg.dblk_sz),
            ss,
            data_manager: DataManager::new(),
            recovery_manager: RecoveryManager::new(),
            transids: TransIdFactory::new()?,
            table: TransactionTable::new(),
            pending_ops: std::collections::HashMap::new(),
            blocked_ctrl: Vec::new(),
            t_dead: Duration::from_secs(cfg.t_dead_secs),
            fatal: false,
            shutting_down: false,
        })
    }

    /// Hands out a fresh transaction id. `server.rs` calls this when a
    /// client asks to begin a transaction (there is no dedicated
    /// "begin" opcode in spec.md section 6 -- the client mints its
    /// first transaction op with `seq == 0` against a transid it
    /// obtained from here).
    pub fn new_transid(&mut self) -> TransId {
        self.transids.assign()
    }

    /// Drives the main loop until `shutdown` drains every outstanding
    /// transaction. `rx` is fed by the transport layer; `server.rs`
    /// owns the listener and per-connection decode tasks.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>) {
        let sweep_interval = (self.t_dead / 2).max(Duration::from_millis(50));
        loop {
            let recv = tokio::time::timeout(sweep_interval, rx.recv()).await;
            match recv {
                Ok(Some(inbound)) => self.handle_inbound(inbound),
                Ok(None) => break, // transport detached; nothing left to serve
                Err(_) => {}       // timeout: fall through to periodic sweep
            }
            self.sweep_deadlocks();
            self.sweep_blocked_ctrl();
            self.run_checkpoint_if_needed();
            if self.shutting_down && self.table.all_transids().next().is_none() {
                break;
            }
        }
    }

    /// Consumes the FHDB-compaction trigger the stable storage manager
    /// raises once its file grows past the checkpoint threshold
    /// (spec.md section 9, O3). Only runs between dispatch cycles, when
    /// no transaction op is in flight, matching `pds_daemon.c`'s
    /// treatment of checkpointing as a background housekeeping pass
    /// rather than something a client request blocks on.
    fn run_checkpoint_if_needed(&mut self) {
        if !self.ss.checkpoint_required {
            return;
        }
        let result = self.ss.checkpoint();
        self.escalate_if_needed(result.err());
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Trans(msg) => self.handle_transop(msg),
            Inbound::Cntrl(msg) => self.handle_cntrlop(msg),
        }
    }

    // ---- transaction-op protocol (spec.md section 4.6) ----------------

    fn handle_transop(&mut self, msg: TransRequestMsg) {
        if self.fatal {
            let _ = msg.reply.send(TransReplyMsg { result_code: PiousError::EFatal.code(), payload: Vec::new() });
            return;
        }

        if matches!(msg.req, TransRequest::Abort) {
            self.do_abort_preempting(msg);
            return;
        }

        match self.table.admit(msg.transid, msg.seq, matches!(msg.req, TransRequest::Commit)) {
            Ok(AdmitOutcome::Retransmit(code)) => {
                let _ = msg.reply.send(TransReplyMsg { result_code: code, payload: Vec::new() });
            }
            Ok(AdmitOutcome::StillRunning) => {
                drop(msg.reply); // silently dropped per spec.md section 4.6
            }
            Ok(AdmitOutcome::NewActive) => {
                self.execute_transop(msg);
            }
            Err(err) => {
                self.table.complete(msg.transid, msg.seq, err.code());
                let _ = msg.reply.send(TransReplyMsg { result_code: err.code(), payload: Vec::new() });
            }
        }
    }

    /// `abort` preempts whatever the transaction's current op is: a
    /// blocked op's reply channel is simply dropped (never answered),
    /// and the abort itself always succeeds (spec.md section 4.6).
    fn do_abort_preempting(&mut self, msg: TransRequestMsg) {
        if let Some(pending) = self.pending_ops.remove(&msg.transid) {
            drop(pending.reply);
        }
        self.table.unblock(msg.transid);

        let result = self.data_manager.abort(&self.recovery_manager, &mut self.ss, msg.transid);
        self.lock_manager.rfree(msg.transid);
        self.lock_manager.wfree(msg.transid);
        self.table.remove(msg.transid);

        let code = result.err().map(|e| e.code()).unwrap_or(0);
        let _ = msg.reply.send(TransReplyMsg { result_code: code, payload: Vec::new() });
        self.escalate_if_needed(result.err());
        self.retry_blocked();
    }

    fn execute_transop(&mut self, msg: TransRequestMsg) {
        match msg.req {
            TransRequest::Prepare | TransRequest::Commit => {
                let result = self.run_commit_protocol(msg.transid, &msg.req).map(|code| (code, Vec::new()));
                self.finish_transop_with_code(msg.transid, msg.seq, msg.reply, result);
            }
            _ => self.try_data_op(msg),
        }
    }

    /// Runs `prepare`/`commit` and returns the wire result code directly:
    /// `PIOUS_OK`, or `PIOUS_READONLY` for a `prepare` of a transaction
    /// that never wrote (spec.md section 4.4, P4) -- the one case where
    /// success is not simply "0".
    fn run_commit_protocol(&mut self, transid: TransId, req: &TransRequest) -> PiousResult<i32> {
        match req {
            TransRequest::Prepare => {
                self.data_manager.prepare(&self.recovery_manager, &mut self.ss, transid)?;
                self.lock_manager.rfree(transid);
                if self.data_manager.is_read_only(transid) {
                    Ok(crate::error::PIOUS_READONLY)
                } else {
                    Ok(crate::error::PIOUS_OK)
                }
            }
            TransRequest::Commit => {
                let r = self.data_manager.commit(
                    &self.recovery_manager,
                    &mut self.cache_manager,
                    &mut self.ss,
                    transid,
                );
                self.lock_manager.wfree(transid);
                self.table.remove(transid);
                r.map(|_| crate::error::PIOUS_OK)
            }
            _ => unreachable!(),
        }
    }

    /// A data op (`read`/`write`/`read_sint`/`write_sint`/`fa_sint`)
    /// first consults the FIFO fairness predicate, then the lock
    /// manager; a grant runs the op through the data manager
    /// immediately, a conflict or a denial blocks it.
    fn try_data_op(&mut self, msg: TransRequestMsg) {
        let (fhandle, start, stop, kind) = extent_of(&msg.req);

        if self.fifo_conflict(msg.transid, fhandle, start, stop, kind) {
            self.block_transop(msg, fhandle, start, stop, kind);
            return;
        }

        let grant = match kind {
            LockKind::Read => self.lock_manager.rlock(msg.transid, fhandle, start, stop - start + 1),
            LockKind::Write => self.lock_manager.wlock(msg.transid, fhandle, start, stop - start + 1),
        };

        match grant {
            Grant::Granted => {
                let outcome = self.run_data_op(msg.transid, &msg.req);
                let TransRequestMsg { transid, seq, reply, .. } = msg;
                self.finish_transop(transid, seq, reply, outcome);
            }
            Grant::Denied => self.block_transop(msg, fhandle, start, stop, kind),
        }
    }

    /// Runs a granted data op and returns its payload bytes (empty for
    /// write-like ops); errors propagate as-is.
    fn run_data_op(&mut self, transid: TransId, req: &TransRequest) -> PiousResult<Vec<u8>> {
        match *req {
            TransRequest::Read { fhandle, offset, nbyte } => {
                let mut buf = vec![0u8; nbyte as usize];
                let n = self.data_manager.read(
                    &mut self.cache_manager,
                    &mut self.ss,
                    transid,
                    fhandle,
                    offset,
                    nbyte,
                    &mut buf,
                )?;
                buf.truncate(n);
                Ok(buf)
            }
            TransRequest::Write { fhandle, offset, ref data } => {
                self.data_manager.write(&mut self.ss, transid, fhandle, offset, data.clone())?;
                Ok(Vec::new())
            }
            TransRequest::ReadSint { fhandle, index } => {
                let mut buf = [0u8; 8];
                self.data_manager.read(
                    &mut self.cache_manager,
                    &mut self.ss,
                    transid,
                    fhandle,
                    index * 8,
                    8,
                    &mut buf,
                )?;
                Ok(buf.to_vec())
            }
            TransRequest::WriteSint { fhandle, index, value } => {
                self.data_manager.write(&mut self.ss, transid, fhandle, index * 8, value.to_be_bytes().to_vec())?;
                Ok(Vec::new())
            }
            TransRequest::FaSint { fhandle, index, increment } => {
                let mut buf = [0u8; 8];
                self.data_manager.read(
                    &mut self.cache_manager,
                    &mut self.ss,
                    transid,
                    fhandle,
                    index * 8,
                    8,
                    &mut buf,
                )?;
                let prior = i64::from_be_bytes(buf);
                let updated = prior.wrapping_add(increment);
                self.data_manager.write(&mut self.ss, transid, fhandle, index * 8, updated.to_be_bytes().to_vec())?;
                Ok(prior.to_be_bytes().to_vec())
            }
            TransRequest::Prepare | TransRequest::Commit | TransRequest::Abort => Ok(Vec::new()),
        }
    }

    fn finish_transop(
        &mut self,
        transid: TransId,
        seq: u32,
        reply: oneshot::Sender<TransReplyMsg>,
        outcome: PiousResult<Vec<u8>>,
    ) {
        let outcome = outcome.map(|bytes| (crate::error::PIOUS_OK, bytes));
        self.finish_transop_with_code(transid, seq, reply, outcome);
    }

    /// Like `finish_transop`, but lets the caller pick the success code
    /// -- needed for `prepare`'s `PIOUS_READONLY` vs `PIOUS_OK` split
    /// (spec.md section 4.4, P4).
    fn finish_transop_with_code(
        &mut self,
        transid: TransId,
        seq: u32,
        reply: oneshot::Sender<TransReplyMsg>,
        outcome: PiousResult<(i32, Vec<u8>)>,
    ) {
        let (code, payload) = match outcome {
            Ok((code, payload)) => (code, payload),
            Err(e) => (e.code(), Vec::new()),
        };
        self.table.complete(transid, seq, code);
        let _ = reply.send(TransReplyMsg { result_code: code, payload });
        if code < 0 {
            self.escalate_if_needed(PiousError::from_code(code));
        }
        self.retry_blocked();
    }

    /// `fcfs_conflict()` in the original: a request must yield to any
    /// *already-blocked* request on the same file that arrived earlier
    /// and whose range it conflicts with, even if the lock table
    /// itself would grant this request right now. This is what keeps a
    /// stream of read locks from starving a blocked writer.
    fn fifo_conflict(&self, transid: TransId, fhandle: FHandle, start: u64, stop: u64, kind: LockKind) -> bool {
        for &older in self.table.blocked_in_order() {
            if older == transid {
                break;
            }
            if let Some(entry) = self.table.get(older) {
                if let Some(pending) = entry.pending_lock {
                    if pending.fhandle == fhandle
                        && ranges_overlap(pending.start, pending.stop, start, stop)
                        && (pending.kind == LockKind::Write || kind == LockKind::Write)
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn block_transop(&mut self, msg: TransRequestMsg, fhandle: FHandle, start: u64, stop: u64, kind: LockKind) {
        self.table.block(msg.transid, PendingLock { fhandle, start, stop, kind });
        self.pending_ops.insert(msg.transid, PendingTransOp { seq: msg.seq, req: msg.req, reply: msg.reply });
    }

    /// After any op that releases locks (`prepare`, `commit`, `abort`),
    /// retry all blocked control ops then all blocked transaction ops
    /// in arrival order (spec.md section 4.6).
    fn retry_blocked(&mut self) {
        self.retry_blocked_ctrl();
        self.retry_blocked_trans();
    }

    fn retry_blocked_trans(&mut self) {
        loop {
            if self.fatal {
                break;
            }
            let candidates: Vec<TransId> = self.table.blocked_in_order().to_vec();
            let mut progressed = false;
            for transid in candidates {
                let pending = match self.pending_ops.remove(&transid) {
                    Some(p) => p,
                    None => continue,
                };
                let (fhandle, start, stop, kind) = extent_of(&pending.req);
                if self.fifo_conflict(transid, fhandle, start, stop, kind) {
                    self.pending_ops.insert(transid, pending);
                    continue;
                }
                let grant = match kind {
                    LockKind::Read => self.lock_manager.rlock(transid, fhandle, start, stop - start + 1),
                    LockKind::Write => self.lock_manager.wlock(transid, fhandle, start, stop - start + 1),
                };
                match grant {
                    Grant::Denied => {
                        self.pending_ops.insert(transid, pending);
                    }
                    Grant::Granted => {
                        self.table.unblock(transid);
                        let outcome = self.run_data_op(transid, &pending.req);
                        let (code, payload) = match outcome {
                            Ok(bytes) => (0, bytes),
                            Err(e) => (e.code(), Vec::new()),
                        };
                        self.table.complete(transid, pending.seq, code);
                        let _ = pending.reply.send(TransReplyMsg { result_code: code, payload });
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn retry_blocked_ctrl(&mut self) {
        let pending = std::mem::take(&mut self.blocked_ctrl);
        for blocked in pending {
            self.try_cntrlop(blocked.cmsgid, blocked.req, blocked.reply, Some(blocked.since));
        }
    }

    fn sweep_blocked_ctrl(&mut self) {
        let now = Instant::now();
        let mut still_blocked = Vec::new();
        for blocked in std::mem::take(&mut self.blocked_ctrl) {
            if now.duration_since(blocked.since) > self.t_dead {
                let _ = blocked
                    .reply
                    .send(CntrlReplyMsg { result_code: PiousError::EBusy.code(), payload: Vec::new() });
            } else {
                still_blocked.push(blocked);
            }
        }
        self.blocked_ctrl = still_blocked;
    }

    /// Deadlock avoidance (spec.md section 4.6): among all known
    /// transactions, find the minimum id; any blocked transaction
    /// older than `T_dead` and strictly greater than the minimum is
    /// aborted, guaranteeing the oldest transaction always makes
    /// progress.
    fn sweep_deadlocks(&mut self) {
        let minimum = match self.table.minimum_transid() {
            Some(m) => m,
            None => return,
        };
        let now = Instant::now();
        let victims: Vec<TransId> = self
            .table
            .blocked_in_order()
            .iter()
            .copied()
            .filter(|&t| t != minimum)
            .filter(|&t| {
                self.table
                    .get(t)
                    .and_then(|e| e.blocked_since)
                    .map_or(false, |since| now.duration_since(since) > self.t_dead)
            })
            .collect();

        if victims.is_empty() {
            return;
        }

        for transid in victims {
            if let Some(pending) = self.pending_ops.remove(&transid) {
                let _ = pending
                    .reply
                    .send(TransReplyMsg { result_code: PiousError::EAbort.code(), payload: Vec::new() });
            }
            let result = self.data_manager.abort(&self.recovery_manager, &mut self.ss, transid);
            self.lock_manager.rfree(transid);
            self.lock_manager.wfree(transid);
            self.table.remove(transid);
            self.escalate_if_needed(result.err());
        }

        // releasing a victim's locks may unblock others.
        self.retry_blocked();
    }

    fn escalate_if_needed(&mut self, err: Option<PiousError>) {
        if let Some(e) = err {
            if e.escalates_to_fatal() {
                self.fatal = true;
                let _ = self.ss.errlog(&format!("escalating {:?} to fatal", e));
            }
        }
    }

    // ---- control-op protocol -------------------------------------------

    fn handle_cntrlop(&mut self, msg: CntrlRequestMsg) {
        if self.fatal {
            let _ = msg.reply.send(CntrlReplyMsg { result_code: PiousError::EFatal.code(), payload: Vec::new() });
            return;
        }
        self.try_cntrlop(msg.cmsgid, msg.req, msg.reply, None);
    }

    fn try_cntrlop(
        &mut self,
        cmsgid: u32,
        req: CntrlRequest,
        reply: oneshot::Sender<CntrlReplyMsg>,
        blocked_since: Option<Instant>,
    ) {
        if matches!(req, CntrlRequest::Reset) {
            let result = self.do_reset();
            self.reply_cntrl(reply, result, Vec::new());
            return;
        }
        if matches!(req, CntrlRequest::Shutdown) {
            self.do_shutdown();
            self.reply_cntrl(reply, Ok(()), Vec::new());
            return;
        }

        match self.run_cntrlop(&req) {
            Ok(payload) => self.reply_cntrl(reply, Ok(()), payload),
            Err(PiousError::EBusy) if blocked_since.is_none() => {
                self.blocked_ctrl.push(BlockedCntrl { cmsgid, req, reply, since: Instant::now() });
            }
            Err(e) => self.reply_cntrl(reply, Err(e), Vec::new()),
        }
    }

    fn reply_cntrl(&mut self, reply: oneshot::Sender<CntrlReplyMsg>, result: PiousResult<()>, payload: Vec<u8>) {
        let code = result.err().map(|e| e.code()).unwrap_or(0);
        let _ = reply.send(CntrlReplyMsg { result_code: code, payload });
        if code < 0 {
            self.escalate_if_needed(PiousError::from_code(code));
        }
    }

    /// A control op that would need a file-wide lock a transaction
    /// currently holds reports `EBusy` here, which `try_cntrlop`
    /// interprets as "enqueue into `blocked_ctrl`" on first attempt. A
    /// truncating `Lookup` is the one op that can actually hit this: it
    /// takes a synthetic whole-file write lock before truncating
    /// (`StableStorageManager::truncate_by_handle`), which conflicts
    /// with any transaction still holding a lock on the file. Every
    /// other op here is lock-free at this layer, matching
    /// `pds_daemon.c`'s control ops, which otherwise only ever block on
    /// `reset` (handled separately in `do_reset`).
    fn run_cntrlop(&mut self, req: &CntrlRequest) -> PiousResult<Vec<u8>> {
        match req {
            CntrlRequest::Lookup { path, cflag, trunc, mode } => {
                let fh = self.ss.lookup(path, *cflag, *trunc, *mode, &mut self.lock_manager, &mut self.cache_manager)?;
                let mut buf = Vec::with_capacity(16);
                buf.extend_from_slice(&fh.dev.to_be_bytes());
                buf.extend_from_slice(&fh.ino.to_be_bytes());
                Ok(buf)
            }
            CntrlRequest::CacheFlush => {
                self.cache_manager.flush(&mut self.ss)?;
                Ok(Vec::new())
            }
            CntrlRequest::Mkdir { path, mode } => {
                self.ss.mkdir(path, *mode)?;
                Ok(Vec::new())
            }
            CntrlRequest::Rmdir { path } => {
                self.ss.rmdir(path)?;
                Ok(Vec::new())
            }
            CntrlRequest::Unlink { path } => {
                self.ss.unlink(path, &mut self.lock_manager, &mut self.cache_manager)?;
                Ok(Vec::new())
            }
            CntrlRequest::Chmod { path, mode } => {
                self.ss.chmod(path, *mode)?;
                Ok(Vec::new())
            }
            CntrlRequest::Stat { path } => {
                let mode = self.ss.stat(path)?;
                Ok(mode.to_be_bytes().to_vec())
            }
            CntrlRequest::Ping => Ok(Vec::new()),
            CntrlRequest::Reset | CntrlRequest::Shutdown => unreachable!("handled before run_cntrlop"),
        }
    }

    /// `reset` refuses if any transaction exists or any control op is
    /// blocked; otherwise flushes and invalidates the cache and
    /// truncates the TLOG (spec.md section 4.6).
    fn do_reset(&mut self) -> PiousResult<()> {
        if self.table.all_transids().next().is_some() || !self.blocked_ctrl.is_empty() {
            return Err(PiousError::EBusy);
        }
        self.cache_manager.flush(&mut self.ss)?;
        self.cache_manager.invalidate();
        self.ss.logtrunc()?;
        Ok(())
    }

    /// `shutdown`: EBUSY to outstanding blocked control ops, EABORT to
    /// blocked transactions, flush the cache, truncate the TLOG only
    /// if no prepared transaction remains, then mark the loop to exit
    /// once every transaction has drained (spec.md section 4.6).
    fn do_shutdown(&mut self) {
        self.shutting_down = true;
        for blocked in std::mem::take(&mut self.blocked_ctrl) {
            let _ = blocked
                .reply
                .send(CntrlReplyMsg { result_code: PiousError::EBusy.code(), payload: Vec::new() });
        }
        let blocked_trans: Vec<TransId> = self.table.blocked_in_order().to_vec();
        for transid in blocked_trans {
            if let Some(pending) = self.pending_ops.remove(&transid) {
                let _ = pending
                    .reply
                    .send(TransReplyMsg { result_code: PiousError::EAbort.code(), payload: Vec::new() });
            }
            self.lock_manager.rfree(transid);
            self.lock_manager.wfree(transid);
            self.table.remove(transid);
        }
        let _ = self.cache_manager.flush(&mut self.ss);
        let any_prepared = self.table.all_transids().any(|t| self.table.get(t).map_or(false, |e| e.prepared));
        if !any_prepared {
            let _ = self.ss.logtrunc();
        }
    }
}

fn ranges_overlap(a_start: u64, a_stop: u64, b_start: u64, b_stop: u64) -> bool {
    a_start <= b_stop && b_start <= a_stop
}

/// Works out `(fhandle, start, stop, kind)` for the lock a data op
/// needs. Only ever called on the five data-op variants; `Prepare`,
/// `Commit`, and `Abort` never reach here (callers branch on those
/// before asking for an extent).
fn extent_of(req: &TransRequest) -> (FHandle, u64, u64, LockKind) {
    match *req {
        TransRequest::Read { fhandle, offset, nbyte } => {
            (fhandle, offset, offset + nbyte.saturating_sub(1), LockKind::Read)
        }
        TransRequest::Write { fhandle, offset, ref data } => {
            (fhandle, offset, offset + (data.len() as u64).saturating_sub(1), LockKind::Write)
        }
        TransRequest::ReadSint { fhandle, index } => (fhandle, index * 8, index * 8 + 7, LockKind::Read),
        TransRequest::WriteSint { fhandle, index, .. } | TransRequest::FaSint { fhandle, index, .. } => {
            (fhandle, index * 8, index * 8 + 7, LockKind::Write)
        }
        TransRequest::Prepare | TransRequest::Commit | TransRequest::Abort => {
            unreachable!("extent_of called on a non-data op")
        }
    }
}
