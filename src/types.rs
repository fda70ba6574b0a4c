//! Transaction identity and file-handle abstract types.
//!
//! Grounded on `pds_transidt.c` and `pds_fhandlet.h`. Both types are
//! small, `Copy`, and compared structurally; `TransId::assign` is the
//! sole source of transaction order within a process.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PiousError, PiousResult};

/// Globally unique transaction identity: `(host, pid, seconds,
/// microseconds)`. Ordered lexicographically; monotonic within a
/// process (`pds_transidt.c:transid_assign`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransId {
    pub hostid: u32,
    pub procid: u32,
    pub sec: i64,
    pub usec: i64,
}

impl PartialOrd for TransId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.hostid, self.procid, self.sec, self.usec).cmp(&(
            other.hostid,
            other.procid,
            other.sec,
            other.usec,
        ))
    }
}

/// Factory for unique, monotonically increasing transaction ids, one
/// per server process. Not `Send`/`Sync` on purpose: the dispatcher is
/// single-threaded and is the only caller (spec.md section 5).
pub struct TransIdFactory {
    hostid: u32,
    procid: u32,
    last: Option<(i64, i64)>,
}

impl TransIdFactory {
    pub fn new() -> PiousResult<Self> {
        let hostid = host_id()?;
        let procid = std::process::id();
        Ok(Self {
            hostid,
            procid,
            last: None,
        })
    }

    /// Assign the next transaction id. The first call simply reads the
    /// wall clock; every subsequent call busy-loops until the clock
    /// strictly exceeds the previously assigned `(sec, usec)` pair,
    /// exactly as `pds_transidt.c:transid_assign` does.
    pub fn assign(&mut self) -> TransId {
        let (sec, usec) = loop {
            let now = wall_clock();
            match self.last {
                Some(last) if now <= last => continue,
                _ => break now,
            }
        };
        self.last = Some((sec, usec));
        TransId {
            hostid: self.hostid,
            procid: self.procid,
            sec,
            usec,
        }
    }
}

fn wall_clock() -> (i64, i64) {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (dur.as_secs() as i64, dur.subsec_micros() as i64)
}

pub fn host_id() -> PiousResult<u32> {
    // SAFETY: gethostid(3) takes no arguments and cannot fail on Linux.
    let id = unsafe { libc::gethostid() };
    if id == -1 {
        return Err(PiousError::EUnxp);
    }
    Ok(id as u32)
}

/// Opaque identifier for a regular file on this server: `(dev, ino)`.
/// Obtained only through `lookup`; equality and hashing are
/// component-wise (`pds_fhandlet.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FHandle {
    pub dev: u64,
    pub ino: u64,
}

impl FHandle {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transid_strictly_increases() {
        let mut factory = TransIdFactory {
            hostid: 1,
            procid: 2,
            last: None,
        };
        let a = factory.assign();
        let b = factory.assign();
        assert!(b > a, "successive transaction ids must strictly increase");
    }

    #[test]
    fn transid_ordering_is_lexicographic() {
        let a = TransId {
            hostid: 1,
            procid: 1,
            sec: 5,
            usec: 999,
        };
        let b = TransId {
            hostid: 1,
            procid: 1,
            sec: 6,
            usec: 0,
        };
        assert!(a < b);
    }

    #[test]
    fn fhandle_equality_is_componentwise() {
        let a = FHandle::new(1, 2);
        let b = FHandle::new(1, 2);
        let c = FHandle::new(1, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
