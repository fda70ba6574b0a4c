//! File-handle database: an append-only on-disk log mapping pathnames
//! to opaque file handles, read backwards on a cold lookup.
//!
//! Grounded on `pds_sstorage_manager.c`'s FHDB record handling and
//! spec.md section 6's record layout: a variable-length path
//! concatenated with a fixed 9-word trailer
//! `[ones, pathlen, ones, dev, ino, ones, 0, 0, 0]`. The guard words
//! (`ones`) and the three trailing zero words (the end-of-record
//! marker) let the backward scanner tolerate corruption of at most the
//! last record, per spec.md section 4.1.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::error::{PiousError, PiousResult};
use crate::types::FHandle;

const WORD: usize = 8;
const TRAILER_WORDS: usize = 9;
const TRAILER_LEN: u64 = (WORD * TRAILER_WORDS) as u64;
const ONES: u64 = u64::MAX;

/// A decoded FHDB record. `path == None` denotes an *unmapping* (the
/// file named by a prior record was deleted).
#[derive(Debug, Clone)]
pub struct FhdbRecord {
    pub path: Option<String>,
    pub fhandle: FHandle,
}

fn encode_trailer(pathlen: u64, fhandle: FHandle) -> [u8; TRAILER_LEN as usize] {
    let words = [
        ONES,
        pathlen,
        ONES,
        fhandle.dev,
        fhandle.ino,
        ONES,
        0,
        0,
        0,
    ];
    let mut out = [0u8; TRAILER_LEN as usize];
    for (i, w) in words.iter().enumerate() {
        out[i * WORD..(i + 1) * WORD].copy_from_slice(&w.to_be_bytes());
    }
    out
}

/// Append one record (mapping or unmap) to the FHDB file, returning
/// the new end-of-file offset. The caller is responsible for fsyncing
/// when durability is required (checkpoints and unmaps do; routine
/// `lookup` inserts do not need to, since a lost tail record is simply
/// re-discovered via `lookup` at next use -- it is advisory cache
/// state, not committed transaction data).
pub fn append(file: &File, end: u64, record: &FhdbRecord) -> io::Result<u64> {
    let path_bytes = record.path.as_deref().unwrap_or("").as_bytes();
    let pathlen = path_bytes.len() as u64;
    let trailer = encode_trailer(pathlen, record.fhandle);

    file.write_at(path_bytes, end)?;
    file.write_at(&trailer, end + pathlen)?;
    Ok(end + pathlen + TRAILER_LEN)
}

fn read_u64_be(file: &File, offset: u64) -> io::Result<u64> {
    let mut buf = [0u8; WORD];
    file.read_exact_at(&mut buf, offset)?;
    Ok(u64::from_be_bytes(buf))
}

/// Parse the record whose trailer ends at `end`. Returns `None` (and
/// leaves `end` advanced past a presumed-corrupt tail) if the guard
/// words don't match the canonical pattern -- this is what lets the
/// scanner tolerate corruption of the final, possibly torn, record.
fn read_record_ending_at(file: &File, end: u64) -> io::Result<Option<(FhdbRecord, u64)>> {
    if end < TRAILER_LEN {
        return Ok(None);
    }
    let trailer_start = end - TRAILER_LEN;
    let mut words = [0u64; TRAILER_WORDS];
    for i in 0..TRAILER_WORDS {
        words[i] = read_u64_be(file, trailer_start + (i * WORD) as u64)?;
    }

    let canonical = words[0] == ONES && words[2] == ONES && words[5] == ONES
        && words[6] == 0 && words[7] == 0 && words[8] == 0;
    if !canonical {
        return Ok(None);
    }

    let pathlen = words[1];
    if pathlen > trailer_start {
        return Ok(None);
    }
    let path_start = trailer_start - pathlen;
    let fhandle = FHandle::new(words[3], words[4]);

    let path = if pathlen == 0 {
        None
    } else {
        let mut buf = vec![0u8; pathlen as usize];
        file.read_exact_at(&mut buf, path_start)?;
        match String::from_utf8(buf) {
            Ok(s) => Some(s),
            Err(_) => return Ok(None),
        }
    };

    Ok(Some((FhdbRecord { path, fhandle }, path_start)))
}

/// Cold lookup: scan the FHDB backwards in fixed-record strides until
/// a record for `target_path` is found or the file is exhausted
/// (spec.md section 4.1, "FHDB read algorithm"). A terminal unmap
/// record for the path yields `ENOENT` semantics (the caller treats
/// this as file-not-found), modeled here by returning `Ok(None)`.
pub fn scan_backwards(file: &File, end_of_file: u64, target_path: &str) -> PiousResult<Option<FHandle>> {
    let mut cursor = end_of_file;
    while cursor >= TRAILER_LEN {
        let parsed = read_record_ending_at(file, cursor).map_err(|e| PiousError::from_io_error(&e))?;
        let (record, record_start) = match parsed {
            Some(v) => v,
            // canonical pattern mismatch: tolerate by dropping exactly one
            // trailing byte and retrying, bounding the corruption window
            // to the last record as spec.md section 4.1 requires.
            None => {
                cursor -= 1;
                continue;
            }
        };

        if record.path.as_deref() == Some(target_path) {
            return Ok(Some(record.fhandle));
        }
        cursor = record_start;
    }
    Ok(None)
}

/// Reverse cold lookup: scan the FHDB backwards for the most recent
/// record naming `target`, regardless of path, returning the live path
/// it currently maps to. Needed when a client presents an `FHandle`
/// this process has never seen in its in-memory FIC -- most notably
/// after a restart, since handles outlive the process that issued them
/// (spec.md section 4.1, "Locate FIC slot (resolving through FHDB on
/// miss)"). `Ok(None)` covers both "never mapped" and "most recent
/// record is an unmap", which the caller treats identically (`ENOENT`).
pub fn scan_backwards_by_handle(file: &File, end_of_file: u64, target: FHandle) -> PiousResult<Option<String>> {
    let mut cursor = end_of_file;
    while cursor >= TRAILER_LEN {
        let parsed = read_record_ending_at(file, cursor).map_err(|e| PiousError::from_io_error(&e))?;
        let (record, record_start) = match parsed {
            Some(v) => v,
            None => {
                cursor -= 1;
                continue;
            }
        };

        if record.fhandle == target {
            return Ok(record.path);
        }
        cursor = record_start;
    }
    Ok(None)
}
