//! PIOUS error taxonomy.
//!
//! Mirrors `pious_errno.h`: every wire-visible outcome is a small,
//! fixed, negative integer. `PIOUS_OK` and `PIOUS_READONLY` are the only
//! non-negative completion codes and are modeled as `Ok` variants of
//! the call sites that can produce them, not as `PiousError` members.

use thiserror::Error;

/// Successful completion, no special condition.
pub const PIOUS_OK: i32 = 0;
/// Vote to commit a read-only transaction (`pious_errno.h`):
/// `prepare` of a transaction that never wrote returns this instead
/// of `PIOUS_OK`, telling the caller no `commit` is required.
pub const PIOUS_READONLY: i32 = 1;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PiousError {
    #[error("path search permission or access mode denied")]
    EAccess,
    #[error("bad file handle/descriptor")]
    EBadF,
    #[error("resource currently unavailable for use")]
    EBusy,
    #[error("file exists")]
    EExist,
    #[error("file size exceeds system constraints")]
    EFbig,
    #[error("invalid argument")]
    EInval,
    #[error("file is not a regular file")]
    ENotReg,
    #[error("insufficient system resources for operation")]
    EInsuf,
    #[error("path or path component name is too long")]
    ENameTooLong,
    #[error("no such file or directory")]
    ENoEnt,
    #[error("no space left on device")]
    ENoSpc,
    #[error("a component of the path prefix is not a dir")]
    ENotDir,
    #[error("directory not empty")]
    ENotEmpty,
    #[error("path specifies a directory entry")]
    EIsDir,
    #[error("operation not permitted")]
    EPerm,
    #[error("attempted improper link to external file system")]
    EXdev,
    #[error("function timed-out prior to completion")]
    ETimeout,
    #[error("transaction operation or 2PC protocol error")]
    EProto,
    #[error("information not written to log file")]
    ENotLog,
    #[error("invalid transport source/destination address")]
    ESrcDest,
    #[error("error condition in underlying transport system")]
    ETPort,
    #[error("transaction operation aborted")]
    EAbort,
    #[error("unexpected error condition encountered")]
    EUnxp,
    #[error("check-point required")]
    EChckpt,
    #[error("failure recovery required")]
    ERecov,
    #[error("fatal error occured; check error log")]
    EFatal,
}

impl PiousError {
    /// The fixed negative wire code, matching `pious_errno.h` exactly.
    pub const fn code(self) -> i32 {
        match self {
            PiousError::EAccess => -2,
            PiousError::EBadF => -3,
            PiousError::EBusy => -4,
            PiousError::EExist => -5,
            PiousError::EFbig => -6,
            PiousError::EInval => -7,
            PiousError::ENotReg => -8,
            PiousError::EInsuf => -9,
            PiousError::ENameTooLong => -10,
            PiousError::ENoEnt => -11,
            PiousError::ENoSpc => -12,
            PiousError::ENotDir => -13,
            PiousError::ENotEmpty => -14,
            PiousError::EIsDir => -15,
            PiousError::EPerm => -16,
            PiousError::EXdev => -17,
            PiousError::ETimeout => -90,
            PiousError::EProto => -91,
            PiousError::ENotLog => -92,
            PiousError::ESrcDest => -93,
            PiousError::ETPort => -94,
            PiousError::EAbort => -95,
            PiousError::EUnxp => -96,
            PiousError::EChckpt => -97,
            PiousError::ERecov => -98,
            PiousError::EFatal => -99,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        use PiousError::*;
        Some(match code {
            -2 => EAccess,
            -3 => EBadF,
            -4 => EBusy,
            -5 => EExist,
            -6 => EFbig,
            -7 => EInval,
            -8 => ENotReg,
            -9 => EInsuf,
            -10 => ENameTooLong,
            -11 => ENoEnt,
            -12 => ENoSpc,
            -13 => ENotDir,
            -14 => ENotEmpty,
            -15 => EIsDir,
            -16 => EPerm,
            -17 => EXdev,
            -90 => ETimeout,
            -91 => EProto,
            -92 => ENotLog,
            -93 => ESrcDest,
            -94 => ETPort,
            -95 => EAbort,
            -96 => EUnxp,
            -97 => EChckpt,
            -98 => ERecov,
            -99 => EFatal,
            _ => return None,
        })
    }

    /// `ERECOV`/`ECHCKPT` always escalate to `EFATAL` at the dispatcher:
    /// recovery replay and checkpoint compaction-on-demand are both out
    /// of scope (spec.md Non-goals), so there is nowhere else for these
    /// to go. See SPEC_FULL.md section 7.
    pub fn escalates_to_fatal(self) -> bool {
        matches!(self, PiousError::ERecov | PiousError::EChckpt)
    }

    /// Maps a subset of `std::io::ErrorKind` onto PIOUS codes for SSM
    /// operations that wrap `std::fs`/`FileExt` calls.
    pub fn from_io_error(err: &std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => PiousError::ENoEnt,
            PermissionDenied => PiousError::EAccess,
            AlreadyExists => PiousError::EExist,
            _ => match err.raw_os_error() {
                Some(libc::ENOSPC) => PiousError::ENoSpc,
                Some(libc::ENAMETOOLONG) => PiousError::ENameTooLong,
                Some(libc::ENOTDIR) => PiousError::ENotDir,
                Some(libc::EISDIR) => PiousError::EIsDir,
                Some(libc::ENOTEMPTY) => PiousError::ENotEmpty,
                Some(libc::EXDEV) => PiousError::EXdev,
                Some(libc::EMFILE) | Some(libc::ENFILE) => PiousError::EInsuf,
                _ => PiousError::EUnxp,
            },
        }
    }
}

pub type PiousResult<T> = Result<T, PiousError>;
