//! Stable storage manager: the only component that touches the local
//! file system. Owns the file-handle database (FHDB), the
//! write-ahead/intentions log (TLOG) written on its behalf by the
//! recovery manager, the PDS error log, and a pool of open file
//! descriptors (the file information cache, FIC).
//!
//! Grounded on `pds_sstorage_manager.c`/`.h`. Global state that the C
//! version keeps as three file-scope `int`s (`SS_fatalerror`,
//! `SS_recover`, `SS_checkpoint`) is kept as fields on
//! `StableStorageManager` instead, per REDESIGN FLAGS in spec.md --
//! there is exactly one instance per process, owned by `ServerState`,
//! so nothing is lost by making the scope explicit.

mod fhdb;
mod fic;

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::cache_manager::{CacheManager, FaultMode};
use crate::config::ServerConfig;
use crate::error::{PiousError, PiousResult};
use crate::lock_manager::LockManager;
use crate::types::{FHandle, TransId};

use fhdb::FhdbRecord;
use fic::FileInfoCache;

const DATA_DIR: &str = "data";

/// `pious_std.h` accessibility bits -- note these are a distinct bit
/// assignment from the POSIX `access(2)` flags used to compute them.
pub const PIOUS_R_OK: u32 = 0x01;
pub const PIOUS_W_OK: u32 = 0x02;
pub const PIOUS_X_OK: u32 = 0x04;

/// FHDB grows without bound as paths are created, unlinked, and
/// recreated; past this many bytes a lookup insert requests a
/// checkpoint compaction (SPEC_FULL.md section 9, O3) rather than
/// letting the backward scan degrade indefinitely.
const FHDB_CHECKPOINT_THRESHOLD: u64 = 64 * 1024;

fn access_mode_of(full: &Path) -> PiousResult<u32> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(full.as_os_str().as_bytes()).map_err(|_| PiousError::EInval)?;
    let mut amode = 0u32;
    // SAFETY: `c_path` is a valid NUL-terminated byte string for the
    // duration of each call; `access` performs no writes through it.
    unsafe {
        if libc::access(c_path.as_ptr(), libc::R_OK) == 0 {
            amode |= PIOUS_R_OK;
        }
        if libc::access(c_path.as_ptr(), libc::W_OK) == 0 {
            amode |= PIOUS_W_OK;
        }
        if libc::access(c_path.as_ptr(), libc::X_OK) == 0 {
            amode |= PIOUS_X_OK;
        }
    }
    Ok(amode)
}

/// `LOGDIR/PIOUS.DS.{TLOG,FHDB,ERRLOG}.<uid>.<hostid>`
/// (spec.md section 6, "Persisted state layout").
fn persisted_file_name(kind: &str) -> PiousResult<String> {
    let uid = unsafe { libc::getuid() };
    let hostid = crate::types::host_id()?;
    Ok(format!("PIOUS.DS.{}.{}.{}", kind, uid, hostid))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateFlag {
    NoCreat,
    Creat,
}

pub struct StableStorageManager {
    data_root: PathBuf,
    fhdb_path: PathBuf,
    fhdb_file: File,
    fhdb_end: u64,
    /// Warm path -> handle cache, populated on first cold lookup of
    /// each path and kept in sync with every `lookup`/`unlink`. The
    /// FHDB itself remains the durable source of truth; this is
    /// purely an optimization so repeated lookups do not re-scan.
    path_cache: std::collections::HashMap<String, FHandle>,
    fic: FileInfoCache,
    tlog_file: File,
    errlog_path: PathBuf,

    /// Fatal error occurred; PDS cannot continue (`SS_fatalerror`).
    pub fatal: bool,
    /// Recovery required before normal operation (`SS_recover`).
    pub recover_required: bool,
    /// Checkpoint required before normal operation (`SS_checkpoint`).
    pub checkpoint_required: bool,
    /// Counter for synthetic transaction ids minted to take a
    /// whole-file lock on behalf of a truncating `lookup`, never
    /// assigned to a real client (SPEC_FULL.md section 4, truncating
    /// lookup invariant).
    synth_ctr: i64,
}

impl StableStorageManager {
    /// `SS_init()`. Opens (creating if necessary) the FHDB, TLOG, and
    /// error log under `cfg.log_dir`, and the data directory that
    /// holds the regular files the server exposes.
    ///
    /// Implements SPEC_FULL.md section 9 (O1): if the TLOG is
    /// non-empty at startup, recovery replay would be required before
    /// normal operation; replay is out of scope (Non-goals), so this
    /// refuses to start with `ERecov` unless `cfg.force_truncate_log`
    /// is set, in which case the log is truncated and discarded.
    pub fn open(cfg: &ServerConfig) -> PiousResult<Self> {
        fs::create_dir_all(&cfg.log_dir).map_err(|e| PiousError::from_io_error(&e))?;
        let data_root = cfg.log_dir.join(DATA_DIR);
        fs::create_dir_all(&data_root).map_err(|e| PiousError::from_io_error(&e))?;

        let fhdb_path = cfg.log_dir.join(persisted_file_name("FHDB")?);
        let fhdb_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&fhdb_path)
            .map_err(|e| PiousError::from_io_error(&e))?;
        let fhdb_end = fhdb_file
            .metadata()
            .map_err(|e| PiousError::from_io_error(&e))?
            .len();

        let tlog_path = cfg.log_dir.join(persisted_file_name("TLOG")?);
        let tlog_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&tlog_path)
            .map_err(|e| PiousError::from_io_error(&e))?;
        let tlog_len = tlog_file
            .metadata()
            .map_err(|e| PiousError::from_io_error(&e))?
            .len();

        let mut recover_required = false;
        if tlog_len > 0 {
            if cfg.force_truncate_log {
                tlog_file.set_len(0).map_err(|e| PiousError::from_io_error(&e))?;
            } else {
                recover_required = true;
            }
        }

        let errlog_path = cfg.log_dir.join(persisted_file_name("ERRLOG")?);

        let mut ssm = Self {
            data_root,
            fhdb_path,
            fhdb_file,
            fhdb_end,
            path_cache: std::collections::HashMap::new(),
            fic: FileInfoCache::new(),
            tlog_file,
            errlog_path,
            fatal: false,
            recover_required,
            checkpoint_required: false,
            synth_ctr: 0,
        };

        if recover_required {
            ssm.errlog("recovery required: TLOG non-empty at startup").ok();
            return Err(PiousError::ERecov);
        }

        Ok(ssm)
    }

    fn resolve(&self, path: &str) -> PiousResult<PathBuf> {
        if path.is_empty() || path.starts_with('/') || path.contains("..") {
            return Err(PiousError::EInval);
        }
        Ok(self.data_root.join(path))
    }

    fn handle_of(meta: &fs::Metadata) -> FHandle {
        FHandle::new(meta.dev(), meta.ino())
    }

    fn record_mapping(&mut self, path: &str, fhandle: FHandle) -> PiousResult<()> {
        let new_end = fhdb::append(
            &self.fhdb_file,
            self.fhdb_end,
            &FhdbRecord {
                path: Some(path.to_string()),
                fhandle,
            },
        )
        .map_err(|e| PiousError::from_io_error(&e))?;
        self.fhdb_end = new_end;
        self.path_cache.insert(path.to_string(), fhandle);
        if self.fhdb_end > FHDB_CHECKPOINT_THRESHOLD {
            self.checkpoint_required = true;
        }
        Ok(())
    }

    /// Mints a transaction id that will never collide with a real
    /// client's: the hostid/procid pair is the sentinel `u32::MAX`,
    /// which `TransIdFactory` never assigns (it always uses the real
    /// host id and process id). Used only to take and immediately
    /// release a whole-file lock around a truncating `lookup`.
    fn next_synthetic_transid(&mut self) -> TransId {
        self.synth_ctr += 1;
        TransId {
            hostid: u32::MAX,
            procid: u32::MAX,
            sec: 0,
            usec: self.synth_ctr,
        }
    }

    /// `SS_lookup()`. `cflag == Creat` creates the file (and any
    /// missing immediate parent is NOT created -- a component of the
    /// path prefix must already exist, per spec.md "edge cases").
    /// `trunc` truncates an existing file to zero length; per the
    /// header's note, the caller (cache manager, via the data
    /// manager) is responsible for invalidating any cached blocks of
    /// a truncated file.
    pub fn lookup(
        &mut self,
        path: &str,
        cflag: CreateFlag,
        trunc: bool,
        mode: u32,
        lock_manager: &mut LockManager,
        cache_manager: &mut CacheManager,
    ) -> PiousResult<FHandle> {
        if let Some(&fh) = self.path_cache.get(path) {
            if trunc {
                self.truncate_by_handle(fh, lock_manager, cache_manager)?;
            }
            return Ok(fh);
        }

        if let Some(fh) =
            fhdb::scan_backwards(&self.fhdb_file, self.fhdb_end, path).map_err(|_| PiousError::EUnxp)?
        {
            self.path_cache.insert(path.to_string(), fh);
            if trunc {
                self.truncate_by_handle(fh, lock_manager, cache_manager)?;
            }
            return Ok(fh);
        }

        let full = self.resolve(path)?;
        let exists = full.exists();
        if !exists && cflag == CreateFlag::NoCreat {
            return Err(PiousError::ENoEnt);
        }

        let mut open_opts = OpenOptions::new();
        open_opts.read(true).write(true);
        if cflag == CreateFlag::Creat {
            open_opts.create(true);
        }
        if trunc {
            open_opts.truncate(true);
        }

        let file = open_opts.open(&full).map_err(|e| PiousError::from_io_error(&e))?;
        if !exists {
            let mut perms = file
                .metadata()
                .map_err(|e| PiousError::from_io_error(&e))?
                .permissions();
            perms.set_mode(mode & 0o777);
            file.set_permissions(perms).map_err(|e| PiousError::from_io_error(&e))?;
        }
        let meta = file.metadata().map_err(|e| PiousError::from_io_error(&e))?;
        if !meta.is_file() {
            return Err(PiousError::ENotReg);
        }
        let fh = Self::handle_of(&meta);

        let amode = access_mode_of(&full)?;
        self.fic.remember(fh, full, amode);
        self.record_mapping(path, fh)?;
        Ok(fh)
    }

    /// Truncating an existing file through `lookup` must not race a
    /// transaction that holds cached, now-stale blocks of that file:
    /// acquire an exclusive whole-file lock under a synthetic
    /// transaction id, perform the truncation, invalidate every cached
    /// block for the file, then release the lock (SPEC_FULL.md
    /// section 4). A conflicting holder yields `EBusy`, which
    /// `run_cntrlop`'s caller treats as "retry once unblocked", exactly
    /// like any other lock-bound control op.
    fn truncate_by_handle(
        &mut self,
        fhandle: FHandle,
        lock_manager: &mut LockManager,
        cache_manager: &mut CacheManager,
    ) -> PiousResult<()> {
        let synth = self.next_synthetic_transid();
        if lock_manager.wlock(synth, fhandle, 0, u64::MAX) == crate::lock_manager::Grant::Denied {
            return Err(PiousError::EBusy);
        }

        let result = (|| {
            self.ensure_fic(fhandle)?;
            let file = self.fic.get(fhandle).map_err(|e| PiousError::from_io_error(&e))?;
            file.set_len(0).map_err(|e| PiousError::from_io_error(&e))
        })();
        cache_manager.invalidate_file(fhandle);
        lock_manager.wfree(synth);
        result
    }

    /// Resolves a `fhandle` the in-process FIC has never seen (most
    /// notably a handle issued before a restart) by scanning the FHDB
    /// backwards for it (spec.md section 4.1, "Locate FIC slot
    /// (resolving through FHDB on miss)"). A no-op if the FIC already
    /// knows the handle.
    fn ensure_fic(&mut self, fhandle: FHandle) -> PiousResult<()> {
        if self.fic.contains(fhandle) {
            return Ok(());
        }
        let path = fhdb::scan_backwards_by_handle(&self.fhdb_file, self.fhdb_end, fhandle)
            .map_err(|_| PiousError::EUnxp)?
            .ok_or(PiousError::EBadF)?;
        let full = self.resolve(&path)?;
        let amode = access_mode_of(&full)?;
        self.fic.remember(fhandle, full, amode);
        self.path_cache.insert(path, fhandle);
        Ok(())
    }

    /// `SS_read()`: positioned read via `pread`-equivalent
    /// (`FileExt::read_at`), EINTR-safe and requiring no seek/lock
    /// dance (SPEC_FULL.md section 9, O5). Reads fewer than `buf.len()`
    /// bytes at EOF, matching POSIX `read` semantics.
    pub fn read(&mut self, fhandle: FHandle, offset: u64, buf: &mut [u8]) -> PiousResult<usize> {
        self.ensure_fic(fhandle)?;
        let file = self.fic.get(fhandle).map_err(|e| PiousError::from_io_error(&e))?;
        let mut total = 0;
        loop {
            match file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) => return Err(PiousError::from_io_error(&e)),
            }
        }
        Ok(total)
    }

    /// `SS_write()`. `faultmode` only affects the caller's durability
    /// contract (the cache manager decides whether to write-through
    /// immediately or buffer); at the SSM layer every write always
    /// lands on the real file via `pwrite`-equivalent
    /// (`FileExt::write_at`) -- there is nothing softer than that
    /// beneath the SSM.
    pub fn write(
        &mut self,
        fhandle: FHandle,
        offset: u64,
        data: &[u8],
        _faultmode: FaultMode,
    ) -> PiousResult<()> {
        self.ensure_fic(fhandle)?;
        let file = self.fic.get(fhandle).map_err(|e| PiousError::from_io_error(&e))?;
        file.write_all_at(data, offset).map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_faccess()`: the accessibility bits (`PIOUS_R_OK`/`PIOUS_W_OK`/
    /// `PIOUS_X_OK`) recorded for `fhandle` in the FIC, resolving
    /// through the FHDB first if this process has never seen the
    /// handle before.
    pub fn faccess(&mut self, fhandle: FHandle) -> PiousResult<u32> {
        self.ensure_fic(fhandle)?;
        self.fic.access_mode(fhandle).ok_or(PiousError::EBadF)
    }

    /// `SS_stat()`: the permission-mode bits of `path`, which need not
    /// have ever been looked up.
    pub fn stat(&self, path: &str) -> PiousResult<u32> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|e| PiousError::from_io_error(&e))?;
        Ok(meta.permissions().mode() & 0o777)
    }

    /// `SS_chmod()`.
    pub fn chmod(&mut self, path: &str, mode: u32) -> PiousResult<()> {
        let full = self.resolve(path)?;
        let mut perms = fs::metadata(&full).map_err(|e| PiousError::from_io_error(&e))?.permissions();
        perms.set_mode(mode & 0o777);
        fs::set_permissions(&full, perms).map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_unlink()`. SPEC_FULL.md section 9 (O2): unmap before delete
    /// -- a durable FHDB unmap record is appended and fsynced first,
    /// then the real file is removed, so a crash between the two
    /// leaves the FHDB correctly reporting the path as gone even
    /// though the inode briefly still exists on disk.
    pub fn unlink(
        &mut self,
        path: &str,
        lock_manager: &mut LockManager,
        cache_manager: &mut CacheManager,
    ) -> PiousResult<()> {
        let fhandle = self.lookup(path, CreateFlag::NoCreat, false, 0, lock_manager, cache_manager)?;

        let new_end = fhdb::append(
            &self.fhdb_file,
            self.fhdb_end,
            &FhdbRecord {
                path: None,
                fhandle,
            },
        )
        .map_err(|e| PiousError::from_io_error(&e))?;
        self.fhdb_file.sync_data().map_err(|e| PiousError::from_io_error(&e))?;
        self.fhdb_end = new_end;
        self.path_cache.remove(path);
        self.fic.forget(fhandle);

        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_mkdir()`.
    pub fn mkdir(&self, path: &str, mode: u32) -> PiousResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir(&full).map_err(|e| PiousError::from_io_error(&e))?;
        let mut perms = fs::metadata(&full).map_err(|e| PiousError::from_io_error(&e))?.permissions();
        perms.set_mode(mode & 0o777);
        fs::set_permissions(&full, perms).map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_rmdir()`.
    pub fn rmdir(&self, path: &str) -> PiousResult<()> {
        let full = self.resolve(path)?;
        fs::remove_dir(&full).map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_logwrite()`: append an intentions-list record to the TLOG
    /// on behalf of the recovery manager. The RM decides record
    /// framing; the SSM only guarantees the bytes land at the current
    /// end of file.
    pub fn logwrite(&mut self, record: &[u8]) -> PiousResult<u64> {
        let offset = self
            .tlog_file
            .metadata()
            .map_err(|e| PiousError::from_io_error(&e))?
            .len();
        self.tlog_file
            .write_all_at(record, offset)
            .map_err(|e| PiousError::from_io_error(&e))?;
        Ok(offset)
    }

    /// `SS_logread()`: read `len` bytes back from the TLOG at `offset`.
    pub fn logread(&self, offset: u64, len: usize) -> PiousResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.tlog_file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| PiousError::from_io_error(&e))?;
        Ok(buf)
    }

    /// Rewrite a single already-written region of the TLOG in place.
    /// Used by the recovery manager to flip a transaction's
    /// committement state byte without rewriting the whole record.
    pub fn write_log_byte(&mut self, offset: u64, byte: &[u8]) -> PiousResult<()> {
        self.tlog_file
            .write_all_at(byte, offset)
            .map_err(|e| PiousError::from_io_error(&e))?;
        self.tlog_file.sync_data().map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_logsync()`: force the TLOG to stable storage. Must be
    /// called before a transaction is considered prepared
    /// (spec.md section 4.4, invariant I4).
    pub fn logsync(&self) -> PiousResult<()> {
        self.tlog_file.sync_data().map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_logtrunc()`: discard the TLOG once every transaction it
    /// describes has reached a durable outcome.
    pub fn logtrunc(&mut self) -> PiousResult<()> {
        self.tlog_file.set_len(0).map_err(|e| PiousError::from_io_error(&e))
    }

    /// `SS_errlog()`: append a human-readable line to the PDS error
    /// log. Best-effort: if the error log itself cannot be written,
    /// there is nowhere left to report that failure, so it is
    /// swallowed here and the caller's original error still
    /// propagates.
    pub fn errlog(&self, message: &str) -> PiousResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.errlog_path)
            .map_err(|e| PiousError::from_io_error(&e))?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        writeln!(file, "[{}.{:06}] {}", now.as_secs(), now.subsec_micros(), message)
            .map_err(|e| PiousError::from_io_error(&e))
    }

    /// Compacts the FHDB in place, discarding superseded mappings and
    /// unmap records, keeping only the latest live mapping per path
    /// (SPEC_FULL.md section 9, O3). Safe to call at any quiescent
    /// point since it only touches FHDB bookkeeping, never regular
    /// file data.
    pub fn checkpoint(&mut self) -> PiousResult<()> {
        let live: Vec<(String, FHandle)> =
            self.path_cache.iter().map(|(p, fh)| (p.clone(), *fh)).collect();

        let checkpoint_name = format!(
            "{}.new",
            self.fhdb_path.file_name().unwrap().to_string_lossy()
        );
        let checkpoint_path = self.fhdb_path.with_file_name(checkpoint_name);
        let new_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&checkpoint_path)
            .map_err(|e| PiousError::from_io_error(&e))?;

        let mut end = 0u64;
        for (path, fh) in &live {
            end = fhdb::append(
                &new_file,
                end,
                &FhdbRecord {
                    path: Some(path.clone()),
                    fhandle: *fh,
                },
            )
            .map_err(|e| PiousError::from_io_error(&e))?;
        }
        new_file.sync_all().map_err(|e| PiousError::from_io_error(&e))?;

        fs::rename(&checkpoint_path, &self.fhdb_path).map_err(|e| PiousError::from_io_error(&e))?;

        self.fhdb_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.fhdb_path)
            .map_err(|e| PiousError::from_io_error(&e))?;
        self.fhdb_end = end;
        self.checkpoint_required = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_manager::CacheManager;
    use crate::lock_manager::LockManager;

    fn tmp_cfg() -> (ServerConfig, PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("pious-ssm-test-{}-{:?}", std::process::id(), std::time::Instant::now()));
        (
            ServerConfig {
                log_dir: dir.clone(),
                ..ServerConfig::default_for_tests()
            },
            dir,
        )
    }

    fn tid(usec: i64) -> crate::types::TransId {
        crate::types::TransId { hostid: 1, procid: 1, sec: 0, usec }
    }

    #[test]
    fn lookup_create_then_read_write_round_trip() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh = ss.lookup("a.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
        ss.write(fh, 0, b"hello world", FaultMode::Stable).unwrap();
        let mut buf = vec![0u8; 11];
        let n = ss.read(fh, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn lookup_without_creat_on_missing_file_is_enoent() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let err = ss
            .lookup("missing.dat", CreateFlag::NoCreat, false, 0, &mut lm, &mut cm)
            .unwrap_err();
        assert_eq!(err, PiousError::ENoEnt);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unlink_then_lookup_nocreat_is_enoent() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        ss.lookup("b.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
        ss.unlink("b.dat", &mut lm, &mut cm).unwrap();
        let err = ss
            .lookup("b.dat", CreateFlag::NoCreat, false, 0, &mut lm, &mut cm)
            .unwrap_err();
        assert_eq!(err, PiousError::ENoEnt);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn path_is_stable_across_reopen_via_fhdb() {
        let (cfg, dir) = tmp_cfg();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh1 = {
            let mut ss = StableStorageManager::open(&cfg).unwrap();
            ss.lookup("c.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap()
        };
        let fh2 = {
            let mut ss = StableStorageManager::open(&cfg).unwrap();
            ss.lookup("c.dat", CreateFlag::NoCreat, false, 0, &mut lm, &mut cm).unwrap()
        };
        assert_eq!(fh1, fh2);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn truncating_lookup_takes_whole_file_lock_and_invalidates_cache() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh = ss.lookup("d.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
        ss.write(fh, 0, b"stale-data", FaultMode::Stable).unwrap();
        cm.read(&mut ss, fh, 0, 10, &mut [0u8; 10]).unwrap(); // warms the cache

        ss.lookup("d.dat", CreateFlag::NoCreat, true, 0, &mut lm, &mut cm).unwrap();
        let mut buf = [0xffu8; 10];
        let n = cm.read(&mut ss, fh, 0, 10, &mut buf).unwrap();
        assert_eq!(n, 0, "truncated file has nothing left to read");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn truncating_lookup_denied_by_conflicting_holder_is_ebusy() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh = ss.lookup("e.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
        assert_eq!(
            lm.wlock(tid(1), fh, 0, 4),
            crate::lock_manager::Grant::Granted,
        );

        let err = ss
            .lookup("e.dat", CreateFlag::NoCreat, true, 0, &mut lm, &mut cm)
            .unwrap_err();
        assert_eq!(err, PiousError::EBusy);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stat_reports_permission_bits_not_size() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh = ss.lookup("f.dat", CreateFlag::Creat, false, 0o640, &mut lm, &mut cm).unwrap();
        ss.write(fh, 0, b"some bytes", FaultMode::Stable).unwrap();
        assert_eq!(ss.stat("f.dat").unwrap(), 0o640);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn chmod_then_stat_round_trips_new_mode() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        ss.lookup("g.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
        ss.chmod("g.dat", 0o420).unwrap();
        assert_eq!(ss.stat("g.dat").unwrap(), 0o420);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn faccess_reports_the_mode_recorded_at_lookup() {
        let (cfg, dir) = tmp_cfg();
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh = ss.lookup("h.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
        let amode = ss.faccess(fh).unwrap();
        assert_eq!(amode & PIOUS_R_OK, PIOUS_R_OK);
        assert_eq!(amode & PIOUS_W_OK, PIOUS_W_OK);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fic_miss_resolves_handle_through_fhdb() {
        let (cfg, dir) = tmp_cfg();
        let mut lm = LockManager::new();
        let mut cm = CacheManager::new(cfg.cache_sz, cfg.dblk_sz);
        let fh = {
            let mut ss = StableStorageManager::open(&cfg).unwrap();
            let fh = ss.lookup("i.dat", CreateFlag::Creat, false, 0o600, &mut lm, &mut cm).unwrap();
            ss.write(fh, 0, b"persisted", FaultMode::Stable).unwrap();
            fh
        };

        // fresh SSM instance: its in-process FIC has never seen `fh`.
        let mut ss = StableStorageManager::open(&cfg).unwrap();
        let mut buf = vec![0u8; 9];
        let n = ss.read(fh, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"persisted");
        fs::remove_dir_all(&dir).ok();
    }
}
