//! Server configuration.
//!
//! Grounded on the teacher's `config.rs`/`buildcfg.rs` split between
//! compiled-in defaults and a thin runtime struct; this server takes
//! no environment-variable or file-based configuration for the
//! data/protocol path (SPEC_FULL.md section 2), so there is no config
//! file parser here -- only the CLI in `bin/pious-pds.rs` and these
//! defaults.

use std::path::PathBuf;

/// Default block size used by the cache manager and, transitively, by
/// `FA_CONTIG`/`FA_SINT` strided transfers (spec.md section 3).
pub const DEFAULT_DBLK_SZ: usize = 8192;

/// Default slot count for the segmented-LRU block cache.
pub const DEFAULT_CACHE_SZ: usize = 256;

/// Default transaction dead-time, in seconds, before the dispatcher's
/// idle-transaction sweep considers a transaction abandoned
/// (spec.md section 4.6).
pub const DEFAULT_T_DEAD_SECS: u64 = 300;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8420";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the FHDB, TLOG, and error log files
    /// (spec.md section 6 "Persisted state layout").
    pub log_dir: PathBuf,
    pub cache_sz: usize,
    pub dblk_sz: usize,
    pub t_dead_secs: u64,
    pub listen_addr: String,
    /// Refuse to start unless the TLOG is empty, per SPEC_FULL.md
    /// section 9 (O1), unless explicitly overridden.
    pub force_truncate_log: bool,
}

impl ServerConfig {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            cache_sz: DEFAULT_CACHE_SZ,
            dblk_sz: DEFAULT_DBLK_SZ,
            t_dead_secs: DEFAULT_T_DEAD_SECS,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            force_truncate_log: false,
        }
    }

    /// A small cache/block size profile for unit and integration
    /// tests -- large enough to exercise multi-block ranges without
    /// the runtime cost of the production defaults.
    pub fn default_for_tests() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            cache_sz: 16,
            dblk_sz: 64,
            t_dead_secs: DEFAULT_T_DEAD_SECS,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            force_truncate_log: false,
        }
    }
}
