//! PIOUS parallel data server: a transactional, byte-range-locked
//! file server with a single-threaded cooperative dispatcher.
//!
//! See `SPEC_FULL.md` for the full component design; `DESIGN.md` for
//! how each module is grounded. Module layout mirrors the component
//! table: lock/cache/stable-storage/recovery/data managers each own
//! their slice of state, composed by `dispatcher::ServerState`.

pub mod cache_manager;
pub mod config;
pub mod data_manager;
pub mod dispatcher;
pub mod error;
pub mod lock_manager;
pub mod recovery_manager;
pub mod server;
pub mod stable_storage;
pub mod transport;
pub mod types;
pub mod wire;
