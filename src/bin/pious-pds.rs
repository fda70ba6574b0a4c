//! `pious-pds` binary: parses the command line, opens stable storage,
//! and runs the dispatcher and TCP front door until `shutdown`.
//!
//! Command line (spec.md section 6, SPEC_FULL.md section 6): a single
//! positional log directory argument, an optional listen-address
//! override, and `--force-truncate-log` to discard a non-empty TLOG
//! left over from an unclean shutdown (SPEC_FULL.md section 9, O1).
//! No other environment-variable or file-based configuration exists
//! for the data path; `RUST_LOG` controls log verbosity only.

use anyhow::{bail, Context, Error};

use pious_pds::config::ServerConfig;
use pious_pds::dispatcher::ServerState;

struct Args {
    log_dir: std::path::PathBuf,
    listen_addr: Option<String>,
    force_truncate_log: bool,
}

fn parse_args() -> Result<Args, Error> {
    let mut positionals = Vec::new();
    let mut force_truncate_log = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--force-truncate-log" => force_truncate_log = true,
            "-h" | "--help" => {
                println!("usage: pious-pds <log-dir> [listen-addr] [--force-truncate-log]");
                std::process::exit(0);
            }
            _ => positionals.push(arg),
        }
    }

    if positionals.is_empty() || positionals.len() > 2 {
        bail!("usage: pious-pds <log-dir> [listen-addr] [--force-truncate-log]");
    }

    let log_dir = std::path::PathBuf::from(&positionals[0]);
    let listen_addr = positionals.get(1).cloned();

    Ok(Args { log_dir, listen_addr, force_truncate_log })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let args = parse_args()?;

    let mut cfg = ServerConfig::new(args.log_dir);
    cfg.force_truncate_log = args.force_truncate_log;
    if let Some(addr) = args.listen_addr {
        cfg.listen_addr = addr;
    }

    if cfg.force_truncate_log {
        log::warn!("--force-truncate-log set: discarding any unreplayed transaction log");
    }

    let state = ServerState::new(&cfg).context("failed to open stable storage")?;

    let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::channel(256);
    let dispatcher = tokio::spawn(state.run(dispatch_rx));

    pious_pds::server::serve(&cfg.listen_addr, dispatch_tx)
        .await
        .context("server accept loop failed")?;

    dispatcher.await.context("dispatcher task panicked")?;
    Ok(())
}
