//! # pbx-server — A simulated private branch exchange
//!
//! This binary is the thin shell around [`pbx_core`]: it parses arguments,
//! sets up logging, installs the shutdown signal handler, and hands off to
//! [`pbx_core::server::run`].
//!
//! ## How it works at a high level
//!
//! 1. **Start the server** (`pbx-server -p 7000`), which binds a TCP
//!    listener on the given port.
//! 2. Every accepted connection becomes a "telephone unit" (TU) with its
//!    own extension, able to `pickup`, `hangup`, `dial <ext>`, and
//!    `chat <message>` against other connected clients.
//! 3. A SIGHUP (or Ctrl+C/SIGINT) tells the server to stop accepting new
//!    work, half-close every live connection, and exit once they've all
//!    drained.
//!
//! ## Architecture overview
//!
//! Unlike an async service, this server is **thread-per-connection**: one
//! OS thread blocks in `accept()`, and one more thread per client blocks on
//! that client's socket reads. There is no async runtime here — the state
//! machine in [`pbx_core::registry`] is small and short-lived enough per
//! operation that blocking threads plus ordinary `Mutex`es are the simpler
//! and more transparent fit.
//!
//! ## Key Rust concepts used
//!
//! - **`#[derive(Parser)]`**: generates an argument parser from a struct
//!   definition at compile time.
//! - **`Arc<Pbx>`**: shared ownership of the registry across the accept
//!   thread, every connection thread, and the shutdown coordinator thread.
//! - **`thread::spawn`**: the server's entire concurrency model — no
//!   `.await`, no executor, just OS threads and blocking I/O.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use pbx_core::registry::Pbx;
use pbx_core::shutdown::ShutdownSignal;
use pbx_core::ServerConfig;

// ═════════════════════════════════════════════════════════════════════════
// CLI — command-line arguments
// ═════════════════════════════════════════════════════════════════════════

/// `#[derive(Parser)]` tells `clap` to generate argument-parsing code
/// automatically from this struct's fields.
#[derive(Parser)]
#[command(name = "pbx-server", about = "A simulated private branch exchange")]
struct Args {
    /// TCP port to listen on
    #[arg(short = 'p', long = "port")]
    port: u16,

    /// Write logs to this file in addition to stderr
    #[arg(long = "log-file")]
    log_file: Option<std::path::PathBuf>,

    /// Increase log verbosity (equivalent to RUST_LOG=debug)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

// ═════════════════════════════════════════════════════════════════════════
// Main — parses arguments, wires up logging and signals, runs the server
// ═════════════════════════════════════════════════════════════════════════

fn main() -> ExitCode {
    let args = Args::parse();

    // Keep the file-appender guard alive for the process's whole lifetime;
    // dropping it would stop flushing buffered log lines to disk.
    let _log_guard = init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let signal = ShutdownSignal::install().context("failed to install shutdown signal handler")?;
    let config = ServerConfig { port: args.port };
    let pbx = Arc::new(Pbx::new());

    pbx_core::server::run(pbx, &config, signal).context("server loop failed")
}

fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match &args.log_file {
        Some(path) => {
            let file_appender = tracing_appender::rolling::never(
                path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("pbx-server.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            fmt().with_env_filter(filter).with_writer(non_blocking).init();
            Some(guard)
        }
        None => {
            fmt().with_env_filter(filter).init();
            None
        }
    }
}
