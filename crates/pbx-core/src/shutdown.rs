//! Shutdown trigger plumbing. The actual drain — half-closing every socket
//! and waiting for the registry to empty — lives on [`crate::registry::Pbx`];
//! this module only owns the "has the external signal fired yet" question.

use std::io;

use signal_hook::consts::{SIGHUP, SIGINT};
use signal_hook::iterator::Signals;

/// Blocks the calling thread until SIGHUP or SIGINT arrives.
///
/// The source server treats SIGHUP as its documented shutdown trigger;
/// SIGINT is wired to the same path so an interactive `pbx-server` run
/// stops cleanly on Ctrl+C too. Using `signal_hook`'s blocking iterator
/// here, rather than a polled flag, avoids trading one busy-wait for
/// another now that the drain itself no longer busy-polls.
pub struct ShutdownSignal {
    signals: Signals,
}

impl ShutdownSignal {
    pub fn install() -> io::Result<Self> {
        let signals = Signals::new([SIGHUP, SIGINT])?;
        Ok(ShutdownSignal { signals })
    }

    /// Blocks until a registered signal arrives.
    pub fn wait(mut self) {
        if let Some(signal) = self.signals.forever().next() {
            tracing::info!(signal, "shutdown signal received");
        }
    }
}
