//! Error kinds for the few fallible operations the core exposes. Command
//! dispatch itself never fails — an invalid command just becomes a no-op or
//! an `Error` state transition, both handled inside `registry::Pbx`.

use std::fmt;

/// Failure modes for `Pbx::register`.
#[derive(Debug)]
pub enum RegistryError {
    /// No free slot; `MAX_EXTENSIONS` concurrent connections already registered.
    Full,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full => write!(f, "registry is full"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Failure modes that abort the server process entirely.
#[derive(Debug)]
pub enum ServerError {
    /// Could not bind the listening socket.
    Bind(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(e) => write!(f, "failed to bind listening socket: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(e) => Some(e),
        }
    }
}
