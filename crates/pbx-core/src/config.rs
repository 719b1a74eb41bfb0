//! Server configuration. Kept tiny and explicit rather than routed through
//! a config-file crate: the only required setting is the listening port,
//! and the spec fixes everything else (`MAX_EXTENSIONS`) at compile time.

/// Built by the binary from its `clap`-derived CLI arguments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}
