//! The telephone unit: one per connected client, holding its state, its
//! peer link (if any), and the socket its notifications are written to.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// The seven states a TU can occupy. `Error` is terminal until `hangup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    OnHook,
    Ringing,
    DialTone,
    RingBack,
    BusySignal,
    Connected,
    Error,
}

impl State {
    /// Renders the CR LF-terminated notification line for this state.
    /// `extension` is this TU's own identifier; `peer_extension` is only
    /// consulted for `Connected`, where it is always present.
    fn notification(self, extension: i32, peer_extension: Option<i32>) -> String {
        match self {
            State::OnHook => format!("ON HOOK {extension}"),
            State::Ringing => "RINGING".to_string(),
            State::DialTone => "DIAL TONE".to_string(),
            State::RingBack => "RING BACK".to_string(),
            State::BusySignal => "BUSY SIGNAL".to_string(),
            State::Connected => format!(
                "CONNECTED {}",
                peer_extension.expect("a Connected TU always has a peer")
            ),
            State::Error => "ERROR".to_string(),
        }
    }
}

/// Fields protected by a TU's own lock: state, peer link, and the socket
/// half notifications are written to. Grouped behind one `Mutex` so a
/// notification is always written atomically with the transition that
/// produced it.
pub(crate) struct TuInner {
    pub(crate) state: State,
    pub(crate) peer: Option<Arc<Tu>>,
    writer: TcpStream,
}

/// A telephone unit. `extension` is assigned once at registration and never
/// changes; everything else lives behind `inner`.
pub struct Tu {
    pub extension: i32,
    pub(crate) inner: Mutex<TuInner>,
}

impl Tu {
    pub(crate) fn new(extension: i32, writer: TcpStream) -> Self {
        Tu {
            extension,
            inner: Mutex::new(TuInner {
                state: State::OnHook,
                peer: None,
                writer,
            }),
        }
    }

    /// This TU's current state. Only used by callers outside the registry
    /// (tests, diagnostics) that don't need the atomicity a held lock gives.
    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    /// Extension of the peer this TU is currently paired with, if any.
    pub fn peer_extension(&self) -> Option<i32> {
        self.inner.lock().unwrap().peer.as_ref().map(|p| p.extension)
    }

    /// Writes `inner.state`'s notification line to this TU's socket. Caller
    /// must already hold `inner`'s lock (hence taking `&mut TuInner` rather
    /// than `&self`) so the write lands atomically with the state change
    /// that preceded it.
    pub(crate) fn notify_locked(inner: &mut TuInner, extension: i32) {
        let peer_extension = inner.peer.as_ref().map(|p| p.extension);
        let line = inner.state.notification(extension, peer_extension);
        let _ = write_line(&mut inner.writer, &line);
    }

    /// Writes a `CHAT <msg>` line to this TU's socket. Caller holds `inner`.
    pub(crate) fn write_chat_locked(inner: &mut TuInner, msg: &str) {
        let _ = write_line(&mut inner.writer, &format!("CHAT {msg}"));
    }

    /// Half-closes the underlying socket in both directions. The service
    /// thread's next blocking read then observes EOF. Caller holds `inner`.
    pub(crate) fn shutdown_locked(inner: &TuInner) {
        let _ = inner.writer.shutdown(std::net::Shutdown::Both);
    }
}

fn write_line(writer: &mut TcpStream, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")
}

impl Drop for Tu {
    fn drop(&mut self) {
        tracing::debug!(extension = self.extension, "tu destroyed");
    }
}
