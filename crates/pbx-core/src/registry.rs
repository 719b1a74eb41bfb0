//! The registry of live TUs and the `Pbx` facade that performs every
//! operation spanning one or two of them.
//!
//! Two-TU operations (`dial`, `pickup`, `hangup`) are serialized by holding
//! the registry's own lock across the whole operation, per-TU locks taken
//! inside it. This totally orders every cross-TU transition server-wide,
//! which avoids the classic lock-ordering deadlock on symmetric peer
//! operations at the cost of some throughput — acceptable here since each
//! operation is a handful of field writes and a socket write, never a
//! blocking read.

use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::RegistryError;
use crate::tu::{State, Tu};

/// Compile-time bound on concurrently registered TUs.
pub const MAX_EXTENSIONS: usize = 64;

type Slots = Vec<Option<Arc<Tu>>>;

/// Shared PBX state: the registry plus a condition variable signaled
/// whenever a slot empties, used by the shutdown coordinator to wait for
/// every connection to drain without busy-polling.
pub struct Pbx {
    slots: Mutex<Slots>,
    drained: Condvar,
}

impl Default for Pbx {
    fn default() -> Self {
        Self::new()
    }
}

impl Pbx {
    pub fn new() -> Self {
        Pbx {
            slots: Mutex::new(vec![None; MAX_EXTENSIONS]),
            drained: Condvar::new(),
        }
    }

    /// Registers a newly accepted connection under `extension`, which the
    /// connection service chose (conventionally the socket's file
    /// descriptor — see the crate's external-interface notes). Finds the
    /// first free slot (index order), installs the TU `ON_HOOK`, and sends
    /// its `ON HOOK <extension>` notification before returning it.
    pub fn register(&self, extension: i32, writer: TcpStream) -> Result<Arc<Tu>, RegistryError> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::Full)?;

        let tu = Arc::new(Tu::new(extension, writer));
        {
            let mut inner = tu.inner.lock().unwrap();
            Tu::notify_locked(&mut inner, extension);
        }
        slots[idx] = Some(Arc::clone(&tu));
        tracing::debug!(extension, "registered");
        Ok(tu)
    }

    /// Removes `tu`'s slot, first forcing a hangup so any active peer is
    /// unpaired cleanly. No-op if `tu` isn't currently registered.
    pub fn unregister(&self, tu: &Arc<Tu>) {
        let mut slots = self.slots.lock().unwrap();
        hangup_locked(&slots, tu);
        if let Some(idx) = find_by_identity(&slots, tu) {
            slots[idx] = None;
            tracing::debug!(extension = tu.extension, "unregistered");
        }
        if slots.iter().all(Option::is_none) {
            self.drained.notify_all();
        }
    }

    /// `pickup`: `ON_HOOK` → `DIAL_TONE`, or `RINGING` → `CONNECTED` with
    /// the peer following `RING_BACK` → `CONNECTED`. Any other state
    /// re-emits its current notification.
    pub fn pickup(&self, tu: &Arc<Tu>) {
        let _slots = self.slots.lock().unwrap();
        let mut inner = tu.inner.lock().unwrap();
        match inner.state {
            State::OnHook => {
                inner.state = State::DialTone;
                Tu::notify_locked(&mut inner, tu.extension);
            }
            State::Ringing => {
                let peer = inner.peer.clone();
                inner.state = State::Connected;
                Tu::notify_locked(&mut inner, tu.extension);
                drop(inner);
                if let Some(peer) = peer {
                    let mut peer_inner = peer.inner.lock().unwrap();
                    peer_inner.state = State::Connected;
                    Tu::notify_locked(&mut peer_inner, peer.extension);
                }
            }
            _ => Tu::notify_locked(&mut inner, tu.extension),
        }
    }

    /// `hangup`, callable directly by a client command.
    pub fn hangup(&self, tu: &Arc<Tu>) {
        let slots = self.slots.lock().unwrap();
        hangup_locked(&slots, tu);
    }

    /// `dial(target)`. `target` is `None` when the client's argument was
    /// missing or non-numeric, which is treated the same as "not
    /// registered" (→ `Error`).
    pub fn dial(&self, tu: &Arc<Tu>, target: Option<i32>) {
        let slots = self.slots.lock().unwrap();
        let mut inner = tu.inner.lock().unwrap();

        if inner.state != State::DialTone {
            Tu::notify_locked(&mut inner, tu.extension);
            return;
        }

        let Some(target_ext) = target else {
            inner.state = State::Error;
            Tu::notify_locked(&mut inner, tu.extension);
            return;
        };

        if target_ext == tu.extension {
            inner.state = State::BusySignal;
            Tu::notify_locked(&mut inner, tu.extension);
            return;
        }

        let target_tu = slots
            .iter()
            .flatten()
            .find(|t| t.extension == target_ext)
            .cloned();

        let Some(target_tu) = target_tu else {
            inner.state = State::Error;
            Tu::notify_locked(&mut inner, tu.extension);
            return;
        };

        let mut target_inner = target_tu.inner.lock().unwrap();
        if target_inner.state != State::OnHook || target_inner.peer.is_some() {
            inner.state = State::BusySignal;
            Tu::notify_locked(&mut inner, tu.extension);
            return;
        }

        inner.peer = Some(Arc::clone(&target_tu));
        inner.state = State::RingBack;
        target_inner.peer = Some(Arc::clone(tu));
        target_inner.state = State::Ringing;
        Tu::notify_locked(&mut inner, tu.extension);
        Tu::notify_locked(&mut target_inner, target_tu.extension);
    }

    /// `chat(msg)`: delivers `CHAT <msg>` to the peer only while
    /// `Connected`; the initiator always gets its own (unchanged) state
    /// re-emitted, per the general notification post-condition.
    pub fn chat(&self, tu: &Arc<Tu>, msg: &str) {
        let _slots = self.slots.lock().unwrap();
        let mut inner = tu.inner.lock().unwrap();
        if inner.state == State::Connected {
            if let Some(peer) = inner.peer.clone() {
                let mut peer_inner = peer.inner.lock().unwrap();
                Tu::write_chat_locked(&mut peer_inner, msg);
            }
        }
        Tu::notify_locked(&mut inner, tu.extension);
    }

    /// Half-closes every registered TU's socket. Called once by the
    /// shutdown coordinator; does not itself wait for drain.
    pub fn shutdown_all(&self) {
        let slots = self.slots.lock().unwrap();
        for tu in slots.iter().flatten() {
            let inner = tu.inner.lock().unwrap();
            Tu::shutdown_locked(&inner);
        }
    }

    /// Blocks until every slot is empty.
    pub fn wait_drained(&self) {
        let slots = self.slots.lock().unwrap();
        let _guard = self
            .drained
            .wait_while(slots, |s| s.iter().any(Option::is_some))
            .unwrap();
    }

    #[cfg(test)]
    pub(crate) fn registered_count(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }
}

fn find_by_identity(slots: &Slots, tu: &Arc<Tu>) -> Option<usize> {
    slots
        .iter()
        .position(|slot| matches!(slot, Some(t) if Arc::ptr_eq(t, tu)))
}

/// Shared by `unregister` (which already holds `slots`) and `hangup` (which
/// takes it just for this call). Implements the `hangup` row of the
/// transition table for every starting state.
fn hangup_locked(slots: &MutexGuard<'_, Slots>, tu: &Arc<Tu>) {
    let _ = slots;
    let mut inner = tu.inner.lock().unwrap();
    let peer = inner.peer.take();
    let peer_next = match inner.state {
        State::Connected => Some(State::DialTone),
        State::Ringing => Some(State::DialTone),
        State::RingBack => Some(State::OnHook),
        _ => None,
    };
    inner.state = State::OnHook;
    Tu::notify_locked(&mut inner, tu.extension);
    drop(inner);

    if let (Some(peer), Some(peer_state)) = (peer, peer_next) {
        let mut peer_inner = peer.inner.lock().unwrap();
        peer_inner.peer = None;
        peer_inner.state = peer_state;
        Tu::notify_locked(&mut peer_inner, peer.extension);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_line;
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::os::fd::AsRawFd;

    /// Registers a fresh TU against `pbx` backed by a real loopback socket
    /// pair, returning the TU and a reader for the notifications sent to it.
    /// Consumes the automatic `ON HOOK <ext>` line registration sends.
    fn new_client(pbx: &Pbx) -> (Arc<Tu>, BufReader<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        let extension = server_side.as_raw_fd();
        let writer = server_side.try_clone().unwrap();
        let tu = pbx.register(extension, writer).unwrap();
        let mut reader = BufReader::new(client);
        assert_eq!(
            read_line(&mut reader).unwrap(),
            Some(format!("ON HOOK {extension}"))
        );
        (tu, reader)
    }

    fn expect(reader: &mut BufReader<TcpStream>, line: &str) {
        assert_eq!(read_line(reader).unwrap().as_deref(), Some(line));
    }

    #[test]
    fn scenario_self_dial() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");

        pbx.dial(&a, Some(a.extension));
        expect(&mut a_in, "BUSY SIGNAL");
    }

    #[test]
    fn scenario_unknown_extension() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");

        pbx.dial(&a, Some(a.extension + 9_000));
        expect(&mut a_in, "ERROR");

        pbx.hangup(&a);
        expect(&mut a_in, &format!("ON HOOK {}", a.extension));
    }

    #[test]
    fn scenario_normal_call_and_chat() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);
        let (b, mut b_in) = new_client(&pbx);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");

        pbx.dial(&a, Some(b.extension));
        expect(&mut a_in, "RING BACK");
        expect(&mut b_in, "RINGING");
        assert_eq!(a.peer_extension(), Some(b.extension));
        assert_eq!(b.peer_extension(), Some(a.extension));

        pbx.pickup(&b);
        expect(&mut b_in, &format!("CONNECTED {}", a.extension));
        expect(&mut a_in, &format!("CONNECTED {}", b.extension));

        pbx.chat(&a, "hello world");
        expect(&mut b_in, "CHAT hello world");
        expect(&mut a_in, &format!("CONNECTED {}", b.extension));

        pbx.hangup(&a);
        expect(&mut a_in, &format!("ON HOOK {}", a.extension));
        expect(&mut b_in, "DIAL TONE");
    }

    #[test]
    fn scenario_ring_back_abandonment() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);
        let (b, mut b_in) = new_client(&pbx);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");
        pbx.dial(&a, Some(b.extension));
        expect(&mut a_in, "RING BACK");
        expect(&mut b_in, "RINGING");

        pbx.hangup(&a);
        expect(&mut a_in, &format!("ON HOOK {}", a.extension));
        expect(&mut b_in, &format!("ON HOOK {}", b.extension));
    }

    #[test]
    fn scenario_dial_busy_peer() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);
        let (b, mut b_in) = new_client(&pbx);
        let (c, mut c_in) = new_client(&pbx);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");
        pbx.dial(&a, Some(b.extension));
        expect(&mut a_in, "RING BACK");
        expect(&mut b_in, "RINGING");
        pbx.pickup(&b);
        expect(&mut b_in, &format!("CONNECTED {}", a.extension));
        expect(&mut a_in, &format!("CONNECTED {}", b.extension));

        pbx.pickup(&c);
        expect(&mut c_in, "DIAL TONE");
        pbx.dial(&c, Some(b.extension));
        expect(&mut c_in, "BUSY SIGNAL");

        assert_eq!(a.state(), State::Connected);
        assert_eq!(b.state(), State::Connected);
    }

    #[test]
    fn scenario_shutdown_during_call() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);
        let (b, mut b_in) = new_client(&pbx);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");
        pbx.dial(&a, Some(b.extension));
        expect(&mut a_in, "RING BACK");
        expect(&mut b_in, "RINGING");
        pbx.pickup(&b);
        expect(&mut b_in, &format!("CONNECTED {}", a.extension));
        expect(&mut a_in, &format!("CONNECTED {}", b.extension));

        pbx.shutdown_all();
        assert_eq!(read_line(&mut a_in).unwrap(), None);
        assert_eq!(read_line(&mut b_in).unwrap(), None);

        pbx.unregister(&a);
        pbx.unregister(&b);
        pbx.wait_drained();
        assert_eq!(pbx.registered_count(), 0);
    }

    #[test]
    fn property_refcount_tracks_registration_and_pairing() {
        let pbx = Pbx::new();
        let (a, mut a_in) = new_client(&pbx);
        let (b, mut b_in) = new_client(&pbx);

        // self-borrow + registry slot
        assert_eq!(Arc::strong_count(&a), 2);

        pbx.pickup(&a);
        expect(&mut a_in, "DIAL TONE");
        pbx.dial(&a, Some(b.extension));
        expect(&mut a_in, "RING BACK");
        expect(&mut b_in, "RINGING");

        // self-borrow + registry slot + peer link
        assert_eq!(Arc::strong_count(&a), 3);
        assert_eq!(Arc::strong_count(&b), 3);

        pbx.hangup(&a);
        expect(&mut a_in, &format!("ON HOOK {}", a.extension));
        expect(&mut b_in, &format!("ON HOOK {}", b.extension));

        assert_eq!(Arc::strong_count(&a), 2);
        assert_eq!(Arc::strong_count(&b), 2);
    }

    #[test]
    fn registry_full_rejects_further_registration() {
        let pbx = Pbx::new();
        let mut clients = Vec::new();
        for _ in 0..MAX_EXTENSIONS {
            clients.push(new_client(&pbx));
        }

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        let extension = server_side.as_raw_fd();
        let writer = server_side.try_clone().unwrap();
        drop(client);

        assert!(matches!(
            pbx.register(extension, writer),
            Err(RegistryError::Full)
        ));
    }
}
