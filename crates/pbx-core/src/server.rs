//! The two pieces `spec.md` calls out-of-scope for the state machine proper
//! but still part of the system: the accept loop and the per-connection
//! read/dispatch loop. Thread-per-connection, blocking reads, no async
//! runtime — each connection's whole lifetime fits on one OS thread.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::protocol::{parse_command, read_line, Command};
use crate::registry::Pbx;
use crate::shutdown::ShutdownSignal;

/// Binds the listening socket and runs the server until the shutdown
/// signal fires and every connection has drained. Returns once shutdown is
/// complete; never returns `Ok` any other way.
pub fn run(pbx: Arc<Pbx>, config: &ServerConfig, signal: ShutdownSignal) -> Result<(), ServerError> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).map_err(ServerError::Bind)?;
    tracing::info!(port = config.port, "listening");

    // The coordinator runs for the life of the process: once the shutdown
    // signal arrives it drains every connection and exits the process
    // directly, rather than trying to unblock the accept loop's blocking
    // `accept()` call from the outside.
    let coordinator_pbx = Arc::clone(&pbx);
    thread::spawn(move || {
        signal.wait();
        coordinator_pbx.shutdown_all();
        coordinator_pbx.wait_drained();
        tracing::info!("all connections drained, exiting");
        std::process::exit(0);
    });

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, "accept failed");
                continue;
            }
        };
        let pbx = Arc::clone(&pbx);
        thread::spawn(move || serve_connection(pbx, stream));
    }

    Ok(())
}

/// Owns one accepted socket's whole lifetime: register, read-dispatch loop,
/// unregister.
fn serve_connection(pbx: Arc<Pbx>, stream: TcpStream) {
    let extension = stream.as_raw_fd();
    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            tracing::warn!(extension, %err, "failed to clone accepted socket");
            return;
        }
    };

    let tu = match pbx.register(extension, writer) {
        Ok(tu) => tu,
        Err(_full) => {
            tracing::warn!(extension, "registry full, rejecting connection");
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return;
        }
    };

    let mut reader = BufReader::new(stream);
    loop {
        match read_line(&mut reader) {
            Ok(Some(line)) => match parse_command(&line) {
                Command::Pickup => pbx.pickup(&tu),
                Command::Hangup => pbx.hangup(&tu),
                Command::Dial(target) => pbx.dial(&tu, target),
                Command::Chat(msg) => pbx.chat(&tu, &msg),
                Command::Unknown => {}
            },
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(extension, %err, "connection read error");
                break;
            }
        }
    }

    pbx.unregister(&tu);
    tracing::debug!(extension, "connection service thread exiting");
}
