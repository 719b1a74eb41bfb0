//! Line reading and command parsing for the client-facing wire protocol.
//! Reading is lenient in one specific way (see `read_line`); parsing never
//! fails — an unrecognized line just becomes [`Command::Unknown`].

use std::io::{self, Read};

/// One parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pickup,
    Hangup,
    /// `None` means the digits were missing or didn't parse; the dial
    /// target is then treated as unresolved (→ `Error` from `DialTone`).
    Dial(Option<i32>),
    Chat(String),
    Unknown,
}

/// Parses one line (CR LF already stripped) into a [`Command`].
pub fn parse_command(line: &str) -> Command {
    if line == "pickup" {
        Command::Pickup
    } else if line == "hangup" {
        Command::Hangup
    } else if line == "dial" {
        Command::Dial(None)
    } else if let Some(rest) = line.strip_prefix("dial ") {
        Command::Dial(rest.trim().parse::<i32>().ok())
    } else if line == "chat" {
        Command::Chat(String::new())
    } else if let Some(rest) = line.strip_prefix("chat ") {
        Command::Chat(rest.to_string())
    } else {
        Command::Unknown
    }
}

/// Reads one CR LF-terminated line from `reader`, returning `Ok(None)` on
/// clean EOF before any line completed.
///
/// A bare CR not followed by LF is not a line terminator: it and the byte
/// that follows it are kept as two literal payload bytes and reading
/// continues. This mirrors a lenience some PBX clients depend on and costs
/// nothing to preserve.
pub fn read_line<R: Read>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return Ok(None);
        }
        match byte[0] {
            b'\r' => {
                if reader.read(&mut byte)? == 0 {
                    return Ok(None);
                }
                if byte[0] == b'\n' {
                    return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
                }
                buf.push(b'\r');
                buf.push(byte[0]);
            }
            other => buf.push(other),
        }
    }
}
