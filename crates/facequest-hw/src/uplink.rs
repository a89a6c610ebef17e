//! micro:bit serial uplink.
//!
//! The micro:bit enumerates as a USB CDC serial device; result codes go
//! out as single uppercase words, one per line, and the firmware answers
//! with prefixed status lines (`BOOT:`, `ACK:`, `STATE:`, `ERR:`, `RX:`)
//! that are drained and logged. Losing the uplink never fails a flow —
//! the decision stands, delivery is best-effort.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;

use facequest_core::types::OutcomeCode;
use facequest_core::OutcomeSink;
use nix::sys::termios::{self, BaudRate, SetArg};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: String,
        source: nix::errno::Errno,
    },
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),
    #[error("write failed: {0}")]
    Write(std::io::Error),
}

/// A classified line received from the micro:bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxLine {
    Boot(String),
    Ack(String),
    State(String),
    Err(String),
    /// Echo of a line the firmware received from us.
    Saw(String),
    Other(String),
}

/// Classify a received line by its protocol prefix.
pub fn classify_rx_line(line: &str) -> RxLine {
    if let Some(rest) = line.strip_prefix("BOOT:") {
        RxLine::Boot(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("ACK:") {
        RxLine::Ack(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("STATE:") {
        RxLine::State(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("ERR:") {
        RxLine::Err(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("RX:") {
        RxLine::Saw(rest.to_string())
    } else {
        RxLine::Other(line.to_string())
    }
}

/// Log a received line at a level matching its kind.
pub fn log_rx_line(line: &str) {
    match classify_rx_line(line) {
        RxLine::Boot(msg) => tracing::info!(%msg, "micro:bit boot"),
        RxLine::Ack(msg) => tracing::info!(%msg, "micro:bit ack"),
        RxLine::State(msg) => tracing::info!(%msg, "micro:bit state"),
        RxLine::Err(msg) => tracing::warn!(%msg, "micro:bit error"),
        RxLine::Saw(msg) => tracing::debug!(%msg, "micro:bit echoed"),
        RxLine::Other(msg) => tracing::debug!(%msg, "micro:bit line"),
    }
}

fn baud_rate(baud: u32) -> Result<BaudRate, UplinkError> {
    match baud {
        9600 => Ok(BaudRate::B9600),
        19200 => Ok(BaudRate::B19200),
        38400 => Ok(BaudRate::B38400),
        57600 => Ok(BaudRate::B57600),
        115200 => Ok(BaudRate::B115200),
        other => Err(UplinkError::UnsupportedBaud(other)),
    }
}

/// Line-oriented serial link to the micro:bit.
pub struct Uplink {
    file: File,
    path: String,
    rx_buf: Vec<u8>,
}

impl Uplink {
    /// Open a tty device and configure it raw, 8N1, at `baud`.
    ///
    /// Non-blocking so the RX drain never stalls the caller.
    pub fn open(path: &str, baud: u32) -> Result<Self, UplinkError> {
        let rate = baud_rate(baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| UplinkError::Open {
                path: path.to_string(),
                source,
            })?;

        let mut tio = termios::tcgetattr(&file).map_err(|source| UplinkError::Configure {
            path: path.to_string(),
            source,
        })?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, rate).map_err(|source| UplinkError::Configure {
            path: path.to_string(),
            source,
        })?;
        termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(|source| {
            UplinkError::Configure {
                path: path.to_string(),
                source,
            }
        })?;

        tracing::info!(path, baud, "uplink opened");
        Ok(Self {
            file,
            path: path.to_string(),
            rx_buf: Vec::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send one line, appending the newline terminator.
    pub fn send_line(&mut self, line: &str) -> Result<(), UplinkError> {
        tracing::debug!(line, "uplink tx");
        self.file
            .write_all(format!("{line}\n").as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(UplinkError::Write)
    }

    /// Drain whatever the micro:bit has sent, returning complete lines.
    ///
    /// Never blocks; partial lines stay buffered until their terminator
    /// arrives.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut chunk = [0u8; 256];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.rx_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "uplink read failed");
                    break;
                }
            }
        }
        split_complete_lines(&mut self.rx_buf)
    }
}

impl OutcomeSink for Uplink {
    /// Best-effort relay: a failed send is logged and dropped, never
    /// propagated — the decision it reports has already been made.
    fn send(&mut self, code: OutcomeCode) {
        if let Err(e) = self.send_line(code.as_line()) {
            tracing::warn!(code = code.as_line(), error = %e, "uplink notify failed");
        }
    }
}

/// Remove and return complete `\n`-terminated lines from `buf`, leaving
/// any trailing partial line in place. `\r` is stripped.
fn split_complete_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\n', '\r'])
            .trim()
            .to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_protocol_prefixes() {
        assert_eq!(classify_rx_line("BOOT:v1"), RxLine::Boot("v1".into()));
        assert_eq!(classify_rx_line("ACK:MATCH"), RxLine::Ack("MATCH".into()));
        assert_eq!(classify_rx_line("STATE:locked"), RxLine::State("locked".into()));
        assert_eq!(classify_rx_line("ERR:oops"), RxLine::Err("oops".into()));
        assert_eq!(classify_rx_line("RX:TEST"), RxLine::Saw("TEST".into()));
        assert_eq!(classify_rx_line("hello"), RxLine::Other("hello".into()));
    }

    #[test]
    fn baud_mapping() {
        assert!(baud_rate(115200).is_ok());
        assert!(baud_rate(9600).is_ok());
        assert!(matches!(
            baud_rate(12345),
            Err(UplinkError::UnsupportedBaud(12345))
        ));
    }

    #[test]
    fn splits_complete_lines_and_keeps_partial() {
        let mut buf = b"ACK:ENROLLED\r\nSTATE:rea".to_vec();
        let lines = split_complete_lines(&mut buf);
        assert_eq!(lines, vec!["ACK:ENROLLED".to_string()]);
        assert_eq!(buf, b"STATE:rea".to_vec());

        buf.extend_from_slice(b"dy\n");
        let lines = split_complete_lines(&mut buf);
        assert_eq!(lines, vec!["STATE:ready".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut buf = b"\n\r\nACK:ok\n".to_vec();
        let lines = split_complete_lines(&mut buf);
        assert_eq!(lines, vec!["ACK:ok".to_string()]);
    }
}
