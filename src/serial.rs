//! Serial ingress: the [`LineSource`] seam, the production implementation on
//! the `serialport` crate, and a scripted double for tests.

use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

use crate::error::BridgeError;

/// A source of newline-delimited text lines.
///
/// The bridge loop only ever talks to this trait, which keeps the loop
/// testable without hardware: production uses [`SerialLineSource`], tests
/// use [`ScriptedLineSource`].
pub trait LineSource {
    /// Whether at least one unread byte (or a buffered complete line) is
    /// available right now. Never blocks.
    fn data_ready(&mut self) -> Result<bool, BridgeError>;

    /// Read the next complete line, delimiter included, decoded as text.
    ///
    /// Returns `Ok(None)` when no complete line is available yet; a partial
    /// line stays buffered for a later call. Never busy-waits past the
    /// port's read timeout.
    fn next_line(&mut self) -> Result<Option<String>, BridgeError>;
}

/// Line-oriented reader over a real serial port.
///
/// Owns the port handle exclusively; the OS handle is released when this
/// struct drops, on every exit path.
pub struct SerialLineSource {
    port: Box<dyn serialport::SerialPort>,
    /// Bytes received but not yet terminated by a newline.
    pending: Vec<u8>,
}

impl SerialLineSource {
    /// Open `path` at `baud_rate` with a bounded read timeout.
    ///
    /// # Errors
    /// Returns [`BridgeError::Open`] when the port cannot be opened. This is
    /// the bridge's one fatal error.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, BridgeError> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| BridgeError::Open {
                port: path.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    /// Split one complete line (through the `\n`) off the pending buffer.
    fn take_buffered_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn unread_bytes(&self) -> Result<u32, BridgeError> {
        self.port.bytes_to_read().map_err(|e| BridgeError::Read {
            detail: e.to_string(),
        })
    }
}

impl LineSource for SerialLineSource {
    fn data_ready(&mut self) -> Result<bool, BridgeError> {
        if self.pending.contains(&b'\n') {
            return Ok(true);
        }
        Ok(self.unread_bytes()? > 0)
    }

    fn next_line(&mut self) -> Result<Option<String>, BridgeError> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            let mut chunk = [0u8; 256];
            match self.port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    // Drained everything available without hitting a
                    // delimiter: leave the partial line buffered.
                    if !self.pending.contains(&b'\n') && self.unread_bytes()? == 0 {
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => {
                    return Err(BridgeError::Read {
                        detail: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Replays a fixed sequence of lines, for exercising the bridge loop in
/// tests without a device on the other end.
#[derive(Debug, Default)]
pub struct ScriptedLineSource {
    lines: VecDeque<String>,
}

impl ScriptedLineSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// True once every scripted line has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.lines.is_empty()
    }
}

impl LineSource for ScriptedLineSource {
    fn data_ready(&mut self) -> Result<bool, BridgeError> {
        Ok(!self.lines.is_empty())
    }

    fn next_line(&mut self) -> Result<Option<String>, BridgeError> {
        Ok(self.lines.pop_front())
    }
}

/// Enumerate the serial ports visible to the OS, by name.
///
/// # Errors
/// Returns [`BridgeError::Read`] when the platform enumeration itself fails.
pub fn list_ports() -> Result<Vec<String>, BridgeError> {
    let ports = serialport::available_ports().map_err(|e| BridgeError::Read {
        detail: e.to_string(),
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_yields_lines_in_order() {
        let mut source = ScriptedLineSource::new(["first\n", "second\n"]);
        assert!(source.data_ready().unwrap());
        assert_eq!(source.next_line().unwrap().as_deref(), Some("first\n"));
        assert_eq!(source.next_line().unwrap().as_deref(), Some("second\n"));
        assert_eq!(source.next_line().unwrap(), None);
    }

    #[test]
    fn scripted_source_not_ready_when_exhausted() {
        let mut source = ScriptedLineSource::new(["only\n"]);
        let _ = source.next_line().unwrap();
        assert!(!source.data_ready().unwrap());
        assert!(source.is_exhausted());
    }

    #[test]
    fn scripted_source_empty_script_is_exhausted() {
        let mut source = ScriptedLineSource::new(Vec::<String>::new());
        assert!(source.is_exhausted());
        assert!(!source.data_ready().unwrap());
        assert_eq!(source.next_line().unwrap(), None);
    }
}
