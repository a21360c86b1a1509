//! Line-oriented transport to a hardware load.
//!
//! Commands are written as ASCII lines terminated by LF and every query
//! answer is a single LF-terminated line. [`ScpiLink`] works over any byte
//! stream so the serial port can be swapped for an in-memory stream in tests.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::debug;

use crate::instrument::{InstrumentAdapter, InstrumentError};

pub struct ScpiLink<T> {
    io_handle: T,
    name: String,
    line_ending: &'static str,
    timeout: Duration,
    read_buf: Vec<u8>,
    closed: bool,
}

impl<T> ScpiLink<T>
where
    T: Read + Write,
{
    /// Wraps an open byte stream. `name` identifies the instrument in saved data.
    pub fn with(io_handle: T, name: &str, timeout: Duration) -> Self {
        Self {
            io_handle,
            name: name.to_string(),
            line_ending: "\n",
            timeout,
            read_buf: Vec::with_capacity(128),
            closed: false,
        }
    }

    /// Gives back the underlying stream.
    pub fn into_inner(self) -> T {
        self.io_handle
    }

    fn ensure_open(&self) -> Result<(), InstrumentError> {
        if self.closed {
            Err(InstrumentError::Communication(format!("link to {} is closed", self.name)))
        } else {
            Ok(())
        }
    }

    fn send(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.ensure_open()?;
        debug!("{} <- {}", self.name, command);
        let serialized = format!("{}{}", command.trim_end(), self.line_ending);
        self.io_handle.write_all(serialized.as_bytes())?;
        self.io_handle.flush()?;
        Ok(())
    }

    /// Returns the index of the first linefeed in the read buffer, if any.
    fn find_line_ending(&self) -> Option<usize> {
        self.read_buf.iter().position(|byte| *byte == b'\n')
    }

    /// Reads until a full line is buffered, then removes and returns it without
    /// its line ending.
    fn read_line(&mut self, command: &str) -> Result<String, InstrumentError> {
        let started = Instant::now();
        let mut chunk = [0u8; 64];

        let end_index = loop {
            if let Some(index) = self.find_line_ending() {
                break index;
            }
            if started.elapsed() >= self.timeout {
                return Err(InstrumentError::Timeout { command: command.to_string(), timeout: self.timeout });
            }

            match self.io_handle.read(&mut chunk) {
                Ok(0) => {
                    return Err(InstrumentError::Communication(format!(
                        "{} closed the connection while answering '{}'",
                        self.name, command
                    )))
                }
                Ok(bytes_read) => self.read_buf.extend_from_slice(&chunk[..bytes_read]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                    if started.elapsed() >= self.timeout {
                        return Err(InstrumentError::Timeout { command: command.to_string(), timeout: self.timeout });
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };

        let line: Vec<u8> = self.read_buf.drain(..=end_index).collect();
        let text = String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string();
        debug!("{} -> {}", self.name, text);
        Ok(text)
    }
}

impl<T> InstrumentAdapter for ScpiLink<T>
where
    T: Read + Write,
{
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.send(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.send(command)?;
        self.read_line(command)
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        if !self.closed {
            self.closed = true;
            self.read_buf.clear();
            self.io_handle.flush()?;
        }
        Ok(())
    }

    fn identity(&self) -> String {
        self.name.clone()
    }
}

/// Opens a serial port to a load. Reads poll in short slices so the query
/// timeout is enforced by [`ScpiLink`] itself.
pub fn open_serial(
    port_name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<ScpiLink<Box<dyn serialport::SerialPort>>, InstrumentError> {
    let port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()?;
    debug!("opened {} at {} baud", port_name, baud_rate);
    Ok(ScpiLink::with(port, port_name, timeout))
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, InstrumentError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // In-memory stand-in for a serial port: records what is written and
    // replays canned response bytes.
    #[derive(Default)]
    struct ScriptedPort {
        responses: VecDeque<u8>,
        written: Vec<u8>,
        eof: bool,
    }

    impl ScriptedPort {
        fn answering(responses: &str) -> Self {
            Self { responses: responses.bytes().collect(), ..Default::default() }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.responses.is_empty() {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            // hand out at most three bytes at a time to exercise reassembly
            let n = buf.len().min(3).min(self.responses.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.responses.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_are_newline_terminated() {
        let mut link = ScpiLink::with(ScriptedPort::default(), "test", Duration::from_millis(50));
        link.write("INPUT ON").unwrap();
        link.write("CURR 1.000\n").unwrap();
        assert_eq!(link.into_inner().written, b"INPUT ON\nCURR 1.000\n");
    }

    #[test]
    fn query_reassembles_split_lines() {
        let port = ScriptedPort::answering("12.345\r\nCURR\n");
        let mut link = ScpiLink::with(port, "test", Duration::from_millis(50));
        assert_eq!(link.query("MEAS:VOLT?").unwrap(), "12.345");
        assert_eq!(link.query("FUNC?").unwrap(), "CURR");
        assert_eq!(link.into_inner().written, b"MEAS:VOLT?\nFUNC?\n");
    }

    #[test]
    fn query_times_out_without_answer() {
        let mut link = ScpiLink::with(ScriptedPort::default(), "test", Duration::from_millis(20));
        let err = link.query("MEAS:CURR?").unwrap_err();
        assert!(matches!(err, InstrumentError::Timeout { ref command, .. } if command == "MEAS:CURR?"));
    }

    #[test]
    fn closed_connection_is_a_communication_error() {
        let port = ScriptedPort { eof: true, ..Default::default() };
        let mut link = ScpiLink::with(port, "test", Duration::from_millis(20));
        assert!(matches!(link.query("*IDN?"), Err(InstrumentError::Communication(_))));
    }

    #[test]
    fn closed_link_refuses_commands() {
        let mut link = ScpiLink::with(ScriptedPort::default(), "bench-load", Duration::from_millis(20));
        assert_eq!(link.identity(), "bench-load");
        link.close().unwrap();
        link.close().unwrap();
        assert!(matches!(link.write("INPUT OFF"), Err(InstrumentError::Communication(_))));
    }
}
