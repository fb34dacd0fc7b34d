//! Remote session backend: drives a TAP through an OpenOCD TCL server.
//!
//! Every command is one line of text and is answered with one line.  Only a handful of commands
//! are used:
//!
//! ```text
//! jtag newtap <chip> <tap> -irlen <n>
//! init
//! irscan <chip>.<tap> 0x<hex>
//! drscan <chip>.<tap> <bits> 0x<hex>     -> <hex>
//! pathmove RESET IDLE
//! ```
use std::format;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::string::{String, ToString};
use std::time::Duration;
use std::vec::Vec;

use log::{debug, info, trace, warn};

use crate::backend::{check_length, low_mask, TapBackend};
use crate::error::{ConnectError, ShiftError};

/// Line terminator of OpenOCD's own TCL port (6666).
pub const OPENOCD_TCL_TERMINATOR: u8 = 0x1a;

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub chip: String,
    pub tap: String,
    /// Instruction register length given to `jtag newtap`.
    pub ir_length: u8,
    /// Bound on connecting and on waiting for each reply.
    pub timeout: Duration,
    /// Byte that ends every command and every reply.
    pub terminator: u8,
    /// Declare the tap on connect.  Turn off when the server's own config already does.
    pub declare_tap: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6666,
            chip: "chip".to_string(),
            tap: "tap".to_string(),
            ir_length: 6,
            timeout: Duration::from_secs(5),
            terminator: b'\n',
            declare_tap: true,
        }
    }
}

impl RemoteConfig {
    /// `<chip>.<tap>`, the name OpenOCD knows the tap by.
    pub fn dotted_name(&self) -> String {
        format!("{}.{}", self.chip, self.tap)
    }
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Session {
    fn open(config: &RemoteConfig) -> io::Result<Self> {
        let mut last_err = None;
        for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.timeout))?;
                    stream.set_write_timeout(Some(config.timeout))?;
                    stream.set_nodelay(true)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    return Ok(Self { reader, writer: stream });
                }
                Err(err) => {
                    debug!("connect to {} failed: {}", addr, err);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", config.host))
        }))
    }

    fn exchange(&mut self, command: &str, terminator: u8) -> io::Result<String> {
        let mut message = Vec::with_capacity(command.len() + 1);
        message.extend_from_slice(command.as_bytes());
        message.push(terminator);
        self.writer.write_all(&message)?;
        self.writer.flush()?;

        let mut reply = Vec::new();
        self.reader.read_until(terminator, &mut reply)?;
        if reply.last() != Some(&terminator) {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection"));
        }
        reply.pop();
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }
}

pub struct OpenOcdBackend {
    config: RemoteConfig,
    session: Option<Session>,
}

impl OpenOcdBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config, session: None }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Send one command and wait for its reply.  Any I/O failure ends the session, since a late
    /// reply would otherwise be taken as the answer to the next command.
    fn command(&mut self, command: &str) -> io::Result<String> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        trace!("openocd <- {}", command);
        match session.exchange(command, self.config.terminator) {
            Ok(reply) => {
                trace!("openocd -> {}", reply);
                Ok(reply)
            }
            Err(err) => {
                warn!("openocd command {:?} failed: {}", command, err);
                self.session = None;
                Err(err)
            }
        }
    }

    fn scan_command(&mut self, command: &str) -> Result<String, ShiftError> {
        if self.session.is_none() {
            return Err(ShiftError::NotConnected);
        }
        Ok(self.command(command)?)
    }

    fn setup(&mut self) -> io::Result<()> {
        if self.config.declare_tap {
            let declare = format!(
                "jtag newtap {} {} -irlen {}",
                self.config.chip, self.config.tap, self.config.ir_length
            );
            self.command(&declare)?;
        }
        self.command("init")?;
        Ok(())
    }
}

impl TapBackend for OpenOcdBackend {
    fn connect(&mut self) -> Result<(), ConnectError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = Session::open(&self.config).map_err(ConnectError::Transport)?;
        self.session = Some(session);
        if let Err(err) = self.setup() {
            self.session = None;
            return Err(ConnectError::Transport(err));
        }
        info!("connected to OpenOCD at {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!("disconnected from OpenOCD at {}:{}", self.config.host, self.config.port);
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn shift_instruction_register(&mut self, value: u128, bits: usize) -> Result<(), ShiftError> {
        check_length(bits)?;
        let command = format!("irscan {} {}", self.config.dotted_name(), hex_operand(value, bits));
        debug!("shift IR {:#x} ({} bits)", value, bits);
        self.scan_command(&command)?;
        Ok(())
    }

    fn shift_data_register(&mut self, value: u128, bits: usize) -> Result<u128, ShiftError> {
        check_length(bits)?;
        let command = format!(
            "drscan {} {} {}",
            self.config.dotted_name(),
            bits,
            hex_operand(value, bits)
        );
        debug!("shift DR {:#x} ({} bits)", value, bits);
        let reply = self.scan_command(&command)?;
        let captured = match parse_scan_reply(&reply) {
            Some(captured) => captured & low_mask(bits),
            None => {
                warn!("no hex value in drscan reply {:?}, using 0", reply);
                0
            }
        };
        debug!("captured DR {:#x}", captured);
        Ok(captured)
    }

    fn reset_tap(&mut self) -> Result<(), ShiftError> {
        debug!("reset TAP");
        self.scan_command("pathmove RESET IDLE")?;
        Ok(())
    }
}

impl Drop for OpenOcdBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// `0x`-prefixed hex, zero padded to a whole number of nibbles for `bits`.
fn hex_operand(value: u128, bits: usize) -> String {
    format!("0x{:0width$x}", value & low_mask(bits), width = (bits + 3) / 4)
}

/// First token of a reply as hex, with or without `0x`.
fn parse_scan_reply(reply: &str) -> Option<u128> {
    let token = reply.split_whitespace().next()?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u128::from_str_radix(digits, 16).ok()
}
