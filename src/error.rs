//! Error types shared by the codec, the TAP backends, the bridge engine and the SVF player.
use alloc::string::String;

use thiserror::Error;

/// A transaction frame field could not be encoded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unknown command opcode {0:#x}")]
    UnknownOpcode(u32),

    #[error("address {0:#x} does not fit in 32 bits")]
    AddressOutOfRange(u64),

    #[error("data {0:#x} does not fit in 32 bits")]
    DataOutOfRange(u64),
}

/// Failure to bring up a TAP backend's transport.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The native adapter library could not be loaded or refused to enumerate.
    #[error("JTAG adapter driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("no JTAG adapter matching {0:?} was found")]
    DeviceNotFound(String),

    #[error("adapter {0:?} cannot drive JTAG")]
    UnsupportedDevice(String),

    #[cfg(feature = "std")]
    #[error("adapter configuration failed")]
    Adapter(#[source] libftd2xx::TimeoutError),

    /// Socket refused, timed out, or the session setup commands failed.
    #[cfg(feature = "std")]
    #[error("transport error")]
    Transport(#[source] std::io::Error),
}

#[cfg(feature = "std")]
impl From<libftd2xx::TimeoutError> for ConnectError {
    fn from(err: libftd2xx::TimeoutError) -> Self {
        ConnectError::Adapter(err)
    }
}

#[cfg(feature = "std")]
impl From<libftd2xx::FtStatus> for ConnectError {
    fn from(status: libftd2xx::FtStatus) -> Self {
        ConnectError::Adapter(status.into())
    }
}

/// A register shift could not be completed.
#[derive(Debug, Error)]
pub enum ShiftError {
    #[error("backend is not connected")]
    NotConnected,

    #[error("cannot shift {0} bits (supported: 1..={max})", max = crate::backend::MAX_SHIFT_BITS)]
    InvalidLength(usize),

    #[cfg(feature = "std")]
    #[error("adapter transfer failed")]
    Adapter(#[from] libftd2xx::TimeoutError),

    /// The session is unusable after this and has to be reconnected.
    #[cfg(feature = "std")]
    #[error("transport failed mid-shift")]
    Transport(#[from] std::io::Error),
}

/// Errors raised by [`Bridge`](crate::bridge::Bridge) operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Shift(#[from] ShiftError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("invalid bridge configuration: {0}")]
    Config(&'static str),

    #[error("read returned status {actual:#x}, expected {expected:#x}")]
    UnexpectedStatus { expected: u32, actual: u32 },

    #[error("read back {actual:#010x}, expected {expected:#010x} (mask {mask:#x})")]
    Mismatch { expected: u32, actual: u32, mask: u32 },
}

/// What was wrong with an SVF line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unrecognised statement {0:?}")]
    UnknownStatement(String),

    #[error("unexpected text after ';': {0:?}")]
    TrailingText(String),

    #[error("missing or malformed bit length")]
    BadLength,

    #[error("bit length {0} is not supported (1..=128)")]
    UnsupportedLength(usize),

    #[error("malformed hex literal {0:?}")]
    BadHex(String),

    #[error("value does not fit in {0} bits")]
    ValueTooWide(usize),

    #[error("no TDI value given and none to reuse")]
    MissingTdi,

    #[error("missing or malformed cycle count")]
    BadCycles,

    #[error("RUNTEST in seconds is not supported")]
    UnsupportedTiming,
}

/// An SVF line that could not be parsed, with its 1-based line number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

/// Replay of an SVF script stopped.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("line {line}: shift failed")]
    Shift {
        line: usize,
        #[source]
        source: ShiftError,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl PlayError {
    /// Line of the statement that stopped the replay.
    pub fn line(&self) -> usize {
        match self {
            PlayError::Shift { line, .. } => *line,
            PlayError::Parse(err) => err.line,
        }
    }
}
