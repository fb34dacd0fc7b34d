//! Transports that can shift bits through a JTAG TAP.  Each implementation owns exactly one
//! transport handle, so one backend value is one exclusive session with the target.
//!
//! Callers never see TAP states: every shift starts and ends in Run-Test/Idle.
use alloc::boxed::Box;
#[cfg(feature = "std")]
use alloc::vec::Vec;

use crate::error::{ConnectError, ShiftError};

#[cfg(feature = "std")]
pub mod mpsse;
#[cfg(feature = "std")]
pub mod openocd;

/// Widest single shift a backend accepts.
pub const MAX_SHIFT_BITS: usize = 128;

pub trait TapBackend {
    /// Bring up the transport.  Connecting an already connected backend does nothing.
    fn connect(&mut self) -> Result<(), ConnectError>;
    /// Release the transport.  Safe to call at any time, including when already disconnected.
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    /// Shift the low `bits` bits of `value` into the instruction register, LSB first.
    fn shift_instruction_register(&mut self, value: u128, bits: usize) -> Result<(), ShiftError>;
    /// Shift the low `bits` bits of `value` into the data register, LSB first, and return the
    /// bits captured on TDO at the same time.  Bit 0 of the result is the first bit out.
    fn shift_data_register(&mut self, value: u128, bits: usize) -> Result<u128, ShiftError>;
    /// Force Test-Logic-Reset and settle in Run-Test/Idle.
    fn reset_tap(&mut self) -> Result<(), ShiftError>;
}

impl<T: TapBackend + ?Sized> TapBackend for &mut T {
    fn connect(&mut self) -> Result<(), ConnectError> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn shift_instruction_register(&mut self, value: u128, bits: usize) -> Result<(), ShiftError> {
        (**self).shift_instruction_register(value, bits)
    }

    fn shift_data_register(&mut self, value: u128, bits: usize) -> Result<u128, ShiftError> {
        (**self).shift_data_register(value, bits)
    }

    fn reset_tap(&mut self) -> Result<(), ShiftError> {
        (**self).reset_tap()
    }
}

impl<T: TapBackend + ?Sized> TapBackend for Box<T> {
    fn connect(&mut self) -> Result<(), ConnectError> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn shift_instruction_register(&mut self, value: u128, bits: usize) -> Result<(), ShiftError> {
        (**self).shift_instruction_register(value, bits)
    }

    fn shift_data_register(&mut self, value: u128, bits: usize) -> Result<u128, ShiftError> {
        (**self).shift_data_register(value, bits)
    }

    fn reset_tap(&mut self) -> Result<(), ShiftError> {
        (**self).reset_tap()
    }
}

#[cfg(feature = "std")]
pub(crate) fn check_length(bits: usize) -> Result<(), ShiftError> {
    if bits == 0 || bits > MAX_SHIFT_BITS {
        return Err(ShiftError::InvalidLength(bits));
    }
    Ok(())
}

/// All ones in the low `bits` bits.
pub(crate) fn low_mask(bits: usize) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Split the low `bits` bits of `value` into bytes, least significant byte first.  Bits of the
/// last byte above `bits` are zero.
#[cfg(feature = "std")]
pub(crate) fn to_lsb_bytes(value: u128, bits: usize) -> Vec<u8> {
    let value = value & low_mask(bits);
    value.to_le_bytes()[..(bits + 7) / 8].to_vec()
}

/// Inverse of `to_lsb_bytes`; bits beyond `bits` are ignored.
#[cfg(feature = "std")]
pub(crate) fn from_lsb_bytes(bytes: &[u8], bits: usize) -> u128 {
    let mut buf = [0; 16];
    let len = bytes.len().min(16);
    buf[..len].copy_from_slice(&bytes[..len]);
    u128::from_le_bytes(buf) & low_mask(bits)
}
