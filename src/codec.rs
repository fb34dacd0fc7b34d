//! Encoding of bridge transactions into the USER1 data register.
//!
//! The bridge's data register is 96 bits wide and is decoded combinatorially by the FPGA, so the
//! layout here has to stay bit-exact:
//!
//! | bits   | field     |
//! |--------|-----------|
//! | 0-31   | `command` |
//! | 32-63  | `address` |
//! | 64-95  | `data`    |
//!
//! On the way back the `command` field carries the status of the previous transaction.
use core::fmt;

use crate::error::EncodingError;

/// Width of a transaction frame in bits.
pub const FRAME_BITS: usize = 96;

const FIELD_MASK: u128 = 0xffff_ffff;
const ADDRESS_SHIFT: u32 = 32;
const DATA_SHIFT: u32 = 64;

/// Command placed in the `command` field of a frame.  New commands get new values; existing
/// values are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Nop = 0,
    Write = 1,
    Read = 2,
}

impl TryFrom<u32> for Opcode {
    type Error = EncodingError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Nop),
            1 => Ok(Opcode::Write),
            2 => Ok(Opcode::Read),
            other => Err(EncodingError::UnknownOpcode(other)),
        }
    }
}

/// One 96-bit transaction frame, bit 0 is the first bit shifted into the data register.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame(u128);

impl Frame {
    /// Wrap bits captured from the data register.  Anything above bit 95 is dropped.
    pub fn from_bits(bits: u128) -> Self {
        Frame(bits & ((1u128 << FRAME_BITS) - 1))
    }

    pub fn bits(&self) -> u128 {
        self.0
    }

    pub fn command(&self) -> u32 {
        (self.0 & FIELD_MASK) as u32
    }

    pub fn address(&self) -> u32 {
        ((self.0 >> ADDRESS_SHIFT) & FIELD_MASK) as u32
    }

    pub fn data(&self) -> u32 {
        ((self.0 >> DATA_SHIFT) & FIELD_MASK) as u32
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("command", &format_args!("{:#x}", self.command()))
            .field("address", &format_args!("{:#010x}", self.address()))
            .field("data", &format_args!("{:#010x}", self.data()))
            .finish()
    }
}

/// Build the frame for `opcode` at `address` carrying `data`.  Address and data are taken as
/// `u64` so that values that don't fit the 32-bit fields are reported instead of truncated.
pub fn pack(opcode: Opcode, address: u64, data: u64) -> Result<Frame, EncodingError> {
    let address = u32::try_from(address).map_err(|_| EncodingError::AddressOutOfRange(address))?;
    let data = u32::try_from(data).map_err(|_| EncodingError::DataOutOfRange(data))?;

    Ok(Frame(
        (data as u128) << DATA_SHIFT | (address as u128) << ADDRESS_SHIFT | opcode as u32 as u128,
    ))
}

/// Like [`pack`], for an opcode that has not been validated yet.
pub fn pack_raw(opcode: u32, address: u64, data: u64) -> Result<Frame, EncodingError> {
    pack(Opcode::try_from(opcode)?, address, data)
}

/// Split a returned frame into `(status, data)`.  The status is whatever the `command` field
/// holds; checking it is up to the caller.
pub fn unpack(frame: Frame) -> (u32, u32) {
    (frame.command(), frame.data())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout() {
        let frame = pack(Opcode::Write, 0x43c0_0000, 0xa).unwrap();
        assert_eq!(frame.bits(), 0x0000_000a_43c0_0000_0000_0001_u128);
        assert_eq!(frame.command(), 1);
        assert_eq!(frame.address(), 0x43c0_0000);
        assert_eq!(frame.data(), 0xa);
    }

    #[test]
    fn unpack_returns_command_and_data() {
        let cases = [
            (Opcode::Nop, 0, 0),
            (Opcode::Write, 0xffff_ffff, 0xffff_ffff),
            (Opcode::Read, 0x1234_5678, 0x9abc_def0),
            (Opcode::Write, 0x43c0_0000, 0x5),
        ];
        for (op, addr, data) in cases {
            let frame = pack(op, addr, data).unwrap();
            assert_eq!(unpack(frame), (op as u32, data as u32));
        }
    }

    #[test]
    fn out_of_range_fields() {
        assert_eq!(
            pack(Opcode::Write, 0x1_0000_0000, 0),
            Err(EncodingError::AddressOutOfRange(0x1_0000_0000))
        );
        assert_eq!(
            pack(Opcode::Read, 0, u64::MAX),
            Err(EncodingError::DataOutOfRange(u64::MAX))
        );
    }

    #[test]
    fn unknown_opcode() {
        assert_eq!(pack_raw(3, 0, 0), Err(EncodingError::UnknownOpcode(3)));
        assert_eq!(pack_raw(2, 4, 0).unwrap().command(), Opcode::Read as u32);
    }

    #[test]
    fn captured_bits_above_frame_are_dropped() {
        let frame = Frame::from_bits(u128::MAX);
        assert_eq!(frame.bits(), (1u128 << 96) - 1);
        assert_eq!(unpack(frame), (0xffff_ffff, 0xffff_ffff));
    }
}
