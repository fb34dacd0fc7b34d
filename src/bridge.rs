//! AXI reads and writes carried over the USER1 data register.
//!
//! A transaction is always two-phase: select USER1 in the instruction register, then shift a
//! frame through the data register.  Because JTAG captures while it shifts, the frame that
//! carries a READ command cannot also carry its result; the result is pumped out by a second
//! data register shift once the peripheral has had time to answer.
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::backend::{low_mask, TapBackend, MAX_SHIFT_BITS};
use crate::codec::{self, Frame, Opcode, FRAME_BITS};
use crate::error::BridgeError;

/// Constants of the target device family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Instruction that tunnels the bridge's data register (USER1).
    pub user_instruction: u32,
    pub ir_length: usize,
    pub dr_length: usize,
    /// Time given to the AXI transaction after each command shift.
    pub settle_us: u32,
    /// Reject read results whose status field is not the READ opcode.
    pub check_status: bool,
}

impl BridgeConfig {
    /// USER1 on Xilinx 7-series parts.
    pub const XILINX_7SERIES: BridgeConfig = BridgeConfig {
        user_instruction: 0x02,
        ir_length: 6,
        dr_length: FRAME_BITS,
        settle_us: 10_000,
        check_status: false,
    };
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::XILINX_7SERIES
    }
}

pub struct Bridge<T, D> {
    backend: T,
    delay: D,
    config: BridgeConfig,
}

impl<T, U, D> Bridge<T, D>
    where T: core::ops::DerefMut<Target=U>,
          U: TapBackend + ?Sized,
          D: DelayNs
{
    /// Create a bridge for a Xilinx 7-series target using an existing backend
    pub fn new(backend: T, delay: D) -> Self {
        Self {
            backend,
            delay,
            config: BridgeConfig::default(),
        }
    }

    pub fn with_config(backend: T, delay: D, config: BridgeConfig) -> Result<Self, BridgeError> {
        if config.dr_length < FRAME_BITS {
            return Err(BridgeError::Config("data register shorter than a transaction frame"));
        }
        if config.dr_length > MAX_SHIFT_BITS || config.ir_length == 0 || config.ir_length > MAX_SHIFT_BITS {
            return Err(BridgeError::Config("register length out of range"));
        }
        if u128::from(config.user_instruction) & !low_mask(config.ir_length) != 0 {
            return Err(BridgeError::Config("USER instruction wider than the instruction register"));
        }
        Ok(Self {
            backend,
            delay,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn backend(&self) -> &U {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut U {
        &mut self.backend
    }

    /// Give the backend back, connected or not.
    pub fn into_inner(self) -> T {
        self.backend
    }

    /// Connect the backend and put the TAP in a known state.
    pub fn connect(&mut self) -> Result<(), BridgeError> {
        self.backend.connect()?;
        self.backend.reset_tap()?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.backend.disconnect();
    }

    fn select_user(&mut self) -> Result<(), BridgeError> {
        self.backend
            .shift_instruction_register(self.config.user_instruction.into(), self.config.ir_length)?;
        Ok(())
    }

    fn settle(&mut self) {
        self.delay.delay_us(self.config.settle_us);
    }

    /// Write `data` to the AXI `address`.
    pub fn write(&mut self, address: u32, data: u32) -> Result<(), BridgeError> {
        info!("write {:#010x} <- {:#010x}", address, data);
        let frame = codec::pack(Opcode::Write, address.into(), data.into())?;
        self.select_user()?;
        self.backend.shift_data_register(frame.bits(), self.config.dr_length)?;
        self.settle();
        Ok(())
    }

    /// Read the AXI `address`.
    pub fn read(&mut self, address: u32) -> Result<u32, BridgeError> {
        let frame = codec::pack(Opcode::Read, address.into(), 0)?;
        self.select_user()?;
        self.backend.shift_data_register(frame.bits(), self.config.dr_length)?;
        self.settle();

        // Shift a NOP through to bring the latched result out
        let captured = self.backend.shift_data_register(0, self.config.dr_length)?;
        let response = Frame::from_bits(captured);
        debug!("read response {:?}", response);
        let (status, data) = codec::unpack(response);
        if self.config.check_status && status != Opcode::Read as u32 {
            return Err(BridgeError::UnexpectedStatus {
                expected: Opcode::Read as u32,
                actual: status,
            });
        }

        info!("read {:#010x} -> {:#010x} (status {:#x})", address, data, status);
        Ok(data)
    }

    /// Write `data`, read it back and compare the bits selected by `mask`.  A mismatch is
    /// `Ok(false)`, not an error.
    pub fn verify_roundtrip(&mut self, address: u32, data: u32, mask: u32) -> Result<bool, BridgeError> {
        self.write(address, data)?;
        let read = self.read(address)?;
        if read & mask == data & mask {
            debug!("verified {:#010x}: {:#x} (mask {:#x})", address, read & mask, mask);
            Ok(true)
        } else {
            warn!(
                "verify {:#010x}: wrote {:#x}, read {:#x} (mask {:#x})",
                address, data & mask, read & mask, mask
            );
            Ok(false)
        }
    }

    /// `verify_roundtrip`, with a mismatch reported as [`BridgeError::Mismatch`].
    pub fn expect_roundtrip(&mut self, address: u32, data: u32, mask: u32) -> Result<(), BridgeError> {
        self.write(address, data)?;
        let read = self.read(address)?;
        if read & mask != data & mask {
            return Err(BridgeError::Mismatch {
                expected: data & mask,
                actual: read & mask,
                mask,
            });
        }
        Ok(())
    }
}
