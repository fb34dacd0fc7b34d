//! Local adapter backend for FT2232H-based USB-JTAG adapters (Digilent JTAG-HS2/HS3, JTAG-SMT2
//! and the programming circuit on most Digilent boards) driven through the FTDI D2XX library in
//! MPSSE mode.
use std::string::{String, ToString};
use std::time::Duration;
use std::vec;
use std::vec::Vec;

use ftdi_mpsse::{ClockTMS, ClockTMSOut};
use libftd2xx::{ClockBits, ClockData, Ft2232h, Ftdi, FtdiCommon, FtdiMpsse, MpsseCmdBuilder, MpsseCmdExecutor};
use log::{debug, info, trace};

use crate::backend::{check_length, from_lsb_bytes, to_lsb_bytes, TapBackend};
use crate::error::{ConnectError, ShiftError};

// Lower pins
const PIN_TCK: u8 = 1;
const PIN_TDI: u8 = 1 << 1;
//const PIN_TDO: u8 = 1 << 2;
const PIN_TMS: u8 = 1 << 3;
const LOWER_OUTPUT_PINS: u8 = PIN_TCK | PIN_TDI | PIN_TMS;

// TMS sequences, LSB first, all starting from Run-Test/Idle
const TMS_RESET: (u8, u8) = (0b01_1111, 6);
const TMS_IDLE_TO_SHIFT_IR: (u8, u8) = (0b0011, 4);
const TMS_IDLE_TO_SHIFT_DR: (u8, u8) = (0b001, 3);
// Exit1 -> Update -> Run-Test/Idle
const TMS_EXIT_TO_IDLE: (u8, u8) = (0b01, 2);

/// Which adapter to open and how to clock it.
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// USB description of the FTDI interface wired to JTAG.
    pub description: String,
    /// TCK frequency in hertz.
    pub clock_hz: u32,
    pub latency: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            description: "Digilent USB Device A".to_string(),
            clock_hz: 10_000_000,
            latency: Duration::from_millis(1),
        }
    }
}

/// An attached FTDI device as reported by the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterInfo {
    pub description: String,
    pub serial_number: String,
}

/// List every FTDI device the D2XX driver can see.
pub fn list_adapters() -> Result<Vec<AdapterInfo>, ConnectError> {
    let devices = libftd2xx::list_devices()
        .map_err(|status| ConnectError::DriverUnavailable(status.to_string()))?;
    Ok(devices
        .into_iter()
        .map(|d| AdapterInfo {
            description: d.description,
            serial_number: d.serial_number,
        })
        .collect())
}

pub struct MpsseBackend {
    config: LocalConfig,
    ft: Option<Ft2232h>,
}

impl MpsseBackend {
    pub fn new(config: LocalConfig) -> Self {
        Self { config, ft: None }
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    fn open(&self) -> Result<Ft2232h, ConnectError> {
        let adapters = list_adapters()?;
        for adapter in &adapters {
            debug!("found FTDI device {:?} serial {:?}", adapter.description, adapter.serial_number);
        }
        if !adapters.iter().any(|a| a.description == self.config.description) {
            return Err(ConnectError::DeviceNotFound(self.config.description.clone()));
        }

        let ft = Ftdi::with_description(&self.config.description)?;
        let mut ft = Ft2232h::try_from(ft)
            .map_err(|_| ConnectError::UnsupportedDevice(self.config.description.clone()))?;
        ft.initialize_mpsse_default()?;
        ft.set_clock(self.config.clock_hz)?;
        ft.set_latency_timer(self.config.latency)?;

        let builder = MpsseCmdBuilder::new()
            .disable_3phase_data_clocking()
            .disable_adaptive_data_clocking()
            .set_gpio_lower(PIN_TMS, LOWER_OUTPUT_PINS)
            .clock_tms_out(ClockTMSOut::NegEdge, TMS_RESET.0, true, TMS_RESET.1);
        ft.send(builder.as_slice())?;
        Ok(ft)
    }

    /// Walk from Run-Test/Idle into Shift-IR or Shift-DR, shift `bits` bits of `value`, and walk
    /// back to Run-Test/Idle, all in one USB transfer.
    fn scan(&mut self, entry: (u8, u8), value: u128, bits: usize) -> Result<u128, ShiftError> {
        check_length(bits)?;
        let ft = self.ft.as_mut().ok_or(ShiftError::NotConnected)?;

        let data = to_lsb_bytes(value, bits);
        // The last bit goes out with TMS high, so it is clocked separately
        let (full_bytes, tail_bits) = shift_layout(bits);
        let last_byte = data[full_bytes];
        let last_bit = last_byte & (1 << tail_bits) != 0;

        let mut builder = MpsseCmdBuilder::new()
            .clock_tms_out(ClockTMSOut::NegEdge, entry.0, true, entry.1);
        if full_bytes > 0 {
            builder = builder.clock_data(ClockData::LsbPosIn, &data[..full_bytes]);
        }
        if tail_bits > 0 {
            builder = builder.clock_bits(ClockBits::LsbPosIn, last_byte, tail_bits);
        }
        builder = builder
            .clock_tms(ClockTMS::NegTMSPosTDO, 1, last_bit, 1)
            .clock_tms_out(ClockTMSOut::NegEdge, TMS_EXIT_TO_IDLE.0, last_bit, TMS_EXIT_TO_IDLE.1)
            .send_immediate();

        let mut reply = vec![0; reply_length(bits)];
        ft.xfer(builder.as_slice(), &mut reply)?;
        trace!("mpsse reply {:02x?}", reply);

        Ok(decode_capture(&reply, bits))
    }
}

/// How a shift of `bits` bits is split: whole bytes for `clock_data`, then up to seven bits for
/// `clock_bits`, then the final bit clocked together with TMS.
fn shift_layout(bits: usize) -> (usize, u8) {
    ((bits - 1) / 8, ((bits - 1) % 8) as u8)
}

/// Bytes the adapter sends back for one shift of `bits` bits.
fn reply_length(bits: usize) -> usize {
    let (full_bytes, tail_bits) = shift_layout(bits);
    full_bytes + usize::from(tail_bits > 0) + 1
}

/// Put the captured bits of a `reply_length(bits)` byte reply back in shift order.
fn decode_capture(reply: &[u8], bits: usize) -> u128 {
    let (full_bytes, tail_bits) = shift_layout(bits);
    // clock_bits shifts its bits in from the top of the byte, and the bit clocked with TMS
    // lands in bit 7 of its own byte
    let mut captured = reply[..full_bytes].to_vec();
    let mut last = if tail_bits > 0 {
        reply[full_bytes] >> (8 - tail_bits)
    } else {
        0
    };
    last |= (reply[reply_length(bits) - 1] >> 7) << tail_bits;
    captured.push(last);
    from_lsb_bytes(&captured, bits)
}

impl TapBackend for MpsseBackend {
    fn connect(&mut self) -> Result<(), ConnectError> {
        if self.ft.is_some() {
            return Ok(());
        }
        info!("opening adapter {:?} at {} Hz", self.config.description, self.config.clock_hz);
        self.ft = Some(self.open()?);
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the handle closes it
        if self.ft.take().is_some() {
            info!("closed adapter {:?}", self.config.description);
        }
    }

    fn is_connected(&self) -> bool {
        self.ft.is_some()
    }

    fn shift_instruction_register(&mut self, value: u128, bits: usize) -> Result<(), ShiftError> {
        debug!("shift IR {:#x} ({} bits)", value, bits);
        self.scan(TMS_IDLE_TO_SHIFT_IR, value, bits)?;
        Ok(())
    }

    fn shift_data_register(&mut self, value: u128, bits: usize) -> Result<u128, ShiftError> {
        debug!("shift DR {:#x} ({} bits)", value, bits);
        let captured = self.scan(TMS_IDLE_TO_SHIFT_DR, value, bits)?;
        debug!("captured DR {:#x}", captured);
        Ok(captured)
    }

    fn reset_tap(&mut self) -> Result<(), ShiftError> {
        let ft = self.ft.as_mut().ok_or(ShiftError::NotConnected)?;
        debug!("reset TAP");
        let builder = MpsseCmdBuilder::new()
            .clock_tms_out(ClockTMSOut::NegEdge, TMS_RESET.0, true, TMS_RESET.1);
        ft.send(builder.as_slice())?;
        Ok(())
    }
}
