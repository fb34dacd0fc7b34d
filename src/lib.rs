//! This crate gives a host memory-mapped access to AXI peripherals inside an FPGA, tunnelled
//! through the JTAG USER1 instruction.  A small bridge core in the fabric sits behind USER1 and
//! turns 96-bit data register shifts into AXI transactions.
//!
//! At the lowest level is the TapBackend trait, which shifts the instruction and data registers
//! of one TAP.  Two backends are provided: MpsseBackend drives an FTDI MPSSE adapter (such as the
//! one on Digilent boards) directly, and OpenOcdBackend forwards scans to an OpenOCD TCL server
//! which may be on another machine.
//!
//! The codec module packs a command, address and data word into the frame the bridge core
//! expects.  Bridge puts the two together: it selects USER1, shifts the frame, waits for the
//! peripheral, and for reads shifts once more to collect the result.
//!
//! The svf module replays recorded vector scripts through any backend, which is handy for
//! checking a setup without the bridge in the loop.
//!
//! # Example
//! ```
//! use jtag_axi::codec::{self, Opcode};
//! let frame = codec::pack(Opcode::Write, 0x43c0_0000, 0xf).unwrap();
//! assert_eq!(frame.bits(), 0x0000_000f_43c0_0000_0000_0001);
//! assert_eq!(codec::unpack(frame), (1, 0xf));
//! ```
//!
//! ```no_run
//! use jtag_axi::backend::openocd::{OpenOcdBackend, RemoteConfig};
//! use jtag_axi::bridge::Bridge;
//! use jtag_axi::delay::StdDelay;
//! let backend = OpenOcdBackend::new(RemoteConfig::default());
//! let mut bridge = Bridge::new(Box::new(backend), StdDelay);
//! bridge.connect().unwrap();
//! bridge.write(0x43c0_0000, 0xa).unwrap();
//! assert!(bridge.verify_roundtrip(0x43c0_0000, 0x5, 0xf).unwrap());
//! ```


#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod backend;
pub mod bridge;
pub mod codec;
#[cfg(feature = "std")]
pub mod delay;
pub mod error;
pub mod svf;
