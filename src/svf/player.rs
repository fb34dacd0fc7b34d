//! Replays SVF statements against a TAP backend.
use core::num::NonZeroU32;

use embedded_hal::delay::DelayNs;
use log::{debug, info, trace};

use crate::backend::TapBackend;
use crate::error::PlayError;
use crate::svf::{Instruction, Parser, Statement, VectorScript};

/// TCK rate assumed when turning RUNTEST cycles into wall-clock time.
pub const DEFAULT_CLOCK_HZ: NonZeroU32 = match NonZeroU32::new(1_000_000) {
    Some(hz) => hz,
    None => unreachable!(),
};

pub struct Player<D> {
    delay: D,
    clock_hz: NonZeroU32,
}

impl<D: DelayNs> Player<D> {
    pub fn new(delay: D) -> Self {
        Self::with_clock(delay, DEFAULT_CLOCK_HZ)
    }

    pub fn with_clock(delay: D, clock_hz: NonZeroU32) -> Self {
        Self { delay, clock_hz }
    }

    /// Run every statement of `script` in order.  The first failing statement stops the replay;
    /// the backend is left as it is, connected or not.
    pub fn play<B: TapBackend + ?Sized>(&mut self, script: &VectorScript, backend: &mut B) -> Result<(), PlayError> {
        info!("replaying {} statements", script.len());
        for statement in script.statements() {
            self.execute(statement, backend)?;
        }
        Ok(())
    }

    /// Parse and run `text` one line at a time.  Lines before a bad line have already been run
    /// when the parse error is returned.  Returns the number of statements run.
    pub fn play_source<B: TapBackend + ?Sized>(&mut self, text: &str, backend: &mut B) -> Result<usize, PlayError> {
        let mut parser = Parser::new();
        let mut count = 0;
        for (index, source) in text.lines().enumerate() {
            let line = index + 1;
            if let Some(instruction) = parser.parse_line(line, source)? {
                self.execute(&Statement { line, instruction }, backend)?;
                count += 1;
            }
        }
        info!("replayed {} statements", count);
        Ok(count)
    }

    fn execute<B: TapBackend + ?Sized>(&mut self, statement: &Statement, backend: &mut B) -> Result<(), PlayError> {
        trace!("line {}: {:?}", statement.line, statement.instruction);
        let result = match statement.instruction {
            Instruction::ShiftInstructionRegister { bits, length } => {
                backend.shift_instruction_register(bits, length)
            }
            Instruction::ShiftDataRegister { bits, length } => backend
                .shift_data_register(bits, length)
                .map(|captured| debug!("line {}: captured {:#x}", statement.line, captured)),
            Instruction::ResetTap => backend.reset_tap(),
            Instruction::RunDelay { cycles } => {
                self.run_test(cycles);
                Ok(())
            }
        };
        result.map_err(|source| PlayError::Shift {
            line: statement.line,
            source,
        })
    }

    fn run_test(&mut self, cycles: u32) {
        let mut micros = (u64::from(cycles) * 1_000_000).div_ceil(u64::from(self.clock_hz.get()));
        while micros > 0 {
            let chunk = micros.min(u64::from(u32::MAX)) as u32;
            self.delay.delay_us(chunk);
            micros -= u64::from(chunk);
        }
    }
}
