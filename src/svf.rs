//! A line-oriented subset of the Serial Vector Format, enough to replay recorded USER1 sessions.
//!
//! One statement per line; `//` and `!` start a comment that runs to the end of the line;
//! keywords are case-insensitive.  Only a comment may follow the closing `;`.
//!
//! ```text
//! SIR <length> TDI (<hex>) [TDO (<hex>)] [MASK (<hex>)] [SMASK (<hex>)];
//! SDR <length> TDI (<hex>) [TDO (<hex>)] [MASK (<hex>)] [SMASK (<hex>)];
//! STATE RESET [IDLE];
//! RUNTEST [IDLE] <cycles> [TCK];
//! ```
//!
//! TDO, MASK and SMASK are checked for syntax and otherwise ignored.  A scan without TDI reuses
//! the previous TDI of the same register if the length has not changed.
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::debug;

use crate::backend::{low_mask, MAX_SHIFT_BITS};
use crate::error::{ParseError, ParseErrorKind};

pub mod player;

/// One replayable operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    ShiftInstructionRegister { bits: u128, length: usize },
    ShiftDataRegister { bits: u128, length: usize },
    ResetTap,
    RunDelay { cycles: u32 },
}

/// An instruction and the 1-based line it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Statement {
    pub line: usize,
    pub instruction: Instruction,
}

/// Parsed script, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VectorScript {
    statements: Vec<Statement>,
}

impl VectorScript {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.statements.iter().map(|s| &s.instruction)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Parse a whole script, stopping at the first bad line.
pub fn parse(text: &str) -> Result<VectorScript, ParseError> {
    let mut parser = Parser::new();
    let mut statements = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if let Some(instruction) = parser.parse_line(index + 1, line)? {
            statements.push(Statement { line: index + 1, instruction });
        }
    }
    Ok(VectorScript { statements })
}

/// Parse a whole script, keeping every good line and collecting every bad one.
pub fn parse_lenient(text: &str) -> (VectorScript, Vec<ParseError>) {
    let mut parser = Parser::new();
    let mut statements = Vec::new();
    let mut errors = Vec::new();
    for (index, line) in text.lines().enumerate() {
        match parser.parse_line(index + 1, line) {
            Ok(Some(instruction)) => statements.push(Statement { line: index + 1, instruction }),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }
    (VectorScript { statements }, errors)
}

#[derive(Clone, Copy)]
enum Register {
    Instruction,
    Data,
}

/// Line parser.  Remembers the last TDI of each register so that later scans can omit it.
#[derive(Debug, Default)]
pub struct Parser {
    last_sir: Option<(usize, u128)>,
    last_sdr: Option<(usize, u128)>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse line number `line`.  Blank and comment lines give `Ok(None)`, as does a `STATE`
    /// that does not pass through Test-Logic-Reset.
    pub fn parse_line(&mut self, line: usize, text: &str) -> Result<Option<Instruction>, ParseError> {
        let text = strip_comment(text);
        let body = match text.split_once(';') {
            Some((body, rest)) => {
                if !rest.trim().is_empty() {
                    return Err(ParseError {
                        line,
                        kind: ParseErrorKind::TrailingText(rest.trim().to_string()),
                    });
                }
                body.trim()
            }
            None => text,
        };
        if body.is_empty() {
            return Ok(None);
        }

        let (keyword, rest) = split_token(body);
        let result = match keyword.to_ascii_uppercase().as_str() {
            "SIR" => self
                .scan(rest, Register::Instruction)
                .map(|(bits, length)| Some(Instruction::ShiftInstructionRegister { bits, length })),
            "SDR" => self
                .scan(rest, Register::Data)
                .map(|(bits, length)| Some(Instruction::ShiftDataRegister { bits, length })),
            "STATE" => {
                if rest.split_whitespace().any(|s| s.eq_ignore_ascii_case("RESET")) {
                    Ok(Some(Instruction::ResetTap))
                } else {
                    debug!("line {}: STATE without RESET, nothing to do", line);
                    Ok(None)
                }
            }
            "RUNTEST" => run_cycles(rest).map(|cycles| Some(Instruction::RunDelay { cycles })),
            _ => Err(ParseErrorKind::UnknownStatement(body.to_string())),
        };
        result.map_err(|kind| ParseError { line, kind })
    }

    fn scan(&mut self, rest: &str, register: Register) -> Result<(u128, usize), ParseErrorKind> {
        let (length, rest) = split_token(rest);
        let length: usize = length.parse().map_err(|_| ParseErrorKind::BadLength)?;
        if length == 0 || length > MAX_SHIFT_BITS {
            return Err(ParseErrorKind::UnsupportedLength(length));
        }

        let mut tdi = None;
        for (name, hex) in patterns(rest)? {
            let value = parse_hex(&hex, length)?;
            match name.as_str() {
                "TDI" => {
                    if value & !low_mask(length) != 0 {
                        return Err(ParseErrorKind::ValueTooWide(length));
                    }
                    tdi = Some(value);
                }
                "TDO" | "MASK" | "SMASK" => {}
                _ => return Err(ParseErrorKind::UnknownStatement(name.clone())),
            }
        }

        let last = match register {
            Register::Instruction => &mut self.last_sir,
            Register::Data => &mut self.last_sdr,
        };
        let bits = match (tdi, *last) {
            (Some(bits), _) => bits,
            (None, Some((last_length, bits))) if last_length == length => bits,
            _ => return Err(ParseErrorKind::MissingTdi),
        };
        *last = Some((length, bits));
        Ok((bits, length))
    }
}

/// Everything before the first `//` or `!`, trimmed.
fn strip_comment(s: &str) -> &str {
    let end = [s.find("//"), s.find('!')]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(s.len());
    s[..end].trim()
}

fn split_token(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    }
}

/// `NAME (hex) NAME (hex) ...`, names upper-cased and whitespace removed from the hex.
fn patterns(mut rest: &str) -> Result<Vec<(String, String)>, ParseErrorKind> {
    let mut out = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(out);
        }
        let open = rest
            .find('(')
            .ok_or_else(|| ParseErrorKind::BadHex(rest.to_string()))?;
        let close = rest[open..]
            .find(')')
            .map(|i| open + i)
            .ok_or_else(|| ParseErrorKind::BadHex(rest[open..].to_string()))?;
        let name = rest[..open].trim().to_ascii_uppercase();
        let hex = rest[open + 1..close].chars().filter(|c| !c.is_whitespace()).collect();
        out.push((name, hex));
        rest = &rest[close + 1..];
    }
}

fn parse_hex(hex: &str, length: usize) -> Result<u128, ParseErrorKind> {
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseErrorKind::BadHex(hex.to_string()));
    }
    let significant = hex.trim_start_matches('0');
    if significant.len() > 32 {
        return Err(ParseErrorKind::ValueTooWide(length));
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(significant, 16).map_err(|_| ParseErrorKind::BadHex(hex.to_string()))
}

fn run_cycles(rest: &str) -> Result<u32, ParseErrorKind> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.iter().any(|t| t.eq_ignore_ascii_case("SEC")) {
        return Err(ParseErrorKind::UnsupportedTiming);
    }
    let mut tokens = tokens.into_iter().peekable();
    if let Some(state) = tokens.peek() {
        if ["IDLE", "RESET", "DRPAUSE", "IRPAUSE"].iter().any(|s| state.eq_ignore_ascii_case(s)) {
            tokens.next();
        }
    }
    let count = tokens.next().ok_or(ParseErrorKind::BadCycles)?;
    count.parse().map_err(|_| ParseErrorKind::BadCycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    const SESSION: &str = "SIR 6 TDI (02)\nSDR 96 TDI (000000010000000043C00000)\nRUNTEST 100\n";

    #[test]
    fn recorded_session() {
        let script = parse(SESSION).unwrap();
        let instructions: Vec<_> = script.instructions().copied().collect();
        assert_eq!(
            instructions,
            vec![
                Instruction::ShiftInstructionRegister { bits: 0x02, length: 6 },
                Instruction::ShiftDataRegister { bits: 0x0000_0001_0000_0000_43c0_0000, length: 96 },
                Instruction::RunDelay { cycles: 100 },
            ]
        );
        let lines: Vec<_> = script.statements().iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_line_is_reported_with_its_number() {
        let text = alloc::format!("{}FOO BAR\n", SESSION);
        let err = parse(&text).unwrap_err();
        assert_eq!(err.line, 4);
        assert_eq!(err.kind, ParseErrorKind::UnknownStatement("FOO BAR".to_string()));

        let (script, errors) = parse_lenient(&text);
        assert_eq!(script, parse(SESSION).unwrap());
        assert_eq!(errors, vec![err]);
    }

    #[test]
    fn comments_blanks_and_case() {
        let text = "// header\n\n! vendor note\n  sir 6 tdi (02);\nstate reset idle;\nState Idle;\nruntest idle 10 tck;\n";
        let script = parse(text).unwrap();
        assert_eq!(
            script.statements(),
            &[
                Statement { line: 4, instruction: Instruction::ShiftInstructionRegister { bits: 2, length: 6 } },
                Statement { line: 5, instruction: Instruction::ResetTap },
                Statement { line: 7, instruction: Instruction::RunDelay { cycles: 10 } },
            ]
        );
    }

    #[test]
    fn one_statement_per_line() {
        let err = parse("SIR 6 TDI (02); SDR 8 TDI (ff);\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.kind, ParseErrorKind::TrailingText("SDR 8 TDI (ff);".to_string()));

        let (script, errors) = parse_lenient("SIR 6 TDI (02); SDR 8 TDI (ff);\nSDR 8 TDI (a5);\n");
        assert_eq!(script.len(), 1);
        assert_eq!(script.statements()[0].line, 2);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn trailing_comments() {
        let text = "SIR 6 TDI (02) // select USER1\nSDR 8 TDI (a5); // pattern\nSDR 8 TDI (5a) ! note\nRUNTEST 10; !\n";
        let script = parse(text).unwrap();
        let instructions: Vec<_> = script.instructions().copied().collect();
        assert_eq!(
            instructions,
            vec![
                Instruction::ShiftInstructionRegister { bits: 0x02, length: 6 },
                Instruction::ShiftDataRegister { bits: 0xa5, length: 8 },
                Instruction::ShiftDataRegister { bits: 0x5a, length: 8 },
                Instruction::RunDelay { cycles: 10 },
            ]
        );
    }

    #[test]
    fn scan_patterns() {
        let script = parse("SDR 8 TDI(a5) TDO (00) MASK (0 0)\nSDR 8 TDO (ff)\n").unwrap();
        let bits: Vec<_> = script.instructions().copied().collect();
        // second scan reuses the first one's TDI
        assert_eq!(
            bits,
            vec![
                Instruction::ShiftDataRegister { bits: 0xa5, length: 8 },
                Instruction::ShiftDataRegister { bits: 0xa5, length: 8 },
            ]
        );
    }

    #[test]
    fn malformed_scans() {
        let kind = |text: &str| parse(text).unwrap_err().kind;
        assert_eq!(kind("SIR x TDI (02)"), ParseErrorKind::BadLength);
        assert_eq!(kind("SIR 0 TDI (00)"), ParseErrorKind::UnsupportedLength(0));
        assert_eq!(kind("SDR 129 TDI (00)"), ParseErrorKind::UnsupportedLength(129));
        assert_eq!(kind("SIR 6 TDI (0g)"), ParseErrorKind::BadHex("0g".to_string()));
        assert_eq!(kind("SIR 6 TDI (02"), ParseErrorKind::BadHex("(02".to_string()));
        assert_eq!(kind("SIR 6 TDI (40)"), ParseErrorKind::ValueTooWide(6));
        assert_eq!(kind("SIR 6"), ParseErrorKind::MissingTdi);
        assert_eq!(kind("SIR 6 TDI (01)\nSIR 5"), ParseErrorKind::MissingTdi);
        assert_eq!(kind("SIR 6 XYZ (01)"), ParseErrorKind::UnknownStatement("XYZ".to_string()));
        assert_eq!(kind("RUNTEST"), ParseErrorKind::BadCycles);
        assert_eq!(kind("RUNTEST 1.0E-3 SEC"), ParseErrorKind::UnsupportedTiming);
    }

    #[test]
    fn leading_zeros_beyond_128_bits() {
        let hex = "0000000000000000000000000000000000000001";
        let script = parse(&alloc::format!("SDR 96 TDI ({})", hex)).unwrap();
        assert_eq!(
            script.instructions().next(),
            Some(&Instruction::ShiftDataRegister { bits: 1, length: 96 })
        );
    }
}
