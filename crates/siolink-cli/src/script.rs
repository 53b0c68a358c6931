//! Register scripts: a line-oriented stand-in for a guest program poking the
//! serial registers.
//!
//! ```text
//! # connect, then spin until the relay answers
//! w 89 05 01 00 00 7F 45 0C FE
//! wait
//! r 4
//! rcnt 0
//! siocnt 4081
//! reg 4000140 40
//! ```
//!
//! Numbers are hexadecimal with an optional `0x` prefix.

use std::io::{self, Write};

use log::debug;
use siolink_core::hardware::{REG_RCNT, REG_SIOCNT, REG_SIODATA8};
use siolink_core::{Irq, SioPort};
use thiserror::Error;

pub const DEFAULT_WAIT_READS: u32 = 10_000;

/// Equivalent of the link test program: connect to the relay, wait for the
/// connection to settle, then send a 16-byte sample with its CRC.
pub const LINK_TEST_SCRIPT: &str = "\
# connect (the relay dials its configured target)
w 89 05 01 00 00 7F E5 0C FE
wait
# send 16 bytes, crc 0xE9C26818
w 89 02 18 68 C2 E9 10 00 FE
w 00 FF 00 FF DA DB DC DD FE FE FA FA 99 88 66 11
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    /// Bytes written to SIODATA8 in order.
    Write(Vec<u8>),
    /// Reads of SIODATA8.
    Read(u32),
    /// Reads SIODATA8 until it returns non-zero, at most this many times.
    Wait(u32),
    Rcnt(u16),
    Siocnt(u16),
    Register { address: u32, value: u16 },
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: SIODATA8 still zero after {reads} reads")]
    WaitExhausted { line: usize, reads: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    /// Statements paired with their 1-based source line.
    statements: Vec<(usize, Statement)>,
}

impl Script {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut statements = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let code = raw.split('#').next().unwrap_or_default().trim();
            if code.is_empty() {
                continue;
            }
            let statement =
                parse_statement(code).map_err(|message| ScriptError::Parse { line, message })?;
            statements.push((line, statement));
        }
        Ok(Self { statements })
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter().map(|(_, statement)| statement)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Runs every statement against `port`, printing each read value and
    /// raised serial interrupt to `out`.
    pub fn run<W: Write>(&self, port: &mut SioPort, mut out: W) -> Result<RunSummary, ScriptError> {
        let mut summary = RunSummary::default();
        for (line, statement) in &self.statements {
            debug!("line {line}: {statement:?}");
            let mut if_reg = 0u16;
            match statement {
                Statement::Write(bytes) => {
                    for &byte in bytes {
                        port.write16(REG_SIODATA8, u16::from(byte), &mut if_reg);
                    }
                    summary.written += bytes.len();
                }
                Statement::Read(count) => {
                    for _ in 0..*count {
                        let value = port.read16(REG_SIODATA8);
                        writeln!(out, "{value:02X}")?;
                        summary.reads.push(value);
                    }
                }
                Statement::Wait(max) => {
                    let mut settled = None;
                    for _ in 0..*max {
                        let value = port.read16(REG_SIODATA8);
                        if value != 0 {
                            settled = Some(value);
                            break;
                        }
                    }
                    let Some(value) = settled else {
                        return Err(ScriptError::WaitExhausted {
                            line: *line,
                            reads: *max,
                        });
                    };
                    writeln!(out, "{value:02X}")?;
                    summary.reads.push(value);
                }
                Statement::Rcnt(value) => port.write16(REG_RCNT, *value, &mut if_reg),
                Statement::Siocnt(value) => port.write16(REG_SIOCNT, *value, &mut if_reg),
                Statement::Register { address, value } => {
                    port.write16(*address, *value, &mut if_reg)
                }
            }
            if if_reg & Irq::Serial.mask() != 0 {
                writeln!(out, "irq serial")?;
                summary.serial_irqs += 1;
            }
        }
        Ok(summary)
    }
}

/// What a script run observed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub written: usize,
    pub reads: Vec<u16>,
    pub serial_irqs: usize,
}

fn parse_statement(code: &str) -> Result<Statement, String> {
    let mut words = code.split_whitespace();
    let Some(keyword) = words.next() else {
        return Err("empty statement".to_string());
    };
    let args: Vec<&str> = words.collect();

    match keyword {
        "w" => {
            if args.is_empty() {
                return Err("`w` needs at least one byte".to_string());
            }
            let bytes = args
                .iter()
                .map(|arg| parse_hex(arg).and_then(|v| narrow::<u8>(v, arg)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Statement::Write(bytes))
        }
        "r" => Ok(Statement::Read(optional_count(&args, 1)?)),
        "wait" => Ok(Statement::Wait(optional_count(&args, DEFAULT_WAIT_READS)?)),
        "rcnt" => Ok(Statement::Rcnt(single_halfword(keyword, &args)?)),
        "siocnt" => Ok(Statement::Siocnt(single_halfword(keyword, &args)?)),
        "reg" => {
            let [address, value] = args.as_slice() else {
                return Err("`reg` takes an address and a value".to_string());
            };
            Ok(Statement::Register {
                address: parse_hex(address)?,
                value: parse_hex(value).and_then(|v| narrow::<u16>(v, value))?,
            })
        }
        other => Err(format!("unknown statement `{other}`")),
    }
}

fn optional_count(args: &[&str], default: u32) -> Result<u32, String> {
    match args {
        [] => Ok(default),
        [count] => parse_hex(count),
        _ => Err("expected at most one count".to_string()),
    }
}

fn single_halfword(keyword: &str, args: &[&str]) -> Result<u16, String> {
    let [value] = args else {
        return Err(format!("`{keyword}` takes exactly one value"));
    };
    parse_hex(value).and_then(|v| narrow::<u16>(v, value))
}

fn parse_hex(word: &str) -> Result<u32, String> {
    let digits = word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
        .unwrap_or(word);
    u32::from_str_radix(digits, 16).map_err(|_| format!("`{word}` is not a hex number"))
}

fn narrow<T: TryFrom<u32>>(value: u32, word: &str) -> Result<T, String> {
    T::try_from(value).map_err(|_| format!("`{word}` is out of range"))
}
