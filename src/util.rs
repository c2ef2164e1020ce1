//! Byte formatting and option parsing helpers shared by the handshake,
//! channel and CLI.
use std::{str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("invalid hex byte '{0}'")]
    InvalidByte(String),

    #[error("no bytes provided")]
    Empty,
}

/// Renders bytes as upper-case, space separated hex pairs (`60 60 B0 17`).
pub fn hex_repr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses hex pairs separated by whitespace, e.g. `"00 00 01 FF"`.
///
/// Pairs may also be written without separators (`"0000 01FF"`).
pub fn parse_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let mut out = Vec::new();
    for word in input.split_whitespace() {
        if word.len() % 2 != 0 || !word.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HexError::InvalidByte(word.to_string()));
        }
        for i in (0..word.len()).step_by(2) {
            let pair = word
                .get(i..i + 2)
                .ok_or_else(|| HexError::InvalidByte(word.to_string()))?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| HexError::InvalidByte(pair.to_string()))?;
            out.push(byte);
        }
    }

    if out.is_empty() {
        return Err(HexError::Empty);
    }
    Ok(out)
}

/// Command line bytes, parsed with [`parse_hex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s).map(HexBytes)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Hex(#[from] HexError),

    #[error("expected a non-negative number of seconds, got '{0}'")]
    InvalidDelay(String),
}

/// Parses fractional seconds, e.g. `"0.5"`.
pub fn parse_delay(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDelay(input.to_string());
    let secs: f64 = input.trim().parse().map_err(|_| invalid())?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}
