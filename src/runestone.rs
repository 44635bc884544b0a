//! Runestone encoding for mint markers.
//!
//! A runestone is an `OP_RETURN OP_13 <payload>` output. The payload is a flat
//! sequence of LEB128 integers read as `(tag, value)` pairs.

use crate::error::{MintError, Result};
use bitcoin::opcodes::all::{OP_PUSHNUM_13, OP_RETURN};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TAG_MINT: u128 = 20;
const TAG_POINTER: u128 = 22;

/// Etching location of a rune: block height and transaction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuneId {
    pub block: u64,
    pub tx: u32,
}

impl RuneId {
    pub fn new(block: u64, tx: u32) -> Self {
        Self { block, tx }
    }
}

impl fmt::Display for RuneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.tx)
    }
}

impl FromStr for RuneId {
    type Err = MintError;

    fn from_str(s: &str) -> Result<Self> {
        let (block, tx) = s
            .split_once(':')
            .ok_or_else(|| MintError::Configuration(format!("rune id `{s}` is not BLOCK:TX")))?;
        let block = block
            .trim()
            .parse()
            .map_err(|err| MintError::Configuration(format!("rune id `{s}` block: {err}")))?;
        let tx = tx
            .trim()
            .parse()
            .map_err(|err| MintError::Configuration(format!("rune id `{s}` tx: {err}")))?;
        Ok(Self { block, tx })
    }
}

impl TryFrom<String> for RuneId {
    type Error = MintError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RuneId> for String {
    fn from(id: RuneId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runestone {
    pub mint: Option<RuneId>,
    pub pointer: Option<u32>,
}

impl Runestone {
    /// Mint of `rune` whose output is assigned to output `pointer`.
    pub fn mint(rune: RuneId, pointer: u32) -> Self {
        Self {
            mint: Some(rune),
            pointer: Some(pointer),
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut payload = vec![];
        if let Some(rune) = self.mint {
            push_field(&mut payload, TAG_MINT, rune.block.into());
            push_field(&mut payload, TAG_MINT, rune.tx.into());
        }
        if let Some(pointer) = self.pointer {
            push_field(&mut payload, TAG_POINTER, pointer.into());
        }
        payload
    }

    pub fn encipher(&self) -> Result<ScriptBuf> {
        let payload = PushBytesBuf::try_from(self.payload())
            .map_err(|err| MintError::Marker(err.to_string()))?;
        Ok(Builder::new()
            .push_opcode(OP_RETURN)
            .push_opcode(OP_PUSHNUM_13)
            .push_slice(payload)
            .into_script())
    }
}

fn push_field(payload: &mut Vec<u8>, tag: u128, value: u128) {
    encode_varint(tag, payload);
    encode_varint(value, payload);
}

fn encode_varint(mut n: u128, out: &mut Vec<u8>) {
    while n >> 7 > 0 {
        out.push((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
}
