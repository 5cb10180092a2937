use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChainError;

/// Characters are packed 6 bits each, low bits first; index 0 is the
/// terminator, so an all-zero word is the empty name. The alphabet is
/// `.-0-9A-Za-z` minus uppercase 'O', which is excluded as confusable
/// with zero (the base58 convention).
const CHARSET: &[u8; 63] = b".-0123456789ABCDEFGHIJKLMNPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn char_to_index(c: u8) -> Option<u64> {
    match c {
        b'.' => Some(1),
        b'-' => Some(2),
        b'0'..=b'9' => Some(3 + (c - b'0') as u64),
        b'A'..=b'N' => Some(13 + (c - b'A') as u64),
        b'P'..=b'Z' => Some(12 + (c - b'A') as u64),
        b'a'..=b'z' => Some(38 + (c - b'a') as u64),
        _ => None,
    }
}

fn index_to_char(i: u64) -> u8 {
    CHARSET[(i - 1) as usize]
}

// ── Name ─────────────────────────────────────────────────────────────────────

/// 64-bit packed identifier, up to 10 characters. Used for permission
/// names and generated-address prefixes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Name(pub u64);

impl Name {
    pub const MAX_LEN: usize = 10;

    pub fn new(s: &str) -> Result<Self, ChainError> {
        if s.len() > Self::MAX_LEN {
            return Err(ChainError::NameTooLong(s.to_string()));
        }
        let mut v = 0u64;
        for (i, c) in s.bytes().enumerate() {
            let idx = char_to_index(c).ok_or_else(|| ChainError::NameCharset(s.to_string()))?;
            v |= idx << (6 * i);
        }
        Ok(Self(v))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Names starting with '.' are reserved for system usage.
    pub fn is_reserved(&self) -> bool {
        self.0 & 0x3f == 1
    }

    pub fn as_str(&self) -> String {
        let mut out = String::new();
        let mut v = self.0;
        while v & 0x3f != 0 {
            out.push(index_to_char(v & 0x3f) as char);
            v >>= 6;
        }
        out
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.as_str())
    }
}

impl FromStr for Name {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ── Name128 ──────────────────────────────────────────────────────────────────

/// 128-bit packed identifier, case-preserving, up to 21 characters. Domain,
/// token, group, proposal, symbol and validator names are all `Name128`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Name128(pub u128);

impl Name128 {
    pub const MAX_LEN: usize = 21;

    pub fn new(s: &str) -> Result<Self, ChainError> {
        if s.len() > Self::MAX_LEN {
            return Err(ChainError::NameTooLong(s.to_string()));
        }
        let mut v = 0u128;
        for (i, c) in s.bytes().enumerate() {
            let idx = char_to_index(c).ok_or_else(|| ChainError::NameCharset(s.to_string()))?;
            v |= (idx as u128) << (6 * i);
        }
        Ok(Self(v))
    }

    /// Decimal rendering of `n`, packed. Fungible symbol ids and bonus
    /// distribution keys address the token database this way.
    pub fn from_number(n: u128) -> Self {
        Self::new(&n.to_string()).expect("decimal digits always fit")
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Names starting with '.' are reserved for system usage.
    pub fn is_reserved(&self) -> bool {
        self.0 & 0x3f == 1
    }

    pub fn as_str(&self) -> String {
        let mut out = String::new();
        let mut v = self.0;
        while v & 0x3f != 0 {
            out.push(index_to_char((v & 0x3f) as u64) as char);
            v >>= 6;
        }
        out
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(b))
    }
}

impl fmt::Display for Name128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Name128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name128({})", self.as_str())
    }
}

impl FromStr for Name128 {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<Name> for Name128 {
    fn from(n: Name) -> Self {
        // Both encodings pack 6-bit indices low-first, so widening is a cast.
        Self(n.0 as u128)
    }
}

/// Shorthand used throughout the chain crates: `n128!("domain")`.
#[macro_export]
macro_rules! n128 {
    ($s:expr) => {
        $crate::name::Name128::new($s).expect("static name is valid")
    };
}

#[macro_export]
macro_rules! n {
    ($s:expr) => {
        $crate::name::Name::new($s).expect("static name is valid")
    };
}

// ── Tests ─────────────────────────────────────────────────────────────────────
