//! EVT-Link: a compact byte-packed capability token carrying its own
//! signatures, used by everiPass/everiPay to bridge off-chain intent into
//! on-chain actions. The byte layout is fixed: header flags, a segment
//! count, then id-keyed segments whose payload width is determined by the
//! id range, then 65-byte recoverable signatures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ChainError;
use crate::types::{Digest, Signature};

// Header flags.
pub const VERSION1: u16 = 1;
pub const EVERIPASS: u16 = 2;
pub const EVERIPAY: u16 = 4;
pub const DESTROY: u16 = 8;

// Segment ids. Integer widths are determined by range: [0,20) u8,
// [20,40) u16, [40,90) u32, [90,155) length-prefixed string, [155,165)
// fixed 16 bytes.
pub const TIMESTAMP: u8 = 42;
pub const MAX_PAY: u8 = 43;
pub const SYMBOL_ID: u8 = 44;
pub const DOMAIN: u8 = 91;
pub const TOKEN: u8 = 92;
pub const MAX_PAY_STR: u8 = 94;
pub const LINK_ID: u8 = 156;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Segment {
    Int(u32),
    Str(String),
    Bytes16([u8; 16]),
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct EvtLink {
    pub header: u16,
    pub segments: BTreeMap<u8, Segment>,
    pub signatures: Vec<Signature>,
}

impl EvtLink {
    pub fn new(header: u16) -> Self {
        Self { header, segments: BTreeMap::new(), signatures: Vec::new() }
    }

    pub fn set_int(&mut self, id: u8, v: u32) {
        debug_assert!(id < 90);
        self.segments.insert(id, Segment::Int(v));
    }

    pub fn set_str(&mut self, id: u8, v: &str) {
        debug_assert!((90..155).contains(&id));
        self.segments.insert(id, Segment::Str(v.to_string()));
    }

    pub fn set_bytes16(&mut self, id: u8, v: [u8; 16]) {
        debug_assert!((155..165).contains(&id));
        self.segments.insert(id, Segment::Bytes16(v));
    }

    pub fn has_segment(&self, id: u8) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn int(&self, id: u8) -> Result<u32, ChainError> {
        match self.segments.get(&id) {
            Some(Segment::Int(v)) => Ok(*v),
            _ => Err(ChainError::EvtLinkSegment(id)),
        }
    }

    pub fn str_(&self, id: u8) -> Result<&str, ChainError> {
        match self.segments.get(&id) {
            Some(Segment::Str(v)) => Ok(v),
            _ => Err(ChainError::EvtLinkSegment(id)),
        }
    }

    pub fn link_id(&self) -> Result<[u8; 16], ChainError> {
        match self.segments.get(&LINK_ID) {
            Some(Segment::Bytes16(v)) => Ok(*v),
            _ => Err(ChainError::EvtLinkSegment(LINK_ID)),
        }
    }

    /// The amount cap: `max_pay` and `max_pay_str` are mutually exclusive.
    pub fn max_pay(&self) -> Result<u64, ChainError> {
        match (self.segments.get(&MAX_PAY), self.segments.get(&MAX_PAY_STR)) {
            (Some(Segment::Int(v)), None) => Ok(*v as u64),
            (None, Some(Segment::Str(s))) => {
                s.parse().map_err(|_| ChainError::EvtLinkSegment(MAX_PAY_STR))
            }
            _ => Err(ChainError::EvtLinkType),
        }
    }

    // ── Legacy byte codec ────────────────────────────────────────────────────

    fn segment_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.header.to_be_bytes());
        out.push(self.segments.len() as u8);
        for (&id, seg) in &self.segments {
            out.push(id);
            match seg {
                Segment::Int(v) => match id {
                    0..=19 => out.push(*v as u8),
                    20..=39 => out.extend_from_slice(&(*v as u16).to_be_bytes()),
                    _ => out.extend_from_slice(&v.to_be_bytes()),
                },
                Segment::Str(s) => {
                    out.push(s.len() as u8);
                    out.extend_from_slice(s.as_bytes());
                }
                Segment::Bytes16(b) => out.extend_from_slice(b),
            }
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.segment_bytes();
        for sig in &self.signatures {
            out.extend_from_slice(&sig.to_bytes());
        }
        out
    }

    /// The digest the link signatures cover: everything before the
    /// signature block.
    pub fn signing_digest(&self) -> Digest {
        Digest::hash_bytes(&self.segment_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ChainError> {
        if data.len() < 3 {
            return Err(ChainError::EvtLinkVersion);
        }
        let header = u16::from_be_bytes(data[..2].try_into().unwrap());
        let count = data[2] as usize;
        let mut segments = BTreeMap::new();
        let mut pos = 3usize;

        let take = |pos: &mut usize, n: usize| -> Result<usize, ChainError> {
            let start = *pos;
            if start + n > data.len() {
                return Err(ChainError::EvtLinkSegment(
                    data.get(start.wrapping_sub(1)).copied().unwrap_or(0),
                ));
            }
            *pos += n;
            Ok(start)
        };

        for _ in 0..count {
            if pos >= data.len() {
                return Err(ChainError::EvtLinkType);
            }
            let id = data[pos];
            if id >= 165 {
                return Err(ChainError::EvtLinkSegment(id));
            }
            pos += 1;
            let seg = match id {
                0..=19 => Segment::Int(data[take(&mut pos, 1)?] as u32),
                20..=39 => {
                    let s = take(&mut pos, 2)?;
                    Segment::Int(u16::from_be_bytes(data[s..s + 2].try_into().unwrap()) as u32)
                }
                40..=89 => {
                    let s = take(&mut pos, 4)?;
                    Segment::Int(u32::from_be_bytes(data[s..s + 4].try_into().unwrap()))
                }
                90..=154 => {
                    let l = data[take(&mut pos, 1)?] as usize;
                    let s = take(&mut pos, l)?;
                    let text = std::str::from_utf8(&data[s..s + l])
                        .map_err(|_| ChainError::EvtLinkSegment(id))?;
                    Segment::Str(text.to_string())
                }
                _ => {
                    let s = take(&mut pos, 16)?;
                    Segment::Bytes16(data[s..s + 16].try_into().unwrap())
                }
            };
            segments.insert(id, seg);
        }

        let rest = &data[pos..];
        if rest.len() % 65 != 0 {
            return Err(ChainError::EvtLinkType);
        }
        let mut signatures = Vec::with_capacity(rest.len() / 65);
        for chunk in rest.chunks(65) {
            signatures.push(Signature::from_bytes(chunk)?);
        }
        Ok(Self { header, segments, signatures })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pay_link() -> EvtLink {
        let mut link = EvtLink::new(VERSION1 | EVERIPAY);
        link.set_int(TIMESTAMP, 1_500_000_000);
        link.set_int(SYMBOL_ID, 3);
        link.set_int(MAX_PAY, 5_000_000);
        link.set_bytes16(LINK_ID, *b"KIJHNHFMJDUKJUAA");
        link.signatures.push(Signature { rs: [9u8; 64], recovery: 1 });
        link
    }

    #[test]
    fn byte_roundtrip() {
        let link = sample_pay_link();
        let decoded = EvtLink::from_bytes(&link.to_bytes()).unwrap();
        assert_eq!(decoded, link);
    }

    #[test]
    fn pass_link_roundtrip() {
        let mut link = EvtLink::new(VERSION1 | EVERIPASS | DESTROY);
        link.set_int(TIMESTAMP, 1_500_000_000);
        link.set_str(DOMAIN, "domain1");
        link.set_str(TOKEN, "t1");
        let decoded = EvtLink::from_bytes(&link.to_bytes()).unwrap();
        assert_eq!(decoded, link);
        assert_eq!(decoded.str_(DOMAIN).unwrap(), "domain1");
    }

    #[test]
    fn max_pay_exclusive() {
        let mut link = sample_pay_link();
        assert_eq!(link.max_pay().unwrap(), 5_000_000);
        link.set_str(MAX_PAY_STR, "9000000000");
        assert!(matches!(link.max_pay(), Err(ChainError::EvtLinkType)));

        link.segments.remove(&MAX_PAY);
        assert_eq!(link.max_pay().unwrap(), 9_000_000_000);
    }

    #[test]
    fn signing_digest_excludes_signatures() {
        let mut link = sample_pay_link();
        let digest = link.signing_digest();
        link.signatures.push(Signature { rs: [1u8; 64], recovery: 0 });
        assert_eq!(link.signing_digest(), digest);
    }

    #[test]
    fn truncated_rejected() {
        let link = sample_pay_link();
        let bytes = link.to_bytes();
        assert!(EvtLink::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
