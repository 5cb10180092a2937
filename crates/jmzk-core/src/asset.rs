use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChainError;
use crate::types::SymbolId;

/// Symbol id of the native EVT fungible.
pub const EVT_SYM_ID: SymbolId = 1;
/// Symbol id of Pinned EVT, the non-transferable variant.
pub const PEVT_SYM_ID: SymbolId = 2;

pub fn evt_sym() -> Symbol {
    Symbol::new(5, EVT_SYM_ID)
}

pub fn pevt_sym() -> Symbol {
    Symbol::new(5, PEVT_SYM_ID)
}

/// Net-asset-value symbol used for validator net values (12 decimals of
/// headroom for the time-geometric growth curve).
pub fn nav_sym() -> Symbol {
    Symbol::new(12, EVT_SYM_ID)
}

// ── Symbol ───────────────────────────────────────────────────────────────────

/// `{precision, id}`; rendered as `5,S#1`. Precision is capped at 18.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    precision: u8,
    id: SymbolId,
}

impl Symbol {
    pub const MAX_PRECISION: u8 = 18;

    pub fn new(precision: u8, id: SymbolId) -> Self {
        debug_assert!(precision <= Self::MAX_PRECISION);
        Self { precision, id }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn id(&self) -> SymbolId {
        self.id
    }

    pub fn valid(&self) -> bool {
        self.precision <= Self::MAX_PRECISION
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},S#{}", self.precision, self.id)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({self})")
    }
}

impl FromStr for Symbol {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (p, rest) = s
            .split_once(",S#")
            .ok_or_else(|| ChainError::AssetSymbol(s.to_string()))?;
        let precision: u8 = p.parse().map_err(|_| ChainError::AssetSymbol(s.to_string()))?;
        let id: SymbolId = rest.parse().map_err(|_| ChainError::AssetSymbol(s.to_string()))?;
        if precision > Self::MAX_PRECISION {
            return Err(ChainError::AssetSymbol(s.to_string()));
        }
        Ok(Self { precision, id })
    }
}

// ── Asset ────────────────────────────────────────────────────────────────────

/// A fixed-point amount of some fungible: `{amount, sym}` where `amount` is
/// scaled by `10^precision`. Rendered as `"50.00000 S#3"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    amount: i64,
    sym: Symbol,
}

impl Asset {
    pub const MAX_AMOUNT: i64 = (1 << 62) - 1;

    pub fn new(amount: i64, sym: Symbol) -> Self {
        Self { amount, sym }
    }

    /// `n` whole units, e.g. `from_units(2, nav_sym())` is a net value of 2.0.
    pub fn from_units(n: i64, sym: Symbol) -> Self {
        Self { amount: n * 10i64.pow(sym.precision() as u32), sym }
    }

    pub fn zero(sym: Symbol) -> Self {
        Self { amount: 0, sym }
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn sym(&self) -> Symbol {
        self.sym
    }

    pub fn checked_add(&self, n: i64) -> Result<Asset, ChainError> {
        let amount = self.amount.checked_add(n).ok_or(ChainError::MathOverflow)?;
        if amount > Self::MAX_AMOUNT {
            return Err(ChainError::MathOverflow);
        }
        Ok(Asset { amount, sym: self.sym })
    }

    pub fn checked_sub(&self, n: i64) -> Result<Asset, ChainError> {
        let amount = self.amount.checked_sub(n).ok_or(ChainError::MathOverflow)?;
        Ok(Asset { amount, sym: self.sym })
    }

    /// Parse `"50.00000 S#3"`. The fractional part must carry exactly the
    /// symbol's precision; a mismatch is rejected rather than rescaled.
    pub fn from_string(s: &str) -> Result<Self, ChainError> {
        let (num, sym_part) = s
            .split_once(" S#")
            .ok_or_else(|| ChainError::AssetSymbol(s.to_string()))?;
        let id: SymbolId = sym_part.parse().map_err(|_| ChainError::AssetSymbol(s.to_string()))?;

        let (neg, num) = match num.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, num),
        };
        let (int_part, frac_part) = num.split_once('.').unwrap_or((num, ""));
        if frac_part.len() > Symbol::MAX_PRECISION as usize {
            return Err(ChainError::AssetSymbol(s.to_string()));
        }
        let precision = frac_part.len() as u8;

        let mut amount: i64 = int_part.parse().map_err(|_| ChainError::AssetSymbol(s.to_string()))?;
        for c in frac_part.bytes() {
            if !c.is_ascii_digit() {
                return Err(ChainError::AssetSymbol(s.to_string()));
            }
            amount = amount
                .checked_mul(10)
                .and_then(|a| a.checked_add((c - b'0') as i64))
                .ok_or(ChainError::MathOverflow)?;
        }
        if neg {
            amount = -amount;
        }
        Ok(Self { amount, sym: Symbol::new(precision, id) })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.sym.precision() as u32;
        let scale = 10i64.pow(p);
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        if p == 0 {
            write!(f, "{sign}{abs} S#{}", self.sym.id())
        } else {
            write!(
                f,
                "{sign}{}.{:0width$} S#{}",
                abs / scale as u64,
                abs % scale as u64,
                self.sym.id(),
                width = p as usize
            )
        }
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset({self})")
    }
}

impl FromStr for Asset {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

// ── Percent ──────────────────────────────────────────────────────────────────

/// Fixed-point ratio scaled by 10^5, parsed from decimal strings such as
/// `"0.15"`. Bonus rates, distribution rules and validator commissions are
/// all percents in [0, 1].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Percent(pub u32);

pub const PERCENT_SCALE: u32 = 100_000;

impl Percent {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn one() -> Self {
        Self(PERCENT_SCALE)
    }

    pub fn is_valid_ratio(&self) -> bool {
        self.0 <= PERCENT_SCALE
    }

    /// Floor of `amount * self`.
    pub fn apply(&self, amount: i64) -> i64 {
        ((amount as i128 * self.0 as i128) / PERCENT_SCALE as i128) as i64
    }
}

impl FromStr for Percent {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        if frac_part.len() > 5 || int_part.is_empty() {
            return Err(ChainError::PercentValue(s.to_string()));
        }
        let int: u32 = int_part.parse().map_err(|_| ChainError::PercentValue(s.to_string()))?;
        let mut frac = 0u32;
        for c in frac_part.bytes() {
            if !c.is_ascii_digit() {
                return Err(ChainError::PercentValue(s.to_string()));
            }
            frac = frac * 10 + (c - b'0') as u32;
        }
        frac *= 10u32.pow(5 - frac_part.len() as u32);
        int.checked_mul(PERCENT_SCALE)
            .and_then(|v| v.checked_add(frac))
            .map(Percent)
            .ok_or_else(|| ChainError::PercentValue(s.to_string()))
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int = self.0 / PERCENT_SCALE;
        let frac = self.0 % PERCENT_SCALE;
        if frac == 0 {
            return write!(f, "{int}");
        }
        let s = format!("{frac:05}");
        write!(f, "{int}.{}", s.trim_end_matches('0'))
    }
}

impl fmt::Debug for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Percent({self})")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_string_roundtrip() {
        let a = Asset::from_string("50.00000 S#3").unwrap();
        assert_eq!(a.amount(), 5_000_000);
        assert_eq!(a.sym(), Symbol::new(5, 3));
        assert_eq!(a.to_string(), "50.00000 S#3");
    }

    #[test]
    fn asset_zero_precision() {
        let a = Asset::from_string("42 S#9").unwrap();
        assert_eq!(a.amount(), 42);
        assert_eq!(a.sym().precision(), 0);
        assert_eq!(a.to_string(), "42 S#9");
    }

    #[test]
    fn asset_negative() {
        let a = Asset::from_string("-1.00000 S#1").unwrap();
        assert_eq!(a.amount(), -100_000);
        assert_eq!(a.to_string(), "-1.00000 S#1");
    }

    #[test]
    fn asset_garbage_rejected() {
        assert!(Asset::from_string("50.00000").is_err());
        assert!(Asset::from_string("5x.00000 S#3").is_err());
        assert!(Asset::from_string("1.0000000000000000000 S#3").is_err());
    }

    #[test]
    fn checked_math() {
        let a = Asset::new(i64::MAX - 1, evt_sym());
        assert!(a.checked_add(10).is_err());
        let b = Asset::new(5, evt_sym());
        assert_eq!(b.checked_sub(10).unwrap().amount(), -5);
    }

    #[test]
    fn percent_parse() {
        assert_eq!("0.15".parse::<Percent>().unwrap().0, 15_000);
        assert_eq!("0.5".parse::<Percent>().unwrap().0, 50_000);
        assert_eq!("1".parse::<Percent>().unwrap(), Percent::one());
        assert_eq!("0.99".parse::<Percent>().unwrap().apply(100_000), 99_000);
        assert!("1.2".parse::<Percent>().unwrap().is_valid_ratio() == false);
        assert!("x".parse::<Percent>().is_err());
    }

    #[test]
    fn percent_display() {
        assert_eq!("0.15".parse::<Percent>().unwrap().to_string(), "0.15");
        assert_eq!("0.5".parse::<Percent>().unwrap().to_string(), "0.5");
        assert_eq!(Percent::one().to_string(), "1");
    }
}
