//! Log sequence numbers.
//!
//! An [`Lsn`] is a 64-bit position in the database's write-ahead log.
//! The text form is the usual `XXXXXXXX/XXXXXXXX` pair of hexadecimal
//! words (high 32 bits, slash, low 32 bits).

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing an LSN's text representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lsn: {0:?}")]
pub struct LsnParseError(pub String);

/// A 64-bit write-ahead log position.
///
/// # Invariants
///
/// - Monotonically non-decreasing for a node while it stays primary, and
///   for standbys while replication is continuous.
/// - `Lsn::INVALID` (zero) sorts before every valid position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Lsn(u64);

impl Lsn {
    /// The invalid (unset) position, `0/0`.
    pub const INVALID: Lsn = Lsn(0);

    /// Creates an LSN from its 64-bit value.
    pub fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    /// Returns the LSN as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the invalid position.
    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }

    /// Bytes between `self` and an earlier position.
    ///
    /// Returns 0 if `earlier` is actually ahead.
    pub fn distance_from(&self, earlier: Lsn) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s.split_once('/').ok_or_else(|| LsnParseError(s.into()))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| LsnParseError(s.into()))?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| LsnParseError(s.into()))?;
        Ok(Lsn((u64::from(hi) << 32) | u64::from(lo)))
    }
}

impl From<u64> for Lsn {
    fn from(lsn: u64) -> Self {
        Self(lsn)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_round_trips() {
        for text in ["0/0", "0/1000", "16/B374D848", "FFFFFFFF/FFFFFFFF"] {
            let lsn: Lsn = text.parse().unwrap();
            assert_eq!(lsn.to_string(), text);
        }
    }

    #[test]
    fn parses_lowercase_hex() {
        let lsn: Lsn = "16/b374d848".parse().unwrap();
        assert_eq!(lsn.to_string(), "16/B374D848");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("".parse::<Lsn>().is_err());
        assert!("0".parse::<Lsn>().is_err());
        assert!("0/xyz".parse::<Lsn>().is_err());
        assert!("0/1000/2000".parse::<Lsn>().is_err());
    }

    #[test]
    fn ordering_follows_the_64_bit_value() {
        let a: Lsn = "0/1000".parse().unwrap();
        let b: Lsn = "1/0".parse().unwrap();
        assert!(a < b);
        assert_eq!(b.distance_from(a), (1u64 << 32) - 0x1000);
        assert_eq!(a.distance_from(b), 0); // saturating
    }

    #[test]
    fn invalid_sorts_first() {
        let any: Lsn = "0/1".parse().unwrap();
        assert!(Lsn::INVALID < any);
        assert!(Lsn::INVALID.is_invalid());
    }
}
