//! Fixed-width integer words.
//!
//! Every integer quantity that crosses a hardware datapath (track
//! parameters, residuals, table coefficients) is carried as a [`FixedWord`]:
//! the value together with its declared width and signedness. Construction
//! is range checked so that an emulated value can never silently exceed
//! what the firmware could hold.

use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An integer value with an explicit bit width and signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "WordRepr", into = "WordRepr"))]
pub struct FixedWord {
    value: i32,
    nbits: u32,
    signed: bool,
}

impl FixedWord {
    /// Widest supported word.
    pub const MAX_BITS: u32 = 31;

    /// Creates a range-checked word.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWidth`] for a width outside `1..=31` and
    /// [`Error::WordOverflow`] if `value` does not fit.
    pub fn new(value: i32, nbits: u32, signed: bool) -> Result<Self> {
        let (min, max) = Self::range(nbits, signed)?;
        let wide = i64::from(value);
        if wide < min || wide > max {
            return Err(Error::WordOverflow {
                value: wide,
                nbits,
                signed,
            });
        }
        Ok(Self {
            value,
            nbits,
            signed,
        })
    }

    /// Creates a range-checked unsigned word.
    ///
    /// # Errors
    /// See [`FixedWord::new`].
    pub fn unsigned(value: i32, nbits: u32) -> Result<Self> {
        Self::new(value, nbits, false)
    }

    /// Creates a range-checked two's complement word.
    ///
    /// # Errors
    /// See [`FixedWord::new`].
    pub fn signed(value: i32, nbits: u32) -> Result<Self> {
        Self::new(value, nbits, true)
    }

    /// Creates a word, clamping `value` into the representable range.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWidth`] for a width outside `1..=31`.
    pub fn saturating(value: i64, nbits: u32, signed: bool) -> Result<Self> {
        let (min, max) = Self::range(nbits, signed)?;
        let clamped = value.clamp(min, max);
        // Range is within i32 for widths up to 31 bits.
        #[allow(clippy::cast_possible_truncation)]
        let value = clamped as i32;
        Ok(Self {
            value,
            nbits,
            signed,
        })
    }

    /// Inclusive value range of a word of the given shape.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWidth`] for a width outside `1..=31`.
    pub fn range(nbits: u32, signed: bool) -> Result<(i64, i64)> {
        if nbits == 0 || nbits > Self::MAX_BITS {
            return Err(Error::InvalidWidth(nbits));
        }
        if signed {
            let half = 1i64 << (nbits - 1);
            Ok((-half, half - 1))
        } else {
            Ok((0, (1i64 << nbits) - 1))
        }
    }

    /// Returns the stored value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Returns the declared width.
    #[inline]
    #[must_use]
    pub fn nbits(&self) -> u32 {
        self.nbits
    }

    /// Returns true for two's complement words.
    #[inline]
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Renders the word as `nbits` binary digits, most significant first.
    #[must_use]
    pub fn to_bit_string(&self) -> String {
        (0..self.nbits)
            .rev()
            .map(|bit| if (self.value >> bit) & 1 == 1 { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for FixedWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bit_string())
    }
}

#[cfg(feature = "serde")]
#[derive(Serialize, Deserialize)]
struct WordRepr {
    value: i32,
    nbits: u32,
    #[serde(default)]
    signed: bool,
}

#[cfg(feature = "serde")]
impl TryFrom<WordRepr> for FixedWord {
    type Error = Error;

    fn try_from(repr: WordRepr) -> Result<Self> {
        Self::new(repr.value, repr.nbits, repr.signed)
    }
}

#[cfg(feature = "serde")]
impl From<FixedWord> for WordRepr {
    fn from(word: FixedWord) -> Self {
        Self {
            value: word.value,
            nbits: word.nbits,
            signed: word.signed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_range() {
        assert!(FixedWord::unsigned(63, 6).is_ok());
        assert!(matches!(
            FixedWord::unsigned(64, 6),
            Err(Error::WordOverflow { value: 64, nbits: 6, signed: false })
        ));
        assert!(FixedWord::unsigned(-1, 6).is_err());
    }

    #[test]
    fn test_signed_range() {
        assert!(FixedWord::signed(-8192, 14).is_ok());
        assert!(FixedWord::signed(8191, 14).is_ok());
        assert!(FixedWord::signed(8192, 14).is_err());
        assert!(FixedWord::signed(-8193, 14).is_err());
    }

    #[test]
    fn test_invalid_width() {
        assert!(matches!(FixedWord::unsigned(0, 0), Err(Error::InvalidWidth(0))));
        assert!(matches!(FixedWord::signed(0, 32), Err(Error::InvalidWidth(32))));
    }

    #[test]
    fn test_bit_strings() {
        assert_eq!(FixedWord::unsigned(5, 6).unwrap().to_bit_string(), "000101");
        assert_eq!(FixedWord::signed(-1, 4).unwrap().to_string(), "1111");
        assert_eq!(FixedWord::signed(-8192, 14).unwrap().to_string(), "10000000000000");
        assert_eq!(FixedWord::unsigned(1023, 10).unwrap().to_string(), "1111111111");
    }

    #[test]
    fn test_saturation() {
        let word = FixedWord::saturating(100_000, 14, true).unwrap();
        assert_eq!(word.value(), 8191);
        let word = FixedWord::saturating(-5, 7, false).unwrap();
        assert_eq!(word.value(), 0);
        let word = FixedWord::saturating(42, 7, false).unwrap();
        assert_eq!(word.value(), 42);
        assert_eq!(word.nbits(), 7);
        assert!(!word.is_signed());
    }
}
