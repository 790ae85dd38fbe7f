//! Closed-open integer intervals over ADU space.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Half-open interval `[lower, higher)` of ADU values.
///
/// Addresses the same histogram sub-range both in absolute ADU coordinates
/// and as an index range into an array whose element `i` holds ADU
/// `lower + i` of some base ROI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(i32, i32)", into = "(i32, i32)")]
pub struct Roi {
    lower: i32,
    higher: i32,
}

impl Roi {
    /// Default histogram range of the high-gain peak search.
    pub const FULL_RANGE: Roi = Roi { lower: -50, higher: 150 };
    pub const ZERO_PHOTON: Roi = Roi { lower: -50, higher: 30 };
    pub const ONE_PHOTON: Roi = Roi { lower: 30, higher: 150 };
    /// Default range of high/medium gain ratios.
    pub const RELATIVE_GAIN: Roi = Roi { lower: 0, higher: 60 };

    pub fn new(lower: i32, higher: i32) -> Result<Self> {
        match higher.checked_sub(lower) {
            Some(span) if span >= 0 => Ok(Self { lower, higher }),
            _ => Err(Error::InvalidBounds { lower, higher }),
        }
    }

    #[inline]
    pub fn lower(&self) -> i32 {
        self.lower
    }

    #[inline]
    pub fn higher(&self) -> i32 {
        self.higher
    }

    /// Number of unit ADU bins covered.
    #[inline]
    pub fn len(&self) -> usize {
        (self.higher - self.lower) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower == self.higher
    }

    /// `(lower, higher)` as a histogram range.
    #[inline]
    pub fn bounds(&self) -> (i32, i32) {
        (self.lower, self.higher)
    }

    /// Index range for slicing. Negative bounds clamp to 0.
    pub fn index(&self) -> Range<usize> {
        self.lower.max(0) as usize..self.higher.max(0) as usize
    }

    /// The same interval expressed relative to `base.lower`.
    pub fn relative(&self, base: &Roi) -> Result<Roi> {
        let shift = |bound: i32| i32::try_from(bound as i64 - base.lower as i64).ok();
        match (shift(self.lower), shift(self.higher)) {
            (Some(lower), Some(higher)) => Ok(Roi { lower, higher }),
            _ => Err(Error::InvalidBounds {
                lower: self.lower,
                higher: self.higher,
            }),
        }
    }

    pub fn contains(&self, other: &Roi) -> bool {
        self.lower <= other.lower && other.higher <= self.higher
    }

    /// Index range of this ROI inside an array spanning `base`.
    pub fn index_within(&self, base: &Roi) -> Result<Range<usize>> {
        if !base.contains(self) {
            return Err(Error::RoiOutsideBase {
                roi: *self,
                base: *base,
            });
        }
        Ok(self.relative(base)?.index())
    }
}

impl TryFrom<(i32, i32)> for Roi {
    type Error = Error;

    fn try_from((lower, higher): (i32, i32)) -> Result<Self> {
        Roi::new(lower, higher)
    }
}

impl From<Roi> for (i32, i32) {
    fn from(roi: Roi) -> Self {
        roi.bounds()
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lower, self.higher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_inverted_bounds() {
        let err = Roi::new(10, -5).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidBounds {
                lower: 10,
                higher: -5
            }
        ));
    }

    #[test]
    fn test_empty_roi_is_valid() {
        let roi = Roi::new(7, 7).unwrap();
        assert!(roi.is_empty());
        assert_eq!(roi.len(), 0);
        assert_eq!(roi.index(), 7..7);
    }

    #[test]
    fn test_length_and_bounds() {
        for (lo, hi) in [(-50, 150), (-50, 30), (30, 150), (0, 60), (-3, -1)] {
            let roi = Roi::new(lo, hi).unwrap();
            assert_eq!(roi.len() as i32, hi - lo);
            assert_eq!(roi.bounds(), (lo, hi));
        }
    }

    #[test]
    fn test_relative_preserves_length() {
        let base = Roi::new(-50, 150).unwrap();
        let zero = Roi::new(-50, 30).unwrap();
        let one = Roi::new(30, 150).unwrap();

        let zero_rel = zero.relative(&base).unwrap();
        let one_rel = one.relative(&base).unwrap();
        assert_eq!(zero_rel.bounds(), (0, 80));
        assert_eq!(one_rel.bounds(), (80, 200));
        assert_eq!(zero_rel.len(), zero.len());
        assert_eq!(one_rel.len(), one.len());
    }

    #[test]
    fn test_span_beyond_i32_rejected() {
        let err = Roi::new(i32::MIN, i32::MAX).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidBounds {
                lower: i32::MIN,
                higher: i32::MAX
            }
        ));
        assert!(Roi::new(-1, i32::MAX).is_err());
        let widest = Roi::new(0, i32::MAX).unwrap();
        assert_eq!(widest.len(), i32::MAX as usize);
    }

    #[test]
    fn test_relative_out_of_range_rejected() {
        let base = Roi::new(i32::MIN, -1).unwrap();
        let far = Roi::new(i32::MAX - 1, i32::MAX).unwrap();
        assert!(matches!(
            far.relative(&base),
            Err(Error::InvalidBounds { .. })
        ));
        assert!(matches!(
            far.index_within(&base),
            Err(Error::RoiOutsideBase { .. })
        ));
    }

    #[test]
    fn test_index_clamps_negative_bounds() {
        let roi = Roi::new(-10, 5).unwrap();
        assert_eq!(roi.index(), 0..5);
        let roi = Roi::new(-10, -2).unwrap();
        assert_eq!(roi.index(), 0..0);
    }

    #[test]
    fn test_index_within_checks_containment() {
        let base = Roi::new(-50, 150).unwrap();
        let one = Roi::new(30, 150).unwrap();
        assert_eq!(one.index_within(&base).unwrap(), 80..200);

        let outside = Roi::new(100, 200).unwrap();
        let err = outside.index_within(&base).unwrap_err();
        assert!(matches!(err, Error::RoiOutsideBase { .. }));
    }

    #[test]
    fn test_display() {
        assert_eq!(Roi::new(-50, 30).unwrap().to_string(), "[-50, 30)");
    }

    #[test]
    fn test_serde_pair_round_trip_and_validation() {
        let roi = Roi::new(-50, 150).unwrap();
        let json = serde_json::to_string(&roi).unwrap();
        assert_eq!(json, "[-50,150]");
        let parsed: Roi = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, roi);

        let invalid: std::result::Result<Roi, _> = serde_json::from_str("[30,-50]");
        assert!(invalid.is_err());
    }
}
