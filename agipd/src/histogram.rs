//! Unit-width ADU histograms.

use crate::error::{Error, Result};
use crate::roi::Roi;

/// Histogram with one bin per ADU over a [`Roi`].
///
/// Bin `i` spans `[origin + i, origin + i + 1)`; the last bin also includes
/// its right edge. Counts are stored as `f64` so the same buffer can carry
/// the log transform and fit residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    roi: Roi,
    origin: f64,
    counts: Vec<f64>,
}

impl Histogram {
    /// Bins aligned with the ROI: bin `i` is centred on `lower + i + 0.5`.
    pub fn from_values<I>(values: I, roi: Roi) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self::build(values, roi, roi.lower() as f64)
    }

    /// Bins shifted by half an ADU so bin `i` is centred on `lower + i + 1`.
    /// The centres run over `lower + 1 ..= higher`, so a value equal to
    /// `higher` is counted and `lower` itself is not.
    pub fn integer_centred<I>(values: I, roi: Roi) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self::build(values, roi, roi.lower() as f64 + 0.5)
    }

    /// Wraps already computed bin values, aligned like [`Histogram::from_values`].
    pub fn from_counts(roi: Roi, counts: Vec<f64>) -> Result<Self> {
        if counts.len() != roi.len() {
            return Err(Error::shape_mismatch(
                "histogram counts",
                &[roi.len()],
                &[counts.len()],
            ));
        }
        Ok(Self {
            roi,
            origin: roi.lower() as f64,
            counts,
        })
    }

    fn build<I>(values: I, roi: Roi, origin: f64) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let len = roi.len();
        let mut counts = vec![0.0; len];
        let upper = origin + len as f64;
        for value in values {
            if !(value >= origin && value <= upper) {
                continue;
            }
            let bin = ((value - origin).floor() as usize).min(len.saturating_sub(1));
            if let Some(count) = counts.get_mut(bin) {
                *count += 1.0;
            }
        }
        Self { roi, origin, counts }
    }

    #[inline]
    pub fn roi(&self) -> Roi {
        self.roi
    }

    #[inline]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.counts.iter().copied().fold(0.0, f64::max)
    }

    #[inline]
    pub fn centre(&self, bin: usize) -> f64 {
        self.origin + bin as f64 + 0.5
    }

    pub fn centres(&self) -> Vec<f64> {
        (0..self.len()).map(|bin| self.centre(bin)).collect()
    }

    /// Bin holding ADU 0, if it has a neighbour on both sides.
    fn zero_bin(&self) -> Option<usize> {
        if self.origin > 0.0 {
            return None;
        }
        let bin = (-self.origin).floor() as usize;
        (bin >= 1 && bin + 1 < self.len()).then_some(bin)
    }

    /// Replaces the ADU-0 bin with the mean of its two neighbours.
    ///
    /// Returns `false` when the histogram does not straddle 0.
    pub fn suppress_zero_bin(&mut self) -> bool {
        let Some(bin) = self.zero_bin() else {
            return false;
        };
        self.counts[bin] = 0.5 * (self.counts[bin - 1] + self.counts[bin + 1]);
        true
    }

    /// `ln(max(count, 1))` shifted so the smallest bin is 0.
    pub fn log_transform(&mut self) {
        for count in &mut self.counts {
            *count = count.max(1.0).ln();
        }
        let min = self.counts.iter().copied().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            for count in &mut self.counts {
                *count -= min;
            }
        }
    }
}

/// Index of the first maximum, numpy-style. `None` for an empty slice.
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if !(v > b) => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
