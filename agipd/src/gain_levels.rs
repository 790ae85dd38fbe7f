//! Gain-mode classification from digital gain indicators.

use ndarray::{
    Array, Array2, Array3, ArrayView, ArrayView2, ArrayView3, CowArray, Dimension, Ix2, Zip, s,
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::constants::{
    DETECTOR_SHAPE, HG_LEVEL, LG_LEVEL, MG_LEVEL, MODULE_COLS, MODULE_COUNT, MODULE_ROWS,
    MODULE_SHAPE,
};
use crate::error::{Error, Result};

/// The three AGIPD gain stages, in mask order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GainMode {
    High = 0,
    Medium = 1,
    Low = 2,
}

impl GainMode {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn mask_value(self) -> u8 {
        self as u8
    }

    pub fn from_mask(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Medium),
            2 => Some(Self::Low),
            _ => None,
        }
    }
}

/// One gain threshold: a scalar, one module tiled over the detector, or
/// the full detector.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Scalar(f32),
    Module(Array2<f32>),
    Detector(Array2<f32>),
}

impl Threshold {
    /// Accepts `(512, 128)` or `(8192, 128)` arrays.
    pub fn from_array(values: ArrayView2<f32>) -> Result<Self> {
        match values.dim() {
            MODULE_SHAPE => Ok(Self::Module(values.to_owned())),
            DETECTOR_SHAPE => Ok(Self::Detector(values.to_owned())),
            (rows, cols) => Err(Error::InvalidConfiguration(format!(
                "threshold array must be {MODULE_SHAPE:?} or {DETECTOR_SHAPE:?}, got ({rows}, {cols})"
            ))),
        }
    }

    /// Thresholds of one module, `(512, 128)`.
    fn module(&self, module_id: usize) -> CowArray<'_, f32, Ix2> {
        match self {
            Self::Scalar(value) => Array2::from_elem(MODULE_SHAPE, *value).into(),
            Self::Module(values) => values.view().into(),
            Self::Detector(values) => {
                let start = module_id * MODULE_ROWS;
                values.slice(s![start..start + MODULE_ROWS, ..]).into()
            }
        }
    }
}

impl From<f32> for Threshold {
    fn from(value: f32) -> Self {
        Self::Scalar(value)
    }
}

/// High, medium and low gain thresholds.
///
/// A reading is classified `(indicator > medium) + (indicator > low)`:
/// 0 is high gain, 1 medium, 2 low.
#[derive(Debug, Clone, PartialEq)]
pub struct GainLevelTable {
    high: Threshold,
    medium: Threshold,
    low: Threshold,
}

impl Default for GainLevelTable {
    fn default() -> Self {
        Self {
            high: Threshold::Scalar(HG_LEVEL),
            medium: Threshold::Scalar(MG_LEVEL),
            low: Threshold::Scalar(LG_LEVEL),
        }
    }
}

impl GainLevelTable {
    /// Builds a table, rejecting thresholds that are not `high <= medium < low`.
    pub fn new(
        high: impl Into<Threshold>,
        medium: impl Into<Threshold>,
        low: impl Into<Threshold>,
    ) -> Result<Self> {
        let table = Self {
            high: high.into(),
            medium: medium.into(),
            low: low.into(),
        };
        table.validate()?;
        Ok(table)
    }

    pub fn from_scalars(high: f32, medium: f32, low: f32) -> Result<Self> {
        Self::new(high, medium, low)
    }

    pub fn threshold(&self, mode: GainMode) -> &Threshold {
        match mode {
            GainMode::High => &self.high,
            GainMode::Medium => &self.medium,
            GainMode::Low => &self.low,
        }
    }

    fn validate(&self) -> Result<()> {
        let all_scalar = [&self.high, &self.medium, &self.low]
            .iter()
            .all(|t| matches!(t, Threshold::Scalar(_)));
        let modules = if all_scalar { 1 } else { MODULE_COUNT };

        for module_id in 0..modules {
            let high = self.high.module(module_id);
            let medium = self.medium.module(module_id);
            let low = self.low.module(module_id);
            let ordered = Zip::from(&high)
                .and(&medium)
                .and(&low)
                .all(|&h, &m, &l| h <= m && m < l);
            if !ordered {
                return Err(Error::InvalidConfiguration(format!(
                    "gain thresholds of module {module_id} are not ordered high <= medium < low"
                )));
            }
        }
        Ok(())
    }

    fn check_module(&self, module_id: usize) -> Result<()> {
        if module_id >= MODULE_COUNT {
            return Err(Error::ModuleOutOfRange {
                module_id,
                module_count: MODULE_COUNT,
            });
        }
        Ok(())
    }

    /// Gain-mode mask for any array whose two trailing axes are one module.
    fn mask_any<D: Dimension>(
        &self,
        indicator: ArrayView<u16, D>,
        module_id: usize,
    ) -> Result<Array<u8, D>> {
        self.check_module(module_id)?;
        let shape = indicator.shape();
        let ndim = shape.len();
        if ndim < 2 || shape[ndim - 2..] != [MODULE_ROWS, MODULE_COLS] {
            let mut expected = shape[..ndim.saturating_sub(2)].to_vec();
            expected.extend([MODULE_ROWS, MODULE_COLS]);
            return Err(Error::shape_mismatch("gain indicator", &expected, shape));
        }

        let medium = self.medium.module(module_id);
        let low = self.low.module(module_id);
        let broadcast_error =
            || Error::shape_mismatch("gain indicator", &[MODULE_ROWS, MODULE_COLS], shape);
        let medium = medium
            .broadcast(indicator.raw_dim())
            .ok_or_else(broadcast_error)?;
        let low = low.broadcast(indicator.raw_dim()).ok_or_else(broadcast_error)?;

        Ok(Zip::from(&indicator)
            .and(&medium)
            .and(&low)
            .map_collect(|&g, &m, &l| gain_mode_of(g, m, l)))
    }

    /// Gain-mode mask of one module frame.
    pub fn mask(&self, indicator: ArrayView2<u16>, module_id: usize) -> Result<Array2<u8>> {
        self.mask_any(indicator, module_id)
    }

    /// Gain-mode masks of a `(frame, row, col)` batch.
    pub fn mask_frames(&self, indicators: ArrayView3<u16>, module_id: usize) -> Result<Array3<u8>> {
        self.mask_any(indicators, module_id)
    }

    /// Readings whose gain mode equals `mode`, in iteration order.
    pub fn select<D: Dimension>(
        &self,
        data: ArrayView<u16, D>,
        indicator: ArrayView<u16, D>,
        module_id: usize,
        mode: GainMode,
    ) -> Result<Vec<f32>> {
        if data.shape() != indicator.shape() {
            return Err(Error::shape_mismatch(
                "frame data",
                indicator.shape(),
                data.shape(),
            ));
        }
        let mask = self.mask_any(indicator, module_id)?;
        let wanted = mode.mask_value();
        Ok(data
            .iter()
            .zip(mask.iter())
            .filter(|(_, m)| **m == wanted)
            .map(|(&v, _)| v as f32)
            .collect())
    }
}

#[inline]
fn gain_mode_of(indicator: u16, medium: f32, low: f32) -> u8 {
    let value = indicator as f32;
    (value > medium) as u8 + (value > low) as u8
}
