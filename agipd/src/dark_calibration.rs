//! Read-only access to dark-run calibration constants.
//!
//! All tensors are laid out `(gain_mode, memory_cell, row, col)` with the
//! modules stacked along `row`, matching the `AnalogOffset`, `Badpixel` and
//! `DigitalGainLevel` datasets of a dark calibration file.

use ndarray::{Array4, ArrayView2, s};

use crate::constants::{MODULE_COLS, MODULE_COUNT, MODULE_ROWS};
use crate::error::{Error, Result};
use crate::gain_levels::{GainLevelTable, GainMode, Threshold};

/// Number of gain stages in the leading axis.
const GAIN_MODES: usize = 3;

#[derive(Debug, Clone)]
pub struct DarkCalibration {
    offset: Array4<f32>,
    bad_pixel: Array4<u8>,
    gain_level: Array4<f32>,
}

impl DarkCalibration {
    /// `bad_pixel` follows the file convention: nonzero marks a bad pixel.
    pub fn new(
        offset: Array4<f32>,
        bad_pixel: Array4<u8>,
        gain_level: Array4<f32>,
    ) -> Result<Self> {
        let shape = offset.shape();
        let (modes, rows, cols) = (shape[0], shape[2], shape[3]);
        if modes != GAIN_MODES || cols != MODULE_COLS || rows == 0 || rows % MODULE_ROWS != 0 {
            return Err(Error::shape_mismatch(
                "dark offset",
                &[GAIN_MODES, shape[1], MODULE_COUNT * MODULE_ROWS, MODULE_COLS],
                shape,
            ));
        }
        if bad_pixel.shape() != shape {
            return Err(Error::shape_mismatch("bad pixel mask", shape, bad_pixel.shape()));
        }
        if gain_level.shape() != shape {
            return Err(Error::shape_mismatch("gain levels", shape, gain_level.shape()));
        }
        Ok(Self {
            offset,
            bad_pixel,
            gain_level,
        })
    }

    #[inline]
    pub fn memory_cells(&self) -> usize {
        self.offset.shape()[1]
    }

    #[inline]
    pub fn module_count(&self) -> usize {
        self.offset.shape()[2] / MODULE_ROWS
    }

    fn check(&self, cell: usize, module_id: usize) -> Result<()> {
        if cell >= self.memory_cells() {
            return Err(Error::MemoryCellOutOfRange {
                cell,
                cell_count: self.memory_cells(),
            });
        }
        if module_id >= self.module_count() {
            return Err(Error::ModuleOutOfRange {
                module_id,
                module_count: self.module_count(),
            });
        }
        Ok(())
    }

    /// Dark offset of one module, `(512, 128)`.
    pub fn offset(&self, mode: GainMode, cell: usize, module_id: usize) -> Result<ArrayView2<'_, f32>> {
        self.check(cell, module_id)?;
        let rows = module_rows(module_id);
        Ok(self.offset.slice(s![mode.index(), cell, rows, ..]))
    }

    /// Bad-pixel flags of one module; nonzero is bad.
    pub fn bad_pixels(&self, mode: GainMode, cell: usize, module_id: usize) -> Result<ArrayView2<'_, u8>> {
        self.check(cell, module_id)?;
        let rows = module_rows(module_id);
        Ok(self.bad_pixel.slice(s![mode.index(), cell, rows, ..]))
    }

    /// Digital gain level of one module.
    pub fn gain_level(&self, mode: GainMode, cell: usize, module_id: usize) -> Result<ArrayView2<'_, f32>> {
        self.check(cell, module_id)?;
        let rows = module_rows(module_id);
        Ok(self.gain_level.slice(s![mode.index(), cell, rows, ..]))
    }

    /// Gain thresholds of one module and memory cell.
    pub fn gain_levels(&self, cell: usize, module_id: usize) -> Result<GainLevelTable> {
        let threshold = |mode| -> Result<Threshold> {
            Threshold::from_array(self.gain_level(mode, cell, module_id)?)
        };
        GainLevelTable::new(
            threshold(GainMode::High)?,
            threshold(GainMode::Medium)?,
            threshold(GainMode::Low)?,
        )
    }

    /// Gain thresholds of the full detector for one memory cell.
    pub fn detector_gain_levels(&self, cell: usize) -> Result<GainLevelTable> {
        if self.module_count() != MODULE_COUNT {
            return Err(Error::InvalidConfiguration(format!(
                "full-detector gain levels need {MODULE_COUNT} modules, calibration has {}",
                self.module_count()
            )));
        }
        self.check(cell, 0)?;
        let threshold = |mode: GainMode| -> Result<Threshold> {
            Threshold::from_array(self.gain_level.slice(s![mode.index(), cell, .., ..]))
        };
        GainLevelTable::new(
            threshold(GainMode::High)?,
            threshold(GainMode::Medium)?,
            threshold(GainMode::Low)?,
        )
    }
}

#[inline]
fn module_rows(module_id: usize) -> std::ops::Range<usize> {
    module_id * MODULE_ROWS..(module_id + 1) * MODULE_ROWS
}
