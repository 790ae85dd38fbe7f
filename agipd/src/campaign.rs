//! Per-memory-cell photon-peak calibration of one detector module.

use ndarray::{ArrayView3, Zip};

use crate::dark_calibration::DarkCalibration;
use crate::error::{Error, Result};
use crate::frames::{FrameBatch, FrameSource, memory_cell};
use crate::gain_levels::{GainLevelTable, GainMode};
use crate::peak_fit::{PeakFitEngine, PhotonPeaks};
use crate::roi::Roi;

/// Histogram windows of the high-gain peak search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakRois {
    pub full: Roi,
    pub zero: Roi,
    pub one: Roi,
}

impl PeakRois {
    pub fn new(full: Roi, zero: Roi, one: Roi) -> Result<Self> {
        zero.index_within(&full)?;
        one.index_within(&full)?;
        Ok(Self { full, zero, one })
    }
}

/// Fitted peaks of one memory cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCalibration {
    pub pulse_id: u64,
    pub memory_cell: usize,
    pub peaks: PhotonPeaks,
}

impl CellCalibration {
    #[inline]
    pub fn offset(&self) -> f64 {
        self.peaks.zero_adu
    }

    #[inline]
    pub fn gain(&self) -> f64 {
        self.peaks.gain()
    }
}

/// Runs `hg_calibrate` for every requested pulse id of one module.
///
/// Without a dark calibration, readings are classified with a fixed table and
/// histogrammed as raw ADU. With one, each cell uses its own gain levels and
/// the high-gain offset and bad-pixel map are applied first.
pub struct ModuleCalibrator<'a> {
    engine: PeakFitEngine,
    levels: GainLevelTable,
    rois: PeakRois,
    max_in_flight: usize,
    trim_limit: Option<u16>,
    dark: Option<&'a DarkCalibration>,
}

impl<'a> ModuleCalibrator<'a> {
    pub fn new(engine: PeakFitEngine, levels: GainLevelTable, rois: PeakRois) -> Self {
        Self {
            engine,
            levels,
            rois,
            max_in_flight: 0,
            trim_limit: None,
            dark: None,
        }
    }

    /// Cells fitted at once; 0 means one per rayon thread.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Only frames with a reading above `limit` take part in the fits.
    pub fn with_trim_limit(mut self, limit: u16) -> Self {
        self.trim_limit = Some(limit);
        self
    }

    pub fn with_dark(mut self, dark: &'a DarkCalibration) -> Self {
        self.dark = Some(dark);
        self
    }

    pub fn engine(&self) -> &PeakFitEngine {
        &self.engine
    }

    pub fn rois(&self) -> PeakRois {
        self.rois
    }

    /// Calibrates the cells of `pulse_ids`, returning results in request
    /// order. The first failing cell aborts the module.
    pub fn calibrate(
        &self,
        source: &impl FrameSource,
        module_id: usize,
        pulse_ids: &[u64],
    ) -> Result<Vec<CellCalibration>> {
        let in_flight = common::parallel::in_flight_limit(self.max_in_flight);
        tracing::info!(
            module_id,
            cells = pulse_ids.len(),
            in_flight,
            "Calibrating module"
        );

        let cells = common::parallel::try_par_map_bounded(pulse_ids, in_flight, |&pulse_id| {
            self.calibrate_cell(source, module_id, pulse_id)
                .map_err(|err| Error::CellCalibration {
                    pulse_id,
                    source: Box::new(err),
                })
        })?;

        tracing::info!(module_id, cells = cells.len(), "Module calibrated");
        Ok(cells)
    }

    fn calibrate_cell(
        &self,
        source: &impl FrameSource,
        module_id: usize,
        pulse_id: u64,
    ) -> Result<CellCalibration> {
        let cell = memory_cell(pulse_id);
        let mut frames = source.frames_for_pulse(pulse_id)?;
        if let Some(limit) = self.trim_limit {
            frames = frames.trim(limit);
        }
        let values = self.high_gain_values(&frames, cell, module_id)?;

        let PeakRois { full, zero, one } = self.rois;
        let peaks = self.engine.hg_calibrate(&values, full, zero, one)?;
        tracing::debug!(
            pulse_id,
            cell,
            frames = frames.len(),
            samples = values.len(),
            offset = peaks.zero_adu,
            gain = peaks.gain(),
            "Calibrated memory cell"
        );

        Ok(CellCalibration {
            pulse_id,
            memory_cell: cell,
            peaks,
        })
    }

    fn high_gain_values(
        &self,
        frames: &FrameBatch,
        cell: usize,
        module_id: usize,
    ) -> Result<Vec<f32>> {
        match self.dark {
            None => self
                .levels
                .select(frames.data(), frames.gain(), module_id, GainMode::High),
            Some(dark) => {
                let levels = dark.gain_levels(cell, module_id)?;
                dark_corrected_high_gain(frames.data(), frames.gain(), &levels, dark, cell, module_id)
            }
        }
    }
}

/// High-gain readings of good pixels with the dark offset subtracted.
fn dark_corrected_high_gain(
    data: ArrayView3<u16>,
    indicators: ArrayView3<u16>,
    levels: &GainLevelTable,
    dark: &DarkCalibration,
    cell: usize,
    module_id: usize,
) -> Result<Vec<f32>> {
    let mask = levels.mask_frames(indicators, module_id)?;
    let offset = dark.offset(GainMode::High, cell, module_id)?;
    let bad = dark.bad_pixels(GainMode::High, cell, module_id)?;
    let shape_error = || Error::shape_mismatch("frame data", offset.shape(), data.shape());
    let offset = offset.broadcast(data.raw_dim()).ok_or_else(shape_error)?;
    let bad = bad.broadcast(data.raw_dim()).ok_or_else(shape_error)?;

    let wanted = GainMode::High.mask_value();
    let mut values = Vec::new();
    Zip::from(&data)
        .and(&mask)
        .and(&offset)
        .and(&bad)
        .for_each(|&raw, &m, &o, &b| {
            if m == wanted && b == 0 {
                values.push(raw as f32 - o);
            }
        });
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    use crate::constants::{MODULE_COLS, MODULE_ROWS};
    use crate::testing::{init_tracing, photon_peak_samples, uniform_dark};

    const FRAMES_PER_PULSE: usize = 2;

    fn rois() -> PeakRois {
        PeakRois::new(
            Roi::new(-50, 150).unwrap(),
            Roi::new(-50, 30).unwrap(),
            Roi::new(30, 150).unwrap(),
        )
        .unwrap()
    }

    /// Frames whose readings follow the photon-peak mixture at `offset`,
    /// two frames per pulse id, all in high gain.
    fn dark_run(pulses: &[(u64, f64)]) -> FrameBatch {
        let pixels = MODULE_ROWS * MODULE_COLS;
        let mut data = Vec::new();
        let mut pulse_ids = Vec::new();
        for &(pulse_id, offset) in pulses {
            let samples = photon_peak_samples(FRAMES_PER_PULSE * pixels, offset, 60.0);
            data.extend(samples.iter().map(|&v| v.max(0.0) as u16));
            pulse_ids.extend(std::iter::repeat_n(pulse_id, FRAMES_PER_PULSE));
        }
        let frames = pulse_ids.len();
        let data = Array3::from_shape_vec((frames, MODULE_ROWS, MODULE_COLS), data).unwrap();
        let gain = Array3::zeros(data.raw_dim());
        let train_ids = (0..frames as u64).collect();
        FrameBatch::new(data, gain, train_ids, pulse_ids).unwrap()
    }

    #[test]
    fn test_cells_returned_in_request_order() {
        init_tracing();
        let frames = dark_run(&[(0, 5.0), (4, 10.0), (8, 15.0)]);
        let calibrator =
            ModuleCalibrator::new(PeakFitEngine::default(), GainLevelTable::default(), rois())
                .with_max_in_flight(2);

        let cells = calibrator.calibrate(&frames, 0, &[8, 0, 4]).unwrap();

        let pulse_ids: Vec<u64> = cells.iter().map(|c| c.pulse_id).collect();
        assert_eq!(pulse_ids, vec![8, 0, 4]);
        assert_eq!(cells[0].memory_cell, 2);
        for (cell, expected) in cells.iter().zip([15.0, 5.0, 10.0]) {
            assert!((cell.offset() - expected).abs() <= 2.0, "{cell:?}");
            assert!((cell.gain() - 60.0).abs() <= 6.0, "{cell:?}");
        }
    }

    #[test]
    fn test_trim_limit_drops_quiet_frames() {
        let mut frames = dark_run(&[(0, 5.0)]);
        let calibrator =
            ModuleCalibrator::new(PeakFitEngine::default(), GainLevelTable::default(), rois());
        assert!(calibrator.calibrate(&frames, 0, &[0]).is_ok());

        let trimmed = calibrator.with_trim_limit(20000);
        let err = trimmed.calibrate(&frames, 0, &[0]).unwrap_err();
        assert!(matches!(err, Error::CellCalibration { pulse_id: 0, .. }));

        // A single bright pixel keeps the whole frame.
        frames = with_bright_pixel(frames);
        assert!(trimmed.calibrate(&frames, 0, &[0]).is_ok());
    }

    fn with_bright_pixel(frames: FrameBatch) -> FrameBatch {
        let mut data = frames.data().to_owned();
        data.slice_mut(ndarray::s![.., 0, 0]).fill(30000);
        FrameBatch::new(
            data,
            frames.gain().to_owned(),
            frames.train_ids().to_vec(),
            frames.pulse_ids().to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_dark_offset_is_subtracted() {
        let frames = dark_run(&[(4, 20.0)]);
        let dark = uniform_dark(2, 1, [20.0, 0.0, 0.0], [0.0, 6000.0, 32000.0]);
        let calibrator =
            ModuleCalibrator::new(PeakFitEngine::default(), GainLevelTable::default(), rois())
                .with_dark(&dark);

        let cells = calibrator.calibrate(&frames, 0, &[4]).unwrap();
        assert_eq!(cells[0].memory_cell, 1);
        assert!(cells[0].offset().abs() <= 2.0, "{:?}", cells[0]);
    }

    #[test]
    fn test_missing_pulse_names_failing_cell() {
        let frames = dark_run(&[(0, 10.0)]);
        let calibrator =
            ModuleCalibrator::new(PeakFitEngine::default(), GainLevelTable::default(), rois());

        let err = calibrator.calibrate(&frames, 0, &[0, 12]).unwrap_err();
        match err {
            Error::CellCalibration { pulse_id, source } => {
                assert_eq!(pulse_id, 12);
                assert!(matches!(*source, Error::EmptyHistogram { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dark_cell_out_of_range() {
        let frames = dark_run(&[(8, 10.0)]);
        let dark = uniform_dark(1, 1, [0.0; 3], [0.0, 6000.0, 32000.0]);
        let calibrator =
            ModuleCalibrator::new(PeakFitEngine::default(), GainLevelTable::default(), rois())
                .with_dark(&dark);

        let err = calibrator.calibrate(&frames, 0, &[8]).unwrap_err();
        assert!(
            matches!(&err, Error::CellCalibration { source, .. }
                if matches!(**source, Error::MemoryCellOutOfRange { cell: 2, .. })),
            "{err:?}"
        );
    }

    #[test]
    fn test_peak_rois_must_lie_in_full_roi() {
        let err = PeakRois::new(
            Roi::new(0, 100).unwrap(),
            Roi::new(-10, 30).unwrap(),
            Roi::new(30, 100).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::RoiOutsideBase { .. }));
    }
}
