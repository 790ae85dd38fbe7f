//! Error types for calibration and correction.

use thiserror::Error;

use crate::fitting::FitFailure;
use crate::roi::Roi;

/// Which Gaussian fit of a calibration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Peak {
    #[strum(to_string = "zero-photon peak")]
    ZeroPhoton,
    #[strum(to_string = "one-photon peak")]
    OnePhoton,
    #[strum(to_string = "relative gain peak")]
    RelativeGain,
}

/// Errors raised by the calibration engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Invalid ROI bounds [{lower}, {higher}): lower must not exceed higher and the span must fit in i32"
    )]
    InvalidBounds { lower: i32, higher: i32 },

    #[error("ROI {roi} lies outside of histogram range {base}")]
    RoiOutsideBase { roi: Roi, base: Roi },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Module {module_id} out of range, detector has {module_count} modules")]
    ModuleOutOfRange {
        module_id: usize,
        module_count: usize,
    },

    #[error("Memory cell {cell} out of range, calibration has {cell_count} cells")]
    MemoryCellOutOfRange { cell: usize, cell_count: usize },

    #[error("No values fall inside histogram range {roi}")]
    EmptyHistogram { roi: Roi },

    #[error("Gaussian fit of the {peak} did not converge: {reason}")]
    FitConvergence {
        peak: Peak,
        #[source]
        reason: FitFailure,
    },

    #[error("Calibration of pulse {pulse_id} failed")]
    CellCalibration {
        pulse_id: u64,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape_mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
