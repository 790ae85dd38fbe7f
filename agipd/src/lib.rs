//! AGIPD - gain calibration of AGIPD detector frames.
//!
//! This library provides:
//! - Gain-mode classification of raw readings against threshold tables
//! - Photon-peak fitting on ADU histograms (zero/one photon, relative gain)
//! - Per-memory-cell module calibration driven by a frame source
//! - Offset and gain correction of raw frames from dark calibration constants
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use agipd::{Config, FrameBatch};
//!
//! let config = Config::from_file(Path::new("calibration.yaml"))?;
//! let calibrator = config.module_calibrator()?;
//!
//! let cells = calibrator.calibrate(&frames, module_id, &agipd::all_pulse_ids())?;
//! for cell in &cells {
//!     println!("cell {}: offset {:.1} ADU, gain {:.1} ADU", cell.memory_cell, cell.offset(), cell.gain());
//! }
//! ```

pub mod campaign;
pub mod config;
pub mod constants;
pub mod corrector;
pub mod dark_calibration;
pub mod error;
pub(crate) mod fitting;
pub mod frames;
pub mod gain_levels;
pub mod histogram;
pub mod peak_fit;
pub mod roi;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Core types
// ============================================================================

pub use error::{Error, Peak, Result};
pub use frames::{FrameBatch, FrameSource, all_pulse_ids, memory_cell};
pub use histogram::Histogram;
pub use roi::Roi;

// ============================================================================
// Gain classification and dark constants
// ============================================================================

pub use dark_calibration::DarkCalibration;
pub use gain_levels::{GainLevelTable, GainMode, Threshold};

// ============================================================================
// Peak fitting
// ============================================================================

pub use fitting::{FitBounds, FitFailure, GaussianFit, LMConfig, fit, fit_fixed_amplitude, gauss};
pub use peak_fit::{PeakFitConfig, PeakFitEngine, PhotonPeaks, RelativeGain, pixel_ratios};

// ============================================================================
// Calibration and correction
// ============================================================================

pub use campaign::{CellCalibration, ModuleCalibrator, PeakRois};
pub use config::{Config, ScalarGainLevels};
pub use corrector::{CalibratedFrameCorrector, CorrectorConfig, FlatFieldRegion, NominalGains};
