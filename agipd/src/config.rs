//! File-backed calibration settings.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::campaign::{ModuleCalibrator, PeakRois};
use crate::constants::{HG_LEVEL, LG_LEVEL, MG_LEVEL};
use crate::corrector::{CalibratedFrameCorrector, CorrectorConfig};
use crate::dark_calibration::DarkCalibration;
use crate::error::{Error, Result};
use crate::gain_levels::GainLevelTable;
use crate::peak_fit::{PeakFitConfig, PeakFitEngine};
use crate::roi::Roi;

/// Scalar gain thresholds used when no dark calibration is at hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarGainLevels {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for ScalarGainLevels {
    fn default() -> Self {
        Self {
            high: HG_LEVEL,
            medium: MG_LEVEL,
            low: LG_LEVEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Histogram range of the high-gain peak search.
    pub full_roi: Roi,
    pub zero_roi: Roi,
    pub one_roi: Roi,
    /// Histogram range of the high/medium ratio.
    pub relative_roi: Roi,
    pub gain_levels: ScalarGainLevels,
    pub corrector: CorrectorConfig,
    pub peak_fit: PeakFitConfig,
    /// Memory cells calibrated at once; 0 means one per rayon thread.
    pub max_concurrent_cells: usize,
    /// Drop frames whose brightest reading does not exceed this before
    /// peak fitting. The usual limit is
    /// [`DEFAULT_TRIM_LIMIT`](crate::constants::DEFAULT_TRIM_LIMIT).
    pub trim_limit: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            full_roi: Roi::FULL_RANGE,
            zero_roi: Roi::ZERO_PHOTON,
            one_roi: Roi::ONE_PHOTON,
            relative_roi: Roi::RELATIVE_GAIN,
            gain_levels: ScalarGainLevels::default(),
            corrector: CorrectorConfig::default(),
            peak_fit: PeakFitConfig::default(),
            max_concurrent_cells: 0,
            trim_limit: None,
        }
    }
}

impl Config {
    /// Loads a YAML or JSON config, picked by extension, and validates it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config: Self = common::serde::load_file(path)?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded calibration config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.peak_rois()?;
        if self.relative_roi.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "relative gain range {} is empty",
                self.relative_roi
            )));
        }
        self.gain_levels()?;
        self.corrector.validate()?;
        self.peak_fit.validate()
    }

    pub fn peak_rois(&self) -> Result<PeakRois> {
        PeakRois::new(self.full_roi, self.zero_roi, self.one_roi)
    }

    pub fn gain_levels(&self) -> Result<GainLevelTable> {
        let ScalarGainLevels { high, medium, low } = self.gain_levels;
        GainLevelTable::from_scalars(high, medium, low)
    }

    pub fn engine(&self) -> Result<PeakFitEngine> {
        PeakFitEngine::new(self.peak_fit.clone())
    }

    pub fn module_calibrator(&self) -> Result<ModuleCalibrator<'static>> {
        let calibrator =
            ModuleCalibrator::new(self.engine()?, self.gain_levels()?, self.peak_rois()?)
                .with_max_in_flight(self.max_concurrent_cells);
        Ok(match self.trim_limit {
            Some(limit) => calibrator.with_trim_limit(limit),
            None => calibrator,
        })
    }

    pub fn corrector<'a>(&self, dark: &'a DarkCalibration) -> Result<CalibratedFrameCorrector<'a>> {
        CalibratedFrameCorrector::new(dark, self.corrector.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SerdeFormat;

    use crate::constants::DEFAULT_TRIM_LIMIT;
    use crate::gain_levels::GainMode;

    #[test]
    fn test_default_round_trips_all_formats() {
        let config = Config::default();
        for format in SerdeFormat::all_formats_for_testing() {
            let text = common::serde::serialize(&config, format).unwrap();
            let parsed: Config = common::serde::deserialize(text.as_bytes(), format).unwrap();
            assert_eq!(parsed, config, "format {format:?}");
        }
    }

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.peak_rois().unwrap().zero, Roi::new(-50, 30).unwrap());
        assert!(config.module_calibrator().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "one_roi: [40, 140]\ntrim_limit: 20000\ncorrector:\n  channels: [high, medium, low]\n";
        let config: Config = common::serde::deserialize(yaml.as_bytes(), SerdeFormat::Yaml).unwrap();
        assert_eq!(config.one_roi, Roi::new(40, 140).unwrap());
        assert_eq!(config.zero_roi, Config::default().zero_roi);
        assert_eq!(config.trim_limit, Some(DEFAULT_TRIM_LIMIT));
        assert_eq!(config.corrector.channels.len(), 3);
        assert_eq!(config.corrector.channels[2], GainMode::Low);
        assert!(config.peak_fit.log_transform);
    }

    #[test]
    fn test_reversed_roi_rejected_on_load() {
        let json = r#"{"full_roi": [150, -50]}"#;
        let result: anyhow::Result<Config> =
            common::serde::deserialize(json.as_bytes(), SerdeFormat::Json);
        assert!(result.is_err());
    }

    #[test]
    fn test_roi_outside_full_range_invalid() {
        let config = Config {
            one_roi: Roi::new(30, 200).unwrap(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::RoiOutsideBase { .. })
        ));
    }

    #[test]
    fn test_non_monotonic_levels_invalid() {
        let config = Config {
            gain_levels: ScalarGainLevels {
                high: 0.0,
                medium: 9000.0,
                low: 8000.0,
            },
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = Config::from_file(Path::new("no/such/calibration.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read"));
    }
}
