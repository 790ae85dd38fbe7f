//! Offset and gain correction of raw module frames.


use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis, Zip, s};
use serde::{Deserialize, Serialize};

use crate::constants::{HG_GAIN, LG_GAIN, MG_GAIN, MODULE_COLS};
use crate::dark_calibration::DarkCalibration;
use crate::error::{Error, Result};
use crate::gain_levels::GainMode;

/// Photon scaling applied to each gain stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NominalGains {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for NominalGains {
    fn default() -> Self {
        Self {
            high: HG_GAIN,
            medium: MG_GAIN,
            low: LG_GAIN,
        }
    }
}

impl NominalGains {
    pub fn get(&self, mode: GainMode) -> f32 {
        match mode {
            GainMode::High => self.high,
            GainMode::Medium => self.medium,
            GainMode::Low => self.low,
        }
    }
}

/// Columns assumed unilluminated; the mean ADU of their good high-gain
/// pixels is a per-frame baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatFieldRegion {
    pub start_column: usize,
    pub end_column: usize,
}

impl Default for FlatFieldRegion {
    fn default() -> Self {
        Self {
            start_column: 0,
            end_column: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    pub nominal_gains: NominalGains,
    /// Gain stages that contribute to the corrected frame.
    pub channels: Vec<GainMode>,
    /// Subtract the high-gain baseline of this region when set.
    pub flat_field: Option<FlatFieldRegion>,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            nominal_gains: NominalGains::default(),
            channels: vec![GainMode::High, GainMode::Medium],
            flat_field: None,
        }
    }
}

impl CorrectorConfig {
    /// Default channels with the first 10 columns as flat-field region.
    pub fn with_flat_field() -> Self {
        Self {
            flat_field: Some(FlatFieldRegion::default()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one gain channel must be corrected".to_string(),
            ));
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i].contains(channel) {
                return Err(Error::InvalidConfiguration(format!(
                    "gain channel {channel} listed more than once"
                )));
            }
        }
        if let Some(region) = self.flat_field {
            if region.start_column >= region.end_column || region.end_column > MODULE_COLS {
                return Err(Error::InvalidConfiguration(format!(
                    "flat-field columns {}..{} must be a non-empty range within 0..{MODULE_COLS}",
                    region.start_column, region.end_column
                )));
            }
        }
        Ok(())
    }
}

/// Per-channel constants of one module and memory cell.
struct Channel<'a> {
    mode: GainMode,
    gain: f32,
    offset: ArrayView2<'a, f32>,
    bad: ArrayView2<'a, u8>,
}

/// Applies dark offsets, gain selection and nominal gains to raw frames.
pub struct CalibratedFrameCorrector<'a> {
    dark: &'a DarkCalibration,
    config: CorrectorConfig,
}

impl<'a> CalibratedFrameCorrector<'a> {
    pub fn new(dark: &'a DarkCalibration, config: CorrectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { dark, config })
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    fn channels(&self, cell: usize, module_id: usize) -> Result<Vec<Channel<'a>>> {
        self.config
            .channels
            .iter()
            .map(|&mode| {
                Ok(Channel {
                    mode,
                    gain: self.config.nominal_gains.get(mode),
                    offset: self.dark.offset(mode, cell, module_id)?,
                    bad: self.dark.bad_pixels(mode, cell, module_id)?,
                })
            })
            .collect()
    }

    /// Corrected frame in photon units.
    pub fn correct_frame(
        &self,
        raw: ArrayView2<u16>,
        indicator: ArrayView2<u16>,
        cell: usize,
        module_id: usize,
    ) -> Result<Array2<f32>> {
        let corrected = self.correct(
            raw.insert_axis(Axis(0)),
            indicator.insert_axis(Axis(0)),
            cell,
            module_id,
        )?;
        Ok(corrected.index_axis_move(Axis(0), 0))
    }

    /// Corrects a `(frame, row, col)` batch recorded in one memory cell.
    /// Frames are processed in parallel.
    pub fn correct(
        &self,
        raw: ArrayView3<u16>,
        indicators: ArrayView3<u16>,
        cell: usize,
        module_id: usize,
    ) -> Result<Array3<f32>> {
        if raw.shape() != indicators.shape() {
            return Err(Error::shape_mismatch(
                "raw frames",
                indicators.shape(),
                raw.shape(),
            ));
        }
        let levels = self.dark.gain_levels(cell, module_id)?;
        let mask = levels.mask_frames(indicators, module_id)?;
        let channels = self.channels(cell, module_id)?;
        let flat_field = self.config.flat_field;

        let mut corrected = Array3::<f32>::zeros(raw.raw_dim());
        Zip::from(corrected.outer_iter_mut())
            .and(raw.outer_iter())
            .and(mask.outer_iter())
            .par_for_each(|out, frame, modes| {
                correct_into(out, frame, modes, &channels, flat_field);
            });

        tracing::debug!(
            frames = raw.shape()[0],
            cell,
            module_id,
            "Corrected frames"
        );
        Ok(corrected)
    }
}

fn correct_into(
    mut out: ArrayViewMut2<f32>,
    raw: ArrayView2<u16>,
    modes: ArrayView2<u8>,
    channels: &[Channel<'_>],
    flat_field: Option<FlatFieldRegion>,
) {
    for channel in channels {
        let baseline = match flat_field {
            Some(region) if channel.mode == GainMode::High => {
                flat_field_baseline(raw, modes, channel, region)
            }
            _ => 0.0,
        };
        let wanted = channel.mode.mask_value();
        Zip::from(&mut out)
            .and(&raw)
            .and(&modes)
            .and(&channel.offset)
            .and(&channel.bad)
            .for_each(|o, &r, &m, &offset, &bad| {
                if m == wanted && bad == 0 {
                    *o += (r as f32 - offset - baseline) * channel.gain;
                }
            });
    }
}

/// Mean offset-subtracted ADU of the region's pixels read out in the
/// channel's gain stage and not flagged bad; 0 when there are none.
fn flat_field_baseline(
    raw: ArrayView2<u16>,
    modes: ArrayView2<u8>,
    channel: &Channel<'_>,
    region: FlatFieldRegion,
) -> f32 {
    let columns = s![.., region.start_column..region.end_column];
    let wanted = channel.mode.mask_value();
    let (sum, count) = Zip::from(raw.slice(columns))
        .and(modes.slice(columns))
        .and(channel.offset.slice(columns))
        .and(channel.bad.slice(columns))
        .fold((0.0f64, 0usize), |(sum, count), &r, &m, &o, &b| {
            if m == wanted && b == 0 {
                (sum + (r as f32 - o) as f64, count + 1)
            } else {
                (sum, count)
            }
        });
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}
