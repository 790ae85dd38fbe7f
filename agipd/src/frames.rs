//! In-memory raw frame batches of one detector module.

use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::constants::{MEMORY_CELLS, MODULE_COLS, MODULE_ROWS, PULSE_ID_STRIDE};
use crate::error::{Error, Result};

/// Memory cell a pulse id was stored in.
#[inline]
pub fn memory_cell(pulse_id: u64) -> usize {
    (pulse_id / PULSE_ID_STRIDE) as usize
}

/// Pulse ids of every memory cell of a train, in cell order.
pub fn all_pulse_ids() -> Vec<u64> {
    (0..MEMORY_CELLS as u64).map(|cell| cell * PULSE_ID_STRIDE).collect()
}

/// Supplier of raw module frames grouped by pulse id.
///
/// Implementations may read lazily from files; the calibration core only
/// sees the returned batch.
pub trait FrameSource: Sync {
    /// All frames recorded for `pulse_id`. May be empty.
    fn frames_for_pulse(&self, pulse_id: u64) -> Result<FrameBatch>;
}

/// Raw readings and gain indicators, `(frame, row, col)`, with the train and
/// pulse id of every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
    data: Array3<u16>,
    gain: Array3<u16>,
    train_ids: Vec<u64>,
    pulse_ids: Vec<u64>,
}

impl FrameBatch {
    pub fn new(
        data: Array3<u16>,
        gain: Array3<u16>,
        train_ids: Vec<u64>,
        pulse_ids: Vec<u64>,
    ) -> Result<Self> {
        let (frames, rows, cols) = data.dim();
        if (rows, cols) != (MODULE_ROWS, MODULE_COLS) {
            return Err(Error::shape_mismatch(
                "frame data",
                &[frames, MODULE_ROWS, MODULE_COLS],
                data.shape(),
            ));
        }
        if gain.shape() != data.shape() {
            return Err(Error::shape_mismatch("gain indicators", data.shape(), gain.shape()));
        }
        if train_ids.len() != frames {
            return Err(Error::shape_mismatch("train ids", &[frames], &[train_ids.len()]));
        }
        if pulse_ids.len() != frames {
            return Err(Error::shape_mismatch("pulse ids", &[frames], &[pulse_ids.len()]));
        }
        Ok(Self {
            data,
            gain,
            train_ids,
            pulse_ids,
        })
    }

    pub fn empty() -> Self {
        Self {
            data: Array3::zeros((0, MODULE_ROWS, MODULE_COLS)),
            gain: Array3::zeros((0, MODULE_ROWS, MODULE_COLS)),
            train_ids: Vec::new(),
            pulse_ids: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pulse_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pulse_ids.is_empty()
    }

    pub fn data(&self) -> ArrayView3<'_, u16> {
        self.data.view()
    }

    pub fn gain(&self) -> ArrayView3<'_, u16> {
        self.gain.view()
    }

    pub fn train_ids(&self) -> &[u64] {
        &self.train_ids
    }

    pub fn pulse_ids(&self) -> &[u64] {
        &self.pulse_ids
    }

    /// Distinct pulse ids, ascending.
    pub fn pulse_ids_present(&self) -> Vec<u64> {
        let mut ids = self.pulse_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn take(&self, indices: &[usize]) -> Self {
        Self {
            data: self.data.select(Axis(0), indices),
            gain: self.gain.select(Axis(0), indices),
            train_ids: indices.iter().map(|&i| self.train_ids[i]).collect(),
            pulse_ids: indices.iter().map(|&i| self.pulse_ids[i]).collect(),
        }
    }

    /// Frames recorded for `pulse_id`, in their original order.
    pub fn select_pulse(&self, pulse_id: u64) -> Self {
        let indices: Vec<usize> = self
            .pulse_ids
            .iter()
            .enumerate()
            .filter(|(_, pid)| **pid == pulse_id)
            .map(|(i, _)| i)
            .collect();
        self.take(&indices)
    }

    /// Keeps frames whose brightest reading is above `limit`.
    pub fn trim(&self, limit: u16) -> Self {
        let mut peaks = vec![0u16; self.len()];
        Zip::from(&mut peaks[..])
            .and(self.data.outer_iter())
            .par_for_each(|peak, frame| *peak = frame.iter().copied().max().unwrap_or(0));
        let indices: Vec<usize> = peaks
            .iter()
            .enumerate()
            .filter(|(_, peak)| **peak > limit)
            .map(|(i, _)| i)
            .collect();
        let kept = self.take(&indices);
        if kept.is_empty() && !self.is_empty() {
            tracing::warn!(total = self.len(), limit, "Trimming dropped every frame");
        }
        tracing::debug!(
            total = self.len(),
            kept = kept.len(),
            limit,
            "Trimmed dark frames"
        );
        kept
    }
}

impl FrameSource for FrameBatch {
    fn frames_for_pulse(&self, pulse_id: u64) -> Result<FrameBatch> {
        Ok(self.select_pulse(pulse_id))
    }
}
