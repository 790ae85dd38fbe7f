//! Fixed AGIPD geometry and nominal gain constants.

/// Pixel rows of one detector module.
pub const MODULE_ROWS: usize = 512;
/// Pixel columns of one detector module.
pub const MODULE_COLS: usize = 128;
/// Shape of one module frame, `(rows, cols)`.
pub const MODULE_SHAPE: (usize, usize) = (MODULE_ROWS, MODULE_COLS);

/// Modules of the full detector, stacked along the row axis.
pub const MODULE_COUNT: usize = 16;
/// Shape of a full-detector frame, `(rows, cols)`.
pub const DETECTOR_SHAPE: (usize, usize) = (MODULE_COUNT * MODULE_ROWS, MODULE_COLS);

/// Memory cells stored per train.
pub const MEMORY_CELLS: usize = 176;
/// Pulse ids advance by this step per memory cell.
pub const PULSE_ID_STRIDE: u64 = 4;

/// Default digital gain thresholds.
pub const HG_LEVEL: f32 = 0.0;
pub const MG_LEVEL: f32 = 6000.0;
pub const LG_LEVEL: f32 = 32000.0;

/// Nominal photon-per-ADU scaling of each gain stage.
pub const HG_GAIN: f32 = 1.0 / 68.8;
pub const MG_GAIN: f32 = 1.0 / 1.376;
pub const LG_GAIN: f32 = 5.0 / 1.376;

/// Frames whose brightest pixel does not exceed this are treated as empty.
pub const DEFAULT_TRIM_LIMIT: u16 = 20000;
