use ndarray::{s, Array2, Array3, Array4, Array5, ArrayView4, Axis, Zip};
use std::path::Path;

use super::constants::{BADPIXEL_KEY, FLAT_ROI_ROWS, GAIN_LEVEL_KEY, OFFSET_KEY};
use super::error::CalibrationError;

/// Dark constants for the modules of one run.
///
/// `offset` is shaped `(gain_mode, module, row, col)`. `threshold` is shaped
/// `(gain_mode - 1, module, row, col)`: entry `k` is the gain-indicator level at and above
/// which a pixel has switched from mode `k` into mode `k + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTables {
    pub offset: Array4<f64>,
    pub threshold: Array4<f64>,
    /// ADU to photon conversion of each gain mode
    pub gain_factors: Vec<f64>,
    /// `(module, row, col)`, false where the dark run flagged the pixel as bad
    pub good_pixels: Array3<bool>,
}

impl CalibrationTables {
    /// Tables with every pixel usable
    pub fn new(
        offset: Array4<f64>,
        threshold: Array4<f64>,
        gain_factors: &[f64],
    ) -> Result<Self, CalibrationError> {
        let (modes, modules, rows, cols) = offset.dim();
        if modes == 0 {
            return Err(CalibrationError::NoGainModes);
        }
        let expected = vec![modes - 1, modules, rows, cols];
        if threshold.shape() != expected.as_slice() {
            return Err(CalibrationError::CalibrationShape {
                what: "gain thresholds",
                expected,
                found: threshold.shape().to_vec(),
            });
        }
        if gain_factors.len() < modes {
            return Err(CalibrationError::CalibrationShape {
                what: "gain factors",
                expected: vec![modes],
                found: vec![gain_factors.len()],
            });
        }
        Ok(Self {
            offset,
            threshold,
            gain_factors: gain_factors[..modes].to_vec(),
            good_pixels: Array3::from_elem((modules, rows, cols), true),
        })
    }

    /// Replace the usable pixel map
    pub fn with_good_pixels(mut self, good_pixels: Array3<bool>) -> Result<Self, CalibrationError> {
        if good_pixels.shape() != &self.offset.shape()[1..] {
            return Err(CalibrationError::CalibrationShape {
                what: "bad pixel map",
                expected: self.offset.shape()[1..].to_vec(),
                found: good_pixels.shape().to_vec(),
            });
        }
        self.good_pixels = good_pixels;
        Ok(self)
    }

    pub fn n_modes(&self) -> usize {
        self.offset.len_of(Axis(0))
    }

    /// Load the constants of one memory cell for the given modules from a dark file.
    ///
    /// The file holds `AnalogOffset` and `DigitalGainLevel`, both shaped
    /// `(gain_mode, cell, module, row, col)`. The digital level of mode `k` is the boundary
    /// between modes `k - 1` and `k`. An optional `Badpixel` dataset stacks the modules along
    /// its rows, `(module * row, col)`; any non-zero entry marks a bad pixel.
    pub fn from_dark_file(
        path: &Path,
        cell_id: usize,
        modules: &[usize],
        n_modes: usize,
        gain_factors: &[f64],
    ) -> Result<Self, CalibrationError> {
        if n_modes == 0 {
            return Err(CalibrationError::NoGainModes);
        }
        let file = hdf5::File::open(path)?;
        let offset_ds = file.dataset(OFFSET_KEY)?;
        let level_ds = file.dataset(GAIN_LEVEL_KEY)?;

        let shape = offset_ds.shape();
        let max_module = modules.iter().max().copied().unwrap_or_default();
        if shape.len() != 5
            || shape[0] < n_modes
            || shape[1] <= cell_id
            || shape[2] <= max_module
            || level_ds.shape() != shape
        {
            return Err(CalibrationError::CalibrationShape {
                what: "dark constants file",
                expected: vec![n_modes, cell_id + 1, max_module + 1],
                found: shape,
            });
        }

        let (rows, cols) = (shape[3], shape[4]);
        let mut offset = Array4::<f64>::zeros((n_modes, modules.len(), rows, cols));
        let mut threshold = Array4::<f64>::zeros((n_modes - 1, modules.len(), rows, cols));
        for mode in 0..n_modes {
            for (idx, module) in modules.iter().enumerate() {
                let plane: Array2<f32> =
                    offset_ds.read_slice_2d(s![mode, cell_id, *module, .., ..])?;
                offset
                    .slice_mut(s![mode, idx, .., ..])
                    .assign(&plane.mapv(f64::from));
                if mode > 0 {
                    let level: Array2<f32> =
                        level_ds.read_slice_2d(s![mode, cell_id, *module, .., ..])?;
                    threshold
                        .slice_mut(s![mode - 1, idx, .., ..])
                        .assign(&level.mapv(f64::from));
                }
            }
        }
        let tables = Self::new(offset, threshold, gain_factors)?;

        if !file.link_exists(BADPIXEL_KEY) {
            log::warn!("{} has no {BADPIXEL_KEY} map; every pixel is used", path.display());
            return Ok(tables);
        }
        let bad_ds = file.dataset(BADPIXEL_KEY)?;
        let bad_shape = bad_ds.shape();
        if bad_shape.len() != 2 || bad_shape[0] < (max_module + 1) * rows || bad_shape[1] != cols {
            return Err(CalibrationError::CalibrationShape {
                what: "bad pixel map",
                expected: vec![(max_module + 1) * rows, cols],
                found: bad_shape,
            });
        }
        let mut good_pixels = Array3::from_elem((modules.len(), rows, cols), true);
        for (idx, module) in modules.iter().enumerate() {
            let flags: Array2<u32> =
                bad_ds.read_slice_2d(s![module * rows..(module + 1) * rows, ..])?;
            good_pixels
                .index_axis_mut(Axis(0), idx)
                .assign(&flags.mapv(|f| f == 0));
        }
        tables.with_good_pixels(good_pixels)
    }
}

/// Calibrated AGIPD data, each array shaped `(gain_mode, frame, module, row, col)`.
#[derive(Debug, Clone)]
pub struct CorrectedArrays {
    /// Raw value minus the dark offset of each gain mode
    pub adu: Array5<f64>,
    /// Baseline corrected `adu` in photon units, only where the pixel was in that gain mode
    /// and is not a bad pixel; 0 elsewhere
    pub data: Array5<f64>,
    /// True where the pixel was recorded in that gain mode
    pub mask: Array5<bool>,
    /// Zero level removed from each `(gain_mode, frame, module)`
    pub zero_levels: Array3<f64>,
}

/// Applies dark constants to aligned AGIPD frames.
#[derive(Debug, Clone)]
pub struct DarkCalibrator {
    tables: CalibrationTables,
}

impl DarkCalibrator {
    pub fn new(tables: CalibrationTables) -> Self {
        Self { tables }
    }

    /// Calibrate raw frames shaped `(frame, module, row, col)` given the matching gain
    /// indicator frames.
    ///
    /// Frames are independent, so any contiguous slice of a run can be calibrated on its own.
    /// The zero level of each (gain mode, frame, module) is the median of the offset
    /// subtracted values over the first `FLAT_ROI_ROWS` rows of that module frame.
    pub fn calibrate<A, B>(
        &self,
        raw: ArrayView4<A>,
        gain: ArrayView4<B>,
    ) -> Result<CorrectedArrays, CalibrationError>
    where
        A: Copy + Into<f64>,
        B: Copy + Into<f64>,
    {
        let (frames, modules, rows, cols) = raw.dim();
        if gain.dim() != raw.dim() {
            return Err(CalibrationError::CalibrationShape {
                what: "gain indicator",
                expected: raw.shape().to_vec(),
                found: gain.shape().to_vec(),
            });
        }
        let n_modes = self.tables.n_modes();
        let (_, t_modules, t_rows, t_cols) = self.tables.offset.dim();
        if (t_modules, t_rows, t_cols) != (modules, rows, cols) {
            return Err(CalibrationError::CalibrationShape {
                what: "dark offsets",
                expected: vec![n_modes, modules, rows, cols],
                found: self.tables.offset.shape().to_vec(),
            });
        }

        let mut adu = Array5::<f64>::zeros((n_modes, frames, modules, rows, cols));
        for (mode, mut adu_mode) in adu.axis_iter_mut(Axis(0)).enumerate() {
            let offset = self.tables.offset.index_axis(Axis(0), mode);
            for (adu_frame, raw_frame) in adu_mode.axis_iter_mut(Axis(0)).zip(raw.axis_iter(Axis(0))) {
                Zip::from(adu_frame)
                    .and(raw_frame)
                    .and(&offset)
                    .for_each(|a, &r, &o| *a = Into::<f64>::into(r) - o);
            }
        }

        let mut mask = Array5::<bool>::from_elem((n_modes, frames, modules, rows, cols), false);
        for ((frame, module, row, col), value) in gain.indexed_iter() {
            let value: f64 = (*value).into();
            let mode = self
                .tables
                .threshold
                .slice(s![.., module, row, col])
                .iter()
                .filter(|level| **level <= value)
                .count();
            mask[[mode, frame, module, row, col]] = true;
        }

        let flat_rows = FLAT_ROI_ROWS.min(rows);
        let mut zero_levels = Array3::<f64>::zeros((n_modes, frames, modules));
        let mut data = Array5::<f64>::zeros((n_modes, frames, modules, rows, cols));
        for ((mode, frame, module), level) in zero_levels.indexed_iter_mut() {
            let adu_plane = adu.slice(s![mode, frame, module, .., ..]);
            *level = median(adu_plane.slice(s![..flat_rows, ..]).iter().copied());
            let (zero, factor) = (*level, self.tables.gain_factors[mode]);
            Zip::from(data.slice_mut(s![mode, frame, module, .., ..]))
                .and(&adu_plane)
                .and(mask.slice(s![mode, frame, module, .., ..]))
                .and(self.tables.good_pixels.index_axis(Axis(0), module))
                .for_each(|d, &a, &in_mode, &good| {
                    if in_mode && good {
                        *d = (a - zero) * factor;
                    }
                });
        }

        Ok(CorrectedArrays {
            adu,
            data,
            mask,
            zero_levels,
        })
    }
}

/// Median of the values, 0 for no values
fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}
