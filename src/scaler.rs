use log::{debug, warn};
use rayon::prelude::*;

/// Configuration progress of an [`ImageScaler`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalerState {
    Unconfigured,
    BinSizeSet,
    Ready,
}

/// Maps a rectangular grid of bin values onto a pixel raster.
///
/// Configuration happens in two ordered phases, `set_bin_size` then `set_used_bins`.
/// The used bins are centered on the output, the margin left over by unused bins
/// and by the integer division of the output size is split evenly on both sides.
#[derive(Clone, Debug)]
pub struct ImageScaler {
    output_width: usize,
    output_height: usize,
    output_depth: usize,
    bin_size_x: usize,
    bin_size_y: usize,
    max_bins_x: usize,
    max_bins_y: usize,
    used_bins_x: usize,
    used_bins_y: usize,
    remainder_x: usize,
    remainder_y: usize,
    left_offset: usize,
    top_offset: usize,
    state: ScalerState,
}

impl ImageScaler {
    /// # Arguments
    ///
    /// * `output_width` - Output raster width in pixels.
    /// * `output_height` - Output raster height in pixels.
    /// * `output_depth` - Bytes per pixel (1 or 2 for the usual SLM formats).
    pub fn new(output_width: usize, output_height: usize, output_depth: usize) -> ImageScaler {
        ImageScaler {
            output_width,
            output_height,
            output_depth: output_depth.max(1),
            bin_size_x: 0,
            bin_size_y: 0,
            max_bins_x: 0,
            max_bins_y: 0,
            used_bins_x: 0,
            used_bins_y: 0,
            remainder_x: 0,
            remainder_y: 0,
            left_offset: 0,
            top_offset: 0,
            state: ScalerState::Unconfigured,
        }
    }

    pub fn state(&self) -> ScalerState {
        self.state
    }

    /// First configuration phase. Invalidates a previous `set_used_bins`.
    pub fn set_bin_size(&mut self, bin_size_x: usize, bin_size_y: usize) {
        if bin_size_x == 0 || bin_size_y == 0 {
            warn!("Bin size {}x{} is invalid, zero dimensions are clamped to 1", bin_size_x, bin_size_y);
        }
        self.bin_size_x = bin_size_x.max(1);
        self.bin_size_y = bin_size_y.max(1);
        self.max_bins_x = self.output_width / self.bin_size_x;
        self.max_bins_y = self.output_height / self.bin_size_y;
        self.remainder_x = self.output_width % self.bin_size_x;
        self.remainder_y = self.output_height % self.bin_size_y;
        self.used_bins_x = 0;
        self.used_bins_y = 0;
        self.state = ScalerState::BinSizeSet;
    }

    /// Second configuration phase: number of bins actually driven by the genome,
    /// clamped to `[0, max_bins]` on each axis.
    pub fn set_used_bins(&mut self, used_bins_x: usize, used_bins_y: usize) {
        if self.state == ScalerState::Unconfigured {
            warn!("set_used_bins({}, {}) ignored: bin size is not set", used_bins_x, used_bins_y);
            return;
        }
        if used_bins_x > self.max_bins_x || used_bins_y > self.max_bins_y {
            warn!(
                "Requested {}x{} bins but only {}x{} fit the {}x{} output, clamping",
                used_bins_x, used_bins_y, self.max_bins_x, self.max_bins_y, self.output_width, self.output_height
            );
        }
        self.used_bins_x = used_bins_x.min(self.max_bins_x);
        self.used_bins_y = used_bins_y.min(self.max_bins_y);

        self.remainder_x = self.output_width % self.bin_size_x + (self.max_bins_x - self.used_bins_x) * self.bin_size_x;
        self.remainder_y = self.output_height % self.bin_size_y + (self.max_bins_y - self.used_bins_y) * self.bin_size_y;
        self.left_offset = self.remainder_x / 2;
        self.top_offset = self.remainder_y / 2;
        self.state = ScalerState::Ready;

        debug!(
            "Scaler ready: {}x{} bins of {}x{} px, offset ({}, {})",
            self.used_bins_x, self.used_bins_y, self.bin_size_x, self.bin_size_y, self.left_offset, self.top_offset
        );
    }

    /// Maximum number of bins per axis, as (x, y)
    pub fn max_bins(&self) -> (usize, usize) {
        (self.max_bins_x, self.max_bins_y)
    }

    /// Bins actually translated, as (x, y)
    pub fn used_bins(&self) -> (usize, usize) {
        (self.used_bins_x, self.used_bins_y)
    }

    pub fn total_bin_num(&self) -> usize {
        self.used_bins_x * self.used_bins_y
    }

    /// Top-left pixel of the used region, as (column, row)
    pub fn offset(&self) -> (usize, usize) {
        (self.left_offset, self.top_offset)
    }

    /// Number of bytes an output buffer must hold
    pub fn output_len(&self) -> usize {
        self.output_width * self.output_height * self.output_depth
    }

    pub fn zero_output_image(&self, output: &mut [u8]) {
        let len = self.output_len().min(output.len());
        output[..len].fill(0);
    }

    /// Writes every used bin of `bins` (row-major, `used_bins_x` per row) onto `output`.
    ///
    /// Each pixel of a bin block receives the low byte of the bin value, and the next
    /// byte (`value >> 8`) when the depth allows it. Pixels outside the used region are
    /// never written. Does nothing until both configuration phases are complete.
    pub fn translate_image(&self, bins: &[i32], output: &mut [u8]) {
        if self.state != ScalerState::Ready {
            debug!("translate_image skipped: scaler is {:?}", self.state);
            return;
        }
        if self.used_bins_x == 0 || self.used_bins_y == 0 {
            return;
        }
        if output.len() < self.output_len() {
            warn!("Output buffer holds {} bytes, {} needed: image not translated", output.len(), self.output_len());
            return;
        }

        let depth = self.output_depth;
        let row_stride = self.output_width * depth;
        let band_stride = self.bin_size_y * row_stride;
        let region_start = self.top_offset * row_stride;
        let region_end = region_start + self.used_bins_y * band_stride;

        output[region_start..region_end]
            .par_chunks_mut(band_stride)
            .enumerate()
            .for_each(|(bin_row, band)| {
                for row in band.chunks_mut(row_stride) {
                    for bin_col in 0..self.used_bins_x {
                        let Some(&value) = bins.get(bin_row * self.used_bins_x + bin_col) else {
                            continue;
                        };
                        let low = (value & 0xFF) as u8;
                        let high = ((value >> 8) & 0xFF) as u8;
                        let first_pixel = self.left_offset + bin_col * self.bin_size_x;
                        for pixel in first_pixel..first_pixel + self.bin_size_x {
                            row[pixel * depth] = low;
                            if depth > 1 {
                                row[pixel * depth + 1] = high;
                            }
                        }
                    }
                }
            });
    }
}
