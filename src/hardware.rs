use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// One spatial light modulator driven by the optimizer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub board_id: usize,
    pub width: usize,
    pub height: usize,
    /// Bytes per pixel expected by the device
    pub depth: usize,
}

/// Frame grabbed from the camera, one intensity byte per pixel, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl CameraImage {
    /// Returns `None` when `data` does not hold exactly `width * height` bytes
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Option<CameraImage> {
        if data.len() != width * height {
            return None;
        }
        Some(CameraImage { width, height, data })
    }

    pub fn uniform(width: usize, height: usize, value: u8) -> CameraImage {
        CameraImage { width, height, data: vec![value; width * height] }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sum of the pixels inside a disk of `radius` centered on the frame, divided by
    /// the disk area. Pixels of the disk falling outside the frame count as zero.
    pub fn average_intensity(&self, radius: usize) -> f64 {
        if radius == 0 || self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let r = radius as f64;
        let center_x = (self.width / 2) as f64;
        let center_y = (self.height / 2) as f64;
        let first_row = (center_y - r).max(0.0) as usize;
        let last_row = ((center_y + r) as usize).min(self.height);

        let sum: f64 = (first_row..last_row)
            .into_par_iter()
            .map(|row| {
                let dy = row as f64 - center_y;
                let half_chord = (r * r - dy * dy).max(0.0).sqrt();
                let first_col = (center_x - half_chord).max(0.0) as usize;
                let last_col = ((center_x + half_chord) as usize).min(self.width);
                let line = &self.data[row * self.width..(row + 1) * self.width];
                line[first_col..last_col.max(first_col)].iter().map(|&p| p as f64).sum::<f64>()
            })
            .sum();

        sum / (PI * r * r)
    }
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("camera not ready: {0}")]
    CameraNotReady(String),
    #[error("SLM not ready: {0}")]
    SlmNotReady(String),
}

/// Contract of the camera + SLM bench the optimizers drive.
///
/// Every call happens under one lock held by the caller, so implementations do not
/// need interior synchronization.
pub trait Hardware: Send + 'static {
    /// Sets up the camera and the SLMs and lists the boards to optimize
    fn prepare(&mut self) -> Result<Vec<Board>, HardwareError>;

    /// Writes a full raster to one SLM, returns false if the device refused it
    fn write_image(&mut self, board_id: usize, pixels: &[u8]) -> bool;

    /// Grabs one frame, `None` on a transient acquisition failure
    fn acquire_image(&mut self) -> Option<CameraImage>;

    /// Initial exposure time divided by the current one
    fn exposure_ratio(&self) -> f64;

    fn halve_exposure_time(&mut self);

    /// Raw fitness of a frame
    fn fitness_of(image: &CameraImage, target_radius: usize) -> f64
    where
        Self: Sized,
    {
        image.average_intensity(target_radius)
    }

    fn shutdown(&mut self) {}
}
