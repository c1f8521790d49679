use log::{debug, info};
use rayon::prelude::*;

use crate::hardware::{Board, CameraImage, Hardware, HardwareError};
use crate::param::Bench;

/// Software stand-in for a camera looking through one or more SLMs.
///
/// Every board hides a target phase pattern. The camera frame is uniform and its
/// intensity grows with the square of how close the written patterns are to the
/// targets, scaled by the current exposure and saturated at 255.
#[derive(Clone, Debug)]
pub struct SimulatedBench {
    boards: Vec<Board>,
    targets: Vec<Vec<u8>>,
    written: Vec<Vec<u8>>,
    camera_width: usize,
    camera_height: usize,
    peak_intensity: f64,
    initial_exposure: f64,
    exposure: f64,
    acquisition_failure_every: usize,
    acquisitions: usize,
    fail_preparation: bool,
}

impl SimulatedBench {
    /// # Arguments
    ///
    /// * `board_count` - Number of SLMs, numbered from 0.
    /// * `slm_width` / `slm_height` - SLM resolution (one byte per pixel).
    /// * `camera_width` / `camera_height` - Camera resolution.
    pub fn new(board_count: usize, slm_width: usize, slm_height: usize, camera_width: usize, camera_height: usize) -> SimulatedBench {
        let boards: Vec<Board> = (0..board_count)
            .map(|board_id| Board { board_id, width: slm_width, height: slm_height, depth: 1 })
            .collect();
        let targets = boards.iter().map(default_target).collect();
        let written = boards.iter().map(|board| vec![0u8; board.width * board.height]).collect();
        SimulatedBench {
            boards,
            targets,
            written,
            camera_width,
            camera_height,
            peak_intensity: 180.0,
            initial_exposure: 2000.0,
            exposure: 2000.0,
            acquisition_failure_every: 0,
            acquisitions: 0,
            fail_preparation: false,
        }
    }

    pub fn from_param(bench: &Bench) -> SimulatedBench {
        SimulatedBench::new(bench.board_count, bench.slm_width, bench.slm_height, bench.camera_width, bench.camera_height)
            .with_peak_intensity(bench.peak_intensity)
            .with_initial_exposure(bench.initial_exposure)
            .with_acquisition_failures(bench.acquisition_failure_every)
    }

    /// Intensity seen at the initial exposure for a perfect match
    pub fn with_peak_intensity(mut self, peak_intensity: f64) -> SimulatedBench {
        self.peak_intensity = peak_intensity;
        self
    }

    pub fn with_initial_exposure(mut self, initial_exposure: f64) -> SimulatedBench {
        self.initial_exposure = initial_exposure.max(f64::MIN_POSITIVE);
        self.exposure = self.initial_exposure;
        self
    }

    /// Makes every `every`-th acquisition fail (0 disables failures)
    pub fn with_acquisition_failures(mut self, every: usize) -> SimulatedBench {
        self.acquisition_failure_every = every;
        self
    }

    /// Replaces the hidden pattern of a board; ignored if the size does not match
    pub fn with_target(mut self, board_index: usize, target: Vec<u8>) -> SimulatedBench {
        if let Some(board) = self.boards.get(board_index) {
            if target.len() == board.width * board.height {
                self.targets[board_index] = target;
            }
        }
        self
    }

    /// Makes `prepare` fail, as an unplugged camera would
    pub fn with_failing_preparation(mut self) -> SimulatedBench {
        self.fail_preparation = true;
        self
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions
    }

    /// Closeness of the written patterns to the targets, 1 for a perfect match
    pub fn match_quality(&self) -> f64 {
        if self.boards.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .written
            .iter()
            .zip(self.targets.iter())
            .map(|(written, target)| {
                if written.is_empty() {
                    return 1.0;
                }
                let distance: u64 = written.par_iter().zip(target.par_iter()).map(|(&w, &t)| phase_distance(w, t)).sum();
                1.0 - distance as f64 / (written.len() as f64 * 128.0)
            })
            .sum();
        total / self.boards.len() as f64
    }

    fn frame_intensity(&self) -> u8 {
        let quality = self.match_quality();
        let intensity = self.peak_intensity * quality * quality * self.exposure / self.initial_exposure;
        intensity.clamp(0.0, 255.0) as u8
    }
}

/// Wrapped distance between two phase bytes, in [0, 128]
fn phase_distance(a: u8, b: u8) -> u64 {
    let d = (a as i32 - b as i32).unsigned_abs() as u64;
    d.min(256 - d)
}

fn default_target(board: &Board) -> Vec<u8> {
    let mut target = Vec::with_capacity(board.width * board.height);
    for row in 0..board.height {
        for col in 0..board.width {
            target.push(((col / 16 * 37 + row / 16 * 91 + board.board_id * 61) % 256) as u8);
        }
    }
    target
}

impl Hardware for SimulatedBench {
    fn prepare(&mut self) -> Result<Vec<Board>, HardwareError> {
        if self.fail_preparation {
            return Err(HardwareError::CameraNotReady("simulated camera is not responding".to_string()));
        }
        self.exposure = self.initial_exposure;
        self.acquisitions = 0;
        info!(
            "Simulated bench ready: {} SLM(s), camera {}x{}",
            self.boards.len(),
            self.camera_width,
            self.camera_height
        );
        Ok(self.boards.clone())
    }

    fn write_image(&mut self, board_id: usize, pixels: &[u8]) -> bool {
        let Some(index) = self.boards.iter().position(|board| board.board_id == board_id) else {
            return false;
        };
        if pixels.len() != self.written[index].len() {
            return false;
        }
        self.written[index].copy_from_slice(pixels);
        true
    }

    fn acquire_image(&mut self) -> Option<CameraImage> {
        self.acquisitions += 1;
        if self.acquisition_failure_every > 0 && self.acquisitions % self.acquisition_failure_every == 0 {
            debug!("Simulated acquisition {} dropped", self.acquisitions);
            return None;
        }
        Some(CameraImage::uniform(self.camera_width, self.camera_height, self.frame_intensity()))
    }

    fn exposure_ratio(&self) -> f64 {
        self.initial_exposure / self.exposure
    }

    fn halve_exposure_time(&mut self) {
        self.exposure /= 2.0;
    }

    fn shutdown(&mut self) {
        debug!("Simulated bench stopped after {} acquisitions", self.acquisitions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_lists_boards() {
        let mut bench = SimulatedBench::new(2, 8, 4, 16, 16);
        let boards = bench.prepare().expect("bench should prepare");
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[1], Board { board_id: 1, width: 8, height: 4, depth: 1 });
    }

    #[test]
    fn test_failing_preparation() {
        let mut bench = SimulatedBench::new(1, 8, 8, 16, 16).with_failing_preparation();
        assert!(matches!(bench.prepare(), Err(HardwareError::CameraNotReady(_))));
    }

    #[test]
    fn test_perfect_match_reaches_peak() {
        let target = vec![200u8; 64];
        let mut bench = SimulatedBench::new(1, 8, 8, 16, 16).with_target(0, target.clone()).with_peak_intensity(150.0);
        assert!(bench.write_image(0, &target));
        assert_eq!(bench.match_quality(), 1.0);
        let image = bench.acquire_image().expect("no failure configured");
        assert!(image.data().iter().all(|&p| p == 150));
    }

    #[test]
    fn test_opposite_phase_is_dark() {
        let mut bench = SimulatedBench::new(1, 8, 8, 16, 16).with_target(0, vec![0u8; 64]);
        assert!(bench.write_image(0, &vec![128u8; 64]));
        assert_eq!(bench.match_quality(), 0.0);
        assert_eq!(bench.acquire_image().expect("frame").data()[0], 0);
    }

    #[test]
    fn test_exposure_scales_intensity_and_ratio() {
        let target = vec![10u8; 64];
        let mut bench = SimulatedBench::new(1, 8, 8, 4, 4).with_target(0, target.clone()).with_peak_intensity(100.0);
        bench.write_image(0, &target);
        assert_eq!(bench.exposure_ratio(), 1.0);
        bench.halve_exposure_time();
        assert_eq!(bench.exposure_ratio(), 2.0);
        assert_eq!(bench.acquire_image().expect("frame").data()[0], 50, "half the exposure should halve the intensity");
    }

    #[test]
    fn test_saturation() {
        let target = vec![10u8; 64];
        let mut bench = SimulatedBench::new(1, 8, 8, 4, 4).with_target(0, target.clone()).with_peak_intensity(1000.0);
        bench.write_image(0, &target);
        assert_eq!(bench.acquire_image().expect("frame").data()[0], 255);
    }

    #[test]
    fn test_write_image_rejects_bad_input() {
        let mut bench = SimulatedBench::new(1, 8, 8, 4, 4);
        assert!(!bench.write_image(0, &[0u8; 10]), "wrong buffer size should be refused");
        assert!(!bench.write_image(3, &[0u8; 64]), "unknown board should be refused");
    }

    #[test]
    fn test_acquisition_failures() {
        let mut bench = SimulatedBench::new(1, 4, 4, 4, 4).with_acquisition_failures(3);
        let frames: Vec<bool> = (0..6).map(|_| bench.acquire_image().is_some()).collect();
        assert_eq!(frames, vec![true, true, false, true, true, false]);
        assert_eq!(bench.acquisitions(), 6);
    }

    #[test]
    fn test_phase_distance_wraps() {
        assert_eq!(phase_distance(0, 255), 1);
        assert_eq!(phase_distance(0, 128), 128);
        assert_eq!(phase_distance(10, 20), 10);
    }
}
