use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::hardware::{Board, CameraImage, Hardware, HardwareError};
use crate::observer::{EvaluationEvent, RunObserver};
use crate::param::Camera;
use crate::scaler::ImageScaler;
use crate::utils::lock;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("hardware preparation failed: {0}")]
    Hardware(#[from] HardwareError),
    #[error("the hardware exposes no board to optimize")]
    NoBoards,
    #[error("this optimizer has already run")]
    AlreadyRun,
    #[error("invalid parameters: {0}")]
    InvalidParam(String),
}

/// Why a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A stop condition was met
    Success,
    /// The running flag was cleared (signal or caller)
    Aborted,
    /// The hardware could not be prepared
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    Evaluating,
    Breeding,
    Stopped(StopReason),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped(reason) => write!(f, "Stopped({:?})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Frame measured for one set of board images
#[derive(Clone, Debug)]
pub struct Measurement {
    pub raw_fitness: f64,
    pub exposure_ratio: f64,
    pub image: CameraImage,
}

impl Measurement {
    /// Raw fitness normalized by the exposure, comparable across exposure changes
    pub fn fitness(&self) -> f64 {
        self.raw_fitness * self.exposure_ratio
    }
}

/// Prepared hardware and the state shared by every evaluation job of a run.
///
/// The device sits behind a single lock held from the first SLM write to the end of
/// the frame acquisition. SLM buffers, the best-image slot and the exposure flag each
/// have their own lock.
pub struct Session<H: Hardware> {
    hardware: Mutex<H>,
    boards: Vec<Board>,
    scalers: Vec<ImageScaler>,
    slm_images: Mutex<Vec<Vec<u8>>>,
    best_image: Mutex<Option<CameraImage>>,
    shorten_exposure: Mutex<bool>,
    observer: Arc<dyn RunObserver>,
    running: Arc<AtomicBool>,
    target_radius: usize,
    max_fitness_value: f64,
    started: Instant,
}

impl<H: Hardware> Session<H> {
    /// Prepares the hardware and builds one centered scaler per board.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Hardware`] if the device cannot be prepared and
    /// [`DriverError::NoBoards`] if it exposes no SLM.
    pub fn prepare(mut hardware: H, camera: &Camera, observer: Arc<dyn RunObserver>, running: Arc<AtomicBool>) -> Result<Session<H>, DriverError> {
        let boards = hardware.prepare()?;
        if boards.is_empty() {
            return Err(DriverError::NoBoards);
        }

        let scalers: Vec<ImageScaler> = boards
            .iter()
            .map(|board| {
                let mut scaler = ImageScaler::new(board.width, board.height, board.depth);
                scaler.set_bin_size(camera.bin_size_x, camera.bin_size_y);
                scaler.set_used_bins(camera.bins_x, camera.bins_y);
                scaler
            })
            .collect();

        let slm_images = scalers
            .iter()
            .map(|scaler| {
                let mut image = vec![0u8; scaler.output_len()];
                scaler.zero_output_image(&mut image);
                image
            })
            .collect();

        for (board, scaler) in boards.iter().zip(scalers.iter()) {
            let (used_x, used_y) = scaler.used_bins();
            info!(
                "Board {} ({}x{}): {}x{} bins of {}x{} px",
                board.board_id, board.width, board.height, used_x, used_y, camera.bin_size_x, camera.bin_size_y
            );
        }

        Ok(Session {
            hardware: Mutex::new(hardware),
            boards,
            scalers,
            slm_images: Mutex::new(slm_images),
            best_image: Mutex::new(None),
            shorten_exposure: Mutex::new(false),
            observer,
            running,
            target_radius: camera.target_radius,
            max_fitness_value: camera.max_fitness_value,
            started: Instant::now(),
        })
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Time since the hardware was prepared
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Writes each `(board index, bins)` pair to its SLM and grabs one frame.
    ///
    /// Returns `None` without touching the device once the run is aborted, or when the
    /// acquisition fails. Flags the exposure for shortening when the raw fitness
    /// exceeds the configured ceiling.
    pub fn measure(&self, writes: &[(usize, &[i32])]) -> Option<Measurement> {
        let (image, exposure_ratio) = {
            let mut hardware = lock(&self.hardware);
            if !self.is_running() {
                return None;
            }
            {
                let mut slm_images = lock(&self.slm_images);
                for &(board_index, bins) in writes {
                    let image = &mut slm_images[board_index];
                    self.scalers[board_index].translate_image(bins, image);
                    let board_id = self.boards[board_index].board_id;
                    if !hardware.write_image(board_id, image) {
                        warn!("Board {} refused the image", board_id);
                    }
                }
            }
            (hardware.acquire_image(), hardware.exposure_ratio())
        };

        let Some(image) = image else {
            error!("Image acquisition failed, measurement skipped");
            return None;
        };

        let raw_fitness = H::fitness_of(&image, self.target_radius);
        if raw_fitness > self.max_fitness_value {
            *lock(&self.shorten_exposure) = true;
        }
        Some(Measurement { raw_fitness, exposure_ratio, image })
    }

    /// Measures the individual `individual` of every population at once.
    ///
    /// # Arguments
    ///
    /// * `genomes` - One genome per board, in board order.
    /// * `generation` - Current generation index.
    /// * `individual` - Index of the individual in each population.
    /// * `elite_slot` - The frame of the elite slot replaces the best image.
    ///
    /// # Returns
    ///
    /// The normalized fitness, or `None` if nothing was measured.
    pub fn run_individual(&self, genomes: &[Vec<i32>], generation: usize, individual: usize, elite_slot: bool) -> Option<f64> {
        let writes: Vec<(usize, &[i32])> = genomes.iter().enumerate().map(|(i, genome)| (i, genome.as_slice())).collect();
        let measurement = match self.measure(&writes) {
            Some(measurement) => measurement,
            None => {
                if self.is_running() {
                    error!("No fitness for individual {} of generation {}", individual, generation);
                }
                return None;
            }
        };

        let fitness = measurement.fitness();
        self.observer.individual_evaluated(&EvaluationEvent {
            generation,
            individual,
            elapsed: self.elapsed(),
            raw_fitness: measurement.raw_fitness,
            fitness,
            exposure_ratio: measurement.exposure_ratio,
            elite_slot,
        });
        if elite_slot {
            self.store_best_image(measurement.image);
        }
        Some(fitness)
    }

    /// Replaces the best image; the last writer wins
    pub fn store_best_image(&self, image: CameraImage) {
        *lock(&self.best_image) = Some(image);
    }

    pub fn take_best_image(&self) -> Option<CameraImage> {
        lock(&self.best_image).take()
    }

    /// Returns and clears the exposure flag
    pub fn take_exposure_flag(&self) -> bool {
        std::mem::replace(&mut *lock(&self.shorten_exposure), false)
    }

    /// Halves the exposure time and returns the new exposure ratio
    pub fn halve_exposure(&self) -> f64 {
        let mut hardware = lock(&self.hardware);
        hardware.halve_exposure_time();
        hardware.exposure_ratio()
    }

    pub fn exposure_ratio(&self) -> f64 {
        lock(&self.hardware).exposure_ratio()
    }

    pub fn shutdown(&self) {
        lock(&self.hardware).shutdown();
    }
}
