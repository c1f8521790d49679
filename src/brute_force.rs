use log::{error, info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::cinfo;
use crate::experiment::{BoardResult, RunReport};
use crate::hardware::Hardware;
use crate::individual::UNEVALUATED;
use crate::observer::{BinReport, RunObserver};
use crate::param::{self, Algorithm, Param};
use crate::population::GENE_VALUE_CAP;
use crate::session::{DriverError, RunState, Session, StopReason};

/// Optimizes every bin independently by trying each phase value in turn.
///
/// Boards are handled one after the other, bins in genome order. A bin keeps the value
/// giving the highest normalized fitness before the sweep moves on, so later bins are
/// measured on top of the values already chosen.
pub struct BruteForceOptimizer<H: Hardware> {
    hardware: Option<H>,
    param: Param,
    observer: Arc<dyn RunObserver>,
    running: Arc<AtomicBool>,
    state: RunState,
}

impl<H: Hardware> BruteForceOptimizer<H> {
    pub fn new(hardware: H, param: &Param, observer: Arc<dyn RunObserver>, running: Arc<AtomicBool>) -> BruteForceOptimizer<H> {
        BruteForceOptimizer { hardware: Some(hardware), param: param.clone(), observer, running, state: RunState::Idle }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Sweeps every bin of every board.
    ///
    /// # Errors
    ///
    /// Fails when the parameters are rejected by [`param::validate`], when the hardware
    /// cannot be prepared, or when called a second time.
    pub fn run(&mut self) -> Result<RunReport, DriverError> {
        let hardware = self.hardware.take().ok_or(DriverError::AlreadyRun)?;
        if let Err(e) = param::validate(&mut self.param) {
            error!("Brute force optimization cannot start: {}", e);
            self.state = RunState::Stopped(StopReason::Failed);
            return Err(DriverError::InvalidParam(e));
        }
        let mut report = RunReport::new(Algorithm::bf, &self.param);
        let start = Instant::now();

        self.state = RunState::Preparing;
        let session = match Session::prepare(hardware, &self.param.camera, Arc::clone(&self.observer), Arc::clone(&self.running)) {
            Ok(session) => session,
            Err(e) => {
                warn!("Brute force optimization cannot start: {}", e);
                self.state = RunState::Stopped(StopReason::Failed);
                return Err(e);
            }
        };

        let genome_length = self.param.genome_length();
        let step = self.param.bf.phase_resolution.max(1) as usize;
        let board_count = session.boards().len();
        let mut genomes = vec![vec![0i32; genome_length]; board_count];
        let mut best_fitness = UNEVALUATED;
        let mut evaluations = 0;
        let mut bins_done = 0;

        cinfo!(
            self.param.general.display_colorful,
            "\x1b[1;96mBrute force\x1b[0m on {} board(s): {} bins, {} values per bin",
            board_count,
            genome_length,
            (GENE_VALUE_CAP as usize).div_ceil(step)
        );

        self.state = RunState::Evaluating;
        let mut reason = StopReason::Success;
        'boards: for board_index in 0..board_count {
            for bin in 0..genome_length {
                let mut best_value = genomes[board_index][bin];
                let mut best_bin_fitness = UNEVALUATED;

                for value in (0..GENE_VALUE_CAP as i32).step_by(step) {
                    if !session.is_running() {
                        genomes[board_index][bin] = best_value;
                        info!("Signal received");
                        reason = StopReason::Aborted;
                        break 'boards;
                    }

                    genomes[board_index][bin] = value;
                    let Some(measurement) = session.measure(&[(board_index, genomes[board_index].as_slice())]) else {
                        continue;
                    };
                    evaluations += 1;

                    let fitness = measurement.fitness();
                    if fitness > best_bin_fitness {
                        best_bin_fitness = fitness;
                        best_value = value;
                    }
                    if fitness > best_fitness {
                        best_fitness = fitness;
                        session.store_best_image(measurement.image);
                    }
                    if session.take_exposure_flag() {
                        let exposure_ratio = session.halve_exposure();
                        self.observer.exposure_shortened(bins_done, exposure_ratio);
                    }
                }

                genomes[board_index][bin] = best_value;
                bins_done += 1;
                self.observer.bin_optimized(&BinReport {
                    board_id: session.boards()[board_index].board_id,
                    bin,
                    value: best_value,
                    fitness: best_bin_fitness,
                    elapsed: session.elapsed(),
                });
            }
        }

        self.state = RunState::Stopped(reason);
        self.observer.finish();
        session.shutdown();

        report.stop_reason = reason;
        report.generations = bins_done;
        report.evaluations = evaluations;
        report.best_fitness = best_fitness;
        report.exposure_ratio = session.exposure_ratio();
        report.execution_time = start.elapsed().as_secs_f64();
        report.boards = session
            .boards()
            .iter()
            .zip(genomes)
            .map(|(board, genome)| BoardResult { board_id: board.board_id, genome })
            .collect();
        report.best_image = session.take_best_image();

        cinfo!(
            self.param.general.display_colorful,
            "Brute force stopped ({:?}) after {} bins and {} evaluations in {:.2}s, best fitness \x1b[1;92m{:.3}\x1b[0m",
            reason,
            bins_done,
            evaluations,
            report.execution_time,
            best_fitness
        );

        Ok(report)
    }
}
