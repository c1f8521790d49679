use log::{debug, error, info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use crate::cinfo;
use crate::experiment::{BoardResult, RunReport};
use crate::hardware::Hardware;
use crate::individual::UNEVALUATED;
use crate::observer::{GenerationReport, RunObserver};
use crate::param::{self, Algorithm, Param, Stop};
use crate::population::{BreedingRules, Population, Strategy};
use crate::random;
use crate::session::{DriverError, RunState, Session, StopReason};
use crate::thread_pool::ThreadPool;
use crate::utils::partition_range;

//-----------------------------------------------------------------------------
// Stop conditions
//-----------------------------------------------------------------------------

/// Stop thresholds of a generation loop. Ceilings <= 0 are disabled.
#[derive(Clone, Debug, PartialEq)]
pub struct StopConditions {
    pub target_fitness: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub min_generations: i64,
    pub max_generations: i64,
}

impl StopConditions {
    pub fn from_param(stop: &Stop) -> StopConditions {
        StopConditions {
            target_fitness: stop.target_fitness,
            min_seconds: stop.min_seconds,
            max_seconds: stop.max_seconds,
            min_generations: stop.min_generations,
            max_generations: stop.max_generations,
        }
    }

    /// Tells whether the loop must stop after the generation `generation` (0-based).
    ///
    /// The target fitness only counts once both minimums are exceeded; abort and the
    /// two ceilings stop the loop unconditionally.
    ///
    /// # Arguments
    ///
    /// * `fitness` - Fitness of the best elite.
    /// * `elapsed_seconds` - Time since the start of the run.
    /// * `generation` - Index of the generation that just finished.
    /// * `abort` - An external stop was requested.
    pub fn reached(&self, fitness: f64, elapsed_seconds: f64, generation: usize, abort: bool) -> bool {
        let generations_done = generation as i64 + 1;
        let target_reached =
            fitness > self.target_fitness && elapsed_seconds > self.min_seconds && generations_done > self.min_generations;
        let out_of_time = self.max_seconds > 0.0 && elapsed_seconds >= self.max_seconds;
        let out_of_generations = self.max_generations > 0 && generations_done >= self.max_generations;

        target_reached || abort || out_of_time || out_of_generations
    }
}

//-----------------------------------------------------------------------------
// Genetic optimization driver
//-----------------------------------------------------------------------------

/// Runs a genetic search on the bench: one population per SLM, evaluated together.
///
/// Individual `i` of every population forms one combined bench configuration; its
/// measured fitness is written to index `i` of each population.
pub struct GeneticOptimizer<H: Hardware> {
    hardware: Option<H>,
    param: Param,
    strategy: Strategy,
    observer: Arc<dyn RunObserver>,
    running: Arc<AtomicBool>,
    state: RunState,
}

impl<H: Hardware> GeneticOptimizer<H> {
    /// # Arguments
    ///
    /// * `hardware` - Bench to drive, prepared when the run starts.
    /// * `param` - Run configuration.
    /// * `strategy` - Simple or micro GA.
    /// * `observer` - Receives progress events.
    /// * `running` - Cleared to abort the run.
    pub fn new(hardware: H, param: &Param, strategy: Strategy, observer: Arc<dyn RunObserver>, running: Arc<AtomicBool>) -> GeneticOptimizer<H> {
        GeneticOptimizer { hardware: Some(hardware), param: param.clone(), strategy, observer, running, state: RunState::Idle }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn algorithm(&self) -> Algorithm {
        match self.strategy {
            Strategy::Simple => Algorithm::sga,
            Strategy::Micro => Algorithm::uga,
        }
    }

    /// Runs the generation loop until a stop condition is met.
    ///
    /// # Errors
    ///
    /// Fails when the parameters are rejected by [`param::validate`], when the hardware
    /// cannot be prepared, or when called a second time.
    pub fn run(&mut self) -> Result<RunReport, DriverError> {
        let hardware = self.hardware.take().ok_or(DriverError::AlreadyRun)?;
        if let Err(e) = param::validate(&mut self.param) {
            error!("{} optimization cannot start: {}", self.strategy, e);
            self.state = RunState::Stopped(StopReason::Failed);
            return Err(DriverError::InvalidParam(e));
        }
        let mut report = RunReport::new(self.algorithm(), &self.param);
        let start = Instant::now();

        self.state = RunState::Preparing;
        let session = match Session::prepare(hardware, &self.param.camera, Arc::clone(&self.observer), Arc::clone(&self.running)) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!("{} optimization cannot start: {}", self.strategy, e);
                self.state = RunState::Stopped(StopReason::Failed);
                return Err(e);
            }
        };

        let board_count = session.boards().len();
        let (pool, eval_threads, breed_threads) = self.thread_layout(board_count);
        let rules = BreedingRules {
            genome_length: self.param.genome_length(),
            accepted_similarity: self.param.ga.accepted_similarity,
            mutation_denominator: self.param.ga.mutation_denominator,
        };
        let mut populations: Vec<Population> = (0..board_count)
            .map(|board_index| {
                Population::new(
                    self.strategy,
                    rules,
                    self.param.ga.population_size,
                    self.param.ga.elite_size,
                    random::sources(self.param.general.seed, board_index as u64, breed_threads),
                    pool.clone(),
                )
            })
            .collect();

        cinfo!(
            self.param.general.display_colorful,
            "\x1b[1;96m{}\x1b[0m on {} board(s): {} individuals, {} genes, {} evaluation / {} breeding thread(s)",
            self.strategy,
            board_count,
            populations[0].len(),
            rules.genome_length,
            eval_threads,
            breed_threads
        );

        let stop = StopConditions::from_param(&self.param.stop);
        let mut generation = 0;
        let mut evaluations = 0;
        let mut best_fitness = UNEVALUATED;

        let reason = loop {
            if !session.is_running() {
                info!("Signal received");
                break StopReason::Aborted;
            }

            let generation_start = Instant::now();
            self.state = RunState::Evaluating;
            evaluations += self.evaluate_generation(&session, &mut populations, pool.as_deref(), eval_threads, generation);
            let evaluation = generation_start.elapsed();

            self.state = RunState::Breeding;
            let breeding_start = Instant::now();
            for population in populations.iter_mut() {
                population.next_generation();
            }
            let breeding = breeding_start.elapsed();

            if session.take_exposure_flag() {
                let exposure_ratio = session.halve_exposure();
                self.observer.exposure_shortened(generation + 1, exposure_ratio);
            }

            best_fitness = populations[0].fitness(populations[0].elite_index());
            let elapsed = session.elapsed();
            self.observer.generation_finished(&GenerationReport {
                generation,
                evaluation,
                breeding,
                total: generation_start.elapsed(),
                elapsed,
                best_fitness,
                exposure_ratio: session.exposure_ratio(),
            });

            let abort = !session.is_running();
            let stop_reached = stop.reached(best_fitness, elapsed.as_secs_f64(), generation, abort);
            generation += 1;
            if stop_reached {
                if abort {
                    info!("Signal received");
                    break StopReason::Aborted;
                }
                break StopReason::Success;
            }
        };

        self.state = RunState::Stopped(reason);
        self.observer.finish();
        session.shutdown();

        report.stop_reason = reason;
        report.generations = generation;
        report.evaluations = evaluations;
        report.best_fitness = best_fitness;
        report.exposure_ratio = session.exposure_ratio();
        report.execution_time = start.elapsed().as_secs_f64();
        report.boards = session
            .boards()
            .iter()
            .zip(populations.iter())
            .map(|(board, population)| BoardResult {
                board_id: board.board_id,
                genome: population.genome(population.elite_index()).to_vec(),
            })
            .collect();
        report.best_image = session.take_best_image();

        cinfo!(
            self.param.general.display_colorful,
            "{} stopped ({:?}) after {} generations in {:.2}s, best fitness \x1b[1;92m{:.3}\x1b[0m",
            self.strategy,
            reason,
            generation,
            report.execution_time,
            best_fitness
        );

        Ok(report)
    }

    /// Pool and thread counts: the breeding budget is shared by the populations
    fn thread_layout(&self, board_count: usize) -> (Option<Arc<ThreadPool>>, usize, usize) {
        if !self.param.general.multithread {
            return (None, 1, 1);
        }
        let eval_threads = self.param.general.eval_thread_count.max(1);
        let breed_budget = self.param.general.breed_thread_count.max(1);
        let breed_threads = (breed_budget / board_count.max(1)).max(1);
        let hardware_threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let pool_size = hardware_threads.min(eval_threads.max(breed_budget));
        debug!("Pool of {} workers for {} evaluation and {} breeding threads", pool_size, eval_threads, breed_threads);
        (Some(Arc::new(ThreadPool::new(pool_size))), eval_threads, breed_threads)
    }

    /// Measures every individual index once and writes the fitness to every population.
    ///
    /// Returns the number of indexes actually measured.
    fn evaluate_generation(
        &self,
        session: &Arc<Session<H>>,
        populations: &mut [Population],
        pool: Option<&ThreadPool>,
        eval_threads: usize,
        generation: usize,
    ) -> usize {
        let population_size = populations[0].len();
        let elite_index = populations[0].elite_index();
        let genomes: Arc<Vec<Vec<Vec<i32>>>> = Arc::new(
            (0..population_size)
                .map(|individual| populations.iter().map(|p| p.genome(individual).to_vec()).collect())
                .collect(),
        );
        let skip_evaluated = self.param.ga.skip_elite_reevaluation;
        let pending: Arc<Vec<bool>> =
            Arc::new((0..population_size).map(|individual| !skip_evaluated || !populations[0].individuals[individual].is_evaluated()).collect());

        let results: Vec<(usize, f64)> = match pool {
            Some(pool) if eval_threads > 1 => {
                let (tx, rx) = mpsc::channel();
                for thread_id in 0..eval_threads {
                    let range = partition_range(population_size, eval_threads, thread_id);
                    let session = Arc::clone(session);
                    let genomes = Arc::clone(&genomes);
                    let pending = Arc::clone(&pending);
                    let tx = tx.clone();
                    pool.push_job(move || {
                        for individual in range.filter(|&i| pending[i]) {
                            if let Some(fitness) = session.run_individual(&genomes[individual], generation, individual, individual == elite_index) {
                                let _ = tx.send((individual, fitness));
                            }
                        }
                    });
                }
                drop(tx);
                pool.wait();
                rx.iter().collect()
            }
            _ => (0..population_size)
                .filter(|&i| pending[i])
                .filter_map(|individual| {
                    session
                        .run_individual(&genomes[individual], generation, individual, individual == elite_index)
                        .map(|fitness| (individual, fitness))
                })
                .collect(),
        };

        for &(individual, fitness) in &results {
            for population in populations.iter_mut() {
                population.set_fitness(individual, fitness);
            }
        }
        results.len()
    }
}
