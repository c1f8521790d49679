/// End-to-End Integration Test for the genetic optimizers on the simulated bench
///
/// This test validates the complete optimization workflow:
/// 1. Preparing one or several simulated SLM boards
/// 2. Running the simple and micro genetic algorithms
/// 3. Tolerating dropped camera frames
/// 4. Shortening the exposure when frames get too bright
///
/// Run with: cargo test --test test_ga_e2e_bench -- --nocapture
use phaseopt::bench::SimulatedBench;
use phaseopt::ga::GeneticOptimizer;
use phaseopt::observer::{LogObserver, ObserverSet, RunObserver};
use phaseopt::param::{Algorithm, Param};
use phaseopt::population::Strategy;
use phaseopt::session::StopReason;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Helper function to create small GA parameters for a 16x16 SLM
fn create_bench_params() -> Param {
    let mut param = Param::default();

    param.general.seed = Some(42);
    param.general.algo = Algorithm::sga;
    param.general.display_colorful = false;
    param.general.eval_thread_count = 2;
    param.general.breed_thread_count = 2;

    param.ga.population_size = 8;
    param.ga.elite_size = 2;

    param.stop.target_fitness = 1e9;
    param.stop.min_seconds = 0.0;
    param.stop.max_generations = 4;

    param.camera.bins_x = 4;
    param.camera.bins_y = 4;
    param.camera.bin_size_x = 4;
    param.camera.bin_size_y = 4;
    param.camera.target_radius = 8;
    param.camera.max_fitness_value = 1000.0;

    param
}

fn log_observer() -> Arc<dyn RunObserver> {
    Arc::new(LogObserver::new(false, 10))
}

#[derive(Default)]
struct ExposureCounter {
    shortened: AtomicUsize,
    generations: AtomicUsize,
    finished: AtomicUsize,
}

impl RunObserver for ExposureCounter {
    fn exposure_shortened(&self, _step: usize, _exposure_ratio: f64) {
        self.shortened.fetch_add(1, Ordering::Relaxed);
    }

    fn generation_finished(&self, _report: &phaseopt::observer::GenerationReport) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_simple_ga_on_bench() {
    let param = create_bench_params();
    let running = Arc::new(AtomicBool::new(true));
    let bench = SimulatedBench::new(1, 16, 16, 32, 32);

    let report = GeneticOptimizer::new(bench, &param, Strategy::Simple, log_observer(), running).run().expect("SGA run should succeed");

    assert_eq!(report.algorithm, Algorithm::sga);
    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.generations, 4, "the generation ceiling should end the run");
    assert_eq!(report.evaluations, 4 * 8, "every individual is measured every generation");
    assert_eq!(report.boards.len(), 1);
    assert_eq!(report.boards[0].genome.len(), 16, "one gene per used bin");
    assert!(report.boards[0].genome.iter().all(|&g| (0..256).contains(&g)), "genes should stay in [0, 256)");
    assert!(report.best_fitness >= 0.0);
    assert_eq!(report.exposure_ratio, 1.0, "no frame should exceed the ceiling");
}

#[test]
fn test_micro_ga_drives_every_board() {
    let mut param = create_bench_params();
    param.general.algo = Algorithm::uga;
    param.stop.max_generations = 3;
    let running = Arc::new(AtomicBool::new(true));
    let bench = SimulatedBench::new(2, 16, 16, 32, 32);

    let report = GeneticOptimizer::new(bench, &param, Strategy::Micro, log_observer(), running).run().expect("uGA run should succeed");

    assert_eq!(report.algorithm, Algorithm::uga);
    assert_eq!(report.generations, 3);
    assert_eq!(report.evaluations, 3 * 5, "micro populations always hold 5 individuals");
    assert_eq!(report.boards.len(), 2, "both boards should get a genome");
    assert_eq!(report.boards[1].board_id, 1);
    assert!(report.best_image.is_some());
}

#[test]
fn test_dropped_frames_are_tolerated() {
    let param = create_bench_params();
    let running = Arc::new(AtomicBool::new(true));
    let bench = SimulatedBench::new(1, 16, 16, 32, 32).with_acquisition_failures(5);

    let report = GeneticOptimizer::new(bench, &param, Strategy::Simple, log_observer(), running).run().expect("dropped frames are not fatal");

    assert_eq!(report.stop_reason, StopReason::Success);
    assert_eq!(report.generations, 4);
    // 32 acquisitions, every 5th one dropped
    assert_eq!(report.evaluations, 32 - 6);
}

#[test]
fn test_bright_frames_shorten_exposure() {
    let mut param = create_bench_params();
    param.camera.max_fitness_value = 0.5;
    param.stop.max_generations = 2;
    let running = Arc::new(AtomicBool::new(true));
    let bench = SimulatedBench::new(1, 16, 16, 32, 32).with_peak_intensity(250.0).with_target(0, vec![0u8; 256]);

    let counter = Arc::new(ExposureCounter::default());
    let mut observers = ObserverSet::new();
    observers.push(log_observer());
    observers.push(counter.clone());

    let report = GeneticOptimizer::new(bench, &param, Strategy::Simple, Arc::new(observers), running).run().expect("run should succeed");

    let shortened = counter.shortened.load(Ordering::Relaxed);
    assert!(shortened >= 1, "a lit frame above 0.5 should shorten the exposure");
    assert_eq!(report.exposure_ratio, 2f64.powi(shortened as i32), "each shortening halves the exposure time");
    assert_eq!(counter.generations.load(Ordering::Relaxed), 2);
    assert_eq!(counter.finished.load(Ordering::Relaxed), 1);
}

#[test]
fn test_abort_from_another_thread() {
    let mut param = create_bench_params();
    param.stop.max_generations = 0;
    let running = Arc::new(AtomicBool::new(true));
    let bench = SimulatedBench::new(1, 16, 16, 32, 32);

    let stopper = {
        let running = running.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            running.store(false, Ordering::Relaxed);
        })
    };

    let report = GeneticOptimizer::new(bench, &param, Strategy::Simple, log_observer(), running).run().expect("an abort is not an error");
    stopper.join().expect("stopper thread");

    assert_eq!(report.stop_reason, StopReason::Aborted);
    assert_eq!(report.boards[0].genome.len(), 16, "an aborted run still reports the elite genome");
}
