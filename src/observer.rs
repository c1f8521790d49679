use log::{debug, info, trace, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cinfo;
use crate::param::Output;
use crate::utils::lock;

/// One individual measured on the bench
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationEvent {
    pub generation: usize,
    pub individual: usize,
    /// Time since the start of the run
    pub elapsed: Duration,
    pub raw_fitness: f64,
    /// raw_fitness scaled by the exposure ratio
    pub fitness: f64,
    pub exposure_ratio: f64,
    /// True for the index holding the best elite
    pub elite_slot: bool,
}

/// Timing and progress of one finished generation
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationReport {
    pub generation: usize,
    pub evaluation: Duration,
    pub breeding: Duration,
    pub total: Duration,
    pub elapsed: Duration,
    pub best_fitness: f64,
    pub exposure_ratio: f64,
}

/// Best value kept for one bin by the brute-force sweep
#[derive(Clone, Debug, PartialEq)]
pub struct BinReport {
    pub board_id: usize,
    pub bin: usize,
    pub value: i32,
    pub fitness: f64,
    pub elapsed: Duration,
}

/// Receives progress events from the optimizers. Called from worker threads.
pub trait RunObserver: Send + Sync {
    fn individual_evaluated(&self, _event: &EvaluationEvent) {}
    fn generation_finished(&self, _report: &GenerationReport) {}
    /// `step` is the generation for genetic runs and the number of finished bins for brute force
    fn exposure_shortened(&self, _step: usize, _exposure_ratio: f64) {}
    fn bin_optimized(&self, _report: &BinReport) {}
    /// Last call of a run
    fn finish(&self) {}
}

/// Reports progress through the `log` facade
pub struct LogObserver {
    colorful: bool,
    every: usize,
}

impl LogObserver {
    /// `every`: one generation out of `every` is logged at info, the others at debug
    pub fn new(colorful: bool, every: usize) -> LogObserver {
        LogObserver { colorful, every: every.max(1) }
    }
}

impl RunObserver for LogObserver {
    fn individual_evaluated(&self, event: &EvaluationEvent) {
        trace!(
            "gen {} individual {}: raw {:.3}, fitness {:.3}",
            event.generation,
            event.individual,
            event.raw_fitness,
            event.fitness
        );
    }

    fn generation_finished(&self, report: &GenerationReport) {
        if report.generation % self.every == 0 {
            cinfo!(
                self.colorful,
                "\x1b[1;93m#{:<6}\x1b[0m best fitness \x1b[1;92m{:.3}\x1b[0m | eval {:.2?} | breed {:.2?} | exposure x{:.2} | {:.1}s",
                report.generation,
                report.best_fitness,
                report.evaluation,
                report.breeding,
                report.exposure_ratio,
                report.elapsed.as_secs_f64()
            );
        } else {
            debug!(
                "#{} best fitness {:.3} | eval {:.2?} | breed {:.2?}",
                report.generation, report.best_fitness, report.evaluation, report.breeding
            );
        }
    }

    fn exposure_shortened(&self, step: usize, exposure_ratio: f64) {
        info!("Exposure shortened after step {} with new ratio {:.3}", step, exposure_ratio);
    }

    fn bin_optimized(&self, report: &BinReport) {
        debug!(
            "Board {} bin {}: best value {} with fitness {:.3}",
            report.board_id, report.bin, report.value, report.fitness
        );
    }
}

/// Forwards every event to each registered observer, in registration order
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl ObserverSet {
    pub fn new() -> ObserverSet {
        ObserverSet::default()
    }

    pub fn push(&mut self, observer: Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl RunObserver for ObserverSet {
    fn individual_evaluated(&self, event: &EvaluationEvent) {
        self.observers.iter().for_each(|o| o.individual_evaluated(event));
    }

    fn generation_finished(&self, report: &GenerationReport) {
        self.observers.iter().for_each(|o| o.generation_finished(report));
    }

    fn exposure_shortened(&self, step: usize, exposure_ratio: f64) {
        self.observers.iter().for_each(|o| o.exposure_shortened(step, exposure_ratio));
    }

    fn bin_optimized(&self, report: &BinReport) {
        self.observers.iter().for_each(|o| o.bin_optimized(report));
    }

    fn finish(&self) {
        self.observers.iter().for_each(|o| o.finish());
    }
}

type Stream = Mutex<BufWriter<File>>;

/// Writes run traces as text files in an output folder.
///
/// Every file name starts with `<prefix>_`, usually a timestamp followed by the
/// algorithm name. Each file has its own lock so evaluation threads only contend
/// on the stream they write. Write failures are logged and never interrupt a run.
pub struct FileRecorder {
    time_vs_fitness: Option<Stream>,
    time_per_generation: Option<Stream>,
    exposure: Option<Stream>,
    elite_fitness: Option<Stream>,
    bins: Option<Stream>,
    elite_save_frequency: usize,
    paths: Vec<PathBuf>,
}

impl FileRecorder {
    /// Creates the folder if needed and opens the streams enabled in `output`.
    ///
    /// # Arguments
    ///
    /// * `folder` - Destination folder.
    /// * `prefix` - Prepended to every file name.
    /// * `output` - Stream switches and elite save frequency.
    /// * `brute_force` - Opens the bin stream instead of the per-generation streams.
    pub fn create(folder: &Path, prefix: &str, output: &Output, brute_force: bool) -> io::Result<FileRecorder> {
        std::fs::create_dir_all(folder)?;
        let mut paths = Vec::new();
        let mut open = |enabled: bool, name: &str, header: Option<&str>| -> io::Result<Option<Stream>> {
            if !enabled {
                return Ok(None);
            }
            let path = folder.join(format!("{}_{}", prefix, name));
            let mut writer = BufWriter::new(File::create(&path)?);
            if let Some(header) = header {
                writeln!(writer, "{}", header)?;
            }
            paths.push(path);
            Ok(Some(Mutex::new(writer)))
        };

        let time_vs_fitness = open(output.save_time_vs_fitness, "time_vs_fitness.csv", Some("seconds,fitness"))?;
        let time_per_generation = open(
            output.save_time_per_generation && !brute_force,
            "time_per_generation.csv",
            Some("generation,evaluation_us,breeding_us,total_us"),
        )?;
        let exposure = open(output.save_exposure_shorten, "exposure.txt", None)?;
        let elite_fitness = open(output.save_elite_fitness && !brute_force, "elite_fitness.csv", Some("generation,fitness"))?;
        let bins = open(brute_force, "bins.csv", Some("board,bin,value,fitness"))?;

        Ok(FileRecorder {
            time_vs_fitness,
            time_per_generation,
            exposure,
            elite_fitness,
            bins,
            elite_save_frequency: output.elite_save_frequency.max(1),
            paths,
        })
    }

    /// Files opened by this recorder
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn write_line(stream: &Option<Stream>, line: std::fmt::Arguments) {
        if let Some(stream) = stream {
            if let Err(e) = writeln!(lock(stream), "{}", line) {
                warn!("Cannot write run trace: {}", e);
            }
        }
    }
}

impl RunObserver for FileRecorder {
    fn individual_evaluated(&self, event: &EvaluationEvent) {
        Self::write_line(&self.time_vs_fitness, format_args!("{:.6},{:.6}", event.elapsed.as_secs_f64(), event.fitness));
        if event.elite_slot && event.generation % self.elite_save_frequency == 0 {
            Self::write_line(&self.elite_fitness, format_args!("{},{:.6}", event.generation, event.fitness));
        }
    }

    fn generation_finished(&self, report: &GenerationReport) {
        Self::write_line(
            &self.time_per_generation,
            format_args!(
                "{},{},{},{}",
                report.generation,
                report.evaluation.as_micros(),
                report.breeding.as_micros(),
                report.total.as_micros()
            ),
        );
    }

    fn exposure_shortened(&self, step: usize, exposure_ratio: f64) {
        Self::write_line(
            &self.exposure,
            format_args!("Exposure shortened after step {} with new ratio {}", step, exposure_ratio),
        );
    }

    fn bin_optimized(&self, report: &BinReport) {
        Self::write_line(&self.bins, format_args!("{},{},{},{:.6}", report.board_id, report.bin, report.value, report.fitness));
        Self::write_line(&self.time_vs_fitness, format_args!("{:.6},{:.6}", report.elapsed.as_secs_f64(), report.fitness));
    }

    fn finish(&self) {
        for stream in [&self.time_vs_fitness, &self.time_per_generation, &self.exposure, &self.elite_fitness, &self.bins]
            .into_iter()
            .flatten()
        {
            if let Err(e) = lock(stream).flush() {
                warn!("Cannot flush run trace: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        generations: AtomicUsize,
        exposures: AtomicUsize,
    }

    impl RunObserver for Counter {
        fn generation_finished(&self, _report: &GenerationReport) {
            self.generations.fetch_add(1, Ordering::SeqCst);
        }
        fn exposure_shortened(&self, _step: usize, _exposure_ratio: f64) {
            self.exposures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn report(generation: usize) -> GenerationReport {
        GenerationReport {
            generation,
            evaluation: Duration::from_micros(1500),
            breeding: Duration::from_micros(20),
            total: Duration::from_micros(1600),
            elapsed: Duration::from_secs(1),
            best_fitness: 42.0,
            exposure_ratio: 1.0,
        }
    }

    fn event(generation: usize, elite_slot: bool) -> EvaluationEvent {
        EvaluationEvent {
            generation,
            individual: 3,
            elapsed: Duration::from_millis(250),
            raw_fitness: 21.0,
            fitness: 42.0,
            exposure_ratio: 2.0,
            elite_slot,
        }
    }

    #[test]
    fn test_observer_set_forwards_to_all() {
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        let mut set = ObserverSet::new();
        set.push(first.clone());
        set.push(second.clone());
        assert_eq!(set.len(), 2);

        set.generation_finished(&report(0));
        set.exposure_shortened(1, 2.0);
        set.individual_evaluated(&event(0, false));

        for counter in [&first, &second] {
            assert_eq!(counter.generations.load(Ordering::SeqCst), 1);
            assert_eq!(counter.exposures.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_file_recorder_writes_streams() {
        let folder = tempfile::tempdir().expect("temp dir");
        let recorder = FileRecorder::create(folder.path(), "run", &Output::default(), false).expect("recorder");
        assert_eq!(recorder.paths().len(), 4, "bins stream is only opened for brute force");

        recorder.individual_evaluated(&event(0, true));
        recorder.individual_evaluated(&event(3, true));
        recorder.individual_evaluated(&event(10, false));
        recorder.generation_finished(&report(0));
        recorder.exposure_shortened(1, 2.0);
        recorder.finish();

        let read = |name: &str| std::fs::read_to_string(folder.path().join(format!("run_{}", name))).expect("stream file");
        assert_eq!(read("time_vs_fitness.csv").lines().count(), 4, "header plus one line per evaluation");
        assert_eq!(read("elite_fitness.csv"), "generation,fitness\n0,42.000000\n", "elite fitness is saved every 10 generations");
        assert_eq!(read("time_per_generation.csv").lines().nth(1), Some("0,1500,20,1600"));
        assert_eq!(read("exposure.txt"), "Exposure shortened after step 1 with new ratio 2\n");
    }

    #[test]
    fn test_file_recorder_respects_switches() {
        let folder = tempfile::tempdir().expect("temp dir");
        let mut output = Output::default();
        output.save_time_vs_fitness = false;
        output.save_exposure_shorten = false;
        let recorder = FileRecorder::create(folder.path(), "bf", &output, true).expect("recorder");
        assert_eq!(recorder.paths().len(), 1, "only the bin stream should be open");

        recorder.bin_optimized(&BinReport { board_id: 0, bin: 2, value: 96, fitness: 12.5, elapsed: Duration::from_secs(3) });
        recorder.finish();
        let bins = std::fs::read_to_string(folder.path().join("bf_bins.csv")).expect("bin stream");
        assert_eq!(bins, "board,bin,value,fitness\n0,2,96,12.500000\n");
    }
}
