pub mod utils;
pub mod random;
pub mod individual;
pub mod thread_pool;
pub mod scaler;
pub mod population;
mod breeding;
pub mod hardware;
pub mod bench;
pub mod observer;
pub mod session;
pub mod ga;
pub mod brute_force;
pub mod experiment;
pub mod param;

use log::{info, warn};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::brute_force::BruteForceOptimizer;
use crate::experiment::RunReport;
use crate::ga::GeneticOptimizer;
use crate::hardware::Hardware;
use crate::observer::{FileRecorder, LogObserver, ObserverSet, RunObserver};
use crate::param::{Algorithm, Param};
use crate::population::Strategy;
use crate::session::DriverError;

/// Runs the optimizer selected by `param.general.algo` on `hardware`.
///
/// Progress is logged, and written as trace files when an output folder is set.
/// The report is saved next to the traces when `output.save_report` is on.
///
/// # Errors
///
/// Returns a [`DriverError`] if the parameters are invalid or the hardware cannot be prepared.
pub fn run<H: Hardware>(param: &Param, hardware: H, running: Arc<AtomicBool>) -> Result<RunReport, DriverError> {
    let mut param = param.clone();
    param::validate(&mut param).map_err(DriverError::InvalidParam)?;
    let param = &param;
    let algorithm = param.general.algo;
    let observer = build_observers(param, algorithm);

    let report = match algorithm {
        Algorithm::sga | Algorithm::uga => {
            let strategy = if algorithm == Algorithm::sga { Strategy::Simple } else { Strategy::Micro };
            cinfo!(
                param.general.display_colorful,
                "Optimizing using {} genetic algorithm\n-----------------------------------------------------",
                strategy
            );
            GeneticOptimizer::new(hardware, param, strategy, observer, running).run()?
        }
        Algorithm::bf => {
            cinfo!(param.general.display_colorful, "Optimizing using brute force\n-----------------------------------------------------");
            BruteForceOptimizer::new(hardware, param, observer, running).run()?
        }
    };

    if !param.output.folder.is_empty() && param.output.save_report {
        let path = Path::new(&param.output.folder).join(format!("{}_report.json", report.id));
        match report.save_json(&path) {
            Ok(()) => info!("Run report saved to {}", path.display()),
            Err(e) => warn!("Failed to save the run report to {}: {}", path.display(), e),
        }
    }

    Ok(report)
}

fn build_observers(param: &Param, algorithm: Algorithm) -> Arc<dyn RunObserver> {
    let mut observers = ObserverSet::new();
    observers.push(Arc::new(LogObserver::new(param.general.display_colorful, param.output.elite_save_frequency)));

    if !param.output.folder.is_empty() {
        let prefix = format!("{}_{:?}", utils::timestamp(), algorithm);
        match FileRecorder::create(Path::new(&param.output.folder), &prefix, &param.output, algorithm == Algorithm::bf) {
            Ok(recorder) => observers.push(Arc::new(recorder)),
            Err(e) => warn!("Trace files disabled, cannot write to {}: {}", param.output.folder, e),
        }
    }

    Arc::new(observers)
}
