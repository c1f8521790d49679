use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle, WriteMode};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use phaseopt::bench::SimulatedBench;
use phaseopt::cinfo;
use phaseopt::param::{self, Param};

fn start_logger(param: &Param) -> Result<LoggerHandle, Box<dyn Error>> {
    let logger = Logger::try_with_env_or_str(&param.general.log_level)?;
    let handle = if param.general.log_base.is_empty() {
        logger.start()?
    } else {
        logger
            .log_to_file(FileSpec::default().basename(&param.general.log_base).suffix(&param.general.log_suffix))
            .duplicate_to_stderr(Duplicate::Info)
            .write_mode(WriteMode::BufferAndFlush)
            .start()?
    };
    Ok(handle)
}

/// Clears `running` on the first SIGINT or SIGTERM so the optimizer stops after the current step
fn watch_signals(running: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            warn!("Signal {} received, stopping after the current step", signal);
            running.store(false, Ordering::Relaxed);
        }
    });
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let param_path = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());
    let param = param::get(param_path.clone())?;
    let _logger = start_logger(&param)?;
    info!("Parameters loaded from {}", param_path);

    let running = Arc::new(AtomicBool::new(true));
    watch_signals(Arc::clone(&running))?;

    let bench = SimulatedBench::from_param(&param.bench);
    match phaseopt::run(&param, bench, running) {
        Ok(report) => {
            cinfo!(param.general.display_colorful, "{}", report.display());
            Ok(())
        }
        Err(e) => {
            error!("Optimization failed: {}", e);
            std::process::exit(1);
        }
    }
}
