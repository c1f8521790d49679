use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::hardware::CameraImage;
use crate::individual::UNEVALUATED;
use crate::param::{Algorithm, Param};
use crate::session::StopReason;
use crate::utils;

/// Best genome found for one SLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardResult {
    pub board_id: usize,
    pub genome: Vec<i32>,
}

/// Outcome of one optimization run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run ID, i.e. timestamp and algorithm
    pub id: String,
    /// Timestamp of the run start
    pub timestamp: String,
    /// Crate version and git hash used
    pub version: String,
    pub algorithm: Algorithm,
    pub stop_reason: StopReason,
    /// Completed generations, or optimized bins for a brute-force run
    pub generations: usize,
    /// Frames successfully measured
    pub evaluations: usize,
    /// Normalized fitness of the best individual
    pub best_fitness: f64,
    /// Exposure ratio at the end of the run
    pub exposure_ratio: f64,
    /// Wall time in seconds
    pub execution_time: f64,
    pub boards: Vec<BoardResult>,
    /// Parameters used
    pub parameters: Param,

    /// Camera frame of the best individual, not serialized
    #[serde(skip)]
    pub best_image: Option<CameraImage>,
}

impl RunReport {
    /// Empty report stamped with the current time, filled by the optimizer
    pub fn new(algorithm: Algorithm, param: &Param) -> RunReport {
        let timestamp = utils::timestamp();
        RunReport {
            id: format!("{}_{:?}", timestamp, algorithm),
            timestamp,
            version: version(),
            algorithm,
            stop_reason: StopReason::Success,
            generations: 0,
            evaluations: 0,
            best_fitness: UNEVALUATED,
            exposure_ratio: 1.0,
            execution_time: 0.0,
            boards: Vec::new(),
            parameters: param.clone(),
            best_image: None,
        }
    }

    /// Saves to JSON (the best image is left out)
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        debug!("Run report saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let report: RunReport = serde_json::from_str(&content)?;
        Ok(report)
    }

    /// Multi-line summary for the terminal
    pub fn display(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Run {} ({}), {:?}", self.id, self.version, self.stop_reason);
        let _ = writeln!(
            text,
            "{} generations, {} evaluations in {:.2}s | best fitness {:.3} | exposure x{:.2}",
            self.generations, self.evaluations, self.execution_time, self.best_fitness, self.exposure_ratio
        );
        for board in &self.boards {
            let preview: Vec<String> = board.genome.iter().take(12).map(|g| g.to_string()).collect();
            let ellipsis = if board.genome.len() > 12 { ", ..." } else { "" };
            let _ = writeln!(text, "  board {}: [{}{}]", board.board_id, preview.join(", "), ellipsis);
        }
        text
    }
}

/// Crate version followed by the git hash recorded at build time
pub fn version() -> String {
    format!("{}#{}", env!("CARGO_PKG_VERSION"), option_env!("PHASEOPT_GIT_SHA").unwrap_or("unknown"))
}
