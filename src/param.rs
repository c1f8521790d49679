use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::BufReader;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum Algorithm {
    /// simple genetic algorithm
    sga,
    /// micro genetic algorithm
    uga,
    /// brute force sweep of every bin
    bf,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::sga => "SGA",
            Algorithm::uga => "uGA",
            Algorithm::bf => "BF",
        };
        write!(f, "{}", name)
    }
}

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub ga: GA,
    #[serde(default)]
    pub stop: Stop,
    #[serde(default)]
    pub camera: Camera,
    #[serde(default)]
    pub bf: BF,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub bench: Bench,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "algorithm_default")]
    pub algo: Algorithm,
    /// Without a seed every random source is seeded from OS entropy
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    #[serde(default = "true_default")]
    pub multithread: bool,
    #[serde(default = "thread_count_default")]
    pub eval_thread_count: usize,
    #[serde(default = "thread_count_default")]
    pub breed_thread_count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GA {
    #[serde(default = "pop_size_default")]
    pub population_size: usize,
    #[serde(default = "elite_size_default")]
    pub elite_size: usize,
    #[serde(default = "accepted_similarity_default")]
    pub accepted_similarity: f64,
    #[serde(default = "mutation_denominator_default")]
    pub mutation_denominator: u32,
    #[serde(default = "false_default")]
    pub skip_elite_reevaluation: bool,
}

/// A generation or duration ceiling <= 0 disables it
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stop {
    #[serde(default = "zero_default")]
    pub target_fitness: f64,
    #[serde(default = "min_seconds_default")]
    pub min_seconds: f64,
    #[serde(default = "zero_default")]
    pub max_seconds: f64,
    #[serde(default = "izero_default")]
    pub min_generations: i64,
    #[serde(default = "max_generations_default")]
    pub max_generations: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Camera {
    #[serde(default = "bins_default")]
    pub bins_x: usize,
    #[serde(default = "bins_default")]
    pub bins_y: usize,
    #[serde(default = "bin_size_default")]
    pub bin_size_x: usize,
    #[serde(default = "bin_size_default")]
    pub bin_size_y: usize,
    #[serde(default = "target_radius_default")]
    pub target_radius: usize,
    /// Raw fitness above which the exposure time is halved
    #[serde(default = "max_fitness_value_default")]
    pub max_fitness_value: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BF {
    /// Step between two phase values tried for a bin
    #[serde(default = "phase_resolution_default")]
    pub phase_resolution: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Output {
    /// No file is written when empty
    #[serde(default = "empty_string")]
    pub folder: String,
    #[serde(default = "true_default")]
    pub save_time_vs_fitness: bool,
    #[serde(default = "true_default")]
    pub save_time_per_generation: bool,
    #[serde(default = "true_default")]
    pub save_exposure_shorten: bool,
    #[serde(default = "true_default")]
    pub save_elite_fitness: bool,
    #[serde(default = "elite_save_frequency_default")]
    pub elite_save_frequency: usize,
    #[serde(default = "true_default")]
    pub save_report: bool,
}

/// Simulated camera + SLM bench used when no real hardware is attached
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Bench {
    #[serde(default = "board_count_default")]
    pub board_count: usize,
    #[serde(default = "slm_size_default")]
    pub slm_width: usize,
    #[serde(default = "slm_size_default")]
    pub slm_height: usize,
    #[serde(default = "camera_size_default")]
    pub camera_width: usize,
    #[serde(default = "camera_size_default")]
    pub camera_height: usize,
    #[serde(default = "peak_intensity_default")]
    pub peak_intensity: f64,
    #[serde(default = "initial_exposure_default")]
    pub initial_exposure: f64,
    /// Every n-th acquisition fails (0 never fails)
    #[serde(default = "uzero_default")]
    pub acquisition_failure_every: usize,
}

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for GA {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Stop {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Camera {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for BF {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Output {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Bench {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of genes of an individual: one per used bin
    pub fn genome_length(&self) -> usize {
        self.camera.bins_x * self.camera.bins_y
    }
}

pub fn get(param_file: String) -> Result<Param, Box<dyn Error>> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<(), String> {
    if !param.general.log_base.is_empty() {
        param.general.display_colorful = false;
    }

    if param.camera.bins_x == 0 || param.camera.bins_y == 0 {
        return Err(format!("Invalid bin grid {}x{}. Both axes need at least one bin.", param.camera.bins_x, param.camera.bins_y));
    }

    if param.camera.bin_size_x == 0 || param.camera.bin_size_y == 0 {
        return Err(format!("Invalid bin size {}x{}. Must be >= 1 pixel.", param.camera.bin_size_x, param.camera.bin_size_y));
    }

    if param.general.eval_thread_count == 0 || param.general.breed_thread_count == 0 {
        return Err("Thread counts must be >= 1.".to_string());
    }

    if param.ga.population_size == 0 {
        return Err("Invalid population_size=0.".to_string());
    }

    if param.ga.mutation_denominator == 0 {
        return Err("Invalid mutation_denominator=0. Use a large value to make mutation rare.".to_string());
    }

    if param.bf.phase_resolution == 0 {
        return Err("Invalid phase_resolution=0. Must be >= 1.".to_string());
    }

    if param.general.algo == Algorithm::sga && param.ga.elite_size > param.ga.population_size {
        warn!(
            "elite_size={} exceeds population_size={}: no child will be bred",
            param.ga.elite_size, param.ga.population_size
        );
    }

    if param.ga.accepted_similarity <= 0.0 || param.ga.accepted_similarity >= 1.0 {
        warn!("accepted_similarity={} is outside (0,1): stagnation detection will misbehave", param.ga.accepted_similarity);
    }

    if param.general.algo != Algorithm::bf && param.stop.max_generations <= 0 && param.stop.max_seconds <= 0.0 {
        warn!("No generation nor duration ceiling: the run only stops on target fitness or signal");
    }

    Ok(())
}

// Default value definitions

fn algorithm_default() -> Algorithm {
    Algorithm::sga
}
fn empty_string() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn true_default() -> bool {
    true
}
fn false_default() -> bool {
    false
}
fn thread_count_default() -> usize {
    4
}
fn pop_size_default() -> usize {
    30
}
fn elite_size_default() -> usize {
    5
}
fn accepted_similarity_default() -> f64 {
    0.9
}
fn mutation_denominator_default() -> u32 {
    200
}
fn zero_default() -> f64 {
    0.0
}
fn izero_default() -> i64 {
    0
}
fn uzero_default() -> usize {
    0
}
fn min_seconds_default() -> f64 {
    60.0
}
fn max_generations_default() -> i64 {
    3000
}
fn bins_default() -> usize {
    16
}
fn bin_size_default() -> usize {
    32
}
fn target_radius_default() -> usize {
    5
}
fn max_fitness_value_default() -> f64 {
    200.0
}
fn phase_resolution_default() -> u32 {
    32
}
fn elite_save_frequency_default() -> usize {
    10
}
fn board_count_default() -> usize {
    1
}
fn slm_size_default() -> usize {
    512
}
fn camera_size_default() -> usize {
    64
}
fn peak_intensity_default() -> f64 {
    180.0
}
fn initial_exposure_default() -> f64 {
    2000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let param = Param::new();
        assert_eq!(param.general.algo, Algorithm::sga);
        assert_eq!(param.general.seed, None, "runs should be entropy seeded by default");
        assert_eq!(param.ga.population_size, 30);
        assert_eq!(param.ga.elite_size, 5);
        assert_eq!(param.ga.accepted_similarity, 0.9);
        assert_eq!(param.ga.mutation_denominator, 200);
        assert_eq!(param.stop.max_generations, 3000);
        assert_eq!(param.stop.min_seconds, 60.0);
        assert_eq!(param.camera.max_fitness_value, 200.0);
        assert_eq!(param.camera.target_radius, 5);
        assert_eq!(param.genome_length(), 256);
    }

    #[test]
    fn test_get_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "general:\n  algo: uga\n  seed: 42\nga:\n  skip_elite_reevaluation: true\ncamera:\n  bins_x: 4\n  bins_y: 2"
        )
        .expect("write yaml");

        let param = get(file.path().to_string_lossy().to_string()).expect("yaml should load");
        assert_eq!(param.general.algo, Algorithm::uga);
        assert_eq!(param.general.seed, Some(42));
        assert!(param.ga.skip_elite_reevaluation);
        assert_eq!(param.genome_length(), 8);
        assert_eq!(param.ga.population_size, 30, "missing fields should take their default");
        assert_eq!(param.output, Output::default(), "missing sections should take their default");
    }

    #[test]
    fn test_get_missing_file() {
        assert!(get("/nonexistent/param.yaml".to_string()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut param = Param::new();
        param.camera.bin_size_x = 0;
        assert!(validate(&mut param).is_err(), "a zero bin size should be rejected");

        let mut param = Param::new();
        param.camera.bins_y = 0;
        assert!(validate(&mut param).is_err(), "a zero bin count should be rejected");

        let mut param = Param::new();
        param.general.breed_thread_count = 0;
        assert!(validate(&mut param).is_err(), "a zero thread count should be rejected");

        let mut param = Param::new();
        param.bf.phase_resolution = 0;
        assert!(validate(&mut param).is_err());
    }

    #[test]
    fn test_validate_accepts_suspicious_values_with_warning() {
        let mut param = Param::new();
        param.ga.elite_size = 50;
        param.ga.accepted_similarity = 1.5;
        assert!(validate(&mut param).is_ok(), "elite > population and odd similarity are only warnings");
    }

    #[test]
    fn test_validate_log_file_disables_colors() {
        let mut param = Param::new();
        param.general.log_base = "run".to_string();
        validate(&mut param).expect("valid param");
        assert!(!param.general.display_colorful);
    }
}
