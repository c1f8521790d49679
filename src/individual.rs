use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Fitness of an individual that has not been measured yet
pub const UNEVALUATED: f64 = -1.0;

/// One candidate solution: a genome (one gene per image bin) and its measured fitness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub genome: Vec<i32>,
    pub fitness: f64,
}

impl Individual {
    pub fn new(genome: Vec<i32>) -> Individual {
        Individual { genome, fitness: UNEVALUATED }
    }

    pub fn genome(&self) -> &[i32] {
        &self.genome
    }

    /// Replaces the genome wholesale, the previous buffer is dropped
    pub fn set_genome(&mut self, genome: Vec<i32>) {
        self.genome = genome;
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness != UNEVALUATED
    }

    /// Ascending order by fitness (NaN sorts as equal)
    pub fn compare(&self, other: &Individual) -> Ordering {
        self.fitness.partial_cmp(&other.fitness).unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Individual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: Vec<String> = self.genome.iter().take(8).map(|g| g.to_string()).collect();
        let ellipsis = if self.genome.len() > 8 { ", ..." } else { "" };
        write!(f, "fitness {:.3} [{}{}]", self.fitness, preview.join(", "), ellipsis)
    }
}
