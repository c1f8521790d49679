use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{mpsc, Arc};

use crate::individual::Individual;
use crate::random::{EntropySource, RandomSource};
use crate::thread_pool::ThreadPool;
use crate::utils::partition_range;

/// Exclusive upper bound of a gene value (one byte of phase)
pub const GENE_VALUE_CAP: u32 = 256;

/// Breeding strategy of a population, chosen once at construction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Roulette selection over a free-sized population with an elite tail
    Simple,
    /// Five individuals, one elite, rank-based pairing without mutation
    Micro,
}

impl Strategy {
    pub const MICRO_POPULATION_SIZE: usize = 5;
    pub const MICRO_ELITE_SIZE: usize = 1;
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Simple => write!(f, "simple GA"),
            Strategy::Micro => write!(f, "micro GA"),
        }
    }
}

/// Genome-level constants shared by every breeding job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BreedingRules {
    pub genome_length: usize,
    /// Fraction of identical genes above which two parents are considered converged
    pub accepted_similarity: f64,
    /// A gene mutates with probability 1/mutation_denominator
    pub mutation_denominator: u32,
}

impl BreedingRules {
    /// Uniform crossover of two parent genomes.
    ///
    /// Each gene comes from `a` or `b` with equal probability and, when `use_mutation`
    /// is set, is replaced by a fresh random value with probability
    /// `1/mutation_denominator`.
    ///
    /// # Arguments
    ///
    /// * `a` - First parent genome.
    /// * `b` - Second parent genome.
    /// * `same` - Set to false when the fraction of genes shared by `a` and `b` is below
    ///   `accepted_similarity`, left untouched otherwise.
    /// * `use_mutation` - Enables random gene replacement.
    /// * `rng` - Random source of the calling thread.
    ///
    /// # Returns
    ///
    /// A freshly allocated child genome.
    pub fn crossover(&self, a: &[i32], b: &[i32], same: &mut bool, use_mutation: bool, rng: &mut dyn RandomSource) -> Vec<i32> {
        let mut matches = 0usize;
        let child: Vec<i32> = a
            .iter()
            .zip(b.iter())
            .take(self.genome_length)
            .map(|(&gene_a, &gene_b)| {
                if gene_a == gene_b {
                    matches += 1;
                }
                let mut gene = if rng.next_below(100) < 50 { gene_a } else { gene_b };
                if use_mutation && rng.next_below(self.mutation_denominator) == 0 {
                    gene = rng.next_below(GENE_VALUE_CAP) as i32;
                }
                gene
            })
            .collect();

        if !child.is_empty() && (matches as f64 / child.len() as f64) < self.accepted_similarity {
            *same = false;
        }
        child
    }

    pub fn random_genome(&self, rng: &mut dyn RandomSource) -> Vec<i32> {
        (0..self.genome_length).map(|_| rng.next_below(GENE_VALUE_CAP) as i32).collect()
    }
}

/// Fixed-size set of individuals evolving under one [`Strategy`].
///
/// Individuals are addressed by index and are only reordered inside
/// `next_generation`, after which the last index holds the best elite.
pub struct Population {
    pub individuals: Vec<Individual>,
    strategy: Strategy,
    rules: BreedingRules,
    elite_size: usize,
    rngs: Vec<Box<dyn RandomSource>>,
    pool: Option<Arc<ThreadPool>>,
}

impl Population {
    /// Builds a population of random individuals.
    ///
    /// # Arguments
    ///
    /// * `strategy` - Breeding strategy. The micro GA always uses 5 individuals and 1 elite.
    /// * `rules` - Genome length, similarity threshold and mutation rate.
    /// * `population_size` - Number of individuals (simple GA only).
    /// * `elite_size` - Number of best individuals carried over unchanged (simple GA only).
    /// * `rngs` - One random source per breeding thread. Without a pool only the first is used.
    /// * `pool` - Shared worker pool; `None` breeds serially.
    pub fn new(
        strategy: Strategy,
        rules: BreedingRules,
        population_size: usize,
        elite_size: usize,
        mut rngs: Vec<Box<dyn RandomSource>>,
        pool: Option<Arc<ThreadPool>>,
    ) -> Population {
        let (population_size, elite_size) = match strategy {
            Strategy::Simple => (population_size, elite_size),
            Strategy::Micro => {
                if population_size != Strategy::MICRO_POPULATION_SIZE || elite_size != Strategy::MICRO_ELITE_SIZE {
                    warn!(
                        "Micro GA runs with {} individuals and {} elite, ignoring configured {}/{}",
                        Strategy::MICRO_POPULATION_SIZE,
                        Strategy::MICRO_ELITE_SIZE,
                        population_size,
                        elite_size
                    );
                }
                (Strategy::MICRO_POPULATION_SIZE, Strategy::MICRO_ELITE_SIZE)
            }
        };

        if elite_size > population_size {
            warn!("Elite size {} exceeds population size {}: every individual is kept as elite", elite_size, population_size);
        }
        if rules.accepted_similarity <= 0.0 || rules.accepted_similarity >= 1.0 {
            warn!("Accepted similarity {} is outside (0,1)", rules.accepted_similarity);
        }
        if rngs.is_empty() {
            rngs.push(Box::new(EntropySource::new()));
        }
        if pool.is_none() && rngs.len() > 1 {
            debug!("No thread pool given: breeding serially with the first random source");
            rngs.truncate(1);
        }

        let individuals = (0..population_size)
            .map(|_| Individual::new(rules.random_genome(rngs[0].as_mut())))
            .collect();

        Population { individuals, strategy, rules, elite_size, rngs, pool }
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn rules(&self) -> BreedingRules {
        self.rules
    }

    pub fn elite_size(&self) -> usize {
        self.elite_size
    }

    pub fn genome(&self, i: usize) -> &[i32] {
        self.individuals[i].genome()
    }

    pub fn fitness(&self, i: usize) -> f64 {
        self.individuals[i].fitness()
    }

    pub fn set_fitness(&mut self, i: usize, fitness: f64) {
        self.individuals[i].set_fitness(fitness);
    }

    /// Index of the best elite once `next_generation` has run
    pub fn elite_index(&self) -> usize {
        self.individuals.len().saturating_sub(1)
    }

    /// Crossover with this population's rules (see [`BreedingRules::crossover`])
    pub fn crossover(&self, a: &[i32], b: &[i32], same: &mut bool, use_mutation: bool, rng: &mut dyn RandomSource) -> Vec<i32> {
        self.rules.crossover(a, b, same, use_mutation, rng)
    }

    /// Ascending selection sort by fitness; individuals are swapped, never copied
    pub fn sort_individuals(individuals: &mut [Individual]) {
        for i in 0..individuals.len() {
            let mut lowest = i;
            for j in i + 1..individuals.len() {
                if individuals[j].fitness() < individuals[lowest].fitness() {
                    lowest = j;
                }
            }
            if lowest != i {
                individuals.swap(i, lowest);
            }
        }
    }

    /// Gives `to` its own copy of `from`'s genome and fitness
    pub fn deep_copy_individual(to: &mut Individual, from: &Individual) {
        to.set_genome(from.genome().to_vec());
        to.set_fitness(from.fitness());
    }

    /// Advances the population by one generation according to its strategy
    pub fn next_generation(&mut self) {
        match self.strategy {
            Strategy::Simple => self.simple_next_generation(),
            Strategy::Micro => self.micro_next_generation(),
        }
    }

    /// Replaces the genomes of the first `count` individuals with random ones
    pub(crate) fn reseed(&mut self, count: usize) {
        let rules = self.rules;
        let genomes = self.fan_out(count, move |_, rng| rules.random_genome(rng));
        for (individual, genome) in self.individuals.iter_mut().zip(genomes) {
            individual.set_genome(genome);
        }
    }

    /// Runs `work(task, rng)` for every task of `0..task_count` and returns the results
    /// in task order.
    ///
    /// With a pool, tasks are split in contiguous ranges, one per random source; each job
    /// owns its source while running and hands it back with its results.
    pub(crate) fn fan_out<T, F>(&mut self, task_count: usize, work: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(usize, &mut dyn RandomSource) -> T + Send + Sync + 'static,
    {
        let pool = match &self.pool {
            Some(pool) if self.rngs.len() > 1 && task_count > 1 => Arc::clone(pool),
            _ => {
                let rng = self.rngs[0].as_mut();
                return (0..task_count).map(|task| work(task, &mut *rng)).collect();
            }
        };

        let work = Arc::new(work);
        let thread_count = self.rngs.len();
        let (tx, rx) = mpsc::channel();
        for (thread_id, mut rng) in self.rngs.drain(..).enumerate() {
            let range = partition_range(task_count, thread_count, thread_id);
            let work = Arc::clone(&work);
            let tx = tx.clone();
            pool.push_job(move || {
                let results: Vec<T> = range.map(|task| work(task, rng.as_mut())).collect();
                let _ = tx.send((thread_id, results, rng));
            });
        }
        drop(tx);
        pool.wait();

        let mut batches: Vec<(usize, Vec<T>, Box<dyn RandomSource>)> = rx.iter().collect();
        batches.sort_by_key(|(thread_id, _, _)| *thread_id);

        let mut results = Vec::with_capacity(task_count);
        for (_, batch, rng) in batches {
            self.rngs.push(rng);
            results.extend(batch);
        }
        if self.rngs.is_empty() {
            self.rngs.push(Box::new(EntropySource::new()));
        }
        results
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("strategy", &self.strategy)
            .field("rules", &self.rules)
            .field("elite_size", &self.elite_size)
            .field("threads", &self.rngs.len())
            .field("individuals", &self.individuals)
            .finish()
    }
}
