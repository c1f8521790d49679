use log::{debug, warn};
use std::sync::Arc;

use crate::individual::Individual;
use crate::population::{Population, Strategy};
use crate::random::RandomSource;

/// Resolution of the roulette draw in `[0, fitness_sum)`
const SELECTION_RESOLUTION: u32 = i32::MAX as u32;

/// Parent ranks (after ascending sort) bred by the micro GA for slots 0 to 3
const MICRO_PAIRS: [(usize, usize); 4] = [(4, 3), (4, 2), (3, 2), (3, 2)];

/// Fitness-proportionate selection over individuals sorted by ascending fitness.
///
/// Draws `x` in `[0, fitness_sum)` and scans the cumulative fitness from the worst
/// individual; the scan stops on the last one when the sum never reaches `x`.
pub fn roulette_select(individuals: &[Individual], fitness_sum: f64, rng: &mut dyn RandomSource) -> usize {
    if individuals.is_empty() {
        return 0;
    }
    let draw = rng.next_below(SELECTION_RESOLUTION) as f64 / SELECTION_RESOLUTION as f64;
    let selected = if fitness_sum.is_finite() && fitness_sum > 0.0 { draw * fitness_sum } else { 0.0 };

    let mut index = 0;
    let mut cumulative = individuals[0].fitness();
    while cumulative < selected && index + 1 < individuals.len() {
        index += 1;
        cumulative += individuals[index].fitness();
    }
    index
}

impl Population {
    /// Simple GA step: roulette-bred children fill the non-elite slots, the best
    /// `elite_size` individuals are carried over as deep copies in the last slots.
    ///
    /// When every child came from near-identical parents the population is considered
    /// stagnant and its lowest half is re-seeded with random genomes (elites excluded).
    pub(crate) fn simple_next_generation(&mut self) {
        let population_size = self.individuals.len();
        if population_size == 0 {
            return;
        }

        Population::sort_individuals(&mut self.individuals);
        let fitness_sum: f64 = self.individuals.iter().map(|ind| ind.fitness()).sum();
        let elite_size = self.elite_size().min(population_size);
        let child_count = population_size - elite_size;

        let parents = Arc::new(std::mem::take(&mut self.individuals));
        let rules = self.rules();
        let children = {
            let parents = Arc::clone(&parents);
            self.fan_out(child_count, move |_, rng| {
                let a = roulette_select(&parents, fitness_sum, rng);
                let b = roulette_select(&parents, fitness_sum, rng);
                let mut same = true;
                let genome = rules.crossover(parents[a].genome(), parents[b].genome(), &mut same, true, rng);
                (Individual::new(genome), same)
            })
        };

        let stagnant = child_count > 0 && children.iter().all(|(_, same)| *same);

        let mut next_individuals = Vec::with_capacity(population_size);
        next_individuals.extend(children.into_iter().map(|(child, _)| child));
        for elite in &parents[child_count..] {
            let mut copy = Individual::new(Vec::new());
            Population::deep_copy_individual(&mut copy, elite);
            next_individuals.push(copy);
        }
        self.individuals = next_individuals;

        if stagnant {
            let reseed_count = (population_size / 2).min(child_count);
            debug!("Population converged, re-seeding {} individuals", reseed_count);
            self.reseed(reseed_count);
        }
    }

    /// Micro GA step on 5 ranked individuals: four children bred without mutation
    /// from fixed rank pairs, the best individual kept as slot 4.
    ///
    /// If the four children all came from near-identical parents they are replaced by
    /// random genomes; the elite slot is never touched.
    pub(crate) fn micro_next_generation(&mut self) {
        if self.individuals.len() != Strategy::MICRO_POPULATION_SIZE {
            warn!("Micro GA needs {} individuals, got {}: generation skipped", Strategy::MICRO_POPULATION_SIZE, self.individuals.len());
            return;
        }

        Population::sort_individuals(&mut self.individuals);
        let parents = Arc::new(std::mem::take(&mut self.individuals));
        let rules = self.rules();
        let slots = {
            let parents = Arc::clone(&parents);
            self.fan_out(Strategy::MICRO_POPULATION_SIZE, move |slot, rng| match MICRO_PAIRS.get(slot) {
                Some(&(a, b)) => {
                    let mut same = true;
                    let genome = rules.crossover(parents[a].genome(), parents[b].genome(), &mut same, false, rng);
                    (Individual::new(genome), same)
                }
                None => {
                    let mut elite = Individual::new(Vec::new());
                    Population::deep_copy_individual(&mut elite, &parents[slot]);
                    (elite, true)
                }
            })
        };

        let stagnant = slots[..MICRO_PAIRS.len()].iter().all(|(_, same)| *same);
        self.individuals = slots.into_iter().map(|(individual, _)| individual).collect();

        if stagnant {
            debug!("Micro population converged, re-seeding {} individuals", MICRO_PAIRS.len());
            self.reseed(MICRO_PAIRS.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::UNEVALUATED;
    use crate::population::BreedingRules;
    use crate::random::{ConstantSource, EntropySource};
    use crate::thread_pool::ThreadPool;

    fn constant_sources(count: usize) -> Vec<Box<dyn RandomSource>> {
        (0..count).map(|_| Box::new(ConstantSource::new(1)) as Box<dyn RandomSource>).collect()
    }

    fn rules(genome_length: usize) -> BreedingRules {
        BreedingRules { genome_length, accepted_similarity: 0.9, mutation_denominator: 200 }
    }

    /// Population whose individual i has genome [10*(i+1); len] and fitness `fitness[i]`
    fn seeded_population(strategy: Strategy, fitness: &[f64], elite_size: usize, rngs: Vec<Box<dyn RandomSource>>, pool: Option<Arc<ThreadPool>>) -> Population {
        let mut pop = Population::new(strategy, rules(4), fitness.len(), elite_size, rngs, pool);
        for (i, &f) in fitness.iter().enumerate() {
            pop.individuals[i].set_genome(vec![10 * (i as i32 + 1); 4]);
            pop.set_fitness(i, f);
        }
        pop
    }

    #[test]
    fn test_roulette_select_with_constant_source_picks_worst() {
        let individuals: Vec<Individual> = [1.0, 2.0, 3.0]
            .iter()
            .map(|&f| {
                let mut ind = Individual::new(vec![0]);
                ind.set_fitness(f);
                ind
            })
            .collect();
        assert_eq!(roulette_select(&individuals, 6.0, &mut ConstantSource::new(1)), 0);
    }

    #[test]
    fn test_roulette_select_stops_on_last_individual() {
        let individuals: Vec<Individual> = (0..4).map(|_| Individual::new(vec![0])).collect();
        // every fitness is -1, the cumulative sum never reaches the draw
        let index = roulette_select(&individuals, 1.0, &mut ConstantSource::new(u32::MAX));
        assert_eq!(index, 3);
        assert_eq!(roulette_select(&[], 1.0, &mut ConstantSource::new(1)), 0);
    }

    #[test]
    fn test_roulette_select_favors_fit_individuals() {
        let individuals: Vec<Individual> = [1.0, 1.0, 98.0]
            .iter()
            .map(|&f| {
                let mut ind = Individual::new(vec![0]);
                ind.set_fitness(f);
                ind
            })
            .collect();
        let mut rng = EntropySource::seeded(5, 0);
        let best_picks = (0..1000).filter(|_| roulette_select(&individuals, 100.0, &mut rng) == 2).count();
        assert!(best_picks > 900, "the dominant individual should win most draws, got {}", best_picks);
    }

    #[test]
    fn test_simple_generation_with_constant_source() {
        // pop 6, elite 2, genome length 4, fitness given in shuffled order
        let fitness = [3.0, 6.0, 1.0, 5.0, 2.0, 4.0];
        let mut pop = seeded_population(Strategy::Simple, &fitness, 2, constant_sources(1), None);
        let worst_genome = vec![30, 30, 30, 30];

        pop.next_generation();

        assert_eq!(pop.len(), 6);
        for slot in 0..3 {
            assert_eq!(pop.genome(slot), &[1, 1, 1, 1], "slot {} should be re-seeded from the constant source", slot);
            assert_eq!(pop.fitness(slot), UNEVALUATED);
        }
        assert_eq!(pop.genome(3), &worst_genome[..], "the remaining child should copy its first (worst) parent");
        assert_eq!(pop.fitness(3), UNEVALUATED, "a child has not been measured yet");
        assert_eq!(pop.genome(4), &[40, 40, 40, 40], "second best should be kept as elite");
        assert_eq!(pop.fitness(4), 5.0);
        assert_eq!(pop.genome(5), &[20, 20, 20, 20], "best individual should sit in the last slot");
        assert_eq!(pop.fitness(5), 6.0);
    }

    #[test]
    fn test_simple_generation_parallel_matches_serial() {
        let fitness = [3.0, 6.0, 1.0, 5.0, 2.0, 4.0, 7.0, 0.5, 9.0, 8.0];
        let mut serial = seeded_population(Strategy::Simple, &fitness, 3, constant_sources(1), None);
        let pool = Arc::new(ThreadPool::new(4));
        let mut parallel = seeded_population(Strategy::Simple, &fitness, 3, constant_sources(4), Some(pool));

        serial.next_generation();
        parallel.next_generation();

        for i in 0..fitness.len() {
            assert_eq!(serial.genome(i), parallel.genome(i), "slot {} differs between serial and parallel breeding", i);
            assert_eq!(serial.fitness(i).to_bits(), parallel.fitness(i).to_bits());
        }
    }

    #[test]
    fn test_simple_generation_keeps_elites_and_length() {
        let mut rng_pop = Population::new(
            Strategy::Simple,
            rules(16),
            30,
            5,
            vec![Box::new(EntropySource::seeded(9, 0))],
            None,
        );
        for i in 0..30 {
            rng_pop.set_fitness(i, i as f64);
        }
        let best: Vec<Vec<i32>> = (25..30).map(|i| rng_pop.genome(i).to_vec()).collect();

        rng_pop.next_generation();

        for (k, i) in (25..30).enumerate() {
            assert_eq!(rng_pop.genome(i), &best[k][..], "elite {} should survive unchanged", i);
            assert_eq!(rng_pop.fitness(i), i as f64, "elite fitness should be carried over");
        }
        for ind in &rng_pop.individuals {
            assert_eq!(ind.genome().len(), 16);
        }
    }

    #[test]
    fn test_simple_generation_reseed_never_reaches_elites() {
        // pop 6, elite 4: half the population (3) exceeds the 2 bred children
        let fitness = [3.0, 6.0, 1.0, 5.0, 2.0, 4.0];
        let mut pop = seeded_population(Strategy::Simple, &fitness, 4, constant_sources(1), None);

        pop.next_generation();

        for slot in 0..2 {
            assert_eq!(pop.genome(slot), &[1, 1, 1, 1], "child slot {} should be re-seeded", slot);
            assert_eq!(pop.fitness(slot), UNEVALUATED);
        }
        let elites = [([10, 10, 10, 10], 3.0), ([60, 60, 60, 60], 4.0), ([40, 40, 40, 40], 5.0), ([20, 20, 20, 20], 6.0)];
        for (k, (genome, f)) in elites.iter().enumerate() {
            assert_eq!(pop.genome(2 + k), &genome[..], "elite slot {} should keep its genome", 2 + k);
            assert_eq!(pop.fitness(2 + k), *f, "elite slot {} should keep its fitness", 2 + k);
        }
    }

    #[test]
    fn test_simple_generation_with_all_elites_breeds_nothing() {
        let fitness = [1.0, 2.0, 3.0];
        let mut pop = seeded_population(Strategy::Simple, &fitness, 5, constant_sources(1), None);
        pop.next_generation();
        assert_eq!(pop.genome(0), &[10, 10, 10, 10], "no child bred means no re-seeding either");
        assert_eq!(pop.genome(2), &[30, 30, 30, 30]);
    }

    #[test]
    fn test_micro_generation_keeps_elite() {
        let fitness = [4.0, 1.0, 5.0, 2.0, 3.0];
        let mut pop = seeded_population(Strategy::Micro, &fitness, 1, vec![Box::new(EntropySource::seeded(1, 0))], None);
        let elite_ptr = pop.individuals[2].genome().as_ptr();

        pop.next_generation();

        assert_eq!(pop.genome(4), &[30, 30, 30, 30], "slot 4 should hold the best individual");
        assert_eq!(pop.fitness(4), 5.0);
        assert_ne!(pop.genome(4).as_ptr(), elite_ptr, "the elite should be a deep copy");
    }

    #[test]
    fn test_micro_generation_pairs_by_rank() {
        // genomes differ everywhere so no re-seeding happens
        let fitness = [4.0, 1.0, 5.0, 2.0, 3.0];
        let mut pop = seeded_population(Strategy::Micro, &fitness, 1, constant_sources(1), None);

        pop.next_generation();

        // ranks after sort: r4=[30], r3=[10], r2=[50]; constant draws keep the first parent
        assert_eq!(pop.genome(0), &[30, 30, 30, 30], "c0 = X(r4, r3)");
        assert_eq!(pop.genome(1), &[30, 30, 30, 30], "c1 = X(r4, r2)");
        assert_eq!(pop.genome(2), &[10, 10, 10, 10], "c2 = X(r3, r2)");
        assert_eq!(pop.genome(3), &[10, 10, 10, 10], "c3 = X(r3, r2)");
        for slot in 0..4 {
            assert_eq!(pop.fitness(slot), UNEVALUATED);
        }
    }

    #[test]
    fn test_micro_generation_reseeds_converged_children() {
        let mut pop = Population::new(Strategy::Micro, rules(4), 5, 1, constant_sources(2), Some(Arc::new(ThreadPool::new(2))));
        for i in 0..5 {
            pop.individuals[i].set_genome(vec![7, 7, 7, 7]);
            pop.set_fitness(i, i as f64);
        }

        pop.next_generation();

        for slot in 0..4 {
            assert_eq!(pop.genome(slot), &[1, 1, 1, 1], "converged child {} should be re-seeded", slot);
        }
        assert_eq!(pop.genome(4), &[7, 7, 7, 7], "the elite is never re-seeded");
        assert_eq!(pop.fitness(4), 4.0);
    }
}
