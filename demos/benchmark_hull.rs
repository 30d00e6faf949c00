use std::time::Instant;

use crossbeam_channel::unbounded;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use phase_stability::core::domain::{Composition, Entry, HullParams, ThermoParams};
use phase_stability::engine::evaluator::StabilityEvaluator;
use phase_stability::pipeline::batch::ThermoBuilder;
use phase_stability::pipeline::BatchEvent;
use phase_stability::{build_hull, resolve_references};

const ELEMENTS: [&str; 4] = ["Li", "Fe", "P", "O"];

/// Random entries over the first `n` elements, elemental references at zero.
fn random_system(rng: &mut ChaCha8Rng, n: usize, count: usize) -> Vec<Entry> {
    let mut entries: Vec<Entry> = ELEMENTS[..n]
        .iter()
        .map(|el| {
            let c = Composition::new([(*el, 1.0)]).expect("element");
            Entry::new(c, 0.0).expect("reference").with_id(format!("ref-{}", el))
        })
        .collect();

    for i in 0..count {
        let amounts: Vec<(&str, f64)> = ELEMENTS[..n]
            .iter()
            .map(|el| (*el, rng.gen_range(0..5) as f64))
            .collect();
        let Ok(c) = Composition::new(amounts) else {
            continue;
        };
        let energy = rng.gen_range(-2.0..0.5) * c.num_atoms();
        entries.push(Entry::new(c, energy).expect("finite").with_id(format!("bench-{}", i)));
    }
    entries
}

fn main() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for n in [2, 3, 4] {
        let entries = random_system(&mut rng, n, 400);

        let start = Instant::now();
        let hull = build_hull(&entries, &HullParams::default()).expect("hull");
        let built = start.elapsed();

        let refs = resolve_references(&entries);
        let results = StabilityEvaluator::new(&hull, &refs).evaluate_all();
        let evaluated = start.elapsed();

        let stable = results.iter().filter(|r| matches!(r, Ok(r) if r.is_stable)).count();
        println!(
            "{}-ary: {} entries, {} facets, {} stable | build {:?}, evaluate {:?}",
            n,
            entries.len(),
            hull.facet_count(),
            stable,
            built,
            evaluated - built
        );
    }

    // Full batch over the quaternary cloud, including document synthesis.
    let entries = random_system(&mut rng, 4, 400);
    let (tx, rx) = unbounded();
    let start = Instant::now();
    let report = ThermoBuilder::new(ThermoParams::default()).run(entries, &tx);
    for event in rx.try_iter() {
        if let BatchEvent::SystemFinished(s) = event {
            println!("{}: {} documents in {} ms", s.chemsys, s.documents, s.elapsed_ms);
        }
    }
    println!("Batch took: {:?} ({} documents)", start.elapsed(), report.documents.len());
}
