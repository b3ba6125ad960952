//! Longest-processing-time-first batch assignment.
//!
//! Groups are placed longest first, each onto whichever batch currently has
//! the smallest total duration (lowest batch number on ties). A group is never
//! moved once placed. The resulting makespan is within
//! `4/3 - 1/(3 * batches)` of the optimum.
//!
//! Batch loads live in a min-heap keyed by `(total, index)`, so each
//! placement costs `O(log batches)` and ties resolve exactly as a linear scan
//! for the first least-loaded batch would.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tracing::debug;

use super::{BatchCount, TestBatch};
use crate::grouping::{AtomicGroup, sort_for_assignment};

/// Assigns every group to one of `count` batches.
///
/// Always returns exactly `count` batches numbered `1..=count`; batches that
/// receive no group are returned empty.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use testbatch::batch::{BatchCount, assign_batches};
/// use testbatch::grouping::build_atomic_groups;
/// use testbatch::report::TestResult;
///
/// let groups = build_atomic_groups(vec![
///     TestResult::new("com.example.SomeClass", "a", Duration::from_secs(1)),
///     TestResult::new("com.example.SomeClass", "b", Duration::from_secs(1)),
///     TestResult::new("com.example.AnotherClass", "c", Duration::from_secs(1)),
/// ]);
///
/// let batches = assign_batches(BatchCount::new(2).unwrap(), groups);
/// assert_eq!(batches[0].len(), 2);
/// assert_eq!(batches[1].len(), 1);
/// ```
pub fn assign_batches(count: BatchCount, mut groups: Vec<AtomicGroup>) -> Vec<TestBatch> {
    sort_for_assignment(&mut groups);

    let mut batches: Vec<TestBatch> = (1..=count.get()).map(TestBatch::new).collect();
    let mut loads: BinaryHeap<Reverse<(Duration, usize)>> = (0..count.get())
        .map(|index| Reverse((Duration::ZERO, index)))
        .collect();

    for group in groups {
        // The heap holds one entry per batch and count is non-zero.
        let Some(mut least) = loads.peek_mut() else {
            break;
        };
        let Reverse((load, index)) = &mut *least;
        *load = load.saturating_add(group.total_duration);

        debug!(
            "Assigning {} ({} tests, {:?}) to batch {}",
            group.key,
            group.len(),
            group.total_duration,
            *index + 1
        );
        batches[*index].add_group(group);
    }

    batches
}

/// The largest batch total.
pub fn makespan(batches: &[TestBatch]) -> Duration {
    batches
        .iter()
        .map(|b| b.total_duration)
        .max()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::build_atomic_groups;
    use crate::report::TestResult;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{BTreeMap, BTreeSet};

    fn count(n: i64) -> BatchCount {
        BatchCount::new(n).unwrap()
    }

    fn group(key: &str, millis: u64) -> AtomicGroup {
        AtomicGroup::new(
            key,
            vec![TestResult::new(key, "test", Duration::from_millis(millis))],
        )
    }

    fn batch_classes(batch: &TestBatch) -> BTreeSet<&str> {
        batch.tests.iter().map(|t| t.classname.as_str()).collect()
    }

    #[test]
    fn test_same_class_in_same_batch() {
        let groups = build_atomic_groups(vec![
            TestResult::new("com.example.SomeClass", "a", Duration::from_secs(1)),
            TestResult::new("com.example.SomeClass", "b", Duration::from_secs(1)),
            TestResult::new("com.example.AnotherClass", "c", Duration::from_secs(1)),
        ]);

        let batches = assign_batches(count(2), groups);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].number, 1);
        assert_eq!(batches[1].number, 2);
        assert_eq!(batch_classes(&batches[0]), BTreeSet::from(["com.example.SomeClass"]));
        assert_eq!(batches[0].total_duration, Duration::from_secs(2));
        assert_eq!(
            batch_classes(&batches[1]),
            BTreeSet::from(["com.example.AnotherClass"])
        );
        assert_eq!(batches[1].total_duration, Duration::from_secs(1));
    }

    #[test]
    fn test_empty_input_gives_empty_batches() {
        let batches = assign_batches(count(4), Vec::new());
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(TestBatch::is_empty));
        assert_eq!(
            batches.iter().map(|b| b.number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn test_fewer_groups_than_batches() {
        let batches = assign_batches(count(5), vec![group("pkg.A", 10), group("pkg.B", 20)]);
        assert_eq!(batches.len(), 5);
        assert_eq!(batch_classes(&batches[0]), BTreeSet::from(["pkg.B"]));
        assert_eq!(batch_classes(&batches[1]), BTreeSet::from(["pkg.A"]));
        assert!(batches[2..].iter().all(TestBatch::is_empty));
    }

    #[test]
    fn test_equal_groups_split_evenly() {
        let groups = (0..10).map(|i| group(&format!("pkg.Class{i}"), 1000)).collect();
        let batches = assign_batches(count(2), groups);

        for batch in &batches {
            assert_eq!(batch.len(), 5);
            assert_eq!(batch.total_duration, Duration::from_secs(5));
        }
    }

    #[test]
    fn test_huge_group_is_not_split_or_rebalanced() {
        let mut groups = vec![group("pkg.Huge", 100_000)];
        groups.extend((0..9).map(|i| group(&format!("pkg.Small{i}"), 1000)));

        let batches = assign_batches(count(2), groups);

        assert_eq!(batch_classes(&batches[0]), BTreeSet::from(["pkg.Huge"]));
        assert_eq!(batches[0].total_duration, Duration::from_secs(100));
        assert_eq!(batches[1].len(), 9);
        assert_eq!(batches[1].total_duration, Duration::from_secs(9));
        assert_eq!(makespan(&batches), Duration::from_secs(100));
    }

    #[test]
    fn test_ties_go_to_lowest_batch_number() {
        let batches = assign_batches(
            count(3),
            vec![group("pkg.C", 5), group("pkg.A", 5), group("pkg.B", 5)],
        );
        assert_eq!(batch_classes(&batches[0]), BTreeSet::from(["pkg.A"]));
        assert_eq!(batch_classes(&batches[1]), BTreeSet::from(["pkg.B"]));
        assert_eq!(batch_classes(&batches[2]), BTreeSet::from(["pkg.C"]));
    }

    #[test]
    fn test_classic_lpt_placement() {
        // 7,6,5 fill three batches, 4 joins the 5, 3 joins the 6.
        let groups = vec![
            group("pkg.G3", 3),
            group("pkg.G7", 7),
            group("pkg.G5", 5),
            group("pkg.G4", 4),
            group("pkg.G6", 6),
        ];
        let batches = assign_batches(count(3), groups);

        assert_eq!(batch_classes(&batches[0]), BTreeSet::from(["pkg.G7"]));
        assert_eq!(batch_classes(&batches[1]), BTreeSet::from(["pkg.G3", "pkg.G6"]));
        assert_eq!(batch_classes(&batches[2]), BTreeSet::from(["pkg.G4", "pkg.G5"]));
        assert_eq!(makespan(&batches), Duration::from_millis(9));
    }

    /// Linear-scan reference: first batch with the minimal load.
    fn linear_scan(n: usize, mut groups: Vec<AtomicGroup>) -> Vec<Vec<String>> {
        sort_for_assignment(&mut groups);
        let mut loads = vec![Duration::ZERO; n];
        let mut keys = vec![Vec::new(); n];
        for group in groups {
            let (index, _) = loads
                .iter()
                .enumerate()
                .min_by_key(|(i, load)| (**load, *i))
                .unwrap();
            loads[index] += group.total_duration;
            keys[index].push(group.key);
        }
        keys
    }

    fn random_groups(rng: &mut StdRng, max_groups: usize) -> Vec<AtomicGroup> {
        let n = rng.gen_range(0..=max_groups);
        (0..n)
            .map(|i| {
                let tests = (0..rng.gen_range(1..4))
                    .map(|t| {
                        TestResult::new(
                            format!("pkg.Class{i}"),
                            format!("t{t}"),
                            Duration::from_millis(rng.gen_range(0..50)),
                        )
                    })
                    .collect();
                AtomicGroup::new(format!("pkg.Class{i}"), tests)
            })
            .collect()
    }

    #[test]
    fn test_heap_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..6);
            let groups = random_groups(&mut rng, 25);
            let expected = linear_scan(n, groups.clone());

            let batches = assign_batches(count(n as i64), groups);
            let actual: Vec<Vec<String>> = batches
                .iter()
                .map(|b| {
                    let mut keys: Vec<String> = Vec::new();
                    for t in &b.tests {
                        if keys.last() != Some(&t.classname) {
                            keys.push(t.classname.clone());
                        }
                    }
                    keys
                })
                .collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_completeness_atomicity_cardinality() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let n = rng.gen_range(1..8);
            let groups = random_groups(&mut rng, 30);
            let input: BTreeMap<String, usize> =
                groups.iter().map(|g| (g.key.clone(), g.len())).collect();
            let total_tests: usize = input.values().sum();

            let batches = assign_batches(count(n as i64), groups);

            assert_eq!(batches.len(), n);
            assert_eq!(batches.iter().map(TestBatch::len).sum::<usize>(), total_tests);

            let mut owner: BTreeMap<&str, usize> = BTreeMap::new();
            for batch in &batches {
                for test in &batch.tests {
                    let previous = owner.insert(&test.classname, batch.number);
                    assert!(previous.is_none_or(|p| p == batch.number));
                }
                let sum: Duration = batch.tests.iter().map(|t| t.duration).sum();
                assert_eq!(sum, batch.total_duration);
            }
            assert_eq!(owner.len(), input.len());
        }
    }

    #[test]
    fn test_deterministic() {
        let mut rng = StdRng::seed_from_u64(3);
        let groups = random_groups(&mut rng, 40);
        let mut shuffled = groups.clone();
        shuffled.reverse();

        assert_eq!(
            assign_batches(count(4), groups),
            assign_batches(count(4), shuffled)
        );
    }

    #[test]
    fn test_huge_loads_saturate() {
        let huge = Duration::from_secs(u64::MAX / 2 + 1);
        let groups = || {
            vec![
                AtomicGroup::new("pkg.A", vec![TestResult::new("pkg.A", "x", huge)]),
                AtomicGroup::new("pkg.B", vec![TestResult::new("pkg.B", "y", huge)]),
                AtomicGroup::new("pkg.C", vec![TestResult::new("pkg.C", "z", huge)]),
            ]
        };

        let single = assign_batches(count(1), groups());
        assert_eq!(single[0].len(), 3);
        assert_eq!(single[0].total_duration, Duration::MAX);

        // Saturated loads still compare, so placement carries on in index order.
        let pair = assign_batches(count(2), groups());
        let sizes: Vec<_> = pair.iter().map(TestBatch::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(makespan(&pair), Duration::MAX);
    }

    /// Smallest achievable makespan, by exhaustive search.
    fn optimal_makespan(n: usize, durations: &[u64]) -> u64 {
        fn search(i: usize, durations: &[u64], loads: &mut [u64], best: &mut u64) {
            let current = loads.iter().copied().max().unwrap_or(0);
            if current >= *best {
                return;
            }
            if i == durations.len() {
                *best = current;
                return;
            }
            for b in 0..loads.len() {
                loads[b] += durations[i];
                search(i + 1, durations, loads, best);
                loads[b] -= durations[i];
            }
        }

        let mut best = u64::MAX;
        search(0, durations, &mut vec![0; n], &mut best);
        best
    }

    #[test]
    fn test_makespan_within_lpt_bound() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..150 {
            let n = rng.gen_range(1..=3usize);
            let size = rng.gen_range(1..=8usize);
            let durations: Vec<u64> = (0..size).map(|_| rng.gen_range(1..100)).collect();
            let groups: Vec<_> = durations
                .iter()
                .enumerate()
                .map(|(i, &d)| group(&format!("pkg.C{i}"), d))
                .collect();

            let lpt = makespan(&assign_batches(count(n as i64), groups)).as_millis() as u64;
            let opt = optimal_makespan(n, &durations);

            // lpt <= opt * (4/3 - 1/(3n))  <=>  3n * lpt <= opt * (4n - 1)
            let n = n as u64;
            assert!(
                3 * n * lpt <= opt * (4 * n - 1),
                "lpt={lpt} opt={opt} n={n} durations={durations:?}"
            );
        }
    }
}
