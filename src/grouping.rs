//! Atomic test groups.
//!
//! Tests of one class share fixtures and per-class state, so a class is the
//! smallest unit the assigner may place. This module partitions test results
//! by `classname` and orders the resulting groups for assignment.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::report::TestResult;

/// All tests of one class, placed as a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicGroup {
    /// Fully-qualified class name shared by every test in the group.
    pub key: String,

    /// Member tests, in input order.
    pub tests: Vec<TestResult>,

    /// Sum of the members' durations.
    pub total_duration: Duration,
}

impl AtomicGroup {
    /// Creates a group, computing its total duration.
    ///
    /// The total saturates at [`Duration::MAX`].
    pub fn new(key: impl Into<String>, tests: Vec<TestResult>) -> Self {
        let total_duration = tests
            .iter()
            .fold(Duration::ZERO, |total, t| total.saturating_add(t.duration));
        Self {
            key: key.into(),
            tests,
            total_duration,
        }
    }

    /// Number of tests in the group.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Assignment order: longest first, then classname ascending.
    pub fn assignment_order(&self, other: &Self) -> Ordering {
        other
            .total_duration
            .cmp(&self.total_duration)
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Partitions `results` into one group per classname.
///
/// Groups come back in assignment order (see [`AtomicGroup::assignment_order`]).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use testbatch::grouping::build_atomic_groups;
/// use testbatch::report::TestResult;
///
/// let groups = build_atomic_groups(vec![
///     TestResult::new("com.example.SomeClass", "a", Duration::from_secs(1)),
///     TestResult::new("com.example.AnotherClass", "c", Duration::from_secs(1)),
///     TestResult::new("com.example.SomeClass", "b", Duration::from_secs(1)),
/// ]);
///
/// assert_eq!(groups.len(), 2);
/// assert_eq!(groups[0].key, "com.example.SomeClass");
/// assert_eq!(groups[0].total_duration, Duration::from_secs(2));
/// ```
pub fn build_atomic_groups(results: impl IntoIterator<Item = TestResult>) -> Vec<AtomicGroup> {
    let mut by_class: BTreeMap<String, Vec<TestResult>> = BTreeMap::new();
    for result in results {
        by_class
            .entry(result.classname.clone())
            .or_default()
            .push(result);
    }

    let mut groups: Vec<AtomicGroup> = by_class
        .into_iter()
        .map(|(key, tests)| AtomicGroup::new(key, tests))
        .collect();
    sort_for_assignment(&mut groups);
    groups
}

/// Sorts groups into assignment order.
pub fn sort_for_assignment(groups: &mut [AtomicGroup]) {
    groups.sort_by(AtomicGroup::assignment_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(classname: &str, name: &str, millis: u64) -> TestResult {
        TestResult::new(classname, name, Duration::from_millis(millis))
    }

    #[test]
    fn test_group_by_class() {
        let groups = build_atomic_groups(vec![
            result("com.example.SomeClass", "a", 1000),
            result("com.example.SomeClass", "b", 1000),
            result("com.example.AnotherClass", "c", 1000),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "com.example.SomeClass");
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0].total_duration, Duration::from_secs(2));
        assert_eq!(groups[1].key, "com.example.AnotherClass");
        assert_eq!(groups[1].total_duration, Duration::from_secs(1));
    }

    #[test]
    fn test_similar_class_names_stay_separate() {
        let groups = build_atomic_groups(vec![
            result("com.example.SomeClass", "a", 5),
            result("com.example.SomeClassWithSuffix", "b", 5),
            result("com.example.nested.SomeClass", "c", 5),
        ]);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn test_equal_durations_sorted_by_name() {
        let groups = build_atomic_groups(vec![
            result("pkg.C", "t", 10),
            result("pkg.A", "t", 10),
            result("pkg.Slow", "t", 50),
            result("pkg.B", "t", 10),
        ]);
        let keys: Vec<_> = groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["pkg.Slow", "pkg.A", "pkg.B", "pkg.C"]);
    }

    #[test]
    fn test_members_keep_input_order() {
        let groups = build_atomic_groups(vec![
            result("pkg.A", "z", 1),
            result("pkg.A", "a", 1),
        ]);
        let names: Vec<_> = groups[0].tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn test_every_result_in_exactly_one_group() {
        let results: Vec<_> = (0..50)
            .map(|i| result(&format!("pkg.Class{}", i % 7), &format!("t{i}"), i))
            .collect();
        let groups = build_atomic_groups(results.clone());

        assert_eq!(groups.len(), 7);
        let total: usize = groups.iter().map(AtomicGroup::len).sum();
        assert_eq!(total, results.len());
        for group in &groups {
            assert!(group.tests.iter().all(|t| t.classname == group.key));
        }
    }

    #[test]
    fn test_total_duration_saturates() {
        let huge = Duration::from_secs(u64::MAX / 2 + 1);
        let groups = build_atomic_groups(vec![
            TestResult::new("pkg.A", "x", huge),
            TestResult::new("pkg.A", "y", huge),
        ]);
        assert_eq!(groups[0].total_duration, Duration::MAX);
    }

    #[test]
    fn test_empty_input() {
        assert!(build_atomic_groups(Vec::new()).is_empty());
    }
}
