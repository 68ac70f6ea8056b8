use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use num_traits::Float;

/// Largest value in a sequence, ignoring NaN. `None` if nothing is left.
///
pub fn max_extent<N, I>(values: I) -> Option<N>
where
    N: Float + Debug,
    I: IntoIterator<Item = N>,
{
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |max, v| match max {
            Some(m) if m >= v => Some(m),
            _ => Some(v),
        })
}

/// Elements common to every set. The intersection of no sets is empty.
///
/// The result is sorted so callers get a stable ordering regardless of the order the sets were
/// passed in.
///
pub fn set_intersection<T>(sets: &[HashSet<T>]) -> BTreeSet<T>
where
    T: Eq + Hash + Ord + Clone,
{
    let mut sets = sets.iter();
    let first = match sets.next() {
        Some(first) => first,
        None => return BTreeSet::new(),
    };
    let rest: Vec<&HashSet<T>> = sets.collect();

    first
        .iter()
        .filter(|item| rest.iter().all(|set| set.contains(*item)))
        .cloned()
        .collect()
}
