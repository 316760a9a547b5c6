use std::collections::BTreeMap;
use std::fmt::Display;

use crate::models::{Record, SeriesPoint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount<K> {
    pub value: K,
    pub count: usize,
}

impl<K: Display> CategoryCount<K> {
    /// `"value: count"`, the form the summary cards list.
    pub fn line(&self) -> String {
        format!("{}: {}", self.value, self.count)
    }

    pub fn to_point(&self) -> SeriesPoint {
        SeriesPoint::new(self.value.to_string(), self.count as i64)
    }
}

/// Count the values of one field, largest count first. Ties keep the key's
/// natural order, so the output never depends on record order. Records with
/// no value for the field are skipped.
pub fn count_by<'a, I, K, F>(
    records: I,
    key: F,
    restrict_to_enrolled: bool,
) -> Vec<CategoryCount<K>>
where
    I: IntoIterator<Item = &'a Record>,
    K: Ord,
    F: Fn(&'a Record) -> Option<K>,
{
    let mut counts: BTreeMap<K, usize> = BTreeMap::new();

    for record in records {
        if restrict_to_enrolled && !record.is_enrolled() {
            continue;
        }
        if let Some(value) = key(record) {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    let mut ordered: Vec<CategoryCount<K>> = counts
        .into_iter()
        .map(|(value, count)| CategoryCount { value, count })
        .collect();

    // Stable sort keeps the BTreeMap order among equal counts.
    ordered.sort_by(|a, b| b.count.cmp(&a.count));
    ordered
}

pub fn to_points<K: Display>(counts: &[CategoryCount<K>]) -> Vec<SeriesPoint> {
    counts.iter().map(CategoryCount::to_point).collect()
}

pub fn to_lines<K: Display>(counts: &[CategoryCount<K>]) -> Vec<String> {
    counts.iter().map(CategoryCount::line).collect()
}
