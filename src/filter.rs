use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{Dataset, FilterSelection, Record, ALL};

/// Records matching a filter selection, borrowed from the frozen dataset.
#[derive(Debug, Clone)]
pub struct FilteredRecords<'a> {
    pub records: Vec<&'a Record>,
    pub non_empty: bool,
}

pub fn filter<'a>(dataset: &'a Dataset, selection: &FilterSelection) -> FilteredRecords<'a> {
    let records: Vec<&Record> = dataset
        .records()
        .iter()
        .filter(|record| {
            matches_value(&selection.site, record.site.as_deref())
                && matches_value(&selection.enrollment_type, record.enrollment_type.as_deref())
        })
        .collect();

    let non_empty = !records.is_empty();
    FilteredRecords { records, non_empty }
}

fn matches_value(wanted: &str, actual: Option<&str>) -> bool {
    wanted == ALL || actual == Some(wanted)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub sites: Vec<String>,
    pub enrollment_types: Vec<String>,
}

impl FilterOptions {
    pub fn contains(&self, selection: &FilterSelection) -> bool {
        self.sites.contains(&selection.site)
            && self.enrollment_types.contains(&selection.enrollment_type)
    }
}

/// Dropdown values: the wildcard first, then the sorted distinct values present.
pub fn filter_options(dataset: &Dataset) -> FilterOptions {
    FilterOptions {
        sites: options_for(dataset, |record| record.site.as_deref()),
        enrollment_types: options_for(dataset, |record| record.enrollment_type.as_deref()),
    }
}

fn options_for<F>(dataset: &Dataset, field: F) -> Vec<String>
where
    F: Fn(&Record) -> Option<&str>,
{
    let distinct: BTreeSet<&str> = dataset.records().iter().filter_map(field).collect();
    std::iter::once(ALL)
        .chain(distinct)
        .map(str::to_string)
        .collect()
}
