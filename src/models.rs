use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

/// PID statuses that disqualify a record from counting as enrolled.
pub const EXCLUDED_PID_STATUSES: [&str; 2] = ["Not Released in 90 Days", "Did Not Complete BL"];

/// Wildcard filter value.
pub const ALL: &str = "All";

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub screening_date: Option<NaiveDate>,
    pub enrollment_date: Option<NaiveDate>,
    pub site: Option<String>,
    pub enrollment_type: Option<String>,
    pub pid_status: Option<String>,
    pub referral_source: Option<String>,
    pub moud_type: Option<String>,
    pub oud_score: Option<i64>,
    pub days_incarcerated: Option<i64>,
    pub age: Option<f64>,
    pub race: Option<String>,
    pub gender: Option<String>,
}

impl Record {
    /// Eligibility depends on this record's own fields only.
    pub fn is_enrolled(&self) -> bool {
        self.enrollment_date.is_some()
            && !self
                .pid_status
                .as_deref()
                .is_some_and(|status| EXCLUDED_PID_STATUSES.contains(&status))
    }
}

/// The full export, frozen after loading. Aggregation only ever borrows it.
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(mut records: Vec<Record>) -> Self {
        // Missing screening dates sort last.
        records.sort_by_key(|record| (record.screening_date.is_none(), record.screening_date));
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest enrollment date across every record, regardless of any filter.
    pub fn latest_enrollment_date(&self) -> Option<NaiveDate> {
        self.records
            .iter()
            .filter_map(|record| record.enrollment_date)
            .max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSelection {
    pub site: String,
    pub enrollment_type: String,
}

impl FilterSelection {
    pub fn new(site: impl Into<String>, enrollment_type: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            enrollment_type: enrollment_type.into(),
        }
    }

    pub fn all() -> Self {
        Self::new(ALL, ALL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: i64,
}

impl SeriesPoint {
    pub fn new(label: impl Into<String>, value: i64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForecastChart {
    pub actual: Vec<SeriesPoint>,
    pub forecast: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Charts {
    pub screening_dates: Vec<SeriesPoint>,
    pub enrolled_dates: Vec<SeriesPoint>,
    pub enrollment_forecast: ForecastChart,
    pub enrollment_types: Vec<SeriesPoint>,
    pub pid_statuses: Vec<SeriesPoint>,
    pub referral_sources: Vec<SeriesPoint>,
    pub moud_types: Vec<SeriesPoint>,
    pub days_incarcerated: Vec<i64>,
    pub oud_scores: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CardValue {
    Number(i64),
    Text(String),
    Lines(Vec<String>),
    NotAvailable,
    NoMatchingRecords,
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Number(value) => write!(f, "{value}"),
            CardValue::Text(text) => f.write_str(text),
            CardValue::Lines(lines) => f.write_str(&lines.join("\n")),
            CardValue::NotAvailable => f.write_str("NA"),
            CardValue::NoMatchingRecords => f.write_str("No matching records found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cards {
    pub mean_age: CardValue,
    pub race: CardValue,
    pub gender: CardValue,
    pub sites: CardValue,
    pub conversion_rate: CardValue,
    pub enrollment_forecast: CardValue,
}

impl Cards {
    pub fn no_data() -> Self {
        Self {
            mean_age: CardValue::NotAvailable,
            race: CardValue::NotAvailable,
            gender: CardValue::NotAvailable,
            sites: CardValue::NoMatchingRecords,
            conversion_rate: CardValue::NotAvailable,
            enrollment_forecast: CardValue::NotAvailable,
        }
    }
}

/// Everything the presentation layer needs for one filter selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    pub selection: FilterSelection,
    pub record_count: usize,
    pub charts: Charts,
    pub cards: Cards,
}

impl AggregateResult {
    pub fn no_data(selection: FilterSelection) -> Self {
        Self {
            selection,
            record_count: 0,
            charts: Charts::default(),
            cards: Cards::no_data(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.record_count > 0
    }
}

#[cfg(test)]
pub(crate) fn record(screening: Option<NaiveDate>, enrollment: Option<NaiveDate>) -> Record {
    Record {
        screening_date: screening,
        enrollment_date: enrollment,
        site: None,
        enrollment_type: None,
        pid_status: None,
        referral_source: None,
        moud_type: None,
        oud_score: None,
        days_incarcerated: None,
        age: None,
        race: None,
        gender: None,
    }
}

#[cfg(test)]
pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}
