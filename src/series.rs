//! Month buckets over a fixed calendar window, plus the running-sum view used
//! for forecasting.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::models::{Dataset, Record, SeriesPoint};

/// Label of the bucket that absorbs everything dated before the window.
pub const ROLLUP_LABEL: &str = "2021 (all)";

/// First month shown on every time axis.
pub const WINDOW_START: Month = Month { year: 2022, month: 1 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Contiguous ascending months `[start, end]`. Empty when `end` precedes `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarWindow {
    start: Month,
    end: Option<Month>,
}

impl CalendarWindow {
    pub fn new(start: Month, end: Option<Month>) -> Self {
        Self { start, end }
    }

    /// The window always ends at the latest enrollment month of the whole
    /// dataset so the axis is identical for every filter selection.
    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self::new(WINDOW_START, dataset.latest_enrollment_date().map(Month::of))
    }

    pub fn start(&self) -> Month {
        self.start
    }

    /// Whether `month` falls after the last window month. Every month does
    /// when the window is empty.
    pub fn is_past_end(&self, month: Month) -> bool {
        !matches!(self.end, Some(end) if month <= end)
    }

    pub fn months(&self) -> Vec<Month> {
        let mut months = Vec::new();
        let Some(end) = self.end else {
            return months;
        };

        let mut current = self.start;
        while current <= end {
            months.push(current);
            current = current.next();
        }
        months
    }

    pub fn len(&self) -> usize {
        self.months().len()
    }

    /// The `count` months immediately after the window.
    pub fn following(&self, count: usize) -> Vec<Month> {
        let mut current = match self.months().last() {
            Some(last) => last.next(),
            None => self.start,
        };

        let mut months = Vec::with_capacity(count);
        for _ in 0..count {
            months.push(current);
            current = current.next();
        }
        months
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketLabel {
    Rollup,
    Month(Month),
}

impl fmt::Display for BucketLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketLabel::Rollup => f.write_str(ROLLUP_LABEL),
            BucketLabel::Month(month) => month.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub label: BucketLabel,
    pub count: u64,
}

/// Rollup bucket first, then one bucket per window month, zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketedSeries {
    buckets: Vec<Bucket>,
}

impl BucketedSeries {
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn to_points(&self) -> Vec<SeriesPoint> {
        to_points(&self.buckets)
    }
}

/// Dates before the window go to the rollup bucket. Dates after the window's
/// last month are not counted.
pub fn bucket_by_month<'a, I, F>(
    records: I,
    date_of: F,
    window: &CalendarWindow,
) -> BucketedSeries
where
    I: IntoIterator<Item = &'a Record>,
    F: Fn(&Record) -> Option<NaiveDate>,
{
    let mut rollup = 0u64;
    let mut by_month: BTreeMap<Month, u64> = BTreeMap::new();

    for date in records.into_iter().filter_map(|record| date_of(record)) {
        let month = Month::of(date);
        if month < window.start() {
            rollup += 1;
        } else if !window.is_past_end(month) {
            *by_month.entry(month).or_insert(0) += 1;
        }
    }

    let mut buckets = Vec::with_capacity(window.len() + 1);
    buckets.push(Bucket {
        label: BucketLabel::Rollup,
        count: rollup,
    });
    buckets.extend(window.months().into_iter().map(|month| Bucket {
        label: BucketLabel::Month(month),
        count: by_month.get(&month).copied().unwrap_or(0),
    }));

    BucketedSeries { buckets }
}

/// Running totals; same labels as the incremental series it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeSeries {
    buckets: Vec<Bucket>,
}

impl CumulativeSeries {
    pub fn values(&self) -> Vec<f64> {
        self.buckets.iter().map(|bucket| bucket.count as f64).collect()
    }

    pub fn to_points(&self) -> Vec<SeriesPoint> {
        to_points(&self.buckets)
    }
}

pub fn cumulate(series: &BucketedSeries) -> CumulativeSeries {
    let mut running = 0u64;
    let buckets = series
        .buckets()
        .iter()
        .map(|bucket| {
            running += bucket.count;
            Bucket {
                label: bucket.label,
                count: running,
            }
        })
        .collect();

    CumulativeSeries { buckets }
}

fn to_points(buckets: &[Bucket]) -> Vec<SeriesPoint> {
    buckets
        .iter()
        .map(|bucket| SeriesPoint::new(bucket.label.to_string(), bucket.count as i64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{date, record};

    fn month(year: i32, month: u32) -> Month {
        Month::of(date(year, month, 1))
    }

    fn window_to(end: Month) -> CalendarWindow {
        CalendarWindow::new(WINDOW_START, Some(end))
    }

    impl BucketedSeries {
        fn len(&self) -> usize {
            self.buckets.len()
        }

        fn total(&self) -> u64 {
            self.buckets.iter().map(|bucket| bucket.count).sum()
        }
    }

    fn screened(dates: &[NaiveDate]) -> Vec<Record> {
        dates.iter().map(|d| record(Some(*d), None)).collect()
    }

    #[test]
    fn month_rolls_over_year() {
        assert_eq!(month(2022, 12).next(), month(2023, 1));
        assert_eq!(month(2023, 1).to_string(), "2023-01");
        assert!(month(2021, 12) < WINDOW_START);
    }

    #[test]
    fn window_is_inclusive_and_contiguous() {
        let window = CalendarWindow::new(month(2022, 11), Some(month(2023, 2)));
        let labels: Vec<String> = window.months().iter().map(Month::to_string).collect();
        assert_eq!(labels, vec!["2022-11", "2022-12", "2023-01", "2023-02"]);
        assert_eq!(
            window.following(3),
            vec![month(2023, 3), month(2023, 4), month(2023, 5)]
        );
    }

    #[test]
    fn window_end_comes_from_full_dataset() {
        let dataset = Dataset::new(vec![
            record(None, Some(date(2022, 4, 30))),
            record(None, Some(date(2022, 2, 1))),
        ]);
        let window = CalendarWindow::for_dataset(&dataset);
        assert_eq!(window.len(), 4);

        let without_enrollments = Dataset::new(vec![record(Some(date(2022, 1, 1)), None)]);
        let empty = CalendarWindow::for_dataset(&without_enrollments);
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.following(1), vec![WINDOW_START]);
    }

    #[test]
    fn rollup_then_zero_filled_months() {
        let records = screened(&[
            date(2021, 3, 1),
            date(2021, 7, 15),
            date(2021, 12, 31),
            date(2022, 2, 3),
            date(2022, 2, 27),
        ]);
        let window = window_to(month(2022, 4));
        let series = bucket_by_month(&records, |r| r.screening_date, &window);

        let points = series.to_points();
        assert_eq!(
            points,
            vec![
                SeriesPoint::new("2021 (all)", 3),
                SeriesPoint::new("2022-01", 0),
                SeriesPoint::new("2022-02", 2),
                SeriesPoint::new("2022-03", 0),
                SeriesPoint::new("2022-04", 0),
            ]
        );
    }

    #[test]
    fn length_is_window_plus_one_even_without_data() {
        let window = window_to(month(2023, 6));
        let series = bucket_by_month(&Vec::<Record>::new(), |r| r.screening_date, &window);
        assert_eq!(series.len(), window.len() + 1);
        assert_eq!(series.total(), 0);
    }

    #[test]
    fn missing_dates_are_not_counted() {
        let records = vec![
            record(Some(date(2022, 1, 5)), None),
            record(None, None),
            record(Some(date(2020, 1, 5)), None),
        ];
        let window = window_to(month(2022, 1));
        let series = bucket_by_month(&records, |r| r.screening_date, &window);
        assert_eq!(series.total(), 2);
    }

    #[test]
    fn dates_after_the_window_are_not_counted() {
        let records = screened(&[date(2022, 1, 20), date(2022, 3, 1), date(2022, 4, 9)]);
        let window = window_to(month(2022, 1));
        let series = bucket_by_month(&records, |r| r.screening_date, &window);
        assert_eq!(
            series.to_points(),
            vec![SeriesPoint::new("2021 (all)", 0), SeriesPoint::new("2022-01", 1)]
        );
        assert_eq!(series.total(), 1);

        let empty = CalendarWindow::new(WINDOW_START, None);
        let rollup_only = bucket_by_month(&records, |r| r.screening_date, &empty);
        assert_eq!(rollup_only.to_points(), vec![SeriesPoint::new("2021 (all)", 0)]);
    }

    #[test]
    fn cumulative_is_running_sum_from_rollup() {
        let records = screened(&[
            date(2021, 5, 1),
            date(2021, 6, 1),
            date(2022, 2, 1),
            date(2022, 2, 9),
            date(2022, 2, 10),
            date(2022, 4, 1),
        ]);
        let window = window_to(month(2022, 4));
        let incremental = bucket_by_month(&records, |r| r.screening_date, &window);
        let cumulative = cumulate(&incremental);

        assert_eq!(cumulative.values(), vec![2.0, 2.0, 5.0, 5.0, 6.0]);
        assert_eq!(cumulative.buckets[0].count, incremental.buckets()[0].count);
        for i in 1..cumulative.buckets.len() {
            let step = cumulative.buckets[i].count - cumulative.buckets[i - 1].count;
            assert_eq!(step, incremental.buckets()[i].count);
        }
    }
}
