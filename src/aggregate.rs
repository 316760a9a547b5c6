use log::{debug, warn};

use crate::counts::{self, count_by};
use crate::filter::filter;
use crate::forecast::{forecast, Forecast, TimeSeriesForecaster, FORECAST_HORIZON};
use crate::models::{
    AggregateResult, CardValue, Cards, Charts, Dataset, FilterSelection, ForecastChart, Record,
    SeriesPoint,
};
use crate::series::{bucket_by_month, cumulate, CalendarWindow};

/// Recompute every chart and card for one filter selection.
///
/// The calendar window is derived from the full dataset, not the filtered
/// subset. A failure inside one aggregate (no ages, nothing screened, a model
/// that will not fit) only affects that aggregate.
pub fn assemble<F: TimeSeriesForecaster>(
    dataset: &Dataset,
    selection: &FilterSelection,
    forecaster: &F,
) -> AggregateResult {
    let filtered = filter(dataset, selection);
    debug!(
        "selection site={} enrollment_type={} matched {} of {} records",
        selection.site,
        selection.enrollment_type,
        filtered.records.len(),
        dataset.len()
    );

    if !filtered.non_empty {
        return AggregateResult::no_data(selection.clone());
    }

    let records = &filtered.records;
    let window = CalendarWindow::for_dataset(dataset);

    let rows = move || records.iter().copied();

    let screening = bucket_by_month(rows(), |r| r.screening_date, &window);
    let enrolled = bucket_by_month(
        rows().filter(|r| r.is_enrolled()),
        |r| r.enrollment_date,
        &window,
    );
    let cumulative = cumulate(&enrolled);

    let projection = match forecast(forecaster, &cumulative, &window, FORECAST_HORIZON) {
        Ok(projection) => {
            debug!("forecast produced by {}", projection.model);
            Some(projection)
        }
        Err(err) => {
            warn!("enrollment forecast unavailable: {err}");
            None
        }
    };

    let enrollment_types = count_by(rows(), |r| r.enrollment_type.as_deref(), true);
    let pid_statuses = count_by(rows(), |r| r.pid_status.as_deref(), true);
    let referral_sources = count_by(rows(), |r| r.referral_source.as_deref(), false);
    let moud_types = count_by(rows(), |r| r.moud_type.as_deref(), true);
    let oud_scores = count_by(rows(), |r| r.oud_score, false);
    let races = count_by(rows(), |r| r.race.as_deref(), false);
    let genders = count_by(rows(), |r| r.gender.as_deref(), false);
    let sites = count_by(rows(), |r| r.site.as_deref(), true);

    let charts = Charts {
        screening_dates: screening.to_points(),
        enrolled_dates: enrolled.to_points(),
        enrollment_forecast: ForecastChart {
            actual: cumulative.to_points(),
            forecast: projection.as_ref().map(forecast_points).unwrap_or_default(),
        },
        enrollment_types: counts::to_points(&enrollment_types),
        pid_statuses: counts::to_points(&pid_statuses),
        referral_sources: counts::to_points(&referral_sources),
        moud_types: counts::to_points(&moud_types),
        days_incarcerated: days_incarcerated(records),
        oud_scores: counts::to_points(&oud_scores),
    };

    let mut site_lines = counts::to_lines(&sites);
    let total_enrolled: usize = sites.iter().map(|site| site.count).sum();
    site_lines.push(format!("Total: {total_enrolled}"));

    let cards = Cards {
        mean_age: mean_age(records),
        race: CardValue::Lines(counts::to_lines(&races)),
        gender: CardValue::Lines(counts::to_lines(&genders)),
        sites: CardValue::Lines(site_lines),
        conversion_rate: conversion_rate(records),
        enrollment_forecast: projection
            .as_ref()
            .map(forecast_card)
            .unwrap_or(CardValue::NotAvailable),
    };

    AggregateResult {
        selection: selection.clone(),
        record_count: records.len(),
        charts,
        cards,
    }
}

fn forecast_points(projection: &Forecast) -> Vec<SeriesPoint> {
    projection
        .points
        .iter()
        .map(|point| SeriesPoint::new(point.month.to_string(), point.rounded()))
        .collect()
}

fn forecast_card(projection: &Forecast) -> CardValue {
    CardValue::Lines(
        projection
            .points
            .iter()
            .map(|point| format!("{}: {}", point.month, point.rounded()))
            .collect(),
    )
}

fn days_incarcerated(records: &[&Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|record| record.days_incarcerated)
        .map(i64::saturating_abs)
        .collect()
}

fn mean_age(records: &[&Record]) -> CardValue {
    let ages: Vec<f64> = records.iter().filter_map(|record| record.age).collect();
    if ages.is_empty() {
        return CardValue::NotAvailable;
    }

    // The loader bounds ages, so the mean always fits an i64.
    let mean = ages.iter().sum::<f64>() / ages.len() as f64;
    CardValue::Number(mean.round_ties_even() as i64)
}

/// Share of screened records that went on to enroll, as a whole percentage.
fn conversion_rate(records: &[&Record]) -> CardValue {
    let screened: Vec<&&Record> = records
        .iter()
        .filter(|record| record.screening_date.is_some())
        .collect();
    if screened.is_empty() {
        return CardValue::NotAvailable;
    }

    let converted = screened.iter().filter(|record| record.is_enrolled()).count();
    let rate = (100.0 * converted as f64 / screened.len() as f64).round_ties_even() as i64;
    CardValue::Text(format!("{rate}%"))
}
