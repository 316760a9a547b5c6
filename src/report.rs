use std::fmt::Write;

use crate::models::{AggregateResult, CardValue, SeriesPoint};

pub fn build_report(result: &AggregateResult) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# TCN PATHS Enrollment Summary");
    let _ = writeln!(
        output,
        "Generated for site {} and enrollment type {} ({} matching records)",
        result.selection.site, result.selection.enrollment_type, result.record_count
    );
    let _ = writeln!(output);

    if !result.has_data() {
        let _ = writeln!(output, "{}", CardValue::NoMatchingRecords);
        return output;
    }

    let cards = &result.cards;
    let _ = writeln!(output, "## Cards");
    write_card(&mut output, "Mean Age", &cards.mean_age);
    write_card(&mut output, "Conversion Rate", &cards.conversion_rate);
    write_card(&mut output, "Enrollment Count by Site", &cards.sites);
    write_card(&mut output, "Count by Race", &cards.race);
    write_card(&mut output, "Count by Gender", &cards.gender);
    write_card(
        &mut output,
        "Enrollment Projections (next 3 months)",
        &cards.enrollment_forecast,
    );

    let charts = &result.charts;
    write_series(&mut output, "Screening Date", &charts.screening_dates);
    write_series(&mut output, "Enrolled Date", &charts.enrolled_dates);
    write_series(
        &mut output,
        "Cumulative Enrollment",
        &charts.enrollment_forecast.actual,
    );
    write_series(
        &mut output,
        "Enrollment Forecast",
        &charts.enrollment_forecast.forecast,
    );
    write_series(&mut output, "Enrollment Type", &charts.enrollment_types);
    write_series(&mut output, "PID Status", &charts.pid_statuses);
    write_series(&mut output, "Referral Source", &charts.referral_sources);
    write_series(
        &mut output,
        "MOUD Type for Enrolled Participants",
        &charts.moud_types,
    );
    write_series(&mut output, "OUD Score Distribution", &charts.oud_scores);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Days Incarcerated");
    match days_summary(&charts.days_incarcerated) {
        Some((min, median, max)) => {
            let _ = writeln!(
                output,
                "{} participants; min {min}, median {median:.1}, max {max}",
                charts.days_incarcerated.len()
            );
        }
        None => {
            let _ = writeln!(output, "No values recorded.");
        }
    }

    output
}

fn write_card(output: &mut String, title: &str, value: &CardValue) {
    let _ = writeln!(output);
    let _ = writeln!(output, "### {title}");
    match value {
        CardValue::Lines(lines) if lines.is_empty() => {
            let _ = writeln!(output, "None recorded.");
        }
        CardValue::Lines(lines) => {
            for line in lines {
                let _ = writeln!(output, "- {line}");
            }
        }
        other => {
            let _ = writeln!(output, "{other}");
        }
    }
}

fn write_series(output: &mut String, title: &str, points: &[SeriesPoint]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    if points.is_empty() {
        let _ = writeln!(output, "Unavailable.");
        return;
    }

    for point in points {
        let _ = writeln!(output, "- {}: {}", point.label, point.value);
    }
}

fn days_summary(values: &[i64]) -> Option<(i64, f64, i64)> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let min = *sorted.first()?;
    let max = *sorted.last()?;
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    };

    Some((min, median, max))
}
