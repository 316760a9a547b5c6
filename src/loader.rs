use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Dataset, Record};

pub const SCREENING_DATE: &str = "ScreeningDate";
pub const ENROLLMENT_DATE: &str = "PtDatabase::EnrollmentDate";
pub const SITE: &str = "Site";
pub const ENROLLMENT_TYPE: &str = "PtDatabase::CommJailEnrollment";
pub const PID_STATUS: &str = "PtDatabase::PIDStatus";
pub const REFERRAL_SOURCE: &str = "ReferralSource";
pub const MOUD_TYPE: &str = "MOUDType";
pub const OUD_SCORE: &str = "OUDScore";
pub const DAYS_INCARCERATED: &str = "DaysIncarcerated";
pub const AGE: &str = "Age";
pub const RACE: &str = "Race";
pub const GENDER: &str = "Gender";

const REQUIRED_COLUMNS: [&str; 12] = [
    SCREENING_DATE,
    ENROLLMENT_DATE,
    SITE,
    ENROLLMENT_TYPE,
    PID_STATUS,
    REFERRAL_SOURCE,
    MOUD_TYPE,
    OUD_SCORE,
    DAYS_INCARCERATED,
    AGE,
    RACE,
    GENDER,
];

const SCREENING_DATE_FORMAT: &str = "%m/%d/%Y";
const ENROLLMENT_DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%Y-%m-%d"];
const OUD_SCORE_RANGE: std::ops::RangeInclusive<i64> = 0..=11;
const AGE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=130.0;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset is missing required column `{0}`")]
    MissingColumn(&'static str),

    #[error("row {row}: cannot read `{value}` as {column}")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to open dataset: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "ScreeningDate")]
    screening_date: Option<String>,
    #[serde(rename = "PtDatabase::EnrollmentDate")]
    enrollment_date: Option<String>,
    #[serde(rename = "Site")]
    site: Option<String>,
    #[serde(rename = "PtDatabase::CommJailEnrollment")]
    enrollment_type: Option<String>,
    #[serde(rename = "PtDatabase::PIDStatus")]
    pid_status: Option<String>,
    #[serde(rename = "ReferralSource")]
    referral_source: Option<String>,
    #[serde(rename = "MOUDType")]
    moud_type: Option<String>,
    #[serde(rename = "OUDScore")]
    oud_score: Option<String>,
    #[serde(rename = "DaysIncarcerated")]
    days_incarcerated: Option<String>,
    #[serde(rename = "Age")]
    age: Option<String>,
    #[serde(rename = "Race")]
    race: Option<String>,
    #[serde(rename = "Gender")]
    gender: Option<String>,
}

pub fn load_csv(path: &Path) -> Result<Dataset, DatasetError> {
    let dataset = read_csv(File::open(path)?)?;
    info!("Loaded {} records from {}", dataset.len(), path.display());
    Ok(dataset)
}

pub fn read_csv<R: Read>(input: R) -> Result<Dataset, DatasetError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(input);
    read_records(reader)
}

fn read_records<R: Read>(mut reader: csv::Reader<R>) -> Result<Dataset, DatasetError> {
    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|header| header == column) {
            return Err(DatasetError::MissingColumn(column));
        }
    }

    let mut records = Vec::new();
    let mut missing_screening = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let row = index + 2;
        let record = convert_row(result?, row)?;
        if record.screening_date.is_none() {
            missing_screening += 1;
        }
        records.push(record);
    }

    if missing_screening > 0 {
        warn!("{missing_screening} records have no screening date");
    }

    Ok(Dataset::new(records))
}

fn convert_row(raw: CsvRow, row: usize) -> Result<Record, DatasetError> {
    let screening_date = match cell(raw.screening_date) {
        Some(value) => Some(
            NaiveDate::parse_from_str(&value, SCREENING_DATE_FORMAT)
                .map_err(|_| invalid(row, SCREENING_DATE, &value))?,
        ),
        None => None,
    };

    let enrollment_date = match cell(raw.enrollment_date) {
        Some(value) => Some(
            parse_enrollment_date(&value).ok_or_else(|| invalid(row, ENROLLMENT_DATE, &value))?,
        ),
        None => None,
    };

    let oud_score = parse_integer(cell(raw.oud_score), row, OUD_SCORE)?;
    if let Some(score) = oud_score {
        if !OUD_SCORE_RANGE.contains(&score) {
            warn!("row {row}: OUD score {score} is outside 0..=11");
        }
    }

    let age = match cell(raw.age) {
        Some(value) => Some(
            value
                .parse::<f64>()
                .ok()
                .filter(|age| AGE_RANGE.contains(age))
                .ok_or_else(|| invalid(row, AGE, &value))?,
        ),
        None => None,
    };

    Ok(Record {
        screening_date,
        enrollment_date,
        site: cell(raw.site),
        enrollment_type: cell(raw.enrollment_type),
        pid_status: cell(raw.pid_status),
        referral_source: cell(raw.referral_source),
        moud_type: cell(raw.moud_type),
        oud_score,
        days_incarcerated: parse_integer(cell(raw.days_incarcerated), row, DAYS_INCARCERATED)?,
        age,
        race: cell(raw.race),
        gender: cell(raw.gender),
    })
}

fn cell(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Accepts a bare date or a date followed by a time component.
fn parse_enrollment_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.split_whitespace().next()?;
    ENROLLMENT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

/// Spreadsheet exports write integer columns with nulls as floats ("3.0").
fn parse_integer(
    value: Option<String>,
    row: usize,
    column: &'static str,
) -> Result<Option<i64>, DatasetError> {
    let Some(value) = value else {
        return Ok(None);
    };

    if let Ok(parsed) = value.parse::<i64>() {
        return Ok(Some(parsed));
    }

    // `i64::MAX as f64` rounds up to 2^63, which no i64 holds.
    match value.parse::<f64>() {
        Ok(parsed)
            if parsed.fract() == 0.0 && parsed >= i64::MIN as f64 && parsed < i64::MAX as f64 =>
        {
            Ok(Some(parsed as i64))
        }
        _ => Err(invalid(row, column, &value)),
    }
}

fn invalid(row: usize, column: &'static str, value: &str) -> DatasetError {
    DatasetError::InvalidValue {
        row,
        column,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::date;
    use std::io::Write;

    const HEADER: &str = "ScreeningDate,PtDatabase::EnrollmentDate,Site,PtDatabase::CommJailEnrollment,PtDatabase::PIDStatus,ReferralSource,MOUDType,OUDScore,DaysIncarcerated,Age,Race,Gender";

    fn parse(body: &str) -> Result<Dataset, DatasetError> {
        read_csv(format!("{HEADER}\n{body}").as_bytes())
    }

    #[test]
    fn reads_typed_records_and_keeps_nulls() {
        let dataset = parse(
            "03/14/2022,3/20/2022,Eastside,Jail,Active,Court,Buprenorphine,7,-45,34.5,White,Female\n\
             11/02/2021,,,,,,,,,,,\n",
        )
        .unwrap();

        assert_eq!(dataset.len(), 2);
        let first = &dataset.records()[0];
        assert_eq!(first.screening_date, Some(date(2021, 11, 2)));
        assert_eq!(first.enrollment_date, None);
        assert_eq!(first.site, None);
        assert_eq!(first.age, None);

        let second = &dataset.records()[1];
        assert_eq!(second.enrollment_date, Some(date(2022, 3, 20)));
        assert_eq!(second.site.as_deref(), Some("Eastside"));
        assert_eq!(second.enrollment_type.as_deref(), Some("Jail"));
        assert_eq!(second.oud_score, Some(7));
        assert_eq!(second.days_incarcerated, Some(-45));
        assert_eq!(second.age, Some(34.5));
    }

    #[test]
    fn accepts_float_integers_and_iso_enrollment_dates() {
        let dataset =
            parse("01/05/2023,2023-01-09 00:00:00,North,Community,,,,4.0,120.0,41,,\n").unwrap();
        let record = &dataset.records()[0];
        assert_eq!(record.enrollment_date, Some(date(2023, 1, 9)));
        assert_eq!(record.oud_score, Some(4));
        assert_eq!(record.days_incarcerated, Some(120));
    }

    #[test]
    fn missing_column_is_fatal() {
        let err = read_csv("ScreeningDate,Site\n01/01/2022,North\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MissingColumn(ENROLLMENT_DATE)
        ));
    }

    #[test]
    fn malformed_value_reports_row_and_column() {
        let err = parse("01/01/2022,,North,,,,,seven,,,,\n").unwrap_err();
        match err {
            DatasetError::InvalidValue { row, column, value } => {
                assert_eq!(row, 2);
                assert_eq!(column, OUD_SCORE);
                assert_eq!(value, "seven");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        for cell in ["-1e300", "1e19", "9223372036854775808.0"] {
            let err = parse(&format!("01/01/2022,,North,,,,,,{cell},,,\n")).unwrap_err();
            match err {
                DatasetError::InvalidValue { column, value, .. } => {
                    assert_eq!(column, DAYS_INCARCERATED);
                    assert_eq!(value, cell);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        let dataset = parse("01/01/2022,,North,,,,,,-9.0e3,,,\n").unwrap();
        assert_eq!(dataset.records()[0].days_incarcerated, Some(-9000));
    }

    #[test]
    fn implausible_ages_are_rejected() {
        for cell in ["-3", "1e300", "inf", "NaN"] {
            let err = parse(&format!("01/01/2022,,North,,,,,,,{cell},,\n")).unwrap_err();
            assert!(matches!(err, DatasetError::InvalidValue { column: AGE, .. }));
        }
        let dataset = parse("01/01/2022,,North,,,,,,,0,,\n").unwrap();
        assert_eq!(dataset.records()[0].age, Some(0.0));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "06/01/2022,06/15/2022,North,Jail,,,,,,,,").unwrap();

        let dataset = load_csv(file.path()).unwrap();
        assert_eq!(dataset.len(), 1);
        assert!(dataset.records()[0].is_enrolled());
    }
}
