/// Miscellaneous functions that are used in other parts of the program
use core::ops::{Add, Div, Mul, Sub};

use chrono::{Duration, NaiveDateTime};

use crate::error::{TecError, TecResult};

/// Datetime formats accepted when parsing timestamps from text.
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// The format used when writing timestamps.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Interpolate an arbitrary amount of independent values between two known points
///
/// # Arguments
/// - `x0`: The first known explanatory variable
/// - `y0`: The first known independent variables
/// - `x1`: The second known explanatory variable
/// - `y1`: The second known independent variables
/// - `x`: The explanatory point at which to interpolate the independent variables
///
/// # Returns
/// The interpolated independent (y) values.
///
/// # Panics
/// - The first slice of independent values is longer than the second: `y0.len()` > `y1.len()`
pub fn interpolate_values<T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Copy>(
    x0: T,
    y0: &[T],
    x1: T,
    y1: &[T],
    x: T,
) -> Vec<T> {
    (0..y0.len())
        .map(|i| interpolate_between_known((x0, y0[i]), (x1, y1[i]), x))
        .collect::<Vec<T>>()
}

/// Interpolate linearly between two known points
///
/// https://en.wikipedia.org/wiki/Linear_interpolation#Linear_interpolation_between_two_known_points
///
/// # Arguments
/// - `known_xy0`: The first known point as (explanatory, independent)
/// - `known_xy1`: The second known point as (explanatory, independent)
/// - `x`: The explanatory point at which to interpolate the independent variables
///
/// # Returns
/// The interpolated independent (y) value.
pub fn interpolate_between_known<T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Copy>(
    known_xy0: (T, T),
    known_xy1: (T, T),
    x: T,
) -> T {
    (known_xy0.1 * (known_xy1.0 - x) + known_xy1.1 * (x - known_xy0.0)) / (known_xy1.0 - known_xy0.0)
}

/// Evenly spaced values in the half-open interval `[start, stop)`
///
/// The length is `ceil((stop - start) / step)`, so floating point rounding may produce one value
/// at or slightly past `stop - step`, the same way numerical libraries usually behave.
///
/// # Examples
/// ```
/// assert_eq!(arange(0., 900., 300.).unwrap(), vec![0., 300., 600.]);
/// ```
pub fn arange(start: f64, stop: f64, step: f64) -> TecResult<Vec<f64>> {
    if !(step > 0.0) || !step.is_finite() {
        return Err(TecError::InvalidParameter(format!("Step must be positive and finite, got {step}")));
    }
    if !start.is_finite() || !stop.is_finite() {
        return Err(TecError::InvalidParameter(format!("Range [{start}, {stop}) is not finite")));
    }
    let n = ((stop - start) / step).ceil().max(0.0) as usize;

    Ok((0..n).map(|i| start + i as f64 * step).collect())
}

/// Parse a datetime string in one of the accepted formats
pub fn parse_datetime(text: &str) -> TecResult<NaiveDateTime> {
    let text = text.trim();
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(datetime);
        }
    }
    Err(TecError::Time(format!("Could not parse datetime: '{text}'")))
}

/// Format a datetime the way it is written to CSV outputs
pub fn format_datetime(datetime: &NaiveDateTime) -> String {
    datetime.format(DATETIME_FORMAT).to_string()
}

/// Floor a datetime to a multiple of `bucket_seconds` since UNIX epoch
pub fn floor_datetime(datetime: &NaiveDateTime, bucket_seconds: i64) -> NaiveDateTime {
    if bucket_seconds <= 1 {
        return *datetime;
    }
    let offset = datetime.timestamp().rem_euclid(bucket_seconds);

    *datetime - Duration::seconds(offset) - Duration::nanoseconds(datetime.timestamp_subsec_nanos() as i64)
}

/// Seconds elapsed from `start` to `end` (negative if `end` is earlier)
pub fn seconds_between(start: &NaiveDateTime, end: &NaiveDateTime) -> f64 {
    let delta = end.signed_duration_since(*start);
    match delta.num_microseconds() {
        Some(us) => us as f64 * 1e-6,
        None => delta.num_seconds() as f64,
    }
}

/// Shift a datetime by a (possibly fractional) number of seconds
pub fn add_seconds(datetime: &NaiveDateTime, seconds: f64) -> NaiveDateTime {
    *datetime + Duration::milliseconds((seconds * 1000.).round() as i64)
}

/// Parse a human readable duration such as "5 min" or "300 s" into seconds
pub fn parse_seconds(text: &str) -> Result<f64, String> {
    match parse_duration::parse(text) {
        Ok(d) => Ok(d.as_secs_f64()),
        Err(e) => Err(format!("Error parsing duration '{}': {:?}", text, e)),
    }
}

/// Parse a comma separated "min,max" pair and order it
pub fn parse_range(text: &str) -> Result<(f64, f64), String> {
    let parts = text.split(',').map(|s| s.trim()).collect::<Vec<&str>>();
    if parts.len() != 2 {
        return Err(format!("Expected two comma separated values, got '{}'", text));
    }
    let first: f64 = parts[0].parse().map_err(|_| format!("Could not parse '{}' as a number", parts[0]))?;
    let second: f64 = parts[1].parse().map_err(|_| format!("Could not parse '{}' as a number", parts[1]))?;

    Ok((first.min(second), first.max(second)))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    #[test]
    fn test_interpolate_between_known() {
        let known_xy0 = (0_f64, 0_f64);
        let known_xy1 = (5_f64, 10_f64);

        assert_eq!(super::interpolate_between_known(known_xy0, known_xy1, 2.5), 5.0)
    }

    #[test]
    fn test_interpolate_values() {
        let coord0 = vec![0_f64, 0_f64, 0_f64];
        let time0 = 0_f64;

        let coord1 = vec![5_f64, 10_f64, 15_f64];
        let time1 = 1_f64;

        assert_eq!(super::interpolate_values(time0, &coord0, time1, &coord1, 0.5), vec![2.5, 5.0, 7.5])
    }

    #[test]
    fn test_arange() {
        assert_eq!(super::arange(0., 900., 300.).unwrap(), vec![0., 300., 600.]);
        assert_eq!(super::arange(59., 61.5, 1.).unwrap(), vec![59., 60., 61.]);
        assert!(super::arange(5., 0., 1.).unwrap().is_empty());
        assert!(super::arange(0., 1., 0.).is_err());
        assert!(super::arange(0., f64::NAN, 1.).is_err());
    }

    #[test]
    fn test_parse_datetime() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(12, 5, 30).unwrap();

        assert_eq!(super::parse_datetime("2023-01-20 12:05:30").unwrap(), expected);
        assert_eq!(super::parse_datetime("2023-01-20T12:05:30").unwrap(), expected);
        assert_eq!(super::parse_datetime(" 2023-01-20 12:05:30.000 ").unwrap(), expected);
        assert!(super::parse_datetime("20.1.2023").is_err());

        assert_eq!(super::format_datetime(&expected), "2023-01-20 12:05:30");
    }

    #[test]
    fn test_floor_datetime() {
        let datetime = NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(12, 7, 59).unwrap();

        assert_eq!(
            super::floor_datetime(&datetime, 300),
            NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(12, 5, 0).unwrap()
        );
        assert_eq!(
            super::floor_datetime(&datetime, 60),
            NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(12, 7, 0).unwrap()
        );
        assert_eq!(super::floor_datetime(&datetime, 0), datetime);
    }

    #[test]
    fn test_seconds_between() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 20).unwrap().and_hms_opt(23, 59, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 1, 21).unwrap().and_hms_opt(0, 4, 0).unwrap();

        assert_eq!(super::seconds_between(&start, &end), 300.);
        assert_eq!(super::seconds_between(&end, &start), -300.);
        assert_eq!(super::add_seconds(&start, 300.), end);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(super::parse_seconds("5 min"), Ok(300.));
        assert_eq!(super::parse_seconds("300s"), Ok(300.));
        assert!(super::parse_seconds("five minutes").is_err());
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(super::parse_range("59,71"), Ok((59., 71.)));
        assert_eq!(super::parse_range("32, 19"), Ok((19., 32.)));
        assert!(super::parse_range("59").unwrap_err().contains("two comma separated"));
        assert!(super::parse_range("a,1").unwrap_err().contains("Could not parse"));
    }
}
