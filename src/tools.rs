/// Miscellaneous functions that are used in other parts of the program
use core::ops::{Add, Div, Mul, Sub};
use std::hash::Hash;
use std::str::FromStr;

use ndarray::Array1;

/// Interpolate linearly between two known points
///
/// https://en.wikipedia.org/wiki/Linear_interpolation#Linear_interpolation_between_two_known_points
///
/// The formula extrapolates linearly when `x` lies outside the two known points.
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

/// Derive the most common value of an iterator of values
///
/// Ties are broken by the lowest value.
///
/// # Arguments
/// - `values`: An iterator of hashable values
///
/// # Returns
/// The modal value, or None if the iterator is empty.
pub fn mode<T: Eq + Ord + Hash + Copy, I>(values: I) -> Option<T>
where
    I: IntoIterator<Item = T>,
{
    let mut counts = std::collections::HashMap::<T, usize>::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(value, _)| value)
}

/// Smooth a series with a centered Hamming-weighted running mean
///
/// Edge windows are truncated to the available samples and the weights are
/// renormalized, so the output has the same length as the input
/// (`min_periods=1` semantics).
///
/// # Arguments
/// - `values`: The series to smooth
/// - `window`: The full window width in samples
///
/// # Returns
/// The smoothed series.
pub fn rolling_mean_hamming(values: &Array1<f64>, window: usize) -> Array1<f64> {
    if (window < 2) | (values.len() < 2) {
        return values.clone();
    }

    let weights: Vec<f64> = (0..window)
        .map(|k| 0.54 - 0.46 * (2. * std::f64::consts::PI * k as f64 / (window - 1) as f64).cos())
        .collect();

    let half_before = (window - 1) / 2;

    let mut smoothed = Array1::<f64>::zeros(values.len());
    for i in 0..values.len() {
        let start = i.saturating_sub(half_before);
        let end = (start + window).min(values.len());

        let mut value_sum = 0_f64;
        let mut weight_sum = 0_f64;
        for j in start..end {
            let weight = weights[j - start];
            value_sum += weight * values[j];
            weight_sum += weight;
        }
        smoothed[i] = value_sum / weight_sum;
    }
    smoothed
}

/// Convert numbers of seconds since UNIX epoch into an RFC3339 datetime string in UTC
///
/// # Arguments
/// - `seconds`: The number of seconds since UNIX epoch
///
/// # Returns
/// A string representation of the datetime
pub fn seconds_to_rfc3339(seconds: f64) -> String {
    // NaN would silently cast to the 1970 epoch below
    if !seconds.is_finite() {
        return format!("<invalid timestamp: {seconds}>");
    }
    chrono::DateTime::<chrono::Utc>::from_timestamp(seconds as i64, (seconds.fract() * 1e9) as u32)
        .map(|datetime| datetime.to_rfc3339())
        .unwrap_or_else(|| format!("<invalid timestamp: {seconds}>"))
}

/// Parse a user-supplied list of processing steps
///
/// The string is either a comma separated list ("a,b,c") or the filepath of a
/// newline separated step file. Empty entries and "#"-prefixed comment lines
/// are skipped.
///
/// # Arguments
/// - `string`: The list or filepath to parse
///
/// # Returns
/// The individual step strings.
pub fn parse_step_list(string: &str) -> Result<Vec<String>, String> {
    let content = match std::path::Path::new(string.trim()).is_file() {
        true => std::fs::read_to_string(string.trim())
            .map_err(|e| format!("Error reading step file {string}: {e}"))?
            .lines()
            .map(|line| line.to_string())
            .collect::<Vec<String>>(),
        false => string.split(',').map(|part| part.to_string()).collect(),
    };

    Ok(content
        .iter()
        .map(|step| step.trim().to_string())
        .filter(|step| !step.is_empty() & !step.starts_with('#'))
        .collect())
}

/// Parse the options (arguments) of a user-supplied step
///
/// # Arguments
/// - `string`: The string to parse
/// - `argument_index`: The expected index of the argument
///
/// # Returns
/// - Ok(Some(x)) where x is the successfully parsed argument
/// - Ok(None) if there is no argument in the string
/// - Err(e) if the argument could not be parsed
pub fn parse_option<T: FromStr>(string: &str, argument_index: usize) -> Result<Option<T>, String> {
    match string.split_once('(') {
        None => Ok(None),
        Some((_, first_part)) => {
            match first_part.split_once(')') {
                Some((within_parentheses, _)) => {
                    // Replace has to be run twice, as it may be an odd number of whitespaces:
                    // "_-_-_" => "_-_" => "_"
                    let removed_consecutive_whitespace =
                        within_parentheses.replace("  ", " ").replace("  ", " ");

                    let arguments = removed_consecutive_whitespace.split(' ').collect::<Vec<&str>>();

                    match arguments.get(argument_index) {
                        Some(s) => match s.trim().parse::<T>() {
                            Ok(v) => Ok(Some(v)),
                            Err(_) => Err(format!(
                                "Could not parse argument {} as value in string {}: {}",
                                argument_index, string, s
                            )),
                        },
                        None => Err(format!(
                            "Argument {} out of bounds in string: {}",
                            argument_index, string
                        )),
                    }
                }
                None => Err(format!("String: {} has opening parenthesis but not closing", string)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;

    #[test]
    fn test_interpolate_between_known() {
        let known_xy0 = (0_f64, 0_f64);
        let known_xy1 = (5_f64, 10_f64);

        assert_eq!(super::interpolate_between_known(known_xy0, known_xy1, 2.5), 5.0);

        // The formula extrapolates outside the known span
        assert_eq!(super::interpolate_between_known(known_xy0, known_xy1, 10.), 20.0);
        assert_eq!(super::interpolate_between_known(known_xy0, known_xy1, -5.), -10.0);
    }

    #[test]
    fn test_mode() {
        assert_eq!(super::mode(vec![131, 131, 132, 131, 0]), Some(131));
        assert_eq!(super::mode(Vec::<i64>::new()), None);
        // Ties resolve to the lowest value
        assert_eq!(super::mode(vec![2, 1, 2, 1]), Some(1));
    }

    #[test]
    fn test_rolling_mean_hamming() {
        let constant = Array1::from_elem(20, 5_f64);
        let smoothed = super::rolling_mean_hamming(&constant, 10);

        assert_eq!(smoothed.len(), constant.len());
        for value in smoothed {
            assert!((value - 5.).abs() < 1e-9);
        }

        // A linear ramp stays close to linear in the interior of the window
        let ramp = Array1::from_iter((0..50).map(|i| i as f64));
        let smoothed = super::rolling_mean_hamming(&ramp, 5);
        for i in 5..45 {
            assert!((smoothed[i] - ramp[i]).abs() < 0.5, "{} vs {}", smoothed[i], ramp[i]);
        }

        // A window of 1 is a no-op
        assert_eq!(super::rolling_mean_hamming(&ramp, 1), ramp);
    }

    #[test]
    fn test_seconds_to_rfc3339() {
        let seconds = 1_600_000_000_f64;

        assert_eq!(super::seconds_to_rfc3339(seconds), "2020-09-13T12:26:40+00:00");

        // A timeless point must not print as the 1970 epoch
        assert!(super::seconds_to_rfc3339(f64::NAN).contains("invalid timestamp"));
        assert!(super::seconds_to_rfc3339(f64::INFINITY).contains("invalid timestamp"));
    }

    #[test]
    fn test_parse_step_list() {
        assert_eq!(
            super::parse_step_list("positions_from_time, smooth_track(10)"),
            Ok(vec!["positions_from_time".to_string(), "smooth_track(10)".to_string()])
        );
        assert_eq!(super::parse_step_list(""), Ok(vec![]));
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(super::parse_option::<u32>("smooth_track", 0), Ok(None));
        assert_eq!(super::parse_option::<u32>("smooth_track(10)", 0), Ok(Some(10_u32)));
        assert_eq!(super::parse_option::<f32>("force_day(1 2.0)", 1), Ok(Some(2_f32)));
        assert_eq!(super::parse_option::<i64>("force_day(1  -2)", 1), Ok(Some(-2_i64)));

        assert!(super::parse_option::<f32>("smooth_track(", 0)
            .unwrap_err()
            .contains("opening parenthesis but not closing"));
        assert!(super::parse_option::<f32>("smooth_track(1)", 1)
            .unwrap_err()
            .contains("Argument 1 out of bounds"));
        assert!(super::parse_option::<f32>("smooth_track(1 1,1)", 1)
            .unwrap_err()
            .contains("Could not parse argument 1"));
    }
}
