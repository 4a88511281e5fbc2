/// Navigation log parsing and position lookup
///
/// A navigation log is a whitespace-delimited text file with one GPS fix per
/// row: a compact timestamp, latitude and longitude, and optionally line,
/// FFID, shot and CDP numbers. The column layout and the number of preamble
/// rows vary per survey, so both are caller-configurable.
use std::error::Error;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::coords::Coord;
use crate::tools;

/// One row of a navigation log
#[derive(Debug, Clone)]
pub struct NavPoint {
    /// UTC seconds since epoch, NaN when the log carries no time column
    pub time_seconds: f64,
    /// WGS84 latitude in degrees, NaN when missing
    pub lat: f64,
    /// WGS84 longitude in degrees, NaN when missing
    pub lon: f64,
    /// Trailing number of the line identifier (e.g. "107" from "l-4-90-107")
    pub line: Option<String>,
    pub ffid: Option<i64>,
    pub shot: Option<i64>,
    pub cdp: Option<i64>,
}

impl NavPoint {
    pub fn coord(&self) -> Coord {
        Coord {
            x: self.lon,
            y: self.lat,
        }
    }

    fn has_position(&self) -> bool {
        self.lat.is_finite() & self.lon.is_finite()
    }
}

/// The meaning of one whitespace-delimited navigation file column
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NavColumn {
    Time,
    Lat,
    Lon,
    Line,
    Ffid,
    Shot,
    Cdp,
    /// An ignored column ("?")
    Skip,
}

/// Parse a comma separated column layout, e.g. "time,lat,lon,line,?,shot,cdp"
pub fn parse_columns(text: &str) -> Result<Vec<NavColumn>, String> {
    let mut columns = Vec::new();
    for name in text.split(',') {
        columns.push(match name.trim().to_lowercase().as_str() {
            "time" | "datetime" => NavColumn::Time,
            "lat" | "latitude" => NavColumn::Lat,
            "lon" | "longitude" => NavColumn::Lon,
            "line" => NavColumn::Line,
            "ffid" => NavColumn::Ffid,
            "shot" => NavColumn::Shot,
            "cdp" => NavColumn::Cdp,
            "?" | "skip" => NavColumn::Skip,
            other => return Err(format!("Unrecognized navigation column name: {other}")),
        });
    }

    for required in [NavColumn::Lat, NavColumn::Lon] {
        if !columns.contains(&required) {
            return Err(format!("Column layout is missing {required:?}: {text}"));
        }
    }
    Ok(columns)
}

/// Parse a compact GPS timestamp: YYYYJJJHHMMSS with an optional tenths digit
///
/// YYYY is the year, JJJ the julian (ordinal) day. The tenths digit is kept
/// as a fraction of a second.
pub fn parse_compact_datetime(text: &str) -> Result<f64, String> {
    let digits = text.trim();

    if !((digits.len() == 13) | (digits.len() == 14)) | !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Unparseable compact datetime: {text}"));
    }

    let parse = |range: std::ops::Range<usize>| digits[range].parse::<u32>().unwrap();

    let year = parse(0..4) as i32;
    let day = parse(4..7);
    let hour = parse(7..9);
    let minute = parse(9..11);
    let second = parse(11..13);
    let tenths = match digits.len() == 14 {
        true => parse(13..14) as f64 / 10.,
        false => 0.,
    };

    let datetime = chrono::NaiveDate::from_yo_opt(year, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or(format!("Compact datetime out of range: {text}"))?;

    Ok(datetime.and_utc().timestamp() as f64 + tenths)
}

/// A full navigation log, sorted by time where time is available
#[derive(Debug, Clone)]
pub struct NavLog {
    pub path: PathBuf,
    pub points: Vec<NavPoint>,
}

impl NavLog {
    /// Load a navigation log from a whitespace-delimited text file
    ///
    /// Rows with fewer fields than the column layout are skipped. A lat or
    /// lon field of "NaN" (or an unparseable number) yields a point without a
    /// position, which [`NavLog::fill_missing`] can later interpolate.
    pub fn load(path: &Path, skip_rows: usize, columns: &[NavColumn]) -> Result<NavLog, Box<dyn Error>> {
        let content = std::fs::read_to_string(path)?;

        let mut points = Vec::<NavPoint>::new();

        for (line_n, line) in content.lines().enumerate().skip(skip_rows) {
            let fields: Vec<&str> = line.split_whitespace().collect();

            if fields.len() < columns.len() {
                if !fields.is_empty() {
                    debug!("{path:?}:{}: skipping row with {} fields", line_n + 1, fields.len());
                }
                continue;
            }

            let mut point = NavPoint {
                time_seconds: f64::NAN,
                lat: f64::NAN,
                lon: f64::NAN,
                line: None,
                ffid: None,
                shot: None,
                cdp: None,
            };

            for (column, field) in columns.iter().zip(&fields) {
                match column {
                    NavColumn::Time => point.time_seconds = parse_compact_datetime(field)?,
                    NavColumn::Lat => point.lat = field.parse().unwrap_or(f64::NAN),
                    NavColumn::Lon => point.lon = field.parse().unwrap_or(f64::NAN),
                    NavColumn::Line => {
                        point.line = field.rsplit('-').next().map(|part| part.to_string())
                    }
                    NavColumn::Ffid => point.ffid = field.parse().ok(),
                    NavColumn::Shot => point.shot = field.parse().ok(),
                    NavColumn::Cdp => point.cdp = field.parse().ok(),
                    NavColumn::Skip => (),
                }
            }
            points.push(point);
        }

        let mut log = NavLog {
            path: path.to_path_buf(),
            points,
        };
        log.sort_and_dedup();
        Ok(log)
    }

    /// Sort by time and drop repeated timestamps which would break interpolation
    fn sort_and_dedup(&mut self) {
        if !self.points.iter().any(|point| point.time_seconds.is_finite()) {
            return;
        }
        self.points
            .sort_by(|a, b| a.time_seconds.partial_cmp(&b.time_seconds).unwrap_or(std::cmp::Ordering::Equal));

        // Equal timestamps on the same line would make interpolation divide
        // by zero. Different lines may legitimately share a timestamp.
        let before = self.points.len();
        let mut last: Option<(f64, Option<String>)> = None;
        self.points.retain(|point| {
            let keep = match &last {
                Some((time, line)) => !((point.time_seconds == *time) & (point.line == *line)),
                None => true,
            };
            last = Some((point.time_seconds, point.line.clone()));
            keep
        });
        if self.points.len() != before {
            debug!(
                "{:?}: dropped {} rows with repeated timestamps",
                self.path,
                before - self.points.len()
            );
        }
    }

    /// The points that have both a time and a position
    fn timed_points(&self) -> Vec<&NavPoint> {
        self.points
            .iter()
            .filter(|point| point.time_seconds.is_finite() & point.has_position())
            .collect()
    }

    /// Interpolate the geographic position at a UTC epoch time
    ///
    /// Positions are linearly interpolated between the two bracketing fixes,
    /// and linearly extrapolated from the edge segment outside the logged
    /// span. None is returned when fewer than two timed fixes exist.
    pub fn position_at_time(&self, time_seconds: f64) -> Option<Coord> {
        let points = self.timed_points();
        if points.len() < 2 {
            return None;
        }

        // The segment to inter-/extrapolate on
        let after = points.partition_point(|point| point.time_seconds < time_seconds);
        let (first, second) = match after {
            0 => (&points[0], &points[1]),
            i if i >= points.len() => (&points[points.len() - 2], &points[points.len() - 1]),
            i => (&points[i - 1], &points[i]),
        };

        if first.time_seconds == second.time_seconds {
            return Some(first.coord());
        }

        let lon = tools::interpolate_between_known(
            (first.time_seconds, first.lon),
            (second.time_seconds, second.lon),
            time_seconds,
        );
        let lat = tools::interpolate_between_known(
            (first.time_seconds, first.lat),
            (second.time_seconds, second.lat),
            time_seconds,
        );

        Some(Coord { x: lon, y: lat })
    }

    /// Find the position of a shot number, as recorded in the shot column
    ///
    /// A shot that is missing from the log is patched with the mean position
    /// of its two neighbouring shots when at least one of them exists.
    pub fn position_at_shot(&self, shot: i64) -> Option<Coord> {
        let shot_points: Vec<&NavPoint> = self
            .points
            .iter()
            .filter(|point| point.shot.is_some() & point.has_position())
            .collect();

        if let Some(point) = shot_points.iter().find(|point| point.shot == Some(shot)) {
            return Some(point.coord());
        }

        // Take the mean of the shot locations before and after the missing one
        let neighbors: Vec<&&NavPoint> = shot_points
            .iter()
            .filter(|point| {
                let other = point.shot.unwrap();
                (other >= shot - 1) & (other <= shot + 1)
            })
            .collect();

        if neighbors.is_empty() {
            return None;
        }

        let mut mean = Coord { x: 0., y: 0. };
        for point in &neighbors {
            mean.x += point.lon;
            mean.y += point.lat;
        }
        mean.x /= neighbors.len() as f64;
        mean.y /= neighbors.len() as f64;
        Some(mean)
    }

    /// Whether any point carries a shot number
    pub fn has_shots(&self) -> bool {
        self.points.iter().any(|point| point.shot.is_some())
    }

    /// The (first, last) time of the timed points
    pub fn time_span(&self) -> Option<(f64, f64)> {
        let points = self.timed_points();
        match points.len() {
            0 => None,
            n => Some((points[0].time_seconds, points[n - 1].time_seconds)),
        }
    }

    /// The points belonging to one line identifier
    pub fn subset_line(&self, line: &str) -> NavLog {
        NavLog {
            path: self.path.clone(),
            points: self
                .points
                .iter()
                .filter(|point| point.line.as_deref() == Some(line))
                .cloned()
                .collect(),
        }
    }

    /// Interpolate the position of points that are missing lat/lon
    ///
    /// Each incomplete point is filled parametrically over time from the
    /// complete points of the same line (all complete points when the log has
    /// no line column). Lines with fewer than two complete points are left
    /// alone with a warning.
    ///
    /// # Returns
    /// The number of points that were filled.
    pub fn fill_missing(&mut self) -> usize {
        let complete = NavLog {
            path: self.path.clone(),
            points: self.points.iter().filter(|point| point.has_position()).cloned().collect(),
        };

        let mut n_filled = 0_usize;
        for i in 0..self.points.len() {
            if self.points[i].has_position() | !self.points[i].time_seconds.is_finite() {
                continue;
            }

            let reference = match &self.points[i].line {
                Some(line) => complete.subset_line(line),
                None => complete.clone(),
            };

            match reference.position_at_time(self.points[i].time_seconds) {
                Some(coord) => {
                    self.points[i].lon = coord.x;
                    self.points[i].lat = coord.y;
                    n_filled += 1;
                }
                None => warn!(
                    "{:?}: point at {} cannot be filled; fewer than two complete points on its line",
                    self.path,
                    tools::seconds_to_rfc3339(self.points[i].time_seconds)
                ),
            }
        }
        n_filled
    }

    /// Write the log as CSV
    pub fn to_csv(&self, filepath: &Path) -> Result<(), std::io::Error> {
        let mut output = "time,lat,lon,line,ffid,shot,cdp\n".to_string();

        let fmt_opt = |value: &Option<i64>| value.map(|v| v.to_string()).unwrap_or_default();

        for point in &self.points {
            output += &format!(
                "{},{:.5},{:.5},{},{},{},{}\n",
                tools::seconds_to_rfc3339(point.time_seconds),
                point.lat,
                point.lon,
                point.line.clone().unwrap_or_default(),
                fmt_opt(&point.ffid),
                fmt_opt(&point.shot),
                fmt_opt(&point.cdp),
            );
        }

        std::fs::write(filepath, output)
    }
}

impl std::fmt::Display for NavLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timed = self.timed_points();
        let (start, stop) = match self.time_span() {
            Some((start, stop)) => (tools::seconds_to_rfc3339(start), tools::seconds_to_rfc3339(stop)),
            None => ("-".to_string(), "-".to_string()),
        };

        let positioned: Vec<&NavPoint> = self.points.iter().filter(|p| p.has_position()).collect();
        let mut lat_range = (f64::INFINITY, f64::NEG_INFINITY);
        let mut lon_range = (f64::INFINITY, f64::NEG_INFINITY);
        for point in &positioned {
            lat_range = (lat_range.0.min(point.lat), lat_range.1.max(point.lat));
            lon_range = (lon_range.0.min(point.lon), lon_range.1.max(point.lon));
        }

        write!(
            f,
            "
Navigation log
--------------
Filepath:\t\t{:?}
Points:\t\t\t{} ({} with time and position)
Start time:\t\t{}
Stop time:\t\t{}
Latitude range:\t\t{:.5} - {:.5}
Longitude range:\t{:.5} - {:.5}
Shot numbers:\t\t{}
",
            self.path,
            self.points.len(),
            timed.len(),
            start,
            stop,
            lat_range.0,
            lat_range.1,
            lon_range.0,
            lon_range.1,
            match self.has_shots() {
                true => "yes",
                false => "no",
            },
        )
    }
}
