/// The per-file repair pipeline: correlate trace headers with the navigation
/// log and write repaired source positions back into the SEG-Y file.
use std::error::Error;
use std::path::PathBuf;
use std::time::SystemTime;

use log::{info, warn};
use ndarray::Array1;
use rayon::prelude::*;

use crate::coords::{self, Coord, Crs, UtmCrs, COORD_SCALAR};
use crate::nav::{NavColumn, NavLog};
use crate::segy::{SegyFile, TraceField};
use crate::tools;

const DEFAULT_SMOOTH_WINDOW: usize = 10;
pub const DEFAULT_CENTURY: i32 = 1900;

/// All run parameters of the program
pub struct RunParams {
    pub filepaths: Vec<PathBuf>,
    pub nav_path: PathBuf,
    pub nav_skip_rows: usize,
    pub nav_columns: Vec<NavColumn>,
    pub crs: String,
    pub century: i32,
    pub steps: Vec<String>,
    pub only_info: bool,
    pub dry_run: bool,
    pub track_path: Option<Option<PathBuf>>,
    pub fill_nav_path: Option<PathBuf>,
}

/// Run the main repair functionality based on the given parameters
pub fn run(params: RunParams) -> Result<(), Box<dyn Error>> {
    let mut nav = NavLog::load(&params.nav_path, params.nav_skip_rows, &params.nav_columns)?;

    let n_filled = nav.fill_missing();
    if n_filled > 0 {
        info!("Filled {} navigation points without a position", n_filled);
    }
    if let Some(filepath) = &params.fill_nav_path {
        nav.to_csv(filepath)?;
        info!("Wrote completed navigation log to {:?}", filepath);
    }

    let crs = parse_crs_or_auto(&params.crs, &nav)?;

    if params.filepaths.is_empty() {
        return match params.fill_nav_path.is_some() {
            true => Ok(()),
            false => Err("No input files found for the given filepath".into()),
        };
    }

    if params.only_info {
        println!("{}", nav);
        for filepath in &params.filepaths {
            let segy = SegyFile::open(filepath)?;
            let survey = Survey::new(segy, &nav, &crs, params.century);
            println!("{}", survey);
        }
        return Ok(());
    }

    let results: Vec<(PathBuf, Result<(), String>)> = params
        .filepaths
        .par_iter()
        .map(|filepath| (filepath.clone(), process_file(filepath, &nav, &crs, &params)))
        .collect();

    let mut n_failed = 0_usize;
    for (filepath, result) in results {
        if let Err(e) = result {
            warn!("{:?} failed: {}", filepath, e);
            n_failed += 1;
        }
    }

    match n_failed {
        0 => Ok(()),
        n => Err(format!("{} file(s) failed to process", n).into()),
    }
}

/// Parse the user CRS, or derive the optimal UTM zone from the first fix
fn parse_crs_or_auto(crs: &str, nav: &NavLog) -> Result<Crs, String> {
    if crs.trim().to_lowercase() == "auto" {
        let first = nav
            .points
            .iter()
            .find(|point| point.lat.is_finite() & point.lon.is_finite())
            .ok_or("Cannot derive a CRS: the navigation log has no positioned points")?;

        let utm = UtmCrs::optimal_crs(&first.coord());
        info!("Deriving CRS from the navigation log: {}", utm.to_epsg_str());
        return Ok(Crs::Utm(utm));
    }
    Crs::from_user_input(crs)
}

/// Repair a single SEG-Y file
fn process_file(filepath: &PathBuf, nav: &NavLog, crs: &Crs, params: &RunParams) -> Result<(), String> {
    let start_time = SystemTime::now();
    info!("Processing {:?}", filepath);

    let segy = SegyFile::open(filepath).map_err(|e| e.to_string())?;
    let mut survey = Survey::new(segy, nav, crs, params.century);

    for step in &params.steps {
        survey.process(step).map_err(|e| e.to_string())?;
    }

    if let Some(potential_track_path) = &params.track_path {
        let track_path = potential_track_path
            .clone()
            .unwrap_or_else(|| filepath.with_extension("").with_extension("track.csv"));
        survey.track_to_csv(&track_path).map_err(|e| e.to_string())?;
        info!("Wrote track to {:?}", track_path);
    }

    match params.dry_run {
        true => info!("Dry run: {:?} left unmodified", filepath),
        false => {
            let n_written = survey.segy.save().map_err(|e| e.to_string())?;
            info!("Wrote {} modified trace headers to {:?}", n_written, filepath);
        }
    }

    for line in &survey.log {
        info!("{:?}: {}", filepath, line);
    }
    info!(
        "{:?} done in {:.2} s",
        filepath,
        SystemTime::now()
            .duration_since(start_time)
            .unwrap_or_default()
            .as_secs_f32()
    );
    Ok(())
}

/// One SEG-Y file tied to the navigation log that repairs it
pub struct Survey<'a> {
    pub segy: SegyFile,
    nav: &'a NavLog,
    crs: &'a Crs,
    century: i32,
    forced_day: Option<u32>,
    pub log: Vec<String>,
}

impl<'a> Survey<'a> {
    pub fn new(segy: SegyFile, nav: &'a NavLog, crs: &'a Crs, century: i32) -> Survey<'a> {
        Survey {
            segy,
            nav,
            crs,
            century,
            forced_day: None,
            log: Vec::new(),
        }
    }

    /// Run one named processing step
    pub fn process(&mut self, step_name: &str) -> Result<(), Box<dyn Error>> {
        if step_name.contains("positions_from_time") {
            self.positions_from_time()?;
        } else if step_name.contains("positions_from_shot") {
            let line = tools::parse_option::<String>(step_name, 0)?;
            self.positions_from_shot(line.as_deref())?;
        } else if step_name.contains("smooth_track") {
            let window = tools::parse_option::<usize>(step_name, 0)?.unwrap_or(DEFAULT_SMOOTH_WINDOW);
            self.smooth_track(window);
        } else if step_name.contains("force_day") {
            let day = match tools::parse_option::<u32>(step_name, 0)? {
                Some(v) => Ok(v),
                None => Err("The julian day must be specified when forcing it. E.g. force_day(131)".to_string()),
            }?;
            self.force_day(day);
        } else {
            return Err(format!("Step name not recognized: {}", step_name).into());
        }

        Ok(())
    }

    /// Override the julian day of every trace for subsequent time decoding
    ///
    /// For files whose DayOfYear field is systematically wrong.
    pub fn force_day(&mut self, day: u32) {
        let start_time = SystemTime::now();
        self.forced_day = Some(day);
        self.log_event("force_day", &format!("Overriding the julian day of all traces with {}", day), start_time);
    }

    /// Decode the recording time of every trace header
    ///
    /// A trace yields None when its time fields are corrupt: a zero year, a
    /// julian day more than one day away from the file's modal julian day, or
    /// an out-of-range hour/minute/second. Two-digit years are expanded with
    /// the century base. Seconds fields with extra precision digits appended
    /// (e.g. 3012 for 30.12 s) are truncated to whole seconds.
    pub fn trace_times(&self) -> Vec<Option<f64>> {
        let years = self.segy.get_all(TraceField::Year);
        let days = self.segy.get_all(TraceField::DayOfYear);
        let hours = self.segy.get_all(TraceField::Hour);
        let minutes = self.segy.get_all(TraceField::Minute);
        let seconds = self.segy.get_all(TraceField::Second);

        let modal_day = tools::mode(
            days.iter()
                .zip(&years)
                .filter(|(_, year)| **year != 0)
                .map(|(day, _)| *day),
        );

        let mut times = Vec::<Option<f64>>::with_capacity(years.len());
        for i in 0..years.len() {
            if years[i] <= 0 {
                times.push(None);
                continue;
            }
            let year = match years[i] < 100 {
                true => self.century + years[i],
                false => years[i],
            };

            let day = match self.forced_day {
                Some(forced) => forced,
                None => {
                    // Reject julian-day outliers (garbage headers)
                    if let Some(modal) = modal_day {
                        if (days[i] - modal).abs() > 1 {
                            warn!("Trace {}: julian day {} far from modal day {}", i, days[i], modal);
                            times.push(None);
                            continue;
                        }
                    }
                    if days[i] <= 0 {
                        times.push(None);
                        continue;
                    }
                    days[i] as u32
                }
            };

            if (hours[i] > 23) | (hours[i] < 0) {
                warn!("Trace {}: hour error ({})", i, hours[i]);
                times.push(None);
                continue;
            }
            if (minutes[i] > 59) | (minutes[i] < 0) {
                warn!("Trace {}: minute error ({})", i, minutes[i]);
                times.push(None);
                continue;
            }
            let second = match seconds[i] {
                s if (0..60).contains(&s) => s,
                // Extra precision digits appended to the seconds field
                s if (s >= 100) & ((s / 100) < 60) => s / 100,
                s => {
                    warn!("Trace {}: second error ({})", i, s);
                    times.push(None);
                    continue;
                }
            };

            let datetime = chrono::NaiveDate::from_yo_opt(year, day)
                .and_then(|date| date.and_hms_opt(hours[i] as u32, minutes[i] as u32, second as u32));

            times.push(datetime.map(|dt| dt.and_utc().timestamp() as f64));
        }
        times
    }

    /// Assign source positions by correlating trace times with the log
    ///
    /// Valid traces get their interpolated, projected and fixed-point encoded
    /// position in SourceX/SourceY with a -100 scalar. Corrupt traces get
    /// their position fields zeroed instead.
    pub fn positions_from_time(&mut self) -> Result<(), Box<dyn Error>> {
        let start_time = SystemTime::now();

        let times = self.trace_times();

        let mut geographic = Vec::<Coord>::new();
        let mut matched = Vec::<usize>::new();
        for (i, time) in times.iter().enumerate() {
            if let Some(time) = time {
                if let Some(coord) = self.nav.position_at_time(*time) {
                    geographic.push(coord);
                    matched.push(i);
                }
            }
        }

        if geographic.is_empty() {
            return Err(format!(
                "{:?}: no trace could be correlated; the file has no usable trace times or the navigation log has too few timed fixes",
                self.segy.path
            )
            .into());
        }

        let projected = coords::from_wgs84(&geographic, self.crs)?;

        for (coord, &trace_n) in projected.iter().zip(&matched) {
            self.segy.set(trace_n, TraceField::SourceX, coords::encode_fixed_point(coord.x))?;
            self.segy.set(trace_n, TraceField::SourceY, coords::encode_fixed_point(coord.y))?;
            self.segy.set(trace_n, TraceField::SourceGroupScalar, COORD_SCALAR as i32)?;
        }

        // Zero out the traces that could not be correlated
        let mut n_zeroed = 0_usize;
        for (i, time) in times.iter().enumerate() {
            if time.is_none() {
                self.segy.set(i, TraceField::SourceX, 0)?;
                self.segy.set(i, TraceField::SourceY, 0)?;
                self.segy.set(i, TraceField::GroupX, 0)?;
                self.segy.set(i, TraceField::Inline3d, 0)?;
                n_zeroed += 1;
            }
        }

        self.log_event(
            "positions_from_time",
            &format!(
                "Assigned {} source positions from trace times; zeroed {} traces with corrupt time headers",
                matched.len(),
                n_zeroed
            ),
            start_time,
        );
        Ok(())
    }

    /// Assign source positions by matching trace FFIDs to the log's shot numbers
    ///
    /// Shot numbers restart per line, so when a line identifier is given the
    /// log is subset to that line before matching. Traces whose FFID is
    /// absent from the log (beyond the one-shot neighbour fallback) are left
    /// untouched.
    pub fn positions_from_shot(&mut self, line: Option<&str>) -> Result<(), Box<dyn Error>> {
        let start_time = SystemTime::now();

        let subset;
        let nav = match line {
            Some(line) => {
                subset = self.nav.subset_line(line);
                if subset.points.is_empty() {
                    return Err(format!("The navigation log has no points on line {}", line).into());
                }
                &subset
            }
            None => self.nav,
        };

        if !nav.has_shots() {
            return Err("The navigation log has no shot numbers; positions_from_shot needs a 'shot' column".into());
        }

        let ffids = self.segy.get_all(TraceField::FieldRecord);

        let mut geographic = Vec::<Coord>::new();
        let mut matched = Vec::<usize>::new();
        let mut n_missing = 0_usize;
        for (i, ffid) in ffids.iter().enumerate() {
            match nav.position_at_shot(*ffid as i64) {
                Some(coord) => {
                    geographic.push(coord);
                    matched.push(i);
                }
                None => {
                    warn!("No navigation for FFID {} (trace {})", ffid, i);
                    n_missing += 1;
                }
            }
        }

        if geographic.is_empty() {
            return Err(format!(
                "{:?}: no trace FFID matched the navigation log's shot numbers",
                self.segy.path
            )
            .into());
        }

        let projected = coords::from_wgs84(&geographic, self.crs)?;

        for (coord, &trace_n) in projected.iter().zip(&matched) {
            self.segy.set(trace_n, TraceField::SourceX, coords::encode_fixed_point(coord.x))?;
            self.segy.set(trace_n, TraceField::SourceY, coords::encode_fixed_point(coord.y))?;
            self.segy.set(trace_n, TraceField::SourceGroupScalar, COORD_SCALAR as i32)?;
        }

        self.log_event(
            "positions_from_shot",
            &format!(
                "Assigned {} source positions from FFID matches{}; {} FFIDs had no navigation",
                matched.len(),
                match line {
                    Some(line) => format!(" on line {}", line),
                    None => String::new(),
                },
                n_missing
            ),
            start_time,
        );
        Ok(())
    }

    /// Write a smoothed copy of the source track into the CDP X/Y fields
    ///
    /// The raw encoded SourceX/SourceY values are smoothed with a centered
    /// Hamming-weighted running mean, so the CDP fields end up in the same
    /// units and under the same scalar as the source fields.
    pub fn smooth_track(&mut self, window: usize) {
        let start_time = SystemTime::now();

        let xs = Array1::from_iter(self.segy.get_all(TraceField::SourceX).iter().map(|v| *v as f64));
        let ys = Array1::from_iter(self.segy.get_all(TraceField::SourceY).iter().map(|v| *v as f64));

        let xs_smooth = tools::rolling_mean_hamming(&xs, window);
        let ys_smooth = tools::rolling_mean_hamming(&ys, window);

        for i in 0..self.segy.n_traces() {
            // The setters only fail on out-of-bounds indices
            let _ = self.segy.set(i, TraceField::CdpX, xs_smooth[i].trunc() as i32);
            let _ = self.segy.set(i, TraceField::CdpY, ys_smooth[i].trunc() as i32);
        }

        self.log_event(
            "smooth_track",
            &format!("Smoothed the source track into CDP X/Y with a window of {} traces", window),
            start_time,
        );
    }

    /// The repaired track in planar units, honoring each trace's scalar
    pub fn track(&self) -> Vec<(usize, f64, f64)> {
        let mut track = Vec::with_capacity(self.segy.n_traces());
        for i in 0..self.segy.n_traces() {
            let scalar = self
                .segy
                .get(i, TraceField::SourceGroupScalar)
                .unwrap_or(0);
            let factor = match scalar {
                s if s < 0 => 1. / (-s as f64),
                0 => 1.,
                s => s as f64,
            };
            let x = self.segy.get(i, TraceField::SourceX).unwrap_or(0) as f64 * factor;
            let y = self.segy.get(i, TraceField::SourceY).unwrap_or(0) as f64 * factor;
            track.push((i, x, y));
        }
        track
    }

    pub fn track_to_csv(&self, filepath: &std::path::Path) -> Result<(), std::io::Error> {
        let mut output = "trace_n,x,y\n".to_string();

        for (trace_n, x, y) in self.track() {
            output += &format!("{},{:.2},{:.2}\n", trace_n, x, y);
        }

        std::fs::write(filepath, output)
    }

    /// Count the distinct steps between consecutive unique trace times
    ///
    /// A census far from "1 s x N" hints at header corruption.
    pub fn interval_census(&self) -> Vec<(i64, usize)> {
        let mut unique: Vec<i64> = self
            .trace_times()
            .iter()
            .flatten()
            .map(|time| *time as i64)
            .collect();
        unique.sort();
        unique.dedup();

        let mut census: Vec<(i64, usize)> =
            std::collections::HashMap::<i64, usize>::from_iter(unique.windows(2).map(|pair| (pair[1] - pair[0], 0)))
                .into_iter()
                .collect();
        for pair in unique.windows(2) {
            let diff = pair[1] - pair[0];
            if let Some(entry) = census.iter_mut().find(|(step, _)| *step == diff) {
                entry.1 += 1;
            }
        }
        census.sort();
        census
    }

    fn log_event(&mut self, step_name: &str, event: &str, start_time: SystemTime) {
        self.log.push(format!(
            "{} (duration: {:.2}s):\t{}",
            step_name,
            SystemTime::now()
                .duration_since(start_time)
                .unwrap_or_default()
                .as_secs_f32(),
            event
        ));
    }
}

impl std::fmt::Display for Survey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let times = self.trace_times();
        let valid: Vec<f64> = times.iter().flatten().copied().collect();

        let (start, stop) = match (valid.first(), valid.last()) {
            (Some(first), Some(last)) => (
                tools::seconds_to_rfc3339(*first),
                tools::seconds_to_rfc3339(*last),
            ),
            _ => ("-".to_string(), "-".to_string()),
        };

        let census = self
            .interval_census()
            .iter()
            .map(|(step, count)| format!("{} s x {}", step, count))
            .collect::<Vec<String>>()
            .join(", ");

        write!(
            f,
            "{}
Trace times
-----------
Valid traces:\t\t{} / {}
First trace time:\t{}
Last trace time:\t{}
Interval census:\t{}
CRS:\t\t\t{}
",
            self.segy,
            valid.len(),
            times.len(),
            start,
            stop,
            census,
            self.crs.name(),
        )
    }
}

/// All steps that [`Survey::process`] recognizes, with their descriptions
pub fn all_available_steps() -> Vec<[&'static str; 2]> {
    vec![
        ["positions_from_time", "Correlate each trace's header time with the navigation log, interpolate its position, project it and write it to SourceX/SourceY (fixed-point, scalar -100). Traces with corrupt time headers get their position fields zeroed."],
        ["positions_from_shot", "Match each trace's FFID against the navigation log's shot numbers and write the matched, projected position to SourceX/SourceY (fixed-point, scalar -100). Shot numbers restart per line, so give the file's line identifier when the log covers several lines, e.g. 'positions_from_shot(107)'. A missing shot is patched with the mean of its neighbouring shots; otherwise the trace is left untouched."],
        ["smooth_track", "Smooth the SourceX/SourceY track with a centered Hamming-weighted running mean and write it to CDP X/Y. The window size in traces can be given, e.g. 'smooth_track(10)'. Default: 10"],
        ["force_day", "Override the julian day of every trace before time decoding, for files whose DayOfYear field is systematically wrong. E.g. 'force_day(131)'. Must precede positions_from_time. No default value."],
    ]
}

pub fn default_processing_profile() -> Vec<String> {
    vec!["positions_from_time".to_string()]
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::coords::{self, Coord, Crs, UtmCrs};
    use crate::nav::{parse_columns, NavLog};
    use crate::segy::{tests::write_test_segy, SegyFile, TraceField};

    use super::Survey;

    /// A navigation log crossing Monterey Bay: one fix per minute
    fn write_test_nav(dir: &Path) -> PathBuf {
        let path = dir.join("nav.txt");
        std::fs::write(
            &path,
            "19901310000000 36.80000 -122.00000 101
19901310001000 36.80100 -122.00100 102
19901310002000 36.80200 -122.00200 104
19901310003000 36.80300 -122.00300 105
",
        )
        .unwrap();
        path
    }

    fn test_crs() -> Crs {
        Crs::Utm(UtmCrs {
            zone: 10,
            north: true,
        })
    }

    fn time_fields(day: i32, hour: i32, minute: i32, second: i32) -> Vec<(TraceField, i32)> {
        vec![
            (TraceField::Year, 90),
            (TraceField::DayOfYear, day),
            (TraceField::Hour, hour),
            (TraceField::Minute, minute),
            (TraceField::Second, second),
        ]
    }

    #[test]
    fn test_trace_times() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        let segy_path = write_test_segy(
            dir.path(),
            "times.sgy",
            10,
            &[
                time_fields(131, 0, 0, 0),
                time_fields(131, 0, 0, 30),
                // Extra precision digits in the seconds field
                time_fields(131, 0, 1, 3012),
                // Garbage: zero year, julian-day outlier, bad minute
                vec![(TraceField::Year, 0)],
                time_fields(200, 0, 0, 0),
                time_fields(131, 0, 75, 0),
            ],
        );

        let segy = SegyFile::open(&segy_path).unwrap();
        let survey = Survey::new(segy, &nav, &crs, 1900);

        let times = survey.trace_times();
        assert_eq!(times.len(), 6);

        let t0 = times[0].unwrap();
        assert_eq!(crate::tools::seconds_to_rfc3339(t0), "1990-05-11T00:00:00+00:00");
        assert_eq!(times[1].unwrap(), t0 + 30.);
        assert_eq!(times[2].unwrap(), t0 + 90.);
        assert!(times[3].is_none());
        assert!(times[4].is_none());
        assert!(times[5].is_none());
    }

    #[test]
    fn test_positions_from_time() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        let segy_path = write_test_segy(
            dir.path(),
            "line.sgy",
            10,
            &[
                time_fields(131, 0, 0, 0),
                time_fields(131, 0, 0, 30),
                vec![(TraceField::Year, 0)],
            ],
        );

        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);
        survey.process("positions_from_time").unwrap();
        survey.segy.save().unwrap();

        let reread = SegyFile::open(&segy_path).unwrap();

        // The first trace coincides with the first fix. The comparison allows
        // one centimetre of slack since truncation may fall either way after
        // the interpolation arithmetic.
        let expected = coords::from_wgs84(
            &[Coord {
                x: -122.0,
                y: 36.8,
            }],
            &crs,
        )
        .unwrap()[0];
        let x0 = reread.get(0, TraceField::SourceX).unwrap();
        let y0 = reread.get(0, TraceField::SourceY).unwrap();
        assert!((x0 - coords::encode_fixed_point(expected.x)).abs() <= 1);
        assert!((y0 - coords::encode_fixed_point(expected.y)).abs() <= 1);
        assert_eq!(reread.get(0, TraceField::SourceGroupScalar).unwrap(), -100);

        // The second trace is halfway between the first two fixes
        let halfway = coords::from_wgs84(
            &[Coord {
                x: -122.0005,
                y: 36.8005,
            }],
            &crs,
        )
        .unwrap()[0];
        let x1 = reread.get(1, TraceField::SourceX).unwrap();
        assert!((x1 - coords::encode_fixed_point(halfway.x)).abs() <= 1);

        // The corrupt trace was zeroed
        assert_eq!(reread.get(2, TraceField::SourceX).unwrap(), 0);
        assert_eq!(reread.get(2, TraceField::SourceY).unwrap(), 0);

        assert!(survey.log[0].contains("Assigned 2 source positions"));
    }

    #[test]
    fn test_positions_from_shot() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        let segy_path = write_test_segy(
            dir.path(),
            "shots.sgy",
            10,
            &[
                vec![(TraceField::FieldRecord, 101)],
                // Shot 103 is missing from the log; its neighbours stand in
                vec![(TraceField::FieldRecord, 103)],
                // No navigation at all
                vec![(TraceField::FieldRecord, 999)],
            ],
        );

        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);
        survey.process("positions_from_shot").unwrap();

        let expected = coords::from_wgs84(
            &[Coord {
                x: -122.0,
                y: 36.8,
            }],
            &crs,
        )
        .unwrap()[0];
        assert_eq!(
            survey.segy.get(0, TraceField::SourceX).unwrap(),
            coords::encode_fixed_point(expected.x)
        );

        // The mean of shots 102 and 104
        let neighbor_mean = coords::from_wgs84(
            &[Coord {
                x: -122.0015,
                y: 36.8015,
            }],
            &crs,
        )
        .unwrap()[0];
        let x1 = survey.segy.get(1, TraceField::SourceX).unwrap();
        assert!((x1 - coords::encode_fixed_point(neighbor_mean.x)).abs() <= 1);

        // The unmatched trace was left untouched
        assert_eq!(survey.segy.get(2, TraceField::SourceX).unwrap(), 0);
        assert_eq!(survey.segy.get(2, TraceField::SourceGroupScalar).unwrap(), 0);
    }

    #[test]
    fn test_positions_from_shot_scoped_to_line() {
        let dir = tempfile::tempdir().unwrap();
        // Two lines whose shot numbering restarts at 101
        let nav_path = dir.path().join("nav.txt");
        std::fs::write(
            &nav_path,
            "19901310000000 36.80000 -122.00000 l-4-90-107 101
19901310100000 36.90000 -121.90000 l-4-90-108 101
",
        )
        .unwrap();
        let columns = parse_columns("time,lat,lon,line,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        let segy_path = write_test_segy(dir.path(), "line108.sgy", 10, &[vec![(TraceField::FieldRecord, 101)]]);

        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);
        survey.process("positions_from_shot(108)").unwrap();

        let expected = coords::from_wgs84(
            &[Coord {
                x: -121.9,
                y: 36.9,
            }],
            &crs,
        )
        .unwrap()[0];
        assert_eq!(
            survey.segy.get(0, TraceField::SourceX).unwrap(),
            coords::encode_fixed_point(expected.x)
        );
        assert_eq!(
            survey.segy.get(0, TraceField::SourceY).unwrap(),
            coords::encode_fixed_point(expected.y)
        );

        // An unknown line is an error rather than a whole-log match
        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);
        assert!(survey.process("positions_from_shot(999)").is_err());
    }

    #[test]
    fn test_force_day() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        // Every trace has a garbage julian day
        let segy_path = write_test_segy(
            dir.path(),
            "badday.sgy",
            10,
            &[time_fields(999, 0, 0, 0), time_fields(999, 0, 0, 30)],
        );

        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);

        survey.process("force_day(131)").unwrap();
        survey.process("positions_from_time").unwrap();

        assert!(survey.segy.get(0, TraceField::SourceX).unwrap() > 0);
        assert_eq!(survey.segy.get(0, TraceField::SourceGroupScalar).unwrap(), -100);

        // Without the override, decoding fails outright
        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);
        assert!(survey.process("positions_from_time").is_err());
    }

    #[test]
    fn test_smooth_track() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        // A track with one GPS glitch in the middle
        let trace_fields: Vec<Vec<(TraceField, i32)>> = (0..20)
            .map(|i| {
                let x = match i {
                    10 => 59_000_000,
                    _ => 58_000_000 + i * 1000,
                };
                vec![
                    (TraceField::SourceX, x),
                    (TraceField::SourceY, 407_000_000 + i * 1000),
                    (TraceField::SourceGroupScalar, -100),
                ]
            })
            .collect();
        let segy_path = write_test_segy(dir.path(), "smooth.sgy", 10, &trace_fields);

        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);
        survey.process("smooth_track(10)").unwrap();

        let raw = survey.segy.get(10, TraceField::SourceX).unwrap();
        let smoothed = survey.segy.get(10, TraceField::CdpX).unwrap();

        // The glitch is damped toward the neighbouring traces
        assert!(smoothed < raw);
        assert!(smoothed > 58_000_000);

        // The CDP track is a full-length copy
        assert!(survey.segy.get(0, TraceField::CdpY).unwrap() > 0);
        assert!(survey.segy.get(19, TraceField::CdpY).unwrap() > 0);
    }

    #[test]
    fn test_track_csv_and_census() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        let segy_path = write_test_segy(
            dir.path(),
            "census.sgy",
            10,
            &[
                time_fields(131, 0, 0, 0),
                time_fields(131, 0, 0, 1),
                time_fields(131, 0, 0, 2),
                time_fields(131, 0, 0, 4),
            ],
        );

        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);

        assert_eq!(survey.interval_census(), vec![(1, 2), (2, 1)]);

        survey.process("positions_from_time").unwrap();

        let track_path = dir.path().join("track.csv");
        survey.track_to_csv(&track_path).unwrap();
        let content = std::fs::read_to_string(&track_path).unwrap();
        assert!(content.starts_with("trace_n,x,y\n"));
        // Decoded back to metres under the -100 scalar
        let second_line = content.lines().nth(1).unwrap();
        let x: f64 = second_line.split(',').nth(1).unwrap().parse().unwrap();
        assert!((x > 400_000.) & (x < 700_000.));

        let info = format!("{}", survey);
        assert!(info.contains("Valid traces:\t\t4 / 4"));
        assert!(info.contains("EPSG:32610"));
    }

    #[test]
    fn test_unknown_step() {
        let dir = tempfile::tempdir().unwrap();
        let nav_path = write_test_nav(dir.path());
        let columns = parse_columns("time,lat,lon,shot").unwrap();
        let nav = NavLog::load(&nav_path, 0, &columns).unwrap();
        let crs = test_crs();

        let segy_path = write_test_segy(dir.path(), "step.sgy", 10, &[vec![]]);
        let segy = SegyFile::open(&segy_path).unwrap();
        let mut survey = Survey::new(segy, &nav, &crs, 1900);

        assert!(survey.process("transmogrify").is_err());
        assert!(survey.process("force_day").is_err());
    }
}
