use crate::{nav, survey, tools};
/// Functions to handle the command line interface (CLI)
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(group(
        clap::ArgGroup::new("step_choice")
        .required(false)
        .args(&["steps", "default"]),
    ))
]
#[clap(group(
        clap::ArgGroup::new("exit_choice")
        .required(false)
        .args(&["show_default", "info", "show_all_steps"]),
    ))
]
pub struct Args {
    /// Filepath of the SEG-Y file or a glob pattern of many files
    #[clap(short, long)]
    filepath: Option<String>,

    /// Filepath of the navigation log (whitespace-delimited GPS fixes)
    #[clap(short, long)]
    nav: Option<PathBuf>,

    /// Number of preamble rows to skip in the navigation log
    #[clap(long, default_value = "0")]
    nav_skip_rows: usize,

    /// Column layout of the navigation log, separated by commas. Use "?" for
    /// an ignored column. Recognized names: time, lat, lon, line, ffid, shot, cdp
    #[clap(long, default_value = "time,lat,lon")]
    nav_columns: String,

    /// Which coordinate reference system to project coordinates in. "auto"
    /// derives the WGS84 UTM zone from the navigation log.
    #[clap(long, default_value = "auto")]
    crs: String,

    /// Century base added to two-digit years in trace headers
    #[clap(long, default_value = "1900")]
    century: i32,

    /// Only show metadata for the navigation log and the file(s)
    #[clap(short, long)]
    info: bool,

    /// Export the repaired location track to a comma separated values (CSV) file. Defaults to the
    /// input filename location and stem + ".track.csv"
    #[clap(short, long)]
    track: Option<Option<PathBuf>>,

    /// Write a copy of the navigation log with missing positions filled in to the given CSV path
    #[clap(long)]
    fill_nav: Option<PathBuf>,

    /// Process with the default profile. See "--show-default" to list the profile.
    #[clap(long)]
    default: bool,

    /// Show the default profile and exit
    #[clap(long)]
    show_default: bool,

    /// Show the available steps
    #[clap(long)]
    show_all_steps: bool,

    /// Processing steps to run, separated by commas. Can be a filepath to a newline separated step file.
    #[clap(long)]
    steps: Option<String>,

    /// Run all steps but do not write anything back to the file(s)
    #[clap(long)]
    dry_run: bool,

    /// Suppress progress messages
    #[clap(short, long)]
    quiet: bool,
}

enum ParsedArgs {
    Params(Box<survey::RunParams>),
    Error(String),
    Done,
}

impl Args {
    fn validate(&self) -> ParsedArgs {
        // If the user only wants to show the available steps, stop here.
        if self.show_all_steps {
            println!("Name\t\tDescription");

            for line in survey::all_available_steps() {
                println!("{}\n{}\n{}\n", line[0], "-".repeat(line[0].len()), line[1]);
            }
            return ParsedArgs::Done;
        };

        // If the user only wants to show the default profile, stop here.
        if self.show_default {
            for line in survey::default_processing_profile() {
                println!("{}", line);
            }
            return ParsedArgs::Done;
        };

        let nav_path = match &self.nav {
            Some(path) => path.clone(),
            None => {
                return ParsedArgs::Error(
                    "No navigation log given.\nUse the help text (\"-h\" or \"--help\") for assistance."
                        .to_string(),
                )
            }
        };

        let nav_columns = match nav::parse_columns(&self.nav_columns) {
            Ok(columns) => columns,
            Err(e) => return ParsedArgs::Error(e),
        };

        let filepaths = match &self.filepath {
            Some(fp) => glob::glob(fp)
                .unwrap()
                .map(|v| v.unwrap())
                .collect::<Vec<PathBuf>>(),
            // A run without input files is only useful for --fill-nav
            None => match self.fill_nav.is_some() {
                true => Vec::new(),
                false => return ParsedArgs::Error(
                    "No filepath given.\nUse the help text (\"-h\" or \"--help\") for assistance."
                        .to_string(),
                ),
            },
        };

        // The profile (the list of steps) is a list of "--steps a,b,c", or the
        // default profile when "--default" was given or nothing was specified.
        let steps: Vec<String> = match self.info {
            true => Vec::new(),
            false => match &self.steps {
                Some(steps) => match tools::parse_step_list(steps) {
                    Ok(s) => s,
                    Err(e) => return ParsedArgs::Error(e),
                },
                None => survey::default_processing_profile(),
            },
        };
        // Fetch all allowed steps and validate that they exist.
        // It's not a perfect validation, because "positions_from_timexyz" will pass, but another
        // validation is done later to make sure it's exact. This check is only to run into fewer
        // errors mid-processing (and rather have them before beginning)
        let allowed_steps = survey::all_available_steps()
            .iter()
            .map(|s| s[0])
            .collect::<Vec<&str>>();
        for step in &steps {
            if !allowed_steps.iter().any(|allowed| step.contains(allowed)) {
                return ParsedArgs::Error(format!("Unrecognized step: {}", step));
            };
        }
        ParsedArgs::Params(Box::new(survey::RunParams {
            filepaths,
            nav_path,
            nav_skip_rows: self.nav_skip_rows,
            nav_columns,
            crs: self.crs.clone(),
            century: self.century,
            steps,
            only_info: self.info,
            dry_run: self.dry_run,
            track_path: self.track.clone(),
            fill_nav_path: self.fill_nav.clone(),
        }))
    }
}

/// Run the main CLI functionality based on the given arguments
///
/// # Arguments
/// - `arguments`: The Args object containing the parsed arguments.
///
/// # Returns
/// The appropriate exit code.
pub fn main(arguments: Args) -> i32 {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match arguments.quiet {
            true => "warn",
            false => "info",
        },
    ))
    .init();

    match arguments.validate() {
        ParsedArgs::Params(params) => match survey::run(*params) {
            Ok(_) => 0,
            Err(e) => error(&format!("{e}"), 1),
        },
        ParsedArgs::Error(message) => error(&message, 1),
        ParsedArgs::Done => 0,
    }
}

/// Print an error to /dev/stderr and return an exit code
///
/// At the moment, it's quite barebones, but this allows for better handling later.
///
/// # Arguments
/// - `message`: The message to print to /dev/stderr
/// - `code`: The exit code
///
/// # Returns
/// The same exit code that was provided
fn error(message: &str, code: i32) -> i32 {
    eprintln!("{}", message);
    code
}
