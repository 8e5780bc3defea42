//! Command-line arguments shared by both binaries: eight required
//! positionals describing the image, plus a thread count.

use clap::{App, AppSettings, Arg, ArgMatches};
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{MandelError, Result};
use crate::planes::Viewport;

/// Output file.
pub const OUTPUT: &str = "output";
/// Iteration cap.
pub const ITERATIONS: &str = "iterations";
/// Left edge.
pub const MIN_REAL: &str = "min-real";
/// Right edge.
pub const MAX_REAL: &str = "max-real";
/// Bottom edge.
pub const MIN_IMAG: &str = "min-imag";
/// Top edge.
pub const MAX_IMAG: &str = "max-imag";
/// Columns.
pub const WIDTH: &str = "width";
/// Rows.
pub const HEIGHT: &str = "height";
/// Worker threads (per process, for the cluster).
pub const THREADS: &str = "threads";

/// Accept anything that parses as a `T`.
pub fn validate_number<T: FromStr>(s: &str, err: &str) -> std::result::Result<(), String> {
    match T::from_str(s) {
        Ok(_) => Ok(()),
        Err(_) => Err(err.to_string()),
    }
}

/// Accept a `T` in `low..=high`.
pub fn validate_range<T: FromStr + PartialOrd>(
    s: &str,
    low: T,
    high: T,
    isnotanumber_err: &str,
    isnotinrange_err: &str,
) -> std::result::Result<(), String> {
    match T::from_str(s) {
        Ok(i) => {
            if i >= low && i <= high {
                Ok(())
            } else {
                Err(isnotinrange_err.to_string())
            }
        }
        Err(_) => Err(isnotanumber_err.to_string()),
    }
}

fn validate_bound(s: String) -> std::result::Result<(), String> {
    match f64::from_str(&s) {
        Ok(v) if v.is_finite() => Ok(()),
        _ => Err(format!("{} is not a finite real number", s)),
    }
}

fn validate_pixels(s: String) -> std::result::Result<(), String> {
    validate_range(
        &s,
        1,
        usize::max_value(),
        "Could not parse pixel count",
        "Pixel counts must be positive",
    )
}

fn validate_iterations(s: String) -> std::result::Result<(), String> {
    validate_number::<u32>(&s, "Iteration count must be a non-negative integer")
}

fn validate_threads(s: String) -> std::result::Result<(), String> {
    validate_range(
        &s,
        1,
        4096,
        "Could not parse thread count",
        "Thread count must be between 1 and 4096",
    )
}

/// The argument set both binaries start from.
pub fn base_app<'a, 'b>(name: &str, about: &'b str) -> App<'a, 'b> {
    let positional = |name: &'a str, index: u64, help: &'b str| {
        Arg::with_name(name).required(true).index(index).help(help)
    };
    App::new(name)
        .version(env!("CARGO_PKG_VERSION"))
        .about(about)
        .setting(AppSettings::AllowNegativeNumbers)
        .arg(positional(OUTPUT, 1, "Output image file (format follows the extension)"))
        .arg(
            positional(ITERATIONS, 2, "Maximum iterations per point")
                .validator(validate_iterations),
        )
        .arg(positional(MIN_REAL, 3, "Real part of the left edge").validator(validate_bound))
        .arg(positional(MAX_REAL, 4, "Real part of the right edge").validator(validate_bound))
        .arg(positional(MIN_IMAG, 5, "Imaginary part of the bottom edge").validator(validate_bound))
        .arg(positional(MAX_IMAG, 6, "Imaginary part of the top edge").validator(validate_bound))
        .arg(positional(WIDTH, 7, "Image width in pixels").validator(validate_pixels))
        .arg(positional(HEIGHT, 8, "Image height in pixels").validator(validate_pixels))
        .arg(
            Arg::with_name(THREADS)
                .long(THREADS)
                .short("t")
                .takes_value(true)
                .validator(validate_threads)
                .help("Worker threads (default: one per core)"),
        )
}

/// What to render and where to put it.
#[derive(Clone, Debug)]
pub struct RenderArgs {
    /// Destination image.
    pub output: PathBuf,
    /// Region, resolution and iteration cap.
    pub viewport: Viewport,
    /// Worker threads.
    pub threads: usize,
}

fn parsed<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    matches
        .value_of(name)
        .and_then(|s| T::from_str(s).ok())
        .ok_or_else(|| MandelError::InvalidViewport(format!("could not parse {}", name)))
}

impl RenderArgs {
    /// Pull the shared arguments back out of `matches`.
    pub fn from_matches(matches: &ArgMatches) -> Result<RenderArgs> {
        let output = matches
            .value_of(OUTPUT)
            .map(PathBuf::from)
            .ok_or_else(|| MandelError::InvalidViewport("no output file".to_string()))?;
        let viewport = Viewport::new(
            parsed(matches, MIN_REAL)?,
            parsed(matches, MAX_REAL)?,
            parsed(matches, MIN_IMAG)?,
            parsed(matches, MAX_IMAG)?,
            parsed(matches, WIDTH)?,
            parsed(matches, HEIGHT)?,
            parsed(matches, ITERATIONS)?,
        )?;
        let threads = match matches.value_of(THREADS) {
            Some(_) => parsed(matches, THREADS)?,
            None => num_cpus::get(),
        };
        Ok(RenderArgs {
            output,
            viewport,
            threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<RenderArgs> {
        let matches = base_app("test", "test")
            .get_matches_from_safe(args)
            .map_err(|e| MandelError::InvalidViewport(e.to_string()))?;
        RenderArgs::from_matches(&matches)
    }

    #[test]
    fn negative_bounds_are_positionals() {
        let args = parse(&["test", "out.png", "100", "-2", "1", "-1", "1", "800", "600"]).unwrap();
        assert_eq!(args.output, PathBuf::from("out.png"));
        assert_eq!(args.viewport.min_real(), -2.0);
        assert_eq!(args.viewport.min_imag(), -1.0);
        assert_eq!((args.viewport.width(), args.viewport.height()), (800, 600));
        assert_eq!(args.viewport.max_iter(), 100);
        assert!(args.threads >= 1);
    }

    #[test]
    fn thread_count_is_honoured() {
        let args = parse(&["test", "-t", "3", "o.png", "10", "-2", "1", "-1", "1", "8", "8"]).unwrap();
        assert_eq!(args.threads, 3);
    }

    #[test]
    fn missing_positionals_are_fatal() {
        assert!(parse(&["test", "out.png", "100", "-2", "1"]).is_err());
    }

    #[test]
    fn inverted_region_is_fatal() {
        assert!(parse(&["test", "o.png", "10", "1", "-2", "-1", "1", "8", "8"]).is_err());
    }

    #[test]
    fn zero_width_is_fatal() {
        assert!(parse(&["test", "o.png", "10", "-2", "1", "-1", "1", "0", "8"]).is_err());
    }

    #[test]
    fn negative_iterations_are_fatal() {
        assert!(parse(&["test", "o.png", "-5", "-2", "1", "-1", "1", "8", "8"]).is_err());
    }
}
