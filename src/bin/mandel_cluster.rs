extern crate clap;
extern crate env_logger;
extern crate mandelbrot;

use clap::{Arg, ArgMatches};
use mandelbrot::cli::{base_app, validate_range, RenderArgs};
use mandelbrot::{MandelError, TcpTransport};
use std::str::FromStr;
use std::time::Duration;

const PROCESSES: &str = "processes";
const RANK: &str = "rank";
const COORDINATOR: &str = "coordinator";
const TIMEOUT: &str = "timeout";

fn args<'a>() -> ArgMatches<'a> {
    base_app("mandel-cluster", "Mandelbrot renderer, rows dealt across cooperating processes")
        .arg(
            Arg::with_name(PROCESSES)
                .long(PROCESSES)
                .short("p")
                .takes_value(true)
                .default_value("2")
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        65_536,
                        "Could not parse process count",
                        "Process count must be between 1 and 65536",
                    )
                })
                .help("Number of cooperating processes"),
        )
        .arg(
            Arg::with_name(RANK)
                .long(RANK)
                .short("r")
                .takes_value(true)
                .requires(COORDINATOR)
                .validator(|s| {
                    validate_range(
                        &s,
                        0,
                        65_535,
                        "Could not parse rank",
                        "Rank must be between 0 and 65535",
                    )
                })
                .help("This process's rank; omit to run every rank in this process"),
        )
        .arg(
            Arg::with_name(COORDINATOR)
                .long(COORDINATOR)
                .short("c")
                .takes_value(true)
                .requires(RANK)
                .help("host:port the coordinator (rank 0) listens on"),
        )
        .arg(
            Arg::with_name(TIMEOUT)
                .long(TIMEOUT)
                .takes_value(true)
                .default_value("60")
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        86_400,
                        "Could not parse timeout",
                        "Timeout must be between 1 and 86400 seconds",
                    )
                })
                .help("Seconds the coordinator waits on each rank before giving up"),
        )
        .get_matches()
}

fn parsed<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T, MandelError> {
    matches
        .value_of(name)
        .and_then(|s| T::from_str(s).ok())
        .ok_or_else(|| MandelError::InvalidCluster(format!("could not parse {}", name)))
}

fn run() -> Result<(), MandelError> {
    let matches = args();
    let render = RenderArgs::from_matches(&matches)?;
    let processes: usize = parsed(&matches, PROCESSES)?;
    let timeout = Some(Duration::from_secs(parsed(&matches, TIMEOUT)?));

    let grid = match matches.value_of(COORDINATOR) {
        None => mandelbrot::render_local_cluster(&render.viewport, processes, render.threads, timeout)?,
        Some(addr) => {
            let rank: usize = parsed(&matches, RANK)?;
            let mut transport = if rank == mandelbrot::cluster::COORDINATOR {
                TcpTransport::bind(addr, processes)?
            } else {
                TcpTransport::connect(addr, rank, processes, timeout)?
            };
            match mandelbrot::run_rank(&render.viewport, &mut transport, render.threads, timeout)? {
                Some(grid) => grid,
                None => return Ok(()),
            }
        }
    };
    mandelbrot::write_image(&render.output, &grid, render.viewport.max_iter())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}
