extern crate env_logger;
extern crate mandelbrot;

use mandelbrot::cli::{base_app, RenderArgs};
use mandelbrot::MandelError;

fn run() -> Result<(), MandelError> {
    let matches = base_app("mandel", "Mandelbrot renderer, one process, many threads").get_matches();
    let args = RenderArgs::from_matches(&matches)?;
    let grid = mandelbrot::render_shared(&args.viewport, args.threads)?;
    mandelbrot::write_image(&args.output, &grid, args.viewport.max_iter())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}
