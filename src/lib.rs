#![deny(missing_docs)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mandelbrot escape-time renderer
//!
//! The Mandelbrot set is the set of points `c` on the complex plane
//! for which repeatedly squaring `z` and adding `c`, starting from
//! zero, never carries `z` outside the circle of radius two.  For the
//! points that do leave, the number of steps it took is their "escape
//! time", and coloring a grid of points by escape time produces the
//! familiar image.
//!
//! Two ways of spreading the work are provided.  `render_shared` runs
//! in one process: worker threads pull rows off a shared atomic
//! counter and write them straight into the grid.  The `cluster`
//! module spreads rows over several cooperating processes by a fixed
//! cyclic rule, lets each process spread its own rows over a thread
//! pool the same way, and gathers the results at a coordinator.  Both
//! produce the same grid, cell for cell.
//!
//! In either case points are iterated eight at a time by the kernel in
//! `kernel`.

extern crate clap;
extern crate crossbeam;
extern crate failure;
extern crate image;
extern crate num;
extern crate num_cpus;
#[macro_use]
extern crate log;

pub mod cli;
pub mod cluster;
pub mod errors;
pub mod grid;
pub mod kernel;
pub mod planes;
pub mod render;
pub mod schedule;
pub mod transport;

pub use cluster::{render_local_cluster, run_rank, CyclicAssignment, RowBuffer};
pub use errors::MandelError;
pub use grid::OutputGrid;
pub use planes::Viewport;
pub use render::write_image;
pub use schedule::{render_shared, AtomicRowQueue, WorkQueue};
pub use transport::{ChannelTransport, FrameShape, TcpTransport, Transport};
