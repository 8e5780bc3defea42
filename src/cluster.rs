// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The cluster renderer: rows dealt out to ranks by a fixed cyclic
//! rule, computed by each rank's own thread pool, then gathered at
//! the coordinator.
//!
//! Rank `p` of `P` owns every row `r` with `r % P == p`.  Rows near
//! the set's boundary are expensive and sit next to each other in the
//! image, so dealing rows out like cards spreads that cost evenly
//! where contiguous blocks would pile it onto a few ranks.
//!
//! Each rank keeps its rows in a local buffer of `ceil(height / P)`
//! slots; slot `i` holds global row `p + i * P`.  When `P` does not
//! divide the height, the last slot of the higher ranks maps past the
//! bottom of the image.  Those slots are never computed, and the
//! coordinator throws them away with the same bounds check, so their
//! contents never matter.

use std::time::Duration;

use crate::errors::{MandelError, Result};
use crate::grid::{allocate, OutputGrid};
use crate::planes::Viewport;
use crate::schedule::{run_dynamic, AtomicRowQueue};
use crate::transport::{ChannelTransport, FrameShape, Transport};

/// The rank that assembles the grid and writes the image.
pub const COORDINATOR: usize = 0;

/// The rank that owns `row`.
pub fn owner_of(row: usize, processes: usize) -> usize {
    row % processes
}

/// Which rows one rank owns, and where they live in its buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CyclicAssignment {
    rank: usize,
    processes: usize,
    height: usize,
}

impl CyclicAssignment {
    /// Rows `0..height` dealt across `processes` ranks, as seen by `rank`.
    pub fn new(rank: usize, processes: usize, height: usize) -> Result<CyclicAssignment> {
        if processes == 0 || rank >= processes {
            return Err(MandelError::InvalidCluster(format!(
                "rank {} of {} processes",
                rank, processes
            )));
        }
        Ok(CyclicAssignment {
            rank,
            processes,
            height,
        })
    }

    /// This rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Ranks the rows are dealt across.
    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Slots in every rank's buffer.
    pub fn slots(&self) -> usize {
        (self.height + self.processes - 1) / self.processes
    }

    /// The global row stored in `slot`, if it lies inside the image.
    pub fn global_row(&self, slot: usize) -> Option<usize> {
        slot.checked_mul(self.processes)
            .and_then(|offset| offset.checked_add(self.rank))
            .filter(|row| *row < self.height)
    }

    /// Every row this rank owns, top of its buffer first.
    pub fn owned_rows(&self) -> impl Iterator<Item = usize> {
        (self.rank..self.height).step_by(self.processes)
    }
}

/// One rank's finished rows, exactly as it sends them to the
/// coordinator: `slots` rows of `width` cells, slot-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowBuffer {
    /// Producer.
    pub rank: usize,
    /// Size of the cluster the producer was dealt rows from.
    pub processes: usize,
    /// Cells per row.
    pub width: usize,
    /// The rows themselves.
    pub cells: Vec<u32>,
}

impl RowBuffer {
    /// Number of row slots carried.
    pub fn slots(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.cells.len() / self.width
        }
    }
}

/// Compute every row `assignment` gives this rank, using `threads`
/// workers that claim slots dynamically.
pub fn compute_local(viewport: &Viewport, assignment: &CyclicAssignment, threads: usize) -> Result<RowBuffer> {
    let slots = assignment.slots();
    let cells = slots
        .checked_mul(viewport.width())
        .ok_or_else(|| MandelError::Allocation(usize::max_value()))?;
    let mut buffer = allocate(cells)?;
    let computed = run_dynamic(
        viewport,
        buffer.chunks_mut(viewport.width()).collect(),
        threads,
        &AtomicRowQueue::new(slots),
        |slot| assignment.global_row(slot),
    )?;
    debug!("rank {} computed {} of {} slots", assignment.rank(), computed, slots);
    Ok(RowBuffer {
        rank: assignment.rank(),
        processes: assignment.processes(),
        width: viewport.width(),
        cells: buffer,
    })
}

/// Copy the in-image slots of `rows` into `grid`.
fn place(grid: &mut OutputGrid, rows: &RowBuffer) -> Result<()> {
    let assignment = CyclicAssignment::new(rows.rank, rows.processes, grid.height())?;
    for (slot, cells) in rows.cells.chunks(rows.width).enumerate() {
        if let Some(row) = assignment.global_row(slot) {
            grid.row_mut(row).copy_from_slice(cells);
        }
    }
    Ok(())
}

/// On the coordinator: place our own rows, then receive every other
/// rank's buffer in ascending rank order and place those.
pub fn gather<T>(viewport: &Viewport, transport: &mut T, local: &RowBuffer, timeout: Option<Duration>) -> Result<OutputGrid>
where
    T: Transport + ?Sized,
{
    let processes = transport.processes();
    let mut grid = OutputGrid::for_viewport(viewport)?;
    let own = CyclicAssignment::new(transport.rank(), processes, viewport.height())?;
    FrameShape::of(&own, viewport.width()).check(local, transport.rank())?;
    place(&mut grid, local)?;
    for source in (COORDINATOR + 1)..processes {
        let expect = CyclicAssignment::new(source, processes, viewport.height())?;
        let shape = FrameShape::of(&expect, viewport.width());
        let rows = match transport.recv_rows(source, &shape, timeout) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("gather failed at rank {}: {}", source, err);
                return Err(err);
            }
        };
        shape.check(&rows, source)?;
        place(&mut grid, &rows)?;
        debug!("placed {} rows from rank {}", expect.owned_rows().count(), source);
    }
    Ok(grid)
}

/// Everything one rank does in a cluster run.  The coordinator gets
/// the assembled grid back; every other rank gets `None` once its rows
/// are on their way.
pub fn run_rank<T>(viewport: &Viewport, transport: &mut T, threads: usize, timeout: Option<Duration>) -> Result<Option<OutputGrid>>
where
    T: Transport + ?Sized,
{
    let assignment = CyclicAssignment::new(transport.rank(), transport.processes(), viewport.height())?;
    let local = compute_local(viewport, &assignment, threads)?;
    if transport.rank() == COORDINATOR {
        let grid = gather(viewport, transport, &local, timeout)?;
        info!("assembled {} rows from {} ranks", grid.height(), transport.processes());
        Ok(Some(grid))
    } else {
        transport.send_rows(&local)?;
        Ok(None)
    }
}

/// Run a whole cluster of `processes` ranks inside this process, each
/// with `threads` workers, joined by channels.
pub fn render_local_cluster(
    viewport: &Viewport,
    processes: usize,
    threads: usize,
    timeout: Option<Duration>,
) -> Result<OutputGrid> {
    info!(
        "rendering {}x{} at {} iterations on {} ranks of {} threads",
        viewport.width(), viewport.height(), viewport.max_iter(), processes, threads
    );
    let ranks = ChannelTransport::cluster(processes)?;
    let outcome = crossbeam::scope(|spawner| {
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|mut transport| spawner.spawn(move |_| run_rank(viewport, &mut transport, threads, timeout)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|_| Err(MandelError::WorkerPanicked)))
            .collect::<Vec<_>>()
    })
    .map_err(|_| MandelError::WorkerPanicked)?;

    let mut outcome = outcome.into_iter();
    let coordinator = outcome.next().ok_or(MandelError::PeerLost(COORDINATOR))?;
    settle(coordinator, outcome)
}

/// Pick the result of a local cluster run from every rank's outcome.
/// The coordinator's own failure wins, except that a worker which
/// fails never sends, and the coordinator only sees that as a lost or
/// silent peer.  Then the worker's error says more.
fn settle<I>(coordinator: Result<Option<OutputGrid>>, workers: I) -> Result<OutputGrid>
where
    I: IntoIterator<Item = Result<Option<OutputGrid>>>,
{
    match coordinator {
        Err(err @ MandelError::PeerLost(_)) | Err(err @ MandelError::GatherTimeout { .. }) => {
            for worker in workers {
                worker?;
            }
            Err(err)
        }
        Err(err) => Err(err),
        Ok(grid) => {
            for worker in workers {
                worker?;
            }
            grid.ok_or(MandelError::PeerLost(COORDINATOR))
        }
    }
}
