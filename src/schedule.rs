// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dynamic row scheduling, and the shared-memory renderer built on it.
//!
//! Row cost varies wildly: rows that graze the set's boundary cost up
//! to the iteration cap per point, rows far from it escape almost at
//! once.  Rather than deal rows out in fixed chunks, every worker
//! claims the next unclaimed row from a queue as soon as it finishes
//! its last one, which approximates greedy balancing with one atomic
//! operation per row.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::errors::{MandelError, Result};
use crate::grid::OutputGrid;
use crate::kernel::fill_row;
use crate::planes::Viewport;

/// Hands out unit indices `0..len()` to any number of threads, each
/// index exactly once, then reports exhaustion forever after.
pub trait WorkQueue: Sync {
    /// The next unclaimed unit, or `None` once all are gone.
    fn claim(&self) -> Option<usize>;

    /// How many units the queue hands out in total.
    fn len(&self) -> usize;

    /// True if there is nothing to hand out.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A `WorkQueue` backed by a single fetch-and-increment counter.
#[derive(Debug)]
pub struct AtomicRowQueue {
    next: AtomicUsize,
    len: usize,
}

impl AtomicRowQueue {
    /// A queue over `0..len`.
    pub fn new(len: usize) -> Self {
        AtomicRowQueue {
            next: AtomicUsize::new(0),
            len,
        }
    }
}

impl WorkQueue for AtomicRowQueue {
    fn claim(&self) -> Option<usize> {
        // Each worker stops at its first miss, so the counter only
        // overshoots `len` by the number of workers.
        let unit = self.next.fetch_add(1, Ordering::Relaxed);
        if unit < self.len {
            Some(unit)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn claim_rows<Q, F>(
    worker: usize,
    viewport: &Viewport,
    slots: &[Mutex<&mut [u32]>],
    queue: &Q,
    global_row: &F,
) -> Result<usize>
where
    Q: WorkQueue + ?Sized,
    F: Fn(usize) -> Option<usize>,
{
    let mut computed = 0;
    while let Some(unit) = queue.claim() {
        let row = match global_row(unit) {
            Some(row) => row,
            None => continue,
        };
        let slot = slots.get(unit).ok_or(MandelError::WorkerPanicked)?;
        // Never contended: the queue gives `unit` to us alone.
        let mut cells = slot.lock().map_err(|_| MandelError::WorkerPanicked)?;
        fill_row(viewport, row, &mut **cells);
        computed += 1;
    }
    debug!("worker {} computed {} rows", worker, computed);
    Ok(computed)
}

/// Fill `rows` using `threads` workers that pull slot indices from
/// `queue`.  Slot `i` is computed as image row `global_row(i)`; slots
/// that map to `None` are skipped and left as they were.  Returns the
/// number of rows computed.
pub fn run_dynamic<Q, F>(
    viewport: &Viewport,
    rows: Vec<&mut [u32]>,
    threads: usize,
    queue: &Q,
    global_row: F,
) -> Result<usize>
where
    Q: WorkQueue + ?Sized,
    F: Fn(usize) -> Option<usize> + Sync,
{
    if threads == 0 {
        return Err(MandelError::InvalidCluster(
            "at least one worker thread is required".to_string(),
        ));
    }
    if queue.len() != rows.len() {
        return Err(MandelError::InvalidCluster(format!(
            "work queue covers {} units but there are {} rows",
            queue.len(),
            rows.len()
        )));
    }

    let slots: Vec<Mutex<&mut [u32]>> = rows.into_iter().map(Mutex::new).collect();
    let slots = &slots[..];
    let global_row = &global_row;

    let outcome = crossbeam::scope(|spawner| {
        let handles: Vec<_> = (0..threads)
            .map(|worker| {
                spawner.spawn(move |_| claim_rows(worker, viewport, slots, queue, global_row))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|_| Err(MandelError::WorkerPanicked)))
            .collect::<Result<Vec<usize>>>()
    });

    let per_worker = outcome.map_err(|_| MandelError::WorkerPanicked)??;
    Ok(per_worker.iter().sum())
}

/// Render the whole viewport in this process with `threads` workers
/// sharing one atomic row counter.
pub fn render_shared(viewport: &Viewport, threads: usize) -> Result<OutputGrid> {
    render_shared_with(viewport, threads, &AtomicRowQueue::new(viewport.height()))
}

/// As `render_shared`, but rows are claimed from `queue`, which must
/// cover exactly `0..viewport.height()`.
pub fn render_shared_with<Q>(viewport: &Viewport, threads: usize, queue: &Q) -> Result<OutputGrid>
where
    Q: WorkQueue + ?Sized,
{
    info!(
        "rendering {}x{} at {} iterations on {} threads",
        viewport.width(), viewport.height(), viewport.max_iter(), threads
    );
    let mut grid = OutputGrid::for_viewport(viewport)?;
    let computed = run_dynamic(viewport, grid.rows_mut().collect(), threads, queue, Some)?;
    info!("computed {} rows", computed);
    Ok(grid)
}
