// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The one error type shared by every stage of a render.  Every
//! failure is terminal: nothing here is retried, and no partial image
//! is ever written.

use failure::Fail;
use std::io;
use std::time::Duration;

/// Everything that can stop a render.
#[derive(Debug, Fail)]
pub enum MandelError {
    /// The region or resolution handed to us cannot be rasterized.
    #[fail(display = "invalid viewport: {}", _0)]
    InvalidViewport(String),

    /// The process count, rank, or thread count makes no sense.
    #[fail(display = "invalid cluster layout: {}", _0)]
    InvalidCluster(String),

    /// The grid or a row buffer could not be allocated.
    #[fail(display = "could not allocate a buffer of {} cells", _0)]
    Allocation(usize),

    /// A compute thread died before finishing its rows.
    #[fail(display = "a worker thread panicked")]
    WorkerPanicked,

    /// The coordinator gave up waiting for a rank's rows.
    #[fail(display = "rank {} sent nothing within {:?}", rank, waited)]
    GatherTimeout {
        /// The rank that never answered.
        rank: usize,
        /// How long we waited.
        waited: Duration,
    },

    /// A peer went away without delivering its rows.
    #[fail(display = "rank {} disconnected before delivering its rows", _0)]
    PeerLost(usize),

    /// A row message arrived but did not describe the buffer we expected.
    #[fail(display = "malformed rows from rank {}: {}", rank, reason)]
    Protocol {
        /// The sender, as far as we could tell.
        rank: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Socket-level failure between ranks.
    #[fail(display = "network error: {}", _0)]
    Network(#[cause] io::Error),

    /// The finished grid could not be written out.
    #[fail(display = "could not write {}: {}", path, reason)]
    Output {
        /// Destination we tried to write.
        path: String,
        /// The encoder's complaint.
        reason: String,
    },
}

impl From<io::Error> for MandelError {
    fn from(err: io::Error) -> Self {
        MandelError::Network(err)
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, MandelError>;
