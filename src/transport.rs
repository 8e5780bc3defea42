// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Point-to-point delivery of row buffers from worker ranks to the
//! coordinator.
//!
//! Two implementations: `ChannelTransport` runs every rank inside one
//! OS process and hands buffers over crossbeam channels;
//! `TcpTransport` runs each rank as its own process and ships
//! buffers over a socket.  Either way each worker sends exactly one
//! message and the coordinator receives one per worker, in whatever
//! order it asks for them.  Every wait on the coordinator's side may
//! be bounded, so a dead or silent peer surfaces as an error instead
//! of a hang.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::convert::TryFrom;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use crate::cluster::{CyclicAssignment, RowBuffer, COORDINATOR};
use crate::errors::{MandelError, Result};
use crate::grid::allocate;

/// How ranks reach the coordinator.
pub trait Transport {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Number of cooperating ranks, coordinator included.
    fn processes(&self) -> usize;

    /// Deliver this rank's buffer to the coordinator.  Workers call
    /// this exactly once.
    fn send_rows(&mut self, rows: &RowBuffer) -> Result<()>;

    /// On the coordinator, wait for the buffer from `source`, giving up
    /// after `timeout` if one is given.  A buffer that does not have
    /// the shape `expect` is a `Protocol` error.
    fn recv_rows(&mut self, source: usize, expect: &FrameShape, timeout: Option<Duration>) -> Result<RowBuffer>;
}

/// The buffer the coordinator is owed by one rank: `slots` rows of
/// `width` cells, dealt from a cluster of `processes`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameShape {
    /// Ranks in the cluster.
    pub processes: usize,
    /// Cells per row.
    pub width: usize,
    /// Row slots.
    pub slots: usize,
}

impl FrameShape {
    /// What the owner of `assignment` sends for rows `width` wide.
    pub fn of(assignment: &CyclicAssignment, width: usize) -> FrameShape {
        FrameShape {
            processes: assignment.processes(),
            width,
            slots: assignment.slots(),
        }
    }

    /// Cells in a buffer of this shape.
    pub fn cells(&self) -> Result<usize> {
        self.slots
            .checked_mul(self.width)
            .ok_or_else(|| MandelError::Allocation(usize::max_value()))
    }

    fn check_header(&self, source: usize, rank: usize, processes: usize, width: usize, slots: usize) -> Result<()> {
        let mismatch = |reason: String| Err(MandelError::Protocol { rank: source, reason });
        if rank != source {
            return mismatch(format!("buffer is labelled rank {}", rank));
        }
        if processes != self.processes {
            return mismatch(format!(
                "sender thinks there are {} processes, not {}",
                processes, self.processes
            ));
        }
        if width != self.width || slots != self.slots {
            return mismatch(format!(
                "got {} slots of width {}, expected {} slots of width {}",
                slots, width, self.slots, self.width
            ));
        }
        Ok(())
    }

    /// Make sure a buffer that claims to be from `source` has this
    /// shape.
    pub fn check(&self, rows: &RowBuffer, source: usize) -> Result<()> {
        self.check_header(source, rows.rank, rows.processes, rows.width, rows.slots())?;
        if rows.cells.len() != self.cells()? {
            return Err(MandelError::Protocol {
                rank: source,
                reason: format!("{} cells do not make whole rows of {}", rows.cells.len(), self.width),
            });
        }
        Ok(())
    }
}

fn check_layout(rank: usize, processes: usize) -> Result<()> {
    if processes == 0 {
        return Err(MandelError::InvalidCluster(
            "a cluster needs at least one process".to_string(),
        ));
    }
    if rank >= processes {
        return Err(MandelError::InvalidCluster(format!(
            "rank {} is out of range for {} processes",
            rank, processes
        )));
    }
    Ok(())
}

fn not_coordinator(rank: usize) -> MandelError {
    MandelError::InvalidCluster(format!("rank {} is not the coordinator", rank))
}

fn bad_source(source: usize, processes: usize) -> MandelError {
    MandelError::InvalidCluster(format!(
        "cannot receive from rank {} in a cluster of {}",
        source, processes
    ))
}

/// Ranks living in one process, joined by channels.
pub struct ChannelTransport {
    rank: usize,
    processes: usize,
    outbox: Option<Sender<RowBuffer>>,
    inbox: Vec<Option<Receiver<RowBuffer>>>,
}

impl ChannelTransport {
    /// Wire up a whole cluster.  Element `i` of the result is rank `i`.
    pub fn cluster(processes: usize) -> Result<Vec<ChannelTransport>> {
        check_layout(COORDINATOR, processes)?;
        let mut inbox = vec![None];
        let mut workers = Vec::with_capacity(processes);
        for rank in 1..processes {
            // One slot is enough: every worker sends once.
            let (tx, rx) = bounded(1);
            inbox.push(Some(rx));
            workers.push(ChannelTransport {
                rank,
                processes,
                outbox: Some(tx),
                inbox: vec![],
            });
        }
        let mut ranks = Vec::with_capacity(processes);
        ranks.push(ChannelTransport {
            rank: COORDINATOR,
            processes,
            outbox: None,
            inbox,
        });
        ranks.extend(workers);
        Ok(ranks)
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn processes(&self) -> usize {
        self.processes
    }

    fn send_rows(&mut self, rows: &RowBuffer) -> Result<()> {
        let outbox = self.outbox.take().ok_or_else(|| {
            MandelError::InvalidCluster(format!("rank {} has nowhere to send rows", self.rank))
        })?;
        outbox
            .send(rows.clone())
            .map_err(|_| MandelError::PeerLost(COORDINATOR))
    }

    fn recv_rows(&mut self, source: usize, expect: &FrameShape, timeout: Option<Duration>) -> Result<RowBuffer> {
        if self.rank != COORDINATOR {
            return Err(not_coordinator(self.rank));
        }
        let processes = self.processes;
        let receiver = self
            .inbox
            .get_mut(source)
            .ok_or_else(|| bad_source(source, processes))?
            .take()
            .ok_or_else(|| MandelError::Protocol {
                rank: source,
                reason: "rows were already received from this rank".to_string(),
            })?;
        let rows = match timeout {
            Some(waited) => receiver.recv_timeout(waited).map_err(|err| match err {
                RecvTimeoutError::Timeout => MandelError::GatherTimeout {
                    rank: source,
                    waited,
                },
                RecvTimeoutError::Disconnected => MandelError::PeerLost(source),
            })?,
            None => receiver.recv().map_err(|_| MandelError::PeerLost(source))?,
        };
        expect.check(&rows, source)?;
        Ok(rows)
    }
}

const HELLO_MAGIC: [u8; 4] = [b'M', b'D', b'L', b'H'];
const ROWS_MAGIC: [u8; 4] = [b'M', b'D', b'L', b'R'];
const POLL: Duration = Duration::from_millis(10);

fn to_u32(value: usize, what: &str, rank: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| MandelError::Protocol {
        rank,
        reason: format!("{} {} does not fit in a frame", what, value),
    })
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_magic<R: Read>(reader: &mut R, want: [u8; 4], rank: usize) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != want {
        return Err(MandelError::Protocol {
            rank,
            reason: format!("bad frame marker {:?}", magic),
        });
    }
    Ok(())
}

/// Serialize a row buffer: marker, rank, process count, width, slot
/// count, then every cell, all little-endian `u32`s.
pub fn write_frame<W: Write>(writer: &mut W, rows: &RowBuffer) -> Result<()> {
    let mut frame = Vec::with_capacity(20 + rows.cells.len() * 4);
    frame.extend_from_slice(&ROWS_MAGIC);
    for field in &[
        to_u32(rows.rank, "rank", rows.rank)?,
        to_u32(rows.processes, "process count", rows.rank)?,
        to_u32(rows.width, "width", rows.rank)?,
        to_u32(rows.slots(), "slot count", rows.rank)?,
    ] {
        frame.extend_from_slice(&field.to_le_bytes());
    }
    for cell in &rows.cells {
        frame.extend_from_slice(&cell.to_le_bytes());
    }
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame written by `write_frame` by rank `source`.  The
/// header has to match `expect` before any room is made for the cells.
pub fn read_frame<R: Read>(reader: &mut R, source: usize, expect: &FrameShape) -> Result<RowBuffer> {
    read_magic(reader, ROWS_MAGIC, source)?;
    let rank = read_u32(reader)? as usize;
    let processes = read_u32(reader)? as usize;
    let width = read_u32(reader)? as usize;
    let slots = read_u32(reader)? as usize;
    expect.check_header(source, rank, processes, width, slots)?;
    let mut cells = allocate(expect.cells()?)?;
    let mut bytes = [0u8; 4];
    for cell in cells.iter_mut() {
        reader.read_exact(&mut bytes)?;
        *cell = u32::from_le_bytes(bytes);
    }
    Ok(RowBuffer {
        rank,
        processes,
        width,
        cells,
    })
}

/// Map a socket failure while waiting on `source` to what it means
/// for the gather.
fn classify(err: io::Error, source: usize, waited: Option<Duration>) -> MandelError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => MandelError::GatherTimeout {
            rank: source,
            waited: waited.unwrap_or_default(),
        },
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => MandelError::PeerLost(source),
        _ => MandelError::Network(err),
    }
}

fn with_source(err: MandelError, source: usize, waited: Option<Duration>) -> MandelError {
    match err {
        MandelError::Network(io) => classify(io, source, waited),
        other => other,
    }
}

fn remaining(deadline: Option<Instant>, source: usize, waited: Option<Duration>) -> Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                Err(MandelError::GatherTimeout {
                    rank: source,
                    waited: waited.unwrap_or_default(),
                })
            } else {
                Ok(Some(deadline - now))
            }
        }
    }
}

/// Reads from a socket, re-arming its timeout before every read so
/// that all reads together finish by `deadline`.  A peer that trickles
/// bytes cannot stretch the wait past it.
struct DeadlineReader<'a> {
    stream: &'a mut TcpStream,
    deadline: Option<Instant>,
}

impl<'a> Read for DeadlineReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = match self.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "gather deadline passed"));
                }
                Some(deadline - now)
            }
            None => None,
        };
        self.stream.set_read_timeout(left)?;
        self.stream.read(buf)
    }
}

enum Role {
    Coordinator {
        listener: TcpListener,
        peers: Vec<Option<TcpStream>>,
    },
    Worker {
        stream: TcpStream,
    },
}

/// Ranks in separate processes, joined by TCP.  The coordinator
/// listens; every worker connects, announces its rank, and later
/// sends its rows on the same connection.
pub struct TcpTransport {
    rank: usize,
    processes: usize,
    role: Role,
}

impl TcpTransport {
    /// Become the coordinator, listening on `addr`.
    pub fn bind<A: ToSocketAddrs>(addr: A, processes: usize) -> Result<TcpTransport> {
        TcpTransport::coordinator(TcpListener::bind(addr)?, processes)
    }

    /// Become the coordinator on an already-bound listener.
    pub fn coordinator(listener: TcpListener, processes: usize) -> Result<TcpTransport> {
        check_layout(COORDINATOR, processes)?;
        let mut peers = Vec::with_capacity(processes);
        peers.resize_with(processes, || None);
        Ok(TcpTransport {
            rank: COORDINATOR,
            processes,
            role: Role::Coordinator { listener, peers },
        })
    }

    /// Join the cluster as worker `rank`.  The coordinator may not be
    /// listening yet, so connection attempts repeat until `timeout`
    /// runs out (or forever, without one).
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        rank: usize,
        processes: usize,
        timeout: Option<Duration>,
    ) -> Result<TcpTransport> {
        check_layout(rank, processes)?;
        if rank == COORDINATOR {
            return Err(MandelError::InvalidCluster(
                "the coordinator listens, it does not connect".to_string(),
            ));
        }
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut stream = loop {
            match TcpStream::connect(&addrs[..]) {
                Ok(stream) => break stream,
                Err(err) => {
                    if deadline.map_or(false, |d| Instant::now() >= d) {
                        return Err(MandelError::Network(err));
                    }
                    thread::sleep(POLL);
                }
            }
        };
        debug!("rank {} connected to {:?}", rank, stream.peer_addr().ok());
        let mut hello = Vec::with_capacity(8);
        hello.extend_from_slice(&HELLO_MAGIC);
        hello.extend_from_slice(&to_u32(rank, "rank", rank)?.to_le_bytes());
        stream.write_all(&hello)?;
        Ok(TcpTransport {
            rank,
            processes,
            role: Role::Worker { stream },
        })
    }

    /// The address the coordinator is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.role {
            Role::Coordinator { listener, .. } => Ok(listener.local_addr()?),
            Role::Worker { stream } => Ok(stream.local_addr()?),
        }
    }
}

fn accept_one(listener: &TcpListener, deadline: Option<Instant>, source: usize, waited: Option<Duration>) -> Result<TcpStream> {
    listener.set_nonblocking(deadline.is_some())?;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                debug!("accepted a rank from {}", peer);
                return Ok(stream);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                remaining(deadline, source, waited)?;
                thread::sleep(POLL);
            }
            Err(err) => return Err(MandelError::Network(err)),
        }
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn processes(&self) -> usize {
        self.processes
    }

    fn send_rows(&mut self, rows: &RowBuffer) -> Result<()> {
        match &mut self.role {
            Role::Worker { stream } => write_frame(stream, rows),
            Role::Coordinator { .. } => Err(MandelError::InvalidCluster(
                "the coordinator keeps its own rows".to_string(),
            )),
        }
    }

    fn recv_rows(&mut self, source: usize, expect: &FrameShape, timeout: Option<Duration>) -> Result<RowBuffer> {
        let processes = self.processes;
        let (listener, peers) = match &mut self.role {
            Role::Coordinator { listener, peers } => (listener, peers),
            Role::Worker { .. } => return Err(not_coordinator(self.rank)),
        };
        if source == COORDINATOR || source >= processes {
            return Err(bad_source(source, processes));
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        // Workers connect in any order; park the early ones until their
        // turn comes.
        while peers[source].is_none() {
            let mut stream = accept_one(listener, deadline, source, timeout)?;
            let mut reader = DeadlineReader {
                stream: &mut stream,
                deadline,
            };
            let announced = read_magic(&mut reader, HELLO_MAGIC, source)
                .and_then(|_| Ok(read_u32(&mut reader)? as usize))
                .map_err(|err| with_source(err, source, timeout))?;
            match peers.get_mut(announced) {
                Some(slot) if announced != COORDINATOR && slot.is_none() => *slot = Some(stream),
                _ => {
                    return Err(MandelError::Protocol {
                        rank: announced,
                        reason: "unexpected or duplicate rank announced".to_string(),
                    })
                }
            }
        }

        let mut stream = peers[source].take().ok_or_else(|| MandelError::PeerLost(source))?;
        let mut reader = BufReader::new(DeadlineReader {
            stream: &mut stream,
            deadline,
        });
        read_frame(&mut reader, source, expect).map_err(|err| with_source(err, source, timeout))
    }
}
