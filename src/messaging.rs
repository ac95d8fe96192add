//! Message Passing Substrate
//!
//! The elimination protocol is written against the [`Communicator`] trait: blocking
//! tagged point-to-point messages, a first-class collective broadcast and a barrier.
//! [`LocalCluster`] is the bundled implementation that runs every rank as an OS thread
//! on a single machine; each rank keeps strictly private data and exchanges only
//! copied buffers through per-rank mailboxes, so swapping in a cross-machine
//! transport only requires another implementation of the same trait.
//!

use super::util::*;
use crate::parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// every message carries a type tag; receiving matches on (source, tag, step)
/// so a message can never be mistaken for one of another protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTag {
    // distribution stage, coordinator to workers
    ColumnCount,
    ColumnIndices,
    ColumnData,
    // scalar broadcasts before the elimination starts
    Dimension,
    RightHandSide,
    // pivot row gather at step k, non-owners to the owner
    PivotColumnCount,
    PivotColumnIndices,
    PivotRowValues,
    // per-step broadcasts from the owner
    PivotRow,
    PivotValue,
    RhsEntry,
    PivotColumnBelow,
    // collection stage, workers back to the coordinator
    ResultColumnCount,
    ResultColumnIndices,
    ResultColumnData,
}

/// the serialized content of a message; a variant mismatch on receive is a protocol
/// error and terminates the process, there is no channel to return a typed failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Count(usize),
    Indices(Vec<ColumnIndex>),
    Values(Vec<Scalar>),
    Scalar(Scalar),
}

impl Payload {
    pub fn into_count(self) -> usize {
        match self {
            Payload::Count(count) => count,
            payload => panic!("protocol error: expected Count, received {:?}", payload),
        }
    }
    pub fn into_indices(self) -> Vec<ColumnIndex> {
        match self {
            Payload::Indices(indices) => indices,
            payload => panic!("protocol error: expected Indices, received {:?}", payload),
        }
    }
    pub fn into_values(self) -> Vec<Scalar> {
        match self {
            Payload::Values(values) => values,
            payload => panic!("protocol error: expected Values, received {:?}", payload),
        }
    }
    pub fn into_scalar(self) -> Scalar {
        match self {
            Payload::Scalar(value) => value,
            payload => panic!("protocol error: expected Scalar, received {:?}", payload),
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    source: RankIndex,
    tag: MessageTag,
    /// the elimination step this message belongs to; stages outside the elimination
    /// loop use fixed pseudo-steps so they can never alias a step message
    step: usize,
    payload: Payload,
}

/// pseudo-step for the distribution stage
pub const STEP_DISTRIBUTION: usize = usize::MAX;
/// pseudo-step for the collection stage
pub const STEP_COLLECTION: usize = usize::MAX - 1;

pub trait Communicator {
    /// this participant's identity, 0 <= rank < size
    fn rank(&self) -> RankIndex;
    /// the number of cooperating participants
    fn size(&self) -> usize;
    /// blocking send: returns once the transport accepted the message
    fn send(&self, destination: RankIndex, tag: MessageTag, step: usize, payload: Payload);
    /// blocking receive of the single message matching (source, tag, step)
    fn recv(&self, source: RankIndex, tag: MessageTag, step: usize) -> Payload;
    /// every participant must arrive before any may continue
    fn barrier(&self);

    /// collective broadcast as a first-class operation: the root sends to every other
    /// participant and everyone returns the same payload; the root passes `Some(payload)`,
    /// all others pass `None`
    fn broadcast(&self, root: RankIndex, tag: MessageTag, step: usize, payload: Option<Payload>) -> Payload {
        if self.rank() == root {
            let payload = payload.expect("broadcast root must provide the payload");
            for destination in 0..self.size() {
                if destination != root {
                    self.send(destination, tag, step, payload.clone());
                }
            }
            payload
        } else {
            assert!(payload.is_none(), "only the broadcast root may provide a payload");
            self.recv(root, tag, step)
        }
    }
}

struct Mailbox {
    queue: Mutex<Vec<Envelope>>,
    arrived: Condvar,
}

struct BarrierState {
    count: usize,
    generation: usize,
}

/// a single-machine group of ranks communicating through in-memory mailboxes;
/// create one cluster, then hand each rank thread its own [`RankChannel`]
pub struct LocalCluster {
    size: usize,
    mailboxes: Vec<Mailbox>,
    barrier_state: Mutex<BarrierState>,
    barrier_released: Condvar,
}

impl LocalCluster {
    pub fn new(size: usize) -> Arc<Self> {
        assert!(size > 0, "at least one rank required");
        let mailboxes = (0..size)
            .map(|_| Mailbox {
                queue: Mutex::new(Vec::new()),
                arrived: Condvar::new(),
            })
            .collect();
        Arc::new(Self {
            size,
            mailboxes,
            barrier_state: Mutex::new(BarrierState { count: 0, generation: 0 }),
            barrier_released: Condvar::new(),
        })
    }

    pub fn channel(self: &Arc<Self>, rank: RankIndex) -> RankChannel {
        assert!(rank < self.size, "invalid rank {} for cluster of size {}", rank, self.size);
        RankChannel {
            cluster: Arc::clone(self),
            rank,
        }
    }
}

/// one rank's handle into a [`LocalCluster`]
pub struct RankChannel {
    cluster: Arc<LocalCluster>,
    rank: RankIndex,
}

impl Communicator for RankChannel {
    fn rank(&self) -> RankIndex {
        self.rank
    }

    fn size(&self) -> usize {
        self.cluster.size
    }

    fn send(&self, destination: RankIndex, tag: MessageTag, step: usize, payload: Payload) {
        assert!(destination < self.cluster.size, "invalid destination rank {}", destination);
        assert!(destination != self.rank, "rank {} must not message itself", self.rank);
        let mailbox = &self.cluster.mailboxes[destination];
        let mut queue = mailbox.queue.lock();
        queue.push(Envelope {
            source: self.rank,
            tag,
            step,
            payload,
        });
        mailbox.arrived.notify_all();
    }

    fn recv(&self, source: RankIndex, tag: MessageTag, step: usize) -> Payload {
        assert!(source < self.cluster.size, "invalid source rank {}", source);
        let mailbox = &self.cluster.mailboxes[self.rank];
        let mut queue = mailbox.queue.lock();
        loop {
            if let Some(position) = queue
                .iter()
                .position(|envelope| envelope.source == source && envelope.tag == tag && envelope.step == step)
            {
                return queue.swap_remove(position).payload;
            }
            mailbox.arrived.wait(&mut queue);
        }
    }

    fn barrier(&self) {
        let mut state = self.cluster.barrier_state.lock();
        let generation = state.generation;
        state.count += 1;
        if state.count == self.cluster.size {
            state.count = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cluster.barrier_released.notify_all();
        } else {
            while state.generation == generation {
                self.cluster.barrier_released.wait(&mut state);
            }
        }
    }
}
