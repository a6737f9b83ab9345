//! Backend - Communication Backend Abstractions
//!
//! Provides the group-aware `Backend` trait and `LocalBackend`, an
//! in-process implementation where each rank runs on its own thread and
//! collectives genuinely rendezvous: a call blocks until every member of the
//! group has contributed.
//!
//! Collectives are keyed by the group's member list and a per-group sequence
//! number, so disjoint groups make progress independently and two ranks
//! issuing collectives on the same group must issue them in the same order.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{DistributedError, Result};

/// How long a rank waits for its peers before a collective fails.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Reduce Operations
// =============================================================================

/// Reduction operation for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum all values.
    Sum,
    /// Compute product of all values.
    Product,
    /// Find minimum value.
    Min,
    /// Find maximum value.
    Max,
    /// Compute average of all values.
    Average,
}

impl ReduceOp {
    /// Applies the reduction operation to two f32 values.
    #[must_use]
    pub fn apply_f32(&self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Average => a + b,
            ReduceOp::Product => a * b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    /// Reduces equally sized slices elementwise, in slice order.
    #[must_use]
    pub fn reduce_slices(&self, slices: &[Vec<f32>]) -> Vec<f32> {
        let Some((first, rest)) = slices.split_first() else {
            return Vec::new();
        };

        let mut result = first.clone();
        for slice in rest {
            for (acc, &val) in result.iter_mut().zip(slice) {
                *acc = self.apply_f32(*acc, val);
            }
        }

        if *self == ReduceOp::Average {
            let count = slices.len() as f32;
            for val in &mut result {
                *val /= count;
            }
        }

        result
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Trait for distributed communication backends.
///
/// Every collective names its participants by global rank; the caller must
/// be one of them.
pub trait Backend: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &str;

    /// Returns the global rank of this process.
    fn rank(&self) -> usize;

    /// Returns the total world size.
    fn world_size(&self) -> usize;

    /// Reduces `data` across `ranks`; every member receives the result.
    fn all_reduce(&self, ranks: &[usize], data: &mut [f32], op: ReduceOp) -> Result<()>;

    /// Overwrites `data` on every member with the contents held by `src`.
    fn broadcast(&self, ranks: &[usize], data: &mut [f32], src: usize) -> Result<()>;

    /// Concatenates every member's `send` into `recv`, in group order.
    fn all_gather(&self, ranks: &[usize], send: &[f32], recv: &mut [f32]) -> Result<()>;

    /// Reduces `send` across members and leaves this member's chunk in `recv`.
    fn reduce_scatter(
        &self,
        ranks: &[usize],
        send: &[f32],
        recv: &mut [f32],
        op: ReduceOp,
    ) -> Result<()>;

    /// Blocks until every member has arrived.
    fn barrier(&self, ranks: &[usize]) -> Result<()>;
}

// =============================================================================
// Rendezvous
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectiveKind {
    AllReduce,
    Broadcast,
    AllGather,
    ReduceScatter,
    Barrier,
}

impl fmt::Display for CollectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AllReduce => "all_reduce",
            Self::Broadcast => "broadcast",
            Self::AllGather => "all_gather",
            Self::ReduceScatter => "reduce_scatter",
            Self::Barrier => "barrier",
        };
        f.write_str(name)
    }
}

type Contributions = Arc<Vec<Vec<f32>>>;

/// One in-flight collective.
struct Slot {
    kind: CollectiveKind,
    contributions: Vec<Option<Vec<f32>>>,
    arrived: usize,
    result: Option<Contributions>,
    pending_reads: usize,
}

impl Slot {
    fn new(kind: CollectiveKind, size: usize) -> Self {
        Self {
            kind,
            contributions: vec![None; size],
            arrived: 0,
            result: None,
            pending_reads: size,
        }
    }
}

/// Shared meeting point for all ranks of one local world.
pub(crate) struct Rendezvous {
    slots: Mutex<HashMap<(Vec<usize>, u64), Slot>>,
    ready: Condvar,
    timeout: Duration,
}

impl Rendezvous {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
            timeout,
        }
    }

    /// Deposits this member's contribution and waits for everyone else's.
    fn exchange(
        &self,
        ranks: &[usize],
        seq: u64,
        position: usize,
        kind: CollectiveKind,
        data: Vec<f32>,
    ) -> Result<Contributions> {
        let key = (ranks.to_vec(), seq);
        let deadline = Instant::now() + self.timeout;
        let mut slots = self.slots.lock();

        {
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(kind, ranks.len()));
            if slot.kind != kind {
                return Err(DistributedError::CollectiveMismatch {
                    ranks: ranks.to_vec(),
                    message: format!("{} issued against pending {}", kind, slot.kind),
                });
            }
            slot.contributions[position] = Some(data);
            slot.arrived += 1;
            if slot.arrived == ranks.len() {
                let all = slot
                    .contributions
                    .iter_mut()
                    .map(|c| c.take().unwrap_or_default())
                    .collect();
                slot.result = Some(Arc::new(all));
                self.ready.notify_all();
            }
        }

        loop {
            let ready = match slots.get_mut(&key) {
                Some(slot) => slot.result.clone().map(|result| {
                    slot.pending_reads -= 1;
                    (result, slot.pending_reads == 0)
                }),
                None => {
                    return Err(DistributedError::CollectiveMismatch {
                        ranks: ranks.to_vec(),
                        message: format!("{kind} slot vanished before completion"),
                    })
                }
            };

            if let Some((result, last_reader)) = ready {
                if last_reader {
                    slots.remove(&key);
                }
                return Ok(result);
            }

            if Instant::now() >= deadline {
                return Err(DistributedError::Timeout {
                    ranks: ranks.to_vec(),
                    secs: self.timeout.as_secs(),
                });
            }
            self.ready.wait_until(&mut slots, deadline);
        }
    }
}

// =============================================================================
// Local Backend
// =============================================================================

/// In-process backend: one instance per rank, all sharing a rendezvous.
pub struct LocalBackend {
    rank: usize,
    world_size: usize,
    rendezvous: Arc<Rendezvous>,
    sequences: Mutex<HashMap<Vec<usize>, u64>>,
}

impl LocalBackend {
    /// Creates one backend per rank of a `world_size` world.
    #[must_use]
    pub fn create_world(world_size: usize) -> Vec<Self> {
        Self::create_world_with_timeout(world_size, DEFAULT_TIMEOUT)
    }

    /// Like `create_world`, with a custom collective timeout.
    #[must_use]
    pub fn create_world_with_timeout(world_size: usize, timeout: Duration) -> Vec<Self> {
        let rendezvous = Arc::new(Rendezvous::new(timeout));
        (0..world_size)
            .map(|rank| Self::join(rank, world_size, Arc::clone(&rendezvous)))
            .collect()
    }

    /// Creates a single-rank world.
    #[must_use]
    pub fn single() -> Self {
        Self::join(0, 1, Arc::new(Rendezvous::new(DEFAULT_TIMEOUT)))
    }

    pub(crate) fn join(rank: usize, world_size: usize, rendezvous: Arc<Rendezvous>) -> Self {
        Self {
            rank,
            world_size,
            rendezvous,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    fn position(&self, ranks: &[usize]) -> Result<usize> {
        ranks
            .iter()
            .position(|&r| r == self.rank)
            .ok_or_else(|| DistributedError::NotInGroup {
                rank: self.rank,
                ranks: ranks.to_vec(),
            })
    }

    fn next_seq(&self, ranks: &[usize]) -> u64 {
        let mut sequences = self.sequences.lock();
        let seq = sequences.entry(ranks.to_vec()).or_insert(0);
        let current = *seq;
        *seq += 1;
        current
    }

    fn exchange(
        &self,
        ranks: &[usize],
        kind: CollectiveKind,
        data: Vec<f32>,
    ) -> Result<(usize, Contributions)> {
        let position = self.position(ranks)?;
        let seq = self.next_seq(ranks);
        let all = self
            .rendezvous
            .exchange(ranks, seq, position, kind, data)?;
        Ok((position, all))
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DistributedError::LengthMismatch { expected, actual })
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce(&self, ranks: &[usize], data: &mut [f32], op: ReduceOp) -> Result<()> {
        if ranks.len() == 1 {
            self.position(ranks)?;
            return Ok(());
        }
        let (_, all) = self.exchange(ranks, CollectiveKind::AllReduce, data.to_vec())?;
        for contribution in all.iter() {
            check_len(data.len(), contribution.len())?;
        }
        data.copy_from_slice(&op.reduce_slices(&all));
        Ok(())
    }

    fn broadcast(&self, ranks: &[usize], data: &mut [f32], src: usize) -> Result<()> {
        let src_position = ranks.iter().position(|&r| r == src).ok_or_else(|| {
            DistributedError::NotInGroup {
                rank: src,
                ranks: ranks.to_vec(),
            }
        })?;
        if ranks.len() == 1 {
            self.position(ranks)?;
            return Ok(());
        }
        let contribution = if self.rank == src {
            data.to_vec()
        } else {
            Vec::new()
        };
        let (_, all) = self.exchange(ranks, CollectiveKind::Broadcast, contribution)?;
        let payload = &all[src_position];
        check_len(data.len(), payload.len())?;
        data.copy_from_slice(payload);
        Ok(())
    }

    fn all_gather(&self, ranks: &[usize], send: &[f32], recv: &mut [f32]) -> Result<()> {
        check_len(send.len() * ranks.len(), recv.len())?;
        if ranks.len() == 1 {
            self.position(ranks)?;
            recv.copy_from_slice(send);
            return Ok(());
        }
        let (_, all) = self.exchange(ranks, CollectiveKind::AllGather, send.to_vec())?;
        for (chunk, contribution) in recv.chunks_mut(send.len().max(1)).zip(all.iter()) {
            check_len(send.len(), contribution.len())?;
            chunk.copy_from_slice(contribution);
        }
        Ok(())
    }

    fn reduce_scatter(
        &self,
        ranks: &[usize],
        send: &[f32],
        recv: &mut [f32],
        op: ReduceOp,
    ) -> Result<()> {
        check_len(recv.len() * ranks.len(), send.len())?;
        if ranks.len() == 1 {
            self.position(ranks)?;
            recv.copy_from_slice(send);
            return Ok(());
        }
        let (position, all) =
            self.exchange(ranks, CollectiveKind::ReduceScatter, send.to_vec())?;
        for contribution in all.iter() {
            check_len(send.len(), contribution.len())?;
        }
        let reduced = op.reduce_slices(&all);
        let chunk = recv.len();
        recv.copy_from_slice(&reduced[position * chunk..(position + 1) * chunk]);
        Ok(())
    }

    fn barrier(&self, ranks: &[usize]) -> Result<()> {
        if ranks.len() == 1 {
            self.position(ranks)?;
            return Ok(());
        }
        self.exchange(ranks, CollectiveKind::Barrier, Vec::new())
            .map(|_| ())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_world<R: Send>(
        world_size: usize,
        f: impl Fn(&LocalBackend) -> R + Sync,
    ) -> Vec<R> {
        let backends = LocalBackend::create_world(world_size);
        thread::scope(|s| {
            let handles: Vec<_> = backends.iter().map(|b| s.spawn(|| f(b))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_reduce_op_slices() {
        let slices = vec![vec![1.0, 4.0], vec![3.0, 2.0]];
        assert_eq!(ReduceOp::Sum.reduce_slices(&slices), vec![4.0, 6.0]);
        assert_eq!(ReduceOp::Average.reduce_slices(&slices), vec![2.0, 3.0]);
        assert_eq!(ReduceOp::Max.reduce_slices(&slices), vec![3.0, 4.0]);
        assert_eq!(ReduceOp::Min.reduce_slices(&slices), vec![1.0, 2.0]);
    }

    #[test]
    fn test_all_reduce_sum() {
        let results = run_world(4, |b| {
            let mut data = vec![b.rank() as f32; 3];
            b.all_reduce(&[0, 1, 2, 3], &mut data, ReduceOp::Sum).unwrap();
            data
        });
        for data in results {
            assert_eq!(data, vec![6.0; 3]);
        }
    }

    #[test]
    fn test_broadcast_from_non_zero_source() {
        let results = run_world(3, |b| {
            let mut data = vec![b.rank() as f32 * 10.0; 2];
            b.broadcast(&[0, 1, 2], &mut data, 2).unwrap();
            data
        });
        for data in results {
            assert_eq!(data, vec![20.0, 20.0]);
        }
    }

    #[test]
    fn test_all_gather_and_reduce_scatter() {
        let results = run_world(2, |b| {
            let send = vec![b.rank() as f32 + 1.0; 2];
            let mut gathered = vec![0.0; 4];
            b.all_gather(&[0, 1], &send, &mut gathered).unwrap();

            let mut shard = vec![0.0; 2];
            b.reduce_scatter(&[0, 1], &gathered, &mut shard, ReduceOp::Sum)
                .unwrap();
            (gathered, shard)
        });
        assert_eq!(results[0].0, vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(results[0].1, vec![2.0, 2.0]);
        assert_eq!(results[1].1, vec![4.0, 4.0]);
    }

    #[test]
    fn test_disjoint_groups_progress_independently() {
        let results = run_world(4, |b| {
            let group: Vec<usize> = if b.rank() % 2 == 0 { vec![0, 2] } else { vec![1, 3] };
            let mut data = vec![b.rank() as f32];
            b.all_reduce(&group, &mut data, ReduceOp::Sum).unwrap();
            b.barrier(&[0, 1, 2, 3]).unwrap();
            data[0]
        });
        assert_eq!(results, vec![2.0, 4.0, 2.0, 4.0]);
    }

    #[test]
    fn test_not_in_group() {
        let backend = LocalBackend::single();
        let mut data = vec![1.0];
        let err = backend
            .all_reduce(&[1, 2], &mut data, ReduceOp::Sum)
            .unwrap_err();
        assert!(matches!(err, DistributedError::NotInGroup { rank: 0, .. }));
    }

    #[test]
    fn test_timeout_when_peer_missing() {
        let backends = LocalBackend::create_world_with_timeout(2, Duration::from_millis(50));
        let mut data = vec![1.0];
        let err = backends[0]
            .all_reduce(&[0, 1], &mut data, ReduceOp::Sum)
            .unwrap_err();
        assert!(matches!(err, DistributedError::Timeout { .. }));
    }

    #[test]
    fn test_length_mismatch_detected_by_all_members() {
        let results = run_world(2, |b| {
            let mut data = vec![0.0; b.rank() + 1];
            b.all_reduce(&[0, 1], &mut data, ReduceOp::Sum)
        });
        assert!(results.iter().all(Result::is_err));
    }
}
