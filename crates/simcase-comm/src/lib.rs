//! # simcase-comm
//!
//! Interface for a group of ranks that can exchange messages, plus the
//! explicit communication schedules the file layer propagates read
//! results along. The underlying transport can in principle be TCP,
//! shared channels, or a higher level abstraction like MPI.

pub mod local;
pub mod schedule;

pub use local::{LocalComm, SoloComm};
pub use schedule::CommSchedule;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Rank of the designated master in every schedule.
pub const MASTER: usize = 0;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("send to rank {to} failed: peer disconnected")]
    SendFailed { to: usize },

    #[error("receive from rank {from} failed: peer disconnected")]
    RecvFailed { from: usize },

    #[error("rank {rank} has no peer {peer} (size {size})")]
    NoSuchPeer { rank: usize, peer: usize, size: usize },

    #[error("broadcast root called without a payload")]
    MissingRootPayload,

    #[error("payload codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CommError>;

/// A group of ranks exchanging point-to-point messages.
///
/// Sends and receives are blocking with no timeout at this layer; a
/// stalled peer stalls its neighbors, which is an accepted property of
/// the collective approach. Run under a framework that detects hangs.
pub trait Communicator: Send {
    /// Rank of this process within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Send a message to a peer.
    fn send(&self, to: usize, message: Vec<u8>) -> Result<()>;

    /// Receive the next message from the given peer, blocking until
    /// one is available.
    fn recv_from(&self, from: usize) -> Result<Vec<u8>>;
}

/// Propagate a payload from the master along a schedule.
///
/// Each rank receives from its upstream rank before any downstream
/// send begins, so no rank forwards partial data. The master must
/// supply `payload`; every other rank must pass `None`.
pub fn broadcast_with_schedule(
    comm: &dyn Communicator,
    sched: &CommSchedule,
    payload: Option<Vec<u8>>,
) -> Result<Vec<u8>> {
    let rank = comm.rank();

    let value = match sched.above(rank) {
        Some(above) => {
            trace!(rank, from = above, "broadcast receive");
            comm.recv_from(above)?
        }
        None => payload.ok_or(CommError::MissingRootPayload)?,
    };
    for &below in sched.below(rank) {
        trace!(rank, to = below, len = value.len(), "broadcast forward");
        comm.send(below, value.clone())?;
    }
    Ok(value)
}

/// Typed wrapper over [`broadcast_with_schedule`] using bincode.
pub fn broadcast_value<T: Serialize + DeserializeOwned>(
    comm: &dyn Communicator,
    sched: &CommSchedule,
    value: Option<&T>,
) -> Result<T> {
    let payload = value.map(bincode::serialize).transpose()?;
    let bytes = broadcast_with_schedule(comm, sched, payload)?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_solo_broadcast_is_identity() {
        let comm = SoloComm;
        let sched = CommSchedule::for_size(1);
        let out = broadcast_with_schedule(&comm, &sched, Some(vec![1, 2, 3])).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_solo_root_needs_payload() {
        let comm = SoloComm;
        let sched = CommSchedule::for_size(1);
        let err = broadcast_with_schedule(&comm, &sched, None).unwrap_err();
        assert!(matches!(err, CommError::MissingRootPayload));
    }

    fn run_broadcast(n: usize, sched: CommSchedule) {
        let comms = LocalComm::universe(n);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let sched = sched.clone();
                thread::spawn(move || {
                    let payload = (comm.rank() == MASTER).then(|| b"state".to_vec());
                    broadcast_with_schedule(&comm, &sched, payload).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), b"state".to_vec());
        }
    }

    #[test]
    fn test_linear_broadcast_all_ranks_agree() {
        run_broadcast(4, CommSchedule::linear(4));
    }

    #[test]
    fn test_tree_broadcast_all_ranks_agree() {
        run_broadcast(7, CommSchedule::tree(7));
        run_broadcast(16, CommSchedule::tree(16));
    }

    #[test]
    fn test_typed_broadcast() {
        let comms = LocalComm::universe(3);
        let sched = CommSchedule::tree(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let sched = sched.clone();
                thread::spawn(move || {
                    let value = (comm.rank() == MASTER).then_some(("volScalarField", 42u64));
                    broadcast_value::<(String, u64)>(
                        &comm,
                        &sched,
                        value.map(|(c, n)| (c.to_string(), n)).as_ref(),
                    )
                    .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), ("volScalarField".to_string(), 42));
        }
    }
}
