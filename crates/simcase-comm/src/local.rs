//! In-process communicators.
//!
//! [`LocalComm`] wires N ranks together with one channel per ordered
//! rank pair, so `recv_from` is addressed rather than from-any. Used
//! by tests and single-machine multi-threaded runs. [`SoloComm`] is
//! the degenerate serial communicator.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{CommError, Communicator, Result};

/// One rank of an in-process universe.
pub struct LocalComm {
    rank: usize,
    size: usize,
    /// senders[j] carries messages from this rank to rank j.
    senders: Vec<Sender<Vec<u8>>>,
    /// receivers[j] carries messages from rank j to this rank.
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl LocalComm {
    /// Build a fully-connected universe of `n` ranks. Move each
    /// element into its own thread to simulate a parallel run.
    pub fn universe(n: usize) -> Vec<LocalComm> {
        assert!(n > 0, "empty communicator");

        // channel for every ordered pair (from, to)
        let mut mesh: Vec<Vec<(Sender<Vec<u8>>, Receiver<Vec<u8>>)>> = (0..n)
            .map(|_| (0..n).map(|_| unbounded()).collect())
            .collect();

        let mut comms = Vec::with_capacity(n);
        for rank in 0..n {
            let senders = (0..n).map(|to| mesh[rank][to].0.clone()).collect();
            let receivers = (0..n)
                .map(|from| std::mem::replace(&mut mesh[from][rank].1, unbounded().1))
                .collect();
            comms.push(LocalComm { rank, size: n, senders, receivers });
        }
        comms
    }

    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer >= self.size {
            return Err(CommError::NoSuchPeer { rank: self.rank, peer, size: self.size });
        }
        Ok(())
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, to: usize, message: Vec<u8>) -> Result<()> {
        self.check_peer(to)?;
        self.senders[to]
            .send(message)
            .map_err(|_| CommError::SendFailed { to })
    }

    fn recv_from(&self, from: usize) -> Result<Vec<u8>> {
        self.check_peer(from)?;
        self.receivers[from]
            .recv()
            .map_err(|_| CommError::RecvFailed { from })
    }
}

/// Serial run: one rank, no peers.
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, to: usize, _message: Vec<u8>) -> Result<()> {
        Err(CommError::NoSuchPeer { rank: 0, peer: to, size: 1 })
    }

    fn recv_from(&self, from: usize) -> Result<Vec<u8>> {
        Err(CommError::NoSuchPeer { rank: 0, peer: from, size: 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_point_to_point() {
        let mut comms = LocalComm::universe(2);
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            a.send(1, b"ping".to_vec()).unwrap();
            a.recv_from(1).unwrap()
        });
        assert_eq!(b.recv_from(0).unwrap(), b"ping".to_vec());
        b.send(0, b"pong".to_vec()).unwrap();
        assert_eq!(handle.join().unwrap(), b"pong".to_vec());
    }

    #[test]
    fn test_addressed_receive_ignores_other_peers() {
        let mut comms = LocalComm::universe(3);
        let c = comms.pop().unwrap();
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();

        b.send(2, b"from-1".to_vec()).unwrap();
        a.send(2, b"from-0".to_vec()).unwrap();

        // Addressed receive: rank 1's message does not satisfy a
        // receive posted for rank 0.
        assert_eq!(c.recv_from(0).unwrap(), b"from-0".to_vec());
        assert_eq!(c.recv_from(1).unwrap(), b"from-1".to_vec());
    }

    #[test]
    fn test_bad_peer_rejected() {
        let comm = LocalComm::universe(1).pop().unwrap();
        assert!(matches!(
            comm.send(5, Vec::new()),
            Err(CommError::NoSuchPeer { peer: 5, .. })
        ));
    }
}
