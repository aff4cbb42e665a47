// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Rank Communication
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Cross-rank reductions for domain-decomposed transport.
//!
//! The accelerator only ever needs an all-reduce sum of tallies and surface
//! currents. [`SerialCommunicator`] is the single-domain no-op;
//! [`LocalCommunicator`] runs several ranks as threads of one process and
//! stands in for a message-passing backend in tests.

use cmfd_types::error::{CmfdError, CmfdResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn num_ranks(&self) -> usize;

    /// Replace `buf` on every rank by the element-wise sum over all ranks.
    /// Every rank must call this collectively with equal buffer lengths.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> CmfdResult<()>;
}

/// Single rank, reductions are the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f64]) -> CmfdResult<()> {
        Ok(())
    }
}

struct SharedReduction {
    barrier: Barrier,
    accum: Mutex<Vec<f64>>,
    mismatch: AtomicBool,
}

/// One rank of an in-process group created by [`LocalCommunicator::group`].
pub struct LocalCommunicator {
    rank: usize,
    num_ranks: usize,
    shared: Arc<SharedReduction>,
}

impl LocalCommunicator {
    /// Create `num_ranks` connected ranks, to be moved onto separate threads.
    pub fn group(num_ranks: usize) -> CmfdResult<Vec<LocalCommunicator>> {
        if num_ranks == 0 {
            return Err(CmfdError::Communication(
                "A communicator group needs at least one rank".to_string(),
            ));
        }
        let shared = Arc::new(SharedReduction {
            barrier: Barrier::new(num_ranks),
            accum: Mutex::new(Vec::new()),
            mismatch: AtomicBool::new(false),
        });
        Ok((0..num_ranks)
            .map(|rank| LocalCommunicator {
                rank,
                num_ranks,
                shared: Arc::clone(&shared),
            })
            .collect())
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) -> CmfdResult<()> {
        let shared = &self.shared;
        // Leader resets the accumulator once everybody has left the previous call.
        shared.barrier.wait();
        if self.rank == 0 {
            let mut accum = shared.accum.lock();
            accum.clear();
            accum.resize(buf.len(), 0.0);
            shared.mismatch.store(false, Ordering::SeqCst);
        }
        shared.barrier.wait();
        {
            let mut accum = shared.accum.lock();
            if accum.len() == buf.len() {
                for (a, v) in accum.iter_mut().zip(buf.iter()) {
                    *a += v;
                }
            } else {
                shared.mismatch.store(true, Ordering::SeqCst);
            }
        }
        shared.barrier.wait();
        let failed = shared.mismatch.load(Ordering::SeqCst);
        if !failed {
            buf.copy_from_slice(&shared.accum.lock());
        }
        shared.barrier.wait();
        if failed {
            return Err(CmfdError::Communication(format!(
                "Rank {}: all-reduce buffer lengths differ across ranks",
                self.rank
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_serial_is_identity() {
        let comm = SerialCommunicator;
        let mut buf = vec![1.0, 2.0];
        comm.all_reduce_sum(&mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0]);
        assert_eq!(comm.num_ranks(), 1);
    }

    #[test]
    fn test_local_group_sums_across_ranks() {
        let ranks = LocalCommunicator::group(4).unwrap();
        let results: Vec<Vec<f64>> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut out = Vec::new();
                        // Two consecutive reductions reuse the shared buffer.
                        for round in 0..2 {
                            let r = comm.rank() as f64;
                            let mut buf = vec![r, 1.0, round as f64];
                            comm.all_reduce_sum(&mut buf).unwrap();
                            out.extend(buf);
                        }
                        out
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for r in results {
            assert_eq!(r, vec![6.0, 4.0, 0.0, 6.0, 4.0, 4.0]);
        }
    }

    #[test]
    fn test_local_group_rejects_mismatched_lengths() {
        let ranks = LocalCommunicator::group(2).unwrap();
        let errors: Vec<bool> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut buf = vec![1.0; 2 + comm.rank()];
                        comm.all_reduce_sum(&mut buf).is_err()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(errors, vec![true, true]);
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(LocalCommunicator::group(0).is_err());
    }
}
