//! Communication abstraction for intra-process (test) and inter-process (MPI)
//! message passing.
//!
//! Wire conventions for the router's protocols:
//! - Counts travel as LE `u32`; node records are `#[repr(C)]`
//!   `bytemuck::Pod` structs cast to bytes (see [`crate::node`]).
//! - Matching relies on per-`(src, dst, tag)` FIFO order, which both the
//!   mailbox backend and MPI provide.
//! - Receivers may truncate to their posted length; the router exchanges
//!   sizes first wherever exact lengths matter.

use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Non-blocking communication interface (minimal by design).
///
/// Implementors provide asynchronous send/receive operations and waitable
/// handles. Send handles resolve to `None`; receive handles resolve to the
/// message bytes.
pub trait Communicator: Send + Sync {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a non-blocking send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a non-blocking receive of up to `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    /// Rank of this process (0..size-1).
    fn rank(&self) -> usize;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier (default: no-op for single-process comms).
    fn barrier(&self) {}
}

/// Compile-time no-op comm for pure serial use and single-rank routers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: intra-process, one thread per rank ---

type Key = (u64, usize, usize, u16); // (universe, src, dst, tag)

#[derive(Default)]
struct Slot {
    q: VecDeque<Vec<u8>>,
}

struct Mailbox {
    map: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(|| Mailbox {
    map: Mutex::new(HashMap::new()),
});

static NEXT_UNIVERSE: AtomicU64 = AtomicU64::new(0);

fn mailbox_entry(key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
    let mut g = MAILBOX.map.lock().expect("MAILBOX poisoned");
    g.entry(key)
        .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
        .clone()
}

pub struct LocalSendHandle;

impl Wait for LocalSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

pub struct LocalRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("Slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("q non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

/// Epoch barrier shared by every rank of one universe.
#[derive(Debug)]
struct EpochBarrier {
    size: usize,
    arrived: usize,
    epoch: usize,
}

/// Mailbox-backed communicator for running several ranks as threads of one
/// process. Each group of ranks shares a universe id so that concurrently
/// running groups (e.g. parallel tests) never see each other's messages.
#[derive(Clone, Debug)]
pub struct LocalComm {
    universe: u64,
    rank: usize,
    size: usize,
    barrier: Arc<(Mutex<EpochBarrier>, Condvar)>,
}

impl LocalComm {
    /// Create all ranks of a fresh universe at once.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        let universe = NEXT_UNIVERSE.fetch_add(1, Ordering::Relaxed);
        let barrier = Arc::new((
            Mutex::new(EpochBarrier {
                size,
                arrived: 0,
                epoch: 0,
            }),
            Condvar::new(),
        ));
        (0..size)
            .map(|rank| LocalComm {
                universe,
                rank,
                size,
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.universe, self.rank, peer, tag);
        let entry = mailbox_entry(key);
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("Slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        LocalSendHandle
    }

    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle {
        let key = (self.universe, peer, self.rank, tag);
        LocalRecvHandle {
            cell: mailbox_entry(key),
            want_len: len,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        let (lock, cv) = &*self.barrier;
        let mut b = lock.lock().expect("barrier poisoned");
        let epoch = b.epoch;
        b.arrived += 1;
        if b.arrived == b.size {
            b.arrived = 0;
            b.epoch += 1;
            cv.notify_all();
        } else {
            while b.epoch == epoch {
                b = cv.wait(b).expect("Condvar poisoned");
            }
        }
    }
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// MPI-backed communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().expect("MPI initialization failed");
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            use mpi::request::StaticScope;
            let boxed = buf.to_vec().into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice: &[u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle {
            use mpi::request::StaticScope;
            let boxed = vec![0u8; len].into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice_mut: &mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
            MpiRecvHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
                len,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn barrier(&self) {
            self.world.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiSendHandle::drop] send not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            let ptr = self.buf.take()?;
            let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            let mut v = Vec::from(boxed);
            v.truncate(self.len);
            Some(v)
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiRecvHandle::drop] recv not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_round_trip() {
        let comms = LocalComm::universe(2);
        let msg = b"hello";
        let _s = comms[0].isend(1, 7, msg);

        let h = comms[1].irecv(0, 7, msg.len());
        let got = h.wait().unwrap();
        assert_eq!(&got, msg);
    }

    #[test]
    fn local_fifo_order() {
        let comms = LocalComm::universe(2);
        for i in 0..10u8 {
            let _ = comms[0].isend(1, 3, &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let h = comms[1].irecv(0, 3, 1);
            out.push(h.wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn truncation_is_ok() {
        let comms = LocalComm::universe(2);
        let _ = comms[0].isend(1, 5, &[1, 2, 3, 4, 5, 6]);
        let h = comms[1].irecv(0, 5, 4);
        assert_eq!(h.wait().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn universes_are_isolated() {
        let a = LocalComm::universe(2);
        let b = LocalComm::universe(2);
        let _ = a[0].isend(1, 9, &[42]);
        let _ = b[0].isend(1, 9, &[43]);
        // Each universe sees only its own message.
        assert_eq!(b[1].irecv(0, 9, 1).wait().unwrap(), vec![43]);
        assert_eq!(a[1].irecv(0, 9, 1).wait().unwrap(), vec![42]);
    }

    #[test]
    fn zero_length_messages_match() {
        let comms = LocalComm::universe(2);
        let _ = comms[0].isend(1, 11, &[]);
        let got = comms[1].irecv(0, 11, 0).wait().unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn barrier_holds_ranks_together() {
        use std::sync::atomic::AtomicUsize;

        let comms = LocalComm::universe(3);
        let entered = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let entered = Arc::clone(&entered);
                std::thread::spawn(move || {
                    for round in 1..=4usize {
                        entered.fetch_add(1, Ordering::SeqCst);
                        comm.barrier();
                        // Nobody passes the barrier before all ranks of the
                        // current round have arrived.
                        assert!(entered.load(Ordering::SeqCst) >= round * comm.size());
                        comm.barrier();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
