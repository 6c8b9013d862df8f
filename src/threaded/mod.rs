//! Shared-memory all-reduce for threads of one process.
//!
//! Each call registers the caller's buffer, waits for every thread to do
//! the same, combines a contiguous slice of the index range across all
//! registered buffers, writes the result back into every buffer, and waits
//! again so nobody returns before the whole vector is done.

mod barrier;

pub use barrier::GenerationBarrier;

use crate::client::AllReduce;
use crate::error::{Result, SpanError};
use crate::types::NodeIdentity;
use bytemuck::Pod;
use std::any::TypeId;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

/// A buffer one thread has offered for the current round.
#[derive(Clone, Copy)]
struct Slot {
    addr: usize,
    len: usize,
    type_id: TypeId,
    type_name: &'static str,
}

/// State shared by every thread of a group. Freed with the last handle.
struct Shared {
    slots: Mutex<Vec<Option<Slot>>>,
    barrier: GenerationBarrier,
}

/// One thread's handle on a shared-memory all-reduce group.
pub struct ThreadAllReduce {
    identity: NodeIdentity,
    shared: Arc<Shared>,
}

impl ThreadAllReduce {
    /// Create a group of `total` participants, returning one handle per
    /// node in node order. Move each handle onto its own thread.
    pub fn group(total: u64, quiet: bool) -> Result<Vec<Self>> {
        if total == 0 {
            return Err(SpanError::InvalidNode { node: 0, total });
        }
        let shared = Arc::new(Shared {
            slots: Mutex::new(vec![None; total as usize]),
            barrier: GenerationBarrier::new(total as usize),
        });

        if !quiet {
            tracing::info!(total, "created thread all-reduce group");
        }

        (0..total)
            .map(|node| {
                Ok(Self {
                    identity: NodeIdentity::new(total, node, quiet)?,
                    shared: Arc::clone(&shared),
                })
            })
            .collect()
    }

    /// Offer `buf` for this round. The slot is cleared when the returned
    /// guard drops, on every exit path.
    fn register<T: Pod>(&self, buf: &mut [T]) -> Result<Registration<'_>> {
        let mut slots = self
            .shared
            .slots
            .lock()
            .map_err(|_| SpanError::LockPoisoned("thread group slots"))?;
        slots[self.identity.node() as usize] = Some(Slot {
            addr: buf.as_mut_ptr() as usize,
            len: buf.len(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        });
        Ok(Registration { owner: self })
    }

    /// Snapshot the registered buffers, checking they all match ours.
    fn registered<T: Pod>(&self, len: usize) -> Result<Vec<*mut T>> {
        let slots = self
            .shared
            .slots
            .lock()
            .map_err(|_| SpanError::LockPoisoned("thread group slots"))?;

        let mut ptrs = Vec::with_capacity(slots.len());
        for (node, slot) in slots.iter().enumerate() {
            let slot = slot.ok_or(SpanError::UnregisteredBuffer { node: node as u64 })?;
            if slot.type_id != TypeId::of::<T>() {
                return Err(SpanError::ElementMismatch {
                    expected: std::any::type_name::<T>(),
                    actual: slot.type_name,
                });
            }
            if slot.len != len {
                return Err(SpanError::BufferLengthMismatch {
                    expected: len,
                    actual: slot.len,
                });
            }
            ptrs.push(slot.addr as *mut T);
        }
        Ok(ptrs)
    }
}

impl AllReduce for ThreadAllReduce {
    fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    fn all_reduce<T, F>(&mut self, buf: &mut [T], op: F) -> Result<()>
    where
        T: Pod + Send,
        F: Fn(T, T) -> T,
    {
        let n = buf.len();
        let _registration = self.register(buf)?;
        self.shared.barrier.wait()?;

        // The table is frozen between the two barriers, so every thread
        // reaches the same verdict. Failing threads still wait at the second
        // barrier, keeping a retry out of this round's table.
        let combined = self.registered::<T>(n).map(|ptrs| {
            let range = owned_range(self.identity.node(), self.identity.total(), n as u64);
            for i in range {
                // SAFETY: every pointer came from a live `&mut [T]` of length
                // `n` whose owner is parked in this call until the second
                // barrier. Index `i` belongs to this thread alone, so no
                // other thread reads or writes it until then.
                unsafe {
                    let mut acc = ptrs[0].add(i).read();
                    for p in &ptrs[1..] {
                        acc = op(acc, p.add(i).read());
                    }
                    for p in &ptrs {
                        p.add(i).write(acc);
                    }
                }
            }
        });

        self.shared.barrier.wait()?;
        combined
    }
}

/// Clears its owner's slot when dropped.
struct Registration<'a> {
    owner: &'a ThreadAllReduce,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .owner
            .shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slots[self.owner.identity.node() as usize] = None;
    }
}

/// Block partition of `0..n` over `total` threads; the last thread also
/// takes the remainder. With fewer elements than threads, thread `k` owns
/// element `k` if it exists.
fn owned_range(node: u64, total: u64, n: u64) -> Range<usize> {
    let block = n / total;
    let (start, end) = if block == 0 {
        if node < n { (node, node + 1) } else { (0, 0) }
    } else if node == total - 1 {
        (node * block, n)
    } else {
        (node * block, (node + 1) * block)
    };
    start as usize..end as usize
}
