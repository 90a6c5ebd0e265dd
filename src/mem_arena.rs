//! Hard-capped memory arena shared by the driver and all batches.
//!
//! Every sizeable allocation in a run is accounted against a single byte
//! budget. Components either take an owned [`ArenaBuf`] (a zero-filled byte
//! buffer that returns its bytes on drop) or, for memory that lives inside
//! another structure such as a memory map or a table, a [`ArenaLease`]
//! budget guard. A request that would push the total past the cap is
//! refused.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared byte budget. Construct once per run and hand out `Arc` clones.
#[derive(Debug)]
pub struct MemArena {
    cap: usize,
    used: AtomicUsize,
}

/// Refused allocation: the request would exceed the cap.
#[derive(Debug)]
pub struct AllocError {
    pub requested: usize,
    pub free: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory limit exceeded: requested {} bytes, {} bytes free",
            self.requested, self.free
        )
    }
}

impl std::error::Error for AllocError {}

impl MemArena {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            cap: cap_bytes,
            used: AtomicUsize::new(0),
        }
    }

    /// Total budget in bytes.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Bytes still available.
    pub fn free_space(&self) -> usize {
        self.cap.saturating_sub(self.used())
    }

    fn reserve(&self, nbytes: usize) -> Result<(), AllocError> {
        let mut cur = self.used.load(Ordering::Relaxed);
        loop {
            let next = match cur.checked_add(nbytes) {
                Some(n) if n <= self.cap => n,
                _ => {
                    return Err(AllocError {
                        requested: nbytes,
                        free: self.cap.saturating_sub(cur),
                    });
                }
            };
            match self
                .used
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    fn release(&self, nbytes: usize) {
        self.used.fetch_sub(nbytes, Ordering::AcqRel);
    }

    /// Allocate an owned, empty buffer of exactly `nbytes` capacity.
    pub fn alloc(arena: &Arc<MemArena>, nbytes: usize) -> Result<ArenaBuf, AllocError> {
        arena.reserve(nbytes)?;
        Ok(ArenaBuf {
            data: Vec::with_capacity(nbytes),
            cap: nbytes,
            arena: Arc::clone(arena),
        })
    }

    /// Reserve budget for `nbytes` held elsewhere (a memory map, a table).
    /// The reservation is released when the lease drops.
    pub fn charge(arena: &Arc<MemArena>, nbytes: usize) -> Result<ArenaLease, AllocError> {
        arena.reserve(nbytes)?;
        Ok(ArenaLease {
            nbytes,
            arena: Arc::clone(arena),
        })
    }
}

/// Owned byte buffer drawn from the arena. The capacity is fixed at
/// allocation time; callers stage data up to `remaining()` bytes and flush
/// before exceeding it.
#[derive(Debug)]
pub struct ArenaBuf {
    data: Vec<u8>,
    cap: usize,
    arena: Arc<MemArena>,
}

impl ArenaBuf {
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.cap - self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Append bytes. The caller checks `remaining()` first; overflowing the
    /// fixed capacity is a logic error.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.remaining());
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for ArenaBuf {
    fn drop(&mut self) {
        self.arena.release(self.cap);
    }
}

/// Budget reservation for memory owned by another structure.
pub struct ArenaLease {
    nbytes: usize,
    arena: Arc<MemArena>,
}

impl ArenaLease {
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }
}

impl Drop for ArenaLease {
    fn drop(&mut self) {
        self.arena.release(self.nbytes);
    }
}
