// SPDX-License-Identifier: MPL-2.0

//! Owned frame copies and their allocation pool

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct PoolInner {
    free: Vec<Vec<u8>>,
    capacity: usize,
    acquired: u64,
    released: u64,
}

/// Fixed-capacity free list of frame allocations
///
/// Holds at most `capacity` idle buffers (one per capture slot). Frames
/// dropped while the list is full simply free their memory.
#[derive(Clone, Default)]
pub struct FramePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free: Vec::with_capacity(capacity),
                capacity,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy `data` into a pooled buffer
    pub fn copy_from(&self, data: &[u8]) -> FrameBuffer {
        let mut buf = {
            let mut inner = self.lock();
            inner.acquired += 1;
            inner.free.pop().unwrap_or_default()
        };
        buf.clear();
        buf.extend_from_slice(data);
        FrameBuffer {
            data: buf,
            pool: self.clone(),
        }
    }

    fn recycle(&self, buf: Vec<u8>) {
        let mut inner = self.lock();
        inner.released += 1;
        if inner.free.len() < inner.capacity {
            inner.free.push(buf);
        }
    }

    /// Frames handed out and not yet dropped
    pub fn outstanding(&self) -> u64 {
        let inner = self.lock();
        inner.acquired - inner.released
    }

    /// Total frames returned to the pool
    pub fn released(&self) -> u64 {
        self.lock().released
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("FramePool")
            .field("capacity", &inner.capacity)
            .field("idle", &inner.free.len())
            .field("outstanding", &(inner.acquired - inner.released))
            .finish()
    }
}

/// Owned copy of one captured frame
///
/// Dropping the frame returns its allocation to the pool it came from.
pub struct FrameBuffer {
    data: Vec<u8>,
    pool: FramePool,
}

impl FrameBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.pool.recycle(std::mem::take(&mut self.data));
    }
}
