//! Fixed-size buffer pool
//!
//! Every relay connection borrows one read buffer for its whole lifetime.
//! Under connection churn the pool hands previously released buffers back
//! out instead of allocating, so the number of live allocations tracks the
//! peak number of concurrent connections rather than the total seen.

use bytes::BytesMut;
use log::trace;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::BufferPoolConfig;

/// A thread-safe pool of equally sized byte buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Idle buffers ready for reuse
    free: Mutex<Vec<BytesMut>>,

    /// Pool configuration
    config: BufferPoolConfig,

    /// Buffers allocated over the lifetime of the pool
    allocated: AtomicUsize,

    /// Buffers currently borrowed
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                config,
                allocated: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a new unbounded pool of buffers with the given size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::new(BufferPoolConfig::with_buffer_size(buffer_size))
    }

    /// Borrow a buffer, reusing an idle one when available
    ///
    /// The buffer goes back to the pool when the returned guard is dropped.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.free_list().pop();
        let buf = match reused {
            Some(buf) => buf,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                let mut buf = BytesMut::with_capacity(self.buffer_size());
                buf.resize(self.buffer_size(), 0);
                buf
            }
        };
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    /// Return a borrowed buffer for reuse
    ///
    /// Only reachable from [`PooledBuffer`]'s drop, so every call matches
    /// one earlier `acquire`. Buffers that would grow the idle list past
    /// `max_pooled` are dropped.
    fn release(&self, buf: BytesMut) {
        self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);

        let mut free = self.free_list();
        let max_pooled = self.inner.config.max_pooled;
        if max_pooled == 0 || free.len() < max_pooled {
            free.push(buf);
        } else {
            trace!("Idle list full, dropping buffer");
        }
    }

    /// Size of every buffer handed out by this pool
    pub fn buffer_size(&self) -> usize {
        self.inner.config.buffer_size
    }

    /// Number of idle buffers waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.free_list().len()
    }

    /// Number of buffers allocated since the pool was created
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Number of buffers currently borrowed
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<BytesMut>> {
        // The free list stays consistent even if a holder panicked
        self.inner.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size())
            .field("idle", &self.idle_count())
            .field("allocated", &self.allocated())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// A buffer borrowed from a [`BufferPool`]
///
/// Ownership of the guard is ownership of the buffer. It is handed back to
/// the pool exactly once, when the guard is dropped.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer").field("len", &self.len()).finish()
    }
}
