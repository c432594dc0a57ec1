//! A factory of buffer chains sharing one block pool.

use core::fmt;
use std::sync::Arc;

use crate::{
    chain::BufferChain,
    handle::{Deleter, Handle},
    pool::{BlockPool, ConcurrentPool, ObjectPool, BLOCK_OVERHEAD},
};

/// Creates, recycles and destroys [`BufferChain`]s of one buffer size.
///
/// The factory owns two pools: the data pool all of its chains draw blocks
/// from, and a control pool of chain structures, which are recycled with the
/// capacity of their block lists intact. Chains returned by
/// [`BufferChainFactory::allocate`] should be given back via
/// [`Deleter::delete_object`]; dropping them instead releases their blocks
/// all the same, only the chain structure is not reused.
///
/// ```
/// use pchain::{BufferChainFactory, ConcurrentPool};
///
/// let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(8192));
/// let handle = {
///     let mut chain = factory.allocate(0);
///     chain.replace(0, b"ticks");
///     pchain::Handle::new(chain, &factory)
/// };
/// assert_eq!(handle.length(), 5);
/// ```
pub struct BufferChainFactory<P: BlockPool = ConcurrentPool> {
    data_pool: Arc<P>,
    control_pool: ObjectPool<BufferChain<P>>,
}

impl<P: BlockPool> BufferChainFactory<P> {
    /// Creates a factory of chains drawing blocks from `data_pool`.
    ///
    /// # Panics
    ///
    /// Panics if the pool block size does not exceed [`BLOCK_OVERHEAD`].
    #[must_use]
    pub fn new(data_pool: P) -> Self {
        assert!(
            data_pool.block_size() > BLOCK_OVERHEAD,
            "pool block size too small"
        );
        tracing::debug!(
            buffer_size = data_pool.block_size() - BLOCK_OVERHEAD,
            "chain factory created"
        );
        Self {
            data_pool: Arc::new(data_pool),
            control_pool: ObjectPool::new(),
        }
    }

    /// Returns a chain of `length` bytes. The contents are unspecified.
    #[must_use]
    pub fn allocate(&self, length: usize) -> Box<BufferChain<P>> {
        let mut chain = self
            .control_pool
            .acquire_or_else(|| BufferChain::new(Arc::clone(&self.data_pool)));
        chain.set_length(length);
        chain
    }

    /// Returns a chain of `length` bytes behind a shared handle, which gives
    /// the chain back to this factory once the last clone is dropped.
    #[must_use]
    pub fn allocate_shared(&self, length: usize) -> Handle<'_, BufferChain<P>, Self> {
        Handle::new(self.allocate(length), self)
    }

    /// Returns the size of the data blocks of chains.
    #[inline(always)]
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.data_pool.block_size() - BLOCK_OVERHEAD
    }

    /// Returns the pool supplying data blocks.
    #[inline(always)]
    #[must_use]
    pub fn data_pool(&self) -> &P {
        &self.data_pool
    }

    /// Returns the pool of chain control structures.
    #[inline(always)]
    #[must_use]
    pub fn control_pool(&self) -> &ObjectPool<BufferChain<P>> {
        &self.control_pool
    }
}

impl<P: BlockPool> Deleter<BufferChain<P>> for BufferChainFactory<P> {
    /// Releases the blocks of `chain` and keeps the chain structure for
    /// reuse. A chain of another pool is dropped instead.
    fn delete_object(&self, mut chain: Box<BufferChain<P>>) {
        chain.remove_all();
        if Arc::ptr_eq(chain.pool(), &self.data_pool) {
            self.control_pool.release(chain);
        } else {
            tracing::warn!("chain of another pool returned to factory");
        }
    }
}

impl<P: BlockPool> fmt::Debug for BufferChainFactory<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferChainFactory")
            .field("buffer_size", &self.buffer_size())
            .field("control_pool", &self.control_pool)
            .finish_non_exhaustive()
    }
}
