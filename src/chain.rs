//! A byte sequence over a chain of pooled fixed-size blocks.
//!
//! [`BufferChain`] keeps its data in equally sized blocks drawn from a
//! [`BlockPool`]. All blocks except the last one are full, and the chain grows
//! and shrinks only at the tail, which makes resizing O(1) amortized per block:
//!
//! ```text
//! buffer_size = 4, length = 10
//!
//! Blocks: |ABCD|EFGH|IJ..|
//!          full full last, bytes past the length are unspecified
//! ```
//!
//! Byte ranges passed to [`BufferChain::replace`], [`BufferChain::copy_out`]
//! and friends may span any number of blocks, the chain splits them at block
//! boundaries on its own.
//!
//! # Things to note
//!
//! Bytes added by growing the chain, be it via [`BufferChain::set_length`] or
//! via blocks taken from a donor chain, hold whatever the block held before.
//! Only bytes that were written are meaningful.
//!
//! A chain is not synchronized. Distinct chains can be used from different
//! threads at the same time, as they share only the pool, which synchronizes
//! on its own.

use core::{cmp, fmt, mem, ops};
use std::sync::Arc;

use crate::pool::{Block, BlockPool, ConcurrentPool, BLOCK_OVERHEAD};

/// A variable-length byte sequence stored in blocks of a [`BlockPool`].
///
/// The chain keeps its blocks in a vector of its own rather than linking
/// them through the pool arena, which links free nodes only. Block access by
/// index is therefore O(1), at the cost of one heap allocation for the block
/// list outside of any pool. Recycling chains via a
/// [`BufferChainFactory`](crate::BufferChainFactory) keeps that allocation.
///
/// The chain returns all of its blocks to the pool when dropped.
#[doc(alias = "pooledbufferchain")]
pub struct BufferChain<P: BlockPool = ConcurrentPool> {
    /// The pool supplying blocks. Shared with other chains and the factory.
    pool: Arc<P>,
    /// Blocks in chain order, the first one holding the start of the data.
    blocks: Vec<Block>,
    /// Total number of meaningful bytes.
    length: usize,
    /// Data capacity of a single block.
    buffer_size: usize,
}

impl<P: BlockPool> BufferChain<P> {
    /// Creates an empty chain drawing blocks from `pool`.
    ///
    /// # Panics
    ///
    /// Panics if the pool block size does not exceed [`BLOCK_OVERHEAD`].
    #[must_use]
    pub fn new(pool: Arc<P>) -> Self {
        assert!(
            pool.block_size() > BLOCK_OVERHEAD,
            "pool block size too small"
        );
        let buffer_size = pool.block_size() - BLOCK_OVERHEAD;
        Self {
            pool,
            blocks: Vec::new(),
            length: 0,
            buffer_size,
        }
    }

    /// Returns the total number of bytes in the chain.
    #[inline(always)]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns `true` if the chain holds no bytes, and hence no blocks.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of blocks in the chain.
    #[inline(always)]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the size of every block in the chain.
    #[inline(always)]
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns the pool the chain draws its blocks from.
    #[inline(always)]
    #[must_use]
    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    /// Returns the byte at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` points past the last block. An index past the length
    /// but within the last block is a logic error and returns an unspecified
    /// byte in release builds.
    #[inline(always)]
    #[must_use]
    pub fn byte_at(&self, index: usize) -> u8 {
        self[index]
    }

    /// Returns a mutable reference to the byte at `index`.
    ///
    /// # Panics
    ///
    /// Same as [`BufferChain::byte_at`].
    #[inline(always)]
    pub fn byte_at_mut(&mut self, index: usize) -> &mut u8 {
        &mut self[index]
    }

    /// Returns the whole block at `index`, including the unspecified bytes
    /// past the length if it is the last one. O(1).
    ///
    /// # Panics
    ///
    /// Panics if `index >= block_count()`.
    #[inline(always)]
    #[must_use]
    pub fn block(&self, index: usize) -> &[u8] {
        &self.blocks[index]
    }

    /// Returns the whole mutable block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= block_count()`.
    #[inline(always)]
    pub fn block_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.blocks[index]
    }

    /// Appends `bytes` to the end of the chain, allocating blocks as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.replace(self.length, bytes);
    }

    /// Overwrites the chain with `bytes` starting at `offset`. If the write
    /// goes past the end, the chain grows to `offset + bytes.len()`.
    ///
    /// # Panics
    ///
    /// Panics if `offset > length()`.
    pub fn replace(&mut self, offset: usize, bytes: &[u8]) {
        assert!(offset <= self.length, "replace offset past the end");
        self.reserve_range(offset, bytes.len());

        let mut bytes = bytes;
        for segment in self.segments_mut(offset, bytes.len()) {
            let (head, rest) = bytes.split_at(segment.len());
            segment.copy_from_slice(head);
            bytes = rest;
        }
    }

    /// Overwrites the chain starting at `offset` with `count` bytes of
    /// `source` starting at `source_offset`. If the write goes past the end,
    /// the chain grows to `offset + count`. The source is not modified.
    ///
    /// The chains are not required to have the same buffer size, although
    /// equal sizes keep segments aligned and copies larger.
    ///
    /// # Panics
    ///
    /// Panics if `offset > length()` or if the source range is out of
    /// bounds.
    pub fn replace_from<Q: BlockPool>(
        &mut self,
        offset: usize,
        source: &BufferChain<Q>,
        source_offset: usize,
        count: usize,
    ) {
        assert!(offset <= self.length, "replace offset past the end");
        assert!(
            source_offset + count <= source.length,
            "source range out of bounds"
        );
        self.reserve_range(offset, count);

        let mut source_segments = source.segments(source_offset, count);
        let mut pending: &[u8] = &[];
        for mut segment in self.segments_mut(offset, count) {
            while !segment.is_empty() {
                if pending.is_empty() {
                    pending = source_segments
                        .next()
                        .expect("source range is checked prior to copying");
                }
                let copied = cmp::min(segment.len(), pending.len());
                let (head, rest) = mem::take(&mut segment).split_at_mut(copied);
                head.copy_from_slice(&pending[..copied]);
                pending = &pending[copied..];
                segment = rest;
            }
        }
    }

    /// Sets the length of the chain, releasing or allocating blocks at the
    /// tail as needed. A partially used last block is kept. Existing bytes
    /// within the new length are preserved, new bytes are unspecified.
    pub fn set_length(&mut self, length: usize) {
        let needed = self.blocks_for(length);
        if needed < self.blocks.len() {
            self.truncate_blocks(needed);
        } else {
            self.blocks.reserve(needed - self.blocks.len());
            while self.blocks.len() < needed {
                self.blocks.push(self.pool.allocate());
            }
        }
        self.length = length;
    }

    /// Same as [`BufferChain::set_length`], except that blocks needed to grow
    /// are detached from the tail of `donor` first, and only the rest is
    /// allocated from the pool. The donor length is cut to the blocks it has
    /// left.
    ///
    /// Both chains must draw from the same pool, which is checked in debug
    /// builds only.
    pub fn set_length_with_donor(&mut self, length: usize, donor: &mut BufferChain<P>) {
        debug_assert!(
            Arc::ptr_eq(&self.pool, &donor.pool),
            "donor chain draws from another pool"
        );
        let needed = self.blocks_for(length);
        if needed > self.blocks.len() {
            let taken = cmp::min(needed - self.blocks.len(), donor.blocks.len());
            let kept = donor.blocks.len() - taken;
            self.blocks.extend(donor.blocks.drain(kept..));
            donor.length = cmp::min(donor.length, kept * donor.buffer_size);
        }
        self.set_length(length);
    }

    /// Returns all blocks to the pool, leaving the chain empty.
    pub fn remove_all(&mut self) {
        self.truncate_blocks(0);
        self.length = 0;
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn copy_out(&self, dst: &mut [u8], offset: usize) {
        assert!(offset + dst.len() <= self.length, "copy range out of bounds");
        let mut dst = dst;
        for segment in self.segments(offset, dst.len()) {
            let (head, rest) = mem::take(&mut dst).split_at_mut(segment.len());
            head.copy_from_slice(segment);
            dst = rest;
        }
    }

    /// Loads whole blocks starting at block `index` into `blocks`, and
    /// returns the number of blocks loaded. Entries of `blocks` past the
    /// last block of the chain are left unchanged.
    ///
    /// The last block is loaded in full, use [`BufferChain::length`] to trim
    /// it, or [`BufferChain::chunks`] for trimmed slices.
    pub fn load_blocks<'a>(&'a self, blocks: &mut [&'a [u8]], index: usize) -> usize {
        let source = self.blocks.get(index..).unwrap_or_default();
        for (slot, block) in blocks.iter_mut().zip(source) {
            *slot = &block[..];
        }
        cmp::min(blocks.len(), source.len())
    }

    /// Replaces the contents of `blocks` with all blocks of the chain, loaded
    /// in full.
    pub fn blocks_into<'a>(&'a self, blocks: &mut Vec<&'a [u8]>) {
        blocks.clear();
        blocks.extend(self.blocks.iter().map(|block| &block[..]));
    }

    /// Returns an iterator over the meaningful bytes of every block, in
    /// order. Only the last chunk may be shorter than the buffer size.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + Clone {
        self.segments(0, self.length)
    }

    /// Returns the CRC32 checksum of the chain content.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for chunk in self.chunks() {
            hasher.update(chunk);
        }
        hasher.finalize()
    }

    /// Splits `offset` into a block index and an offset within the block.
    #[inline(always)]
    fn locate(&self, offset: usize) -> (usize, usize) {
        (offset / self.buffer_size, offset % self.buffer_size)
    }

    #[inline(always)]
    fn blocks_for(&self, length: usize) -> usize {
        length.div_ceil(self.buffer_size)
    }

    /// Grows the chain if `offset + count` is past the end.
    #[inline(always)]
    fn reserve_range(&mut self, offset: usize, count: usize) {
        if offset + count > self.length {
            self.set_length(offset + count);
        }
    }

    /// Releases the tail blocks, keeping the first `count`.
    fn truncate_blocks(&mut self, count: usize) {
        for block in self.blocks.drain(count..).rev() {
            self.pool.release(block);
        }
    }

    /// Returns the `count` bytes starting at `offset`, split at block
    /// boundaries. The range must be within the blocks of the chain.
    fn segments(&self, offset: usize, count: usize) -> impl Iterator<Item = &[u8]> + Clone {
        let (first, mut start) = self.locate(offset);
        let mut remaining = count;
        self.blocks[first.min(self.blocks.len())..]
            .iter()
            .map_while(move |block| {
                if remaining == 0 {
                    return None;
                }
                let end = cmp::min(block.len(), start + remaining);
                let segment = &block[start..end];
                remaining -= segment.len();
                start = 0;
                Some(segment)
            })
    }

    /// Mutable version of [`BufferChain::segments`].
    fn segments_mut(&mut self, offset: usize, count: usize) -> impl Iterator<Item = &mut [u8]> {
        let (first, mut start) = self.locate(offset);
        let mut remaining = count;
        let first = first.min(self.blocks.len());
        self.blocks[first..].iter_mut().map_while(move |block| {
            if remaining == 0 {
                return None;
            }
            let end = cmp::min(block.len(), start + remaining);
            let segment = &mut block[start..end];
            remaining -= segment.len();
            start = 0;
            Some(segment)
        })
    }
}

impl<P: BlockPool> ops::Index<usize> for BufferChain<P> {
    type Output = u8;

    #[inline(always)]
    fn index(&self, index: usize) -> &u8 {
        debug_assert!(index < self.length, "byte index past the end");
        let (block, offset) = self.locate(index);
        &self.blocks[block][offset]
    }
}

impl<P: BlockPool> ops::IndexMut<usize> for BufferChain<P> {
    #[inline(always)]
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        debug_assert!(index < self.length, "byte index past the end");
        let (block, offset) = self.locate(index);
        &mut self.blocks[block][offset]
    }
}

impl<P: BlockPool> Drop for BufferChain<P> {
    fn drop(&mut self) {
        self.remove_all();
    }
}

impl<P: BlockPool> fmt::Debug for BufferChain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferChain")
            .field("length", &self.length)
            .field("block_count", &self.blocks.len())
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}
