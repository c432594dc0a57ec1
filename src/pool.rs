//! Pools of fixed-size blocks and of recycled control structures.
//!
//! [`BlockPool`] is the seam a [`BufferChain`](crate::BufferChain) draws its
//! storage from. Any thread-safe allocator of equally sized blocks can stand
//! behind it; [`ConcurrentPool`] is the implementation shipped with the crate.
//!
//! The block size reported by a pool includes [`BLOCK_OVERHEAD`], the bytes
//! taken by the arena link of a node:
//!
//! ```text
//! Arena:  | next | payload ...... |   one node = block_size bytes
//!         |<-4-->|<- buffer_size ->|
//! ```
//!
//! While a node is free, `next` threads it into the free list. While its
//! payload is lent out as a [`Block`], the node stays in place and is
//! referenced by its [`BlockId`], so the payload can come back to the same slot
//! when released.

use core::{cmp, fmt, mem, ops, sync::atomic};
use std::sync::Mutex;

/// Index of a node within the arena, `NIL` marks the end of a list.
type Link = u32;

const NIL: Link = Link::MAX;

/// The number of bytes of every pool block which are not available as data,
/// that is the size of an arena link.
pub const BLOCK_OVERHEAD: usize = mem::size_of::<Link>();

/// Stable index of a block within the pool it was allocated from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(u32);

impl BlockId {
    /// Creates an id from an arena index.
    #[inline(always)]
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the arena index.
    #[inline(always)]
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A block of `block_size - BLOCK_OVERHEAD` bytes lent out by a pool.
///
/// The contents of a freshly allocated block are not specified.
pub struct Block {
    id: BlockId,
    data: Box<[u8]>,
}

impl Block {
    /// Creates a block from the storage of arena node `id`. Pool
    /// implementations are expected to be the only callers.
    #[inline(always)]
    #[must_use]
    pub fn new(id: BlockId, data: Box<[u8]>) -> Self {
        Self { id, data }
    }

    /// Returns the id of the arena node this block belongs to.
    #[inline(always)]
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Splits the block into its id and storage.
    #[inline(always)]
    #[must_use]
    pub fn into_inner(self) -> (BlockId, Box<[u8]>) {
        (self.id, self.data)
    }
}

impl ops::Deref for Block {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl ops::DerefMut for Block {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A thread-safe allocator of fixed-size [`Block`]s.
///
/// Implementations must hand out blocks of exactly
/// `block_size() - BLOCK_OVERHEAD` bytes and accept them back via
/// [`BlockPool::release`] from any thread. The block size must be fixed for
/// the whole lifetime of the pool.
pub trait BlockPool: Send + Sync {
    /// The size of a single block, including [`BLOCK_OVERHEAD`].
    fn block_size(&self) -> usize;

    /// Allocates a block. Exhaustion is fatal and must not return.
    fn allocate(&self) -> Block;

    /// Returns a block previously allocated from this pool.
    fn release(&self, block: Block);
}

/// Configuration of a [`ConcurrentPool`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PoolConfig {
    /// The size of a block, including [`BLOCK_OVERHEAD`].
    pub block_size: usize,
    /// The maximum number of blocks the arena may hold, unbounded if `None`.
    pub max_blocks: Option<usize>,
    /// The number of blocks allocated up-front.
    pub initial_blocks: usize,
    /// The maximum number of blocks added by a single growth step, unbounded
    /// if `None`. Growth doubles the arena up to this step size, then grows
    /// it linearly.
    pub grow_by: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            max_blocks: None,
            initial_blocks: 0,
            grow_by: None,
        }
    }
}

/// An error returned by [`ConcurrentPool::try_allocate`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PoolError {
    /// Every block is in use and the arena cannot grow. The inner value is
    /// the number of blocks in the arena.
    Exhausted(usize),
}

impl std::error::Error for PoolError {}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted(blocks) => write!(f, "pool: exhausted at {blocks} blocks"),
        }
    }
}

/// A [`BlockPool`] over a growing arena with an index-linked free list.
///
/// Allocation and release are O(1) apart from arena growth, which doubles the
/// number of nodes each time the free list runs dry. Growth allocates every
/// new block while the arena mutex is held, so an unbounded pool of large
/// blocks should cap the step with [`PoolConfig::grow_by`]. Otherwise the
/// mutex is held only for the duration of a free list update.
pub struct ConcurrentPool {
    block_size: usize,
    max_blocks: usize,
    grow_by: usize,
    arena: Mutex<Arena>,
    /// The number of blocks currently lent out.
    outstanding: atomic::AtomicUsize,
}

struct Arena {
    nodes: Vec<Node>,
    /// Head of the free list.
    free: Link,
}

struct Node {
    next: Link,
    /// Present while the node is free.
    payload: Option<Box<[u8]>>,
}

impl Arena {
    /// Appends `count` free nodes, preserving index order in the free list.
    fn grow(&mut self, count: usize, payload_size: usize) {
        let start = self.nodes.len();
        let end = start + count;
        self.nodes.reserve_exact(count);
        for index in start..end {
            let next = if index + 1 == end {
                self.free
            } else {
                link(index + 1)
            };
            self.nodes.push(Node {
                next,
                payload: Some(vec![0; payload_size].into_boxed_slice()),
            });
        }
        if count != 0 {
            self.free = link(start);
        }
    }

    fn pop(&mut self) -> Option<(Link, Box<[u8]>)> {
        if self.free == NIL {
            return None;
        }
        let index = self.free;
        let node = &mut self.nodes[index as usize];
        self.free = mem::replace(&mut node.next, NIL);
        let payload = node.payload.take().expect("free node holds its payload");
        Some((index, payload))
    }

    fn push(&mut self, index: Link, payload: Box<[u8]>) {
        let node = &mut self.nodes[index as usize];
        debug_assert!(node.payload.is_none(), "block {index} released twice");
        node.payload = Some(payload);
        node.next = self.free;
        self.free = index;
    }
}

#[inline(always)]
fn link(index: usize) -> Link {
    Link::try_from(index).expect("arena index is bounded by max blocks")
}

impl ConcurrentPool {
    /// Creates a pool of unbounded capacity handing out blocks of
    /// `block_size` bytes, [`BLOCK_OVERHEAD`] included.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` does not exceed [`BLOCK_OVERHEAD`].
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self::with_config(PoolConfig {
            block_size,
            ..PoolConfig::default()
        })
    }

    /// Creates a pool of unbounded capacity whose blocks hold `buffer_size`
    /// bytes of data each.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    #[must_use]
    pub fn for_buffers(buffer_size: usize) -> Self {
        Self::new(buffer_size + BLOCK_OVERHEAD)
    }

    /// Creates a pool from `config`.
    ///
    /// # Panics
    ///
    /// Panics if the block size does not exceed [`BLOCK_OVERHEAD`], if more
    /// initial blocks are requested than the maximum allowed, or if the
    /// growth step is zero.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        assert!(
            config.block_size > BLOCK_OVERHEAD,
            "block size too small to hold data"
        );
        // The sentinel value is not a valid index.
        let max_blocks = cmp::min(config.max_blocks.unwrap_or(usize::MAX), NIL as usize);
        assert!(
            config.initial_blocks <= max_blocks,
            "initial blocks exceed max blocks"
        );
        assert!(config.grow_by != Some(0), "growth step must not be zero");
        let mut arena = Arena {
            nodes: Vec::new(),
            free: NIL,
        };
        arena.grow(config.initial_blocks, config.block_size - BLOCK_OVERHEAD);
        Self {
            block_size: config.block_size,
            max_blocks,
            grow_by: config.grow_by.unwrap_or(usize::MAX),
            arena: arena.into(),
            outstanding: 0.into(),
        }
    }

    /// Allocates a block, growing the arena if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when all blocks are in use and the
    /// arena has reached its maximum size.
    pub fn try_allocate(&self) -> Result<Block, PoolError> {
        let mut arena = self.arena.lock().expect("should not poison");
        if arena.free == NIL {
            let capacity = arena.nodes.len();
            let count = cmp::max(capacity, 1)
                .min(self.grow_by)
                .min(self.max_blocks - capacity);
            if count == 0 {
                tracing::warn!(block_size = self.block_size, capacity, "pool exhausted");
                return Err(PoolError::Exhausted(capacity));
            }
            arena.grow(count, self.buffer_size());
            tracing::debug!(
                block_size = self.block_size,
                capacity = capacity + count,
                "pool arena grown"
            );
        }
        let (index, data) = arena.pop().expect("free list is refilled above");
        self.outstanding.fetch_add(1, atomic::Ordering::Relaxed);
        Ok(Block::new(BlockId(index), data))
    }

    /// Returns the number of blocks currently lent out.
    #[inline(always)]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(atomic::Ordering::Relaxed)
    }

    /// Returns the number of nodes in the arena, free or lent out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.lock().expect("should not poison").nodes.len()
    }

    /// Returns the number of blocks that can be allocated without growing.
    #[must_use]
    pub fn available(&self) -> usize {
        let arena = self.arena.lock().expect("should not poison");
        arena.nodes.len() - self.outstanding()
    }

    #[inline(always)]
    fn buffer_size(&self) -> usize {
        self.block_size - BLOCK_OVERHEAD
    }
}

impl BlockPool for ConcurrentPool {
    #[inline(always)]
    fn block_size(&self) -> usize {
        self.block_size
    }

    /// # Panics
    ///
    /// Panics when the pool is exhausted, see [`ConcurrentPool::try_allocate`].
    fn allocate(&self) -> Block {
        self.try_allocate().unwrap_or_else(|err| panic!("{err}"))
    }

    fn release(&self, block: Block) {
        let (id, data) = block.into_inner();
        debug_assert_eq!(
            data.len(),
            self.buffer_size(),
            "block released to a pool of another size"
        );
        let mut arena = self.arena.lock().expect("should not poison");
        arena.push(id.index(), data);
        self.outstanding.fetch_sub(1, atomic::Ordering::Relaxed);
    }
}

impl fmt::Debug for ConcurrentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentPool")
            .field("block_size", &self.block_size)
            .field("max_blocks", &self.max_blocks)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

/// A thread-safe recycler of boxed values, used for chain control structures.
///
/// Released values are kept as they are and handed out again by
/// [`ObjectPool::acquire_or_else`], so the caller is responsible for resetting
/// them before release.
///
/// Acquired objects are owned by the caller and may be dropped instead of
/// released, so the pool only tracks the objects waiting for reuse.
pub struct ObjectPool<T> {
    free: Mutex<Vec<Box<T>>>,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: Vec::new().into(),
        }
    }

    /// The size of a single pooled object.
    #[inline(always)]
    #[must_use]
    pub fn block_size(&self) -> usize {
        mem::size_of::<T>()
    }

    /// Returns a recycled object, or a new one made by `make` if there is
    /// none.
    pub fn acquire_or_else(&self, make: impl FnOnce() -> T) -> Box<T> {
        let recycled = self.free.lock().expect("should not poison").pop();
        recycled.unwrap_or_else(|| Box::new(make()))
    }

    /// Returns an object for reuse.
    pub fn release(&self, object: Box<T>) {
        self.free.lock().expect("should not poison").push(object);
    }

    /// Returns the number of objects waiting for reuse.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().expect("should not poison").len()
    }
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("block_size", &self.block_size())
            .field("available", &self.available())
            .finish()
    }
}
