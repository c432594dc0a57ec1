//! A variable-length byte sequence over pooled fixed-size blocks.
//!
//! Messages that are built piece by piece, copied between owners and
//! eventually written out with vectored IO do not need contiguous memory.
//! Keeping them in equally sized blocks drawn from a shared pool avoids
//! reallocation as they grow, keeps memory reuse cheap, and lets the blocks
//! go straight to `writev`-like calls.
//!
//! The core abstraction is a [`BufferChain`], an ordered sequence of blocks
//! allocated from a [`BlockPool`] that grows and shrinks only at the tail.
//! Byte-level reads, writes and copies between chains span block boundaries
//! transparently. A [`BufferChainFactory`] owns the pools for chains of one
//! buffer size and recycles chains returned to it, either directly or via
//! shared [`Handle`]s.
//!
//! The library is designed to be used in concurrent code: pools are
//! thread-safe, while each chain is owned and mutated by one thread at a
//! time. Refer to relevant module documentation for details.
//!
//! ```
//! use pchain::{BufferChainFactory, ConcurrentPool, Deleter};
//!
//! let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(4));
//! let mut chain = factory.allocate(0);
//! chain.append(b"AB");
//! chain.append(b"CDE");
//! assert_eq!((chain.length(), chain.block_count()), (2 + 3, 2));
//!
//! let mut bytes = [0; 5];
//! chain.copy_out(&mut bytes, 0);
//! assert_eq!(&bytes, b"ABCDE");
//! factory.delete_object(chain);
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::inline_always)]

pub mod chain;
pub mod factory;
pub mod handle;
pub mod io;
pub mod pool;

#[doc(inline)]
pub use chain::BufferChain;
#[doc(inline)]
pub use factory::BufferChainFactory;
#[doc(inline)]
pub use handle::{Deleter, Handle};
#[doc(inline)]
pub use pool::{BlockPool, ConcurrentPool};

pub use io::Reader as ChainReader;
pub use pool::{Block, BlockId, ObjectPool, PoolConfig, PoolError, BLOCK_OVERHEAD};
