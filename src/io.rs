//! `std::io` integration of buffer chains.
//!
//! Writing to a [`BufferChain`] appends to it. Reading goes through a
//! [`Reader`] cursor, which never copies more than asked for and exposes the
//! blocks directly via [`io::BufRead`]. For scatter/gather output, the chain
//! content is available as [`io::IoSlice`]s without flattening it first.

use std::io;

use crate::{chain::BufferChain, pool::BlockPool};

impl<P: BlockPool> io::Write for BufferChain<P> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        let mut written = 0;
        for buf in bufs {
            self.append(buf);
            written += buf.len();
        }
        Ok(written)
    }

    #[inline(always)]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<P: BlockPool> BufferChain<P> {
    /// Returns a cursor reading the chain from the start.
    #[inline(always)]
    #[must_use]
    pub fn reader(&self) -> Reader<'_, P> {
        Reader {
            chain: self,
            position: 0,
        }
    }

    /// Returns the content of the chain as slices for vectored writes.
    #[must_use]
    pub fn io_slices(&self) -> Vec<io::IoSlice<'_>> {
        self.chunks().map(io::IoSlice::new).collect()
    }

    /// Writes the whole content of the chain to `writer` via vectored
    /// writes, continuing after partial writes.
    ///
    /// # Errors
    ///
    /// An error is returned if `writer` fails, or returns
    /// [`io::ErrorKind::WriteZero`] if it stops accepting data.
    pub fn write_to<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let mut slices = self.io_slices();
        let mut slices = &mut slices[..];
        while !slices.is_empty() {
            match writer.write_vectored(slices) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole chain",
                    ));
                }
                Ok(n) => io::IoSlice::advance_slices(&mut slices, n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// A read cursor over a [`BufferChain`].
///
/// Seeking past the end is allowed, reads from there return no bytes.
#[derive(Debug)]
pub struct Reader<'a, P: BlockPool> {
    chain: &'a BufferChain<P>,
    position: u64,
}

impl<'a, P: BlockPool> Reader<'a, P> {
    /// Returns the current position of the cursor.
    #[inline(always)]
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the chain being read.
    #[inline(always)]
    #[must_use]
    pub fn get_ref(&self) -> &'a BufferChain<P> {
        self.chain
    }

    /// Returns the number of bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chain.length().saturating_sub(self.offset())
    }

    /// The position as an offset, saturated to the chain length.
    #[inline(always)]
    fn offset(&self) -> usize {
        usize::try_from(self.position).map_or(self.chain.length(), |offset| {
            offset.min(self.chain.length())
        })
    }
}

impl<P: BlockPool> io::Read for Reader<'_, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.remaining());
        self.chain.copy_out(&mut buf[..count], self.offset());
        self.position += count as u64;
        Ok(count)
    }
}

impl<P: BlockPool> io::BufRead for Reader<'_, P> {
    /// Returns the rest of the current block, up to the chain length.
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let offset = self.offset();
        if offset == self.chain.length() {
            return Ok(&[]);
        }
        let buffer_size = self.chain.buffer_size();
        let (index, start) = (offset / buffer_size, offset % buffer_size);
        let end = buffer_size.min(self.chain.length() - index * buffer_size);
        Ok(&self.chain.block(index)[start..end])
    }

    fn consume(&mut self, amt: usize) {
        self.position += amt.min(self.remaining()) as u64;
    }
}

impl<P: BlockPool> io::Seek for Reader<'_, P> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (base, offset) = match pos {
            io::SeekFrom::Start(position) => {
                self.position = position;
                return Ok(position);
            }
            io::SeekFrom::End(offset) => (self.chain.length() as u64, offset),
            io::SeekFrom::Current(offset) => (self.position, offset),
        };
        match base.checked_add_signed(offset) {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }

    #[inline(always)]
    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}
