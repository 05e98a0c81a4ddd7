//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Crysms.
//
// Crysms is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crysms is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crysms. If not, see <http://www.gnu.org/licenses/>.

//! The raw chunk file underneath the storage engine.
//!
//! The file is nothing more than a sequence of `CHUNK_SIZE`-byte chunks. All
//! I/O is done a whole chunk at a time, and the file only ever grows by
//! appending whole chunks.

use std::fs;
use std::io;
use std::ops::Range;
use std::os::unix::fs::FileExt;

use log::{info, warn};
use rand::{rngs::OsRng, Rng};

use crate::support::error::Error;
use crate::support::file_ops;
use crate::support::storage_config::IoConfig;

/// The size of every chunk in the file, and thus of every record.
pub const CHUNK_SIZE: usize = 256;
const CHUNK_SIZE64: u64 = CHUNK_SIZE as u64;

/// How many chunks the file grows by when the free list runs dry.
///
/// This is one 8kB alignment block worth of chunks.
pub const GROWTH_BATCH: u32 = 32;

pub type Chunk = [u8; CHUNK_SIZE];

/// The backing store on which the chunk file operates.
pub trait Backing: Send {
    /// Fill `dst` by reading bytes starting at `offset`.
    ///
    /// Returns an error if `dst` cannot be filled.
    fn read(&mut self, dst: &mut [u8], offset: u64) -> io::Result<()>;
    /// Write the full contents of `src` at `offset`.
    fn write(&mut self, src: &[u8], offset: u64) -> io::Result<()>;
    /// Returns the length of the backing store.
    fn len(&mut self) -> io::Result<u64>;
    /// Flush written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl Backing for fs::File {
    fn read(&mut self, dst: &mut [u8], offset: u64) -> io::Result<()> {
        self.read_exact_at(dst, offset)
    }

    fn write(&mut self, src: &[u8], offset: u64) -> io::Result<()> {
        self.write_all_at(src, offset)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Purely in-memory backing, used for ephemeral storage and tests.
impl Backing for Vec<u8> {
    fn read(&mut self, dst: &mut [u8], offset: u64) -> io::Result<()> {
        let start = offset as usize;
        let end = start.saturating_add(dst.len());
        if end > Vec::len(self) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read beyond end of buffer",
            ));
        }

        dst.copy_from_slice(&self[start..end]);
        Ok(())
    }

    fn write(&mut self, src: &[u8], offset: u64) -> io::Result<()> {
        let start = offset as usize;
        let end = start.saturating_add(src.len());
        if end > Vec::len(self) {
            self.resize(end, 0);
        }

        self[start..end].copy_from_slice(src);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(Vec::len(self) as u64)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ChunkFile {
    log_prefix: String,
    backing: Box<dyn Backing>,
    entry_count: u32,
    io: IoConfig,
}

impl ChunkFile {
    /// Wrap `backing`, which must already be a whole number of chunks long.
    pub fn new(
        log_prefix: String,
        mut backing: Box<dyn Backing>,
        io: IoConfig,
    ) -> Result<Self, Error> {
        let len = backing.len()?;
        if 0 != len % CHUNK_SIZE64 || len / CHUNK_SIZE64 > u32::MAX as u64 {
            return Err(Error::BadFileLength(len));
        }

        Ok(ChunkFile {
            log_prefix,
            backing,
            entry_count: (len / CHUNK_SIZE64) as u32,
            io,
        })
    }

    /// The number of chunks in the file, including the header.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    pub fn read_chunk(&mut self, index: u32) -> Result<Chunk, Error> {
        self.check_index(index)?;

        let offset = index as u64 * CHUNK_SIZE64;
        let mut chunk = [0u8; CHUNK_SIZE];
        self.retry("read", offset, |b| b.read(&mut chunk, offset))?;
        Ok(chunk)
    }

    pub fn write_chunk(
        &mut self,
        index: u32,
        chunk: &Chunk,
    ) -> Result<(), Error> {
        self.check_index(index)?;

        let offset = index as u64 * CHUNK_SIZE64;
        self.retry("write", offset, |b| b.write(chunk, offset))?;
        if self.io.sync {
            self.retry("sync", offset, |b| b.sync())?;
        }
        Ok(())
    }

    /// Append `count` chunks of random content to the file.
    ///
    /// Returns the range of the new chunk indices.
    pub fn grow(&mut self, count: u32) -> Result<Range<u32>, Error> {
        let start = self.entry_count;
        let end = start
            .checked_add(count)
            .ok_or(Error::IndexOutOfRange(start as i64 + count as i64))?;

        let mut data = vec![0u8; count as usize * CHUNK_SIZE];
        OsRng.fill(&mut data[..]);
        let offset = start as u64 * CHUNK_SIZE64;
        self.retry("grow", offset, |b| b.write(&data, offset))?;
        if self.io.sync {
            self.retry("sync", offset, |b| b.sync())?;
        }

        self.entry_count = end;
        info!(
            "{} Grew storage file by {} chunks to {}",
            self.log_prefix, count, end
        );
        Ok(start..end)
    }

    fn check_index(&self, index: u32) -> Result<(), Error> {
        if index >= self.entry_count {
            Err(Error::IndexOutOfRange(index.into()))
        } else {
            Ok(())
        }
    }

    /// Run `op` against the backing store, retrying it on transient errors
    /// up to the configured number of times.
    fn retry<T>(
        &mut self,
        what: &str,
        offset: u64,
        mut op: impl FnMut(&mut dyn Backing) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut attempts = 0;
        loop {
            match op(&mut *self.backing) {
                Err(e)
                    if file_ops::is_transient(&e)
                        && attempts < self.io.retries =>
                {
                    attempts += 1;
                    warn!(
                        "{} Transient error on chunk {} at offset {}, \
                         retrying: {}",
                        self.log_prefix, what, offset, e
                    );
                },
                r => return r,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backing_mut(&mut self) -> &mut dyn Backing {
        &mut *self.backing
    }
}
