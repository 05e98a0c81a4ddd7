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

//! The storage engine.
//!
//! Everything lives in one flat file of fixed-size chunks (`chunk_file`).
//! Chunk 0 is the header; every other chunk holds exactly one entry,
//! individually encrypted and authenticated (`crypt::record_codec`). Entries
//! are either free, in which case they form the free list rooted at the
//! header (`free_list`), or one of the record kinds, which form a forest of
//! doubly linked lists (`list`):
//!
//! ```text
//! header ─ conversations ┬ session keys
//!                        └ messages ─ message parts
//! ```
//!
//! All access goes through a `Storage`, which owns the file, the header and
//! the entry cache behind a single file-wide lock. Record operations take
//! the `LockedStorage` guard, which is how compound operations (allocate and
//! link, cascading delete, list reassignment) keep the lock for their full
//! duration without ever locking twice.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};

use crate::crypt::master_key::MasterKey;
use crate::crypt::record_codec::RecordCodec;
use crate::support::error::Error;
use crate::support::storage_config::IoConfig;
use crate::support::threading;

mod cache;
mod checker;
mod chunk_file;
mod conversation;
mod entry;
mod free_list;
mod header;
mod layout;
mod list;
mod message;
mod message_part;
mod session_keys;

#[cfg(test)]
mod integration_tests;

pub use self::checker::IntegrityReport;
pub use self::chunk_file::{Backing, CHUNK_SIZE, GROWTH_BATCH};
pub use self::conversation::{
    summarise_conversations, Conversation, ConversationSummary, PEER_WIDTH,
};
pub use self::entry::{to_index, EntryKind, Links, Record};
pub use self::header::{Header, FORMAT_VERSION, MAGIC};
pub use self::message::{Direction, Message, MessageFlags, BODY_CAPACITY};
pub use self::message_part::{MessagePart, MessagePartFlags, PART_CAPACITY};
pub use self::session_keys::{
    SessionKeys, SessionKeysFlags, SimNumber, KEY_LENGTH, SIM_WIDTH,
};

use self::cache::EntryCache;
use self::chunk_file::ChunkFile;
use self::entry::{Entry, ENTRY_PLAINTEXT_SIZE};
use self::layout::Plaintext;

/// An open storage file.
///
/// A `Storage` is the handle every record operation goes through. It can be
/// shared between threads (typically in an `Arc`); all state is behind the
/// file-wide lock.
pub struct Storage {
    inner: Mutex<StorageInner>,
}

struct StorageInner {
    log_prefix: String,
    file: ChunkFile,
    codec: RecordCodec,
    header: Header,
    cache: EntryCache,
    /// How many times each slot has been freed. Slots never freed since the
    /// file was opened are absent.
    generations: HashMap<u32, u64>,
}

/// Exclusive access to a `Storage`.
///
/// Holding a `LockedStorage` is what entitles a caller to read or modify
/// entries. The lock is released when it is dropped, regardless of how the
/// operation using it ended.
pub struct LockedStorage<'a> {
    inner: MutexGuard<'a, StorageInner>,
}

impl Storage {
    /// Open the storage file at `path`, creating it if it does not exist.
    pub fn open(
        path: &Path,
        master_key: &MasterKey,
        io: IoConfig,
    ) -> Result<Self, Error> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)?;
        let log_prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_backing(log_prefix, Box::new(file), master_key, io)
    }

    /// Create a storage which lives only in memory.
    pub fn in_memory(master_key: &MasterKey) -> Result<Self, Error> {
        Self::from_backing(
            "memory".to_owned(),
            Box::new(Vec::<u8>::new()),
            master_key,
            IoConfig {
                retries: 0,
                sync: false,
            },
        )
    }

    /// Open storage on an arbitrary backing store.
    ///
    /// If the backing store is empty, a new storage file is initialised on
    /// it: a header, followed by one growth batch of free entries.
    pub fn from_backing(
        log_prefix: String,
        backing: Box<dyn Backing>,
        master_key: &MasterKey,
        io: IoConfig,
    ) -> Result<Self, Error> {
        let codec = RecordCodec::new(master_key)?;
        let mut file = ChunkFile::new(log_prefix.clone(), backing, io)?;

        let created = 0 == file.entry_count();
        let header = if created {
            file.grow(1)?;
            let header = Header::default();
            file.write_chunk(0, &header.encode(&codec)?)?;
            info!("{} Created new storage file", log_prefix);
            header
        } else {
            let header = Header::decode(&file.read_chunk(0)?, &codec)
                .map_err(|e| {
                    if let Error::AuthenticationFailed = e {
                        warn!(
                            "{} Header failed authentication; \
                             wrong key or corrupted file",
                            log_prefix
                        );
                    }
                    e
                })?;
            info!(
                "{} Opened storage file with {} entries",
                log_prefix,
                file.entry_count()
            );
            header
        };

        let storage = Storage {
            inner: Mutex::new(StorageInner {
                log_prefix,
                file,
                codec,
                header,
                cache: EntryCache::new(),
                generations: HashMap::new(),
            }),
        };

        if created {
            storage.lock().extend_free_list()?;
        }

        Ok(storage)
    }

    /// Acquire the file-wide lock.
    ///
    /// A panic while the lock was held does not make the storage unusable:
    /// every completed write is already reflected in both the file and the
    /// cache.
    pub fn lock(&self) -> LockedStorage<'_> {
        LockedStorage {
            inner: self
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Run `f` with the file-wide lock held.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&mut LockedStorage<'_>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        f(&mut self.lock())
    }

    /// Run `scan` on the background worker with the lock held, delivering
    /// its result through the returned channel.
    ///
    /// Scans run one at a time, in the order they were submitted.
    pub fn scan_in_background<R: Send + 'static>(
        self: &Arc<Self>,
        scan: impl FnOnce(&mut LockedStorage<'_>) -> Result<R, Error>
            + Send
            + 'static,
    ) -> crossbeam::channel::Receiver<Result<R, Error>> {
        let (sender, receiver) = crossbeam::channel::bounded(1);
        let this = Arc::clone(self);
        threading::run_in_background(move || {
            let result = this.transact(scan);
            // The receiver may have given up on the result; that's fine.
            let _ = sender.send(result);
        });
        receiver
    }
}

impl LockedStorage<'_> {
    /// The number of entries in the file, including the header.
    pub fn entry_count(&self) -> u32 {
        self.inner.file.entry_count()
    }

    pub fn header(&self) -> Header {
        self.inner.header
    }

    pub fn log_prefix(&self) -> &str {
        &self.inner.log_prefix
    }

    /// Discard every cached entry. The file is not touched.
    pub fn clear_cache(&mut self) {
        self.inner.cache.clear();
    }

    /// The number of entries currently cached.
    pub fn cached_entries(&self) -> usize {
        self.inner.cache.len()
    }

    /// Load the record at `index`.
    pub fn get<T: Record>(&mut self, index: u32) -> Result<T, Error> {
        let record = T::from_entry(self.load(T::KIND, index)?)?;
        Ok(self.stamp(record))
    }

    /// Write the data fields of `record` back to the file.
    ///
    /// The link fields of `record` are ignored; the current links of the
    /// entry are kept, so a copy taken before the list around it changed can
    /// still be saved safely. A copy of an entry which has since been
    /// deleted is rejected with `Error::Deleted`, even if its slot has been
    /// reused.
    pub fn save<T: Record>(&mut self, record: &T) -> Result<(), Error> {
        self.check_live(record)?;
        let current = self.load(T::KIND, record.index())?;
        let mut entry: Entry = record.clone().into();
        entry.set_links(current.links());
        for &child in T::KIND.child_kinds() {
            entry.set_child_head(child, current.child_head(child));
        }
        self.store(entry)
    }

    /// Unlink `record` from its list, then free it and everything it owns.
    pub fn delete<T: Record>(&mut self, record: T) -> Result<(), Error> {
        self.check_live(&record)?;
        self.delete_entry(T::KIND, record.index())
    }

    /// Fail with `Error::Deleted` if the slot of `record` has been freed
    /// since `record` was loaded.
    pub(super) fn check_live<T: Record>(
        &self,
        record: &T,
    ) -> Result<(), Error> {
        if record.generation() == self.generation(record.index()) {
            Ok(())
        } else {
            Err(Error::Deleted)
        }
    }

    fn generation(&self, index: u32) -> u64 {
        self.inner.generations.get(&index).copied().unwrap_or(0)
    }

    /// Tag `record` with the current generation of its slot.
    pub(super) fn stamp<T: Record>(&self, mut record: T) -> T {
        record.set_generation(self.generation(record.index()));
        record
    }

    fn write_header(&mut self, header: Header) -> Result<(), Error> {
        let inner = &mut *self.inner;
        let chunk = header.encode(&inner.codec)?;
        inner.file.write_chunk(0, &chunk)?;
        inner.header = header;
        Ok(())
    }

    /// Reject `index` unless it refers to an entry other than the header.
    fn check_index(&self, index: u32) -> Result<(), Error> {
        if 0 == index || index >= self.entry_count() {
            Err(Error::IndexOutOfRange(index.into()))
        } else {
            Ok(())
        }
    }

    /// Read and decode the entry at `index`, bypassing the cache.
    fn read_entry(
        &mut self,
        kind: EntryKind,
        index: u32,
    ) -> Result<Entry, Error> {
        self.check_index(index)?;

        let inner = &mut *self.inner;
        let chunk = inner.file.read_chunk(index)?;
        let pt = inner.codec.decode(&chunk).map_err(|e| {
            if let Error::AuthenticationFailed = e {
                warn!(
                    "{} Entry {} failed authentication",
                    inner.log_prefix, index
                );
            }
            e
        })?;
        debug_assert_eq!(ENTRY_PLAINTEXT_SIZE, pt.len());
        Entry::decode(kind, index, &Plaintext::from_vec(pt))
    }

    /// Load the entry at `index`, from the cache if possible.
    fn load(&mut self, kind: EntryKind, index: u32) -> Result<Entry, Error> {
        match self.inner.cache.get(kind, index) {
            Some(Ok(entry)) => return Ok(entry.clone()),
            Some(Err(_)) => return Err(Error::WrongKind),
            None => (),
        }

        let entry = self.read_entry(kind, index)?;
        self.inner.cache.insert(entry.clone());
        Ok(entry)
    }

    /// Encode and write `entry` verbatim, then update the cache.
    fn store(&mut self, entry: Entry) -> Result<(), Error> {
        let index = entry.index();
        self.check_index(index)?;

        let pt = entry.encode()?;
        let inner = &mut *self.inner;
        let mut chunk = [0u8; CHUNK_SIZE];
        inner.codec.encode(pt.as_bytes(), &mut chunk)?;
        inner.file.write_chunk(index, &chunk)?;
        inner.cache.insert(entry);
        Ok(())
    }

    fn corrupt(&self, message: String) -> Error {
        error!("{} Structural corruption: {}", self.log_prefix(), message);
        Error::Corrupt(message)
    }
}
