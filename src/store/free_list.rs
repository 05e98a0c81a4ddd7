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

//! The free-list allocator.
//!
//! Free entries form a singly linked chain rooted at `Header::index_empty`.
//! Both allocation and freeing work at the head of the chain, and each costs
//! exactly one entry write plus one header write. The writes are ordered so
//! that an interruption between them can only leak a slot, never leave one
//! reachable from two places.

use log::debug;

use super::chunk_file::GROWTH_BATCH;
use super::entry::{EmptyEntry, Entry, EntryKind};
use super::{Header, LockedStorage};
use crate::support::error::Error;

impl LockedStorage<'_> {
    /// Allocate a slot for `entry` and write it there.
    ///
    /// The index of `entry` is overwritten with the allocated index, which
    /// is also returned. If the free list is exhausted, the file is grown by
    /// one batch first.
    pub(super) fn allocate(&mut self, mut entry: Entry) -> Result<u32, Error> {
        if 0 == self.header().index_empty {
            self.extend_free_list()?;
        }

        let header = self.header();
        let index = header.index_empty;
        let next = self.read_free_entry(index)?;

        self.write_header(Header {
            index_empty: next,
            ..header
        })?;
        entry.set_index(index);
        let kind = entry.kind();
        self.store(entry)?;

        debug!("{} Allocated {:?} {}", self.log_prefix(), kind, index);
        Ok(index)
    }

    /// Return the slot at `index` to the free list.
    ///
    /// The caller is responsible for making sure nothing links to it any
    /// more.
    pub(super) fn free(&mut self, index: u32) -> Result<(), Error> {
        *self.inner.generations.entry(index).or_insert(0) += 1;

        let header = self.header();
        self.store(Entry::Empty(EmptyEntry {
            index,
            next: header.index_empty,
        }))?;
        self.write_header(Header {
            index_empty: index,
            ..header
        })?;

        debug!("{} Freed {}", self.log_prefix(), index);
        Ok(())
    }

    /// Grow the file by one batch and push the new chunks onto the free
    /// list, lowest index first.
    pub(super) fn extend_free_list(&mut self) -> Result<(), Error> {
        let new = self.inner.file.grow(GROWTH_BATCH)?;
        let header = self.header();

        for index in new.clone() {
            let next = if index + 1 < new.end {
                index + 1
            } else {
                header.index_empty
            };
            self.store(Entry::Empty(EmptyEntry { index, next }))?;
        }

        self.write_header(Header {
            index_empty: new.start,
            ..header
        })
    }

    /// Count the entries on the free list.
    pub fn free_list_len(&mut self) -> Result<u32, Error> {
        let mut len = 0u32;
        let mut index = self.header().index_empty;
        while 0 != index {
            len += 1;
            if len >= self.entry_count() {
                return Err(self.corrupt(format!(
                    "free list has a cycle through {}",
                    index
                )));
            }
            index = self.read_free_entry(index)?;
        }

        Ok(len)
    }

    /// Read the free entry at `index`, returning the next free index.
    fn read_free_entry(&mut self, index: u32) -> Result<u32, Error> {
        if let Some(kind) = self.inner.cache.kind_of(index) {
            return Err(self.corrupt(format!(
                "free list contains live {:?} {}",
                kind, index
            )));
        }

        let next = self.read_entry(EntryKind::Empty, index)?.links().next;
        if next >= self.entry_count() {
            return Err(self.corrupt(format!(
                "free entry {} points to {}, beyond the end of the file",
                index, next
            )));
        }

        Ok(next)
    }
}
