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

use std::collections::HashMap;

use super::entry::{Entry, EntryKind};

/// Decoded entries, keyed by index.
///
/// Every index holds at most one kind at a time, so the kind is carried by
/// the cached entry itself. Free slots are never cached.
///
/// The cache is write-through: it is only ever updated after the
/// corresponding chunk has been written, so it never disagrees with the file.
#[derive(Debug, Default)]
pub struct EntryCache {
    entries: HashMap<u32, Entry>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry at `index`.
    ///
    /// Returns `Some(Err(kind))` if the index is cached as a different kind
    /// than the one requested.
    pub fn get(
        &self,
        kind: EntryKind,
        index: u32,
    ) -> Option<Result<&Entry, EntryKind>> {
        self.entries.get(&index).map(|entry| {
            if entry.kind() == kind {
                Ok(entry)
            } else {
                Err(entry.kind())
            }
        })
    }

    /// The kind cached at `index`, if any.
    pub fn kind_of(&self, index: u32) -> Option<EntryKind> {
        self.entries.get(&index).map(Entry::kind)
    }

    pub fn insert(&mut self, entry: Entry) {
        if EntryKind::Empty == entry.kind() {
            self.entries.remove(&entry.index());
        } else {
            self.entries.insert(entry.index(), entry);
        }
    }

    pub fn remove(&mut self, index: u32) {
        self.entries.remove(&index);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
