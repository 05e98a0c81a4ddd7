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

//! The doubly linked lists that make up the record forest.
//!
//! Each list is owned either by the header (conversations) or by a parent
//! entry (session keys and messages by a conversation, message parts by a
//! message), which holds the index of the list's head. New entries are always
//! prepended, so the head of a list is its most recently created entry.
//!
//! Deleting an entry unlinks it from its list and then frees it together
//! with everything it owns.

use log::debug;

use super::entry::{Entry, EntryKind, Links, Record};
use super::{Header, LockedStorage};
use crate::support::error::Error;

impl LockedStorage<'_> {
    /// Return the head of the `kind` list owned by `parent`.
    ///
    /// `parent` is ignored for conversations.
    pub(super) fn head_of(
        &mut self,
        kind: EntryKind,
        parent: u32,
    ) -> Result<u32, Error> {
        match kind.parent_kind() {
            None if EntryKind::Conversation == kind => {
                Ok(self.header().index_conversations)
            },
            None => Err(Error::WrongKind),
            Some(parent_kind) => {
                Ok(self.load(parent_kind, parent)?.child_head(kind))
            },
        }
    }

    fn set_head_of(
        &mut self,
        kind: EntryKind,
        parent: u32,
        head: u32,
    ) -> Result<(), Error> {
        match kind.parent_kind() {
            None if EntryKind::Conversation == kind => {
                let header = self.header();
                self.write_header(Header {
                    index_conversations: head,
                    ..header
                })
            },
            None => Err(Error::WrongKind),
            Some(parent_kind) => {
                let mut owner = self.load(parent_kind, parent)?;
                owner.set_child_head(kind, head);
                self.store(owner)
            },
        }
    }

    /// Allocate a slot for `entry` and prepend it to the list owned by
    /// `parent`.
    ///
    /// Any links or child heads already in `entry` are discarded.
    pub(super) fn insert_entry(
        &mut self,
        mut entry: Entry,
        parent: u32,
    ) -> Result<u32, Error> {
        let kind = entry.kind();
        let parent = if kind.parent_kind().is_some() { parent } else { 0 };

        // Look everything up before allocating so that a bad parent does not
        // cost a slot.
        let head = self.head_of(kind, parent)?;
        let old_head = if 0 != head {
            Some(self.load(kind, head)?)
        } else {
            None
        };

        entry.set_links(Links {
            parent,
            prev: 0,
            next: head,
        });
        for &child in kind.child_kinds() {
            entry.set_child_head(child, 0);
        }

        let index = self.allocate(entry)?;
        if let Some(mut old_head) = old_head {
            old_head.set_links(Links {
                prev: index,
                ..old_head.links()
            });
            self.store(old_head)?;
        }
        self.set_head_of(kind, parent, index)?;

        debug!(
            "{} Linked {:?} {} under {} before {}",
            self.log_prefix(),
            kind,
            index,
            parent,
            head
        );
        Ok(index)
    }

    /// Unlink the `kind` entry at `index` from its list, then free it and
    /// everything it owns.
    pub(super) fn delete_entry(
        &mut self,
        kind: EntryKind,
        index: u32,
    ) -> Result<(), Error> {
        let entry = self.load(kind, index)?;
        let links = entry.links();

        // Validate both neighbours before writing anything
        let prev = if 0 == links.prev {
            let head = self.head_of(kind, links.parent)?;
            if head != index {
                return Err(self.corrupt(format!(
                    "{:?} {} has no predecessor, but the head of its list \
                     is {}",
                    kind, index, head
                )));
            }
            None
        } else {
            let prev = self.load(kind, links.prev)?;
            if prev.links().next != index {
                return Err(self.corrupt(format!(
                    "{:?} {} follows {}, which points to {}",
                    kind,
                    index,
                    links.prev,
                    prev.links().next
                )));
            }
            Some(prev)
        };

        let next = if 0 == links.next {
            None
        } else {
            let next = self.load(kind, links.next)?;
            if next.links().prev != index {
                return Err(self.corrupt(format!(
                    "{:?} {} precedes {}, which points back to {}",
                    kind,
                    index,
                    links.next,
                    next.links().prev
                )));
            }
            Some(next)
        };

        match prev {
            None => self.set_head_of(kind, links.parent, links.next)?,
            Some(mut prev) => {
                prev.set_links(Links {
                    next: links.next,
                    ..prev.links()
                });
                self.store(prev)?;
            },
        }

        if let Some(mut next) = next {
            next.set_links(Links {
                prev: links.prev,
                ..next.links()
            });
            self.store(next)?;
        }

        let mut budget = self.entry_count();
        let freed = self.free_subtree(entry, &mut budget)?;
        debug!(
            "{} Deleted {:?} {} ({} entries freed)",
            self.log_prefix(),
            kind,
            index,
            freed
        );
        Ok(())
    }

    /// Free `entry` and, first, every entry it owns.
    ///
    /// The children are not unlinked from each other since they are all
    /// going away. `budget` bounds the total number of entries freed so that
    /// a cycle in a child list cannot loop forever.
    ///
    /// Returns the number of entries freed.
    fn free_subtree(
        &mut self,
        entry: Entry,
        budget: &mut u32,
    ) -> Result<u32, Error> {
        let mut freed = 0;
        for &child_kind in entry.kind().child_kinds() {
            let mut child_index = entry.child_head(child_kind);
            while 0 != child_index {
                let child = self.load(child_kind, child_index)?;
                if child.links().parent != entry.index() {
                    return Err(self.corrupt(format!(
                        "{:?} {} is in the list of {}, but its parent is {}",
                        child_kind,
                        child_index,
                        entry.index(),
                        child.links().parent
                    )));
                }

                child_index = child.links().next;
                freed += self.free_subtree(child, budget)?;
            }
        }

        if 0 == *budget {
            return Err(self.corrupt(format!(
                "cycle found while deleting children of {:?} {}",
                entry.kind(),
                entry.index()
            )));
        }
        *budget -= 1;

        self.free(entry.index())?;
        Ok(freed + 1)
    }

    /// Load the `kind` list starting at `head`, in list order.
    pub(super) fn list(
        &mut self,
        kind: EntryKind,
        head: u32,
    ) -> Result<Vec<Entry>, Error> {
        let mut ret = Vec::new();
        let mut index = head;
        while 0 != index {
            if ret.len() >= self.entry_count() as usize {
                return Err(self.corrupt(format!(
                    "{:?} list starting at {} has a cycle",
                    kind, head
                )));
            }

            let entry = self.load(kind, index)?;
            index = entry.links().next;
            ret.push(entry);
        }

        Ok(ret)
    }

    /// Load the list of `T` starting at `head`.
    pub(super) fn list_of<T: Record>(
        &mut self,
        head: u32,
    ) -> Result<Vec<T>, Error> {
        self.list(T::KIND, head)?
            .into_iter()
            .map(|entry| T::from_entry(entry).map(|r| self.stamp(r)))
            .collect()
    }

    /// Load the record linked from `index` in `T`'s list, if there is one.
    pub(super) fn neighbour<T: Record>(
        &mut self,
        index: u32,
    ) -> Result<Option<T>, Error> {
        if 0 == index {
            Ok(None)
        } else {
            self.get(index).map(Some)
        }
    }
}
