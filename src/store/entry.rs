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

//! The common shape of every entry below the header.
//!
//! The kind of an entry is not recorded in the file. Whoever reads an entry
//! must already know what kind to expect, which in practice means that they
//! found its index by walking a list of that kind.

use std::convert::TryFrom;

use super::chunk_file::CHUNK_SIZE;
use super::conversation::Conversation;
use super::layout::Plaintext;
use super::message::Message;
use super::message_part::MessagePart;
use super::session_keys::SessionKeys;
use crate::crypt::ENCRYPTION_OVERHEAD;
use crate::support::error::Error;

/// The plaintext size of every entry other than the header.
pub const ENTRY_PLAINTEXT_SIZE: usize = CHUNK_SIZE - ENCRYPTION_OVERHEAD;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    Empty,
    Conversation,
    SessionKeys,
    Message,
    MessagePart,
}

impl EntryKind {
    /// The kind which owns lists of this kind, if any.
    ///
    /// Conversations have no parent entry; their list is rooted in the
    /// header.
    pub fn parent_kind(self) -> Option<EntryKind> {
        match self {
            EntryKind::SessionKeys | EntryKind::Message => {
                Some(EntryKind::Conversation)
            },
            EntryKind::MessagePart => Some(EntryKind::Message),
            EntryKind::Empty | EntryKind::Conversation => None,
        }
    }

    /// The kinds of the lists owned by an entry of this kind.
    pub fn child_kinds(self) -> &'static [EntryKind] {
        match self {
            EntryKind::Conversation => {
                &[EntryKind::SessionKeys, EntryKind::Message]
            },
            EntryKind::Message => &[EntryKind::MessagePart],
            _ => &[],
        }
    }
}

/// The list membership of an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Links {
    /// The owning entry, or 0 for conversations.
    pub parent: u32,
    pub prev: u32,
    pub next: u32,
}

impl Links {
    pub(super) fn decode(
        pt: &Plaintext,
        parent_slot: Option<usize>,
        prev_slot: usize,
        next_slot: usize,
    ) -> Self {
        Links {
            parent: parent_slot.map_or(0, |slot| pt.pointer(slot)),
            prev: pt.pointer(prev_slot),
            next: pt.pointer(next_slot),
        }
    }

    pub(super) fn encode(
        &self,
        pt: &mut Plaintext,
        parent_slot: Option<usize>,
        prev_slot: usize,
        next_slot: usize,
    ) {
        if let Some(slot) = parent_slot {
            pt.set_pointer(slot, self.parent);
        }
        pt.set_pointer(prev_slot, self.prev);
        pt.set_pointer(next_slot, self.next);
    }
}

/// A free slot on the free list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmptyEntry {
    pub index: u32,
    pub next: u32,
}

const EMPTY_SLOT_NEXT: usize = 0;

#[derive(Clone, Debug)]
pub enum Entry {
    Empty(EmptyEntry),
    Conversation(Conversation),
    SessionKeys(SessionKeys),
    Message(Message),
    MessagePart(MessagePart),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match *self {
            Entry::Empty(..) => EntryKind::Empty,
            Entry::Conversation(..) => EntryKind::Conversation,
            Entry::SessionKeys(..) => EntryKind::SessionKeys,
            Entry::Message(..) => EntryKind::Message,
            Entry::MessagePart(..) => EntryKind::MessagePart,
        }
    }

    pub fn index(&self) -> u32 {
        match *self {
            Entry::Empty(ref e) => e.index,
            Entry::Conversation(ref e) => e.index,
            Entry::SessionKeys(ref e) => e.index,
            Entry::Message(ref e) => e.index,
            Entry::MessagePart(ref e) => e.index,
        }
    }

    pub(super) fn set_index(&mut self, index: u32) {
        match *self {
            Entry::Empty(ref mut e) => e.index = index,
            Entry::Conversation(ref mut e) => e.index = index,
            Entry::SessionKeys(ref mut e) => e.index = index,
            Entry::Message(ref mut e) => e.index = index,
            Entry::MessagePart(ref mut e) => e.index = index,
        }
    }

    /// Return the list membership of this entry.
    ///
    /// For an empty entry, only `next` is meaningful.
    pub fn links(&self) -> Links {
        match *self {
            Entry::Empty(ref e) => Links {
                next: e.next,
                ..Links::default()
            },
            Entry::Conversation(ref e) => e.links,
            Entry::SessionKeys(ref e) => e.links,
            Entry::Message(ref e) => e.links,
            Entry::MessagePart(ref e) => e.links,
        }
    }

    pub(super) fn set_links(&mut self, links: Links) {
        match *self {
            Entry::Empty(ref mut e) => e.next = links.next,
            Entry::Conversation(ref mut e) => e.links = Links {
                parent: 0,
                ..links
            },
            Entry::SessionKeys(ref mut e) => e.links = links,
            Entry::Message(ref mut e) => e.links = links,
            Entry::MessagePart(ref mut e) => e.links = links,
        }
    }

    /// Return the head of this entry's list of `child` entries.
    ///
    /// Returns 0 if this entry does not own lists of that kind.
    pub fn child_head(&self, child: EntryKind) -> u32 {
        match (self, child) {
            (&Entry::Conversation(ref e), EntryKind::SessionKeys) => {
                e.session_keys_head
            },
            (&Entry::Conversation(ref e), EntryKind::Message) => {
                e.messages_head
            },
            (&Entry::Message(ref e), EntryKind::MessagePart) => e.parts_head,
            _ => 0,
        }
    }

    pub(super) fn set_child_head(&mut self, child: EntryKind, head: u32) {
        match (self, child) {
            (&mut Entry::Conversation(ref mut e), EntryKind::SessionKeys) => {
                e.session_keys_head = head
            },
            (&mut Entry::Conversation(ref mut e), EntryKind::Message) => {
                e.messages_head = head
            },
            (&mut Entry::Message(ref mut e), EntryKind::MessagePart) => {
                e.parts_head = head
            },
            _ => (),
        }
    }

    /// Produce the plaintext of this entry, with fresh random padding.
    pub(super) fn encode(&self) -> Result<Plaintext, Error> {
        let mut pt = Plaintext::random(ENTRY_PLAINTEXT_SIZE);
        match *self {
            Entry::Empty(ref e) => pt.set_pointer(EMPTY_SLOT_NEXT, e.next),
            Entry::Conversation(ref e) => e.encode(&mut pt)?,
            Entry::SessionKeys(ref e) => e.encode(&mut pt)?,
            Entry::Message(ref e) => e.encode(&mut pt)?,
            Entry::MessagePart(ref e) => e.encode(&mut pt)?,
        }
        Ok(pt)
    }

    /// Interpret `pt`, the plaintext at `index`, as an entry of `kind`.
    pub(super) fn decode(
        kind: EntryKind,
        index: u32,
        pt: &Plaintext,
    ) -> Result<Self, Error> {
        Ok(match kind {
            EntryKind::Empty => Entry::Empty(EmptyEntry {
                index,
                next: pt.pointer(EMPTY_SLOT_NEXT),
            }),
            EntryKind::Conversation => {
                Entry::Conversation(Conversation::decode(index, pt)?)
            },
            EntryKind::SessionKeys => {
                Entry::SessionKeys(SessionKeys::decode(index, pt)?)
            },
            EntryKind::Message => Entry::Message(Message::decode(index, pt)?),
            EntryKind::MessagePart => {
                Entry::MessagePart(MessagePart::decode(index, pt)?)
            },
        })
    }
}

/// A record kind which callers can create, load, save and delete.
///
/// Records are plain values copied out of the storage; nothing is persisted
/// until they are passed back to `LockedStorage::save()`.
///
/// Every copy remembers the generation of its slot at the time it was
/// loaded. Freeing a slot starts a new generation, so a copy which outlived
/// its entry can be told apart from the entry now occupying the slot.
pub trait Record: Clone + Into<Entry> {
    const KIND: EntryKind;

    fn index(&self) -> u32;

    fn generation(&self) -> u64;

    fn set_generation(&mut self, generation: u64);

    fn from_entry(entry: Entry) -> Result<Self, Error>;
}

macro_rules! record {
    ($ty:ident) => {
        impl From<$ty> for Entry {
            fn from(record: $ty) -> Entry {
                Entry::$ty(record)
            }
        }

        impl Record for $ty {
            const KIND: EntryKind = EntryKind::$ty;

            fn index(&self) -> u32 {
                self.index
            }

            fn generation(&self) -> u64 {
                self.generation
            }

            fn set_generation(&mut self, generation: u64) {
                self.generation = generation;
            }

            fn from_entry(entry: Entry) -> Result<Self, Error> {
                match entry {
                    Entry::$ty(record) => Ok(record),
                    _ => Err(Error::WrongKind),
                }
            }
        }
    };
}

record!(Conversation);
record!(SessionKeys);
record!(Message);
record!(MessagePart);

/// Convert a caller-supplied pointer value to an index.
///
/// Values which do not fit an unsigned 32-bit pointer are rejected.
pub fn to_index(value: i64) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| Error::IndexOutOfRange(value))
}
