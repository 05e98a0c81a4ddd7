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

//! Messages exchanged within a conversation.
//!
//! A message holds up to `BODY_CAPACITY` bytes inline. Anything longer
//! continues in its list of `MessagePart`s; the inline body counts as part 0
//! and the list supplies parts 1 onwards, in list order.
//!
//! Layout:
//!
//! ```text
//! 0       flags
//! 1..9    timestamp, milliseconds since the UNIX epoch
//! 9       body length
//! 10..150 body
//! ...     random padding
//! -16     next
//! -12     prev
//! -8      parent
//! -4      parts head
//! ```

use bitflags::bitflags;
use chrono::prelude::*;

use super::conversation::Conversation;
use super::entry::{EntryKind, Links};
use super::layout::Plaintext;
use super::message_part::{MessagePart, PART_CAPACITY};
use super::LockedStorage;
use crate::support::error::Error;

/// The most body bytes a message can hold inline.
pub const BODY_CAPACITY: usize = 140;

const TIMESTAMP_OFFSET: usize = 1;
const BODY_OFFSET: usize = 9;

const SLOT_PARTS: usize = 0;
const SLOT_PARENT: usize = 1;
const SLOT_PREV: usize = 2;
const SLOT_NEXT: usize = 3;

bitflags! {
    pub struct MessageFlags: u8 {
        /// At least one part has been delivered.
        const DELIVERED_PART = 0x01;
        /// Every part has been delivered.
        const DELIVERED_ALL = 0x02;
        const OUTGOING = 0x04;
        const UNREAD = 0x08;
        /// The body is compressed.
        const COMPRESSED = 0x10;
        /// The body is 7-bit ASCII.
        const ASCII = 0x20;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Clone, Debug)]
pub struct Message {
    pub(super) index: u32,
    flags: MessageFlags,
    timestamp: DateTime<Utc>,
    body: Vec<u8>,
    pub(super) parts_head: u32,
    pub(super) links: Links,
    /// The slot generation this copy was loaded under.
    pub(super) generation: u64,
}

impl Message {
    /// Create an empty incoming message, timestamped now, at the head of
    /// `conversation`'s message list.
    ///
    /// `conversation` is updated to point to the new entry.
    pub fn create(
        st: &mut LockedStorage<'_>,
        conversation: &mut Conversation,
    ) -> Result<Self, Error> {
        st.check_live(conversation)?;
        let index = st.insert_entry(
            Message {
                index: 0,
                flags: MessageFlags::empty(),
                timestamp: truncate_to_millis(Utc::now()),
                body: Vec::new(),
                parts_head: 0,
                links: Links::default(),
                generation: 0,
            }
            .into(),
            conversation.index,
        )?;
        conversation.messages_head = index;
        st.get(index)
    }

    pub fn get(st: &mut LockedStorage<'_>, index: u32) -> Result<Self, Error> {
        st.get(index)
    }

    pub fn save(&self, st: &mut LockedStorage<'_>) -> Result<(), Error> {
        st.save(self)
    }

    /// Delete this message and all its parts.
    pub fn delete(self, st: &mut LockedStorage<'_>) -> Result<(), Error> {
        st.delete(self)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn links(&self) -> Links {
        self.links
    }

    pub fn parts_head(&self) -> u32 {
        self.parts_head
    }

    /// Load the conversation this message belongs to.
    pub fn parent(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Conversation, Error> {
        st.get(self.links.parent)
    }

    pub fn next(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Option<Self>, Error> {
        st.neighbour(self.links.next)
    }

    pub fn prev(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Option<Self>, Error> {
        st.neighbour(self.links.prev)
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: MessageFlags, on: bool) {
        self.flags.set(flag, on);
    }

    pub fn direction(&self) -> Direction {
        if self.flags.contains(MessageFlags::OUTGOING) {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }

    pub fn set_direction(&mut self, direction: Direction) {
        let outgoing = Direction::Outgoing == direction;
        self.flags.set(MessageFlags::OUTGOING, outgoing);
    }

    pub fn is_unread(&self) -> bool {
        self.flags.contains(MessageFlags::UNREAD)
    }

    pub fn set_unread(&mut self, unread: bool) {
        self.flags.set(MessageFlags::UNREAD, unread);
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Set the timestamp. Precision beyond milliseconds is dropped.
    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = truncate_to_millis(timestamp);
    }

    /// The inline body, i.e., part 0.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: &[u8]) -> Result<(), Error> {
        if body.len() > BODY_CAPACITY {
            return Err(Error::DataTooLong);
        }

        self.body = body.to_vec();
        Ok(())
    }

    /// The continuation parts of this message, in order.
    pub fn parts(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Vec<MessagePart>, Error> {
        let head = st.head_of(EntryKind::MessagePart, self.index)?;
        st.list_of(head)
    }

    /// The number of parts, counting the inline body.
    pub fn part_count(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<usize, Error> {
        Ok(1 + self.parts(st)?.len())
    }

    /// Return the body of part `i`, where part 0 is the inline body.
    pub fn get_part(
        &self,
        st: &mut LockedStorage<'_>,
        i: usize,
    ) -> Result<Vec<u8>, Error> {
        if 0 == i {
            return Ok(self.body.clone());
        }

        self.parts(st)?
            .into_iter()
            .nth(i - 1)
            .map(|part| part.body().to_vec())
            .ok_or(Error::PartOutOfRange)
    }

    /// Set the body of part `i`, saving the change immediately.
    ///
    /// `i` may be one past the last part, in which case a new part is
    /// appended. Since lists only grow at the head, appending rebuilds the
    /// whole part list.
    pub fn set_part(
        &mut self,
        st: &mut LockedStorage<'_>,
        i: usize,
        body: &[u8],
    ) -> Result<(), Error> {
        if 0 == i {
            self.set_body(body)?;
            return self.save(st);
        }

        st.check_live(self)?;
        let mut parts = self.parts(st)?;
        if i <= parts.len() {
            let part = &mut parts[i - 1];
            part.set_body(body)?;
            part.save(st)
        } else if i == parts.len() + 1 {
            if body.len() > PART_CAPACITY {
                return Err(Error::DataTooLong);
            }

            let delivered =
                parts.iter().map(MessagePart::is_delivered).collect::<Vec<_>>();
            let mut bodies =
                parts.iter().map(|p| p.body().to_vec()).collect::<Vec<_>>();
            bodies.push(body.to_vec());

            let new_parts = self.assign_parts(st, &bodies)?;
            for (mut part, delivered) in new_parts.into_iter().zip(delivered) {
                if delivered {
                    part.set_delivered(true);
                    part.save(st)?;
                }
            }
            Ok(())
        } else {
            Err(Error::PartOutOfRange)
        }
    }

    /// Replace the whole part list of this message with `bodies`, in order.
    ///
    /// The previous parts are deleted first. Returns the new parts.
    pub fn assign_parts<B: AsRef<[u8]>>(
        &mut self,
        st: &mut LockedStorage<'_>,
        bodies: &[B],
    ) -> Result<Vec<MessagePart>, Error> {
        if bodies.iter().any(|b| b.as_ref().len() > PART_CAPACITY) {
            return Err(Error::DataTooLong);
        }
        st.check_live(self)?;

        loop {
            let head = st.head_of(EntryKind::MessagePart, self.index)?;
            if 0 == head {
                break;
            }
            st.delete_entry(EntryKind::MessagePart, head)?;
        }
        self.parts_head = 0;

        for body in bodies.iter().rev() {
            MessagePart::create(st, self, body.as_ref())?;
        }

        // Reload, since each part's `prev` changed when the one before it
        // was prepended.
        let head = self.parts_head;
        st.list_of(head)
    }

    /// Store `data` across the inline body and as many parts as needed,
    /// replacing any existing parts.
    pub fn store_data(
        &mut self,
        st: &mut LockedStorage<'_>,
        data: &[u8],
    ) -> Result<(), Error> {
        let inline_len = data.len().min(BODY_CAPACITY);
        self.set_body(&data[..inline_len])?;
        self.save(st)?;

        let rest = data[inline_len..].chunks(PART_CAPACITY).collect::<Vec<_>>();
        self.assign_parts(st, &rest)?;
        Ok(())
    }

    /// Concatenate the inline body and every part.
    pub fn load_data(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Vec<u8>, Error> {
        let mut data = self.body.clone();
        for part in self.parts(st)? {
            data.extend_from_slice(part.body());
        }
        Ok(data)
    }

    pub(super) fn encode(&self, pt: &mut Plaintext) -> Result<(), Error> {
        pt.set_flags(self.flags.bits());
        pt.set_i64(TIMESTAMP_OFFSET, self.timestamp.timestamp_millis());
        pt.set_short_bytes(BODY_OFFSET, BODY_CAPACITY, &self.body)?;
        pt.set_pointer(SLOT_PARTS, self.parts_head);
        self.links.encode(pt, Some(SLOT_PARENT), SLOT_PREV, SLOT_NEXT);
        Ok(())
    }

    pub(super) fn decode(index: u32, pt: &Plaintext) -> Result<Self, Error> {
        let millis = pt.i64_at(TIMESTAMP_OFFSET);
        let timestamp =
            Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                Error::Corrupt(format!(
                    "message {} has impossible timestamp {}",
                    index, millis
                ))
            })?;

        Ok(Message {
            index,
            flags: MessageFlags::from_bits_truncate(pt.flags()),
            timestamp,
            body: pt.short_bytes_at(BODY_OFFSET, BODY_CAPACITY)?,
            parts_head: pt.pointer(SLOT_PARTS),
            links: Links::decode(pt, Some(SLOT_PARENT), SLOT_PREV, SLOT_NEXT),
            generation: 0,
        })
    }
}

fn truncate_to_millis(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp.timestamp_millis())
        .single()
        .unwrap_or(timestamp)
}
