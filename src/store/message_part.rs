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

//! The continuation parts of a long message.
//!
//! Layout:
//!
//! ```text
//! 0       flags
//! 1       body length
//! 2..142  body
//! ...     random padding
//! -12     next
//! -8      prev
//! -4      parent
//! ```

use bitflags::bitflags;

use super::entry::Links;
use super::layout::Plaintext;
use super::message::Message;
use super::LockedStorage;
use crate::support::error::Error;

/// The most body bytes a single part can hold.
pub const PART_CAPACITY: usize = 140;

const BODY_OFFSET: usize = 1;

const SLOT_PARENT: usize = 0;
const SLOT_PREV: usize = 1;
const SLOT_NEXT: usize = 2;

bitflags! {
    pub struct MessagePartFlags: u8 {
        const DELIVERED = 0x01;
    }
}

#[derive(Clone, Debug)]
pub struct MessagePart {
    pub(super) index: u32,
    flags: MessagePartFlags,
    body: Vec<u8>,
    pub(super) links: Links,
    /// The slot generation this copy was loaded under.
    pub(super) generation: u64,
}

impl MessagePart {
    /// Create a part holding `body` at the head of `message`'s part list.
    ///
    /// `message` is updated to point to the new entry.
    pub fn create(
        st: &mut LockedStorage<'_>,
        message: &mut Message,
        body: &[u8],
    ) -> Result<Self, Error> {
        if body.len() > PART_CAPACITY {
            return Err(Error::DataTooLong);
        }
        st.check_live(message)?;

        let index =
            st.insert_entry(Self::detached(0, body).into(), message.index)?;
        message.parts_head = index;
        st.get(index)
    }

    /// A part that is not yet in any list.
    pub(super) fn detached(index: u32, body: &[u8]) -> Self {
        MessagePart {
            index,
            flags: MessagePartFlags::empty(),
            body: body.to_vec(),
            links: Links::default(),
            generation: 0,
        }
    }

    pub fn get(st: &mut LockedStorage<'_>, index: u32) -> Result<Self, Error> {
        st.get(index)
    }

    pub fn save(&self, st: &mut LockedStorage<'_>) -> Result<(), Error> {
        st.save(self)
    }

    pub fn delete(self, st: &mut LockedStorage<'_>) -> Result<(), Error> {
        st.delete(self)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn links(&self) -> Links {
        self.links
    }

    /// Load the message this part belongs to.
    pub fn parent(&self, st: &mut LockedStorage<'_>) -> Result<Message, Error> {
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

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: &[u8]) -> Result<(), Error> {
        if body.len() > PART_CAPACITY {
            return Err(Error::DataTooLong);
        }

        self.body = body.to_vec();
        Ok(())
    }

    pub fn is_delivered(&self) -> bool {
        self.flags.contains(MessagePartFlags::DELIVERED)
    }

    pub fn set_delivered(&mut self, delivered: bool) {
        self.flags.set(MessagePartFlags::DELIVERED, delivered);
    }

    pub(super) fn encode(&self, pt: &mut Plaintext) -> Result<(), Error> {
        pt.set_flags(self.flags.bits());
        pt.set_short_bytes(BODY_OFFSET, PART_CAPACITY, &self.body)?;
        self.links.encode(pt, Some(SLOT_PARENT), SLOT_PREV, SLOT_NEXT);
        Ok(())
    }

    pub(super) fn decode(index: u32, pt: &Plaintext) -> Result<Self, Error> {
        Ok(MessagePart {
            index,
            flags: MessagePartFlags::from_bits_truncate(pt.flags()),
            body: pt.short_bytes_at(BODY_OFFSET, PART_CAPACITY)?,
            links: Links::decode(pt, Some(SLOT_PARENT), SLOT_PREV, SLOT_NEXT),
            generation: 0,
        })
    }
}
