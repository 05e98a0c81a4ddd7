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

//! The session keys negotiated with a peer for one of our SIMs.
//!
//! Layout:
//!
//! ```text
//! 0       flags
//! 1..33   SIM identifier, NUL-terminated
//! 33..65  outbound key
//! 65      next outbound sequence id
//! 66..98  inbound key
//! 98      last inbound sequence id
//! ...     random padding
//! -12     next
//! -8      prev
//! -4      parent
//! ```

use bitflags::bitflags;

use super::conversation::Conversation;
use super::entry::Links;
use super::layout::{check_string, Plaintext};
use super::LockedStorage;
use crate::support::error::Error;

pub const KEY_LENGTH: usize = 32;
/// Width of the SIM identifier field. At most `SIM_WIDTH - 1` bytes can be
/// stored.
pub const SIM_WIDTH: usize = 32;

const SIM_OFFSET: usize = 1;
const OUTBOUND_KEY_OFFSET: usize = 33;
const NEXT_ID_OUT_OFFSET: usize = 65;
const INBOUND_KEY_OFFSET: usize = 66;
const LAST_ID_IN_OFFSET: usize = 98;

const SLOT_PARENT: usize = 0;
const SLOT_PREV: usize = 1;
const SLOT_NEXT: usize = 2;

bitflags! {
    pub struct SessionKeysFlags: u8 {
        /// Our half of the key exchange has been sent.
        const SENT = 0x01;
        /// The peer confirmed the key exchange.
        const CONFIRMED = 0x02;
        /// The SIM identifier is the SIM serial rather than a phone number.
        const SIM_IS_SERIAL = 0x04;
    }
}

/// Identifies one of the local SIMs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SimNumber {
    /// The phone number or SIM serial.
    pub number: String,
    /// Whether `number` is the SIM serial.
    pub is_serial: bool,
}

impl SimNumber {
    pub fn phone(number: &str) -> Self {
        SimNumber {
            number: number.to_owned(),
            is_serial: false,
        }
    }

    pub fn serial(serial: &str) -> Self {
        SimNumber {
            number: serial.to_owned(),
            is_serial: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionKeys {
    pub(super) index: u32,
    flags: SessionKeysFlags,
    sim: String,
    outbound_key: [u8; KEY_LENGTH],
    next_id_out: u8,
    inbound_key: [u8; KEY_LENGTH],
    last_id_in: u8,
    pub(super) links: Links,
    /// The slot generation this copy was loaded under.
    pub(super) generation: u64,
}

impl SessionKeys {
    /// Create blank session keys for `sim` at the head of `conversation`'s
    /// list.
    ///
    /// `conversation` is updated to point to the new entry.
    pub fn create(
        st: &mut LockedStorage<'_>,
        conversation: &mut Conversation,
        sim: &SimNumber,
    ) -> Result<Self, Error> {
        check_string(&sim.number, SIM_WIDTH)?;
        st.check_live(conversation)?;

        let mut flags = SessionKeysFlags::empty();
        flags.set(SessionKeysFlags::SIM_IS_SERIAL, sim.is_serial);
        let index = st.insert_entry(
            SessionKeys {
                index: 0,
                flags,
                sim: sim.number.clone(),
                outbound_key: [0; KEY_LENGTH],
                next_id_out: 0,
                inbound_key: [0; KEY_LENGTH],
                last_id_in: 0,
                links: Links::default(),
                generation: 0,
            }
            .into(),
            conversation.index,
        )?;
        conversation.session_keys_head = index;
        st.get(index)
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

    /// Load the conversation these keys belong to.
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

    pub fn flags(&self) -> SessionKeysFlags {
        self.flags
    }

    pub fn sim(&self) -> SimNumber {
        SimNumber {
            number: self.sim.clone(),
            is_serial: self.flags.contains(SessionKeysFlags::SIM_IS_SERIAL),
        }
    }

    pub fn set_sim(&mut self, sim: &SimNumber) -> Result<(), Error> {
        check_string(&sim.number, SIM_WIDTH)?;
        self.sim = sim.number.clone();
        self.flags.set(SessionKeysFlags::SIM_IS_SERIAL, sim.is_serial);
        Ok(())
    }

    pub fn is_sent(&self) -> bool {
        self.flags.contains(SessionKeysFlags::SENT)
    }

    pub fn set_sent(&mut self, sent: bool) {
        self.flags.set(SessionKeysFlags::SENT, sent);
    }

    pub fn is_confirmed(&self) -> bool {
        self.flags.contains(SessionKeysFlags::CONFIRMED)
    }

    pub fn set_confirmed(&mut self, confirmed: bool) {
        self.flags.set(SessionKeysFlags::CONFIRMED, confirmed);
    }

    pub fn outbound_key(&self) -> &[u8; KEY_LENGTH] {
        &self.outbound_key
    }

    pub fn set_outbound_key(&mut self, key: &[u8; KEY_LENGTH]) {
        self.outbound_key = *key;
    }

    pub fn inbound_key(&self) -> &[u8; KEY_LENGTH] {
        &self.inbound_key
    }

    pub fn set_inbound_key(&mut self, key: &[u8; KEY_LENGTH]) {
        self.inbound_key = *key;
    }

    pub fn next_id_out(&self) -> u8 {
        self.next_id_out
    }

    pub fn set_next_id_out(&mut self, id: u8) {
        self.next_id_out = id;
    }

    /// Return the next outbound sequence id and advance it, wrapping around
    /// after 255.
    pub fn take_next_id_out(&mut self) -> u8 {
        let id = self.next_id_out;
        self.next_id_out = id.wrapping_add(1);
        id
    }

    pub fn last_id_in(&self) -> u8 {
        self.last_id_in
    }

    pub fn set_last_id_in(&mut self, id: u8) {
        self.last_id_in = id;
    }

    pub(super) fn encode(&self, pt: &mut Plaintext) -> Result<(), Error> {
        pt.set_flags(self.flags.bits());
        pt.set_string(SIM_OFFSET, SIM_WIDTH, &self.sim)?;
        pt.set_bytes(OUTBOUND_KEY_OFFSET, &self.outbound_key);
        pt.set_u8(NEXT_ID_OUT_OFFSET, self.next_id_out);
        pt.set_bytes(INBOUND_KEY_OFFSET, &self.inbound_key);
        pt.set_u8(LAST_ID_IN_OFFSET, self.last_id_in);
        self.links.encode(pt, Some(SLOT_PARENT), SLOT_PREV, SLOT_NEXT);
        Ok(())
    }

    pub(super) fn decode(index: u32, pt: &Plaintext) -> Result<Self, Error> {
        let mut outbound_key = [0u8; KEY_LENGTH];
        outbound_key
            .copy_from_slice(pt.bytes_at(OUTBOUND_KEY_OFFSET, KEY_LENGTH));
        let mut inbound_key = [0u8; KEY_LENGTH];
        inbound_key
            .copy_from_slice(pt.bytes_at(INBOUND_KEY_OFFSET, KEY_LENGTH));

        Ok(SessionKeys {
            index,
            flags: SessionKeysFlags::from_bits_truncate(pt.flags()),
            sim: pt.string_at(SIM_OFFSET, SIM_WIDTH)?,
            outbound_key,
            next_id_out: pt.u8_at(NEXT_ID_OUT_OFFSET),
            inbound_key,
            last_id_in: pt.u8_at(LAST_ID_IN_OFFSET),
            links: Links::decode(pt, Some(SLOT_PARENT), SLOT_PREV, SLOT_NEXT),
            generation: 0,
        })
    }
}
