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

//! Conversations, the roots of the record forest.
//!
//! Layout:
//!
//! ```text
//! 0       flags (reserved, always 0)
//! 1..33   peer identifier, NUL-terminated
//! ...     random padding
//! -16     next
//! -12     prev
//! -8      messages head
//! -4      session keys head
//! ```

use chrono::prelude::*;

use super::entry::{EntryKind, Links};
use super::layout::{check_string, Plaintext};
use super::message::Message;
use super::session_keys::{SessionKeys, SimNumber};
use super::LockedStorage;
use crate::support::error::Error;

const PEER_OFFSET: usize = 1;
/// Width of the peer field. At most `PEER_WIDTH - 1` bytes can be stored.
pub const PEER_WIDTH: usize = 32;

const SLOT_SESSION_KEYS: usize = 0;
const SLOT_MESSAGES: usize = 1;
const SLOT_PREV: usize = 2;
const SLOT_NEXT: usize = 3;

/// A conversation with one peer.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub(super) index: u32,
    flags: u8,
    peer: String,
    pub(super) session_keys_head: u32,
    pub(super) messages_head: u32,
    pub(super) links: Links,
    /// The slot generation this copy was loaded under.
    pub(super) generation: u64,
}

impl Conversation {
    /// Create a new conversation with `peer` at the head of the conversation
    /// list.
    pub fn create(
        st: &mut LockedStorage<'_>,
        peer: &str,
    ) -> Result<Self, Error> {
        check_string(peer, PEER_WIDTH)?;
        let index = st.insert_entry(
            Conversation {
                index: 0,
                flags: 0,
                peer: peer.to_owned(),
                session_keys_head: 0,
                messages_head: 0,
                links: Links::default(),
                generation: 0,
            }
            .into(),
            0,
        )?;
        st.get(index)
    }

    pub fn get(st: &mut LockedStorage<'_>, index: u32) -> Result<Self, Error> {
        st.get(index)
    }

    pub fn save(&self, st: &mut LockedStorage<'_>) -> Result<(), Error> {
        st.save(self)
    }

    /// Delete this conversation along with all its session keys and
    /// messages.
    pub fn delete(self, st: &mut LockedStorage<'_>) -> Result<(), Error> {
        st.delete(self)
    }

    /// Every conversation, most recently created first.
    pub fn all(st: &mut LockedStorage<'_>) -> Result<Vec<Self>, Error> {
        let head = st.header().index_conversations;
        st.list_of(head)
    }

    /// The most recently created conversation.
    pub fn first(st: &mut LockedStorage<'_>) -> Result<Option<Self>, Error> {
        let head = st.header().index_conversations;
        st.neighbour(head)
    }

    /// Find the conversation with `peer`, if there is one.
    pub fn find_by_peer(
        st: &mut LockedStorage<'_>,
        peer: &str,
    ) -> Result<Option<Self>, Error> {
        let mut next = Self::first(st)?;
        while let Some(conversation) = next {
            if conversation.peer == peer {
                return Ok(Some(conversation));
            }
            next = conversation.next(st)?;
        }

        Ok(None)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn links(&self) -> Links {
        self.links
    }

    pub fn session_keys_head(&self) -> u32 {
        self.session_keys_head
    }

    pub fn messages_head(&self) -> u32 {
        self.messages_head
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn set_peer(&mut self, peer: &str) -> Result<(), Error> {
        check_string(peer, PEER_WIDTH)?;
        self.peer = peer.to_owned();
        Ok(())
    }

    /// The next conversation in the list, or `None` at the end.
    pub fn next(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Option<Self>, Error> {
        st.neighbour(self.links.next)
    }

    /// The previous conversation in the list, or `None` at the start.
    pub fn prev(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Option<Self>, Error> {
        st.neighbour(self.links.prev)
    }

    /// The session keys of this conversation, most recent first.
    pub fn session_keys(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Vec<SessionKeys>, Error> {
        let head = st.head_of(EntryKind::SessionKeys, self.index)?;
        st.list_of(head)
    }

    /// The messages of this conversation, most recent first.
    pub fn messages(
        &self,
        st: &mut LockedStorage<'_>,
    ) -> Result<Vec<Message>, Error> {
        let head = st.head_of(EntryKind::Message, self.index)?;
        st.list_of(head)
    }

    /// Find the session keys used with the given SIM.
    pub fn session_keys_for_sim(
        &self,
        st: &mut LockedStorage<'_>,
        sim: &SimNumber,
    ) -> Result<Option<SessionKeys>, Error> {
        Ok(self
            .session_keys(st)?
            .into_iter()
            .find(|keys| keys.sim() == *sim))
    }

    pub(super) fn encode(&self, pt: &mut Plaintext) -> Result<(), Error> {
        pt.set_flags(self.flags);
        pt.set_string(PEER_OFFSET, PEER_WIDTH, &self.peer)?;
        pt.set_pointer(SLOT_SESSION_KEYS, self.session_keys_head);
        pt.set_pointer(SLOT_MESSAGES, self.messages_head);
        self.links.encode(pt, None, SLOT_PREV, SLOT_NEXT);
        Ok(())
    }

    pub(super) fn decode(index: u32, pt: &Plaintext) -> Result<Self, Error> {
        Ok(Conversation {
            index,
            flags: pt.flags(),
            peer: pt.string_at(PEER_OFFSET, PEER_WIDTH)?,
            session_keys_head: pt.pointer(SLOT_SESSION_KEYS),
            messages_head: pt.pointer(SLOT_MESSAGES),
            links: Links::decode(pt, None, SLOT_PREV, SLOT_NEXT),
            generation: 0,
        })
    }
}

/// What a conversation list shows about one conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub index: u32,
    pub peer: String,
    pub message_count: usize,
    pub unread_count: usize,
    /// The timestamp of the newest message, if there are any.
    pub latest: Option<DateTime<Utc>>,
}

/// Summarise every conversation, most recently created first.
///
/// This touches every message in the file, so it is usually run through
/// `Storage::scan_in_background()`.
pub fn summarise_conversations(
    st: &mut LockedStorage<'_>,
) -> Result<Vec<ConversationSummary>, Error> {
    let mut ret = Vec::new();
    for conversation in Conversation::all(st)? {
        let messages = conversation.messages(st)?;
        ret.push(ConversationSummary {
            index: conversation.index,
            unread_count: messages.iter().filter(|m| m.is_unread()).count(),
            latest: messages.iter().map(Message::timestamp).max(),
            message_count: messages.len(),
            peer: conversation.peer,
        });
    }

    Ok(ret)
}
