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

//! The header entry at index 0.
//!
//! The first four bytes of the header chunk are plaintext: a three-byte
//! magic followed by the format version, so that a file can be identified
//! before any key is available. The encrypted part follows, but because four
//! bytes are already used, it holds a shorter plaintext than other entries.
//! The trailing bytes of the chunk that do not fit an AES block are random.

use super::chunk_file::{Chunk, CHUNK_SIZE};
use super::layout::{fill_random_nonzero, Plaintext};
use crate::crypt::record_codec::RecordCodec;
use crate::crypt::{AES_BLOCK, ENCRYPTION_OVERHEAD};
use crate::support::error::Error;

pub const MAGIC: &[u8; 3] = b"SMS";
pub const FORMAT_VERSION: u8 = 1;
/// Length of the unencrypted prefix (magic + version).
pub const HEADER_PREFIX: usize = 4;
/// Length of the header's plaintext: the largest block-aligned size which
/// fits after the prefix and the encryption overhead.
pub const HEADER_PLAINTEXT_SIZE: usize = (CHUNK_SIZE
    - HEADER_PREFIX
    - ENCRYPTION_OVERHEAD)
    / AES_BLOCK
    * AES_BLOCK;

const SLOT_INDEX_EMPTY: usize = 0;
const SLOT_INDEX_CONVERSATIONS: usize = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// The head of the free list.
    pub index_empty: u32,
    /// The head of the conversation list.
    pub index_conversations: u32,
}

impl Header {
    pub fn encode(&self, codec: &RecordCodec) -> Result<Chunk, Error> {
        let mut chunk = [0u8; CHUNK_SIZE];
        fill_random_nonzero(&mut chunk);
        chunk[..MAGIC.len()].copy_from_slice(MAGIC);
        chunk[MAGIC.len()] = FORMAT_VERSION;

        let mut pt = Plaintext::random(HEADER_PLAINTEXT_SIZE);
        pt.set_flags(0);
        pt.set_pointer(SLOT_INDEX_EMPTY, self.index_empty);
        pt.set_pointer(SLOT_INDEX_CONVERSATIONS, self.index_conversations);

        codec.encode(
            pt.as_bytes(),
            &mut chunk[HEADER_PREFIX..][..HEADER_PLAINTEXT_SIZE
                + ENCRYPTION_OVERHEAD],
        )?;
        Ok(chunk)
    }

    pub fn decode(chunk: &Chunk, codec: &RecordCodec) -> Result<Self, Error> {
        check_prefix(chunk)?;

        let pt = Plaintext::from_vec(codec.decode(
            &chunk[HEADER_PREFIX..][..HEADER_PLAINTEXT_SIZE
                + ENCRYPTION_OVERHEAD],
        )?);
        Ok(Header {
            index_empty: pt.pointer(SLOT_INDEX_EMPTY),
            index_conversations: pt.pointer(SLOT_INDEX_CONVERSATIONS),
        })
    }
}

/// Verify the unencrypted magic and version of a header chunk.
pub fn check_prefix(chunk: &Chunk) -> Result<(), Error> {
    if chunk[..MAGIC.len()] != MAGIC[..] {
        Err(Error::BadMagic)
    } else if FORMAT_VERSION != chunk[MAGIC.len()] {
        Err(Error::UnsupportedVersion(chunk[MAGIC.len()]))
    } else {
        Ok(())
    }
}
