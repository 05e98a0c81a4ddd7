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

//! The plaintext layout shared by all record kinds.
//!
//! A record's plaintext starts with one flags byte, followed by kind-specific
//! fields at fixed offsets. The pointer fields are stored working backwards
//! from the end of the plaintext, four bytes each, so pointer slot 0 is the
//! last four bytes.
//!
//! Every byte not covered by a field is random and never zero. A fresh
//! buffer is generated for every encode, so the ciphertext never reveals how
//! long the variable-length fields are through repeated padding.

use byteorder::{ByteOrder, LittleEndian};
use rand::{rngs::OsRng, Rng};

use crate::support::error::Error;

pub const FLAGS_OFFSET: usize = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plaintext(Vec<u8>);

impl Plaintext {
    /// Create a plaintext of `len` random non-zero bytes.
    pub fn random(len: usize) -> Self {
        let mut data = vec![0u8; len];
        fill_random_nonzero(&mut data);
        Plaintext(data)
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Plaintext(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn flags(&self) -> u8 {
        self.0[FLAGS_OFFSET]
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.0[FLAGS_OFFSET] = flags;
    }

    pub fn u8_at(&self, offset: usize) -> u8 {
        self.0[offset]
    }

    pub fn set_u8(&mut self, offset: usize, value: u8) {
        self.0[offset] = value;
    }

    pub fn i64_at(&self, offset: usize) -> i64 {
        LittleEndian::read_i64(&self.0[offset..offset + 8])
    }

    pub fn set_i64(&mut self, offset: usize, value: i64) {
        LittleEndian::write_i64(&mut self.0[offset..offset + 8], value);
    }

    pub fn bytes_at(&self, offset: usize, len: usize) -> &[u8] {
        &self.0[offset..offset + len]
    }

    pub fn set_bytes(&mut self, offset: usize, data: &[u8]) {
        self.0[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Read a length-prefixed byte field: one length byte at `offset`,
    /// followed by up to `capacity` bytes of data.
    pub fn short_bytes_at(
        &self,
        offset: usize,
        capacity: usize,
    ) -> Result<Vec<u8>, Error> {
        let len = self.0[offset] as usize;
        if len > capacity {
            return Err(Error::Corrupt(format!(
                "byte field claims {} bytes but holds at most {}",
                len, capacity
            )));
        }

        Ok(self.0[offset + 1..offset + 1 + len].to_vec())
    }

    pub fn set_short_bytes(
        &mut self,
        offset: usize,
        capacity: usize,
        data: &[u8],
    ) -> Result<(), Error> {
        if data.len() > capacity || data.len() > u8::MAX as usize {
            return Err(Error::DataTooLong);
        }

        self.0[offset] = data.len() as u8;
        self.set_bytes(offset + 1, data);
        Ok(())
    }

    /// Read a fixed-width, NUL-terminated string.
    pub fn string_at(
        &self,
        offset: usize,
        width: usize,
    ) -> Result<String, Error> {
        let field = &self.0[offset..offset + width];
        let len = field
            .iter()
            .position(|&b| 0 == b)
            .ok_or(Error::InvalidString)?;
        String::from_utf8(field[..len].to_vec())
            .map_err(|_| Error::InvalidString)
    }

    /// Write a fixed-width, NUL-terminated string.
    ///
    /// The terminator must fit inside the field, so at most `width - 1`
    /// bytes of string can be stored. The bytes after the terminator are left
    /// as they were, which for a fresh plaintext means random.
    pub fn set_string(
        &mut self,
        offset: usize,
        width: usize,
        s: &str,
    ) -> Result<(), Error> {
        check_string(s, width)?;
        self.set_bytes(offset, s.as_bytes());
        self.0[offset + s.len()] = 0;
        Ok(())
    }

    /// Return the pointer in the given slot, counting from the end.
    pub fn pointer(&self, slot: usize) -> u32 {
        let end = self.0.len() - 4 * slot;
        LittleEndian::read_u32(&self.0[end - 4..end])
    }

    pub fn set_pointer(&mut self, slot: usize, index: u32) {
        let end = self.0.len() - 4 * slot;
        LittleEndian::write_u32(&mut self.0[end - 4..end], index);
    }
}

/// Check that `s` can be stored in a fixed-width string field of `width`
/// bytes.
pub fn check_string(s: &str, width: usize) -> Result<(), Error> {
    if s.as_bytes().contains(&0) {
        Err(Error::InvalidString)
    } else if s.len() >= width {
        Err(Error::StringTooLong)
    } else {
        Ok(())
    }
}

pub fn fill_random_nonzero(dst: &mut [u8]) {
    OsRng.fill(&mut *dst);
    for b in dst.iter_mut() {
        while 0 == *b {
            *b = OsRng.gen();
        }
    }
}
