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

pub mod master_key;
pub mod record_codec;

/// The AES block size, which is also the IV length.
pub const AES_BLOCK: usize = 16;
/// The length of AES-256 keys.
pub const AES_KEY: usize = 32;
/// The length of the HMAC-SHA256 tag on every record.
pub const MAC_LENGTH: usize = 32;
/// How many bytes the codec adds to a plaintext.
pub const ENCRYPTION_OVERHEAD: usize = MAC_LENGTH + AES_BLOCK;
