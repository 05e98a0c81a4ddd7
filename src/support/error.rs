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

use std::io;

use thiserror::Error;

/// Every failure the storage engine can surface.
///
/// Format errors and authentication failures are deliberately distinct: the
/// former means the file is not usable at all, while the latter may simply
/// mean the wrong master key was supplied.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not a Crysms storage file")]
    BadMagic,
    #[error("Unsupported storage format version {0}")]
    UnsupportedVersion(u8),
    #[error("Storage file length {0} is not a whole number of chunks")]
    BadFileLength(u64),
    #[error("Entry failed authentication (wrong key or corrupted data)")]
    AuthenticationFailed,
    #[error("Index {0} out of range")]
    IndexOutOfRange(i64),
    #[error("Entry is not of the expected kind")]
    WrongKind,
    #[error("String too long for its field")]
    StringTooLong,
    #[error("String contains a NUL byte or is not valid UTF-8")]
    InvalidString,
    #[error("Data too long for its field")]
    DataTooLong,
    #[error("Message part index out of range")]
    PartOutOfRange,
    #[error("Record has been deleted")]
    Deleted,
    #[error("Storage file is structurally corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Argon2(#[from] argon2::Error),
    #[error(transparent)]
    ConfigSyntax(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error indicates the file cannot be read at all.
    pub fn is_format_error(&self) -> bool {
        matches!(
            *self,
            Error::BadMagic
                | Error::UnsupportedVersion(..)
                | Error::BadFileLength(..)
        )
    }

    /// Whether this error came from the caller breaking an API contract
    /// rather than from the file or the environment.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            *self,
            Error::IndexOutOfRange(..)
                | Error::WrongKind
                | Error::StringTooLong
                | Error::InvalidString
                | Error::DataTooLong
                | Error::PartOutOfRange
                | Error::Deleted
        )
    }
}
