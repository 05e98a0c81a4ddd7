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

//! The codec applied to every record of the storage file.
//!
//! A record's plaintext is always a whole number of AES blocks. It is encoded
//! as follows:
//!
//! - 32-byte HMAC-SHA256 of the plaintext
//! - 16-byte random IV
//! - AES-256-CBC encryption of the plaintext, without padding
//!
//! The MAC is computed over the plaintext, so decoding must decrypt first and
//! then verify. Nothing decrypted is ever handed out before the MAC matches.

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::symm::{Cipher, Crypter, Mode};
use rand::{rngs::OsRng, Rng};

use super::{
    master_key::MasterKey, AES_BLOCK, AES_KEY, ENCRYPTION_OVERHEAD,
    MAC_LENGTH,
};
use crate::support::error::Error;

/// Encrypts and authenticates individual records.
pub struct RecordCodec {
    aes_key: [u8; AES_KEY],
    mac_key: PKey<Private>,
}

impl RecordCodec {
    pub fn new(master: &MasterKey) -> Result<Self, Error> {
        Ok(RecordCodec {
            aes_key: master.aes_key(),
            mac_key: PKey::hmac(&master.mac_key())?,
        })
    }

    /// Encode `plaintext` into `dst`.
    ///
    /// `plaintext` must be block-aligned, and `dst` must be exactly
    /// `ENCRYPTION_OVERHEAD` bytes longer than it.
    pub fn encode(
        &self,
        plaintext: &[u8],
        dst: &mut [u8],
    ) -> Result<(), Error> {
        assert_eq!(0, plaintext.len() % AES_BLOCK);
        assert_eq!(plaintext.len() + ENCRYPTION_OVERHEAD, dst.len());

        let (mac, rest) = dst.split_at_mut(MAC_LENGTH);
        let (iv, body) = rest.split_at_mut(AES_BLOCK);

        mac.copy_from_slice(&self.mac(plaintext)?);
        OsRng.fill(&mut *iv);

        let mut crypter = Crypter::new(
            Cipher::aes_256_cbc(),
            Mode::Encrypt,
            &self.aes_key,
            Some(&*iv),
        )?;
        crypter.pad(false);
        // OpenSSL demands an extra block worth of scratch space.
        let mut ciphertext = vec![0u8; plaintext.len() + AES_BLOCK];
        let mut len = crypter.update(plaintext, &mut ciphertext)?;
        len += crypter.finalize(&mut ciphertext[len..])?;
        debug_assert_eq!(plaintext.len(), len);

        body.copy_from_slice(&ciphertext[..plaintext.len()]);
        Ok(())
    }

    /// Decode the record in `src`, returning its plaintext.
    ///
    /// Fails with `Error::AuthenticationFailed` if the MAC does not match,
    /// which happens both when the key is wrong and when the record was
    /// altered.
    pub fn decode(&self, src: &[u8]) -> Result<Vec<u8>, Error> {
        assert!(src.len() >= ENCRYPTION_OVERHEAD);
        assert_eq!(0, (src.len() - ENCRYPTION_OVERHEAD) % AES_BLOCK);

        let (mac, rest) = src.split_at(MAC_LENGTH);
        let (iv, body) = rest.split_at(AES_BLOCK);

        let mut crypter = Crypter::new(
            Cipher::aes_256_cbc(),
            Mode::Decrypt,
            &self.aes_key,
            Some(iv),
        )?;
        crypter.pad(false);
        let mut plaintext = vec![0u8; body.len() + AES_BLOCK];
        let mut len = crypter.update(body, &mut plaintext)?;
        len += crypter.finalize(&mut plaintext[len..])?;
        debug_assert_eq!(body.len(), len);
        plaintext.truncate(body.len());

        let expected = self.mac(&plaintext)?;
        if !openssl::memcmp::eq(&expected, mac) {
            return Err(Error::AuthenticationFailed);
        }

        Ok(plaintext)
    }

    fn mac(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.mac_key)?;
        signer.update(plaintext)?;
        let mac = signer.sign_to_vec()?;
        debug_assert_eq!(MAC_LENGTH, mac.len());
        Ok(mac)
    }
}
