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

//! Code for working with master keys.
//!
//! Each storage file is encrypted under a single, unalterable master key
//! which is generated when the file is created. The master key is derived
//! from the user's password in a way that allows the password to be changed
//! at any time without re-encrypting the file.
//!
//! To derive the master key, the password is first hashed with a standard
//! salted password hashing algorithm (see `Algorithm`). That raw hash is then
//! hashed again with two different suffixes to produce the final password hash
//! and the "derived key".
//!
//! The final password hash is stored in the configuration, and makes it easy
//! to determine whether the input password is correct before the storage file
//! is ever touched.
//!
//! The "derived key" is XORed with another byte array, the "master key XOR",
//! also stored in the configuration, to derive the master key.
//!
//! Two secondary keys are derived from the master key:
//!
//! - AES key = `KMAC256(master_key, "record", 32, "aes")`, used to encrypt
//! every chunk of the storage file.
//!
//! - MAC key = `KMAC256(master_key, "record", 32, "mac")`, used to
//! authenticate every chunk of the storage file.

use rand::{rngs::OsRng, Rng};
use secstr::SecBox;
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Kmac};

use super::{AES_KEY, MAC_LENGTH};

const MASTER_SIZE: usize = 32;

/// How the password in a storage configuration is stretched.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum Algorithm {
    /// Argon2i 1.3: 4MB of memory, 10 passes, 1 lane, 32-byte output, no
    /// secret or associated data.
    ///
    /// The stretched password is split with KMAC256 keyed on the salt:
    /// customisation `"check"` yields the stored password check,
    /// `"master"` the key which unwraps the master key.
    Argon2i_V13_M4096_T10_L1_Kmac256,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Argon2i_V13_M4096_T10_L1_Kmac256
    }
}

/// The `[key]` section of a storage configuration.
///
/// Together with the password this recovers the master key of the storage
/// file. Without the password it reveals nothing about the key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MasterKeyConfig {
    /// Lets a wrong password be rejected before the storage file is opened.
    #[serde(with = "b64")]
    password_hash: Vec<u8>,
    #[serde(with = "b64")]
    salt: Vec<u8>,
    algorithm: Algorithm,
    /// The master key, XORed with the unwrapping key from the password.
    #[serde(with = "b64")]
    master_key_xor: Vec<u8>,
}

/// The master key of one storage file.
///
/// The key lives in page-locked memory where the platform allows it, so it
/// is not cheap to create.
pub struct MasterKey {
    master_key: SecBox<[u8; MASTER_SIZE]>,
}

impl MasterKey {
    /// Generate a fresh key for a new storage file.
    pub fn new() -> Self {
        // Fill in place so the key never exists outside the locked buffer
        let mut key = SecBox::new(Box::new([0u8; MASTER_SIZE]));
        OsRng.fill(&mut key.unsecure_mut()[..]);
        MasterKey { master_key: key }
    }

    /// The AES-256 key for chunk encryption.
    pub fn aes_key(&self) -> [u8; AES_KEY] {
        self.derive(b"aes")
    }

    /// The HMAC-SHA256 key for chunk authentication.
    pub fn mac_key(&self) -> [u8; MAC_LENGTH] {
        self.derive(b"mac")
    }

    fn derive(&self, custom: &[u8]) -> [u8; 32] {
        let mut kmac = Kmac::v256(self.master_key.unsecure(), custom);
        kmac.update(b"record");

        let mut key = [0u8; 32];
        kmac.finalize(&mut key);
        key
    }

    /// Wrap this key under `password`, producing the `[key]` section of a
    /// storage configuration.
    ///
    /// Every call picks a new salt, so wrapping the same key under the same
    /// password twice gives different results.
    pub fn make_config(
        &self,
        password: &[u8],
    ) -> Result<MasterKeyConfig, argon2::Error> {
        let salt: [u8; 32] = OsRng.gen();
        let algorithm = Algorithm::default();
        let hashes = PasswordHashes::new(password, &salt, algorithm)?;

        Ok(MasterKeyConfig {
            password_hash: hashes.check.to_vec(),
            salt: salt.to_vec(),
            algorithm,
            master_key_xor: xor(
                self.master_key.unsecure(),
                &hashes.wrapping_key,
            ),
        })
    }

    /// Unwrap the master key from `conf` using `password`.
    ///
    /// Returns `None` if the password is wrong or `conf` is malformed.
    pub fn from_config(
        conf: &MasterKeyConfig,
        password: &[u8],
    ) -> Option<Self> {
        let hashes =
            PasswordHashes::new(password, &conf.salt, conf.algorithm).ok()?;

        if hashes.check.len() != conf.password_hash.len()
            || !openssl::memcmp::eq(&hashes.check, &conf.password_hash)
            || MASTER_SIZE != conf.master_key_xor.len()
        {
            return None;
        }

        let mut key = SecBox::new(Box::new([0u8; MASTER_SIZE]));
        for ((dst, wrapped), wrapping) in key
            .unsecure_mut()
            .iter_mut()
            .zip(&conf.master_key_xor)
            .zip(&hashes.wrapping_key)
        {
            *dst = wrapped ^ wrapping;
        }

        Some(MasterKey { master_key: key })
    }
}

impl Default for MasterKey {
    fn default() -> Self {
        Self::new()
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

/// The two values obtained from stretching a password.
struct PasswordHashes {
    /// Stored in the configuration to recognise the right password.
    check: [u8; 32],
    /// Never stored; XORed with the master key.
    wrapping_key: [u8; 32],
}

impl PasswordHashes {
    fn new(
        password: &[u8],
        salt: &[u8],
        algorithm: Algorithm,
    ) -> Result<Self, argon2::Error> {
        let stretched = match algorithm {
            Algorithm::Argon2i_V13_M4096_T10_L1_Kmac256 => argon2::hash_raw(
                password,
                salt,
                &argon2::Config {
                    hash_length: 32,
                    lanes: 1,
                    mem_cost: 4096,
                    thread_mode: argon2::ThreadMode::Sequential,
                    time_cost: 10,
                    variant: argon2::Variant::Argon2i,
                    version: argon2::Version::Version13,
                    ..argon2::Config::default()
                },
            )?,
        };

        let split = |custom: &[u8]| {
            let mut kmac = Kmac::v256(salt, custom);
            kmac.update(&stretched);
            let mut out = [0u8; 32];
            kmac.finalize(&mut out);
            out
        };

        Ok(PasswordHashes {
            check: split(b"check"),
            wrapping_key: split(b"master"),
        })
    }
}

mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Vec<u8>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'a, D: Deserializer<'a>>(
        de: D,
    ) -> Result<Vec<u8>, D::Error> {
        use serde::de::Error;
        String::deserialize(de).and_then(|s| {
            base64::decode(&s).map_err(|err| Error::custom(err.to_string()))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rederive_master_key() {
        let orig = MasterKey::new();
        let config = orig.make_config(b"hunter2").unwrap();
        let derived = MasterKey::from_config(&config, b"hunter2").unwrap();
        assert_eq!(orig.master_key, derived.master_key);
        assert_eq!(orig.aes_key(), derived.aes_key());
        assert_eq!(orig.mac_key(), derived.mac_key());
    }

    #[test]
    fn derive_fails_for_bad_password() {
        let config = MasterKey::new().make_config(b"hunter2").unwrap();
        assert!(MasterKey::from_config(&config, b"hunter3").is_none());
    }

    #[test]
    fn secondary_keys_are_distinct() {
        let key = MasterKey::new();
        assert_ne!(key.aes_key(), key.mac_key());
        assert_ne!(key.aes_key(), MasterKey::new().aes_key());
    }

    #[test]
    fn config_survives_toml() {
        let key = MasterKey::new();
        let config = key.make_config(b"hunter2").unwrap();
        let text = toml::to_string(&config).unwrap();
        let reread: MasterKeyConfig = toml::from_str(&text).unwrap();
        let derived = MasterKey::from_config(&reread, b"hunter2").unwrap();
        assert_eq!(key.aes_key(), derived.aes_key());
    }
}
