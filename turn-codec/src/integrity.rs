//! MESSAGE-INTEGRITY, MESSAGE-INTEGRITY-SHA256 and FINGERPRINT primitives
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::StunError;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Value XORed into the CRC-32 of a FINGERPRINT attribute
pub const FINGERPRINT_XOR: u32 = 0x5354_554e;

/// Which integrity attribute protects a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityKind {
    /// MESSAGE-INTEGRITY, HMAC-SHA1
    Sha1,
    /// MESSAGE-INTEGRITY-SHA256, HMAC-SHA256
    Sha256,
}

/// HMAC key together with the integrity mechanism it is used for
#[derive(Clone, PartialEq, Eq)]
pub enum IntegrityKey {
    Sha1(Vec<u8>),
    Sha256(Vec<u8>),
}

impl IntegrityKey {
    pub fn kind(&self) -> IntegrityKind {
        match self {
            IntegrityKey::Sha1(_) => IntegrityKind::Sha1,
            IntegrityKey::Sha256(_) => IntegrityKind::Sha256,
        }
    }

    /// Length of the attribute value this key produces
    pub fn mac_len(&self) -> usize {
        match self {
            IntegrityKey::Sha1(_) => 20,
            IntegrityKey::Sha256(_) => 32,
        }
    }

    /// Compute the HMAC over the concatenation of `parts`.
    pub fn sign(&self, parts: &[&[u8]]) -> Result<Vec<u8>, StunError> {
        match self {
            IntegrityKey::Sha1(key) => {
                let mut mac = HmacSha1::new_from_slice(key).map_err(|_| StunError::ShaFailed)?;
                for part in parts {
                    mac.update(part);
                }
                Ok(mac.finalize().into_bytes().to_vec())
            }
            IntegrityKey::Sha256(key) => {
                let mut mac = HmacSha256::new_from_slice(key).map_err(|_| StunError::ShaFailed)?;
                for part in parts {
                    mac.update(part);
                }
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Constant-time check of `expected` against the HMAC over `parts`.
    ///
    /// A SHA256 value may be truncated to its leftmost 16..32 bytes.
    pub fn verify(&self, parts: &[&[u8]], expected: &[u8]) -> Result<(), StunError> {
        match self {
            IntegrityKey::Sha1(key) => {
                let mut mac = HmacSha1::new_from_slice(key).map_err(|_| StunError::ShaFailed)?;
                for part in parts {
                    mac.update(part);
                }
                mac.verify_slice(expected)
                    .map_err(|_| StunError::IntegrityFailed)
            }
            IntegrityKey::Sha256(key) => {
                if expected.len() < 16 {
                    return Err(StunError::IntegrityFailed);
                }
                let mut mac = HmacSha256::new_from_slice(key).map_err(|_| StunError::ShaFailed)?;
                for part in parts {
                    mac.update(part);
                }
                mac.verify_truncated_left(expected)
                    .map_err(|_| StunError::IntegrityFailed)
            }
        }
    }
}

impl std::fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_tuple("IntegrityKey").field(&self.kind()).finish()
    }
}

/// Long-term credential key: MD5(username ":" realm ":" password)
pub fn long_term_key(username: &str, realm: &str, password: &str) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(realm.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

/// FINGERPRINT value over the concatenation of `parts`
pub fn fingerprint(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize() ^ FINGERPRINT_XOR
}
