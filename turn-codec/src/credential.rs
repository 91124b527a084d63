//! Long-term credential validation
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


use crate::attribute::Attribute;
use crate::error::{StunError, StunResult};
use crate::integrity::{long_term_key, IntegrityKey, IntegrityKind};
use crate::message::{StunMessage, HEADER_LEN};

/// Username, realm and password of one request
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub realm: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, realm: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            realm: realm.into(),
            password: password.into(),
        }
    }

    /// HMAC key for the given mechanism.
    ///
    /// SHA1 uses MD5(username:realm:password); SHA256 uses the password bytes.
    pub fn key(&self, kind: IntegrityKind) -> IntegrityKey {
        match kind {
            IntegrityKind::Sha1 => {
                IntegrityKey::Sha1(long_term_key(&self.username, &self.realm, &self.password))
            }
            IntegrityKind::Sha256 => IntegrityKey::Sha256(self.password.as_bytes().to_vec()),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Verify the integrity of a decoded request against `credential`.
///
/// MESSAGE-INTEGRITY-SHA256 is checked when present, MESSAGE-INTEGRITY
/// otherwise. Returns the mechanism that matched so the response can be
/// signed the same way. Does not touch any state.
pub fn validate(message: &StunMessage, credential: &Credential) -> StunResult<IntegrityKind> {
    if !message.has_integrity() {
        return Err(StunError::NotIntegrity);
    }

    if message.username().is_none() || message.realm().is_none() {
        return Err(StunError::InvalidInput);
    }

    check_integrity(message, credential)
}

/// Verify only the integrity attribute of a decoded message, without
/// requiring USERNAME and REALM. Clients use it on signed responses.
pub fn check_integrity(message: &StunMessage, credential: &Credential) -> StunResult<IntegrityKind> {
    let raw = match message.raw() {
        Some(raw) => raw,
        None => return Err(StunError::InvalidInput),
    };

    let (kind, offset, expected) = match (raw.integrity_sha256, raw.integrity) {
        (Some(offset), _) => {
            let expected = message.attributes.iter().find_map(|attr| match attr {
                Attribute::MessageIntegritySha256(mac) => Some(mac.as_slice()),
                _ => None,
            });
            (IntegrityKind::Sha256, offset, expected)
        }
        (None, Some(offset)) => {
            let expected = message.attributes.iter().find_map(|attr| match attr {
                Attribute::MessageIntegrity(mac) => Some(&mac[..]),
                _ => None,
            });
            (IntegrityKind::Sha1, offset, expected)
        }
        (None, None) => return Err(StunError::NotIntegrity),
    };
    let expected = expected.ok_or(StunError::NotIntegrity)?;

    // Covered bytes end before the attribute; the length field is patched
    // to end right after it.
    let bytes = &raw.bytes;
    let covered_len = offset + 4 + expected.len() - HEADER_LEN;
    let length = u16::try_from(covered_len).map_err(|_| StunError::InvalidInput)?;
    let length = length.to_be_bytes();

    credential
        .key(kind)
        .verify(&[&bytes[..2], &length[..], &bytes[4..offset]], expected)?;
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Class, Method};

    const TID: [u8; 12] = [7; 12];

    fn signed_request(credential: &Credential, kind: IntegrityKind) -> StunMessage {
        let bytes = StunMessage::new(Method::Allocate, Class::Request, TID)
            .with(Attribute::UserName(credential.username.clone()))
            .with(Attribute::Realm(credential.realm.clone()))
            .with(Attribute::Nonce("abcdef".into()))
            .encode(Some(&credential.key(kind)), true)
            .unwrap();
        StunMessage::decode(&bytes).unwrap()
    }

    #[test]
    fn test_validate_sha1() {
        let credential = Credential::new("alice", "example.org", "secret");
        let message = signed_request(&credential, IntegrityKind::Sha1);
        assert_eq!(validate(&message, &credential), Ok(IntegrityKind::Sha1));
    }

    #[test]
    fn test_validate_sha256() {
        let credential = Credential::new("alice", "example.org", "secret");
        let message = signed_request(&credential, IntegrityKind::Sha256);
        assert_eq!(validate(&message, &credential), Ok(IntegrityKind::Sha256));
    }

    #[test]
    fn test_wrong_password() {
        let credential = Credential::new("alice", "example.org", "secret");
        let message = signed_request(&credential, IntegrityKind::Sha1);
        let wrong = Credential::new("alice", "example.org", "guess");
        assert_eq!(validate(&message, &wrong), Err(StunError::IntegrityFailed));
    }

    #[test]
    fn test_missing_integrity() {
        let bytes = StunMessage::new(Method::Allocate, Class::Request, TID)
            .with(Attribute::UserName("alice".into()))
            .encode(None, false)
            .unwrap();
        let message = StunMessage::decode(&bytes).unwrap();
        let credential = Credential::new("alice", "example.org", "secret");
        assert_eq!(validate(&message, &credential), Err(StunError::NotIntegrity));
    }

    #[test]
    fn test_missing_realm() {
        let credential = Credential::new("alice", "example.org", "secret");
        let bytes = StunMessage::new(Method::Allocate, Class::Request, TID)
            .with(Attribute::UserName("alice".into()))
            .encode(Some(&credential.key(IntegrityKind::Sha1)), false)
            .unwrap();
        let message = StunMessage::decode(&bytes).unwrap();
        assert_eq!(validate(&message, &credential), Err(StunError::InvalidInput));
    }

    #[test]
    fn test_debug_hides_password() {
        let credential = Credential::new("alice", "example.org", "secret");
        assert!(!format!("{:?}", credential).contains("secret"));
    }
}
