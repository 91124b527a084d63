//! STUN message encoding and decoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0|     STUN Message Type     |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Magic Cookie                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Transaction ID (96 bits)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
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


use crate::address::{IpFamily, MAGIC_COOKIE};
use crate::attribute::{is_comprehension_required, kind, Attribute, ErrorCode, Transport};
use crate::channel::ChannelData;
use crate::error::{StunError, StunResult};
use crate::integrity::{fingerprint, IntegrityKey};
use crate::method::{message_type, split_message_type, Class, Method};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// Size of the fixed STUN header
pub const HEADER_LEN: usize = 20;

/// Decoded STUN message
#[derive(Debug, Clone)]
pub struct StunMessage {
    pub method: Method,
    pub class: Class,
    pub transaction_id: [u8; 12],
    /// Attributes in wire order
    pub attributes: Vec<Attribute>,
    raw: Option<RawMessage>,
}

/// Wire bytes of a decoded message and where its integrity attributes start
#[derive(Debug, Clone)]
pub(crate) struct RawMessage {
    pub bytes: Bytes,
    pub integrity: Option<usize>,
    pub integrity_sha256: Option<usize>,
}

impl PartialEq for StunMessage {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.class == other.class
            && self.transaction_id == other.transaction_id
            && self.attributes == other.attributes
    }
}

impl Eq for StunMessage {}

/// Anything that can arrive on a TURN listening socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Message(StunMessage),
    ChannelData(ChannelData),
}

/// Decode a datagram, telling STUN framing (top bits `00`) from ChannelData
/// framing (top bits `01`).
pub fn decode(bytes: &[u8]) -> StunResult<Payload> {
    if bytes.len() < 4 {
        return Err(StunError::InvalidInput);
    }

    match bytes[0] >> 6 {
        0b00 => StunMessage::decode(bytes).map(Payload::Message),
        0b01 => ChannelData::decode(bytes).map(Payload::ChannelData),
        _ => Err(StunError::InvalidInput),
    }
}

/// Class of a STUN-framed datagram from its first two bytes, without
/// parsing the rest. `None` for ChannelData or anything shorter.
pub fn peek_class(bytes: &[u8]) -> Option<Class> {
    if bytes.len() < 2 || bytes[0] >> 6 != 0b00 {
        return None;
    }
    let value = u16::from_be_bytes([bytes[0], bytes[1]]);
    Some(Class::from_bits(((value >> 4) & 0b01) | ((value >> 7) & 0b10)))
}

impl StunMessage {
    pub fn new(method: Method, class: Class, transaction_id: [u8; 12]) -> Self {
        Self {
            method,
            class,
            transaction_id,
            attributes: Vec::new(),
            raw: None,
        }
    }

    /// Empty response of the given class echoing this message's method and
    /// transaction ID.
    pub fn reply(&self, class: Class) -> Self {
        Self::new(self.method, class, self.transaction_id)
    }

    pub fn push(&mut self, attribute: Attribute) -> &mut Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// First attribute of the given type
    pub fn get(&self, kind: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.kind() == kind)
    }

    /// All attributes of the given type, in wire order
    pub fn get_all(&self, kind: u16) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(move |attr| attr.kind() == kind)
    }

    pub fn username(&self) -> Option<&str> {
        match self.get(kind::USERNAME) {
            Some(Attribute::UserName(name)) => Some(name),
            _ => None,
        }
    }

    pub fn realm(&self) -> Option<&str> {
        match self.get(kind::REALM) {
            Some(Attribute::Realm(realm)) => Some(realm),
            _ => None,
        }
    }

    pub fn nonce(&self) -> Option<&str> {
        match self.get(kind::NONCE) {
            Some(Attribute::Nonce(nonce)) => Some(nonce),
            _ => None,
        }
    }

    pub fn lifetime(&self) -> Option<u32> {
        match self.get(kind::LIFETIME) {
            Some(Attribute::Lifetime(seconds)) => Some(*seconds),
            _ => None,
        }
    }

    pub fn channel_number(&self) -> Option<u16> {
        match self.get(kind::CHANNEL_NUMBER) {
            Some(Attribute::ChannelNumber(number)) => Some(*number),
            _ => None,
        }
    }

    pub fn requested_transport(&self) -> Option<Transport> {
        match self.get(kind::REQUESTED_TRANSPORT) {
            Some(Attribute::RequestedTransport(transport)) => Some(*transport),
            _ => None,
        }
    }

    pub fn requested_family(&self) -> Option<IpFamily> {
        match self.get(kind::REQUESTED_ADDRESS_FAMILY) {
            Some(Attribute::RequestedAddressFamily(family)) => Some(*family),
            _ => None,
        }
    }

    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        match self.get(kind::XOR_MAPPED_ADDRESS) {
            Some(Attribute::XorMappedAddress(addr)) => Some(*addr),
            _ => None,
        }
    }

    pub fn xor_relayed_address(&self) -> Option<SocketAddr> {
        match self.get(kind::XOR_RELAYED_ADDRESS) {
            Some(Attribute::XorRelayedAddress(addr)) => Some(*addr),
            _ => None,
        }
    }

    /// Every XOR-PEER-ADDRESS, in wire order
    pub fn peer_addresses(&self) -> Vec<SocketAddr> {
        self.get_all(kind::XOR_PEER_ADDRESS)
            .filter_map(|attr| match attr {
                Attribute::XorPeerAddress(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self.get(kind::DATA) {
            Some(Attribute::Data(data)) => Some(data),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&ErrorCode> {
        match self.get(kind::ERROR_CODE) {
            Some(Attribute::ErrorCode(error)) => Some(error),
            _ => None,
        }
    }

    /// Whether MESSAGE-INTEGRITY or MESSAGE-INTEGRITY-SHA256 is present
    pub fn has_integrity(&self) -> bool {
        self.attributes.iter().any(|attr| {
            matches!(
                attr,
                Attribute::MessageIntegrity(_) | Attribute::MessageIntegritySha256(_)
            )
        })
    }

    /// Comprehension-required attribute types this codec does not understand
    pub fn unknown_required(&self) -> Vec<u16> {
        self.attributes
            .iter()
            .filter_map(|attr| match attr {
                Attribute::Other { kind, .. } if is_comprehension_required(*kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Wire bytes the message was decoded from
    pub fn raw_bytes(&self) -> Option<&Bytes> {
        self.raw.as_ref().map(|raw| &raw.bytes)
    }

    pub(crate) fn raw(&self) -> Option<&RawMessage> {
        self.raw.as_ref()
    }

    /// Serialize the message.
    ///
    /// Attributes are written in order. Integrity and fingerprint attributes
    /// in the list are skipped; when `integrity` is given the matching
    /// MESSAGE-INTEGRITY(-SHA256) is computed and appended, then FINGERPRINT
    /// when `with_fingerprint` is set.
    pub fn encode(&self, integrity: Option<&IntegrityKey>, with_fingerprint: bool) -> StunResult<Bytes> {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_u16(message_type(self.method, self.class));
        buf.put_u16(0);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.transaction_id);

        for attribute in &self.attributes {
            if matches!(
                attribute,
                Attribute::MessageIntegrity(_)
                    | Attribute::MessageIntegritySha256(_)
                    | Attribute::Fingerprint(_)
            ) {
                continue;
            }
            write_attribute(attribute, &self.transaction_id, &mut buf)?;
        }

        if let Some(key) = integrity {
            let mac_len = key.mac_len();
            let total = buf.len() + 4 + mac_len;
            set_length(&mut buf, total)?;
            let mac = key.sign(&[&buf[..]])?;
            let attr_kind = match key {
                IntegrityKey::Sha1(_) => kind::MESSAGE_INTEGRITY,
                IntegrityKey::Sha256(_) => kind::MESSAGE_INTEGRITY_SHA256,
            };
            buf.put_u16(attr_kind);
            buf.put_u16(mac_len as u16);
            buf.put_slice(&mac);
        }

        if with_fingerprint {
            let total = buf.len() + 8;
            set_length(&mut buf, total)?;
            let crc = fingerprint(&[&buf[..]]);
            buf.put_u16(kind::FINGERPRINT);
            buf.put_u16(4);
            buf.put_u32(crc);
        }

        let total = buf.len();
        set_length(&mut buf, total)?;
        Ok(buf.freeze())
    }

    /// Decode a STUN message.
    ///
    /// The buffer must hold exactly one message. Attributes following
    /// MESSAGE-INTEGRITY are ignored except MESSAGE-INTEGRITY-SHA256 and
    /// FINGERPRINT; anything following FINGERPRINT is ignored. A present
    /// FINGERPRINT must match.
    pub fn decode(bytes: &[u8]) -> StunResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(StunError::InvalidInput);
        }

        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if length % 4 != 0 || bytes.len() != HEADER_LEN + length {
            return Err(StunError::InvalidInput);
        }

        let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(StunError::NotCookie);
        }

        let (method, class) = split_message_type(u16::from_be_bytes([bytes[0], bytes[1]]))?;
        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..HEADER_LEN]);

        let mut attributes = Vec::new();
        let mut integrity = None;
        let mut integrity_sha256 = None;
        let mut offset = HEADER_LEN;

        while offset < bytes.len() {
            if bytes.len() - offset < 4 {
                return Err(StunError::InvalidInput);
            }
            let attr_kind = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let value_len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            let value_start = offset + 4;
            let value_end = value_start + value_len;
            let next = value_start + padded(value_len);
            if next > bytes.len() {
                return Err(StunError::InvalidInput);
            }

            let protected = integrity.is_some() || integrity_sha256.is_some();
            let accept = match attr_kind {
                kind::MESSAGE_INTEGRITY => !protected,
                kind::MESSAGE_INTEGRITY_SHA256 => integrity_sha256.is_none(),
                kind::FINGERPRINT => true,
                _ => !protected,
            };

            if accept {
                let attribute =
                    Attribute::decode(attr_kind, &bytes[value_start..value_end], &transaction_id)?;
                match &attribute {
                    Attribute::MessageIntegrity(_) => integrity = Some(offset),
                    Attribute::MessageIntegritySha256(_) => integrity_sha256 = Some(offset),
                    Attribute::Fingerprint(crc) => {
                        let patched = ((offset + 8 - HEADER_LEN) as u16).to_be_bytes();
                        let expected = fingerprint(&[&bytes[..2], &patched[..], &bytes[4..offset]]);
                        if *crc != expected {
                            return Err(StunError::InvalidInput);
                        }
                        attributes.push(attribute);
                        break;
                    }
                    _ => {}
                }
                attributes.push(attribute);
            }

            offset = next;
        }

        Ok(Self {
            method,
            class,
            transaction_id,
            attributes,
            raw: Some(RawMessage {
                bytes: Bytes::copy_from_slice(bytes),
                integrity,
                integrity_sha256,
            }),
        })
    }
}

pub(crate) fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn write_attribute(attribute: &Attribute, transaction_id: &[u8; 12], buf: &mut BytesMut) -> StunResult<()> {
    let start = buf.len();
    buf.put_u16(attribute.kind());
    buf.put_u16(0);
    attribute.encode_value(transaction_id, buf);

    let value_len = buf.len() - start - 4;
    let value_len = u16::try_from(value_len).map_err(|_| StunError::InvalidInput)?;
    buf[start + 2..start + 4].copy_from_slice(&value_len.to_be_bytes());
    buf.put_bytes(0, padded(value_len as usize) - value_len as usize);
    Ok(())
}

/// Patch the header length so the message ends at `total` bytes.
fn set_length(buf: &mut BytesMut, total: usize) -> StunResult<()> {
    let length = u16::try_from(total - HEADER_LEN).map_err(|_| StunError::InvalidInput)?;
    buf[2..4].copy_from_slice(&length.to_be_bytes());
    Ok(())
}
