//! Typed STUN/TURN attributes
//!
//! Every attribute travels as a TLV (type, length, value) padded to a 4-byte
//! boundary. [`Attribute`] is the typed view over that raw TLV; attributes the
//! codec does not understand are kept verbatim as [`Attribute::Other`].
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


use crate::address::{decode_address, encode_address, IpFamily};
use crate::error::StunError;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// Attribute type codes
pub mod kind {
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ERROR_CODE: u16 = 0x0009;
    pub const UNKNOWN_ATTRIBUTES: u16 = 0x000A;
    pub const CHANNEL_NUMBER: u16 = 0x000C;
    pub const LIFETIME: u16 = 0x000D;
    pub const XOR_PEER_ADDRESS: u16 = 0x0012;
    pub const DATA: u16 = 0x0013;
    pub const REALM: u16 = 0x0014;
    pub const NONCE: u16 = 0x0015;
    pub const XOR_RELAYED_ADDRESS: u16 = 0x0016;
    pub const REQUESTED_ADDRESS_FAMILY: u16 = 0x0017;
    pub const REQUESTED_TRANSPORT: u16 = 0x0019;
    pub const MESSAGE_INTEGRITY_SHA256: u16 = 0x001C;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const SOFTWARE: u16 = 0x8022;
    pub const FINGERPRINT: u16 = 0x8028;
    pub const RESPONSE_ORIGIN: u16 = 0x802B;
}

/// Comprehension-required attributes live below 0x8000 (RFC 8489 Section 14)
pub fn is_comprehension_required(kind: u16) -> bool {
    kind < 0x8000
}

const MAX_USERNAME_LEN: usize = 513;
const MAX_TEXT_LEN: usize = 763;

/// REQUESTED-TRANSPORT protocol number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
    Other(u8),
}

impl Transport {
    /// IANA protocol number
    pub fn protocol(self) -> u8 {
        match self {
            Transport::Udp => 17,
            Transport::Tcp => 6,
            Transport::Other(p) => p,
        }
    }
}

impl From<u8> for Transport {
    fn from(protocol: u8) -> Self {
        match protocol {
            17 => Transport::Udp,
            6 => Transport::Tcp,
            other => Transport::Other(other),
        }
    }
}

/// ERROR-CODE value: numeric code (300-699) and reason phrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: u16,
    pub reason: String,
}

impl ErrorCode {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        ErrorCode {
            code,
            reason: reason.into(),
        }
    }
}

/// Typed attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    MappedAddress(SocketAddr),
    XorMappedAddress(SocketAddr),
    XorPeerAddress(SocketAddr),
    XorRelayedAddress(SocketAddr),
    ResponseOrigin(SocketAddr),
    UserName(String),
    Realm(String),
    Nonce(String),
    Software(String),
    MessageIntegrity([u8; 20]),
    /// Full or truncated (16 to 32 bytes) HMAC-SHA256
    MessageIntegritySha256(Vec<u8>),
    Fingerprint(u32),
    ErrorCode(ErrorCode),
    UnknownAttributes(Vec<u16>),
    ChannelNumber(u16),
    Lifetime(u32),
    Data(Bytes),
    RequestedTransport(Transport),
    RequestedAddressFamily(IpFamily),
    /// Attribute kept as raw bytes
    Other { kind: u16, value: Bytes },
}

impl Attribute {
    /// Attribute type code
    pub fn kind(&self) -> u16 {
        match self {
            Attribute::MappedAddress(_) => kind::MAPPED_ADDRESS,
            Attribute::XorMappedAddress(_) => kind::XOR_MAPPED_ADDRESS,
            Attribute::XorPeerAddress(_) => kind::XOR_PEER_ADDRESS,
            Attribute::XorRelayedAddress(_) => kind::XOR_RELAYED_ADDRESS,
            Attribute::ResponseOrigin(_) => kind::RESPONSE_ORIGIN,
            Attribute::UserName(_) => kind::USERNAME,
            Attribute::Realm(_) => kind::REALM,
            Attribute::Nonce(_) => kind::NONCE,
            Attribute::Software(_) => kind::SOFTWARE,
            Attribute::MessageIntegrity(_) => kind::MESSAGE_INTEGRITY,
            Attribute::MessageIntegritySha256(_) => kind::MESSAGE_INTEGRITY_SHA256,
            Attribute::Fingerprint(_) => kind::FINGERPRINT,
            Attribute::ErrorCode(_) => kind::ERROR_CODE,
            Attribute::UnknownAttributes(_) => kind::UNKNOWN_ATTRIBUTES,
            Attribute::ChannelNumber(_) => kind::CHANNEL_NUMBER,
            Attribute::Lifetime(_) => kind::LIFETIME,
            Attribute::Data(_) => kind::DATA,
            Attribute::RequestedTransport(_) => kind::REQUESTED_TRANSPORT,
            Attribute::RequestedAddressFamily(_) => kind::REQUESTED_ADDRESS_FAMILY,
            Attribute::Other { kind, .. } => *kind,
        }
    }

    /// Write the attribute value (without TLV header or padding).
    pub(crate) fn encode_value(&self, transaction_id: &[u8; 12], buf: &mut BytesMut) {
        match self {
            Attribute::MappedAddress(addr) | Attribute::ResponseOrigin(addr) => {
                encode_address(*addr, None, buf)
            }
            Attribute::XorMappedAddress(addr)
            | Attribute::XorPeerAddress(addr)
            | Attribute::XorRelayedAddress(addr) => encode_address(*addr, Some(transaction_id), buf),
            Attribute::UserName(text)
            | Attribute::Realm(text)
            | Attribute::Nonce(text)
            | Attribute::Software(text) => buf.put_slice(text.as_bytes()),
            Attribute::MessageIntegrity(mac) => buf.put_slice(mac),
            Attribute::MessageIntegritySha256(mac) => buf.put_slice(mac),
            Attribute::Fingerprint(crc) => buf.put_u32(*crc),
            Attribute::ErrorCode(error) => {
                buf.put_u16(0);
                buf.put_u8((error.code / 100) as u8);
                buf.put_u8((error.code % 100) as u8);
                buf.put_slice(error.reason.as_bytes());
            }
            Attribute::UnknownAttributes(kinds) => {
                for kind in kinds {
                    buf.put_u16(*kind);
                }
            }
            Attribute::ChannelNumber(number) => {
                buf.put_u16(*number);
                buf.put_u16(0);
            }
            Attribute::Lifetime(seconds) => buf.put_u32(*seconds),
            Attribute::Data(data) => buf.put_slice(data),
            Attribute::RequestedTransport(transport) => {
                buf.put_u8(transport.protocol());
                buf.put_slice(&[0, 0, 0]);
            }
            Attribute::RequestedAddressFamily(family) => {
                buf.put_u8(family.code());
                buf.put_slice(&[0, 0, 0]);
            }
            Attribute::Other { value, .. } => buf.put_slice(value),
        }
    }

    /// Parse an attribute value of the given type.
    pub(crate) fn decode(kind: u16, value: &[u8], transaction_id: &[u8; 12]) -> Result<Self, StunError> {
        Ok(match kind {
            kind::MAPPED_ADDRESS => Attribute::MappedAddress(decode_address(value, None)?),
            kind::RESPONSE_ORIGIN => Attribute::ResponseOrigin(decode_address(value, None)?),
            kind::XOR_MAPPED_ADDRESS => {
                Attribute::XorMappedAddress(decode_address(value, Some(transaction_id))?)
            }
            kind::XOR_PEER_ADDRESS => {
                Attribute::XorPeerAddress(decode_address(value, Some(transaction_id))?)
            }
            kind::XOR_RELAYED_ADDRESS => {
                Attribute::XorRelayedAddress(decode_address(value, Some(transaction_id))?)
            }
            kind::USERNAME => Attribute::UserName(decode_text(value, MAX_USERNAME_LEN)?),
            kind::REALM => Attribute::Realm(decode_text(value, MAX_TEXT_LEN)?),
            kind::NONCE => Attribute::Nonce(decode_text(value, MAX_TEXT_LEN)?),
            kind::SOFTWARE => Attribute::Software(decode_text(value, MAX_TEXT_LEN)?),
            kind::MESSAGE_INTEGRITY => Attribute::MessageIntegrity(
                value.try_into().map_err(|_| StunError::InvalidInput)?,
            ),
            kind::MESSAGE_INTEGRITY_SHA256 => {
                if value.len() < 16 || value.len() > 32 || value.len() % 4 != 0 {
                    return Err(StunError::InvalidInput);
                }
                Attribute::MessageIntegritySha256(value.to_vec())
            }
            kind::FINGERPRINT => Attribute::Fingerprint(read_u32(value)?),
            kind::ERROR_CODE => {
                if value.len() < 4 {
                    return Err(StunError::InvalidInput);
                }
                let class = (value[2] & 0x07) as u16;
                let number = value[3] as u16;
                if !(3..=6).contains(&class) || number > 99 {
                    return Err(StunError::InvalidInput);
                }
                Attribute::ErrorCode(ErrorCode {
                    code: class * 100 + number,
                    reason: decode_text(&value[4..], MAX_TEXT_LEN)?,
                })
            }
            kind::UNKNOWN_ATTRIBUTES => {
                if value.len() % 2 != 0 {
                    return Err(StunError::InvalidInput);
                }
                Attribute::UnknownAttributes(
                    value
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect(),
                )
            }
            kind::CHANNEL_NUMBER => {
                if value.len() != 4 {
                    return Err(StunError::InvalidInput);
                }
                Attribute::ChannelNumber(u16::from_be_bytes([value[0], value[1]]))
            }
            kind::LIFETIME => Attribute::Lifetime(read_u32(value)?),
            kind::DATA => Attribute::Data(Bytes::copy_from_slice(value)),
            kind::REQUESTED_TRANSPORT => {
                if value.len() != 4 {
                    return Err(StunError::InvalidInput);
                }
                Attribute::RequestedTransport(Transport::from(value[0]))
            }
            kind::REQUESTED_ADDRESS_FAMILY => {
                if value.len() != 4 {
                    return Err(StunError::InvalidInput);
                }
                Attribute::RequestedAddressFamily(IpFamily::try_from(value[0])?)
            }
            other => Attribute::Other {
                kind: other,
                value: Bytes::copy_from_slice(value),
            },
        })
    }
}

fn decode_text(value: &[u8], max_len: usize) -> Result<String, StunError> {
    if value.len() > max_len {
        return Err(StunError::InvalidInput);
    }
    Ok(std::str::from_utf8(value)?.to_string())
}

fn read_u32(value: &[u8]) -> Result<u32, StunError> {
    let bytes: [u8; 4] = value.try_into().map_err(|_| StunError::InvalidInput)?;
    Ok(u32::from_be_bytes(bytes))
}
