//! Transport address encoding and XOR obfuscation
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
use bytes::{BufMut, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// STUN magic cookie (RFC 8489 Section 5)
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// Address family tag carried in address attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Family of an IP address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Wire value (0x01 / 0x02)
    pub fn code(self) -> u8 {
        match self {
            IpFamily::V4 => 0x01,
            IpFamily::V6 => 0x02,
        }
    }
}

impl TryFrom<u8> for IpFamily {
    type Error = StunError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(IpFamily::V4),
            0x02 => Ok(IpFamily::V6),
            _ => Err(StunError::UnsupportedIpFamily),
        }
    }
}

/// XOR a transport address against the magic cookie and transaction ID.
///
/// The port is XORed with the top 16 bits of the cookie. An IPv4 address is
/// XORed with the cookie, an IPv6 address with cookie followed by the
/// transaction ID. The operation is its own inverse.
pub fn xor_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> SocketAddr {
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let ip = match addr.ip() {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            let cookie = MAGIC_COOKIE.to_be_bytes();
            for (octet, mask) in octets.iter_mut().zip(cookie.iter()) {
                *octet ^= mask;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            let mask = xor_mask(transaction_id);
            for (octet, mask) in octets.iter_mut().zip(mask.iter()) {
                *octet ^= mask;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    SocketAddr::new(ip, port)
}

/// Reveal an obfuscated transport address (same as [`xor_address`]).
pub fn unxor_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> SocketAddr {
    xor_address(addr, transaction_id)
}

fn xor_mask(transaction_id: &[u8; 12]) -> [u8; 16] {
    let mut mask = [0u8; 16];
    mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    mask[4..].copy_from_slice(transaction_id);
    mask
}

/// Serialize an address attribute value.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |0 0 0 0 0 0 0 0|    Family     |           Port                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Address (32 bits or 128 bits)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn encode_address(addr: SocketAddr, transaction_id: Option<&[u8; 12]>, buf: &mut BytesMut) {
    let addr = match transaction_id {
        Some(tid) => xor_address(addr, tid),
        None => addr,
    };

    buf.put_u8(0);
    buf.put_u8(IpFamily::of(&addr.ip()).code());
    buf.put_u16(addr.port());
    match addr.ip() {
        IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
        IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
    }
}

/// Parse an address attribute value, reversing the XOR when a transaction
/// ID is supplied.
pub fn decode_address(value: &[u8], transaction_id: Option<&[u8; 12]>) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidInput);
    }

    let family = IpFamily::try_from(value[1])?;
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = match family {
        IpFamily::V4 => {
            let octets: [u8; 4] = value[4..]
                .try_into()
                .map_err(|_| StunError::InvalidInput)?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpFamily::V6 => {
            let octets: [u8; 16] = value[4..]
                .try_into()
                .map_err(|_| StunError::InvalidInput)?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    let addr = SocketAddr::new(ip, port);
    Ok(match transaction_id {
        Some(tid) => xor_address(addr, tid),
        None => addr,
    })
}
