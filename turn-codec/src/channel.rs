//! TURN ChannelData framing (RFC 8656 Section 12.4)
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


use crate::error::{StunError, StunResult};
use crate::message::padded;
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::RangeInclusive;

/// Channel numbers a client may bind
pub const CHANNEL_RANGE: RangeInclusive<u16> = 0x4000..=0x7FFE;

/// Relayed payload prefixed with a 4-byte channel header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub number: u16,
    pub data: Bytes,
}

impl ChannelData {
    pub fn new(number: u16, data: impl Into<Bytes>) -> Self {
        Self {
            number,
            data: data.into(),
        }
    }

    /// Frame with payload padded to a 4-byte boundary.
    pub fn encode(&self) -> StunResult<Bytes> {
        let len = u16::try_from(self.data.len()).map_err(|_| StunError::InvalidInput)?;
        let mut buf = BytesMut::with_capacity(4 + padded(self.data.len()));
        buf.put_u16(self.number);
        buf.put_u16(len);
        buf.put_slice(&self.data);
        buf.put_bytes(0, padded(self.data.len()) - self.data.len());
        Ok(buf.freeze())
    }

    /// Parse a frame.
    ///
    /// The buffer must hold the declared payload, either unpadded or padded
    /// to 4 bytes; a shorter buffer or trailing bytes past the padding are
    /// rejected.
    pub fn decode(bytes: &[u8]) -> StunResult<Self> {
        if bytes.len() < 4 {
            return Err(StunError::InvalidInput);
        }

        let number = u16::from_be_bytes([bytes[0], bytes[1]]);
        if number & 0xC000 != 0x4000 {
            return Err(StunError::InvalidInput);
        }

        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let body = bytes.len() - 4;
        if body != len && body != padded(len) {
            return Err(StunError::InvalidInput);
        }

        Ok(Self {
            number,
            data: Bytes::copy_from_slice(&bytes[4..4 + len]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_payload() {
        let frame = ChannelData::new(0x4000, &b"hello"[..]).encode().unwrap();
        assert_eq!(&frame[..4], &[0x40, 0x00, 0x00, 0x05]);
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[9..], &[0, 0, 0]);
    }

    #[test]
    fn test_decode_padded_and_unpadded() {
        let padded = [0x40, 0x01, 0x00, 0x03, 1, 2, 3, 0];
        let unpadded = [0x40, 0x01, 0x00, 0x03, 1, 2, 3];
        let expected = ChannelData::new(0x4001, vec![1u8, 2, 3]);
        assert_eq!(ChannelData::decode(&padded).unwrap(), expected);
        assert_eq!(ChannelData::decode(&unpadded).unwrap(), expected);
    }

    #[test]
    fn test_decode_length_mismatch() {
        // declared 8, carries 4
        assert_eq!(
            ChannelData::decode(&[0x40, 0x00, 0x00, 0x08, 1, 2, 3, 4]),
            Err(StunError::InvalidInput)
        );
        // declared 2, carries 8
        assert_eq!(
            ChannelData::decode(&[0x40, 0x00, 0x00, 0x02, 1, 2, 3, 4, 5, 6, 7, 8]),
            Err(StunError::InvalidInput)
        );
    }

    #[test]
    fn test_channel_range() {
        assert!(CHANNEL_RANGE.contains(&0x4000));
        assert!(CHANNEL_RANGE.contains(&0x7FFE));
        assert!(!CHANNEL_RANGE.contains(&0x7FFF));
        assert!(!CHANNEL_RANGE.contains(&0x3FFF));
    }
}
