//! STUN message type: method and class
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

/// STUN/TURN method (RFC 8489 Section 18.2, RFC 8656 Section 17)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Binding (0x001)
    Binding,
    /// Allocate (0x003)
    Allocate,
    /// Refresh (0x004)
    Refresh,
    /// Send (0x006), indication only
    Send,
    /// Data (0x007), indication only
    Data,
    /// CreatePermission (0x008)
    CreatePermission,
    /// ChannelBind (0x009)
    ChannelBind,
}

impl Method {
    /// 12-bit method code
    pub fn code(self) -> u16 {
        match self {
            Method::Binding => 0x001,
            Method::Allocate => 0x003,
            Method::Refresh => 0x004,
            Method::Send => 0x006,
            Method::Data => 0x007,
            Method::CreatePermission => 0x008,
            Method::ChannelBind => 0x009,
        }
    }

    /// Whether requests of this method carry long-term credentials
    pub fn requires_auth(self) -> bool {
        matches!(
            self,
            Method::Allocate | Method::Refresh | Method::CreatePermission | Method::ChannelBind
        )
    }
}

impl TryFrom<u16> for Method {
    type Error = StunError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            0x001 => Method::Binding,
            0x003 => Method::Allocate,
            0x004 => Method::Refresh,
            0x006 => Method::Send,
            0x007 => Method::Data,
            0x008 => Method::CreatePermission,
            0x009 => Method::ChannelBind,
            _ => return Err(StunError::UnknownMethod),
        })
    }
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

impl Class {
    fn bits(self) -> u16 {
        match self {
            Class::Request => 0b00,
            Class::Indication => 0b01,
            Class::SuccessResponse => 0b10,
            Class::ErrorResponse => 0b11,
        }
    }

    pub(crate) fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Class::Request,
            0b01 => Class::Indication,
            0b10 => Class::SuccessResponse,
            _ => Class::ErrorResponse,
        }
    }
}

/// Pack method and class into the 14-bit message type field.
///
/// ```text
///  0                 1
///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
/// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn message_type(method: Method, class: Class) -> u16 {
    let m = method.code();
    let c = class.bits();
    (m & 0x000F) | ((m & 0x0070) << 1) | ((m & 0x0F80) << 2) | ((c & 0b01) << 4) | ((c & 0b10) << 7)
}

/// Split the message type field back into method and class.
pub fn split_message_type(value: u16) -> Result<(Method, Class), StunError> {
    if value & 0xC000 != 0 {
        return Err(StunError::InvalidInput);
    }

    let m = (value & 0x000F) | ((value & 0x00E0) >> 1) | ((value & 0x3E00) >> 2);
    let c = ((value >> 4) & 0b01) | ((value >> 7) & 0b10);
    Ok((Method::try_from(m)?, Class::from_bits(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_types() {
        assert_eq!(message_type(Method::Binding, Class::Request), 0x0001);
        assert_eq!(message_type(Method::Binding, Class::SuccessResponse), 0x0101);
        assert_eq!(message_type(Method::Binding, Class::ErrorResponse), 0x0111);
        assert_eq!(message_type(Method::Allocate, Class::ErrorResponse), 0x0113);
        assert_eq!(message_type(Method::Send, Class::Indication), 0x0016);
        assert_eq!(message_type(Method::Data, Class::Indication), 0x0017);
        assert_eq!(message_type(Method::ChannelBind, Class::SuccessResponse), 0x0109);
    }

    #[test]
    fn test_split_message_type() {
        assert_eq!(
            split_message_type(0x0118).unwrap(),
            (Method::CreatePermission, Class::ErrorResponse)
        );
        assert_eq!(
            split_message_type(0x0004).unwrap(),
            (Method::Refresh, Class::Request)
        );
        assert_eq!(split_message_type(0x0002), Err(StunError::UnknownMethod));
    }
}
