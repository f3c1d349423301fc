//! Primitive LoRaWAN types: EUIs, device addresses, AES keys and versions.
//!
//! Multi-byte fields are little-endian on the wire but displayed (and
//! serialized to JSON) as big-endian upper-case hex, the way operators read
//! them off device labels.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;

macro_rules! hex_bytes_type {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            /// Parse from a byte slice in display (big-endian) order.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| CodecError::InvalidLength {
                    what: stringify!($name),
                    expected: $len,
                    actual: bytes.len(),
                })?;
                Ok(Self(arr))
            }

            /// Parse from wire (little-endian) order.
            pub fn from_le_slice(bytes: &[u8]) -> Result<Self, CodecError> {
                let mut v = Self::from_slice(bytes)?;
                v.0.reverse();
                Ok(v)
            }

            /// Bytes in wire (little-endian) order.
            pub fn to_le_bytes(&self) -> [u8; $len] {
                let mut b = self.0;
                b.reverse();
                b
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode_upper(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let cleaned: String = s
                    .trim()
                    .trim_start_matches("0x")
                    .chars()
                    .filter(|c| *c != '-' && *c != ':')
                    .collect();
                let bytes = hex::decode(&cleaned).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_bytes_type!(
    /// 64-bit extended unique identifier (DevEUI, JoinEUI).
    Eui64,
    8
);
hex_bytes_type!(
    /// 32-bit device address.
    DevAddr,
    4
);
hex_bytes_type!(
    /// 24-bit network identifier.
    NetId,
    3
);
hex_bytes_type!(
    /// AES-128 key.
    AesKey,
    16
);

impl AesKey {
    /// Generate a uniformly random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }
}

impl DevAddr {
    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

/// Variable-length byte string serialized as upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map(HexBytes).map_err(serde::de::Error::custom)
    }
}

/// LoRaWAN MAC message type (3 most significant bits of the MAC header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedUp,
    UnconfirmedDown,
    ConfirmedUp,
    ConfirmedDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedUp,
            3 => MType::UnconfirmedDown,
            4 => MType::ConfirmedUp,
            5 => MType::ConfirmedDown,
            6 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            MType::JoinRequest => 0,
            MType::JoinAccept => 1,
            MType::UnconfirmedUp => 2,
            MType::UnconfirmedDown => 3,
            MType::ConfirmedUp => 4,
            MType::ConfirmedDown => 5,
            MType::RejoinRequest => 6,
            MType::Proprietary => 7,
        }
    }

    pub fn is_uplink(&self) -> bool {
        matches!(
            self,
            MType::JoinRequest | MType::UnconfirmedUp | MType::ConfirmedUp | MType::RejoinRequest
        )
    }

    pub fn is_data(&self) -> bool {
        matches!(
            self,
            MType::UnconfirmedUp | MType::UnconfirmedDown | MType::ConfirmedUp | MType::ConfirmedDown
        )
    }
}

/// MAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MHdr {
    pub m_type: MType,
    pub major: u8,
}

impl MHdr {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            m_type: MType::from_bits(byte >> 5),
            major: byte & 0x03,
        }
    }

    pub fn to_byte(&self) -> u8 {
        (self.m_type.bits() << 5) | (self.major & 0x03)
    }
}

/// LoRaWAN MAC version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MacVersion {
    V1_0,
    V1_0_1,
    V1_0_2,
    V1_0_3,
    V1_0_4,
    V1_1,
}

impl MacVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacVersion::V1_0 => "MAC_V1_0",
            MacVersion::V1_0_1 => "MAC_V1_0_1",
            MacVersion::V1_0_2 => "MAC_V1_0_2",
            MacVersion::V1_0_3 => "MAC_V1_0_3",
            MacVersion::V1_0_4 => "MAC_V1_0_4",
            MacVersion::V1_1 => "MAC_V1_1",
        }
    }

    /// Whether this version uses the split network session keys.
    pub fn is_1_1(&self) -> bool {
        *self >= MacVersion::V1_1
    }
}

impl Default for MacVersion {
    fn default() -> Self {
        MacVersion::V1_0_3
    }
}

impl fmt::Display for MacVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MacVersion {
    type Err = CodecError;

    /// Accepts both the enum form (`MAC_V1_0_3`) and dotted form (`1.0.3`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_uppercase()
            .trim_start_matches("MAC_")
            .trim_start_matches('V')
            .replace(['.', '_'], ".");
        match normalized.as_str() {
            "1.0" | "1.0.0" => Ok(MacVersion::V1_0),
            "1.0.1" => Ok(MacVersion::V1_0_1),
            "1.0.2" => Ok(MacVersion::V1_0_2),
            "1.0.3" => Ok(MacVersion::V1_0_3),
            "1.0.4" => Ok(MacVersion::V1_0_4),
            "1.1" | "1.1.0" => Ok(MacVersion::V1_1),
            _ => Err(CodecError::UnknownMacVersion(s.to_string())),
        }
    }
}

impl Serialize for MacVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MacVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    pub fn byte(&self) -> u8 {
        match self {
            Direction::Uplink => 0x00,
            Direction::Downlink => 0x01,
        }
    }
}
