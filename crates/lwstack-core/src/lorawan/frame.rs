//! Frame model and wire layout.
//!
//! [`Frame`] is the logical, plaintext view of a PHYPayload. [`RawFrame`]
//! splits the wire bytes into header, MAC payload and MIC without any
//! cryptography; decoding and encoding live in sibling modules.

use serde::{Deserialize, Serialize};

use super::crypto::Mic;
use super::types::{DevAddr, Direction, Eui64, HexBytes, MHdr, MType, NetId};
use crate::error::CodecError;

pub const MIC_LEN: usize = 4;
pub const FHDR_MIN_LEN: usize = 7;
pub const JOIN_REQUEST_LEN: usize = 18;
pub const JOIN_ACCEPT_LEN: usize = 12;
pub const CF_LIST_LEN: usize = 16;

/// Frame control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FCtrl {
    pub adr: bool,
    /// Uplink only.
    pub adr_ack_req: bool,
    pub ack: bool,
    /// Downlink only.
    pub f_pending: bool,
    /// Uplink only.
    pub class_b: bool,
}

impl FCtrl {
    pub fn from_byte(byte: u8, dir: Direction) -> (Self, usize) {
        let bit4 = byte & 0x10 != 0;
        let f_ctrl = Self {
            adr: byte & 0x80 != 0,
            adr_ack_req: dir == Direction::Uplink && byte & 0x40 != 0,
            ack: byte & 0x20 != 0,
            f_pending: dir == Direction::Downlink && bit4,
            class_b: dir == Direction::Uplink && bit4,
        };
        (f_ctrl, (byte & 0x0F) as usize)
    }

    pub fn to_byte(&self, dir: Direction, f_opts_len: usize) -> u8 {
        let mut byte = (f_opts_len as u8) & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if dir == Direction::Uplink && self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        let bit4 = match dir {
            Direction::Uplink => self.class_b,
            Direction::Downlink => self.f_pending,
        };
        if bit4 {
            byte |= 0x10;
        }
        byte
    }
}

/// Data frame (plaintext view).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataFrame {
    pub dev_addr: DevAddr,
    #[serde(default)]
    pub f_ctrl: FCtrl,
    /// Full 32-bit frame counter; only the low 16 bits go on the wire.
    pub f_cnt: u32,
    #[serde(default, skip_serializing_if = "HexBytes::is_empty")]
    pub f_opts: HexBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f_port: Option<u8>,
    #[serde(default, skip_serializing_if = "HexBytes::is_empty")]
    pub frm_payload: HexBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestFrame {
    pub join_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejoinRequestFrame {
    pub rejoin_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_id: Option<NetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_eui: Option<Eui64>,
    pub dev_eui: Eui64,
    pub rejoin_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DlSettings {
    pub opt_neg: bool,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
}

impl DlSettings {
    pub fn from_byte(b: u8) -> Self {
        Self {
            opt_neg: b & 0x80 != 0,
            rx1_dr_offset: (b >> 4) & 0x07,
            rx2_dr: b & 0x0F,
        }
    }

    pub fn to_byte(&self) -> u8 {
        ((self.opt_neg as u8) << 7) | ((self.rx1_dr_offset & 0x07) << 4) | (self.rx2_dr & 0x0F)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinAcceptFrame {
    #[serde(default)]
    pub join_nonce: u32,
    #[serde(default)]
    pub net_id: NetId,
    #[serde(default)]
    pub dev_addr: DevAddr,
    #[serde(default)]
    pub dl_settings: DlSettings,
    #[serde(default)]
    pub rx_delay: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf_list: Option<HexBytes>,
    /// Set only when the payload could not be decrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<HexBytes>,
}

impl JoinAcceptFrame {
    /// Parse the decrypted join-accept fields (without MIC).
    pub fn from_bytes(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() != JOIN_ACCEPT_LEN && b.len() != JOIN_ACCEPT_LEN + CF_LIST_LEN {
            return Err(CodecError::InvalidLength {
                what: "join-accept payload",
                expected: JOIN_ACCEPT_LEN,
                actual: b.len(),
            });
        }
        Ok(Self {
            join_nonce: u32::from_le_bytes([b[0], b[1], b[2], 0]),
            net_id: NetId::from_le_slice(&b[3..6])?,
            dev_addr: DevAddr::from_le_slice(&b[6..10])?,
            dl_settings: DlSettings::from_byte(b[10]),
            rx_delay: b[11],
            cf_list: (b.len() > JOIN_ACCEPT_LEN).then(|| HexBytes(b[12..].to_vec())),
            encrypted: None,
        })
    }

    /// Serialize the plaintext join-accept fields (without MIC).
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(JOIN_ACCEPT_LEN + CF_LIST_LEN);
        out.extend_from_slice(&self.join_nonce.to_le_bytes()[..3]);
        out.extend_from_slice(&self.net_id.to_le_bytes());
        out.extend_from_slice(&self.dev_addr.to_le_bytes());
        out.push(self.dl_settings.to_byte());
        out.push(self.rx_delay);
        if let Some(cf_list) = &self.cf_list {
            if cf_list.0.len() != CF_LIST_LEN {
                return Err(CodecError::InvalidLength {
                    what: "CFList",
                    expected: CF_LIST_LEN,
                    actual: cf_list.0.len(),
                });
            }
            out.extend_from_slice(&cf_list.0);
        }
        Ok(out)
    }
}

/// Plaintext view of a PHYPayload, tagged by message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "m_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    JoinRequest(JoinRequestFrame),
    JoinAccept(JoinAcceptFrame),
    UnconfirmedUp(DataFrame),
    UnconfirmedDown(DataFrame),
    ConfirmedUp(DataFrame),
    ConfirmedDown(DataFrame),
    RejoinRequest(RejoinRequestFrame),
}

impl Frame {
    pub fn m_type(&self) -> MType {
        match self {
            Frame::JoinRequest(_) => MType::JoinRequest,
            Frame::JoinAccept(_) => MType::JoinAccept,
            Frame::UnconfirmedUp(_) => MType::UnconfirmedUp,
            Frame::UnconfirmedDown(_) => MType::UnconfirmedDown,
            Frame::ConfirmedUp(_) => MType::ConfirmedUp,
            Frame::ConfirmedDown(_) => MType::ConfirmedDown,
            Frame::RejoinRequest(_) => MType::RejoinRequest,
        }
    }

    pub fn data(&self) -> Option<&DataFrame> {
        match self {
            Frame::UnconfirmedUp(d)
            | Frame::UnconfirmedDown(d)
            | Frame::ConfirmedUp(d)
            | Frame::ConfirmedDown(d) => Some(d),
            _ => None,
        }
    }

    pub fn data_frame(m_type: MType, data: DataFrame) -> Option<Self> {
        match m_type {
            MType::UnconfirmedUp => Some(Frame::UnconfirmedUp(data)),
            MType::UnconfirmedDown => Some(Frame::UnconfirmedDown(data)),
            MType::ConfirmedUp => Some(Frame::ConfirmedUp(data)),
            MType::ConfirmedDown => Some(Frame::ConfirmedDown(data)),
            _ => None,
        }
    }
}

/// Wire split of a PHYPayload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame<'a> {
    pub m_hdr: MHdr,
    /// Everything between the MAC header and the MIC. For join-accept this
    /// is the whole encrypted blob (which contains the MIC).
    pub payload: &'a [u8],
    pub mic: Option<Mic>,
}

impl<'a> RawFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let (&m_hdr, rest) = bytes.split_first().ok_or(CodecError::TooShort {
            expected: 1,
            actual: 0,
        })?;
        let m_hdr = MHdr::from_byte(m_hdr);

        if m_hdr.m_type == MType::JoinAccept {
            return Ok(Self {
                m_hdr,
                payload: rest,
                mic: None,
            });
        }
        if rest.len() < MIC_LEN {
            return Err(CodecError::TooShort {
                expected: 1 + MIC_LEN,
                actual: bytes.len(),
            });
        }
        let (payload, mic) = rest.split_at(rest.len() - MIC_LEN);
        Ok(Self {
            m_hdr,
            payload,
            mic: Some([mic[0], mic[1], mic[2], mic[3]]),
        })
    }

    /// Bytes covered by the MIC (MHDR and payload).
    pub fn signed_bytes(&self, original: &[u8]) -> Vec<u8> {
        original[..1 + self.payload.len()].to_vec()
    }
}

/// Wire fields of a data frame's MAC payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMacPayload<'a> {
    pub dev_addr: DevAddr,
    pub f_ctrl: FCtrl,
    pub f_cnt: u16,
    pub f_opts: &'a [u8],
    pub f_port: Option<u8>,
    pub frm_payload: &'a [u8],
}

impl<'a> RawMacPayload<'a> {
    pub fn parse(b: &'a [u8], dir: Direction) -> Result<Self, CodecError> {
        if b.len() < FHDR_MIN_LEN {
            return Err(CodecError::TooShort {
                expected: FHDR_MIN_LEN,
                actual: b.len(),
            });
        }
        let dev_addr = DevAddr::from_le_slice(&b[0..4])?;
        let (f_ctrl, f_opts_len) = FCtrl::from_byte(b[4], dir);
        let f_cnt = u16::from_le_bytes([b[5], b[6]]);
        let fhdr_len = FHDR_MIN_LEN + f_opts_len;
        if b.len() < fhdr_len {
            return Err(CodecError::TooShort {
                expected: fhdr_len,
                actual: b.len(),
            });
        }
        let f_opts = &b[FHDR_MIN_LEN..fhdr_len];
        let (f_port, frm_payload) = match b.get(fhdr_len) {
            Some(port) => (Some(*port), &b[fhdr_len + 1..]),
            None => (None, &b[fhdr_len..]),
        };
        Ok(Self {
            dev_addr,
            f_ctrl,
            f_cnt,
            f_opts,
            f_port,
            frm_payload,
        })
    }
}

impl JoinRequestFrame {
    pub fn from_bytes(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() != JOIN_REQUEST_LEN {
            return Err(CodecError::InvalidLength {
                what: "join-request payload",
                expected: JOIN_REQUEST_LEN,
                actual: b.len(),
            });
        }
        Ok(Self {
            join_eui: Eui64::from_le_slice(&b[0..8])?,
            dev_eui: Eui64::from_le_slice(&b[8..16])?,
            dev_nonce: u16::from_le_bytes([b[16], b[17]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(JOIN_REQUEST_LEN);
        out.extend_from_slice(&self.join_eui.to_le_bytes());
        out.extend_from_slice(&self.dev_eui.to_le_bytes());
        out.extend_from_slice(&self.dev_nonce.to_le_bytes());
        out
    }
}

impl RejoinRequestFrame {
    pub fn from_bytes(b: &[u8]) -> Result<Self, CodecError> {
        let rejoin_type = *b.first().ok_or(CodecError::MissingField("rejoin type"))?;
        match rejoin_type {
            0 | 2 => {
                if b.len() != 14 {
                    return Err(CodecError::InvalidLength {
                        what: "rejoin-request type 0/2",
                        expected: 14,
                        actual: b.len(),
                    });
                }
                Ok(Self {
                    rejoin_type,
                    net_id: Some(NetId::from_le_slice(&b[1..4])?),
                    join_eui: None,
                    dev_eui: Eui64::from_le_slice(&b[4..12])?,
                    rejoin_count: u16::from_le_bytes([b[12], b[13]]),
                })
            }
            1 => {
                if b.len() != 19 {
                    return Err(CodecError::InvalidLength {
                        what: "rejoin-request type 1",
                        expected: 19,
                        actual: b.len(),
                    });
                }
                Ok(Self {
                    rejoin_type,
                    net_id: None,
                    join_eui: Some(Eui64::from_le_slice(&b[1..9])?),
                    dev_eui: Eui64::from_le_slice(&b[9..17])?,
                    rejoin_count: u16::from_le_bytes([b[17], b[18]]),
                })
            }
            other => Err(CodecError::Malformed(format!("unknown rejoin type {}", other))),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![self.rejoin_type];
        match self.rejoin_type {
            1 => {
                let join_eui = self.join_eui.ok_or(CodecError::MissingField("JoinEUI"))?;
                out.extend_from_slice(&join_eui.to_le_bytes());
            }
            _ => {
                let net_id = self.net_id.ok_or(CodecError::MissingField("NetID"))?;
                out.extend_from_slice(&net_id.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.dev_eui.to_le_bytes());
        out.extend_from_slice(&self.rejoin_count.to_le_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_split() {
        let bytes = hex::decode("40F17DBE4900020001954378762B11FF0D").unwrap();
        let raw = RawFrame::parse(&bytes).unwrap();
        assert_eq!(raw.m_hdr.m_type, MType::UnconfirmedUp);
        assert_eq!(raw.mic, Some([0x2B, 0x11, 0xFF, 0x0D]));

        let mac = RawMacPayload::parse(raw.payload, Direction::Uplink).unwrap();
        assert_eq!(mac.dev_addr.to_string(), "49BE7DF1");
        assert_eq!(mac.f_cnt, 2);
        assert_eq!(mac.f_port, Some(1));
        assert_eq!(mac.frm_payload.len(), 4);
    }

    #[test]
    fn test_empty_frame_is_fatal() {
        assert!(RawFrame::parse(&[]).is_err());
        assert!(RawFrame::parse(&[0x40, 0x01]).is_err());
    }

    #[test]
    fn test_f_ctrl_direction_bits() {
        let (up, len) = FCtrl::from_byte(0xD3, Direction::Uplink);
        assert!(up.adr && up.adr_ack_req && up.class_b && !up.ack);
        assert_eq!(len, 3);
        assert_eq!(up.to_byte(Direction::Uplink, 3), 0xD3);

        let (down, _) = FCtrl::from_byte(0x30, Direction::Downlink);
        assert!(down.ack && down.f_pending && !down.class_b);
    }

    #[test]
    fn test_frame_json_tagging() {
        let frame = Frame::JoinRequest(JoinRequestFrame {
            join_eui: "70B3D57ED0000001".parse().unwrap(),
            dev_eui: "0004A30B001C0530".parse().unwrap(),
            dev_nonce: 258,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["m_type"], "JOIN_REQUEST");
        assert_eq!(json["dev_eui"], "0004A30B001C0530");
        let back: Frame = serde_json::from_value(json).unwrap();
        assert_eq!(back, frame);
    }
}
