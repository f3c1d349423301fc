//! LoRaWAN frame codec.
//!
//! Decodes raw PHYPayloads into [`Frame`]s (decrypting and verifying with
//! whatever keys are supplied) and encodes frames back into bytes for the
//! simulator. Apart from a truly malformed outer frame, every codec problem
//! is reported as a warning on the decoded result rather than an error.

pub mod band;
pub mod crypto;
pub mod decode;
pub mod encode;
pub mod frame;
pub mod mac_commands;
pub mod types;

use base64::Engine;
use serde::{Deserialize, Serialize};

pub use decode::{decode, DecodedFrame};
pub use encode::encode;
pub use frame::{DataFrame, FCtrl, Frame, JoinAcceptFrame, JoinRequestFrame, RejoinRequestFrame};
pub use types::{AesKey, DevAddr, Eui64, HexBytes, MType, MacVersion, NetId};

use crate::error::CodecError;
use band::Band;

/// Session keys known for a device.
///
/// On 1.0.x the single NwkSKey is held in `f_nwk_s_int_key`; the accessors
/// fall back to it so that callers need not care about the version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<AesKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f_nwk_s_int_key: Option<AesKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s_nwk_s_int_key: Option<AesKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nwk_s_enc_key: Option<AesKey>,
}

impl SessionKeys {
    /// 1.0.x session keys: all network keys equal NwkSKey.
    pub fn legacy(nwk_s_key: AesKey, app_s_key: AesKey) -> Self {
        Self {
            app_s_key: Some(app_s_key),
            f_nwk_s_int_key: Some(nwk_s_key),
            s_nwk_s_int_key: Some(nwk_s_key),
            nwk_s_enc_key: Some(nwk_s_key),
        }
    }

    pub fn f_nwk_s_int(&self) -> Option<&AesKey> {
        self.f_nwk_s_int_key.as_ref()
    }

    pub fn s_nwk_s_int(&self) -> Option<&AesKey> {
        self.s_nwk_s_int_key.as_ref().or(self.f_nwk_s_int_key.as_ref())
    }

    pub fn nwk_s_enc(&self) -> Option<&AesKey> {
        self.nwk_s_enc_key.as_ref().or(self.f_nwk_s_int_key.as_ref())
    }
}

/// Keys and context for decoding and encoding.
#[derive(Debug, Clone)]
pub struct CodecOptions {
    pub mac_version: MacVersion,
    pub band: &'static Band,
    pub app_key: Option<AesKey>,
    pub nwk_key: Option<AesKey>,
    pub session: SessionKeys,
    pub dev_eui: Option<Eui64>,
    pub join_eui: Option<Eui64>,
    /// DevNonce of the join-request a join-accept answers.
    pub dev_nonce: Option<u16>,
    /// 0xFF for a join-request, otherwise the rejoin type.
    pub join_request_type: u8,
    /// Counter of the frame acknowledged by this one (1.1 MIC input).
    pub conf_f_cnt: u16,
    pub tx_dr: u8,
    pub tx_ch: u8,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            mac_version: MacVersion::default(),
            band: &band::EU_863_870,
            app_key: None,
            nwk_key: None,
            session: SessionKeys::default(),
            dev_eui: None,
            join_eui: None,
            dev_nonce: None,
            join_request_type: 0xFF,
            conf_f_cnt: 0,
            tx_dr: 0,
            tx_ch: 0,
        }
    }
}

impl CodecOptions {
    /// Root key that wraps join-accepts and signs join-requests.
    pub fn join_root_key(&self) -> Option<&AesKey> {
        if self.mac_version.is_1_1() {
            self.nwk_key.as_ref()
        } else {
            self.app_key.as_ref().or(self.nwk_key.as_ref())
        }
    }
}

/// Raw input encodings accepted by `lorawan decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputEncoding {
    Hex,
    #[default]
    Base64,
}

/// Decode textual frame input into bytes.
pub fn parse_input(input: &str, encoding: InputEncoding) -> Result<Vec<u8>, CodecError> {
    let trimmed: String = input.split_whitespace().collect();
    match encoding {
        InputEncoding::Hex => {
            hex::decode(trimmed.trim_start_matches("0x")).map_err(|e| CodecError::InvalidHex(e.to_string()))
        }
        InputEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(trimmed)
            .map_err(|e| CodecError::InvalidBase64(e.to_string())),
    }
}
