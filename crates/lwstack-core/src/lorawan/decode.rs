//! Frame decoding.

use serde::Serialize;
use tracing::{debug, warn};

use super::crypto::{self, Mic, FRM_PAYLOAD_BLOCK, F_OPTS_BLOCK};
use super::frame::{
    DataFrame, Frame, JoinAcceptFrame, JoinRequestFrame, RawFrame, RawMacPayload,
    RejoinRequestFrame,
};
use super::mac_commands::{self, MacCommand};
use super::types::{AesKey, DevAddr, Direction, HexBytes, MType};
use super::{CodecOptions, SessionKeys};
use crate::error::CodecError;

/// Result of decoding a frame.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedFrame {
    pub frame: Frame,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic: Option<HexBytes>,
    /// `None` when the MIC could not be checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_valid: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mac_commands: Vec<MacCommand>,
    /// Session keys derived from a join-accept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_keys: Option<SessionKeys>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

struct Decoder<'a> {
    opts: &'a CodecOptions,
    warnings: Vec<String>,
}

impl<'a> Decoder<'a> {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn check_mic(&mut self, what: &str, expected: Option<Mic>, actual: Mic) -> Option<bool> {
        let expected = expected?;
        let valid = expected == actual;
        if !valid {
            self.warn(format!(
                "{} MIC mismatch: expected {}, got {}",
                what,
                hex::encode_upper(expected),
                hex::encode_upper(actual)
            ));
        }
        Some(valid)
    }
}

/// Decode a raw PHYPayload.
///
/// Only an unreadable outer frame is an error; everything else degrades to a
/// warning on the returned [`DecodedFrame`].
pub fn decode(bytes: &[u8], opts: &CodecOptions) -> Result<DecodedFrame, CodecError> {
    let raw = RawFrame::parse(bytes)?;
    let mut decoder = Decoder {
        opts,
        warnings: Vec::new(),
    };
    if raw.m_hdr.major != 0 {
        decoder.warn(format!("unknown LoRaWAN major version {}", raw.m_hdr.major));
    }

    let mut decoded = match raw.m_hdr.m_type {
        MType::JoinRequest => decoder.join_request(bytes, &raw)?,
        MType::RejoinRequest => decoder.rejoin_request(bytes, &raw)?,
        MType::JoinAccept => decoder.join_accept(&raw),
        MType::Proprietary => return Err(CodecError::UnsupportedMType(MType::Proprietary.bits())),
        m_type => decoder.data(bytes, &raw, m_type)?,
    };
    decoded.warnings = decoder.warnings;
    Ok(decoded)
}

fn result(frame: Frame, mic: Option<Mic>, mic_valid: Option<bool>) -> DecodedFrame {
    DecodedFrame {
        frame,
        mic: mic.map(|m| HexBytes(m.to_vec())),
        mic_valid,
        mac_commands: Vec::new(),
        session_keys: None,
        warnings: Vec::new(),
    }
}

impl<'a> Decoder<'a> {
    fn join_request(&mut self, bytes: &[u8], raw: &RawFrame<'_>) -> Result<DecodedFrame, CodecError> {
        let frame = JoinRequestFrame::from_bytes(raw.payload)?;
        let mic = raw.mic.unwrap_or_default();
        let expected = match self.opts.join_root_key() {
            Some(key) => Some(crypto::join_request_mic(key, &raw.signed_bytes(bytes))),
            None => {
                self.warn("no AppKey or NwkKey, skipping join-request MIC verification".to_string());
                None
            }
        };
        let valid = self.check_mic("join-request", expected, mic);
        Ok(result(Frame::JoinRequest(frame), Some(mic), valid))
    }

    fn rejoin_request(&mut self, bytes: &[u8], raw: &RawFrame<'_>) -> Result<DecodedFrame, CodecError> {
        let frame = RejoinRequestFrame::from_bytes(raw.payload)?;
        let mic = raw.mic.unwrap_or_default();
        let key = match frame.rejoin_type {
            1 => self
                .opts
                .nwk_key
                .map(|nwk_key| crypto::derive_js_int_key(&nwk_key, frame.dev_eui)),
            _ => self.opts.session.s_nwk_s_int().copied(),
        };
        let expected = match key {
            Some(key) => Some(crypto::join_request_mic(&key, &raw.signed_bytes(bytes))),
            None => {
                self.warn("missing integrity key, skipping rejoin-request MIC verification".to_string());
                None
            }
        };
        let valid = self.check_mic("rejoin-request", expected, mic);
        Ok(result(Frame::RejoinRequest(frame), Some(mic), valid))
    }

    fn join_accept(&mut self, raw: &RawFrame<'_>) -> DecodedFrame {
        let encrypted_only = |payload: &[u8]| {
            Frame::JoinAccept(JoinAcceptFrame {
                encrypted: Some(HexBytes(payload.to_vec())),
                ..Default::default()
            })
        };

        let Some(key) = self.opts.join_root_key().copied() else {
            self.warn("no AppKey or NwkKey, cannot decrypt join-accept".to_string());
            return result(encrypted_only(raw.payload), None, None);
        };

        let decrypted = crypto::decrypt_join_accept(&key, raw.payload);
        if decrypted.len() < 4 {
            self.warn(format!(
                "join-accept too short to hold a MIC ({} bytes)",
                decrypted.len()
            ));
            return result(encrypted_only(raw.payload), None, None);
        }
        let (fields, mic) = decrypted.split_at(decrypted.len() - 4);
        let mic: Mic = [mic[0], mic[1], mic[2], mic[3]];

        let frame = match JoinAcceptFrame::from_bytes(fields) {
            Ok(frame) => frame,
            Err(e) => {
                self.warn(format!("failed to unmarshal join-accept: {}", e));
                return result(encrypted_only(raw.payload), Some(mic), None);
            }
        };

        let mut signed = Vec::with_capacity(1 + fields.len());
        signed.push(raw.m_hdr.to_byte());
        signed.extend_from_slice(fields);

        let opt_neg = frame.dl_settings.opt_neg;
        let expected = if opt_neg {
            match (self.opts.nwk_key, self.opts.dev_eui, self.opts.join_eui, self.opts.dev_nonce) {
                (Some(nwk_key), Some(dev_eui), Some(join_eui), Some(dev_nonce)) => {
                    let js_int_key = crypto::derive_js_int_key(&nwk_key, dev_eui);
                    Some(crypto::join_accept_mic_1_1(
                        &js_int_key,
                        self.opts.join_request_type,
                        join_eui,
                        dev_nonce,
                        &signed,
                    ))
                }
                _ => {
                    self.warn(
                        "OptNeg set but NwkKey, DevEUI, JoinEUI or DevNonce missing, skipping join-accept MIC verification"
                            .to_string(),
                    );
                    None
                }
            }
        } else {
            Some(crypto::legacy_join_accept_mic(&key, &signed))
        };
        let valid = self.check_mic("join-accept", expected, mic);

        let session_keys = self.derive_session_keys(&frame, &key);
        let mut decoded = result(Frame::JoinAccept(frame), Some(mic), valid);
        decoded.session_keys = session_keys;
        decoded
    }

    fn derive_session_keys(&mut self, frame: &JoinAcceptFrame, root_key: &AesKey) -> Option<SessionKeys> {
        let Some(dev_nonce) = self.opts.dev_nonce else {
            debug!("no DevNonce, not deriving session keys");
            return None;
        };
        if frame.dl_settings.opt_neg && self.opts.mac_version.is_1_1() {
            match (self.opts.nwk_key, self.opts.app_key, self.opts.join_eui) {
                (Some(nwk_key), Some(app_key), Some(join_eui)) => {
                    let keys = crypto::derive_session_keys_1_1(
                        &nwk_key,
                        &app_key,
                        frame.join_nonce,
                        join_eui,
                        dev_nonce,
                    );
                    Some(SessionKeys {
                        app_s_key: Some(keys.app_s_key),
                        f_nwk_s_int_key: Some(keys.f_nwk_s_int_key),
                        s_nwk_s_int_key: Some(keys.s_nwk_s_int_key),
                        nwk_s_enc_key: Some(keys.nwk_s_enc_key),
                    })
                }
                _ => {
                    self.warn("missing NwkKey, AppKey or JoinEUI, not deriving session keys".to_string());
                    None
                }
            }
        } else {
            let keys =
                crypto::derive_legacy_session_keys(root_key, frame.join_nonce, frame.net_id, dev_nonce);
            Some(SessionKeys::legacy(keys.nwk_s_key, keys.app_s_key))
        }
    }

    fn expected_data_mic(
        &self,
        dir: Direction,
        f_ctrl_ack: bool,
        dev_addr: DevAddr,
        f_cnt: u32,
        signed: &[u8],
    ) -> Option<Mic> {
        let session = &self.opts.session;
        let conf_f_cnt = if f_ctrl_ack { self.opts.conf_f_cnt } else { 0 };
        match (dir, self.opts.mac_version.is_1_1()) {
            (Direction::Uplink, false) => session
                .f_nwk_s_int()
                .map(|k| crypto::legacy_uplink_mic(k, dev_addr, f_cnt, signed)),
            (Direction::Uplink, true) => match (session.s_nwk_s_int_key, session.f_nwk_s_int_key) {
                (Some(s), Some(f)) => Some(crypto::uplink_mic_1_1(
                    &s,
                    &f,
                    conf_f_cnt,
                    self.opts.tx_dr,
                    self.opts.tx_ch,
                    dev_addr,
                    f_cnt,
                    signed,
                )),
                _ => None,
            },
            (Direction::Downlink, false) => session
                .f_nwk_s_int()
                .map(|k| crypto::downlink_mic(k, 0, dev_addr, f_cnt, signed)),
            (Direction::Downlink, true) => session
                .s_nwk_s_int_key
                .as_ref()
                .map(|k| crypto::downlink_mic(k, conf_f_cnt, dev_addr, f_cnt, signed)),
        }
    }

    /// Recover the upper 16 bits of the frame counter.
    ///
    /// Tries every prefix in turn. A prefix is accepted when the MIC matches
    /// or, without MIC keys, when the encrypted FOpts decrypt to a complete
    /// MAC command stream.
    fn recover_f_cnt(
        &self,
        dir: Direction,
        mac: &RawMacPayload<'_>,
        signed: &[u8],
        carried_mic: Mic,
    ) -> Option<u32> {
        let low = mac.f_cnt as u32;
        let has_mic_key = self
            .expected_data_mic(dir, mac.f_ctrl.ack, mac.dev_addr, low, signed)
            .is_some();
        let enc_key = self.opts.session.nwk_s_enc_key;
        let fopts_encrypted = self.opts.mac_version.is_1_1() && !mac.f_opts.is_empty();

        if !has_mic_key && !(fopts_encrypted && enc_key.is_some()) {
            return Some(low);
        }

        (0u32..=0xFFFF).map(|prefix| (prefix << 16) | low).find(|&f_cnt| {
            if has_mic_key {
                self.expected_data_mic(dir, mac.f_ctrl.ack, mac.dev_addr, f_cnt, signed)
                    .is_some_and(|expected| expected == carried_mic)
            } else {
                let Some(key) = enc_key.as_ref() else {
                    return false;
                };
                let plain =
                    crypto::crypt_payload(key, dir, mac.dev_addr, f_cnt, F_OPTS_BLOCK, mac.f_opts);
                mac_commands::parse(&plain, dir, self.opts.band).is_complete()
            }
        })
    }

    fn data(&mut self, bytes: &[u8], raw: &RawFrame<'_>, m_type: MType) -> Result<DecodedFrame, CodecError> {
        let dir = if m_type.is_uplink() {
            Direction::Uplink
        } else {
            Direction::Downlink
        };
        let mac = RawMacPayload::parse(raw.payload, dir)?;
        let mic = raw.mic.unwrap_or_default();
        let signed = raw.signed_bytes(bytes);
        let is_1_1 = self.opts.mac_version.is_1_1();

        let f_cnt = match self.recover_f_cnt(dir, &mac, &signed, mic) {
            Some(f_cnt) => f_cnt,
            None => {
                self.warn(format!(
                    "could not recover full frame counter for FCnt {}, assuming upper bits are zero",
                    mac.f_cnt
                ));
                mac.f_cnt as u32
            }
        };

        let expected = self.expected_data_mic(dir, mac.f_ctrl.ack, mac.dev_addr, f_cnt, &signed);
        if expected.is_none() {
            self.warn("missing network session keys, skipping MIC verification".to_string());
        }
        let mic_valid = self.check_mic("data frame", expected, mic);

        let session = self.opts.session.clone();
        let f_opts = if is_1_1 && !mac.f_opts.is_empty() {
            match session.nwk_s_enc_key {
                Some(key) => {
                    crypto::crypt_payload(&key, dir, mac.dev_addr, f_cnt, F_OPTS_BLOCK, mac.f_opts)
                }
                None => {
                    self.warn("no NwkSEncKey, skipping FOpts decryption".to_string());
                    mac.f_opts.to_vec()
                }
            }
        } else {
            mac.f_opts.to_vec()
        };

        let frm_payload = match mac.f_port {
            Some(_) if mac.frm_payload.is_empty() => Vec::new(),
            Some(0) => match session.nwk_s_enc() {
                Some(key) => crypto::crypt_payload(
                    key,
                    dir,
                    mac.dev_addr,
                    f_cnt,
                    FRM_PAYLOAD_BLOCK,
                    mac.frm_payload,
                ),
                None => {
                    self.warn("no NwkSEncKey, skipping FRMPayload decryption".to_string());
                    mac.frm_payload.to_vec()
                }
            },
            Some(f_port) => match session.app_s_key {
                Some(key) => crypto::crypt_payload(
                    &key,
                    dir,
                    mac.dev_addr,
                    f_cnt,
                    FRM_PAYLOAD_BLOCK,
                    mac.frm_payload,
                ),
                None => {
                    warn!(f_port, "no AppSKey, skipping FRMPayload decryption");
                    self.warnings
                        .push("no AppSKey, skipping FRMPayload decryption".to_string());
                    mac.frm_payload.to_vec()
                }
            },
            None => Vec::new(),
        };

        let mac_buffer: &[u8] = if !f_opts.is_empty() {
            &f_opts
        } else if mac.f_port == Some(0) {
            &frm_payload
        } else {
            &[]
        };
        let parsed = mac_commands::parse(mac_buffer, dir, self.opts.band);
        if let Some(e) = &parsed.error {
            self.warn(format!("partial MAC command read: {}", e));
        }

        let data = DataFrame {
            dev_addr: mac.dev_addr,
            f_ctrl: mac.f_ctrl,
            f_cnt,
            f_opts: HexBytes(f_opts),
            f_port: mac.f_port,
            frm_payload: HexBytes(frm_payload),
        };
        let frame = Frame::data_frame(m_type, data).ok_or(CodecError::UnsupportedMType(m_type.bits()))?;
        let mut decoded = result(frame, Some(mic), mic_valid);
        decoded.mac_commands = parsed.commands;
        Ok(decoded)
    }
}
