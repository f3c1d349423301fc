//! Frame encoding, used by the simulator and `lorawan encode`.

use super::crypto::{self, FRM_PAYLOAD_BLOCK, F_OPTS_BLOCK};
use super::frame::{DataFrame, Frame, JoinAcceptFrame, RejoinRequestFrame};
use super::types::{AesKey, Direction, MHdr};
use super::CodecOptions;
use crate::error::CodecError;

/// Encode a frame into a PHYPayload using the keys in `opts`.
pub fn encode(frame: &Frame, opts: &CodecOptions) -> Result<Vec<u8>, CodecError> {
    let m_hdr = MHdr {
        m_type: frame.m_type(),
        major: 0,
    }
    .to_byte();

    match frame {
        Frame::JoinRequest(jr) => {
            let key = opts.join_root_key().ok_or(CodecError::MissingField("AppKey or NwkKey"))?;
            let mut out = vec![m_hdr];
            out.extend_from_slice(&jr.to_bytes());
            let mic = crypto::join_request_mic(key, &out);
            out.extend_from_slice(&mic);
            Ok(out)
        }
        Frame::RejoinRequest(rj) => encode_rejoin_request(m_hdr, rj, opts),
        Frame::JoinAccept(ja) => encode_join_accept(m_hdr, ja, opts),
        Frame::UnconfirmedUp(d) | Frame::ConfirmedUp(d) => {
            encode_data(m_hdr, d, Direction::Uplink, opts)
        }
        Frame::UnconfirmedDown(d) | Frame::ConfirmedDown(d) => {
            encode_data(m_hdr, d, Direction::Downlink, opts)
        }
    }
}

fn encode_rejoin_request(
    m_hdr: u8,
    rj: &RejoinRequestFrame,
    opts: &CodecOptions,
) -> Result<Vec<u8>, CodecError> {
    let key = match rj.rejoin_type {
        1 => opts
            .nwk_key
            .map(|nwk_key| crypto::derive_js_int_key(&nwk_key, rj.dev_eui))
            .ok_or(CodecError::MissingField("NwkKey"))?,
        _ => *opts
            .session
            .s_nwk_s_int()
            .ok_or(CodecError::MissingField("SNwkSIntKey"))?,
    };
    let mut out = vec![m_hdr];
    out.extend_from_slice(&rj.to_bytes()?);
    let mic = crypto::join_request_mic(&key, &out);
    out.extend_from_slice(&mic);
    Ok(out)
}

fn encode_join_accept(
    m_hdr: u8,
    ja: &JoinAcceptFrame,
    opts: &CodecOptions,
) -> Result<Vec<u8>, CodecError> {
    let key = *opts.join_root_key().ok_or(CodecError::MissingField("AppKey or NwkKey"))?;
    let fields = ja.to_bytes()?;
    let mut signed = vec![m_hdr];
    signed.extend_from_slice(&fields);

    let mic = if ja.dl_settings.opt_neg {
        let nwk_key = opts.nwk_key.ok_or(CodecError::MissingField("NwkKey"))?;
        let dev_eui = opts.dev_eui.ok_or(CodecError::MissingField("DevEUI"))?;
        let join_eui = opts.join_eui.ok_or(CodecError::MissingField("JoinEUI"))?;
        let dev_nonce = opts.dev_nonce.ok_or(CodecError::MissingField("DevNonce"))?;
        let js_int_key = crypto::derive_js_int_key(&nwk_key, dev_eui);
        crypto::join_accept_mic_1_1(&js_int_key, opts.join_request_type, join_eui, dev_nonce, &signed)
    } else {
        crypto::legacy_join_accept_mic(&key, &signed)
    };

    let mut plaintext = fields;
    plaintext.extend_from_slice(&mic);
    let mut out = vec![m_hdr];
    out.extend(crypto::encrypt_join_accept(&key, &plaintext));
    Ok(out)
}

fn require<'a>(key: Option<&'a AesKey>, name: &'static str) -> Result<&'a AesKey, CodecError> {
    key.ok_or(CodecError::MissingField(name))
}

fn encode_data(
    m_hdr: u8,
    d: &DataFrame,
    dir: Direction,
    opts: &CodecOptions,
) -> Result<Vec<u8>, CodecError> {
    if d.f_opts.0.len() > 15 {
        return Err(CodecError::InvalidLength {
            what: "FOpts",
            expected: 15,
            actual: d.f_opts.0.len(),
        });
    }
    if d.f_port == Some(0) && !d.f_opts.is_empty() {
        return Err(CodecError::Malformed(
            "MAC commands cannot be in both FOpts and FRMPayload".to_string(),
        ));
    }
    if d.f_port.is_none() && !d.frm_payload.is_empty() {
        return Err(CodecError::MissingField("FPort"));
    }

    let session = &opts.session;
    let is_1_1 = opts.mac_version.is_1_1();

    let f_opts = if is_1_1 && !d.f_opts.is_empty() {
        let key = require(session.nwk_s_enc_key.as_ref(), "NwkSEncKey")?;
        crypto::crypt_payload(key, dir, d.dev_addr, d.f_cnt, F_OPTS_BLOCK, &d.f_opts.0)
    } else {
        d.f_opts.0.clone()
    };

    let mut out = vec![m_hdr];
    out.extend_from_slice(&d.dev_addr.to_le_bytes());
    out.push(d.f_ctrl.to_byte(dir, f_opts.len()));
    out.extend_from_slice(&(d.f_cnt as u16).to_le_bytes());
    out.extend_from_slice(&f_opts);

    if let Some(f_port) = d.f_port {
        out.push(f_port);
        if !d.frm_payload.is_empty() {
            let key = if f_port == 0 {
                require(session.nwk_s_enc(), "NwkSEncKey")?
            } else {
                require(session.app_s_key.as_ref(), "AppSKey")?
            };
            out.extend(crypto::crypt_payload(
                key,
                dir,
                d.dev_addr,
                d.f_cnt,
                FRM_PAYLOAD_BLOCK,
                &d.frm_payload.0,
            ));
        }
    }

    let conf_f_cnt = if d.f_ctrl.ack { opts.conf_f_cnt } else { 0 };
    let mic = match (dir, is_1_1) {
        (Direction::Uplink, false) => {
            crypto::legacy_uplink_mic(require(session.f_nwk_s_int(), "NwkSKey")?, d.dev_addr, d.f_cnt, &out)
        }
        (Direction::Uplink, true) => crypto::uplink_mic_1_1(
            require(session.s_nwk_s_int_key.as_ref(), "SNwkSIntKey")?,
            require(session.f_nwk_s_int(), "FNwkSIntKey")?,
            conf_f_cnt,
            opts.tx_dr,
            opts.tx_ch,
            d.dev_addr,
            d.f_cnt,
            &out,
        ),
        (Direction::Downlink, false) => {
            crypto::downlink_mic(require(session.f_nwk_s_int(), "NwkSKey")?, 0, d.dev_addr, d.f_cnt, &out)
        }
        (Direction::Downlink, true) => crypto::downlink_mic(
            require(session.s_nwk_s_int_key.as_ref(), "SNwkSIntKey")?,
            conf_f_cnt,
            d.dev_addr,
            d.f_cnt,
            &out,
        ),
    };
    out.extend_from_slice(&mic);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::frame::{DlSettings, FCtrl, JoinRequestFrame};
    use crate::lorawan::types::{AesKey, DevAddr, HexBytes, MacVersion};
    use crate::lorawan::{decode, SessionKeys};

    fn legacy_opts() -> CodecOptions {
        CodecOptions {
            session: SessionKeys::legacy(
                "44024241ed4ce9a68c6a8bc055233fd3".parse().unwrap(),
                "ec925802ae430ca77fd3dd73cb2cc588".parse().unwrap(),
            ),
            ..Default::default()
        }
    }

    fn opts_1_1() -> CodecOptions {
        CodecOptions {
            mac_version: MacVersion::V1_1,
            session: SessionKeys {
                app_s_key: Some(AesKey([0x11; 16])),
                f_nwk_s_int_key: Some(AesKey([0x22; 16])),
                s_nwk_s_int_key: Some(AesKey([0x33; 16])),
                nwk_s_enc_key: Some(AesKey([0x44; 16])),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_known_uplink() {
        let frame = Frame::UnconfirmedUp(DataFrame {
            dev_addr: "49BE7DF1".parse().unwrap(),
            f_ctrl: FCtrl::default(),
            f_cnt: 2,
            f_opts: HexBytes::default(),
            f_port: Some(1),
            frm_payload: HexBytes(b"test".to_vec()),
        });
        let bytes = encode(&frame, &legacy_opts()).unwrap();
        assert_eq!(hex::encode_upper(&bytes), "40F17DBE4900020001954378762B11FF0D");
    }

    #[test]
    fn test_data_roundtrip_1_1_with_encrypted_f_opts() {
        let frame = Frame::ConfirmedUp(DataFrame {
            dev_addr: "26011234".parse().unwrap(),
            f_ctrl: FCtrl {
                adr: true,
                ..Default::default()
            },
            f_cnt: 0x0001_0005,
            // LinkCheckReq + DevStatusAns
            f_opts: HexBytes(vec![0x02, 0x06, 0xFE, 0x05]),
            f_port: Some(42),
            frm_payload: HexBytes(vec![1, 2, 3, 4, 5]),
        });
        let opts = opts_1_1();
        let bytes = encode(&frame, &opts).unwrap();

        let decoded = decode(&bytes, &opts).unwrap();
        assert!(decoded.warnings.is_empty(), "{:?}", decoded.warnings);
        assert_eq!(decoded.mic_valid, Some(true));
        assert_eq!(decoded.frame, frame);
        assert_eq!(decoded.mac_commands.len(), 2);
        assert_eq!(encode(&decoded.frame, &opts).unwrap(), bytes);
    }

    #[test]
    fn test_downlink_roundtrip_port_zero() {
        let frame = Frame::UnconfirmedDown(DataFrame {
            dev_addr: "26011234".parse().unwrap(),
            f_ctrl: FCtrl {
                f_pending: true,
                ..Default::default()
            },
            f_cnt: 7,
            f_opts: HexBytes::default(),
            f_port: Some(0),
            // DevStatusReq
            frm_payload: HexBytes(vec![0x06]),
        });
        let opts = legacy_opts();
        let bytes = encode(&frame, &opts).unwrap();
        let decoded = decode(&bytes, &opts).unwrap();
        assert_eq!(decoded.frame, frame);
        assert_eq!(decoded.mac_commands[0].name, "DevStatusReq");
    }

    #[test]
    fn test_join_request_roundtrip() {
        let frame = Frame::JoinRequest(JoinRequestFrame {
            join_eui: "70B3D57ED0000001".parse().unwrap(),
            dev_eui: "0004A30B001C0530".parse().unwrap(),
            dev_nonce: 0x0102,
        });
        let opts = CodecOptions {
            app_key: Some("5CF2BD4810FD92E9271050D2541A0F2B".parse().unwrap()),
            ..Default::default()
        };
        let bytes = encode(&frame, &opts).unwrap();
        assert_eq!(
            hex::encode(&bytes),
            "00010000d07ed5b37030051c000ba304000201b15bcee7"
        );
        let decoded = decode(&bytes, &opts).unwrap();
        assert_eq!(decoded.frame, frame);
        assert_eq!(decoded.mic_valid, Some(true));
    }

    #[test]
    fn test_join_accept_1_1_roundtrip() {
        let frame = Frame::JoinAccept(JoinAcceptFrame {
            join_nonce: 0x123456,
            net_id: "000013".parse().unwrap(),
            dev_addr: "26011234".parse().unwrap(),
            dl_settings: DlSettings {
                opt_neg: true,
                rx1_dr_offset: 0,
                rx2_dr: 3,
            },
            rx_delay: 1,
            cf_list: None,
            encrypted: None,
        });
        let opts = CodecOptions {
            mac_version: MacVersion::V1_1,
            app_key: Some("0F0E0D0C0B0A09080706050403020100".parse().unwrap()),
            nwk_key: Some("000102030405060708090A0B0C0D0E0F".parse().unwrap()),
            dev_eui: Some("0004A30B001C0530".parse().unwrap()),
            join_eui: Some("70B3D57ED0000001".parse().unwrap()),
            dev_nonce: Some(0x0102),
            ..Default::default()
        };
        let bytes = encode(&frame, &opts).unwrap();
        let decoded = decode(&bytes, &opts).unwrap();
        assert_eq!(decoded.frame, frame);
        assert_eq!(decoded.mic_valid, Some(true));
        let keys = decoded.session_keys.unwrap();
        assert_eq!(
            keys.nwk_s_enc_key.unwrap().to_string(),
            "00FD13C9DAEEF423274C213C20D88DF8"
        );
        assert_eq!(encode(&decoded.frame, &opts).unwrap(), bytes);
    }

    #[test]
    fn test_frm_payload_requires_port() {
        let frame = Frame::UnconfirmedUp(DataFrame {
            dev_addr: DevAddr::default(),
            f_ctrl: FCtrl::default(),
            f_cnt: 0,
            f_opts: HexBytes::default(),
            f_port: None,
            frm_payload: HexBytes(vec![1]),
        });
        assert_eq!(
            encode(&frame, &legacy_opts()).unwrap_err(),
            CodecError::MissingField("FPort")
        );
    }
}
