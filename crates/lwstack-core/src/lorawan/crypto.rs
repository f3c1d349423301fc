//! LoRaWAN cryptographic primitives.
//!
//! AES-128 in the block layouts defined by LoRaWAN 1.0.x and 1.1: payload
//! encryption (CTR-style keystream over `A` blocks), MIC computation (AES-CMAC
//! over `B0`/`B1` prefixed messages), join-accept wrapping and session key
//! derivation.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use super::types::{AesKey, DevAddr, Direction, Eui64, NetId};

/// Frame-type constant placed in byte 4 of the `A` block.
pub const FRM_PAYLOAD_BLOCK: u8 = 0x00;
pub const F_OPTS_BLOCK: u8 = 0x01;

pub type Mic = [u8; 4];

fn cipher(key: &AesKey) -> Aes128 {
    Aes128::new(GenericArray::from_slice(&key.0))
}

/// Encrypt a single 16 byte block.
pub fn aes_encrypt_block(key: &AesKey, block: [u8; 16]) -> [u8; 16] {
    let mut b = GenericArray::from(block);
    cipher(key).encrypt_block(&mut b);
    b.into()
}

/// Decrypt a single 16 byte block.
pub fn aes_decrypt_block(key: &AesKey, block: [u8; 16]) -> [u8; 16] {
    let mut b = GenericArray::from(block);
    cipher(key).decrypt_block(&mut b);
    b.into()
}

fn cmac(key: &AesKey, parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(&key.0));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Encrypt or decrypt (the operation is symmetric) a FRMPayload or FOpts
/// buffer.
pub fn crypt_payload(
    key: &AesKey,
    dir: Direction,
    dev_addr: DevAddr,
    f_cnt: u32,
    frame_type: u8,
    payload: &[u8],
) -> Vec<u8> {
    let cipher = cipher(key);
    let mut out = Vec::with_capacity(payload.len());

    for (i, chunk) in payload.chunks(16).enumerate() {
        let mut a = [0u8; 16];
        a[0] = 0x01;
        a[4] = frame_type;
        a[5] = dir.byte();
        a[6..10].copy_from_slice(&dev_addr.to_le_bytes());
        a[10..14].copy_from_slice(&f_cnt.to_le_bytes());
        a[15] = (i + 1) as u8;

        let mut s = GenericArray::from(a);
        cipher.encrypt_block(&mut s);
        out.extend(chunk.iter().zip(s.iter()).map(|(p, k)| p ^ k));
    }
    out
}

fn b_block(
    first: [u8; 5],
    dir: Direction,
    dev_addr: DevAddr,
    f_cnt: u32,
    msg_len: usize,
) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[..5].copy_from_slice(&first);
    b[5] = dir.byte();
    b[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b[10..14].copy_from_slice(&f_cnt.to_le_bytes());
    b[15] = msg_len as u8;
    b
}

fn truncate(full: [u8; 16]) -> Mic {
    [full[0], full[1], full[2], full[3]]
}

/// Uplink MIC for LoRaWAN 1.0.x, keyed with NwkSKey.
pub fn legacy_uplink_mic(key: &AesKey, dev_addr: DevAddr, f_cnt: u32, msg: &[u8]) -> Mic {
    let b0 = b_block([0x49, 0, 0, 0, 0], Direction::Uplink, dev_addr, f_cnt, msg.len());
    truncate(cmac(key, &[&b0, msg]))
}

/// Uplink MIC for LoRaWAN 1.1: two halves from SNwkSIntKey (over `B1`) and
/// FNwkSIntKey (over `B0`).
#[allow(clippy::too_many_arguments)]
pub fn uplink_mic_1_1(
    s_nwk_s_int_key: &AesKey,
    f_nwk_s_int_key: &AesKey,
    conf_f_cnt: u16,
    tx_dr: u8,
    tx_ch: u8,
    dev_addr: DevAddr,
    f_cnt: u32,
    msg: &[u8],
) -> Mic {
    let b0 = b_block([0x49, 0, 0, 0, 0], Direction::Uplink, dev_addr, f_cnt, msg.len());
    let conf = conf_f_cnt.to_le_bytes();
    let b1 = b_block(
        [0x49, conf[0], conf[1], tx_dr, tx_ch],
        Direction::Uplink,
        dev_addr,
        f_cnt,
        msg.len(),
    );
    let f = cmac(f_nwk_s_int_key, &[&b0, msg]);
    let s = cmac(s_nwk_s_int_key, &[&b1, msg]);
    [s[0], s[1], f[0], f[1]]
}

/// Downlink MIC. `conf_f_cnt` is the counter of the acknowledged confirmed
/// uplink on 1.1 and zero otherwise.
pub fn downlink_mic(
    key: &AesKey,
    conf_f_cnt: u16,
    dev_addr: DevAddr,
    f_cnt: u32,
    msg: &[u8],
) -> Mic {
    let conf = conf_f_cnt.to_le_bytes();
    let b0 = b_block(
        [0x49, conf[0], conf[1], 0, 0],
        Direction::Downlink,
        dev_addr,
        f_cnt,
        msg.len(),
    );
    truncate(cmac(key, &[&b0, msg]))
}

/// MIC over a join-request or rejoin-request (MHDR through DevNonce).
pub fn join_request_mic(key: &AesKey, msg: &[u8]) -> Mic {
    truncate(cmac(key, &[msg]))
}

/// Join-accept MIC for LoRaWAN 1.0.x (and 1.1 without OptNeg).
pub fn legacy_join_accept_mic(key: &AesKey, msg: &[u8]) -> Mic {
    truncate(cmac(key, &[msg]))
}

/// Join-accept MIC for LoRaWAN 1.1 with OptNeg set.
pub fn join_accept_mic_1_1(
    js_int_key: &AesKey,
    join_req_type: u8,
    join_eui: Eui64,
    dev_nonce: u16,
    msg: &[u8],
) -> Mic {
    truncate(cmac(
        js_int_key,
        &[
            &[join_req_type],
            &join_eui.to_le_bytes(),
            &dev_nonce.to_le_bytes(),
            msg,
        ],
    ))
}

/// Encrypt a join-accept payload (including its MIC). The network side
/// uses the AES decrypt operation so the device only needs encrypt.
pub fn encrypt_join_accept(key: &AesKey, plaintext: &[u8]) -> Vec<u8> {
    plaintext
        .chunks(16)
        .flat_map(|chunk| {
            let mut block = [0u8; 16];
            block[..chunk.len()].copy_from_slice(chunk);
            aes_decrypt_block(key, block)
        })
        .collect()
}

/// Decrypt a join-accept payload.
pub fn decrypt_join_accept(key: &AesKey, ciphertext: &[u8]) -> Vec<u8> {
    ciphertext
        .chunks(16)
        .flat_map(|chunk| {
            let mut block = [0u8; 16];
            block[..chunk.len()].copy_from_slice(chunk);
            aes_encrypt_block(key, block)
        })
        .take(ciphertext.len())
        .collect()
}

fn derive(key: &AesKey, prefix: u8, fields: &[&[u8]]) -> AesKey {
    let mut block = [0u8; 16];
    block[0] = prefix;
    let mut pos = 1;
    for f in fields {
        block[pos..pos + f.len()].copy_from_slice(f);
        pos += f.len();
    }
    AesKey(aes_encrypt_block(key, block))
}

/// Legacy (1.0.x) session keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySessionKeys {
    pub nwk_s_key: AesKey,
    pub app_s_key: AesKey,
}

/// LoRaWAN 1.1 session keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys1_1 {
    pub f_nwk_s_int_key: AesKey,
    pub s_nwk_s_int_key: AesKey,
    pub nwk_s_enc_key: AesKey,
    pub app_s_key: AesKey,
}

/// Derive NwkSKey and AppSKey from a root key, JoinNonce, NetID and DevNonce.
pub fn derive_legacy_session_keys(
    root_key: &AesKey,
    join_nonce: u32,
    net_id: NetId,
    dev_nonce: u16,
) -> LegacySessionKeys {
    let jn_bytes = join_nonce.to_le_bytes();
    let jn = &jn_bytes[..3];
    let nid = net_id.to_le_bytes();
    let dn = dev_nonce.to_le_bytes();
    LegacySessionKeys {
        nwk_s_key: derive(root_key, 0x01, &[jn, &nid, &dn]),
        app_s_key: derive(root_key, 0x02, &[jn, &nid, &dn]),
    }
}

/// Derive the 1.1 session keys (OptNeg set).
pub fn derive_session_keys_1_1(
    nwk_key: &AesKey,
    app_key: &AesKey,
    join_nonce: u32,
    join_eui: Eui64,
    dev_nonce: u16,
) -> SessionKeys1_1 {
    let jn_bytes = join_nonce.to_le_bytes();
    let jn = &jn_bytes[..3];
    let je = join_eui.to_le_bytes();
    let dn = dev_nonce.to_le_bytes();
    SessionKeys1_1 {
        f_nwk_s_int_key: derive(nwk_key, 0x01, &[jn, &je, &dn]),
        app_s_key: derive(app_key, 0x02, &[jn, &je, &dn]),
        s_nwk_s_int_key: derive(nwk_key, 0x03, &[jn, &je, &dn]),
        nwk_s_enc_key: derive(nwk_key, 0x04, &[jn, &je, &dn]),
    }
}

pub fn derive_js_int_key(nwk_key: &AesKey, dev_eui: Eui64) -> AesKey {
    derive(nwk_key, 0x06, &[&dev_eui.to_le_bytes()])
}

pub fn derive_js_enc_key(nwk_key: &AesKey, dev_eui: Eui64) -> AesKey {
    derive(nwk_key, 0x05, &[&dev_eui.to_le_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> AesKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_legacy_uplink_vector() {
        let frame = hex::decode("40F17DBE4900020001954378762B11FF0D").unwrap();
        let nwk_s_key = key("44024241ed4ce9a68c6a8bc055233fd3");
        let app_s_key = key("ec925802ae430ca77fd3dd73cb2cc588");
        let dev_addr = DevAddr::from_le_slice(&frame[1..5]).unwrap();
        assert_eq!(dev_addr.to_string(), "49BE7DF1");

        let mic = legacy_uplink_mic(&nwk_s_key, dev_addr, 2, &frame[..frame.len() - 4]);
        assert_eq!(&mic, &frame[frame.len() - 4..]);

        let plain = crypt_payload(
            &app_s_key,
            Direction::Uplink,
            dev_addr,
            2,
            FRM_PAYLOAD_BLOCK,
            &frame[9..frame.len() - 4],
        );
        assert_eq!(plain, b"test");
    }

    #[test]
    fn test_join_accept_wrap_unwrap() {
        let app_key = key("5CF2BD4810FD92E9271050D2541A0F2B");
        let plain = hex::decode("0d000000000000f8f97f0003").unwrap();
        let mic = legacy_join_accept_mic(&app_key, &[&[0x20u8][..], &plain[..]].concat());
        let with_mic = [plain.clone(), mic.to_vec()].concat();
        let enc = encrypt_join_accept(&app_key, &with_mic);
        assert_eq!(decrypt_join_accept(&app_key, &enc), with_mic);
    }

    #[test]
    fn test_legacy_key_derivation() {
        let app_key = key("5CF2BD4810FD92E9271050D2541A0F2B");
        let keys = derive_legacy_session_keys(&app_key, 0x0D, NetId::default(), 1);
        assert_eq!(keys.nwk_s_key.to_string(), "50D8478614C2E26BCCEA049E5618ECAC");
        assert_eq!(keys.app_s_key.to_string(), "92058C025EEF46018540314AFF74DA25");
    }

    #[test]
    fn test_key_derivation_1_1() {
        let nwk_key = key("000102030405060708090A0B0C0D0E0F");
        let app_key = key("0F0E0D0C0B0A09080706050403020100");
        let join_eui: Eui64 = "70B3D57ED0000001".parse().unwrap();
        let dev_eui: Eui64 = "0004A30B001C0530".parse().unwrap();
        let keys = derive_session_keys_1_1(&nwk_key, &app_key, 0x123456, join_eui, 0x0102);
        assert_eq!(keys.f_nwk_s_int_key.to_string(), "75107F8EC911F4B9E7CB46036F19D4AF");
        assert_eq!(keys.s_nwk_s_int_key.to_string(), "D178A92E35E01606592AC7AF8B65CC65");
        assert_eq!(keys.nwk_s_enc_key.to_string(), "00FD13C9DAEEF423274C213C20D88DF8");
        assert_eq!(keys.app_s_key.to_string(), "5F394829A57E66080352FA6FDD22890A");
        assert_eq!(
            derive_js_int_key(&nwk_key, dev_eui).to_string(),
            "B83B807D2618F007EAFC05168DC18CDB"
        );
        assert_eq!(
            derive_js_enc_key(&nwk_key, dev_eui).to_string(),
            "E1E0234256F2F99093312B498064D4C1"
        );
    }

    #[test]
    fn test_join_request_mic() {
        let app_key = key("5CF2BD4810FD92E9271050D2541A0F2B");
        let frame = hex::decode("00010000d07ed5b37030051c000ba304000201b15bcee7").unwrap();
        let mic = join_request_mic(&app_key, &frame[..19]);
        assert_eq!(&mic, &frame[19..]);
    }
}
