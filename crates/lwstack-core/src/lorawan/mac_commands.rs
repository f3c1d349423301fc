//! MAC command stream parsing and serialization.
//!
//! The grammar is direction sensitive: the same CID has a different payload
//! length (and meaning) on uplink and downlink, and a few commands only exist
//! in some bands.

use serde::{Deserialize, Serialize};

use super::band::Band;
use super::types::{Direction, HexBytes};
use crate::error::CodecError;

/// Known MAC command identifiers, with uplink and downlink payload lengths.
struct CommandSpec {
    cid: u8,
    uplink: Option<(&'static str, usize)>,
    downlink: Option<(&'static str, usize)>,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec { cid: 0x01, uplink: Some(("ResetInd", 1)), downlink: Some(("ResetConf", 1)) },
    CommandSpec { cid: 0x02, uplink: Some(("LinkCheckReq", 0)), downlink: Some(("LinkCheckAns", 2)) },
    CommandSpec { cid: 0x03, uplink: Some(("LinkADRAns", 1)), downlink: Some(("LinkADRReq", 4)) },
    CommandSpec { cid: 0x04, uplink: Some(("DutyCycleAns", 0)), downlink: Some(("DutyCycleReq", 1)) },
    CommandSpec { cid: 0x05, uplink: Some(("RxParamSetupAns", 1)), downlink: Some(("RxParamSetupReq", 4)) },
    CommandSpec { cid: 0x06, uplink: Some(("DevStatusAns", 2)), downlink: Some(("DevStatusReq", 0)) },
    CommandSpec { cid: 0x07, uplink: Some(("NewChannelAns", 1)), downlink: Some(("NewChannelReq", 5)) },
    CommandSpec { cid: 0x08, uplink: Some(("RxTimingSetupAns", 0)), downlink: Some(("RxTimingSetupReq", 1)) },
    CommandSpec { cid: 0x09, uplink: Some(("TxParamSetupAns", 0)), downlink: Some(("TxParamSetupReq", 1)) },
    CommandSpec { cid: 0x0A, uplink: Some(("DlChannelAns", 1)), downlink: Some(("DlChannelReq", 4)) },
    CommandSpec { cid: 0x0B, uplink: Some(("RekeyInd", 1)), downlink: Some(("RekeyConf", 1)) },
    CommandSpec { cid: 0x0C, uplink: Some(("ADRParamSetupAns", 0)), downlink: Some(("ADRParamSetupReq", 1)) },
    CommandSpec { cid: 0x0D, uplink: Some(("DeviceTimeReq", 0)), downlink: Some(("DeviceTimeAns", 5)) },
    CommandSpec { cid: 0x0E, uplink: None, downlink: Some(("ForceRejoinReq", 2)) },
    CommandSpec { cid: 0x0F, uplink: Some(("RejoinParamSetupAns", 1)), downlink: Some(("RejoinParamSetupReq", 1)) },
    CommandSpec { cid: 0x10, uplink: Some(("PingSlotInfoReq", 1)), downlink: Some(("PingSlotInfoAns", 0)) },
    CommandSpec { cid: 0x11, uplink: Some(("PingSlotChannelAns", 1)), downlink: Some(("PingSlotChannelReq", 4)) },
    CommandSpec { cid: 0x12, uplink: Some(("BeaconTimingReq", 0)), downlink: Some(("BeaconTimingAns", 3)) },
    CommandSpec { cid: 0x13, uplink: Some(("BeaconFreqAns", 1)), downlink: Some(("BeaconFreqReq", 3)) },
    CommandSpec { cid: 0x20, uplink: Some(("DeviceModeInd", 1)), downlink: Some(("DeviceModeConf", 1)) },
];

fn lookup(cid: u8, dir: Direction, band: &Band) -> Option<(&'static str, usize)> {
    if cid == 0x09 && !band.tx_param_setup {
        return None;
    }
    if (cid == 0x07 || cid == 0x0A) && !band.dynamic_channels {
        return None;
    }
    let entry = COMMANDS.iter().find(|c| c.cid == cid)?;
    match dir {
        Direction::Uplink => entry.uplink,
        Direction::Downlink => entry.downlink,
    }
}

/// A single MAC command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacCommand {
    pub cid: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub payload: HexBytes,
    #[serde(default, skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub fields: Option<serde_json::Value>,
}

impl MacCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.0.len());
        out.push(self.cid);
        out.extend_from_slice(&self.payload.0);
        out
    }
}

/// Result of parsing a MAC command buffer. `error` is set when parsing
/// stopped early; `commands` then holds everything read up to that point.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommands {
    pub commands: Vec<MacCommand>,
    pub error: Option<CodecError>,
}

impl ParsedCommands {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Parse a stream of MAC commands.
pub fn parse(buf: &[u8], dir: Direction, band: &Band) -> ParsedCommands {
    let mut parsed = ParsedCommands::default();
    let mut pos = 0;

    while pos < buf.len() {
        let cid = buf[pos];
        let Some((name, len)) = lookup(cid, dir, band) else {
            parsed.error = Some(CodecError::Malformed(format!(
                "unknown MAC command {:#04x} at offset {}",
                cid, pos
            )));
            break;
        };
        let end = pos + 1 + len;
        if end > buf.len() {
            parsed.error = Some(CodecError::Malformed(format!(
                "truncated {} at offset {}: need {} bytes, have {}",
                name,
                pos,
                len,
                buf.len() - pos - 1
            )));
            break;
        }
        let payload = &buf[pos + 1..end];
        parsed.commands.push(MacCommand {
            cid,
            name: name.to_string(),
            payload: HexBytes(payload.to_vec()),
            fields: describe(cid, dir, payload),
        });
        pos = end;
    }
    parsed
}

/// Serialize a list of MAC commands.
pub fn serialize(commands: &[MacCommand]) -> Vec<u8> {
    commands.iter().flat_map(MacCommand::to_bytes).collect()
}

fn freq(b: &[u8]) -> u64 {
    (u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64) * 100
}

/// Structured view of the commands operators most often inspect.
fn describe(cid: u8, dir: Direction, p: &[u8]) -> Option<serde_json::Value> {
    use serde_json::json;
    let v = match (dir, cid) {
        (Direction::Downlink, 0x02) => json!({"margin": p[0], "gateway_count": p[1]}),
        (Direction::Downlink, 0x03) => json!({
            "data_rate_index": p[0] >> 4,
            "tx_power_index": p[0] & 0x0F,
            "channel_mask": format!("{:016b}", u16::from_le_bytes([p[1], p[2]])),
            "channel_mask_control": (p[3] >> 4) & 0x07,
            "nb_trans": p[3] & 0x0F,
        }),
        (Direction::Uplink, 0x03) => json!({
            "power_ack": p[0] & 0x04 != 0,
            "data_rate_ack": p[0] & 0x02 != 0,
            "channel_mask_ack": p[0] & 0x01 != 0,
        }),
        (Direction::Downlink, 0x04) => json!({"max_duty_cycle": p[0] & 0x0F}),
        (Direction::Downlink, 0x05) => json!({
            "rx1_data_rate_offset": (p[0] >> 4) & 0x07,
            "rx2_data_rate_index": p[0] & 0x0F,
            "rx2_frequency": freq(&p[1..4]),
        }),
        (Direction::Uplink, 0x06) => json!({
            "battery": p[0],
            "margin": ((p[1] << 2) as i8) >> 2,
        }),
        (Direction::Downlink, 0x07) => json!({
            "channel_index": p[0],
            "frequency": freq(&p[1..4]),
            "min_data_rate_index": p[4] & 0x0F,
            "max_data_rate_index": p[4] >> 4,
        }),
        (Direction::Downlink, 0x08) => json!({"delay": p[0] & 0x0F}),
        (Direction::Downlink, 0x0D) => json!({
            "gps_time_seconds": u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            "fractional_second": p[4] as f64 / 256.0,
        }),
        (Direction::Uplink, 0x01) | (Direction::Downlink, 0x01) => json!({"minor_version": p[0] & 0x0F}),
        (Direction::Uplink, 0x0B) | (Direction::Downlink, 0x0B) => json!({"minor_version": p[0] & 0x0F}),
        _ => return None,
    };
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::band::{EU_863_870, US_902_928};

    #[test]
    fn test_parse_downlink_link_adr_and_status() {
        // LinkADRReq + DevStatusReq
        let buf = [0x03, 0x51, 0x07, 0x00, 0x01, 0x06];
        let parsed = parse(&buf, Direction::Downlink, &EU_863_870);
        assert!(parsed.is_complete());
        assert_eq!(parsed.commands.len(), 2);
        assert_eq!(parsed.commands[0].name, "LinkADRReq");
        let fields = parsed.commands[0].fields.as_ref().unwrap();
        assert_eq!(fields["data_rate_index"], 5);
        assert_eq!(fields["tx_power_index"], 1);
        assert_eq!(parsed.commands[1].name, "DevStatusReq");
    }

    #[test]
    fn test_direction_changes_lengths() {
        // 0x06 is DevStatusAns (2 bytes) on uplink
        let buf = [0x06, 0xFF, 0x3F];
        let up = parse(&buf, Direction::Uplink, &EU_863_870);
        assert!(up.is_complete());
        assert_eq!(up.commands[0].name, "DevStatusAns");

        let down = parse(&buf, Direction::Downlink, &EU_863_870);
        assert!(!down.is_complete());
    }

    #[test]
    fn test_truncated_stream_keeps_prefix() {
        let buf = [0x02, 0x03, 0x51];
        let parsed = parse(&buf, Direction::Uplink, &EU_863_870);
        assert_eq!(parsed.commands.len(), 2);
        assert!(parsed.error.is_none());

        let parsed = parse(&[0x02, 0x05], Direction::Uplink, &EU_863_870);
        assert_eq!(parsed.commands.len(), 1);
        assert!(parsed.error.is_some());
    }

    #[test]
    fn test_band_specific_commands() {
        let buf = [0x07, 0x00, 0x18, 0x4F, 0x84, 0x50];
        assert!(parse(&buf, Direction::Downlink, &EU_863_870).is_complete());
        assert!(!parse(&buf, Direction::Downlink, &US_902_928).is_complete());
    }
}
