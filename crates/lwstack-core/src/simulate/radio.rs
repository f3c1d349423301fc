//! Synthetic radio metadata for simulated uplinks.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::ids::GatewayIds;
use crate::lorawan::band::{Band, Modulation};

/// Radio settings as given on the command line. Missing values are taken
/// from the band.
#[derive(Debug, Clone, Default)]
pub struct RadioSettings {
    pub frequency: Option<u64>,
    pub channel_index: Option<usize>,
    pub data_rate_index: Option<u8>,
    pub spreading_factor: Option<u8>,
    pub bandwidth: Option<u32>,
    pub rssi: Option<f32>,
    pub snr: Option<f32>,
    pub timestamp: Option<u32>,
    pub time: Option<DateTime<Utc>>,
}

/// Fully resolved radio metadata of one uplink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadioMetadata {
    pub frequency: u64,
    pub channel_index: usize,
    pub data_rate_index: u8,
    pub modulation: Modulation,
    pub rssi: f32,
    pub snr: f32,
    pub timestamp: u32,
    pub time: DateTime<Utc>,
}

const DEFAULT_RSSI: f32 = -42.0;
const DEFAULT_SNR: f32 = 4.2;

fn invalid(name: &str, message: String) -> ApiError {
    ApiError::invalid_argument("cli", name, message)
}

impl RadioSettings {
    pub fn resolve(&self, band: &Band) -> Result<RadioMetadata, ApiError> {
        let data_rate_index = match (self.data_rate_index, self.spreading_factor) {
            (Some(index), _) => index,
            (None, Some(sf)) => {
                let bw = self.bandwidth.unwrap_or(125_000);
                band.lora_data_rate_index(sf, bw).ok_or_else(|| {
                    invalid(
                        "data_rate",
                        format!("SF{}BW{} is not a data rate of {}", sf, bw / 1000, band.id),
                    )
                })?
            }
            (None, None) => band.lora_data_rate_index(7, 125_000).unwrap_or(0),
        };
        let data_rate = band.data_rate(data_rate_index).ok_or_else(|| {
            invalid(
                "data_rate",
                format!("data rate {} is not defined in {}", data_rate_index, band.id),
            )
        })?;

        let (frequency, channel_index) = match (self.frequency, self.channel_index) {
            (Some(frequency), Some(channel)) => (frequency, channel),
            (Some(frequency), None) => (frequency, band.uplink_channel(frequency).unwrap_or(0)),
            (None, channel) => {
                let channel = channel.unwrap_or(0);
                let frequency = band.uplink_frequency(channel).ok_or_else(|| {
                    invalid(
                        "frequency",
                        format!("channel {} is not a default channel of {}", channel, band.id),
                    )
                })?;
                (frequency, channel)
            }
        };

        let time = self.time.unwrap_or_else(Utc::now);
        Ok(RadioMetadata {
            frequency,
            channel_index,
            data_rate_index,
            modulation: data_rate.modulation,
            rssi: self.rssi.unwrap_or(DEFAULT_RSSI),
            snr: self.snr.unwrap_or(DEFAULT_SNR),
            // Concentrator counters are microseconds modulo 2^32.
            timestamp: self.timestamp.unwrap_or(time.timestamp_micros() as u32),
            time,
        })
    }
}

impl RadioMetadata {
    fn data_rate_json(&self) -> Value {
        match self.modulation {
            Modulation::Lora {
                spreading_factor,
                bandwidth,
            } => json!({ "lora": {
                "spreading_factor": spreading_factor,
                "bandwidth": bandwidth,
                "coding_rate": "4/5",
            }}),
            Modulation::Fsk { bit_rate } => json!({ "fsk": { "bit_rate": bit_rate } }),
        }
    }

    /// An uplink message as a gateway forwards it.
    pub fn uplink_message(&self, payload: &[u8], gateway: &GatewayIds) -> Value {
        let time = self.time.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        json!({
            "raw_payload": base64::engine::general_purpose::STANDARD.encode(payload),
            "settings": {
                "data_rate": self.data_rate_json(),
                "frequency": self.frequency.to_string(),
                "timestamp": self.timestamp,
                "time": time,
            },
            "rx_metadata": [{
                "gateway_ids": gateway,
                "time": time,
                "timestamp": self.timestamp,
                "rssi": self.rssi,
                "channel_rssi": self.rssi,
                "snr": self.snr,
                "channel_index": self.channel_index,
            }],
        })
    }
}
