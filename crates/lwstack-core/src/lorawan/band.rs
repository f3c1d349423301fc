//! Regional band catalogue.
//!
//! A deliberately small subset of the regional parameters: enough data-rate
//! and channel information to synthesise radio metadata for simulated
//! uplinks and to pick the right MAC command grammar.

use serde::Serialize;

/// Modulation of a data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    Lora {
        spreading_factor: u8,
        bandwidth: u32,
    },
    Fsk {
        bit_rate: u32,
    },
}

/// A data rate table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataRate {
    pub index: u8,
    pub modulation: Modulation,
}

const fn lora(index: u8, spreading_factor: u8, bandwidth: u32) -> DataRate {
    DataRate {
        index,
        modulation: Modulation::Lora {
            spreading_factor,
            bandwidth,
        },
    }
}

const fn fsk(index: u8, bit_rate: u32) -> DataRate {
    DataRate {
        index,
        modulation: Modulation::Fsk { bit_rate },
    }
}

/// Regional band definition.
#[derive(Debug)]
pub struct Band {
    pub id: &'static str,
    pub data_rates: &'static [DataRate],
    /// Frequency of the first default uplink channel in Hz.
    pub uplink_base: u64,
    /// Channel spacing in Hz.
    pub uplink_spacing: u64,
    pub uplink_channels: usize,
    /// Whether TxParamSetupReq is part of the MAC command set.
    pub tx_param_setup: bool,
    /// Whether NewChannelReq / DlChannelReq are part of the MAC command set.
    pub dynamic_channels: bool,
}

impl Band {
    pub fn data_rate(&self, index: u8) -> Option<&DataRate> {
        self.data_rates.iter().find(|dr| dr.index == index)
    }

    /// Find the data rate index for a LoRa spreading factor and bandwidth.
    pub fn lora_data_rate_index(&self, spreading_factor: u8, bandwidth: u32) -> Option<u8> {
        self.data_rates.iter().find_map(|dr| match dr.modulation {
            Modulation::Lora {
                spreading_factor: sf,
                bandwidth: bw,
            } if sf == spreading_factor && bw == bandwidth => Some(dr.index),
            _ => None,
        })
    }

    pub fn uplink_frequency(&self, channel: usize) -> Option<u64> {
        (channel < self.uplink_channels)
            .then(|| self.uplink_base + self.uplink_spacing * channel as u64)
    }

    /// Channel index of an uplink frequency.
    pub fn uplink_channel(&self, frequency: u64) -> Option<usize> {
        if frequency < self.uplink_base || self.uplink_spacing == 0 {
            return None;
        }
        let offset = frequency - self.uplink_base;
        let index = (offset / self.uplink_spacing) as usize;
        (offset % self.uplink_spacing == 0 && index < self.uplink_channels).then_some(index)
    }
}

const EU_DATA_RATES: &[DataRate] = &[
    lora(0, 12, 125_000),
    lora(1, 11, 125_000),
    lora(2, 10, 125_000),
    lora(3, 9, 125_000),
    lora(4, 8, 125_000),
    lora(5, 7, 125_000),
    lora(6, 7, 250_000),
    fsk(7, 50_000),
];

const US_DATA_RATES: &[DataRate] = &[
    lora(0, 10, 125_000),
    lora(1, 9, 125_000),
    lora(2, 8, 125_000),
    lora(3, 7, 125_000),
    lora(4, 8, 500_000),
    lora(8, 12, 500_000),
    lora(9, 11, 500_000),
    lora(10, 10, 500_000),
    lora(11, 9, 500_000),
    lora(12, 8, 500_000),
    lora(13, 7, 500_000),
];

const AU_DATA_RATES: &[DataRate] = &[
    lora(0, 12, 125_000),
    lora(1, 11, 125_000),
    lora(2, 10, 125_000),
    lora(3, 9, 125_000),
    lora(4, 8, 125_000),
    lora(5, 7, 125_000),
    lora(6, 8, 500_000),
    lora(8, 12, 500_000),
    lora(9, 11, 500_000),
    lora(10, 10, 500_000),
    lora(11, 9, 500_000),
    lora(12, 8, 500_000),
    lora(13, 7, 500_000),
];

pub static EU_863_870: Band = Band {
    id: "EU_863_870",
    data_rates: EU_DATA_RATES,
    uplink_base: 868_100_000,
    uplink_spacing: 200_000,
    uplink_channels: 3,
    tx_param_setup: false,
    dynamic_channels: true,
};

pub static US_902_928: Band = Band {
    id: "US_902_928",
    data_rates: US_DATA_RATES,
    uplink_base: 902_300_000,
    uplink_spacing: 200_000,
    uplink_channels: 64,
    tx_param_setup: false,
    dynamic_channels: false,
};

pub static AU_915_928: Band = Band {
    id: "AU_915_928",
    data_rates: AU_DATA_RATES,
    uplink_base: 915_200_000,
    uplink_spacing: 200_000,
    uplink_channels: 64,
    tx_param_setup: true,
    dynamic_channels: false,
};

pub static AS_923: Band = Band {
    id: "AS_923",
    data_rates: EU_DATA_RATES,
    uplink_base: 923_200_000,
    uplink_spacing: 200_000,
    uplink_channels: 2,
    tx_param_setup: true,
    dynamic_channels: true,
};

pub static ALL: &[&Band] = &[&EU_863_870, &US_902_928, &AU_915_928, &AS_923];

/// Look up a band by ID.
pub fn by_id(id: &str) -> Option<&'static Band> {
    ALL.iter().copied().find(|b| b.id.eq_ignore_ascii_case(id))
}

/// Resolve a frequency plan ID (e.g. `EU_863_870_TTN`) to its band.
pub fn for_frequency_plan(frequency_plan_id: &str) -> Option<&'static Band> {
    let upper = frequency_plan_id.to_ascii_uppercase();
    ALL.iter().copied().find(|b| upper.starts_with(b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_plan_lookup() {
        assert_eq!(for_frequency_plan("EU_863_870_TTN").unwrap().id, "EU_863_870");
        assert_eq!(for_frequency_plan("US_902_928_FSB_2").unwrap().id, "US_902_928");
        assert_eq!(for_frequency_plan("AS_923_925").unwrap().id, "AS_923");
        assert!(for_frequency_plan("CN_470_510").is_none());
    }

    #[test]
    fn test_data_rate_lookup() {
        assert_eq!(EU_863_870.lora_data_rate_index(7, 125_000), Some(5));
        assert_eq!(US_902_928.lora_data_rate_index(8, 500_000), Some(4));
        assert!(EU_863_870.data_rate(7).is_some());
    }

    #[test]
    fn test_uplink_channels() {
        assert_eq!(EU_863_870.uplink_frequency(1), Some(868_300_000));
        assert_eq!(EU_863_870.uplink_channel(868_500_000), Some(2));
        assert_eq!(US_902_928.uplink_channel(902_300_000), Some(0));
        assert_eq!(EU_863_870.uplink_frequency(3), None);
    }
}
