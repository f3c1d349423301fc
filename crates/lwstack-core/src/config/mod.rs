//! Configuration loading.
//!
//! Configuration comes from three layers: a YAML file, the environment and
//! command-line flags. The CLI parses the last two into a [`ConfigFile`] of
//! overrides, which is merged over the file layer and resolved into an
//! immutable [`Config`].

pub mod addresses;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
pub use addresses::{ServiceAddress, ServiceAddresses, ServiceRole};

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = ".lwstack.yml";

pub const DEFAULT_CREDENTIALS_ID: &str = "localhost";
pub const DEFAULT_VERSION_CHECK_URL: &str =
    "https://api.github.com/repos/lwstack/lwstack/releases/latest";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetrySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_metadata: Option<bool>,
}

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_unknown_hosts: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_server_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_server_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_server_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_server_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_server_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_server_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_claiming_server_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_template_converter_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_generator_grpc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_broker_agent_grpc_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_server_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_server_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_server_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_server_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_server_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_claiming_server_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_template_converter_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_generator_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_broker_agent_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_version_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_check_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
}

macro_rules! merge_fields {
    ($base:ident, $over:ident, $($field:ident),* $(,)?) => {
        $( if $over.$field.is_some() { $base.$field = $over.$field; } )*
    };
}

impl ConfigFile {
    /// Read a config file. A missing file yields an empty layer.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Parse {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Overlay `over` onto `self`; values set in `over` win.
    pub fn merge(mut self, over: ConfigFile) -> Self {
        let base = &mut self;
        merge_fields!(
            base,
            over,
            credentials_id,
            input_format,
            output_format,
            insecure,
            ca,
            allow_unknown_hosts,
            oauth_server_address,
            identity_server_grpc_address,
            gateway_server_grpc_address,
            network_server_grpc_address,
            application_server_grpc_address,
            join_server_grpc_address,
            device_claiming_server_grpc_address,
            device_template_converter_grpc_address,
            qr_code_generator_grpc_address,
            packet_broker_agent_grpc_address,
            identity_server_enabled,
            gateway_server_enabled,
            network_server_enabled,
            application_server_enabled,
            join_server_enabled,
            device_claiming_server_enabled,
            device_template_converter_enabled,
            qr_code_generator_enabled,
            packet_broker_agent_enabled,
            skip_version_check,
            version_check_url,
            request_timeout,
        );
        if let Some(log) = over.log {
            let current = base.log.get_or_insert_with(LogSection::default);
            if log.level.is_some() {
                current.level = log.level;
            }
        }
        if let Some(retry) = over.retry {
            let current = base.retry.get_or_insert_with(RetrySection::default);
            merge_fields!(current, retry, max, default_timeout, enable_metadata);
        }
        self
    }

    fn address(&self, role: ServiceRole) -> Option<&String> {
        match role {
            ServiceRole::Identity => self.identity_server_grpc_address.as_ref(),
            ServiceRole::Gateway => self.gateway_server_grpc_address.as_ref(),
            ServiceRole::Network => self.network_server_grpc_address.as_ref(),
            ServiceRole::Application => self.application_server_grpc_address.as_ref(),
            ServiceRole::Join => self.join_server_grpc_address.as_ref(),
            ServiceRole::DeviceClaiming => self.device_claiming_server_grpc_address.as_ref(),
            ServiceRole::DeviceTemplateConverter => {
                self.device_template_converter_grpc_address.as_ref()
            }
            ServiceRole::QrCode => self.qr_code_generator_grpc_address.as_ref(),
            ServiceRole::PacketBrokerAgent => self.packet_broker_agent_grpc_address.as_ref(),
            ServiceRole::OAuth => self.oauth_server_address.as_ref(),
        }
    }

    fn enabled(&self, role: ServiceRole) -> Option<bool> {
        match role {
            ServiceRole::Identity => self.identity_server_enabled,
            ServiceRole::Gateway => self.gateway_server_enabled,
            ServiceRole::Network => self.network_server_enabled,
            ServiceRole::Application => self.application_server_enabled,
            ServiceRole::Join => self.join_server_enabled,
            ServiceRole::DeviceClaiming => self.device_claiming_server_enabled,
            ServiceRole::DeviceTemplateConverter => self.device_template_converter_enabled,
            ServiceRole::QrCode => self.qr_code_generator_enabled,
            ServiceRole::PacketBrokerAgent => self.packet_broker_agent_enabled,
            ServiceRole::OAuth => None,
        }
    }

    /// Resolve defaults.
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let insecure = self.insecure.unwrap_or(false);
        let mut addresses = ServiceAddresses::for_host("localhost", insecure);
        for role in ServiceRole::ALL {
            let enabled = self.enabled(role).unwrap_or(true);
            match self.address(role) {
                Some(address) if role == ServiceRole::OAuth => {
                    addresses.set(role, address.clone(), enabled)
                }
                Some(address) => {
                    addresses.set(role, addresses::with_default_port(address, insecure), enabled)
                }
                None => addresses.set_enabled(role, enabled),
            }
        }

        let retry = self.retry.unwrap_or_default();
        let default_timeout = match retry.default_timeout {
            Some(raw) => parse_duration(&raw).map_err(|message| ConfigError::InvalidValue {
                key: "retry.default-timeout".to_string(),
                message,
            })?,
            None => Duration::from_millis(50),
        };
        let request_timeout = match self.request_timeout {
            Some(raw) => parse_duration(&raw).map_err(|message| ConfigError::InvalidValue {
                key: "request-timeout".to_string(),
                message,
            })?,
            None => Duration::from_secs(30),
        };

        Ok(Config {
            credentials_id: self
                .credentials_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| {
                    addresses
                        .address(ServiceRole::Identity)
                        .map(|a| addresses::host_of(a).to_string())
                        .unwrap_or_else(|| DEFAULT_CREDENTIALS_ID.to_string())
                }),
            log_level: self
                .log
                .and_then(|l| l.level)
                .unwrap_or_else(|| "info".to_string()),
            input_format: self.input_format.unwrap_or_else(|| "json".to_string()),
            output_format: self.output_format.unwrap_or_else(|| "json".to_string()),
            insecure,
            ca: self.ca,
            allow_unknown_hosts: self.allow_unknown_hosts.unwrap_or(false),
            addresses,
            retry_max: retry.max.unwrap_or(5),
            retry_default_timeout: default_timeout,
            retry_enable_metadata: retry.enable_metadata.unwrap_or(true),
            skip_version_check: self.skip_version_check.unwrap_or(false),
            version_check_url: self
                .version_check_url
                .unwrap_or_else(|| DEFAULT_VERSION_CHECK_URL.to_string()),
            request_timeout,
        })
    }
}

/// Merged run-time configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials_id: String,
    pub log_level: String,
    pub input_format: String,
    pub output_format: String,
    pub insecure: bool,
    pub ca: Option<PathBuf>,
    pub allow_unknown_hosts: bool,
    pub addresses: ServiceAddresses,
    pub retry_max: u32,
    pub retry_default_timeout: Duration,
    pub retry_enable_metadata: bool,
    pub skip_version_check: bool,
    pub version_check_url: String,
    pub request_timeout: Duration,
}

/// Locate the config file: an explicit path, else the working directory,
/// else the user config directory.
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    default_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

/// Per-user configuration directory.
pub fn default_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lwstack").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Config file contents written by `use <host>`.
pub fn config_for_host(host: &str, insecure: bool, grpc_port: Option<u16>, ca: Option<PathBuf>) -> ConfigFile {
    let address = match grpc_port {
        Some(port) => format!("{}:{}", host, port),
        None => addresses::with_default_port(host, insecure),
    };
    ConfigFile {
        credentials_id: Some(host.to_string()),
        insecure: insecure.then_some(true),
        ca,
        oauth_server_address: Some(addresses::oauth_url(host, insecure)),
        identity_server_grpc_address: Some(address.clone()),
        gateway_server_grpc_address: Some(address.clone()),
        network_server_grpc_address: Some(address.clone()),
        application_server_grpc_address: Some(address.clone()),
        join_server_grpc_address: Some(address.clone()),
        device_claiming_server_grpc_address: Some(address.clone()),
        device_template_converter_grpc_address: Some(address.clone()),
        qr_code_generator_grpc_address: Some(address.clone()),
        packet_broker_agent_grpc_address: Some(address),
        ..Default::default()
    }
}

/// Write a config file, refusing to overwrite unless asked.
pub fn write_config_file(path: &Path, config: &ConfigFile, overwrite: bool) -> Result<(), ConfigError> {
    if path.exists() && !overwrite {
        return Err(ConfigError::FileExists(path.display().to_string()));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::Parse {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
    }
    let content = serde_yaml::to_string(config).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    std::fs::write(path, content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Parse durations such as `50ms`, `2s`, `1m30s` or `1h`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in `{}`", raw))?;
        if digits == 0 {
            return Err(format!("invalid duration `{}`", raw));
        }
        let number: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration `{}`", raw))?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ms" => number / 1000.0,
            "s" => number,
            "m" => number * 60.0,
            "h" => number * 3600.0,
            unit => return Err(format!("unknown unit `{}` in `{}`", unit, raw)),
        };
        total += Duration::from_secs_f64(seconds);
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_layers_merge_in_order() {
        let file: ConfigFile = serde_yaml::from_str(
            "credentials-id: file\nlog:\n  level: debug\nretry:\n  max: 3\njoin-server-enabled: false\n",
        )
        .unwrap();
        let flags = ConfigFile {
            credentials_id: Some("flags".to_string()),
            retry: Some(RetrySection {
                default_timeout: Some("1s".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = file.merge(flags).resolve().unwrap();
        assert_eq!(config.credentials_id, "flags");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry_max, 3);
        assert_eq!(config.retry_default_timeout, Duration::from_secs(1));
        assert!(!config.addresses.is_enabled(ServiceRole::Join));
        assert!(config.addresses.is_enabled(ServiceRole::Network));
    }

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default().resolve().unwrap();
        assert_eq!(config.retry_max, 5);
        assert_eq!(config.retry_default_timeout, Duration::from_millis(50));
        assert_eq!(config.credentials_id, "localhost");
        assert_eq!(
            config.addresses.get(ServiceRole::Identity).unwrap(),
            "localhost:8885"
        );
    }

    #[test]
    fn test_write_config_file_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = config_for_host("eu1.example.com", false, None, None);
        write_config_file(&path, &config, false).unwrap();
        assert!(matches!(
            write_config_file(&path, &config, false),
            Err(ConfigError::FileExists(_))
        ));
        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(
            loaded.network_server_grpc_address.as_deref(),
            Some("eu1.example.com:8885")
        );
    }
}
