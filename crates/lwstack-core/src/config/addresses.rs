//! Backend service roles and their addresses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Default port of the HTTP API when TLS is enabled.
pub const DEFAULT_TLS_PORT: u16 = 8885;
/// Default port of the HTTP API without TLS.
pub const DEFAULT_PLAIN_PORT: u16 = 1885;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    Identity,
    Gateway,
    Network,
    Application,
    Join,
    DeviceClaiming,
    DeviceTemplateConverter,
    QrCode,
    PacketBrokerAgent,
    OAuth,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 10] = [
        ServiceRole::Identity,
        ServiceRole::Gateway,
        ServiceRole::Network,
        ServiceRole::Application,
        ServiceRole::Join,
        ServiceRole::DeviceClaiming,
        ServiceRole::DeviceTemplateConverter,
        ServiceRole::QrCode,
        ServiceRole::PacketBrokerAgent,
        ServiceRole::OAuth,
    ];

    /// Prefix of the role's config keys and flags.
    pub fn key(&self) -> &'static str {
        match self {
            ServiceRole::Identity => "identity-server",
            ServiceRole::Gateway => "gateway-server",
            ServiceRole::Network => "network-server",
            ServiceRole::Application => "application-server",
            ServiceRole::Join => "join-server",
            ServiceRole::DeviceClaiming => "device-claiming-server",
            ServiceRole::DeviceTemplateConverter => "device-template-converter",
            ServiceRole::QrCode => "qr-code-generator",
            ServiceRole::PacketBrokerAgent => "packet-broker-agent",
            ServiceRole::OAuth => "oauth-server",
        }
    }

    /// Short name used in logs.
    pub fn short(&self) -> &'static str {
        match self {
            ServiceRole::Identity => "IS",
            ServiceRole::Gateway => "GS",
            ServiceRole::Network => "NS",
            ServiceRole::Application => "AS",
            ServiceRole::Join => "JS",
            ServiceRole::DeviceClaiming => "DCS",
            ServiceRole::DeviceTemplateConverter => "DTC",
            ServiceRole::QrCode => "QRG",
            ServiceRole::PacketBrokerAgent => "PBA",
            ServiceRole::OAuth => "OAuth",
        }
    }

    /// Error raised when the role is used while disabled.
    pub fn disabled_error(&self) -> ApiError {
        let name = format!("{}_disabled", self.key().replace('-', "_"));
        ApiError::failed_precondition(
            "cli",
            &name,
            format!("{} is disabled", self.key().replace('-', " ")),
        )
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub address: String,
    pub enabled: bool,
}

/// Address of every backend role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAddresses {
    entries: BTreeMap<ServiceRole, ServiceAddress>,
}

impl ServiceAddresses {
    /// All roles on one host, with default ports.
    pub fn for_host(host: &str, insecure: bool) -> Self {
        let mut addresses = Self::default();
        for role in ServiceRole::ALL {
            let address = match role {
                ServiceRole::OAuth => oauth_url(host, insecure),
                _ => with_default_port(host, insecure),
            };
            addresses.set(role, address, true);
        }
        addresses
    }

    pub fn set(&mut self, role: ServiceRole, address: impl Into<String>, enabled: bool) {
        self.entries.insert(
            role,
            ServiceAddress {
                address: address.into(),
                enabled,
            },
        );
    }

    pub fn set_enabled(&mut self, role: ServiceRole, enabled: bool) {
        if let Some(entry) = self.entries.get_mut(&role) {
            entry.enabled = enabled;
        }
    }

    pub fn is_enabled(&self, role: ServiceRole) -> bool {
        self.entries
            .get(&role)
            .is_some_and(|a| a.enabled && !a.address.is_empty())
    }

    /// Address of an enabled role.
    pub fn get(&self, role: ServiceRole) -> Result<&str, ApiError> {
        match self.entries.get(&role) {
            Some(a) if a.enabled && !a.address.is_empty() => Ok(&a.address),
            _ => Err(role.disabled_error()),
        }
    }

    /// Address of a role, enabled or not. Used to fill default server
    /// address fields on created entities.
    pub fn address(&self, role: ServiceRole) -> Option<&str> {
        self.entries
            .get(&role)
            .map(|a| a.address.as_str())
            .filter(|a| !a.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServiceRole, &ServiceAddress)> {
        self.entries.iter().map(|(r, a)| (*r, a))
    }

    /// Host part of every enabled address, sorted and deduplicated.
    pub fn known_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .entries
            .values()
            .filter(|a| a.enabled && !a.address.is_empty())
            .map(|a| host_of(&a.address).to_string())
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }
}

/// Append the default API port when the address has none.
pub fn with_default_port(address: &str, insecure: bool) -> String {
    if address.is_empty() || has_port(address) {
        return address.to_string();
    }
    let port = if insecure {
        DEFAULT_PLAIN_PORT
    } else {
        DEFAULT_TLS_PORT
    };
    format!("{}:{}", address, port)
}

pub fn oauth_url(host: &str, insecure: bool) -> String {
    let scheme = if insecure { "http" } else { "https" };
    let host = if insecure {
        with_default_port(host, true)
    } else {
        host.to_string()
    };
    format!("{}://{}/oauth", scheme, host)
}

fn has_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        // Bare IPv6 literals contain colons but no port.
        Some((host, port)) => {
            !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    }
}

/// Host name of an address or URL, without scheme, port or path.
pub fn host_of(address: &str) -> &str {
    let rest = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    let rest = rest.split('/').next().unwrap_or(rest);
    if rest.starts_with('[') {
        return rest
            .split_once(']')
            .map(|(h, _)| &h[1..])
            .unwrap_or(rest);
    }
    match rest.rsplit_once(':') {
        Some((host, _)) if has_port(rest) => host,
        _ => rest,
    }
}
