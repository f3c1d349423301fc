//! Packet Broker Agent: registration, networks, routing policies and
//! gateway visibility.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::registry::take_list;
use crate::schema::rpcs;

/// Which uplink message classes are forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkPolicy {
    pub join_request: bool,
    pub mac_data: bool,
    pub application_data: bool,
    pub signal_quality: bool,
    pub localization: bool,
}

/// Which downlink message classes are forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownlinkPolicy {
    pub join_accept: bool,
    pub mac_data: bool,
    pub application_data: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    pub uplink: UplinkPolicy,
    pub downlink: DownlinkPolicy,
}

fn unknown_class(direction: &str, class: &str) -> ApiError {
    ApiError::invalid_argument(
        "cli",
        "routing_policy",
        format!("unknown {} policy `{}`", direction, class),
    )
    .with_attribute("policy", class)
}

impl UplinkPolicy {
    /// Parse `all`, `none` or a comma separated list of message classes.
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let mut policy = Self::default();
        for class in input.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            match class {
                "all" => {
                    policy = Self {
                        join_request: true,
                        mac_data: true,
                        application_data: true,
                        signal_quality: true,
                        localization: true,
                    }
                }
                "none" => policy = Self::default(),
                "join-request" | "join_request" => policy.join_request = true,
                "mac-data" | "mac_data" => policy.mac_data = true,
                "application-data" | "application_data" => policy.application_data = true,
                "signal-quality" | "signal_quality" => policy.signal_quality = true,
                "localization" => policy.localization = true,
                other => return Err(unknown_class("uplink", other)),
            }
        }
        Ok(policy)
    }
}

impl DownlinkPolicy {
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let mut policy = Self::default();
        for class in input.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            match class {
                "all" => {
                    policy = Self {
                        join_accept: true,
                        mac_data: true,
                        application_data: true,
                    }
                }
                "none" => policy = Self::default(),
                "join-accept" | "join_accept" => policy.join_accept = true,
                "mac-data" | "mac_data" => policy.mac_data = true,
                "application-data" | "application_data" => policy.application_data = true,
                other => return Err(unknown_class("downlink", other)),
            }
        }
        Ok(policy)
    }
}

/// A home network, or the default policy when `net_id` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HomeNetwork {
    pub net_id: Option<u32>,
    pub tenant_id: Option<String>,
}

impl HomeNetwork {
    /// Parse `<NetID hex>[/<tenant>]`, or `default`.
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        if input == "default" {
            return Ok(Self::default());
        }
        let (net_id, tenant_id) = match input.split_once('/') {
            Some((net_id, tenant)) => (net_id, Some(tenant.to_string())),
            None => (input, None),
        };
        let net_id = u32::from_str_radix(net_id.trim_start_matches("0x"), 16).map_err(|e| {
            ApiError::invalid_argument("cli", "net_id", format!("invalid NetID `{}`: {}", net_id, e))
        })?;
        Ok(Self {
            net_id: Some(net_id),
            tenant_id,
        })
    }

    fn ids(&self) -> Option<Value> {
        let net_id = self.net_id?;
        let mut ids = json!({ "net_id": net_id });
        if let Some(tenant_id) = &self.tenant_id {
            ids["tenant_id"] = json!(tenant_id);
        }
        Some(ids)
    }
}

async fn call(client: &ApiClient, method: &str, body: Value) -> Result<Value, CoreError> {
    client.call(ServiceRole::PacketBrokerAgent, method, body).await
}

pub async fn info(client: &ApiClient) -> Result<Value, CoreError> {
    call(client, rpcs::PBA_GET_INFO, json!({})).await
}

/// Register the network, optionally listing it publicly.
pub async fn register(client: &ApiClient, listed: Option<bool>) -> Result<Value, CoreError> {
    let body = match listed {
        Some(listed) => json!({ "listed": listed }),
        None => json!({}),
    };
    call(client, rpcs::PBA_REGISTER, body).await
}

pub async fn deregister(client: &ApiClient) -> Result<(), CoreError> {
    call(client, rpcs::PBA_DEREGISTER, json!({})).await?;
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkFilter {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub with_routing_policy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

pub async fn list_networks(client: &ApiClient, filter: &NetworkFilter) -> Result<Vec<Value>, CoreError> {
    let response = call(client, rpcs::PBA_LIST_NETWORKS, serde_json::to_value(filter)?).await?;
    Ok(take_list(response, "networks"))
}

pub async fn get_routing_policy(client: &ApiClient, home: &HomeNetwork) -> Result<Value, CoreError> {
    match home.ids() {
        Some(ids) => call(client, rpcs::PBA_GET_HOME_NETWORK_POLICY, ids).await,
        None => call(client, rpcs::PBA_GET_HOME_NETWORK_DEFAULT_POLICY, json!({})).await,
    }
}

pub async fn set_routing_policy(
    client: &ApiClient,
    home: &HomeNetwork,
    policy: &RoutingPolicy,
) -> Result<(), CoreError> {
    let mut body = serde_json::to_value(policy)?;
    match home.ids() {
        Some(ids) => {
            body["home_network_id"] = ids;
            call(client, rpcs::PBA_SET_HOME_NETWORK_POLICY, body).await?;
        }
        None => {
            call(client, rpcs::PBA_SET_HOME_NETWORK_DEFAULT_POLICY, body).await?;
        }
    }
    Ok(())
}

pub async fn delete_routing_policy(client: &ApiClient, home: &HomeNetwork) -> Result<(), CoreError> {
    match home.ids() {
        Some(ids) => call(client, rpcs::PBA_DELETE_HOME_NETWORK_POLICY, ids).await?,
        None => call(client, rpcs::PBA_DELETE_HOME_NETWORK_DEFAULT_POLICY, json!({})).await?,
    };
    Ok(())
}

/// Gateway details shared with other networks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayVisibility {
    pub location: bool,
    pub antenna_placement: bool,
    pub antenna_count: bool,
    pub fine_timestamps: bool,
    pub contact_info: bool,
    pub status: bool,
    pub frequency_plan: bool,
    pub packet_rates: bool,
}

impl GatewayVisibility {
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let mut v = Self::default();
        for item in input.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            match item.replace('-', "_").as_str() {
                "all" => {
                    v = Self {
                        location: true,
                        antenna_placement: true,
                        antenna_count: true,
                        fine_timestamps: true,
                        contact_info: true,
                        status: true,
                        frequency_plan: true,
                        packet_rates: true,
                    }
                }
                "none" => v = Self::default(),
                "location" => v.location = true,
                "antenna_placement" => v.antenna_placement = true,
                "antenna_count" => v.antenna_count = true,
                "fine_timestamps" => v.fine_timestamps = true,
                "contact_info" => v.contact_info = true,
                "status" => v.status = true,
                "frequency_plan" => v.frequency_plan = true,
                "packet_rates" => v.packet_rates = true,
                _ => return Err(unknown_class("gateway visibility", item)),
            }
        }
        Ok(v)
    }
}

pub async fn get_gateway_visibility(client: &ApiClient) -> Result<Value, CoreError> {
    call(client, rpcs::PBA_GET_GATEWAY_VISIBILITY, json!({})).await
}

pub async fn set_gateway_visibility(
    client: &ApiClient,
    visibility: &GatewayVisibility,
) -> Result<(), CoreError> {
    call(
        client,
        rpcs::PBA_SET_GATEWAY_VISIBILITY,
        json!({ "visibility": visibility }),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_parse_policies() {
        let up = UplinkPolicy::parse("join-request,mac_data").unwrap();
        assert!(up.join_request && up.mac_data && !up.localization);
        assert_eq!(
            DownlinkPolicy::parse("all").unwrap(),
            DownlinkPolicy {
                join_accept: true,
                mac_data: true,
                application_data: true
            }
        );
        assert_eq!(
            UplinkPolicy::parse("bogus").unwrap_err().name,
            "routing_policy"
        );
        assert_eq!(HomeNetwork::parse("000013/ttn").unwrap().net_id, Some(0x13));
        assert_eq!(HomeNetwork::parse("default").unwrap(), HomeNetwork::default());
    }

    #[tokio::test]
    async fn test_set_home_network_policy() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::PBA_SET_HOME_NETWORK_POLICY, |_| Ok(json!({})));
        let client = ApiClient::new(
            mock.clone(),
            ServiceAddresses::for_host("eu1.example.com", false),
            None,
            CancellationToken::new(),
        );
        let policy = RoutingPolicy {
            uplink: UplinkPolicy::parse("all").unwrap(),
            downlink: DownlinkPolicy::default(),
        };
        set_routing_policy(&client, &HomeNetwork::parse("13").unwrap(), &policy)
            .await
            .unwrap();
        let call = &mock.calls()[0];
        assert_eq!(call.role, ServiceRole::PacketBrokerAgent);
        assert_eq!(call.body["home_network_id"], json!({"net_id": 19}));
        assert_eq!(call.body["uplink"]["localization"], true);
    }
}
