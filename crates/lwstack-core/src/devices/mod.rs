//! End devices.
//!
//! An end device is one logical entity stored in up to four registries: the
//! Identity Server keeps the directory entry and the addresses of the other
//! servers, the Network Server the MAC layer, the Application Server the
//! application session and the Join Server the root keys. The functions here
//! route each requested path to its registry and stitch the partial results
//! back together.

pub mod create;
pub mod delete;
pub mod downlink;
pub mod keys;
pub mod relay;
pub mod reset;
pub mod templates;
pub mod update;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::config::addresses::host_of;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError, ErrorKind};
use crate::fieldmask::router::{self, merge_partial, Access, PathPartition};
use crate::fieldmask::{is_prefix, value, FieldMask};
use crate::ids::EndDeviceIds;
use crate::registry::{take_list, Paging, SearchQuery};
use crate::schema::rpcs;

pub use create::{claim, create, CreateOptions};
pub use delete::{batch_delete, delete};
pub use reset::reset;
pub use update::{update, UpdateOptions};

/// IS fields holding the address of each other registry.
pub const SERVER_ADDRESS_FIELDS: [(ServiceRole, &str); 3] = [
    (ServiceRole::Network, "network_server_address"),
    (ServiceRole::Application, "application_server_address"),
    (ServiceRole::Join, "join_server_address"),
];

pub fn server_address_field(role: ServiceRole) -> Option<&'static str> {
    SERVER_ADDRESS_FIELDS
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, field)| *field)
}

/// Host of the configured address of `role`.
pub(crate) fn configured_host(client: &ApiClient, role: ServiceRole) -> Option<&str> {
    client.addresses().address(role).map(host_of)
}

/// Host of the address stored on the device for `role`, if set.
pub(crate) fn stored_host(device: &Value, role: ServiceRole) -> Option<&str> {
    server_address_field(role)
        .and_then(|field| device.get(field))
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(host_of)
}

/// Whether an OTAA device is handled by a Join Server outside this cluster.
pub(crate) fn uses_external_join_server(client: &ApiClient, ids: &EndDeviceIds, device: &Value) -> bool {
    if !ids.has_euis() {
        return false;
    }
    match stored_host(device, ServiceRole::Join) {
        None => true,
        Some(stored) => configured_host(client, ServiceRole::Join) != Some(stored),
    }
}

pub(crate) fn address_mismatch(role: ServiceRole, stored: &str, configured: &str) -> ApiError {
    ApiError::new(
        ErrorKind::Aborted,
        "cli",
        "end_device_server_address_mismatch",
        format!(
            "end device is registered on {} `{}`, not `{}`",
            role, stored, configured
        ),
    )
    .with_attribute("component", role.key())
    .with_attribute("stored", stored)
    .with_attribute("configured", configured)
}

/// Read identifiers from a device and check the required ones.
pub fn ids_of(device: &Value) -> Result<EndDeviceIds, ApiError> {
    let ids = EndDeviceIds::from_device(device)?;
    if ids.application_id().is_empty() {
        return Err(ApiError::invalid_argument(
            "cli",
            "no_application_id",
            "no application ID",
        ));
    }
    if ids.device_id.is_empty() {
        return Err(ApiError::invalid_argument(
            "cli",
            "no_end_device_id",
            "no end device ID",
        ));
    }
    Ok(ids)
}

struct RegistryRpcs {
    get: &'static str,
    set: &'static str,
    delete: &'static str,
}

fn registry(role: ServiceRole) -> Option<RegistryRpcs> {
    let rpcs = match role {
        ServiceRole::Identity => RegistryRpcs {
            get: rpcs::END_DEVICE_IS_GET,
            set: rpcs::END_DEVICE_IS_UPDATE,
            delete: rpcs::END_DEVICE_IS_DELETE,
        },
        ServiceRole::Network => RegistryRpcs {
            get: rpcs::END_DEVICE_NS_GET,
            set: rpcs::END_DEVICE_NS_SET,
            delete: rpcs::END_DEVICE_NS_DELETE,
        },
        ServiceRole::Application => RegistryRpcs {
            get: rpcs::END_DEVICE_AS_GET,
            set: rpcs::END_DEVICE_AS_SET,
            delete: rpcs::END_DEVICE_AS_DELETE,
        },
        ServiceRole::Join => RegistryRpcs {
            get: rpcs::END_DEVICE_JS_GET,
            set: rpcs::END_DEVICE_JS_SET,
            delete: rpcs::END_DEVICE_JS_DELETE,
        },
        _ => return None,
    };
    Some(rpcs)
}

fn registry_of(role: ServiceRole) -> Result<RegistryRpcs, ApiError> {
    registry(role).ok_or_else(|| {
        ApiError::new(
            ErrorKind::Internal,
            "cli",
            "no_end_device_registry",
            format!("{} has no end device registry", role),
        )
    })
}

fn mask_for(rpc: &str, paths: &[String]) -> FieldMask {
    let mut mask: FieldMask = paths.iter().cloned().collect();
    if let Some(allowed) = rpcs::allowed_paths(rpc) {
        mask.retain_allowed(rpc, allowed);
    }
    mask
}

/// The part of `device` a registry stores: `paths` plus identifiers.
pub(crate) fn device_for(ids: &EndDeviceIds, device: &Value, paths: &[String]) -> Value {
    let mut out = value::project(device, paths.iter().map(String::as_str));
    out["ids"] = ids.to_json();
    out
}

pub(crate) async fn get_from(
    client: &ApiClient,
    role: ServiceRole,
    ids: &EndDeviceIds,
    paths: &[String],
) -> Result<Value, CoreError> {
    let rpcs = registry_of(role)?;
    let mask = mask_for(rpcs.get, paths);
    let body = json!({ "end_device_ids": ids.to_json(), "field_mask": mask.to_json() });
    client.call(role, rpcs.get, body).await
}

/// Write `paths` of `device` to one registry. The Identity Server is
/// updated; the others are set.
pub(crate) async fn set_on(
    client: &ApiClient,
    role: ServiceRole,
    ids: &EndDeviceIds,
    device: &Value,
    paths: &[String],
) -> Result<Value, CoreError> {
    let rpcs = registry_of(role)?;
    let mask = mask_for(rpcs.set, paths);
    let body = json!({
        "end_device": device_for(ids, device, &mask.to_vec()),
        "field_mask": mask.to_json(),
    });
    debug!(role = %role, paths = ?mask.to_vec(), "setting end device");
    client.call(role, rpcs.set, body).await
}

pub(crate) async fn delete_from(client: &ApiClient, role: ServiceRole, ids: &EndDeviceIds) -> Result<(), CoreError> {
    let rpcs = registry_of(role)?;
    client.call(role, rpcs.delete, ids.to_json()).await?;
    Ok(())
}

/// Add the paths a registry needs alongside the requested ones: reading the
/// NS session also reads the AppSKey from the AS, and writing an AS session
/// carries its DevAddr.
pub(crate) fn add_companion_paths(partition: &mut PathPartition, access: Access) {
    let reads_session = partition
        .ns_paths
        .iter()
        .any(|p| p == "session" || p == "session.keys");
    if access == Access::Read && reads_session {
        partition.add(ServiceRole::Application, "session.keys.app_s_key");
        partition.add(ServiceRole::Application, "session.dev_addr");
    }
    let writes_as_session = partition
        .as_paths
        .iter()
        .any(|p| p == "session" || is_prefix("session", p));
    if writes_as_session {
        partition.add(ServiceRole::Application, "session.dev_addr");
    }
}

/// Drop writes to server registries that are disabled in the configuration.
pub(crate) fn drop_disabled_registries(client: &ApiClient, partition: &mut PathPartition) {
    for role in [ServiceRole::Network, ServiceRole::Application, ServiceRole::Join] {
        if client.is_enabled(role) {
            continue;
        }
        if let Some(paths) = partition.paths_mut(role) {
            if !paths.is_empty() {
                let dropped = std::mem::take(paths);
                warn!(paths = ?dropped, "{} is disabled, not writing end device paths", role);
            }
        }
    }
}

const IS_ADDRESS_PATHS: [&str; 3] = [
    "application_server_address",
    "join_server_address",
    "network_server_address",
];

/// Get an end device, reading each path from the registry that owns it.
///
/// Registries the device is not registered on, or that report it as not
/// found, are skipped with a warning.
pub async fn get(client: &ApiClient, ids: &EndDeviceIds, mask: &FieldMask) -> Result<Value, CoreError> {
    let mut partition = router::split_end_device_paths(mask.iter(), Access::Read);
    add_companion_paths(&mut partition, Access::Read);
    if !partition.unassigned.is_empty() {
        debug!(paths = ?partition.unassigned, "paths not read from any registry");
    }

    let mut is_paths = partition.is_paths.clone();
    for path in IS_ADDRESS_PATHS {
        if !is_paths.iter().any(|p| p == path) {
            is_paths.push(path.to_string());
        }
    }
    let stored = get_from(client, ServiceRole::Identity, ids, &is_paths).await?;
    let mut ids = ids.clone();
    if let Ok(stored_ids) = EndDeviceIds::from_device(&stored) {
        ids.dev_eui = ids.dev_eui.or(stored_ids.dev_eui);
        ids.join_eui = ids.join_eui.or(stored_ids.join_eui);
    }

    let mut device = json!({ "ids": ids.to_json() });
    merge_partial(&mut device, &stored, &partition.is_paths, ServiceRole::Identity);

    for role in [ServiceRole::Network, ServiceRole::Application, ServiceRole::Join] {
        let paths = partition.paths(role);
        if paths.is_empty() {
            continue;
        }
        if role == ServiceRole::Join && uses_external_join_server(client, &ids, &stored) {
            debug!("end device uses an external Join Server, not reading from it");
            continue;
        }
        if role == ServiceRole::Join && !ids.has_euis() {
            debug!("end device has no EUIs, not reading from Join Server");
            continue;
        }
        // Fails cleanly when the role is disabled.
        let configured = client.addresses().get(role)?;
        match stored_host(&stored, role) {
            None => {
                warn!(component = role.key(), "end device is not registered on {}", role);
                continue;
            }
            Some(host) if host != host_of(configured) => {
                warn!(
                    component = role.key(),
                    stored = host,
                    configured,
                    "end device is registered on another server, skipping"
                );
                continue;
            }
            Some(_) => {}
        }
        match get_from(client, role, &ids, paths).await {
            Ok(partial) => merge_partial(&mut device, &partial, paths, role),
            Err(err) if err.is_not_found() => {
                warn!(component = role.key(), "end device not found on {}", role);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(device)
}

/// List the end devices of an application. Only Identity Server paths are
/// listed.
pub async fn list(
    client: &ApiClient,
    application_id: &str,
    mask: &FieldMask,
    paging: &Paging,
) -> Result<Vec<Value>, CoreError> {
    let partition = router::split_end_device_paths(mask.iter(), Access::Read);
    if partition.has_server_paths() {
        warn!("only Identity Server paths are listed; use get for the others");
    }
    let mask = mask_for(rpcs::END_DEVICE_IS_LIST, &partition.is_paths);
    let mut body = json!({
        "application_ids": { "application_id": application_id },
        "field_mask": mask.to_json(),
    });
    if let (Some(map), Value::Object(paging)) = (body.as_object_mut(), serde_json::to_value(paging)?) {
        map.extend(paging);
    }
    let response = client
        .call(ServiceRole::Identity, rpcs::END_DEVICE_IS_LIST, body)
        .await?;
    Ok(take_list(response, "end_devices"))
}

pub async fn search(
    client: &ApiClient,
    application_id: &str,
    query: &SearchQuery,
    mask: &FieldMask,
    paging: &Paging,
) -> Result<Vec<Value>, CoreError> {
    let partition = router::split_end_device_paths(mask.iter(), Access::Read);
    let mask = mask_for(rpcs::SEARCH_END_DEVICES, &partition.is_paths);
    let mut body = json!({
        "application_ids": { "application_id": application_id },
        "field_mask": mask.to_json(),
    });
    if let Some(map) = body.as_object_mut() {
        for extra in [serde_json::to_value(query)?, serde_json::to_value(paging)?] {
            if let Value::Object(extra) = extra {
                map.extend(extra);
            }
        }
    }
    let response = client
        .call(ServiceRole::Identity, rpcs::SEARCH_END_DEVICES, body)
        .await?;
    Ok(take_list(response, "end_devices"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn client(mock: &Arc<MockTransport>, addresses: ServiceAddresses) -> ApiClient {
        ApiClient::new(mock.clone(), addresses, None, CancellationToken::new())
    }

    fn is_device() -> Value {
        json!({
            "ids": {
                "device_id": "dev1",
                "application_ids": {"application_id": "app1"},
                "dev_eui": "0004A30B001C0530",
                "join_eui": "70B3D57ED0000000"
            },
            "name": "Device",
            "network_server_address": "eu1.example.com",
            "application_server_address": "eu1.example.com",
            "join_server_address": "eu1.example.com",
            "created_at": "2024-01-02T00:00:00Z"
        })
    }

    #[test]
    fn test_ids_of_requires_ids() {
        let err = ids_of(&json!({"ids": {"device_id": "d", "application_ids": {"application_id": ""}}}))
            .unwrap_err();
        assert_eq!(err.name, "no_application_id");
        let err = ids_of(&json!({"ids": {"device_id": "", "application_ids": {"application_id": "a"}}}))
            .unwrap_err();
        assert_eq!(err.name, "no_end_device_id");
    }

    #[tokio::test]
    async fn test_get_merges_registries() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_GET, |_| Ok(is_device()));
        mock.on(rpcs::END_DEVICE_NS_GET, |_| {
            Ok(json!({
                "ids": {"dev_addr": "26011234"},
                "frequency_plan_id": "EU_863_870",
                "session": {"dev_addr": "26011234", "keys": {"f_nwk_s_int_key": {"key": "AA"}}},
                "created_at": "2024-01-01T00:00:00Z"
            }))
        });
        mock.on(rpcs::END_DEVICE_AS_GET, |_| {
            Ok(json!({"session": {"dev_addr": "26011234", "keys": {"app_s_key": {"key": "BB"}}}}))
        });
        let client = client(&mock, ServiceAddresses::for_host("eu1.example.com", false));
        let mask: FieldMask = ["name", "frequency_plan_id", "session"].into_iter().collect();
        let ids = EndDeviceIds::new("app1", "dev1");
        let device = get(&client, &ids, &mask).await.unwrap();

        assert_eq!(device["name"], "Device");
        assert_eq!(device["frequency_plan_id"], "EU_863_870");
        assert_eq!(device["session"]["keys"]["f_nwk_s_int_key"]["key"], "AA");
        assert_eq!(device["session"]["keys"]["app_s_key"]["key"], "BB");
        assert_eq!(device["ids"]["dev_addr"], "26011234");
        assert_eq!(device["created_at"], "2024-01-01T00:00:00Z");
        assert!(mock.calls_to(rpcs::END_DEVICE_JS_GET).is_empty());
    }

    #[tokio::test]
    async fn test_get_fails_cleanly_on_disabled_server() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_GET, |_| Ok(is_device()));
        let mut addresses = ServiceAddresses::for_host("eu1.example.com", false);
        addresses.set_enabled(ServiceRole::Join, false);
        let client = client(&mock, addresses);
        let mask: FieldMask = ["root_keys"].into_iter().collect();
        let err = get(&client, &EndDeviceIds::new("app1", "dev1"), &mask)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "join_server_disabled");
    }

    #[tokio::test]
    async fn test_get_skips_not_found_on_server() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_GET, |_| Ok(is_device()));
        mock.on(rpcs::END_DEVICE_AS_GET, |_| {
            Err(ApiError::not_found("registry", "end_device_not_found", "not found"))
        });
        let client = client(&mock, ServiceAddresses::for_host("eu1.example.com", false));
        let mask: FieldMask = ["name", "formatters"].into_iter().collect();
        let device = get(&client, &EndDeviceIds::new("app1", "dev1"), &mask)
            .await
            .unwrap();
        assert_eq!(device["name"], "Device");
        assert!(device.get("formatters").is_none());
    }
}
