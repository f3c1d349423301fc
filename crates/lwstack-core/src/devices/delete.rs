//! End device deletion, single and batch.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{delete_from, get_from, uses_external_join_server, IS_ADDRESS_PATHS};
use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError, ErrorKind};
use crate::ids::EndDeviceIds;
use crate::lorawan::Eui64;
use crate::schema::rpcs;

fn address_paths() -> Vec<String> {
    IS_ADDRESS_PATHS.iter().map(|p| p.to_string()).collect()
}

/// Delete an end device from every registry.
///
/// Application, Network and Join Server are tried first, then the Identity
/// Server. A device claimed on an external Join Server is unclaimed instead
/// of deleted from the cluster Join Server.
pub async fn delete(client: &ApiClient, ids: &EndDeviceIds) -> Result<(), CoreError> {
    let mut ids = ids.clone();
    let stored = match get_from(client, ServiceRole::Identity, &ids, &address_paths()).await {
        Ok(stored) => Some(stored),
        Err(err) if err.is_not_found() => {
            warn!("end device not found on Identity Server");
            None
        }
        Err(err) => return Err(err),
    };
    if let Some(stored_ids) = stored.as_ref().and_then(|s| EndDeviceIds::from_device(s).ok()) {
        ids.dev_eui = ids.dev_eui.or(stored_ids.dev_eui);
        ids.join_eui = ids.join_eui.or(stored_ids.join_eui);
    }

    let external = stored
        .as_ref()
        .is_some_and(|s| uses_external_join_server(client, &ids, s));
    if external {
        match client
            .call(ServiceRole::DeviceClaiming, rpcs::UNCLAIM, ids.to_json())
            .await
        {
            Ok(_) => info!("unclaimed end device"),
            Err(err) => warn!(error = %err, "could not unclaim end device"),
        }
    }

    let mut skipped_join_server = external || !ids.has_euis();
    for role in [ServiceRole::Application, ServiceRole::Network, ServiceRole::Join] {
        if role == ServiceRole::Join && skipped_join_server {
            continue;
        }
        if !client.is_enabled(role) {
            debug!(component = role.key(), "server disabled, not deleting end device from it");
            if role == ServiceRole::Join {
                skipped_join_server = true;
            }
            continue;
        }
        match delete_from(client, role, &ids).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                warn!(component = role.key(), "end device not found on {}", role);
            }
            Err(err) => return Err(err),
        }
    }

    match delete_from(client, ServiceRole::Identity, &ids).await {
        Err(err) if err.is_not_found() && !skipped_join_server => {
            warn!("end device not found on Identity Server");
            Ok(())
        }
        other => other,
    }
}

fn batch_body(application_id: &str, device_ids: &[String]) -> Value {
    json!({
        "application_ids": { "application_id": application_id },
        "device_ids": device_ids,
    })
}

/// Delete several end devices of one application.
///
/// Devices claimed on an external Join Server are unclaimed in one batch;
/// the others are removed from the cluster Join Server. Every JoinEUI of the
/// external set must be claimable, otherwise nothing is deleted.
pub async fn batch_delete(
    client: &ApiClient,
    application_id: &str,
    device_ids: &[String],
) -> Result<(), CoreError> {
    let mut external: Vec<EndDeviceIds> = Vec::new();
    let mut cluster: Vec<String> = Vec::new();
    for device_id in device_ids {
        let ids = EndDeviceIds::new(application_id, device_id);
        let stored = get_from(client, ServiceRole::Identity, &ids, &address_paths()).await?;
        let ids = EndDeviceIds::from_device(&stored).unwrap_or(ids);
        if uses_external_join_server(client, &ids, &stored) {
            external.push(ids);
        } else if ids.has_euis() {
            cluster.push(ids.device_id);
        }
    }

    if !external.is_empty() {
        let join_euis: Vec<Eui64> = external.iter().filter_map(|ids| ids.join_eui).collect();
        let requests: Vec<Value> = join_euis
            .iter()
            .map(|join_eui| json!({ "join_eui": join_eui }))
            .collect();
        let response = client
            .call(
                ServiceRole::DeviceClaiming,
                rpcs::CLAIM_INFO_BY_JOIN_EUIS,
                json!({ "requests": requests }),
            )
            .await?;
        let claimable: BTreeMap<String, bool> = response
            .get("infos")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|info| {
                let join_eui = info.get("join_eui")?.as_str()?.parse::<Eui64>().ok()?;
                let supports = info
                    .get("supports_claiming")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Some((join_eui.to_string(), supports))
            })
            .collect();
        for join_eui in &join_euis {
            if !claimable.get(&join_eui.to_string()).copied().unwrap_or(false) {
                return Err(ApiError::new(
                    ErrorKind::Corruption,
                    "cli",
                    "invalid_device_registration",
                    format!(
                        "end device with JoinEUI `{}` is not on the cluster Join Server and can not be claimed",
                        join_eui
                    ),
                )
                .with_attribute("join_eui", join_eui.to_string())
                .into());
            }
        }

        let unclaim_ids: Vec<String> = external.iter().map(|ids| ids.device_id.clone()).collect();
        client
            .call(
                ServiceRole::DeviceClaiming,
                rpcs::BATCH_UNCLAIM,
                batch_body(application_id, &unclaim_ids),
            )
            .await?;
        info!(count = unclaim_ids.len(), "unclaimed end devices");
    }

    if !cluster.is_empty() && client.is_enabled(ServiceRole::Join) {
        client
            .call(
                ServiceRole::Join,
                rpcs::END_DEVICE_JS_BATCH_DELETE,
                batch_body(application_id, &cluster),
            )
            .await?;
    }
    for (role, rpc) in [
        (ServiceRole::Application, rpcs::END_DEVICE_AS_BATCH_DELETE),
        (ServiceRole::Network, rpcs::END_DEVICE_NS_BATCH_DELETE),
        (ServiceRole::Identity, rpcs::END_DEVICE_IS_BATCH_DELETE),
    ] {
        if !client.is_enabled(role) {
            continue;
        }
        client
            .call(role, rpc, batch_body(application_id, device_ids))
            .await?;
    }
    Ok(())
}
