//! End device updates.
//!
//! Updates are not transactional: each registry is written in turn and the
//! first failure is returned with the step that failed.

use serde_json::{json, Value};
use tracing::debug;

use super::{
    add_companion_paths, address_mismatch, drop_disabled_registries, get_from, ids_of,
    server_address_field, set_on, stored_host, uses_external_join_server, IS_ADDRESS_PATHS,
};
use crate::api::ApiClient;
use crate::config::addresses::host_of;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::fieldmask::router::{self, merge_partial, Access};
use crate::fieldmask::{value, FieldMask};
use crate::ids::EndDeviceIds;
use crate::lorawan::Eui64;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Write to every registry the device is on, even without paths.
    pub touch: bool,
}

fn check_eui(field: &str, stored: Option<Eui64>, new: Option<Eui64>) -> Result<(), ApiError> {
    match (stored, new) {
        (Some(stored), Some(new)) if !stored.is_zero() && stored != new => Err(ApiError::invalid_argument(
            "cli",
            "end_device_eui_update",
            format!("{} can not be changed from `{}` to `{}`", field, stored, new),
        )
        .with_attribute("field", field)),
        _ => Ok(()),
    }
}

/// Update the `paths` of an end device. Paths whose value is absent from
/// `device` are cleared.
pub async fn update(
    client: &ApiClient,
    mut device: Value,
    paths: &FieldMask,
    opts: &UpdateOptions,
) -> Result<Value, CoreError> {
    let mut ids = ids_of(&device)?;
    let address_paths: Vec<String> = IS_ADDRESS_PATHS.iter().map(|p| p.to_string()).collect();
    let stored = get_from(client, ServiceRole::Identity, &ids, &address_paths).await?;
    let stored_ids = EndDeviceIds::from_device(&stored)?;

    check_eui("DevEUI", stored_ids.dev_eui, ids.dev_eui)?;
    check_eui("JoinEUI", stored_ids.join_eui, ids.join_eui)?;
    ids.dev_eui = ids.dev_eui.or(stored_ids.dev_eui);
    ids.join_eui = ids.join_eui.or(stored_ids.join_eui);
    ids.dev_addr = ids.dev_addr.or(stored_ids.dev_addr);

    let mut partition = router::split_end_device_paths(paths.iter(), Access::Write);
    if value::has(&device, "picture") {
        partition.add(ServiceRole::Identity, "picture");
    }
    for eui in ["ids.dev_eui", "ids.join_eui"] {
        let changed = value::has(&device, eui) && !value::has(&stored, eui);
        if changed {
            partition.add(ServiceRole::Identity, eui);
        }
    }

    let supports_join = device
        .get("supports_join")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !partition.js_paths.is_empty() && (!supports_join || uses_external_join_server(client, &ids, &stored)) {
        let dropped = partition.drop_join_server_paths();
        debug!(paths = ?dropped, "end device does not use the cluster Join Server");
    }
    drop_disabled_registries(client, &mut partition);
    if !partition.js_paths.is_empty() && !ids.has_euis() {
        return Err(ApiError::invalid_argument(
            "cli",
            "no_end_device_eui",
            "both DevEUI and JoinEUI are needed",
        )
        .into());
    }
    add_companion_paths(&mut partition, Access::Write);

    let mut targets = Vec::new();
    for role in [ServiceRole::Network, ServiceRole::Application, ServiceRole::Join] {
        let touched = opts.touch && stored_host(&stored, role).is_some() && client.is_enabled(role);
        if partition.paths(role).is_empty() && !touched {
            continue;
        }
        let configured = host_of(client.addresses().get(role)?);
        match stored_host(&stored, role) {
            Some(host) if host != configured => return Err(address_mismatch(role, host, configured).into()),
            Some(_) => {}
            None => {
                if let Some(field) = server_address_field(role) {
                    value::set(&mut device, field, json!(configured));
                    partition.add(ServiceRole::Identity, field);
                }
            }
        }
        targets.push(role);
    }

    let mut result = stored.clone();
    result["ids"] = ids.to_json();
    if !partition.is_paths.is_empty() || opts.touch {
        let response = set_on(client, ServiceRole::Identity, &ids, &device, &partition.is_paths)
            .await
            .map_err(|e| e.to_api_error().with_attribute("step", ServiceRole::Identity.short()))?;
        merge_partial(&mut result, &response, &partition.is_paths, ServiceRole::Identity);
    }
    for role in targets {
        let paths = partition.paths(role);
        let response = set_on(client, role, &ids, &device, paths)
            .await
            .map_err(|e| e.to_api_error().with_attribute("step", role.short()))?;
        merge_partial(&mut result, &response, paths, role);
    }
    Ok(result)
}
