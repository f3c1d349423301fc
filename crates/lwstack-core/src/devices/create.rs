//! End device creation across the registries, with rollback.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    add_companion_paths, delete_from, drop_disabled_registries, ids_of, keys, server_address_field,
    set_on, stored_host, SERVER_ADDRESS_FIELDS,
};
use crate::api::ApiClient;
use crate::config::addresses::host_of;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError, ErrorKind};
use crate::fieldmask::router::{self, merge_partial, Access};
use crate::fieldmask::{value, FieldMask};
use crate::ids::{validate_id, EndDeviceIds};
use crate::lorawan::Eui64;
use crate::registry;
use crate::schema::entities::APPLICATIONS;
use crate::schema::rpcs;

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Activation by personalization: no join.
    pub abp: bool,
    pub multicast: bool,
    /// Fill in server addresses from the configuration.
    pub defaults: bool,
    /// Generate a DevAddr and session keys (ABP).
    pub with_session: bool,
    /// Generate root keys (OTAA).
    pub with_root_keys: bool,
    /// Ask the Identity Server for a DevEUI.
    pub request_dev_eui: bool,
    /// Claim the device on its external Join Server instead of registering
    /// it on the cluster Join Server.
    pub claim_authentication_code: Option<String>,
}

impl CreateOptions {
    pub fn supports_join(&self) -> bool {
        !(self.abp || self.multicast)
    }
}

fn eui_at(device: &Value, path: &str) -> Result<Option<Eui64>, CoreError> {
    match value::get(device, path).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(Some(s.parse()?)),
        _ => Ok(None),
    }
}

fn no_euis() -> ApiError {
    ApiError::invalid_argument(
        "cli",
        "no_end_device_eui",
        "both DevEUI and JoinEUI are needed",
    )
}

/// Fill in server addresses of the configured cluster, and the default
/// JoinEUI of the cluster Join Server for OTAA devices without one.
async fn apply_defaults(client: &ApiClient, device: &mut Value, opts: &CreateOptions) -> Result<(), CoreError> {
    for (role, field) in SERVER_ADDRESS_FIELDS {
        if role == ServiceRole::Join && !opts.supports_join() {
            continue;
        }
        if device.get(field).and_then(Value::as_str).is_some_and(|a| !a.is_empty()) {
            continue;
        }
        if let Some(address) = client.addresses().address(role) {
            value::set(device, field, json!(host_of(address)));
        }
    }
    if opts.supports_join()
        && opts.claim_authentication_code.is_none()
        && eui_at(device, "ids.join_eui")?.is_none()
        && client.is_enabled(ServiceRole::Join)
    {
        let response = client
            .call(ServiceRole::Join, rpcs::JS_GET_DEFAULT_JOIN_EUI, json!({}))
            .await?;
        if let Some(join_eui) = response.get("join_eui").and_then(Value::as_str) {
            let join_eui: Eui64 = join_eui.parse()?;
            debug!(%join_eui, "using default JoinEUI");
            value::set(device, "ids.join_eui", json!(join_eui));
        }
    }
    Ok(())
}

/// Warn when the device is set up for other servers than its application.
async fn check_application_addresses(client: &ApiClient, ids: &EndDeviceIds, device: &Value) {
    let mask: FieldMask = SERVER_ADDRESS_FIELDS.iter().map(|(_, f)| *f).collect();
    let application = match registry::get(client, &APPLICATIONS, ids.application_id(), &mask).await {
        Ok(application) => application,
        Err(err) => {
            debug!(error = %err, "could not read application server addresses");
            return;
        }
    };
    for (role, _) in SERVER_ADDRESS_FIELDS {
        if let (Some(app), Some(dev)) = (stored_host(&application, role), stored_host(device, role)) {
            if app != dev {
                warn!(
                    component = role.key(),
                    application = app,
                    device = dev,
                    "end device uses another {} than its application",
                    role
                );
            }
        }
    }
}

async fn check_claimable(client: &ApiClient, join_eui: Eui64) -> Result<(), CoreError> {
    let info = client
        .call(
            ServiceRole::DeviceClaiming,
            rpcs::CLAIM_INFO_BY_JOIN_EUI,
            json!({ "join_eui": join_eui }),
        )
        .await
        .map_err(|err| {
            ApiError::failed_precondition(
                "cli",
                "end_device_claim_info",
                format!("could not get claim info of JoinEUI `{}`", join_eui),
            )
            .with_cause(err.to_api_error())
        })?;
    if !info.get("supports_claiming").and_then(Value::as_bool).unwrap_or(false) {
        return Err(ApiError::failed_precondition(
            "cli",
            "end_device_claim_info",
            format!("JoinEUI `{}` can not be claimed", join_eui),
        )
        .with_attribute("join_eui", join_eui.to_string())
        .into());
    }
    Ok(())
}

/// Claim a device on its external Join Server into `ids`.
pub async fn claim(client: &ApiClient, ids: &EndDeviceIds, code: &str) -> Result<(), CoreError> {
    let (Some(dev_eui), Some(join_eui)) = (ids.dev_eui, ids.join_eui) else {
        return Err(no_euis().into());
    };
    let body = json!({
        "authenticated_identifiers": {
            "dev_eui": dev_eui,
            "join_eui": join_eui,
            "authentication_code": code,
        },
        "target_application_ids": ids.application_ids,
        "target_device_id": ids.device_id,
    });
    client
        .call(ServiceRole::DeviceClaiming, rpcs::CLAIM, body)
        .await
        .map_err(|err| {
            ApiError::failed_precondition("cli", "end_device_claim", "could not claim end device")
                .with_cause(err.to_api_error())
        })?;
    info!(%dev_eui, %join_eui, "claimed end device");
    Ok(())
}

/// Steps a create completed, undone in reverse registry order.
#[derive(Debug, Default)]
struct Created {
    roles: Vec<ServiceRole>,
    claimed: bool,
}

impl Created {
    /// Undo every completed step, returning the deletes that failed.
    async fn roll_back(&self, client: &ApiClient, ids: &EndDeviceIds) -> Vec<ApiError> {
        if self.claimed {
            let body = ids.to_json();
            if let Err(err) = client
                .call(ServiceRole::DeviceClaiming, rpcs::UNCLAIM, body)
                .await
            {
                warn!(error = %err, "could not unclaim end device");
            }
        }
        let mut failed = Vec::new();
        for role in [
            ServiceRole::Application,
            ServiceRole::Network,
            ServiceRole::Join,
            ServiceRole::Identity,
        ] {
            if !self.roles.contains(&role) {
                continue;
            }
            match delete_from(client, role, ids).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(component = role.key(), error = %err, "could not delete end device");
                    failed.push(err.to_api_error());
                }
            }
        }
        failed
    }
}

fn step_failed(err: CoreError, step: &str) -> ApiError {
    err.to_api_error().with_attribute("step", step)
}

/// Create an end device.
///
/// The Identity Server record is created first, then the Network,
/// Application and Join Server parts. When a later step fails, what was
/// created is deleted again and the original error is returned.
pub async fn create(client: &ApiClient, mut device: Value, opts: &CreateOptions) -> Result<Value, CoreError> {
    let ids = ids_of(&device)?;
    validate_id("device_id", &ids.device_id)?;
    if opts.request_dev_eui && opts.claim_authentication_code.is_some() {
        return Err(ApiError::invalid_argument(
            "cli",
            "request_dev_eui_with_claim",
            "a DevEUI can not be requested for a claimed end device",
        )
        .into());
    }

    let supports_join = opts.supports_join();
    value::set(&mut device, "supports_join", json!(supports_join));
    if opts.multicast {
        value::set(&mut device, "multicast", json!(true));
    }

    if opts.defaults {
        apply_defaults(client, &mut device, opts).await?;
    }
    if opts.abp && opts.with_session {
        keys::generate_session(client, &mut device).await?;
    }
    if supports_join && opts.with_root_keys {
        keys::generate_root_keys(&mut device)?;
    }
    if opts.request_dev_eui {
        let app_id = ids_of(&device)?.application_ids.application_id;
        let dev_eui = registry::issue_dev_eui(client, &app_id).await?;
        value::set(&mut device, "ids.dev_eui", json!(dev_eui));
    }
    let ids = ids_of(&device)?;

    let paths = value::leaf_paths(&device);
    let mut partition = router::split_end_device_paths(paths.iter().map(String::as_str), Access::Write);
    if !supports_join && !partition.js_paths.is_empty() {
        let dropped = partition.drop_join_server_paths();
        warn!(paths = ?dropped, "end device does not join, not writing Join Server paths");
    }
    drop_disabled_registries(client, &mut partition);
    check_application_addresses(client, &ids, &device).await;

    if opts.claim_authentication_code.is_some() {
        let join_eui = ids.join_eui.ok_or_else(no_euis)?;
        if ids.dev_eui.is_none() {
            return Err(no_euis().into());
        }
        check_claimable(client, join_eui).await?;
        let dropped = partition.drop_join_server_paths();
        debug!(paths = ?dropped, "not registering claimed end device on the Join Server");
        partition.is_paths.retain(|p| p != "join_server_address");
        value::remove(&mut device, "join_server_address");
    }
    if !partition.js_paths.is_empty() && !ids.has_euis() {
        return Err(no_euis().into());
    }

    add_companion_paths(&mut partition, Access::Write);
    for role in [ServiceRole::Network, ServiceRole::Application, ServiceRole::Join] {
        if partition.paths(role).is_empty() {
            continue;
        }
        client.addresses().get(role)?;
        if let Some(field) = server_address_field(role) {
            if stored_host(&device, role).is_none() {
                if let Some(address) = client.addresses().address(role) {
                    value::set(&mut device, field, json!(host_of(address)));
                }
            }
            partition.add(ServiceRole::Identity, field);
        }
    }

    let is_device = super::device_for(&ids, &device, &partition.is_paths);
    let mask: FieldMask = partition.is_paths.iter().cloned().collect();
    let created_is = client
        .call(
            ServiceRole::Identity,
            rpcs::END_DEVICE_IS_CREATE,
            json!({ "end_device": is_device, "field_mask": mask.to_json() }),
        )
        .await?;
    let mut result = json!({ "ids": ids.to_json() });
    merge_partial(&mut result, &created_is, &partition.is_paths, ServiceRole::Identity);

    let mut created = Created {
        roles: vec![ServiceRole::Identity],
        claimed: false,
    };
    let outcome = async {
        if let Some(code) = &opts.claim_authentication_code {
            claim(client, &ids, code)
                .await
                .map_err(|e| step_failed(e, "claim"))?;
            created.claimed = true;
        }
        for role in [ServiceRole::Network, ServiceRole::Application, ServiceRole::Join] {
            let paths = partition.paths(role);
            if paths.is_empty() {
                continue;
            }
            // A failed set may still have written part of the device.
            created.roles.push(role);
            let response = set_on(client, role, &ids, &device, paths)
                .await
                .map_err(|e| step_failed(e, role.short()))?;
            merge_partial(&mut result, &response, paths, role);
        }
        Ok::<(), ApiError>(())
    }
    .await;

    let Err(err) = outcome else {
        return Ok(result);
    };
    if err.kind == ErrorKind::Cancelled {
        warn!("create cancelled, the end device is partially created");
        return Err(err.into());
    }
    warn!(error = %err, "create failed, rolling back");
    let failed = created.roll_back(client, &ids).await;
    if failed.is_empty() {
        return Err(err.into());
    }
    let rollback: Vec<String> = failed.iter().map(ToString::to_string).collect();
    Err(err.with_attribute("rollback_error", rollback.join("; ")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::new(
            mock.clone(),
            ServiceAddresses::for_host("eu1.example.com", false),
            None,
            CancellationToken::new(),
        )
    }

    fn echo(body: &Value) -> Result<Value, ApiError> {
        Ok(body["end_device"].clone())
    }

    fn device() -> Value {
        json!({
            "ids": {"device_id": "dev1", "application_ids": {"application_id": "app1"}},
            "lorawan_version": "MAC_V1_0_3",
            "frequency_plan_id": "EU_863_870"
        })
    }

    #[tokio::test]
    async fn test_otaa_create_writes_every_registry_in_order() {
        let mock = Arc::new(MockTransport::new());
        for rpc in [rpcs::END_DEVICE_IS_CREATE, rpcs::END_DEVICE_NS_SET, rpcs::END_DEVICE_AS_SET, rpcs::END_DEVICE_JS_SET] {
            mock.on(rpc, echo);
        }
        mock.on(rpcs::JS_GET_DEFAULT_JOIN_EUI, |_| Ok(json!({"join_eui": "70B3D57ED0000000"})));
        let mut dev = device();
        dev["ids"]["dev_eui"] = json!("0004A30B001C0530");
        let opts = CreateOptions {
            defaults: true,
            with_root_keys: true,
            ..Default::default()
        };
        let created = create(&client(&mock), dev, &opts).await.unwrap();

        let writes: Vec<String> = mock
            .methods()
            .into_iter()
            .filter(|m| m != rpcs::APPLICATION_GET)
            .collect();
        assert_eq!(
            writes,
            vec![
                rpcs::JS_GET_DEFAULT_JOIN_EUI,
                rpcs::END_DEVICE_IS_CREATE,
                rpcs::END_DEVICE_NS_SET,
                rpcs::END_DEVICE_JS_SET,
            ]
        );
        assert_eq!(created["ids"]["join_eui"], "70B3D57ED0000000");
        assert_eq!(created["supports_join"], true);
        assert!(created["root_keys"]["app_key"]["key"].is_string());
        let is_body = &mock.calls_to(rpcs::END_DEVICE_IS_CREATE)[0].body;
        assert_eq!(is_body["end_device"]["join_server_address"], "eu1.example.com");
        assert!(is_body["end_device"].get("root_keys").is_none());
    }

    #[tokio::test]
    async fn test_join_server_paths_need_euis() {
        let mock = Arc::new(MockTransport::new());
        let opts = CreateOptions {
            with_root_keys: true,
            ..Default::default()
        };
        let err = create(&client(&mock), device(), &opts)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "no_end_device_eui");
        assert!(mock.calls_to(rpcs::END_DEVICE_IS_CREATE).is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_CREATE, echo);
        mock.on(rpcs::END_DEVICE_NS_SET, echo);
        mock.on(rpcs::NS_GENERATE_DEV_ADDR, |_| Ok(json!({"dev_addr": "26011234"})));
        mock.on(rpcs::END_DEVICE_AS_SET, |_| {
            Err(ApiError::new(ErrorKind::PermissionDenied, "as", "no_rights", "no rights"))
        });
        mock.on(rpcs::END_DEVICE_AS_DELETE, |_| {
            Err(ApiError::not_found("as", "end_device_not_found", "not found"))
        });
        mock.on(rpcs::END_DEVICE_NS_DELETE, |_| Ok(json!({})));
        mock.on(rpcs::END_DEVICE_IS_DELETE, |_| Ok(json!({})));
        let opts = CreateOptions {
            abp: true,
            with_session: true,
            ..Default::default()
        };
        let err = create(&client(&mock), device(), &opts)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "no_rights");
        assert_eq!(err.attributes["step"], "AS");
        assert!(!err.attributes.contains_key("rollback_error"));
        let deletes: Vec<String> = mock
            .methods()
            .into_iter()
            .filter(|m| m.ends_with("/Delete"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                rpcs::END_DEVICE_AS_DELETE,
                rpcs::END_DEVICE_NS_DELETE,
                rpcs::END_DEVICE_IS_DELETE
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_rollback_is_attached() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_CREATE, echo);
        mock.on(rpcs::END_DEVICE_NS_SET, |_| {
            Err(ApiError::invalid_argument("ns", "invalid_frequency_plan", "bad plan"))
        });
        mock.on(rpcs::END_DEVICE_NS_DELETE, |_| Ok(json!({})));
        mock.on(rpcs::END_DEVICE_IS_DELETE, |_| {
            Err(ApiError::new(ErrorKind::PermissionDenied, "is", "no_rights", "no rights"))
        });
        let opts = CreateOptions {
            abp: true,
            ..Default::default()
        };
        let err = create(&client(&mock), device(), &opts)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "invalid_frequency_plan");
        assert!(err.attributes.contains_key("rollback_error"));
    }

    #[tokio::test]
    async fn test_request_dev_eui_excludes_claiming() {
        let mock = Arc::new(MockTransport::new());
        let opts = CreateOptions {
            request_dev_eui: true,
            claim_authentication_code: Some("AABB".to_string()),
            ..Default::default()
        };
        let err = create(&client(&mock), device(), &opts)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "request_dev_eui_with_claim");
        assert!(mock.calls().is_empty());
    }
}
