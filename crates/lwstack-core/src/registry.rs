//! Generic registry operations for entities described by an
//! [`EntityDescriptor`].

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::config::addresses::host_of;
use crate::error::{ApiError, CodecError, CoreError, ErrorKind};
use crate::fieldmask::{value, FieldMask};
use crate::ids::{validate_id, EntityIds};
use crate::lorawan::Eui64;
use crate::schema::rpcs;
use crate::schema::EntityDescriptor;

/// Paging and ordering of list and search calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Paging {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Filters of a search call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_contains: Option<String>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub attributes_contain: std::collections::BTreeMap<String, String>,
}

fn merge_into(body: &mut Value, extra: Value) {
    if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
}

/// Restrict a read mask to what the entity exposes.
pub fn read_mask(entity: &EntityDescriptor, rpc: &str, mask: &FieldMask) -> FieldMask {
    let mut mask = mask.clone();
    mask.retain_allowed(rpc, &entity.readable_paths());
    mask
}

/// Create an entity. Owned entities need a user or organization as owner.
pub async fn create(
    client: &ApiClient,
    entity: &EntityDescriptor,
    id: &str,
    mut message: Value,
    owner: Option<&EntityIds>,
) -> Result<Value, CoreError> {
    validate_id(entity.id_field, id)?;
    value::set(&mut message, &format!("ids.{}", entity.id_field), json!(id));

    let mut body = json!({ entity.singular: message });
    if entity.owned {
        let owner = owner
            .and_then(EntityIds::to_account_json)
            .ok_or_else(|| {
                ApiError::invalid_argument(
                    "cli",
                    "no_collaborator",
                    format!("creating {} needs a user or organization", entity.singular),
                )
            })?;
        body["collaborator"] = owner;
    }
    debug!(entity = entity.singular, id, "creating");
    client.call(entity.role, entity.rpcs.create, body).await
}

pub async fn get(
    client: &ApiClient,
    entity: &EntityDescriptor,
    id: &str,
    mask: &FieldMask,
) -> Result<Value, CoreError> {
    let mask = read_mask(entity, entity.rpcs.get, mask);
    let body = json!({ entity.ids_field: entity.ids_json(id), "field_mask": mask.to_json() });
    client.call(entity.role, entity.rpcs.get, body).await
}

/// List entities, optionally those of a collaborator.
pub async fn list(
    client: &ApiClient,
    entity: &EntityDescriptor,
    collaborator: Option<&EntityIds>,
    mask: &FieldMask,
    paging: &Paging,
) -> Result<Vec<Value>, CoreError> {
    let mask = read_mask(entity, entity.rpcs.list, mask);
    let mut body = json!({ "field_mask": mask.to_json() });
    if let Some(account) = collaborator.and_then(EntityIds::to_account_json) {
        body["collaborator"] = account;
    }
    merge_into(&mut body, serde_json::to_value(paging)?);
    let response = client.call(entity.role, entity.rpcs.list, body).await?;
    Ok(take_list(response, entity.list_field))
}

pub async fn search(
    client: &ApiClient,
    entity: &EntityDescriptor,
    query: &SearchQuery,
    mask: &FieldMask,
    paging: &Paging,
) -> Result<Vec<Value>, CoreError> {
    let rpc = entity.rpcs.search.ok_or_else(|| {
        ApiError::invalid_argument(
            "cli",
            "search_unsupported",
            format!("{} cannot be searched", entity.name),
        )
    })?;
    let mask = read_mask(entity, rpc, mask);
    let mut body = json!({ "field_mask": mask.to_json() });
    merge_into(&mut body, serde_json::to_value(query)?);
    merge_into(&mut body, serde_json::to_value(paging)?);
    let response = client.call(entity.role, rpc, body).await?;
    Ok(take_list(response, entity.list_field))
}

/// Update the paths in `mask` of an entity.
pub async fn update(
    client: &ApiClient,
    entity: &EntityDescriptor,
    id: &str,
    mut message: Value,
    mask: &FieldMask,
) -> Result<Value, CoreError> {
    if mask.is_empty() {
        warn!(entity = entity.singular, id, "no fields to update");
    }
    value::set(&mut message, &format!("ids.{}", entity.id_field), json!(id));
    let body = json!({ entity.singular: message, "field_mask": mask.to_json() });
    client.call(entity.role, entity.rpcs.update, body).await
}

pub async fn delete(client: &ApiClient, entity: &EntityDescriptor, id: &str) -> Result<(), CoreError> {
    client
        .call(entity.role, entity.rpcs.delete, entity.ids_json(id))
        .await?;
    Ok(())
}

pub async fn restore(client: &ApiClient, entity: &EntityDescriptor, id: &str) -> Result<(), CoreError> {
    client
        .call(entity.role, entity.rpcs.restore, entity.ids_json(id))
        .await?;
    Ok(())
}

pub async fn purge(client: &ApiClient, entity: &EntityDescriptor, id: &str) -> Result<(), CoreError> {
    client
        .call(entity.role, entity.rpcs.purge, entity.ids_json(id))
        .await?;
    Ok(())
}

/// Pull the entity array out of a list response. Empty lists are omitted
/// from responses.
pub fn take_list(mut response: Value, field: &str) -> Vec<Value> {
    match response.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Ask the Identity Server for the next DevEUI of an application's block.
pub async fn issue_dev_eui(client: &ApiClient, application_id: &str) -> Result<Eui64, CoreError> {
    let response = client
        .call(
            ServiceRole::Identity,
            rpcs::APPLICATION_ISSUE_DEV_EUI,
            json!({ "application_id": application_id }),
        )
        .await?;
    let dev_eui = response
        .get("dev_eui")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::new(ErrorKind::Internal, "cli", "no_dev_eui", "no DevEUI issued"))?;
    let dev_eui = dev_eui
        .parse()
        .map_err(|e: CodecError| ApiError::new(ErrorKind::Internal, "cli", "invalid_dev_eui", e.to_string()))?;
    Ok(dev_eui)
}

/// Connection statistics of a gateway.
///
/// The gateway must be connected to the configured Gateway Server; asking
/// another one would report it as disconnected.
pub async fn gateway_connection_stats(client: &ApiClient, gateway_id: &str) -> Result<Value, CoreError> {
    let ids = json!({ "gateway_id": gateway_id });
    let gateway = client
        .call(
            ServiceRole::Identity,
            rpcs::GATEWAY_GET,
            json!({ "gateway_ids": ids.clone(), "field_mask": { "paths": ["gateway_server_address"] } }),
        )
        .await?;
    if let (Some(stored), Some(configured)) = (
        gateway.get("gateway_server_address").and_then(Value::as_str),
        client.addresses().address(ServiceRole::Gateway),
    ) {
        if !stored.is_empty() && host_of(stored) != host_of(configured) {
            return Err(ApiError::new(
                ErrorKind::Aborted,
                "cli",
                "gateway_server_address_mismatch",
                format!("gateway is registered on `{}`, not `{}`", stored, configured),
            )
            .with_attribute("stored", stored)
            .with_attribute("configured", configured)
            .into());
        }
    }
    client
        .call(ServiceRole::Gateway, rpcs::GATEWAY_CONNECTION_STATS, ids)
        .await
}
