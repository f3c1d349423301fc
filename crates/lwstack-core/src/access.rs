//! API keys and collaborators of applications, gateways, clients, users and
//! organizations.

use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::fieldmask::FieldMask;
use crate::ids::EntityIds;
use crate::registry::{take_list, Paging};

fn access_service(parent: &EntityIds) -> Result<&'static str, ApiError> {
    match parent {
        EntityIds::Application(_) => Ok("ApplicationAccess"),
        EntityIds::Gateway(_) => Ok("GatewayAccess"),
        EntityIds::Client(_) => Ok("ClientAccess"),
        EntityIds::User(_) => Ok("UserAccess"),
        EntityIds::Organization(_) => Ok("OrganizationAccess"),
        EntityIds::EndDevice(_) => Err(ApiError::invalid_argument(
            "cli",
            "no_access",
            "end devices have no API keys or collaborators",
        )),
    }
}

fn method(parent: &EntityIds, name: &str) -> Result<String, ApiError> {
    Ok(format!("ttn.lorawan.v3.{}/{}", access_service(parent)?, name))
}

fn body(parent: &EntityIds, extra: Value) -> Value {
    let mut body = parent.to_json();
    if let (Some(map), Value::Object(extra)) = (body.as_object_mut(), extra) {
        map.extend(extra);
    }
    body
}

/// An API key to create.
#[derive(Debug, Clone, Default)]
pub struct NewApiKey {
    pub name: Option<String>,
    pub rights: Vec<String>,
    pub expires_at: Option<String>,
}

/// Create an API key. The response holds the secret, which is only
/// returned once.
pub async fn create_api_key(
    client: &ApiClient,
    parent: &EntityIds,
    key: &NewApiKey,
) -> Result<Value, CoreError> {
    if key.rights.is_empty() {
        return Err(ApiError::invalid_argument("cli", "no_rights", "no rights given").into());
    }
    let mut extra = json!({ "rights": key.rights });
    if let Some(name) = &key.name {
        extra["name"] = json!(name);
    }
    if let Some(expires_at) = &key.expires_at {
        extra["expires_at"] = json!(expires_at);
    }
    client
        .call(ServiceRole::Identity, &method(parent, "CreateAPIKey")?, body(parent, extra))
        .await
}

pub async fn list_api_keys(
    client: &ApiClient,
    parent: &EntityIds,
    paging: &Paging,
) -> Result<Vec<Value>, CoreError> {
    let response = client
        .call(
            ServiceRole::Identity,
            &method(parent, "ListAPIKeys")?,
            body(parent, serde_json::to_value(paging)?),
        )
        .await?;
    Ok(take_list(response, "api_keys"))
}

pub async fn get_api_key(client: &ApiClient, parent: &EntityIds, key_id: &str) -> Result<Value, CoreError> {
    client
        .call(
            ServiceRole::Identity,
            &method(parent, "GetAPIKey")?,
            body(parent, json!({ "key_id": key_id })),
        )
        .await
}

/// Update the `mask` paths of an API key.
pub async fn update_api_key(
    client: &ApiClient,
    parent: &EntityIds,
    key_id: &str,
    mut api_key: Value,
    mask: &FieldMask,
) -> Result<Value, CoreError> {
    api_key["id"] = json!(key_id);
    client
        .call(
            ServiceRole::Identity,
            &method(parent, "UpdateAPIKey")?,
            body(parent, json!({ "api_key": api_key, "field_mask": mask.to_json() })),
        )
        .await
}

pub async fn delete_api_key(client: &ApiClient, parent: &EntityIds, key_id: &str) -> Result<(), CoreError> {
    client
        .call(
            ServiceRole::Identity,
            &method(parent, "DeleteAPIKey")?,
            body(parent, json!({ "key_id": key_id })),
        )
        .await?;
    Ok(())
}

fn account(collaborator: &EntityIds) -> Result<Value, ApiError> {
    collaborator.to_account_json().ok_or_else(|| {
        ApiError::invalid_argument(
            "cli",
            "no_collaborator",
            "collaborators are users or organizations",
        )
    })
}

pub async fn list_collaborators(
    client: &ApiClient,
    parent: &EntityIds,
    paging: &Paging,
) -> Result<Vec<Value>, CoreError> {
    let response = client
        .call(
            ServiceRole::Identity,
            &method(parent, "ListCollaborators")?,
            body(parent, serde_json::to_value(paging)?),
        )
        .await?;
    Ok(take_list(response, "collaborators"))
}

pub async fn get_collaborator(
    client: &ApiClient,
    parent: &EntityIds,
    collaborator: &EntityIds,
) -> Result<Value, CoreError> {
    client
        .call(
            ServiceRole::Identity,
            &method(parent, "GetCollaborator")?,
            body(parent, json!({ "collaborator": account(collaborator)? })),
        )
        .await
}

/// Set the rights of a collaborator. No rights removes the collaborator.
pub async fn set_collaborator(
    client: &ApiClient,
    parent: &EntityIds,
    collaborator: &EntityIds,
    rights: &[String],
) -> Result<(), CoreError> {
    client
        .call(
            ServiceRole::Identity,
            &method(parent, "SetCollaborator")?,
            body(
                parent,
                json!({ "collaborator": { "ids": account(collaborator)?, "rights": rights } }),
            ),
        )
        .await?;
    Ok(())
}

pub async fn delete_collaborator(
    client: &ApiClient,
    parent: &EntityIds,
    collaborator: &EntityIds,
) -> Result<(), CoreError> {
    client
        .call(
            ServiceRole::Identity,
            &method(parent, "DeleteCollaborator")?,
            body(parent, json!({ "collaborator_ids": account(collaborator)? })),
        )
        .await?;
    Ok(())
}

/// Rights of the caller, as reported by the Identity Server.
pub async fn auth_info(client: &ApiClient) -> Result<Value, CoreError> {
    client
        .call(ServiceRole::Identity, crate::schema::rpcs::AUTH_INFO, json!({}))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use crate::ids::{ApplicationIds, GatewayIds, OrganizationIds};
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

    #[tokio::test]
    async fn test_create_api_key_body() {
        let mock = Arc::new(MockTransport::new());
        mock.on("ttn.lorawan.v3.ApplicationAccess/CreateAPIKey", |_| {
            Ok(json!({"id": "K1", "key": "NNSXS.SECRET"}))
        });
        let parent = EntityIds::Application(ApplicationIds::new("app1"));
        let key = NewApiKey {
            name: Some("ci".to_string()),
            rights: vec!["RIGHT_APPLICATION_ALL".to_string()],
            expires_at: None,
        };
        let created = create_api_key(&client(&mock), &parent, &key).await.unwrap();
        assert_eq!(created["key"], "NNSXS.SECRET");
        let body = &mock.calls()[0].body;
        assert_eq!(body["application_ids"]["application_id"], "app1");
        assert_eq!(body["rights"], json!(["RIGHT_APPLICATION_ALL"]));
        assert!(body.get("expires_at").is_none());
    }

    #[tokio::test]
    async fn test_api_key_without_rights_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let parent = EntityIds::Gateway(GatewayIds {
            gateway_id: "gtw1".to_string(),
            eui: None,
        });
        let err = create_api_key(&client(&mock), &parent, &NewApiKey::default())
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "no_rights");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_set_collaborator_body() {
        let mock = Arc::new(MockTransport::new());
        mock.on("ttn.lorawan.v3.GatewayAccess/SetCollaborator", |_| Ok(json!({})));
        let parent = EntityIds::Gateway(GatewayIds {
            gateway_id: "gtw1".to_string(),
            eui: None,
        });
        let org = EntityIds::Organization(OrganizationIds {
            organization_id: "acme".to_string(),
        });
        set_collaborator(&client(&mock), &parent, &org, &["RIGHT_GATEWAY_INFO".to_string()])
            .await
            .unwrap();
        let body = &mock.calls()[0].body;
        assert_eq!(
            body["collaborator"]["ids"],
            json!({"organization_ids": {"organization_id": "acme"}})
        );
        assert_eq!(body["gateway_ids"]["gateway_id"], "gtw1");
    }
}
