//! Application Server integrations: webhooks, pub/subs, storage and
//! application packages.

use serde::Serialize;
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::CoreError;
use crate::fieldmask::FieldMask;
use crate::ids::ApplicationIds;
use crate::registry::take_list;
use crate::schema::rpcs;
use crate::schema::FieldKind::String as Text;
use crate::schema::FieldKind::{Bool, Enum, StringMap, Uint};
use crate::schema::{field, FieldSpec};

/// An integration kind stored per application on the Application Server.
#[derive(Debug)]
pub struct IntegrationKind {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Message field in set requests.
    pub message_field: &'static str,
    pub id_field: &'static str,
    pub list_field: &'static str,
    pub fields: &'static [FieldSpec],
    pub set: &'static str,
    pub get: &'static str,
    pub list: &'static str,
    pub delete: &'static str,
}

impl IntegrationKind {
    /// `{"application_ids": {...}, "<id_field>": id}`.
    pub fn ids(&self, application_id: &str, id: &str) -> Value {
        let mut ids = json!({ "application_ids": ApplicationIds::new(application_id) });
        ids[self.id_field] = json!(id);
        ids
    }

    pub fn readable_paths(&self) -> &'static [&'static str] {
        rpcs::allowed_paths(self.get).unwrap_or(&[])
    }
}

const WEBHOOK_FORMATS: &[&str] = &["json", "protobuf"];

pub static WEBHOOK_FIELDS: &[FieldSpec] = &[
    field("base_url", Text, "base URL the paths are appended to"),
    field("format", Enum(WEBHOOK_FORMATS), "message format"),
    field("headers", StringMap, "HTTP headers as key=value"),
    field("downlink_api_key", Text, "API key for downlink queue operations"),
    field("uplink_message.path", Text, "path of uplink messages"),
    field("uplink_normalized.path", Text, "path of normalized uplink payloads"),
    field("join_accept.path", Text, "path of join-accepts"),
    field("downlink_ack.path", Text, "path of downlink acks"),
    field("downlink_nack.path", Text, "path of downlink nacks"),
    field("downlink_sent.path", Text, "path of sent downlinks"),
    field("downlink_failed.path", Text, "path of failed downlinks"),
    field("downlink_queued.path", Text, "path of queued downlinks"),
    field("downlink_queue_invalidated.path", Text, "path of invalidated downlink queues"),
    field("location_solved.path", Text, "path of solved locations"),
    field("service_data.path", Text, "path of service data"),
    field("template_ids.template_id", Text, "webhook template"),
    field("template_fields", StringMap, "template fields as key=value"),
];

pub static WEBHOOKS: IntegrationKind = IntegrationKind {
    name: "webhooks",
    aliases: &["webhook", "wh"],
    message_field: "webhook",
    id_field: "webhook_id",
    list_field: "webhooks",
    fields: WEBHOOK_FIELDS,
    set: rpcs::WEBHOOK_SET,
    get: rpcs::WEBHOOK_GET,
    list: rpcs::WEBHOOK_LIST,
    delete: rpcs::WEBHOOK_DELETE,
};

const QOS: &[&str] = &["AT_MOST_ONCE", "AT_LEAST_ONCE", "EXACTLY_ONCE"];

pub static PUBSUB_FIELDS: &[FieldSpec] = &[
    field("base_topic", Text, "topic prefix"),
    field("format", Enum(WEBHOOK_FORMATS), "message format"),
    field("nats.server_url", Text, "NATS server URL"),
    field("mqtt.server_url", Text, "MQTT server URL"),
    field("mqtt.client_id", Text, "MQTT client ID"),
    field("mqtt.username", Text, "MQTT username"),
    field("mqtt.password", Text, "MQTT password"),
    field("mqtt.subscribe_qos", Enum(QOS), "QoS of subscriptions"),
    field("mqtt.publish_qos", Enum(QOS), "QoS of publications"),
    field("mqtt.use_tls", Bool, "connect over TLS"),
    field("uplink_message.topic", Text, "topic of uplink messages"),
    field("uplink_normalized.topic", Text, "topic of normalized uplink payloads"),
    field("join_accept.topic", Text, "topic of join-accepts"),
    field("downlink_ack.topic", Text, "topic of downlink acks"),
    field("downlink_nack.topic", Text, "topic of downlink nacks"),
    field("downlink_sent.topic", Text, "topic of sent downlinks"),
    field("downlink_failed.topic", Text, "topic of failed downlinks"),
    field("downlink_queued.topic", Text, "topic of queued downlinks"),
    field("downlink_queue_invalidated.topic", Text, "topic of invalidated downlink queues"),
    field("location_solved.topic", Text, "topic of solved locations"),
    field("service_data.topic", Text, "topic of service data"),
    field("downlink_push.topic", Text, "topic to push downlinks on"),
    field("downlink_replace.topic", Text, "topic to replace downlinks on"),
];

pub static PUBSUBS: IntegrationKind = IntegrationKind {
    name: "pubsubs",
    aliases: &["pubsub", "ps"],
    message_field: "pubsub",
    id_field: "pub_sub_id",
    list_field: "pubsubs",
    fields: PUBSUB_FIELDS,
    set: rpcs::PUBSUB_SET,
    get: rpcs::PUBSUB_GET,
    list: rpcs::PUBSUB_LIST,
    delete: rpcs::PUBSUB_DELETE,
};

fn read_mask(kind: &IntegrationKind, rpc: &str, mask: &FieldMask) -> FieldMask {
    let mut mask = mask.clone();
    mask.retain_allowed(rpc, kind.readable_paths());
    mask
}

/// Create or update an integration. Create passes every set path.
pub async fn set(
    client: &ApiClient,
    kind: &IntegrationKind,
    application_id: &str,
    id: &str,
    mut message: Value,
    mask: &FieldMask,
) -> Result<Value, CoreError> {
    message["ids"] = kind.ids(application_id, id);
    let body = json!({ kind.message_field: message, "field_mask": mask.to_json() });
    client.call(ServiceRole::Application, kind.set, body).await
}

pub async fn get(
    client: &ApiClient,
    kind: &IntegrationKind,
    application_id: &str,
    id: &str,
    mask: &FieldMask,
) -> Result<Value, CoreError> {
    let mask = read_mask(kind, kind.get, mask);
    let body = json!({ "ids": kind.ids(application_id, id), "field_mask": mask.to_json() });
    client.call(ServiceRole::Application, kind.get, body).await
}

pub async fn list(
    client: &ApiClient,
    kind: &IntegrationKind,
    application_id: &str,
    mask: &FieldMask,
) -> Result<Vec<Value>, CoreError> {
    let mask = read_mask(kind, kind.list, mask);
    let body = json!({
        "application_ids": ApplicationIds::new(application_id),
        "field_mask": mask.to_json(),
    });
    let response = client.call(ServiceRole::Application, kind.list, body).await?;
    Ok(take_list(response, kind.list_field))
}

pub async fn delete(
    client: &ApiClient,
    kind: &IntegrationKind,
    application_id: &str,
    id: &str,
) -> Result<(), CoreError> {
    client
        .call(ServiceRole::Application, kind.delete, kind.ids(application_id, id))
        .await?;
    Ok(())
}

/// Webhook templates known to the Application Server.
pub async fn list_webhook_templates(client: &ApiClient) -> Result<Vec<Value>, CoreError> {
    let response = client
        .call(
            ServiceRole::Application,
            rpcs::WEBHOOK_LIST_TEMPLATES,
            json!({ "field_mask": { "paths": ["ids", "name", "description"] } }),
        )
        .await?;
    Ok(take_list(response, "templates"))
}

/// Filter of stored application uplinks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageQuery {
    pub application_ids: ApplicationIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_device_ids: Option<Value>,
    /// Message type, such as `uplink_message`.
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Duration such as `1h`, relative to now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_port: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

pub static STORAGE_FIELDS: &[FieldSpec] = &[field("f_port", Uint, "FPort of stored uplinks")];

/// Stored application uplinks, collected from the storage stream.
pub async fn get_stored_uplinks(client: &ApiClient, query: &StorageQuery) -> Result<Vec<Value>, CoreError> {
    let stream = client
        .open_stream(
            ServiceRole::Application,
            rpcs::STORAGE_GET_UPLINKS,
            serde_json::to_value(query)?,
        )
        .await?;
    let (_sender, mut receiver) = stream.split();
    let mut results = Vec::new();
    while let Some(message) = receiver.recv_until(client.cancel_token()).await {
        let message = message?;
        results.push(message.get("result").cloned().unwrap_or(message));
    }
    Ok(results)
}

/// Count of stored uplinks per end device.
pub async fn count_stored_uplinks(client: &ApiClient, query: &StorageQuery) -> Result<Value, CoreError> {
    let response = client
        .call(
            ServiceRole::Application,
            rpcs::STORAGE_COUNT_UPLINKS,
            serde_json::to_value(query)?,
        )
        .await?;
    Ok(response.get("count").cloned().unwrap_or_else(|| json!({})))
}

/// Default application package associations.
pub async fn list_default_package_associations(
    client: &ApiClient,
    application_id: &str,
) -> Result<Vec<Value>, CoreError> {
    let response = client
        .call(
            ServiceRole::Application,
            rpcs::PACKAGES_LIST_DEFAULT_ASSOCIATIONS,
            json!({
                "ids": ApplicationIds::new(application_id),
                "field_mask": { "paths": ["package_name", "data"] },
            }),
        )
        .await?;
    Ok(take_list(response, "defaults"))
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

    #[tokio::test]
    async fn test_webhook_set_body() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::WEBHOOK_SET, |body| Ok(body["webhook"].clone()));
        let mask: FieldMask = ["base_url", "format"].into_iter().collect();
        let wh = set(
            &client(&mock),
            &WEBHOOKS,
            "app1",
            "wh1",
            json!({"base_url": "https://example.com", "format": "json"}),
            &mask,
        )
        .await
        .unwrap();
        assert_eq!(wh["ids"]["webhook_id"], "wh1");
        assert_eq!(wh["ids"]["application_ids"]["application_id"], "app1");
        assert_eq!(mock.calls()[0].role, ServiceRole::Application);
    }

    #[tokio::test]
    async fn test_pubsub_get_filters_mask() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::PUBSUB_GET, |_| Ok(json!({})));
        let mask: FieldMask = ["mqtt", "base_url"].into_iter().collect();
        get(&client(&mock), &PUBSUBS, "app1", "ps1", &mask).await.unwrap();
        let body = &mock.calls()[0].body;
        assert_eq!(body["field_mask"], json!({"paths": ["mqtt"]}));
        assert_eq!(body["ids"]["pub_sub_id"], "ps1");
    }

    #[tokio::test]
    async fn test_stored_uplinks_are_collected() {
        let mock = Arc::new(MockTransport::new());
        mock.on_stream(
            rpcs::STORAGE_GET_UPLINKS,
            vec![
                Ok(json!({"result": {"uplink_message": {"f_port": 1}}})),
                Ok(json!({"result": {"uplink_message": {"f_port": 2}}})),
            ],
        );
        let query = StorageQuery {
            application_ids: ApplicationIds::new("app1"),
            limit: Some(2),
            ..Default::default()
        };
        let uplinks = get_stored_uplinks(&client(&mock), &query).await.unwrap();
        assert_eq!(uplinks.len(), 2);
        assert_eq!(uplinks[1]["uplink_message"]["f_port"], 2);
        assert_eq!(mock.calls()[0].body["limit"], 2);
    }
}
