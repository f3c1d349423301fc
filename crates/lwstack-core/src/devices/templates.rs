//! End device templates and QR codes.

use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::fieldmask::{value, FieldMask};
use crate::registry::take_list;
use crate::schema::rpcs;

/// Formats the template converter understands.
pub async fn list_formats(client: &ApiClient) -> Result<Value, CoreError> {
    let response = client
        .call(ServiceRole::DeviceTemplateConverter, rpcs::TEMPLATE_LIST_FORMATS, json!({}))
        .await?;
    Ok(response.get("formats").cloned().unwrap_or_else(|| json!({})))
}

/// Convert vendor data into end device templates.
pub async fn convert(client: &ApiClient, format_id: &str, data: &[u8]) -> Result<Vec<Value>, CoreError> {
    let body = json!({
        "format_id": format_id,
        "data": base64::engine::general_purpose::STANDARD.encode(data),
    });
    let stream = client
        .open_stream(ServiceRole::DeviceTemplateConverter, rpcs::TEMPLATE_CONVERT, body)
        .await?;
    let (_sender, mut receiver) = stream.split();
    let mut templates = Vec::new();
    while let Some(message) = receiver.recv_until(client.cancel_token()).await {
        let message = message?;
        templates.push(message.get("result").cloned().unwrap_or(message));
    }
    debug!(count = templates.len(), format_id, "converted end device templates");
    Ok(templates)
}

fn template_paths(template: &Value) -> FieldMask {
    value::get(template, "field_mask.paths")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect()
}

fn mapping_key(template: &Value) -> &str {
    template
        .get("mapping_key")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Overlay a template with the mapping of the same mapping key.
///
/// The mapping's paths are copied onto the template's end device and its
/// field mask is extended. A template without a matching mapping fails
/// with `mapped_end_device_not_found`.
pub fn apply_mapping(template: &mut Value, mappings: &[Value]) -> Result<(), ApiError> {
    let key = mapping_key(template).to_string();
    let mapping = mappings
        .iter()
        .find(|m| mapping_key(m) == key)
        .ok_or_else(|| {
            ApiError::not_found(
                "cli",
                "mapped_end_device_not_found",
                format!("no mapped end device for mapping key `{}`", key),
            )
            .with_attribute("mapping_key", key.clone())
        })?;

    let mut paths = template_paths(template);
    let mapped = template_paths(mapping);
    let source = mapping.get("end_device").cloned().unwrap_or_else(|| json!({}));
    if !template.get("end_device").is_some_and(Value::is_object) {
        template["end_device"] = json!({});
    }
    for path in mapped.iter() {
        if let Some(v) = value::get(&source, path) {
            value::set(&mut template["end_device"], path, v.clone());
        }
        paths.insert(path);
    }
    value::set(template, "field_mask.paths", json!(paths.to_vec()));
    if let Some(map) = template.as_object_mut() {
        map.remove("mapping_key");
    }
    Ok(())
}

/// Convert vendor data and overlay each template with its mapping, when
/// mappings are given.
pub async fn from_data(
    client: &ApiClient,
    format_id: &str,
    data: &[u8],
    mappings: &[Value],
) -> Result<Vec<Value>, CoreError> {
    let mut templates = convert(client, format_id, data).await?;
    if !mappings.is_empty() {
        for template in &mut templates {
            apply_mapping(template, mappings)?;
        }
    }
    Ok(templates)
}

pub async fn list_qr_formats(client: &ApiClient) -> Result<Vec<Value>, CoreError> {
    let response = client
        .call(ServiceRole::QrCode, rpcs::QR_LIST_FORMATS, json!({}))
        .await?;
    let formats = response.get("formats").cloned().unwrap_or_else(|| json!({}));
    Ok(match formats {
        Value::Object(map) => map
            .into_iter()
            .map(|(id, mut format)| {
                format["id"] = json!(id);
                format
            })
            .collect(),
        other => take_list(json!({ "formats": other }), "formats"),
    })
}

/// Generate a QR code for an end device. The response carries the text and
/// a PNG image when `image_size` is set.
pub async fn generate_qr(
    client: &ApiClient,
    format_id: &str,
    end_device: &Value,
    image_size: Option<u32>,
) -> Result<Value, CoreError> {
    let mut body = json!({ "format_id": format_id, "end_device": end_device });
    if let Some(image_size) = image_size {
        body["image"] = json!({ "image_size": image_size });
    }
    client
        .call(ServiceRole::QrCode, rpcs::QR_GENERATE, body)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_apply_mapping_overlays_paths() {
        let mut template = json!({
            "end_device": {"version_ids": {"brand_id": "acme"}},
            "field_mask": {"paths": ["version_ids"]},
            "mapping_key": "sensor-1"
        });
        let mappings = vec![json!({
            "end_device": {"ids": {"device_id": "room-42"}, "name": "Room 42"},
            "field_mask": {"paths": ["ids.device_id", "name"]},
            "mapping_key": "sensor-1"
        })];
        apply_mapping(&mut template, &mappings).unwrap();
        assert_eq!(template["end_device"]["ids"]["device_id"], "room-42");
        assert_eq!(template["end_device"]["version_ids"]["brand_id"], "acme");
        assert_eq!(
            template["field_mask"]["paths"],
            json!(["ids.device_id", "name", "version_ids"])
        );
        assert!(template.get("mapping_key").is_none());
    }

    #[test]
    fn test_missing_mapping_is_not_found() {
        let mut template = json!({"end_device": {}, "mapping_key": "x"});
        let err = apply_mapping(&mut template, &[json!({"mapping_key": "y"})]).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.name, "mapped_end_device_not_found");
    }

    #[tokio::test]
    async fn test_from_data_collects_stream() {
        let mock = Arc::new(MockTransport::new());
        let sent = mock.on_stream(
            rpcs::TEMPLATE_CONVERT,
            vec![
                Ok(json!({"result": {"end_device": {"name": "a"}, "field_mask": {"paths": ["name"]}}})),
                Ok(json!({"result": {"end_device": {"name": "b"}, "field_mask": {"paths": ["name"]}}})),
            ],
        );
        let client = ApiClient::new(
            mock.clone(),
            ServiceAddresses::for_host("eu1.example.com", false),
            None,
            CancellationToken::new(),
        );
        let templates = from_data(&client, "the-things-products", b"csv", &[]).await.unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[1]["end_device"]["name"], "b");
        let first = sent.lock().unwrap()[0].clone();
        assert_eq!(first["data"], "Y3N2");
        assert_eq!(mock.calls()[0].role, ServiceRole::DeviceTemplateConverter);
    }
}
