//! Session and root key generation for new end devices.

use serde_json::{json, Value};
use tracing::debug;

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::fieldmask::value;
use crate::lorawan::{AesKey, DevAddr, MacVersion, SessionKeys};
use crate::schema::rpcs;

/// MAC version of a device message, `lorawan_version`, defaulting to 1.0.3.
pub fn mac_version_of(device: &Value) -> Result<MacVersion, ApiError> {
    match device.get("lorawan_version").and_then(Value::as_str) {
        None | Some("") => Ok(MacVersion::default()),
        Some(v) => v.parse().map_err(|_| {
            ApiError::invalid_argument("cli", "mac_version", format!("unknown MAC version `{}`", v))
                .with_attribute("version", v)
        }),
    }
}

fn key_at(device: &Value, path: &str) -> Option<AesKey> {
    value::get(device, path)
        .and_then(Value::as_str)
        .and_then(|k| k.parse().ok())
}

fn set_key_if_missing(device: &mut Value, path: &str, key: AesKey) {
    if key_at(device, path).is_none() {
        value::set(device, path, json!(key));
    }
}

/// Ask the Network Server for a DevAddr.
pub async fn generate_dev_addr(client: &ApiClient) -> Result<DevAddr, CoreError> {
    let response = client
        .call(ServiceRole::Network, rpcs::NS_GENERATE_DEV_ADDR, json!({}))
        .await?;
    let dev_addr = response
        .get("dev_addr")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(dev_addr.parse()?)
}

/// Fill in an ABP session: a DevAddr from the Network Server and random
/// session keys. On 1.0.x the three network keys are one NwkSKey. Keys and
/// a DevAddr already present are kept.
pub async fn generate_session(client: &ApiClient, device: &mut Value) -> Result<(), CoreError> {
    let version = mac_version_of(device)?;

    let dev_addr = match value::get(device, "session.dev_addr").and_then(Value::as_str) {
        Some(existing) if !existing.is_empty() => existing.parse::<DevAddr>()?,
        _ => generate_dev_addr(client).await?,
    };
    value::set(device, "session.dev_addr", json!(dev_addr));
    value::set(device, "ids.dev_addr", json!(dev_addr));

    let keys = if version.is_1_1() {
        SessionKeys {
            app_s_key: Some(AesKey::generate()),
            f_nwk_s_int_key: Some(AesKey::generate()),
            s_nwk_s_int_key: Some(AesKey::generate()),
            nwk_s_enc_key: Some(AesKey::generate()),
        }
    } else {
        let nwk_s_key = key_at(device, "session.keys.f_nwk_s_int_key.key").unwrap_or_else(AesKey::generate);
        SessionKeys::legacy(nwk_s_key, AesKey::generate())
    };
    let generated = [
        ("session.keys.app_s_key.key", keys.app_s_key),
        ("session.keys.f_nwk_s_int_key.key", keys.f_nwk_s_int_key),
        ("session.keys.s_nwk_s_int_key.key", keys.s_nwk_s_int_key),
        ("session.keys.nwk_s_enc_key.key", keys.nwk_s_enc_key),
    ];
    for (path, key) in generated {
        if let Some(key) = key {
            set_key_if_missing(device, path, key);
        }
    }
    debug!(%dev_addr, version = %version, "generated session");
    Ok(())
}

/// Fill in random root keys: AppKey, and NwkKey on 1.1.
pub fn generate_root_keys(device: &mut Value) -> Result<(), ApiError> {
    let version = mac_version_of(device)?;
    set_key_if_missing(device, "root_keys.app_key.key", AesKey::generate());
    if version.is_1_1() {
        set_key_if_missing(device, "root_keys.nwk_key.key", AesKey::generate());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        mock.on(rpcs::NS_GENERATE_DEV_ADDR, |_| Ok(json!({"dev_addr": "26011234"})));
        ApiClient::new(
            mock.clone(),
            ServiceAddresses::for_host("eu1.example.com", false),
            None,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_legacy_session_shares_network_key() {
        let mock = Arc::new(MockTransport::new());
        let mut device = json!({"lorawan_version": "MAC_V1_0_3"});
        generate_session(&client(&mock), &mut device).await.unwrap();

        assert_eq!(device["session"]["dev_addr"], "26011234");
        assert_eq!(device["ids"]["dev_addr"], "26011234");
        let keys = &device["session"]["keys"];
        let nwk = &keys["f_nwk_s_int_key"]["key"];
        assert_eq!(&keys["s_nwk_s_int_key"]["key"], nwk);
        assert_eq!(&keys["nwk_s_enc_key"]["key"], nwk);
        assert_ne!(&keys["app_s_key"]["key"], nwk);
        assert_eq!(nwk.as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_1_1_session_has_distinct_keys() {
        let mock = Arc::new(MockTransport::new());
        let mut device = json!({
            "lorawan_version": "1.1",
            "session": {"keys": {"app_s_key": {"key": "000102030405060708090A0B0C0D0E0F"}}}
        });
        generate_session(&client(&mock), &mut device).await.unwrap();
        let keys = &device["session"]["keys"];
        assert_eq!(keys["app_s_key"]["key"], "000102030405060708090A0B0C0D0E0F");
        assert_ne!(keys["f_nwk_s_int_key"]["key"], keys["s_nwk_s_int_key"]["key"]);
    }

    #[tokio::test]
    async fn test_existing_dev_addr_is_kept() {
        let mock = Arc::new(MockTransport::new());
        let mut device = json!({"session": {"dev_addr": "01020304"}});
        generate_session(&client(&mock), &mut device).await.unwrap();
        assert_eq!(device["session"]["dev_addr"], "01020304");
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_root_keys_per_version() {
        let mut legacy = json!({});
        generate_root_keys(&mut legacy).unwrap();
        assert!(legacy["root_keys"]["app_key"]["key"].is_string());
        assert!(legacy["root_keys"].get("nwk_key").is_none());

        let mut v1_1 = json!({"lorawan_version": "MAC_V1_1"});
        generate_root_keys(&mut v1_1).unwrap();
        assert!(v1_1["root_keys"]["nwk_key"]["key"].is_string());

        let err = generate_root_keys(&mut json!({"lorawan_version": "2.0"})).unwrap_err();
        assert_eq!(err.name, "mac_version");
    }
}
