//! An in-memory cluster of end device registries on top of the mock
//! transport. Each registry stores the paths it is written and answers
//! reads with the requested paths only.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use lwstack_core::api::mock::MockTransport;
use lwstack_core::fieldmask::value;
use lwstack_core::schema::rpcs;
use lwstack_core::{ApiClient, ApiError, ErrorKind, ServiceAddresses};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub const HOST: &str = "eu1.example.com";

type Store = Arc<Mutex<BTreeMap<String, Value>>>;

pub struct FakeCluster {
    pub mock: Arc<MockTransport>,
    store: Store,
    claimable: Arc<Mutex<BTreeSet<String>>>,
}

fn key(registry: &str, application_id: &str, device_id: &str) -> String {
    format!("{}/{}/{}", registry, application_id, device_id)
}

/// Identifiers of the device a request is about.
fn device_of(body: &Value) -> (String, String) {
    let ids = body
        .get("end_device")
        .and_then(|d| d.get("ids"))
        .or_else(|| body.get("end_device_ids"))
        .unwrap_or(body);
    let app = value::get(ids, "application_ids.application_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let dev = ids.get("device_id").and_then(Value::as_str).unwrap_or_default();
    (app.to_string(), dev.to_string())
}

fn mask_of(body: &Value) -> Vec<String> {
    value::get(body, "field_mask.paths")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn not_found(registry: &str) -> ApiError {
    ApiError::not_found(registry, "end_device_not_found", "end device not found")
}

fn read(stored: &Value, paths: &[String]) -> Value {
    let mut out = value::project(stored, paths.iter().map(String::as_str));
    out["ids"] = stored["ids"].clone();
    out
}

fn write(stored: &mut Value, device: &Value, paths: &[String]) {
    if let Some(Value::Object(ids)) = device.get("ids") {
        for (k, v) in ids {
            stored["ids"][k] = v.clone();
        }
    }
    for path in paths {
        match value::get(device, path) {
            Some(v) => value::set(stored, path, v.clone()),
            None => {
                value::remove(stored, path);
            }
        }
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self {
            mock: Arc::new(MockTransport::new()),
            store: Arc::default(),
            claimable: Arc::default(),
        };
        for (registry, get, set, delete, batch) in [
            (
                "IS",
                rpcs::END_DEVICE_IS_GET,
                rpcs::END_DEVICE_IS_UPDATE,
                rpcs::END_DEVICE_IS_DELETE,
                rpcs::END_DEVICE_IS_BATCH_DELETE,
            ),
            (
                "NS",
                rpcs::END_DEVICE_NS_GET,
                rpcs::END_DEVICE_NS_SET,
                rpcs::END_DEVICE_NS_DELETE,
                rpcs::END_DEVICE_NS_BATCH_DELETE,
            ),
            (
                "AS",
                rpcs::END_DEVICE_AS_GET,
                rpcs::END_DEVICE_AS_SET,
                rpcs::END_DEVICE_AS_DELETE,
                rpcs::END_DEVICE_AS_BATCH_DELETE,
            ),
            (
                "JS",
                rpcs::END_DEVICE_JS_GET,
                rpcs::END_DEVICE_JS_SET,
                rpcs::END_DEVICE_JS_DELETE,
                rpcs::END_DEVICE_JS_BATCH_DELETE,
            ),
        ] {
            cluster.serve_registry(registry, get, set, delete, batch);
        }

        let store = cluster.store.clone();
        cluster.mock.on(rpcs::END_DEVICE_IS_CREATE, move |body| {
            let (app, dev) = device_of(body);
            let mut store = store.lock().unwrap();
            let k = key("IS", &app, &dev);
            if store.contains_key(&k) {
                return Err(ApiError::new(
                    ErrorKind::AlreadyExists,
                    "IS",
                    "end_device_exists",
                    "end device exists",
                ));
            }
            let mut stored = json!({ "ids": {} });
            let paths = mask_of(body);
            write(&mut stored, &body["end_device"], &paths);
            store.insert(k, stored.clone());
            Ok(read(&stored, &paths))
        });

        cluster.mock.on(rpcs::APPLICATION_GET, |body| {
            Ok(json!({ "ids": body["application_ids"].clone() }))
        });
        cluster
            .mock
            .on(rpcs::NS_GENERATE_DEV_ADDR, |_| Ok(json!({ "dev_addr": "260B1234" })));
        cluster.mock.on(rpcs::JS_GET_DEFAULT_JOIN_EUI, |_| {
            Ok(json!({ "join_eui": "70B3D57ED0000000" }))
        });

        let claimable = cluster.claimable.clone();
        cluster.mock.on(rpcs::CLAIM_INFO_BY_JOIN_EUI, move |body| {
            let join_eui = body["join_eui"].as_str().unwrap_or_default().to_string();
            let supports = claimable.lock().unwrap().contains(&join_eui);
            Ok(json!({ "join_eui": join_eui, "supports_claiming": supports }))
        });
        let claimable = cluster.claimable.clone();
        cluster.mock.on(rpcs::CLAIM_INFO_BY_JOIN_EUIS, move |body| {
            let claimable = claimable.lock().unwrap();
            let infos: Vec<Value> = body["requests"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|r| {
                    let join_eui = r["join_eui"].as_str().unwrap_or_default();
                    json!({ "join_eui": join_eui, "supports_claiming": claimable.contains(join_eui) })
                })
                .collect();
            Ok(json!({ "infos": infos }))
        });
        for rpc in [rpcs::CLAIM, rpcs::UNCLAIM, rpcs::BATCH_UNCLAIM] {
            cluster.mock.on(rpc, |_| Ok(json!({})));
        }
        cluster
    }

    fn serve_registry(
        &self,
        registry: &'static str,
        get: &str,
        set: &str,
        delete: &str,
        batch: &str,
    ) {
        let store = self.store.clone();
        self.mock.on(get, move |body| {
            let (app, dev) = device_of(body);
            let store = store.lock().unwrap();
            let stored = store.get(&key(registry, &app, &dev)).ok_or_else(|| not_found(registry))?;
            Ok(read(stored, &mask_of(body)))
        });

        let store = self.store.clone();
        self.mock.on(set, move |body| {
            let (app, dev) = device_of(body);
            let mut store = store.lock().unwrap();
            let k = key(registry, &app, &dev);
            // The Identity Server updates; the others upsert.
            if registry == "IS" && !store.contains_key(&k) {
                return Err(not_found(registry));
            }
            let stored = store.entry(k).or_insert_with(|| json!({ "ids": {} }));
            let paths = mask_of(body);
            write(stored, &body["end_device"], &paths);
            Ok(read(stored, &paths))
        });

        let store = self.store.clone();
        self.mock.on(delete, move |body| {
            let (app, dev) = device_of(body);
            store
                .lock()
                .unwrap()
                .remove(&key(registry, &app, &dev))
                .map(|_| json!({}))
                .ok_or_else(|| not_found(registry))
        });

        let store = self.store.clone();
        self.mock.on(batch, move |body| {
            let app = value::get(body, "application_ids.application_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let mut store = store.lock().unwrap();
            for dev in body["device_ids"].as_array().into_iter().flatten() {
                store.remove(&key(registry, app, dev.as_str().unwrap_or_default()));
            }
            Ok(json!({}))
        });
    }

    pub fn client(&self) -> ApiClient {
        self.client_with(ServiceAddresses::for_host(HOST, false))
    }

    pub fn client_with(&self, addresses: ServiceAddresses) -> ApiClient {
        ApiClient::new(self.mock.clone(), addresses, None, CancellationToken::new())
    }

    /// Let the Device Claiming Server claim devices with `join_eui`.
    pub fn allow_claiming(&self, join_eui: &str) {
        self.claimable.lock().unwrap().insert(join_eui.to_string());
    }

    /// Make every call to `rpc` fail.
    pub fn fail(&self, rpc: &str) {
        self.mock.on(rpc, |_| {
            Err(ApiError::new(
                ErrorKind::PermissionDenied,
                "fake",
                "no_rights",
                "injected failure",
            ))
        });
    }

    /// Store a record directly.
    pub fn seed(&self, registry: &str, device: Value) {
        let (app, dev) = device_of(&json!({ "end_device": device.clone() }));
        self.store.lock().unwrap().insert(key(registry, &app, &dev), device);
    }

    /// The stored record of a device in one registry.
    pub fn stored(&self, registry: &str, application_id: &str, device_id: &str) -> Option<Value> {
        self.store
            .lock()
            .unwrap()
            .get(&key(registry, application_id, device_id))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }

    pub fn registries_of(&self, application_id: &str, device_id: &str) -> Vec<String> {
        ["IS", "NS", "AS", "JS"]
            .into_iter()
            .filter(|r| self.stored(r, application_id, device_id).is_some())
            .map(str::to_string)
            .collect()
    }
}
