mod common;

use common::{FakeCluster, HOST};
use lwstack_core::config::ServiceRole;
use lwstack_core::devices::{self, CreateOptions, UpdateOptions};
use lwstack_core::ids::EndDeviceIds;
use lwstack_core::schema::rpcs;
use lwstack_core::{ErrorKind, FieldMask, ServiceAddresses};
use serde_json::{json, Value};

const DEV_EUI: &str = "0004A30B001C0530";
const JOIN_EUI: &str = "70B3D57ED0000001";

fn device(device_id: &str) -> Value {
    json!({
        "ids": {"device_id": device_id, "application_ids": {"application_id": "app1"}},
        "lorawan_version": "MAC_V1_0_3",
        "lorawan_phy_version": "PHY_V1_0_3_REV_A",
        "frequency_plan_id": "EU_863_870"
    })
}

fn otaa_device(device_id: &str) -> Value {
    let mut dev = device(device_id);
    dev["ids"]["dev_eui"] = json!(DEV_EUI);
    dev["ids"]["join_eui"] = json!(JOIN_EUI);
    dev
}

fn mask(paths: &[&str]) -> FieldMask {
    paths.iter().copied().collect()
}

#[tokio::test]
async fn test_abp_create_with_session() {
    let cluster = FakeCluster::new();
    let opts = CreateOptions {
        abp: true,
        with_session: true,
        ..Default::default()
    };
    let created = devices::create(&cluster.client(), device("dev1"), &opts)
        .await
        .unwrap();

    assert_eq!(cluster.registries_of("app1", "dev1"), vec!["IS", "NS", "AS"]);
    assert!(cluster.mock.calls().iter().all(|c| c.role != ServiceRole::Join));

    let ns = cluster.stored("NS", "app1", "dev1").unwrap();
    let keys = &ns["session"]["keys"];
    let nwk_s_key = keys["f_nwk_s_int_key"]["key"].as_str().unwrap();
    assert_eq!(nwk_s_key.len(), 32);
    assert_eq!(keys["s_nwk_s_int_key"]["key"], nwk_s_key);
    assert_eq!(keys["nwk_s_enc_key"]["key"], nwk_s_key);
    assert_eq!(ns["session"]["dev_addr"], "260B1234");
    assert_eq!(ns["supports_join"], false);

    let app_s = cluster.stored("AS", "app1", "dev1").unwrap();
    assert_eq!(app_s["session"]["dev_addr"], "260B1234");
    assert_eq!(app_s["session"]["keys"]["app_s_key"]["key"].as_str().unwrap().len(), 32);
    assert_ne!(app_s["session"]["keys"]["app_s_key"]["key"], nwk_s_key);

    let is = cluster.stored("IS", "app1", "dev1").unwrap();
    assert_eq!(is["network_server_address"], HOST);
    assert_eq!(is["application_server_address"], HOST);
    assert!(is.get("join_server_address").is_none());
    assert_eq!(created["ids"]["dev_addr"], "260B1234");
}

#[tokio::test]
async fn test_claimed_create_skips_cluster_join_server() {
    let cluster = FakeCluster::new();
    cluster.allow_claiming(JOIN_EUI);
    let mut dev = otaa_device("dev1");
    dev["join_server_address"] = json!(HOST);
    let opts = CreateOptions {
        claim_authentication_code: Some("AABBCCDD".to_string()),
        ..Default::default()
    };
    devices::create(&cluster.client(), dev, &opts).await.unwrap();

    assert_eq!(cluster.mock.calls_to(rpcs::CLAIM_INFO_BY_JOIN_EUI).len(), 1);
    let claim = &cluster.mock.calls_to(rpcs::CLAIM)[0].body;
    assert_eq!(claim["authenticated_identifiers"]["authentication_code"], "AABBCCDD");
    assert_eq!(claim["target_device_id"], "dev1");

    let is = cluster.stored("IS", "app1", "dev1").unwrap();
    assert!(is.get("join_server_address").is_none());
    assert!(cluster.mock.calls().iter().all(|c| c.role != ServiceRole::Join));
    assert!(cluster.stored("JS", "app1", "dev1").is_none());
}

#[tokio::test]
async fn test_unclaimable_join_eui_creates_nothing() {
    let cluster = FakeCluster::new();
    let opts = CreateOptions {
        claim_authentication_code: Some("AABBCCDD".to_string()),
        ..Default::default()
    };
    let err = devices::create(&cluster.client(), otaa_device("dev1"), &opts)
        .await
        .unwrap_err()
        .to_api_error();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    assert_eq!(err.name, "end_device_claim_info");
    assert!(cluster.is_empty());
}

#[tokio::test]
async fn test_failed_create_leaves_no_state() {
    for (failing, opts, dev) in [
        (
            rpcs::END_DEVICE_NS_SET,
            CreateOptions {
                abp: true,
                with_session: true,
                ..Default::default()
            },
            device("dev1"),
        ),
        (
            rpcs::END_DEVICE_AS_SET,
            CreateOptions {
                abp: true,
                with_session: true,
                ..Default::default()
            },
            device("dev1"),
        ),
        (
            rpcs::END_DEVICE_JS_SET,
            CreateOptions {
                with_root_keys: true,
                ..Default::default()
            },
            otaa_device("dev1"),
        ),
    ] {
        let cluster = FakeCluster::new();
        cluster.fail(failing);
        let err = devices::create(&cluster.client(), dev, &opts)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "no_rights", "{}", failing);
        assert!(!err.attributes.contains_key("rollback_error"));
        assert!(cluster.is_empty(), "state left after failing {}", failing);
    }
}

#[tokio::test]
async fn test_eui_can_not_change() {
    let cluster = FakeCluster::new();
    let client = cluster.client();
    let opts = CreateOptions {
        with_root_keys: true,
        ..Default::default()
    };
    devices::create(&client, otaa_device("dev1"), &opts).await.unwrap();

    let mut changed = otaa_device("dev1");
    changed["ids"]["dev_eui"] = json!("0004A30B001C0531");
    changed["name"] = json!("renamed");
    let err = devices::update(&client, changed, &mask(&["name"]), &UpdateOptions::default())
        .await
        .unwrap_err()
        .to_api_error();
    assert_eq!(err.name, "end_device_eui_update");
    assert!(cluster.stored("IS", "app1", "dev1").unwrap().get("name").is_none());

    let mut same = otaa_device("dev1");
    same["name"] = json!("renamed");
    devices::update(&client, same, &mask(&["name"]), &UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(cluster.stored("IS", "app1", "dev1").unwrap()["name"], "renamed");
}

#[tokio::test]
async fn test_set_then_get_round_trips_written_paths() {
    let cluster = FakeCluster::new();
    let client = cluster.client();
    let mut dev = otaa_device("dev1");
    dev["name"] = json!("before");
    dev["description"] = json!("untouched");
    let opts = CreateOptions {
        with_root_keys: true,
        ..Default::default()
    };
    devices::create(&client, dev, &opts).await.unwrap();

    let mut update = json!({
        "ids": {"device_id": "dev1", "application_ids": {"application_id": "app1"}},
        "name": "after",
        "frequency_plan_id": "EU_863_870_TTN"
    });
    update["supports_class_c"] = json!(true);
    let written = mask(&["name", "frequency_plan_id", "supports_class_c"]);
    devices::update(&client, update, &written, &UpdateOptions::default())
        .await
        .unwrap();

    let ids = EndDeviceIds::new("app1", "dev1");
    let read = devices::get(
        &client,
        &ids,
        &mask(&["name", "description", "frequency_plan_id", "supports_class_c", "lorawan_version"]),
    )
    .await
    .unwrap();
    assert_eq!(read["name"], "after");
    assert_eq!(read["frequency_plan_id"], "EU_863_870_TTN");
    assert_eq!(read["supports_class_c"], true);
    assert_eq!(read["description"], "untouched");
    assert_eq!(read["lorawan_version"], "MAC_V1_0_3");
    assert_eq!(read["ids"]["dev_eui"], DEV_EUI);
}

#[tokio::test]
async fn test_delete_removes_every_registry() {
    let cluster = FakeCluster::new();
    let client = cluster.client();
    let opts = CreateOptions {
        with_root_keys: true,
        ..Default::default()
    };
    devices::create(&client, otaa_device("dev1"), &opts).await.unwrap();
    assert_eq!(cluster.registries_of("app1", "dev1"), vec!["IS", "NS", "JS"]);

    devices::delete(&client, &EndDeviceIds::new("app1", "dev1"))
        .await
        .unwrap();
    assert!(cluster.is_empty());
    let deletes: Vec<String> = cluster
        .mock
        .methods()
        .into_iter()
        .filter(|m| m.ends_with("/Delete"))
        .collect();
    assert_eq!(
        deletes,
        vec![
            rpcs::END_DEVICE_AS_DELETE,
            rpcs::END_DEVICE_NS_DELETE,
            rpcs::END_DEVICE_JS_DELETE,
            rpcs::END_DEVICE_IS_DELETE,
        ]
    );
}

fn seed_batch(cluster: &FakeCluster) {
    for (device_id, dev_eui, join_eui, js) in [
        ("d1", "0004A30B001C0001", JOIN_EUI, HOST),
        ("d2", "0004A30B001C0002", "70B3D57ED00000FF", "js.external.example.com"),
        ("d3", "0004A30B001C0003", JOIN_EUI, HOST),
    ] {
        let ids = json!({
            "device_id": device_id,
            "application_ids": {"application_id": "app1"},
            "dev_eui": dev_eui,
            "join_eui": join_eui
        });
        cluster.seed(
            "IS",
            json!({
                "ids": ids.clone(),
                "network_server_address": HOST,
                "application_server_address": HOST,
                "join_server_address": js
            }),
        );
        cluster.seed("NS", json!({ "ids": ids.clone(), "supports_join": true }));
        cluster.seed("AS", json!({ "ids": ids.clone() }));
        if js == HOST {
            cluster.seed("JS", json!({ "ids": ids }));
        }
    }
}

fn batch() -> Vec<String> {
    vec!["d1".to_string(), "d2".to_string(), "d3".to_string()]
}

#[tokio::test]
async fn test_batch_delete_refuses_unclaimable_external_device() {
    let cluster = FakeCluster::new();
    seed_batch(&cluster);
    let err = devices::batch_delete(&cluster.client(), "app1", &batch())
        .await
        .unwrap_err()
        .to_api_error();
    assert_eq!(err.kind, ErrorKind::Corruption);
    assert_eq!(err.name, "invalid_device_registration");
    assert!(!cluster.mock.methods().iter().any(|m| m.ends_with("Delete")));
    assert!(cluster.mock.calls_to(rpcs::BATCH_UNCLAIM).is_empty());
    for device_id in ["d1", "d2", "d3"] {
        assert!(cluster.stored("IS", "app1", device_id).is_some());
    }
}

#[tokio::test]
async fn test_batch_delete_unclaims_external_devices() {
    let cluster = FakeCluster::new();
    seed_batch(&cluster);
    cluster.allow_claiming("70B3D57ED00000FF");
    devices::batch_delete(&cluster.client(), "app1", &batch())
        .await
        .unwrap();

    let unclaim = &cluster.mock.calls_to(rpcs::BATCH_UNCLAIM)[0].body;
    assert_eq!(unclaim["device_ids"], json!(["d2"]));
    let js = &cluster.mock.calls_to(rpcs::END_DEVICE_JS_BATCH_DELETE)[0].body;
    assert_eq!(js["device_ids"], json!(["d1", "d3"]));
    assert!(cluster.is_empty());
}

#[tokio::test]
async fn test_device_without_join_drops_join_server_paths() {
    for with_euis in [true, false] {
        let cluster = FakeCluster::new();
        let mut dev = if with_euis { otaa_device("dev1") } else { device("dev1") };
        dev["root_keys"] = json!({"app_key": {"key": "000102030405060708090A0B0C0D0E0F"}});
        dev["resets_join_nonces"] = json!(true);
        let opts = CreateOptions {
            abp: true,
            ..Default::default()
        };
        devices::create(&cluster.client(), dev, &opts).await.unwrap();

        assert!(cluster.mock.calls_to(rpcs::END_DEVICE_JS_SET).is_empty());
        assert_eq!(cluster.registries_of("app1", "dev1"), vec!["IS", "NS"]);
        let is = cluster.stored("IS", "app1", "dev1").unwrap();
        assert!(is.get("join_server_address").is_none());
    }
}

fn without_join_server() -> ServiceAddresses {
    let mut addresses = ServiceAddresses::for_host(HOST, false);
    addresses.set_enabled(ServiceRole::Join, false);
    addresses
}

#[tokio::test]
async fn test_create_skips_disabled_join_server() {
    let cluster = FakeCluster::new();
    let opts = CreateOptions {
        with_root_keys: true,
        ..Default::default()
    };
    let client = cluster.client_with(without_join_server());
    devices::create(&client, otaa_device("dev1"), &opts).await.unwrap();

    assert_eq!(cluster.registries_of("app1", "dev1"), vec!["IS", "NS"]);
    assert!(cluster.mock.calls().iter().all(|c| c.role != ServiceRole::Join));
    let is = cluster.stored("IS", "app1", "dev1").unwrap();
    assert!(is.get("join_server_address").is_none());
    assert_eq!(is["network_server_address"], HOST);
}

#[tokio::test]
async fn test_update_skips_disabled_join_server() {
    let cluster = FakeCluster::new();
    let opts = CreateOptions {
        with_root_keys: true,
        ..Default::default()
    };
    devices::create(&cluster.client(), otaa_device("dev1"), &opts)
        .await
        .unwrap();

    let mut update = otaa_device("dev1");
    update["frequency_plan_id"] = json!("EU_863_870_TTN");
    update["resets_join_nonces"] = json!(true);
    let client = cluster.client_with(without_join_server());
    devices::update(
        &client,
        update,
        &mask(&["frequency_plan_id", "resets_join_nonces"]),
        &UpdateOptions::default(),
    )
    .await
    .unwrap();

    let ns = cluster.stored("NS", "app1", "dev1").unwrap();
    assert_eq!(ns["frequency_plan_id"], "EU_863_870_TTN");
    let js = cluster.stored("JS", "app1", "dev1").unwrap();
    assert!(js.get("resets_join_nonces").is_none());
    assert_eq!(cluster.mock.calls_to(rpcs::END_DEVICE_JS_SET).len(), 1);
}

#[tokio::test]
async fn test_rollback_continues_past_failed_delete() {
    let cluster = FakeCluster::new();
    cluster.fail(rpcs::END_DEVICE_JS_SET);
    cluster.fail(rpcs::END_DEVICE_AS_DELETE);
    let mut dev = otaa_device("dev1");
    dev["formatters"] = json!({"up_formatter": "FORMATTER_NONE"});
    let opts = CreateOptions {
        with_root_keys: true,
        ..Default::default()
    };
    let err = devices::create(&cluster.client(), dev, &opts)
        .await
        .unwrap_err()
        .to_api_error();

    assert_eq!(err.attributes["step"], "JS");
    let rollback = err.attributes["rollback_error"].as_str().unwrap();
    assert!(rollback.contains("no_rights"), "{}", rollback);
    let deletes: Vec<String> = cluster
        .mock
        .methods()
        .into_iter()
        .filter(|m| m.ends_with("/Delete"))
        .collect();
    assert_eq!(
        deletes,
        vec![
            rpcs::END_DEVICE_AS_DELETE,
            rpcs::END_DEVICE_NS_DELETE,
            rpcs::END_DEVICE_JS_DELETE,
            rpcs::END_DEVICE_IS_DELETE,
        ]
    );
    assert_eq!(cluster.registries_of("app1", "dev1"), vec!["AS"]);
}
