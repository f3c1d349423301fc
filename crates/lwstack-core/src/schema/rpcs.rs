//! RPC names and the paths each RPC accepts.

macro_rules! rpc_names {
    ($($name:ident = $value:literal;)*) => {
        $(pub const $name: &str = $value;)*
    };
}

rpc_names! {
    APPLICATION_CREATE = "ttn.lorawan.v3.ApplicationRegistry/Create";
    APPLICATION_GET = "ttn.lorawan.v3.ApplicationRegistry/Get";
    APPLICATION_LIST = "ttn.lorawan.v3.ApplicationRegistry/List";
    APPLICATION_UPDATE = "ttn.lorawan.v3.ApplicationRegistry/Update";
    APPLICATION_DELETE = "ttn.lorawan.v3.ApplicationRegistry/Delete";
    APPLICATION_RESTORE = "ttn.lorawan.v3.ApplicationRegistry/Restore";
    APPLICATION_PURGE = "ttn.lorawan.v3.ApplicationRegistry/Purge";
    APPLICATION_ISSUE_DEV_EUI = "ttn.lorawan.v3.ApplicationRegistry/IssueDevEUI";
    SEARCH_APPLICATIONS = "ttn.lorawan.v3.EntityRegistrySearch/SearchApplications";
    SEARCH_END_DEVICES = "ttn.lorawan.v3.EndDeviceRegistrySearch/SearchEndDevices";

    GATEWAY_CREATE = "ttn.lorawan.v3.GatewayRegistry/Create";
    GATEWAY_GET = "ttn.lorawan.v3.GatewayRegistry/Get";
    GATEWAY_LIST = "ttn.lorawan.v3.GatewayRegistry/List";
    GATEWAY_UPDATE = "ttn.lorawan.v3.GatewayRegistry/Update";
    GATEWAY_DELETE = "ttn.lorawan.v3.GatewayRegistry/Delete";
    GATEWAY_RESTORE = "ttn.lorawan.v3.GatewayRegistry/Restore";
    GATEWAY_PURGE = "ttn.lorawan.v3.GatewayRegistry/Purge";
    GATEWAY_CONNECTION_STATS = "ttn.lorawan.v3.Gs/GetGatewayConnectionStats";
    SEARCH_GATEWAYS = "ttn.lorawan.v3.EntityRegistrySearch/SearchGateways";

    CLIENT_CREATE = "ttn.lorawan.v3.ClientRegistry/Create";
    CLIENT_GET = "ttn.lorawan.v3.ClientRegistry/Get";
    CLIENT_LIST = "ttn.lorawan.v3.ClientRegistry/List";
    CLIENT_UPDATE = "ttn.lorawan.v3.ClientRegistry/Update";
    CLIENT_DELETE = "ttn.lorawan.v3.ClientRegistry/Delete";
    CLIENT_RESTORE = "ttn.lorawan.v3.ClientRegistry/Restore";
    CLIENT_PURGE = "ttn.lorawan.v3.ClientRegistry/Purge";
    SEARCH_CLIENTS = "ttn.lorawan.v3.EntityRegistrySearch/SearchClients";

    USER_CREATE = "ttn.lorawan.v3.UserRegistry/Create";
    USER_GET = "ttn.lorawan.v3.UserRegistry/Get";
    USER_LIST = "ttn.lorawan.v3.UserRegistry/List";
    USER_UPDATE = "ttn.lorawan.v3.UserRegistry/Update";
    USER_DELETE = "ttn.lorawan.v3.UserRegistry/Delete";
    USER_RESTORE = "ttn.lorawan.v3.UserRegistry/Restore";
    USER_PURGE = "ttn.lorawan.v3.UserRegistry/Purge";
    SEARCH_USERS = "ttn.lorawan.v3.EntityRegistrySearch/SearchUsers";

    ORGANIZATION_CREATE = "ttn.lorawan.v3.OrganizationRegistry/Create";
    ORGANIZATION_GET = "ttn.lorawan.v3.OrganizationRegistry/Get";
    ORGANIZATION_LIST = "ttn.lorawan.v3.OrganizationRegistry/List";
    ORGANIZATION_UPDATE = "ttn.lorawan.v3.OrganizationRegistry/Update";
    ORGANIZATION_DELETE = "ttn.lorawan.v3.OrganizationRegistry/Delete";
    ORGANIZATION_RESTORE = "ttn.lorawan.v3.OrganizationRegistry/Restore";
    ORGANIZATION_PURGE = "ttn.lorawan.v3.OrganizationRegistry/Purge";
    SEARCH_ORGANIZATIONS = "ttn.lorawan.v3.EntityRegistrySearch/SearchOrganizations";

    WEBHOOK_SET = "ttn.lorawan.v3.ApplicationWebhookRegistry/Set";
    WEBHOOK_GET = "ttn.lorawan.v3.ApplicationWebhookRegistry/Get";
    WEBHOOK_LIST = "ttn.lorawan.v3.ApplicationWebhookRegistry/List";
    WEBHOOK_DELETE = "ttn.lorawan.v3.ApplicationWebhookRegistry/Delete";
    WEBHOOK_LIST_TEMPLATES = "ttn.lorawan.v3.ApplicationWebhookRegistry/ListTemplates";
    PUBSUB_SET = "ttn.lorawan.v3.ApplicationPubSubRegistry/Set";
    PUBSUB_GET = "ttn.lorawan.v3.ApplicationPubSubRegistry/Get";
    PUBSUB_LIST = "ttn.lorawan.v3.ApplicationPubSubRegistry/List";
    PUBSUB_DELETE = "ttn.lorawan.v3.ApplicationPubSubRegistry/Delete";
    STORAGE_GET_UPLINKS = "ttn.lorawan.v3.ApplicationUpStorage/GetStoredApplicationUp";
    STORAGE_COUNT_UPLINKS = "ttn.lorawan.v3.ApplicationUpStorage/GetStoredApplicationUpCount";
    PACKAGES_LIST_DEFAULT_ASSOCIATIONS = "ttn.lorawan.v3.ApplicationPackageRegistry/ListDefaultAssociations";

    PBA_GET_INFO = "ttn.lorawan.v3.Pba/GetInfo";
    PBA_REGISTER = "ttn.lorawan.v3.Pba/Register";
    PBA_DEREGISTER = "ttn.lorawan.v3.Pba/Deregister";
    PBA_LIST_NETWORKS = "ttn.lorawan.v3.Pba/ListNetworks";
    PBA_GET_HOME_NETWORK_DEFAULT_POLICY = "ttn.lorawan.v3.Pba/GetHomeNetworkDefaultRoutingPolicy";
    PBA_SET_HOME_NETWORK_DEFAULT_POLICY = "ttn.lorawan.v3.Pba/SetHomeNetworkDefaultRoutingPolicy";
    PBA_DELETE_HOME_NETWORK_DEFAULT_POLICY = "ttn.lorawan.v3.Pba/DeleteHomeNetworkDefaultRoutingPolicy";
    PBA_GET_HOME_NETWORK_POLICY = "ttn.lorawan.v3.Pba/GetHomeNetworkRoutingPolicy";
    PBA_SET_HOME_NETWORK_POLICY = "ttn.lorawan.v3.Pba/SetHomeNetworkRoutingPolicy";
    PBA_DELETE_HOME_NETWORK_POLICY = "ttn.lorawan.v3.Pba/DeleteHomeNetworkRoutingPolicy";
    PBA_GET_GATEWAY_VISIBILITY = "ttn.lorawan.v3.Pba/GetHomeNetworkDefaultGatewayVisibility";
    PBA_SET_GATEWAY_VISIBILITY = "ttn.lorawan.v3.Pba/SetHomeNetworkDefaultGatewayVisibility";

    END_DEVICE_IS_CREATE = "ttn.lorawan.v3.EndDeviceRegistry/Create";
    END_DEVICE_IS_GET = "ttn.lorawan.v3.EndDeviceRegistry/Get";
    END_DEVICE_IS_LIST = "ttn.lorawan.v3.EndDeviceRegistry/List";
    END_DEVICE_IS_UPDATE = "ttn.lorawan.v3.EndDeviceRegistry/Update";
    END_DEVICE_IS_DELETE = "ttn.lorawan.v3.EndDeviceRegistry/Delete";
    END_DEVICE_IS_BATCH_DELETE = "ttn.lorawan.v3.EndDeviceBatchRegistry/Delete";
    END_DEVICE_NS_GET = "ttn.lorawan.v3.NsEndDeviceRegistry/Get";
    END_DEVICE_NS_SET = "ttn.lorawan.v3.NsEndDeviceRegistry/Set";
    END_DEVICE_NS_DELETE = "ttn.lorawan.v3.NsEndDeviceRegistry/Delete";
    END_DEVICE_NS_RESET = "ttn.lorawan.v3.NsEndDeviceRegistry/ResetFactoryDefaults";
    END_DEVICE_NS_BATCH_DELETE = "ttn.lorawan.v3.NsEndDeviceBatchRegistry/Delete";
    END_DEVICE_AS_GET = "ttn.lorawan.v3.AsEndDeviceRegistry/Get";
    END_DEVICE_AS_SET = "ttn.lorawan.v3.AsEndDeviceRegistry/Set";
    END_DEVICE_AS_DELETE = "ttn.lorawan.v3.AsEndDeviceRegistry/Delete";
    END_DEVICE_AS_BATCH_DELETE = "ttn.lorawan.v3.AsEndDeviceBatchRegistry/Delete";
    END_DEVICE_JS_GET = "ttn.lorawan.v3.JsEndDeviceRegistry/Get";
    END_DEVICE_JS_SET = "ttn.lorawan.v3.JsEndDeviceRegistry/Set";
    END_DEVICE_JS_DELETE = "ttn.lorawan.v3.JsEndDeviceRegistry/Delete";
    END_DEVICE_JS_BATCH_DELETE = "ttn.lorawan.v3.JsEndDeviceBatchRegistry/Delete";
    NS_GENERATE_DEV_ADDR = "ttn.lorawan.v3.Ns/GenerateDevAddr";
    JS_GET_DEFAULT_JOIN_EUI = "ttn.lorawan.v3.Js/GetDefaultJoinEUI";

    CLAIM = "ttn.lorawan.v3.EndDeviceClaimingServer/Claim";
    UNCLAIM = "ttn.lorawan.v3.EndDeviceClaimingServer/Unclaim";
    CLAIM_INFO_BY_JOIN_EUI = "ttn.lorawan.v3.EndDeviceClaimingServer/GetInfoByJoinEUI";
    CLAIM_INFO_BY_JOIN_EUIS = "ttn.lorawan.v3.EndDeviceClaimingServer/GetInfoByJoinEUIs";
    BATCH_UNCLAIM = "ttn.lorawan.v3.EndDeviceBatchClaimingServer/Unclaim";

    TEMPLATE_CONVERT = "ttn.lorawan.v3.EndDeviceTemplateConverter/Convert";
    TEMPLATE_LIST_FORMATS = "ttn.lorawan.v3.EndDeviceTemplateConverter/ListFormats";
    QR_GENERATE = "ttn.lorawan.v3.EndDeviceQRCodeGenerator/Generate";
    QR_LIST_FORMATS = "ttn.lorawan.v3.EndDeviceQRCodeGenerator/ListFormats";

    DOWNLINK_QUEUE_PUSH = "ttn.lorawan.v3.AppAs/DownlinkQueuePush";
    DOWNLINK_QUEUE_REPLACE = "ttn.lorawan.v3.AppAs/DownlinkQueueReplace";
    DOWNLINK_QUEUE_LIST = "ttn.lorawan.v3.AppAs/DownlinkQueueList";
    APPLICATION_SUBSCRIBE = "ttn.lorawan.v3.AppAs/Subscribe";

    RELAY_CREATE = "ttn.lorawan.v3.NsRelayConfigurationService/CreateRelay";
    RELAY_GET = "ttn.lorawan.v3.NsRelayConfigurationService/GetRelay";
    RELAY_UPDATE = "ttn.lorawan.v3.NsRelayConfigurationService/UpdateRelay";
    RELAY_DELETE = "ttn.lorawan.v3.NsRelayConfigurationService/DeleteRelay";
    RELAY_CREATE_FORWARDING_RULE = "ttn.lorawan.v3.NsRelayConfigurationService/CreateRelayUplinkForwardingRule";
    RELAY_DELETE_FORWARDING_RULE = "ttn.lorawan.v3.NsRelayConfigurationService/DeleteRelayUplinkForwardingRule";

    EVENTS_STREAM = "ttn.lorawan.v3.Events/Stream";
    GATEWAY_LINK = "ttn.lorawan.v3.GtwGs/LinkGateway";
    AUTH_INFO = "ttn.lorawan.v3.EntityAccess/AuthInfo";
}

const END_DEVICE_IS_PATHS: &[&str] = &[
    "activated_at",
    "application_server_address",
    "attributes",
    "claim_authentication_code",
    "created_at",
    "description",
    "ids",
    "join_server_address",
    "last_seen_at",
    "locations",
    "lora_alliance_profile_ids",
    "name",
    "network_server_address",
    "picture",
    "serial_number",
    "service_profile_id",
    "updated_at",
    "version_ids",
];

const END_DEVICE_NS_PATHS: &[&str] = &[
    "battery_percentage",
    "created_at",
    "downlink_margin",
    "frequency_plan_id",
    "ids",
    "last_dev_status_received_at",
    "lorawan_phy_version",
    "lorawan_version",
    "mac_settings",
    "mac_state",
    "max_frequency",
    "min_frequency",
    "multicast",
    "pending_mac_state",
    "pending_session",
    "power_state",
    "session.dev_addr",
    "session.keys.f_nwk_s_int_key",
    "session.keys.nwk_s_enc_key",
    "session.keys.s_nwk_s_int_key",
    "session.last_conf_f_cnt_down",
    "session.last_f_cnt_up",
    "session.last_n_f_cnt_down",
    "session.started_at",
    "supports_class_b",
    "supports_class_c",
    "supports_join",
    "updated_at",
];

const END_DEVICE_AS_PATHS: &[&str] = &[
    "created_at",
    "formatters",
    "ids",
    "pending_session",
    "session.dev_addr",
    "session.keys.app_s_key",
    "session.last_a_f_cnt_down",
    "session.started_at",
    "skip_payload_crypto",
    "skip_payload_crypto_override",
    "updated_at",
];

const END_DEVICE_JS_PATHS: &[&str] = &[
    "application_server_address",
    "application_server_id",
    "application_server_kek_label",
    "claim_authentication_code",
    "created_at",
    "ids",
    "last_dev_nonce",
    "last_join_nonce",
    "last_rj_count_0",
    "last_rj_count_1",
    "net_id",
    "network_server_address",
    "network_server_kek_label",
    "provisioner_id",
    "provisioning_data",
    "resets_join_nonces",
    "root_keys",
    "updated_at",
    "used_dev_nonces",
];

const WEBHOOK_PATHS: &[&str] = &[
    "base_url",
    "created_at",
    "downlink_ack",
    "downlink_api_key",
    "downlink_failed",
    "downlink_nack",
    "downlink_queue_invalidated",
    "downlink_queued",
    "downlink_sent",
    "format",
    "headers",
    "ids",
    "join_accept",
    "location_solved",
    "service_data",
    "template_fields",
    "template_ids",
    "updated_at",
    "uplink_message",
    "uplink_normalized",
];

const PUBSUB_PATHS: &[&str] = &[
    "base_topic",
    "created_at",
    "downlink_ack",
    "downlink_failed",
    "downlink_nack",
    "downlink_push",
    "downlink_queue_invalidated",
    "downlink_queued",
    "downlink_replace",
    "downlink_sent",
    "format",
    "ids",
    "join_accept",
    "location_solved",
    "mqtt",
    "nats",
    "service_data",
    "updated_at",
    "uplink_message",
    "uplink_normalized",
];

const RELAY_PATHS: &[&str] = &["settings"];

/// Paths an RPC accepts in its field mask, for RPCs with a fixed table.
pub fn allowed_paths(rpc: &str) -> Option<&'static [&'static str]> {
    let table = match rpc {
        END_DEVICE_IS_CREATE | END_DEVICE_IS_GET | END_DEVICE_IS_LIST | END_DEVICE_IS_UPDATE
        | SEARCH_END_DEVICES => END_DEVICE_IS_PATHS,
        END_DEVICE_NS_GET | END_DEVICE_NS_SET => END_DEVICE_NS_PATHS,
        END_DEVICE_AS_GET | END_DEVICE_AS_SET => END_DEVICE_AS_PATHS,
        END_DEVICE_JS_GET | END_DEVICE_JS_SET => END_DEVICE_JS_PATHS,
        WEBHOOK_SET | WEBHOOK_GET | WEBHOOK_LIST => WEBHOOK_PATHS,
        PUBSUB_SET | PUBSUB_GET | PUBSUB_LIST => PUBSUB_PATHS,
        RELAY_GET | RELAY_UPDATE => RELAY_PATHS,
        _ => return None,
    };
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldmask::FieldMask;

    #[test]
    fn test_allowed_paths_filter_mask() {
        let mut mask: FieldMask = ["name", "session.keys.app_s_key", "root_keys.app_key"]
            .into_iter()
            .collect();
        mask.retain_allowed(END_DEVICE_IS_GET, allowed_paths(END_DEVICE_IS_GET).unwrap());
        assert_eq!(mask.to_vec(), vec!["name"]);

        let mut mask: FieldMask = ["session.keys.app_s_key", "session.keys.f_nwk_s_int_key"]
            .into_iter()
            .collect();
        mask.retain_allowed(END_DEVICE_AS_GET, allowed_paths(END_DEVICE_AS_GET).unwrap());
        assert_eq!(mask.to_vec(), vec!["session.keys.app_s_key"]);
        assert!(allowed_paths(APPLICATION_GET).is_none());
    }
}
