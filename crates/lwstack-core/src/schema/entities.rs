//! Entity descriptors.

use serde_json::{json, Value};

use super::rpcs;
use super::FieldKind::String as Text;
use super::FieldKind::{
    Bool, DevAddr, Duration, Enum, Eui, Json, Key, MacVersion, StringList, StringMap, Timestamp,
    Uint, UintList,
};
use super::{field, FieldSpec};
use crate::config::ServiceRole;
use crate::fieldmask::top_level;

/// RPC selectors of a registry entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityRpcs {
    pub create: &'static str,
    pub get: &'static str,
    pub list: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
    pub restore: &'static str,
    pub purge: &'static str,
    pub search: Option<&'static str>,
}

/// A registry entity with generated flags and generic verbs.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Plural noun, as used on the command line.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Name of the entity message in request bodies.
    pub singular: &'static str,
    pub ids_field: &'static str,
    pub id_field: &'static str,
    pub role: ServiceRole,
    pub fields: &'static [FieldSpec],
    /// Readable paths no flag can set.
    pub read_only: &'static [&'static str],
    /// Field holding the entities in list and search responses.
    pub list_field: &'static str,
    /// Whether create needs an owning user or organization.
    pub owned: bool,
    pub rpcs: EntityRpcs,
}

impl EntityDescriptor {
    pub fn field(&self, path: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Every path a get or list may select.
    pub fn readable_paths(&self) -> Vec<&'static str> {
        let mut paths: Vec<&'static str> = self
            .fields
            .iter()
            .map(|f| top_level(f.path))
            .chain(self.read_only.iter().copied())
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }

    /// `{"<id_field>": id}`.
    pub fn ids_json(&self, id: &str) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(self.id_field.to_string(), json!(id));
        Value::Object(map)
    }

    pub fn matches(&self, noun: &str) -> bool {
        self.name == noun || self.aliases.contains(&noun)
    }
}

const COMMON_READ_ONLY: &[&str] = &["created_at", "deleted_at", "ids", "updated_at"];

const CONTACT_FIELDS: [FieldSpec; 2] = [
    field("administrative_contact", Json, "administrative contact as {\"user_ids\":{...}}"),
    field("technical_contact", Json, "technical contact as {\"user_ids\":{...}}"),
];

pub static APPLICATION_FIELDS: &[FieldSpec] = &[
    field("name", Text, "name of the application"),
    field("description", Text, "description of the application"),
    field("attributes", StringMap, "key=value attributes"),
    CONTACT_FIELDS[0],
    CONTACT_FIELDS[1],
    field("network_server_address", Text, "default Network Server address of new devices"),
    field("application_server_address", Text, "default Application Server address of new devices"),
    field("join_server_address", Text, "default Join Server address of new devices"),
];

pub static APPLICATIONS: EntityDescriptor = EntityDescriptor {
    name: "applications",
    aliases: &["application", "apps", "app"],
    singular: "application",
    ids_field: "application_ids",
    id_field: "application_id",
    role: ServiceRole::Identity,
    fields: APPLICATION_FIELDS,
    read_only: &["created_at", "deleted_at", "dev_eui_counter", "ids", "updated_at"],
    list_field: "applications",
    owned: true,
    rpcs: EntityRpcs {
        create: rpcs::APPLICATION_CREATE,
        get: rpcs::APPLICATION_GET,
        list: rpcs::APPLICATION_LIST,
        update: rpcs::APPLICATION_UPDATE,
        delete: rpcs::APPLICATION_DELETE,
        restore: rpcs::APPLICATION_RESTORE,
        purge: rpcs::APPLICATION_PURGE,
        search: Some(rpcs::SEARCH_APPLICATIONS),
    },
};

const DOWNLINK_PATH_CONSTRAINTS: &[&str] = &[
    "DOWNLINK_PATH_CONSTRAINT_NONE",
    "DOWNLINK_PATH_CONSTRAINT_PREFER_OTHER",
    "DOWNLINK_PATH_CONSTRAINT_NEVER",
];

pub static GATEWAY_FIELDS: &[FieldSpec] = &[
    field("ids.eui", Eui, "EUI of the gateway"),
    field("name", Text, "name of the gateway"),
    field("description", Text, "description of the gateway"),
    field("attributes", StringMap, "key=value attributes"),
    CONTACT_FIELDS[0],
    CONTACT_FIELDS[1],
    field("frequency_plan_id", Text, "frequency plan of the gateway"),
    field("frequency_plan_ids", StringList, "frequency plans of the gateway"),
    field("gateway_server_address", Text, "Gateway Server the gateway connects to"),
    field("status_public", Bool, "make the gateway status public"),
    field("location_public", Bool, "make the gateway location public"),
    field("auto_update", Bool, "update the gateway firmware automatically"),
    field("update_channel", Text, "firmware update channel"),
    field("enforce_duty_cycle", Bool, "enforce the regional duty cycle"),
    field("schedule_downlink_late", Bool, "schedule downlinks just in time"),
    field("schedule_anytime_delay", Duration, "delay for class C and class B downlinks"),
    field("require_authenticated_connection", Bool, "only accept authenticated connections"),
    field("downlink_path_constraint", Enum(DOWNLINK_PATH_CONSTRAINTS), "downlink path constraint"),
    field("update_location_from_status", Bool, "update the location from status messages"),
    field("disable_packet_broker_forwarding", Bool, "do not forward traffic to Packet Broker"),
    field("antennas", Json, "antennas as a JSON array"),
];

pub static GATEWAYS: EntityDescriptor = EntityDescriptor {
    name: "gateways",
    aliases: &["gateway", "gtw", "gtws"],
    singular: "gateway",
    ids_field: "gateway_ids",
    id_field: "gateway_id",
    role: ServiceRole::Identity,
    fields: GATEWAY_FIELDS,
    read_only: &["created_at", "deleted_at", "ids", "lbs_lns_secret", "updated_at", "version_ids"],
    list_field: "gateways",
    owned: true,
    rpcs: EntityRpcs {
        create: rpcs::GATEWAY_CREATE,
        get: rpcs::GATEWAY_GET,
        list: rpcs::GATEWAY_LIST,
        update: rpcs::GATEWAY_UPDATE,
        delete: rpcs::GATEWAY_DELETE,
        restore: rpcs::GATEWAY_RESTORE,
        purge: rpcs::GATEWAY_PURGE,
        search: Some(rpcs::SEARCH_GATEWAYS),
    },
};

const STATES: &[&str] = &[
    "STATE_REQUESTED",
    "STATE_APPROVED",
    "STATE_REJECTED",
    "STATE_FLAGGED",
    "STATE_SUSPENDED",
];

pub static CLIENT_FIELDS: &[FieldSpec] = &[
    field("name", Text, "name of the client"),
    field("description", Text, "description of the client"),
    field("attributes", StringMap, "key=value attributes"),
    CONTACT_FIELDS[0],
    CONTACT_FIELDS[1],
    field("redirect_uris", StringList, "allowed redirect URIs"),
    field("logout_redirect_uris", StringList, "allowed logout redirect URIs"),
    field("grants", StringList, "OAuth grant types"),
    field("rights", StringList, "rights the client may request"),
    field("skip_authorization", Bool, "skip the authorization page"),
    field("endorsed", Bool, "mark the client as endorsed"),
    field("state", Enum(STATES), "review state of the client"),
    field("state_description", Text, "reason for the review state"),
];

pub static CLIENTS: EntityDescriptor = EntityDescriptor {
    name: "clients",
    aliases: &["client", "cli"],
    singular: "client",
    ids_field: "client_ids",
    id_field: "client_id",
    role: ServiceRole::Identity,
    fields: CLIENT_FIELDS,
    read_only: &["created_at", "deleted_at", "ids", "secret", "updated_at"],
    list_field: "clients",
    owned: true,
    rpcs: EntityRpcs {
        create: rpcs::CLIENT_CREATE,
        get: rpcs::CLIENT_GET,
        list: rpcs::CLIENT_LIST,
        update: rpcs::CLIENT_UPDATE,
        delete: rpcs::CLIENT_DELETE,
        restore: rpcs::CLIENT_RESTORE,
        purge: rpcs::CLIENT_PURGE,
        search: Some(rpcs::SEARCH_CLIENTS),
    },
};

pub static USER_FIELDS: &[FieldSpec] = &[
    field("name", Text, "full name of the user"),
    field("description", Text, "description of the user"),
    field("attributes", StringMap, "key=value attributes"),
    field("primary_email_address", Text, "primary email address"),
    field("password", Text, "password of the user"),
    field("require_password_update", Bool, "require a password change at next login"),
    field("admin", Bool, "make the user an administrator"),
    field("state", Enum(STATES), "review state of the user"),
    field("state_description", Text, "reason for the review state"),
];

pub static USERS: EntityDescriptor = EntityDescriptor {
    name: "users",
    aliases: &["user", "usr"],
    singular: "user",
    ids_field: "user_ids",
    id_field: "user_id",
    role: ServiceRole::Identity,
    fields: USER_FIELDS,
    read_only: &[
        "created_at",
        "deleted_at",
        "ids",
        "password_updated_at",
        "primary_email_address_validated_at",
        "updated_at",
    ],
    list_field: "users",
    owned: false,
    rpcs: EntityRpcs {
        create: rpcs::USER_CREATE,
        get: rpcs::USER_GET,
        list: rpcs::USER_LIST,
        update: rpcs::USER_UPDATE,
        delete: rpcs::USER_DELETE,
        restore: rpcs::USER_RESTORE,
        purge: rpcs::USER_PURGE,
        search: Some(rpcs::SEARCH_USERS),
    },
};

pub static ORGANIZATION_FIELDS: &[FieldSpec] = &[
    field("name", Text, "name of the organization"),
    field("description", Text, "description of the organization"),
    field("attributes", StringMap, "key=value attributes"),
    CONTACT_FIELDS[0],
    CONTACT_FIELDS[1],
    field("fanout_notifications", Bool, "send notifications to all members"),
];

pub static ORGANIZATIONS: EntityDescriptor = EntityDescriptor {
    name: "organizations",
    aliases: &["organization", "org", "orgs"],
    singular: "organization",
    ids_field: "organization_ids",
    id_field: "organization_id",
    role: ServiceRole::Identity,
    fields: ORGANIZATION_FIELDS,
    read_only: COMMON_READ_ONLY,
    list_field: "organizations",
    owned: true,
    rpcs: EntityRpcs {
        create: rpcs::ORGANIZATION_CREATE,
        get: rpcs::ORGANIZATION_GET,
        list: rpcs::ORGANIZATION_LIST,
        update: rpcs::ORGANIZATION_UPDATE,
        delete: rpcs::ORGANIZATION_DELETE,
        restore: rpcs::ORGANIZATION_RESTORE,
        purge: rpcs::ORGANIZATION_PURGE,
        search: Some(rpcs::SEARCH_ORGANIZATIONS),
    },
};

/// Registry entities with generic verbs.
pub static ENTITIES: [&EntityDescriptor; 5] =
    [&APPLICATIONS, &GATEWAYS, &CLIENTS, &USERS, &ORGANIZATIONS];

pub fn find(noun: &str) -> Option<&'static EntityDescriptor> {
    ENTITIES.iter().copied().find(|e| e.matches(noun))
}

const PHY_VERSIONS: &[&str] = &[
    "PHY_V1_0",
    "PHY_V1_0_1",
    "PHY_V1_0_2_REV_A",
    "PHY_V1_0_2_REV_B",
    "PHY_V1_1_REV_A",
    "PHY_V1_1_REV_B",
    "PHY_V1_0_3_REV_A",
    "RP001_V1_0_3_REV_A",
    "RP001_V1_1_REV_A",
    "RP001_V1_1_REV_B",
    "RP002_V1_0_0",
    "RP002_V1_0_1",
    "RP002_V1_0_2",
    "RP002_V1_0_3",
    "RP002_V1_0_4",
];

const FORMATTERS: &[&str] = &[
    "FORMATTER_NONE",
    "FORMATTER_REPOSITORY",
    "FORMATTER_GRPC_SERVICE",
    "FORMATTER_JAVASCRIPT",
    "FORMATTER_CAYENNELPP",
];

/// Settable end device paths across all four registries.
pub static END_DEVICE_FIELDS: &[FieldSpec] = &[
    field("ids.dev_eui", Eui, "DevEUI of the end device"),
    field("ids.join_eui", Eui, "JoinEUI of the end device"),
    field("name", Text, "name of the end device"),
    field("description", Text, "description of the end device"),
    field("attributes", StringMap, "key=value attributes"),
    field("version_ids.brand_id", Text, "brand in the device repository"),
    field("version_ids.model_id", Text, "model in the device repository"),
    field("version_ids.hardware_version", Text, "hardware version"),
    field("version_ids.firmware_version", Text, "firmware version"),
    field("version_ids.band_id", Text, "band of the firmware"),
    field("network_server_address", Text, "Network Server address"),
    field("application_server_address", Text, "Application Server address"),
    field("join_server_address", Text, "Join Server address"),
    field("serial_number", Text, "serial number"),
    field("service_profile_id", Text, "service profile"),
    field("locations", Json, "locations as a JSON object"),
    field("claim_authentication_code.value", Text, "claim authentication code"),
    field("claim_authentication_code.valid_from", Timestamp, "start of claim code validity"),
    field("claim_authentication_code.valid_to", Timestamp, "end of claim code validity"),
    field("frequency_plan_id", Text, "frequency plan"),
    field("lorawan_version", MacVersion, "LoRaWAN MAC version"),
    field("lorawan_phy_version", Enum(PHY_VERSIONS), "LoRaWAN regional parameters version"),
    field("supports_join", Bool, "the end device supports OTAA"),
    field("supports_class_b", Bool, "the end device supports class B"),
    field("supports_class_c", Bool, "the end device supports class C"),
    field("multicast", Bool, "the end device is a multicast group"),
    field("min_frequency", Uint, "minimum frequency in Hz"),
    field("max_frequency", Uint, "maximum frequency in Hz"),
    field("mac_settings.resets_f_cnt", Bool, "frame counters reset on power cycle"),
    field("mac_settings.supports_32_bit_f_cnt", Bool, "the end device uses 32 bit frame counters"),
    field("mac_settings.rx1_delay", Enum(&["RX_DELAY_0", "RX_DELAY_1", "RX_DELAY_2", "RX_DELAY_3", "RX_DELAY_4", "RX_DELAY_5"]), "RX1 delay"),
    field("mac_settings.rx2_data_rate_index", Uint, "RX2 data rate index"),
    field("mac_settings.rx2_frequency", Uint, "RX2 frequency in Hz"),
    field("mac_settings.factory_preset_frequencies", UintList, "factory preset frequencies in Hz"),
    field("mac_settings.status_count_periodicity", Uint, "status request periodicity in frames"),
    field("mac_settings.status_time_periodicity", Duration, "status request periodicity in time"),
    field("session.dev_addr", DevAddr, "DevAddr of the session"),
    field("session.keys.app_s_key.key", Key, "AppSKey"),
    field("session.keys.f_nwk_s_int_key.key", Key, "FNwkSIntKey (NwkSKey on 1.0.x)"),
    field("session.keys.s_nwk_s_int_key.key", Key, "SNwkSIntKey"),
    field("session.keys.nwk_s_enc_key.key", Key, "NwkSEncKey"),
    field("session.last_f_cnt_up", Uint, "last uplink frame counter"),
    field("session.last_n_f_cnt_down", Uint, "last network downlink frame counter"),
    field("session.last_a_f_cnt_down", Uint, "last application downlink frame counter"),
    field("formatters.up_formatter", Enum(FORMATTERS), "uplink payload formatter"),
    field("formatters.up_formatter_parameter", Text, "uplink payload formatter parameter"),
    field("formatters.down_formatter", Enum(FORMATTERS), "downlink payload formatter"),
    field("formatters.down_formatter_parameter", Text, "downlink payload formatter parameter"),
    field("skip_payload_crypto_override", Bool, "skip payload crypto on the Application Server"),
    field("root_keys.app_key.key", Key, "AppKey"),
    field("root_keys.nwk_key.key", Key, "NwkKey"),
    field("resets_join_nonces", Bool, "the end device resets join nonces"),
    field("application_server_id", Text, "Application Server ID for key wrapping"),
    field("application_server_kek_label", Text, "KEK label of the Application Server"),
    field("network_server_kek_label", Text, "KEK label of the Network Server"),
    field("provisioner_id", Text, "provisioner of the root keys"),
];

pub fn end_device_field(path: &str) -> Option<&'static FieldSpec> {
    END_DEVICE_FIELDS.iter().find(|f| f.path == path)
}

/// Paths of API keys.
pub static API_KEY_FIELDS: &[FieldSpec] = &[
    field("name", Text, "name of the API key"),
    field("rights", StringList, "rights of the API key"),
    field("expires_at", Timestamp, "expiry of the API key"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_alias() {
        assert_eq!(find("app").map(|e| e.name), Some("applications"));
        assert_eq!(find("gtw").map(|e| e.name), Some("gateways"));
        assert!(find("end-devices").is_none());
    }

    #[test]
    fn test_readable_paths_are_top_level() {
        let paths = GATEWAYS.readable_paths();
        assert!(paths.contains(&"ids"));
        assert!(paths.contains(&"frequency_plan_ids"));
        assert!(paths.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(APPLICATIONS.ids_json("app1"), json!({"application_id": "app1"}));
    }

    #[test]
    fn test_end_device_fields_are_routable() {
        use crate::fieldmask::router::{classify, Access, Route};
        for f in END_DEVICE_FIELDS {
            let route = classify(f.path, Access::Write);
            assert!(
                matches!(route, Route::Server(_) | Route::Skip),
                "{} routes to {:?}",
                f.path,
                route
            );
        }
    }
}
