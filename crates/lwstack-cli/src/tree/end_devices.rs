//! Commands of end devices, which span all four registries.

use clap::{Arg, ArgAction, Command};
use lwstack_core::fieldmask::top_level;
use lwstack_core::schema::entities::END_DEVICE_FIELDS;
use lwstack_core::schema::rpcs;

use super::flags::{bool_arg, field_args, paging_args, search_args, select_args, unset_arg};

pub const NAME: &str = "end-devices";

/// Top-level paths readable from any registry.
pub fn readable_paths() -> Vec<&'static str> {
    let mut paths: Vec<&'static str> = [
        rpcs::END_DEVICE_IS_GET,
        rpcs::END_DEVICE_NS_GET,
        rpcs::END_DEVICE_AS_GET,
        rpcs::END_DEVICE_JS_GET,
    ]
    .into_iter()
    .filter_map(rpcs::allowed_paths)
    .flatten()
    .copied()
    .map(top_level)
    .filter(|path| !matches!(*path, "ids" | "created_at" | "updated_at" | "pending_session"))
    .collect();
    paths.sort_unstable();
    paths.dedup();
    paths
}

fn app_id(required: bool) -> Arg {
    Arg::new("application_id")
        .value_name("APPLICATION_ID")
        .required(required)
}

fn device_id(required: bool) -> Arg {
    Arg::new("device_id")
        .value_name("DEVICE_ID")
        .required(required)
}

fn device_args() -> [Arg; 2] {
    [app_id(true), device_id(true)]
}

fn picture_arg() -> Arg {
    Arg::new("picture_local_file")
        .long("picture-local-file")
        .value_name("PATH")
        .help("upload a picture of the end device from a file")
}

fn verb(name: &'static str, about: &'static str) -> Command {
    Command::new(name).about(about)
}

fn create_command() -> Command {
    verb("create", "Create an end device")
        .long_about(
            "Create an end device. When stdin is not a terminal, every JSON document read from \
             it is created with the flags applied on top.",
        )
        .arg(app_id(false))
        .arg(device_id(false))
        .args(field_args(END_DEVICE_FIELDS))
        .arg(
            Arg::new("abp")
                .long("abp")
                .action(ArgAction::SetTrue)
                .help("activation by personalization"),
        )
        .arg(bool_arg("defaults", true).help("fill in server addresses from the configuration"))
        .arg(
            Arg::new("with_session")
                .long("with-session")
                .action(ArgAction::SetTrue)
                .help("generate a DevAddr and session keys (ABP)"),
        )
        .arg(
            Arg::new("with_root_keys")
                .long("with-root-keys")
                .action(ArgAction::SetTrue)
                .help("generate root keys (OTAA)"),
        )
        .arg(
            Arg::new("request_dev_eui")
                .long("request-dev-eui")
                .action(ArgAction::SetTrue)
                .conflicts_with("with_claim_authentication_code")
                .help("issue a DevEUI from the application's block"),
        )
        .arg(
            Arg::new("with_claim_authentication_code")
                .long("with-claim-authentication-code")
                .value_name("CODE")
                .help("claim the end device on its external Join Server with this code"),
        )
        .arg(picture_arg())
}

fn downlink_command() -> Command {
    let queue_args = || {
        [
            Arg::new("f_port")
                .long("f-port")
                .value_parser(clap::value_parser!(u32))
                .required(true),
            Arg::new("frm_payload")
                .long("frm-payload")
                .value_name("BYTES")
                .help("payload, hex: prefixed or base64"),
            Arg::new("confirmed").long("confirmed").action(ArgAction::SetTrue),
            Arg::new("priority")
                .long("priority")
                .value_name("PRIORITY")
                .help("e.g. NORMAL or HIGH"),
        ]
    };
    Command::new("downlink")
        .about("Manage the downlink queue of an end device")
        .subcommand_required(true)
        .subcommand(
            verb("push", "Append a downlink to the queue")
                .args(device_args())
                .args(queue_args()),
        )
        .subcommand(
            verb("replace", "Replace the queue with a downlink")
                .args(device_args())
                .args(queue_args()),
        )
        .subcommand(verb("list", "List the queue").args(device_args()))
        .subcommand(verb("clear", "Clear the queue").args(device_args()))
}

fn relay_command() -> Command {
    let mode_args = || {
        [
            Arg::new("serving")
                .long("serving")
                .value_name("JSON")
                .conflicts_with("served")
                .help("settings of a serving relay"),
            Arg::new("served")
                .long("served")
                .value_name("JSON")
                .help("settings of a device served by a relay"),
        ]
    };
    let index = || {
        Arg::new("index")
            .long("index")
            .value_parser(clap::value_parser!(u32))
            .required(true)
    };
    Command::new("relay")
        .about("Manage the relay configuration of an end device")
        .subcommand_required(true)
        .subcommand(verb("create", "Configure a relay").args(device_args()).args(mode_args()))
        .subcommand(
            verb("get", "Get the relay configuration")
                .args(device_args())
                .args(select_args(&["settings"])),
        )
        .subcommand(
            verb("set", "Update the relay configuration")
                .visible_alias("update")
                .args(device_args())
                .args(mode_args()),
        )
        .subcommand(verb("delete", "Remove the relay configuration").args(device_args()))
        .subcommand(
            Command::new("uplink-forwarding-rule")
                .visible_alias("rule")
                .about("Uplink forwarding rules of a serving relay")
                .subcommand_required(true)
                .subcommand(
                    verb("add", "Add a forwarding rule")
                        .visible_alias("create")
                        .args(device_args())
                        .arg(index())
                        .arg(
                            Arg::new("rule")
                                .long("rule")
                                .value_name("JSON")
                                .default_value("{}")
                                .help("forwarding rule, e.g. {\"device_id\":\"dev2\"}"),
                        ),
                )
                .subcommand(
                    verb("delete", "Delete a forwarding rule")
                        .args(device_args())
                        .arg(index()),
                ),
        )
}

fn templates_command() -> Command {
    Command::new("templates")
        .about("End device templates")
        .subcommand_required(true)
        .subcommand(verb("list-formats", "List the formats the template converter accepts"))
        .subcommand(
            verb("from-data", "Convert vendor data to end device templates")
                .arg(
                    Arg::new("format_id")
                        .long("format-id")
                        .required(true),
                )
                .arg(
                    Arg::new("local_file")
                        .long("local-file")
                        .value_name("PATH")
                        .required(true)
                        .help("file with the vendor data"),
                )
                .arg(
                    Arg::new("mapping_local_file")
                        .long("mapping-local-file")
                        .value_name("PATH")
                        .help("JSON mappings to overlay on the templates"),
                ),
        )
}

pub fn command() -> Command {
    let readable = readable_paths();
    Command::new(NAME)
        .visible_aliases(["end-device", "devices", "device", "dev"])
        .about("Manage end devices")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(create_command())
        .subcommand(
            verb("get", "Get an end device")
                .args(device_args())
                .args(select_args(&readable)),
        )
        .subcommand(
            verb("list", "List the end devices of an application")
                .arg(app_id(true))
                .args(select_args(&readable))
                .args(paging_args()),
        )
        .subcommand(
            verb("search", "Search for end devices of an application")
                .arg(app_id(true))
                .args(select_args(&readable))
                .args(search_args())
                .args(paging_args()),
        )
        .subcommand(
            verb("set", "Update an end device")
                .visible_alias("update")
                .arg(app_id(false))
                .arg(device_id(false))
                .args(field_args(END_DEVICE_FIELDS))
                .arg(unset_arg())
                .arg(
                    Arg::new("touch")
                        .long("touch")
                        .action(ArgAction::SetTrue)
                        .help("write to every registry of the end device, even without changes"),
                )
                .arg(picture_arg()),
        )
        .subcommand(verb("delete", "Delete an end device").args(device_args()))
        .subcommand(
            verb("batch-delete", "Delete end devices of an application")
                .arg(app_id(true))
                .arg(
                    Arg::new("device_ids")
                        .value_name("DEVICE_ID")
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(verb("reset", "Reset the session and MAC state of an end device").args(device_args()))
        .subcommand(
            verb("claim", "Claim an end device on its external Join Server")
                .args(device_args())
                .arg(
                    Arg::new("authentication_code")
                        .long("authentication-code")
                        .value_name("CODE")
                        .required(true),
                )
                .arg(Arg::new("dev_eui").long("dev-eui").value_name("EUI"))
                .arg(Arg::new("join_eui").long("join-eui").value_name("EUI")),
        )
        .subcommand(
            verb("generate-qr", "Generate a QR code for an end device")
                .args(device_args())
                .arg(
                    Arg::new("format_id")
                        .long("format-id")
                        .default_value("tr005"),
                )
                .arg(
                    Arg::new("size")
                        .long("size")
                        .value_parser(clap::value_parser!(u32))
                        .help("image size in pixels; without it only the text is generated"),
                ),
        )
        .subcommand(verb("list-qr-formats", "List QR code formats"))
        .subcommand(templates_command())
        .subcommand(downlink_command())
        .subcommand(relay_command())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_paths_cover_every_registry() {
        let paths = readable_paths();
        for path in ["name", "mac_state", "session", "formatters", "root_keys"] {
            assert!(paths.contains(&path), "{}", path);
        }
        assert!(!paths.contains(&"ids"));
        assert!(paths.windows(2).all(|w| w[0] < w[1]));
    }
}
