//! Commands of the Identity Server registry entities, built from their
//! descriptors.

use clap::{Arg, ArgAction, ArgGroup, Command};
use lwstack_core::integrations::{IntegrationKind, PUBSUBS, WEBHOOKS};
use lwstack_core::schema::entities::{API_KEY_FIELDS, APPLICATIONS, CLIENTS, GATEWAYS, USERS};
use lwstack_core::schema::EntityDescriptor;

use super::flags::{field_args, paging_args, search_args, select_args, unset_arg};

fn id_arg(entity: &EntityDescriptor) -> Arg {
    Arg::new("id")
        .value_name(entity.id_field.to_uppercase())
        .required(true)
        .help(format!("{} ID", entity.singular))
}

fn parent_arg(entity: &EntityDescriptor) -> Arg {
    Arg::new("parent")
        .value_name(entity.id_field.to_uppercase())
        .required(true)
        .help(format!("{} ID", entity.singular))
}

/// `--user-id` and `--organization-id`.
fn account_args() -> [Arg; 2] {
    [
        Arg::new("user_id").long("user-id").value_name("USER_ID"),
        Arg::new("organization_id")
            .long("organization-id")
            .value_name("ORGANIZATION_ID"),
    ]
}

fn account_group(required: bool) -> ArgGroup {
    ArgGroup::new("account")
        .args(["user_id", "organization_id"])
        .required(required)
}

fn verb(name: &'static str, about: String) -> Command {
    Command::new(name).about(about)
}

/// The generic verbs and extras of an entity.
pub fn command(entity: &'static EntityDescriptor) -> Command {
    let readable = entity.readable_paths();
    let plural = entity.name;
    let singular = entity.singular;

    let mut create = verb("create", format!("Create a {}", singular))
        .arg(id_arg(entity))
        .args(field_args(entity.fields));
    if entity.owned {
        create = create.args(account_args()).group(account_group(false));
    }

    let mut list = verb("list", format!("List {}", plural))
        .args(select_args(&readable))
        .args(paging_args())
        .arg(
            Arg::new("deleted")
                .long("deleted")
                .action(ArgAction::SetTrue)
                .help(format!("list deleted {}", plural)),
        );
    if entity.owned {
        list = list.args(account_args()).group(account_group(false));
    }

    let mut cmd = Command::new(entity.name)
        .visible_aliases(entity.aliases.iter().copied())
        .about(format!("Manage {}", plural))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(create)
        .subcommand(
            verb("get", format!("Get a {}", singular))
                .arg(id_arg(entity))
                .args(select_args(&readable)),
        )
        .subcommand(list);

    if entity.rpcs.search.is_some() {
        cmd = cmd.subcommand(
            verb("search", format!("Search for {}", plural))
                .args(select_args(&readable))
                .args(search_args())
                .args(paging_args()),
        );
    }

    cmd = cmd
        .subcommand(
            verb("set", format!("Update a {}", singular))
                .visible_alias("update")
                .arg(id_arg(entity))
                .args(field_args(entity.fields))
                .arg(unset_arg()),
        )
        .subcommand(verb("delete", format!("Delete a {}", singular)).arg(id_arg(entity)))
        .subcommand(verb("restore", format!("Restore a recently deleted {}", singular)).arg(id_arg(entity)))
        .subcommand(verb("purge", format!("Purge a deleted {}", singular)).arg(id_arg(entity)));

    if !std::ptr::eq(entity, &CLIENTS) {
        cmd = cmd.subcommand(api_keys_command(entity));
    }
    if !std::ptr::eq(entity, &USERS) {
        cmd = cmd.subcommand(collaborators_command(entity));
    }
    if std::ptr::eq(entity, &APPLICATIONS) {
        cmd = application_extras(cmd);
    }
    if std::ptr::eq(entity, &GATEWAYS) {
        cmd = cmd.subcommand(
            verb("connection-stats", "Show connection statistics of a gateway".to_string())
                .arg(id_arg(entity)),
        );
    }
    cmd
}

fn api_keys_command(entity: &'static EntityDescriptor) -> Command {
    let key_id = || Arg::new("key_id").value_name("API_KEY_ID").required(true);
    Command::new("api-keys")
        .visible_aliases(["api-key", "keys"])
        .about(format!("Manage API keys of {}", entity.name))
        .subcommand_required(true)
        .subcommand(
            verb("create", "Create an API key".to_string())
                .arg(parent_arg(entity))
                .args(field_args(API_KEY_FIELDS)),
        )
        .subcommand(
            verb("get", "Get an API key".to_string())
                .arg(parent_arg(entity))
                .arg(key_id()),
        )
        .subcommand(
            verb("list", "List API keys".to_string())
                .arg(parent_arg(entity))
                .args(paging_args()),
        )
        .subcommand(
            verb("update", "Update an API key".to_string())
                .visible_alias("set")
                .arg(parent_arg(entity))
                .arg(key_id())
                .args(field_args(API_KEY_FIELDS))
                .arg(unset_arg()),
        )
        .subcommand(
            verb("delete", "Delete an API key".to_string())
                .arg(parent_arg(entity))
                .arg(key_id()),
        )
}

fn collaborators_command(entity: &'static EntityDescriptor) -> Command {
    let with_account = |cmd: Command| cmd.arg(parent_arg(entity)).args(account_args()).group(account_group(true));
    Command::new("collaborators")
        .visible_aliases(["collaborator", "members"])
        .about(format!("Manage collaborators of {}", entity.name))
        .subcommand_required(true)
        .subcommand(
            verb("list", "List collaborators".to_string())
                .arg(parent_arg(entity))
                .args(paging_args()),
        )
        .subcommand(with_account(verb("get", "Get a collaborator".to_string())))
        .subcommand(
            with_account(verb("set", "Set the rights of a collaborator".to_string())).arg(
                Arg::new("rights")
                    .long("rights")
                    .value_delimiter(',')
                    .action(ArgAction::Append)
                    .required(true)
                    .help("rights of the collaborator"),
            ),
        )
        .subcommand(with_account(verb("delete", "Remove a collaborator".to_string())))
}

fn app_id_arg() -> Arg {
    Arg::new("application_id")
        .value_name("APPLICATION_ID")
        .required(true)
}

fn integration_command(kind: &'static IntegrationKind) -> Command {
    let id = || {
        Arg::new("id")
            .value_name(kind.id_field.to_uppercase())
            .required(true)
    };
    Command::new(kind.name)
        .visible_aliases(kind.aliases.iter().copied())
        .about(format!("Manage application {}", kind.name))
        .subcommand_required(true)
        .subcommand(
            verb("create", format!("Create a {}", kind.message_field))
                .arg(app_id_arg())
                .arg(id())
                .args(field_args(kind.fields)),
        )
        .subcommand(
            verb("get", format!("Get a {}", kind.message_field))
                .arg(app_id_arg())
                .arg(id())
                .args(select_args(kind.readable_paths())),
        )
        .subcommand(
            verb("list", format!("List {}", kind.name))
                .arg(app_id_arg())
                .args(select_args(kind.readable_paths())),
        )
        .subcommand(
            verb("set", format!("Update a {}", kind.message_field))
                .visible_alias("update")
                .arg(app_id_arg())
                .arg(id())
                .args(field_args(kind.fields))
                .arg(unset_arg()),
        )
        .subcommand(
            verb("delete", format!("Delete a {}", kind.message_field))
                .arg(app_id_arg())
                .arg(id()),
        )
}

fn storage_args() -> Vec<Arg> {
    vec![
        app_id_arg(),
        Arg::new("device_id").long("device-id").help("only uplinks of this end device"),
        Arg::new("type")
            .long("type")
            .default_value("uplink_message")
            .help("message type"),
        Arg::new("limit")
            .long("limit")
            .value_parser(clap::value_parser!(u32)),
        Arg::new("after").long("after").value_name("TIME"),
        Arg::new("before").long("before").value_name("TIME"),
        Arg::new("last")
            .long("last")
            .value_name("DURATION")
            .help("only uplinks received in this period, e.g. 1h"),
        Arg::new("f_port")
            .long("f-port")
            .value_parser(clap::value_parser!(u32)),
        Arg::new("order").long("order"),
    ]
}

fn application_extras(cmd: Command) -> Command {
    cmd.subcommand(
        verb("issue-dev-eui", "Issue a DevEUI from the application's block".to_string())
            .arg(app_id_arg()),
    )
    .subcommand(
        integration_command(&WEBHOOKS).subcommand(verb(
            "list-templates",
            "List webhook templates".to_string(),
        )),
    )
    .subcommand(integration_command(&PUBSUBS))
    .subcommand(
        Command::new("storage")
            .visible_alias("stored")
            .about("Query the storage integration")
            .subcommand_required(true)
            .subcommand(verb("get", "Get stored uplinks".to_string()).args(storage_args()))
            .subcommand(verb("count", "Count stored uplinks".to_string()).args(storage_args())),
    )
    .subcommand(
        Command::new("packages")
            .about("Application packages")
            .subcommand_required(true)
            .subcommand(
                verb(
                    "list-default-associations",
                    "List default package associations".to_string(),
                )
                .arg(app_id_arg()),
            ),
    )
    .subcommand(
        verb("subscribe", "Stream application upstream messages".to_string()).arg(app_id_arg()),
    )
}
