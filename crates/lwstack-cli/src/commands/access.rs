//! API keys and collaborators of registry entities.

use clap::ArgMatches;
use lwstack_core::access::{self, NewApiKey};
use lwstack_core::ids::{ApplicationIds, ClientIds, EntityIds, GatewayIds, OrganizationIds, UserIds};
use lwstack_core::schema::entities::API_KEY_FIELDS;
use lwstack_core::schema::EntityDescriptor;
use serde_json::Value;
use tracing::info;

use crate::commands::entities::{account, subcommand};
use crate::context::Context;
use crate::error::CliError;
use crate::tree::flags::{bind_fields, bind_update, paging, required, strings};

/// Identifiers of an entity of kind `entity`.
fn parent_ids(entity: &EntityDescriptor, id: String) -> Result<EntityIds, CliError> {
    Ok(match entity.id_field {
        "application_id" => EntityIds::Application(ApplicationIds::new(id)),
        "gateway_id" => EntityIds::Gateway(GatewayIds {
            gateway_id: id,
            ..Default::default()
        }),
        "client_id" => EntityIds::Client(ClientIds { client_id: id }),
        "user_id" => EntityIds::User(UserIds { user_id: id }),
        "organization_id" => EntityIds::Organization(OrganizationIds { organization_id: id }),
        other => {
            return Err(CliError::InvalidArgument(format!(
                "{} has no API keys or collaborators",
                other
            )))
        }
    })
}

fn parent(entity: &EntityDescriptor, m: &ArgMatches) -> Result<EntityIds, CliError> {
    parent_ids(entity, required(m, "parent")?)
}

fn new_api_key(message: &Value) -> NewApiKey {
    NewApiKey {
        name: message.get("name").and_then(Value::as_str).map(str::to_string),
        rights: message
            .get("rights")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        expires_at: message.get("expires_at").and_then(Value::as_str).map(str::to_string),
    }
}

pub async fn run_api_keys(ctx: &Context, entity: &EntityDescriptor, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    let parent = parent(entity, m)?;
    match verb {
        "create" => {
            let (message, _) = bind_fields(m, API_KEY_FIELDS)?;
            let client = ctx.client()?;
            let created = access::create_api_key(&client, &parent, &new_api_key(&message)).await?;
            ctx.output.print(&created)
        }
        "get" => {
            let key_id = required(m, "key_id")?;
            let client = ctx.client()?;
            ctx.output.print(&access::get_api_key(&client, &parent, &key_id).await?)
        }
        "list" => {
            let client = ctx.client()?;
            let keys = access::list_api_keys(&client, &parent, &paging(m)).await?;
            ctx.output.print_list(&keys)
        }
        "update" => {
            let key_id = required(m, "key_id")?;
            let (message, mask) = bind_update(m, API_KEY_FIELDS)?;
            let client = ctx.client()?;
            let updated = access::update_api_key(&client, &parent, &key_id, message, &mask).await?;
            ctx.output.print(&updated)
        }
        "delete" => {
            let key_id = required(m, "key_id")?;
            let client = ctx.client()?;
            access::delete_api_key(&client, &parent, &key_id).await?;
            info!(key_id = key_id.as_str(), "deleted API key");
            Ok(())
        }
        other => Err(CliError::InvalidArgument(format!("unknown api-keys command `{}`", other))),
    }
}

pub async fn run_collaborators(
    ctx: &Context,
    entity: &EntityDescriptor,
    matches: &ArgMatches,
) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    let parent = parent(entity, m)?;
    if verb == "list" {
        let client = ctx.client()?;
        let collaborators = access::list_collaborators(&client, &parent, &paging(m)).await?;
        return ctx.output.print_list(&collaborators);
    }

    let collaborator = account(m).ok_or_else(|| {
        CliError::InvalidArgument("use --user-id or --organization-id".to_string())
    })?;
    let client = ctx.client()?;
    match verb {
        "get" => ctx
            .output
            .print(&access::get_collaborator(&client, &parent, &collaborator).await?),
        "set" => {
            let rights = strings(m, "rights");
            access::set_collaborator(&client, &parent, &collaborator, &rights).await?;
            info!(rights = rights.len(), "set collaborator rights");
            Ok(())
        }
        "delete" => {
            access::delete_collaborator(&client, &parent, &collaborator).await?;
            info!("removed collaborator");
            Ok(())
        }
        other => Err(CliError::InvalidArgument(format!(
            "unknown collaborators command `{}`",
            other
        ))),
    }
}
