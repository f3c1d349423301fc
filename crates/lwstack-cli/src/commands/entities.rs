//! Generic verbs of the Identity Server registry entities.

use clap::ArgMatches;
use lwstack_core::events;
use lwstack_core::ids::{EntityIds, OrganizationIds, UserIds};
use lwstack_core::integrations::{PUBSUBS, WEBHOOKS};
use lwstack_core::registry;
use lwstack_core::schema::EntityDescriptor;
use lwstack_core::CoreError;
use serde_json::json;
use tracing::info;

use crate::commands::{access, integrations};
use crate::context::Context;
use crate::error::CliError;
use crate::tree::flags::{bind_fields, bind_update, paging, required, search_query, selected_paths, string};

/// The user or organization given with `--user-id` or `--organization-id`.
pub(crate) fn account(matches: &ArgMatches) -> Option<EntityIds> {
    if let Some(user_id) = string(matches, "user_id") {
        return Some(EntityIds::User(UserIds { user_id }));
    }
    string(matches, "organization_id").map(|organization_id| EntityIds::Organization(OrganizationIds { organization_id }))
}

pub(crate) fn subcommand(matches: &ArgMatches) -> Result<(&str, &ArgMatches), CliError> {
    matches
        .subcommand()
        .ok_or_else(|| CliError::InvalidArgument("missing subcommand".to_string()))
}

/// Run a verb of `entity`.
pub async fn run_entity(
    ctx: &Context,
    entity: &'static EntityDescriptor,
    matches: &ArgMatches,
) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    match verb {
        "create" => run_create(ctx, entity, m).await,
        "get" => run_get(ctx, entity, m).await,
        "list" => run_list(ctx, entity, m).await,
        "search" => run_search(ctx, entity, m).await,
        "set" => run_set(ctx, entity, m).await,
        "delete" | "restore" | "purge" => run_lifecycle(ctx, entity, verb, m).await,
        "api-keys" => access::run_api_keys(ctx, entity, m).await,
        "collaborators" => access::run_collaborators(ctx, entity, m).await,
        "issue-dev-eui" => run_issue_dev_eui(ctx, m).await,
        "connection-stats" => run_connection_stats(ctx, m).await,
        "webhooks" => integrations::run_integration(ctx, &WEBHOOKS, m).await,
        "pubsubs" => integrations::run_integration(ctx, &PUBSUBS, m).await,
        "storage" => integrations::run_storage(ctx, m).await,
        "packages" => integrations::run_packages(ctx, m).await,
        "subscribe" => run_subscribe(ctx, m).await,
        other => Err(CliError::InvalidArgument(format!(
            "unknown {} command `{}`",
            entity.singular, other
        ))),
    }
}

async fn run_create(ctx: &Context, entity: &'static EntityDescriptor, m: &ArgMatches) -> Result<(), CliError> {
    let id = required(m, "id")?;
    let (message, _) = bind_fields(m, entity.fields)?;
    let owner = account(m);
    let client = ctx.client()?;
    let created = registry::create(&client, entity, &id, message, owner.as_ref()).await?;
    info!(entity = entity.singular, id = id.as_str(), "created");
    ctx.output.print(&created)
}

async fn run_get(ctx: &Context, entity: &'static EntityDescriptor, m: &ArgMatches) -> Result<(), CliError> {
    let id = required(m, "id")?;
    let mask = selected_paths(m, &entity.readable_paths());
    let client = ctx.client()?;
    let found = registry::get(&client, entity, &id, &mask).await?;
    ctx.output.print(&found)
}

async fn run_list(ctx: &Context, entity: &'static EntityDescriptor, m: &ArgMatches) -> Result<(), CliError> {
    let mask = selected_paths(m, &entity.readable_paths());
    let collaborator = account(m);
    let client = ctx.client()?;
    let found = registry::list(&client, entity, collaborator.as_ref(), &mask, &paging(m)).await?;
    ctx.output.print_list(&found)
}

async fn run_search(ctx: &Context, entity: &'static EntityDescriptor, m: &ArgMatches) -> Result<(), CliError> {
    let mask = selected_paths(m, &entity.readable_paths());
    let query = search_query(m)?;
    let client = ctx.client()?;
    let found = registry::search(&client, entity, &query, &mask, &paging(m)).await?;
    ctx.output.print_list(&found)
}

async fn run_set(ctx: &Context, entity: &'static EntityDescriptor, m: &ArgMatches) -> Result<(), CliError> {
    let id = required(m, "id")?;
    // Conflicting paths fail here, before a client exists.
    let (message, mask) = bind_update(m, entity.fields)?;
    let client = ctx.client()?;
    let updated = registry::update(&client, entity, &id, message, &mask).await?;
    ctx.output.print(&updated)
}

async fn run_lifecycle(
    ctx: &Context,
    entity: &'static EntityDescriptor,
    verb: &str,
    m: &ArgMatches,
) -> Result<(), CliError> {
    let id = required(m, "id")?;
    let client = ctx.client()?;
    let done = match verb {
        "delete" => {
            registry::delete(&client, entity, &id).await?;
            "deleted"
        }
        "restore" => {
            registry::restore(&client, entity, &id).await?;
            "restored"
        }
        _ => {
            registry::purge(&client, entity, &id).await?;
            "purged"
        }
    };
    info!(entity = entity.singular, id = id.as_str(), "{}", done);
    Ok(())
}

async fn run_issue_dev_eui(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let application_id = required(m, "application_id")?;
    let client = ctx.client()?;
    let dev_eui = registry::issue_dev_eui(&client, &application_id).await?;
    ctx.output.print(&json!({ "dev_eui": dev_eui.to_string() }))
}

async fn run_connection_stats(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let gateway_id = required(m, "id")?;
    let client = ctx.client()?;
    let stats = registry::gateway_connection_stats(&client, &gateway_id).await?;
    ctx.output.print(&stats)
}

async fn run_subscribe(ctx: &Context, m: &ArgMatches) -> Result<(), CliError> {
    let application_id = required(m, "application_id")?;
    let client = ctx.client()?;
    let subscription = events::subscribe_application(&client, &application_id).await?;
    subscription
        .for_each(|message| {
            ctx.output
                .print_item(&message)
                .map_err(|e| CoreError::Other(e.to_string()))
        })
        .await?;
    Ok(())
}
