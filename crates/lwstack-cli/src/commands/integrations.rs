//! Application Server integrations: webhooks, pub/subs, storage and
//! packages.

use clap::ArgMatches;
use lwstack_core::ids::ApplicationIds;
use lwstack_core::integrations::{self, IntegrationKind, StorageQuery};
use serde_json::json;
use tracing::info;

use crate::commands::entities::subcommand;
use crate::context::Context;
use crate::error::CliError;
use crate::tree::flags::{bind_fields, bind_update, number, required, selected_paths, string};

pub async fn run_integration(
    ctx: &Context,
    kind: &'static IntegrationKind,
    matches: &ArgMatches,
) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    if verb == "list-templates" {
        let client = ctx.client()?;
        return ctx
            .output
            .print_list(&integrations::list_webhook_templates(&client).await?);
    }

    let application_id = required(m, "application_id")?;
    match verb {
        "create" | "set" => {
            let id = required(m, "id")?;
            let (message, mask) = if verb == "create" {
                bind_fields(m, kind.fields)?
            } else {
                bind_update(m, kind.fields)?
            };
            let client = ctx.client()?;
            let stored = integrations::set(&client, kind, &application_id, &id, message, &mask).await?;
            ctx.output.print(&stored)
        }
        "get" => {
            let id = required(m, "id")?;
            let mask = selected_paths(m, kind.readable_paths());
            let client = ctx.client()?;
            ctx.output
                .print(&integrations::get(&client, kind, &application_id, &id, &mask).await?)
        }
        "list" => {
            let mask = selected_paths(m, kind.readable_paths());
            let client = ctx.client()?;
            ctx.output
                .print_list(&integrations::list(&client, kind, &application_id, &mask).await?)
        }
        "delete" => {
            let id = required(m, "id")?;
            let client = ctx.client()?;
            integrations::delete(&client, kind, &application_id, &id).await?;
            info!(kind = kind.message_field, id = id.as_str(), "deleted");
            Ok(())
        }
        other => Err(CliError::InvalidArgument(format!(
            "unknown {} command `{}`",
            kind.name, other
        ))),
    }
}

fn timestamp(m: &ArgMatches, id: &str) -> Result<Option<String>, CliError> {
    string(m, id)
        .map(|raw| {
            chrono::DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.to_rfc3339())
                .map_err(|e| CliError::InvalidArgument(format!("--{}: {}", id, e)))
        })
        .transpose()
}

fn storage_query(m: &ArgMatches) -> Result<StorageQuery, CliError> {
    let application_id = required(m, "application_id")?;
    let end_device_ids = string(m, "device_id").map(|device_id| {
        json!({
            "device_id": device_id,
            "application_ids": { "application_id": application_id.as_str() },
        })
    });
    Ok(StorageQuery {
        application_ids: ApplicationIds::new(application_id.as_str()),
        end_device_ids,
        kind: string(m, "type"),
        limit: number(m, "limit"),
        after: timestamp(m, "after")?,
        before: timestamp(m, "before")?,
        last: string(m, "last"),
        f_port: number(m, "f_port"),
        order: string(m, "order"),
    })
}

pub async fn run_storage(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    let query = storage_query(m)?;
    let client = ctx.client()?;
    match verb {
        "get" => ctx
            .output
            .print_list(&integrations::get_stored_uplinks(&client, &query).await?),
        "count" => ctx
            .output
            .print(&integrations::count_stored_uplinks(&client, &query).await?),
        other => Err(CliError::InvalidArgument(format!("unknown storage command `{}`", other))),
    }
}

pub async fn run_packages(ctx: &Context, matches: &ArgMatches) -> Result<(), CliError> {
    let (verb, m) = subcommand(matches)?;
    match verb {
        "list-default-associations" => {
            let application_id = required(m, "application_id")?;
            let client = ctx.client()?;
            let associations =
                integrations::list_default_package_associations(&client, &application_id).await?;
            ctx.output.print_list(&associations)
        }
        other => Err(CliError::InvalidArgument(format!("unknown packages command `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::entities;
    use lwstack_core::schema::entities::APPLICATIONS;

    #[test]
    fn test_storage_query_from_flags() {
        let matches = entities::command(&APPLICATIONS)
            .try_get_matches_from([
                "applications",
                "storage",
                "get",
                "app1",
                "--device-id=dev1",
                "--last=2h",
                "--f-port=3",
                "--after=2024-05-01T10:00:00Z",
            ])
            .unwrap();
        let (_, storage) = matches.subcommand().unwrap();
        let (_, get) = storage.subcommand().unwrap();
        let query = storage_query(get).unwrap();
        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(body["application_ids"]["application_id"], "app1");
        assert_eq!(body["end_device_ids"]["device_id"], "dev1");
        assert_eq!(body["type"], "uplink_message");
        assert_eq!(body["last"], "2h");
        assert_eq!(body["f_port"], 3);
        assert_eq!(body["after"], "2024-05-01T10:00:00+00:00");
    }
}
