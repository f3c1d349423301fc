//! `events`: stream events of entities from every backend that publishes
//! them, fanned into one output.

use lwstack_core::events::{self, EventsRequest};
use lwstack_core::ids::{ApplicationIds, ClientIds, EndDeviceIds, EntityIds, GatewayIds, OrganizationIds, UserIds};
use lwstack_core::CoreError;
use tracing::debug;

use crate::cli::EventsArgs;
use crate::context::Context;
use crate::error::CliError;

fn end_device_ids(raw: &str) -> Result<EndDeviceIds, CliError> {
    match raw.split_once('/') {
        Some((app, dev)) if !app.is_empty() && !dev.is_empty() => Ok(EndDeviceIds::new(app, dev)),
        _ => Err(CliError::InvalidArgument(format!(
            "end device `{}` is not of the form <application-id>/<device-id>",
            raw
        ))),
    }
}

fn events_request(args: EventsArgs) -> Result<EventsRequest, CliError> {
    let mut identifiers: Vec<EntityIds> = Vec::new();
    identifiers.extend(args.application_ids.into_iter().map(|id| EntityIds::Application(ApplicationIds::new(id))));
    for raw in &args.end_device_ids {
        identifiers.push(EntityIds::EndDevice(end_device_ids(raw)?));
    }
    identifiers.extend(args.gateway_ids.into_iter().map(|gateway_id| {
        EntityIds::Gateway(GatewayIds {
            gateway_id,
            ..Default::default()
        })
    }));
    identifiers.extend(args.client_ids.into_iter().map(|client_id| EntityIds::Client(ClientIds { client_id })));
    identifiers.extend(args.user_ids.into_iter().map(|user_id| EntityIds::User(UserIds { user_id })));
    identifiers.extend(
        args.organization_ids
            .into_iter()
            .map(|organization_id| EntityIds::Organization(OrganizationIds { organization_id })),
    );
    if identifiers.is_empty() {
        return Err(CliError::InvalidArgument("give at least one entity to stream events of".to_string()));
    }
    Ok(EventsRequest {
        identifiers,
        tail: args.tail,
        after: args.after,
        names: args.names,
    })
}

pub async fn run_events(ctx: &Context, args: EventsArgs) -> Result<(), CliError> {
    let request = events_request(args)?;
    debug!(roles = ?request.roles(), "subscribing to events");
    let client = ctx.client()?;
    let subscription = events::subscribe(&client, &request).await?;
    subscription
        .for_each(|event| {
            ctx.output
                .print_item(&event)
                .map_err(|e| CoreError::Other(e.to_string()))
        })
        .await?;
    Ok(())
}
