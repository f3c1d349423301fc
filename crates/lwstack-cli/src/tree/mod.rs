//! Registry nouns generated from their schemas.
//!
//! The fixed commands are derived in [`crate::cli`]; the entity nouns are
//! built here with the clap builder API, one command per descriptor, and
//! dispatched to [`crate::commands`].

pub mod end_devices;
pub mod entities;
pub mod flags;

use clap::{ArgMatches, Command};
use lwstack_core::schema::entities::{find, ENTITIES};

use crate::commands;
use crate::context::Context;
use crate::error::CliError;

/// Add the generated nouns to the root command.
pub fn augment(mut root: Command) -> Command {
    for entity in ENTITIES {
        root = root.subcommand(entities::command(entity));
    }
    root.subcommand(end_devices::command())
}

/// Whether `name` is a generated noun.
pub fn handles(name: &str) -> bool {
    name == end_devices::NAME || ENTITIES.iter().any(|e| e.name == name)
}

pub async fn run(ctx: &Context, name: &str, matches: &ArgMatches) -> Result<(), CliError> {
    if name == end_devices::NAME {
        return commands::run_end_devices(ctx, matches).await;
    }
    let entity = find(name).ok_or_else(|| CliError::InvalidArgument(format!("unknown command `{}`", name)))?;
    commands::run_entity(ctx, entity, matches).await
}
