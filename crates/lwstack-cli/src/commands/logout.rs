//! `logout`: revoke and forget cached credentials.

use lwstack_core::HttpTransport;

use crate::cli::LogoutArgs;
use crate::context::Context;
use crate::error::CliError;

pub async fn run_logout(ctx: &Context, args: LogoutArgs) -> Result<(), CliError> {
    let transport = HttpTransport::new(ctx.http_settings())?;
    let Some(auth) = ctx.authenticator(&transport)? else {
        return Ok(());
    };
    if args.all {
        auth.logout_all().await?;
    } else {
        auth.logout().await?;
    }
    Ok(())
}
