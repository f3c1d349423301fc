use lwstack_core::access;

use crate::context::Context;
use crate::error::CliError;

/// Print what the current credentials are and which rights they carry.
pub async fn run_auth_info(ctx: &Context) -> Result<(), CliError> {
    let client = ctx.client()?;
    ctx.output.print(&access::auth_info(&client).await?)
}
