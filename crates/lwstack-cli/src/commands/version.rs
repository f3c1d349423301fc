use serde_json::json;

use crate::context::Context;
use crate::error::CliError;

pub fn run_version(ctx: &Context) -> Result<(), CliError> {
    ctx.output.print(&json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    }))
}
