//! `login`: OAuth authorization code flow or an API key.

use std::sync::Arc;

use lwstack_core::auth::callback::{self, CallbackServer};
use lwstack_core::auth::oauth::PASTE_REDIRECT_URI;
use lwstack_core::auth::{validate_authorization_code, Authenticator, OAuthClient, OAuthServer};
use lwstack_core::config::ServiceRole;
use lwstack_core::HttpTransport;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::LoginArgs;
use crate::context::Context;
use crate::error::CliError;

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

pub async fn run_login(ctx: &Context, args: LoginArgs) -> Result<(), CliError> {
    let transport = HttpTransport::new(ctx.http_settings())?;
    let auth = ctx
        .authenticator(&transport)?
        .ok_or_else(|| CliError::Other("no config directory to store credentials in".to_string()))?;
    let hosts = ctx.config.addresses.known_hosts();

    if let Some(api_key) = &args.api_key {
        auth.login_with_api_key(api_key, hosts).await?;
        info!(credentials_id = %ctx.config.credentials_id, "stored API key");
        return Ok(());
    }

    let address = ctx
        .config
        .addresses
        .address(ServiceRole::OAuth)
        .ok_or_else(|| CliError::from(ServiceRole::OAuth.disabled_error()))?;
    let oauth = OAuthClient::new(transport.http_client()?, address);

    if args.callback {
        login_with_callback(ctx, &auth, &oauth, &args.callback_address, hosts).await
    } else {
        login_with_paste(ctx, &auth, &oauth, hosts).await
    }
}

async fn login_with_callback(
    ctx: &Context,
    auth: &Arc<Authenticator>,
    oauth: &OAuthClient,
    address: &str,
    hosts: Vec<String>,
) -> Result<(), CliError> {
    let state = random_state();
    let server = CallbackServer::bind(address, state.clone()).await?;
    let redirect_uri = callback::redirect_uri(address);
    let url = oauth.authorize_url(&redirect_uri, &state)?;
    eprintln!("Open this URL in a browser to log in:\n\n  {}\n", url);
    info!(address = %server.local_addr(), "waiting for the authorization code");

    let code = server.code(&ctx.cancel).await?;
    auth.login_with_code(&code, &redirect_uri, hosts).await?;
    Ok(())
}

async fn login_with_paste(
    ctx: &Context,
    auth: &Arc<Authenticator>,
    oauth: &OAuthClient,
    hosts: Vec<String>,
) -> Result<(), CliError> {
    let url = oauth.authorize_url(PASTE_REDIRECT_URI, &random_state())?;
    eprintln!("Open this URL in a browser to log in:\n\n  {}\n", url);
    eprint!("Paste the authorization code: ");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(CliError::from(lwstack_core::ApiError::cancelled())),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Err(CliError::InvalidArgument("no authorization code given".to_string()));
        };
        match validate_authorization_code(&line) {
            Ok(code) => {
                auth.login_with_code(&code, PASTE_REDIRECT_URI, hosts).await?;
                return Ok(());
            }
            Err(e) => {
                warn!("{}", e.message);
                eprint!("Paste the authorization code: ");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_state() {
        let a = random_state();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_state());
    }
}
