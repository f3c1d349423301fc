//! Per-invocation context: merged configuration, output and the
//! cancellation scope shared by every call of the command.

use std::path::PathBuf;
use std::sync::Arc;

use lwstack_core::api::http::HttpSettings;
use lwstack_core::api::RetryPolicy;
use lwstack_core::auth::{Authenticator, OAuthClient, OAuthServer};
use lwstack_core::config::{find_config_file, Config, ConfigFile, ServiceRole};
use lwstack_core::storage::default_credentials_store;
use lwstack_core::{ApiClient, HttpTransport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cli::GlobalArgs;
use crate::error::CliError;
use crate::output::{get_formatter, Output};

pub struct Context {
    pub config: Config,
    /// Config file the file layer was read from, if any.
    pub config_path: Option<PathBuf>,
    pub cancel: CancellationToken,
    pub output: Output,
}

impl Context {
    /// Merge the config file with the environment and flag layer.
    pub fn load(global: &GlobalArgs, cancel: CancellationToken) -> Result<Self, CliError> {
        let config_path = find_config_file(global.config.as_deref());
        let file = match &config_path {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                ConfigFile::load(path)?
            }
            None => ConfigFile::default(),
        };
        let config = file.merge(global.to_layer()).resolve()?;
        let output = Output::new(get_formatter(&config.output_format)?, global.stream_output);
        Ok(Self {
            config,
            config_path,
            cancel,
            output,
        })
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            insecure: self.config.insecure,
            ca: self.config.ca.clone(),
            request_timeout: self.config.request_timeout,
            ..Default::default()
        }
    }

    /// Authenticator over the credentials cache, with the OAuth server when
    /// one is configured.
    pub fn authenticator(&self, transport: &HttpTransport) -> Result<Option<Arc<Authenticator>>, CliError> {
        let Some(store) = default_credentials_store() else {
            warn!("no config directory available, calls are not authenticated");
            return Ok(None);
        };
        let oauth = match self.config.addresses.address(ServiceRole::OAuth) {
            Some(address) if self.config.addresses.is_enabled(ServiceRole::OAuth) => {
                let server: Arc<dyn OAuthServer> =
                    Arc::new(OAuthClient::new(transport.http_client()?, address));
                Some(server)
            }
            _ => None,
        };
        Ok(Some(Arc::new(Authenticator::new(
            store,
            self.config.credentials_id.clone(),
            oauth,
        ))))
    }

    /// An authenticated client of the configured cluster.
    pub fn client(&self) -> Result<ApiClient, CliError> {
        let transport = HttpTransport::new(self.http_settings())?;
        let auth = self.authenticator(&transport)?;
        Ok(ApiClient::new(
            Arc::new(transport),
            self.config.addresses.clone(),
            auth,
            self.cancel.clone(),
        )
        .with_retry(RetryPolicy::from(&self.config))
        .with_allow_unknown_hosts(self.config.allow_unknown_hosts))
    }
}
